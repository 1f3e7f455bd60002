//! HTTP API.
//!
//! Bodies are JSON and errors are reported as `{"error": "<message>"}`. Routes under
//! `/api/admin` require `Authorization: Bearer <admin key>`.
mod error;

use actix_web::dev::Payload;
use actix_web::http::header::{self, ContentDisposition, DispositionParam, DispositionType};
use actix_web::web::{self, Bytes, Data, Json, Path, Query};
use actix_web::{FromRequest, HttpRequest, HttpResponse};
use coursedesk_events::EventStore;
use futures::future::{ready, Ready};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use crate::application::{Application, NewCourse, NewSession};
use crate::domain::enrollment::SessionCommand;
use crate::domain::{DomainEvent, OrderStatus, Provider};

pub use error::ApiError;

/// Largest accepted attachment upload.
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// The key granting access to admin routes.
#[derive(Clone)]
pub struct AdminKey(pub String);

impl AdminKey {
    /// Compares `token` with the key in constant time. An empty key matches nothing.
    pub fn matches(&self, token: &str) -> bool {
        let (Some(expected), Some(candidate)) = (digest(&self.0), digest(token)) else {
            return false;
        };
        !self.0.is_empty() && candidate.verify_slice(&expected.finalize().into_bytes()).is_ok()
    }
}

fn digest(value: &str) -> Option<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(b"coursedesk admin key").ok()?;
    mac.update(value.as_bytes());
    Some(mac)
}

/// Guard of admin routes.
pub struct Admin;

impl Admin {
    fn authorize(req: &HttpRequest) -> Result<Self, ApiError> {
        let key = req
            .app_data::<Data<AdminKey>>()
            .ok_or(ApiError::Forbidden)?;
        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(ApiError::Unauthorized)?;
        if !key.matches(token) {
            return Err(ApiError::Forbidden);
        }
        Ok(Admin)
    }
}

impl FromRequest for Admin {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Admin::authorize(req))
    }
}

/// Registers the routes, error handlers and shared state of the API.
pub fn configure<ES>(
    app: Application<ES>,
    admin_key: AdminKey,
) -> impl FnOnce(&mut web::ServiceConfig)
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(Data::new(app))
            .app_data(Data::new(admin_key))
            .app_data(web::JsonConfig::default().error_handler(|err, _| {
                ApiError::BadRequest(err.to_string()).into()
            }))
            .app_data(web::PathConfig::default().error_handler(|err, _| {
                ApiError::BadRequest(err.to_string()).into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _| {
                ApiError::BadRequest(err.to_string()).into()
            }))
            .service(
                web::scope("/api")
                    .route("/carts", web::post().to(init_cart::<ES>))
                    .route("/carts/merge", web::post().to(merge_carts::<ES>))
                    .route("/carts/{cart_id}", web::get().to(get_cart::<ES>))
                    .route("/carts/{cart_id}/items", web::post().to(add_cart_item::<ES>))
                    .route(
                        "/carts/{cart_id}/items/{cart_item_id}",
                        web::delete().to(remove_cart_item::<ES>),
                    )
                    .route("/orders", web::post().to(place_order::<ES>))
                    .route("/orders/{order_id}", web::get().to(get_order::<ES>))
                    .route(
                        "/orders/{order_id}/payments",
                        web::post().to(initiate_payment::<ES>),
                    )
                    .route(
                        "/payments/hyperpay/webhook",
                        web::post().to(hyperpay_webhook::<ES>),
                    )
                    .route(
                        "/payments/clickpay/webhook",
                        web::post().to(clickpay_webhook::<ES>),
                    )
                    .route("/secure/materials/{token}", web::get().to(download::<ES>))
                    .route("/secure-download/{token}", web::get().to(download::<ES>))
                    .route("/courses/{course_id}", web::get().to(get_course::<ES>))
                    .service(admin_scope::<ES>()),
            );
    }
}

fn admin_scope<ES>() -> actix_web::Scope
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    web::scope("/admin")
        .route(
            "/orders/{order_id}/status",
            web::put().to(change_order_status::<ES>),
        )
        .route(
            "/fix-missing-enrollments",
            web::post().to(fix_missing_enrollments::<ES>),
        )
        .route(
            "/enrollment-diagnostics",
            web::get().to(enrollment_diagnostics::<ES>),
        )
        .route("/enrollments/{id}", web::get().to(get_enrollment::<ES>))
        .route(
            "/enrollments/{id}/secure-links",
            web::post().to(create_secure_links::<ES>),
        )
        .service(
            web::resource("/enrollments/{id}/session")
                .route(web::post().to(attach_session::<ES>))
                .route(web::put().to(switch_session::<ES>))
                .route(web::delete().to(detach_session::<ES>)),
        )
        .route(
            "/enrollments/{id}/cancel",
            web::post().to(cancel_enrollment::<ES>),
        )
        .route(
            "/secure-links/{token}/revoke",
            web::post().to(revoke_secure_link::<ES>),
        )
        .route("/categories", web::post().to(create_category::<ES>))
        .route("/instructors", web::post().to(register_instructor::<ES>))
        .route("/courses", web::post().to(create_course::<ES>))
        .route(
            "/courses/{id}/activate",
            web::post().to(activate_course::<ES>),
        )
        .route(
            "/courses/{id}/deactivate",
            web::post().to(deactivate_course::<ES>),
        )
        .route("/courses/{id}/price", web::post().to(reprice_course::<ES>))
        .route(
            "/courses/{id}/sessions",
            web::post().to(schedule_session::<ES>),
        )
        .route("/sessions/{id}", web::put().to(reschedule_session::<ES>))
        .service(
            web::resource("/courses/{id}/attachments")
                .app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
                .route(web::post().to(upload_attachment::<ES>)),
        )
        .route(
            "/courses/{id}/attachments/{attachment_id}/revoke",
            web::post().to(revoke_attachment::<ES>),
        )
}

type AppData<ES> = Data<Application<ES>>;

#[derive(Deserialize)]
struct InitCart {
    user_id: Option<Uuid>,
    anonymous_id: Option<String>,
}

async fn init_cart<ES>(app: AppData<ES>, body: Json<InitCart>) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let body = body.into_inner();
    let cart = app.init_cart(body.user_id, body.anonymous_id).await?;
    Ok(HttpResponse::Ok().json(cart))
}

async fn get_cart<ES>(app: AppData<ES>, cart_id: Path<Uuid>) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    Ok(HttpResponse::Ok().json(app.get_cart(cart_id.into_inner()).await?))
}

#[derive(Deserialize)]
struct AddItem {
    course_id: Uuid,
    session_id: Option<Uuid>,
}

async fn add_cart_item<ES>(
    app: AppData<ES>,
    cart_id: Path<Uuid>,
    body: Json<AddItem>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let cart = app
        .add_cart_item(cart_id.into_inner(), body.course_id, body.session_id)
        .await?;
    Ok(HttpResponse::Ok().json(cart))
}

async fn remove_cart_item<ES>(
    app: AppData<ES>,
    path: Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let (cart_id, cart_item_id) = path.into_inner();
    Ok(HttpResponse::Ok().json(app.remove_cart_item(cart_id, cart_item_id).await?))
}

#[derive(Deserialize)]
struct Merge {
    anonymous_id: String,
    user_id: Uuid,
}

async fn merge_carts<ES>(app: AppData<ES>, body: Json<Merge>) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let body = body.into_inner();
    Ok(HttpResponse::Ok().json(app.merge_carts(body.anonymous_id, body.user_id).await?))
}

#[derive(Deserialize)]
struct CreateOrder {
    cart_id: Uuid,
    user_id: Uuid,
}

async fn place_order<ES>(
    app: AppData<ES>,
    body: Json<CreateOrder>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let order = app.place_order(body.cart_id, body.user_id).await?;
    Ok(HttpResponse::Created().json(order))
}

async fn get_order<ES>(app: AppData<ES>, order_id: Path<Uuid>) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    Ok(HttpResponse::Ok().json(app.get_order(order_id.into_inner()).await?))
}

#[derive(Deserialize)]
struct NewPayment {
    provider: Provider,
}

async fn initiate_payment<ES>(
    app: AppData<ES>,
    order_id: Path<Uuid>,
    body: Json<NewPayment>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let payment = app
        .initiate_payment(order_id.into_inner(), body.provider)
        .await?;
    Ok(HttpResponse::Created().json(payment))
}

const SIGNATURE_HEADER: &str = "X-Signature";

async fn webhook<ES>(
    app: &Application<ES>,
    provider: Provider,
    req: &HttpRequest,
    body: &Bytes,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let receipt = app.handle_webhook(provider, body, signature).await?;
    Ok(HttpResponse::Ok().json(receipt))
}

async fn hyperpay_webhook<ES>(
    app: AppData<ES>,
    req: HttpRequest,
    body: Bytes,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    webhook(&app, Provider::HyperPay, &req, &body).await
}

async fn clickpay_webhook<ES>(
    app: AppData<ES>,
    req: HttpRequest,
    body: Bytes,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    webhook(&app, Provider::ClickPay, &req, &body).await
}

async fn download<ES>(app: AppData<ES>, token: Path<String>) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let download = app.download_material(&token).await?;
    Ok(HttpResponse::Ok()
        .content_type(download.content_type)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(download.file_name)],
        })
        .no_chunking(download.size)
        .streaming(download.body))
}

async fn get_course<ES>(app: AppData<ES>, course_id: Path<Uuid>) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    Ok(HttpResponse::Ok().json(app.get_course(course_id.into_inner()).await?))
}

#[derive(Deserialize)]
struct StatusChange {
    status: OrderStatus,
}

async fn change_order_status<ES>(
    _: Admin,
    app: AppData<ES>,
    order_id: Path<Uuid>,
    body: Json<StatusChange>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let order = app
        .change_order_status(order_id.into_inner(), body.status)
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

async fn fix_missing_enrollments<ES>(_: Admin, app: AppData<ES>) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    Ok(HttpResponse::Ok().json(app.fix_missing_enrollments().await?))
}

async fn enrollment_diagnostics<ES>(_: Admin, app: AppData<ES>) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    Ok(HttpResponse::Ok().json(app.enrollment_diagnostics().await?))
}

async fn get_enrollment<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    Ok(HttpResponse::Ok().json(app.get_enrollment(id.into_inner()).await?))
}

#[derive(Deserialize)]
struct SecureLinksRequest {
    attachment_ids: Vec<Uuid>,
}

async fn create_secure_links<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
    body: Json<SecureLinksRequest>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let links = app
        .create_secure_links(id.into_inner(), body.into_inner().attachment_ids)
        .await?;
    Ok(HttpResponse::Created().json(json!({ "links": links })))
}

#[derive(Deserialize)]
struct SessionRequest {
    session_id: Uuid,
}

async fn attach_session<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
    body: Json<SessionRequest>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let enrollment = app
        .change_enrollment_session(id.into_inner(), SessionCommand::Attach(body.session_id))
        .await?;
    Ok(HttpResponse::Ok().json(enrollment))
}

async fn switch_session<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
    body: Json<SessionRequest>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let enrollment = app
        .change_enrollment_session(id.into_inner(), SessionCommand::Switch(body.session_id))
        .await?;
    Ok(HttpResponse::Ok().json(enrollment))
}

async fn detach_session<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let enrollment = app
        .change_enrollment_session(id.into_inner(), SessionCommand::Detach)
        .await?;
    Ok(HttpResponse::Ok().json(enrollment))
}

async fn cancel_enrollment<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    Ok(HttpResponse::Ok().json(app.cancel_enrollment(id.into_inner()).await?))
}

async fn revoke_secure_link<ES>(
    _: Admin,
    app: AppData<ES>,
    token: Path<String>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    app.revoke_secure_link(token.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
struct NewCategory {
    parent_id: Option<Uuid>,
    name: String,
}

async fn create_category<ES>(
    _: Admin,
    app: AppData<ES>,
    body: Json<NewCategory>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let body = body.into_inner();
    let category_id = app.create_category(body.parent_id, body.name).await?;
    Ok(HttpResponse::Created().json(json!({ "category_id": category_id })))
}

#[derive(Deserialize)]
struct NewInstructor {
    name: String,
}

async fn register_instructor<ES>(
    _: Admin,
    app: AppData<ES>,
    body: Json<NewInstructor>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let instructor_id = app.register_instructor(body.into_inner().name).await?;
    Ok(HttpResponse::Created().json(json!({ "instructor_id": instructor_id })))
}

async fn create_course<ES>(
    _: Admin,
    app: AppData<ES>,
    body: Json<NewCourse>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let course_id = app.create_course(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(app.get_course(course_id).await?))
}

async fn set_course_active<ES>(
    app: &Application<ES>,
    course_id: Uuid,
    active: bool,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    app.set_course_active(course_id, active).await?;
    Ok(HttpResponse::Ok().json(app.get_course(course_id).await?))
}

async fn activate_course<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    set_course_active(&app, id.into_inner(), true).await
}

async fn deactivate_course<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    set_course_active(&app, id.into_inner(), false).await
}

#[derive(Deserialize)]
struct NewPrice {
    price: Decimal,
    currency: String,
}

async fn reprice_course<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
    body: Json<NewPrice>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let course_id = id.into_inner();
    let body = body.into_inner();
    app.reprice_course(course_id, body.price, body.currency)
        .await?;
    Ok(HttpResponse::Ok().json(app.get_course(course_id).await?))
}

async fn schedule_session<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
    body: Json<NewSession>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let session_id = app
        .schedule_session(id.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(json!({ "session_id": session_id })))
}

async fn reschedule_session<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
    body: Json<NewSession>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    app.reschedule_session(id.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
struct Upload {
    file_name: String,
}

async fn upload_attachment<ES>(
    _: Admin,
    app: AppData<ES>,
    id: Path<Uuid>,
    query: Query<Upload>,
    body: Bytes,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".to_string()));
    }
    let attachment = app
        .upload_attachment(id.into_inner(), query.into_inner().file_name, body)
        .await?;
    Ok(HttpResponse::Created().json(attachment))
}

async fn revoke_attachment<ES>(
    _: Admin,
    app: AppData<ES>,
    path: Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, ApiError>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let (course_id, attachment_id) = path.into_inner();
    app.revoke_attachment(course_id, attachment_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_matches_only_the_exact_admin_key() {
        let key = AdminKey("admin-key".to_string());

        assert!(key.matches("admin-key"));
        assert!(!key.matches("admin-kez"));
        assert!(!key.matches("admin-key-2"));
        assert!(!key.matches(""));
        assert!(!AdminKey(String::new()).matches(""));
    }
}
