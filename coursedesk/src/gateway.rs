//! Payment gateway webhooks.
//!
//! Each provider signs the raw webhook body with a shared secret: the `X-Signature` header
//! carries the hex encoded HMAC-SHA256 of the body. A gateway verifies the signature before
//! reading anything from the payload.
use std::collections::HashMap;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;

use crate::domain::{PaymentId, PaymentOutcome, Provider};

type HmacSha256 = Hmac<Sha256>;

/// A verified webhook notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub payment_id: PaymentId,
    pub provider_ref: String,
    pub outcome: PaymentOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("missing webhook signature")]
    MissingSignature,
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
    #[error("no gateway configured for {0}")]
    UnknownProvider(Provider),
}

pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Verifies the signature of `body` and extracts the payment outcome.
    fn parse_webhook(&self, body: &[u8], signature: Option<&str>)
        -> Result<WebhookEvent, GatewayError>;
}

/// Hex encoded HMAC-SHA256 of `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, GatewayError> {
    let mut mac = mac(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn mac(secret: &[u8]) -> Result<HmacSha256, GatewayError> {
    HmacSha256::new_from_slice(secret).map_err(|_| GatewayError::InvalidSignature)
}

fn verify(secret: &[u8], body: &[u8], signature: Option<&str>) -> Result<(), GatewayError> {
    let signature = signature
        .map(str::trim)
        .filter(|signature| !signature.is_empty())
        .ok_or(GatewayError::MissingSignature)?;
    let expected = hex::decode(signature).map_err(|_| GatewayError::InvalidSignature)?;
    let mut mac = mac(secret)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| GatewayError::InvalidSignature)
}

fn payload<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|err| GatewayError::MalformedPayload(err.to_string()))
}

fn payment_id(reference: &str) -> Result<PaymentId, GatewayError> {
    PaymentId::parse_str(reference.trim()).map_err(|_| {
        GatewayError::MalformedPayload(format!("unknown merchant reference {reference:?}"))
    })
}

fn amount(value: &str) -> Result<Decimal, GatewayError> {
    Decimal::from_str(value.trim())
        .map_err(|_| GatewayError::MalformedPayload(format!("invalid amount {value:?}")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HyperPayNotification {
    id: String,
    merchant_transaction_id: String,
    amount: Option<String>,
    currency: Option<String>,
    result: HyperPayResult,
}

#[derive(Deserialize)]
struct HyperPayResult {
    code: String,
    #[serde(default)]
    description: String,
}

pub struct HyperPayGateway {
    secret: Vec<u8>,
}

impl HyperPayGateway {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn is_success(code: &str) -> bool {
        code.starts_with("000.000.") || code.starts_with("000.100.1")
    }
}

impl PaymentGateway for HyperPayGateway {
    fn provider(&self) -> Provider {
        Provider::HyperPay
    }

    fn parse_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, GatewayError> {
        verify(&self.secret, body, signature)?;
        let notification: HyperPayNotification = payload(body)?;
        let outcome = if Self::is_success(&notification.result.code) {
            let (Some(value), Some(currency)) = (notification.amount, notification.currency)
            else {
                return Err(GatewayError::MalformedPayload(
                    "captured payment without amount".to_string(),
                ));
            };
            PaymentOutcome::Captured {
                amount: amount(&value)?,
                currency,
            }
        } else {
            PaymentOutcome::Failed {
                reason: format!(
                    "{} {}",
                    notification.result.code, notification.result.description
                )
                .trim()
                .to_string(),
            }
        };
        Ok(WebhookEvent {
            payment_id: payment_id(&notification.merchant_transaction_id)?,
            provider_ref: notification.id,
            outcome,
        })
    }
}

#[derive(Deserialize)]
struct ClickPayNotification {
    tran_ref: String,
    cart_id: String,
    cart_amount: String,
    cart_currency: String,
    payment_result: ClickPayResult,
}

#[derive(Deserialize)]
struct ClickPayResult {
    response_status: String,
    #[serde(default)]
    response_message: String,
}

pub struct ClickPayGateway {
    secret: Vec<u8>,
}

impl ClickPayGateway {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl PaymentGateway for ClickPayGateway {
    fn provider(&self) -> Provider {
        Provider::ClickPay
    }

    fn parse_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, GatewayError> {
        verify(&self.secret, body, signature)?;
        let notification: ClickPayNotification = payload(body)?;
        // "A" is authorised; every other status is a failure.
        let outcome = if notification.payment_result.response_status == "A" {
            PaymentOutcome::Captured {
                amount: amount(&notification.cart_amount)?,
                currency: notification.cart_currency,
            }
        } else {
            PaymentOutcome::Failed {
                reason: notification.payment_result.response_message,
            }
        };
        Ok(WebhookEvent {
            payment_id: payment_id(&notification.cart_id)?,
            provider_ref: notification.tran_ref,
            outcome,
        })
    }
}

/// The configured gateways, by provider.
#[derive(Default)]
pub struct Gateways {
    gateways: HashMap<Provider, Box<dyn PaymentGateway>>,
}

impl Gateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gateway: impl PaymentGateway + 'static) -> Self {
        self.gateways.insert(gateway.provider(), Box::new(gateway));
        self
    }

    pub fn get(&self, provider: Provider) -> Result<&dyn PaymentGateway, GatewayError> {
        self.gateways
            .get(&provider)
            .map(Box::as_ref)
            .ok_or(GatewayError::UnknownProvider(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{check, let_assert};
    use uuid::Uuid;

    #[test]
    fn it_parses_a_signed_hyperpay_capture() {
        let payment_id = Uuid::new_v4();
        let body = format!(
            r#"{{"id":"8ac7a4a1","merchantTransactionId":"{payment_id}","amount":"150.00","currency":"SAR","result":{{"code":"000.100.110","description":"Request successfully processed"}}}}"#
        );
        let gateway = HyperPayGateway::new("secret");

        let event = gateway
            .parse_webhook(body.as_bytes(), Some(&sign(b"secret", body.as_bytes()).unwrap()))
            .unwrap();

        check!(event.payment_id == payment_id);
        check!(event.provider_ref == "8ac7a4a1");
        check!(
            event.outcome
                == PaymentOutcome::Captured {
                    amount: Decimal::new(15000, 2),
                    currency: "SAR".to_string(),
                }
        );
    }

    #[test]
    fn it_reports_a_declined_hyperpay_payment_as_failed() {
        let body = format!(
            r#"{{"id":"8ac7","merchantTransactionId":"{}","result":{{"code":"800.100.151","description":"invalid card"}}}}"#,
            Uuid::new_v4()
        );
        let gateway = HyperPayGateway::new("secret");

        let event = gateway
            .parse_webhook(body.as_bytes(), Some(&sign(b"secret", body.as_bytes()).unwrap()))
            .unwrap();

        let_assert!(PaymentOutcome::Failed { reason } = event.outcome);
        check!(reason == "800.100.151 invalid card");
    }

    #[test]
    fn it_parses_a_signed_clickpay_notification() {
        let payment_id = Uuid::new_v4();
        let body = format!(
            r#"{{"tran_ref":"TST2","cart_id":"{payment_id}","cart_amount":"99.5","cart_currency":"SAR","payment_result":{{"response_status":"A","response_message":"Authorised"}}}}"#
        );
        let gateway = ClickPayGateway::new("secret");

        let event = gateway
            .parse_webhook(body.as_bytes(), Some(&sign(b"secret", body.as_bytes()).unwrap()))
            .unwrap();

        check!(event.provider_ref == "TST2");
        check!(
            event.outcome
                == PaymentOutcome::Captured {
                    amount: Decimal::new(995, 1),
                    currency: "SAR".to_string(),
                }
        );
    }

    #[test]
    fn it_rejects_a_bad_signature() {
        let body = br#"{"tran_ref":"TST2"}"#;
        let gateway = ClickPayGateway::new("secret");

        check!(
            gateway.parse_webhook(body, Some(&sign(b"other", body).unwrap()))
                == Err(GatewayError::InvalidSignature)
        );
        check!(gateway.parse_webhook(body, Some("zz")) == Err(GatewayError::InvalidSignature));
        check!(gateway.parse_webhook(body, None) == Err(GatewayError::MissingSignature));
    }

    #[test]
    fn it_rejects_an_unknown_merchant_reference() {
        let body = br#"{"tran_ref":"TST2","cart_id":"cart-7","cart_amount":"1","cart_currency":"SAR","payment_result":{"response_status":"A"}}"#;
        let gateway = ClickPayGateway::new("secret");

        let_assert!(
            Err(GatewayError::MalformedPayload(_)) =
                gateway.parse_webhook(body, Some(&sign(b"secret", body).unwrap()))
        );
    }

    #[test]
    fn it_looks_up_gateways_by_provider() {
        let gateways = Gateways::new().with(HyperPayGateway::new("secret"));

        check!(gateways.get(Provider::HyperPay).is_ok());
        check!(
            gateways.get(Provider::ClickPay).err()
                == Some(GatewayError::UnknownProvider(Provider::ClickPay))
        );
    }
}
