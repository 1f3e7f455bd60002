//! Categories, instructors, courses, live sessions and course attachments.
//!
//! Seat accounting lives here too: a session's occupancy is the number of active
//! enrollments whose current session it is, folded from the enrollment events.
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use coursedesk_events::{query, Decision, StateMutate, StateQuery, StreamQuery};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    is_currency_code, AttachmentId, CategoryId, CourseId, DomainEvent, EnrollmentId,
    EnrollmentStatus, ErrorKind, InstructorId, SessionId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourseType {
    Pdf,
    Live,
}

/// The schedule of a live session, as sent to enrolled students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDetails {
    pub session_id: SessionId,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub teams_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("category {0} already exists")]
    CategoryAlreadyExists(CategoryId),
    #[error("category {0} not found")]
    CategoryNotFound(CategoryId),
    #[error("instructor {0} already exists")]
    InstructorAlreadyExists(InstructorId),
    #[error("instructor {0} not found")]
    InstructorNotFound(InstructorId),
    #[error("course {0} already exists")]
    CourseAlreadyExists(CourseId),
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("price must not be negative")]
    NegativePrice,
    #[error("invalid currency code {0:?}")]
    InvalidCurrency(String),
    #[error("sessions can only be scheduled for live courses")]
    NotALiveCourse,
    #[error("a session must end after it starts")]
    InvalidSchedule,
    #[error("session capacity must be greater than zero")]
    InvalidCapacity,
    #[error("session {0} already exists")]
    SessionAlreadyExists(SessionId),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("capacity {capacity} is below the {taken} seats already taken")]
    CapacityBelowOccupancy { capacity: u32, taken: u32 },
    #[error("attachment {0} already exists")]
    AttachmentAlreadyExists(AttachmentId),
    #[error("attachment {0} not found")]
    AttachmentNotFound(AttachmentId),
    #[error("invalid file name {0:?}")]
    InvalidFileName(String),
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::CategoryNotFound(_)
            | CatalogError::InstructorNotFound(_)
            | CatalogError::CourseNotFound(_)
            | CatalogError::SessionNotFound(_)
            | CatalogError::AttachmentNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Validation,
        }
    }
}

/// Why a seat in a session cannot be taken.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeatError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("session {session_id} does not belong to course {course_id}")]
    SessionCourseMismatch {
        session_id: SessionId,
        course_id: CourseId,
    },
    #[error("session {0} is full")]
    SessionFull(SessionId),
}

/// Storage location of an attachment's blob.
pub fn blob_path(course_id: CourseId, attachment_id: AttachmentId, file_name: &str) -> String {
    format!("courses/{course_id}/{attachment_id}/{file_name}")
}

/// A file name usable as the last segment of a blob path.
pub fn is_valid_file_name(file_name: &str) -> bool {
    !file_name.trim().is_empty()
        && file_name != "."
        && file_name != ".."
        && !file_name.contains(['/', '\\'])
}

fn validate_price(price: Decimal, currency: &str) -> Result<(), CatalogError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(CatalogError::NegativePrice);
    }
    if !is_currency_code(currency) {
        return Err(CatalogError::InvalidCurrency(currency.to_string()));
    }
    Ok(())
}

fn validate_schedule(
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    capacity: Option<u32>,
) -> Result<(), CatalogError> {
    if end_at <= start_at {
        return Err(CatalogError::InvalidSchedule);
    }
    if capacity == Some(0) {
        return Err(CatalogError::InvalidCapacity);
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Categories {
    ids: Vec<CategoryId>,
    names: BTreeMap<CategoryId, String>,
}

impl Categories {
    pub fn new(ids: impl IntoIterator<Item = CategoryId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn contains(&self, id: &CategoryId) -> bool {
        self.names.contains_key(id)
    }
}

impl StateQuery for Categories {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        query!(DomainEvent, (events[CategoryCreated]) and (category_id in &self.ids))
    }
}

impl StateMutate for Categories {
    fn mutate(&mut self, event: DomainEvent) {
        if let DomainEvent::CategoryCreated {
            category_id, name, ..
        } = event
        {
            self.names.insert(category_id, name);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instructors {
    ids: Vec<InstructorId>,
    known: BTreeSet<InstructorId>,
}

impl Instructors {
    pub fn new(ids: impl IntoIterator<Item = InstructorId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }
}

impl StateQuery for Instructors {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        query!(DomainEvent, (events[InstructorRegistered]) and (instructor_id in &self.ids))
    }
}

impl StateMutate for Instructors {
    fn mutate(&mut self, event: DomainEvent) {
        if let DomainEvent::InstructorRegistered { instructor_id, .. } = event {
            self.known.insert(instructor_id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseInfo {
    pub course_id: CourseId,
    pub category_id: CategoryId,
    pub instructor_id: Option<InstructorId>,
    pub title: String,
    pub course_type: CourseType,
    pub price: Decimal,
    pub currency: String,
    pub active: bool,
}

/// The catalog entries of a set of courses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Courses {
    ids: Vec<CourseId>,
    courses: BTreeMap<CourseId, CourseInfo>,
}

impl Courses {
    pub fn new(ids: impl IntoIterator<Item = CourseId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn get(&self, id: &CourseId) -> Option<&CourseInfo> {
        self.courses.get(id)
    }

    /// The course, if it exists and is on sale.
    pub fn active(&self, id: &CourseId) -> Option<&CourseInfo> {
        self.get(id).filter(|course| course.active)
    }
}

impl StateQuery for Courses {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        query!(
            DomainEvent,
            (events[CourseCreated, CourseActivated, CourseDeactivated, CoursePriceChanged])
                and (course_id in &self.ids)
        )
    }
}

impl StateMutate for Courses {
    fn mutate(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::CourseCreated {
                course_id,
                category_id,
                instructor_id,
                title,
                course_type,
                price,
                currency,
            } => {
                self.courses.insert(
                    course_id,
                    CourseInfo {
                        course_id,
                        category_id,
                        instructor_id,
                        title,
                        course_type,
                        price,
                        currency,
                        active: true,
                    },
                );
            }
            DomainEvent::CourseActivated { course_id } => {
                if let Some(course) = self.courses.get_mut(&course_id) {
                    course.active = true;
                }
            }
            DomainEvent::CourseDeactivated { course_id } => {
                if let Some(course) = self.courses.get_mut(&course_id) {
                    course.active = false;
                }
            }
            DomainEvent::CoursePriceChanged {
                course_id,
                price,
                currency,
            } => {
                if let Some(course) = self.courses.get_mut(&course_id) {
                    course.price = price;
                    course.currency = currency;
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Seat {
    session_id: Option<SessionId>,
    status: EnrollmentStatus,
}

/// Tracks the current session and status of enrollments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeatLedger {
    seats: BTreeMap<EnrollmentId, Seat>,
}

impl SeatLedger {
    pub fn apply(&mut self, event: &DomainEvent) {
        let (enrollment_id, seat) = match event {
            DomainEvent::EnrollmentCreated {
                enrollment_id,
                session_id,
                status,
                ..
            } => (
                *enrollment_id,
                Seat {
                    session_id: *session_id,
                    status: *status,
                },
            ),
            DomainEvent::EnrollmentStatusChanged {
                enrollment_id,
                session_id,
                to,
                ..
            } => (
                *enrollment_id,
                Seat {
                    session_id: *session_id,
                    status: *to,
                },
            ),
            DomainEvent::EnrollmentSessionChanged {
                enrollment_id,
                session,
                to,
                ..
            } => (
                *enrollment_id,
                Seat {
                    session_id: session.as_ref().map(|s| s.session_id),
                    status: *to,
                },
            ),
            _ => return,
        };
        self.seats.insert(enrollment_id, seat);
    }

    /// Number of active enrollments in the session.
    pub fn taken(&self, session_id: SessionId) -> u32 {
        self.seats
            .values()
            .filter(|seat| seat.session_id == Some(session_id) && seat.status.is_active())
            .count() as u32
    }

    /// Returns true if the enrollment already occupies a seat in the session.
    pub fn holds(&self, enrollment_id: EnrollmentId, session_id: SessionId) -> bool {
        self.seats.get(&enrollment_id).is_some_and(|seat| {
            seat.session_id == Some(session_id) && seat.status.is_active()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub course_id: CourseId,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub capacity: Option<u32>,
    pub teams_link: String,
}

impl SessionInfo {
    pub fn details(&self) -> SessionDetails {
        SessionDetails {
            session_id: self.session_id,
            start_at: self.start_at,
            end_at: self.end_at,
            teams_link: self.teams_link.clone(),
        }
    }
}

/// Sessions with their seat ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionBoard {
    sessions: BTreeMap<SessionId, SessionInfo>,
    seats: SeatLedger,
}

impl SessionBoard {
    fn apply(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::SessionScheduled {
                session_id,
                course_id,
                start_at,
                end_at,
                capacity,
                teams_link,
            }
            | DomainEvent::SessionRescheduled {
                session_id,
                course_id,
                start_at,
                end_at,
                capacity,
                teams_link,
            } => {
                self.sessions.insert(
                    session_id,
                    SessionInfo {
                        session_id,
                        course_id,
                        start_at,
                        end_at,
                        capacity,
                        teams_link,
                    },
                );
            }
            event => self.seats.apply(&event),
        }
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&SessionInfo> {
        self.sessions.get(session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionInfo> {
        self.sessions.values()
    }

    pub fn taken(&self, session_id: SessionId) -> u32 {
        self.seats.taken(session_id)
    }

    /// Checks that `enrollment` (or a new buyer when `None`) can sit in a session of `course_id`.
    ///
    /// An enrollment already seated in the session keeps its seat even when the session is full.
    pub fn check_seat(
        &self,
        session_id: SessionId,
        course_id: CourseId,
        enrollment: Option<EnrollmentId>,
    ) -> Result<&SessionInfo, SeatError> {
        let session = self
            .sessions
            .get(&session_id)
            .ok_or(SeatError::SessionNotFound(session_id))?;
        if session.course_id != course_id {
            return Err(SeatError::SessionCourseMismatch {
                session_id,
                course_id,
            });
        }
        if enrollment.is_some_and(|id| self.seats.holds(id, session_id)) {
            return Ok(session);
        }
        match session.capacity {
            Some(capacity) if self.seats.taken(session_id) >= capacity => {
                Err(SeatError::SessionFull(session_id))
            }
            _ => Ok(session),
        }
    }
}

/// A set of sessions, with every enrollment that entered or left them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sessions {
    ids: Vec<SessionId>,
    board: SessionBoard,
}

impl Sessions {
    pub fn new(ids: impl IntoIterator<Item = SessionId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn board(&self) -> &SessionBoard {
        &self.board
    }
}

impl StateQuery for Sessions {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        let ids = &self.ids;
        query!(
            DomainEvent,
            (events[
                SessionScheduled,
                SessionRescheduled,
                EnrollmentCreated,
                EnrollmentStatusChanged,
                EnrollmentSessionChanged
            ]) and ((session_id in ids) or (previous_session_id in ids))
        )
    }
}

impl StateMutate for Sessions {
    fn mutate(&mut self, event: DomainEvent) {
        self.board.apply(event);
    }
}

/// Every session of a course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseSessions {
    course_id: CourseId,
    board: SessionBoard,
}

impl CourseSessions {
    pub fn new(course_id: CourseId) -> Self {
        Self {
            course_id,
            board: SessionBoard::default(),
        }
    }

    pub fn board(&self) -> &SessionBoard {
        &self.board
    }
}

impl StateQuery for CourseSessions {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        query!(
            DomainEvent,
            (events[
                SessionScheduled,
                SessionRescheduled,
                EnrollmentCreated,
                EnrollmentStatusChanged,
                EnrollmentSessionChanged
            ]) and (course_id == self.course_id)
        )
    }
}

impl StateMutate for CourseSessions {
    fn mutate(&mut self, event: DomainEvent) {
        self.board.apply(event);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub attachment_id: AttachmentId,
    pub file_name: String,
    pub blob_path: String,
    pub size_bytes: u64,
    pub revoked: bool,
}

/// The attachments uploaded for a course, revoked ones included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseAttachments {
    course_id: CourseId,
    attachments: BTreeMap<AttachmentId, Attachment>,
}

impl CourseAttachments {
    pub fn new(course_id: CourseId) -> Self {
        Self {
            course_id,
            attachments: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &AttachmentId) -> Option<&Attachment> {
        self.attachments.get(id)
    }

    /// Attachments that were not revoked.
    pub fn live(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.values().filter(|a| !a.revoked)
    }
}

impl StateQuery for CourseAttachments {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        let course_id = self.course_id;
        query!(
            DomainEvent,
            (events[AttachmentUploaded, AttachmentRevoked]) and (course_id == course_id)
        )
    }
}

impl StateMutate for CourseAttachments {
    fn mutate(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::AttachmentUploaded {
                attachment_id,
                file_name,
                blob_path,
                size_bytes,
                ..
            } => {
                self.attachments.insert(
                    attachment_id,
                    Attachment {
                        attachment_id,
                        file_name,
                        blob_path,
                        size_bytes,
                        revoked: false,
                    },
                );
            }
            DomainEvent::AttachmentRevoked { attachment_id, .. } => {
                if let Some(attachment) = self.attachments.get_mut(&attachment_id) {
                    attachment.revoked = true;
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug)]
pub struct CreateCategory {
    pub category_id: CategoryId,
    pub parent_id: Option<CategoryId>,
    pub name: String,
}

impl Decision for CreateCategory {
    type Event = DomainEvent;
    type StateQuery = Categories;
    type Error = CatalogError;

    fn state_query(&self) -> Self::StateQuery {
        Categories::new(std::iter::once(self.category_id).chain(self.parent_id))
    }

    fn process(&self, categories: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::EmptyName);
        }
        if categories.contains(&self.category_id) {
            return Err(CatalogError::CategoryAlreadyExists(self.category_id));
        }
        if let Some(parent_id) = self.parent_id {
            if !categories.contains(&parent_id) {
                return Err(CatalogError::CategoryNotFound(parent_id));
            }
        }
        Ok(vec![DomainEvent::CategoryCreated {
            category_id: self.category_id,
            parent_id: self.parent_id,
            name: self.name.trim().to_string(),
        }])
    }
}

#[derive(Debug)]
pub struct RegisterInstructor {
    pub instructor_id: InstructorId,
    pub name: String,
}

impl Decision for RegisterInstructor {
    type Event = DomainEvent;
    type StateQuery = Instructors;
    type Error = CatalogError;

    fn state_query(&self) -> Self::StateQuery {
        Instructors::new([self.instructor_id])
    }

    fn process(&self, instructors: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::EmptyName);
        }
        if instructors.known.contains(&self.instructor_id) {
            return Err(CatalogError::InstructorAlreadyExists(self.instructor_id));
        }
        Ok(vec![DomainEvent::InstructorRegistered {
            instructor_id: self.instructor_id,
            name: self.name.trim().to_string(),
        }])
    }
}

#[derive(Debug)]
pub struct CreateCourse {
    pub course_id: CourseId,
    pub category_id: CategoryId,
    pub instructor_id: Option<InstructorId>,
    pub title: String,
    pub course_type: CourseType,
    pub price: Decimal,
    pub currency: String,
}

impl Decision for CreateCourse {
    type Event = DomainEvent;
    type StateQuery = (Courses, Categories, Instructors);
    type Error = CatalogError;

    fn state_query(&self) -> Self::StateQuery {
        (
            Courses::new([self.course_id]),
            Categories::new([self.category_id]),
            Instructors::new(self.instructor_id),
        )
    }

    fn process(
        &self,
        (courses, categories, instructors): &Self::StateQuery,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        if self.title.trim().is_empty() {
            return Err(CatalogError::EmptyName);
        }
        if courses.get(&self.course_id).is_some() {
            return Err(CatalogError::CourseAlreadyExists(self.course_id));
        }
        if !categories.contains(&self.category_id) {
            return Err(CatalogError::CategoryNotFound(self.category_id));
        }
        if let Some(instructor_id) = self.instructor_id {
            if !instructors.known.contains(&instructor_id) {
                return Err(CatalogError::InstructorNotFound(instructor_id));
            }
        }
        validate_price(self.price, &self.currency)?;
        Ok(vec![DomainEvent::CourseCreated {
            course_id: self.course_id,
            category_id: self.category_id,
            instructor_id: self.instructor_id,
            title: self.title.trim().to_string(),
            course_type: self.course_type,
            price: self.price,
            currency: self.currency.clone(),
        }])
    }
}

/// Puts a course on sale, or takes it off sale.
#[derive(Debug)]
pub struct SetCourseActive {
    pub course_id: CourseId,
    pub active: bool,
}

impl Decision for SetCourseActive {
    type Event = DomainEvent;
    type StateQuery = Courses;
    type Error = CatalogError;

    fn state_query(&self) -> Self::StateQuery {
        Courses::new([self.course_id])
    }

    fn process(&self, courses: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        let course = courses
            .get(&self.course_id)
            .ok_or(CatalogError::CourseNotFound(self.course_id))?;
        if course.active == self.active {
            return Ok(vec![]);
        }
        let course_id = self.course_id;
        Ok(vec![if self.active {
            DomainEvent::CourseActivated { course_id }
        } else {
            DomainEvent::CourseDeactivated { course_id }
        }])
    }
}

#[derive(Debug)]
pub struct RepriceCourse {
    pub course_id: CourseId,
    pub price: Decimal,
    pub currency: String,
}

impl Decision for RepriceCourse {
    type Event = DomainEvent;
    type StateQuery = Courses;
    type Error = CatalogError;

    fn state_query(&self) -> Self::StateQuery {
        Courses::new([self.course_id])
    }

    fn process(&self, courses: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        courses
            .get(&self.course_id)
            .ok_or(CatalogError::CourseNotFound(self.course_id))?;
        validate_price(self.price, &self.currency)?;
        Ok(vec![DomainEvent::CoursePriceChanged {
            course_id: self.course_id,
            price: self.price,
            currency: self.currency.clone(),
        }])
    }
}

#[derive(Debug)]
pub struct ScheduleSession {
    pub session_id: SessionId,
    pub course_id: CourseId,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub capacity: Option<u32>,
    pub teams_link: String,
}

impl Decision for ScheduleSession {
    type Event = DomainEvent;
    type StateQuery = (Courses, Sessions);
    type Error = CatalogError;

    fn state_query(&self) -> Self::StateQuery {
        (
            Courses::new([self.course_id]),
            Sessions::new([self.session_id]),
        )
    }

    fn process(
        &self,
        (courses, sessions): &Self::StateQuery,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        let course = courses
            .get(&self.course_id)
            .ok_or(CatalogError::CourseNotFound(self.course_id))?;
        if course.course_type != CourseType::Live {
            return Err(CatalogError::NotALiveCourse);
        }
        if sessions.board().get(&self.session_id).is_some() {
            return Err(CatalogError::SessionAlreadyExists(self.session_id));
        }
        validate_schedule(self.start_at, self.end_at, self.capacity)?;
        Ok(vec![DomainEvent::SessionScheduled {
            session_id: self.session_id,
            course_id: self.course_id,
            start_at: self.start_at,
            end_at: self.end_at,
            capacity: self.capacity,
            teams_link: self.teams_link.clone(),
        }])
    }
}

#[derive(Debug)]
pub struct RescheduleSession {
    pub session_id: SessionId,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub capacity: Option<u32>,
    pub teams_link: String,
}

impl Decision for RescheduleSession {
    type Event = DomainEvent;
    type StateQuery = Sessions;
    type Error = CatalogError;

    fn state_query(&self) -> Self::StateQuery {
        Sessions::new([self.session_id])
    }

    fn process(&self, sessions: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        let session = sessions
            .board()
            .get(&self.session_id)
            .ok_or(CatalogError::SessionNotFound(self.session_id))?;
        validate_schedule(self.start_at, self.end_at, self.capacity)?;
        if let Some(capacity) = self.capacity {
            let taken = sessions.board().taken(self.session_id);
            if capacity < taken {
                return Err(CatalogError::CapacityBelowOccupancy { capacity, taken });
            }
        }
        Ok(vec![DomainEvent::SessionRescheduled {
            session_id: self.session_id,
            course_id: session.course_id,
            start_at: self.start_at,
            end_at: self.end_at,
            capacity: self.capacity,
            teams_link: self.teams_link.clone(),
        }])
    }
}

/// Records an attachment whose blob was already stored.
#[derive(Debug)]
pub struct RegisterAttachment {
    pub attachment_id: AttachmentId,
    pub course_id: CourseId,
    pub file_name: String,
    pub size_bytes: u64,
}

impl Decision for RegisterAttachment {
    type Event = DomainEvent;
    type StateQuery = (Courses, CourseAttachments);
    type Error = CatalogError;

    fn state_query(&self) -> Self::StateQuery {
        (
            Courses::new([self.course_id]),
            CourseAttachments::new(self.course_id),
        )
    }

    fn process(
        &self,
        (courses, attachments): &Self::StateQuery,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        courses
            .get(&self.course_id)
            .ok_or(CatalogError::CourseNotFound(self.course_id))?;
        if !is_valid_file_name(&self.file_name) {
            return Err(CatalogError::InvalidFileName(self.file_name.clone()));
        }
        if attachments.get(&self.attachment_id).is_some() {
            return Err(CatalogError::AttachmentAlreadyExists(self.attachment_id));
        }
        Ok(vec![DomainEvent::AttachmentUploaded {
            attachment_id: self.attachment_id,
            course_id: self.course_id,
            file_name: self.file_name.clone(),
            blob_path: blob_path(self.course_id, self.attachment_id, &self.file_name),
            size_bytes: self.size_bytes,
        }])
    }
}

#[derive(Debug)]
pub struct RevokeAttachment {
    pub course_id: CourseId,
    pub attachment_id: AttachmentId,
}

impl Decision for RevokeAttachment {
    type Event = DomainEvent;
    type StateQuery = CourseAttachments;
    type Error = CatalogError;

    fn state_query(&self) -> Self::StateQuery {
        CourseAttachments::new(self.course_id)
    }

    fn process(&self, attachments: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        let attachment = attachments
            .get(&self.attachment_id)
            .ok_or(CatalogError::AttachmentNotFound(self.attachment_id))?;
        if attachment.revoked {
            return Ok(vec![]);
        }
        Ok(vec![DomainEvent::AttachmentRevoked {
            attachment_id: self.attachment_id,
            course_id: self.course_id,
        }])
    }
}
