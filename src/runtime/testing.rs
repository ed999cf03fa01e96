//! Mock implementations for testing
//!
//! These mocks enable integration testing of the tracker without Telegram,
//! SQLite, or the filesystem.

use super::traits::*;
use crate::db::{Event, Reservation};
use crate::state_machine::{ChatId, EventId, Identity, Keyboard, RegistrationFields, StudentId};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// ============================================================================
// In-Memory Storage
// ============================================================================

/// Storage backed by vectors. Student ids are assigned in insertion order,
/// starting at 1.
#[derive(Default)]
pub struct InMemoryStorage {
    students: Mutex<Vec<RegistrationFields>>,
    active_event: Mutex<Option<Event>>,
    reservations: Mutex<Vec<Reservation>>,
    /// Names of the trait methods called, in order
    calls: Mutex<Vec<&'static str>>,
    /// Make `persist_registration` fail
    pub fail_registration: AtomicBool,
    /// Make `persist_reservation` fail with a storage error
    pub fail_reservation: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active_event(self, name: &str, date: NaiveDate) -> Self {
        *self.active_event.lock().unwrap() = Some(Event {
            id: 1,
            name: name.to_string(),
            date,
            is_active: true,
            created_at: Utc::now(),
        });
        self
    }

    /// Register a student directly; returns the assigned id
    pub fn seed_student(&self, telegram_id: i64, full_name: &str) -> StudentId {
        let mut students = self.students.lock().unwrap();
        students.push(RegistrationFields {
            telegram_id,
            username: None,
            full_name: full_name.to_string(),
            phone_number: "0911000000".to_string(),
            year_of_study: "1st Year".to_string(),
            department: "CS".to_string(),
        });
        StudentId(students.len() as i64)
    }

    pub fn seed_reservation(&self, student_id: StudentId, event_id: EventId) {
        let mut reservations = self.reservations.lock().unwrap();
        let id = reservations.len() as i64 + 1;
        reservations.push(Reservation {
            id,
            student_id: student_id.0,
            event_id: event_id.0,
            attendance_status: "Yes".to_string(),
            feedback: Some("Good".to_string()),
            attended: false,
            attended_at: None,
        });
    }

    pub fn students(&self) -> Vec<RegistrationFields> {
        self.students.lock().unwrap().clone()
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.reservations.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == method).count()
    }

    fn record(&self, method: &'static str) {
        self.calls.lock().unwrap().push(method);
    }
}

#[async_trait]
impl RegistrationStore for InMemoryStorage {
    async fn persist_registration(
        &self,
        fields: &RegistrationFields,
    ) -> Result<StudentId, CollaboratorError> {
        self.record("persist_registration");
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Storage("disk full".to_string()));
        }
        let mut students = self.students.lock().unwrap();
        if let Some(pos) = students
            .iter()
            .position(|s| s.telegram_id == fields.telegram_id)
        {
            students[pos] = fields.clone();
            return Ok(StudentId(pos as i64 + 1));
        }
        students.push(fields.clone());
        Ok(StudentId(students.len() as i64))
    }

    async fn find_existing_registration(
        &self,
        identity: &Identity,
    ) -> Result<Option<StudentId>, CollaboratorError> {
        self.record("find_existing_registration");
        Ok(self
            .students
            .lock()
            .unwrap()
            .iter()
            .position(|s| s.telegram_id == identity.user_id)
            .map(|pos| StudentId(pos as i64 + 1)))
    }

    async fn list_broadcast_recipients(&self) -> Result<Vec<ChatId>, CollaboratorError> {
        self.record("list_broadcast_recipients");
        Ok(self
            .students
            .lock()
            .unwrap()
            .iter()
            .map(|s| ChatId(s.telegram_id))
            .collect())
    }
}

#[async_trait]
impl ReservationStore for InMemoryStorage {
    async fn get_active_event(&self) -> Result<Option<Event>, CollaboratorError> {
        self.record("get_active_event");
        Ok(self.active_event.lock().unwrap().clone())
    }

    async fn has_existing_reservation(
        &self,
        student_id: StudentId,
        event_id: EventId,
    ) -> Result<bool, CollaboratorError> {
        self.record("has_existing_reservation");
        Ok(self
            .reservations
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.student_id == student_id.0 && r.event_id == event_id.0))
    }

    async fn persist_reservation(
        &self,
        student_id: StudentId,
        event_id: EventId,
        attendance: &str,
        feedback: &str,
    ) -> Result<Reservation, CollaboratorError> {
        self.record("persist_reservation");
        if self.fail_reservation.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Storage("database is locked".to_string()));
        }
        let mut reservations = self.reservations.lock().unwrap();
        if reservations
            .iter()
            .any(|r| r.student_id == student_id.0 && r.event_id == event_id.0)
        {
            return Err(CollaboratorError::Duplicate(format!(
                "student {student_id} already reserved event {event_id}"
            )));
        }
        let reservation = Reservation {
            id: reservations.len() as i64 + 1,
            student_id: student_id.0,
            event_id: event_id.0,
            attendance_status: attendance.to_string(),
            feedback: Some(feedback.to_string()),
            attended: false,
            attended_at: None,
        };
        reservations.push(reservation.clone());
        Ok(reservation)
    }
}

// ============================================================================
// Recording Messenger
// ============================================================================

/// One delivered message
#[derive(Debug, Clone)]
pub enum Outgoing {
    Text {
        chat_id: ChatId,
        text: String,
        keyboard: Keyboard,
    },
    Image {
        chat_id: ChatId,
        image: ImageSource,
        caption: String,
        at: tokio::time::Instant,
    },
}

impl Outgoing {
    fn chat_id(&self) -> ChatId {
        match self {
            Outgoing::Text { chat_id, .. } | Outgoing::Image { chat_id, .. } => *chat_id,
        }
    }
}

/// Messenger that records successful deliveries
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Outgoing>>,
    /// Every send to these chats fails, like a user who blocked the bot
    failing_chats: Mutex<HashSet<ChatId>>,
    /// Image sends fail everywhere
    pub fail_images: AtomicBool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, chat_id: ChatId) {
        self.failing_chats.lock().unwrap().insert(chat_id);
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<Outgoing> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.chat_id() == chat_id)
            .cloned()
            .collect()
    }

    pub fn texts_for(&self, chat_id: ChatId) -> Vec<String> {
        self.sent_to(chat_id)
            .into_iter()
            .filter_map(|m| match m {
                Outgoing::Text { text, .. } => Some(text),
                Outgoing::Image { .. } => None,
            })
            .collect()
    }

    pub fn last_text(&self, chat_id: ChatId) -> Option<String> {
        self.texts_for(chat_id).pop()
    }

    pub fn images_for(&self, chat_id: ChatId) -> Vec<(ImageSource, String)> {
        self.sent_to(chat_id)
            .into_iter()
            .filter_map(|m| match m {
                Outgoing::Image { image, caption, .. } => Some((image, caption)),
                Outgoing::Text { .. } => None,
            })
            .collect()
    }

    /// Times of all image deliveries, in order
    pub fn image_times(&self) -> Vec<tokio::time::Instant> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                Outgoing::Image { at, .. } => Some(*at),
                Outgoing::Text { .. } => None,
            })
            .collect()
    }

    fn check(&self, chat_id: ChatId) -> Result<(), CollaboratorError> {
        if self.failing_chats.lock().unwrap().contains(&chat_id) {
            return Err(CollaboratorError::Delivery(
                "Forbidden: bot was blocked by the user".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), CollaboratorError> {
        self.check(chat_id)?;
        self.sent.lock().unwrap().push(Outgoing::Text {
            chat_id,
            text: text.to_string(),
            keyboard: keyboard.clone(),
        });
        Ok(())
    }

    async fn send_image(
        &self,
        chat_id: ChatId,
        image: &ImageSource,
        caption: &str,
    ) -> Result<(), CollaboratorError> {
        self.check(chat_id)?;
        if self.fail_images.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Delivery("Bad Request: IMAGE_PROCESS_FAILED".to_string()));
        }
        self.sent.lock().unwrap().push(Outgoing::Image {
            chat_id,
            image: image.clone(),
            caption: caption.to_string(),
            at: tokio::time::Instant::now(),
        });
        Ok(())
    }
}

// ============================================================================
// Code Generator and Resources
// ============================================================================

/// Produces the payload bytes instead of a real image
#[derive(Default)]
pub struct MockCodeGenerator {
    pub fail: AtomicBool,
}

impl CodeGenerator for MockCodeGenerator {
    fn generate(&self, payload: &str) -> Result<Vec<u8>, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Encoding("payload too long".to_string()));
        }
        Ok(payload.as_bytes().to_vec())
    }
}

/// Fixed set of image names under `/images`
pub struct MockResources {
    names: HashSet<String>,
}

impl MockResources {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| (*n).to_string()).collect(),
        }
    }
}

#[async_trait]
impl ResourceLocator for MockResources {
    async fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.names
            .contains(name)
            .then(|| PathBuf::from("/images").join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{
        ConversationStats, ConversationTracker, Inbound, InboundBody, TrackerSettings,
    };
    use crate::state_machine::state::CONFIRM_TOKEN;
    use crate::state_machine::{Command, FlowKind, Input};
    use std::sync::Arc;
    use std::time::Duration;

    const ORGANIZER: i64 = 900;

    type TestTracker = ConversationTracker<Arc<InMemoryStorage>, Arc<RecordingMessenger>>;

    struct Harness {
        tracker: Arc<TestTracker>,
        storage: Arc<InMemoryStorage>,
        messenger: Arc<RecordingMessenger>,
        codes: Arc<MockCodeGenerator>,
    }

    impl Harness {
        fn new(storage: InMemoryStorage) -> Self {
            Self::with_settings(storage, TrackerSettings::default())
        }

        fn with_settings(storage: InMemoryStorage, settings: TrackerSettings) -> Self {
            let storage = Arc::new(storage);
            let messenger = Arc::new(RecordingMessenger::new());
            let codes = Arc::new(MockCodeGenerator::default());
            let tracker = Arc::new(ConversationTracker::new(
                storage.clone(),
                messenger.clone(),
                codes.clone(),
                Arc::new(MockResources::new(&["poster.jpg"])),
                Arc::new(BroadcasterAllowList::new([ORGANIZER])),
                settings,
            ));
            Self {
                tracker,
                storage,
                messenger,
                codes,
            }
        }

        async fn command(&self, user: i64, command: Command) {
            self.tracker.handle(command_from(user, command)).await;
        }

        async fn text(&self, user: i64, text: &str) {
            self.tracker
                .handle(input_from(user, Input::Text(text.to_string())))
                .await;
        }

        async fn contact(&self, user: i64, phone: &str) {
            self.tracker
                .handle(input_from(
                    user,
                    Input::Contact {
                        phone_number: phone.to_string(),
                    },
                ))
                .await;
        }

        fn step(&self, user: i64) -> Option<&'static str> {
            self.tracker
                .state(ChatId(user))
                .map(|state| state.flow.step_name())
        }

        async fn register(&self, user: i64, name: &str) {
            self.command(user, Command::Start).await;
            self.text(user, name).await;
            self.contact(user, "+251911223344").await;
            self.text(user, "3rd Year").await;
            self.text(user, "BA").await;
        }
    }

    fn command_from(user: i64, command: Command) -> Inbound {
        Inbound {
            chat_id: ChatId(user),
            identity: Identity::new(user, None),
            body: InboundBody::Command(command),
        }
    }

    fn input_from(user: i64, input: Input) -> Inbound {
        Inbound {
            chat_id: ChatId(user),
            identity: Identity::new(user, None),
            body: InboundBody::Input(input),
        }
    }

    fn event_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 11, 20).unwrap()
    }

    #[tokio::test]
    async fn test_registration_happy_path() {
        let h = Harness::new(InMemoryStorage::new());

        h.command(1, Command::Start).await;
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "Welcome! Let's get you registered.\n\nPlease enter your Full Name:"
        );
        assert_eq!(h.step(1), Some("collect_name"));

        h.text(1, "Hana Tesfaye").await;
        h.contact(1, "+251911223344").await;
        h.text(1, "3rd Year").await;
        h.text(1, "BA").await;

        assert_eq!(h.tracker.state(ChatId(1)), None);
        assert_eq!(h.storage.call_count("persist_registration"), 1);
        let students = h.storage.students();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].full_name, "Hana Tesfaye");
        assert_eq!(students[0].phone_number, "+251911223344");
        assert_eq!(students[0].year_of_study, "3rd Year");
        assert_eq!(students[0].department, "BA");

        let images = h.messenger.images_for(ChatId(1));
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].0, ImageSource::Png(b"1".to_vec()));
        assert!(images[0].1.contains("Your Unique ID: 1"));
    }

    #[tokio::test]
    async fn test_invalid_answer_keeps_step() {
        let h = Harness::new(InMemoryStorage::new());
        h.command(1, Command::Start).await;
        h.text(1, "Hana").await;
        h.text(1, "0911").await;
        assert_eq!(h.step(1), Some("collect_year_of_study"));
        let calls_before = h.storage.calls();

        h.text(1, "Final Year").await;
        assert_eq!(h.step(1), Some("collect_year_of_study"));
        assert_eq!(h.storage.calls(), calls_before);
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "Please select a valid year."
        );
        assert!(h.storage.students().is_empty());
    }

    #[tokio::test]
    async fn test_start_when_registered_resends_code() {
        let storage = InMemoryStorage::new();
        storage.seed_student(1, "Hana");
        let h = Harness::new(storage);

        h.command(1, Command::Start).await;

        assert_eq!(h.tracker.state(ChatId(1)), None);
        assert_eq!(h.storage.calls(), vec!["find_existing_registration"]);
        let images = h.messenger.images_for(ChatId(1));
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].0, ImageSource::Png(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_registration_persist_failure_clears_state() {
        let h = Harness::new(InMemoryStorage::new());
        h.storage.fail_registration.store(true, Ordering::SeqCst);

        h.register(1, "Hana").await;

        assert_eq!(h.tracker.state(ChatId(1)), None);
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "An error occurred during registration."
        );
        assert!(h.messenger.images_for(ChatId(1)).is_empty());
    }

    #[tokio::test]
    async fn test_code_generation_failure_falls_back_to_text() {
        let h = Harness::new(InMemoryStorage::new());
        h.codes.fail.store(true, Ordering::SeqCst);

        h.register(1, "Hana").await;

        assert_eq!(h.storage.students().len(), 1);
        assert!(h.messenger.images_for(ChatId(1)).is_empty());
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "Registered successfully! ✅ Your ID is: 1."
        );
    }

    #[tokio::test]
    async fn test_image_delivery_failure_falls_back_to_text() {
        let h = Harness::new(InMemoryStorage::new());
        h.messenger.fail_images.store(true, Ordering::SeqCst);

        h.register(1, "Hana").await;

        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "Registered successfully! ✅ Your ID is: 1."
        );
    }

    #[tokio::test]
    async fn test_event_requires_registration() {
        let h = Harness::new(InMemoryStorage::new().with_active_event("Hackathon", event_date()));

        h.command(1, Command::Event).await;

        assert_eq!(h.tracker.state(ChatId(1)), None);
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "Please register with /start before using this command."
        );
    }

    #[tokio::test]
    async fn test_event_requires_active_event() {
        let storage = InMemoryStorage::new();
        storage.seed_student(1, "Hana");
        let h = Harness::new(storage);

        h.command(1, Command::Event).await;

        assert_eq!(h.tracker.state(ChatId(1)), None);
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "No events are available for reservation right now."
        );
    }

    #[tokio::test]
    async fn test_event_rejects_existing_reservation() {
        let storage = InMemoryStorage::new().with_active_event("Hackathon", event_date());
        let student = storage.seed_student(1, "Hana");
        storage.seed_reservation(student, EventId(1));
        let h = Harness::new(storage);

        h.command(1, Command::Event).await;

        assert_eq!(h.tracker.state(ChatId(1)), None);
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "You have already reserved for the current event."
        );
    }

    #[tokio::test]
    async fn test_reservation_happy_path() {
        let storage = InMemoryStorage::new().with_active_event("Hackathon", event_date());
        storage.seed_student(1, "Hana");
        let h = Harness::new(storage);

        h.command(1, Command::Event).await;
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "Event: Hackathon on 2026-11-20.\n\nWill you attend?"
        );
        h.text(1, "Yes").await;
        h.text(1, "Good").await;

        assert_eq!(h.tracker.state(ChatId(1)), None);
        let reservations = h.storage.reservations();
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].attendance_status, "Yes");
        assert_eq!(reservations[0].feedback.as_deref(), Some("Good"));

        let images = h.messenger.images_for(ChatId(1));
        assert_eq!(images.len(), 1);
        assert!(images[0].1.starts_with("Reservation confirmed! ✅"));
    }

    #[tokio::test]
    async fn test_reservation_duplicate_at_persist_time() {
        let storage = InMemoryStorage::new().with_active_event("Hackathon", event_date());
        let student = storage.seed_student(1, "Hana");
        let h = Harness::new(storage);

        h.command(1, Command::Event).await;
        h.text(1, "Maybe").await;
        // Another path reserved in the meantime
        h.storage.seed_reservation(student, EventId(1));
        h.text(1, "Nice").await;

        assert_eq!(h.tracker.state(ChatId(1)), None);
        assert_eq!(h.storage.reservations().len(), 1);
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "You have already reserved for the current event."
        );
    }

    #[tokio::test]
    async fn test_reservation_storage_failure() {
        let storage = InMemoryStorage::new().with_active_event("Hackathon", event_date());
        storage.seed_student(1, "Hana");
        let h = Harness::new(storage);
        h.storage.fail_reservation.store(true, Ordering::SeqCst);

        h.command(1, Command::Event).await;
        h.text(1, "No").await;
        h.text(1, "Bad").await;

        assert_eq!(h.tracker.state(ChatId(1)), None);
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "Sorry, we could not save your reservation."
        );
    }

    #[tokio::test]
    async fn test_broadcast_requires_authorization() {
        let h = Harness::new(InMemoryStorage::new());

        h.command(5, Command::Broadcast).await;

        assert_eq!(h.tracker.state(ChatId(5)), None);
        assert_eq!(
            h.messenger.last_text(ChatId(5)).unwrap(),
            "⛔️ You are not authorized to use this command."
        );
    }

    #[tokio::test]
    async fn test_broadcast_full_flow_counts_failures() {
        let storage = InMemoryStorage::new();
        storage.seed_student(1, "Hana");
        storage.seed_student(2, "Dawit");
        storage.seed_student(3, "Selam");
        let h = Harness::with_settings(
            storage,
            TrackerSettings {
                broadcast_delay: Duration::ZERO,
                ..TrackerSettings::default()
            },
        );
        h.messenger.fail_for(ChatId(2));

        h.command(ORGANIZER, Command::Broadcast).await;
        assert_eq!(h.step(ORGANIZER), Some("collect_image_reference"));

        h.text(ORGANIZER, "missing.jpg").await;
        assert_eq!(h.step(ORGANIZER), Some("collect_image_reference"));
        assert!(h
            .messenger
            .last_text(ChatId(ORGANIZER))
            .unwrap()
            .contains("`missing.jpg` not found"));

        h.text(ORGANIZER, "poster.jpg").await;
        assert_eq!(h.step(ORGANIZER), Some("collect_caption"));

        h.text(ORGANIZER, "Hackathon on Friday").await;
        assert_eq!(h.step(ORGANIZER), Some("await_confirmation"));
        let preview = h.messenger.images_for(ChatId(ORGANIZER));
        assert_eq!(
            preview,
            vec![(
                ImageSource::File(PathBuf::from("/images/poster.jpg")),
                "Hackathon on Friday".to_string()
            )]
        );
        // Nothing reaches students before confirmation
        assert!(h.messenger.images_for(ChatId(1)).is_empty());

        h.text(ORGANIZER, CONFIRM_TOKEN).await;

        assert_eq!(h.tracker.state(ChatId(ORGANIZER)), None);
        assert_eq!(h.messenger.images_for(ChatId(1)).len(), 1);
        assert!(h.messenger.images_for(ChatId(2)).is_empty());
        assert_eq!(h.messenger.images_for(ChatId(3)).len(), 1);
        assert_eq!(
            h.messenger.last_text(ChatId(ORGANIZER)).unwrap(),
            "✅ Broadcast Complete!\n\nSent successfully: 2\nFailed (likely blocked the bot): 1"
        );
    }

    #[tokio::test]
    async fn test_broadcast_cancelled_by_any_other_answer() {
        let storage = InMemoryStorage::new();
        storage.seed_student(1, "Hana");
        let h = Harness::new(storage);

        h.command(ORGANIZER, Command::Broadcast).await;
        h.text(ORGANIZER, "poster.jpg").await;
        h.text(ORGANIZER, "Hello").await;
        h.text(ORGANIZER, "yes").await;

        assert_eq!(h.tracker.state(ChatId(ORGANIZER)), None);
        assert_eq!(
            h.messenger.last_text(ChatId(ORGANIZER)).unwrap(),
            "Broadcast cancelled."
        );
        assert!(h.messenger.sent_to(ChatId(1)).is_empty());
    }

    #[tokio::test]
    async fn test_new_command_replaces_flow() {
        let h = Harness::new(InMemoryStorage::new());

        h.command(ORGANIZER, Command::Broadcast).await;
        h.text(ORGANIZER, "poster.jpg").await;
        h.command(ORGANIZER, Command::Start).await;

        let state = h.tracker.state(ChatId(ORGANIZER)).unwrap();
        assert_eq!(state.flow.kind(), FlowKind::Registration);
        assert_eq!(state.flow.step_name(), "collect_name");
    }

    #[tokio::test]
    async fn test_cancel() {
        let h = Harness::new(InMemoryStorage::new());

        h.command(1, Command::Cancel).await;
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "There is nothing to cancel."
        );

        h.command(1, Command::Start).await;
        h.text(1, "Hana").await;
        h.command(1, Command::Cancel).await;
        assert_eq!(h.tracker.state(ChatId(1)), None);
        assert!(h.storage.students().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let h = Harness::new(InMemoryStorage::new());

        h.command(1, Command::Unknown("help".to_string())).await;

        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "Sorry, I don't recognize that command. Please use /start, /event, or /broadcast."
        );
    }

    #[tokio::test]
    async fn test_text_outside_conversation_is_ignored() {
        let h = Harness::new(InMemoryStorage::new());

        h.text(1, "hello?").await;

        assert!(h.messenger.sent_to(ChatId(1)).is_empty());
        assert_eq!(h.tracker.state(ChatId(1)), None);
    }

    #[tokio::test]
    async fn test_unsupported_input_reprompts() {
        let h = Harness::new(InMemoryStorage::new());
        h.command(1, Command::Start).await;

        h.tracker.handle(input_from(1, Input::Unsupported)).await;

        assert_eq!(h.step(1), Some("collect_name"));
        assert_eq!(
            h.messenger.last_text(ChatId(1)).unwrap(),
            "Please enter your Full Name:"
        );
    }

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let h = Harness::new(InMemoryStorage::new());

        h.command(1, Command::Start).await;
        h.command(2, Command::Start).await;
        h.text(1, "Hana").await;

        assert_eq!(h.step(1), Some("collect_phone"));
        assert_eq!(h.step(2), Some("collect_name"));
    }

    #[tokio::test]
    async fn test_evict_idle_conversations() {
        let h = Harness::with_settings(
            InMemoryStorage::new(),
            TrackerSettings {
                conversation_ttl: Some(Duration::from_secs(60)),
                ..TrackerSettings::default()
            },
        );
        h.command(1, Command::Start).await;

        assert_eq!(h.tracker.evict_idle(Utc::now()), 0);
        assert!(h.tracker.state(ChatId(1)).is_some());

        let later = Utc::now() + chrono::Duration::minutes(2);
        assert_eq!(h.tracker.evict_idle(later), 1);
        assert_eq!(h.tracker.state(ChatId(1)), None);
    }

    #[tokio::test]
    async fn test_chat_locks_released_without_conversation() {
        let h = Harness::with_settings(
            InMemoryStorage::new(),
            TrackerSettings {
                conversation_ttl: None,
                ..TrackerSettings::default()
            },
        );

        h.command(1, Command::Unknown("help".to_string())).await;
        h.text(2, "hello?").await;
        assert_eq!(h.tracker.tracked_locks(), 0);

        h.command(3, Command::Start).await;
        assert_eq!(h.tracker.tracked_locks(), 1);

        h.text(3, "Hana").await;
        h.contact(3, "0911").await;
        h.text(3, "1st Year").await;
        h.text(3, "CS").await;
        assert_eq!(h.tracker.state(ChatId(3)), None);
        assert_eq!(h.tracker.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_no_eviction_without_ttl() {
        let h = Harness::with_settings(
            InMemoryStorage::new(),
            TrackerSettings {
                conversation_ttl: None,
                ..TrackerSettings::default()
            },
        );
        h.command(1, Command::Start).await;

        let much_later = Utc::now() + chrono::Duration::days(30);
        assert_eq!(h.tracker.evict_idle(much_later), 0);
        assert!(h.tracker.spawn_sweeper().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_pauses_between_deliveries() {
        let storage = InMemoryStorage::new();
        for user in 1..=3 {
            storage.seed_student(user, "Student");
        }
        let h = Harness::with_settings(
            storage,
            TrackerSettings {
                broadcast_delay: Duration::from_millis(100),
                ..TrackerSettings::default()
            },
        );

        let report = h
            .tracker
            .fan_out(&ImageSource::File(PathBuf::from("/images/poster.jpg")), "Hi")
            .await
            .unwrap();

        assert_eq!(report.success_count, 3);
        assert_eq!(report.fail_count, 0);
        let times = h.messenger.image_times();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_blocks_only_its_own_chat() {
        let storage = InMemoryStorage::new();
        for user in 1..=3 {
            storage.seed_student(user, "Student");
        }
        let h = Harness::with_settings(
            storage,
            TrackerSettings {
                broadcast_delay: Duration::from_secs(60),
                ..TrackerSettings::default()
            },
        );
        h.command(ORGANIZER, Command::Broadcast).await;
        h.text(ORGANIZER, "poster.jpg").await;
        h.text(ORGANIZER, "Hello").await;

        let tracker = h.tracker.clone();
        let broadcast = tokio::spawn(async move {
            tracker
                .handle(input_from(ORGANIZER, Input::Text(CONFIRM_TOKEN.to_string())))
                .await;
        });
        tokio::task::yield_now().await;

        // The organizer's chat is busy; a second update waits for the fan-out
        let tracker = h.tracker.clone();
        let queued = tokio::spawn(async move {
            tracker.handle(command_from(ORGANIZER, Command::Cancel)).await;
        });
        tokio::task::yield_now().await;

        // Other chats are served meanwhile
        h.command(50, Command::Start).await;
        assert_eq!(h.step(50), Some("collect_name"));
        // The preview plus the first delivery
        assert_eq!(h.messenger.image_times().len(), 2);
        assert!(!h
            .messenger
            .texts_for(ChatId(ORGANIZER))
            .iter()
            .any(|t| t == "There is nothing to cancel."));

        broadcast.await.unwrap();
        queued.await.unwrap();

        let texts = h.messenger.texts_for(ChatId(ORGANIZER));
        let summary = texts
            .iter()
            .position(|t| t.starts_with("✅ Broadcast Complete!"))
            .unwrap();
        let cancel = texts
            .iter()
            .position(|t| t == "There is nothing to cancel.")
            .unwrap();
        assert!(summary < cancel);
    }

    fn scripted_inbound(chat: usize, action: usize) -> Inbound {
        let user = [1, 2, ORGANIZER][chat];
        match action {
            0 => command_from(user, Command::Start),
            1 => command_from(user, Command::Event),
            2 => command_from(user, Command::Broadcast),
            3 => command_from(user, Command::Cancel),
            _ => {
                let text = ["Hana", "2nd Year", "CS", "Yes", "poster.jpg", CONFIRM_TOKEN][action - 4];
                input_from(user, Input::Text(text.to_string()))
            }
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_at_most_one_state_per_chat(
            script in proptest::collection::vec((0usize..3, 0usize..10), 1..40)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                let storage = InMemoryStorage::new().with_active_event("Hackathon", event_date());
                let h = Harness::with_settings(
                    storage,
                    TrackerSettings {
                        broadcast_delay: Duration::ZERO,
                        ..TrackerSettings::default()
                    },
                );

                for (chat, action) in script {
                    h.tracker.handle(scripted_inbound(chat, action)).await;

                    assert!(h.tracker.active_conversations() <= 3);
                    for user in [1, 2, ORGANIZER] {
                        if let Some(state) = h.tracker.state(ChatId(user)) {
                            assert_eq!(state.chat_id, ChatId(user));
                        }
                    }
                }
            });
        }
    }
}
