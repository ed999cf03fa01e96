//! Effect execution
//!
//! Runs the effects of a transition against the collaborators. Every
//! collaborator failure is caught here and turned into a message to the chat.

use super::traits::{CollaboratorError, ImageSource, Messenger, Storage};
use super::ConversationTracker;
use crate::state_machine::{
    transition, ChatId, Effect, EventId, Input, Keyboard, Next, RegistrationFields, StudentId,
    TransitionError,
};
use std::path::PathBuf;

pub(super) const GENERIC_FAILURE: &str = "Sorry, something went wrong. Please try again later.";

/// Outcome of a broadcast fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct BroadcastReport {
    pub success_count: usize,
    pub fail_count: usize,
}

impl BroadcastReport {
    pub fn summary(&self) -> String {
        format!(
            "✅ Broadcast Complete!\n\nSent successfully: {}\nFailed (likely blocked the bot): {}",
            self.success_count, self.fail_count
        )
    }
}

impl<S, M> ConversationTracker<S, M>
where
    S: Storage + 'static,
    M: Messenger + 'static,
{
    /// Feed one input into the chat's conversation, then run the resulting
    /// effects. Effects may produce a follow-up input (the image lookup),
    /// which is processed in the same loop.
    pub(super) async fn handle_input(&self, chat_id: ChatId, input: Input) {
        let mut pending = Some(input);

        while let Some(input) = pending.take() {
            let Some(flow) = self.current_flow(chat_id) else {
                tracing::debug!(chat_id = %chat_id, "Message outside any conversation, ignoring");
                return;
            };

            let result = match transition(&flow, input) {
                Ok(result) => result,
                Err(TransitionError::Rejected { reprompt }) => {
                    tracing::debug!(
                        chat_id = %chat_id,
                        step = flow.step_name(),
                        "Input rejected, replaying step"
                    );
                    self.send_text(chat_id, &reprompt, &Keyboard::None).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(chat_id = %chat_id, error = %e, "Dropping input");
                    return;
                }
            };

            // Terminal steps clear the state before their effects run, so a
            // failing collaborator never leaves a half-finished conversation.
            match result.next {
                Next::Continue(next) => self.store_flow(chat_id, next),
                Next::Finished => {
                    self.clear(chat_id);
                    tracing::info!(
                        chat_id = %chat_id,
                        flow = %flow.kind(),
                        "Conversation finished"
                    );
                }
            }

            for effect in result.effects {
                if let Some(follow_up) = self.execute_effect(chat_id, effect).await {
                    pending = Some(follow_up);
                }
            }
        }
    }

    async fn execute_effect(&self, chat_id: ChatId, effect: Effect) -> Option<Input> {
        match effect {
            Effect::SendText { text, keyboard } => {
                self.send_text(chat_id, &text, &keyboard).await;
                None
            }

            Effect::SendPreview { image, caption } => {
                if let Err(e) = self
                    .messenger
                    .send_image(chat_id, &ImageSource::File(image), &caption)
                    .await
                {
                    tracing::warn!(chat_id = %chat_id, error = %e, "Broadcast preview failed");
                    self.send_text(chat_id, GENERIC_FAILURE, &Keyboard::None).await;
                }
                None
            }

            Effect::CheckResource { name } => {
                let path = self.resources.resolve(&name).await;
                Some(Input::ResourceChecked { name, path })
            }

            Effect::CompleteRegistration(fields) => {
                self.complete_registration(chat_id, &fields).await;
                None
            }

            Effect::CompleteReservation {
                student_id,
                event_id,
                attendance,
                feedback,
            } => {
                self.complete_reservation(chat_id, student_id, event_id, &attendance, &feedback)
                    .await;
                None
            }

            Effect::FanOut { image, caption } => {
                self.complete_broadcast(chat_id, image, &caption).await;
                None
            }
        }
    }

    async fn complete_registration(&self, chat_id: ChatId, fields: &RegistrationFields) {
        let student_id = match self.storage.persist_registration(fields).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(chat_id = %chat_id, error = %e, "Saving registration failed");
                self.send_text(
                    chat_id,
                    "An error occurred during registration.",
                    &Keyboard::None,
                )
                .await;
                return;
            }
        };

        tracing::info!(chat_id = %chat_id, student_id = %student_id, "Student registered");
        self.deliver_code(
            chat_id,
            student_id,
            &format!(
                "You are registered! ✅\n\nYour Unique ID: {student_id}\nPlease save this QR code."
            ),
            &format!("Registered successfully! ✅ Your ID is: {student_id}."),
        )
        .await;
    }

    async fn complete_reservation(
        &self,
        chat_id: ChatId,
        student_id: StudentId,
        event_id: EventId,
        attendance: &str,
        feedback: &str,
    ) {
        match self
            .storage
            .persist_reservation(student_id, event_id, attendance, feedback)
            .await
        {
            Ok(reservation) => {
                tracing::info!(
                    chat_id = %chat_id,
                    reservation_id = reservation.id,
                    event_id = %event_id,
                    "Reservation saved"
                );
                self.deliver_code(
                    chat_id,
                    student_id,
                    "Reservation confirmed! ✅\n\nThis is your identification. Please come with this QR code.",
                    &format!("Reservation confirmed! ✅ Your ID is {student_id}."),
                )
                .await;
            }
            Err(CollaboratorError::Duplicate(reason)) => {
                tracing::info!(chat_id = %chat_id, reason = %reason, "Reservation already exists");
                self.send_text(
                    chat_id,
                    "You have already reserved for the current event.",
                    &Keyboard::None,
                )
                .await;
            }
            Err(e) => {
                tracing::error!(chat_id = %chat_id, error = %e, "Saving reservation failed");
                self.send_text(
                    chat_id,
                    "Sorry, we could not save your reservation.",
                    &Keyboard::None,
                )
                .await;
            }
        }
    }

    async fn complete_broadcast(&self, chat_id: ChatId, image: PathBuf, caption: &str) {
        match self.fan_out(&ImageSource::File(image), caption).await {
            Ok(report) => {
                tracing::info!(
                    chat_id = %chat_id,
                    sent = report.success_count,
                    failed = report.fail_count,
                    "Broadcast finished"
                );
                self.send_text(chat_id, &report.summary(), &Keyboard::None)
                    .await;
            }
            Err(e) => {
                tracing::error!(chat_id = %chat_id, error = %e, "Loading broadcast recipients failed");
                self.send_text(chat_id, GENERIC_FAILURE, &Keyboard::None).await;
            }
        }
    }

    /// Deliver one image to every recipient, in order, pausing between sends.
    /// A failed delivery is counted and the loop moves on.
    pub(super) async fn fan_out(
        &self,
        image: &ImageSource,
        caption: &str,
    ) -> Result<BroadcastReport, CollaboratorError> {
        let recipients = self.storage.list_broadcast_recipients().await?;
        let mut report = BroadcastReport::default();

        for (i, recipient) in recipients.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.broadcast_delay).await;
            }
            match self.messenger.send_image(recipient, image, caption).await {
                Ok(()) => report.success_count += 1,
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "Broadcast delivery failed");
                    report.fail_count += 1;
                }
            }
        }

        Ok(report)
    }

    /// Send the student's code as an image, or the plain id when rendering or
    /// sending the image fails.
    pub(super) async fn deliver_code(
        &self,
        chat_id: ChatId,
        student_id: StudentId,
        caption: &str,
        fallback: &str,
    ) {
        let delivered = match self.codes.generate(&student_id.to_string()) {
            Ok(png) => match self
                .messenger
                .send_image(chat_id, &ImageSource::Png(png), caption)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(chat_id = %chat_id, error = %e, "Sending QR code failed");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "QR code generation failed");
                false
            }
        };

        if !delivered {
            self.send_text(chat_id, fallback, &Keyboard::None).await;
        }
    }

    /// Send a text message; failures are logged, never propagated
    pub(super) async fn send_text(&self, chat_id: ChatId, text: &str, keyboard: &Keyboard) -> bool {
        match self.messenger.send_message(chat_id, text, keyboard).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "Sending message failed");
                false
            }
        }
    }
}
