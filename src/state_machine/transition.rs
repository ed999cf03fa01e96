//! Pure state transition function
//!
//! Given the current flow and one input, decide the next flow and the effects
//! the runtime must execute. No I/O happens here; the image lookup of the
//! broadcast flow round-trips through `Effect::CheckResource` and
//! `Input::ResourceChecked`.

use super::effect::{Effect, Keyboard};
use super::input::Input;
use super::state::{
    BroadcastStep, Flow, RegistrationFields, RegistrationStep, ReservationStep,
    ATTENDANCE_OPTIONS, CANCEL_TOKEN, CONFIRM_TOKEN, DEPARTMENT_OPTIONS, FEEDBACK_OPTIONS,
    YEAR_OPTIONS,
};
use thiserror::Error;

/// Where the conversation goes after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Continue(Flow),
    /// Completed or cancelled; the state is removed
    Finished,
}

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub next: Next,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn advance(flow: Flow) -> Self {
        Self {
            next: Next::Continue(flow),
            effects: vec![],
        }
    }

    pub fn finish() -> Self {
        Self {
            next: Next::Finished,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// Input failed validation; the step is replayed with this prompt
    #[error("{reprompt}")]
    Rejected { reprompt: String },
    #[error("Unexpected input at step {step}")]
    Unexpected { step: &'static str },
}

impl TransitionError {
    fn rejected(reprompt: impl Into<String>) -> Self {
        TransitionError::Rejected {
            reprompt: reprompt.into(),
        }
    }
}

/// Pure transition function
pub fn transition(flow: &Flow, input: Input) -> Result<TransitionResult, TransitionError> {
    // A lookup result only means something while collecting the image name
    if matches!(input, Input::ResourceChecked { .. })
        && !matches!(
            flow,
            Flow::Broadcast {
                step: BroadcastStep::CollectImageReference
            }
        )
    {
        return Err(TransitionError::Unexpected {
            step: flow.step_name(),
        });
    }

    match flow {
        Flow::Registration { identity, step } => {
            let advance = |step: RegistrationStep| {
                TransitionResult::advance(Flow::Registration {
                    identity: identity.clone(),
                    step,
                })
            };

            match step {
                RegistrationStep::CollectName => {
                    let full_name = input
                        .text()
                        .ok_or_else(|| TransitionError::rejected("Please enter your Full Name:"))?;
                    Ok(advance(RegistrationStep::CollectPhone {
                        full_name: full_name.to_string(),
                    })
                    .with_effect(Effect::SendText {
                        text: "Got it. Now, please share your Phone Number:".to_string(),
                        keyboard: Keyboard::RequestContact(
                            "Share My Phone Number".to_string(),
                        ),
                    }))
                }

                RegistrationStep::CollectPhone { full_name } => {
                    let phone_number = match &input {
                        Input::Contact { phone_number } if !phone_number.trim().is_empty() => {
                            phone_number.trim().to_string()
                        }
                        _ => input
                            .text()
                            .map(str::to_string)
                            .ok_or_else(|| {
                                TransitionError::rejected(
                                    "Invalid input. Please share your phone number.",
                                )
                            })?,
                    };
                    Ok(advance(RegistrationStep::CollectYearOfStudy {
                        full_name: full_name.clone(),
                        phone_number,
                    })
                    .with_effect(Effect::ask(
                        "Thank you! Please select your Year of Study:",
                        &[&YEAR_OPTIONS[..2], &YEAR_OPTIONS[2..]],
                    )))
                }

                RegistrationStep::CollectYearOfStudy {
                    full_name,
                    phone_number,
                } => {
                    let year = one_of(&input, &YEAR_OPTIONS, "Please select a valid year.")?;
                    Ok(advance(RegistrationStep::CollectDepartment {
                        full_name: full_name.clone(),
                        phone_number: phone_number.clone(),
                        year_of_study: year,
                    })
                    .with_effect(Effect::ask(
                        "Almost done! Select your Department:",
                        &[&DEPARTMENT_OPTIONS],
                    )))
                }

                RegistrationStep::CollectDepartment {
                    full_name,
                    phone_number,
                    year_of_study,
                } => {
                    let department = one_of(
                        &input,
                        &DEPARTMENT_OPTIONS,
                        "Please select a valid department.",
                    )?;
                    let fields = RegistrationFields {
                        telegram_id: identity.user_id,
                        username: identity.username.clone(),
                        full_name: full_name.clone(),
                        phone_number: phone_number.clone(),
                        year_of_study: year_of_study.clone(),
                        department,
                    };
                    Ok(TransitionResult::finish()
                        .with_effect(Effect::say_and_clear_keyboard("Registering..."))
                        .with_effect(Effect::CompleteRegistration(fields)))
                }
            }
        }

        Flow::EventReservation {
            student_id,
            event_id,
            step,
        } => match step {
            ReservationStep::CollectAttendanceIntent => {
                let attendance = one_of(
                    &input,
                    &ATTENDANCE_OPTIONS,
                    "Please select an option from the buttons.",
                )?;
                Ok(TransitionResult::advance(Flow::EventReservation {
                    student_id: *student_id,
                    event_id: *event_id,
                    step: ReservationStep::CollectFeedback { attendance },
                })
                .with_effect(Effect::ask(
                    "Thank you! How was your experience at the last event?",
                    &[&FEEDBACK_OPTIONS],
                )))
            }

            ReservationStep::CollectFeedback { attendance } => {
                let feedback = one_of(&input, &FEEDBACK_OPTIONS, "Please select an option.")?;
                Ok(TransitionResult::finish()
                    .with_effect(Effect::say_and_clear_keyboard("Saving your reservation..."))
                    .with_effect(Effect::CompleteReservation {
                        student_id: *student_id,
                        event_id: *event_id,
                        attendance: attendance.clone(),
                        feedback,
                    }))
            }
        },

        Flow::Broadcast { step } => match (step, input) {
            // A typed name is checked by the runtime before the step advances
            (BroadcastStep::CollectImageReference, Input::ResourceChecked { path, name }) => {
                match path {
                    Some(image) => Ok(TransitionResult::advance(Flow::Broadcast {
                        step: BroadcastStep::CollectCaption { image },
                    })
                    .with_effect(Effect::say(
                        "✅ Image found.\n\nNow, please enter the caption for the message.",
                    ))),
                    None => Err(TransitionError::rejected(format!(
                        "❌ File `{name}` not found. Please check the `images` directory and enter a valid file name."
                    ))),
                }
            }

            (BroadcastStep::CollectImageReference, input) => {
                let name = input.text().ok_or_else(|| {
                    TransitionError::rejected("Please enter the exact name of the image file.")
                })?;
                Ok(TransitionResult::advance(flow.clone()).with_effect(Effect::CheckResource {
                    name: name.to_string(),
                }))
            }

            (BroadcastStep::CollectCaption { image }, input) => {
                let caption = input.text().ok_or_else(|| {
                    TransitionError::rejected("Please enter the caption as a text message.")
                })?;
                Ok(TransitionResult::advance(Flow::Broadcast {
                    step: BroadcastStep::AwaitConfirmation {
                        image: image.clone(),
                        caption: caption.to_string(),
                    },
                })
                .with_effect(Effect::say("Here is a preview of your message:"))
                .with_effect(Effect::SendPreview {
                    image: image.clone(),
                    caption: caption.to_string(),
                })
                .with_effect(Effect::ask(
                    "Are you sure you want to broadcast this message to all registered users?",
                    &[&[CONFIRM_TOKEN], &[CANCEL_TOKEN]],
                )))
            }

            // Anything other than the exact affirmative token cancels
            (BroadcastStep::AwaitConfirmation { image, caption }, input) => {
                if matches!(&input, Input::Text(text) if text == CONFIRM_TOKEN) {
                    Ok(TransitionResult::finish()
                        .with_effect(Effect::say_and_clear_keyboard(
                            "🚀 Broadcasting message... This may take a while. Please wait.",
                        ))
                        .with_effect(Effect::FanOut {
                            image: image.clone(),
                            caption: caption.clone(),
                        }))
                } else {
                    Ok(TransitionResult::finish()
                        .with_effect(Effect::say_and_clear_keyboard("Broadcast cancelled.")))
                }
            }
        },
    }
}

/// Accept the input only if it is exactly one of `options`
fn one_of(input: &Input, options: &[&str], reprompt: &str) -> Result<String, TransitionError> {
    match input {
        Input::Text(text) if options.contains(&text.as_str()) => Ok(text.clone()),
        _ => Err(TransitionError::rejected(reprompt)),
    }
}
