//! Per-chat conversation state machine
//!
//! Pure transitions over three linear flows (registration, event reservation,
//! broadcast). The runtime owns the state map and executes the effects.

mod effect;
pub mod input;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, Keyboard};
pub use input::{Command, Input};
pub use state::{
    ChatId, ConversationState, EventId, Flow, FlowKind, Identity, RegistrationFields, StudentId,
};
pub use transition::{transition, Next, TransitionError};
