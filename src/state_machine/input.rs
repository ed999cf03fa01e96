//! Inputs that drive conversation transitions

use std::path::PathBuf;

/// A non-command message, or a result fed back by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Text(String),
    /// Phone number shared through the contact button
    Contact { phone_number: String },
    /// Outcome of an image lookup requested by `Effect::CheckResource`
    ResourceChecked { name: String, path: Option<PathBuf> },
    /// Stickers, photos, anything without text
    Unsupported,
}

impl Input {
    /// Trimmed, non-empty text content
    pub fn text(&self) -> Option<&str> {
        match self {
            Input::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            _ => None,
        }
    }
}

/// Slash commands understood by the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start`: register, or resend the code of an existing registration
    Start,
    /// `/event`: reserve a seat for the active event
    Event,
    /// `/broadcast`: organizer announcement
    Broadcast,
    /// `/cancel`: drop the current flow
    Cancel,
    Unknown(String),
}

impl Command {
    /// Parse a message that starts with `/`. Handles the `@botname` suffix
    /// Telegram appends in group chats.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim_start().strip_prefix('/')?;
        let word = rest.split_whitespace().next().unwrap_or_default();
        let name = word.split('@').next().unwrap_or_default().to_lowercase();

        Some(match name.as_str() {
            "start" => Command::Start,
            "event" => Command::Event,
            "broadcast" => Command::Broadcast,
            "cancel" => Command::Cancel,
            _ => Command::Unknown(name),
        })
    }
}
