//! Telegram transport
//!
//! Turns Telegram updates into [`Inbound`] items for the tracker and
//! implements [`Messenger`] on top of the Bot API.

use crate::runtime::{
    CollaboratorError, ImageSource, Inbound, InboundBody, Messenger, ProductionTracker,
};
use crate::state_machine::{ChatId, Command, Identity, Input, Keyboard};
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{
    ButtonRequest, InputFile, KeyboardButton, KeyboardMarkup, KeyboardRemove, ReplyMarkup,
};

/// Bot API client used for every outgoing message
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn reply_markup(keyboard: &Keyboard) -> Option<ReplyMarkup> {
    match keyboard {
        Keyboard::None => None,
        Keyboard::Options(rows) => {
            let rows = rows
                .iter()
                .map(|row| row.iter().map(|label| KeyboardButton::new(label.clone())));
            Some(
                KeyboardMarkup::new(rows)
                    .one_time_keyboard()
                    .resize_keyboard()
                    .into(),
            )
        }
        Keyboard::RequestContact(label) => {
            let button = KeyboardButton::new(label.clone()).request(ButtonRequest::Contact);
            Some(
                KeyboardMarkup::new([[button]])
                    .one_time_keyboard()
                    .resize_keyboard()
                    .into(),
            )
        }
        Keyboard::Remove => Some(ReplyMarkup::KeyboardRemove(KeyboardRemove::new())),
    }
}

fn delivery_error(err: &teloxide::RequestError) -> CollaboratorError {
    CollaboratorError::Delivery(err.to_string())
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), CollaboratorError> {
        let mut request = self
            .bot
            .send_message(teloxide::types::ChatId(chat_id.0), text);
        if let Some(markup) = reply_markup(keyboard) {
            request = request.reply_markup(markup);
        }
        request.await.map_err(|e| delivery_error(&e))?;
        Ok(())
    }

    async fn send_image(
        &self,
        chat_id: ChatId,
        image: &ImageSource,
        caption: &str,
    ) -> Result<(), CollaboratorError> {
        let file = match image {
            ImageSource::Png(bytes) => InputFile::memory(bytes.clone()).file_name("code.png"),
            ImageSource::File(path) => InputFile::file(path.clone()),
        };
        self.bot
            .send_photo(teloxide::types::ChatId(chat_id.0), file)
            .caption(caption)
            .await
            .map_err(|e| delivery_error(&e))?;
        Ok(())
    }
}

/// Convert a Telegram message into tracker input. Messages without a sender
/// (channel posts) yield `None`.
pub fn inbound_from_message(msg: &Message) -> Option<Inbound> {
    let user = msg.from.as_ref()?;
    let identity = Identity::new(
        i64::try_from(user.id.0).ok()?,
        user.username.clone(),
    );

    let body = if let Some(text) = msg.text() {
        match Command::parse(text) {
            Some(command) => InboundBody::Command(command),
            None => InboundBody::Input(Input::Text(text.to_string())),
        }
    } else if let Some(contact) = msg.contact() {
        InboundBody::Input(Input::Contact {
            phone_number: contact.phone_number.clone(),
        })
    } else {
        InboundBody::Input(Input::Unsupported)
    };

    Some(Inbound {
        chat_id: ChatId(msg.chat.id.0),
        identity,
        body,
    })
}

async fn on_message(tracker: Arc<ProductionTracker>, msg: Message) -> ResponseResult<()> {
    match inbound_from_message(&msg) {
        Some(inbound) => tracker.handle(inbound).await,
        None => tracing::debug!(chat_id = msg.chat.id.0, "Skipping message without sender"),
    }
    Ok(())
}

/// Long-poll Telegram until Ctrl-C
pub async fn run(bot: Bot, tracker: Arc<ProductionTracker>) -> Result<(), teloxide::RequestError> {
    // Polling fails while a webhook is registered
    bot.delete_webhook().drop_pending_updates(true).await?;

    let me = bot.get_me().await?;
    tracing::info!(username = ?me.username, "Bot started polling");

    Dispatcher::builder(bot, Update::filter_message().endpoint(on_message))
        .dependencies(dptree::deps![tracker])
        .default_handler(|update: Arc<Update>| async move {
            tracing::debug!(update_id = update.id.0, "Unhandled update");
        })
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("Bot stopped");
    Ok(())
}
