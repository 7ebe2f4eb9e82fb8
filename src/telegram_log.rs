//! Tracing layer that relays log lines to an operator chat.
//!
//! WARN and ERROR go out at once. INFO lines are batched and flushed every
//! few seconds, or early once the batch is large.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::formatter::split_chunks;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BATCH: usize = 50;

#[derive(Debug, PartialEq)]
enum Relayed {
    Now(String),
    Batched(String),
}

impl Relayed {
    fn from_level(level: Level, message: String) -> Option<Self> {
        match level {
            Level::ERROR => Some(Relayed::Now(format!("❌ {message}"))),
            Level::WARN => Some(Relayed::Now(format!("⚠️ {message}"))),
            Level::INFO => Some(Relayed::Batched(message)),
            _ => None,
        }
    }
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<Relayed>,
}

impl TelegramLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(relay(bot, chat_id, rx));
        Self { tx }
    }
}

async fn relay(bot: Bot, chat_id: ChatId, mut rx: mpsc::UnboundedReceiver<Relayed>) {
    let mut batch: Vec<String> = Vec::new();
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(Relayed::Now(text)) => post(&bot, chat_id, &text).await,
                Some(Relayed::Batched(text)) => {
                    batch.push(text);
                    if batch.len() >= MAX_BATCH {
                        post(&bot, chat_id, &std::mem::take(&mut batch).join("\n")).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    post(&bot, chat_id, &std::mem::take(&mut batch).join("\n")).await;
                }
            }
        }
    }
}

async fn post(bot: &Bot, chat_id: ChatId, text: &str) {
    for chunk in split_chunks(text) {
        // Not through tracing: a failing send would feed back into this layer.
        if let Err(e) = bot.send_message(chat_id, chunk).await {
            eprintln!("Failed to relay log to Telegram: {e}");
            return;
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = if field.name() == "message" {
            format!("{value:?}")
        } else {
            format!("{} = {value:?}", field.name())
        };
        if !self.message.is_empty() {
            self.message.push_str(", ");
        }
        self.message.push_str(&rendered);
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let Some(line) = Relayed::from_level(*event.metadata().level(), visitor.message) else {
            return;
        };
        if self.tx.send(line).is_err() {
            eprintln!("Log relay closed, message dropped");
        }
    }
}
