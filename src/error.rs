//! Runtime error taxonomy.
//!
//! None of these reach the user verbatim: handlers turn each one into reply
//! text, and only `AlreadyRunning` stops the process.

use std::fmt;

#[derive(Debug)]
pub enum BotError {
    /// Another process holds the instance lock.
    AlreadyRunning,
    /// Bad command arguments, symbol, or timeframe.
    InvalidArgument(String),
    /// Provider error, rate limit, or malformed payload.
    DataUnavailable(String),
    /// Chart could not be drawn.
    RenderFailure(String),
    /// A reply could not be sent or edited.
    DeliveryFailure(String),
    /// Gemini call failed. Mapped to apology text inside the client.
    Generation(String),
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "another instance is already running"),
            Self::InvalidArgument(e) => write!(f, "invalid argument: {e}"),
            Self::DataUnavailable(e) => write!(f, "market data unavailable: {e}"),
            Self::RenderFailure(e) => write!(f, "chart rendering failed: {e}"),
            Self::DeliveryFailure(e) => write!(f, "delivery failed: {e}"),
            Self::Generation(e) => write!(f, "generation failed: {e}"),
        }
    }
}

impl std::error::Error for BotError {}
