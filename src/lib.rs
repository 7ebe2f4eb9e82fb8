//! Telegram front-end for Gemini questions and Alpha Vantage crypto quotes.

pub mod chart;
pub mod config;
pub mod error;
pub mod formatter;
pub mod gemini;
pub mod handlers;
pub mod instance;
pub mod market;
pub mod telegram;
pub mod telegram_log;
