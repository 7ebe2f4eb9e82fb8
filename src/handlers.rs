//! Command handlers: validate, call out, reply.
//!
//! Each handler sends a placeholder before the slow call and edits it with
//! the result. Failures never leave this module; they become reply text.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use teloxide::utils::html;
use tracing::{debug, error, info, warn};

use crate::chart::render_chart;
use crate::error::BotError;
use crate::formatter::{add_emojis, split_chunks};
use crate::gemini::{EMPTY_RESPONSE, Generator};
use crate::market::{MarketData, SUPPORTED_SYMBOLS, Timeframe, is_supported_symbol};
use crate::telegram::Messenger;

/// Longest `/ai` prompt accepted, in characters.
pub const MAX_PROMPT_CHARS: usize = 1000;

/// Command menu shown by Telegram clients.
pub const COMMANDS: [(&str, &str); 4] = [
    ("start", "Show the welcome message"),
    ("ai", "Ask Gemini a question"),
    ("price", "Latest USD price, e.g. /price BTC"),
    ("chart", "Candlestick chart, e.g. /chart ETH 1week"),
];

pub const WELCOME: &str = "👋 Welcome to the Gemini AI Chatbot!\n\n\
Use the /ai command followed by your message to chat with me.\n\
Example: <code>/ai Explain blockchain technology</code>\n\n\
📈 Crypto market data:\n\
<code>/price BTC</code> shows the latest USD price\n\
<code>/chart BTC 1week</code> draws a candlestick chart (1day, 1week, 1month)\n\n\
📷 Send a photo with a caption to ask about the image.\n\n\
I'll provide well-structured responses with clear sections! 🚀";

pub const AI_USAGE: &str = "Please provide a message after the /ai command.\n\
Example: /ai Explain blockchain technology";
pub const AI_TOO_LONG: &str = "Your message is too long. Please keep it under 1000 characters.";
pub const AI_PROCESSING: &str = "🤔 Processing your request...";

pub const CAPTION_MISSING: &str =
    "Please provide a caption with your image describing what you'd like to know about it.";
pub const IMAGE_PROCESSING: &str = "🤔 Analyzing your image...";
pub const IMAGE_ERROR: &str =
    "❌ Sorry, I encountered an error while processing your image. Please try again later.";

pub const PRICE_USAGE: &str = "Usage: <code>/price SYMBOL</code>\nExample: <code>/price BTC</code>";
pub const CHART_USAGE: &str =
    "Usage: <code>/chart SYMBOL TIMEFRAME</code>\nExample: <code>/chart ETH 1week</code>";

pub fn invalid_symbol_text() -> String {
    format!("❌ Invalid symbol. Supported symbols: {}", SUPPORTED_SYMBOLS.join(", "))
}

pub fn invalid_timeframe_text() -> String {
    let names: Vec<&str> = Timeframe::ALL.iter().map(Timeframe::as_str).collect();
    format!("❌ Invalid timeframe. Supported timeframes: {}", names.join(", "))
}

pub fn price_error_text(symbol: &str) -> String {
    format!("❌ Sorry, I couldn't fetch the price for {symbol} right now. Please try again later.")
}

pub fn chart_error_text(symbol: &str) -> String {
    format!("❌ Sorry, I couldn't generate the {symbol} chart right now. Please try again later.")
}

/// Everything a handler needs. Cheap to clone.
#[derive(Clone)]
pub struct BotContext {
    pub messenger: Arc<dyn Messenger>,
    pub generator: Arc<dyn Generator>,
    pub market: Arc<dyn MarketData>,
    /// Staging directory for downloaded photos.
    pub temp_dir: PathBuf,
}

/// A parsed `/command arg arg...` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    pub chat_id: i64,
    pub message_id: i64,
}

impl Invocation {
    /// Parse a command message. Returns `None` for plain text and for
    /// commands addressed to a different bot (`/cmd@otherbot`).
    pub fn parse(text: &str, bot_username: Option<&str>, chat_id: i64, message_id: i64) -> Option<Self> {
        let mut tokens = text.split_whitespace();
        let head = tokens.next()?.strip_prefix('/')?;

        let (name, target) = match head.split_once('@') {
            Some((name, target)) => (name, Some(target)),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        if let (Some(target), Some(me)) = (target, bot_username)
            && !target.eq_ignore_ascii_case(me)
        {
            return None;
        }

        Some(Self {
            command: name.to_lowercase(),
            args: tokens.map(str::to_string).collect(),
            chat_id,
            message_id,
        })
    }
}

/// A photo message, reduced to its largest size.
#[derive(Debug, Clone)]
pub struct PhotoMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub file_id: String,
    pub caption: Option<String>,
}

/// Route an invocation to its handler. Unknown commands are ignored.
pub async fn dispatch(ctx: &BotContext, inv: &Invocation) {
    match inv.command.as_str() {
        "start" => handle_start(ctx, inv).await,
        "ai" => handle_ai(ctx, inv).await,
        "price" => handle_price(ctx, inv).await,
        "chart" => handle_chart(ctx, inv).await,
        other => debug!("Ignoring unknown command /{other}"),
    }
}

async fn reply(ctx: &BotContext, inv_chat: i64, reply_to: i64, html_text: &str) {
    if let Err(e) = ctx.messenger.send_message(inv_chat, html_text, Some(reply_to)).await {
        error!("Failed to reply in chat {inv_chat}: {e}");
    }
}

/// Send the placeholder. `None` if even that failed; the result will then
/// go out as fresh messages.
async fn send_placeholder(ctx: &BotContext, chat_id: i64, reply_to: i64, text: &str) -> Option<i64> {
    match ctx.messenger.send_message(chat_id, text, Some(reply_to)).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Placeholder not sent: {e}");
            None
        }
    }
}

/// Put `html_text` where the placeholder is, or send it fresh if editing fails.
async fn replace_placeholder(
    messenger: &dyn Messenger,
    chat_id: i64,
    reply_to: i64,
    placeholder: Option<i64>,
    html_text: &str,
) {
    if let Some(id) = placeholder {
        match messenger.edit_message(chat_id, id, html_text).await {
            Ok(()) => return,
            Err(e) => warn!("Edit of message {id} failed, sending new message: {e}"),
        }
    }
    if let Err(e) = messenger.send_message(chat_id, html_text, Some(reply_to)).await {
        error!("Failed to deliver reply in chat {chat_id}: {e}");
    }
}

/// Deliver model output: first chunk replaces the placeholder, the rest
/// follow as new messages in order.
pub async fn deliver(
    messenger: &dyn Messenger,
    chat_id: i64,
    reply_to: i64,
    placeholder: Option<i64>,
    text: &str,
) {
    let text = if text.is_empty() { EMPTY_RESPONSE } else { text };
    let chunks = split_chunks(text);
    if chunks.len() > 1 {
        info!("✂️ Splitting reply into {} chunks", chunks.len());
    }

    let mut chunks = chunks.iter().map(|c| html::escape(c));
    if let Some(first) = chunks.next() {
        replace_placeholder(messenger, chat_id, reply_to, placeholder, &first).await;
    }
    for chunk in chunks {
        if let Err(e) = messenger.send_message(chat_id, &chunk, Some(reply_to)).await {
            error!("Failed to send follow-up chunk in chat {chat_id}: {e}");
        }
    }
}

async fn handle_start(ctx: &BotContext, inv: &Invocation) {
    info!("👋 /start in chat {}", inv.chat_id);
    reply(ctx, inv.chat_id, inv.message_id, WELCOME).await;
}

async fn handle_ai(ctx: &BotContext, inv: &Invocation) {
    if inv.args.is_empty() {
        reply(ctx, inv.chat_id, inv.message_id, AI_USAGE).await;
        return;
    }

    let message = inv.args.join(" ");
    let len = message.chars().count();
    if len > MAX_PROMPT_CHARS {
        info!("Rejected /ai prompt of {len} chars in chat {}", inv.chat_id);
        reply(ctx, inv.chat_id, inv.message_id, AI_TOO_LONG).await;
        return;
    }

    info!("💬 /ai in chat {} ({len} chars)", inv.chat_id);
    let placeholder = send_placeholder(ctx, inv.chat_id, inv.message_id, AI_PROCESSING).await;
    let response = ctx.generator.generate(&message, None).await;
    deliver(ctx.messenger.as_ref(), inv.chat_id, inv.message_id, placeholder, &add_emojis(&response)).await;
}

/// Upper-cased symbol if it is on the allow-list.
fn validate_symbol(raw: &str) -> Result<String, BotError> {
    let symbol = raw.to_uppercase();
    if is_supported_symbol(&symbol) {
        Ok(symbol)
    } else {
        Err(BotError::InvalidArgument(format!("unsupported symbol '{raw}'")))
    }
}

/// `43210.5` -> `$43,210.50`; sub-dollar prices keep six decimals.
pub fn format_usd(price: f64) -> String {
    if price < 1.0 {
        return format!("${price:.6}");
    }
    let fixed = format!("{price:.2}");
    let (int, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("${grouped}.{frac}")
}

async fn handle_price(ctx: &BotContext, inv: &Invocation) {
    let [raw] = inv.args.as_slice() else {
        reply(ctx, inv.chat_id, inv.message_id, PRICE_USAGE).await;
        return;
    };
    let symbol = match validate_symbol(raw) {
        Ok(s) => s,
        Err(e) => {
            info!("/price rejected: {e}");
            reply(ctx, inv.chat_id, inv.message_id, &invalid_symbol_text()).await;
            return;
        }
    };

    let placeholder =
        send_placeholder(ctx, inv.chat_id, inv.message_id, &format!("🔍 Fetching {symbol} price...")).await;

    let text = match ctx.market.get_price(&symbol).await {
        Ok(price) => format!("💰 <b>{symbol}/USD</b>: {}", format_usd(price)),
        Err(e) => {
            error!("Price fetch for {symbol} failed: {e}");
            price_error_text(&symbol)
        }
    };
    replace_placeholder(ctx.messenger.as_ref(), inv.chat_id, inv.message_id, placeholder, &text).await;
}

async fn handle_chart(ctx: &BotContext, inv: &Invocation) {
    let [raw_symbol, raw_timeframe] = inv.args.as_slice() else {
        reply(ctx, inv.chat_id, inv.message_id, CHART_USAGE).await;
        return;
    };
    let symbol = match validate_symbol(raw_symbol) {
        Ok(s) => s,
        Err(e) => {
            info!("/chart rejected: {e}");
            reply(ctx, inv.chat_id, inv.message_id, &invalid_symbol_text()).await;
            return;
        }
    };
    let timeframe: Timeframe = match raw_timeframe.to_lowercase().parse() {
        Ok(tf) => tf,
        Err(e) => {
            info!("/chart rejected: {e}");
            reply(ctx, inv.chat_id, inv.message_id, &invalid_timeframe_text()).await;
            return;
        }
    };

    let placeholder = send_placeholder(
        ctx,
        inv.chat_id,
        inv.message_id,
        &format!("📊 Generating {symbol} chart ({timeframe})..."),
    )
    .await;

    let outcome = match build_chart(ctx, &symbol, timeframe).await {
        Ok((png, candles)) => {
            let caption = format!("📈 <b>{symbol}/USD</b> ({timeframe})");
            ctx.messenger
                .send_image(inv.chat_id, png, &caption, Some(inv.message_id))
                .await
                .map(|_| candles)
        }
        Err(e) => Err(e),
    };

    let text = match outcome {
        Ok(candles) => format!("✅ {symbol}/USD chart ({timeframe}, {candles} candles)"),
        Err(e) => {
            error!("Chart for {symbol} ({timeframe}) failed: {e}");
            chart_error_text(&symbol)
        }
    };
    replace_placeholder(ctx.messenger.as_ref(), inv.chat_id, inv.message_id, placeholder, &text).await;
}

/// Fetch and render off the async threads. Returns PNG bytes and candle count.
async fn build_chart(ctx: &BotContext, symbol: &str, timeframe: Timeframe) -> Result<(Vec<u8>, usize), BotError> {
    let series = ctx.market.get_series(symbol, timeframe).await?;
    let candles = series.len();
    let owned_symbol = symbol.to_string();

    let png = tokio::task::spawn_blocking(move || render_chart(&series, &owned_symbol, timeframe))
        .await
        .map_err(|e| BotError::RenderFailure(format!("render task failed: {e}")))??;
    Ok((png, candles))
}

/// Downloaded photo that is removed when dropped, on every exit path.
struct TempImage {
    path: PathBuf,
}

impl TempImage {
    /// Create `{dir}/{file_id}_XXXXXX.jpg`. The random part keeps two
    /// updates carrying the same photo from sharing a file.
    fn new(dir: &Path, file_id: &str) -> std::io::Result<Self> {
        let name: String = file_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = tempfile::Builder::new()
            .prefix(&format!("{name}_"))
            .suffix(".jpg")
            .tempfile_in(dir)?
            .into_temp_path()
            .keep()?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temp image {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Error removing temporary file {}: {e}", self.path.display()),
        }
    }
}

/// Answer a question about a photo. The staged file is always removed.
pub async fn handle_photo(ctx: &BotContext, photo: &PhotoMessage) {
    let Some(caption) = photo.caption.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
        reply(ctx, photo.chat_id, photo.message_id, CAPTION_MISSING).await;
        return;
    };

    if let Err(e) = tokio::fs::create_dir_all(&ctx.temp_dir).await {
        error!("Failed to create {}: {e}", ctx.temp_dir.display());
        reply(ctx, photo.chat_id, photo.message_id, IMAGE_ERROR).await;
        return;
    }

    let image = match TempImage::new(&ctx.temp_dir, &photo.file_id) {
        Ok(image) => image,
        Err(e) => {
            error!("Failed to stage photo in {}: {e}", ctx.temp_dir.display());
            reply(ctx, photo.chat_id, photo.message_id, IMAGE_ERROR).await;
            return;
        }
    };
    info!("📷 Photo question in chat {} ({} chars)", photo.chat_id, caption.chars().count());

    if let Err(e) = ctx.messenger.download_file(&photo.file_id, image.path()).await {
        error!("Error downloading photo: {e}");
        reply(ctx, photo.chat_id, photo.message_id, IMAGE_ERROR).await;
        return;
    }

    let placeholder = send_placeholder(ctx, photo.chat_id, photo.message_id, IMAGE_PROCESSING).await;

    let bytes = match tokio::fs::read(image.path()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Error reading {}: {e}", image.path().display());
            replace_placeholder(ctx.messenger.as_ref(), photo.chat_id, photo.message_id, placeholder, IMAGE_ERROR)
                .await;
            return;
        }
    };

    let response = ctx.generator.generate(caption, Some(bytes.as_slice())).await;
    deliver(ctx.messenger.as_ref(), photo.chat_id, photo.message_id, placeholder, &add_emojis(&response)).await;
}
