use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::types::BotCommand;
use teloxide::update_listeners::Polling;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use cryptogem::config::Config;
use cryptogem::error::BotError;
use cryptogem::gemini::GeminiClient;
use cryptogem::handlers::{self, BotContext, COMMANDS, Invocation, PhotoMessage};
use cryptogem::instance::InstanceLock;
use cryptogem::market::AlphaVantageClient;
use cryptogem::telegram::TelegramClient;
use cryptogem::telegram_log::TelegramLogLayer;

/// Long-poll timeout for getUpdates.
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

struct BotState {
    ctx: BotContext,
    bot_username: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine; the variables may come from the environment.
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().init();
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);
    let _log_guard = init_logging(&config, &bot);

    info!("🚀 Starting cryptogem...");
    if dotenv_loaded {
        info!("Loaded .env");
    }

    let _instance_lock = if config.single_instance {
        match InstanceLock::try_acquire(&config.lock_file) {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => {
                error!("{} (lock: {})", BotError::AlreadyRunning, config.lock_file.display());
                return ExitCode::FAILURE;
            }
            Err(e) => {
                error!("Failed to open lock file {}: {e}", config.lock_file.display());
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let generator = match GeminiClient::new(config.gemini_api_key.clone()) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build Gemini HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let market = match AlphaVantageClient::new(config.alpha_vantage_api_key.clone()) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build Alpha Vantage HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            Some(me.username().to_string())
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            None
        }
    };

    let commands: Vec<BotCommand> = COMMANDS
        .iter()
        .map(|(name, description)| BotCommand::new(*name, *description))
        .collect();
    if let Err(e) = bot.set_my_commands(commands).await {
        warn!("Failed to register command menu: {e}");
    }

    let state = Arc::new(BotState {
        ctx: BotContext {
            messenger: Arc::new(TelegramClient::new(bot.clone())),
            generator: Arc::new(generator),
            market: Arc::new(market),
            temp_dir: config.temp_dir(),
        },
        bot_username,
    });

    let handler = Update::filter_message().endpoint(handle_message);
    let listener = Polling::builder(bot.clone()).timeout(POLL_TIMEOUT).build();

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(listener, LoggingErrorHandler::with_custom_text("Error from the update listener"))
        .await;

    info!("👋 Stopped");
    ExitCode::SUCCESS
}

/// Stdout plus a non-blocking file under `{data_dir}/logs`, and the
/// Telegram relay when `LOG_CHAT_ID` is set. The guard must outlive `main`'s
/// work or buffered lines are lost.
fn init_logging(config: &Config, bot: &Bot) -> Option<WorkerGuard> {
    let log_dir = config.data_dir.join("logs");
    let file = std::fs::create_dir_all(&log_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("cryptogem.log"))
    });
    let file_error = file.as_ref().err().map(|e| e.to_string());
    let (file_writer, guard) = match file {
        Ok(f) => {
            let (writer, guard) = tracing_appender::non_blocking(f);
            (Some(writer), Some(guard))
        }
        Err(_) => (None, None),
    };

    let filter = || {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(filter()),
        )
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter())
        }));

    if let Some(log_chat_id) = config.log_chat_id {
        registry
            .with(TelegramLogLayer::new(bot.clone(), log_chat_id).with_filter(filter()))
            .init();
    } else {
        registry.init();
    }

    if let Some(e) = file_error {
        warn!("Logging to stdout only, cannot open {}: {e}", log_dir.display());
    }
    guard
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    let message_id = msg.id.0 as i64;

    if let Some(sizes) = msg.photo() {
        let Some(largest) = sizes.iter().max_by_key(|p| u64::from(p.width) * u64::from(p.height)) else {
            return Ok(());
        };
        let photo = PhotoMessage {
            chat_id,
            message_id,
            file_id: largest.file.id.0.clone(),
            caption: msg.caption().map(str::to_string),
        };
        handlers::handle_photo(&state.ctx, &photo).await;
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };
    if let Some(invocation) = Invocation::parse(text, state.bot_username.as_deref(), chat_id, message_id) {
        handlers::dispatch(&state.ctx, &invocation).await;
    }

    Ok(())
}
