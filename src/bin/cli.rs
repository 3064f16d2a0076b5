//! Interpretation notifier CLI
//!
//! Meant to be run periodically: `generate-events` after every change window,
//! `send-notifications` often, `send-newsletters` daily or weekly.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use notifier::{
    error::Result,
    locale::Locales,
    models::{Channel, Config, Stream},
    pipeline::{Dispatcher, SyncController, SyncOptions},
    services::{DhisClient, RenderContext, SmtpMailer, TextRenderer},
    storage::{LocalStorage, WatermarkStore},
};

/// Notifier - interpretation and comment mailer
#[derive(Parser, Debug)]
#[command(
    name = "notifier",
    version,
    about = "E-mails subscribers about new interpretations and comments"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect changes since the last run and append them to the event log
    GenerateEvents {
        /// Rebuild the cache from a full fetch without generating events
        #[arg(long)]
        ignore_cache: bool,
    },

    /// Send one e-mail per event to each subscriber
    SendNotifications {
        /// Run generate-events first
        #[arg(long)]
        generate_events: bool,
    },

    /// Send one digest per subscriber
    SendNewsletters {
        /// Run generate-events first
        #[arg(long)]
        generate_events: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Show the watermark of every stream
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

async fn generate_events(
    config: &Config,
    storage: &LocalStorage,
    options: SyncOptions,
) -> Result<()> {
    let client = DhisClient::new(&config.api)?;
    SyncController::new(storage, &client).run(options).await?;
    Ok(())
}

async fn dispatch(config: &Config, storage: &LocalStorage, channel: Channel) -> Result<()> {
    let client = DhisClient::new(&config.api)?;
    let mailer = SmtpMailer::new(&config.smtp)?;
    let translations_dir = config.mail.translations_dir.as_deref().map(Path::new);
    let renderer = TextRenderer::new(Locales::load_or_builtin(
        translations_dir,
        &config.mail.locale,
    ));

    let result = Dispatcher::new(
        storage,
        &client,
        &client,
        &mailer,
        &renderer,
        RenderContext::from_config(config),
    )
    .with_concurrency(config.dispatch.concurrency)
    .run(channel, config.channel(channel).max_window())
    .await?;

    if !result.success {
        log::warn!(
            "{} of {} {} failed; they will be retried on the next run",
            result.failed,
            result.messages,
            channel
        );
    }
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);
    log::info!("Loaded configuration from {}", cli.config.display());

    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }

    let storage = LocalStorage::new(config.cache_dir());

    match cli.command {
        Command::GenerateEvents { ignore_cache } => {
            generate_events(&config, &storage, SyncOptions { ignore_cache }).await?;
        }

        Command::SendNotifications {
            generate_events: generate,
        } => {
            if generate {
                generate_events(&config, &storage, SyncOptions::default()).await?;
            }
            dispatch(&config, &storage, Channel::Notifications).await?;
        }

        Command::SendNewsletters {
            generate_events: generate,
        } => {
            if generate {
                generate_events(&config, &storage, SyncOptions::default()).await?;
            }
            dispatch(&config, &storage, Channel::Newsletters).await?;
        }

        Command::Validate => {
            log::info!("Config OK");
        }

        Command::Info => {
            log::info!("Cache directory: {}", config.cache_dir().display());
            for stream in [Stream::Events, Stream::Notifications, Stream::Newsletters] {
                match storage.load_watermark(stream).await? {
                    Some(watermark) => log::info!(
                        "{}: last success {}, {} recipient(s) tracked",
                        stream,
                        watermark
                            .last_success
                            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339()),
                        watermark.users.len()
                    ),
                    None => log::info!("{}: never run", stream),
                }
            }
        }
    }

    Ok(())
}
