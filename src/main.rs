use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use usage_tracker::{
    models::*,
    services::{
        clock::{time_until_next_day, SystemClock},
        store::FileStore,
    },
    ui::{render_status, StatusView},
    TrackerError, UsageTracker,
};

#[derive(Parser)]
#[command(name = "usage-tracker")]
#[command(about = "Track the daily message quota, token balance and premium status")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding the usage record and configuration
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Show version and build information
    #[arg(long)]
    about: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show remaining messages, tokens and premium status
    Status,
    /// Send messages, charging the free quota first and tokens second
    Send {
        /// Number of messages to send
        #[arg(short, long, default_value = "1")]
        count: u32,
    },
    /// Complete a purchase from the paywall
    Buy {
        /// monthly, yearly or tokens
        plan: String,
        /// Token pack size (10, 50 or 100)
        #[arg(long)]
        pack: Option<u32>,
    },
    /// Grant message tokens
    AddTokens {
        amount: u32,
    },
    /// Configure quota limits and warning thresholds
    Config {
        /// Set daily free message limit
        #[arg(long)]
        limit: Option<u32>,
        /// Warn when this many free messages or fewer are left
        #[arg(long)]
        quota_warning: Option<u32>,
        /// Warn when this many tokens or fewer are left
        #[arg(long)]
        token_warning: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.about {
        show_about();
        return Ok(());
    }

    if cli.verbose {
        // Log to file when verbose
        use std::fs::OpenOptions;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open("debug.log")?;

        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .init();
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("usage-tracker"),
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    debug!("Using data directory {}", data_dir.display());

    if let Some(Commands::Config {
        limit,
        quota_warning,
        token_warning,
    }) = cli.command
    {
        return configure_tracker(&data_dir, limit, quota_warning, token_warning);
    }

    let config = load_or_create_config(&data_dir)?;
    let tracker = UsageTracker::load(FileStore::new(&data_dir), Arc::new(SystemClock), config).await;

    if let LoadSource::Recovered(reason) = &tracker.load_outcome().source {
        println!("⚠️ Usage record could not be read ({reason}); starting from defaults");
    }

    match cli.command {
        Some(Commands::Send { count }) => send_messages(&tracker, count).await,
        Some(Commands::Buy { plan, pack }) => {
            let purchase = Purchase::parse(&plan, pack)?;
            tracker.apply_purchase(purchase).await?;
            if purchase.grants_premium() {
                println!("👑 Welcome to Premium! You now have unlimited access.");
            } else if let Purchase::Tokens(pack) = purchase {
                println!(
                    "✅ You've received {} message tokens for {}!",
                    pack.tokens(),
                    pack.price()
                );
            }
        }
        Some(Commands::AddTokens { amount }) => match tracker.add_tokens(amount).await {
            Ok(balance) => println!("✅ Token balance: {balance}"),
            Err(e) => println!("❌ {e}"),
        },
        Some(Commands::Status) | Some(Commands::Config { .. }) | None => {}
    }

    // Last chance to retry a write that failed during this run
    if let Err(e) = tracker.flush().await {
        debug!("Final flush failed: {e}");
    }

    let view = StatusView::capture(&tracker, time_until_next_day(Local::now()));
    println!("{}", render_status(&view));

    Ok(())
}

async fn send_messages<S: usage_tracker::services::KeyValueStore>(
    tracker: &UsageTracker<S>,
    count: u32,
) {
    for n in 1..=count {
        match tracker.consume_message().await {
            Ok(MessageCharge::Premium) => println!("💬 Message {n} sent (premium)"),
            Ok(MessageCharge::FreeQuota { remaining }) => {
                println!("💬 Message {n} sent ({remaining} free left today)")
            }
            Ok(MessageCharge::Token { remaining }) => {
                println!("💬 Message {n} sent with a token ({remaining} tokens left)")
            }
            Err(TrackerError::QuotaExhausted) => {
                println!("🔒 Daily limit reached. Upgrade to premium or buy tokens to continue.");
                break;
            }
            Err(e) => {
                println!("❌ {e}");
                break;
            }
        }
    }
}

fn configure_tracker(
    data_dir: &Path,
    limit: Option<u32>,
    quota_warning: Option<u32>,
    token_warning: Option<u32>,
) -> Result<()> {
    let mut config = load_or_create_config(data_dir)?;

    if let Some(limit) = limit {
        if limit == 0 {
            println!("❌ Daily limit must be at least 1");
        } else {
            config.daily_free_limit = limit;
            println!("✅ Set daily free limit to: {limit} messages");
        }
    }

    if let Some(threshold) = quota_warning {
        config.low_quota_threshold = threshold;
        println!("✅ Warn at {threshold} free messages left");
    }

    if let Some(threshold) = token_warning {
        config.low_token_threshold = threshold;
        println!("✅ Warn at {threshold} tokens left");
    }

    save_config(data_dir, &config)
}

fn load_or_create_config(data_dir: &Path) -> Result<TrackerConfig> {
    let config_path = data_dir.join("config.json");

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    } else {
        let config = TrackerConfig::default();
        save_config(data_dir, &config)?;
        Ok(config)
    }
}

fn save_config(data_dir: &Path, config: &TrackerConfig) -> Result<()> {
    let config_path = data_dir.join("config.json");
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    Ok(())
}

/// Display version and build information
fn show_about() {
    use colored::Colorize;

    println!("{}", "📱 Usage Tracker".bright_cyan().bold());
    println!();
    println!("{}", "📋 Version Information:".bright_yellow().bold());
    println!("  Version: {}", env!("CARGO_PKG_VERSION").bright_green());
    println!("  Built: {}", env!("USAGE_TRACKER_BUILD_TIME"));
    println!("  Commit: {}", env!("USAGE_TRACKER_GIT_HASH"));
    println!();
    println!("{}", "🎯 Entitlements:".bright_yellow().bold());
    println!("  • {} free messages per day, reset at local midnight", DAILY_FREE_LIMIT);
    println!("  • Tokens pay for messages once the free quota is used up");
    println!("  • Premium removes all limits");
    println!();
    println!("{}", "🪙 Token Packs:".bright_yellow().bold());
    for pack in TokenPack::ALL {
        println!("  • {} tokens: {}", pack.tokens(), pack.price());
    }
    println!();
    println!("{}", "💡 Usage:".bright_green().bold());
    println!("  usage-tracker status");
    println!("  usage-tracker send --count 3");
    println!("  usage-tracker buy tokens --pack 50");
}
