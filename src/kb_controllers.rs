// Controllers for the Kanachu bus board: configuration and the main loop
use crate::kb_client::HttpFeed;
use crate::kb_clock::SystemClock;
use crate::kb_countdown::Locale;
use crate::kb_models::{DirectionGroup, KBError, Result};
use crate::kb_registry::LiveCountdownRegistry;
use crate::kb_scheduler::{poll_period, RefreshScheduler, DEFAULT_POLL_SECS, MAX_POLL_SECS};
use crate::kb_views::TerminalBoard;
use clap::Parser;
use log::{info, warn};
use std::io;

/// Live bus departure countdowns for the Sanno University / Isehara area.
#[derive(Parser, Debug, Clone)]
#[command(name = "kanachu-board", version, about)]
pub struct Args {
    /// Origin of the dashboard backend serving /api/data
    #[arg(long, env = "KB_BASE_URL", default_value = "http://127.0.0.1:8080")]
    pub base_url: String,

    /// Which direction group to display
    #[arg(long, env = "KB_DIRECTION", value_enum, default_value_t = DirectionGroup::ToStationArea)]
    pub direction: DirectionGroup,

    /// Seconds between polls; zero or negative polls only once
    #[arg(long, env = "KB_POLL_INTERVAL", default_value_t = DEFAULT_POLL_SECS, allow_negative_numbers = true)]
    pub poll_interval: i64,

    /// Display language for countdowns and labels (en, ja)
    #[arg(long, env = "KB_LOCALE", default_value = "en")]
    pub locale: Locale,

    /// HTTP timeout in seconds
    #[arg(long, env = "KB_TIMEOUT", default_value_t = HttpFeed::DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Append frames instead of clearing the screen between them
    #[arg(long)]
    pub no_clear: bool,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.timeout == 0 {
            return Err(KBError::ConfigError("--timeout must be at least 1 second".to_string()));
        }
        if self.poll_interval > MAX_POLL_SECS {
            return Err(KBError::ConfigError(format!(
                "--poll-interval must be at most {} seconds (got {})",
                MAX_POLL_SECS, self.poll_interval
            )));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(KBError::ConfigError(format!(
                "--base-url must start with http:// or https:// (got '{}')",
                self.base_url
            )));
        }
        Ok(())
    }
}

pub struct KBControllers;

impl KBControllers {
    /// Main application entry
    pub fn run(args: Args) -> anyhow::Result<()> {
        args.validate()?;
        Self::show_welcome_screen(&args);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(Self::run_board(args))
    }

    async fn run_board(args: Args) -> anyhow::Result<()> {
        let feed = HttpFeed::new(&args.base_url, args.timeout)?;
        info!("Polling {} ({})", feed.endpoint(), args.direction);

        let board = TerminalBoard::new(io::stdout(), args.direction, args.locale, !args.no_clear);
        let mut scheduler = RefreshScheduler::new(
            feed,
            board,
            SystemClock,
            args.direction,
            poll_period(args.poll_interval),
            LiveCountdownRegistry::new(args.locale),
        );

        scheduler.run_until(Self::wait_for_ctrl_c()).await;

        let stats = scheduler.stats();
        println!("\n{}", "═".repeat(70));
        println!("👋 Board stopped");
        println!(
            "📊 {} polls ok | {} polls failed | {} countdown ticks",
            stats.polls_ok, stats.polls_failed, stats.ticks
        );
        println!("{}", "═".repeat(70));
        Ok(())
    }

    async fn wait_for_ctrl_c() {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C ({}); stop the process to exit", e);
            std::future::pending::<()>().await;
        }
    }

    /// Show welcome screen
    fn show_welcome_screen(args: &Args) {
        println!("\n{}", "═".repeat(70));
        println!("  ╔═══════════════════════════════════════════════════════════╗");
        println!("  ║            🚌 KANACHU BUS BOARD - ISEHARA AREA            ║");
        println!("  ║                 Live Departure Countdowns                 ║");
        println!("  ╚═══════════════════════════════════════════════════════════╝");
        println!("{}", "═".repeat(70));
        println!("\n  📡 Source: {}/api/data", args.base_url.trim_end_matches('/'));
        println!("  🧭 Direction: {}", args.direction);
        match poll_period(args.poll_interval) {
            Some(period) => println!("  🔄 Refresh: every {}s", period.as_secs()),
            None => println!("  🔄 Refresh: single snapshot"),
        }
        println!("  🌐 Language: {}", args.locale);
        println!("\n  Press Ctrl+C to quit");
        println!("{}", "═".repeat(70));
    }
}
