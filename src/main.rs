use clap::Parser;
use kanachu_board::kb_controllers::{Args, KBControllers};

fn main() {
    // Set up panic hook for better error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ APPLICATION PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\nThe board encountered an unexpected error:");
        eprintln!("{}", panic_info);
        eprintln!("\n💡 Troubleshooting:");
        eprintln!("  • Please restart the board");
        eprintln!("  • Check that the dashboard backend is reachable");
        eprintln!("  • Run with RUST_LOG=debug for details");
        eprintln!("\n{}", "═".repeat(70));
    }));

    // Optional .env next to the binary
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match std::panic::catch_unwind(|| KBControllers::run(args)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("\n❌ {:#}", e);
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("\n⚠️  Board terminated unexpectedly");
            std::process::exit(1);
        }
    }
}
