mod cli;

use clap::Parser;
use happenings::storage::Config;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = cli::Cli::parse();
    let guard = setup_logging();

    if let Err(err) = cli::run(cli) {
        tracing::error!("{:#}", err);
        eprintln!("Error: {:#}", err);
        drop(guard);
        std::process::exit(1);
    }
}

fn setup_logging() -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = Config::config_dir();

    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "happenings.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .init();

    tracing::info!("happenings started");
    guard
}
