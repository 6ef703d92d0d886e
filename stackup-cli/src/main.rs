use clap::Parser;
use stackup_cli::Cli;

const DEFAULT_LOG_FILTER: &str = "warn,stackup_core=info,stackup_cli=info";

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    if let Err(e) = stackup_cli::commands::handle(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
