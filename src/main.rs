use clap::Parser;
use lifecast::api::{Cli, Command, run_http_server, run_scenario_file};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // stdout carries the JSON result
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run_scenario_file(args).await,
        Command::Serve(args) => run_http_server(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
