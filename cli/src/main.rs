use clap::Parser;
use continuity_cli::Cli;

#[tokio::main]
async fn main() {
    // Logs go to stderr so command output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = Cli::parse().run().await;
    std::process::exit(code);
}
