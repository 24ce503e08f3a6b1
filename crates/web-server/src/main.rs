use tracing_subscriber::EnvFilter;

// Entry point for `cargo run -p web-server`. The root binary's `serve` command does the
// same with file logging and CLI flags.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = configuration::load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = config.server.socket_addr()?;
    web_server::run_server(config, addr).await
}
