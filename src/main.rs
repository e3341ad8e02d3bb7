use blinkdb::config::Config;
use blinkdb::error::BlinkResult;
use blinkdb::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> BlinkResult<()> {
    // Flags override BLINKDB_* environment variables.
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_env().with_args(&args);

    // RUST_LOG wins over --loglevel.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.loglevel)),
        )
        .init();

    if !config.auth_required() {
        info!("no password configured, authentication is disabled");
    }

    let server = Server::new(config);
    let serve = server.start();
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => return result,
        _ = tokio::signal::ctrl_c() => {}
    }

    info!("Shutting down server gracefully...");
    server.shutdown();
    serve.await?;
    info!("Server stopped");
    Ok(())
}
