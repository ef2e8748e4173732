use envconfig::Envconfig;
use eyre::Result;

use leadflow_api::config::Config;
use leadflow_api::server::serve;

async fn shutdown() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to register SIGINT handler");

    tracing::info!("shutting down gracefully");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env()?;

    let listener = tokio::net::TcpListener::bind(config.address).await?;
    serve(config, listener, shutdown()).await;

    Ok(())
}
