use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use leadflow_common::events::{EventSink, LogSink, WebhookSink};
use leadflow_common::store::{LeadStore, MemoryLeadStore, PgLeadStore};

use crate::config::Config;
use crate::router;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let store: Arc<dyn LeadStore> = if config.memory_store {
        tracing::warn!("serving from the in-memory store, nothing will survive a restart");
        Arc::new(MemoryLeadStore::new())
    } else {
        let store = match PgLeadStore::new(
            &config.database_url,
            config.max_pg_connections,
            config.claim_settings(),
        ) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!("failed to create lead store: {}", e);
                return;
            }
        };
        if let Err(e) = store.run_migrations().await {
            tracing::error!("failed to run migrations: {}", e);
            return;
        }
        Arc::new(store)
    };

    let sink: Arc<dyn EventSink> = if config.assignment_webhook_url.is_empty() {
        Arc::new(LogSink)
    } else {
        match WebhookSink::new(&config.assignment_webhook_url, WEBHOOK_TIMEOUT) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                tracing::error!("failed to create assignment webhook sink: {}", e);
                return;
            }
        }
    };

    let app = router::router(store, sink, config.claim_window(), config.export_prometheus);

    tracing::info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap()
}
