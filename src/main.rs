use docsign::{
    api::{AppState, Server},
    auth::TokenManager,
    authority::HttpAuthority,
    config::Config,
    prepare::SignaturePreparer,
    queue::{JobOptions, JobProducer, MemoryQueue, SignatureSubmitter, WorkerPool},
    store::DocumentStore,
    sync::StatusSynchronizer,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// How often finished jobs are dropped from the in-memory queue
const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// The main entry point for the signing service.
///
/// Initializes logging, loads the configuration, opens the document store,
/// starts the signature workers in the background and serves the JSON-RPC API
/// until interrupted.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default `info` level.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load("config/default.toml")?;
    info!("Signing service starting with config: {:?}", config);

    let store = DocumentStore::connect(&config.database.url).await?;
    let authority = Arc::new(HttpAuthority::new(&config.authority)?);
    let tokens = TokenManager::new(authority.clone(), config.token.ttl_minutes);

    // Signature delivery runs independently of any request.
    let queue = Arc::new(MemoryQueue::new());
    let workers = WorkerPool::new(
        queue.clone(),
        Arc::new(SignatureSubmitter::new(authority.clone(), store.clone())),
        config.queue.concurrency,
    )
    .start();

    let pruned_queue = queue.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let pruned = pruned_queue.prune_succeeded();
            if pruned > 0 {
                debug!("Pruned {} completed jobs", pruned);
            }
        }
    });

    let state = AppState {
        synchronizer: Arc::new(StatusSynchronizer::new(
            authority.clone(),
            store.clone(),
            config.sync.clone(),
        )),
        preparer: Arc::new(SignaturePreparer::new(authority.clone(), store.clone())),
        producer: JobProducer::new(queue.clone(), JobOptions::from(&config.queue)),
        queue,
        store,
        tokens,
    };

    let server = Server::new(config, state);
    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }

    // Let in-flight deliveries finish; queued jobs are lost with the process.
    workers.shutdown().await;
    Ok(())
}
