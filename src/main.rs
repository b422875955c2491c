use std::sync::Arc;
use std::sync::atomic::Ordering;

use taskweave::config::EngineConfig;
use taskweave::dashboard::dashboard_routes;
use taskweave::engine::{Executor, spawn_dispatcher};
use taskweave::entities::EntityResolver;
use taskweave::graph::TaskGraph;
use taskweave::intake::{DedupQueue, ImapMailbox, MailboxConfig, spawn_mail_poller};
use taskweave::llm::{Capability, Embedder, OllamaCapability, OllamaClient, OllamaConfig};
use taskweave::store::{HttpRowStore, MemoryRowStore, RowStore, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let engine_config = EngineConfig::from_env();
    let ollama_config = OllamaConfig::from_env();

    eprintln!("🕸  taskweave v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({})", ollama_config.model, ollama_config.base_url);
    eprintln!("   Workers: {}", engine_config.max_workers);
    eprintln!(
        "   Dashboard: http://0.0.0.0:{}/api/tasks",
        engine_config.dashboard_port
    );

    // ── LLM capability ──────────────────────────────────────────────
    let ollama = OllamaClient::new(ollama_config);
    let embedder: Arc<dyn Embedder> = Arc::new(ollama.clone());
    let capability: Arc<dyn Capability> = Arc::new(OllamaCapability::new(ollama));

    // ── Store ───────────────────────────────────────────────────────
    let store: Arc<dyn RowStore> = match StoreConfig::from_env() {
        Some(store_config) => {
            eprintln!("   Store: {}", store_config.base_url);
            Arc::new(HttpRowStore::new(store_config))
        }
        None => {
            eprintln!("   Store: in-process (set TASKWEAVE_STORE_URL for a persistent store)");
            Arc::new(MemoryRowStore::new())
        }
    };

    let graph = Arc::new(TaskGraph::new(Arc::clone(&store), embedder));
    let resolver = Arc::new(EntityResolver::new(Arc::clone(&store), Arc::clone(&capability)));

    // ── Dashboard server ────────────────────────────────────────────
    let app = dashboard_routes(Arc::clone(&graph));
    let dashboard_port = engine_config.dashboard_port;
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{dashboard_port}"))
            .await
            .expect("Failed to bind dashboard port");
        tracing::info!(port = dashboard_port, "Dashboard server started");
        axum::serve(listener, app).await.ok();
    });

    // ── Intake ──────────────────────────────────────────────────────
    let queue = Arc::new(DedupQueue::new());

    let poller = match MailboxConfig::from_env() {
        Some(mailbox_config) => {
            eprintln!(
                "   Mail: {} (poll every {}s)\n",
                mailbox_config.imap_host, mailbox_config.poll_interval_secs
            );
            let poll_interval =
                std::time::Duration::from_secs(mailbox_config.poll_interval_secs);
            let mailbox = Arc::new(ImapMailbox::new(mailbox_config));
            Some(spawn_mail_poller(mailbox, Arc::clone(&queue), poll_interval))
        }
        None => {
            eprintln!("   Mail: disabled (set TASKWEAVE_IMAP_HOST to enable)\n");
            None
        }
    };

    // ── Engine ──────────────────────────────────────────────────────
    let executor = Arc::new(Executor::new(
        graph,
        capability,
        resolver,
        engine_config.clone(),
    ));
    let (dispatcher, dispatcher_shutdown) =
        spawn_dispatcher(queue, executor, engine_config.max_workers);

    tokio::signal::ctrl_c().await?;
    eprintln!("\nShutting down…");
    dispatcher_shutdown.store(true, Ordering::Relaxed);
    if let Some((_, poller_shutdown)) = &poller {
        poller_shutdown.store(true, Ordering::Relaxed);
    }
    dispatcher.await?;

    Ok(())
}
