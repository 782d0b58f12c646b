use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trellis_agents::AgentRegistry;
use trellis_core::config::AppConfig;
use trellis_core::traits::{DocumentExtractor, ModelGateway, TextExtractor};
use trellis_engine::ExecutionEngine;
use trellis_gateway::{AppState, GatewayServer};
use trellis_llm::{create_gateway, ImageClient};
use trellis_retrieval::{
    load_corpus, CorpusCatalog, EmbeddingStore, FileStore, Retriever, SqliteStore,
};

#[derive(Parser)]
#[command(name = "trellis", version, about = "Graph-based multi-agent workflow engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (default)
    Serve,
    /// Re-index every configured corpus and exit
    Sync,
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("configuration")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Config => {
            let mut printable = serde_json::to_value(&config)?;
            for key in ["openai_api_key", "anthropic_api_key", "google_api_key"] {
                if printable.get(key).map(|v| !v.is_null()).unwrap_or(false) {
                    printable[key] = serde_json::json!("<set>");
                }
            }
            println!("{}", serde_json::to_string_pretty(&printable)?);
            Ok(())
        }
        Commands::Sync => {
            let services = Services::build(&config)?;
            services.sync_corpora(&config).await;
            Ok(())
        }
        Commands::Serve => {
            let services = Services::build(&config)?;
            services.sync_corpora(&config).await;

            let registry = AgentRegistry::with_builtins(
                services.gateway.clone(),
                services.retriever.clone(),
                services.images.clone(),
            );
            let engine = Arc::new(ExecutionEngine::new(
                Arc::new(registry),
                services.gateway.clone(),
                services.extractor.clone(),
                &config.engine,
            ));

            let server = GatewayServer::new(AppState {
                config: config.clone(),
                engine,
                retriever: services.retriever.clone(),
                store: services.store.clone(),
                catalog: services.catalog.clone(),
                extractor: services.extractor.clone(),
            });

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received");
                    signal_token.cancel();
                }
            });

            server.run(shutdown).await?;
            Ok(())
        }
    }
}

/// The shared service graph wired from configuration.
struct Services {
    gateway: Arc<dyn ModelGateway>,
    store: Arc<dyn EmbeddingStore>,
    catalog: Arc<CorpusCatalog>,
    retriever: Arc<Retriever>,
    images: Arc<ImageClient>,
    extractor: Arc<dyn DocumentExtractor>,
}

impl Services {
    fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let gateway = create_gateway(config);

        let store: Arc<dyn EmbeddingStore> = match &config.database_url {
            Some(url) => {
                info!(url, "Using SQLite-backed embedding store");
                let path = url.strip_prefix("sqlite://").unwrap_or(url);
                Arc::new(SqliteStore::open(
                    gateway.clone(),
                    std::path::Path::new(path),
                    config.retrieval.embed_batch_size,
                )?)
            }
            None => {
                info!("Using file-based embedding store");
                Arc::new(FileStore::new(
                    gateway.clone(),
                    config.retrieval.cache_dir.clone(),
                    config.retrieval.embed_batch_size,
                ))
            }
        };

        let default_corpus = config
            .retrieval
            .corpora
            .first()
            .cloned()
            .unwrap_or_else(|| "legal".into());
        let catalog = Arc::new(CorpusCatalog::new(default_corpus));
        let retriever = Arc::new(Retriever::new(
            store.clone(),
            catalog.clone(),
            gateway.clone(),
            config.retrieval.snippet_chars,
        ));
        let images = Arc::new(ImageClient::from_config(config));

        Ok(Self {
            gateway,
            store,
            catalog,
            retriever,
            images,
            extractor: Arc::new(TextExtractor),
        })
    }

    /// Walk each configured corpus and reconcile its embeddings. Failures
    /// are logged; the server still starts with whatever is indexed.
    async fn sync_corpora(&self, config: &AppConfig) {
        for corpus in &config.retrieval.corpora {
            let dir = config.documents_dir(corpus);
            let documents = match load_corpus(&dir, corpus, self.extractor.as_ref()) {
                Ok(docs) => docs,
                Err(e) => {
                    error!(corpus, error = %e, "Corpus load failed");
                    continue;
                }
            };
            match self.store.sync(corpus, &documents).await {
                Ok(report) => {
                    info!(
                        corpus,
                        documents = documents.len(),
                        embedded = report.embedded,
                        reused = report.reused,
                        "Corpus synced"
                    );
                }
                Err(e) => {
                    warn!(corpus, error = %e, "Embedding sync failed, continuing");
                }
            }
            self.catalog.replace(corpus, documents);
        }
    }
}
