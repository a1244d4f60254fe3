//! Fabriq daemon - natural-language query service for the storefront.

use anyhow::Result;
use clap::Parser;
use fabriqd::config::{FabriqConfig, CONFIG_PATH};
use fabriqd::executor::Executor;
use fabriqd::orchestrator::Pipeline;
use fabriqd::planner::Planner;
use fabriqd::role::RoleClassifier;
use fabriqd::schema::STOREFRONT;
use fabriqd::server::{self, AppState};
use fabriqd::store::MemoryStore;
use fabriqd::synthesizer::Synthesizer;
use fabriq_common::llm::LlmRouter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fabriqd", version, about = "Natural-language query daemon")]
struct Args {
    /// Config file path
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Override the listen address from the config
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("fabriqd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = FabriqConfig::load(&args.config);
    let listen_addr = args.listen.unwrap_or_else(|| config.listen_addr.clone());

    // LLM router is shared by the planner and the optional enrichment
    // passes. A missing API key is a startup error, not a retry loop.
    let router = if config.llm.enabled {
        Some(Arc::new(LlmRouter::from_config(&config.llm)?))
    } else {
        warn!("LLM disabled in config - planner runs fallback-only");
        None
    };

    let store = match MemoryStore::from_seed_file(Path::new(&config.store.seed_path)) {
        Ok(store) => store,
        Err(e) => {
            warn!(
                "could not load store seed from {}: {} - starting empty",
                config.store.seed_path, e
            );
            MemoryStore::new()
        }
    };
    let collections = store.collection_count();

    let synthesizer_router = config
        .synthesizer
        .llm_phrasing
        .then(|| router.clone())
        .flatten();
    let role_router = config.role.llm_classify.then(|| router.clone()).flatten();

    let pipeline = Pipeline::new(
        Planner::new(router, &STOREFRONT),
        Executor::new(Arc::new(store)),
        Synthesizer::new(
            synthesizer_router,
            Duration::from_secs(config.synthesizer.timeout_secs),
        ),
        RoleClassifier::new(role_router, Duration::from_secs(config.role.timeout_secs)),
        &STOREFRONT,
    );

    server::run(AppState::new(pipeline, collections), &listen_addr).await
}
