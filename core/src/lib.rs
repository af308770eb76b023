pub mod audit;
pub mod auth;
pub mod code_model;
pub mod config;
pub mod embedding;
pub mod embedding_provider;
pub mod entitlements;
pub mod error;
pub mod governance;
pub mod ingest;
pub mod llm;
pub mod model;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
