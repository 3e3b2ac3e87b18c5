use std::error::Error;
use std::sync::Arc;

use prodgroup::{
    CircuitBreakerManager, GroupingRequest, ImageDescriptor, InMemoryEmbeddingStore,
    PipelineConfig, ProductGrouper, StubEmbeddingProvider,
};
use tracing_subscriber::EnvFilter;

/// Groups a small built-in catalog with the stub provider.
///
/// Usage: `prodgroup [config.yaml]`. Log level follows `RUST_LOG`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    let breakers = CircuitBreakerManager::new(config.circuit_breaker);
    let grouper = ProductGrouper::from_config(
        &config,
        Arc::new(InMemoryEmbeddingStore::new()),
        Arc::new(StubEmbeddingProvider::new(config.repository.dimension)),
        &breakers,
    )?;

    // The stub embeds content deterministically, so shared content means a
    // shared vector.
    let images = vec![
        ImageDescriptor::from_bytes("mug-front", &b"red ceramic mug"[..])
            .with_metadata("labels", "mug,red,ceramic"),
        ImageDescriptor::from_bytes("mug-front-copy", &b"red ceramic mug"[..])
            .with_metadata("labels", "mug,red,ceramic"),
        ImageDescriptor::from_bytes("lamp", &b"brass desk lamp"[..])
            .with_metadata("labels", "lamp,brass"),
        ImageDescriptor::from_bytes("broken", &b""[..]),
    ];
    let result = grouper.group(GroupingRequest::new("demo", images)).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    for (dependency, stats) in breakers.snapshot() {
        println!("{dependency}: {:?}", stats.state);
    }

    Ok(())
}
