//! Concurrency behaviour of the grouping pipeline.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedProvider, TENANT, memory_store, partition, test_config, unit};
use prodgroup::{
    BatchConfig, CircuitBreakerManager, GroupingRequest, GroupingSettings, ImageDescriptor,
    ProductGrouper, SignalKind, SignalWeights,
};

fn images(count: usize) -> Vec<ImageDescriptor> {
    (0..count)
        .map(|i| ImageDescriptor::from_reference(format!("img-{i:02}"), format!("s3://c/{i}")))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn embedding_respects_max_concurrency() {
    let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_millis(50)));
    let mut config = test_config(GroupingSettings::default());
    config.batch = BatchConfig::default().with_max_concurrency(2);
    let grouper = ProductGrouper::from_config(
        &config,
        memory_store(),
        provider.clone(),
        &CircuitBreakerManager::default(),
    )
    .unwrap();

    let result = grouper
        .group(GroupingRequest::new(TENANT, images(8)))
        .await
        .unwrap();

    assert_eq!(result.image_count(), 8);
    assert_eq!(provider.calls(), 8);
    assert!(provider.peak() <= 2, "peak concurrency {}", provider.peak());
    assert_eq!(provider.peak(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_share_one_grouper() {
    let mut provider = ScriptedProvider::new();
    for i in 0..6 {
        // Three pairs of near-identical vectors.
        let angle = (i / 2) as f32 * 0.9 + (i % 2) as f32 * 0.01;
        provider = provider.with_vector(&format!("img-{i:02}"), unit(angle));
    }
    let mut settings = GroupingSettings::default();
    settings.signal_weights = SignalWeights::only(SignalKind::Feature);
    let config = test_config(settings);
    let grouper = Arc::new(
        ProductGrouper::from_config(
            &config,
            memory_store(),
            Arc::new(provider),
            &CircuitBreakerManager::default(),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let grouper = Arc::clone(&grouper);
            tokio::spawn(async move {
                grouper
                    .group(GroupingRequest::new(format!("tenant-{i}"), images(6)))
                    .await
                    .expect("grouping should succeed")
            })
        })
        .collect();

    let mut partitions = Vec::new();
    for handle in handles {
        partitions.push(partition(&handle.await.unwrap()));
    }

    let first = &partitions[0];
    assert_eq!(first.len(), 3);
    for (i, p) in partitions.iter().enumerate().skip(1) {
        assert_eq!(first, p, "call {i} produced a different partition");
    }
}

#[tokio::test]
async fn group_ids_are_unique_across_calls() {
    let grouper = ProductGrouper::from_config(
        &test_config(GroupingSettings::default()),
        memory_store(),
        Arc::new(ScriptedProvider::new()),
        &CircuitBreakerManager::default(),
    )
    .unwrap();

    let mut seen = std::collections::HashSet::new();
    for i in 0..5 {
        let result = grouper
            .group(
                GroupingRequest::new(format!("tenant-{i}"), images(4))
                    .with_existing_embeddings(false),
            )
            .await
            .unwrap();
        for group in result.groups {
            assert!(group.id.starts_with("pg_"));
            assert!(seen.insert(group.id), "group id reused");
        }
    }
}
