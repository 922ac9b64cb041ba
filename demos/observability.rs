//! Observability features example
//!
//! This example demonstrates:
//! - Metrics collection
//! - Latency histograms with percentiles
//! - Subscribing to admission events
//! - Idle-key eviction reported through events and metrics

use a3s_bulkhead::{
    categories, events, metric_names, AdmissionConfig, AdmissionController, AdmissionMetrics,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== A3S Bulkhead: Observability Features Example ===\n");

    let metrics = AdmissionMetrics::local();
    let config = AdmissionConfig::new(2, 10)
        .with_retention(Duration::from_millis(200))
        .with_janitor_interval(Duration::from_millis(100));

    let controller = AdmissionController::builder()
        .with_config(config)
        .with_metrics(metrics.clone())
        .build()?;

    // Print timeouts and evictions as they happen
    let mut stream = controller.subscribe_filtered(|e| {
        e.key == events::OPERATION_EXECUTION_TIMEOUT || e.key == events::KEY_EVICTED
    });
    let printer = tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            println!("  📣 {} {:?}", event.key, event.field("key"));
        }
    });

    let _janitor = controller.start_janitor();
    println!("✓ Controller started with metrics and janitor\n");

    // Example 1: Collect metrics
    println!("=== Example 1: Metrics Collection ===");

    let latencies = [50, 100, 150, 200, 250, 300, 400, 600];
    let mut handles = Vec::new();

    for (i, latency) in latencies.iter().copied().enumerate() {
        let controller = controller.clone();
        let key = format!("api:{}", i % 2);
        handles.push(tokio::spawn(async move {
            controller
                .submit(&key, categories::FETCH, move || async move {
                    tokio::time::sleep(Duration::from_millis(latency)).await;
                    Ok::<_, std::io::Error>(latency)
                })
                .await
        }));
    }
    println!("Submitted {} operations", latencies.len());

    for (i, handle) in handles.into_iter().enumerate() {
        if let Err(e) = handle.await? {
            println!("✗ Operation {} failed: {}", i, e);
        }
    }

    println!("\n=== Metrics Summary ===");
    let snapshot = metrics.snapshot().await;

    if let Some(submitted) = snapshot.counters.get(metric_names::OPERATIONS_SUBMITTED) {
        println!("Operations submitted: {}", submitted);
    }
    if let Some(queued) = snapshot.counters.get(metric_names::OPERATIONS_QUEUED) {
        println!("Operations queued: {}", queued);
    }
    if let Some(completed) = snapshot.counters.get(metric_names::OPERATIONS_COMPLETED) {
        println!("Operations completed: {}", completed);
    }

    if let Some(stats) = snapshot.histograms.get(metric_names::OPERATION_LATENCY) {
        println!("\nLatency Statistics:");
        println!("  Count: {}", stats.count);
        println!("  Min: {:.2}ms", stats.min);
        println!("  Max: {:.2}ms", stats.max);
        println!("  Mean: {:.2}ms", stats.mean);
        println!("  p50: {:.2}ms", stats.p50);
        println!("  p90: {:.2}ms", stats.p90);
        println!("  p95: {:.2}ms", stats.p95);
        println!("  p99: {:.2}ms", stats.p99);
    }

    if let Some(stats) = snapshot.histograms.get(metric_names::OPERATION_WAIT_TIME) {
        println!("\nQueue wait mean: {:.2}ms", stats.mean);
    }

    // Example 2: Idle-key eviction
    println!("\n=== Example 2: Idle-Key Eviction ===");
    println!("Tracked keys before: {}", controller.tracked_keys());
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("Tracked keys after: {}", controller.tracked_keys());

    let snapshot = metrics.snapshot().await;
    if let Some(evicted) = snapshot.counters.get(metric_names::KEYS_EVICTED) {
        println!("Keys evicted: {}", evicted);
    }

    printer.abort();
    Ok(())
}
