//! Backpressure example
//!
//! This example demonstrates:
//! - Queueing once a key's slots are taken
//! - Priority order among queued operations
//! - Immediate rejection once the queue is full
//! - Queue timeouts and cancel_all
//! - Other keys staying unaffected

use a3s_bulkhead::{categories, AdmissionConfig, AdmissionController, Priority, SubmitError};
use std::time::Duration;

type Outcome = Result<String, SubmitError<std::io::Error>>;

fn spawn_work(
    controller: &AdmissionController,
    key: &'static str,
    priority: Priority,
    label: &'static str,
    work: Duration,
) -> tokio::task::JoinHandle<Outcome> {
    let controller = controller.clone();
    tokio::spawn(async move {
        controller
            .submit_with_priority(key, categories::REFRESH, priority, move || async move {
                tokio::time::sleep(work).await;
                println!("    ran {}", label);
                Ok::<_, std::io::Error>(label.to_string())
            })
            .await
    })
}

fn describe(label: &str, outcome: Outcome) {
    match outcome {
        Ok(value) => println!("  ✓ {}: {}", label, value),
        Err(SubmitError::Admission(e)) => println!("  ✗ {}: {} ({})", label, e, e.code()),
        Err(SubmitError::Operation(e)) => println!("  ✗ {}: operation failed: {}", label, e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== A3S Bulkhead: Backpressure Example ===\n");

    let config = AdmissionConfig::new(1, 3).with_queue_timeout(Duration::from_millis(400));
    let controller = AdmissionController::new(config)?;

    // Example 1: priority order and rejection
    println!("=== Example 1: Queueing and Rejection ===");
    let running = spawn_work(
        &controller,
        "db:orders",
        Priority::Medium,
        "running",
        Duration::from_millis(100),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut queued = Vec::new();
    for (priority, label) in [
        (Priority::Low, "low"),
        (Priority::High, "high"),
        (Priority::Medium, "medium"),
    ] {
        let handle = spawn_work(
            &controller,
            "db:orders",
            priority,
            label,
            Duration::from_millis(20),
        );
        queued.push((label, handle));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    println!("  overloaded: {}", controller.is_overloaded("db:orders").await);
    let rejected = controller
        .submit("db:orders", categories::FETCH, || async {
            Ok::<_, std::io::Error>("never".to_string())
        })
        .await;
    describe("overflow", rejected);

    // A different key is not affected by db:orders being saturated
    let other = controller
        .submit("db:users", categories::FETCH, || async {
            Ok::<_, std::io::Error>("users ok".to_string())
        })
        .await;
    describe("db:users", other);

    describe("running", running.await?);
    for (label, handle) in queued {
        describe(label, handle.await?);
    }

    // Example 2: queue timeout
    println!("\n=== Example 2: Queue Timeout ===");
    let slow = spawn_work(
        &controller,
        "db:reports",
        Priority::Medium,
        "slow",
        Duration::from_millis(800),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    let waiting = spawn_work(&controller, "db:reports", Priority::High, "waiting", Duration::ZERO);
    describe("waiting", waiting.await?);
    describe("slow", slow.await?);

    // Example 3: cancel_all
    println!("\n=== Example 3: Cancel All ===");
    let busy = spawn_work(
        &controller,
        "db:audit",
        Priority::Medium,
        "busy",
        Duration::from_millis(200),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    let pending: Vec<_> = (0..2)
        .map(|_| spawn_work(&controller, "db:audit", Priority::Low, "pending", Duration::ZERO))
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let cancelled = controller.cancel_all("db:audit").await;
    println!("  cancelled {} queued operations", cancelled);
    for handle in pending {
        describe("pending", handle.await?);
    }
    describe("busy", busy.await?);

    println!("\n=== System Statistics ===");
    let stats = controller.system_stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
