//! Basic usage example
//!
//! This example demonstrates the basic usage of a3s-bulkhead:
//! - Creating an admission controller
//! - Submitting operations for several keys
//! - Reading per-key and system statistics

use a3s_bulkhead::{categories, AdmissionConfig, AdmissionController, Priority};
use std::time::Duration;

/// Simulated upstream fetch
async fn fetch_profile(user: String) -> Result<serde_json::Value, std::io::Error> {
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(serde_json::json!({
        "user": user,
        "fetched_at": chrono::Utc::now().to_rfc3339()
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("=== A3S Bulkhead: Basic Usage Example ===\n");

    let controller = AdmissionController::new(AdmissionConfig::new(3, 10))?;
    let _janitor = controller.start_janitor();
    println!("✓ Controller created (3 concurrent / 10 queued per key)\n");

    println!("Submitting operations...");

    let users = vec!["alice", "bob", "charlie"];
    let mut handles = Vec::new();

    for user in users {
        let controller = controller.clone();
        let key = format!("user:{}", user);
        let name = user.to_string();

        handles.push((
            user,
            tokio::spawn(async move {
                controller
                    .submit_with_priority(&key, categories::FETCH, Priority::High, move || {
                        fetch_profile(name)
                    })
                    .await
            }),
        ));
        println!("  → Submitted fetch for {}", user);
    }

    println!("\nWaiting for results...\n");

    for (user, handle) in handles {
        match handle.await? {
            Ok(profile) => println!("✓ Result for {}: {}", user, profile),
            Err(e) => eprintln!("✗ Error for {}: {}", user, e),
        }
    }

    println!("\n=== Key Statistics ===");
    if let Some(stats) = controller.stats_for("user:alice").await {
        println!(
            "user:alice completed={} errored={} avg={:.1}ms",
            stats.completed, stats.errored, stats.average_latency_ms
        );
    }

    println!("\n=== System Statistics ===");
    let stats = controller.system_stats().await;
    println!("Tracked keys: {}", stats.tracked_keys);
    println!("Total active: {}", stats.total_active);
    println!("Total queued: {}", stats.total_queued);

    Ok(())
}
