//! Interface tests for storage backends using Cucumber.
//!
//! These tests verify that every storage backend gives the event store the
//! same contract. Select a backend via environment variable:
//!
//! ```bash
//! # In-memory (default)
//! cargo test --test interfaces
//!
//! # SQLite (temporary database file)
//! STORAGE_BACKEND=sqlite cargo test --test interfaces --features sqlite
//!
//! # MongoDB (uses testcontainers)
//! STORAGE_BACKEND=mongodb cargo test --test interfaces --features mongodb
//! ```

mod backend;
mod steps;

use cucumber::World;
use steps::event_store::EventStoreWorld;

#[tokio::main]
async fn main() {
    eventvault::utils::bootstrap::try_init_test_tracing();

    println!("\n=== Running EventStore Interface Tests ===\n");
    EventStoreWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/event_store.feature")
        .await;
}
