//! # Cloud Inventory Sync
//!
//! Reconciles a Yandex Cloud inventory into a NetBox-style inventory.
//!
//! This crate provides:
//! - Source and destination snapshots read once per run
//! - Infrastructure sync (sites, cluster type, clusters, prefixes, platforms)
//! - Migration of clusters named under the legacy folder-only scheme
//! - VM planning with staged creation of interfaces, addresses and disks
//! - Batch and standard executors
//! - Orphan cleanup for records carrying the management tag
//! - Run reports with per-kind statistics and a preview breakdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │ SourceRepository│────►│  SourceSnapshot  │     │  Destination    │
//! │  (cloud API)    │     └────────┬─────────┘     │   Repository    │
//! └─────────────────┘              │               └───────┬─────────┘
//!                                  ▼                       │ load / write
//!                         ┌─────────────────┐              ▼
//!                         │   SyncEngine    │◄────►┌─────────────────┐
//!                         │                 │      │   SyncContext   │
//!                         └────────┬────────┘      │ (snapshot, refs,│
//!                                  │               │   decisions)    │
//!                                  ▼               └─────────────────┘
//!                         ┌─────────────────┐
//!                         │    RunReport    │
//!                         └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nbsync_provisioning::{RunOptions, SyncEngine};
//!
//! let engine = SyncEngine::new(Arc::new(source), Arc::new(netbox), RunOptions::default());
//! let report = engine.run().await?;
//!
//! if !report.is_success() {
//!     for failure in &report.failures {
//!         eprintln!("{} {}: {}", failure.operation, failure.subject, failure.message);
//!     }
//! }
//! ```

pub mod error;
pub mod reconciliation;

// Re-exports for convenience
pub use error::{SyncError, SyncResult};
pub use reconciliation::{
    // Orchestration
    engine::{RunOptions, SyncEngine},
    // Reporting
    report::{Decision, Migration, PreviewSummary, RunFailure, RunReport, RunWarning, SkippedEntity},
    statistics::{KindCounts, RunStatistics},
    // Types and enums
    types::{Action, ExecutionMode, FieldCategory},
};
