//! # Reconciliation Core
//!
//! Computes and applies the changes that make the destination inventory
//! mirror the cloud.
//!
//! ## Overview
//!
//! - Text normalization so formatting differences never produce diffs
//! - Identity resolution with in-place migration of legacy-named clusters
//! - Stable primary address selection
//! - Field-level change sets with staged creation behind placeholders
//! - Orphan detection for managed records
//! - Batch and standard execution with identical end state
//! - Simulate-only runs that collect decisions instead of writing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            SyncEngine                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌───────────────┐    ┌───────────────┐    ┌───────────────┐        │
//! │  │   Identity    │───►│  Change-Set   │───►│   Executor    │        │
//! │  │   Resolver    │    │   Builder     │    │ (batch/std)   │        │
//! │  └───────────────┘    └───────┬───────┘    └───────┬───────┘        │
//! │                               │                    │                │
//! │                               ▼                    ▼                │
//! │                       ┌───────────────┐    ┌───────────────┐        │
//! │                       │   Candidate   │    │    Orphan     │        │
//! │                       │   Selector    │    │   Detector    │        │
//! │                       └───────────────┘    └───────────────┘        │
//! │                                                                     │
//! │            SyncContext: snapshot, placeholders, decisions           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use nbsync_provisioning::reconciliation::{RunOptions, SyncEngine};
//!
//! let engine = SyncEngine::new(source, destination, RunOptions {
//!     simulate: true,
//!     ..RunOptions::default()
//! });
//!
//! let report = engine.run().await?;
//! println!("{} creates, {} migrations", report.preview.create, report.preview.migrate);
//! ```

pub mod address;
pub mod changeset;
pub mod context;
pub mod desired;
pub mod engine;
pub mod executor;
pub mod identity;
pub mod infrastructure;
pub mod keys;
pub mod normalize;
pub mod orphan;
pub mod plan;
pub mod report;
pub mod selector;
pub mod snapshot;
pub mod statistics;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use changeset::{diff, ChangeSet, StagedFields};
pub use context::{Binding, PendingRegistry, SyncContext};
pub use engine::{RunOptions, SyncEngine};
pub use identity::{IdentityResolver, LegacyScheme, Resolution, ResolutionOutcome};
pub use normalize::normalize;
pub use orphan::find_orphans;
pub use plan::{ChangePlan, VmPlan};
pub use report::{Decision, PreviewSummary, RunReport};
pub use selector::{select_primary, PrimaryDecision};
pub use snapshot::{DestinationSnapshot, SourceSnapshot};
pub use statistics::{RunStatistics, StatisticsTracker};
pub use types::{Action, ExecutionMode, FieldCategory};
