//! # Proofsync
//!
//! A task pipeline engine that synchronizes text records from external
//! relational sources into a local store, detects changes via content
//! hashes, submits pending records to an AI correction service, and
//! reconciles the responses back onto per-record state.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Sources   │──▶│ Fetch/Resync │──▶│  SQLite  │
//! │ MySQL/SQLite│   │   engines    │   │  store   │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │
//!                       ┌───────────────────┤
//!                       ▼                   ▼
//!                 ┌───────────┐       ┌───────────┐
//!                 │ AI runner │──────▶│ Reconcile │
//!                 │ (gateway) │       │  engine   │
//!                 └───────────┘       └───────────┘
//! ```
//!
//! Every write is transactional and every engine resumes from persisted
//! markers, so a crash at any point costs at most one batch of work.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | Source dialects, query builders, readers |
//! | [`fetch`] | Incremental marker-based fetch engine |
//! | [`resync`] | Hash-compare re-walk of fetched records |
//! | [`task`] | Task claiming, lifecycle, progress accounting |
//! | [`prompt`] | Correction prompt construction |
//! | [`gateway`] | AI provider dispatch and execution |
//! | [`reconcile`] | Response parsing and reconciliation |
//! | [`sync_cmd`] | Sync runner entry point |
//! | [`ai_cmd`] | AI runner entry point |
//! | [`status`] | Task overview command |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ai_cmd;
pub mod config;
pub mod db;
pub mod fetch;
pub mod gateway;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod reconcile;
pub mod resync;
pub mod source;
pub mod status;
pub mod sync_cmd;
pub mod task;
pub mod util;
