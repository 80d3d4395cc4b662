//! # lockstep
//!
//! Keeps a numbered implementation plan and its per-task debug history in
//! lockstep, across edits and across restarts.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (axum) ──▶ SessionRegistry ──▶ Session ──▶ PlanTable
//!                                          │
//!                                          ├──▶ DocumentStore (plan_state.json, context docs)
//!                                          ├──▶ WipeoutCoordinator (generated artifacts)
//!                                          └──▶ Generator (plan / code / iterations)
//! ```
//!
//! ## Modules
//! - `plan`: the plan table, its renumbering rules and iteration tracking
//! - `session`: sessions, artifact layout, wipeouts and the session registry
//! - `store`: document stores (filesystem and in-memory)
//! - `generator`: the code generation collaborator
//! - `api`: HTTP endpoints

pub mod api;
pub mod config;
pub mod generator;
pub mod plan;
pub mod session;
pub mod store;
pub mod util;

pub use config::Config;
pub use plan::{PlanError, PlanTable, Task, TaskId};
pub use session::{Session, SessionId, SessionRegistry};
