//! HTTP API for lockstep.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/sessions` - List persisted sessions
//! - `POST /api/sessions` - Create a session
//! - `GET /api/sessions/{id}` - Session context, plan and task metadata
//! - `POST /api/sessions/{id}/load` - Reload a session from disk
//! - `GET|PUT /api/sessions/{id}/{prompt,design_hypothesis,faked_data}` - Context documents
//! - `GET|POST /api/sessions/{id}/theories`, `GET|PUT /api/sessions/{id}/selected_theories`
//! - `GET|PUT /api/sessions/{id}/plan` - Read or replace the plan
//! - `POST /api/sessions/{id}/plan/generate` - Generate a plan from the design hypothesis
//! - `POST /api/sessions/{id}/plan/steps` - Insert a step
//! - `PUT|DELETE /api/sessions/{id}/plan/steps/{task_id}` - Update or remove a step
//! - `GET|PUT /api/sessions/{id}/tasks/{task_id}/code` - Main code of a task
//! - `POST /api/sessions/{id}/tasks/{task_id}/code/generate` - Regenerate a task's code
//! - `GET|POST /api/sessions/{id}/tasks/{task_id}/iterations` - List or start debug iterations
//! - `POST /api/sessions/{id}/tasks/{task_id}/iterations/{n}/select` - Promote an iteration's code
//! - `DELETE /api/sessions/{id}/tasks/{task_id}/iterations/{n}` - Forget an iteration record

mod plan;
mod routes;
mod sessions;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
