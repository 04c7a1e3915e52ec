//! gangway-state — persisted per-target deployment state.
//!
//! Three pieces of state live under `{state_dir}/{name}/{environment}/`:
//!
//! - `manifest.json` — the deployment manifest: the `current` record (last
//!   successful cutover) plus a bounded history.
//! - `active_slot.json` — which blue/green slot is live, with a version
//!   counter for compare-and-swap writes.
//! - `deploy.lock` — at most one in-flight pipeline per target.
//!
//! All writes go to a temp file in the same directory and are renamed into
//! place, so readers never observe a half-written value.

pub mod error;
pub mod lock;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use lock::DeployLock;
pub use store::StateStore;
pub use types::*;
