//! Scenario records, queue envelopes and the forward-only state order.
//!
//! A scenario is one unit of work flowing through the pipeline. It is owned
//! by the [`ScenarioStore`](crate::store::ScenarioStore) and travels between
//! stages as an immutable [`ScenarioMessage`] snapshot.
//!
//! # State order
//!
//! ```text
//!  free ──▶ admitted ──▶ stage₁ done ──▶ stage₂ done ──▶ … ──▶ terminal
//!   ▲           ▲              ▲
//!   │           │              └── recorded by stage processor 1
//!   │           └── recorded by the admission gate
//!   └── eligible for admission
//! ```
//!
//! The order is data ([`StateOrder`]), not code: it is derived from the
//! configured list of stages.

pub mod model;
pub mod state;

pub use model::{ArtifactRefs, Scenario, ScenarioKey, ScenarioMessage, ScenarioUpdate, UpdateKind};
pub use state::StateOrder;
