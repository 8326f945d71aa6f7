//! Capability, model, and persona policy registries
//!
//! - **Capability Registry**: abstract capability keys and their latency,
//!   risk, and replay-tolerance classes.
//! - **Model Registry**: concrete backing models with the capabilities they
//!   serve, their cost/latency/stability metadata, and eligibility flags.
//! - **Policy Store**: per-persona allow/forbid lists and budget ceilings.
//!
//! The three live together in a [`RegistrySnapshot`], shared behind a
//! [`SharedRegistry`] and persisted by a [`CatalogStore`]. Reference data
//! arrives as a TOML [`Catalog`].

mod registry;
mod seed;
mod store;
mod types;

pub use registry::{RegistrySnapshot, SharedRegistry};
pub use seed::Catalog;
pub use store::{CatalogStore, ImportSummary};
pub use types::{Capability, LatencyClass, Model, PersonaPolicy, ReplayTolerance, RiskClass};
