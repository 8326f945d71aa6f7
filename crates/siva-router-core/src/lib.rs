//! SIVA Router Core Library
//!
//! This crate provides the capability-based model routing layer used by the
//! SIVA orchestration layer, including:
//! - Capability, model, and persona policy registries
//! - Policy authorization that runs before any model is contacted
//! - Deterministic, budget-gated model routing
//! - Append-only decision and denial logs (SQLite)
//! - Replay resolution with explicit deviation reporting
//! - A read-only admin observation surface

pub mod admin;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod routing;
pub mod service;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::admin::AdminSurface;
    pub use crate::audit::{DecisionLog, ReplayResolver, ReplayStatus};
    pub use crate::catalog::{Catalog, SharedRegistry};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::routing::{
        AuthorizationOutcome, Authorizer, CapabilityGateway, CapabilityRouter, DenialReason,
    };
    pub use crate::service::RouterService;
    pub use crate::storage::Database;
}
