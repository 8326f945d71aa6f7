//! Capability authorization and deterministic model routing
//!
//! - [`Authorizer`]: policy check, denial logging
//! - [`CapabilityRouter`]: budget filtering, scoring, decision logging
//! - [`CapabilityGateway`]: authorize → route → invoke in one call
//!
//! Scoring is pure arithmetic over registry metadata (see [`scoring`]); the
//! same registry state and request always produce the same model.

mod authorizer;
mod gateway;
mod router;
pub mod scoring;
mod types;

pub use authorizer::{Authorizer, evaluate_policy};
pub use gateway::{CapabilityGateway, DEFAULT_CALL_TIMEOUT_MS, Dispatch, GatewayOutcome, ModelInvoker};
pub use router::CapabilityRouter;
pub use types::{
    AuthorizationOutcome, CapabilityDenial, CapabilityRequest, DenialReason, RoutingDecision,
    ScoreBreakdown, ScoredCandidate, new_interaction_id,
};
