//! Decision log and replay resolution
//!
//! The [`DecisionLog`] is the append-only record of every routing decision
//! and every capability denial. The [`ReplayResolver`] answers "which model
//! must a replay of this interaction use" from that record alone.

mod replay;
mod store;

pub use replay::{ReplayResolution, ReplayResolver, ReplayStatus, assess};
pub use store::{DecisionFilter, DecisionLog, DenialFilter, LogSummary};
