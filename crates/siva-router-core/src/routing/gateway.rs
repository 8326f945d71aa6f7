//! Capability gateway
//!
//! Composes authorize → route → invoke for callers that want the whole
//! control flow in one call. The model invoker is only reached after an ALLOW
//! and a recorded routing decision.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::authorizer::Authorizer;
use super::router::CapabilityRouter;
use super::types::{AuthorizationOutcome, CapabilityRequest, DenialReason, RoutingDecision};
use crate::error::{Error, Result};

/// Default caller-side timeout for authorize + route
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 250;

/// The model layer behind the router
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Call the model chosen by `decision`
    async fn invoke(
        &self,
        decision: &RoutingDecision,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Result of resolving a capability request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GatewayOutcome {
    Denied {
        interaction_id: String,
        reason: DenialReason,
    },
    Routed { decision: RoutingDecision },
}

impl GatewayOutcome {
    pub fn interaction_id(&self) -> &str {
        match self {
            Self::Denied { interaction_id, .. } => interaction_id,
            Self::Routed { decision } => &decision.interaction_id,
        }
    }

    pub fn decision(&self) -> Option<&RoutingDecision> {
        match self {
            Self::Denied { .. } => None,
            Self::Routed { decision } => Some(decision),
        }
    }
}

/// Result of dispatching a request all the way to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Dispatch {
    Denied {
        interaction_id: String,
        reason: DenialReason,
    },
    Completed {
        decision: RoutingDecision,
        output: serde_json::Value,
    },
}

/// Front door for capability requests
#[derive(Debug, Clone)]
pub struct CapabilityGateway {
    authorizer: Authorizer,
    router: CapabilityRouter,
    call_timeout: Duration,
}

impl CapabilityGateway {
    pub fn new(authorizer: Authorizer, router: CapabilityRouter) -> Self {
        Self {
            authorizer,
            router,
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }

    /// Set the caller-side timeout for authorize + route
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    pub fn router(&self) -> &CapabilityRouter {
        &self.router
    }

    /// Authorize and, on ALLOW, route the request
    pub async fn resolve(&self, mut request: CapabilityRequest) -> Result<GatewayOutcome> {
        let interaction_id = request.ensure_interaction_id().to_string();

        let resolved = tokio::time::timeout(
            self.call_timeout,
            self.authorize_then_route(&request, &interaction_id),
        )
        .await;

        match resolved {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.call_timeout.as_millis() as u64;
                warn!(
                    interaction_id = %interaction_id,
                    timeout_ms = timeout_ms,
                    "Capability request timed out"
                );
                Err(Error::Timeout(timeout_ms))
            }
        }
    }

    async fn authorize_then_route(
        &self,
        request: &CapabilityRequest,
        interaction_id: &str,
    ) -> Result<GatewayOutcome> {
        let outcome = self
            .authorizer
            .authorize(&request.persona_id, &request.capability_key, interaction_id)
            .await?;

        match outcome {
            AuthorizationOutcome::Deny(reason) => Ok(GatewayOutcome::Denied {
                interaction_id: interaction_id.to_string(),
                reason,
            }),
            AuthorizationOutcome::Allow => {
                let decision = self
                    .router
                    .route(&request.capability_key, &request.persona_id, interaction_id)
                    .await?;
                Ok(GatewayOutcome::Routed { decision })
            }
        }
    }

    /// Resolve the request and invoke the chosen model
    ///
    /// The invoker is never called on DENY, and routing errors such as
    /// `NoEligibleModel` are returned before any invocation.
    pub async fn dispatch(
        &self,
        request: CapabilityRequest,
        invoker: &dyn ModelInvoker,
        payload: &serde_json::Value,
    ) -> Result<Dispatch> {
        match self.resolve(request).await? {
            GatewayOutcome::Denied {
                interaction_id,
                reason,
            } => Ok(Dispatch::Denied {
                interaction_id,
                reason,
            }),
            GatewayOutcome::Routed { decision } => {
                debug!(
                    interaction_id = %decision.interaction_id,
                    model_id = %decision.model_id,
                    "Invoking routed model"
                );
                let output = invoker.invoke(&decision, payload).await?;
                Ok(Dispatch::Completed { decision, output })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::DecisionLog;
    use crate::catalog::{Catalog, SharedRegistry};
    use crate::storage::Database;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingInvoker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelInvoker for CountingInvoker {
        async fn invoke(
            &self,
            decision: &RoutingDecision,
            _payload: &serde_json::Value,
        ) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "model": decision.model_id }))
        }
    }

    async fn gateway() -> (Database, CapabilityGateway) {
        let db = Database::in_memory().await.unwrap();
        let log = Arc::new(DecisionLog::new(db.pool().clone()));
        let registry = SharedRegistry::new(Catalog::with_defaults().into_snapshot());
        let gateway = CapabilityGateway::new(
            Authorizer::new(registry.clone(), log.clone()),
            CapabilityRouter::new(registry, log),
        )
        .with_call_timeout(Duration::from_secs(5));
        (db, gateway)
    }

    #[tokio::test]
    async fn test_dispatch_invokes_once_on_allow() {
        let (_db, gateway) = gateway().await;
        let invoker = CountingInvoker {
            calls: AtomicUsize::new(0),
        };

        let dispatch = gateway
            .dispatch(
                CapabilityRequest::new("siva-analyst", "summarize_fast"),
                &invoker,
                &serde_json::json!({ "text": "hello" }),
            )
            .await
            .unwrap();

        assert!(matches!(dispatch, Dispatch::Completed { .. }));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_never_invokes_on_deny() {
        let (_db, gateway) = gateway().await;
        let invoker = CountingInvoker {
            calls: AtomicUsize::new(0),
        };

        let dispatch = gateway
            .dispatch(
                CapabilityRequest::new("siva-outreach", "reason_deep"),
                &invoker,
                &serde_json::Value::Null,
            )
            .await
            .unwrap();

        assert!(matches!(
            dispatch,
            Dispatch::Denied {
                reason: DenialReason::InForbidden,
                ..
            }
        ));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_generates_interaction_id() {
        let (_db, gateway) = gateway().await;

        let outcome = gateway
            .resolve(CapabilityRequest::new("siva-analyst", "classify_cheap"))
            .await
            .unwrap();
        assert!(!outcome.interaction_id().is_empty());
        assert!(outcome.decision().is_some());
    }
}
