//! SIVA Router integration tests
//!
//! End-to-end checks of authorization, routing, logging, and replay over a
//! real SQLite database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use siva_router_core::{
    Error, Result,
    admin::{AdminSurface, DecisionQuery, EligibilityPatch},
    audit::ReplayStatus,
    catalog::{Capability, Catalog, Model, PersonaPolicy},
    routing::{
        AuthorizationOutcome, CapabilityRequest, DenialReason, Dispatch, ModelInvoker,
        RoutingDecision,
    },
    service::RouterService,
    storage::Database,
};

/// Model layer stand-in that only counts calls
#[derive(Default)]
struct CountingInvoker {
    calls: AtomicUsize,
}

impl CountingInvoker {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelInvoker for CountingInvoker {
    async fn invoke(
        &self,
        decision: &RoutingDecision,
        _payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "served_by": decision.model_id }))
    }
}

fn model_a() -> Model {
    Model::new("model-a")
        .with_slug("Model A")
        .with_capabilities(["summarize_fast"])
        .with_cost(0.0004)
        .with_latency_ms(300)
        .with_stability(95)
}

fn model_b() -> Model {
    Model::new("model-b")
        .with_slug("Model B")
        .with_capabilities(["summarize_fast", "classify_cheap"])
        .with_cost(0.0002)
        .with_latency_ms(300)
        .with_stability(90)
}

/// Best on every axis except price
fn model_x() -> Model {
    Model::new("model-x")
        .with_slug("Model X")
        .with_capabilities(["summarize_fast", "reason_deep"])
        .with_cost(0.005)
        .with_latency_ms(100)
        .with_stability(100)
}

fn catalog() -> Catalog {
    Catalog {
        capabilities: vec![
            Capability::new("summarize_fast"),
            Capability::new("classify_cheap"),
            Capability::new("reason_deep"),
        ],
        models: vec![model_a(), model_b(), model_x()],
        personas: vec![
            PersonaPolicy::new("p1")
                .allow(["summarize_fast", "classify_cheap"])
                .with_budget(0.001, 1000),
            PersonaPolicy::new("p2")
                .allow(["reason_deep"])
                .forbid(["reason_deep"])
                .with_budget(1.0, 10_000),
            PersonaPolicy::new("p-tight")
                .allow(["summarize_fast"])
                .with_budget(0.0001, 1000),
            PersonaPolicy::new("p-rich")
                .allow(["summarize_fast"])
                .with_budget(1.0, 10_000),
            PersonaPolicy::new("p-reason")
                .allow(["reason_deep"])
                .with_budget(0.001, 10_000),
        ],
    }
}

async fn service() -> RouterService {
    let db = Database::in_memory().await.unwrap();
    let service = RouterService::from_database(db)
        .await
        .unwrap()
        .with_call_timeout(Duration::from_secs(5));
    service.import_catalog(&catalog()).await.unwrap();
    service
}

async fn route(service: &RouterService, capability: &str, persona: &str, id: &str) -> Result<RoutingDecision> {
    service.router().route(capability, persona, id).await
}

// ========== Authorization ==========

#[tokio::test]
async fn test_scenario_a_not_in_allowed() {
    let service = service().await;

    let outcome = service
        .authorizer()
        .authorize("p1", "reason_deep", "a-1")
        .await
        .unwrap();
    assert_eq!(outcome, AuthorizationOutcome::Deny(DenialReason::NotInAllowed));

    let denial = service.decision_log().get_denial("a-1").await.unwrap().unwrap();
    assert_eq!(denial.reason, DenialReason::NotInAllowed);
    assert_eq!(denial.capability_key, "reason_deep");
}

#[tokio::test]
async fn test_scenario_b_forbidden_overrides_allowed() {
    let service = service().await;

    let outcome = service
        .authorizer()
        .authorize("p2", "reason_deep", "b-1")
        .await
        .unwrap();
    assert_eq!(outcome, AuthorizationOutcome::Deny(DenialReason::InForbidden));
}

#[tokio::test]
async fn test_unknown_capability_denied() {
    let service = service().await;

    let outcome = service
        .authorizer()
        .authorize("p1", "translate_legal", "u-1")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        AuthorizationOutcome::Deny(DenialReason::CapabilityNotFound)
    );
}

#[tokio::test]
async fn test_denial_log_owns_each_interaction_id() {
    let service = service().await;
    let authorizer = service.authorizer();
    let log = service.decision_log();

    let first = authorizer.authorize("p2", "reason_deep", "d-1").await.unwrap();
    assert_eq!(first, AuthorizationOutcome::Deny(DenialReason::InForbidden));

    // Same request again is a retry of the recorded denial
    let retry = authorizer.authorize("p2", "reason_deep", "d-1").await.unwrap();
    assert_eq!(retry, first);

    // A different denied request cannot hide behind the used id
    let err = authorizer
        .authorize("p1", "translate_legal", "d-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    // Nor can an allowed one
    let err = authorizer
        .authorize("p1", "summarize_fast", "d-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
    let err = route(&service, "summarize_fast", "p1", "d-1").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    let denial = log.get_denial("d-1").await.unwrap().unwrap();
    assert_eq!(denial.persona_id, "p2");
    assert_eq!(denial.capability_key, "reason_deep");
    assert_eq!(denial.reason, DenialReason::InForbidden);
    assert_eq!(log.summary().await.unwrap().denials, 1);
    assert!(log.get_decision("d-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_routed_interaction_cannot_be_denied() {
    let service = service().await;
    route(&service, "summarize_fast", "p1", "x-1").await.unwrap();

    let err = service
        .authorizer()
        .authorize("p1", "reason_deep", "x-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
    assert!(service.decision_log().get_denial("x-1").await.unwrap().is_none());

    // The original request still authorizes and replays
    let outcome = service
        .authorizer()
        .authorize("p1", "summarize_fast", "x-1")
        .await
        .unwrap();
    assert!(outcome.is_allowed());
}

#[tokio::test]
async fn test_empty_interaction_id_rejected() {
    let service = service().await;

    let err = service
        .gateway()
        .resolve(CapabilityRequest::new("p1", "reason_deep").with_interaction_id(""))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    let err = route(&service, "summarize_fast", "p1", " ").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
    assert_eq!(service.decision_log().summary().await.unwrap().denials, 0);
}

#[tokio::test]
async fn test_deny_before_invoke() {
    let service = service().await;
    let gateway = service.gateway();
    let invoker = CountingInvoker::default();

    let denied = [
        ("p1", "reason_deep", DenialReason::NotInAllowed),
        ("p2", "reason_deep", DenialReason::InForbidden),
        ("p1", "translate_legal", DenialReason::CapabilityNotFound),
        ("nobody", "summarize_fast", DenialReason::NotInAllowed),
    ];

    for (i, (persona, capability, expected)) in denied.into_iter().enumerate() {
        let id = format!("deny-{}", i);
        let dispatch = gateway
            .dispatch(
                CapabilityRequest::new(persona, capability).with_interaction_id(&id),
                &invoker,
                &serde_json::Value::Null,
            )
            .await
            .unwrap();

        match dispatch {
            Dispatch::Denied { reason, .. } => assert_eq!(reason, expected),
            other => panic!("expected denial, got {:?}", other),
        }
        assert!(service.decision_log().get_decision(&id).await.unwrap().is_none());
        assert!(service.decision_log().get_denial(&id).await.unwrap().is_some());
    }

    assert_eq!(invoker.calls(), 0);

    gateway
        .dispatch(
            CapabilityRequest::new("p1", "summarize_fast"),
            &invoker,
            &serde_json::Value::Null,
        )
        .await
        .unwrap();
    assert_eq!(invoker.calls(), 1);
}

// ========== Routing ==========

#[tokio::test]
async fn test_scenario_c_deterministic_choice() {
    let service = service().await;

    let mut chosen = Vec::new();
    for i in 0..100 {
        let decision = route(&service, "summarize_fast", "p1", &format!("c-{}", i))
            .await
            .unwrap();
        chosen.push(decision.model_id);
    }

    assert!(chosen.iter().all(|m| m == "model-b"));

    let decision = service
        .decision_log()
        .get_decision("c-0")
        .await
        .unwrap()
        .unwrap();
    assert!((decision.score - 90.0).abs() < 1e-9);
    assert_eq!(decision.candidates.len(), 2);
    assert_eq!(decision.candidates[1].model_id, "model-a");
    assert!((decision.candidates[1].breakdown.score - 89.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_scenario_d_no_eligible_model() {
    let service = service().await;

    let err = route(&service, "summarize_fast", "p-tight", "d-1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoEligibleModel { .. }));
    assert_eq!(err.code(), "NO_ELIGIBLE_MODEL");
    assert!(service.decision_log().get_decision("d-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_budget_excludes_rather_than_deprioritizes() {
    let service = service().await;

    // With room in the budget the premium model wins outright
    let rich = route(&service, "summarize_fast", "p-rich", "r-1").await.unwrap();
    assert_eq!(rich.model_id, "model-x");

    // Under a tighter ceiling it is never selected, not even as an alternative
    let p1 = route(&service, "summarize_fast", "p1", "r-2").await.unwrap();
    assert_ne!(p1.model_id, "model-x");
    assert!(p1.candidates.iter().all(|c| c.model_id != "model-x"));

    // As the only supporting model it yields NO_ELIGIBLE_MODEL, not a substitute
    let invoker = CountingInvoker::default();
    let err = service
        .gateway()
        .dispatch(
            CapabilityRequest::new("p-reason", "reason_deep"),
            &invoker,
            &serde_json::Value::Null,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_ELIGIBLE_MODEL");
    assert_eq!(invoker.calls(), 0);
}

#[tokio::test]
async fn test_retry_returns_first_decision() {
    let service = service().await;

    let first = route(&service, "summarize_fast", "p1", "retry-1").await.unwrap();
    assert_eq!(first.model_id, "model-b");

    service
        .admin()
        .set_model_eligibility(&EligibilityPatch::new("model-b", false))
        .await
        .unwrap();

    let retried = route(&service, "summarize_fast", "p1", "retry-1").await.unwrap();
    assert_eq!(retried, first);
    assert_eq!(service.decision_log().summary().await.unwrap().decisions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_routes_see_consistent_snapshots() {
    let service = service().await;
    let mut handles = Vec::new();

    for i in 0..40 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            if i % 10 == 5 {
                let flag = (i / 10) % 2 == 1;
                service
                    .admin()
                    .set_model_eligibility(&EligibilityPatch::new("model-b", flag))
                    .await
                    .map(|_| None)
            } else {
                route(&service, "summarize_fast", "p1", &format!("cc-{}", i))
                    .await
                    .map(Some)
            }
        }));
    }

    let mut decisions = Vec::new();
    for handle in handles {
        if let Some(decision) = handle.await.unwrap().unwrap() {
            decisions.push(decision);
        }
    }

    assert_eq!(decisions.len(), 36);
    for decision in decisions {
        // The winner is always the head of the candidate set it was scored in
        assert_eq!(decision.model_id, decision.candidates[0].model_id);
        let ids: Vec<&str> = decision.candidates.iter().map(|c| c.model_id.as_str()).collect();
        match ids.as_slice() {
            ["model-b", "model-a"] => assert_eq!(decision.model_id, "model-b"),
            ["model-a"] => assert_eq!(decision.model_id, "model-a"),
            other => panic!("unexpected candidate set {:?}", other),
        }
    }
}

// ========== Replay ==========

#[tokio::test]
async fn test_replay_stability() {
    let service = service().await;
    let decision = route(&service, "summarize_fast", "p1", "s-1").await.unwrap();

    let replay = service.replay().resolve_for_replay("s-1").await.unwrap();
    assert_eq!(replay.model_id, decision.model_id);
    assert_eq!(replay.replay_status, ReplayStatus::Replayable);
    assert!(replay.deviation_reason.is_none());
}

#[tokio::test]
async fn test_scenario_e_ineligible_model_flagged_not_substituted() {
    let service = service().await;
    let decision = route(&service, "summarize_fast", "p1", "X").await.unwrap();
    assert_eq!(decision.model_id, "model-b");

    service
        .admin()
        .set_model_eligibility(&EligibilityPatch::new("model-b", false))
        .await
        .unwrap();

    let replay = service.replay().resolve_for_replay("X").await.unwrap();
    assert_eq!(replay.replay_status, ReplayStatus::ModelIneligible);
    assert_eq!(replay.model_id, "model-b");
    assert!(replay.deviation_reason.is_some());

    // New traffic moves on; the recorded interaction does not
    let fresh = route(&service, "summarize_fast", "p1", "Y").await.unwrap();
    assert_eq!(fresh.model_id, "model-a");
    assert_eq!(
        service.replay().resolve_for_replay("X").await.unwrap().model_id,
        "model-b"
    );
}

#[tokio::test]
async fn test_replay_retired_model_is_deleted() {
    let service = service().await;
    route(&service, "summarize_fast", "p1", "ret-1").await.unwrap();

    let mut retired = catalog();
    retired.models[1] = model_b().retired();
    service.import_catalog(&retired).await.unwrap();

    let replay = service.replay().resolve_for_replay("ret-1").await.unwrap();
    assert_eq!(replay.replay_status, ReplayStatus::ModelDeleted);
    assert_eq!(replay.model_id, "model-b");

    // Re-importing the original catalog does not bring it back
    let summary = service.import_catalog(&catalog()).await.unwrap();
    assert_eq!(summary.retired_preserved, vec!["model-b".to_string()]);
    let replay = service.replay().resolve_for_replay("ret-1").await.unwrap();
    assert_eq!(replay.replay_status, ReplayStatus::ModelDeleted);
}

#[tokio::test]
async fn test_replay_capability_changed() {
    let service = service().await;
    route(&service, "summarize_fast", "p1", "cap-1").await.unwrap();

    let mut changed = catalog();
    changed.models[1] = model_b().with_capabilities(["classify_cheap"]);
    service.import_catalog(&changed).await.unwrap();

    let replay = service.replay().resolve_for_replay("cap-1").await.unwrap();
    assert_eq!(replay.replay_status, ReplayStatus::CapabilityChanged);
    assert_eq!(replay.model_id, "model-b");
}

#[tokio::test]
async fn test_replay_unknown_interaction() {
    let service = service().await;
    service
        .authorizer()
        .authorize("p1", "reason_deep", "denied-1")
        .await
        .unwrap();

    for id in ["never-seen", "denied-1"] {
        let err = service.replay().resolve_for_replay(id).await.unwrap_err();
        assert_eq!(err.code(), "INTERACTION_NOT_FOUND");
    }
}

// ========== Admin surface ==========

#[tokio::test]
async fn test_admin_override_fields_rejected() {
    let service = service().await;

    let err = AdminSurface::parse_patch(&serde_json::json!({
        "model_id": "model-a",
        "is_eligible": true,
        "force_model": "model-a"
    }))
    .unwrap_err();
    assert_eq!(err.code(), "METHOD_NOT_ALLOWED");

    // Nothing changed: routing still follows the scores
    let decision = route(&service, "summarize_fast", "p1", "adm-1").await.unwrap();
    assert_eq!(decision.model_id, "model-b");
}

#[tokio::test]
async fn test_admin_decision_view_tracks_live_status() {
    let service = service().await;
    route(&service, "summarize_fast", "p1", "v-1").await.unwrap();
    route(&service, "summarize_fast", "p-rich", "v-2").await.unwrap();

    service
        .admin()
        .set_model_eligibility(&EligibilityPatch::new("model-x", false))
        .await
        .unwrap();

    let deviating = service
        .admin()
        .list_decisions(&DecisionQuery {
            replay_status: Some(ReplayStatus::ModelIneligible),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(deviating.len(), 1);
    assert_eq!(deviating[0].interaction_id, "v-2");

    let for_p1 = service
        .admin()
        .list_decisions(&DecisionQuery {
            persona_id: Some("p1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(for_p1.len(), 1);
    assert_eq!(for_p1[0].replay_status, ReplayStatus::Replayable);
}

#[tokio::test]
async fn test_eligibility_toggle_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("router.db");

    {
        let db = Database::open(&path).await.unwrap();
        let service = RouterService::from_database(db).await.unwrap();
        service.import_catalog(&catalog()).await.unwrap();
        service
            .admin()
            .set_model_eligibility(&EligibilityPatch::new("model-b", false))
            .await
            .unwrap();
        service.database().close().await;
    }

    let db = Database::open(&path).await.unwrap();
    let service = RouterService::from_database(db).await.unwrap();
    let model = service.admin().get_model("model-b").await.unwrap();
    assert!(!model.is_eligible);
    assert_eq!(model.blocked_capabilities.len(), 2);

    // Re-importing the catalog keeps the operator's toggle
    service.import_catalog(&catalog()).await.unwrap();
    assert!(!service.admin().get_model("model-b").await.unwrap().is_eligible);

    let decision = route(&service, "summarize_fast", "p1", "persist-1").await.unwrap();
    assert_eq!(decision.model_id, "model-a");
}
