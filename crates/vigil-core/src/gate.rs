//! Compliance Gate — synchronous request-time check that blocks a subject's
//! further activity until outstanding mandatory obligations are satisfied.
//!
//! Distinct from the asynchronous escalation loop: it shares the persisted
//! fulfillment records but never writes to the alert ledger and never calls
//! outbound channels. Availability wins over strict gating — any read error
//! fails open with a single logged error.

use serde::Serialize;

use crate::config::EscalationConfig;
use crate::error::Result;
use crate::store::Store;
use crate::types::SubjectId;

/// Paths reachable while blocked: the fulfillment pages themselves and the
/// authentication entry points.
const EXEMPT_PREFIXES: &[&str] = &["/obligations", "/login", "/logout", "/auth"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Allowed,
    Blocked {
        obligation_id: i64,
        /// Fulfillment page of the first unmet obligation, in stable order.
        /// Single-obligation-at-a-time funneling: the gate re-evaluates on
        /// the next request once this one is satisfied.
        redirect: String,
    },
}

/// Evaluate the gate for `subject_id` requesting `path`.
pub fn check(store: &Store, subject_id: SubjectId, path: &str) -> GateDecision {
    match check_inner(store, subject_id, path) {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(subject = subject_id, path, "gate evaluation failed, allowing: {e}");
            GateDecision::Allowed
        }
    }
}

fn check_inner(store: &Store, subject_id: SubjectId, path: &str) -> Result<GateDecision> {
    let cfg = EscalationConfig::load(store)?;
    if !cfg.gate_enabled {
        return Ok(GateDecision::Allowed);
    }
    if EXEMPT_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return Ok(GateDecision::Allowed);
    }

    let Some(subject) = store.subject(subject_id)? else {
        tracing::warn!(subject = subject_id, "unknown subject at gate, allowing");
        return Ok(GateDecision::Allowed);
    };

    for obligation in store
        .active_obligations()?
        .into_iter()
        .filter(|o| !o.is_deadline_based())
    {
        match obligation.audience.applies_to(&subject) {
            Some(true) => {}
            // Unevaluable applicability fails open for that obligation only.
            Some(false) | None => continue,
        }
        if !store.has_success_fulfillment(obligation.id, subject.id)? {
            return Ok(GateDecision::Blocked {
                obligation_id: obligation.id,
                redirect: obligation.fulfillment_path(),
            });
        }
    }
    Ok(GateDecision::Allowed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
