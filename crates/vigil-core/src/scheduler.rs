//! Escalation Scheduler — one run per external periodic trigger.
//!
//! Each run loads configuration fresh, resolves outstanding targets, filters
//! them through the alert ledger, dispatches over the configured channels and
//! records delivered alerts. The scheduler keeps no state between runs:
//! every checkpoint lives in the alert and fulfillment tables, so a run cut
//! short by the invoker's timeout is safe to resume on the next trigger.
//!
//! Only a configuration-load failure or a resolver crash aborts a run; a
//! single pair's delivery failure is logged, reflected in the summary and
//! never raised.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::channel::{self, Gateway};
use crate::config::EscalationConfig;
use crate::error::Result;
use crate::ledger;
use crate::obligation::Obligation;
use crate::resolver::{self, UnitOutstanding};
use crate::store::Store;
use crate::subject::Subject;
use crate::types::{AlertTarget, Channel, Period};

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Per-run accounting returned to the invoker.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub details: Vec<serde_json::Value>,
}

impl RunSummary {
    pub fn push(&mut self, detail: serde_json::Value) {
        self.processed += 1;
        self.details.push(detail);
    }
}

// ---------------------------------------------------------------------------
// Deadline family
// ---------------------------------------------------------------------------

/// Escalate deadline-based obligations (checklist-style rules) as of `now`.
///
/// Alerts are keyed on the outstanding unit and delivered to subjects holding
/// a configured escalation role — same-unit holders first, unit-less holders
/// as global fallback.
pub fn run_deadline_escalations(store: &Store, now: DateTime<Utc>) -> Result<RunSummary> {
    let cfg = EscalationConfig::load(store)?;
    let gateway = build_gateway(&cfg)?;
    let period = Period::of(now, cfg.utc_offset_minutes);
    let subjects = store.active_subjects()?;

    let mut summary = RunSummary::default();
    for obligation in store
        .active_obligations()?
        .into_iter()
        .filter(Obligation::is_deadline_based)
    {
        let units = resolver::resolve_deadline(store, &obligation, now, &cfg)?;
        for unit in units {
            let target = AlertTarget::Unit(unit.unit.clone());
            if !admit_logged(store, obligation.id, &target, period, &cfg) {
                continue;
            }

            let message = render_deadline_message(&obligation, &unit);
            let recipients = escalation_recipients(&subjects, &cfg, &unit.unit);
            if recipients.is_empty() {
                tracing::warn!(
                    obligation = obligation.id,
                    unit = %unit.unit,
                    "no escalation recipients for outstanding unit"
                );
            }

            let mut reports = Vec::new();
            for recipient in &recipients {
                reports.extend(channel::dispatch(
                    store,
                    gateway.as_ref(),
                    recipient,
                    &message,
                    &[Channel::InApp, Channel::Gateway],
                    &cfg,
                    now,
                ));
            }

            let recorded = record_if_delivered(store, obligation.id, &target, period, &reports, now);
            summary.push(json!({
                "obligation": obligation.id,
                "target": target.to_string(),
                "missing": unit.missing.len(),
                "members": unit.member_count,
                "channels": reports,
                "recorded": recorded,
            }));
        }
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Persistence family
// ---------------------------------------------------------------------------

/// Escalate persistence-based obligations (mandatory-content rules): every
/// applicable subject with no success fulfillment at all is nudged directly,
/// at most once per period and `max_reminders` times in total.
pub fn run_persistent_escalations(store: &Store, now: DateTime<Utc>) -> Result<RunSummary> {
    let cfg = EscalationConfig::load(store)?;
    let gateway = build_gateway(&cfg)?;
    let period = Period::of(now, cfg.utc_offset_minutes);

    let mut summary = RunSummary::default();
    for obligation in store
        .active_obligations()?
        .into_iter()
        .filter(|o| !o.is_deadline_based())
    {
        let outstanding = resolver::resolve_persistent(store, &obligation)?;
        for subject in outstanding {
            let target = AlertTarget::Subject(subject.id);
            if !admit_logged(store, obligation.id, &target, period, &cfg) {
                continue;
            }

            let message = render_persistent_message(&obligation, &subject);
            let reports = channel::dispatch(
                store,
                gateway.as_ref(),
                &subject,
                &message,
                &[Channel::InApp, Channel::Gateway],
                &cfg,
                now,
            );

            let recorded = record_if_delivered(store, obligation.id, &target, period, &reports, now);
            summary.push(json!({
                "obligation": obligation.id,
                "target": target.to_string(),
                "channels": reports,
                "recorded": recorded,
            }));
        }
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Shared run plumbing
// ---------------------------------------------------------------------------

fn build_gateway(cfg: &EscalationConfig) -> Result<Option<Gateway>> {
    match (&cfg.gateway_url, cfg.gateway_enabled) {
        (Some(url), true) => Ok(Some(Gateway::new(url, cfg.gateway_timeout())?)),
        _ => Ok(None),
    }
}

/// Admit with per-pair error tolerance: a store error on one pair is logged
/// and the pair is skipped, keeping the rest of the run alive.
fn admit_logged(
    store: &Store,
    obligation_id: i64,
    target: &AlertTarget,
    period: Period,
    cfg: &EscalationConfig,
) -> bool {
    match ledger::admit(store, obligation_id, target, period, cfg.max_reminders) {
        Ok(allowed) => {
            if !allowed {
                tracing::debug!(
                    obligation = obligation_id,
                    target = %target,
                    "pair already alerted or at cap, skipping"
                );
            }
            allowed
        }
        Err(e) => {
            tracing::error!(
                obligation = obligation_id,
                target = %target,
                "ledger admit failed, skipping pair: {e}"
            );
            false
        }
    }
}

/// Record the alert iff at least one channel delivered. Counted attempts are
/// delivery attempts, not dispatch attempts: a pair with zero deliveries is
/// retried next run without touching the cap. A ledger conflict (concurrent
/// writer) counts as recorded.
fn record_if_delivered(
    store: &Store,
    obligation_id: i64,
    target: &AlertTarget,
    period: Period,
    reports: &[channel::ChannelReport],
    now: DateTime<Utc>,
) -> bool {
    let mut delivered: Vec<Channel> = Vec::new();
    for r in reports {
        if r.delivered() && !delivered.contains(&r.channel) {
            delivered.push(r.channel);
        }
    }
    if delivered.is_empty() {
        return false;
    }
    match ledger::record(store, obligation_id, target, period, &delivered, now) {
        Ok(_) => true,
        Err(e) => {
            tracing::error!(
                obligation = obligation_id,
                target = %target,
                "ledger record failed: {e}"
            );
            false
        }
    }
}

fn escalation_recipients<'a>(
    subjects: &'a [Subject],
    cfg: &EscalationConfig,
    unit: &str,
) -> Vec<&'a Subject> {
    let holders: Vec<&Subject> = subjects
        .iter()
        .filter(|s| {
            s.role
                .as_deref()
                .is_some_and(|r| cfg.escalation_roles.iter().any(|er| er == r))
        })
        .collect();

    let same_unit: Vec<&Subject> = holders
        .iter()
        .copied()
        .filter(|s| s.unit_code.as_deref() == Some(unit))
        .collect();
    if !same_unit.is_empty() {
        return same_unit;
    }
    holders
        .into_iter()
        .filter(|s| s.unit_code.is_none())
        .collect()
}

fn render_deadline_message(obligation: &Obligation, unit: &UnitOutstanding) -> String {
    let deadline = obligation
        .deadline
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default();
    format!(
        "Reminder: '{}' was due at {}. {} of {} members of unit {} have not submitted today.",
        obligation.title,
        deadline,
        unit.missing.len(),
        unit.member_count,
        unit.unit
    )
}

fn render_persistent_message(obligation: &Obligation, subject: &Subject) -> String {
    format!(
        "Action required, {}: '{}' must be completed before you can continue.",
        subject.display_name, obligation.title
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
