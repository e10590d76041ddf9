//! Target Resolver — computes the (subject, obligation) pairs currently
//! outstanding for a rule.
//!
//! Deadline rules resolve at unit granularity (a unit is outstanding once any
//! applicable member is missing today's submission past the deadline time);
//! persistence rules resolve per subject (outstanding until the first success
//! fulfillment, with no time window). Subjects whose applicability cannot be
//! evaluated are excluded and logged — resolution fails open, never by
//! crashing the run.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::EscalationConfig;
use crate::error::Result;
use crate::obligation::Obligation;
use crate::store::Store;
use crate::subject::Subject;
use crate::types::Period;

/// One outstanding unit for a deadline obligation. Carries both the unit
/// granularity (used for alert dedup) and the per-member granularity (used
/// for message rendering and persistence-style callers).
#[derive(Debug, Clone)]
pub struct UnitOutstanding {
    pub unit: String,
    pub missing: Vec<Subject>,
    /// Applicable members in the unit, missing or not.
    pub member_count: usize,
}

/// Resolve a deadline-based obligation as of `now`.
///
/// Returns an empty set when the obligation has no deadline, or when local
/// time-of-day has not yet reached the deadline.
pub fn resolve_deadline(
    store: &Store,
    obligation: &Obligation,
    now: DateTime<Utc>,
    cfg: &EscalationConfig,
) -> Result<Vec<UnitOutstanding>> {
    let Some(deadline) = obligation.deadline else {
        return Ok(Vec::new());
    };

    let local = now + Duration::minutes(cfg.utc_offset_minutes);
    if local.time() < deadline {
        return Ok(Vec::new());
    }
    let period = Period::of(now, cfg.utc_offset_minutes);

    // Applicable members grouped by unit. BTreeMap keeps unit order stable
    // across runs.
    let mut units: BTreeMap<String, (Vec<Subject>, usize)> = BTreeMap::new();
    for subject in store.active_subjects()? {
        match obligation.audience.applies_to(&subject) {
            Some(true) => {}
            Some(false) => continue,
            None => {
                tracing::warn!(
                    obligation = obligation.id,
                    subject = subject.id,
                    "applicability not evaluable, excluding subject from resolution"
                );
                continue;
            }
        }
        let Some(unit) = subject.unit_code.clone() else {
            // Deadline rules escalate per unit; a subject without a unit
            // cannot be attributed to one.
            tracing::warn!(
                obligation = obligation.id,
                subject = subject.id,
                "subject has no unit code, excluding from deadline resolution"
            );
            continue;
        };

        let fulfilled = store
            .success_fulfillment_times(obligation.id, subject.id)?
            .iter()
            .any(|ts| Period::of(*ts, cfg.utc_offset_minutes) == period);

        let entry = units.entry(unit).or_default();
        entry.1 += 1;
        if !fulfilled {
            entry.0.push(subject);
        }
    }

    Ok(units
        .into_iter()
        .filter(|(_, (missing, _))| !missing.is_empty())
        .map(|(unit, (missing, member_count))| UnitOutstanding {
            unit,
            missing,
            member_count,
        })
        .collect())
}

/// Resolve a persistence-based obligation: outstanding for every applicable
/// subject with no success fulfillment at all.
pub fn resolve_persistent(store: &Store, obligation: &Obligation) -> Result<Vec<Subject>> {
    let mut outstanding = Vec::new();
    for subject in store.active_subjects()? {
        match obligation.audience.applies_to(&subject) {
            Some(true) => {}
            Some(false) => continue,
            None => {
                tracing::warn!(
                    obligation = obligation.id,
                    subject = subject.id,
                    "applicability not evaluable, excluding subject from resolution"
                );
                continue;
            }
        }
        if !store.has_success_fulfillment(obligation.id, subject.id)? {
            outstanding.push(subject);
        }
    }
    Ok(outstanding)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
