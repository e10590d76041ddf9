//! Alert Ledger — the single idempotency and cap checkpoint.
//!
//! All dispatch must pass through [`admit`] before sending, and [`record`]
//! is called only after at least one channel reported a successful delivery.
//! A pair with zero deliveries is not recorded and stays eligible on the
//! next run, so a flaky channel cannot deplete a subject's reminder cap.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::store::Store;
use crate::types::{AlertTarget, Channel, ObligationId, Period};

/// Whether an alert for `(obligation, target)` may be dispatched now.
///
/// Denied when the pair was already alerted in this period, or when the
/// historical alert count has reached `max_reminders`.
pub fn admit(
    store: &Store,
    obligation_id: ObligationId,
    target: &AlertTarget,
    period: Period,
    max_reminders: u32,
) -> Result<bool> {
    let target = target.to_string();
    if store.alert_exists(obligation_id, &target, &period.to_string())? {
        return Ok(false);
    }
    Ok(store.alert_count(obligation_id, &target)? < i64::from(max_reminders))
}

/// Record a delivered alert. Returns `false` when a concurrent writer beat
/// us to the row — by then the alert exists, so callers treat that as
/// success rather than an error.
pub fn record(
    store: &Store,
    obligation_id: ObligationId,
    target: &AlertTarget,
    period: Period,
    channels: &[Channel],
    at: DateTime<Utc>,
) -> Result<bool> {
    let joined = channels
        .iter()
        .map(Channel::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let inserted = store.insert_alert(
        obligation_id,
        &target.to_string(),
        &period.to_string(),
        &joined,
        at,
    )?;
    if !inserted {
        tracing::debug!(
            obligation = obligation_id,
            target = %target,
            period = %period,
            "alert already recorded by a concurrent writer"
        );
    }
    Ok(inserted)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn period(day: u32) -> Period {
        Period(NaiveDate::from_ymd_opt(2024, 5, day).unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn admit_then_record_then_deny_same_period() {
        let store = Store::open_in_memory().unwrap();
        let target = AlertTarget::Unit("3A".to_string());

        assert!(admit(&store, 1, &target, period(10), 3).unwrap());
        assert!(record(&store, 1, &target, period(10), &[Channel::InApp], now()).unwrap());
        assert!(!admit(&store, 1, &target, period(10), 3).unwrap());
    }

    #[test]
    fn new_period_admits_again_until_cap() {
        let store = Store::open_in_memory().unwrap();
        let target = AlertTarget::Subject(5);

        for day in 10..12 {
            assert!(admit(&store, 1, &target, period(day), 2).unwrap());
            record(&store, 1, &target, period(day), &[Channel::InApp], now()).unwrap();
        }
        // Historical count reached the cap: a fresh period is still denied.
        assert!(!admit(&store, 1, &target, period(12), 2).unwrap());
    }

    #[test]
    fn cap_zero_never_admits() {
        let store = Store::open_in_memory().unwrap();
        let target = AlertTarget::Subject(5);
        assert!(!admit(&store, 1, &target, period(10), 0).unwrap());
    }

    #[test]
    fn concurrent_record_reports_conflict_not_error() {
        let store = Store::open_in_memory().unwrap();
        let target = AlertTarget::Unit("3A".to_string());

        assert!(record(&store, 1, &target, period(10), &[Channel::InApp], now()).unwrap());
        let second = record(
            &store,
            1,
            &target,
            period(10),
            &[Channel::InApp, Channel::Gateway],
            now(),
        )
        .unwrap();
        assert!(!second);
        assert_eq!(store.alert_count(1, "unit:3A").unwrap(), 1);
    }

    #[test]
    fn pairs_are_independent() {
        let store = Store::open_in_memory().unwrap();
        let a = AlertTarget::Subject(1);
        let b = AlertTarget::Subject(2);
        record(&store, 1, &a, period(10), &[Channel::InApp], now()).unwrap();
        assert!(admit(&store, 1, &b, period(10), 3).unwrap());
        assert!(admit(&store, 2, &a, period(10), 3).unwrap());
    }
}
