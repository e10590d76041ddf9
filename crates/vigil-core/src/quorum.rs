//! Quorum resolution — approve/reject a time-boxed proposal when its voting
//! window expires.
//!
//! Same scheduler shape as the escalation runs, with a different terminal
//! transition: `approval_rate = positive / total` (0 when nobody voted),
//! approved iff the rate reaches the configured quorum percentage. The
//! transition is one-way and idempotent: the resolver only sees proposals
//! still in `open`, and the store guards the update with a status predicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::EscalationConfig;
use crate::error::{Result, VigilError};
use crate::scheduler::RunSummary;
use crate::store::Store;
use crate::types::{ProposalId, SubjectId};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Open,
    Approved,
    Rejected,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalStatus::Open => f.write_str("open"),
            ProposalStatus::Approved => f.write_str("approved"),
            ProposalStatus::Rejected => f.write_str("rejected"),
        }
    }
}

impl std::str::FromStr for ProposalStatus {
    type Err = VigilError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(ProposalStatus::Open),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            _ => Err(VigilError::Config(format!(
                "unknown proposal status '{s}': must be open, approved, or rejected"
            ))),
        }
    }
}

/// A time-boxed entity under vote. Closes on expiry rather than deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub title: String,
    pub body: String,
    pub author_id: SubjectId,
    pub expires_at: DateTime<Utc>,
    pub status: ProposalStatus,
    /// Publish to the downstream feed on approval.
    pub auto_publish: bool,
}

/// Downstream feed collaborator. Publish failures are non-fatal: the status
/// transition must stay durable even when the feed is unavailable.
pub trait FeedSink {
    fn publish(&self, title: &str, body: &str, reference_id: i64) -> anyhow::Result<()>;
}

/// Default sink writing to the store's feed table.
pub struct StoreFeed<'a> {
    store: &'a Store,
    now: DateTime<Utc>,
}

impl<'a> StoreFeed<'a> {
    pub fn new(store: &'a Store, now: DateTime<Utc>) -> Self {
        Self { store, now }
    }
}

impl FeedSink for StoreFeed<'_> {
    fn publish(&self, title: &str, body: &str, reference_id: i64) -> anyhow::Result<()> {
        self.store
            .insert_feed_entry(title, body, reference_id, self.now)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve every open proposal whose voting window has closed.
pub fn resolve_due_proposals(
    store: &Store,
    feed: &dyn FeedSink,
    now: DateTime<Utc>,
) -> Result<RunSummary> {
    let cfg = EscalationConfig::load(store)?;
    let due = store.open_proposals_expired(now)?;

    let mut summary = RunSummary::default();
    for proposal in due {
        let (total, positive) = match store.vote_counts(proposal.id) {
            Ok(counts) => counts,
            Err(e) => {
                tracing::error!(proposal = proposal.id, "vote count failed, skipping: {e}");
                continue;
            }
        };

        // Integer-safe quorum comparison; zero votes resolves to rejected
        // without any division.
        let approved = total > 0 && positive * 100 >= i64::from(cfg.quorum_percent) * total;
        let status = if approved {
            ProposalStatus::Approved
        } else {
            ProposalStatus::Rejected
        };

        let transitioned = match store.transition_proposal(proposal.id, status) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(proposal = proposal.id, "transition failed, skipping: {e}");
                continue;
            }
        };
        if !transitioned {
            // A concurrent resolver already closed it; nothing left to do.
            tracing::debug!(proposal = proposal.id, "already resolved by a concurrent run");
            continue;
        }

        if approved && proposal.auto_publish {
            if let Err(e) = feed.publish(&proposal.title, &proposal.body, proposal.id) {
                tracing::warn!(proposal = proposal.id, "feed publish failed: {e}");
            }
        }

        notify_author(store, &proposal, status, now);

        let rate = if total == 0 {
            0.0
        } else {
            positive as f64 * 100.0 / total as f64
        };
        summary.push(json!({
            "proposal": proposal.id,
            "status": status.to_string(),
            "approval_rate": rate,
            "total_votes": total,
            "positive_votes": positive,
        }));
    }
    Ok(summary)
}

fn notify_author(store: &Store, proposal: &Proposal, status: ProposalStatus, now: DateTime<Utc>) {
    let body = match status {
        ProposalStatus::Approved => {
            format!("Your proposal '{}' was approved by vote.", proposal.title)
        }
        _ => format!("Your proposal '{}' was rejected by vote.", proposal.title),
    };
    if let Err(e) = store.insert_notification(proposal.author_id, &body, now) {
        tracing::warn!(proposal = proposal.id, "author notification failed: {e}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KEY_QUORUM_PERCENT;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn proposal(id: i64, auto_publish: bool) -> Proposal {
        Proposal {
            id,
            title: format!("Proposal {id}"),
            body: "body".to_string(),
            author_id: 1,
            expires_at: now(),
            status: ProposalStatus::Open,
            auto_publish,
        }
    }

    fn seed(store: &Store, p: &Proposal, votes: &[(i64, bool)]) {
        store.insert_proposal(p).unwrap();
        for (subject, approve) in votes {
            store.cast_vote(p.id, *subject, *approve).unwrap();
        }
    }

    fn resolve(store: &Store) -> RunSummary {
        let feed = StoreFeed::new(store, now());
        resolve_due_proposals(store, &feed, now()).unwrap()
    }

    #[test]
    fn zero_votes_is_rejected_not_nan() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, &proposal(1, false), &[]);

        let summary = resolve(&store);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.details[0]["status"], "rejected");
        assert_eq!(summary.details[0]["approval_rate"], 0.0);
        assert_eq!(
            store.proposal_status(1).unwrap(),
            Some(ProposalStatus::Rejected)
        );
    }

    #[test]
    fn exact_quorum_boundary_approves() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting(KEY_QUORUM_PERCENT, "80").unwrap();
        // 8 of 10 approve: 80.0 >= 80.
        let votes: Vec<(i64, bool)> = (1..=10).map(|s| (s, s <= 8)).collect();
        seed(&store, &proposal(1, false), &votes);

        let summary = resolve(&store);
        assert_eq!(summary.details[0]["status"], "approved");
        assert_eq!(summary.details[0]["approval_rate"], 80.0);
    }

    #[test]
    fn below_quorum_rejects() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting(KEY_QUORUM_PERCENT, "80").unwrap();
        // 7 of 10 approve: 70 < 80.
        let votes: Vec<(i64, bool)> = (1..=10).map(|s| (s, s <= 7)).collect();
        seed(&store, &proposal(1, false), &votes);

        let summary = resolve(&store);
        assert_eq!(summary.details[0]["status"], "rejected");
    }

    #[test]
    fn rerun_after_terminal_state_is_noop() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, &proposal(1, false), &[(1, true)]);

        let first = resolve(&store);
        assert_eq!(first.processed, 1);
        let second = resolve(&store);
        assert_eq!(second.processed, 0);
        // Author was notified exactly once.
        assert_eq!(store.notifications_for(1).unwrap().len(), 1);
    }

    #[test]
    fn approved_with_auto_publish_reaches_feed() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, &proposal(1, true), &[(1, true), (2, true)]);

        resolve(&store);
        let feed = store.feed_entries().unwrap();
        assert_eq!(feed, vec![("Proposal 1".to_string(), 1)]);
        let msgs = store.notifications_for(1).unwrap();
        assert!(msgs[0].contains("approved"));
    }

    #[test]
    fn rejected_notifies_but_never_publishes() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, &proposal(1, true), &[(1, false)]);

        resolve(&store);
        assert!(store.feed_entries().unwrap().is_empty());
        let msgs = store.notifications_for(1).unwrap();
        assert!(msgs[0].contains("rejected"));
    }

    #[test]
    fn approved_without_auto_publish_skips_feed() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, &proposal(1, false), &[(1, true)]);

        resolve(&store);
        assert!(store.feed_entries().unwrap().is_empty());
        assert_eq!(
            store.proposal_status(1).unwrap(),
            Some(ProposalStatus::Approved)
        );
    }

    #[test]
    fn feed_failure_does_not_undo_transition() {
        struct BrokenFeed;
        impl FeedSink for BrokenFeed {
            fn publish(&self, _: &str, _: &str, _: i64) -> anyhow::Result<()> {
                anyhow::bail!("feed unavailable")
            }
        }

        let store = Store::open_in_memory().unwrap();
        seed(&store, &proposal(1, true), &[(1, true)]);

        let summary = resolve_due_proposals(&store, &BrokenFeed, now()).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(
            store.proposal_status(1).unwrap(),
            Some(ProposalStatus::Approved)
        );
    }

    #[test]
    fn unexpired_proposals_untouched() {
        let store = Store::open_in_memory().unwrap();
        let mut p = proposal(1, false);
        p.expires_at = now() + chrono::Duration::hours(2);
        seed(&store, &p, &[(1, true)]);

        let summary = resolve(&store);
        assert_eq!(summary.processed, 0);
        assert_eq!(store.proposal_status(1).unwrap(), Some(ProposalStatus::Open));
    }
}
