use crate::error::{Result, VigilError};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type ObligationId = i64;
pub type SubjectId = i64;
pub type ProposalId = i64;

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// One notification transport with independent enablement, opt-in and
/// failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Durable in-app notification row — the minimum guaranteed-visible channel.
    InApp,
    /// External messaging gateway (WhatsApp-style transport).
    Gateway,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::InApp => f.write_str("in_app"),
            Channel::Gateway => f.write_str("gateway"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = VigilError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_app" => Ok(Channel::InApp),
            "gateway" => Ok(Channel::Gateway),
            _ => Err(VigilError::Config(format!(
                "unknown channel '{s}': must be in_app or gateway"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// AlertTarget
// ---------------------------------------------------------------------------

/// The party an alert record is keyed on. Deadline rules escalate at unit
/// granularity; persistence rules escalate per subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlertTarget {
    Unit(String),
    Subject(SubjectId),
}

impl std::fmt::Display for AlertTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertTarget::Unit(code) => write!(f, "unit:{code}"),
            AlertTarget::Subject(id) => write!(f, "subject:{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Period
// ---------------------------------------------------------------------------

/// One alerting period: a calendar day local to the evaluation timestamp.
/// Alert dedup and deadline fulfillment checks are both keyed on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period(pub NaiveDate);

impl Period {
    /// Period for `at`, shifted by the configured UTC offset in minutes.
    pub fn of(at: DateTime<Utc>, utc_offset_minutes: i64) -> Self {
        Period((at + Duration::minutes(utc_offset_minutes)).date_naive())
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn channel_display_fromstr_roundtrip() {
        for ch in [Channel::InApp, Channel::Gateway] {
            let parsed: Channel = ch.to_string().parse().unwrap();
            assert_eq!(parsed, ch);
        }
    }

    #[test]
    fn unknown_channel_rejected() {
        let err = "pigeon".parse::<Channel>().unwrap_err();
        assert!(matches!(err, VigilError::Config(_)));
    }

    #[test]
    fn alert_target_display_is_prefixed() {
        assert_eq!(AlertTarget::Unit("3A".into()).to_string(), "unit:3A");
        assert_eq!(AlertTarget::Subject(7).to_string(), "subject:7");
    }

    #[test]
    fn period_respects_utc_offset() {
        // 23:30 UTC on Jan 1 is already Jan 2 at UTC+1.
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        assert_eq!(Period::of(at, 0).to_string(), "2024-01-01");
        assert_eq!(Period::of(at, 60).to_string(), "2024-01-02");
        assert_eq!(Period::of(at, -60).to_string(), "2024-01-01");
    }
}
