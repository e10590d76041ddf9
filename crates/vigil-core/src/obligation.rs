use crate::subject::Subject;
use crate::types::ObligationId;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Audience
// ---------------------------------------------------------------------------

/// Applicability predicate of an obligation. Stored as tagged JSON in the
/// obligations table so the authoring collaborator can extend it without a
/// schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Audience {
    All,
    Role { role: String },
    Unit { unit: String },
}

impl Audience {
    /// Whether the obligation applies to `subject`. `None` means the
    /// predicate cannot be evaluated because the subject is missing the
    /// required attribute — callers exclude such subjects and log, rather
    /// than failing the whole run.
    pub fn applies_to(&self, subject: &Subject) -> Option<bool> {
        match self {
            Audience::All => Some(true),
            Audience::Role { role } => subject.role.as_deref().map(|r| r == role),
            Audience::Unit { unit } => subject.unit_code.as_deref().map(|u| u == unit),
        }
    }
}

// ---------------------------------------------------------------------------
// Obligation
// ---------------------------------------------------------------------------

/// A rule a subject must satisfy. Read-only to this engine; created and
/// edited by the authoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: ObligationId,
    pub title: String,
    pub audience: Audience,
    /// Fixed daily time-of-day deadline. `None` means persistence-based:
    /// the obligation must be satisfied before continued use, with no
    /// time window.
    pub deadline: Option<NaiveTime>,
    pub active: bool,
}

impl Obligation {
    pub fn is_deadline_based(&self) -> bool {
        self.deadline.is_some()
    }

    /// Path of the fulfillment page the compliance gate funnels to.
    pub fn fulfillment_path(&self) -> String {
        format!("/obligations/{}/fulfill", self.id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
