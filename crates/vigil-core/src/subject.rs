use crate::types::SubjectId;
use serde::{Deserialize, Serialize};

/// A user or organizational-unit member. Owned by the identity collaborator;
/// read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub display_name: String,
    pub phone: Option<String>,
    /// Opt-in flag for the external messaging-gateway channel.
    pub gateway_opt_in: bool,
    pub role: Option<String>,
    pub unit_code: Option<String>,
    pub active: bool,
}
