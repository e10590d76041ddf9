//! Per-run escalation configuration.
//!
//! Loaded fresh from the settings table at the start of every scheduler run
//! and discarded at the end — nothing is cached across invocations, so an
//! operator flipping a flag takes effect on the next trigger. Unknown or
//! malformed values fall back to their explicit default and are logged;
//! only a failure to read the settings table at all aborts the run.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;
use crate::store::Store;

// Settings keys consumed by the engine.
pub const KEY_IN_APP_ENABLED: &str = "channel.in_app.enabled";
pub const KEY_GATEWAY_ENABLED: &str = "channel.gateway.enabled";
pub const KEY_GATEWAY_URL: &str = "channel.gateway.url";
pub const KEY_GATEWAY_TIMEOUT_SECS: &str = "channel.gateway.timeout_secs";
pub const KEY_MAX_REMINDERS: &str = "max_reminders";
pub const KEY_QUORUM_PERCENT: &str = "quorum.percent";
pub const KEY_GATE_ENABLED: &str = "gate.enabled";
pub const KEY_ESCALATION_ROLES: &str = "escalation.roles";
pub const KEY_UTC_OFFSET_MINUTES: &str = "utc_offset_minutes";

#[derive(Debug, Clone, Serialize)]
pub struct EscalationConfig {
    pub in_app_enabled: bool,
    pub gateway_enabled: bool,
    pub gateway_url: Option<String>,
    pub gateway_timeout_secs: u64,
    /// Hard cap on alert records per (obligation, target) pair, across all
    /// periods. Enforced by the ledger before dispatch.
    pub max_reminders: u32,
    /// Approval percentage a proposal must reach at expiry.
    pub quorum_percent: u32,
    /// Global block-switch for the compliance gate.
    pub gate_enabled: bool,
    /// Roles that receive unit-level deadline escalations.
    pub escalation_roles: Vec<String>,
    /// Offset applied to UTC when deriving the local alerting period.
    pub utc_offset_minutes: i64,
}

fn default_max_reminders() -> u32 {
    3
}

fn default_quorum_percent() -> u32 {
    50
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_escalation_roles() -> Vec<String> {
    vec!["curator".to_string()]
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            in_app_enabled: true,
            gateway_enabled: false,
            gateway_url: None,
            gateway_timeout_secs: default_gateway_timeout_secs(),
            max_reminders: default_max_reminders(),
            quorum_percent: default_quorum_percent(),
            gate_enabled: false,
            escalation_roles: default_escalation_roles(),
            utc_offset_minutes: 0,
        }
    }
}

impl EscalationConfig {
    /// Read the configuration from the settings table. Missing keys take
    /// their defaults; malformed values fail closed to the default and are
    /// logged for operator visibility.
    pub fn load(store: &Store) -> Result<Self> {
        let raw = store.settings()?;
        let mut cfg = Self::default();

        cfg.in_app_enabled = parse_bool(&raw, KEY_IN_APP_ENABLED, cfg.in_app_enabled);
        cfg.gateway_enabled = parse_bool(&raw, KEY_GATEWAY_ENABLED, cfg.gateway_enabled);
        cfg.gateway_url = raw
            .get(KEY_GATEWAY_URL)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        cfg.gateway_timeout_secs =
            parse_num(&raw, KEY_GATEWAY_TIMEOUT_SECS, cfg.gateway_timeout_secs);
        cfg.max_reminders = parse_num(&raw, KEY_MAX_REMINDERS, cfg.max_reminders);
        cfg.quorum_percent = parse_num(&raw, KEY_QUORUM_PERCENT, cfg.quorum_percent);
        cfg.gate_enabled = parse_bool(&raw, KEY_GATE_ENABLED, cfg.gate_enabled);
        cfg.utc_offset_minutes = parse_num(&raw, KEY_UTC_OFFSET_MINUTES, cfg.utc_offset_minutes);
        if let Some(roles) = raw.get(KEY_ESCALATION_ROLES) {
            let parsed: Vec<String> = roles
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
            if parsed.is_empty() {
                tracing::warn!(
                    key = KEY_ESCALATION_ROLES,
                    value = %roles,
                    "empty escalation role list, keeping default"
                );
            } else {
                cfg.escalation_roles = parsed;
            }
        }

        if cfg.quorum_percent > 100 {
            tracing::warn!(
                value = cfg.quorum_percent,
                "quorum percentage above 100, clamping"
            );
            cfg.quorum_percent = 100;
        }

        Ok(cfg)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }
}

fn parse_bool(raw: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match raw.get(key).map(String::as_str) {
        None => default,
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(other) => {
            tracing::warn!(key, value = other, "malformed boolean setting, using default");
            default
        }
    }
}

fn parse_num<T: std::str::FromStr + Copy>(
    raw: &HashMap<String, String>,
    key: &str,
    default: T,
) -> T {
    match raw.get(key) {
        None => default,
        Some(v) => match v.trim().parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(key, value = %v, "malformed numeric setting, using default");
                default
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_yield_defaults() {
        let store = Store::open_in_memory().unwrap();
        let cfg = EscalationConfig::load(&store).unwrap();
        assert!(cfg.in_app_enabled);
        assert!(!cfg.gateway_enabled);
        assert_eq!(cfg.max_reminders, 3);
        assert_eq!(cfg.quorum_percent, 50);
        assert!(!cfg.gate_enabled);
        assert_eq!(cfg.escalation_roles, vec!["curator"]);
        assert_eq!(cfg.utc_offset_minutes, 0);
    }

    #[test]
    fn settings_override_defaults() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting(KEY_GATEWAY_ENABLED, "true").unwrap();
        store.set_setting(KEY_GATEWAY_URL, "http://gw.local").unwrap();
        store.set_setting(KEY_MAX_REMINDERS, "5").unwrap();
        store.set_setting(KEY_QUORUM_PERCENT, "80").unwrap();
        store.set_setting(KEY_ESCALATION_ROLES, "curator, supervisor").unwrap();
        store.set_setting(KEY_UTC_OFFSET_MINUTES, "-180").unwrap();

        let cfg = EscalationConfig::load(&store).unwrap();
        assert!(cfg.gateway_enabled);
        assert_eq!(cfg.gateway_url.as_deref(), Some("http://gw.local"));
        assert_eq!(cfg.max_reminders, 5);
        assert_eq!(cfg.quorum_percent, 80);
        assert_eq!(cfg.escalation_roles, vec!["curator", "supervisor"]);
        assert_eq!(cfg.utc_offset_minutes, -180);
    }

    #[test]
    fn malformed_values_fail_closed_to_defaults() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting(KEY_MAX_REMINDERS, "many").unwrap();
        store.set_setting(KEY_GATE_ENABLED, "yes please").unwrap();
        store.set_setting(KEY_GATEWAY_URL, "   ").unwrap();

        let cfg = EscalationConfig::load(&store).unwrap();
        assert_eq!(cfg.max_reminders, 3);
        assert!(!cfg.gate_enabled);
        assert!(cfg.gateway_url.is_none());
    }

    #[test]
    fn quorum_percent_clamped_to_100() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting(KEY_QUORUM_PERCENT, "250").unwrap();
        let cfg = EscalationConfig::load(&store).unwrap();
        assert_eq!(cfg.quorum_percent, 100);
    }
}
