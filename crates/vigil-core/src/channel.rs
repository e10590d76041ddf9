//! Channel Dispatcher — fans a rendered message out to the requested
//! delivery channels, tolerating per-channel failure independently.
//!
//! A channel is `skipped` (not attempted) when the subject has not opted in,
//! lacks the required contact attribute, or the channel is disabled by
//! configuration; `failed` means the attempt itself went wrong. The in-app
//! channel writes a durable notification row and is the minimum
//! guaranteed-visible channel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EscalationConfig;
use crate::error::{Result, VigilError};
use crate::store::Store;
use crate::subject::Subject;
use crate::types::Channel;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered,
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub channel: Channel,
    #[serde(flatten)]
    pub outcome: ChannelOutcome,
}

impl ChannelReport {
    pub fn delivered(&self) -> bool {
        self.outcome == ChannelOutcome::Delivered
    }
}

// ---------------------------------------------------------------------------
// Gateway client
// ---------------------------------------------------------------------------

/// Messaging-gateway collaborator (WhatsApp-style transport). Best-effort:
/// called with a bounded timeout, and a non-2xx response becomes a `Failed`
/// outcome carrying the response body — never an `Err`.
pub struct Gateway {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl Gateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VigilError::Gateway(format!("client build failed: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// POST a plain-text message to the gateway. The phone number is
    /// normalized to digits before transmission.
    pub fn send_text(&self, phone: &str, message: &str) -> ChannelOutcome {
        let to = normalize_phone(phone);
        if to.is_empty() {
            return ChannelOutcome::Skipped {
                reason: "no usable phone number".to_string(),
            };
        }

        let url = format!("{}/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "to": to, "body": message }))
            .send();

        match resp {
            Ok(r) if r.status().is_success() => ChannelOutcome::Delivered,
            Ok(r) => {
                let status = r.status();
                let body = r.text().unwrap_or_default();
                ChannelOutcome::Failed {
                    error: format!("gateway returned {status}: {body}"),
                }
            }
            Err(e) => ChannelOutcome::Failed {
                error: format!("gateway request failed: {e}"),
            },
        }
    }
}

/// Strip everything but digits — the gateway's normalization contract.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Send `message` to `subject` through each requested channel. Channels are
/// independent: one failing never prevents the others from being attempted.
/// Infallible by design — store errors on the in-app channel degrade to a
/// `Failed` outcome for that channel.
pub fn dispatch(
    store: &Store,
    gateway: Option<&Gateway>,
    subject: &Subject,
    message: &str,
    requested: &[Channel],
    cfg: &EscalationConfig,
    at: DateTime<Utc>,
) -> Vec<ChannelReport> {
    requested
        .iter()
        .map(|&channel| {
            let outcome = match channel {
                Channel::InApp => send_in_app(store, subject, message, cfg, at),
                Channel::Gateway => send_gateway(gateway, subject, message, cfg),
            };
            if let ChannelOutcome::Failed { error } = &outcome {
                tracing::warn!(subject = subject.id, %channel, error = %error, "channel delivery failed");
            }
            ChannelReport { channel, outcome }
        })
        .collect()
}

fn send_in_app(
    store: &Store,
    subject: &Subject,
    message: &str,
    cfg: &EscalationConfig,
    at: DateTime<Utc>,
) -> ChannelOutcome {
    if !cfg.in_app_enabled {
        return ChannelOutcome::Skipped {
            reason: "channel disabled by configuration".to_string(),
        };
    }
    match store.insert_notification(subject.id, message, at) {
        Ok(_) => ChannelOutcome::Delivered,
        Err(e) => ChannelOutcome::Failed {
            error: format!("notification insert failed: {e}"),
        },
    }
}

fn send_gateway(
    gateway: Option<&Gateway>,
    subject: &Subject,
    message: &str,
    cfg: &EscalationConfig,
) -> ChannelOutcome {
    if !cfg.gateway_enabled {
        return ChannelOutcome::Skipped {
            reason: "channel disabled by configuration".to_string(),
        };
    }
    if !subject.gateway_opt_in {
        return ChannelOutcome::Skipped {
            reason: "subject not opted in".to_string(),
        };
    }
    let Some(phone) = subject.phone.as_deref() else {
        return ChannelOutcome::Skipped {
            reason: "no phone number on record".to_string(),
        };
    };
    let Some(gw) = gateway else {
        return ChannelOutcome::Skipped {
            reason: "gateway not configured".to_string(),
        };
    };
    gw.send_text(phone, message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
