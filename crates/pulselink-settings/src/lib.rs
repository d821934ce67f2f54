//! Configuration for the relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. Compiled defaults — [`RelaySettings::default()`]
//! 2. JSON file — deep-merged over the defaults
//! 3. Environment variables — `RELAY_*` overrides (highest priority)
//!
//! A missing file is not an error (defaults apply); a malformed file or an
//! unparsable override is, and configuration failure is the only error that
//! is fatal at the process level.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Settings record consumed by the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelaySettings {
    /// Public host name, embedded in the binding QR URI and the home page.
    pub host_name: String,
    /// Listen port, also embedded in the QR URI.
    pub port: u16,
    /// Emit `wss` instead of `ws` in the QR URI.
    pub use_secure_websocket: bool,
    /// Accept IP-derived identity as a fallback address and reject duplicate
    /// registrations from the same derived identity.
    pub allow_insecure_client_id: bool,
    /// Idle TTL for request-response sessions, refreshed by heartbeats.
    pub http_session_ttl_secs: u64,
    /// Per-session outbound queue depth.
    pub max_send_queue: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_owned(),
            port: 8920,
            use_secure_websocket: false,
            allow_insecure_client_id: false,
            http_session_ttl_secs: 300,
            max_send_queue: 256,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid settings value: {0}")]
    Invalid(String),
    #[error("environment override {name} is not valid: {value}")]
    EnvOverride { name: String, value: String },
}

/// Recursively merge `overlay` into `base`; overlay values win, objects merge
/// key by key.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from a JSON file, deep-merged over defaults, with `RELAY_*`
/// environment overrides applied last.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings, SettingsError> {
    let mut merged = serde_json::to_value(RelaySettings::default())
        .map_err(|e| SettingsError::Invalid(e.to_string()))?;

    if path.exists() {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let overlay: Value =
            serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        merged = deep_merge(merged, overlay);
    } else {
        tracing::info!(path = %path.display(), "settings file not found, using defaults");
    }

    let mut settings: RelaySettings =
        serde_json::from_value(merged).map_err(|e| SettingsError::Invalid(e.to_string()))?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok())?;
    Ok(settings)
}

/// Apply `RELAY_*` overrides from an environment lookup. Split out from the
/// loader so tests can inject variables without touching the process env.
fn apply_env_overrides<F>(settings: &mut RelaySettings, env: F) -> Result<(), SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = env("RELAY_HOST_NAME") {
        settings.host_name = v;
    }
    if let Some(v) = env("RELAY_PORT") {
        settings.port = parse_override("RELAY_PORT", &v)?;
    }
    if let Some(v) = env("RELAY_USE_SECURE_WEBSOCKET") {
        settings.use_secure_websocket = parse_bool("RELAY_USE_SECURE_WEBSOCKET", &v)?;
    }
    if let Some(v) = env("RELAY_ALLOW_INSECURE_CLIENT_ID") {
        settings.allow_insecure_client_id = parse_bool("RELAY_ALLOW_INSECURE_CLIENT_ID", &v)?;
    }
    if let Some(v) = env("RELAY_HTTP_SESSION_TTL_SECS") {
        settings.http_session_ttl_secs = parse_override("RELAY_HTTP_SESSION_TTL_SECS", &v)?;
    }
    if let Some(v) = env("RELAY_MAX_SEND_QUEUE") {
        settings.max_send_queue = parse_override("RELAY_MAX_SEND_QUEUE", &v)?;
    }
    Ok(())
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, SettingsError> {
    value.parse().map_err(|_| SettingsError::EnvOverride {
        name: name.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, SettingsError> {
    match value {
        "1" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(SettingsError::EnvOverride {
            name: name.to_owned(),
            value: value.to_owned(),
        }),
    }
}
