//! The singleton backend configuration stored at `config`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::fields;
use crate::errors::BackendError;
use crate::tfc::{ClientSettings, DEFAULT_ADDRESS, DEFAULT_BASE_PATH};

/// Minimum rotation window accepted alongside a schedule, in seconds.
pub const MIN_ROTATION_WINDOW_SECS: u64 = 3600;

/// Scope of the management token, used by root rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootTokenKind {
    Organization,
    Team,
    User,
}

impl RootTokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RootTokenKind::Organization => "organization",
            RootTokenKind::Team => "team",
            RootTokenKind::User => "user",
        }
    }

    /// Organization tokens are replaced in place by the platform; team and
    /// user tokens accumulate and the superseded one must be deleted.
    pub fn deletes_superseded(self) -> bool {
        matches!(self, RootTokenKind::Team | RootTokenKind::User)
    }

    fn parse(raw: &str) -> Result<Self, BackendError> {
        match raw {
            "organization" | "org" => Ok(RootTokenKind::Organization),
            "team" => Ok(RootTokenKind::Team),
            "user" => Ok(RootTokenKind::User),
            other => Err(BackendError::validation(format!(
                "invalid token_type '{}': must be organization, team, or user",
                other
            ))),
        }
    }
}

impl fmt::Display for RootTokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the superseded management token after root rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OldTokenPolicy {
    #[default]
    Delete,
    Keep,
}

impl OldTokenPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            OldTokenPolicy::Delete => "delete",
            OldTokenPolicy::Keep => "keep",
        }
    }

    fn parse(raw: &str) -> Result<Self, BackendError> {
        match raw {
            "delete" => Ok(OldTokenPolicy::Delete),
            "keep" => Ok(OldTokenPolicy::Keep),
            other => Err(BackendError::validation(format!(
                "invalid old_token '{}': must be delete or keep",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomatedRotationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_schedule: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub rotation_window: u64,
    /// Seconds.
    #[serde(default)]
    pub rotation_period: u64,
    #[serde(default)]
    pub disable_automated_rotation: bool,
}

impl AutomatedRotationParams {
    pub fn is_enabled(&self) -> bool {
        !self.disable_automated_rotation
            && (self.rotation_schedule.is_some() || self.rotation_period > 0)
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        if self.rotation_schedule.is_some() && self.rotation_period > 0 {
            return Err(BackendError::validation(
                "rotation_schedule and rotation_period are mutually exclusive",
            ));
        }
        if self.rotation_window > 0 {
            if self.rotation_schedule.is_none() {
                return Err(BackendError::validation(
                    "rotation_window requires rotation_schedule",
                ));
            }
            if self.rotation_window < MIN_ROTATION_WINDOW_SECS {
                return Err(BackendError::validation(format!(
                    "rotation_window must be at least {} seconds",
                    MIN_ROTATION_WINDOW_SECS
                )));
            }
        }
        if let Some(schedule) = &self.rotation_schedule {
            validate_cron(schedule)?;
        }
        Ok(())
    }

    fn write_response(&self, data: &mut Map<String, Value>) {
        data.insert(
            "rotation_schedule".into(),
            json!(self.rotation_schedule.clone().unwrap_or_default()),
        );
        data.insert("rotation_window".into(), json!(self.rotation_window));
        data.insert("rotation_period".into(), json!(self.rotation_period));
        data.insert(
            "disable_automated_rotation".into(),
            json!(self.disable_automated_rotation),
        );
    }
}

/// Parse a standard 5-field cron expression. Seconds are pinned to zero.
pub fn parse_rotation_schedule(expr: &str) -> Result<cron::Schedule, String> {
    let expr = expr.trim();
    let fields = expr.split_whitespace().count();
    if fields != 5 {
        return Err(format!("expected 5 fields, got {}", fields));
    }
    cron::Schedule::from_str(&format!("0 {}", expr)).map_err(|e| e.to_string())
}

fn validate_cron(expr: &str) -> Result<(), BackendError> {
    parse_rotation_schedule(expr)
        .map(|_| ())
        .map_err(|e| BackendError::validation(format!("invalid rotation_schedule '{}': {}", expr, e)))
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<RootTokenKind>,
    /// Organization name, team id, or user id the management token belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(default)]
    pub old_token: OldTokenPolicy,
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(flatten)]
    pub rotation: AutomatedRotationParams,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("id", &self.id)
            .field("token_id", &self.token_id)
            .field("old_token", &self.old_token)
            .field("address", &self.address)
            .field("base_path", &self.base_path)
            .field("rotation", &self.rotation)
            .finish()
    }
}

impl BackendConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_type: None,
            id: None,
            token_id: None,
            old_token: OldTokenPolicy::Delete,
            address: default_address(),
            base_path: default_base_path(),
            rotation: AutomatedRotationParams::default(),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            address: self.address.clone(),
            base_path: self.base_path.clone(),
            token: self.token.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        if self.token.trim().is_empty() {
            return Err(BackendError::validation("token is required"));
        }
        if self.token_type.is_some() != self.id.is_some() {
            return Err(BackendError::validation(
                "token_type and id must be provided together",
            ));
        }
        self.rotation.validate()?;
        if self.rotation.is_enabled() && (self.token_type.is_none() || self.id.is_none()) {
            return Err(BackendError::validation(
                "token_type and id are required when automated rotation is configured",
            ));
        }
        Ok(())
    }

    /// Fields returned by `config` reads. The token itself is never returned.
    pub fn to_response_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("address".into(), json!(self.address));
        data.insert("base_path".into(), json!(self.base_path));
        data.insert("old_token".into(), json!(self.old_token.as_str()));
        data.insert(
            "token_type".into(),
            json!(self.token_type.map(|k| k.as_str()).unwrap_or_default()),
        );
        data.insert("id".into(), json!(self.id.clone().unwrap_or_default()));
        data.insert(
            "token_id".into(),
            json!(self.token_id.clone().unwrap_or_default()),
        );
        self.rotation.write_response(&mut data);
        data
    }
}

/// Fields accepted by a `config` write.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigInput {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub old_token: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub base_path: Option<String>,
    #[serde(default)]
    pub rotation_schedule: Option<String>,
    #[serde(default, deserialize_with = "fields::opt_duration")]
    pub rotation_window: Option<u64>,
    #[serde(default, deserialize_with = "fields::opt_duration")]
    pub rotation_period: Option<u64>,
    #[serde(default)]
    pub disable_automated_rotation: Option<bool>,
}

fn non_empty(v: String) -> Option<String> {
    let trimmed = v.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl ConfigInput {
    pub fn from_data(data: &Map<String, Value>) -> Result<Self, BackendError> {
        serde_json::from_value(Value::Object(data.clone()))
            .map_err(|e| BackendError::validation(format!("invalid config fields: {}", e)))
    }

    /// Merge onto the stored config. `creating` starts from defaults when
    /// nothing is stored; an update requires an existing config.
    pub fn apply(
        self,
        existing: Option<BackendConfig>,
        creating: bool,
    ) -> Result<BackendConfig, BackendError> {
        let mut cfg = match existing {
            Some(cfg) => cfg,
            None if creating => BackendConfig::new(String::new()),
            None => {
                return Err(BackendError::NotFound(
                    "config not found during update operation".into(),
                ))
            }
        };

        if let Some(token) = self.token {
            if token != cfg.token {
                // id of the previous token no longer applies
                cfg.token_id = None;
            }
            cfg.token = token;
        }
        if let Some(token_id) = self.token_id {
            cfg.token_id = non_empty(token_id);
        }
        if let Some(raw) = self.token_type {
            cfg.token_type = match non_empty(raw) {
                Some(raw) => Some(RootTokenKind::parse(&raw)?),
                None => None,
            };
        }
        if let Some(id) = self.id {
            cfg.id = non_empty(id);
        }
        if let Some(raw) = self.old_token {
            cfg.old_token = match non_empty(raw) {
                Some(raw) => OldTokenPolicy::parse(&raw)?,
                None => OldTokenPolicy::default(),
            };
        }
        if let Some(address) = self.address {
            cfg.address = non_empty(address).unwrap_or_else(default_address);
        }
        if let Some(base_path) = self.base_path {
            cfg.base_path = non_empty(base_path).unwrap_or_else(default_base_path);
        }
        if let Some(schedule) = self.rotation_schedule {
            cfg.rotation.rotation_schedule = non_empty(schedule);
        }
        if let Some(window) = self.rotation_window {
            cfg.rotation.rotation_window = window;
        }
        if let Some(period) = self.rotation_period {
            cfg.rotation.rotation_period = period;
        }
        if let Some(disable) = self.disable_automated_rotation {
            cfg.rotation.disable_automated_rotation = disable;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}
