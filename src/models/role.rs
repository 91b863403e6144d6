//! Role entries: named templates describing which remote token to mint.
//!
//! Validation here is pure. Minting the singleton token for organization and
//! legacy-team roles is done by the role-write handler after validation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::fields;
use crate::errors::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Organization,
    Team,
    TeamLegacy,
    User,
    DynamicTeam,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 5] = [
        CredentialKind::Organization,
        CredentialKind::Team,
        CredentialKind::TeamLegacy,
        CredentialKind::User,
        CredentialKind::DynamicTeam,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::Organization => "organization",
            CredentialKind::Team => "team",
            CredentialKind::TeamLegacy => "team_legacy",
            CredentialKind::User => "user",
            CredentialKind::DynamicTeam => "dynamic_team",
        }
    }

    /// The remote resource holds exactly one live token; minting a new one
    /// invalidates the previous. These roles mint at write time and hand out
    /// the cached token on every read.
    pub fn is_singleton(self) -> bool {
        matches!(self, CredentialKind::Organization | CredentialKind::TeamLegacy)
    }

    /// Whether the identifiers on `entry` have the shape this kind needs.
    fn fits(self, entry: &RoleEntry) -> bool {
        let org = entry.organization.is_some();
        let team = entry.team_id.is_some();
        let user = entry.user_id.is_some();
        let opts = entry.team_options.is_some();
        match self {
            CredentialKind::Organization => org && !team && !user && !opts,
            CredentialKind::Team | CredentialKind::TeamLegacy => team && !user && !opts,
            CredentialKind::User => user && !org && !team && !opts,
            CredentialKind::DynamicTeam => org && opts && !team && !user,
        }
    }

    /// Infer a kind from which identifiers are present.
    fn infer(entry: &RoleEntry) -> Result<Self, BackendError> {
        let org = entry.organization.is_some();
        let team = entry.team_id.is_some();
        let user = entry.user_id.is_some();
        match (org, team, user) {
            (_, _, true) if org || team => Err(conflicting_user_id()),
            (_, _, true) => Ok(CredentialKind::User),
            (_, true, _) => Ok(CredentialKind::TeamLegacy),
            (true, _, _) => Ok(CredentialKind::Organization),
            _ => Err(missing_identifier()),
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" | "org" => Ok(CredentialKind::Organization),
            "team" => Ok(CredentialKind::Team),
            "team_legacy" => Ok(CredentialKind::TeamLegacy),
            "user" => Ok(CredentialKind::User),
            "dynamic_team" => Ok(CredentialKind::DynamicTeam),
            other => Err(BackendError::validation(format!(
                "unrecognized credential type: {}",
                other
            ))),
        }
    }
}

fn conflicting_user_id() -> BackendError {
    BackendError::validation("cannot provide a user_id in combination with organization or team_id")
}

fn missing_identifier() -> BackendError {
    BackendError::validation("must provide an organization name, team id, or user id")
}

/// Settings for the ephemeral team a `dynamic_team` role creates per read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamOptions {
    /// Team names are `<prefix>-<random suffix>`; defaults to the role name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
    /// `secret` or `organization`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub organization_access: BTreeMap<String, bool>,
}

impl TeamOptions {
    fn validate(&self) -> Result<(), BackendError> {
        if let Some(v) = &self.visibility {
            if v != "secret" && v != "organization" {
                return Err(BackendError::validation(format!(
                    "invalid team_options.visibility '{}': must be 'secret' or 'organization'",
                    v
                )));
            }
        }
        if let Some(prefix) = &self.name_prefix {
            let ok = !prefix.is_empty()
                && prefix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !ok {
                return Err(BackendError::validation(format!(
                    "invalid team_options.name_prefix '{}'",
                    prefix
                )));
            }
        }
        Ok(())
    }
}

/// A persisted role, stored at `role/<name>`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub name: String,
    #[serde(rename = "token_type", alias = "credential_type")]
    pub kind: CredentialKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_options: Option<TeamOptions>,
    /// Lease TTL in seconds; 0 defers to the host default.
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub max_ttl: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Cached live token, singleton kinds only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl fmt::Debug for RoleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("organization", &self.organization)
            .field("team_id", &self.team_id)
            .field("user_id", &self.user_id)
            .field("team_options", &self.team_options)
            .field("ttl", &self.ttl)
            .field("max_ttl", &self.max_ttl)
            .field("description", &self.description)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_id", &self.token_id)
            .finish()
    }
}

impl RoleEntry {
    pub fn new(name: impl Into<String>, kind: CredentialKind) -> Self {
        Self {
            name: name.into(),
            kind,
            organization: None,
            team_id: None,
            user_id: None,
            team_options: None,
            ttl: 0,
            max_ttl: 0,
            description: None,
            token: None,
            token_id: None,
        }
    }

    pub fn storage_key(name: &str) -> String {
        format!("{}{}", crate::store::ROLE_PREFIX, name)
    }

    /// Check the entry against the rules for its kind.
    pub fn validate(&self) -> Result<(), BackendError> {
        let org = self.organization.is_some();
        let team = self.team_id.is_some();
        let user = self.user_id.is_some();

        if user && (org || team) {
            return Err(conflicting_user_id());
        }
        if !org && !team && !user {
            return Err(missing_identifier());
        }

        match self.kind {
            CredentialKind::Organization => {
                if !org {
                    return Err(BackendError::validation(
                        "organization is required for credential_type organization",
                    ));
                }
                if team {
                    return Err(BackendError::validation(
                        "cannot provide team_id with credential_type organization; use team or team_legacy",
                    ));
                }
            }
            CredentialKind::Team | CredentialKind::TeamLegacy => {
                if !team {
                    return Err(BackendError::validation(format!(
                        "team_id is required for credential_type {}",
                        self.kind
                    )));
                }
            }
            CredentialKind::User => {
                if !user {
                    return Err(BackendError::validation(
                        "user_id is required for credential_type user",
                    ));
                }
            }
            CredentialKind::DynamicTeam => {
                if !org {
                    return Err(BackendError::validation(
                        "organization is required for credential_type dynamic_team",
                    ));
                }
                if team {
                    return Err(BackendError::validation(
                        "cannot provide team_id with credential_type dynamic_team",
                    ));
                }
                if self.team_options.is_none() {
                    return Err(BackendError::validation(
                        "team_options is required for credential_type dynamic_team",
                    ));
                }
            }
        }

        if let Some(opts) = &self.team_options {
            if self.kind != CredentialKind::DynamicTeam {
                return Err(BackendError::validation(
                    "team_options can only be used with credential_type dynamic_team",
                ));
            }
            opts.validate()?;
        }

        let now = Utc::now();
        offset_from(now, self.ttl, "ttl")?;
        self.token_expiry(now)?;

        if self.max_ttl != 0 && self.ttl > self.max_ttl {
            return Err(BackendError::validation("ttl cannot be greater than max_ttl"));
        }

        if self.kind == CredentialKind::TeamLegacy
            && (self.description.is_some() || self.ttl != 0 || self.max_ttl != 0)
        {
            return Err(BackendError::validation(
                "cannot provide description, ttl, or max_ttl with credential_type = team_legacy, try credential_type = team.",
            ));
        }

        Ok(())
    }

    /// Expiry stamped on tokens minted from this role. `None` when `max_ttl` is unset.
    pub fn token_expiry(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, BackendError> {
        if self.max_ttl == 0 {
            return Ok(None);
        }
        offset_from(now, self.max_ttl, "max_ttl").map(Some)
    }

    /// Read-only projection returned by `role/<name>` reads. Never includes the token.
    pub fn to_response_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("name".into(), json!(self.name));
        data.insert("token_type".into(), json!(self.kind.as_str()));
        data.insert("ttl".into(), json!(self.ttl));
        data.insert("max_ttl".into(), json!(self.max_ttl));
        if let Some(org) = &self.organization {
            data.insert("organization".into(), json!(org));
        }
        if let Some(team) = &self.team_id {
            data.insert("team_id".into(), json!(team));
        }
        if let Some(user) = &self.user_id {
            data.insert("user_id".into(), json!(user));
        }
        if let Some(opts) = &self.team_options {
            data.insert("team_options".into(), json!(opts));
        }
        if let Some(desc) = &self.description {
            data.insert("description".into(), json!(desc));
        }
        data
    }
}

fn offset_from(now: DateTime<Utc>, secs: u64, field: &str) -> Result<DateTime<Utc>, BackendError> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            BackendError::validation(format!("{} of {} seconds is out of range", field, secs))
        })
}

/// Fields accepted by a role write. `None` means the field was not supplied;
/// `Some("")` clears a string field.
#[derive(Debug, Default, Deserialize)]
pub struct RoleInput {
    #[serde(default, alias = "token_type")]
    pub credential_type: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "fields::opt_duration")]
    pub ttl: Option<u64>,
    #[serde(default, deserialize_with = "fields::opt_duration")]
    pub max_ttl: Option<u64>,
    #[serde(default)]
    pub team_options: Option<TeamOptions>,
}

fn merge_string(slot: &mut Option<String>, incoming: Option<String>) {
    match incoming {
        Some(v) if v.trim().is_empty() => *slot = None,
        Some(v) => *slot = Some(v),
        None => {}
    }
}

impl RoleInput {
    pub fn from_data(data: &Map<String, Value>) -> Result<Self, BackendError> {
        let mut data = data.clone();
        // the name comes from the path
        data.remove("name");
        serde_json::from_value(Value::Object(data))
            .map_err(|e| BackendError::validation(format!("invalid role fields: {}", e)))
    }

    /// Merge into `existing` (or a fresh entry) and validate. Performs no I/O.
    ///
    /// Kind resolution: an explicit `credential_type` wins; otherwise the
    /// stored kind is kept while the identifiers still fit it; otherwise the
    /// kind is inferred from which identifiers are present.
    pub fn apply(self, name: &str, existing: Option<RoleEntry>) -> Result<RoleEntry, BackendError> {
        let explicit = self
            .credential_type
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<CredentialKind>)
            .transpose()?;

        let prior = existing.as_ref().map(|e| e.kind);
        let mut entry = existing.unwrap_or_else(|| RoleEntry::new(name, CredentialKind::Organization));
        entry.name = name.to_string();

        merge_string(&mut entry.organization, self.organization);
        merge_string(&mut entry.team_id, self.team_id);
        merge_string(&mut entry.user_id, self.user_id);
        merge_string(&mut entry.description, self.description);
        if let Some(opts) = self.team_options {
            entry.team_options = Some(opts);
        }
        if let Some(ttl) = self.ttl {
            entry.ttl = ttl;
        }
        if let Some(max_ttl) = self.max_ttl {
            entry.max_ttl = max_ttl;
        }

        entry.kind = match (explicit, prior) {
            (Some(kind), _) => kind,
            (None, Some(kind)) if kind.fits(&entry) => kind,
            _ => CredentialKind::infer(&entry)?,
        };

        entry.validate()?;

        if !entry.kind.is_singleton() {
            entry.token = None;
            entry.token_id = None;
        }

        Ok(entry)
    }
}
