//! JSON:API wire documents exchanged with the platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{Team, TeamCreateOptions, TerraformToken, TokenCreateOptions};

#[derive(Debug, Deserialize)]
pub struct Document<T> {
    pub data: Resource<T>,
}

#[derive(Debug, Deserialize)]
pub struct Resource<T> {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub attributes: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenAttributes {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TeamAttributes {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorDocument {
    #[serde(default)]
    pub errors: Vec<ErrorObject>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ErrorObject {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorDocument {
    /// First human-readable message, preferring `detail` over `title`.
    pub fn message(&self) -> Option<String> {
        self.errors
            .iter()
            .find_map(|e| e.detail.clone().or_else(|| e.title.clone()))
    }
}

impl From<Resource<TokenAttributes>> for TerraformToken {
    fn from(r: Resource<TokenAttributes>) -> Self {
        TerraformToken {
            id: r.id,
            description: r.attributes.description,
            token: r.attributes.token.unwrap_or_default(),
            expired_at: r.attributes.expired_at,
        }
    }
}

impl From<Resource<TeamAttributes>> for Team {
    fn from(r: Resource<TeamAttributes>) -> Self {
        Team { id: r.id, name: r.attributes.name }
    }
}

pub fn token_request(opts: &TokenCreateOptions) -> Value {
    let mut attributes = Map::new();
    if let Some(desc) = &opts.description {
        attributes.insert("description".into(), json!(desc));
    }
    if let Some(exp) = &opts.expired_at {
        attributes.insert("expired-at".into(), json!(exp.to_rfc3339()));
    }
    json!({
        "data": {
            "type": "authentication-tokens",
            "attributes": attributes,
        }
    })
}

pub fn team_request(opts: &TeamCreateOptions) -> Value {
    let mut attributes = Map::new();
    attributes.insert("name".into(), json!(opts.name));
    if let Some(visibility) = &opts.visibility {
        attributes.insert("visibility".into(), json!(visibility));
    }
    if !opts.organization_access.is_empty() {
        // platform expects kebab-case access flags
        let access: Map<String, Value> = opts
            .organization_access
            .iter()
            .map(|(k, v)| (k.replace('_', "-"), json!(v)))
            .collect();
        attributes.insert("organization-access".into(), Value::Object(access));
    }
    json!({
        "data": {
            "type": "teams",
            "attributes": attributes,
        }
    })
}
