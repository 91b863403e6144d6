//! Lease internal data attached to issued secrets.
//!
//! This is what renew and revoke see later, so it must carry everything
//! needed to find the remote resource again.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::role::CredentialKind;
use crate::errors::BackendError;

/// Secret type name for every lease this backend issues.
pub const TERRAFORM_TOKEN_TYPE: &str = "terraform_token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLease {
    /// Absent on leases written by older releases; see [`TokenLease::kind`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CredentialKind>,
    #[serde(default)]
    pub role: String,
    pub token_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl TokenLease {
    /// The credential kind, inferring it from identifiers for old leases.
    pub fn kind(&self) -> CredentialKind {
        match self.kind {
            Some(kind) => kind,
            None if self.team_id.is_some() => CredentialKind::TeamLegacy,
            None if self.organization.is_some() => CredentialKind::Organization,
            None => CredentialKind::User,
        }
    }

    pub fn to_internal_data(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn from_internal_data(data: &Map<String, Value>) -> Result<Self, BackendError> {
        let lease: TokenLease = serde_json::from_value(Value::Object(data.clone()))
            .map_err(|e| BackendError::validation(format!("invalid lease internal data: {}", e)))?;
        if lease.token_id.is_empty() {
            return Err(BackendError::validation("lease internal data is missing token_id"));
        }
        Ok(lease)
    }
}
