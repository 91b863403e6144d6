use serde_json::{json, Map, Value};

use super::{Backend, Response};
use crate::errors::BackendError;
use crate::models::RoleEntry;

fn insert_opt(data: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        data.insert(key.into(), json!(v));
    }
}

impl Backend {
    pub(crate) async fn issue_credentials(&self, name: &str) -> Result<Response, BackendError> {
        let role = self
            .load_role(name)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("role '{}' not found", name)))?;

        if role.kind.is_singleton() {
            return singleton_response(&role);
        }

        let minted = self.mint_lease_token(&role).await?;
        let secret = minted.secret(&role);

        let mut data = Map::new();
        data.insert("token".into(), json!(minted.token.token));
        data.insert("token_id".into(), json!(minted.token.id));
        data.insert("role".into(), json!(role.name));
        insert_opt(&mut data, "description", &minted.token.description);
        insert_opt(&mut data, "organization", &minted.lease.organization);
        insert_opt(&mut data, "team_id", &minted.lease.team_id);
        insert_opt(&mut data, "team_name", &minted.team_name);
        if let Some(expired_at) = minted.token.expired_at {
            data.insert("expired_at".into(), json!(expired_at.to_rfc3339()));
        }

        Ok(Response {
            data,
            secret: Some(secret),
            warnings: Vec::new(),
        })
    }
}

/// Singleton roles hand out the cached token with no lease: revoking it
/// would break every other holder.
fn singleton_response(role: &RoleEntry) -> Result<Response, BackendError> {
    let token = role.token.as_ref().ok_or_else(|| {
        BackendError::validation(format!(
            "role '{}' has no stored token; write the role or call rotate-role/{} to mint one",
            role.name, role.name
        ))
    })?;

    let mut data = Map::new();
    data.insert("token".into(), json!(token));
    data.insert("role".into(), json!(role.name));
    insert_opt(&mut data, "token_id", &role.token_id);
    insert_opt(&mut data, "organization", &role.organization);
    insert_opt(&mut data, "team_id", &role.team_id);
    insert_opt(&mut data, "description", &role.description);
    Ok(Response::with_data(data))
}
