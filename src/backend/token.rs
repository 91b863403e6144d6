//! Remote token minting and lease renew/revoke.

use std::sync::Arc;

use chrono::Utc;

use super::{random_suffix, Backend, Secret};
use crate::errors::BackendError;
use crate::models::{CredentialKind, RoleEntry, TokenLease, TERRAFORM_TOKEN_TYPE};
use crate::tfc::{TeamCreateOptions, TerraformApi, TerraformToken, TfcError, TokenCreateOptions};

/// A freshly minted per-read token and the lease data that tracks it.
pub(crate) struct MintedToken {
    pub token: TerraformToken,
    pub lease: TokenLease,
    /// Name of the ephemeral team, dynamic-team roles only.
    pub team_name: Option<String>,
}

fn required<'a>(value: &'a Option<String>, field: &str, kind: CredentialKind) -> Result<&'a str, BackendError> {
    value
        .as_deref()
        .ok_or_else(|| BackendError::validation(format!("{} is required for credential_type {}", field, kind)))
}

/// Map a lookup failure to NotFound when the resource is missing.
fn lookup_error(what: String, e: TfcError) -> BackendError {
    if e.is_not_found() {
        BackendError::NotFound(format!("{} not found", what))
    } else {
        BackendError::remote(format!("error reading {}", what), e)
    }
}

fn ignore_not_found(result: Result<(), TfcError>) -> Result<(), TfcError> {
    match result {
        Err(e) if e.is_not_found() => {
            tracing::debug!(error = %e, "remote resource already gone");
            Ok(())
        }
        other => other,
    }
}

fn token_options(role: &RoleEntry) -> Result<TokenCreateOptions, BackendError> {
    Ok(TokenCreateOptions {
        description: Some(
            role.description
                .clone()
                .unwrap_or_else(|| format!("{} ({})", role.name, random_suffix())),
        ),
        expired_at: role.token_expiry(Utc::now())?,
    })
}

impl Backend {
    /// Mint a new token for a singleton role and record it on the entry.
    /// The platform invalidates the previous singleton token.
    pub(crate) async fn refresh_singleton_token(&self, role: &mut RoleEntry) -> Result<(), BackendError> {
        let client = self.client().await?;

        let token = match role.kind {
            CredentialKind::Organization => {
                let org = required(&role.organization, "organization", role.kind)?;
                client
                    .read_organization(org)
                    .await
                    .map_err(|e| lookup_error(format!("organization {}", org), e))?;
                client
                    .create_organization_token(org, TokenCreateOptions::default())
                    .await
                    .map_err(|e| BackendError::remote(format!("error creating organization token for {}", org), e))?
            }
            CredentialKind::TeamLegacy => {
                let team_id = required(&role.team_id, "team_id", role.kind)?;
                client
                    .read_team(team_id)
                    .await
                    .map_err(|e| lookup_error(format!("team {}", team_id), e))?;
                client
                    .create_team_token(team_id)
                    .await
                    .map_err(|e| BackendError::remote(format!("error creating team token for {}", team_id), e))?
            }
            other => {
                return Err(BackendError::validation(format!(
                    "cannot rotate credentials for {} roles",
                    other
                )))
            }
        };

        tracing::info!(role = %role.name, kind = %role.kind, token_id = %token.id, "singleton token minted");
        role.token = Some(token.token);
        role.token_id = Some(token.id);
        Ok(())
    }

    /// Mint a token for a role whose kind allows many live tokens.
    pub(crate) async fn mint_lease_token(&self, role: &RoleEntry) -> Result<MintedToken, BackendError> {
        let client = self.client().await?;
        let opts = token_options(role)?;

        let minted = match role.kind {
            CredentialKind::Team => {
                let team_id = required(&role.team_id, "team_id", role.kind)?;
                let token = client
                    .create_team_token_with_options(team_id, opts)
                    .await
                    .map_err(|e| BackendError::remote(format!("error creating team token for {}", team_id), e))?;
                MintedToken {
                    lease: TokenLease {
                        kind: Some(role.kind),
                        role: role.name.clone(),
                        token_id: token.id.clone(),
                        organization: role.organization.clone(),
                        team_id: Some(team_id.to_string()),
                    },
                    token,
                    team_name: None,
                }
            }
            CredentialKind::User => {
                let user_id = required(&role.user_id, "user_id", role.kind)?;
                let token = client
                    .create_user_token(user_id, opts)
                    .await
                    .map_err(|e| BackendError::remote(format!("error creating user token for {}", user_id), e))?;
                MintedToken {
                    lease: TokenLease {
                        kind: Some(role.kind),
                        role: role.name.clone(),
                        token_id: token.id.clone(),
                        organization: None,
                        team_id: None,
                    },
                    token,
                    team_name: None,
                }
            }
            CredentialKind::DynamicTeam => self.mint_dynamic_team_token(client, role, opts).await?,
            other => {
                return Err(BackendError::validation(format!(
                    "{} roles do not issue per-request tokens",
                    other
                )))
            }
        };

        tracing::info!(
            role = %role.name,
            kind = %role.kind,
            token_id = %minted.token.id,
            "token issued"
        );
        Ok(minted)
    }

    async fn mint_dynamic_team_token(
        &self,
        client: Arc<dyn TerraformApi>,
        role: &RoleEntry,
        opts: TokenCreateOptions,
    ) -> Result<MintedToken, BackendError> {
        let org = required(&role.organization, "organization", role.kind)?;
        let team_opts = role.team_options.clone().unwrap_or_default();
        let prefix = team_opts.name_prefix.as_deref().unwrap_or(&role.name);

        let team = client
            .create_team(
                org,
                TeamCreateOptions {
                    name: format!("{}-{}", prefix, random_suffix()),
                    visibility: team_opts.visibility.clone(),
                    organization_access: team_opts.organization_access.clone(),
                },
            )
            .await
            .map_err(|e| BackendError::remote(format!("error creating team in organization {}", org), e))?;

        let token = match client.create_team_token_with_options(&team.id, opts).await {
            Ok(token) => token,
            Err(e) => {
                // do not leave an orphaned team behind
                if let Err(cleanup) = client.delete_team(&team.id).await {
                    tracing::error!(team_id = %team.id, error = %cleanup, "failed to delete team after token creation failed");
                }
                return Err(BackendError::remote(
                    format!("error creating token for team {}", team.id),
                    e,
                ));
            }
        };

        Ok(MintedToken {
            lease: TokenLease {
                kind: Some(role.kind),
                role: role.name.clone(),
                token_id: token.id.clone(),
                organization: Some(org.to_string()),
                team_id: Some(team.id.clone()),
            },
            token,
            team_name: Some(team.name),
        })
    }

    /// Extend a lease using the role's current ttl settings.
    pub async fn renew(&self, secret: &Secret) -> Result<Secret, BackendError> {
        let lease = TokenLease::from_internal_data(&secret.internal_data)?;
        let role = self.load_role(&lease.role).await?.ok_or_else(|| {
            BackendError::NotFound(format!(
                "role '{}' no longer exists; cannot renew lease",
                lease.role
            ))
        })?;

        tracing::debug!(role = %role.name, token_id = %lease.token_id, "lease renewed");
        let mut renewed = secret.clone();
        renewed.ttl = (role.ttl > 0).then_some(role.ttl);
        renewed.max_ttl = (role.max_ttl > 0).then_some(role.max_ttl);
        Ok(renewed)
    }

    /// Delete the remote resource behind a lease. A resource that is
    /// already gone counts as revoked.
    pub async fn revoke(&self, secret: &Secret) -> Result<(), BackendError> {
        let lease = TokenLease::from_internal_data(&secret.internal_data)?;
        let kind = lease.kind();
        let client = self.client().await?;
        let token_id = lease.token_id.as_str();

        let result = match kind {
            CredentialKind::Team => ignore_not_found(client.delete_team_token_by_id(token_id).await),
            CredentialKind::User => ignore_not_found(client.delete_user_token(token_id).await),
            CredentialKind::DynamicTeam => match lease.team_id.as_deref() {
                Some(team_id) => ignore_not_found(client.delete_team(team_id).await),
                None => ignore_not_found(client.delete_team_token_by_id(token_id).await),
            },
            CredentialKind::Organization => {
                let org = required(&lease.organization, "organization", kind)?;
                match client.read_organization_token(org).await {
                    Ok(current) if current.id == token_id => {
                        ignore_not_found(client.delete_organization_token(org).await)
                    }
                    Ok(current) => {
                        tracing::info!(lease_token_id = %token_id, current_token_id = %current.id, "organization token was rotated; nothing to revoke");
                        Ok(())
                    }
                    Err(e) => ignore_not_found(Err(e)),
                }
            }
            CredentialKind::TeamLegacy => {
                let team_id = required(&lease.team_id, "team_id", kind)?;
                match client.read_team_token(team_id).await {
                    Ok(current) if current.id == token_id => {
                        ignore_not_found(client.delete_team_token(team_id).await)
                    }
                    Ok(current) => {
                        tracing::info!(lease_token_id = %token_id, current_token_id = %current.id, "team token was rotated; nothing to revoke");
                        Ok(())
                    }
                    Err(e) => ignore_not_found(Err(e)),
                }
            }
        };

        result.map_err(|e| BackendError::remote(format!("error revoking {} token {}", kind, token_id), e))?;
        tracing::info!(role = %lease.role, kind = %kind, token_id = %token_id, "lease revoked");
        Ok(())
    }
}

impl MintedToken {
    pub(crate) fn secret(&self, role: &RoleEntry) -> Secret {
        Secret {
            secret_type: TERRAFORM_TOKEN_TYPE.to_string(),
            ttl: (role.ttl > 0).then_some(role.ttl),
            max_ttl: (role.max_ttl > 0).then_some(role.max_ttl),
            renewable: true,
            internal_data: self.lease.to_internal_data(),
        }
    }
}
