//! Rotation of the management token the backend itself uses.
//!
//! Order: mint the new token, persist it, drop the cached client, then
//! delete the superseded token with a client built from the new one. If the
//! write fails the stored config is untouched and the error names the new
//! token id so an operator can clean it up.

use super::{random_suffix, Backend};
use crate::errors::BackendError;
use crate::models::{OldTokenPolicy, RootTokenKind};
use crate::store::{StorageEntry, CONFIG_KEY};
use crate::tfc::TokenCreateOptions;

impl Backend {
    pub async fn rotate_root(&self) -> Result<(), BackendError> {
        let mut cfg = self
            .load_config()
            .await?
            .ok_or_else(|| BackendError::Config("backend is not configured".into()))?;
        if cfg.token.trim().is_empty() {
            return Err(BackendError::Config("backend is missing token".into()));
        }
        let (kind, id) = match (cfg.token_type, cfg.id.clone()) {
            (Some(kind), Some(id)) => (kind, id),
            _ => {
                return Err(BackendError::Config(
                    "token_type and id must be configured for token rotation".into(),
                ))
            }
        };

        let client = self.client().await?;
        let opts = TokenCreateOptions {
            description: Some(format!("Rotated by tfc-secrets ({})", random_suffix())),
            expired_at: None,
        };
        let minted = match kind {
            RootTokenKind::Organization => client.create_organization_token(&id, opts).await,
            RootTokenKind::Team => client.create_team_token_with_options(&id, opts).await,
            RootTokenKind::User => client.create_user_token(&id, opts).await,
        }
        .map_err(|e| BackendError::remote(format!("error minting new {} token for {}", kind, id), e))?;

        let old_token_id = cfg.token_id.take();
        cfg.token = minted.token;
        cfg.token_id = Some(minted.id.clone());

        let saved = match StorageEntry::json(CONFIG_KEY, &cfg) {
            Ok(entry) => self.storage.put(entry).await,
            Err(e) => Err(e),
        };
        if let Err(source) = saved {
            tracing::error!(kind = %kind, token_id = %minted.id, error = %source, "rotated token minted but not persisted");
            return Err(BackendError::RotationNotPersisted {
                kind: kind.to_string(),
                token_id: minted.id,
                source,
            });
        }

        self.invalidate().await;
        tracing::info!(kind = %kind, token_id = %minted.id, "management token rotated");

        if cfg.old_token == OldTokenPolicy::Keep || !kind.deletes_superseded() {
            return Ok(());
        }
        let old_id = match old_token_id {
            Some(old) if old != minted.id => old,
            Some(_) => return Ok(()),
            None => {
                tracing::warn!(kind = %kind, "previous token id unknown; superseded token was not deleted");
                return Ok(());
            }
        };

        // the old client may already be unauthorized; use one built from the new token
        let client = self.client().await?;
        let deleted = match kind {
            RootTokenKind::Team => client.delete_team_token_by_id(&old_id).await,
            RootTokenKind::User => client.delete_user_token(&old_id).await,
            RootTokenKind::Organization => Ok(()),
        };
        match deleted {
            Ok(()) => {
                tracing::info!(kind = %kind, token_id = %old_id, "superseded token deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(BackendError::remote(
                format!(
                    "new token {} saved, but deleting the previous token {} failed",
                    minted.id, old_id
                ),
                e,
            )),
        }
    }
}
