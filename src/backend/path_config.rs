use serde_json::{Map, Value};

use super::{Backend, Response};
use crate::errors::BackendError;
use crate::models::ConfigInput;
use crate::rotation::{RotationJob, RotationManagerError};
use crate::store::{StorageEntry, CONFIG_KEY};

impl Backend {
    pub(crate) async fn read_config(&self) -> Result<Option<Response>, BackendError> {
        Ok(self
            .load_config()
            .await?
            .map(|cfg| Response::with_data(cfg.to_response_data())))
    }

    pub(crate) async fn write_config(
        &self,
        data: &Map<String, Value>,
        creating: bool,
    ) -> Result<Option<Response>, BackendError> {
        let existing = self.load_config().await?;
        let was_enabled = existing
            .as_ref()
            .map(|c| c.rotation.is_enabled())
            .unwrap_or(false);

        let cfg = ConfigInput::from_data(data)?.apply(existing, creating)?;
        let mut resp = Response::default();

        // rotation manager first; a rejected job must not leave a saved policy behind
        let mut manager_op = None;
        if cfg.rotation.is_enabled() {
            let job = RotationJob::from_params(CONFIG_KEY, &cfg.rotation);
            match self.rotation.register(job).await {
                Ok(()) => manager_op = Some("register"),
                Err(RotationManagerError::Unsupported) => {
                    tracing::warn!("automated root rotation requested but not supported by host");
                    resp.add_warning(
                        "automated root rotation is not supported by this host; the policy was saved but will not run",
                    );
                }
                Err(RotationManagerError::Rejected(reason)) => {
                    return Err(BackendError::validation(format!(
                        "error registering rotation job: {}",
                        reason
                    )));
                }
            }
        } else if was_enabled {
            match self.rotation.deregister(CONFIG_KEY).await {
                Ok(()) => manager_op = Some("deregister"),
                Err(RotationManagerError::Unsupported) => {
                    tracing::warn!("cannot deregister rotation job: not supported by host");
                }
                Err(RotationManagerError::Rejected(reason)) => {
                    return Err(BackendError::validation(format!(
                        "error deregistering rotation job: {}",
                        reason
                    )));
                }
            }
        }

        let stored = match StorageEntry::json(CONFIG_KEY, &cfg) {
            Ok(entry) => self.storage.put(entry).await,
            Err(e) => Err(e),
        };
        if let Err(source) = stored {
            return Err(match manager_op {
                Some(operation) => BackendError::StorageAfterRotationJob {
                    operation,
                    path: CONFIG_KEY.to_string(),
                    source,
                },
                None => BackendError::Storage(source),
            });
        }

        self.invalidate().await;
        tracing::info!(
            created = creating,
            token_type = cfg.token_type.map(|k| k.as_str()).unwrap_or("none"),
            rotation = cfg.rotation.is_enabled(),
            "configuration saved"
        );

        Ok((!resp.warnings.is_empty()).then_some(resp))
    }

    /// Re-register the stored rotation policy with the rotation manager,
    /// used at startup since scheduled jobs do not survive a restart.
    pub async fn restore_rotation_job(&self) -> Result<bool, BackendError> {
        let Some(cfg) = self.load_config().await? else {
            return Ok(false);
        };
        if !cfg.rotation.is_enabled() {
            return Ok(false);
        }
        match self
            .rotation
            .register(RotationJob::from_params(CONFIG_KEY, &cfg.rotation))
            .await
        {
            Ok(()) => Ok(true),
            Err(RotationManagerError::Unsupported) => Ok(false),
            Err(RotationManagerError::Rejected(reason)) => Err(BackendError::validation(format!(
                "stored rotation policy rejected: {}",
                reason
            ))),
        }
    }

    pub(crate) async fn delete_config(&self) -> Result<Option<Response>, BackendError> {
        let existing = self.load_config().await?;
        let mut resp = Response::default();

        if existing.as_ref().map(|c| c.rotation.is_enabled()).unwrap_or(false) {
            match self.rotation.deregister(CONFIG_KEY).await {
                Ok(()) => {}
                Err(RotationManagerError::Unsupported) => {
                    tracing::warn!("cannot deregister rotation job: not supported by host");
                }
                Err(e) => resp.add_warning(format!("failed to deregister rotation job: {}", e)),
            }
        }

        self.storage.delete(CONFIG_KEY).await?;
        self.invalidate().await;
        tracing::info!("configuration deleted");

        Ok((!resp.warnings.is_empty()).then_some(resp))
    }
}
