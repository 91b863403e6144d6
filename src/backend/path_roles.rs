use serde_json::{Map, Value};

use super::{Backend, Response};
use crate::errors::BackendError;
use crate::models::{RoleEntry, RoleInput};
use crate::store::ROLE_PREFIX;

impl Backend {
    pub(crate) async fn list_roles(&self) -> Result<Option<Response>, BackendError> {
        let keys = self.storage.list(ROLE_PREFIX).await?;
        Ok(Some(Response::list(keys)))
    }

    pub(crate) async fn read_role(&self, name: &str) -> Result<Option<Response>, BackendError> {
        Ok(self
            .load_role(name)
            .await?
            .map(|role| Response::with_data(role.to_response_data())))
    }

    pub(crate) async fn write_role(
        &self,
        name: &str,
        data: &Map<String, Value>,
    ) -> Result<Option<Response>, BackendError> {
        let existing = self.load_role(name).await?;
        let mut role = RoleInput::from_data(data)?.apply(name, existing)?;

        if role.kind.is_singleton() {
            self.refresh_singleton_token(&mut role).await?;
        }

        self.save_role(&role).await?;
        tracing::info!(role = %role.name, kind = %role.kind, "role saved");
        Ok(None)
    }

    pub(crate) async fn delete_role(&self, name: &str) -> Result<Option<Response>, BackendError> {
        self.storage.delete(&RoleEntry::storage_key(name)).await?;
        tracing::info!(role = %name, "role deleted");
        Ok(None)
    }
}
