use super::Backend;
use crate::errors::BackendError;

impl Backend {
    /// Replace the cached token of a singleton role with a freshly minted one.
    pub(crate) async fn rotate_role(&self, name: &str) -> Result<(), BackendError> {
        let mut role = self
            .load_role(name)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("role '{}' not found", name)))?;

        if !role.kind.is_singleton() {
            return Err(BackendError::validation(format!(
                "cannot rotate credentials for {} roles",
                role.kind
            )));
        }

        let previous = role.token_id.clone();
        self.refresh_singleton_token(&mut role).await?;
        self.save_role(&role).await?;

        tracing::info!(
            role = %role.name,
            previous_token_id = previous.as_deref().unwrap_or("none"),
            token_id = role.token_id.as_deref().unwrap_or_default(),
            "role token rotated"
        );
        Ok(())
    }
}
