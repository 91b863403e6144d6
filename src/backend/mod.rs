//! The credential lifecycle engine.
//!
//! [`Backend`] owns the storage handle, the remote client factory, the
//! rotation manager and the cached remote client. Requests are routed by
//! path to the handlers in the sibling modules.

mod path_config;
mod path_creds;
mod path_roles;
pub mod request;
mod rotate_role;
mod rotate_root;
mod token;

use std::sync::Arc;

use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;

use crate::cache::ClientCache;
use crate::errors::BackendError;
use crate::models::{BackendConfig, RoleEntry};
use crate::rotation::{RotationManager, UnsupportedRotationManager};
use crate::store::{Storage, StorageEntry, CONFIG_KEY};
use crate::tfc::{ClientFactory, TerraformApi};

pub use request::{Operation, Request, Response, Secret};

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w(([\w.-]+)?\w)?$").expect("role name pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Config,
    ConfigRotate,
    Roles,
    Role(String),
    Creds(String),
    RotateRole(String),
}

impl Route {
    fn parse(path: &str) -> Result<Self, BackendError> {
        let path = path.trim_start_matches('/');
        match path {
            "config" => return Ok(Route::Config),
            "config/rotate" => return Ok(Route::ConfigRotate),
            "role" | "role/" => return Ok(Route::Roles),
            _ => {}
        }

        let (ctor, name): (fn(String) -> Route, &str) = if let Some(n) = path.strip_prefix("role/") {
            (Route::Role, n)
        } else if let Some(n) = path.strip_prefix("creds/") {
            (Route::Creds, n)
        } else if let Some(n) = path.strip_prefix("rotate-role/") {
            (Route::RotateRole, n)
        } else {
            return Err(BackendError::UnsupportedPath(path.to_string()));
        };

        Ok(ctor(role_name(name)?))
    }
}

/// Normalize and check a role name taken from a path.
fn role_name(raw: &str) -> Result<String, BackendError> {
    let name = raw.to_lowercase();
    if !NAME_RE.is_match(&name) {
        return Err(BackendError::validation(format!("invalid role name '{}'", raw)));
    }
    Ok(name)
}

/// Five lowercase alphanumerics, used to keep minted names and descriptions unique.
pub(crate) fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

pub struct Backend {
    storage: Arc<dyn Storage>,
    factory: Arc<dyn ClientFactory>,
    rotation: Arc<dyn RotationManager>,
    client: ClientCache<dyn TerraformApi>,
}

impl Backend {
    pub fn new(storage: Arc<dyn Storage>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            storage,
            factory,
            rotation: Arc::new(UnsupportedRotationManager),
            client: ClientCache::new(),
        }
    }

    pub fn with_rotation_manager(mut self, manager: Arc<dyn RotationManager>) -> Self {
        self.rotation = manager;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Route a request to its handler. `Ok(None)` is an empty success, or
    /// "not found" for reads of roles and config.
    pub async fn handle_request(&self, req: Request) -> Result<Option<Response>, BackendError> {
        let route = Route::parse(&req.path)?;
        tracing::debug!(operation = %req.operation, path = %req.path, "handling request");

        match (&route, req.operation) {
            (Route::Config, Operation::Create) => self.write_config(&req.data, true).await,
            (Route::Config, Operation::Update) => self.write_config(&req.data, false).await,
            (Route::Config, Operation::Read) => self.read_config().await,
            (Route::Config, Operation::Delete) => self.delete_config().await,

            (Route::ConfigRotate, Operation::Create | Operation::Update) => {
                self.rotate_root().await?;
                Ok(None)
            }

            (Route::Roles, Operation::List | Operation::Read) => self.list_roles().await,

            (Route::Role(name), Operation::Create | Operation::Update) => {
                self.write_role(name, &req.data).await
            }
            (Route::Role(name), Operation::Read) => self.read_role(name).await,
            (Route::Role(name), Operation::Delete) => self.delete_role(name).await,

            (Route::Creds(name), Operation::Read | Operation::Create | Operation::Update) => {
                self.issue_credentials(name).await.map(Some)
            }

            (Route::RotateRole(name), Operation::Create | Operation::Update) => {
                self.rotate_role(name).await?;
                Ok(None)
            }

            (_, op) => Err(BackendError::UnsupportedOperation {
                operation: op.to_string(),
                path: req.path.clone(),
            }),
        }
    }

    /// Whether the storage record behind `path` exists, so a host can pick
    /// create or update for a write.
    pub async fn existence_check(&self, path: &str) -> Result<bool, BackendError> {
        match Route::parse(path)? {
            Route::Config => Ok(self.storage.get(CONFIG_KEY).await?.is_some()),
            Route::Role(name) => Ok(self.load_role(&name).await?.is_some()),
            _ => Ok(false),
        }
    }

    /// Drop the cached remote client; the next call rebuilds it from config.
    pub async fn invalidate(&self) {
        self.client.invalidate().await;
    }

    pub(crate) async fn client(&self) -> Result<Arc<dyn TerraformApi>, BackendError> {
        self.client
            .get_or_try_init(|| async {
                let cfg = self
                    .load_config()
                    .await?
                    .ok_or_else(|| BackendError::Config("backend is not configured".into()))?;
                tracing::debug!(address = %cfg.address, "building remote API client");
                self.factory
                    .build(&cfg.client_settings())
                    .map_err(|e| BackendError::remote("error creating remote API client", e))
            })
            .await
    }

    pub(crate) async fn load_config(&self) -> Result<Option<BackendConfig>, BackendError> {
        match self.storage.get(CONFIG_KEY).await? {
            Some(entry) => Ok(Some(entry.decode_json()?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn load_role(&self, name: &str) -> Result<Option<RoleEntry>, BackendError> {
        match self.storage.get(&RoleEntry::storage_key(name)).await? {
            Some(entry) => Ok(Some(entry.decode_json()?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn save_role(&self, role: &RoleEntry) -> Result<(), BackendError> {
        let entry = StorageEntry::json(RoleEntry::storage_key(&role.name), role)?;
        self.storage.put(entry).await?;
        Ok(())
    }
}
