//! Shared test doubles: an in-memory Terraform platform and a storage
//! wrapper that can be told to fail writes.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use tfc_secrets::store::{InMemoryStorage, Storage, StorageEntry, StorageError};
use tfc_secrets::tfc::{
    ClientFactory, ClientSettings, Team, TeamCreateOptions, TerraformApi, TerraformToken, TfcError,
    TokenCreateOptions,
};
use tfc_secrets::{Backend, Operation, Request};

pub const ORG: &str = "acme";
pub const TEAM: &str = "team-1";
pub const USER: &str = "u-1";
pub const ROOT_SECRET: &str = "root-secret";
pub const ROOT_TOKEN_ID: &str = "at-root";

// ── Fake platform ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    Team(String),
    User(String),
}

#[derive(Default)]
struct PlatformState {
    orgs: HashSet<String>,
    teams: HashMap<String, Team>,
    users: HashSet<String>,
    org_tokens: HashMap<String, TerraformToken>,
    legacy_team_tokens: HashMap<String, TerraformToken>,
    tokens: HashMap<String, (Owner, TerraformToken)>,
    next_id: u64,
    fail_team_tokens: bool,
}

impl PlatformState {
    fn mint(&mut self, opts: &TokenCreateOptions) -> TerraformToken {
        self.next_id += 1;
        TerraformToken {
            id: format!("at-{}", self.next_id),
            description: opts.description.clone(),
            token: format!("secret-{}.atlasv1", self.next_id),
            expired_at: opts.expired_at,
        }
    }

    fn is_live(&self, secret: &str) -> bool {
        self.org_tokens.values().any(|t| t.token == secret)
            || self.legacy_team_tokens.values().any(|t| t.token == secret)
            || self.tokens.values().any(|(_, t)| t.token == secret)
    }
}

/// Handle on the shared platform state; tests inspect it directly.
#[derive(Clone)]
pub struct FakePlatform {
    state: Arc<Mutex<PlatformState>>,
    builds: Arc<AtomicUsize>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        let mut state = PlatformState::default();
        state.orgs.insert(ORG.to_string());
        state.teams.insert(
            TEAM.to_string(),
            Team { id: TEAM.to_string(), name: "owners".to_string() },
        );
        state.users.insert(USER.to_string());
        state.tokens.insert(
            ROOT_TOKEN_ID.to_string(),
            (
                Owner::User(USER.to_string()),
                TerraformToken {
                    id: ROOT_TOKEN_ID.to_string(),
                    description: Some("bootstrap".into()),
                    token: ROOT_SECRET.to_string(),
                    expired_at: None,
                },
            ),
        );
        Self {
            state: Arc::new(Mutex::new(state)),
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn factory(&self) -> Arc<dyn ClientFactory> {
        Arc::new(self.clone())
    }

    pub fn client_builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn token_exists(&self, token_id: &str) -> bool {
        self.state.lock().unwrap().tokens.contains_key(token_id)
    }

    pub fn secret_is_live(&self, secret: &str) -> bool {
        self.state.lock().unwrap().is_live(secret)
    }

    pub fn team_exists(&self, team_id: &str) -> bool {
        self.state.lock().unwrap().teams.contains_key(team_id)
    }

    pub fn team_count(&self) -> usize {
        self.state.lock().unwrap().teams.len()
    }

    pub fn token(&self, token_id: &str) -> Option<TerraformToken> {
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(token_id)
            .map(|(_, t)| t.clone())
    }

    pub fn org_token_id(&self, org: &str) -> Option<String> {
        self.state.lock().unwrap().org_tokens.get(org).map(|t| t.id.clone())
    }

    pub fn fail_team_tokens(&self, fail: bool) {
        self.state.lock().unwrap().fail_team_tokens = fail;
    }
}

impl ClientFactory for FakePlatform {
    fn build(&self, settings: &ClientSettings) -> Result<Arc<dyn TerraformApi>, TfcError> {
        if settings.token.is_empty() {
            return Err(TfcError::InvalidConfig("token is empty".into()));
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            state: Arc::clone(&self.state),
            secret: settings.token.clone(),
        }))
    }
}

/// A client bound to one secret. Every call fails with `Unauthorized`
/// once that secret is no longer a live token.
pub struct FakeClient {
    state: Arc<Mutex<PlatformState>>,
    secret: String,
}

impl FakeClient {
    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut PlatformState) -> Result<T, TfcError>,
    ) -> Result<T, TfcError> {
        let mut state = self.state.lock().unwrap();
        if !state.is_live(&self.secret) {
            return Err(TfcError::Unauthorized);
        }
        f(&mut state)
    }
}

fn not_found(what: &str) -> TfcError {
    TfcError::NotFound(what.to_string())
}

fn metadata(t: &TerraformToken) -> TerraformToken {
    TerraformToken { token: String::new(), ..t.clone() }
}

#[async_trait]
impl TerraformApi for FakeClient {
    async fn read_organization(&self, organization: &str) -> Result<(), TfcError> {
        self.with_state(|s| {
            s.orgs.contains(organization).then_some(()).ok_or_else(|| not_found(organization))
        })
    }

    async fn create_organization_token(
        &self,
        organization: &str,
        opts: TokenCreateOptions,
    ) -> Result<TerraformToken, TfcError> {
        self.with_state(|s| {
            if !s.orgs.contains(organization) {
                return Err(not_found(organization));
            }
            let token = s.mint(&opts);
            s.org_tokens.insert(organization.to_string(), token.clone());
            Ok(token)
        })
    }

    async fn read_organization_token(&self, organization: &str) -> Result<TerraformToken, TfcError> {
        self.with_state(|s| s.org_tokens.get(organization).map(metadata).ok_or_else(|| not_found(organization)))
    }

    async fn delete_organization_token(&self, organization: &str) -> Result<(), TfcError> {
        self.with_state(|s| s.org_tokens.remove(organization).map(|_| ()).ok_or_else(|| not_found(organization)))
    }

    async fn read_team(&self, team_id: &str) -> Result<Team, TfcError> {
        self.with_state(|s| s.teams.get(team_id).cloned().ok_or_else(|| not_found(team_id)))
    }

    async fn create_team(&self, organization: &str, opts: TeamCreateOptions) -> Result<Team, TfcError> {
        self.with_state(|s| {
            if !s.orgs.contains(organization) {
                return Err(not_found(organization));
            }
            s.next_id += 1;
            let team = Team { id: format!("team-gen-{}", s.next_id), name: opts.name };
            s.teams.insert(team.id.clone(), team.clone());
            Ok(team)
        })
    }

    async fn delete_team(&self, team_id: &str) -> Result<(), TfcError> {
        self.with_state(|s| {
            s.teams.remove(team_id).ok_or_else(|| not_found(team_id))?;
            s.legacy_team_tokens.remove(team_id);
            s.tokens.retain(|_, (owner, _)| *owner != Owner::Team(team_id.to_string()));
            Ok(())
        })
    }

    async fn create_team_token(&self, team_id: &str) -> Result<TerraformToken, TfcError> {
        self.with_state(|s| {
            if !s.teams.contains_key(team_id) {
                return Err(not_found(team_id));
            }
            let token = s.mint(&TokenCreateOptions::default());
            s.legacy_team_tokens.insert(team_id.to_string(), token.clone());
            Ok(token)
        })
    }

    async fn read_team_token(&self, team_id: &str) -> Result<TerraformToken, TfcError> {
        self.with_state(|s| s.legacy_team_tokens.get(team_id).map(metadata).ok_or_else(|| not_found(team_id)))
    }

    async fn delete_team_token(&self, team_id: &str) -> Result<(), TfcError> {
        self.with_state(|s| s.legacy_team_tokens.remove(team_id).map(|_| ()).ok_or_else(|| not_found(team_id)))
    }

    async fn create_team_token_with_options(
        &self,
        team_id: &str,
        opts: TokenCreateOptions,
    ) -> Result<TerraformToken, TfcError> {
        self.with_state(|s| {
            if s.fail_team_tokens {
                return Err(TfcError::Api { status: 500, message: "token service unavailable".into() });
            }
            if !s.teams.contains_key(team_id) {
                return Err(not_found(team_id));
            }
            let token = s.mint(&opts);
            s.tokens.insert(token.id.clone(), (Owner::Team(team_id.to_string()), token.clone()));
            Ok(token)
        })
    }

    async fn delete_team_token_by_id(&self, token_id: &str) -> Result<(), TfcError> {
        self.with_state(|s| {
            if !matches!(s.tokens.get(token_id), Some((Owner::Team(_), _))) {
                return Err(not_found(token_id));
            }
            s.tokens.remove(token_id);
            Ok(())
        })
    }

    async fn create_user_token(
        &self,
        user_id: &str,
        opts: TokenCreateOptions,
    ) -> Result<TerraformToken, TfcError> {
        self.with_state(|s| {
            if !s.users.contains(user_id) {
                return Err(not_found(user_id));
            }
            let token = s.mint(&opts);
            s.tokens.insert(token.id.clone(), (Owner::User(user_id.to_string()), token.clone()));
            Ok(token)
        })
    }

    async fn delete_user_token(&self, token_id: &str) -> Result<(), TfcError> {
        self.with_state(|s| {
            if !matches!(s.tokens.get(token_id), Some((Owner::User(_), _))) {
                return Err(not_found(token_id));
            }
            s.tokens.remove(token_id);
            Ok(())
        })
    }
}

// ── Storage double ──────────────────────────────────────────

/// In-memory storage whose writes to selected keys can be made to fail.
#[derive(Clone, Default)]
pub struct FlakyStorage {
    inner: InMemoryStorage,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl FlakyStorage {
    pub fn fail_puts_on(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Write a record directly, bypassing the backend.
    pub async fn put_json(&self, key: &str, value: Value) {
        self.inner
            .put(StorageEntry::json(key, &value).unwrap())
            .await
            .unwrap();
    }

    pub async fn raw_json(&self, key: &str) -> Option<Value> {
        self.inner
            .get(key)
            .await
            .unwrap()
            .map(|e| serde_json::from_slice(&e.value).unwrap())
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, entry: StorageEntry) -> Result<(), StorageError> {
        if self.failing.lock().unwrap().contains(&entry.key) {
            return Err(StorageError::Backend("simulated write failure".into()));
        }
        self.inner.put(entry).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

// ── Harness ─────────────────────────────────────────────────

pub struct Harness {
    pub backend: Backend,
    pub platform: FakePlatform,
    pub storage: FlakyStorage,
}

pub fn data(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Backend with no config written yet.
pub fn bare_harness() -> Harness {
    let platform = FakePlatform::new();
    let storage = FlakyStorage::default();
    let backend = Backend::new(Arc::new(storage.clone()), platform.factory());
    Harness { backend, platform, storage }
}

/// Backend configured with the seeded user-scoped management token.
pub async fn harness() -> Harness {
    let h = bare_harness();
    h.write(
        Operation::Create,
        "config",
        json!({
            "token": ROOT_SECRET,
            "token_type": "user",
            "id": USER,
            "token_id": ROOT_TOKEN_ID,
        }),
    )
    .await
    .unwrap();
    h
}

impl Harness {
    pub async fn write(
        &self,
        operation: Operation,
        path: &str,
        body: Value,
    ) -> Result<Option<tfc_secrets::Response>, tfc_secrets::BackendError> {
        self.backend
            .handle_request(Request::new(operation, path).with_data(body))
            .await
    }

    pub async fn read(&self, path: &str) -> Result<Option<tfc_secrets::Response>, tfc_secrets::BackendError> {
        self.backend.handle_request(Request::new(Operation::Read, path)).await
    }

    pub async fn creds(&self, role: &str) -> tfc_secrets::Response {
        self.read(&format!("creds/{}", role))
            .await
            .unwrap()
            .expect("creds response")
    }
}
