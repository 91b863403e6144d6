mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use common::{bare_harness, data, harness, FakePlatform, FlakyStorage, ORG, ROOT_SECRET, ROOT_TOKEN_ID, TEAM, USER};
use tfc_secrets::rotation::{RotationJob, RotationManager, RotationManagerError, RotationScheduler};
use tfc_secrets::{Backend, BackendError, Operation, Secret};

// ── Issuance ────────────────────────────────────────────────

#[tokio::test]
async fn test_singleton_and_multi_token_issuance() {
    let h = harness().await;

    h.write(Operation::Create, "role/r1", json!({"credential_type": "organization", "organization": ORG}))
        .await
        .unwrap();
    let first = h.creds("r1").await;
    let second = h.creds("r1").await;
    assert_eq!(first.data["token"], second.data["token"]);
    assert!(first.secret.is_none(), "singleton tokens are not leased");

    h.write(Operation::Create, "role/r2", json!({"credential_type": "user", "user_id": USER}))
        .await
        .unwrap();
    let a = h.creds("r2").await;
    let b = h.creds("r2").await;
    assert_ne!(a.data["token"], b.data["token"]);

    for resp in [a, b] {
        let token_id = resp.data["token_id"].as_str().unwrap().to_string();
        assert!(h.platform.token_exists(&token_id));
        let secret = resp.secret.expect("user tokens are leased");
        h.backend.revoke(&secret).await.unwrap();
        assert!(!h.platform.token_exists(&token_id));
    }
}

#[tokio::test]
async fn test_singleton_role_write_mints_exactly_one_token() {
    let h = harness().await;
    h.write(Operation::Create, "role/org", json!({"organization": ORG}))
        .await
        .unwrap();

    let resp = h.creds("org").await;
    assert_eq!(
        resp.data["token_id"].as_str(),
        h.platform.org_token_id(ORG).as_deref()
    );

    // a second write re-mints and the platform drops the previous token
    let old_token = resp.data["token"].as_str().unwrap().to_string();
    h.write(Operation::Update, "role/org", json!({})).await.unwrap();
    let resp = h.creds("org").await;
    assert_ne!(resp.data["token"].as_str().unwrap(), old_token);
    assert!(!h.platform.secret_is_live(&old_token));
}

#[tokio::test]
async fn test_team_tokens_carry_description_expiry_and_ttls() {
    let h = harness().await;
    h.write(
        Operation::Create,
        "role/ci",
        json!({"credential_type": "team", "team_id": TEAM, "ttl": "1h", "max_ttl": "2h", "description": "ci runner"}),
    )
    .await
    .unwrap();

    let resp = h.creds("ci").await;
    let token_id = resp.data["token_id"].as_str().unwrap();
    let remote = h.platform.token(token_id).unwrap();
    assert_eq!(remote.description.as_deref(), Some("ci runner"));
    assert!(remote.expired_at.is_some());

    let secret = resp.secret.unwrap();
    assert_eq!(secret.secret_type, "terraform_token");
    assert_eq!(secret.ttl, Some(3600));
    assert_eq!(secret.max_ttl, Some(7200));
    assert!(secret.renewable);
    assert_eq!(secret.internal_data["kind"], "team");
    assert_eq!(secret.internal_data["role"], "ci");
}

#[tokio::test]
async fn test_generated_description_uses_role_name() {
    let h = harness().await;
    h.write(Operation::Create, "role/dev", json!({"user_id": USER})).await.unwrap();
    let resp = h.creds("dev").await;
    let desc = resp.data["description"].as_str().unwrap();
    assert!(desc.starts_with("dev ("), "unexpected description {desc}");
    assert!(h.platform.token(resp.data["token_id"].as_str().unwrap()).unwrap().expired_at.is_none());
}

#[tokio::test]
async fn test_creds_are_issued_on_write_as_well_as_read() {
    let h = harness().await;
    h.write(Operation::Create, "role/dev", json!({"user_id": USER})).await.unwrap();

    let resp = h.write(Operation::Update, "creds/dev", json!({})).await.unwrap().unwrap();
    let token_id = resp.data["token_id"].as_str().unwrap();
    assert!(h.platform.token_exists(token_id));
    assert!(resp.secret.is_some());
}

#[tokio::test]
async fn test_creds_for_missing_role_is_not_found() {
    let h = harness().await;
    let err = h.read("creds/ghost").await.unwrap_err();
    assert!(matches!(err, BackendError::NotFound(_)));
}

#[tokio::test]
async fn test_issuance_without_config_fails() {
    let h = bare_harness();
    h.storage
        .put_json("role/r", json!({"name": "r", "token_type": "user", "user_id": USER}))
        .await;
    let err = h.read("creds/r").await.unwrap_err();
    assert!(matches!(err, BackendError::Config(_)), "got {err:?}");
}

#[tokio::test]
async fn test_huge_max_ttl_never_reaches_issuance() {
    let h = harness().await;
    let err = h
        .write(
            Operation::Create,
            "role/big",
            json!({"credential_type": "user", "user_id": USER, "max_ttl": "99999999999d"}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Validation(_)), "got {err:?}");
    assert!(h.read("role/big").await.unwrap().is_none());

    // a record written before the bound existed fails cleanly
    h.storage
        .put_json(
            "role/big",
            json!({"name": "big", "token_type": "user", "user_id": USER, "max_ttl": 8_639_999_999_913_600u64}),
        )
        .await;
    let err = h.read("creds/big").await.unwrap_err();
    assert!(matches!(err, BackendError::Validation(_)), "got {err:?}");
}

// ── Roles ───────────────────────────────────────────────────

#[tokio::test]
async fn test_conflicting_identifiers_are_not_persisted() {
    let h = harness().await;
    let err = h
        .write(Operation::Create, "role/bad", json!({"user_id": USER, "organization": ORG}))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Validation(_)));
    assert!(h.read("role/bad").await.unwrap().is_none());
    assert!(!h.backend.existence_check("role/bad").await.unwrap());
}

#[tokio::test]
async fn test_role_read_list_and_delete() {
    let h = harness().await;
    for name in ["alpha", "beta", "gamma"] {
        h.write(Operation::Create, &format!("role/{name}"), json!({"user_id": USER, "ttl": 60}))
            .await
            .unwrap();
    }

    let listed = h
        .backend
        .handle_request(tfc_secrets::Request::new(Operation::List, "role/"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(listed.data["keys"], json!(["alpha", "beta", "gamma"]));

    let read = h.read("role/beta").await.unwrap().unwrap();
    assert_eq!(read.data["token_type"], "user");
    assert_eq!(read.data["ttl"], 60);
    assert!(!read.data.contains_key("token"));

    h.write(Operation::Delete, "role/beta", json!({})).await.unwrap();
    assert!(h.read("role/beta").await.unwrap().is_none());
}

#[tokio::test]
async fn test_role_names_are_lowercased() {
    let h = harness().await;
    h.write(Operation::Create, "role/Deploy", json!({"user_id": USER})).await.unwrap();
    assert!(h.read("role/deploy").await.unwrap().is_some());
    assert!(h.backend.existence_check("role/DEPLOY").await.unwrap());
}

#[tokio::test]
async fn test_singleton_role_for_unknown_organization_is_rejected() {
    let h = harness().await;
    let err = h
        .write(Operation::Create, "role/nope", json!({"organization": "no-such-org"}))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::NotFound(_)), "got {err:?}");
    assert!(h.read("role/nope").await.unwrap().is_none());
}

// ── Leases ──────────────────────────────────────────────────

#[tokio::test]
async fn test_revoke_twice_succeeds() {
    let h = harness().await;
    h.write(Operation::Create, "role/ci", json!({"credential_type": "team", "team_id": TEAM}))
        .await
        .unwrap();
    let secret = h.creds("ci").await.secret.unwrap();
    h.backend.revoke(&secret).await.unwrap();
    h.backend.revoke(&secret).await.unwrap();
}

#[tokio::test]
async fn test_renew_uses_current_role_and_fails_once_role_is_gone() {
    let h = harness().await;
    h.write(Operation::Create, "role/r", json!({"user_id": USER, "ttl": 60, "max_ttl": 600}))
        .await
        .unwrap();
    let secret = h.creds("r").await.secret.unwrap();

    h.write(Operation::Update, "role/r", json!({"ttl": 120})).await.unwrap();
    let renewed = h.backend.renew(&secret).await.unwrap();
    assert_eq!(renewed.ttl, Some(120));
    assert_eq!(renewed.max_ttl, Some(600));

    h.write(Operation::Delete, "role/r", json!({})).await.unwrap();
    let err = h.backend.renew(&secret).await.unwrap_err();
    assert!(matches!(err, BackendError::NotFound(_)));
}

#[tokio::test]
async fn test_dynamic_team_lease_lifecycle() {
    let h = harness().await;
    h.write(
        Operation::Create,
        "role/eph",
        json!({
            "credential_type": "dynamic_team",
            "organization": ORG,
            "team_options": {"name_prefix": "ci", "visibility": "secret"}
        }),
    )
    .await
    .unwrap();

    let before = h.platform.team_count();
    let resp = h.creds("eph").await;
    let team_id = resp.data["team_id"].as_str().unwrap().to_string();
    assert!(resp.data["team_name"].as_str().unwrap().starts_with("ci-"));
    assert!(h.platform.team_exists(&team_id));
    assert_eq!(h.platform.team_count(), before + 1);

    h.backend.revoke(&resp.secret.unwrap()).await.unwrap();
    assert!(!h.platform.team_exists(&team_id));
    assert_eq!(h.platform.team_count(), before);
}

#[tokio::test]
async fn test_dynamic_team_is_cleaned_up_when_token_mint_fails() {
    let h = harness().await;
    h.write(
        Operation::Create,
        "role/eph",
        json!({"credential_type": "dynamic_team", "organization": ORG, "team_options": {}}),
    )
    .await
    .unwrap();

    let before = h.platform.team_count();
    h.platform.fail_team_tokens(true);
    let err = h.read("creds/eph").await.unwrap_err();
    assert!(matches!(err, BackendError::Remote { .. }));
    assert_eq!(h.platform.team_count(), before);
}

#[tokio::test]
async fn test_legacy_singleton_lease_only_revokes_matching_token() {
    let h = harness().await;
    h.write(Operation::Create, "role/org", json!({"organization": ORG}))
        .await
        .unwrap();
    let stale_id = h.platform.org_token_id(ORG).unwrap();

    h.write(Operation::Update, "rotate-role/org", json!({})).await.unwrap();
    let current_id = h.platform.org_token_id(ORG).unwrap();
    assert_ne!(stale_id, current_id);

    let lease = |token_id: &str| Secret {
        secret_type: "terraform_token".into(),
        ttl: None,
        max_ttl: None,
        renewable: false,
        internal_data: data(json!({"token_id": token_id, "organization": ORG})),
    };

    h.backend.revoke(&lease(&stale_id)).await.unwrap();
    assert_eq!(h.platform.org_token_id(ORG).as_deref(), Some(current_id.as_str()));

    h.backend.revoke(&lease(&current_id)).await.unwrap();
    assert!(h.platform.org_token_id(ORG).is_none());
}

// ── rotate-role ─────────────────────────────────────────────

#[tokio::test]
async fn test_rotate_role_replaces_singleton_token() {
    let h = harness().await;
    h.write(Operation::Create, "role/legacy", json!({"team_id": TEAM}))
        .await
        .unwrap();
    let before = h.creds("legacy").await;

    h.write(Operation::Update, "rotate-role/legacy", json!({})).await.unwrap();
    let after = h.creds("legacy").await;
    assert_ne!(before.data["token"], after.data["token"]);
    assert_ne!(before.data["token_id"], after.data["token_id"]);
    assert!(!h.platform.secret_is_live(before.data["token"].as_str().unwrap()));
}

#[tokio::test]
async fn test_rotate_role_rejects_multi_token_kinds() {
    let h = harness().await;
    h.write(Operation::Create, "role/u", json!({"user_id": USER})).await.unwrap();
    let err = h.write(Operation::Update, "rotate-role/u", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("cannot rotate credentials for user roles"));
}

// ── Root rotation ───────────────────────────────────────────

#[tokio::test]
async fn test_root_rotation_replaces_and_deletes_management_token() {
    let h = harness().await;

    h.backend.rotate_root().await.unwrap();

    let stored = h.storage.raw_json("config").await.unwrap();
    let new_secret = stored["token"].as_str().unwrap();
    assert_ne!(new_secret, ROOT_SECRET);
    assert_ne!(stored["token_id"], ROOT_TOKEN_ID);
    assert!(!h.platform.secret_is_live(ROOT_SECRET));
    assert!(h.platform.secret_is_live(new_secret));
    assert!(h
        .platform
        .token(stored["token_id"].as_str().unwrap())
        .unwrap()
        .description
        .unwrap()
        .starts_with("Rotated by tfc-secrets ("));

    // the cached client was rebuilt with the new token
    h.write(Operation::Create, "role/after", json!({"user_id": USER})).await.unwrap();
    h.creds("after").await;
}

#[tokio::test]
async fn test_root_rotation_keep_policy_leaves_old_token() {
    let h = harness().await;
    h.write(Operation::Update, "config", json!({"old_token": "keep"})).await.unwrap();

    h.backend.rotate_root().await.unwrap();
    assert!(h.platform.secret_is_live(ROOT_SECRET));
}

#[tokio::test]
async fn test_root_rotation_without_known_token_id_skips_deletion() {
    let h = bare_harness();
    h.write(
        Operation::Create,
        "config",
        json!({"token": ROOT_SECRET, "token_type": "user", "id": USER}),
    )
    .await
    .unwrap();

    h.backend.rotate_root().await.unwrap();
    assert!(h.platform.secret_is_live(ROOT_SECRET));
    assert!(h.storage.raw_json("config").await.unwrap()["token_id"].is_string());
}

#[tokio::test]
async fn test_root_rotation_persist_failure_is_distinguished() {
    let h = harness().await;
    h.storage.fail_puts_on("config");

    let err = h.backend.rotate_root().await.unwrap_err();
    match &err {
        BackendError::RotationNotPersisted { kind, token_id, .. } => {
            assert_eq!(kind, "user");
            assert!(h.platform.token_exists(token_id));
        }
        other => panic!("expected RotationNotPersisted, got {other:?}"),
    }

    let stored = h.storage.raw_json("config").await.unwrap();
    assert_eq!(stored["token"], ROOT_SECRET);
    assert_eq!(stored["token_id"], ROOT_TOKEN_ID);
    assert!(h.platform.secret_is_live(ROOT_SECRET));
}

#[tokio::test]
async fn test_root_rotation_requires_config_fields() {
    let h = bare_harness();
    assert!(matches!(h.backend.rotate_root().await, Err(BackendError::Config(_))));

    h.write(Operation::Create, "config", json!({"token": ROOT_SECRET})).await.unwrap();
    let err = h.backend.rotate_root().await.unwrap_err();
    assert!(matches!(err, BackendError::Config(_)));
    assert!(err.to_string().contains("token_type and id"));
    assert_eq!(h.platform.client_builds(), 0, "no remote call before validation");
}

#[tokio::test]
async fn test_config_rotate_path_triggers_rotation() {
    let h = harness().await;
    h.write(Operation::Update, "config/rotate", json!({})).await.unwrap();
    assert!(!h.platform.secret_is_live(ROOT_SECRET));
}

// ── Config ──────────────────────────────────────────────────

#[tokio::test]
async fn test_config_read_hides_token_and_update_requires_existing() {
    let h = bare_harness();
    let err = h
        .write(Operation::Update, "config", json!({"token": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::NotFound(_)));
    assert!(h.read("config").await.unwrap().is_none());

    let h = harness().await;
    let resp = h.read("config").await.unwrap().unwrap();
    assert!(!resp.data.contains_key("token"));
    assert_eq!(resp.data["address"], "https://app.terraform.io");
    assert_eq!(resp.data["token_type"], "user");
}

#[tokio::test]
async fn test_config_write_invalidates_cached_client() {
    let h = harness().await;
    h.write(Operation::Create, "role/u", json!({"user_id": USER})).await.unwrap();
    h.creds("u").await;
    h.creds("u").await;
    assert_eq!(h.platform.client_builds(), 1);

    h.write(Operation::Update, "config", json!({"address": "https://tfe.example.com"}))
        .await
        .unwrap();
    h.creds("u").await;
    assert_eq!(h.platform.client_builds(), 2);

    h.write(Operation::Delete, "config", json!({})).await.unwrap();
    assert!(matches!(h.read("creds/u").await, Err(BackendError::Config(_))));
}

#[tokio::test]
async fn test_rotation_policy_without_host_support_warns() {
    let h = harness().await;
    let resp = h
        .write(Operation::Update, "config", json!({"rotation_period": "24h"}))
        .await
        .unwrap()
        .expect("warning response");
    assert!(resp.warnings[0].contains("not supported"));
    assert_eq!(h.storage.raw_json("config").await.unwrap()["rotation_period"], 86_400);
}

#[tokio::test]
async fn test_rotation_policy_registers_and_deregisters_with_scheduler() {
    let platform = FakePlatform::new();
    let storage = FlakyStorage::default();
    let (scheduler, _ticks) = RotationScheduler::new();
    let scheduler = Arc::new(scheduler);
    let backend = Backend::new(Arc::new(storage.clone()), platform.factory())
        .with_rotation_manager(scheduler.clone());
    let h = common::Harness { backend, platform, storage };

    h.write(
        Operation::Create,
        "config",
        json!({"token": ROOT_SECRET, "token_type": "user", "id": USER, "rotation_period": 3600}),
    )
    .await
    .unwrap();
    assert!(scheduler.is_registered("config"));

    // switching to a cron schedule replaces the period job
    h.write(Operation::Update, "config", json!({"rotation_period": 0, "rotation_schedule": "0 3 * * *"}))
        .await
        .unwrap();
    assert!(scheduler.is_registered("config"));
    assert_eq!(scheduler.job_count(), 1);
    let stored = h.storage.raw_json("config").await.unwrap();
    assert_eq!(stored["rotation_schedule"], "0 3 * * *");
    assert_eq!(stored["rotation_period"], 0);

    let err = h
        .write(Operation::Update, "config", json!({"rotation_schedule": "99 99 99 99 99"}))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Validation(_)), "got {err:?}");
    assert_eq!(h.storage.raw_json("config").await.unwrap()["rotation_schedule"], "0 3 * * *");

    h.write(Operation::Update, "config", json!({"disable_automated_rotation": true}))
        .await
        .unwrap();
    assert!(!scheduler.is_registered("config"));

    // registration succeeded, then the write failed
    h.storage.fail_puts_on("config");
    let err = h
        .write(Operation::Update, "config", json!({"disable_automated_rotation": false}))
        .await
        .unwrap_err();
    match err {
        BackendError::StorageAfterRotationJob { operation, path, .. } => {
            assert_eq!(operation, "register");
            assert_eq!(path, "config");
        }
        other => panic!("expected StorageAfterRotationJob, got {other:?}"),
    }
}

struct RejectingManager;

#[async_trait]
impl RotationManager for RejectingManager {
    async fn register(&self, _job: RotationJob) -> Result<(), RotationManagerError> {
        Err(RotationManagerError::Rejected("quota exceeded".into()))
    }

    async fn deregister(&self, _path: &str) -> Result<(), RotationManagerError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_rejected_rotation_job_saves_nothing() {
    let platform = FakePlatform::new();
    let storage = FlakyStorage::default();
    let backend = Backend::new(Arc::new(storage.clone()), platform.factory())
        .with_rotation_manager(Arc::new(RejectingManager));
    let h = common::Harness { backend, platform, storage };

    let err = h
        .write(
            Operation::Create,
            "config",
            json!({"token": ROOT_SECRET, "token_type": "user", "id": USER, "rotation_period": 3600}),
        )
        .await
        .unwrap_err();
    match err {
        BackendError::Validation(msg) => assert!(msg.contains("quota exceeded"), "got {msg}"),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(h.storage.raw_json("config").await.is_none());
}

// ── Routing ─────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_paths_and_operations() {
    let h = harness().await;
    assert!(matches!(h.read("secret/x").await, Err(BackendError::UnsupportedPath(_))));
    assert!(matches!(
        h.write(Operation::Delete, "creds/x", json!({})).await,
        Err(BackendError::UnsupportedOperation { .. })
    ));
}
