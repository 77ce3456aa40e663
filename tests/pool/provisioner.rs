mod common;

use common::{admin_blob, harness, harness_with};
use drivepool::core::config::{Backoff, BatchPolicy, GIB, PoolConfig};
use drivepool::core::error::PoolError;
use drivepool::pool::accounts::AccountKind;
use std::time::Duration;

#[test]
fn readiness_poll_stops_at_attempt_ceiling() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-slow");
    let created = h.engine.create_project("Slow", &blob, 0, "U1").unwrap();
    h.google.set_not_ready_polls(1_000);
    let calls_before = h.google.quota_calls();

    let err = h
        .engine
        .provisioner()
        .provision_one(&created.project)
        .unwrap_err();

    match err {
        PoolError::QuotaNotReadyTimeout { attempts, last_error } => {
            assert_eq!(attempts, 30);
            assert_eq!(last_error.status, Some(403));
        }
        other => panic!("expected QuotaNotReadyTimeout, got {other:?}"),
    }
    assert_eq!(h.google.quota_calls() - calls_before, 30);
    // One pause between consecutive attempts, none after the last.
    let sleeps = h.clock.sleeps();
    assert_eq!(sleeps.len(), 29);
    assert!(sleeps.iter().all(|d| *d == Duration::from_secs(5)));
    // Nothing persisted for the failed account.
    let accounts = h.engine.accounts().list_by_project(&created.project.id, false).unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].kind, AccountKind::Admin);
}

#[test]
fn readiness_poll_returns_as_soon_as_quota_answers() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-ready");
    let created = h.engine.create_project("Ready", &blob, 0, "U1").unwrap();
    h.google.set_not_ready_polls(3);

    let account = h
        .engine
        .provisioner()
        .provision_one(&created.project)
        .unwrap();

    assert_eq!(h.clock.sleeps().len(), 3);
    assert_eq!(account.kind, AccountKind::Automated);
    assert_eq!(account.owner, "U1");
    assert_eq!(account.limit_bytes, 15 * GIB);
    assert_eq!(account.usage_bytes, 0);
    assert_eq!(account.available_bytes, 15 * GIB);
    assert!(account.quota_updated_at.is_some());
    assert!(account.name.starts_with("sa-"));

    let stored = h.engine.accounts().find_by_id(&account.id).unwrap();
    assert_eq!(stored.identity_email, account.identity_email);
    assert!(stored.credential.is_some());
}

#[test]
fn linear_backoff_grows_between_attempts() {
    let mut config = PoolConfig::default();
    config.readiness.max_attempts = 4;
    config.readiness.delay_secs = 2;
    config.readiness.backoff = Backoff::Linear;
    let h = harness_with(config);
    let blob = admin_blob(&h.google, "proj-linear");
    let created = h.engine.create_project("Linear", &blob, 0, "U1").unwrap();
    h.google.set_not_ready_polls(10);

    let err = h.engine.provisioner().provision_one(&created.project).unwrap_err();
    assert!(matches!(err, PoolError::QuotaNotReadyTimeout { attempts: 4, .. }));
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(6)]
    );
}

#[test]
fn identity_creation_failure_surfaces_verbatim() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-iam");
    let created = h.engine.create_project("Iam", &blob, 0, "U1").unwrap();
    h.google.fail_identity_creation(true);

    let err = h.engine.provisioner().provision_one(&created.project).unwrap_err();
    assert!(matches!(err, PoolError::IdentityCreateFailed(_)));
    assert!(err.is_external());
}

#[test]
fn pooled_batch_collects_failures_without_aborting() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-pool");
    let created = h.engine.create_project("Pool", &blob, 0, "U1").unwrap();
    h.google.fail_all_key_creation(true);

    let report = h.engine.provision_accounts(&created.project.id, 3).unwrap();
    assert_eq!(report.requested, 3);
    assert!(report.provisioned.is_empty());
    assert_eq!(report.failures.len(), 3);
    assert!(
        report
            .failures
            .iter()
            .all(|f| matches!(f.error, PoolError::CredentialCreateFailed(_)))
    );

    h.google.fail_all_key_creation(false);
    let report = h.engine.provision_accounts(&created.project.id, 4).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.provisioned.len(), 4);
    let mut names: Vec<_> = report.provisioned.iter().map(|a| a.name.clone()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 4);
}

#[test]
fn sequential_batch_aborts_on_first_failure() {
    let mut config = PoolConfig::default();
    config.provisioning.batch_policy = BatchPolicy::Sequential;
    let h = harness_with(config);
    let blob = admin_blob(&h.google, "proj-seq");
    let created = h.engine.create_project("Seq", &blob, 1, "U1").unwrap();
    assert_eq!(created.batch.provisioned.len(), 1);

    h.google.fail_identity_creation(true);
    let err = h.engine.provision_accounts(&created.project.id, 3).unwrap_err();
    assert!(matches!(err, PoolError::IdentityCreateFailed(_)));
    // Only the admin and the account from creation exist.
    assert_eq!(h.engine.accounts().count_accounts(Some("U1")).unwrap(), 2);
}

#[test]
fn accounts_for_disabled_project_start_disabled() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-off");
    let created = h.engine.create_project("Off", &blob, 0, "U1").unwrap();
    h.engine.disable_project(&created.project.id).unwrap();

    let project = h.engine.projects().get_project(&created.project.id).unwrap();
    let account = h.engine.provisioner().provision_one(&project).unwrap();
    assert!(account.disabled);
}
