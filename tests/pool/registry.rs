mod common;

use common::{GB, admin_blob, harness};
use drivepool::core::error::PoolError;
use drivepool::google::{IdentityApi, Quota, RemoteFile};
use drivepool::pool::accounts::AccountKind;
use drivepool::pool::file_index::{self, FileIndexEntry};

fn file(id: &str, size: u64) -> RemoteFile {
    RemoteFile {
        id: id.to_string(),
        name: format!("{}.dat", id),
        size,
        mime_type: "application/octet-stream".to_string(),
        created_time: None,
        modified_time: None,
    }
}

#[test]
fn find_by_owner_pages_with_has_more() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-page");
    h.engine.create_project("Page", &blob, 3, "U1").unwrap();

    let first = h.engine.accounts().find_by_owner("U1", 0, 3, false).unwrap();
    assert_eq!(first.accounts.len(), 3);
    assert!(first.has_more);
    assert!(first.accounts.iter().all(|a| a.credential.is_none()));

    let second = h.engine.accounts().find_by_owner("U1", 1, 3, true).unwrap();
    assert_eq!(second.accounts.len(), 1);
    assert!(!second.has_more);
    assert!(second.accounts[0].credential.is_some());

    let mut ids: Vec<_> = first
        .accounts
        .iter()
        .chain(second.accounts.iter())
        .map(|a| a.id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[test]
fn find_by_id_unknown_account() {
    let h = harness();
    assert!(matches!(
        h.engine.accounts().find_by_id("A_nope"),
        Err(PoolError::AccountNotFound(_))
    ));
}

#[test]
fn refresh_keeps_available_consistent() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-refresh");
    let created = h.engine.create_project("Refresh", &blob, 1, "U1").unwrap();
    let account = &created.batch.provisioned[0];
    h.google.set_quota(
        &account.identity_email,
        Quota {
            limit: 15 * GB,
            usage: 6 * GB,
        },
    );

    let refreshed = h.engine.refresh_quota(&account.id).unwrap();
    assert_eq!(refreshed.available_bytes, 9 * GB);
    // Identity and ownership untouched.
    assert_eq!(refreshed.owner, account.owner);
    assert_eq!(refreshed.identity_email, account.identity_email);

    let stored = h.engine.accounts().find_by_id(&account.id).unwrap();
    assert_eq!(stored.usage_bytes, 6 * GB);
    assert_eq!(stored.available_bytes, stored.limit_bytes - stored.usage_bytes);
}

#[test]
fn refresh_failure_is_reported_as_quota_query_failed() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-qfail");
    let created = h.engine.create_project("QFail", &blob, 1, "U1").unwrap();
    let account = &created.batch.provisioned[0];
    h.google.fail_quota_for(&account.identity_email);

    let err = h.engine.refresh_quota(&account.id).unwrap_err();
    assert!(matches!(err, PoolError::QuotaQueryFailed { ref account_id, .. } if *account_id == account.id));
}

#[test]
fn bulk_refresh_isolates_failures() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-bulk");
    let created = h.engine.create_project("Bulk", &blob, 3, "U1").unwrap();
    let broken = &created.batch.provisioned[1];
    h.google.fail_quota_for(&broken.identity_email);

    let report = h.engine.refresh_all_quota("U1").unwrap();
    // Admin plus three automated accounts, one of which fails.
    assert_eq!(report.refreshed.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].account_id, broken.id);
    assert!(!report.is_clean());
    for account in &report.refreshed {
        assert_eq!(account.available_bytes, account.limit_bytes - account.usage_bytes);
    }

    let scoped = h
        .engine
        .accounts()
        .refresh_project_quota(&created.project.id)
        .unwrap();
    assert_eq!(scoped.refreshed.len() + scoped.failures.len(), 4);
}

#[test]
fn refresh_all_covers_every_owner_and_disabled_accounts() {
    let h = harness();
    let first = h
        .engine
        .create_project("One", &admin_blob(&h.google, "proj-all-1"), 2, "U1")
        .unwrap();
    let second = h
        .engine
        .create_project("Two", &admin_blob(&h.google, "proj-all-2"), 1, "U2")
        .unwrap();
    h.engine.disable_project(&second.project.id).unwrap();
    let target = &second.batch.provisioned[0];
    h.google.set_quota(
        &target.identity_email,
        Quota {
            limit: 15 * GB,
            usage: 4 * GB,
        },
    );
    h.google
        .fail_quota_for(&first.batch.provisioned[0].identity_email);

    let report = h.engine.refresh_every_account().unwrap();
    assert_eq!(report.refreshed.len(), 4);
    assert_eq!(report.failures.len(), 1);
    let refreshed = report
        .refreshed
        .iter()
        .find(|a| a.id == target.id)
        .unwrap();
    assert!(refreshed.disabled);
    assert_eq!(refreshed.available_bytes, 11 * GB);
}

#[test]
fn bulk_refresh_for_owner_without_accounts_is_empty() {
    let h = harness();
    let report = h.engine.refresh_all_quota("nobody").unwrap();
    assert!(report.is_clean());
    assert!(report.refreshed.is_empty());
}

#[test]
fn update_credential_reparses_identity() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-rotate");
    let created = h.engine.create_project("Rotate", &blob, 1, "U1").unwrap();
    let account = &created.batch.provisioned[0];
    let admin = h.google.admin_credential("proj-rotate");
    let identity = h
        .google
        .identities("proj-rotate")
        .into_iter()
        .find(|i| i.email == account.identity_email)
        .unwrap();
    let fresh = h.google.create_key(&admin, &identity).unwrap();

    let updated = h
        .engine
        .accounts()
        .update_credential(&account.id, fresh.expose())
        .unwrap();
    assert_eq!(updated.identity_email, account.identity_email);
    assert_eq!(
        updated.credential.as_ref().map(|c| c.fingerprint()),
        Some(fresh.fingerprint())
    );
    assert_ne!(
        account.credential.as_ref().map(|c| c.fingerprint()),
        Some(fresh.fingerprint())
    );

    assert!(matches!(
        h.engine.accounts().update_credential(&account.id, "garbage"),
        Err(PoolError::CredentialParseFailed(_))
    ));
}

#[test]
fn delete_file_drops_index_and_refreshes_quota() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-files");
    let created = h.engine.create_project("Files", &blob, 1, "U1").unwrap();
    let account = &created.batch.provisioned[0];
    h.google.put_file(&account.identity_email, file("f1", 2 * GB));
    h.google.put_file(&account.identity_email, file("f2", GB));
    file_index::insert_entries(
        h.engine.store(),
        &[FileIndexEntry {
            id: "F_1".to_string(),
            file_id: "f1".to_string(),
            name: "f1.dat".to_string(),
            size: 2 * GB,
            mime_type: "application/octet-stream".to_string(),
            account_id: account.id.clone(),
            owner: "U1".to_string(),
            project_id: created.project.id.clone(),
            created_time: None,
            modified_time: None,
            sync_time: "1700000000Z".to_string(),
        }],
    )
    .unwrap();

    let after = h.engine.accounts().delete_file(&account.id, "f1").unwrap();
    assert_eq!(after.usage_bytes, GB);
    assert!(
        file_index::list_for_account(h.engine.store(), &account.id)
            .unwrap()
            .is_empty()
    );

    // Already gone at the provider: still succeeds.
    assert!(h.engine.accounts().delete_file(&account.id, "f1").is_ok());
}

#[test]
fn one_admin_per_project_is_enforced() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-admin");
    let created = h.engine.create_project("Admin", &blob, 0, "U1").unwrap();

    let mut second = created.admin_account.clone();
    second.id = "A_second_admin".to_string();
    let err = h.engine.accounts().save(&second).unwrap_err();
    assert!(matches!(err, PoolError::Sqlite(_)));

    second.kind = AccountKind::Automated;
    h.engine.accounts().save(&second).unwrap();
    assert_eq!(h.engine.accounts().count_accounts(None).unwrap(), 2);
}
