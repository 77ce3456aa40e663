mod common;

use common::{admin_blob, harness};
use drivepool::core::error::PoolError;
use drivepool::pool::accounts::AccountKind;
use drivepool::pool::file_index::{self, FileIndexEntry};

fn index_entry(account_id: &str, project_id: &str, file_id: &str) -> FileIndexEntry {
    FileIndexEntry {
        id: format!("F_{}", file_id),
        file_id: file_id.to_string(),
        name: format!("{}.bin", file_id),
        size: 10,
        mime_type: "application/octet-stream".to_string(),
        account_id: account_id.to_string(),
        owner: "U1".to_string(),
        project_id: project_id.to_string(),
        created_time: None,
        modified_time: None,
        sync_time: "1700000000Z".to_string(),
    }
}

#[test]
fn create_project_with_admin_and_two_accounts() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-123");

    let created = h.engine.create_project("Team Drive", &blob, 2, "U1").unwrap();

    assert_eq!(created.project.external_project_id, "proj-123");
    assert_eq!(created.project.display_name, "Team Drive");
    assert_eq!(created.project.owner, "U1");
    assert!(!created.project.disabled);
    assert!(created.batch.is_complete());

    let accounts = h
        .engine
        .accounts()
        .list_by_project(&created.project.id, false)
        .unwrap();
    assert_eq!(accounts.len(), 3);
    let admins: Vec<_> = accounts.iter().filter(|a| a.kind == AccountKind::Admin).collect();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].id, created.admin_account.id);
    let automated: Vec<_> = accounts
        .iter()
        .filter(|a| a.kind == AccountKind::Automated)
        .collect();
    assert_eq!(automated.len(), 2);
    for account in automated {
        assert_eq!(account.owner, "U1");
        assert!(account.limit_bytes > 0);
        assert_eq!(account.available_bytes, account.limit_bytes - account.usage_bytes);
        assert!(account.quota_updated_at.is_some());
    }

    let enabled = h.google.enabled("proj-123");
    assert!(enabled.contains(&"iam.googleapis.com".to_string()));
    assert!(enabled.contains(&"drive.googleapis.com".to_string()));
}

#[test]
fn duplicate_external_project_writes_nothing() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-dup");
    h.engine.create_project("First", &blob, 1, "U1").unwrap();
    let accounts_before = h.engine.accounts().count_accounts(None).unwrap();

    let err = h.engine.create_project("Second", &blob, 1, "U2").unwrap_err();
    assert!(matches!(err, PoolError::DuplicateProjectId(ref id) if id == "proj-dup"));

    assert_eq!(h.engine.projects().list_projects(None).unwrap().len(), 1);
    assert_eq!(h.engine.accounts().count_accounts(None).unwrap(), accounts_before);
    assert_eq!(h.engine.accounts().count_accounts(Some("U2")).unwrap(), 0);
}

#[test]
fn api_enablement_failure_creates_nothing() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-apis");
    h.google.fail_api_enablement(true);

    let err = h.engine.create_project("Apis", &blob, 2, "U1").unwrap_err();
    assert!(matches!(err, PoolError::RequiredApisNotEnabled { ref project, .. } if project == "proj-apis"));
    assert!(h.engine.projects().list_projects(None).unwrap().is_empty());
    assert_eq!(h.engine.accounts().count_accounts(None).unwrap(), 0);
}

#[test]
fn unparseable_credential_is_rejected() {
    let h = harness();
    let err = h.engine.create_project("Bad", "{\"type\":\"x\"}", 0, "U1").unwrap_err();
    assert!(matches!(err, PoolError::CredentialParseFailed(_)));
}

#[test]
fn disable_and_enable_cascade_to_accounts() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-toggle");
    let created = h.engine.create_project("Toggle", &blob, 2, "U1").unwrap();
    let id = &created.project.id;

    assert_eq!(h.engine.disable_project(id).unwrap(), 3);
    assert!(h.engine.projects().get_project(id).unwrap().disabled);
    let accounts = h.engine.accounts().list_by_project(id, false).unwrap();
    assert!(accounts.iter().all(|a| a.disabled));
    // Disabled accounts drop out of normal listings but are retained.
    let page = h.engine.accounts().find_by_owner("U1", 0, 10, false).unwrap();
    assert!(page.accounts.is_empty());
    assert_eq!(h.engine.accounts().count_accounts(Some("U1")).unwrap(), 3);

    assert_eq!(h.engine.enable_project(id).unwrap(), 3);
    let accounts = h.engine.accounts().list_by_project(id, false).unwrap();
    assert!(accounts.iter().all(|a| !a.disabled));
}

#[test]
fn toggling_unknown_project_fails() {
    let h = harness();
    assert!(matches!(
        h.engine.disable_project("P_missing"),
        Err(PoolError::ProjectNotFound(_))
    ));
}

#[test]
fn delete_removes_accounts_and_index_entries() {
    let h = harness();
    let doomed = h
        .engine
        .create_project("Doomed", &admin_blob(&h.google, "proj-doomed"), 2, "U1")
        .unwrap();
    let kept = h
        .engine
        .create_project("Kept", &admin_blob(&h.google, "proj-kept"), 1, "U1")
        .unwrap();

    let doomed_id = doomed.project.id.clone();
    let store = h.engine.store();
    let a0 = &doomed.batch.provisioned[0].id;
    let k0 = &kept.batch.provisioned[0].id;
    file_index::insert_entries(
        store,
        &[
            index_entry(a0, &doomed_id, "f1"),
            index_entry(a0, &doomed_id, "f2"),
            index_entry(k0, &kept.project.id, "f3"),
        ],
    )
    .unwrap();

    let summary = h.engine.delete_project(&doomed_id).unwrap();
    assert_eq!(summary.accounts, 3);
    assert_eq!(summary.file_index_entries, 2);

    assert!(matches!(
        h.engine.projects().get_project(&doomed_id),
        Err(PoolError::ProjectNotFound(_))
    ));
    assert!(h.engine.accounts().list_by_project(&doomed_id, false).unwrap().is_empty());
    assert_eq!(file_index::count_for_project(store, &doomed_id).unwrap(), 0);

    assert_eq!(file_index::count_for_project(store, &kept.project.id).unwrap(), 1);
    assert_eq!(
        h.engine.accounts().list_by_project(&kept.project.id, false).unwrap().len(),
        2
    );

    // The external id is free again.
    let again = h
        .engine
        .create_project("Again", &admin_blob(&h.google, "proj-doomed"), 0, "U1");
    assert!(again.is_ok());
}

#[test]
fn list_projects_orders_enabled_first_with_counts() {
    let h = harness();
    let a = h
        .engine
        .create_project("A", &admin_blob(&h.google, "proj-a"), 2, "U1")
        .unwrap();
    let b = h
        .engine
        .create_project("B", &admin_blob(&h.google, "proj-b"), 0, "U1")
        .unwrap();
    h.engine
        .create_project("C", &admin_blob(&h.google, "proj-c"), 0, "U2")
        .unwrap();
    h.engine.disable_project(&a.project.id).unwrap();

    let listed = h.engine.projects().list_projects(Some("U1")).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].project.id, b.project.id);
    assert_eq!(listed[0].account_count, 1);
    assert_eq!(listed[1].project.id, a.project.id);
    assert_eq!(listed[1].account_count, 3);
    assert_eq!(listed[1].automated_count, 2);

    assert_eq!(h.engine.projects().list_projects(None).unwrap().len(), 3);
}

#[test]
fn legacy_project_derives_admin_account_once() {
    let h = harness();
    let blob = admin_blob(&h.google, "proj-legacy");
    let project = h
        .engine
        .projects()
        .register_legacy_project("Legacy", &blob, "U1")
        .unwrap();
    assert!(project.admin_credential.is_some());
    assert_eq!(h.engine.accounts().count_accounts(None).unwrap(), 0);

    let admin = h.engine.accounts().find_admin_account(&project).unwrap();
    assert_eq!(admin.kind, AccountKind::LegacyAdmin);
    let again = h.engine.accounts().find_admin_account(&project).unwrap();
    assert_eq!(admin.id, again.id);
    assert_eq!(h.engine.accounts().count_accounts(None).unwrap(), 1);

    let report = h.engine.provision_accounts(&project.id, 2).unwrap();
    assert!(report.is_complete());
    assert_eq!(h.engine.accounts().count_accounts(None).unwrap(), 3);

    let err = h
        .engine
        .projects()
        .register_legacy_project("Legacy again", &blob, "U1")
        .unwrap_err();
    assert!(matches!(err, PoolError::DuplicateProjectId(_)));
}
