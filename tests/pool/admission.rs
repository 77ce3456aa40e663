mod common;

use common::{GB, Harness, admin_blob, harness_with};
use drivepool::core::config::PoolConfig;
use drivepool::core::error::PoolError;
use drivepool::google::Quota;
use drivepool::pool::accounts::StorageAccount;
use rusqlite::params;
use std::collections::HashSet;

fn one_gb_buffer() -> PoolConfig {
    let mut config = PoolConfig::default();
    config.admission.safety_buffer_bytes = GB;
    config
}

/// Project "proj-adm" owned by U1 with `n` automated accounts, each at
/// limit 15 GB / usage 1 GB.
fn pool_with_accounts(n: usize) -> (Harness, String, Vec<StorageAccount>) {
    let h = harness_with(one_gb_buffer());
    let blob = admin_blob(&h.google, "proj-adm");
    let created = h.engine.create_project("Admission", &blob, n, "U1").unwrap();
    let mut accounts = Vec::new();
    for account in &created.batch.provisioned {
        h.google.set_quota(
            &account.identity_email,
            Quota {
                limit: 15 * GB,
                usage: GB,
            },
        );
        accounts.push(h.engine.refresh_quota(&account.id).unwrap());
    }
    (h, created.project.id, accounts)
}

#[test]
fn admits_write_that_fits_under_buffer() {
    let (h, _, accounts) = pool_with_accounts(1);
    let a = &accounts[0];
    assert_eq!(a.available_bytes, 14 * GB);

    let grant = h.engine.select_account_for_write("U1", 2 * GB).unwrap();
    assert_eq!(grant.account_id, a.id);
    assert!(grant.access_token.token.starts_with("ya29."));
    assert!(grant.access_token.expires_in_secs > 0);
}

#[test]
fn rejects_write_larger_than_any_account() {
    let (h, _, _) = pool_with_accounts(1);
    let err = h.engine.select_account_for_write("U1", 20 * GB).unwrap_err();
    match err {
        PoolError::NoCapacityAvailable { owner, size_bytes } => {
            assert_eq!(owner, "U1");
            assert_eq!(size_bytes, 20 * GB);
        }
        other => panic!("expected NoCapacityAvailable, got {other:?}"),
    }
}

#[test]
fn buffer_is_required_on_top_of_write_size() {
    let (h, _, _) = pool_with_accounts(1);
    // 14 GB available: 13 GB + 1 GB buffer is not strictly below it.
    assert!(h.engine.select_account_for_write("U1", 13 * GB).is_err());
    assert!(h.engine.select_account_for_write("U1", 13 * GB - 1).is_ok());
}

#[test]
fn other_owners_and_admin_accounts_are_never_selected() {
    let (h, _, _) = pool_with_accounts(0);
    // U1 only owns the admin account.
    assert!(matches!(
        h.engine.select_account_for_write("U1", 1),
        Err(PoolError::NoCapacityAvailable { .. })
    ));
    assert!(matches!(
        h.engine.select_account_for_write("U2", 1),
        Err(PoolError::NoCapacityAvailable { .. })
    ));
}

#[test]
fn stale_cache_fails_closed_on_recheck() {
    let (h, _, accounts) = pool_with_accounts(1);
    let id = accounts[0].id.clone();
    // Provider truth: 1 GB left; cache still claims 10 GB.
    h.engine
        .store()
        .broker()
        .write("test", "stale_cache", |conn| {
            Ok(conn.execute(
                "UPDATE storage_accounts SET usage_bytes = ?2, available_bytes = ?3 WHERE id = ?1",
                params![id, (14 * GB) as i64, (10 * GB) as i64],
            )?)
        })
        .unwrap();

    let err = h.engine.select_account_for_write("U1", 2 * GB).unwrap_err();
    assert!(matches!(err, PoolError::NoCapacityAvailable { .. }));
}

#[test]
fn disabled_project_blocks_admission_until_enabled() {
    let (h, project_id, accounts) = pool_with_accounts(1);
    h.engine.disable_project(&project_id).unwrap();
    assert!(matches!(
        h.engine.select_account_for_write("U1", 2 * GB),
        Err(PoolError::NoCapacityAvailable { .. })
    ));

    h.engine.enable_project(&project_id).unwrap();
    let grant = h.engine.select_account_for_write("U1", 2 * GB).unwrap();
    assert_eq!(grant.account_id, accounts[0].id);
}

#[test]
fn selection_spreads_across_qualifying_accounts() {
    let (h, _, accounts) = pool_with_accounts(3);
    let mut seen = HashSet::new();
    for _ in 0..60 {
        let grant = h.engine.select_account_for_write("U1", GB).unwrap();
        seen.insert(grant.account_id);
    }
    let ids: HashSet<_> = accounts.iter().map(|a| a.id.clone()).collect();
    assert!(seen.is_subset(&ids));
    assert!(seen.len() >= 2);
}

#[test]
fn recorded_write_updates_cache_until_refresh() {
    let (h, _, accounts) = pool_with_accounts(1);
    let id = &accounts[0].id;

    let after = h.engine.record_write(id, 3 * GB).unwrap();
    assert_eq!(after.usage_bytes, 4 * GB);
    assert_eq!(after.available_bytes, 11 * GB);
    assert_eq!(after.limit_bytes, 15 * GB);

    // 11 GB cached: a 10 GB write no longer fits with the buffer.
    assert!(h.engine.select_account_for_write("U1", 10 * GB).is_err());

    // The provider never saw those bytes; refresh restores its view.
    let refreshed = h.engine.refresh_quota(id).unwrap();
    assert_eq!(refreshed.usage_bytes, GB);
    assert_eq!(refreshed.available_bytes, 14 * GB);
}

#[test]
fn token_mint_failure_is_reported() {
    let (h, _, _) = pool_with_accounts(1);
    h.google.fail_token_minting(true);
    let err = h.engine.select_account_for_write("U1", GB).unwrap_err();
    assert!(matches!(err, PoolError::TokenMintFailed(_)));
}

#[test]
fn record_write_on_unknown_account() {
    let (h, _, _) = pool_with_accounts(0);
    assert!(matches!(
        h.engine.record_write("A_missing", 1),
        Err(PoolError::AccountNotFound(_))
    ));
}
