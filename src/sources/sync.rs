//! `sync`: reconcile discovered credentials into the canonical keyring.

use std::path::PathBuf;

use crate::keyring::{
    key_id_for, KeyRecord, KeyStatus, Keyring, KeyringStore, RotationEvent, RotationEventKind,
};
use crate::probe::HealthProber;
use crate::refresh::{RefreshClient, RefreshOutcome};

use super::discovery::{read_all, DiscoveredCredential};

/// Run one full sync pass: discover, merge, refresh expired keys, prune dead
/// ones. Mutates `keyring` in place; persistence is the caller's job. Every
/// event this pass produces goes through `store` so the human log file stays
/// in lockstep with the in-memory rotation log.
pub async fn sync(
    keyring: &mut Keyring,
    sources: &[PathBuf],
    refresh_client: &RefreshClient,
    prober: &HealthProber,
    store: &KeyringStore,
    now: i64,
) {
    merge_discovered(keyring, read_all(sources), store, now);
    refresh_expired(keyring, refresh_client, store, now).await;
    enrich_new_keys_with_profile(keyring, prober).await;
    prune_dead(keyring, store, now);
}

fn merge_discovered(
    keyring: &mut Keyring,
    discovered: Vec<DiscoveredCredential>,
    store: &KeyringStore,
    now: i64,
) {
    for cred in discovered {
        let key_id = key_id_for(&cred.access_token);

        match keyring.keys.get_mut(&key_id) {
            Some(existing) => {
                existing.access_token = cred.access_token;
                existing.refresh_token = cred.refresh_token;
                existing.expires_at = cred.expires_at;
            }
            None => {
                keyring.keys.insert(
                    key_id.clone(),
                    KeyRecord {
                        access_token: cred.access_token,
                        refresh_token: cred.refresh_token,
                        expires_at: cred.expires_at,
                        status: KeyStatus::Active,
                        account_uuid: None,
                        account_email: None,
                        last_health_check: None,
                        last_usage: None,
                        added_at: now,
                    },
                );
                store.append_event(
                    keyring,
                    RotationEvent {
                        timestamp: now,
                        event: RotationEventKind::KeyAdded,
                        key_id: Some(key_id),
                        reason: Some("discovered".to_string()),
                        from_key_id: None,
                        to_key_id: None,
                        account_email: None,
                        predictive: None,
                    },
                );
            }
        }
    }
}

async fn refresh_expired(
    keyring: &mut Keyring,
    refresh_client: &RefreshClient,
    store: &KeyringStore,
    now: i64,
) {
    let expired_ids: Vec<String> = keyring
        .keys
        .iter()
        .filter(|(_, record)| {
            record.status == KeyStatus::Expired && record.expires_at.is_some_and(|exp| exp < now)
        })
        .map(|(id, _)| id.clone())
        .collect();

    for key_id in expired_ids {
        let refresh_token = match keyring.keys.get(&key_id) {
            Some(record) => record.refresh_token.clone(),
            None => continue,
        };

        match refresh_client.refresh(&refresh_token).await {
            Ok(RefreshOutcome::Refreshed {
                access_token,
                refresh_token,
                expires_at,
            }) => {
                if let Some(record) = keyring.keys.get_mut(&key_id) {
                    record.access_token = access_token;
                    record.refresh_token = refresh_token;
                    record.expires_at = Some(expires_at);
                    record.status = KeyStatus::Active;
                }
            }
            Ok(RefreshOutcome::InvalidGrant) => {
                let account_email = keyring
                    .keys
                    .get(&key_id)
                    .and_then(|r| r.account_email.clone());
                if let Some(record) = keyring.keys.get_mut(&key_id) {
                    record.status = KeyStatus::Invalid;
                }
                store.append_event(
                    keyring,
                    RotationEvent {
                        timestamp: now,
                        event: RotationEventKind::KeyRemoved,
                        key_id: Some(key_id),
                        reason: Some("refresh_token_invalid_grant".to_string()),
                        from_key_id: None,
                        to_key_id: None,
                        account_email,
                        predictive: None,
                    },
                );
            }
            Ok(RefreshOutcome::Transient(reason)) => {
                tracing::debug!(key_id = %key_id, reason = %reason, "transient refresh failure, retrying next tick");
            }
            Err(e) => {
                tracing::error!(key_id = %key_id, error = %e, "unexpected error refreshing key");
            }
        }
    }
}

async fn enrich_new_keys_with_profile(keyring: &mut Keyring, prober: &HealthProber) {
    let candidates: Vec<String> = keyring
        .keys
        .iter()
        .filter(|(_, record)| record.account_uuid.is_none() && record.account_email.is_none())
        .map(|(id, _)| id.clone())
        .collect();

    for key_id in candidates {
        let access_token = match keyring.keys.get(&key_id) {
            Some(record) => record.access_token.clone(),
            None => continue,
        };

        if let Some(profile) = prober.fetch_profile(&access_token).await {
            if let Some(record) = keyring.keys.get_mut(&key_id) {
                record.account_uuid = profile.uuid;
                record.account_email = profile.email;
            }
        }
    }
}

/// Remove every `invalid` key except the currently-active one. Each pruned
/// key first gets an `account_auth_failed` event, then is deleted; log
/// entries for the pruned id are dropped except `account_auth_failed` ones.
fn prune_dead(keyring: &mut Keyring, store: &KeyringStore, now: i64) {
    let active = keyring.active_key_id.clone();

    let dead: Vec<String> = keyring
        .keys
        .iter()
        .filter(|(id, record)| record.status == KeyStatus::Invalid && Some((*id).clone()) != active)
        .map(|(id, _)| id.clone())
        .collect();

    if dead.is_empty() {
        return;
    }

    for key_id in &dead {
        let account_email = keyring.keys.get(key_id).and_then(|r| r.account_email.clone());
        store.append_event(
            keyring,
            RotationEvent {
                timestamp: now,
                event: RotationEventKind::AccountAuthFailed,
                key_id: Some(key_id.clone()),
                reason: Some("pruned".to_string()),
                from_key_id: None,
                to_key_id: None,
                account_email,
                predictive: None,
            },
        );
        keyring.keys.remove(key_id);
    }

    keyring.rotation_log.retain(|event| {
        let references_pruned = event
            .key_id
            .as_deref()
            .is_some_and(|id| dead.iter().any(|d| d == id));
        !references_pruned || event.event == RotationEventKind::AccountAuthFailed
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> KeyringStore {
        let dir = tempfile::tempdir().unwrap();
        KeyringStore::new(dir.path().join("keyring.json"), dir.path().join("log.txt"))
    }

    fn key(status: KeyStatus, account_email: Option<&str>) -> KeyRecord {
        KeyRecord {
            access_token: "tok".to_string(),
            refresh_token: "ref".to_string(),
            expires_at: None,
            status,
            account_uuid: None,
            account_email: account_email.map(str::to_string),
            last_health_check: None,
            last_usage: None,
            added_at: 0,
        }
    }

    #[test]
    fn merge_discovered_inserts_new_key() {
        let mut keyring = Keyring::default();
        merge_discovered(
            &mut keyring,
            vec![DiscoveredCredential {
                access_token: "sk-ant-oat01-abc".to_string(),
                refresh_token: "r".to_string(),
                expires_at: None,
            }],
            &test_store(),
            1_000,
        );
        assert_eq!(keyring.keys.len(), 1);
        assert_eq!(keyring.rotation_log.len(), 1);
        assert_eq!(keyring.rotation_log[0].event, RotationEventKind::KeyAdded);
    }

    #[test]
    fn merge_discovered_updates_existing_without_touching_status() {
        let mut keyring = Keyring::default();
        let key_id = key_id_for("sk-ant-oat01-abc");
        let mut record = key(KeyStatus::Exhausted, None);
        record.access_token = "sk-ant-oat01-abc".to_string();
        keyring.keys.insert(key_id.clone(), record);

        merge_discovered(
            &mut keyring,
            vec![DiscoveredCredential {
                access_token: "sk-ant-oat01-abc".to_string(),
                refresh_token: "new-refresh".to_string(),
                expires_at: Some(999),
            }],
            &test_store(),
            1_000,
        );

        let updated = &keyring.keys[&key_id];
        assert_eq!(updated.refresh_token, "new-refresh");
        assert_eq!(updated.status, KeyStatus::Exhausted);
        assert!(keyring.rotation_log.is_empty());
    }

    #[test]
    fn prune_dead_removes_invalid_non_active_keys_and_keeps_auth_failed_log() {
        let mut keyring = Keyring::default();
        keyring.keys.insert("dead".to_string(), key(KeyStatus::Invalid, Some("a@x.com")));
        keyring.keys.insert("alive".to_string(), key(KeyStatus::Active, None));
        keyring.active_key_id = Some("alive".to_string());

        prune_dead(&mut keyring, &test_store(), 1_000);

        assert!(!keyring.keys.contains_key("dead"));
        assert!(keyring.keys.contains_key("alive"));
        assert_eq!(keyring.rotation_log.len(), 1);
        assert_eq!(keyring.rotation_log[0].event, RotationEventKind::AccountAuthFailed);
        assert_eq!(keyring.rotation_log[0].account_email.as_deref(), Some("a@x.com"));
    }

    #[test]
    fn prune_dead_never_removes_the_active_key_even_if_invalid() {
        let mut keyring = Keyring::default();
        keyring.keys.insert("active-but-invalid".to_string(), key(KeyStatus::Invalid, None));
        keyring.active_key_id = Some("active-but-invalid".to_string());

        prune_dead(&mut keyring, &test_store(), 1_000);

        assert!(keyring.keys.contains_key("active-but-invalid"));
    }

    #[test]
    fn prune_dead_filters_unrelated_log_entries_for_pruned_key() {
        let mut keyring = Keyring::default();
        keyring.keys.insert("dead".to_string(), key(KeyStatus::Invalid, None));
        keyring.push_event(RotationEvent {
            timestamp: 1,
            event: RotationEventKind::KeyExhausted,
            key_id: Some("dead".to_string()),
            reason: None,
            from_key_id: None,
            to_key_id: None,
            account_email: None,
            predictive: None,
        });

        prune_dead(&mut keyring, &test_store(), 1_000);

        // the key_exhausted entry for "dead" should be gone, replaced only by
        // the account_auth_failed entry prune_dead itself appended.
        assert_eq!(keyring.rotation_log.len(), 1);
        assert_eq!(keyring.rotation_log[0].event, RotationEventKind::AccountAuthFailed);
    }
}
