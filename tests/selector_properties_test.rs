//! Property tests for the invariants enumerated in the specification's
//! testable-properties section: key id determinism/distinctness, selector
//! totality, and the rotation-log trim invariant.

use proptest::prelude::*;

use rotation_engine::keyring::{
    key_id_for, KeyRecord, KeyStatus, Keyring, RotationEvent, RotationEventKind, UsageSnapshot,
    MAX_LOG_ENTRIES,
};
use rotation_engine::selector::{select, EXHAUSTED_THRESHOLD};

fn arb_status() -> impl Strategy<Value = KeyStatus> {
    prop_oneof![
        Just(KeyStatus::Active),
        Just(KeyStatus::Exhausted),
        Just(KeyStatus::Invalid),
        Just(KeyStatus::Expired),
    ]
}

fn arb_record() -> impl Strategy<Value = KeyRecord> {
    (
        arb_status(),
        prop::option::of(0.0f64..110.0),
        any::<i64>(),
        0i64..10_000_i64,
    )
        .prop_map(|(status, usage, last_check, added_at)| KeyRecord {
            access_token: "tok".to_string(),
            refresh_token: "ref".to_string(),
            expires_at: None,
            status,
            account_uuid: None,
            account_email: None,
            last_health_check: usage.map(|_| last_check),
            last_usage: usage.map(|u| UsageSnapshot {
                five_hour: u,
                seven_day: u,
                seven_day_sonnet: u,
                checked_at: last_check,
            }),
            added_at,
        })
}

proptest! {
    #[test]
    fn key_id_is_deterministic(token in "[a-zA-Z0-9_-]{5,40}") {
        prop_assert_eq!(key_id_for(&token), key_id_for(&token));
    }

    #[test]
    fn key_id_has_fixed_hex_shape(token in "[a-zA-Z0-9_-]{5,40}") {
        let id = key_id_for(&token);
        prop_assert_eq!(id.len(), 16);
        prop_assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_id_ignores_known_prefix(token in "[a-zA-Z0-9_-]{5,40}") {
        let bare = key_id_for(&token);
        let prefixed = key_id_for(&format!("sk-ant-oat01-{token}"));
        prop_assert_eq!(bare, prefixed);
    }

    #[test]
    fn selector_totality(records in prop::collection::vec((any::<u8>(), arb_record()), 0..8), now in 0i64..20_000_i64) {
        let mut keyring = Keyring::default();
        for (i, record) in records {
            keyring.keys.insert(format!("k{i}"), record);
        }

        let result = select(&keyring, now);
        if let Some(id) = result {
            let record = keyring.keys.get(&id).expect("selector returned an id not present in the keyring");
            prop_assert!(matches!(record.status, KeyStatus::Active | KeyStatus::Exhausted));

            let stale = record
                .last_health_check
                .is_none_or(|check| now.saturating_sub(check) > rotation_engine::selector::HEALTH_DATA_MAX_AGE_MS);
            if !stale {
                if let Some(usage) = record.last_usage {
                    prop_assert!(usage.max_usage() < EXHAUSTED_THRESHOLD);
                }
            }
        }
    }

    #[test]
    fn rotation_log_never_exceeds_max_after_any_number_of_pushes(n in 0usize..400) {
        let mut keyring = Keyring::default();
        for i in 0..n {
            keyring.push_event(RotationEvent {
                timestamp: i as i64,
                event: RotationEventKind::KeyAdded,
                key_id: None,
                reason: None,
                from_key_id: None,
                to_key_id: None,
                account_email: None,
                predictive: None,
            });
        }
        prop_assert!(keyring.rotation_log.len() <= MAX_LOG_ENTRIES);
    }
}
