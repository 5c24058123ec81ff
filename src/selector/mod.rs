//! The rotation policy: a pure function from keyring state to a chosen key id.

use crate::keyring::{KeyRecord, KeyStatus, Keyring};

/// A bucket utilization at or above this (for any key) means a single 2xx
/// probe marked the key `exhausted`.
pub const HIGH_USAGE_THRESHOLD: f64 = 90.0;
/// A bucket utilization at or above this means the key cannot serve traffic.
pub const EXHAUSTED_THRESHOLD: f64 = 100.0;
/// Usage data older than this (ms) cannot drive a rotation decision.
pub const HEALTH_DATA_MAX_AGE_MS: i64 = 15 * 60 * 1000;

#[derive(Clone, Copy)]
struct Candidate<'a> {
    key_id: &'a str,
    added_at: i64,
    /// `None` when the key has never been probed, or its usage is stale.
    effective_usage: Option<f64>,
}

/// Choose the best key id given `keyring`'s current state, or `None` if no
/// key is usable. Pure: no I/O, no implicit clock reads.
#[must_use]
pub fn select(keyring: &Keyring, now: i64) -> Option<String> {
    let mut usable: Vec<Candidate<'_>> = keyring
        .keys
        .iter()
        .filter(|(_, record)| matches!(record.status, KeyStatus::Active | KeyStatus::Exhausted))
        .map(|(key_id, record)| Candidate {
            key_id,
            added_at: record.added_at,
            effective_usage: effective_usage(record, now),
        })
        .filter(|c| c.effective_usage.is_none_or(|u| u < EXHAUSTED_THRESHOLD))
        .collect();

    // Deterministic ordering throughout: insertion order (added_at), then key_id.
    usable.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.key_id.cmp(b.key_id)));

    if usable.is_empty() {
        return None;
    }

    let current = keyring
        .active_key_id
        .as_deref()
        .and_then(|id| usable.iter().find(|c| c.key_id == id).copied());

    let all_above_90 = usable
        .iter()
        .all(|c| matches!(c.effective_usage, Some(u) if u >= HIGH_USAGE_THRESHOLD));

    if all_above_90 {
        let current_max = current.and_then(|c| c.effective_usage).unwrap_or(0.0);
        if current_max >= EXHAUSTED_THRESHOLD {
            return pick_lowest_usage(&usable).map(|c| c.key_id.to_string());
        }
        return Some(
            current
                .map(|c| c.key_id.to_string())
                .unwrap_or_else(|| usable[0].key_id.to_string()),
        );
    }

    let current_max = current.and_then(|c| c.effective_usage).unwrap_or(0.0);
    if current_max >= HIGH_USAGE_THRESHOLD {
        let fresh: Vec<Candidate<'_>> = usable
            .iter()
            .copied()
            .filter(|c| c.effective_usage.is_some())
            .collect();
        if let Some(best) = pick_lowest_usage(&fresh) {
            return Some(best.key_id.to_string());
        }
    }

    Some(
        current
            .map(|c| c.key_id.to_string())
            .unwrap_or_else(|| usable[0].key_id.to_string()),
    )
}

fn effective_usage(record: &KeyRecord, now: i64) -> Option<f64> {
    let usage = record.last_usage?;
    let last_check = record.last_health_check?;
    if now.saturating_sub(last_check) > HEALTH_DATA_MAX_AGE_MS {
        return None;
    }
    Some(usage.max_usage())
}

fn pick_lowest_usage<'a>(candidates: &[Candidate<'a>]) -> Option<Candidate<'a>> {
    candidates
        .iter()
        .min_by(|a, b| {
            let ua = a.effective_usage.unwrap_or(0.0);
            let ub = b.effective_usage.unwrap_or(0.0);
            ua.partial_cmp(&ub)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.added_at.cmp(&b.added_at))
                .then_with(|| a.key_id.cmp(b.key_id))
        })
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::UsageSnapshot;

    fn key(status: KeyStatus, usage: Option<f64>, last_check: Option<i64>, added_at: i64) -> KeyRecord {
        KeyRecord {
            access_token: "tok".to_string(),
            refresh_token: "ref".to_string(),
            expires_at: None,
            status,
            account_uuid: None,
            account_email: None,
            last_health_check: last_check,
            last_usage: usage.map(|u| UsageSnapshot {
                five_hour: u,
                seven_day: u,
                seven_day_sonnet: u,
                checked_at: last_check.unwrap_or(0),
            }),
            added_at,
        }
    }

    fn keyring_with(keys: Vec<(&str, KeyRecord)>, active: Option<&str>) -> Keyring {
        let mut keyring = Keyring::default();
        for (id, record) in keys {
            keyring.keys.insert(id.to_string(), record);
        }
        keyring.active_key_id = active.map(str::to_string);
        keyring
    }

    #[test]
    fn two_keys_95_and_20_rotates_to_low_usage_key() {
        let keyring = keyring_with(
            vec![
                ("a", key(KeyStatus::Active, Some(95.0), Some(1_000), 1)),
                ("b", key(KeyStatus::Active, Some(20.0), Some(1_000), 2)),
            ],
            Some("a"),
        );
        assert_eq!(select(&keyring, 1_000), Some("b".to_string()));
    }

    #[test]
    fn both_at_95_stay_on_current() {
        let keyring = keyring_with(
            vec![
                ("a", key(KeyStatus::Active, Some(95.0), Some(1_000), 1)),
                ("b", key(KeyStatus::Active, Some(96.0), Some(1_000), 2)),
            ],
            Some("a"),
        );
        assert_eq!(select(&keyring, 1_000), Some("a".to_string()));
    }

    #[test]
    fn one_hits_100_is_excluded() {
        let keyring = keyring_with(
            vec![
                ("a", key(KeyStatus::Exhausted, Some(100.0), Some(1_000), 1)),
                ("b", key(KeyStatus::Active, Some(30.0), Some(1_000), 2)),
            ],
            Some("a"),
        );
        assert_eq!(select(&keyring, 1_000), Some("b".to_string()));
    }

    #[test]
    fn single_key_at_95_stays() {
        let keyring = keyring_with(
            vec![("a", key(KeyStatus::Active, Some(95.0), Some(1_000), 1))],
            Some("a"),
        );
        assert_eq!(select(&keyring, 1_000), Some("a".to_string()));
    }

    #[test]
    fn all_exhausted_returns_none() {
        let keyring = keyring_with(
            vec![
                ("a", key(KeyStatus::Exhausted, Some(100.0), Some(1_000), 1)),
                ("b", key(KeyStatus::Exhausted, Some(100.0), Some(1_000), 2)),
            ],
            Some("a"),
        );
        assert_eq!(select(&keyring, 1_000), None);
    }

    #[test]
    fn stale_usage_does_not_force_rotation_away_from_current() {
        let stale_check = 0;
        let now = HEALTH_DATA_MAX_AGE_MS + 1_000;
        let keyring = keyring_with(
            vec![
                ("a", key(KeyStatus::Active, Some(10.0), Some(stale_check), 1)),
                ("b", key(KeyStatus::Active, Some(10.0), Some(now), 2)),
            ],
            Some("a"),
        );
        // a's usage is stale -> effective usage None -> all_above_90 is false
        // (can't be proven uniformly saturated), current (a) isn't >=90 effectively (None -> 0.0),
        // so we stay on current.
        assert_eq!(select(&keyring, now), Some("a".to_string()));
    }

    #[test]
    fn invalid_and_expired_keys_are_never_selected() {
        let keyring = keyring_with(
            vec![
                ("a", key(KeyStatus::Invalid, Some(10.0), Some(1_000), 1)),
                ("b", key(KeyStatus::Expired, None, None, 2)),
                ("c", key(KeyStatus::Active, Some(50.0), Some(1_000), 3)),
            ],
            None,
        );
        assert_eq!(select(&keyring, 1_000), Some("c".to_string()));
    }

    #[test]
    fn tie_break_by_added_at_then_key_id() {
        let keyring = keyring_with(
            vec![
                ("b", key(KeyStatus::Active, Some(95.0), Some(1_000), 1)),
                ("a", key(KeyStatus::Active, Some(95.0), Some(1_000), 1)),
            ],
            None,
        );
        // No current active key: default falls through to first usable by
        // (added_at, key_id) ordering, which is "a" (same added_at, lexically first).
        assert_eq!(select(&keyring, 1_000), Some("a".to_string()));
    }

    #[test]
    fn freshness_boundary_exactly_max_age_is_still_fresh() {
        let keyring = keyring_with(
            vec![("a", key(KeyStatus::Active, Some(50.0), Some(0), 1))],
            Some("a"),
        );
        // now - last_check == HEALTH_DATA_MAX_AGE_MS exactly: not strictly greater, still fresh.
        assert_eq!(effective_usage(&keyring.keys["a"], HEALTH_DATA_MAX_AGE_MS), Some(50.0));
    }
}
