//! Deduplication and normalization of raw device log entries.
//!
//! The merge step is the gatekeeper between untrusted device output and
//! the durable ledger. It filters entries to those strictly newer than
//! the device's cursor, collapses in-batch duplicates on the natural
//! key, normalizes punch/verify codes, and computes the candidate new
//! cursor. A malformed entry never fails the batch; it is dropped and
//! counted as a data-quality issue.

use attend_types::{AttendancePunch, DeviceId, PunchType, RawPunch, VerifyMethod};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Input to one merge pass for a single device.
#[derive(Debug)]
pub struct MergeInput<'a> {
    /// The device the entries came from.
    pub device_id: &'a DeviceId,
    /// Raw log entries as fetched.
    pub raw: &'a [RawPunch],
    /// User id → display name map, from the device's user list.
    pub users: &'a HashMap<String, String>,
    /// The device's cursor position, `None` on first sync.
    pub cursor: Option<DateTime<Utc>>,
}

/// Result of one merge pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Normalized punches strictly newer than the cursor, ordered by
    /// timestamp.
    pub accepted: Vec<AttendancePunch>,
    /// Max timestamp among accepted entries; `None` means the cursor is
    /// unchanged (a no-op pass is a valid, non-error outcome).
    pub new_cursor: Option<DateTime<Utc>>,
    /// Entries at or before the cursor (already absorbed in an earlier
    /// cycle).
    pub already_seen: usize,
    /// Entries collapsed because another entry in the same batch had an
    /// identical dedup key.
    pub batch_duplicates: usize,
    /// Entries dropped for missing timestamps, blank user ids, or
    /// unrecognized punch codes.
    pub malformed: usize,
    /// Set when the device returned entries but its newest timestamp is
    /// older than the cursor. That pattern suggests the terminal's
    /// clock moved backward and needs operator attention.
    pub clock_regression: bool,
}

impl MergeOutcome {
    /// Total entries skipped as duplicates (cross-cycle plus in-batch).
    pub fn duplicates(&self) -> usize {
        self.already_seen + self.batch_duplicates
    }
}

/// Merge one device's raw log entries against its cursor.
///
/// Accepted entries are strictly newer than `cursor` and unique on the
/// `(device_id, user_id, timestamp, punch_type)` key. Running merge a
/// second time with the same raw entries and the advanced cursor
/// accepts nothing.
pub fn merge(input: &MergeInput<'_>) -> MergeOutcome {
    let mut accepted = Vec::new();
    let mut seen_keys: HashSet<(String, DateTime<Utc>, PunchType)> = HashSet::new();
    let mut already_seen = 0usize;
    let mut batch_duplicates = 0usize;
    let mut malformed = 0usize;
    let mut max_raw_ts: Option<DateTime<Utc>> = None;

    for raw in input.raw {
        let Some(timestamp) = raw.timestamp else {
            malformed += 1;
            continue;
        };
        max_raw_ts = Some(max_raw_ts.map_or(timestamp, |m| m.max(timestamp)));

        if raw.user_id.is_empty() {
            malformed += 1;
            continue;
        }
        let Some(punch_type) = PunchType::from_code(raw.punch_code) else {
            malformed += 1;
            continue;
        };

        if let Some(cursor) = input.cursor {
            if timestamp <= cursor {
                already_seen += 1;
                continue;
            }
        }

        let key = (raw.user_id.clone(), timestamp, punch_type);
        if !seen_keys.insert(key) {
            batch_duplicates += 1;
            continue;
        }

        let user_name = input
            .users
            .get(&raw.user_id)
            .cloned()
            .unwrap_or_else(|| format!("User_{}", raw.user_id));

        accepted.push(AttendancePunch {
            device_id: input.device_id.clone(),
            user_id: raw.user_id.clone(),
            user_name,
            timestamp,
            punch_type,
            verify_method: VerifyMethod::from_code(raw.verify_code),
            work_code: (raw.work_code != 0).then_some(raw.work_code),
        });
    }

    accepted.sort_by_key(|p| p.timestamp);
    let new_cursor = accepted.last().map(|p| p.timestamp);

    // Newest raw timestamp older than the cursor: the terminal claims
    // its freshest record predates data we already absorbed.
    let clock_regression = match (input.cursor, max_raw_ts) {
        (Some(cursor), Some(max_ts)) => max_ts < cursor,
        _ => false,
    };

    MergeOutcome {
        accepted,
        new_cursor,
        already_seen,
        batch_duplicates,
        malformed,
        clock_regression,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    fn raw(user: &str, timestamp: DateTime<Utc>, punch_code: u8) -> RawPunch {
        RawPunch {
            user_id: user.into(),
            timestamp: Some(timestamp),
            punch_code,
            verify_code: 1,
            work_code: 0,
        }
    }

    fn input_with<'a>(
        device_id: &'a DeviceId,
        raw: &'a [RawPunch],
        users: &'a HashMap<String, String>,
        cursor: Option<DateTime<Utc>>,
    ) -> MergeInput<'a> {
        MergeInput {
            device_id,
            raw,
            users,
            cursor,
        }
    }

    #[test]
    fn accepts_only_entries_after_cursor() {
        // Cursor = 08:00; entries at 07:59, 08:05, 08:10.
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let entries = vec![
            raw("1", ts(7, 59), 0),
            raw("2", ts(8, 5), 0),
            raw("3", ts(8, 10), 1),
        ];
        let outcome = merge(&input_with(&device, &entries, &users, Some(ts(8, 0))));

        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.accepted[0].timestamp, ts(8, 5));
        assert_eq!(outcome.accepted[1].timestamp, ts(8, 10));
        assert_eq!(outcome.new_cursor, Some(ts(8, 10)));
        assert_eq!(outcome.already_seen, 1);
    }

    #[test]
    fn merge_is_idempotent_across_cycles() {
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let entries = vec![raw("1", ts(8, 5), 0), raw("2", ts(8, 10), 1)];

        let first = merge(&input_with(&device, &entries, &users, Some(ts(8, 0))));
        assert_eq!(first.accepted.len(), 2);

        // Same raw entries against the advanced cursor: nothing new.
        let second = merge(&input_with(&device, &entries, &users, first.new_cursor));
        assert!(second.accepted.is_empty());
        assert_eq!(second.new_cursor, None);
        assert_eq!(second.already_seen, 2);
    }

    #[test]
    fn first_sync_has_no_cursor_bound() {
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let entries = vec![raw("1", ts(7, 0), 0)];
        let outcome = merge(&input_with(&device, &entries, &users, None));
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.new_cursor, Some(ts(7, 0)));
    }

    #[test]
    fn in_batch_duplicates_collapse_to_one() {
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        // Same key, differing verify codes.
        let mut a = raw("1", ts(8, 5), 0);
        a.verify_code = 1;
        let mut b = raw("1", ts(8, 5), 0);
        b.verify_code = 15;
        let entries = vec![a, b];

        let outcome = merge(&input_with(&device, &entries, &users, None));
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.batch_duplicates, 1);
    }

    #[test]
    fn same_timestamp_different_punch_type_is_distinct() {
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let entries = vec![raw("1", ts(8, 5), 0), raw("1", ts(8, 5), 1)];
        let outcome = merge(&input_with(&device, &entries, &users, None));
        assert_eq!(outcome.accepted.len(), 2);
    }

    #[test]
    fn malformed_entries_drop_without_failing_batch() {
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let entries = vec![
            RawPunch {
                user_id: "1".into(),
                timestamp: None, // zero date from device
                punch_code: 0,
                verify_code: 1,
                work_code: 0,
            },
            RawPunch {
                user_id: String::new(), // blank user
                timestamp: Some(ts(8, 1)),
                punch_code: 0,
                verify_code: 1,
                work_code: 0,
            },
            raw("1", ts(8, 2), 9), // unknown punch code
            raw("2", ts(8, 3), 0), // fine
        ];
        let outcome = merge(&input_with(&device, &entries, &users, None));
        assert_eq!(outcome.malformed, 3);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.new_cursor, Some(ts(8, 3)));
    }

    #[test]
    fn user_names_resolve_with_fallback() {
        let device = DeviceId::new("D1");
        let mut users = HashMap::new();
        users.insert("1".to_string(), "Alice".to_string());
        let entries = vec![raw("1", ts(8, 1), 0), raw("2", ts(8, 2), 0)];

        let outcome = merge(&input_with(&device, &entries, &users, None));
        assert_eq!(outcome.accepted[0].user_name, "Alice");
        assert_eq!(outcome.accepted[1].user_name, "User_2");
    }

    #[test]
    fn unknown_verify_code_becomes_unknown_method() {
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let mut entry = raw("1", ts(8, 1), 0);
        entry.verify_code = 99;
        let entries = vec![entry];

        let outcome = merge(&input_with(&device, &entries, &users, None));
        assert_eq!(outcome.accepted[0].verify_method, VerifyMethod::Unknown);
    }

    #[test]
    fn clock_regression_flagged_when_newest_predates_cursor() {
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let entries = vec![raw("1", ts(6, 0), 0), raw("2", ts(6, 30), 0)];

        let outcome = merge(&input_with(&device, &entries, &users, Some(ts(8, 0))));
        assert!(outcome.clock_regression);
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.new_cursor, None);
    }

    #[test]
    fn full_refetch_with_nothing_new_is_not_regression() {
        // Devices return their whole log; newest == cursor is normal.
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let entries = vec![raw("1", ts(7, 0), 0), raw("1", ts(8, 0), 1)];

        let outcome = merge(&input_with(&device, &entries, &users, Some(ts(8, 0))));
        assert!(!outcome.clock_regression);
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.already_seen, 2);
    }

    #[test]
    fn empty_fetch_is_a_noop() {
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let outcome = merge(&input_with(&device, &[], &users, Some(ts(8, 0))));
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.new_cursor, None);
        assert!(!outcome.clock_regression);
    }

    #[test]
    fn accepted_entries_are_timestamp_ordered() {
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let entries = vec![
            raw("3", ts(8, 10), 0),
            raw("1", ts(8, 2), 0),
            raw("2", ts(8, 7), 0),
        ];
        let outcome = merge(&input_with(&device, &entries, &users, None));
        let stamps: Vec<_> = outcome.accepted.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![ts(8, 2), ts(8, 7), ts(8, 10)]);
    }

    #[test]
    fn zero_work_code_maps_to_none() {
        let device = DeviceId::new("D1");
        let users = HashMap::new();
        let mut with_code = raw("1", ts(8, 1), 0);
        with_code.work_code = 12;
        let entries = vec![raw("2", ts(8, 0), 0), with_code];

        let outcome = merge(&input_with(&device, &entries, &users, None));
        assert_eq!(outcome.accepted[0].work_code, None);
        assert_eq!(outcome.accepted[1].work_code, Some(12));
    }
}
