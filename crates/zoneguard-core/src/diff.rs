//! Record-set diff engine
//!
//! Compares two record collections grouped by `(type, name)`. Within a
//! group, records are matched by `content`:
//!
//! 1. Each `to` record, in discovery order, claims the first unclaimed
//!    `from` record with identical content. A claimed pair that differs in
//!    `ttl`, `proxied` or `priority` is reported as modified.
//! 2. Leftover `to` records are paired positionally with leftover `from`
//!    records and reported as modified (a content change). Surplus `to`
//!    records are added.
//! 3. Leftover `from` records are removed.
//!
//! Ties between duplicate candidates are always broken by discovery order,
//! so the same inputs give the same diff on every run, and swapping the
//! inputs mirrors the result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{DnsRecord, RecordSummary};

/// A record whose contents changed between the two sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedRecord {
    pub before: RecordSummary,
    pub after: RecordSummary,
}

/// Structured difference between two record sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDiff {
    pub added: Vec<RecordSummary>,
    pub removed: Vec<RecordSummary>,
    pub modified: Vec<ModifiedRecord>,
}

impl RecordDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Total number of reported changes
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

fn group_by_key(records: &[DnsRecord]) -> BTreeMap<String, Vec<&DnsRecord>> {
    let mut groups: BTreeMap<String, Vec<&DnsRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.diff_key()).or_default().push(record);
    }
    groups
}

fn metadata_differs(a: &DnsRecord, b: &DnsRecord) -> bool {
    a.ttl != b.ttl || a.proxied != b.proxied || a.priority != b.priority
}

/// Compute the diff turning `from` into `to`
pub fn compute_diff(from: &[DnsRecord], to: &[DnsRecord]) -> RecordDiff {
    let from_groups = group_by_key(from);
    let mut to_groups = group_by_key(to);
    let mut diff = RecordDiff::default();

    for (key, from_recs) in &from_groups {
        let Some(to_recs) = to_groups.remove(key) else {
            diff.removed.extend(from_recs.iter().map(|r| r.summary()));
            continue;
        };
        diff_group(from_recs, &to_recs, &mut diff);
    }

    // Keys present only on the `to` side
    for to_recs in to_groups.values() {
        diff.added.extend(to_recs.iter().map(|r| r.summary()));
    }

    diff
}

fn diff_group(from_recs: &[&DnsRecord], to_recs: &[&DnsRecord], diff: &mut RecordDiff) {
    let mut from_claimed = vec![false; from_recs.len()];
    let mut unmatched_to = Vec::new();

    for to_rec in to_recs {
        let matched = from_recs
            .iter()
            .enumerate()
            .position(|(i, from_rec)| !from_claimed[i] && from_rec.content == to_rec.content);

        match matched {
            Some(i) => {
                from_claimed[i] = true;
                if metadata_differs(from_recs[i], to_rec) {
                    diff.modified.push(ModifiedRecord {
                        before: from_recs[i].summary(),
                        after: to_rec.summary(),
                    });
                }
            }
            None => unmatched_to.push(*to_rec),
        }
    }

    let mut unmatched_from = from_recs
        .iter()
        .zip(&from_claimed)
        .filter(|(_, claimed)| !**claimed)
        .map(|(rec, _)| *rec);

    for to_rec in unmatched_to {
        match unmatched_from.next() {
            Some(from_rec) => diff.modified.push(ModifiedRecord {
                before: from_rec.summary(),
                after: to_rec.summary(),
            }),
            None => diff.added.push(to_rec.summary()),
        }
    }

    diff.removed.extend(unmatched_from.map(|r| r.summary()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(name: &str, content: &str) -> DnsRecord {
        DnsRecord::new("A", name, content)
    }

    #[test]
    fn identical_sets_yield_empty_diff() {
        let records = vec![
            a("x", "1.1.1.1"),
            a("x", "1.1.1.1"),
            a("x", "2.2.2.2").with_ttl(300),
            DnsRecord::new("MX", "example.com", "mx1").with_priority(10),
        ];
        assert!(compute_diff(&records, &records).is_empty());
    }

    #[test]
    fn ttl_change_is_modified() {
        let from = vec![a("x", "1.1.1.1").with_ttl(1)];
        let to = vec![a("x", "1.1.1.1").with_ttl(300)];

        let diff = compute_diff(&from, &to);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(
            diff.modified,
            vec![ModifiedRecord {
                before: from[0].summary(),
                after: to[0].summary(),
            }]
        );
    }

    #[test]
    fn new_key_is_added() {
        let diff = compute_diff(&[], &[a("x", "2.2.2.2")]);
        assert_eq!(diff.added.len(), 1);
        assert!(diff.removed.is_empty());
        assert!(diff.modified.is_empty());
    }

    #[test]
    fn dropped_key_is_removed() {
        let diff = compute_diff(&[DnsRecord::new("TXT", "x", "v=spf1 -all")], &[]);
        assert_eq!(diff.removed.len(), 1);
        assert!(diff.added.is_empty());
    }

    #[test]
    fn content_change_pairs_as_modified() {
        let from = vec![a("x", "1.1.1.1")];
        let to = vec![a("x", "9.9.9.9")];

        let diff = compute_diff(&from, &to);
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].before.content, "1.1.1.1");
        assert_eq!(diff.modified[0].after.content, "9.9.9.9");
        assert!(diff.added.is_empty() && diff.removed.is_empty());
    }

    #[test]
    fn growing_group_reports_surplus_as_added() {
        let from = vec![a("x", "1.1.1.1"), a("x", "2.2.2.2")];
        let to = vec![a("x", "1.1.1.1"), a("x", "3.3.3.3"), a("x", "4.4.4.4")];

        let diff = compute_diff(&from, &to);
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].before.content, "2.2.2.2");
        assert_eq!(diff.modified[0].after.content, "3.3.3.3");
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].content, "4.4.4.4");
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn shrinking_group_reports_leftover_as_removed() {
        let from = vec![a("x", "1.1.1.1"), a("x", "2.2.2.2"), a("x", "3.3.3.3")];
        let to = vec![a("x", "2.2.2.2")];

        let diff = compute_diff(&from, &to);
        assert!(diff.modified.is_empty());
        let removed: Vec<&str> = diff.removed.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(removed, vec!["1.1.1.1", "3.3.3.3"]);
    }

    #[test]
    fn duplicate_contents_match_as_multiset() {
        let from = vec![a("x", "1.1.1.1"), a("x", "1.1.1.1")];
        let to = vec![a("x", "1.1.1.1")];

        let diff = compute_diff(&from, &to);
        assert_eq!(diff.removed.len(), 1);
        assert!(diff.modified.is_empty());
    }

    #[test]
    fn pairing_follows_discovery_order() {
        let from = vec![a("x", "1.1.1.1"), a("x", "2.2.2.2")];
        let to = vec![a("x", "8.8.8.8"), a("x", "9.9.9.9")];

        let diff = compute_diff(&from, &to);
        let pairs: Vec<(&str, &str)> = diff
            .modified
            .iter()
            .map(|m| (m.before.content.as_str(), m.after.content.as_str()))
            .collect();
        assert_eq!(pairs, vec![("1.1.1.1", "8.8.8.8"), ("2.2.2.2", "9.9.9.9")]);
    }

    #[test]
    fn same_name_different_type_are_separate_keys() {
        let from = vec![a("x", "1.1.1.1")];
        let to = vec![DnsRecord::new("AAAA", "x", "::1")];

        let diff = compute_diff(&from, &to);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed.len(), 1);
        assert!(diff.modified.is_empty());
    }
}
