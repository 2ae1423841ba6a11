//! Transaction identifier sets
//!
//! A [`TransactionSet`] is the set of transactions a server has applied,
//! written in the GTID text form `source:1-100:105,other:1-5`. Each source
//! (a server UUID, optionally followed by a `:tag`) maps to a list of
//! inclusive intervals of transaction numbers.
//!
//! ## Normalisation
//!
//! Sets are always stored normalised:
//! - UUID sources are lowercase and hyphenated
//! - intervals are sorted, non-overlapping and non-adjacent
//! - sources with no intervals are dropped
//!
//! Normalisation makes structural equality the same as set equality, so
//! `==` on two `TransactionSet`s answers "do these servers have the same
//! history".

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Inclusive range of transaction numbers for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// First transaction number (>= 1)
    pub start: u64,
    /// Last transaction number (>= start)
    pub end: u64,
}

impl Interval {
    /// Create an interval; `start` and `end` are inclusive
    pub fn new(start: u64, end: u64) -> Self {
        Interval { start, end }
    }

    /// Number of transactions covered
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Intervals are never empty; provided for clippy's `len_without_is_empty`
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// A set of transaction identifiers (GTID set)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSet {
    sources: BTreeMap<String, Vec<Interval>>,
}

impl TransactionSet {
    /// The empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the GTID text form
    ///
    /// Whitespace (servers insert newlines after commas) is ignored. An
    /// empty string is the empty set.
    pub fn parse(input: &str) -> Result<Self> {
        let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        let mut set = TransactionSet::new();
        if compact.is_empty() {
            return Ok(set);
        }

        let invalid = |reason: &str| Error::InvalidTransactionSet {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        for entry in compact.split(',') {
            if entry.is_empty() {
                continue;
            }
            let mut parts = entry.split(':');
            let source = match parts.next() {
                Some(s) if !s.is_empty() => normalize_source(s),
                _ => return Err(invalid("missing source identifier")),
            };

            let mut key = source.clone();
            let mut key_has_interval = false;
            let mut any_part = false;
            for part in parts {
                any_part = true;
                if part.starts_with(|c: char| c.is_ascii_digit()) {
                    let interval = parse_interval(part).ok_or_else(|| {
                        invalid(&format!("bad interval '{}'", part))
                    })?;
                    set.sources.entry(key.clone()).or_default().push(interval);
                    key_has_interval = true;
                } else {
                    if !key_has_interval && key != source {
                        return Err(invalid(&format!("tag '{}' has no intervals", key)));
                    }
                    if !is_valid_tag(part) {
                        return Err(invalid(&format!("bad tag '{}'", part)));
                    }
                    key = format!("{}:{}", source, part.to_ascii_lowercase());
                    key_has_interval = false;
                }
            }
            if !any_part || !key_has_interval {
                return Err(invalid(&format!("'{}' has no intervals", key)));
            }
        }

        for intervals in set.sources.values_mut() {
            normalize(intervals);
        }
        Ok(set)
    }

    /// Build a set holding a single interval (test and fixture helper)
    pub fn from_range(source: &str, start: u64, end: u64) -> Self {
        let mut set = TransactionSet::new();
        set.insert_range(source, start, end);
        set
    }

    /// Add `start..=end` for `source`
    ///
    /// Ranges with `start == 0` or `end < start` are ignored.
    pub fn insert_range(&mut self, source: &str, start: u64, end: u64) {
        if start == 0 || end < start {
            return;
        }
        let intervals = self.sources.entry(normalize_source(source)).or_default();
        intervals.push(Interval::new(start, end));
        normalize(intervals);
    }

    /// Whether the set holds no transactions
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Total number of transactions in the set
    pub fn count(&self) -> u64 {
        self.sources
            .values()
            .flat_map(|v| v.iter())
            .map(Interval::len)
            .sum()
    }

    /// Sources present in the set
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Intervals for one source
    pub fn intervals(&self, source: &str) -> &[Interval] {
        self.sources
            .get(&normalize_source(source))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether transaction `source:gno` is in the set
    pub fn contains(&self, source: &str, gno: u64) -> bool {
        self.intervals(source)
            .iter()
            .any(|iv| iv.start <= gno && gno <= iv.end)
    }

    /// Whether every transaction of `self` is also in `other`
    pub fn is_subset(&self, other: &TransactionSet) -> bool {
        self.difference(other).is_empty()
    }

    /// Transactions in either set
    pub fn union(&self, other: &TransactionSet) -> TransactionSet {
        let mut out = self.clone();
        for (source, intervals) in &other.sources {
            let merged = out.sources.entry(source.clone()).or_default();
            merged.extend_from_slice(intervals);
            normalize(merged);
        }
        out
    }

    /// Transactions in `self` that are not in `other`
    pub fn difference(&self, other: &TransactionSet) -> TransactionSet {
        let mut out = TransactionSet::new();
        for (source, intervals) in &self.sources {
            let remaining = match other.sources.get(source) {
                Some(sub) => subtract(intervals, sub),
                None => intervals.clone(),
            };
            if !remaining.is_empty() {
                out.sources.insert(source.clone(), remaining);
            }
        }
        out
    }

    /// Transactions in both sets
    pub fn intersection(&self, other: &TransactionSet) -> TransactionSet {
        let mut out = TransactionSet::new();
        for (source, intervals) in &self.sources {
            if let Some(theirs) = other.sources.get(source) {
                let common = intersect(intervals, theirs);
                if !common.is_empty() {
                    out.sources.insert(source.clone(), common);
                }
            }
        }
        out
    }
}

impl FromStr for TransactionSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TransactionSet::parse(s)
    }
}

impl fmt::Display for TransactionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (source, intervals) in &self.sources {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            f.write_str(source)?;
            for iv in intervals {
                if iv.start == iv.end {
                    write!(f, ":{}", iv.start)?;
                } else {
                    write!(f, ":{}-{}", iv.start, iv.end)?;
                }
            }
        }
        Ok(())
    }
}

fn normalize_source(source: &str) -> String {
    match uuid::Uuid::parse_str(source) {
        Ok(u) => u.hyphenated().to_string(),
        Err(_) => source.to_string(),
    }
}

fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    tag.len() <= 32 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_interval(text: &str) -> Option<Interval> {
    let (start, end) = match text.split_once('-') {
        Some((a, b)) => (a.parse::<u64>().ok()?, b.parse::<u64>().ok()?),
        None => {
            let n = text.parse::<u64>().ok()?;
            (n, n)
        }
    };
    if start == 0 || end < start {
        return None;
    }
    Some(Interval::new(start, end))
}

/// Sort and coalesce overlapping or adjacent intervals
fn normalize(intervals: &mut Vec<Interval>) {
    intervals.sort();
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for iv in intervals.drain(..) {
        match merged.last_mut() {
            Some(last) if iv.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(iv.end);
            }
            _ => merged.push(iv),
        }
    }
    *intervals = merged;
}

/// `a \ b` for normalised interval lists
fn subtract(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    for iv in a {
        let mut cursor = iv.start;
        let mut exhausted = false;
        for cut in b {
            if cut.end < cursor || cut.start > iv.end {
                continue;
            }
            if cut.start > cursor {
                out.push(Interval::new(cursor, cut.start - 1));
            }
            if cut.end >= iv.end {
                exhausted = true;
                break;
            }
            cursor = cut.end + 1;
        }
        if !exhausted {
            out.push(Interval::new(cursor, iv.end));
        }
    }
    out
}

/// `a ∩ b` for normalised interval lists
fn intersect(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let start = a[i].start.max(b[j].start);
        let end = a[i].end.min(b[j].end);
        if start <= end {
            out.push(Interval::new(start, end));
        }
        if a[i].end < b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const U1: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";
    const U2: &str = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";

    fn set(s: &str) -> TransactionSet {
        TransactionSet::parse(s).unwrap()
    }

    #[test]
    fn test_parse_empty() {
        assert!(set("").is_empty());
        assert!(set("  \n").is_empty());
    }

    #[test]
    fn test_parse_and_display_roundtrip() {
        let text = format!("{}:1-5:7:9-10,{}:3", U1, U2);
        assert_eq!(set(&text).to_string(), text);
    }

    #[test]
    fn test_parse_normalises_uuid_case_and_whitespace() {
        let upper = U1.to_uppercase();
        let parsed = set(&format!("{}:1-3,\n{}:4-6", upper, U1));
        assert_eq!(parsed.to_string(), format!("{}:1-6", U1));
    }

    #[test]
    fn test_parse_merges_overlapping_and_adjacent() {
        let parsed = set("src:5-9:1-3:4:20");
        assert_eq!(parsed.intervals("src"), &[Interval::new(1, 9), Interval::new(20, 20)]);
        assert_eq!(parsed.count(), 10);
    }

    #[test]
    fn test_parse_tagged_gtids() {
        let parsed = set(&format!("{}:1-5:Batch:1-2", U1));
        assert_eq!(parsed.intervals(U1), &[Interval::new(1, 5)]);
        assert!(parsed.contains(&format!("{}:batch", U1), 2));
        assert_eq!(parsed.count(), 7);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TransactionSet::parse("uuid1").is_err());
        assert!(TransactionSet::parse("uuid1:0-3").is_err());
        assert!(TransactionSet::parse("uuid1:9-3").is_err());
        assert!(TransactionSet::parse(":1-3").is_err());
        assert!(TransactionSet::parse("uuid1:tag").is_err());
        assert!(TransactionSet::parse("uuid1:1-x").is_err());
    }

    #[test]
    fn test_subset_and_difference() {
        let donor = set("uuid1:1-100");
        let target = set("uuid1:1-50,uuid2:1-5");
        assert!(!target.is_subset(&donor));
        assert_eq!(target.difference(&donor), set("uuid2:1-5"));
        assert_eq!(donor.difference(&target), set("uuid1:51-100"));
        assert!(set("uuid1:1-50").is_subset(&donor));
        assert!(TransactionSet::new().is_subset(&donor));
    }

    #[test]
    fn test_difference_splits_intervals() {
        let a = set("s:1-10");
        let b = set("s:3-4:7");
        assert_eq!(a.difference(&b), set("s:1-2:5-6:8-10"));
    }

    #[test]
    fn test_intersection() {
        let a = set("s:1-10,t:1-3");
        let b = set("s:5-20,u:1");
        assert_eq!(a.intersection(&b), set("s:5-10"));
        assert!(a.intersection(&TransactionSet::new()).is_empty());
    }

    #[test]
    fn test_union() {
        let a = set("s:1-3");
        let b = set("s:4-6,t:2");
        assert_eq!(a.union(&b), set("s:1-6,t:2"));
    }

    #[test]
    fn test_insert_range_ignores_invalid() {
        let mut s = TransactionSet::new();
        s.insert_range("x", 0, 5);
        s.insert_range("x", 5, 4);
        assert!(s.is_empty());
        s.insert_range("x", 2, 4);
        assert!(s.contains("x", 3));
        assert!(!s.contains("x", 5));
    }
}
