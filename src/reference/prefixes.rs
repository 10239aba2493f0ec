// Prefix to entity mapping
//
// Entities carry their prefixes in a compact notation ("K,W,N,AA-AK" or
// "K-W 3D2") that is expanded here into literal prefixes. Matching walks the
// prefixes longest first so that "KH6" always beats "K".

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::CallsignRecord;

/// Expand compact prefix notation into literal prefixes.
///
/// Tokens are separated by commas and/or whitespace. A token of the form
/// `XA-XD` (same length, differing only in the last character) expands to
/// XA, XB, XC, XD. Malformed ranges are logged and skipped.
pub fn expand_prefix_notation(notation: &str) -> Vec<String> {
    let mut out = Vec::new();

    for token in notation
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        let token = token.to_uppercase();
        let Some((start, end)) = token.split_once('-') else {
            out.push(token);
            continue;
        };

        match expand_range(start, end) {
            Some(expanded) => out.extend(expanded),
            None => log::warn!("Unparseable prefix range {:?}, skipping", token),
        }
    }

    out
}

fn expand_range(start: &str, end: &str) -> Option<Vec<String>> {
    if start.is_empty() || start.len() != end.len() || !start.is_ascii() || !end.is_ascii() {
        return None;
    }
    let stem_len = start.len() - 1;
    let (stem, first) = start.split_at(stem_len);
    let (end_stem, last) = end.split_at(stem_len);
    if stem != end_stem {
        return None;
    }

    let first = first.chars().next()?;
    let last = last.chars().next()?;
    let same_class = (first.is_ascii_alphabetic() && last.is_ascii_alphabetic())
        || (first.is_ascii_digit() && last.is_ascii_digit());
    if !same_class || first > last {
        return None;
    }

    Some((first..=last).map(|c| format!("{}{}", stem, c)).collect())
}

/// Prefix records, matched longest prefix first
#[derive(Debug, Clone, Default)]
pub struct PrefixTable {
    records: HashMap<String, Vec<CallsignRecord>>,
    sorted: Vec<String>,
}

impl PrefixTable {
    pub fn new(records: HashMap<String, Vec<CallsignRecord>>) -> Self {
        let mut sorted: Vec<String> = records.keys().cloned().collect();
        // Longest first; ties alphabetical so the order is stable across loads
        sorted.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self { records, sorted }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Prefixes longest first
    pub fn sorted_prefixes(&self) -> &[String] {
        &self.sorted
    }

    /// Longest prefix of `call` present in the table, with its records
    pub fn longest_match(&self, call: &str) -> Option<(&str, &[CallsignRecord])> {
        let prefix = self.sorted.iter().find(|p| call.starts_with(p.as_str()))?;
        let records = self.records.get(prefix)?;
        Some((prefix.as_str(), records.as_slice()))
    }

    /// Record for `call` on `date`.
    ///
    /// Only the longest matching prefix is consulted. If none of its records
    /// cover `date` the answer is `None`, even when a shorter prefix would match.
    pub fn resolve(&self, call: &str, date: DateTime<Utc>) -> Option<&CallsignRecord> {
        let (_, records) = self.longest_match(call)?;
        records.iter().find(|r| r.is_valid_at(date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(call: &str, entity: &str, adif_id: u16) -> CallsignRecord {
        CallsignRecord {
            call: call.to_string(),
            entity_name: entity.to_string(),
            adif_id,
            ..Default::default()
        }
    }

    #[test]
    fn test_expand_simple_list() {
        assert_eq!(expand_prefix_notation("K, W N"), vec!["K", "W", "N"]);
        assert_eq!(expand_prefix_notation(""), Vec::<String>::new());
    }

    #[test]
    fn test_expand_ranges() {
        assert_eq!(expand_prefix_notation("K-N"), vec!["K", "L", "M", "N"]);
        assert_eq!(expand_prefix_notation("aa-ac,3d2"), vec!["AA", "AB", "AC", "3D2"]);
        assert_eq!(expand_prefix_notation("KH6-KH7"), vec!["KH6", "KH7"]);
    }

    #[test]
    fn test_expand_bad_ranges() {
        // Different stems, reversed order, mixed lengths
        assert!(expand_prefix_notation("AA-BC").is_empty());
        assert!(expand_prefix_notation("W-K").is_empty());
        assert!(expand_prefix_notation("A-BC").is_empty());
        assert_eq!(expand_prefix_notation("A-9, F"), vec!["F"]);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut map = HashMap::new();
        map.insert("K".to_string(), vec![record("K", "UNITED STATES", 291)]);
        map.insert("KH6".to_string(), vec![record("KH6", "HAWAII", 110)]);
        let table = PrefixTable::new(map);

        let now = Utc::now();
        assert_eq!(table.resolve("KH6ABC", now).unwrap().entity_name, "HAWAII");
        assert_eq!(table.resolve("K1ABC", now).unwrap().entity_name, "UNITED STATES");
        assert!(table.resolve("F5UKW", now).is_none());
        assert_eq!(table.sorted_prefixes(), &["KH6".to_string(), "K".to_string()]);
    }

    #[test]
    fn test_longest_prefix_date_dead_end() {
        let mut expired = record("KH6", "HAWAII", 110);
        expired.valid_to = Some(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());

        let mut map = HashMap::new();
        map.insert("K".to_string(), vec![record("K", "UNITED STATES", 291)]);
        map.insert("KH6".to_string(), vec![expired]);
        let table = PrefixTable::new(map);

        // Does not fall back to "K"
        assert!(table.resolve("KH6ABC", Utc::now()).is_none());
    }
}
