// Wanted / excluded / monitored callsign lists
//
// Lists are owned by the settings layer and read by the dispatcher on every
// decode. Each read takes one lock and returns an owned snapshot, so a
// concurrent update is either fully visible or not at all.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

/// Band key whose lists apply to every band
pub const ALL_BANDS: &str = "all";

/// Case-insensitive glob match supporting `*` (any run) and `?` (one char)
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.trim().to_uppercase().chars().collect();
    let t: Vec<char> = text.trim().to_uppercase().chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// True when `call` matches any pattern in the list
pub fn matches_any(patterns: &[String], call: &str) -> bool {
    patterns.iter().any(|p| wildcard_match(p, call))
}

/// Lists for one band
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandWatch {
    pub wanted: Vec<String>,
    pub excluded: Vec<String>,
    pub monitored: Vec<String>,
    pub monitored_zones: BTreeSet<u8>,
}

impl BandWatch {
    fn merge(&mut self, other: &BandWatch) {
        self.wanted.extend(other.wanted.iter().cloned());
        self.excluded.extend(other.excluded.iter().cloned());
        self.monitored.extend(other.monitored.iter().cloned());
        self.monitored_zones.extend(other.monitored_zones.iter().copied());
    }

    /// Wanted: matches a wanted pattern, no excluded pattern, and not worked before
    pub fn is_wanted(&self, call: &str, worked: &WorkedBefore) -> bool {
        matches_any(&self.wanted, call) && !self.is_excluded(call) && !worked.contains(call)
    }

    pub fn is_excluded(&self, call: &str) -> bool {
        matches_any(&self.excluded, call)
    }

    pub fn is_monitored(&self, call: &str) -> bool {
        matches_any(&self.monitored, call) && !self.is_excluded(call)
    }

    pub fn is_monitored_zone(&self, zone: u8) -> bool {
        self.monitored_zones.contains(&zone)
    }
}

/// Per-band lists shared between the settings layer and the dispatcher
#[derive(Debug, Default)]
pub struct WatchLists {
    bands: RwLock<HashMap<String, BandWatch>>,
}

impl WatchLists {
    pub fn new(bands: HashMap<String, BandWatch>) -> Self {
        let bands = bands
            .into_iter()
            .map(|(band, watch)| (band.to_lowercase(), watch))
            .collect();
        Self { bands: RwLock::new(bands) }
    }

    /// Replace the lists for one band ("all" for every band)
    pub fn set_band(&self, band: &str, watch: BandWatch) {
        let mut bands = self.bands.write().unwrap_or_else(|e| e.into_inner());
        bands.insert(band.to_lowercase(), watch);
    }

    /// Lists in effect on `band`: the "all" lists plus the band's own
    pub fn snapshot(&self, band: Option<&str>) -> BandWatch {
        let bands = self.bands.read().unwrap_or_else(|e| e.into_inner());
        let mut watch = bands.get(ALL_BANDS).cloned().unwrap_or_default();
        if let Some(specific) = band.and_then(|b| bands.get(&b.to_lowercase())) {
            watch.merge(specific);
        }
        watch
    }
}

/// Callsigns already in the log
#[derive(Debug, Default)]
pub struct WorkedBefore {
    calls: Mutex<HashSet<String>>,
}

impl WorkedBefore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, call: &str) -> bool {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.insert(call.trim().to_uppercase())
    }

    pub fn contains(&self, call: &str) -> bool {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.contains(&call.trim().to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: AsRef<str>> FromIterator<S> for WorkedBefore {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let calls = iter
            .into_iter()
            .map(|c| c.as_ref().trim().to_uppercase())
            .collect();
        Self { calls: Mutex::new(calls) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_wildcard_sets() {
        let set = patterns(&["F5*", "K1??"]);
        assert!(matches_any(&set, "F5UKW"));
        assert!(matches_any(&set, "K1JT"));
        assert!(!matches_any(&set, "K10ABC"));
        assert!(!matches_any(&set, "F4ABC"));
    }

    #[test]
    fn test_wildcard_edge_cases() {
        assert!(wildcard_match("*", "ANYTHING"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("f5ukw", "F5UKW"));
        assert!(wildcard_match("*/P", "K7ACN/P"));
        assert!(wildcard_match("K*1*", "KH1ABC"));
        assert!(!wildcard_match("?", ""));
        assert!(!wildcard_match("", "F5UKW"));
    }

    #[test]
    fn test_wanted_excluded_worked() {
        let watch = BandWatch {
            wanted: patterns(&["F*"]),
            excluded: patterns(&["F5*"]),
            ..Default::default()
        };
        let worked: WorkedBefore = ["F4XYZ"].into_iter().collect();

        assert!(watch.is_wanted("F4ABC", &worked));
        assert!(!watch.is_wanted("F5UKW", &worked)); // excluded
        assert!(!watch.is_wanted("f4xyz", &worked)); // worked before
        assert!(!watch.is_wanted("K1JT", &worked)); // not wanted
    }

    #[test]
    fn test_band_snapshot_merges_all() {
        let mut bands = HashMap::new();
        bands.insert(
            "all".to_string(),
            BandWatch { wanted: patterns(&["VK*"]), ..Default::default() },
        );
        bands.insert(
            "20M".to_string(),
            BandWatch {
                wanted: patterns(&["ZL*"]),
                monitored_zones: [32u8].into_iter().collect(),
                ..Default::default()
            },
        );
        let lists = WatchLists::new(bands);

        let on_20m = lists.snapshot(Some("20m"));
        assert_eq!(on_20m.wanted, patterns(&["VK*", "ZL*"]));
        assert!(on_20m.is_monitored_zone(32));

        let on_40m = lists.snapshot(Some("40m"));
        assert_eq!(on_40m.wanted, patterns(&["VK*"]));
        assert!(!on_40m.is_monitored_zone(32));

        lists.set_band("40m", BandWatch { monitored: patterns(&["JA*"]), ..Default::default() });
        assert!(lists.snapshot(Some("40m")).is_monitored("JA1XYZ"));
        assert!(lists.snapshot(None).monitored.is_empty());
    }
}
