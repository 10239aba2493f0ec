// Bounded lookup cache
//
// Insertion ordered: updating an entry moves it to the back, and the entry at
// the front is evicted once the capacity is exceeded. Persisted as JSON
// between runs, but never authoritative.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use super::CallsignRecord;
use crate::error::LookupError;

#[derive(Debug, Clone)]
pub struct LookupCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, CallsignRecord>,
}

impl LookupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1024)),
            entries: HashMap::with_capacity(capacity.min(1024)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, call: &str) -> Option<&CallsignRecord> {
        self.entries.get(call)
    }

    pub fn contains(&self, call: &str) -> bool {
        self.entries.contains_key(call)
    }

    pub fn insert(&mut self, call: String, record: CallsignRecord) {
        if self.entries.insert(call.clone(), record).is_some() {
            self.order.retain(|c| c != &call);
        }
        self.order.push_back(call);

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    /// Entries oldest first
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CallsignRecord)> {
        self.order
            .iter()
            .filter_map(move |call| self.entries.get(call).map(|record| (call, record)))
    }

    /// Load a cache saved with [`LookupCache::save`]. Entries beyond the
    /// capacity push out the oldest ones, as they would at runtime.
    pub fn load(path: &Path, capacity: usize) -> Result<Self, LookupError> {
        let text = std::fs::read_to_string(path)?;
        let saved: Vec<(String, CallsignRecord)> = serde_json::from_str(&text)?;

        let mut cache = Self::new(capacity);
        for (call, record) in saved {
            cache.insert(call, record);
        }
        Ok(cache)
    }

    pub fn save(&self, path: &Path) -> Result<(), LookupError> {
        let saved: Vec<(&String, &CallsignRecord)> = self.iter().collect();
        let json = serde_json::to_string(&saved)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(call: &str) -> CallsignRecord {
        CallsignRecord {
            call: call.to_string(),
            entity_name: "FRANCE".to_string(),
            adif_id: 227,
            cq_zone: 14,
            continent: "EU".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_capacity_evicts_first_inserted() {
        let mut cache = LookupCache::new(3);
        for call in ["F1AAA", "F1BBB", "F1CCC", "F1DDD"] {
            cache.insert(call.to_string(), record(call));
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("F1AAA"));
        assert!(cache.contains("F1DDD"));
    }

    #[test]
    fn test_update_refreshes_position() {
        let mut cache = LookupCache::new(2);
        cache.insert("F1AAA".to_string(), record("F1AAA"));
        cache.insert("F1BBB".to_string(), record("F1BBB"));
        cache.insert("F1AAA".to_string(), record("F1AAA"));
        cache.insert("F1CCC".to_string(), record("F1CCC"));

        assert!(cache.contains("F1AAA"));
        assert!(!cache.contains("F1BBB"));
        let order: Vec<&String> = cache.iter().map(|(c, _)| c).collect();
        assert_eq!(order, vec!["F1AAA", "F1CCC"]);
    }

    #[test]
    fn test_zero_capacity() {
        let mut cache = LookupCache::new(0);
        cache.insert("F1AAA".to_string(), record("F1AAA"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("ft8alert_cache_{}.json", std::process::id()));

        let mut cache = LookupCache::new(10);
        cache.insert("F5UKW".to_string(), record("F5UKW"));
        cache.insert("F4ABC".to_string(), record("F4ABC"));
        cache.save(&path).unwrap();

        let loaded = LookupCache::load(&path, 1).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("F4ABC"), Some(&record("F4ABC")));
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("ft8alert_cache_does_not_exist.json");
        assert!(matches!(LookupCache::load(&path, 10), Err(LookupError::Io(_))));
    }
}
