// Reference data module - callsign to entity / CQ zone / continent lookup
// Source: Club Log style country file (cty.xml) plus CQ zone polygons
//
// Lookup order for a callsign on a given date:
// 1. invalid operation window covering the date -> no result
// 2. exact-call exceptions, first record valid on the date
// 3. longest matching prefix, first record valid on the date
// 4. zone exception, then grid locator polygon, may override the CQ zone
//
// Tables are read-only once loaded. Only the result cache is locked.

pub mod cache;
pub mod cty_xml;
pub mod grid_location;
pub mod prefixes;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LookupError;
use cache::LookupCache;
use cty_xml::CtyTables;
use grid_location::{grid_to_latlon, ZonePolygons};
use prefixes::{expand_prefix_notation, PrefixTable};

/// Resolved callsign information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallsignRecord {
    /// The exception call or the literal prefix this record was found under
    pub call: String,
    pub entity_name: String,
    pub adif_id: u16,
    pub cq_zone: u8,
    pub continent: String,
    pub lat: f64,
    pub lon: f64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl CallsignRecord {
    pub fn validity(&self) -> Validity {
        Validity { from: self.valid_from, to: self.valid_to }
    }

    pub fn is_valid_at(&self, date: DateTime<Utc>) -> bool {
        self.validity().covers(date)
    }

    /// Fill in whatever the record left blank from its entity
    fn backfill(&mut self, entity: &Entity) {
        if self.entity_name.is_empty() {
            self.entity_name = entity.name.clone();
        }
        if self.cq_zone == 0 {
            self.cq_zone = entity.cq_zone;
        }
        if self.continent.is_empty() {
            self.continent = entity.continent.clone();
        }
        if self.lat == 0.0 && self.lon == 0.0 {
            self.lat = entity.lat;
            self.lon = entity.lon;
        }
    }
}

/// DXCC entity as listed in the country file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub adif_id: u16,
    pub name: String,
    /// Compact prefix notation, e.g. "K,W,N,AA-AK"
    pub prefix: String,
    pub deleted: bool,
    pub cq_zone: u8,
    pub continent: String,
    pub lat: f64,
    pub lon: f64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Entity {
    fn record_for(&self, prefix: &str) -> CallsignRecord {
        CallsignRecord {
            call: prefix.to_string(),
            entity_name: self.name.clone(),
            adif_id: self.adif_id,
            cq_zone: self.cq_zone,
            continent: self.continent.clone(),
            lat: self.lat,
            lon: self.lon,
            valid_from: self.valid_from,
            valid_to: self.valid_to,
        }
    }
}

/// Inclusive date window; a missing bound is open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Validity {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Validity {
    pub fn covers(&self, date: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// Callsign lookup engine
///
/// Shared between the UDP receive thread and ad-hoc callers behind an `Arc`.
#[derive(Debug)]
pub struct CallsignEngine {
    entities: HashMap<u16, Entity>,
    exceptions: HashMap<String, Vec<CallsignRecord>>,
    invalid_operations: HashMap<String, Vec<Validity>>,
    zone_exceptions: HashMap<String, u8>,
    prefixes: PrefixTable,
    zones: ZonePolygons,
    cache: Mutex<LookupCache>,
}

impl CallsignEngine {
    /// Engine with no data. Every lookup returns `None`.
    pub fn empty(cache_capacity: usize) -> Self {
        Self::from_tables(CtyTables::default(), ZonePolygons::empty(), LookupCache::new(cache_capacity))
    }

    /// Build the lookup tables: back-fill records from their entity and
    /// expand every live entity's compact prefix notation into the prefix table.
    pub fn from_tables(tables: CtyTables, zones: ZonePolygons, cache: LookupCache) -> Self {
        let CtyTables {
            entities,
            mut exceptions,
            mut prefixes,
            invalid_operations,
            zone_exceptions,
        } = tables;

        for record in exceptions.values_mut().chain(prefixes.values_mut()).flatten() {
            if let Some(entity) = entities.get(&record.adif_id) {
                record.backfill(entity);
            }
        }

        let mut ids: Vec<&u16> = entities.keys().collect();
        ids.sort();
        for entity in ids.into_iter().filter_map(|id| entities.get(id)) {
            if entity.deleted {
                continue;
            }
            for prefix in expand_prefix_notation(&entity.prefix) {
                let record = entity.record_for(&prefix);
                prefixes.entry(prefix).or_default().push(record);
            }
        }

        Self {
            entities,
            exceptions,
            invalid_operations,
            zone_exceptions,
            prefixes: PrefixTable::new(prefixes),
            zones,
            cache: Mutex::new(cache),
        }
    }

    pub fn from_xml_str(xml: &str, cache_capacity: usize) -> Result<Self, LookupError> {
        let tables = cty_xml::parse_cty_xml(xml)?;
        Ok(Self::from_tables(tables, ZonePolygons::empty(), LookupCache::new(cache_capacity)))
    }

    /// Load the country file and zone polygons. Never fails: a missing or
    /// broken file is logged and the engine works with whatever it could read.
    pub fn load(cty_xml: Option<&Path>, cq_zones: Option<&Path>, cache: LookupCache) -> Self {
        let tables = match cty_xml {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(xml) => {
                    let (tables, error) = cty_xml::parse_cty_xml_partial(&xml);
                    if let Some(e) = error {
                        log::error!(
                            "Country file {} is damaged, keeping the {} entities read before the error: {}",
                            path.display(),
                            tables.entities.len(),
                            e
                        );
                    }
                    tables
                }
                Err(e) => {
                    log::error!("Failed to load country file {}: {}", path.display(), e);
                    CtyTables::default()
                }
            },
            None => {
                log::warn!("No country file configured, callsign lookups will be empty");
                CtyTables::default()
            }
        };

        let zones = match cq_zones {
            Some(path) => ZonePolygons::load(path).unwrap_or_else(|e| {
                log::error!("Failed to load CQ zones {}: {}", path.display(), e);
                ZonePolygons::empty()
            }),
            None => ZonePolygons::empty(),
        };

        let engine = Self::from_tables(tables, zones, cache);
        log::info!(
            "Callsign database loaded: {} entities, {} prefixes, {} exceptions, {} CQ zones",
            engine.entities.len(),
            engine.prefixes.len(),
            engine.exceptions.len(),
            engine.zones.len()
        );
        engine
    }

    pub fn with_zones(mut self, zones: ZonePolygons) -> Self {
        self.zones = zones;
        self
    }

    pub fn entity(&self, adif_id: u16) -> Option<&Entity> {
        self.entities.get(&adif_id)
    }

    pub fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }

    /// Look up `call`, optionally refined by the grid it sent, as of `date`
    /// (now when `None`). Results for the current date without a grid are cached.
    ///
    /// Only a bad grid locator is an error.
    pub fn lookup(
        &self,
        call: &str,
        grid: Option<&str>,
        date: Option<DateTime<Utc>>,
    ) -> Result<Option<CallsignRecord>, LookupError> {
        self.lookup_inner(call, grid, date, true)
    }

    /// Same as [`CallsignEngine::lookup`] without touching the cache
    pub fn lookup_uncached(
        &self,
        call: &str,
        grid: Option<&str>,
        date: Option<DateTime<Utc>>,
    ) -> Result<Option<CallsignRecord>, LookupError> {
        self.lookup_inner(call, grid, date, false)
    }

    /// Last cached result for `call`
    pub fn cached(&self, call: &str) -> Option<CallsignRecord> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(&call.trim().to_uppercase()).cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn save_cache(&self, path: &Path) -> Result<(), LookupError> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.save(path)
    }

    fn lookup_inner(
        &self,
        call: &str,
        grid: Option<&str>,
        date: Option<DateTime<Utc>>,
        use_cache: bool,
    ) -> Result<Option<CallsignRecord>, LookupError> {
        let call = call.trim().to_uppercase();
        if call.is_empty() {
            return Ok(None);
        }
        let grid = grid.map(str::trim).filter(|g| !g.is_empty());
        let when = date.unwrap_or_else(Utc::now);

        if self.is_invalid_operation(&call, when) {
            log::debug!("{} is not a valid operation on {}", call, when);
            return Ok(None);
        }

        // The cache only holds "as of now" answers without grid refinement
        let use_cache = use_cache && date.is_none() && grid.is_none();
        if use_cache {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&call) {
                return Ok(Some(hit.clone()));
            }
        }

        let Some(mut record) = self.resolve(&call, when) else {
            return Ok(None);
        };

        if let Some(zone) = self.zone_exceptions.get(&call) {
            record.cq_zone = *zone;
        }

        if let Some(grid) = grid {
            let (lat, lon) = grid_to_latlon(grid)?;
            if let Some(zone) = self.zones.zone_at(lat, lon) {
                if zone != record.cq_zone {
                    log::debug!(
                        "{} in {}: CQ zone {} from polygons overrides {}",
                        call,
                        grid,
                        zone,
                        record.cq_zone
                    );
                    record.cq_zone = zone;
                }
            }
        }

        if use_cache {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.insert(call, record.clone());
        }

        Ok(Some(record))
    }

    fn is_invalid_operation(&self, call: &str, when: DateTime<Utc>) -> bool {
        self.invalid_operations
            .get(call)
            .map_or(false, |windows| windows.iter().any(|w| w.covers(when)))
    }

    fn resolve(&self, call: &str, when: DateTime<Utc>) -> Option<CallsignRecord> {
        if let Some(records) = self.exceptions.get(call) {
            if let Some(record) = records.iter().find(|r| r.is_valid_at(when)) {
                return Some(record.clone());
            }
        }
        self.prefixes.resolve(call, when).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::grid_location::ZonePolygon;
    use super::*;
    use chrono::TimeZone;

    const CTY: &str = r#"<clublog>
  <entities>
    <entity><adif>291</adif><name>UNITED STATES OF AMERICA</name><prefix>K,W,N,AA-AK</prefix>
      <deleted>FALSE</deleted><cqz>5</cqz><cont>NA</cont><long>-97.0</long><lat>37.5</lat></entity>
    <entity><adif>110</adif><name>HAWAII</name><prefix>KH6-KH7</prefix>
      <deleted>FALSE</deleted><cqz>31</cqz><cont>OC</cont><long>-157.9</long><lat>21.1</lat></entity>
    <entity><adif>227</adif><name>FRANCE</name><prefix>F</prefix>
      <deleted>FALSE</deleted><cqz>14</cqz><cont>EU</cont><long>2.0</long><lat>46.0</lat></entity>
    <entity><adif>36</adif><name>CLIPPERTON ISLAND</name><prefix>FO0</prefix>
      <deleted>FALSE</deleted><cqz>7</cqz><cont>NA</cont><long>-109.2</long><lat>10.3</lat></entity>
    <entity><adif>999</adif><name>OLD ENTITY</name><prefix>X9</prefix>
      <deleted>TRUE</deleted><cqz>1</cqz><cont>NA</cont></entity>
  </entities>
  <exceptions>
    <exception record="1"><call>TX5K</call><adif>36</adif>
      <start>2013-03-01T00:00:00+00:00</start><end>2013-03-31T23:59:59+00:00</end></exception>
    <exception record="2"><call>K1XYZ</call><entity>HAWAII</entity><adif>110</adif><cqz>31</cqz><cont>OC</cont></exception>
  </exceptions>
  <prefixes>
    <prefix record="3"><call>VP2E</call><entity>ANGUILLA</entity><adif>12</adif><cqz>8</cqz><cont>NA</cont>
      <start>2020-01-01T00:00:00+00:00</start><end>2020-12-31T23:59:59+00:00</end></prefix>
  </prefixes>
  <invalid_operations>
    <invalid record="4"><call>K1BAD</call><start>2020-01-01T00:00:00+00:00</start></invalid>
  </invalid_operations>
  <zone_exceptions>
    <zone_exception record="5"><call>K0ZZ</call><zone>4</zone></zone_exception>
  </zone_exceptions>
</clublog>"#;

    fn engine() -> CallsignEngine {
        CallsignEngine::from_xml_str(CTY, 100).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_longest_prefix_wins() {
        let e = engine();
        let hawaii = e.lookup("kh6abc", None, None).unwrap().unwrap();
        assert_eq!(hawaii.entity_name, "HAWAII");
        assert_eq!(hawaii.call, "KH6");
        let usa = e.lookup("K1ABC", None, None).unwrap().unwrap();
        assert_eq!(usa.entity_name, "UNITED STATES OF AMERICA");
        assert_eq!(usa.cq_zone, 5);
        // Expanded range
        assert_eq!(e.lookup("AG5Z", None, None).unwrap().unwrap().adif_id, 291);
    }

    #[test]
    fn test_exception_precedence() {
        let e = engine();
        let rec = e.lookup("K1XYZ", None, None).unwrap().unwrap();
        assert_eq!(rec.entity_name, "HAWAII");
        assert_eq!(rec.continent, "OC");
    }

    #[test]
    fn test_exception_backfill_and_dates() {
        let e = engine();
        let during = e.lookup("TX5K", None, at(2013, 3, 15)).unwrap().unwrap();
        assert_eq!(during.entity_name, "CLIPPERTON ISLAND");
        assert_eq!(during.cq_zone, 7);
        assert_eq!(during.continent, "NA");

        // Outside the DXpedition the call falls through to the prefix table (no "T" prefix)
        assert!(e.lookup("TX5K", None, at(2014, 1, 1)).unwrap().is_none());
    }

    #[test]
    fn test_date_bounded_prefix() {
        let e = engine();
        let rec = e.lookup("VP2EXX", None, at(2020, 6, 15)).unwrap().unwrap();
        assert_eq!(rec.entity_name, "ANGUILLA");
        assert!(e.lookup("VP2EXX", None, at(2021, 1, 1)).unwrap().is_none());
    }

    #[test]
    fn test_invalid_operation_suppresses() {
        let e = engine();
        assert!(e.lookup("K1BAD", None, at(2023, 5, 1)).unwrap().is_none());
        assert!(e.cached("K1BAD").is_none());
        // Before the window the prefix match applies
        assert!(e.lookup("K1BAD", None, at(2019, 5, 1)).unwrap().is_some());
    }

    #[test]
    fn test_deleted_entity_skipped() {
        let e = engine();
        assert!(e.lookup("X9ABC", None, None).unwrap().is_none());
        assert!(e.entity(999).is_some());
    }

    #[test]
    fn test_zone_exception() {
        let e = engine();
        assert_eq!(e.lookup("K0ZZ", None, None).unwrap().unwrap().cq_zone, 4);
    }

    #[test]
    fn test_grid_overrides_zone() {
        // Square around FN31 labelled zone 4
        let zones = ZonePolygons::new(vec![ZonePolygon::new(
            4,
            vec![vec![vec![(-75.0, 40.0), (-70.0, 40.0), (-70.0, 43.0), (-75.0, 43.0)]]],
        )]);
        let e = engine().with_zones(zones);

        assert_eq!(e.lookup("W1AW", Some("FN31"), None).unwrap().unwrap().cq_zone, 4);
        assert_eq!(e.lookup("W1AW", Some("EM10"), None).unwrap().unwrap().cq_zone, 5);
        assert!(matches!(
            e.lookup("W1AW", Some("F"), None),
            Err(LookupError::InvalidLocator(_))
        ));
    }

    #[test]
    fn test_cache() {
        let e = engine();
        assert!(e.lookup_uncached("F5UKW", None, None).unwrap().is_some());
        assert!(e.cached("F5UKW").is_none());

        let rec = e.lookup("F5UKW", None, None).unwrap().unwrap();
        assert_eq!(e.cached("f5ukw"), Some(rec));
        assert_eq!(e.cache_len(), 1);

        assert!(e.lookup("", None, None).unwrap().is_none());
    }

    #[test]
    fn test_dated_and_grid_lookups_not_cached() {
        let zones = ZonePolygons::new(vec![ZonePolygon::new(
            4,
            vec![vec![vec![(-75.0, 40.0), (-70.0, 40.0), (-70.0, 43.0), (-75.0, 43.0)]]],
        )]);
        let e = engine().with_zones(zones);

        // Historic answer must not leak into a lookup for today
        let then = e.lookup("TX5K", None, at(2013, 3, 15)).unwrap().unwrap();
        assert_eq!(then.entity_name, "CLIPPERTON ISLAND");
        assert!(e.cached("TX5K").is_none());
        assert_eq!(e.lookup("TX5K", None, None).unwrap(), e.lookup_uncached("TX5K", None, None).unwrap());
        assert!(e.lookup("TX5K", None, None).unwrap().is_none());

        // Nor may a polygon-derived zone
        assert_eq!(e.lookup("W1AW", Some("FN31"), None).unwrap().unwrap().cq_zone, 4);
        assert!(e.cached("W1AW").is_none());
        assert_eq!(e.lookup("W1AW", None, None).unwrap().unwrap().cq_zone, 5);
        assert_eq!(e.cached("W1AW").map(|r| r.cq_zone), Some(5));
        assert_eq!(e.cache_len(), 1);
    }

    #[test]
    fn test_empty_engine() {
        let e = CallsignEngine::empty(10);
        assert!(e.lookup("F5UKW", None, None).unwrap().is_none());
        assert_eq!(e.prefix_count(), 0);
    }

    #[test]
    fn test_load_missing_files() {
        let dir = std::env::temp_dir();
        let e = CallsignEngine::load(
            Some(&dir.join("ft8alert_missing_cty.xml")),
            Some(&dir.join("ft8alert_missing_zones.geojson")),
            LookupCache::new(10),
        );
        assert!(e.lookup("F5UKW", None, None).unwrap().is_none());
    }

    #[test]
    fn test_load_damaged_file_keeps_partial_tables() {
        let path = std::env::temp_dir().join(format!("ft8alert_damaged_cty_{}.xml", std::process::id()));
        let xml = r#"<clublog><entities>
            <entity><adif>227</adif><name>FRANCE</name><prefix>F</prefix><cqz>14</cqz><cont>EU</cont></entity>
            <entity><adif>1</adif><name>BAD &bogus;</name><prefix>VE</prefix></entity>
            <entity><adif>291</adif><name>UNITED STATES</name><prefix>K</entity>
        </entities></clublog>"#;
        std::fs::write(&path, xml).unwrap();

        let e = CallsignEngine::load(Some(&path), None, LookupCache::new(10));
        std::fs::remove_file(&path).ok();

        assert!(e.prefix_count() > 0);
        assert_eq!(e.lookup("F5UKW", None, None).unwrap().unwrap().entity_name, "FRANCE");
        assert!(e.lookup("VE3ABC", None, None).unwrap().is_none());
    }
}
