// Club Log style country file (cty.xml) parser
//
// <clublog>
//   <entities><entity><adif>227</adif><name>FRANCE</name><prefix>F</prefix>...</entity></entities>
//   <exceptions><exception record="1"><call>TX5K</call>...<start>...</start></exception></exceptions>
//   <prefixes><prefix record="1"><call>F</call>...</prefix></prefixes>
//   <invalid_operations><invalid record="1"><call>...</call><start/><end/></invalid></invalid_operations>
//   <zone_exceptions><zone_exception record="1"><call>...</call><zone>14</zone></zone_exception></zone_exceptions>
// </clublog>
//
// Each record element's children are collected as name -> text and converted
// once the record closes. Missing numbers default to zero, missing text to
// empty, malformed dates to "no bound".

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use super::{CallsignRecord, Entity, Validity};
use crate::error::LookupError;

/// Raw tables as read from the file, before prefix expansion and back-fill
#[derive(Debug, Clone, Default)]
pub struct CtyTables {
    pub entities: HashMap<u16, Entity>,
    pub exceptions: HashMap<String, Vec<CallsignRecord>>,
    pub prefixes: HashMap<String, Vec<CallsignRecord>>,
    pub invalid_operations: HashMap<String, Vec<Validity>>,
    pub zone_exceptions: HashMap<String, u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Entity,
    Exception,
    Prefix,
    Invalid,
    ZoneException,
}

impl RecordKind {
    fn from_element(name: &str) -> Option<Self> {
        match name {
            "entity" => Some(Self::Entity),
            "exception" => Some(Self::Exception),
            "prefix" => Some(Self::Prefix),
            "invalid" => Some(Self::Invalid),
            "zone_exception" => Some(Self::ZoneException),
            _ => None,
        }
    }

    fn element(self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Exception => "exception",
            Self::Prefix => "prefix",
            Self::Invalid => "invalid",
            Self::ZoneException => "zone_exception",
        }
    }
}

type Fields = HashMap<String, String>;

/// Record element being collected
struct OpenRecord {
    kind: RecordKind,
    fields: Fields,
    /// A field could not be decoded; the record is dropped when it closes
    broken: bool,
}

/// Parse the whole file. Any XML error fails the parse.
pub fn parse_cty_xml(xml: &str) -> Result<CtyTables, LookupError> {
    match parse_cty_xml_partial(xml) {
        (tables, None) => Ok(tables),
        (_, Some(e)) => Err(e),
    }
}

/// Parse as far as the XML allows. Records with undecodable text are
/// skipped; a structural error stops the parse and is returned alongside
/// every record completed before it.
pub fn parse_cty_xml_partial(xml: &str) -> (CtyTables, Option<LookupError>) {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut tables = CtyTables::default();
    // Record currently open and the child element we are inside of.
    // <entity> and <prefix> are records at the top level but plain fields
    // inside an exception / entity, so a record never nests.
    let mut record: Option<OpenRecord> = None;
    let mut field: Option<String> = None;

    let error = loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if record.is_some() {
                    field = Some(name);
                } else if let Some(kind) = RecordKind::from_element(&name) {
                    record = Some(OpenRecord { kind, fields: Fields::new(), broken: false });
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(open), Some(name)) = (record.as_mut(), field.as_ref()) {
                    match t.unescape() {
                        Ok(text) => {
                            open.fields.insert(name.clone(), text.trim().to_string());
                        }
                        Err(e) => {
                            log::warn!(
                                "Bad <{}> text in {} at position {}: {}",
                                name,
                                open.kind.element(),
                                reader.buffer_position(),
                                e
                            );
                            open.broken = true;
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if field.take().is_none() {
                    if let Some(open) = record.take() {
                        if open.kind.element() != name {
                            record = Some(open);
                        } else if open.broken {
                            log::warn!(
                                "Skipping {} {:?}",
                                open.kind.element(),
                                open.fields.get("call").or_else(|| open.fields.get("name"))
                            );
                        } else {
                            add_record(&mut tables, open.kind, &open.fields);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break None,
            Err(e) => {
                break Some(LookupError::DatabaseLoad(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            // Empty elements (<lat/>) leave the field unset
            _ => {}
        }
    };

    log::debug!(
        "Parsed cty.xml: {} entities, {} prefixes, {} exceptions, {} invalid operations, {} zone exceptions",
        tables.entities.len(),
        tables.prefixes.len(),
        tables.exceptions.len(),
        tables.invalid_operations.len(),
        tables.zone_exceptions.len()
    );

    (tables, error)
}

fn add_record(tables: &mut CtyTables, kind: RecordKind, fields: &Fields) {
    match kind {
        RecordKind::Entity => {
            let entity = Entity {
                adif_id: number(fields, "adif"),
                name: text(fields, "name"),
                prefix: text(fields, "prefix"),
                deleted: fields
                    .get("deleted")
                    .map_or(false, |d| d.eq_ignore_ascii_case("true")),
                cq_zone: number(fields, "cqz"),
                continent: text(fields, "cont"),
                lat: number(fields, "lat"),
                lon: number(fields, "long"),
                valid_from: date(fields, "start"),
                valid_to: date(fields, "end"),
            };
            if entity.adif_id == 0 {
                log::warn!("Entity {:?} has no ADIF number, skipping", entity.name);
                return;
            }
            tables.entities.insert(entity.adif_id, entity);
        }
        RecordKind::Exception | RecordKind::Prefix => {
            let record = callsign_record(fields);
            if record.call.is_empty() {
                return;
            }
            let table = if kind == RecordKind::Exception {
                &mut tables.exceptions
            } else {
                &mut tables.prefixes
            };
            table.entry(record.call.clone()).or_default().push(record);
        }
        RecordKind::Invalid => {
            let call = text(fields, "call").to_uppercase();
            if call.is_empty() {
                return;
            }
            tables.invalid_operations.entry(call).or_default().push(Validity {
                from: date(fields, "start"),
                to: date(fields, "end"),
            });
        }
        RecordKind::ZoneException => {
            let call = text(fields, "call").to_uppercase();
            let zone: u8 = number(fields, "zone");
            if call.is_empty() || zone == 0 {
                return;
            }
            tables.zone_exceptions.insert(call, zone);
        }
    }
}

fn callsign_record(fields: &Fields) -> CallsignRecord {
    CallsignRecord {
        call: text(fields, "call").to_uppercase(),
        entity_name: text(fields, "entity"),
        adif_id: number(fields, "adif"),
        cq_zone: number(fields, "cqz"),
        continent: text(fields, "cont"),
        lat: number(fields, "lat"),
        lon: number(fields, "long"),
        valid_from: date(fields, "start"),
        valid_to: date(fields, "end"),
    }
}

fn text(fields: &Fields, key: &str) -> String {
    fields.get(key).cloned().unwrap_or_default()
}

fn number<T: std::str::FromStr + Default>(fields: &Fields, key: &str) -> T {
    fields
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

/// RFC 3339 timestamp or plain YYYY-MM-DD. Anything else is logged and
/// treated as unbounded.
fn date(fields: &Fields, key: &str) -> Option<DateTime<Utc>> {
    let raw = fields.get(key)?;
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Some(dt.and_utc());
    }
    log::warn!(
        "Malformed {} date {:?} for {:?}, treating as unbounded",
        key,
        raw,
        fields.get("call").or_else(|| fields.get("name"))
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<clublog date="2024-01-01T00:00:00+00:00" xmlns="https://clublog.org/cty/v1.2">
  <entities>
    <entity>
      <adif>227</adif><name>FRANCE</name><prefix>F</prefix><deleted>FALSE</deleted>
      <cqz>14</cqz><cont>EU</cont><long>2.00</long><lat>46.00</lat>
    </entity>
    <entity>
      <adif>999</adif><name>GONE &amp; FORGOTTEN</name><prefix>X9</prefix><deleted>TRUE</deleted>
      <cqz>1</cqz><cont>NA</cont><long>0.0</long><lat>0.0</lat>
    </entity>
  </entities>
  <exceptions>
    <exception record="1">
      <call>TX5K</call><entity>CLIPPERTON ISLAND</entity><adif>36</adif><cqz>7</cqz><cont>NA</cont>
      <long>-109.20</long><lat>10.30</lat>
      <start>2013-03-01T00:00:00+00:00</start><end>2013-03-31T23:59:59+00:00</end>
    </exception>
  </exceptions>
  <prefixes>
    <prefix record="2"><call>F</call><entity>FRANCE</entity><adif>227</adif><cqz>14</cqz><cont>EU</cont><long>2.0</long><lat>46.0</lat></prefix>
  </prefixes>
  <invalid_operations>
    <invalid record="3"><call>F0BAD</call><start>2020-01-01</start><end>not a date</end></invalid>
  </invalid_operations>
  <zone_exceptions>
    <zone_exception record="4"><call>F5ZZZ</call><zone>40</zone><start/><end/></zone_exception>
  </zone_exceptions>
</clublog>"#;

    #[test]
    fn test_parse_sample() {
        let tables = parse_cty_xml(SAMPLE).unwrap();

        assert_eq!(tables.entities.len(), 2);
        let france = &tables.entities[&227];
        assert_eq!(france.name, "FRANCE");
        assert_eq!(france.cq_zone, 14);
        assert!(!france.deleted);
        assert_eq!(tables.entities[&999].name, "GONE & FORGOTTEN");
        assert!(tables.entities[&999].deleted);

        let tx5k = &tables.exceptions["TX5K"][0];
        assert_eq!(tx5k.entity_name, "CLIPPERTON ISLAND");
        assert_eq!(tx5k.adif_id, 36);
        assert_eq!(tx5k.lon, -109.2);
        assert_eq!(
            tx5k.valid_from,
            Some(Utc.with_ymd_and_hms(2013, 3, 1, 0, 0, 0).unwrap())
        );

        assert_eq!(tables.prefixes["F"][0].cq_zone, 14);
        assert_eq!(tables.zone_exceptions["F5ZZZ"], 40);
    }

    #[test]
    fn test_malformed_date_is_unbounded() {
        let tables = parse_cty_xml(SAMPLE).unwrap();
        let window = &tables.invalid_operations["F0BAD"][0];
        assert_eq!(window.from, Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(window.to, None);
    }

    #[test]
    fn test_broken_xml() {
        let err = parse_cty_xml("<clublog><entities><entity></entities></clublog>").unwrap_err();
        assert!(matches!(err, LookupError::DatabaseLoad(_)));
    }

    #[test]
    fn test_bad_record_is_skipped() {
        let xml = r#"<clublog><entities>
            <entity><adif>227</adif><name>FRANCE</name><prefix>F</prefix><cqz>14</cqz></entity>
            <entity><adif>1</adif><name>BAD &bogus; NAME</name><prefix>VE</prefix><cqz>5</cqz></entity>
            <entity><adif>291</adif><name>UNITED STATES</name><prefix>K</prefix><cqz>5</cqz></entity>
        </entities></clublog>"#;
        let (tables, error) = parse_cty_xml_partial(xml);
        assert!(error.is_none());
        assert_eq!(tables.entities.len(), 2);
        assert!(tables.entities.contains_key(&227));
        assert!(tables.entities.contains_key(&291));
        assert!(!tables.entities.contains_key(&1));
    }

    #[test]
    fn test_structural_error_keeps_earlier_records() {
        let xml = r#"<clublog><entities>
            <entity><adif>227</adif><name>FRANCE</name><prefix>F</prefix><cqz>14</cqz></entity>
            <entity><adif>291</adif><name>UNITED STATES</name></prefix></entity>
        </entities></clublog>"#;
        let (tables, error) = parse_cty_xml_partial(xml);
        assert!(matches!(error, Some(LookupError::DatabaseLoad(_))));
        assert_eq!(tables.entities[&227].name, "FRANCE");
        assert!(parse_cty_xml(xml).is_err());
    }

    #[test]
    fn test_empty_document() {
        let tables = parse_cty_xml("<clublog/>").unwrap();
        assert!(tables.entities.is_empty());
        assert!(tables.prefixes.is_empty());
    }
}
