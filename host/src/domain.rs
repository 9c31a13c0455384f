use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// one timestamped lux measurement
///
/// field names match the snapshot format the dashboard and
/// the persisted `readingStoreData` key have always used.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// ISO-8601 UTC, millisecond precision
    pub timestamp: String,
    #[serde(rename = "luxValue")]
    pub lux_value: f64,
}

impl Reading {
    pub fn new(timestamp: impl Into<String>, lux_value: f64) -> Self {
        Self { timestamp: timestamp.into(), lux_value }
    }

    /// stamp a fresh measurement with the current time
    pub fn now(lux_value: f64) -> Self {
        Self::new(iso_now(), lux_value)
    }
}

/// a reading together with the id it is stored under
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordedReading {
    pub id: String,
    #[serde(flatten)]
    pub reading: Reading,
}

impl RecordedReading {
    /// new reading with a fresh id and the current time
    pub fn fresh(lux_value: f64) -> Self {
        Self { id: new_reading_id(), reading: Reading::now(lux_value) }
    }
}

/// fresh opaque reading id
pub fn new_reading_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// current time as `2026-10-17T10:00:00.123Z`
pub fn iso_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// complete copy of store state
///
/// serialized as `{ "readings": { "<id>": { ... } } }` with object keys in
/// insertion order, so a snapshot written and read back keeps display order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "ordered_map")]
    pub readings: Vec<(String, Reading)>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

// ==============================================================================
// ordered json object <-> Vec<(id, reading)>
// ==============================================================================
// serde_json's Map sorts keys unless preserve_order is on; going through a
// Vec keeps insertion order on both sides. duplicate keys collapse to the
// last value at the first key's position, same as inserting into the store.

mod ordered_map {
    use super::*;

    pub fn serialize<S: Serializer>(entries: &[(String, Reading)], s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(entries.len()))?;
        for (id, reading) in entries {
            map.serialize_entry(id, reading)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<(String, Reading)>, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Vec<(String, Reading)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of reading id to reading")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, Reading)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((id, reading)) = access.next_entry::<String, Reading>()? {
                    match entries.iter_mut().find(|(existing, _)| *existing == id) {
                        Some(slot) => slot.1 = reading,
                        None => entries.push((id, reading)),
                    }
                }
                Ok(entries)
            }
        }

        d.deserialize_map(EntriesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_json_keeps_insertion_order() {
        let snap = Snapshot {
            readings: vec![
                ("b".into(), Reading::new("10:00:00", 12.3)),
                ("a".into(), Reading::new("10:00:01", 15.0)),
            ],
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.find("\"b\"").unwrap() < json.find("\"a\"").unwrap());

        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn snapshot_uses_lux_value_field_name() {
        let json = r#"{"readings":{"1":{"timestamp":"t","luxValue":4.5}}}"#;
        let snap: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.readings, vec![("1".to_string(), Reading::new("t", 4.5))]);
    }

    #[test]
    fn snapshot_rejects_wrong_shape() {
        assert!(serde_json::from_str::<Snapshot>(r#"{"readings":[1,2]}"#).is_err());
        assert!(serde_json::from_str::<Snapshot>(r#"{"readings":{"1":{"timestamp":"t"}}}"#).is_err());
        assert!(serde_json::from_str::<Snapshot>(r#"{}"#).is_err());
    }

    #[test]
    fn iso_now_is_utc_millis() {
        let ts = iso_now();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
