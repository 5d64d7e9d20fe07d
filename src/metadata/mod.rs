// Channel metadata normalization
//
// Sources describe their channels in vendor-specific ways. The normalizer
// turns any raw description (XML as published by the source, or an already
// canonical JSON document) into `CanonicalChannelInfo`, whose channel list
// always has exactly `channel_count` records. Malformed input never fails:
// it degrades to synthetic `Ch<i>` labels.

pub mod quirks;
pub mod xml;

use quirks::{QuirkTable, DEFAULT_QUIRK_VENDORS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use xml::XmlElement;

/// Metadata of one channel: field name -> value (label, unit, type, ...)
pub type ChannelRecord = Map<String, Value>;

/// Name of the description field holding the channel list
pub const CHANNELS_FIELD: &str = "channels";

/// Label used for synthesized channel `index` (0-based)
pub fn placeholder_label(index: usize) -> String {
    format!("Ch{}", index + 1)
}

/// Canonical channel metadata of one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalChannelInfo {
    pub channels: Vec<ChannelRecord>,

    /// Remaining description fields (manufacturer, alternative channel
    /// containers, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,

    /// True when the channel list was synthesized
    #[serde(default)]
    pub synthetic: bool,
}

impl CanonicalChannelInfo {
    /// Placeholder metadata with `{label: "Ch<i>"}` records
    pub fn placeholder(channel_count: usize) -> Self {
        let channels = (0..channel_count)
            .map(|i| {
                let mut record = Map::new();
                record.insert("label".to_string(), Value::String(placeholder_label(i)));
                record
            })
            .collect();
        Self {
            channels,
            fields: Map::new(),
            synthetic: true,
        }
    }

    /// Names of the description fields, channel container included
    pub fn description_fields(&self) -> Vec<String> {
        std::iter::once(CHANNELS_FIELD.to_string())
            .chain(self.fields.keys().cloned())
            .collect()
    }

    /// Channel list stored under `field`, if it has a list shape
    pub fn channel_list(&self, field: &str) -> Option<Vec<ChannelRecord>> {
        if field == CHANNELS_FIELD {
            return Some(self.channels.clone());
        }
        self.fields.get(field).and_then(coerce_channel_list)
    }
}

/// Converts raw descriptions to canonical channel metadata
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataNormalizer {
    quirks: QuirkTable,
}

impl Default for MetadataNormalizer {
    fn default() -> Self {
        Self::with_vendors(DEFAULT_QUIRK_VENDORS)
    }
}

impl MetadataNormalizer {
    pub fn with_vendors<S: AsRef<str>>(vendors: &[S]) -> Self {
        Self {
            quirks: QuirkTable::for_vendors(vendors),
        }
    }

    pub fn with_quirks(quirks: QuirkTable) -> Self {
        Self { quirks }
    }

    pub fn quirks(&self) -> &QuirkTable {
        &self.quirks
    }

    /// Normalize a raw description. Never fails.
    pub fn normalize(&self, raw: &str, channel_count: usize) -> CanonicalChannelInfo {
        let trimmed = raw.trim();
        let parsed = if trimmed.starts_with('<') {
            self.normalize_xml(trimmed, channel_count)
        } else if trimmed.starts_with('{') {
            Self::normalize_json(trimmed)
        } else {
            Err("Empty or unrecognized description".to_string())
        };

        match parsed {
            Ok(info) if info.channels.len() == channel_count => info,
            Ok(info) => {
                log::warn!(
                    "Description declares {} channel record(s) for {} channel(s), using placeholders",
                    info.channels.len(),
                    channel_count
                );
                CanonicalChannelInfo {
                    fields: info.fields,
                    ..CanonicalChannelInfo::placeholder(channel_count)
                }
            }
            Err(reason) => {
                log::debug!("Using placeholder channel metadata: {}", reason);
                CanonicalChannelInfo::placeholder(channel_count)
            }
        }
    }

    fn normalize_xml(&self, raw: &str, channel_count: usize) -> Result<CanonicalChannelInfo, String> {
        let root = xml::parse(raw)?;
        let mut desc = extract_desc(root);
        self.quirks.apply(raw, &mut desc, channel_count);

        match desc.to_json() {
            Value::Object(map) => canonical_from_map(map),
            // A desc made only of repeated entries has no named fields
            _ => Err("Description is not a set of named fields".to_string()),
        }
    }

    fn normalize_json(raw: &str) -> Result<CanonicalChannelInfo, String> {
        let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        let canonical_shape = value.as_object().is_some_and(|map| {
            map.keys()
                .all(|key| matches!(key.as_str(), "channels" | "fields" | "synthetic"))
        });
        if canonical_shape {
            if let Ok(info) = serde_json::from_value::<CanonicalChannelInfo>(value.clone()) {
                return Ok(info);
            }
        }
        match value {
            Value::Object(map) => canonical_from_map(map),
            _ => Err("JSON description is not an object".to_string()),
        }
    }
}

/// The `desc` element of a full stream-info document, or the document itself
fn extract_desc(root: XmlElement) -> XmlElement {
    if root.tag == "desc" {
        return root;
    }
    match root.children.into_iter().find(|c| c.tag == "desc") {
        Some(desc) => desc,
        None => XmlElement::new("desc"),
    }
}

fn canonical_from_map(mut map: Map<String, Value>) -> Result<CanonicalChannelInfo, String> {
    let channels = match map.remove(CHANNELS_FIELD) {
        Some(value) => {
            coerce_channel_list(&value).ok_or("Malformed channels field".to_string())?
        }
        None => return Err("Description has no channels field".to_string()),
    };
    Ok(CanonicalChannelInfo {
        channels,
        fields: map,
        synthetic: false,
    })
}

/// Interpret a JSON value as a list of channel records.
///
/// A single entry that was collapsed into `{"channel": {...}}` is turned
/// back into a one-element list, and bare text entries become `{label}`.
fn coerce_channel_list(value: &Value) -> Option<Vec<ChannelRecord>> {
    match value {
        Value::Array(items) => items.iter().map(coerce_channel_record).collect(),
        Value::Object(map) if map.len() == 1 => {
            let inner = map.values().next()?;
            match inner {
                Value::Array(_) => coerce_channel_list(inner),
                other => coerce_channel_record(other).map(|record| vec![record]),
            }
        }
        _ => None,
    }
}

fn coerce_channel_record(value: &Value) -> Option<ChannelRecord> {
    match value {
        Value::Object(record) => Some(record.clone()),
        Value::String(label) if !label.is_empty() => {
            let mut record = Map::new();
            record.insert("label".to_string(), Value::String(label.clone()));
            Some(record)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::quirks::{QuirkFix, VendorQuirk};
    use super::*;
    use serde_json::json;

    fn labels(info: &CanonicalChannelInfo) -> Vec<String> {
        info.channels
            .iter()
            .map(|c| c["label"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    const WELL_FORMED: &str = r#"<?xml version="1.0"?>
<info>
  <name>EEG1</name>
  <type>EEG</type>
  <channel_count>3</channel_count>
  <desc>
    <manufacturer>ACME</manufacturer>
    <channels>
      <channel><label>C3</label><unit>uV</unit><type>EEG</type></channel>
      <channel><label>Cz</label><unit>uV</unit><type>EEG</type></channel>
      <channel><label>C4</label><unit>uV</unit><type>EEG</type></channel>
    </channels>
  </desc>
</info>"#;

    #[test]
    fn test_well_formed() {
        let info = MetadataNormalizer::default().normalize(WELL_FORMED, 3);
        assert!(!info.synthetic);
        assert_eq!(labels(&info), vec!["C3", "Cz", "C4"]);
        assert_eq!(info.channels[0]["unit"], json!("uV"));
        assert_eq!(info.fields["manufacturer"], json!("ACME"));
        assert_eq!(info.description_fields(), vec!["channels", "manufacturer"]);
    }

    #[test]
    fn test_single_channel_is_a_list() {
        let raw = "<desc><channels><channel><label>ECG</label></channel></channels></desc>";
        let info = MetadataNormalizer::default().normalize(raw, 1);
        assert!(!info.synthetic);
        assert_eq!(labels(&info), vec!["ECG"]);
    }

    #[test]
    fn test_loose_channels_wrapped_for_known_vendor() {
        let raw = "<desc>\n  <manufacturer>NeuroElectrics</manufacturer>\n  \
                   <channel><label>P7</label></channel>\n  \
                   <channel><label>P4</label></channel>\n</desc>";
        let info = MetadataNormalizer::default().normalize(raw, 2);
        assert!(!info.synthetic);
        assert_eq!(labels(&info), vec!["P7", "P4"]);
    }

    #[test]
    fn test_missing_channels_synthesized_for_known_vendor() {
        let raw = "<desc><manufacturer>NeuroElectrics</manufacturer></desc>";
        let info = MetadataNormalizer::default().normalize(raw, 4);
        assert_eq!(labels(&info), vec!["Ch1", "Ch2", "Ch3", "Ch4"]);
        assert_eq!(info.fields["manufacturer"], json!("NeuroElectrics"));
    }

    #[test]
    fn test_malformed_inputs_fall_back() {
        let normalizer = MetadataNormalizer::default();
        for raw in ["", "   ", "not xml", "<desc><channels>", "{\"channels\": 3}", "[1, 2]"] {
            let info = normalizer.normalize(raw, 5);
            assert_eq!(info.channels.len(), 5, "input {:?}", raw);
            assert!(info.synthetic);
        }
    }

    #[test]
    fn test_deeply_nested_description_falls_back() {
        let depth = 5000;
        let raw = format!(
            "<desc><channels>{}{}</channels></desc>",
            "<a>".repeat(depth),
            "</a>".repeat(depth)
        );
        let info = MetadataNormalizer::default().normalize(&raw, 2);
        assert!(info.synthetic);
        assert_eq!(labels(&info), vec!["Ch1", "Ch2"]);
    }

    #[test]
    fn test_custom_quirk_entry() {
        let raw = "<desc><manufacturer>Acme Labs</manufacturer>\
                   <channel><label>O1</label></channel><channel><label>O2</label></channel></desc>";
        assert!(MetadataNormalizer::default().normalize(raw, 2).synthetic);

        let mut table = QuirkTable::default();
        table.push(VendorQuirk {
            vendor: "Acme Labs".to_string(),
            fix: QuirkFix::WrapLooseChannels,
        });
        let normalizer = MetadataNormalizer::with_quirks(table);
        assert_eq!(normalizer.quirks().entries().len(), 1);

        let info = normalizer.normalize(raw, 2);
        assert!(!info.synthetic);
        assert_eq!(labels(&info), vec!["O1", "O2"]);
        assert_eq!(info.fields["manufacturer"], json!("Acme Labs"));
    }

    #[test]
    fn test_count_mismatch_falls_back() {
        let info = MetadataNormalizer::default().normalize(WELL_FORMED, 8);
        assert_eq!(info.channels.len(), 8);
        assert!(info.synthetic);
        assert_eq!(info.fields["manufacturer"], json!("ACME"));
    }

    #[test]
    fn test_zero_channels() {
        let info = MetadataNormalizer::default().normalize("", 0);
        assert!(info.channels.is_empty());
    }

    #[test]
    fn test_canonical_is_idempotent() {
        let normalizer = MetadataNormalizer::default();
        let first = normalizer.normalize(WELL_FORMED, 3);
        let again = normalizer.normalize(&serde_json::to_string(&first).unwrap(), 3);
        assert_eq!(first, again);

        let placeholder = normalizer.normalize("", 2);
        let again = normalizer.normalize(&serde_json::to_string(&placeholder).unwrap(), 2);
        assert_eq!(placeholder, again);
    }

    #[test]
    fn test_alternative_channel_container() {
        let raw = "<desc><channels><channel><label>A</label></channel><channel><label>B</label></channel></channels>\
                   <electrodes><electrode><name>x</name></electrode><electrode><name>y</name></electrode></electrodes></desc>";
        let info = MetadataNormalizer::default().normalize(raw, 2);
        let electrodes = info.channel_list("electrodes").unwrap();
        assert_eq!(electrodes.len(), 2);
        assert_eq!(electrodes[1]["name"], json!("y"));
        assert!(info.channel_list("missing").is_none());
    }
}
