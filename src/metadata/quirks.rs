// Known-vendor fixes applied to descriptions before generic parsing

use super::xml::XmlElement;
use super::placeholder_label;

/// Vendors whose sources are known to publish malformed channel metadata
pub const DEFAULT_QUIRK_VENDORS: &[&str] = &["NeuroElectrics"];

/// Structural repair applied when a quirk is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuirkFix {
    /// `channel` entries emitted next to `manufacturer` without a
    /// `channels` container
    WrapLooseChannels,
    /// No channel entries at all
    SynthesizeChannels,
}

impl QuirkFix {
    /// Apply the fix to a `desc` element. Returns true if anything changed.
    pub fn apply(self, desc: &mut XmlElement, channel_count: usize) -> bool {
        match self {
            Self::WrapLooseChannels => wrap_loose_channels(desc),
            Self::SynthesizeChannels => synthesize_channels(desc, channel_count),
        }
    }
}

/// One table entry: a vendor substring detector plus its fix
#[derive(Debug, Clone, PartialEq)]
pub struct VendorQuirk {
    pub vendor: String,
    pub fix: QuirkFix,
}

impl VendorQuirk {
    pub fn detects(&self, raw: &str) -> bool {
        !self.vendor.is_empty() && raw.contains(&self.vendor)
    }
}

/// Ordered list of quirks, applied in sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuirkTable {
    entries: Vec<VendorQuirk>,
}

impl QuirkTable {
    /// Table with both fixes registered for every vendor
    pub fn for_vendors<S: AsRef<str>>(vendors: &[S]) -> Self {
        let entries = vendors
            .iter()
            .flat_map(|vendor| {
                [QuirkFix::WrapLooseChannels, QuirkFix::SynthesizeChannels]
                    .into_iter()
                    .map(move |fix| VendorQuirk {
                        vendor: vendor.as_ref().to_string(),
                        fix,
                    })
            })
            .collect();
        Self { entries }
    }

    pub fn push(&mut self, quirk: VendorQuirk) {
        self.entries.push(quirk);
    }

    pub fn entries(&self) -> &[VendorQuirk] {
        &self.entries
    }

    /// Run every detected fix against `desc`
    pub fn apply(&self, raw: &str, desc: &mut XmlElement, channel_count: usize) {
        for quirk in self.entries.iter().filter(|q| q.detects(raw)) {
            if quirk.fix.apply(desc, channel_count) {
                log::debug!("Applied {:?} fix for vendor '{}'", quirk.fix, quirk.vendor);
            }
        }
    }
}

fn wrap_loose_channels(desc: &mut XmlElement) -> bool {
    let Some(first) = desc.position("channel") else {
        return false;
    };

    let mut container = XmlElement::new("channels");
    let mut kept = Vec::with_capacity(desc.children.len());
    for child in desc.children.drain(..) {
        if child.tag == "channel" {
            container.children.push(child);
        } else {
            kept.push(child);
        }
    }

    // Loose entries ahead of the first channel stay where they were
    let insert_at = first.min(kept.len());
    kept.insert(insert_at, container);
    desc.children = kept;
    true
}

fn synthesize_channels(desc: &mut XmlElement, channel_count: usize) -> bool {
    let has_entries = desc.child("channel").is_some()
        || desc
            .child("channels")
            .map(|c| !c.children.is_empty())
            .unwrap_or(false);
    if has_entries || channel_count == 0 {
        return false;
    }

    let mut container = XmlElement::new("channels");
    for i in 0..channel_count {
        let mut channel = XmlElement::new("channel");
        channel
            .children
            .push(XmlElement::leaf("label", placeholder_label(i)));
        container.children.push(channel);
    }

    desc.children.retain(|c| c.tag != "channels");
    let insert_at = desc
        .position("manufacturer")
        .map(|i| i + 1)
        .unwrap_or(desc.children.len());
    desc.children.insert(insert_at, container);
    true
}

#[cfg(test)]
mod tests {
    use super::super::xml;
    use super::*;

    #[test]
    fn test_wrap_preserves_order() {
        let mut desc = xml::parse(
            "<desc><manufacturer>NeuroElectrics</manufacturer>\
             <channel><label>P7</label></channel>\
             <channel><label>P4</label></channel>\
             <channel><label>Cz</label></channel></desc>",
        )
        .unwrap();

        assert!(QuirkFix::WrapLooseChannels.apply(&mut desc, 3));
        assert_eq!(desc.children.len(), 2);
        assert_eq!(desc.children[0].tag, "manufacturer");
        let channels = desc.child("channels").unwrap();
        let labels: Vec<&str> = channels
            .children
            .iter()
            .map(|c| c.child("label").unwrap().text.as_str())
            .collect();
        assert_eq!(labels, vec!["P7", "P4", "Cz"]);
    }

    #[test]
    fn test_synthesize_after_manufacturer() {
        let mut desc =
            xml::parse("<desc><manufacturer>NeuroElectrics</manufacturer><model>X</model></desc>")
                .unwrap();

        assert!(QuirkFix::SynthesizeChannels.apply(&mut desc, 2));
        assert_eq!(desc.children[1].tag, "channels");
        assert_eq!(desc.children[2].tag, "model");
        assert_eq!(desc.children[1].children.len(), 2);
    }

    #[test]
    fn test_fixes_are_noops_on_wrapped_channels() {
        let raw = "<desc><manufacturer>NeuroElectrics</manufacturer>\
                   <channels><channel><label>C3</label></channel></channels></desc>";
        let mut desc = xml::parse(raw).unwrap();
        let before = desc.clone();
        QuirkTable::for_vendors(DEFAULT_QUIRK_VENDORS).apply(raw, &mut desc, 1);
        assert_eq!(desc, before);
    }

    #[test]
    fn test_unknown_vendor_not_detected() {
        let table = QuirkTable::for_vendors(&["NeuroElectrics"]);
        let raw = "<desc><manufacturer>Other</manufacturer><channel/></desc>";
        let mut desc = xml::parse(raw).unwrap();
        let before = desc.clone();
        table.apply(raw, &mut desc, 1);
        assert_eq!(desc, before);
    }
}
