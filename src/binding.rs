// Working-stream bindings and channel selection
//
// A binding ties a physical stream (by resolvable identity, never by a
// connection handle) to the channel subset, labels and processing flags an
// application works with. Bindings are what gets persisted and what
// receivers are opened against.

use crate::catalog::{Matchable, PropertyValue, StreamFilter};
use crate::error::{AcquisitionError, Result};
use crate::metadata::{CanonicalChannelInfo, ChannelRecord, CHANNELS_FIELD};
use crate::types::{ProcessingFlags, StreamDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resolve the selected channels into `(n, labels)`.
///
/// Labels follow the order of `selected_indices`. Without a `label_field`
/// labels are positional (`"0".."n-1"`); otherwise the named field of every
/// selected record is used.
pub fn select_channels(
    channels: &[ChannelRecord],
    label_field: Option<&str>,
    selected_indices: &[usize],
) -> Result<(usize, Vec<String>)> {
    if let Some(&bad) = selected_indices.iter().find(|&&i| i >= channels.len()) {
        return Err(AcquisitionError::InvalidConfiguration(format!(
            "Selected channel {} is out of range ({} channels)",
            bad,
            channels.len()
        )));
    }

    let labels = match label_field {
        None => (0..selected_indices.len()).map(|i| i.to_string()).collect(),
        Some(field) => selected_indices
            .iter()
            .map(|&i| match channels[i].get(field) {
                Some(Value::String(label)) => Ok(label.clone()),
                Some(other) => Ok(other.to_string()),
                None => Err(AcquisitionError::MissingField {
                    field: field.to_string(),
                    channel: i,
                }),
            })
            .collect::<Result<Vec<String>>>()?,
    };

    Ok((selected_indices.len(), labels))
}

/// User choices for a new binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingRequest {
    /// Unique name of the binding among all current bindings
    pub binding_uid: String,
    /// Declared type tag (EEG, MEG, ...); defaults to the stream type
    #[serde(default)]
    pub binding_type: Option<String>,
    /// Description field holding the channel list
    #[serde(default = "default_channels_field")]
    pub channels_field: String,
    /// Channel record field used as label; positional labels when absent
    #[serde(default)]
    pub label_field: Option<String>,
    /// Channels to read; every channel when absent
    #[serde(default)]
    pub selected_indices: Option<Vec<usize>>,
    #[serde(default)]
    pub flags: ProcessingFlags,
    /// Sample rate override; the nominal rate is used when absent
    #[serde(default)]
    pub sample_rate: Option<f64>,
}

fn default_channels_field() -> String {
    CHANNELS_FIELD.to_string()
}

impl BindingRequest {
    pub fn new(binding_uid: impl Into<String>) -> Self {
        Self {
            binding_uid: binding_uid.into(),
            binding_type: None,
            channels_field: default_channels_field(),
            label_field: None,
            selected_indices: None,
            flags: ProcessingFlags::default(),
            sample_rate: None,
        }
    }

    pub fn label_field(mut self, field: impl Into<String>) -> Self {
        self.label_field = Some(field.into());
        self
    }

    pub fn select(mut self, indices: Vec<usize>) -> Self {
        self.selected_indices = Some(indices);
        self
    }

    pub fn binding_type(mut self, binding_type: impl Into<String>) -> Self {
        self.binding_type = Some(binding_type.into());
        self
    }

    pub fn channels_field(mut self, field: impl Into<String>) -> Self {
        self.channels_field = field.into();
        self
    }

    pub fn flags(mut self, flags: ProcessingFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = Some(rate);
        self
    }
}

/// A configured working stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamBinding {
    #[serde(flatten)]
    pub descriptor: StreamDescriptor,
    pub flags: ProcessingFlags,
    pub binding_uid: String,
    pub binding_type: String,
    pub channels_field: String,
    pub label_field: Option<String>,
    /// Full canonical channel list of the stream
    pub channels: Vec<ChannelRecord>,
    pub selected_indices: Vec<usize>,
    /// Number of selected channels
    pub n_cha: usize,
    /// Label of every selected channel
    pub labels: Vec<String>,
    /// Resolved sample rate in Hz
    pub sample_rate: f64,
}

impl StreamBinding {
    /// Build a binding from a descriptor, its canonical metadata and the
    /// user request. Duplicate ids are checked by the catalog.
    pub fn new(
        descriptor: &StreamDescriptor,
        canonical: &CanonicalChannelInfo,
        request: BindingRequest,
    ) -> Result<Self> {
        if request.binding_uid.trim().is_empty() {
            return Err(AcquisitionError::InvalidConfiguration(
                "Binding id must not be empty".to_string(),
            ));
        }

        let channels = canonical
            .channel_list(&request.channels_field)
            .ok_or_else(|| {
                AcquisitionError::InvalidConfiguration(format!(
                    "Malformed channels field '{}'",
                    request.channels_field
                ))
            })?;

        let selected_indices = request
            .selected_indices
            .unwrap_or_else(|| (0..channels.len()).collect());
        let (n_cha, labels) =
            select_channels(&channels, request.label_field.as_deref(), &selected_indices)?;

        let sample_rate = request.sample_rate.unwrap_or(descriptor.nominal_rate);
        if !(sample_rate > 0.0) {
            log::warn!(
                "Binding '{}' has no positive sample rate ({}); receivers will refuse to open",
                request.binding_uid,
                sample_rate
            );
        }

        Ok(Self {
            descriptor: descriptor.clone(),
            flags: request.flags,
            binding_uid: request.binding_uid,
            binding_type: request
                .binding_type
                .unwrap_or_else(|| descriptor.stream_type.clone()),
            channels_field: request.channels_field,
            label_field: request.label_field,
            channels,
            selected_indices,
            n_cha,
            labels,
            sample_rate,
        })
    }

    /// One-line description used in listings and logs
    pub fn summary(&self) -> String {
        format!(
            "{} (host: {}, type: {}, channels: {})",
            self.binding_uid, self.descriptor.host, self.binding_type, self.n_cha
        )
    }

    /// Identity used to find the stream again after a restart
    pub fn identity_filter(&self) -> StreamFilter {
        StreamFilter::new()
            .name(self.descriptor.name.clone())
            .stream_type(self.descriptor.stream_type.clone())
            .source_id(self.descriptor.source_id.clone())
            .uid(self.descriptor.uid.clone())
            .channel_count(self.descriptor.channel_count)
            .nominal_rate(self.descriptor.nominal_rate)
    }

    /// Swap in a freshly discovered descriptor, keeping the channel setup
    pub fn refresh_descriptor(&mut self, descriptor: StreamDescriptor) {
        if descriptor.uid != self.descriptor.uid {
            log::info!(
                "Binding '{}' now points at uid {}",
                self.binding_uid,
                descriptor.uid
            );
        }
        self.descriptor = descriptor;
    }

    /// Positions of `labels` among the binding's labels
    pub fn channel_indexes(&self, labels: &[&str], case_sensitive: bool) -> Vec<usize> {
        labels
            .iter()
            .filter_map(|wanted| {
                self.labels.iter().position(|label| {
                    if case_sensitive {
                        label == wanted
                    } else {
                        label.eq_ignore_ascii_case(wanted)
                    }
                })
            })
            .collect()
    }
}

impl Matchable for StreamBinding {
    const PROPERTIES: &'static [&'static str] = &[
        "name",
        "type",
        "source_id",
        "channel_count",
        "nominal_rate",
        "host",
        "binding_uid",
    ];

    fn property(&self, key: &str) -> Option<PropertyValue> {
        match key {
            "binding_uid" => Some(self.binding_uid.as_str().into()),
            "uid" => None,
            other => self.descriptor.property(other),
        }
    }
}
