// Stream discovery, property matching and the configured binding set
//
// The catalog is an explicitly owned object: it wraps an injected transport,
// keeps the last discovered snapshot and owns the bindings that consumers
// open receivers against. Discovery is read-only and may be called from any
// thread; binding mutations go through a single writer lock.

use crate::binding::{BindingRequest, StreamBinding};
use crate::error::{AcquisitionError, Result};
use crate::metadata::{CanonicalChannelInfo, MetadataNormalizer};
use crate::receiver::{Receiver, ReceiverOptions};
use crate::transport::StreamResolver;
use crate::types::StreamDescriptor;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Value of a matchable property
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<usize> for PropertyValue {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Ordered set of `property == value` conditions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFilter {
    conditions: Vec<(String, PropertyValue)>,
}

impl StreamFilter {
    /// Filter without conditions (matches every candidate)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition on an arbitrary property name
    pub fn with(mut self, property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        let property = property.into();
        let value = value.into();
        match self.conditions.iter_mut().find(|(key, _)| *key == property) {
            Some(existing) => existing.1 = value,
            None => self.conditions.push((property, value)),
        }
        self
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.with("name", name.into())
    }

    pub fn stream_type(self, stream_type: impl Into<String>) -> Self {
        self.with("type", stream_type.into())
    }

    pub fn source_id(self, source_id: impl Into<String>) -> Self {
        self.with("source_id", source_id.into())
    }

    pub fn uid(self, uid: impl Into<String>) -> Self {
        self.with("uid", uid.into())
    }

    pub fn host(self, host: impl Into<String>) -> Self {
        self.with("host", host.into())
    }

    pub fn channel_count(self, channel_count: usize) -> Self {
        self.with("channel_count", channel_count)
    }

    pub fn nominal_rate(self, nominal_rate: f64) -> Self {
        self.with("nominal_rate", nominal_rate)
    }

    pub fn binding_uid(self, binding_uid: impl Into<String>) -> Self {
        self.with("binding_uid", binding_uid.into())
    }

    /// Copy of this filter without the given property
    pub fn without(&self, property: &str) -> Self {
        Self {
            conditions: self
                .conditions
                .iter()
                .filter(|(key, _)| key != property)
                .cloned()
                .collect(),
        }
    }

    pub fn conditions(&self) -> &[(String, PropertyValue)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl fmt::Display for StreamFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            return write!(f, "any properties");
        }
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Anything that can be selected with a [`StreamFilter`]
pub trait Matchable {
    /// Property names this candidate universe understands
    const PROPERTIES: &'static [&'static str];

    /// Current value of a known property
    fn property(&self, key: &str) -> Option<PropertyValue>;
}

impl Matchable for StreamDescriptor {
    const PROPERTIES: &'static [&'static str] = &[
        "name",
        "type",
        "source_id",
        "uid",
        "channel_count",
        "nominal_rate",
        "host",
    ];

    fn property(&self, key: &str) -> Option<PropertyValue> {
        match key {
            "name" => Some(self.name.as_str().into()),
            "type" => Some(self.stream_type.as_str().into()),
            "source_id" => Some(self.source_id.as_str().into()),
            "uid" => Some(self.uid.as_str().into()),
            "channel_count" => Some(self.channel_count.into()),
            "nominal_rate" => Some(self.nominal_rate.into()),
            "host" => Some(self.host.as_str().into()),
            _ => None,
        }
    }
}

/// Select the candidates whose every filtered property equals the filter value.
///
/// Fails with `InvalidFilter` on an unknown property, `StreamNotFound` when
/// nothing matches and, if `exact_one` is set, `AmbiguousStream` when more
/// than one candidate matches.
pub fn match_streams<T: Matchable + Clone>(
    candidates: &[T],
    filter: &StreamFilter,
    exact_one: bool,
) -> Result<Vec<T>> {
    if let Some((key, _)) = filter
        .conditions()
        .iter()
        .find(|(key, _)| !T::PROPERTIES.contains(&key.as_str()))
    {
        return Err(AcquisitionError::InvalidFilter(key.clone()));
    }

    let matches: Vec<T> = candidates
        .iter()
        .filter(|candidate| {
            filter
                .conditions()
                .iter()
                .all(|(key, value)| candidate.property(key).as_ref() == Some(value))
        })
        .cloned()
        .collect();

    if matches.is_empty() {
        return Err(AcquisitionError::StreamNotFound(filter.clone()));
    }
    if exact_one && matches.len() > 1 {
        return Err(AcquisitionError::AmbiguousStream(filter.clone()));
    }
    Ok(matches)
}

/// Explicitly owned discovery context and binding set
pub struct StreamCatalog {
    resolver: Arc<dyn StreamResolver>,
    normalizer: MetadataNormalizer,
    available: RwLock<Vec<StreamDescriptor>>,
    bindings: RwLock<Vec<StreamBinding>>,
}

impl StreamCatalog {
    pub fn new(resolver: Arc<dyn StreamResolver>) -> Self {
        Self::with_normalizer(resolver, MetadataNormalizer::default())
    }

    pub fn with_normalizer(resolver: Arc<dyn StreamResolver>, normalizer: MetadataNormalizer) -> Self {
        Self {
            resolver,
            normalizer,
            available: RwLock::new(Vec::new()),
            bindings: RwLock::new(Vec::new()),
        }
    }

    pub fn resolver(&self) -> Arc<dyn StreamResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn normalizer(&self) -> &MetadataNormalizer {
        &self.normalizer
    }

    /// Wait up to `wait_time` for advertised streams and return them unfiltered
    pub fn discover(&self, wait_time: Duration) -> Result<Vec<StreamDescriptor>> {
        let streams = self.resolver.resolve(wait_time)?;
        log::debug!("Discovered {} stream(s)", streams.len());
        *self.available.write() = streams.clone();
        Ok(streams)
    }

    /// Last discovered snapshot
    pub fn available(&self) -> Vec<StreamDescriptor> {
        self.available.read().clone()
    }

    /// Discover and match in one step
    pub fn find(
        &self,
        filter: &StreamFilter,
        wait_time: Duration,
        exact_one: bool,
    ) -> Result<Vec<StreamDescriptor>> {
        let streams = self.discover(wait_time)?;
        match_streams(&streams, filter, exact_one)
    }

    /// Discover and require exactly one match
    pub fn find_one(&self, filter: &StreamFilter, wait_time: Duration) -> Result<StreamDescriptor> {
        let mut matches = self.find(filter, wait_time, true)?;
        Ok(matches.remove(0))
    }

    /// Resolve an identity that may carry a stale transient `uid`.
    ///
    /// The full identity is tried first; if nothing matches, the `uid`
    /// condition is dropped and the stable properties must match exactly one
    /// stream.
    pub fn resolve_weak(&self, identity: &StreamFilter, wait_time: Duration) -> Result<StreamDescriptor> {
        let streams = self.discover(wait_time)?;
        resolve_weak_in(&streams, identity)
    }

    /// Canonical channel metadata of a descriptor
    pub fn normalize(&self, descriptor: &StreamDescriptor) -> CanonicalChannelInfo {
        self.normalizer
            .normalize(&descriptor.description, descriptor.channel_count)
    }

    /// Create a binding and add it to the configured set
    pub fn bind(&self, descriptor: &StreamDescriptor, request: BindingRequest) -> Result<StreamBinding> {
        let canonical = self.normalize(descriptor);
        let binding = StreamBinding::new(descriptor, &canonical, request)?;
        self.insert_binding(binding.clone())?;
        log::info!("Bound {}", binding.summary());
        Ok(binding)
    }

    /// Add an already-built binding, rejecting a duplicate `binding_uid`
    pub fn insert_binding(&self, binding: StreamBinding) -> Result<()> {
        let mut bindings = self.bindings.write();
        if bindings.iter().any(|b| b.binding_uid == binding.binding_uid) {
            return Err(AcquisitionError::DuplicateBindingId(binding.binding_uid));
        }
        bindings.push(binding);
        Ok(())
    }

    /// Replace the binding with the same `binding_uid`
    pub fn update_binding(&self, binding: StreamBinding) -> Result<()> {
        let mut bindings = self.bindings.write();
        match bindings.iter_mut().find(|b| b.binding_uid == binding.binding_uid) {
            Some(existing) => {
                *existing = binding;
                Ok(())
            }
            None => Err(AcquisitionError::StreamNotFound(
                StreamFilter::new().binding_uid(binding.binding_uid),
            )),
        }
    }

    pub fn remove_binding(&self, binding_uid: &str) -> Option<StreamBinding> {
        let mut bindings = self.bindings.write();
        let index = bindings.iter().position(|b| b.binding_uid == binding_uid)?;
        Some(bindings.remove(index))
    }

    pub fn bindings(&self) -> Vec<StreamBinding> {
        self.bindings.read().clone()
    }

    pub fn binding(&self, binding_uid: &str) -> Option<StreamBinding> {
        self.bindings
            .read()
            .iter()
            .find(|b| b.binding_uid == binding_uid)
            .cloned()
    }

    pub fn is_binding_uid_available(&self, binding_uid: &str) -> bool {
        !self.bindings.read().iter().any(|b| b.binding_uid == binding_uid)
    }

    /// Match against the configured bindings instead of discovered streams
    pub fn match_bindings(&self, filter: &StreamFilter, exact_one: bool) -> Result<Vec<StreamBinding>> {
        let bindings = self.bindings.read();
        match_streams(bindings.as_slice(), filter, exact_one)
    }

    /// Binding ids whose stream is no longer advertised
    pub fn missing_bindings(&self, wait_time: Duration) -> Result<Vec<String>> {
        let streams = self.discover(wait_time)?;
        Ok(self
            .bindings
            .read()
            .iter()
            .filter(|b| match_streams(&streams, &b.identity_filter().without("uid"), false).is_err())
            .map(|b| b.binding_uid.clone())
            .collect())
    }

    /// Open an independent receiver for a configured binding
    pub fn open_receiver(&self, binding_uid: &str, options: &ReceiverOptions) -> Result<Receiver> {
        let binding = self.binding(binding_uid).ok_or_else(|| {
            AcquisitionError::StreamNotFound(StreamFilter::new().binding_uid(binding_uid))
        })?;
        Receiver::new(&binding, self.resolver.as_ref(), options)
    }

    /// Persist the binding set as an ordered JSON list
    pub fn save_bindings(&self, path: &Path) -> Result<()> {
        let bindings = self.bindings.read();
        let json = serde_json::to_string_pretty(&*bindings)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)?;
        log::info!("Saved {} binding(s) to {}", bindings.len(), path.display());
        Ok(())
    }

    /// Load persisted bindings, re-resolving each against the network.
    ///
    /// Bindings whose stream cannot be found are dropped with a warning.
    /// Returns the number of bindings restored.
    pub fn load_bindings(&self, path: &Path, wait_time: Duration) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let stored: Vec<StreamBinding> = serde_json::from_str(&content)?;
        let streams = self.discover(wait_time)?;

        let mut restored = 0;
        for mut binding in stored {
            match resolve_weak_in(&streams, &binding.identity_filter()) {
                Ok(descriptor) => {
                    binding.refresh_descriptor(descriptor);
                    match self.insert_binding(binding) {
                        Ok(()) => restored += 1,
                        Err(e) => log::warn!("Skipping stored binding: {}", e),
                    }
                }
                Err(e) => {
                    log::warn!("Dropping binding '{}': {}", binding.binding_uid, e);
                }
            }
        }

        log::info!("Restored {} binding(s) from {}", restored, path.display());
        Ok(restored)
    }
}

/// Weak match over an already discovered snapshot
fn resolve_weak_in(streams: &[StreamDescriptor], identity: &StreamFilter) -> Result<StreamDescriptor> {
    match match_streams(streams, identity, true) {
        Ok(mut matches) => Ok(matches.remove(0)),
        Err(AcquisitionError::StreamNotFound(_)) => {
            let mut matches =
                match_streams(streams, &identity.without("uid"), true).map_err(|e| match e {
                    AcquisitionError::StreamNotFound(_) => {
                        AcquisitionError::StreamNotFound(identity.clone())
                    }
                    other => other,
                })?;
            let descriptor = matches.remove(0);
            log::info!(
                "Stream '{}' matched with a new uid ({})",
                descriptor.name,
                descriptor.uid
            );
            Ok(descriptor)
        }
        Err(e) => Err(e),
    }
}
