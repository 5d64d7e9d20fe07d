pub mod binding;
pub mod catalog;
pub mod config;
pub mod error;
pub mod metadata;
pub mod preprocessing;
pub mod receiver;
pub mod simulated;
pub mod transport;
pub mod types;
pub mod worker;

pub use binding::{select_channels, BindingRequest, StreamBinding};
pub use catalog::{match_streams, Matchable, PropertyValue, StreamCatalog, StreamFilter};
pub use config::AcquisitionConfig;
pub use error::{AcquisitionError, Result};
pub use metadata::{CanonicalChannelInfo, ChannelRecord, MetadataNormalizer};
pub use preprocessing::{PreprocessingSettings, RealTimePreprocessor};
pub use receiver::{Receiver, ReceiverOptions, ReceiverState, ReceiverStats};
pub use transport::{PulledChunk, StreamInlet, StreamResolver};
pub use types::*;
pub use worker::{spawn_channel_consumer, spawn_consumer, ConsumerHandle, WorkerConfig};
