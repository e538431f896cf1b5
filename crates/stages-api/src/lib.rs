//! # Stages API
//!
//! This crate provides a small runtime for staged concurrent processing pipelines.
//! An ordered list of independently implemented stages is wired together with
//! bounded channels, every stage runs in its own task, and a failure in any one
//! stage shuts the whole pipeline down before the error is returned.
//!
//! ## Features
//!
//! - `Stage<T>` trait with a single required `run` method and ready-made
//!   `items()`, `batches()` and `put()` helpers
//! - Bounded single-producer/single-consumer channels with backpressure
//! - Optional queue profiling through a pluggable `MetricsSink`
//! - Pipeline-wide cancellation with a bounded grace period
//!
//! ## Example
//!
//! ```ignore
//! use stages_api::{DrainStage, PipelineConfig, StageSet, run_pipeline};
//!
//! let mut stages = StageSet::new();
//! let source = stages.add(MySource::default());
//! let drain = stages.add(DrainStage);
//! run_pipeline(stages, &[source, drain], &PipelineConfig::default()).await?;
//! ```
//!
//! ## License
//!
//! MIT License
//!
//! ## Authors
//!
//! - hua0512
//!

use thiserror::Error;

pub mod channel;
pub mod config;
mod drain;
pub mod downloader;
pub mod metrics;
pub mod pipeline;
pub mod stage;
mod supervisor;

#[cfg(test)]
mod test_utils;

/// Re-export key traits and types
pub use channel::{ChannelLabel, Message};
pub use config::PipelineConfig;
pub use downloader::{
    ArtifactDescriptor, ArtifactDownloadStage, DownloadError, DownloadResult, Downloader,
    DownloaderFactory, RemoteArtifacts,
};
pub use drain::DrainStage;
pub use metrics::{LinkStats, MetricsSink, QueueMetrics, QueueObservation, TracingSink};
pub use pipeline::{Pipeline, StageId, StageSet, run_pipeline};
pub use stage::{Batches, Content, DEFAULT_BATCH_SIZE, Inbound, Items, Outbound, Stage, StageIo};
pub use tokio_util::sync::CancellationToken;

/// Common error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} does not implement run()")]
    NotImplemented { stage: String },

    #[error("Invalid item: {0}")]
    InvalidItem(&'static str),

    #[error("{stage} has no inbound channel")]
    NoInbound { stage: String },

    #[error("{stage} has no outbound channel")]
    NoOutbound { stage: String },

    #[error("Cannot run a pipeline with no stages")]
    NoStages,

    #[error("Each stage instance must be unique: {stage} appears at positions {first} and {second}")]
    DuplicateStage {
        stage: StageId,
        first: usize,
        second: usize,
    },

    #[error("{0} does not belong to this stage set")]
    UnknownStage(StageId),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Stage process failed ({stage}): {source}")]
    StageProcess {
        stage: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Stage task panicked ({stage}): {message}")]
    StagePanicked { stage: String, message: String },

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),
}

impl PipelineError {
    /// Wrap an error raised by stage code.
    pub fn stage(
        stage: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        PipelineError::StageProcess {
            stage: stage.into(),
            source: source.into(),
        }
    }

    /// Errors that are a consequence of another stage going away rather than a
    /// failure of their own.
    pub(crate) fn is_secondary(&self) -> bool {
        matches!(
            self,
            PipelineError::ChannelClosed(_) | PipelineError::Cancelled
        )
    }
}
