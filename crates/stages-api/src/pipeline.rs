//! # Pipeline Runner
//!
//! This module wires an ordered sequence of stages into a linear pipeline and
//! runs it to completion.
//!
//! ## Usage
//!
//! Add stages to a [`StageSet`], which hands out an opaque [`StageId`] for each
//! one, then run the set in the order given by a list of handles:
//!
//! ```ignore
//! let mut stages = StageSet::new();
//! let source = stages.add(MySource::default());
//! let drain = stages.add(DrainStage);
//! Pipeline::new(PipelineConfig::default())
//!     .run(stages, &[source, drain])
//!     .await?;
//! ```
//!
//! Every stage runs in its own task. Stage `i` writes to a bounded channel that
//! stage `i + 1` reads from. If any stage fails, every other stage is cancelled
//! and the failure is returned once they have stopped or the grace period has
//! elapsed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{self, ChannelLabel, Receiver};
use crate::metrics::{MetricsSink, TracingSink};
use crate::stage::{Content, Stage, StageIo};
use crate::supervisor::settle_stages;
use crate::{PipelineConfig, PipelineError};

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle of a stage inside a [`StageSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId {
    set: u64,
    index: usize,
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

/// Arena of stages for a single pipeline run.
pub struct StageSet<T: Content> {
    id: u64,
    stages: Vec<Box<dyn Stage<T>>>,
}

impl<T: Content> StageSet<T> {
    pub fn new() -> Self {
        Self {
            id: NEXT_SET_ID.fetch_add(1, Ordering::Relaxed),
            stages: Vec::new(),
        }
    }

    /// Add a stage and return its handle.
    pub fn add<S: Stage<T>>(&mut self, stage: S) -> StageId {
        self.add_boxed(Box::new(stage))
    }

    pub fn add_boxed(&mut self, stage: Box<dyn Stage<T>>) -> StageId {
        self.stages.push(stage);
        StageId {
            set: self.id,
            index: self.stages.len() - 1,
        }
    }

    /// Display name of a stage in logs, `[<id>] <name>`.
    pub fn label(&self, id: StageId) -> Option<String> {
        self.get(id).map(|stage| format!("[{id}] {}", stage.name()))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn get(&self, id: StageId) -> Option<&dyn Stage<T>> {
        if id.set != self.id {
            return None;
        }
        self.stages.get(id.index).map(|stage| stage.as_ref())
    }

    /// Check `order` and take the stages out of the set in that order.
    ///
    /// Nothing is taken unless the whole order is valid.
    fn take_ordered(
        self,
        order: &[StageId],
    ) -> Result<Vec<(StageId, Box<dyn Stage<T>>)>, PipelineError> {
        if order.is_empty() {
            return Err(PipelineError::NoStages);
        }
        let mut seen: HashMap<StageId, usize> = HashMap::with_capacity(order.len());
        for (position, &id) in order.iter().enumerate() {
            if self.get(id).is_none() {
                return Err(PipelineError::UnknownStage(id));
            }
            if let Some(&first) = seen.get(&id) {
                return Err(PipelineError::DuplicateStage {
                    stage: id,
                    first,
                    second: position,
                });
            }
            seen.insert(id, position);
        }

        let mut slots: Vec<Option<Box<dyn Stage<T>>>> =
            self.stages.into_iter().map(Some).collect();
        let ordered = order
            .iter()
            .filter_map(|&id| slots[id.index].take().map(|stage| (id, stage)))
            .collect();

        for (index, stage) in slots.iter().enumerate() {
            if let Some(stage) = stage {
                warn!(
                    stage = %format_args!("[{index}] {}", stage.name()),
                    "Stage is not part of the pipeline order and will not run"
                );
            }
        }
        Ok(ordered)
    }
}

impl<T: Content> Default for StageSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runner for linear stage pipelines.
#[derive(Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config, sink: None }
    }

    /// Sink receiving queue observations when profiling is enabled.
    ///
    /// Without one, profiled runs report to [`TracingSink`].
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the stages of `stages` in the order given by `order`.
    ///
    /// The order is validated before any stage starts: it must be non-empty,
    /// reference only stages of this set and reference each stage at most
    /// once. Completes when every stage has finished, or returns the first
    /// stage failure after cancelling the others.
    pub async fn run<T: Content>(
        &self,
        stages: StageSet<T>,
        order: &[StageId],
    ) -> Result<(), PipelineError> {
        self.config.validate()?;
        let labels: Vec<String> = order
            .iter()
            .map(|&id| stages.label(id).unwrap_or_else(|| id.to_string()))
            .collect();
        let stages = stages.take_ordered(order)?;

        let sink = self.config.profiling.then(|| {
            self.sink
                .clone()
                .unwrap_or_else(|| Arc::new(TracingSink) as Arc<dyn MetricsSink>)
        });
        let capacity = self.config.channel_capacity;
        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut names = HashMap::with_capacity(stages.len());
        let mut inbound: Option<Receiver<T>> = None;
        let last = stages.len() - 1;

        info!(
            stages = stages.len(),
            capacity,
            profiling = self.config.profiling,
            "Starting pipeline"
        );

        for (position, (id, mut stage)) in stages.into_iter().enumerate() {
            let (outbound, next_inbound) = if position < last {
                let (tx, rx) = match &sink {
                    Some(sink) => {
                        let label = ChannelLabel {
                            stage: order[position + 1],
                            name: labels[position + 1].clone(),
                            position: position + 1,
                        };
                        channel::instrumented(capacity, label, sink.clone())
                    }
                    None => channel::channel(capacity),
                };
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };

            let label = labels[position].clone();
            debug!(stage = %label, position, %id, "Connecting stage");
            let mut io = StageIo::connect(label.clone(), inbound.take(), outbound, token.clone());
            let handle = tasks.spawn(async move { stage.execute(&mut io).await });
            names.insert(handle.id(), label);
            inbound = next_inbound;
        }

        let result = settle_stages(tasks, names, token, self.config.grace_period()).await;
        if result.is_ok() {
            info!("Pipeline finished");
        }
        result
    }
}

/// Run `stages` in the given order with `config`.
pub async fn run_pipeline<T: Content>(
    stages: StageSet<T>,
    order: &[StageId],
    config: &PipelineConfig,
) -> Result<(), PipelineError> {
    Pipeline::new(config.clone()).run(stages, order).await
}
