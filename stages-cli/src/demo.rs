//! Demonstration stages and the pipeline wiring them together.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use stages_api::{
    Content, DrainStage, LinkStats, Pipeline, PipelineError, QueueMetrics, Stage, StageIo,
    StageSet,
};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::Result;

/// A numbered item; urgent items must not wait in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub seq: u64,
    pub urgent: bool,
}

impl Content for Reading {
    fn batchable(&self) -> bool {
        !self.urgent
    }
}

/// Emits `count` readings, every `urgent_every`-th one urgent.
pub struct NumberSource {
    count: u64,
    urgent_every: u64,
}

#[async_trait]
impl Stage<Reading> for NumberSource {
    async fn run(&mut self, io: &mut StageIo<Reading>) -> std::result::Result<(), PipelineError> {
        for seq in 0..self.count {
            let urgent = self.urgent_every > 0 && (seq + 1) % self.urgent_every == 0;
            io.put(Reading { seq, urgent }).await?;
        }
        Ok(())
    }
}

/// Groups readings into batches and forwards them.
pub struct Batcher {
    batch_size: usize,
    stats: Arc<BatchStats>,
}

#[derive(Debug, Default)]
pub struct BatchStats {
    batches: AtomicU64,
    items: AtomicU64,
}

#[async_trait]
impl Stage<Reading> for Batcher {
    async fn run(&mut self, io: &mut StageIo<Reading>) -> std::result::Result<(), PipelineError> {
        let (inbound, outbound) = io.split();
        let mut batches = inbound.batches(self.batch_size);
        while let Some(batch) = batches.next().await? {
            self.stats.batches.fetch_add(1, Ordering::Relaxed);
            self.stats
                .items
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            for reading in batch {
                outbound.put(reading).await?;
            }
        }
        Ok(())
    }
}

/// Passes readings on until it sees `fail_at`.
pub struct FailAt {
    fail_at: u64,
}

#[async_trait]
impl Stage<Reading> for FailAt {
    async fn run(&mut self, io: &mut StageIo<Reading>) -> std::result::Result<(), PipelineError> {
        let name = io.name().to_string();
        let (inbound, outbound) = io.split();
        let mut items = inbound.items();
        while let Some(reading) = items.next().await? {
            if reading.seq == self.fail_at {
                let source = std::io::Error::other(format!("refusing reading {}", reading.seq));
                return Err(PipelineError::stage(name, source));
            }
            outbound.put(reading).await?;
        }
        Ok(())
    }
}

/// What a finished demo run reports.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub items: u64,
    pub batches: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<LinkStats>>,
}

pub async fn run_demo(config: &AppConfig) -> Result<DemoReport> {
    let demo = &config.demo;
    let stats = Arc::new(BatchStats::default());

    let mut stages = StageSet::new();
    let mut order = vec![
        stages.add(NumberSource {
            count: demo.count,
            urgent_every: demo.urgent_every,
        }),
        stages.add(Batcher {
            batch_size: demo.batch_size,
            stats: stats.clone(),
        }),
    ];
    if let Some(fail_at) = demo.fail_at {
        order.push(stages.add(FailAt { fail_at }));
    }
    order.push(stages.add(DrainStage));

    let metrics = Arc::new(QueueMetrics::new());
    let mut pipeline = Pipeline::new(config.pipeline.clone());
    if config.pipeline.profiling {
        pipeline = pipeline.with_metrics_sink(metrics.clone());
    }

    info!(
        count = demo.count,
        batch_size = demo.batch_size,
        capacity = pipeline.config().channel_capacity,
        profiling = pipeline.config().profiling,
        "Running demo pipeline"
    );
    pipeline.run(stages, &order).await?;

    let report = DemoReport {
        items: stats.items.load(Ordering::Relaxed),
        batches: stats.batches.load(Ordering::Relaxed),
        links: config.pipeline.profiling.then(|| metrics.snapshot()),
    };
    debug!(items = report.items, batches = report.batches, "Demo finished");
    Ok(report)
}
