//! # Stage Channels
//!
//! Bounded single-producer/single-consumer channels connecting two consecutive
//! stages. Every channel carries [`Message`] values: real items followed by
//! exactly one [`Message::End`] marker once the producing stage has finished.
//!
//! A channel may carry a probe that reports queue depth and wait latency of
//! every send and receive to a [`MetricsSink`]. Stage code cannot tell the two
//! kinds apart.

use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::PipelineError;
use crate::metrics::{Direction, MetricsSink, QueueObservation};
use crate::pipeline::StageId;

/// Default capacity for channels between stages
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// A value travelling through a stage channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T> {
    /// A content item.
    Item(T),
    /// End-of-stream marker. Nothing follows it on the same channel.
    End,
}

/// Identifies the link an instrumented channel feeds.
///
/// Observations are keyed by the downstream stage and its position in the
/// pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelLabel {
    /// Handle of the consuming stage.
    pub stage: StageId,
    /// Display name of the consuming stage.
    pub name: String,
    /// Position of the consuming stage.
    pub position: usize,
}

impl fmt::Display for ChannelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.position)
    }
}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    #[error("channel is empty")]
    Empty,
    #[error("channel is closed")]
    Closed,
}

struct Probe {
    label: ChannelLabel,
    sink: Arc<dyn MetricsSink>,
}

impl Probe {
    fn record(&self, direction: Direction, depth: usize, started: Instant) {
        self.sink.record(QueueObservation {
            label: self.label.clone(),
            direction,
            depth,
            waited: started.elapsed(),
            at: SystemTime::now(),
        });
    }
}

/// Producing half of a stage channel.
pub struct Sender<T> {
    inner: mpsc::Sender<Message<T>>,
    probe: Option<Arc<Probe>>,
}

/// Consuming half of a stage channel.
pub struct Receiver<T> {
    inner: mpsc::Receiver<Message<T>>,
    probe: Option<Arc<Probe>>,
}

/// Create a plain bounded channel.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    build(capacity, None)
}

/// Create a bounded channel that reports every send and receive to `sink`.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn instrumented<T>(
    capacity: usize,
    label: ChannelLabel,
    sink: Arc<dyn MetricsSink>,
) -> (Sender<T>, Receiver<T>) {
    build(capacity, Some(Arc::new(Probe { label, sink })))
}

fn build<T>(capacity: usize, probe: Option<Arc<Probe>>) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Sender {
            inner: tx,
            probe: probe.clone(),
        },
        Receiver { inner: rx, probe },
    )
}

impl<T> Sender<T> {
    /// Send a message, waiting while the channel is full.
    pub async fn send(&self, message: Message<T>) -> Result<(), PipelineError> {
        let started = Instant::now();
        if self.inner.send(message).await.is_err() {
            return Err(PipelineError::ChannelClosed("downstream"));
        }
        if let Some(probe) = &self.probe {
            probe.record(Direction::Send, self.len(), started);
        }
        Ok(())
    }

    /// Maximum number of messages the channel buffers.
    pub fn capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    /// Number of messages currently buffered.
    pub fn len(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_instrumented(&self) -> bool {
        self.probe.is_some()
    }
}

impl<T> Receiver<T> {
    /// Receive the next message, waiting while the channel is empty.
    ///
    /// Returns `None` once the sender is gone and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Message<T>> {
        let started = Instant::now();
        let message = self.inner.recv().await?;
        if let Some(probe) = &self.probe {
            probe.record(Direction::Receive, self.inner.len(), started);
        }
        Some(message)
    }

    /// Receive a message only if one is already buffered. Never suspends.
    pub fn try_recv(&mut self) -> Result<Message<T>, TryRecvError> {
        let started = Instant::now();
        let message = self.inner.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => TryRecvError::Empty,
            mpsc::error::TryRecvError::Disconnected => TryRecvError::Closed,
        })?;
        if let Some(probe) = &self.probe {
            probe.record(Direction::Receive, self.inner.len(), started);
        }
        Ok(message)
    }

    /// Number of messages currently buffered.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_instrumented(&self) -> bool {
        self.probe.is_some()
    }
}
