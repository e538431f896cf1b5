//! # Stages
//!
//! A stage is one concurrent unit of a pipeline. It reads content from its
//! inbound channel, writes content to its outbound channel and then
//! terminates. The runner owns the wiring: it binds every stage to its channels
//! through a [`StageIo`] and calls [`Stage::execute`] in a task of its own.
//!
//! ## Usage
//!
//! ```ignore
//! struct Forward;
//!
//! #[async_trait]
//! impl<T: Content> Stage<T> for Forward {
//!     async fn run(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
//!         let (inbound, outbound) = io.split();
//!         let mut items = inbound.items();
//!         while let Some(item) = items.next().await? {
//!             outbound.put(item).await?;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::PipelineError;
use crate::channel::{Message, Receiver, Sender, TryRecvError};

/// Default minimum size of a batch yielded by [`Inbound::batches`]
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// A unit of work flowing through a pipeline.
///
/// The only property the pipeline looks at is whether the item may wait in a
/// batch for more items to arrive.
pub trait Content: Send + 'static {
    fn batchable(&self) -> bool {
        true
    }
}

macro_rules! batchable_content {
    ($($ty:ty),* $(,)?) => {
        $(impl Content for $ty {})*
    };
}

batchable_content!(
    u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, String, Vec<u8>
);

/// Trait for a processing stage in a pipeline.
#[async_trait]
pub trait Stage<T: Content>: Send + 'static {
    /// Human-readable name used in logs and metrics.
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    /// The work of this stage.
    ///
    /// Every concrete stage must provide this. The default fails with
    /// [`PipelineError::NotImplemented`].
    async fn run(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        Err(PipelineError::NotImplemented {
            stage: io.name().to_string(),
        })
    }

    /// Run the stage, then signal the next stage that no more items follow.
    async fn execute(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        debug!(stage = %io, "Stage begin");
        self.run(io).await?;
        io.close().await
    }
}

fn short_type_name<S: ?Sized>() -> &'static str {
    let full = std::any::type_name::<S>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Channel binding of a single stage for the duration of one run.
pub struct StageIo<T> {
    name: Arc<str>,
    inbound: Inbound<T>,
    outbound: Outbound<T>,
    token: CancellationToken,
}

impl<T: Content> StageIo<T> {
    /// Bind a stage to its channels.
    ///
    /// `inbound` is absent for the first stage of a pipeline and `outbound` for
    /// the last one. The runner calls this once per stage before execution.
    pub fn connect(
        name: impl Into<String>,
        inbound: Option<Receiver<T>>,
        outbound: Option<Sender<T>>,
        token: CancellationToken,
    ) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        Self {
            inbound: Inbound {
                name: name.clone(),
                rx: inbound,
                ended: false,
            },
            outbound: Outbound {
                name: name.clone(),
                tx: outbound,
                closed: false,
            },
            name,
            token,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read items one at a time. See [`Inbound::items`].
    pub fn items(&mut self) -> Items<'_, T> {
        self.inbound.items()
    }

    /// Read items in batches. See [`Inbound::batches`].
    pub fn batches(&mut self, minimum_size: usize) -> Batches<'_, T> {
        self.inbound.batches(minimum_size)
    }

    /// Pass an item to the next stage. See [`Outbound::put`].
    pub async fn put(&mut self, item: T) -> Result<(), PipelineError> {
        self.outbound.put(item).await
    }

    /// Borrow both halves at once, to read and write in the same loop.
    pub fn split(&mut self) -> (&mut Inbound<T>, &mut Outbound<T>) {
        (&mut self.inbound, &mut self.outbound)
    }

    /// Send the end-of-stream marker downstream. See [`Outbound::close`].
    pub async fn close(&mut self) -> Result<(), PipelineError> {
        self.outbound.close().await
    }

    /// Token cancelled when the pipeline shuts down after a failure.
    ///
    /// Stages doing long work of their own should select on it.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

impl<T> fmt::Display for StageIo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Receiving half of a stage binding.
pub struct Inbound<T> {
    name: Arc<str>,
    rx: Option<Receiver<T>>,
    ended: bool,
}

impl<T: Content> Inbound<T> {
    /// Iterate over incoming items one by one.
    ///
    /// The sequence ends at the end-of-stream marker and cannot be restarted:
    /// once the marker has been seen every cursor yields nothing.
    pub fn items(&mut self) -> Items<'_, T> {
        Items { inbound: self }
    }

    /// Iterate over incoming items in batches.
    ///
    /// Each round waits for one item, then takes whatever is already buffered
    /// without waiting. The batch is yielded once it holds at least
    /// `minimum_size` items, contains an item that is not batchable, or the
    /// stream has ended. Otherwise it is kept and grown in the next round.
    pub fn batches(&mut self, minimum_size: usize) -> Batches<'_, T> {
        let ending = self.ended;
        Batches {
            inbound: self,
            minimum_size,
            batch: Vec::new(),
            ending,
            force_flush: false,
        }
    }

    /// Whether the end-of-stream marker has been received.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    async fn recv(&mut self) -> Result<Option<T>, PipelineError> {
        if self.ended {
            return Ok(None);
        }
        let rx = self.rx.as_mut().ok_or_else(|| PipelineError::NoInbound {
            stage: self.name.to_string(),
        })?;
        match rx.recv().await {
            Some(Message::Item(item)) => Ok(Some(item)),
            Some(Message::End) => {
                self.ended = true;
                debug!(stage = %self.name, "Received end-marker");
                Ok(None)
            }
            None => Err(PipelineError::ChannelClosed("upstream")),
        }
    }

    /// `Ok(None)` means nothing is buffered right now.
    fn try_recv(&mut self) -> Result<Option<Message<T>>, PipelineError> {
        if self.ended {
            return Ok(Some(Message::End));
        }
        let rx = self.rx.as_mut().ok_or_else(|| PipelineError::NoInbound {
            stage: self.name.to_string(),
        })?;
        match rx.try_recv() {
            Ok(Message::End) => {
                self.ended = true;
                debug!(stage = %self.name, "Received end-marker");
                Ok(Some(Message::End))
            }
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(PipelineError::ChannelClosed("upstream")),
        }
    }
}

/// Sending half of a stage binding.
pub struct Outbound<T> {
    name: Arc<str>,
    tx: Option<Sender<T>>,
    closed: bool,
}

impl<T: Content> Outbound<T> {
    /// Pass an item to the next stage, waiting while its channel is full.
    ///
    /// Fails with [`PipelineError::InvalidItem`] once the end-of-stream marker
    /// has been sent and with [`PipelineError::NoOutbound`] on the last stage.
    pub async fn put(&mut self, item: T) -> Result<(), PipelineError> {
        if self.closed {
            return Err(PipelineError::InvalidItem(
                "item sent after the end-of-stream marker",
            ));
        }
        let tx = self.tx.as_ref().ok_or_else(|| PipelineError::NoOutbound {
            stage: self.name.to_string(),
        })?;
        tx.send(Message::Item(item)).await?;
        trace!(stage = %self.name, "Put item");
        Ok(())
    }

    /// Send the end-of-stream marker. Only the first call may succeed.
    ///
    /// Closing a stage without an outbound channel only marks it closed.
    pub async fn close(&mut self) -> Result<(), PipelineError> {
        if self.closed {
            return Err(PipelineError::InvalidItem(
                "end-of-stream marker may only be sent once",
            ));
        }
        self.closed = true;
        if let Some(tx) = self.tx.take() {
            tx.send(Message::End).await?;
            debug!(stage = %self.name, "Put end-marker");
        }
        Ok(())
    }
}

/// Cursor over single items. Created by [`Inbound::items`].
pub struct Items<'a, T> {
    inbound: &'a mut Inbound<T>,
}

impl<T: Content> Items<'_, T> {
    /// Wait for the next item. `Ok(None)` once the stream has ended.
    pub async fn next(&mut self) -> Result<Option<T>, PipelineError> {
        let item = self.inbound.recv().await?;
        if item.is_some() {
            trace!(stage = %self.inbound.name, "Next item");
        }
        Ok(item)
    }
}

/// Cursor over batches. Created by [`Inbound::batches`].
pub struct Batches<'a, T> {
    inbound: &'a mut Inbound<T>,
    minimum_size: usize,
    batch: Vec<T>,
    ending: bool,
    force_flush: bool,
}

impl<T: Content> Batches<'_, T> {
    /// Wait for the next batch. `Ok(None)` once the stream has ended and the
    /// final batch was yielded.
    ///
    /// Cancel safe: items taken before the future is dropped stay in the
    /// pending batch.
    pub async fn next(&mut self) -> Result<Option<Vec<T>>, PipelineError> {
        while !self.ending {
            match self.inbound.recv().await? {
                Some(item) => self.push(item),
                None => self.ending = true,
            }
            while !self.ending {
                match self.inbound.try_recv()? {
                    Some(Message::Item(item)) => self.push(item),
                    Some(Message::End) => self.ending = true,
                    None => break,
                }
            }

            if !self.batch.is_empty()
                && (self.batch.len() >= self.minimum_size || self.ending || self.force_flush)
            {
                debug!(
                    stage = %self.inbound.name,
                    length = self.batch.len(),
                    "Next batch"
                );
                self.force_flush = false;
                return Ok(Some(std::mem::take(&mut self.batch)));
            }
        }
        Ok(None)
    }

    fn push(&mut self, item: T) {
        if !item.batchable() {
            self.force_flush = true;
        }
        self.batch.push(item);
    }
}
