use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{Content, PipelineError, Stage, StageIo};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer() // Write to test output
        .try_init();
}

/// Test item carrying an explicit batchable flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub id: u32,
    batchable: bool,
}

impl Unit {
    pub fn batchable(id: u32) -> Self {
        Self {
            id,
            batchable: true,
        }
    }

    pub fn immediate(id: u32) -> Self {
        Self {
            id,
            batchable: false,
        }
    }
}

impl Content for Unit {
    fn batchable(&self) -> bool {
        self.batchable
    }
}

/// Emits a fixed list of items.
pub struct Source<T> {
    items: Vec<T>,
}

impl<T> Source<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }
}

#[async_trait]
impl<T: Content> Stage<T> for Source<T> {
    async fn run(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        for item in std::mem::take(&mut self.items) {
            io.put(item).await?;
        }
        Ok(())
    }
}

/// Passes every item on unchanged.
pub struct Forward;

#[async_trait]
impl<T: Content> Stage<T> for Forward {
    async fn run(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        let (inbound, outbound) = io.split();
        let mut items = inbound.items();
        while let Some(item) = items.next().await? {
            outbound.put(item).await?;
        }
        Ok(())
    }
}

/// Records a copy of every item before passing it on.
pub struct Tap<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T> Tap<T> {
    pub fn new() -> (Self, Arc<Mutex<Vec<T>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Self { seen: seen.clone() }, seen)
    }
}

#[async_trait]
impl<T: Content + Clone> Stage<T> for Tap<T> {
    async fn run(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        let (inbound, outbound) = io.split();
        let mut items = inbound.items();
        while let Some(item) = items.next().await? {
            self.seen.lock().push(item.clone());
            outbound.put(item).await?;
        }
        Ok(())
    }
}

/// Fails as soon as it runs.
pub struct Fail;

#[async_trait]
impl<T: Content> Stage<T> for Fail {
    async fn run(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        Err(PipelineError::stage(
            io.name(),
            std::io::Error::other("Intentional failure"),
        ))
    }
}
