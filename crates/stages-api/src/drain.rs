use async_trait::async_trait;
use tracing::debug;

use crate::{Content, PipelineError, Stage, StageIo};

/// Terminal stage that discards everything it receives.
///
/// Every pipeline must end with this stage. Without it the last real stage
/// would fill its outbound channel and block the entire pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainStage;

#[async_trait]
impl<T: Content> Stage<T> for DrainStage {
    fn name(&self) -> &str {
        "DrainStage"
    }

    async fn run(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        let mut drained: u64 = 0;
        let mut items = io.items();
        while items.next().await?.is_some() {
            drained += 1;
        }
        debug!(stage = %io, drained, "Drained");
        Ok(())
    }

    // No end-marker: there is no stage after this one.
    async fn execute(&mut self, io: &mut StageIo<T>) -> Result<(), PipelineError> {
        self.run(io).await
    }
}
