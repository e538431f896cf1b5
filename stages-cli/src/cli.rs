use std::path::PathBuf;

use clap::Parser;

/// Run a demonstration pipeline: numbers -> batcher -> [failure] -> drain.
#[derive(Parser, Debug)]
#[command(name = "stages", version, about, long_about = None)]
pub struct Args {
    /// TOML file with `[pipeline]` and `[demo]` tables
    #[arg(short, long, env = "STAGES_CONFIG")]
    pub config: Option<PathBuf>,

    /// Items buffered between two stages
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Minimum batch size of the batcher stage
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Number of items the source emits
    #[arg(short = 'n', long)]
    pub count: Option<u64>,

    /// Mark every k-th item as non-batchable (0 disables)
    #[arg(long)]
    pub urgent_every: Option<u64>,

    /// Fail the pipeline when this item reaches the failure stage
    #[arg(long)]
    pub fail_at: Option<u64>,

    /// Record queue metrics and print them as JSON
    #[arg(long)]
    pub profile: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}
