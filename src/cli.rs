use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use magicswap::upload::MAX_UPLOAD_BYTES;
use magicswap::workflow::state::WorkflowConfig;

#[derive(Parser)]
#[command(name = "magicswap", about = "Face swap demo workflow")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Stage two images, run the simulated swap and download the result
    Swap {
        /// Image whose face is used
        #[arg(long)]
        source: PathBuf,

        /// Image the face is placed into
        #[arg(long)]
        target: PathBuf,

        /// Directory the result is written to
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Check files against the upload rules
    Validate {
        /// Largest accepted file in bytes
        #[arg(long, default_value_t = MAX_UPLOAD_BYTES)]
        max_upload_bytes: u64,

        /// Files to check
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

/// Processing timing and upload limit.
#[derive(Args, Debug)]
pub struct TuningArgs {
    /// Milliseconds between progress updates
    #[arg(long, default_value_t = 300)]
    pub tick_ms: u64,

    /// Percentage added per progress update
    #[arg(long, default_value_t = 10)]
    pub step: u8,

    /// Highest percentage reported before completion
    #[arg(long, default_value_t = 90)]
    pub ceiling: u8,

    /// Total simulated processing time in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub duration_ms: u64,

    /// Largest accepted upload in bytes
    #[arg(long, default_value_t = MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,
}

impl TuningArgs {
    pub fn to_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            tick_interval: Duration::from_millis(self.tick_ms),
            progress_step: self.step,
            progress_ceiling: self.ceiling,
            processing_duration: Duration::from_millis(self.duration_ms),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}
