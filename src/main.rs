use std::time::Duration;

use anyhow::Result;
use breaknanny::{cli::run_cli, utils::runtime::single_thread_runtime};
use tracing::error;

fn main() -> Result<()> {
    let runtime = single_thread_runtime()?;
    let result = runtime.block_on(run_cli()).inspect_err(|e| {
        error!("Error running cli {e:?}");
    });
    // Reading stdin blocks a worker thread that would otherwise keep the process alive.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}
