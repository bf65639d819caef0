//! Chunk sinks fed by the process pump.

use paintress_config::OutputMode;
use paintress_process::ChunkSink;
use paintress_reserve::ReserveParty;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Appends every chunk to the expedition log file.
pub struct FileSink {
    file: Option<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> Self {
        let file = match File::create(path) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open expedition log");
                None
            }
        };
        Self { file }
    }
}

impl ChunkSink for FileSink {
    fn on_chunk(&mut self, chunk: &str) {
        if let Some(f) = &mut self.file {
            let _ = f.write_all(chunk.as_bytes());
            let _ = f.flush();
        }
    }
}

/// Streams the agent's output to the operator. In JSON mode it moves to
/// stderr so stdout stays machine-parseable.
pub struct DataSink {
    mode: OutputMode,
}

impl DataSink {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }
}

impl ChunkSink for DataSink {
    fn on_chunk(&mut self, chunk: &str) {
        match self.mode {
            OutputMode::Text => {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            }
            OutputMode::Json => {
                eprint!("{chunk}");
            }
        }
    }
}

/// Feeds chunks to the Reserve Party's rate-limit scanner, firing at most
/// once per process run so signal storms cannot re-trigger the swap.
pub struct ReserveScanSink {
    reserve: Arc<ReserveParty>,
    fired: bool,
}

impl ReserveScanSink {
    pub fn new(reserve: Arc<ReserveParty>) -> Self {
        Self {
            reserve,
            fired: false,
        }
    }

    pub fn detected(&self) -> bool {
        self.fired
    }
}

impl ChunkSink for ReserveScanSink {
    fn on_chunk(&mut self, chunk: &str) {
        if self.fired {
            return;
        }
        if self.reserve.check_output(chunk).is_some() {
            self.fired = true;
        }
    }
}
