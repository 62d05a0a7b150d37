//! Std time implementation

use std::time::{SystemTime, UNIX_EPOCH};

use picobroker_core::TimeSource;

/// Wall-clock time source
#[derive(Debug, Default, Clone, Copy)]
pub struct StdTimeSource;

impl TimeSource for StdTimeSource {
    fn now_secs(&self) -> u64 {
        // A clock before 1970 reads as zero.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default()
    }
}
