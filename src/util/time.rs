//! Time utilities

use std::time::{Duration, SystemTime};

/// Seconds elapsed since `earlier`, saturating to zero if the clock moved back.
pub fn age_secs(earlier: SystemTime) -> u64 {
    SystemTime::now()
        .duration_since(earlier)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Format a duration as a short human-readable string
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
