pub mod active;
pub mod control;
pub mod daemon;
pub mod init;
pub mod status;

use chrono::{DateTime, Utc};

/// Compact "3m ago" style age for table output.
pub fn format_age(at: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(at);
    let secs = elapsed.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}
