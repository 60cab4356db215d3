use crate::patch::Timestamp;
use chrono::{DateTime, Utc};

/// Short age like `5m ago`; timestamps in the future count as `just now`
pub fn relative(ts: Timestamp, now: Timestamp) -> String {
    let secs = now.saturating_sub(ts);
    if secs < 10 {
        return "just now".to_string();
    }
    if secs < 60 { return format!("{}s ago", secs); }
    if secs < 3600 { return format!("{}m ago", secs / 60); }
    if secs < 86400 { return format!("{}h ago", secs / 3600); }
    if secs < 86400 * 30 { return format!("{}d ago", secs / 86400); }
    if secs < 86400 * 365 { return format!("{}mo ago", secs / (86400 * 30)); }
    format!("{}y ago", secs / (86400 * 365))
}

/// `2023-11-14 22:13 UTC`
pub fn absolute(ts: Timestamp) -> String {
    match DateTime::<Utc>::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => ts.to_string(),
    }
}

/// `2023-11-14 22:13 UTC (3d ago)`
pub fn both(ts: Timestamp, now: Timestamp) -> String {
    format!("{} ({})", absolute(ts), relative(ts, now))
}
