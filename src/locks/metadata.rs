//! What a lock file records about its holder.

use crate::error::{Result, SpecrunError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
    /// `user@host`
    pub owner: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    pub created_at: DateTime<Utc>,

    /// What the holder is doing (`run`, `agents disable`, ...).
    pub action: String,
}

impl LockMetadata {
    /// Metadata for a lock taken by this process.
    pub fn new(action: &str) -> Self {
        Self {
            owner: owner_string(),
            pid: Some(std::process::id()),
            created_at: Utc::now(),
            action: action.to_string(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let unreadable = |what: &str, e: &dyn std::fmt::Display| {
            SpecrunError::LockContention(format!(
                "failed to {} lock file '{}': {}",
                what,
                path.display(),
                e
            ))
        };
        let raw = std::fs::read_to_string(path).map_err(|e| unreadable("read", &e))?;
        serde_json::from_str(&raw).map_err(|e| unreadable("parse", &e))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            SpecrunError::LockContention(format!("failed to serialize lock metadata: {}", e))
        })
    }

    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.created_at)
    }

    pub fn age_string(&self) -> String {
        format_age(self.age())
    }

    /// Older than `stale_minutes`; the holder has most likely crashed.
    pub fn is_stale(&self, stale_minutes: u32) -> bool {
        self.age() > Duration::minutes(i64::from(stale_minutes))
    }
}

/// `3m`, `2h 5m` or `1d 4h`. Clock skew never shows a negative age.
fn format_age(age: Duration) -> String {
    let minutes = age.num_minutes().max(0);
    match (minutes / (24 * 60), minutes / 60 % 24, minutes % 60) {
        (0, 0, m) => format!("{}m", m),
        (0, h, m) => format!("{}h {}m", h, m),
        (d, h, _) => format!("{}d {}h", d, h),
    }
}

/// `user@host` for the current process; also the actor on event records.
pub(crate) fn owner_string() -> String {
    let user = ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| "unknown".to_string());
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}@{}", user, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_formatting() {
        assert_eq!(format_age(Duration::seconds(30)), "0m");
        assert_eq!(format_age(Duration::minutes(-5)), "0m");
        assert_eq!(format_age(Duration::minutes(59)), "59m");
        assert_eq!(format_age(Duration::minutes(60)), "1h 0m");
        assert_eq!(format_age(Duration::hours(28) + Duration::minutes(3)), "1d 4h");
    }

    #[test]
    fn owner_has_user_and_host() {
        let owner = owner_string();
        let (user, host) = owner.split_once('@').unwrap();
        assert!(!user.is_empty());
        assert!(!host.is_empty());
    }
}
