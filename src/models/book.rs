//! Book metadata rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A book owned by exactly one user.
///
/// `file_path` points into the books bucket and always starts with
/// `user_id` as its first segment.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Book {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub author: Option<String>,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub cover_url: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// User-supplied fields for a new book.
#[derive(Debug, Clone, Default)]
pub struct NewBook {
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
}

/// Quota summary for one account.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct StorageUsage {
    pub used_bytes: i64,
    pub quota_bytes: i64,
    pub remaining_bytes: i64,
    pub percent_used: f64,
}

impl StorageUsage {
    pub fn new(used_bytes: i64, quota_bytes: i64) -> Self {
        let remaining_bytes = (quota_bytes - used_bytes).max(0);
        let percent_used = if quota_bytes > 0 {
            (used_bytes as f64 / quota_bytes as f64) * 100.0
        } else {
            100.0
        };
        Self {
            used_bytes,
            quota_bytes,
            remaining_bytes,
            percent_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_reports_remaining_space() {
        let usage = StorageUsage::new(50, 200);
        assert_eq!(usage.remaining_bytes, 150);
        assert_eq!(usage.percent_used, 25.0);
    }

    #[test]
    fn usage_never_reports_negative_remaining() {
        // concurrent uploads can push an account past its quota
        let usage = StorageUsage::new(250, 200);
        assert_eq!(usage.remaining_bytes, 0);
        assert!(usage.percent_used > 100.0);
    }
}
