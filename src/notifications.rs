// =============================================================================
// Notification Log — user-visible messages polled by the dashboard
// =============================================================================
//
// Bounded ring of the most recent notices: API failures the user should know
// about, the daily-budget warning, cache maintenance confirmations. Storage
// problems never land here; they are logged and recovered silently.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{ApiError, ErrorCategory};

/// Maximum number of notifications retained.
const MAX_NOTIFICATIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Monotonically increasing id; clients poll with `since`.
    pub id: u64,
    pub level: NotificationLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    /// ISO 8601 timestamp.
    pub at: String,
}

#[derive(Debug, Default)]
pub struct NotificationLog {
    entries: RwLock<VecDeque<Notification>>,
    next_id: AtomicU64,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a notification, evicting the oldest beyond
    /// [`MAX_NOTIFICATIONS`]. Returns its id.
    pub fn push(
        &self,
        level: NotificationLevel,
        message: impl Into<String>,
        category: Option<ErrorCategory>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = Notification {
            id,
            level,
            message: message.into(),
            category,
            at: Utc::now().to_rfc3339(),
        };

        let mut entries = self.entries.write();
        entries.push_back(record);
        while entries.len() > MAX_NOTIFICATIONS {
            entries.pop_front();
        }
        id
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.push(NotificationLevel::Info, message, None)
    }

    pub fn warning(&self, message: impl Into<String>, category: Option<ErrorCategory>) -> u64 {
        self.push(NotificationLevel::Warning, message, category)
    }

    /// Surface an API failure. Categories the user never sees are dropped.
    pub fn api_failure(&self, context: &str, err: &ApiError, served_stale: bool) -> Option<u64> {
        let category = err.category();
        if !category.is_user_visible() {
            return None;
        }

        let message = match category {
            ErrorCategory::Auth => {
                "API key error: your API key is invalid or has expired.".to_string()
            }
            ErrorCategory::RateLimit => "Rate limit exceeded. Please try again later.".to_string(),
            _ => format!("API error while loading {context}: {err}"),
        };

        let id = if served_stale {
            self.push(
                NotificationLevel::Warning,
                format!("{message} Showing cached data."),
                Some(category),
            )
        } else {
            self.push(NotificationLevel::Error, message, Some(category))
        };
        Some(id)
    }

    /// All retained notifications, oldest first.
    pub fn recent(&self) -> Vec<Notification> {
        self.entries.read().iter().cloned().collect()
    }

    /// Notifications with an id greater than `id`.
    pub fn since(&self, id: u64) -> Vec<Notification> {
        self.entries
            .read()
            .iter()
            .filter(|n| n.id > id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}
