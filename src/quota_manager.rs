//! Long-horizon quota enforcement (daily/weekly/monthly budgets), per
//! spec.md §4.8.
//!
//! Unlike the short-horizon [`crate::algorithm`] windows, quota periods are
//! calendar-aligned in UTC ("today", "this ISO week", "this calendar
//! month") rather than rolling from first use. Grounded in shape on
//! `llm-shield-rs`'s `ClientQuota`/`WindowState` multi-window tracker
//! (lazy reset-on-access via an `update()` pass before reading), re-grounded
//! on this crate's [`Storage`] trait instead of an in-process
//! `RwLock<HashMap>` so quota state is shared across gateway replicas.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{current_timestamp_ms, Storage, StorageEntry};

/// The calendar granularity of a quota period, per spec.md §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaPeriod {
    /// Resets at UTC midnight.
    Daily,
    /// Resets at the start of the ISO week (Monday UTC midnight).
    Weekly,
    /// Resets at the start of the UTC calendar month.
    Monthly,
}

impl QuotaPeriod {
    /// The calendar label for `now` under this period, e.g. `"2025-03-17"`,
    /// `"2025-W12"`, `"2025-03"` — used both as part of the storage key
    /// (making resets idempotent: the label itself changes at the
    /// boundary) and as a human-readable period identifier.
    pub fn label(&self, now: DateTime<Utc>) -> String {
        match self {
            QuotaPeriod::Daily => now.format("%Y-%m-%d").to_string(),
            QuotaPeriod::Weekly => format!("{}-W{:02}", now.iso_week().year(), now.iso_week().week()),
            QuotaPeriod::Monthly => now.format("%Y-%m").to_string(),
        }
    }

    /// The instant this period's current label expires, in Unix
    /// milliseconds, used to size the storage TTL generously past the
    /// boundary (stale labels are simply never read again).
    pub fn next_reset_ms(&self, now: DateTime<Utc>) -> u64 {
        let next = match self {
            QuotaPeriod::Daily => (now + chrono::Duration::days(1))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc(),
            QuotaPeriod::Weekly => {
                let days_into_week = now.weekday().num_days_from_monday() as i64;
                let start_of_week = now.date_naive() - chrono::Duration::days(days_into_week);
                (start_of_week + chrono::Duration::days(7))
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    .and_utc()
            }
            QuotaPeriod::Monthly => {
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                chrono::NaiveDate::from_ymd_opt(year, month, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    .and_utc()
            }
        };
        next.timestamp_millis().max(0) as u64
    }
}

/// A single configured budget within a quota, e.g. "100 per day".
#[derive(Debug, Clone)]
pub struct QuotaWindow {
    /// Calendar period this budget resets on.
    pub period: QuotaPeriod,
    /// Maximum units allowed within the period.
    pub limit: u64,
}

/// A named long-horizon quota, potentially spanning several calendar
/// periods at once (e.g. a daily *and* monthly cap), per spec.md §4.8.
#[derive(Debug, Clone)]
pub struct Quota {
    /// Quota name (e.g. "ai-requests"), surfaced in `QuotaRejection`.
    pub name: String,
    /// The budgets enforced together; a subject is denied if *any* window
    /// is exhausted.
    pub windows: Vec<QuotaWindow>,
}

impl Quota {
    /// Start a quota with the given name and no windows.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            windows: Vec::new(),
        }
    }

    /// Add a daily budget.
    pub fn daily(mut self, limit: u64) -> Self {
        self.windows.push(QuotaWindow {
            period: QuotaPeriod::Daily,
            limit,
        });
        self
    }

    /// Add a weekly budget.
    pub fn weekly(mut self, limit: u64) -> Self {
        self.windows.push(QuotaWindow {
            period: QuotaPeriod::Weekly,
            limit,
        });
        self
    }

    /// Add a monthly budget.
    pub fn monthly(mut self, limit: u64) -> Self {
        self.windows.push(QuotaWindow {
            period: QuotaPeriod::Monthly,
            limit,
        });
        self
    }
}

/// Usage against one window of a quota, returned in [`QuotaOutcome`].
#[derive(Debug, Clone)]
pub struct QuotaUsage {
    /// The window's period.
    pub period: QuotaPeriod,
    /// The calendar label this usage applies to.
    pub label: String,
    /// Units used so far this period.
    pub used: u64,
    /// The configured limit.
    pub limit: u64,
}

impl QuotaUsage {
    /// Remaining budget in this window.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

/// Result of a [`QuotaManager::check`] call.
#[derive(Debug, Clone)]
pub enum QuotaOutcome {
    /// Every window had budget; usage was recorded.
    Allowed { usage: Vec<QuotaUsage> },
    /// At least one window was exhausted; nothing was recorded.
    Denied {
        /// The window that denied the request.
        exhausted: QuotaUsage,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowRecord {
    label: String,
    used: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QuotaRecord {
    windows: HashMap<usize, WindowRecord>,
}

/// Enforces a set of named, calendar-aligned quotas against a [`Storage`]
/// backend, per spec.md §4.8.
#[derive(Debug, Clone, Default)]
pub struct QuotaManager {
    quotas: HashMap<String, Quota>,
}

const QUOTA_RECORD_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 35);

impl QuotaManager {
    /// Create an empty quota manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a quota definition.
    pub fn register(&mut self, quota: Quota) {
        self.quotas.insert(quota.name.clone(), quota);
    }

    /// Build the default quota bundle described in spec.md §4.8.
    pub fn with_defaults() -> Self {
        let mut mgr = Self::new();
        mgr.register(Quota::new("ai-requests").daily(100).monthly(2000));
        mgr.register(Quota::new("file-uploads").daily(50).monthly(500));
        mgr.register(Quota::new("exports").daily(10).monthly(100));
        mgr
    }

    /// Look up a registered quota by name.
    pub fn get(&self, name: &str) -> Option<&Quota> {
        self.quotas.get(name)
    }

    fn key(quota_name: &str, subject: &str) -> String {
        format!("quota:{quota_name}:{subject}")
    }

    /// Check and, if every window has budget, record `cost` units against
    /// `quota_name` for `subject` (e.g. a tenant or API key), per spec.md
    /// §4.8's lazy-reset-on-access semantics: a window whose calendar label
    /// has rolled over is treated as freshly reset without a separate
    /// sweep.
    pub async fn check<S: Storage>(
        &self,
        storage: &S,
        quota_name: &str,
        subject: &str,
        cost: u64,
    ) -> Result<QuotaOutcome> {
        let Some(quota) = self.quotas.get(quota_name) else {
            return Ok(QuotaOutcome::Allowed { usage: Vec::new() });
        };

        let now = DateTime::<Utc>::from_timestamp_millis(current_timestamp_ms() as i64).unwrap_or_else(Utc::now);
        let labels: Vec<String> = quota.windows.iter().map(|w| w.period.label(now)).collect();
        let windows = quota.windows.clone();
        let key = Self::key(quota_name, subject);

        let outcome = storage
            .execute_atomic(&key, QUOTA_RECORD_TTL, move |entry| {
                let mut record = decode(&entry);
                let mut usages = Vec::with_capacity(windows.len());

                for (idx, window) in windows.iter().enumerate() {
                    let label = &labels[idx];
                    let current = record
                        .windows
                        .get(idx)
                        .filter(|r| &r.label == label)
                        .map(|r| r.used)
                        .unwrap_or(0);
                    usages.push(QuotaUsage {
                        period: window.period,
                        label: label.clone(),
                        used: current,
                        limit: window.limit,
                    });
                }

                if let Some(exhausted) = usages.iter().find(|u| u.used.saturating_add(cost) > u.limit).cloned() {
                    return (record.encode(), QuotaOutcome::Denied { exhausted });
                }

                for (idx, usage) in usages.iter_mut().enumerate() {
                    usage.used += cost;
                    record.windows.insert(
                        idx,
                        WindowRecord {
                            label: usage.label.clone(),
                            used: usage.used,
                        },
                    );
                }

                (record.encode(), QuotaOutcome::Allowed { usage: usages })
            })
            .await?;

        Ok(outcome)
    }

    /// Read current usage for a quota/subject without recording anything.
    pub async fn usage<S: Storage>(&self, storage: &S, quota_name: &str, subject: &str) -> Result<Vec<QuotaUsage>> {
        let Some(quota) = self.quotas.get(quota_name) else {
            return Ok(Vec::new());
        };
        let now = DateTime::<Utc>::from_timestamp_millis(current_timestamp_ms() as i64).unwrap_or_else(Utc::now);
        let entry = storage.get(&Self::key(quota_name, subject)).await?;
        let record = decode(&entry);

        Ok(quota
            .windows
            .iter()
            .enumerate()
            .map(|(idx, window)| {
                let label = window.period.label(now);
                let used = record
                    .windows
                    .get(idx)
                    .filter(|r| r.label == label)
                    .map(|r| r.used)
                    .unwrap_or(0);
                QuotaUsage {
                    period: window.period,
                    label,
                    used,
                    limit: window.limit,
                }
            })
            .collect())
    }

    /// Reset all quota state for a subject (admin action).
    pub async fn reset<S: Storage>(&self, storage: &S, quota_name: &str, subject: &str) -> Result<()> {
        storage.delete(&Self::key(quota_name, subject)).await
    }
}

impl QuotaRecord {
    fn encode(&self) -> StorageEntry {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        StorageEntry::new(0, current_timestamp_ms()).set_metadata(bytes)
    }
}

fn decode(entry: &Option<StorageEntry>) -> QuotaRecord {
    entry
        .as_ref()
        .and_then(|e| e.metadata.as_ref())
        .and_then(|bytes| serde_json::from_slice(bytes).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_quota_allows_under_limit() {
        let storage = MemoryStorage::new();
        let mut mgr = QuotaManager::new();
        mgr.register(Quota::new("ai-requests").daily(2));

        let outcome = mgr.check(&storage, "ai-requests", "tenant-1", 1).await.unwrap();
        assert!(matches!(outcome, QuotaOutcome::Allowed { .. }));
    }

    #[tokio::test]
    async fn test_quota_denies_over_limit() {
        let storage = MemoryStorage::new();
        let mut mgr = QuotaManager::new();
        mgr.register(Quota::new("ai-requests").daily(1));

        mgr.check(&storage, "ai-requests", "tenant-1", 1).await.unwrap();
        let outcome = mgr.check(&storage, "ai-requests", "tenant-1", 1).await.unwrap();
        assert!(matches!(outcome, QuotaOutcome::Denied { .. }));
    }

    #[tokio::test]
    async fn test_quota_multi_window_daily_and_monthly() {
        let storage = MemoryStorage::new();
        let mut mgr = QuotaManager::new();
        mgr.register(Quota::new("ai-requests").daily(5).monthly(10));

        for _ in 0..5 {
            let outcome = mgr.check(&storage, "ai-requests", "tenant-1", 1).await.unwrap();
            assert!(matches!(outcome, QuotaOutcome::Allowed { .. }));
        }
        let outcome = mgr.check(&storage, "ai-requests", "tenant-1", 1).await.unwrap();
        match outcome {
            QuotaOutcome::Denied { exhausted } => assert_eq!(exhausted.period, QuotaPeriod::Daily),
            _ => panic!("expected daily window to deny"),
        }
    }

    #[tokio::test]
    async fn test_quota_usage_reflects_recorded_cost() {
        let storage = MemoryStorage::new();
        let mut mgr = QuotaManager::new();
        mgr.register(Quota::new("exports").daily(10));

        mgr.check(&storage, "exports", "tenant-1", 3).await.unwrap();
        let usage = mgr.usage(&storage, "exports", "tenant-1").await.unwrap();
        assert_eq!(usage[0].used, 3);
        assert_eq!(usage[0].remaining(), 7);
    }

    #[tokio::test]
    async fn test_quota_reset_clears_usage() {
        let storage = MemoryStorage::new();
        let mut mgr = QuotaManager::new();
        mgr.register(Quota::new("exports").daily(1));

        mgr.check(&storage, "exports", "tenant-1", 1).await.unwrap();
        mgr.reset(&storage, "exports", "tenant-1").await.unwrap();
        let outcome = mgr.check(&storage, "exports", "tenant-1", 1).await.unwrap();
        assert!(matches!(outcome, QuotaOutcome::Allowed { .. }));
    }

    #[test]
    fn test_period_label_format() {
        let now = DateTime::parse_from_rfc3339("2025-03-17T12:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(QuotaPeriod::Daily.label(now), "2025-03-17");
        assert_eq!(QuotaPeriod::Monthly.label(now), "2025-03");
        assert!(QuotaPeriod::Weekly.label(now).starts_with("2025-W"));
    }
}
