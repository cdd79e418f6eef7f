//! Cost telemetry and budget types.
//!
//! One [`CostEntry`] is recorded per phase invocation. Budgets are
//! per-project monthly caps: the core tracks spend and flags threshold
//! crossings, callers decide whether to proceed.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Telemetry for a single phase invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostEntry {
    pub project_id: String,
    pub task_id: String,
    pub phase: String,
    pub model: String,
    pub iteration: u32,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl CostEntry {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    /// The YYYY-MM bucket this entry falls into.
    pub fn month(&self) -> String {
        format!("{:04}-{:02}", self.timestamp.year(), self.timestamp.month())
    }
}

/// Aggregated costs for a project over some window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CostSummary {
    pub entries: u64,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Per-project monthly spending cap. Consulted, never enforced, by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Budget {
    pub project_id: String,
    pub monthly_limit_usd: f64,
    pub alert_threshold_percent: u8,
    /// YYYY-MM of the month the spend counter covers.
    pub current_month: String,
    pub current_month_spent: f64,
}

impl Budget {
    pub fn new(project_id: impl Into<String>, monthly_limit_usd: f64) -> Self {
        Self {
            project_id: project_id.into(),
            monthly_limit_usd,
            alert_threshold_percent: 80,
            current_month: current_month(),
            current_month_spent: 0.0,
        }
    }

    pub fn remaining_usd(&self) -> f64 {
        (self.monthly_limit_usd - self.current_month_spent).max(0.0)
    }

    pub fn is_over_threshold(&self) -> bool {
        if self.monthly_limit_usd <= 0.0 {
            return false;
        }
        let pct = self.current_month_spent / self.monthly_limit_usd * 100.0;
        pct >= f64::from(self.alert_threshold_percent)
    }

    /// Add spend, resetting the counter when the month rolled over.
    pub fn add_spend(&mut self, amount_usd: f64, month: &str) {
        if self.current_month != month {
            self.current_month = month.to_string();
            self.current_month_spent = 0.0;
        }
        self.current_month_spent += amount_usd;
    }
}

/// The current YYYY-MM bucket.
pub fn current_month() -> String {
    let now = Utc::now();
    format!("{:04}-{:02}", now.year(), now.month())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> CostEntry {
        CostEntry {
            project_id: "demo".into(),
            task_id: "TASK-001".into(),
            phase: "implement".into(),
            model: "sonnet".into(),
            iteration: 1,
            cost_usd: 0.25,
            input_tokens: 1000,
            output_tokens: 500,
            cache_creation_tokens: 200,
            cache_read_tokens: 300,
            duration_ms: 42_000,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn total_tokens_sums_all_buckets() {
        assert_eq!(entry().total_tokens(), 2000);
    }

    #[test]
    fn month_bucket_is_zero_padded() {
        assert_eq!(entry().month(), "2024-03");
    }

    #[test]
    fn budget_threshold_and_remaining() {
        let mut budget = Budget::new("demo", 100.0);
        budget.current_month = "2024-03".into();
        budget.add_spend(50.0, "2024-03");
        assert!(!budget.is_over_threshold());
        assert_eq!(budget.remaining_usd(), 50.0);

        budget.add_spend(35.0, "2024-03");
        assert!(budget.is_over_threshold());
    }

    #[test]
    fn month_rollover_resets_spend() {
        let mut budget = Budget::new("demo", 100.0);
        budget.current_month = "2024-03".into();
        budget.current_month_spent = 90.0;
        budget.add_spend(1.0, "2024-04");
        assert_eq!(budget.current_month, "2024-04");
        assert_eq!(budget.current_month_spent, 1.0);
    }

    #[test]
    fn zero_limit_never_alerts() {
        let mut budget = Budget::new("demo", 0.0);
        budget.add_spend(10.0, &budget.current_month.clone());
        assert!(!budget.is_over_threshold());
    }
}
