use std::collections::HashMap;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::scope::Scope;

/// How often spend counters start over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Daily,
    /// ISO week, starting Monday 00:00 UTC
    Weekly,
    #[default]
    Monthly,
    Lifetime,
}

/// Half-open `[start, end)` window of a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeriodWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

impl BudgetPeriod {
    /// Window containing `now`; `None` for lifetime budgets.
    pub fn window(&self, now: DateTime<Utc>) -> Option<PeriodWindow> {
        let today = now.date_naive();
        let (start, end) = match self {
            BudgetPeriod::Lifetime => return None,
            BudgetPeriod::Daily => (today, today.checked_add_days(Days::new(1))?),
            BudgetPeriod::Weekly => {
                let monday = today
                    .checked_sub_days(Days::new(u64::from(today.weekday().num_days_from_monday())))?;
                (monday, monday.checked_add_days(Days::new(7))?)
            }
            BudgetPeriod::Monthly => {
                let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?;
                (first, first.checked_add_months(Months::new(1))?)
            }
        };
        Some(PeriodWindow {
            start: midnight(start),
            end: midnight(end),
        })
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.window(now).map(|w| w.start)
    }
}

/// Configured USD limits. A missing or zero limit means unlimited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetLimits {
    pub global: Option<Decimal>,
    /// Keyed by provider slug
    pub providers: HashMap<String, Decimal>,
    /// Keyed by `provider/model`
    pub models: HashMap<String, Decimal>,
}

impl BudgetLimits {
    /// Keys are normalized to lowercase.
    pub fn new(
        global: Option<Decimal>,
        providers: HashMap<String, Decimal>,
        models: HashMap<String, Decimal>,
    ) -> Self {
        let lower = |m: HashMap<String, Decimal>| -> HashMap<String, Decimal> {
            m.into_iter()
                .map(|(k, v)| (k.trim().to_ascii_lowercase(), v))
                .collect()
        };
        Self {
            global,
            providers: lower(providers),
            models: lower(models),
        }
    }

    pub fn limit_for(&self, scope: &Scope) -> Option<Decimal> {
        let limit = match scope {
            Scope::Global => self.global,
            Scope::Provider(provider) => self.providers.get(provider).copied(),
            Scope::Model { provider, model } => {
                self.models.get(&format!("{}/{}", provider, model)).copied()
            }
        };
        limit.filter(|l| *l > Decimal::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_none_or(|g| g <= Decimal::ZERO)
            && self.providers.values().all(|l| *l <= Decimal::ZERO)
            && self.models.values().all(|l| *l <= Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 30, 0).unwrap()
    }

    #[test]
    fn test_daily_window() {
        let w = BudgetPeriod::Daily.window(at(2025, 3, 14, 23)).unwrap();
        assert_eq!(w.start, Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap());
        assert_eq!(w.end, Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap());
        assert!(w.contains(at(2025, 3, 14, 0)));
        assert!(!w.contains(w.end));
    }

    #[test]
    fn test_weekly_window_starts_monday() {
        // 2025-03-16 is a Sunday
        let w = BudgetPeriod::Weekly.window(at(2025, 3, 16, 12)).unwrap();
        assert_eq!(w.start, Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(w.end, Utc.with_ymd_and_hms(2025, 3, 17, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_monthly_window_crosses_year() {
        let w = BudgetPeriod::Monthly.window(at(2024, 12, 31, 23)).unwrap();
        assert_eq!(w.start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(w.end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!(BudgetPeriod::Lifetime.window(at(2024, 12, 31, 23)).is_none());
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let limits = BudgetLimits::new(
            Some(Decimal::ZERO),
            HashMap::from([("OpenAI".to_string(), Decimal::new(10, 0))]),
            HashMap::from([("openai/GPT-4o".to_string(), Decimal::new(5, 0))]),
        );
        assert_eq!(limits.limit_for(&Scope::Global), None);
        assert_eq!(
            limits.limit_for(&Scope::Provider("openai".to_string())),
            Some(Decimal::new(10, 0))
        );
        let chain = Scope::chain("openai", Some("gpt-4o"));
        assert_eq!(limits.limit_for(&chain[2]), Some(Decimal::new(5, 0)));
        assert!(!limits.is_empty());
        assert!(BudgetLimits::default().is_empty());
    }
}
