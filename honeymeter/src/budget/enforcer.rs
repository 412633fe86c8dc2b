use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use log::{error, warn};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

use super::{
    limits::{BudgetLimits, BudgetPeriod},
    scope::{LimitType, Scope, SpendKey},
    store::SpendStore,
};
use crate::{errors::BudgetError, telemetry};

/// What to do when the spend store cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Log, count and allow the call
    #[default]
    Open,
    /// Surface the error so the caller refuses the call
    Closed,
}

/// The first violated scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Denial {
    pub limit_type: LimitType,
    pub scope: String,
    pub limit: Decimal,
    pub current: Decimal,
    pub percentage_used: Option<f64>,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} budget exceeded for {}: spent ${} of ${}",
            self.limit_type,
            self.scope,
            self.current.round_dp(4),
            self.limit
        )?;
        if let Some(pct) = self.percentage_used {
            write!(f, " ({:.1}%)", pct * 100.0)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", content = "denial", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Spend and limit of one scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeStatus {
    pub limit_type: LimitType,
    pub scope: String,
    pub current: Decimal,
    /// `None` when the scope is unlimited
    pub limit: Option<Decimal>,
    pub percentage_used: Option<f64>,
}

/// Result of charging one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendReceipt {
    pub amount: Decimal,
    /// New totals, in check order
    pub totals: Vec<ScopeStatus>,
    /// Set when a limit was crossed between admission and recording
    pub overrun: Option<Denial>,
}

/// `current / limit` as a ratio (1.0 is the whole limit); `None` for a zero limit.
fn percentage(current: Decimal, limit: Decimal) -> Option<f64> {
    if limit.is_zero() {
        return None;
    }
    (current / limit).to_f64()
}

/// Decides whether an identity may make a call and charges it afterwards.
pub struct BudgetEnforcer {
    store: Arc<dyn SpendStore>,
    limits: BudgetLimits,
    period: BudgetPeriod,
    enabled: bool,
    fail_mode: FailMode,
}

impl BudgetEnforcer {
    pub fn new(store: Arc<dyn SpendStore>, limits: BudgetLimits, period: BudgetPeriod) -> Self {
        Self {
            store,
            limits,
            period,
            enabled: true,
            fail_mode: FailMode::default(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    pub fn period(&self) -> BudgetPeriod {
        self.period
    }

    fn key(&self, identity: &str, scope: Scope, now: DateTime<Utc>) -> SpendKey {
        SpendKey::new(identity, scope, self.period.window_start(now))
    }

    /// Check global, provider and model limits, in that order.
    ///
    /// Reads are not locked against concurrent recording; `record_spend`
    /// reports anything that slips through as an overrun.
    pub fn enforce(
        &self,
        identity: &str,
        provider: &str,
        model: Option<&str>,
    ) -> Result<Decision, BudgetError> {
        self.enforce_at(identity, provider, model, Utc::now())
    }

    pub fn enforce_at(
        &self,
        identity: &str,
        provider: &str,
        model: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Decision, BudgetError> {
        if !self.enabled {
            return Ok(Decision::Allow);
        }

        for scope in Scope::chain(provider, model) {
            let Some(limit) = self.limits.limit_for(&scope) else {
                continue;
            };
            let label = scope.to_string();
            let limit_type = scope.limit_type();
            let current = self.store.current_spend(&self.key(identity, scope, now))?;
            if current >= limit {
                return Ok(Decision::Deny(Denial {
                    limit_type,
                    scope: label,
                    limit,
                    current,
                    percentage_used: percentage(current, limit),
                }));
            }
        }
        Ok(Decision::Allow)
    }

    /// [`enforce`](Self::enforce) with the configured [`FailMode`] applied
    /// to spend store failures.
    pub fn enforce_with_fail_mode(
        &self,
        identity: &str,
        provider: &str,
        model: Option<&str>,
    ) -> Result<Decision, BudgetError> {
        match self.enforce(identity, provider, model) {
            Err(e) if e.is_store_failure() && self.fail_mode == FailMode::Open => {
                warn!(
                    "Budget check for {} on {} failed, allowing (fail-open): {}",
                    identity, provider, e
                );
                telemetry::record_spend_store_failure("enforce");
                Ok(Decision::Allow)
            }
            other => other,
        }
    }

    /// Charge `amount` to every scope of the call.
    ///
    /// Counters are incremented in check order. If one fails, the ones
    /// already incremented are compensated and the error is returned.
    /// Amounts that are not positive record nothing.
    pub fn record_spend(
        &self,
        identity: &str,
        provider: &str,
        model: Option<&str>,
        amount: Decimal,
    ) -> Result<SpendReceipt, BudgetError> {
        self.record_spend_at(identity, provider, model, amount, Utc::now())
    }

    pub fn record_spend_at(
        &self,
        identity: &str,
        provider: &str,
        model: Option<&str>,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<SpendReceipt, BudgetError> {
        if amount <= Decimal::ZERO {
            return Ok(SpendReceipt {
                amount: Decimal::ZERO,
                totals: Vec::new(),
                overrun: None,
            });
        }

        let mut applied: Vec<SpendKey> = Vec::new();
        let mut totals = Vec::new();
        for scope in Scope::chain(provider, model) {
            let key = self.key(identity, scope, now);
            match self.store.record_spend(&key, amount) {
                Ok(total) => {
                    let limit = self.limits.limit_for(&key.scope);
                    totals.push(ScopeStatus {
                        limit_type: key.scope.limit_type(),
                        scope: key.scope.to_string(),
                        current: total,
                        limit,
                        percentage_used: limit.and_then(|l| percentage(total, l)),
                    });
                    applied.push(key);
                }
                Err(e) => {
                    self.compensate(&applied, amount);
                    telemetry::record_spend_store_failure("record");
                    return Err(e.into());
                }
            }
        }

        let overrun = if self.enabled {
            totals
                .iter()
                .find_map(|s| match s.limit {
                    Some(limit) if s.current > limit => Some(Denial {
                        limit_type: s.limit_type,
                        scope: s.scope.clone(),
                        limit,
                        current: s.current,
                        percentage_used: s.percentage_used,
                    }),
                    _ => None,
                })
        } else {
            None
        };
        if let Some(denial) = &overrun {
            warn!("Spend by {} overran its budget: {}", identity, denial);
        }

        Ok(SpendReceipt {
            amount,
            totals,
            overrun,
        })
    }

    fn compensate(&self, applied: &[SpendKey], amount: Decimal) {
        for key in applied.iter().rev() {
            if let Err(e) = self.store.record_spend(key, -amount) {
                error!("Failed to roll back ${} on {}: {}", amount, key, e);
            }
        }
    }

    /// Current spend and limit of every scope of a call.
    pub fn status(
        &self,
        identity: &str,
        provider: &str,
        model: Option<&str>,
    ) -> Result<Vec<ScopeStatus>, BudgetError> {
        let now = Utc::now();
        Scope::chain(provider, model)
            .into_iter()
            .map(|scope| {
                let limit = self.limits.limit_for(&scope);
                let label = scope.to_string();
                let limit_type = scope.limit_type();
                let current = self.store.current_spend(&self.key(identity, scope, now))?;
                Ok(ScopeStatus {
                    limit_type,
                    scope: label,
                    current,
                    limit,
                    percentage_used: limit.and_then(|l| percentage(current, l)),
                })
            })
            .collect()
    }
}
