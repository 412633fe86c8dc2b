//! Spend budgets per identity.
//!
//! Limits apply at three scopes checked in a fixed order (global, provider,
//! model) over a period window. Counters live behind [`SpendStore`]; the
//! in-memory [`SpendLedger`] is the default implementation.

mod enforcer;
mod limits;
mod scope;
mod store;

pub use enforcer::{BudgetEnforcer, Decision, Denial, FailMode, ScopeStatus, SpendReceipt};
pub use limits::{BudgetLimits, BudgetPeriod, PeriodWindow};
pub use scope::{LimitType, Scope, SpendKey};
pub use store::{SpendLedger, SpendStore};
