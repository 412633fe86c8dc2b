//! LLM call instrumentation core.
//!
//! Recognizes provider responses by host, path and shape, reconstructs
//! streamed responses, prices calls and enforces spend budgets. The HTTP
//! layer feeds [`processor::ExchangeProcessor`] one captured exchange at a
//! time.

pub mod budget;
pub mod errors;
pub mod json_path;
pub mod pricing;
pub mod processor;
pub mod providers;
pub mod settings;
pub mod streaming;
pub mod telemetry;

pub use errors::{BudgetError, RegistryError, SpendStoreError};
pub use processor::{CallOutcome, CallReport, CapturedExchange, CapturedResponse, ExchangeProcessor};
