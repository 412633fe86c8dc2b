use thiserror::Error;

/// Problems building or querying the provider registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("failed to load provider definitions from {source_name}: {reason}")]
    Load { source_name: String, reason: String },

    #[error("duplicate provider slug `{0}`")]
    DuplicateProvider(String),

    #[error("provider `{provider}` declares handler `{handler}` twice")]
    DuplicateHandler { provider: String, handler: String },

    #[error("provider `{provider}`: priority list must name every handler exactly once ({detail})")]
    InvalidPriority { provider: String, detail: String },

    #[error("provider `{provider}`: handler `{handler}` has a shape matcher that requires nothing")]
    EmptyShape { provider: String, handler: String },

    #[error("provider `{provider}`: handlers `{first}` and `{second}` claim the same endpoints with identical shapes")]
    AmbiguousHandlers {
        provider: String,
        first: String,
        second: String,
    },

    #[error("no provider registered for host `{0}`")]
    NoProvider(String),
}

/// Failures of the spend store collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpendStoreError {
    #[error("spend store unavailable: {0}")]
    Unavailable(String),

    #[error("spend store rejected `{key}`: {reason}")]
    Rejected { key: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BudgetError {
    #[error(transparent)]
    SpendStore(#[from] SpendStoreError),
}

impl BudgetError {
    pub fn is_store_failure(&self) -> bool {
        matches!(self, BudgetError::SpendStore(_))
    }
}
