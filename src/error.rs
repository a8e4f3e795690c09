use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("could not decode customer payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("customer payload reported success = false")]
    Rejected,
    #[error("No dashboard data available. Refresh first.")]
    NoSnapshot,
    #[error("Customer not found: {0}")]
    UnknownCustomer(String),
    #[error("Network not found: {network} (customer {customer})")]
    UnknownNetwork { customer: String, network: String },
    #[error("Invalid month: {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
    #[error("Settings error: {0}")]
    Settings(String),
    #[error("DB error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl DashboardError {
    /// Fetch failures that a previously loaded snapshot can cover for.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            DashboardError::Http { .. }
                | DashboardError::Status { .. }
                | DashboardError::Decode(_)
                | DashboardError::Rejected
        )
    }
}
