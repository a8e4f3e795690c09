use crate::models::customer::Customer;
use serde::{Deserialize, Serialize};

/// One decoded fetch of the customer endpoint. Never mutated after it is
/// installed; refreshes replace it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub id: String,
    pub generation: u64,
    pub fetched_at: i64,
    pub source_url: String,
    pub customers: Vec<Customer>,
}

impl DashboardSnapshot {
    pub fn new(generation: u64, source_url: String, customers: Vec<Customer>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            generation,
            fetched_at: chrono::Utc::now().timestamp(),
            source_url,
            customers,
        }
    }

    pub fn customer(&self, name: &str) -> Option<&Customer> {
        let wanted = name.trim();
        self.customers
            .iter()
            .find(|c| c.name == wanted)
            .or_else(|| self.customers.iter().find(|c| c.name.eq_ignore_ascii_case(wanted)))
    }

    /// Sum of the server-reported `total_runs` across customers.
    pub fn server_total_runs(&self) -> u64 {
        self.customers
            .iter()
            .filter_map(|c| c.total_runs)
            .fold(0, u64::saturating_add)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRecord {
    pub id: i64,
    pub refresh_id: String,
    pub timestamp: i64,
    pub trigger: String,
    pub outcome: String, // "ok" | "failed"
    pub customer_count: usize,
    pub total_runs: u64,
    pub error: Option<String>,
}
