use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Payload of `GET /api/customer-dashboard/customers/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub customers: BTreeMap<String, Customer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub total_runs: Option<u64>,
    #[serde(default)]
    pub runs: Option<RunsField>,
    #[serde(default)]
    pub monthly_runs: Option<MonthlyRuns>,
    #[serde(default)]
    pub last_run_date: Option<String>,
    #[serde(default)]
    pub networks: Vec<Network>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub runs: Option<RunsField>,
    #[serde(default)]
    pub total_runs: Option<u64>,
    #[serde(default)]
    pub monthly_runs: Option<MonthlyRuns>,
    #[serde(default)]
    pub last_run_date: Option<String>,
}

/// Legacy `runs` field: a plain count on newer payloads, a monthly record on older ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunsField {
    Count(u64),
    Monthly(MonthlyRuns),
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MonthlyRuns {
    /// `months[i]` with `i = month - 1`, or a flat list of run dates.
    Indexed(Vec<RunSlot>),
    /// Keyed by `YYYY-MM`, `DD-MM` or `YYYY-MM-DD`.
    Keyed(BTreeMap<String, RunSlot>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunSlot {
    #[default]
    Empty,
    Count(u64),
    Text(String),
    Other(serde_json::Value),
}

/// Field access shared by customers and networks so the reconciler can
/// treat both the same way.
pub trait RunRecord {
    fn label(&self) -> &str;
    fn total_runs(&self) -> Option<u64>;
    fn runs(&self) -> Option<&RunsField>;
    fn monthly_runs(&self) -> Option<&MonthlyRuns>;
    fn last_run_date(&self) -> Option<&str>;
}

impl RunRecord for Customer {
    fn label(&self) -> &str {
        &self.name
    }

    fn total_runs(&self) -> Option<u64> {
        self.total_runs
    }

    fn runs(&self) -> Option<&RunsField> {
        self.runs.as_ref()
    }

    fn monthly_runs(&self) -> Option<&MonthlyRuns> {
        self.monthly_runs.as_ref()
    }

    fn last_run_date(&self) -> Option<&str> {
        self.last_run_date.as_deref()
    }
}

impl RunRecord for Network {
    fn label(&self) -> &str {
        self.display_label()
    }

    fn total_runs(&self) -> Option<u64> {
        self.total_runs
    }

    fn runs(&self) -> Option<&RunsField> {
        self.runs.as_ref()
    }

    fn monthly_runs(&self) -> Option<&MonthlyRuns> {
        self.monthly_runs.as_ref()
    }

    fn last_run_date(&self) -> Option<&str> {
        self.last_run_date.as_deref()
    }
}

impl Customer {
    /// Matches a network by key, then by display name.
    pub fn network(&self, name: &str) -> Option<&Network> {
        let wanted = name.trim();
        self.networks
            .iter()
            .find(|n| n.name == wanted)
            .or_else(|| self.networks.iter().find(|n| n.display_label() == wanted))
    }
}

impl Network {
    pub fn display_label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(display) if !display.trim().is_empty() => display,
            _ => &self.name,
        }
    }
}

impl DashboardResponse {
    /// Customers keyed by their resolved name; the map key stands in when
    /// the payload omits `name`.
    pub fn into_named_customers(self) -> Vec<Customer> {
        let mut customers: Vec<Customer> = self
            .customers
            .into_iter()
            .map(|(key, mut customer)| {
                if customer.name.trim().is_empty() {
                    customer.name = key;
                }
                customer
            })
            .collect();
        customers.sort_by(|a, b| a.name.cmp(&b.name));
        customers
    }
}
