use crate::analysis::dates::YearMonth;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthCell {
    pub year_month: YearMonth,
    pub count: u64,
    pub display_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPoint {
    pub year_month: YearMonth,
    pub label: String,
    pub runs: u64,
    pub active_customers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingGraph {
    pub points: Vec<GraphPoint>,
    pub svg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRow {
    pub name: String,
    pub display_name: String,
    /// Figure shown in the grid, after the network totals policy.
    pub total_runs: u64,
    pub server_total_runs: Option<u64>,
    pub months: Vec<MonthCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerGridRow {
    pub customer: String,
    pub total_runs: u64,
    pub total_is_authoritative: bool,
    pub network_count: usize,
    pub last_run: String,
    pub months: Vec<MonthCell>,
    pub networks: Vec<NetworkRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerMonthChart {
    pub customer: String,
    pub year: i32,
    pub total_runs: Option<u64>,
    pub networks: Vec<NetworkRow>,
    pub totals: Vec<MonthCell>,
    pub svg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardView {
    pub snapshot_id: String,
    pub fetched_at: i64,
    pub reference_month: YearMonth,
    pub freshness: Freshness,
    pub tracking_graph: TrackingGraph,
    pub grid: Vec<CustomerGridRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub customer: String,
    pub network: Option<String>,
    pub field: String, // "total_runs" | "network_sum"
    pub client_value: u64,
    pub authoritative_value: u64,
}

/// Client values in `corrections` are counted over `window_start..=window_end`
/// only; the authoritative values are all-time server totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReport {
    pub view: DashboardView,
    pub window_start: YearMonth,
    pub window_end: YearMonth,
    pub corrections: Vec<Correction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentRow {
    pub year_month: YearMonth,
    pub label: String,
    pub chart: u64,
    pub table: u64,
    pub aligned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub aligned: bool,
    pub months: Vec<AlignmentRow>,
}
