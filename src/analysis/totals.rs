use crate::analysis::dates::{YearMonth, NO_RUN};
use crate::analysis::reconcile::{reconcile_customer, reconcile_record, MonthOutcome};
use crate::models::customer::{Customer, Network, RunRecord, RunsField};
use crate::models::view::{Correction, MonthCell, NetworkRow};
use serde::{Deserialize, Serialize};

/// How a network's displayed total relates to its customer's total.
/// The customer-level figure is never altered by either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkTotalsPolicy {
    #[default]
    Independent,
    CapToCustomer,
}

impl NetworkTotalsPolicy {
    pub const NAMES: [&'static str; 2] = ["independent", "capToCustomer"];

    pub fn from_setting(raw: &str) -> Self {
        match raw {
            "capToCustomer" => NetworkTotalsPolicy::CapToCustomer,
            _ => NetworkTotalsPolicy::Independent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalRuns {
    pub value: u64,
    pub authoritative: bool,
}

/// Server-computed total. A numeric legacy `runs` field is server data too.
pub fn authoritative_total<R: RunRecord + ?Sized>(record: &R) -> Option<u64> {
    record.total_runs().or(match record.runs() {
        Some(RunsField::Count(count)) => Some(*count),
        _ => None,
    })
}

/// The server total when there is one; the client-derived figure otherwise.
pub fn resolve_total<R: RunRecord + ?Sized>(record: &R, derived: u64) -> TotalRuns {
    match authoritative_total(record) {
        Some(value) => TotalRuns { value, authoritative: true },
        None => TotalRuns { value: derived, authoritative: false },
    }
}

pub fn customer_month_cells(customer: &Customer, months: &[YearMonth]) -> Vec<MonthCell> {
    months
        .iter()
        .map(|ym| to_cell(*ym, &reconcile_customer(customer, *ym)))
        .collect()
}

pub fn network_month_cells(network: &Network, months: &[YearMonth]) -> Vec<MonthCell> {
    months
        .iter()
        .map(|ym| to_cell(*ym, &reconcile_record(network, *ym)))
        .collect()
}

pub fn derived_total(cells: &[MonthCell]) -> u64 {
    cells.iter().map(|c| c.count).fold(0, u64::saturating_add)
}

/// Display date of the most recent month with a run.
pub fn last_run_display(cells: &[MonthCell]) -> String {
    cells
        .iter()
        .rev()
        .find(|c| c.count > 0)
        .map(|c| c.display_date.clone())
        .unwrap_or_else(|| NO_RUN.to_string())
}

/// Row with the client-derived total; [`settle_network_total`] swaps in the
/// server figure.
pub fn network_row(network: &Network, months: &[YearMonth]) -> NetworkRow {
    let cells = network_month_cells(network, months);
    NetworkRow {
        name: network.name.clone(),
        display_name: network.display_label().to_string(),
        total_runs: derived_total(&cells),
        server_total_runs: authoritative_total(network),
        months: cells,
    }
}

pub fn settle_network_total(row: &mut NetworkRow) {
    if let Some(server) = row.server_total_runs {
        row.total_runs = server;
    }
}

pub fn apply_network_policy(policy: NetworkTotalsPolicy, customer_total: Option<u64>, rows: &mut [NetworkRow]) {
    let (NetworkTotalsPolicy::CapToCustomer, Some(cap)) = (policy, customer_total) else {
        return;
    };
    for row in rows {
        row.total_runs = row.total_runs.min(cap);
    }
}

/// Figures the grid would show if it trusted client-side counting over
/// `months`, next to the server's all-time numbers. Only reported; the server
/// figure is what renders.
pub fn find_corrections(customers: &[Customer], months: &[YearMonth]) -> Vec<Correction> {
    let mut corrections = Vec::new();

    for customer in customers {
        let derived = derived_total(&customer_month_cells(customer, months));
        let customer_server = authoritative_total(customer);
        if let Some(server) = customer_server {
            if derived != server {
                corrections.push(Correction {
                    customer: customer.name.clone(),
                    network: None,
                    field: "total_runs".to_string(),
                    client_value: derived,
                    authoritative_value: server,
                });
            }
        }

        let mut network_sum = 0u64;
        let mut all_networks_reported = !customer.networks.is_empty();
        for network in &customer.networks {
            let derived = derived_total(&network_month_cells(network, months));
            match authoritative_total(network) {
                Some(server) => {
                    network_sum = network_sum.saturating_add(server);
                    if derived != server {
                        corrections.push(Correction {
                            customer: customer.name.clone(),
                            network: Some(network.display_label().to_string()),
                            field: "total_runs".to_string(),
                            client_value: derived,
                            authoritative_value: server,
                        });
                    }
                }
                None => all_networks_reported = false,
            }
        }

        if let (true, Some(server)) = (all_networks_reported, customer_server) {
            if network_sum != server {
                corrections.push(Correction {
                    customer: customer.name.clone(),
                    network: None,
                    field: "network_sum".to_string(),
                    client_value: network_sum,
                    authoritative_value: server,
                });
            }
        }
    }

    corrections
}

fn to_cell(ym: YearMonth, outcome: &MonthOutcome) -> MonthCell {
    let summary = outcome.summary();
    MonthCell {
        year_month: ym,
        count: summary.count,
        display_date: summary.display_date,
    }
}
