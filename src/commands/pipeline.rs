use crate::analysis::dates::YearMonth;
use crate::analysis::svg::{render_month_chart, render_tracking_graph};
use crate::analysis::totals::{
    apply_network_policy, authoritative_total, customer_month_cells, derived_total, last_run_display,
    network_month_cells, network_row, resolve_total, settle_network_total, NetworkTotalsPolicy,
};
use crate::error::DashboardError;
use crate::models::snapshot::DashboardSnapshot;
use crate::models::view::{
    CustomerGridRow, CustomerMonthChart, DashboardView, Freshness, GraphPoint, TrackingGraph,
};

#[derive(Debug, Clone, Copy)]
pub struct LayerContext {
    pub reference_month: YearMonth,
    pub graph_months: usize,
    pub policy: NetworkTotalsPolicy,
}

impl LayerContext {
    pub fn window(&self) -> Vec<YearMonth> {
        self.reference_month.window_ending(self.graph_months)
    }
}

/// Post-processing step over a freshly built view. Layers are composed once
/// at startup and run in registration order.
pub trait ViewLayer: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, view: &mut DashboardView, snapshot: &DashboardSnapshot, ctx: &LayerContext);

    fn apply_chart(&self, _chart: &mut CustomerMonthChart, _snapshot: &DashboardSnapshot, _ctx: &LayerContext) {}
}

/// Replaces client-derived totals with the server's `total_runs`.
pub struct AuthoritativeTotals;

impl ViewLayer for AuthoritativeTotals {
    fn name(&self) -> &'static str {
        "authoritative_totals"
    }

    fn apply(&self, view: &mut DashboardView, snapshot: &DashboardSnapshot, _ctx: &LayerContext) {
        for row in &mut view.grid {
            let Some(customer) = snapshot.customer(&row.customer) else {
                continue;
            };
            let total = resolve_total(customer, row.total_runs);
            if total.value != row.total_runs {
                log::debug!(
                    "{}: showing server total {} instead of derived {}",
                    row.customer,
                    total.value,
                    row.total_runs
                );
            }
            row.total_runs = total.value;
            row.total_is_authoritative = total.authoritative;
            row.networks.iter_mut().for_each(settle_network_total);
        }
    }

    fn apply_chart(&self, chart: &mut CustomerMonthChart, snapshot: &DashboardSnapshot, _ctx: &LayerContext) {
        chart.total_runs = snapshot.customer(&chart.customer).and_then(authoritative_total);
        chart.networks.iter_mut().for_each(settle_network_total);
    }
}

/// Applies the configured network totals policy.
pub struct NetworkTotals;

impl ViewLayer for NetworkTotals {
    fn name(&self) -> &'static str {
        "network_totals"
    }

    fn apply(&self, view: &mut DashboardView, _snapshot: &DashboardSnapshot, ctx: &LayerContext) {
        for row in &mut view.grid {
            let customer_total = row.total_is_authoritative.then_some(row.total_runs);
            apply_network_policy(ctx.policy, customer_total, &mut row.networks);
        }
    }

    fn apply_chart(&self, chart: &mut CustomerMonthChart, _snapshot: &DashboardSnapshot, ctx: &LayerContext) {
        apply_network_policy(ctx.policy, chart.total_runs, &mut chart.networks);
    }
}

pub struct InlineSvg;

impl ViewLayer for InlineSvg {
    fn name(&self) -> &'static str {
        "inline_svg"
    }

    fn apply(&self, view: &mut DashboardView, _snapshot: &DashboardSnapshot, _ctx: &LayerContext) {
        view.tracking_graph.svg = Some(render_tracking_graph(&view.tracking_graph));
    }

    fn apply_chart(&self, chart: &mut CustomerMonthChart, _snapshot: &DashboardSnapshot, _ctx: &LayerContext) {
        chart.svg = Some(render_month_chart(chart));
    }
}

#[derive(Default)]
pub struct RenderPipeline {
    layers: Vec<Box<dyn ViewLayer>>,
}

impl RenderPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server totals, then the network policy, then SVG.
    pub fn standard() -> Self {
        Self::new()
            .with_layer(AuthoritativeTotals)
            .with_layer(NetworkTotals)
            .with_layer(InlineSvg)
    }

    pub fn with_layer<L: ViewLayer + 'static>(mut self, layer: L) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    pub fn build_view(&self, snapshot: &DashboardSnapshot, ctx: &LayerContext, freshness: Freshness) -> DashboardView {
        let mut view = base_view(snapshot, ctx, freshness);
        for layer in &self.layers {
            layer.apply(&mut view, snapshot, ctx);
        }
        view
    }

    pub fn build_month_chart(
        &self,
        snapshot: &DashboardSnapshot,
        customer_name: &str,
        year: i32,
        ctx: &LayerContext,
    ) -> Result<CustomerMonthChart, DashboardError> {
        let customer = snapshot
            .customer(customer_name)
            .ok_or_else(|| DashboardError::UnknownCustomer(customer_name.to_string()))?;
        let months = YearMonth::calendar_year(year);

        let mut chart = CustomerMonthChart {
            customer: customer.name.clone(),
            year,
            total_runs: None,
            networks: customer.networks.iter().map(|n| network_row(n, &months)).collect(),
            totals: customer_month_cells(customer, &months),
            svg: None,
        };
        for layer in &self.layers {
            layer.apply_chart(&mut chart, snapshot, ctx);
        }
        Ok(chart)
    }
}

fn base_view(snapshot: &DashboardSnapshot, ctx: &LayerContext, freshness: Freshness) -> DashboardView {
    let window = ctx.window();

    let grid: Vec<CustomerGridRow> = snapshot
        .customers
        .iter()
        .map(|customer| {
            let months = customer_month_cells(customer, &window);
            CustomerGridRow {
                customer: customer.name.clone(),
                total_runs: derived_total(&months),
                total_is_authoritative: false,
                network_count: customer.networks.len(),
                last_run: last_run_display(&months),
                networks: customer.networks.iter().map(|n| network_row(n, &window)).collect(),
                months,
            }
        })
        .collect();

    DashboardView {
        snapshot_id: snapshot.id.clone(),
        fetched_at: snapshot.fetched_at,
        reference_month: ctx.reference_month,
        freshness,
        tracking_graph: TrackingGraph {
            points: tracking_points(snapshot, &window),
            svg: None,
        },
        grid,
    }
}

/// Chart series counted network by network. A customer's own record feeds
/// it only when the customer has no networks.
fn tracking_points(snapshot: &DashboardSnapshot, window: &[YearMonth]) -> Vec<GraphPoint> {
    let per_customer: Vec<Vec<u64>> = snapshot
        .customers
        .iter()
        .map(|customer| {
            if customer.networks.is_empty() {
                return customer_month_cells(customer, window).iter().map(|c| c.count).collect();
            }
            let mut sums = vec![0u64; window.len()];
            for network in &customer.networks {
                for (sum, cell) in sums.iter_mut().zip(network_month_cells(network, window)) {
                    *sum = sum.saturating_add(cell.count);
                }
            }
            sums
        })
        .collect();

    window
        .iter()
        .enumerate()
        .map(|(index, ym)| {
            let counts = per_customer.iter().map(|series| series[index]);
            GraphPoint {
                year_month: *ym,
                label: ym.label(),
                runs: counts.clone().fold(0, u64::saturating_add),
                active_customers: counts.filter(|count| *count > 0).count(),
            }
        })
        .collect()
}
