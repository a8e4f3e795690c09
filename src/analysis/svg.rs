use crate::models::view::{CustomerMonthChart, TrackingGraph};
use std::fmt::Write;

const WIDTH: u32 = 720;
const HEIGHT: u32 = 240;
const MARGIN: u32 = 32;
const BAR_COLOR: &str = "#3b82f6";
const IDLE_COLOR: &str = "#e5e7eb";

/// Bar chart of runs per month for the `tracking-graph` element.
pub fn render_tracking_graph(graph: &TrackingGraph) -> String {
    let bars: Vec<(String, u64)> = graph
        .points
        .iter()
        .map(|p| (p.label.clone(), p.runs))
        .collect();
    render_bars("tracking-graph", "Runs per month", &bars)
}

/// Bar chart of a customer's monthly totals for `customer-month-chart`.
pub fn render_month_chart(chart: &CustomerMonthChart) -> String {
    let bars: Vec<(String, u64)> = chart
        .totals
        .iter()
        .map(|cell| (cell.year_month.label(), cell.count))
        .collect();
    let title = format!("{} {}", chart.customer, chart.year);
    render_bars("customer-month-chart", &title, &bars)
}

fn render_bars(id: &str, title: &str, bars: &[(String, u64)]) -> String {
    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" id="{}-svg" viewBox="0 0 {WIDTH} {HEIGHT}" role="img" aria-label="{}">"#,
        escape(id),
        escape(title)
    );
    let _ = write!(
        svg,
        r#"<text x="{MARGIN}" y="18" font-size="13" font-weight="600">{}</text>"#,
        escape(title)
    );

    if bars.is_empty() {
        svg.push_str("</svg>");
        return svg;
    }

    let max = bars.iter().map(|(_, v)| *v).max().unwrap_or(0).max(1);
    let plot_height = HEIGHT - 2 * MARGIN;
    let slot = (WIDTH - 2 * MARGIN) / bars.len() as u32;
    let bar_width = (slot * 7 / 10).max(1);

    for (index, (label, value)) in bars.iter().enumerate() {
        let bar_height = if *value == 0 {
            2
        } else {
            ((*value as f64 / max as f64) * plot_height as f64).round().max(2.0) as u32
        };
        let x = MARGIN + index as u32 * slot + slot.saturating_sub(bar_width) / 2;
        let y = HEIGHT - MARGIN - bar_height;
        let color = if *value == 0 { IDLE_COLOR } else { BAR_COLOR };

        let _ = write!(
            svg,
            r#"<rect x="{x}" y="{y}" width="{bar_width}" height="{bar_height}" fill="{color}"><title>{}: {value}</title></rect>"#,
            escape(label)
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-size="10" text-anchor="middle">{value}</text>"#,
            x + bar_width / 2,
            y.saturating_sub(4)
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-size="10" text-anchor="middle">{}</text>"#,
            x + bar_width / 2,
            HEIGHT - MARGIN + 14,
            escape(label)
        );
    }

    svg.push_str("</svg>");
    svg
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
