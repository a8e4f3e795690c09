use crate::models::view::{AlignmentReport, AlignmentRow, CustomerGridRow, TrackingGraph};

/// Compares each month of the tracking graph with the column sum of the
/// customer grid for the same month.
pub fn check_alignment(graph: &TrackingGraph, grid: &[CustomerGridRow]) -> AlignmentReport {
    let months: Vec<AlignmentRow> = graph
        .points
        .iter()
        .map(|point| {
            let table: u64 = grid
                .iter()
                .flat_map(|row| row.months.iter())
                .filter(|cell| cell.year_month == point.year_month)
                .map(|cell| cell.count)
                .fold(0, u64::saturating_add);
            AlignmentRow {
                year_month: point.year_month,
                label: point.label.clone(),
                chart: point.runs,
                table,
                aligned: point.runs == table,
            }
        })
        .collect();

    let aligned = months.iter().all(|row| row.aligned);
    if !aligned {
        for row in months.iter().filter(|row| !row.aligned) {
            log::warn!(
                "Chart/table mismatch for {}: chart={} table={}",
                row.year_month,
                row.chart,
                row.table
            );
        }
    }

    AlignmentReport { aligned, months }
}
