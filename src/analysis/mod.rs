pub mod alignment;
pub mod dates;
pub mod reconcile;
pub mod svg;
pub mod totals;
