pub mod analysis;
pub mod commands;
pub mod error;
pub mod models;

use commands::{
    dashboard::{
        fix_graphs, force_month_update, get_customer_month_chart, get_network_month_run_dates,
        manual_refresh_graphs, refresh_graphs, test_chart_table_alignment, update_graphs_now,
        DashboardCache,
    },
    db::get_refresh_history,
    pipeline::RenderPipeline,
    poller::{start_auto_refresh, stop_auto_refresh, AutoRefresh},
    settings::{get_settings, save_settings},
};
use std::sync::{Arc, Mutex};

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();

    let pipeline = RenderPipeline::standard();
    log::info!("View layers: {}", pipeline.layer_names().join(", "));

    tauri::Builder::default()
        .manage(Arc::new(Mutex::new(DashboardCache::default())))
        .manage(Arc::new(pipeline))
        .manage(Arc::new(AutoRefresh::default()))
        .invoke_handler(tauri::generate_handler![
            update_graphs_now,
            refresh_graphs,
            fix_graphs,
            manual_refresh_graphs,
            force_month_update,
            test_chart_table_alignment,
            get_network_month_run_dates,
            get_customer_month_chart,
            get_settings,
            save_settings,
            get_refresh_history,
            start_auto_refresh,
            stop_auto_refresh,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
