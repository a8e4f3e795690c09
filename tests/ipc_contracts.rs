use runlens_lib::commands::dashboard::{
    fix_graphs_internal, force_month_update_internal, get_customer_month_chart_internal,
    get_network_month_run_dates_internal, manual_refresh_graphs_internal, refresh_graphs_internal,
    test_chart_table_alignment_internal,
    update_graphs_now_internal, DashboardCache, SharedCache,
};
use runlens_lib::commands::db::get_refresh_history;
use runlens_lib::commands::pipeline::RenderPipeline;
use runlens_lib::commands::poller::{poll_loop, PollEvent};
use runlens_lib::commands::settings::{get_settings, load_effective_dashboard_settings, save_settings};
use runlens_lib::error::DashboardError;
use runlens_lib::models::snapshot::DashboardSnapshot;
use runlens_lib::models::view::Freshness;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct StubServer {
    base_url: String,
    response: Arc<Mutex<(u16, String)>>,
}

impl StubServer {
    fn respond_with(&self, status: u16, body: &str) {
        *self.response.lock().expect("stub response lock") = (status, body.to_string());
    }
}

async fn spawn_stub(status: u16, body: &str) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub server");
    let addr = listener.local_addr().expect("stub address");
    let response = Arc::new(Mutex::new((status, body.to_string())));
    let shared = response.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let (status, body) = shared.lock().expect("stub response lock").clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let read = socket.read(&mut buf).await.unwrap_or(0);
                    if read == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..read]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let reason = if status == 200 { "OK" } else { "Error" };
                let reply = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    StubServer {
        base_url: format!("http://{addr}"),
        response,
    }
}

fn customers_payload() -> String {
    json!({
        "success": true,
        "customers": {
            "acme": {
                "name": "Acme",
                "total_runs": 40,
                "networks": [
                    { "name": "hq", "display_name": "Acme HQ", "total_runs": 30, "monthly_runs": { "2025-10": "2025-10-04" } },
                    { "name": "lab", "total_runs": 10, "monthly_runs": ["15-08", "13-10", "28-10"] }
                ]
            },
            "globex": { "total_runs": 2, "last_run_date": "2025-09-12" }
        }
    })
    .to_string()
}

async fn configured_data_dir(base_url: &str) -> (TempDir, String) {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let data_dir = temp_dir.path().to_string_lossy().to_string();
    save_settings(
        data_dir.clone(),
        json!({ "apiBaseUrl": base_url, "graphMonths": 3, "requestTimeoutSecs": 5 }),
    )
    .await
    .expect("save settings");
    (temp_dir, data_dir)
}

fn new_cache() -> SharedCache {
    Arc::new(Mutex::new(DashboardCache::default()))
}

#[tokio::test]
async fn pinned_month_view_prefers_server_totals() {
    let stub = spawn_stub(200, &customers_payload()).await;
    let (_tmp, data_dir) = configured_data_dir(&stub.base_url).await;
    let cache = new_cache();
    let pipeline = RenderPipeline::standard();

    let view = force_month_update_internal(&data_dir, &cache, &pipeline, Some(2025), Some(10))
        .await
        .expect("render pinned view");

    assert_eq!(view.freshness, Freshness::Fresh);
    assert_eq!(view.grid.len(), 2);

    let acme = &view.grid[0];
    assert_eq!(acme.customer, "Acme");
    assert_eq!(acme.total_runs, 40);
    assert!(acme.total_is_authoritative);
    assert_eq!(acme.last_run, "28-Oct-25");
    assert_eq!(acme.networks[0].display_name, "Acme HQ");
    assert_eq!(acme.networks[0].total_runs, 30);
    assert_eq!(acme.networks[1].total_runs, 10);

    let globex = &view.grid[1];
    assert_eq!(globex.customer, "globex");
    assert_eq!(globex.total_runs, 2);
    assert_eq!(globex.months[1].display_date, "12-Sep-25");
    assert_eq!(globex.months[2].display_date, "-");

    let runs: Vec<u64> = view.tracking_graph.points.iter().map(|p| p.runs).collect();
    assert_eq!(runs, vec![1, 1, 3]);
    assert!(view.tracking_graph.svg.is_some());
}

#[tokio::test]
async fn invalid_pinned_month_is_rejected_before_fetching() {
    let stub = spawn_stub(200, &customers_payload()).await;
    let (_tmp, data_dir) = configured_data_dir(&stub.base_url).await;
    let cache = new_cache();

    let result = force_month_update_internal(&data_dir, &cache, &RenderPipeline::standard(), Some(2025), Some(0)).await;
    assert!(matches!(result, Err(DashboardError::InvalidMonth { month: 0, .. })));
    assert!(cache.lock().expect("cache lock").current().is_none());
}

#[tokio::test]
async fn fix_graphs_reports_corrections_without_touching_server_totals() {
    let stub = spawn_stub(200, &customers_payload()).await;
    let (_tmp, data_dir) = configured_data_dir(&stub.base_url).await;
    let cache = new_cache();

    let report = fix_graphs_internal(&data_dir, &cache, &RenderPipeline::standard())
        .await
        .expect("fix graphs");

    let acme_total = report
        .corrections
        .iter()
        .find(|c| c.customer == "Acme" && c.network.is_none() && c.field == "total_runs")
        .expect("acme total correction");
    assert_eq!(acme_total.authoritative_value, 40);
    assert!(acme_total.client_value < 40);
    assert!(!report.corrections.iter().any(|c| c.field == "network_sum"));
    assert_eq!(report.view.grid[0].total_runs, 40);
    assert_eq!(report.window_end, report.view.reference_month);
    assert_eq!(report.window_start, report.view.tracking_graph.points[0].year_month);
}

#[tokio::test]
async fn chart_and_grid_stay_aligned() {
    let stub = spawn_stub(200, &customers_payload()).await;
    let (_tmp, data_dir) = configured_data_dir(&stub.base_url).await;
    let cache = new_cache();

    let report = test_chart_table_alignment_internal(&data_dir, &cache, &RenderPipeline::standard())
        .await
        .expect("alignment check");
    assert!(report.aligned);
    assert_eq!(report.months.len(), 3);
}

#[tokio::test]
async fn refresh_commands_record_their_trigger() {
    let stub = spawn_stub(200, &customers_payload()).await;
    let (_tmp, data_dir) = configured_data_dir(&stub.base_url).await;
    let cache = new_cache();
    let pipeline = RenderPipeline::standard();

    let graph = refresh_graphs_internal(&data_dir, &cache, &pipeline)
        .await
        .expect("refresh graphs");
    assert_eq!(graph.points.len(), 3);
    assert!(graph.svg.is_some());

    let view = manual_refresh_graphs_internal(&data_dir, &cache, &pipeline)
        .await
        .expect("manual refresh");
    assert_eq!(view.freshness, Freshness::Fresh);

    let history = get_refresh_history(data_dir.clone(), Some(10)).await.expect("history");
    let triggers: Vec<&str> = history.iter().map(|r| r.trigger.as_str()).collect();
    assert_eq!(triggers, vec!["manual", "refresh_graphs"]);
    assert_eq!(cache.lock().expect("cache lock").current().map(|s| s.generation), Some(2));
}

#[tokio::test]
async fn lookups_read_the_installed_snapshot() {
    let stub = spawn_stub(200, &customers_payload()).await;
    let (_tmp, data_dir) = configured_data_dir(&stub.base_url).await;
    let cache = new_cache();
    let pipeline = RenderPipeline::standard();

    update_graphs_now_internal(&data_dir, &cache, &pipeline)
        .await
        .expect("initial refresh");

    let dates = get_network_month_run_dates_internal(&cache, "acme", "lab", 2025, 10).expect("run dates");
    assert_eq!(dates, vec!["13-Oct-25".to_string(), "28-Oct-25".to_string()]);

    let unknown = get_network_month_run_dates_internal(&cache, "Acme", "edge", 2025, 10);
    assert!(matches!(unknown, Err(DashboardError::UnknownNetwork { .. })));

    let chart = get_customer_month_chart_internal(&data_dir, &cache, &pipeline, "Acme", Some(2025))
        .expect("month chart");
    assert_eq!(chart.total_runs, Some(40));
    assert_eq!(chart.totals[7].display_date, "15-Aug-25");
    assert_eq!(chart.totals[9].count, 3);
    assert!(chart.svg.is_some());
}

#[tokio::test]
async fn failed_fetch_falls_back_to_stale_snapshot() {
    let stub = spawn_stub(200, &customers_payload()).await;
    let (_tmp, data_dir) = configured_data_dir(&stub.base_url).await;
    let pipeline = RenderPipeline::standard();

    let cache = new_cache();
    update_graphs_now_internal(&data_dir, &cache, &pipeline)
        .await
        .expect("initial refresh");

    stub.respond_with(500, "{}");
    let stale = update_graphs_now_internal(&data_dir, &cache, &pipeline)
        .await
        .expect("stale view from cache");
    assert!(matches!(stale.freshness, Freshness::Stale { .. }));
    assert_eq!(stale.grid.len(), 2);

    // A fresh process has only the persisted payload to fall back on.
    let restarted = new_cache();
    let restored = update_graphs_now_internal(&data_dir, &restarted, &pipeline)
        .await
        .expect("stale view from history");
    assert!(matches!(restored.freshness, Freshness::Stale { .. }));
    assert_eq!(restored.grid[0].total_runs, 40);

    let history = get_refresh_history(data_dir.clone(), None).await.expect("history");
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].outcome, "failed");
    assert_eq!(history[2].outcome, "ok");
    assert_eq!(history[2].customer_count, 2);
    assert_eq!(history[2].total_runs, 42);
}

#[tokio::test]
async fn unresponsive_endpoint_hits_the_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind silent server");
    let addr = listener.local_addr().expect("silent address");
    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            open.push(socket);
        }
    });

    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let data_dir = temp_dir.path().to_string_lossy().to_string();
    save_settings(
        data_dir.clone(),
        json!({ "apiBaseUrl": format!("http://{addr}"), "requestTimeoutSecs": 1 }),
    )
    .await
    .expect("save settings");

    let cache = new_cache();
    let pipeline = RenderPipeline::standard();
    for _ in 0..2 {
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            update_graphs_now_internal(&data_dir, &cache, &pipeline),
        )
        .await
        .expect("request timeout fires before the test deadline");
        assert!(matches!(result, Err(DashboardError::Http { .. })));
    }
}

#[tokio::test]
async fn fetch_errors_propagate_without_any_snapshot() {
    let stub = spawn_stub(500, "{}").await;
    let (_tmp, data_dir) = configured_data_dir(&stub.base_url).await;

    let result = update_graphs_now_internal(&data_dir, &new_cache(), &RenderPipeline::standard()).await;
    assert!(matches!(result, Err(DashboardError::Status { status: 500, .. })));

    stub.respond_with(200, r#"{"success": false, "customers": {}}"#);
    let rejected = update_graphs_now_internal(&data_dir, &new_cache(), &RenderPipeline::standard()).await;
    assert!(matches!(rejected, Err(DashboardError::Rejected)));
}

#[test]
fn late_response_for_older_ticket_does_not_replace_newer_snapshot() {
    let cache = new_cache();
    let (older, newer) = {
        let mut guard = cache.lock().expect("cache lock");
        (guard.issue_ticket(), guard.issue_ticket())
    };

    let mut guard = cache.lock().expect("cache lock");
    guard.install(DashboardSnapshot::new(newer, "http://stub/newer".to_string(), Vec::new()));
    let installed = guard.install(DashboardSnapshot::new(older, "http://stub/older".to_string(), Vec::new()));

    assert_eq!(installed.generation, newer);
    assert_eq!(installed.source_url, "http://stub/newer");
}

#[tokio::test]
async fn settings_round_trip_clamps_refresh_interval() {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let data_dir = temp_dir.path().to_string_lossy().to_string();

    let initial = get_settings(data_dir.clone()).await.expect("load settings");
    assert_eq!(initial["refreshIntervalSecs"], json!(10));
    assert_eq!(initial["networkTotalsPolicy"], json!("independent"));

    let saved = save_settings(
        data_dir.clone(),
        json!({ "refreshIntervalSecs": 90, "networkTotalsPolicy": "capToCustomer" }),
    )
    .await
    .expect("save settings");
    assert_eq!(saved["refreshIntervalSecs"], json!(30));

    let reloaded = get_settings(data_dir.clone()).await.expect("reload settings");
    assert_eq!(reloaded, saved);

    let effective = load_effective_dashboard_settings(&data_dir).expect("effective settings");
    assert_eq!(effective.refresh_interval_secs, 30);
    assert!(temp_dir.path().join("settings.json").exists());
}

#[tokio::test]
async fn poller_emits_update_on_first_tick() {
    let stub = spawn_stub(200, &customers_payload()).await;
    let (_tmp, data_dir) = configured_data_dir(&stub.base_url).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let task = tokio::spawn(poll_loop(
        data_dir,
        new_cache(),
        Arc::new(RenderPipeline::standard()),
        Duration::from_secs(3600),
        move |event| {
            let _ = tx.send(event);
        },
    ));

    let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("poller tick")
        .expect("poll event");
    task.abort();

    match event {
        PollEvent::Updated(view) => {
            assert_eq!(view.freshness, Freshness::Fresh);
            assert_eq!(view.grid.len(), 2);
        }
        PollEvent::Failed(error) => panic!("unexpected refresh failure: {error}"),
    }
}
