use crate::analysis::alignment::check_alignment;
use crate::analysis::dates::YearMonth;
use crate::analysis::reconcile::network_month_run_dates;
use crate::analysis::totals::find_corrections;
use crate::commands::db;
use crate::commands::pipeline::{LayerContext, RenderPipeline};
use crate::commands::settings::{load_effective_dashboard_settings, EffectiveDashboardSettings};
use crate::error::DashboardError;
use crate::models::customer::{Customer, DashboardResponse};
use crate::models::snapshot::DashboardSnapshot;
use crate::models::view::{
    AlignmentReport, CustomerMonthChart, DashboardView, FixReport, Freshness, TrackingGraph,
};
use chrono::Datelike;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub type SharedCache = Arc<Mutex<DashboardCache>>;

/// Installed snapshot, the last issued fetch ticket and the HTTP client
/// shared by every fetch.
#[derive(Debug, Default)]
pub struct DashboardCache {
    snapshot: Option<Arc<DashboardSnapshot>>,
    issued: u64,
    http: Option<reqwest::Client>,
}

impl DashboardCache {
    /// Built on first use, then reused. Clones share one connection pool.
    pub fn http_client(&mut self) -> Result<reqwest::Client, reqwest::Error> {
        if let Some(client) = &self.http {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder().build()?;
        self.http = Some(client.clone());
        Ok(client)
    }

    pub fn issue_ticket(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    pub fn current(&self) -> Option<Arc<DashboardSnapshot>> {
        self.snapshot.clone()
    }

    /// Installs `snapshot` unless a newer generation is already in place.
    /// Returns whatever is installed afterwards.
    pub fn install(&mut self, snapshot: DashboardSnapshot) -> Arc<DashboardSnapshot> {
        match &self.snapshot {
            Some(installed) if installed.generation >= snapshot.generation => {
                log::debug!(
                    "Discarding snapshot generation {} (installed {})",
                    snapshot.generation,
                    installed.generation
                );
                installed.clone()
            }
            _ => {
                let snapshot = Arc::new(snapshot);
                self.snapshot = Some(snapshot.clone());
                snapshot
            }
        }
    }
}

pub(crate) fn lock_cache(cache: &SharedCache) -> MutexGuard<'_, DashboardCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Refreshed {
    pub snapshot: Arc<DashboardSnapshot>,
    pub freshness: Freshness,
    pub settings: EffectiveDashboardSettings,
}

pub struct Rendered {
    pub snapshot: Arc<DashboardSnapshot>,
    pub ctx: LayerContext,
    pub view: DashboardView,
}

pub async fn fetch_customers(
    client: &reqwest::Client,
    url: &str,
    timeout_secs: u64,
) -> Result<Vec<Customer>, DashboardError> {
    let http_error = |source| DashboardError::Http {
        url: url.to_string(),
        source,
    };

    let response = client
        .get(url)
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(http_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(DashboardError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(http_error)?;
    let payload: DashboardResponse = serde_json::from_str(&body)?;
    if !payload.success {
        return Err(DashboardError::Rejected);
    }
    Ok(payload.into_named_customers())
}

/// Fetches the customer endpoint and installs the result. When the fetch
/// fails, the installed or last persisted snapshot is returned as stale.
pub async fn refresh_snapshot(
    data_dir: &str,
    cache: &SharedCache,
    trigger: &str,
) -> Result<Refreshed, DashboardError> {
    let settings = load_effective_dashboard_settings(data_dir).map_err(DashboardError::Settings)?;
    let url = settings.customers_url();
    let (ticket, client) = {
        let mut guard = lock_cache(cache);
        (guard.issue_ticket(), guard.http_client())
    };

    log::info!("Refreshing dashboard ({trigger}, ticket {ticket}) from {url}");
    let fetched = match client {
        Ok(client) => fetch_customers(&client, &url, settings.request_timeout_secs).await,
        Err(source) => Err(DashboardError::Http {
            url: url.clone(),
            source,
        }),
    };

    match fetched {
        Ok(customers) => {
            let snapshot = DashboardSnapshot::new(ticket, url, customers);
            let installed = install_fetched(data_dir, cache, trigger, snapshot, settings.history_retention);
            Ok(Refreshed {
                snapshot: installed,
                freshness: Freshness::Fresh,
                settings,
            })
        }
        Err(e) if e.is_fetch_failure() => {
            log::warn!("Dashboard refresh failed: {e}");
            persist_failure(data_dir, trigger, &url, &e.to_string(), settings.history_retention);

            let installed = lock_cache(cache).current();
            let fallback = installed.or_else(|| {
                load_persisted_snapshot(data_dir).map(|stored| lock_cache(cache).install(stored))
            });
            match fallback {
                Some(snapshot) => Ok(Refreshed {
                    snapshot,
                    freshness: Freshness::Stale { reason: e.to_string() },
                    settings,
                }),
                None => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// Installs a fetched snapshot and records it in history only when it was
/// not superseded, so the persisted fallback follows generation order too.
fn install_fetched(
    data_dir: &str,
    cache: &SharedCache,
    trigger: &str,
    snapshot: DashboardSnapshot,
    retention: u32,
) -> Arc<DashboardSnapshot> {
    let (fetched_id, generation) = (snapshot.id.clone(), snapshot.generation);
    let installed = lock_cache(cache).install(snapshot);
    if installed.id == fetched_id {
        persist_success(data_dir, trigger, &installed, retention);
        log::info!(
            "Installed snapshot {} with {} customers",
            installed.id,
            installed.customers.len()
        );
    } else {
        log::info!(
            "Response for ticket {generation} superseded by generation {}",
            installed.generation
        );
    }
    installed
}

fn persist_success(data_dir: &str, trigger: &str, snapshot: &DashboardSnapshot, retention: u32) {
    let result = db::get_db_connection(data_dir).and_then(|conn| {
        db::record_success(&conn, trigger, snapshot)?;
        db::prune_history(&conn, retention)
    });
    if let Err(e) = result {
        log::warn!("Could not record refresh history: {e}");
    }
}

fn persist_failure(data_dir: &str, trigger: &str, url: &str, error: &str, retention: u32) {
    let result = db::get_db_connection(data_dir).and_then(|conn| {
        db::record_failure(&conn, trigger, url, error)?;
        db::prune_history(&conn, retention)
    });
    if let Err(e) = result {
        log::warn!("Could not record refresh failure: {e}");
    }
}

fn load_persisted_snapshot(data_dir: &str) -> Option<DashboardSnapshot> {
    match db::get_db_connection(data_dir).and_then(|conn| db::load_latest_snapshot(&conn)) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            log::warn!("Could not read persisted snapshot: {e}");
            None
        }
    }
}

fn layer_context(settings: &EffectiveDashboardSettings, reference_month: Option<YearMonth>) -> LayerContext {
    LayerContext {
        reference_month: reference_month.unwrap_or_else(YearMonth::current),
        graph_months: settings.graph_months,
        policy: settings.network_totals_policy,
    }
}

/// Fetch-then-render shared by every refresh command and the poller.
pub async fn refresh_and_render(
    data_dir: &str,
    cache: &SharedCache,
    pipeline: &RenderPipeline,
    trigger: &str,
    reference_month: Option<YearMonth>,
) -> Result<Rendered, DashboardError> {
    let refreshed = refresh_snapshot(data_dir, cache, trigger).await?;
    let ctx = layer_context(&refreshed.settings, reference_month);
    let view = pipeline.build_view(&refreshed.snapshot, &ctx, refreshed.freshness);
    Ok(Rendered {
        snapshot: refreshed.snapshot,
        ctx,
        view,
    })
}

pub async fn update_graphs_now_internal(
    data_dir: &str,
    cache: &SharedCache,
    pipeline: &RenderPipeline,
) -> Result<DashboardView, DashboardError> {
    let rendered = refresh_and_render(data_dir, cache, pipeline, "update_graphs_now", None).await?;
    Ok(rendered.view)
}

pub async fn refresh_graphs_internal(
    data_dir: &str,
    cache: &SharedCache,
    pipeline: &RenderPipeline,
) -> Result<TrackingGraph, DashboardError> {
    let rendered = refresh_and_render(data_dir, cache, pipeline, "refresh_graphs", None).await?;
    Ok(rendered.view.tracking_graph)
}

pub async fn fix_graphs_internal(
    data_dir: &str,
    cache: &SharedCache,
    pipeline: &RenderPipeline,
) -> Result<FixReport, DashboardError> {
    let rendered = refresh_and_render(data_dir, cache, pipeline, "fix_graphs", None).await?;
    let window = rendered.ctx.window();
    let corrections = find_corrections(&rendered.snapshot.customers, &window);
    if !corrections.is_empty() {
        log::info!("Corrected {} client-side figures", corrections.len());
    }
    let window_end = rendered.ctx.reference_month;
    Ok(FixReport {
        view: rendered.view,
        window_start: window.first().copied().unwrap_or(window_end),
        window_end,
        corrections,
    })
}

pub async fn manual_refresh_graphs_internal(
    data_dir: &str,
    cache: &SharedCache,
    pipeline: &RenderPipeline,
) -> Result<DashboardView, DashboardError> {
    let rendered = refresh_and_render(data_dir, cache, pipeline, "manual", None).await?;
    Ok(rendered.view)
}

/// Renders with the reference month pinned. Defaults to October of the
/// current year.
pub async fn force_month_update_internal(
    data_dir: &str,
    cache: &SharedCache,
    pipeline: &RenderPipeline,
    year: Option<i32>,
    month: Option<u32>,
) -> Result<DashboardView, DashboardError> {
    let year = year.unwrap_or_else(|| chrono::Local::now().year());
    let month = month.unwrap_or(10);
    let pinned = YearMonth::new(year, month).ok_or(DashboardError::InvalidMonth { year, month })?;

    let rendered = refresh_and_render(data_dir, cache, pipeline, "force_month_update", Some(pinned)).await?;
    Ok(rendered.view)
}

pub async fn test_chart_table_alignment_internal(
    data_dir: &str,
    cache: &SharedCache,
    pipeline: &RenderPipeline,
) -> Result<AlignmentReport, DashboardError> {
    let rendered = refresh_and_render(data_dir, cache, pipeline, "alignment_check", None).await?;
    Ok(check_alignment(&rendered.view.tracking_graph, &rendered.view.grid))
}

/// Run dates of one network in one month, read from the installed snapshot.
pub fn get_network_month_run_dates_internal(
    cache: &SharedCache,
    customer: &str,
    network: &str,
    year: i32,
    month: u32,
) -> Result<Vec<String>, DashboardError> {
    let ym = YearMonth::new(year, month).ok_or(DashboardError::InvalidMonth { year, month })?;
    let snapshot = lock_cache(cache).current().ok_or(DashboardError::NoSnapshot)?;

    let record = snapshot
        .customer(customer)
        .ok_or_else(|| DashboardError::UnknownCustomer(customer.to_string()))?;
    let net = record.network(network).ok_or_else(|| DashboardError::UnknownNetwork {
        customer: record.name.clone(),
        network: network.to_string(),
    })?;
    Ok(network_month_run_dates(net, ym))
}

pub fn get_customer_month_chart_internal(
    data_dir: &str,
    cache: &SharedCache,
    pipeline: &RenderPipeline,
    customer: &str,
    year: Option<i32>,
) -> Result<CustomerMonthChart, DashboardError> {
    let settings = load_effective_dashboard_settings(data_dir).map_err(DashboardError::Settings)?;
    let snapshot = lock_cache(cache).current().ok_or(DashboardError::NoSnapshot)?;
    let ctx = layer_context(&settings, None);
    let year = year.unwrap_or(ctx.reference_month.year);
    pipeline.build_month_chart(&snapshot, customer, year, &ctx)
}

#[tauri::command]
pub async fn update_graphs_now(
    data_dir: String,
    cache: tauri::State<'_, SharedCache>,
    pipeline: tauri::State<'_, Arc<RenderPipeline>>,
) -> Result<DashboardView, String> {
    update_graphs_now_internal(&data_dir, cache.inner(), pipeline.inner())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn refresh_graphs(
    data_dir: String,
    cache: tauri::State<'_, SharedCache>,
    pipeline: tauri::State<'_, Arc<RenderPipeline>>,
) -> Result<TrackingGraph, String> {
    refresh_graphs_internal(&data_dir, cache.inner(), pipeline.inner())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn fix_graphs(
    data_dir: String,
    cache: tauri::State<'_, SharedCache>,
    pipeline: tauri::State<'_, Arc<RenderPipeline>>,
) -> Result<FixReport, String> {
    fix_graphs_internal(&data_dir, cache.inner(), pipeline.inner())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn manual_refresh_graphs(
    data_dir: String,
    cache: tauri::State<'_, SharedCache>,
    pipeline: tauri::State<'_, Arc<RenderPipeline>>,
) -> Result<DashboardView, String> {
    manual_refresh_graphs_internal(&data_dir, cache.inner(), pipeline.inner())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn force_month_update(
    data_dir: String,
    year: Option<i32>,
    month: Option<u32>,
    cache: tauri::State<'_, SharedCache>,
    pipeline: tauri::State<'_, Arc<RenderPipeline>>,
) -> Result<DashboardView, String> {
    force_month_update_internal(&data_dir, cache.inner(), pipeline.inner(), year, month)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn test_chart_table_alignment(
    data_dir: String,
    cache: tauri::State<'_, SharedCache>,
    pipeline: tauri::State<'_, Arc<RenderPipeline>>,
) -> Result<AlignmentReport, String> {
    test_chart_table_alignment_internal(&data_dir, cache.inner(), pipeline.inner())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_network_month_run_dates(
    customer: String,
    network: String,
    year: i32,
    month: u32,
    cache: tauri::State<'_, SharedCache>,
) -> Result<Vec<String>, String> {
    get_network_month_run_dates_internal(cache.inner(), &customer, &network, year, month)
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_customer_month_chart(
    data_dir: String,
    customer: String,
    year: Option<i32>,
    cache: tauri::State<'_, SharedCache>,
    pipeline: tauri::State<'_, Arc<RenderPipeline>>,
) -> Result<CustomerMonthChart, String> {
    get_customer_month_chart_internal(&data_dir, cache.inner(), pipeline.inner(), &customer, year)
        .map_err(|e| e.to_string())
}
