use crate::commands::dashboard::{refresh_and_render, SharedCache};
use crate::commands::pipeline::RenderPipeline;
use crate::commands::settings::load_effective_dashboard_settings;
use crate::models::view::DashboardView;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tauri::async_runtime::JoinHandle;
use tauri::Emitter;
use tokio::time::MissedTickBehavior;

pub const UPDATED_EVENT: &str = "dashboard_updated";
pub const FAILED_EVENT: &str = "dashboard_refresh_failed";

#[derive(Debug)]
pub enum PollEvent {
    Updated(Box<DashboardView>),
    Failed(String),
}

/// Handle of the single running poller, if any.
#[derive(Default)]
pub struct AutoRefresh {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AutoRefresh {
    /// Installs `task`, aborting the poller it replaces.
    pub fn replace(&self, task: JoinHandle<()>) {
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            log::info!("Replacing running auto-refresh poller");
            previous.abort();
        }
    }

    pub fn stop(&self) -> bool {
        let running = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        match running {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

/// Refreshes every `period`. Ticks are awaited one after another and missed
/// ticks are skipped, so refreshes never overlap.
pub async fn poll_loop<F>(
    data_dir: String,
    cache: SharedCache,
    pipeline: Arc<RenderPipeline>,
    period: Duration,
    mut emit: F,
) where
    F: FnMut(PollEvent) + Send,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match refresh_and_render(&data_dir, &cache, &pipeline, "auto_refresh", None).await {
            Ok(rendered) => emit(PollEvent::Updated(Box::new(rendered.view))),
            Err(e) => {
                log::error!("Auto-refresh failed: {e}");
                emit(PollEvent::Failed(e.to_string()));
            }
        }
    }
}

/// Starts (or restarts) the poller and returns its period in seconds.
#[tauri::command]
pub async fn start_auto_refresh(
    data_dir: String,
    cache: tauri::State<'_, SharedCache>,
    pipeline: tauri::State<'_, Arc<RenderPipeline>>,
    auto_refresh: tauri::State<'_, Arc<AutoRefresh>>,
    app: tauri::AppHandle,
) -> Result<u64, String> {
    let settings = load_effective_dashboard_settings(&data_dir)?;
    let period = Duration::from_secs(settings.refresh_interval_secs);

    let task = tauri::async_runtime::spawn(poll_loop(
        data_dir,
        cache.inner().clone(),
        pipeline.inner().clone(),
        period,
        move |event| match event {
            PollEvent::Updated(view) => {
                let _ = app.emit(UPDATED_EVENT, view);
            }
            PollEvent::Failed(error) => {
                let _ = app.emit(FAILED_EVENT, error);
            }
        },
    ));
    auto_refresh.replace(task);

    log::info!("Auto-refresh every {}s", settings.refresh_interval_secs);
    Ok(settings.refresh_interval_secs)
}

#[tauri::command]
pub async fn stop_auto_refresh(auto_refresh: tauri::State<'_, Arc<AutoRefresh>>) -> Result<bool, String> {
    let stopped = auto_refresh.stop();
    if stopped {
        log::info!("Auto-refresh stopped");
    }
    Ok(stopped)
}
