use crate::analysis::totals::NetworkTotalsPolicy;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_SCHEMA_VERSION: i64 = 1;

pub const DEFAULT_CUSTOMERS_PATH: &str = "/api/customer-dashboard/customers/";

#[derive(Debug, Clone)]
pub struct EffectiveDashboardSettings {
    pub api_base_url: String,
    pub customers_path: String,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub graph_months: usize,
    pub history_retention: u32,
    pub network_totals_policy: NetworkTotalsPolicy,
}

impl EffectiveDashboardSettings {
    pub fn customers_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.customers_path.trim_start_matches('/')
        )
    }
}

#[tauri::command]
pub async fn get_settings(data_dir: String) -> Result<Value, String> {
    load_settings_from_disk(&data_dir)
}

#[tauri::command]
pub async fn save_settings(data_dir: String, settings: Value) -> Result<Value, String> {
    save_settings_to_disk(&data_dir, settings)
}

pub fn load_effective_dashboard_settings(data_dir: &str) -> Result<EffectiveDashboardSettings, String> {
    let settings = load_settings_from_disk(data_dir)?;
    Ok(effective_from_value(&settings))
}

fn effective_from_value(settings: &Value) -> EffectiveDashboardSettings {
    let text = |key: &str, default: &str| {
        settings
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };
    let number = |key: &str, default: u64| settings.get(key).and_then(Value::as_u64).unwrap_or(default);

    EffectiveDashboardSettings {
        api_base_url: text("apiBaseUrl", "http://127.0.0.1:8000"),
        customers_path: text("customersPath", DEFAULT_CUSTOMERS_PATH),
        refresh_interval_secs: number("refreshIntervalSecs", 10).clamp(3, 30),
        request_timeout_secs: number("requestTimeoutSecs", 15).clamp(1, 120),
        graph_months: number("graphMonths", 12).clamp(3, 24) as usize,
        history_retention: number("historyRetention", 200).clamp(10, 5000) as u32,
        network_totals_policy: NetworkTotalsPolicy::from_setting(&text("networkTotalsPolicy", "independent")),
    }
}

pub fn load_settings_from_disk(data_dir: &str) -> Result<Value, String> {
    let path = settings_path(data_dir);
    ensure_data_dir(data_dir)?;

    let original = if path.exists() {
        let raw = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read settings.json: {e}"))?;
        serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
            log::warn!("settings.json is not valid JSON, using defaults: {e}");
            json!({})
        })
    } else {
        json!({})
    };

    let migrated = migrate_settings(original.clone());
    if migrated != original || !path.exists() {
        write_settings_file(&path, &migrated)?;
    }

    Ok(migrated)
}

pub fn save_settings_to_disk(data_dir: &str, settings: Value) -> Result<Value, String> {
    let path = settings_path(data_dir);
    ensure_data_dir(data_dir)?;

    let mut merged = load_settings_from_disk(data_dir).unwrap_or_else(|_| default_settings());
    merge_settings(&mut merged, &settings);

    let migrated = migrate_settings(merged);
    write_settings_file(&path, &migrated)?;
    log::info!("Saved dashboard settings to {}", path.display());
    Ok(migrated)
}

fn settings_path(data_dir: &str) -> PathBuf {
    Path::new(data_dir).join("settings.json")
}

pub(crate) fn ensure_data_dir(data_dir: &str) -> Result<(), String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data directory: {e}"))
}

fn write_settings_file(path: &Path, settings: &Value) -> Result<(), String> {
    let raw = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {e}"))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write settings.json: {e}"))
}

fn migrate_settings(input: Value) -> Value {
    let defaults = default_settings();
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    let version = out
        .get("schema_version")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if version < 1 {
        migrate_refresh_interval_from_millis(&mut out);
    }

    deep_merge_defaults(&mut out, &defaults);

    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }

    out
}

fn default_settings() -> Value {
    json!({
        "schema_version": SETTINGS_SCHEMA_VERSION,
        "apiBaseUrl": "http://127.0.0.1:8000",
        "customersPath": DEFAULT_CUSTOMERS_PATH,
        "refreshIntervalSecs": 10,
        "requestTimeoutSecs": 15,
        "graphMonths": 12,
        "historyRetention": 200,
        "networkTotalsPolicy": "independent"
    })
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object()) else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if existing.is_object() && default_value.is_object() {
                    deep_merge_defaults(existing, default_value);
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn merge_settings(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_obj), Value::Object(incoming_obj)) => {
            for (key, value) in incoming_obj {
                if let Some(existing) = target_obj.get_mut(key) {
                    merge_settings(existing, value);
                } else {
                    target_obj.insert(key.clone(), value.clone());
                }
            }
        }
        (target_slot, incoming_value) => {
            *target_slot = incoming_value.clone();
        }
    }
}

/// Schema 0 stored the poll period as `refreshIntervalMs`.
fn migrate_refresh_interval_from_millis(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };
    let Some(millis) = obj.remove("refreshIntervalMs").and_then(|v| v.as_u64()) else {
        return;
    };
    obj.entry("refreshIntervalSecs".to_string())
        .or_insert_with(|| json!((millis + 999) / 1000));
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    clamp_u64(obj, "refreshIntervalSecs", 3, 30, 10);
    clamp_u64(obj, "requestTimeoutSecs", 1, 120, 15);
    clamp_u64(obj, "graphMonths", 3, 24, 12);
    clamp_u64(obj, "historyRetention", 10, 5000, 200);

    sanitize_enum(obj, "networkTotalsPolicy", &NetworkTotalsPolicy::NAMES, "independent");

    ensure_url(obj, "apiBaseUrl", "http://127.0.0.1:8000");
    ensure_non_empty(obj, "customersPath", DEFAULT_CUSTOMERS_PATH);
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn sanitize_enum(map: &mut Map<String, Value>, key: &str, allowed: &[&str], default: &str) {
    let valid = map
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| allowed.contains(value))
        .unwrap_or(default);
    map.insert(key.to_string(), json!(valid));
}

fn ensure_url(map: &mut Map<String, Value>, key: &str, default: &str) {
    let valid = map
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| value.starts_with("http://") || value.starts_with("https://"))
        .unwrap_or(default)
        .to_string();
    map.insert(key.to_string(), json!(valid));
}

fn ensure_non_empty(map: &mut Map<String, Value>, key: &str, default: &str) {
    let valid = map
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
        .to_string();
    map.insert(key.to_string(), json!(valid));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_millisecond_interval_and_clamps() {
        let input = json!({
            "schema_version": 0,
            "refreshIntervalMs": 60000,
            "graphMonths": 1
        });

        let migrated = migrate_settings(input);
        assert!(migrated.get("refreshIntervalMs").is_none());
        assert_eq!(migrated["refreshIntervalSecs"], json!(30));
        assert_eq!(migrated["graphMonths"], json!(3));
        assert_eq!(
            migrated
                .get("schema_version")
                .and_then(Value::as_i64)
                .unwrap(),
            SETTINGS_SCHEMA_VERSION
        );
    }

    #[test]
    fn sub_second_interval_rounds_up_then_clamps_to_floor() {
        let migrated = migrate_settings(json!({ "refreshIntervalMs": 1500 }));
        assert_eq!(migrated["refreshIntervalSecs"], json!(3));
    }

    #[test]
    fn merges_partial_settings_without_losing_existing_values() {
        let mut existing = default_settings();
        merge_settings(&mut existing, &json!({ "refreshIntervalSecs": 5 }));
        let migrated = migrate_settings(existing);

        assert_eq!(migrated["refreshIntervalSecs"], json!(5));
        assert_eq!(migrated["customersPath"], json!(DEFAULT_CUSTOMERS_PATH));
        assert_eq!(migrated["networkTotalsPolicy"], json!("independent"));
    }

    #[test]
    fn rejects_unknown_policy_and_bad_urls() {
        let migrated = migrate_settings(json!({
            "schema_version": 1,
            "networkTotalsPolicy": "sumNetworks",
            "apiBaseUrl": "ftp://example.com",
            "customersPath": "   "
        }));
        assert_eq!(migrated["networkTotalsPolicy"], json!("independent"));
        assert_eq!(migrated["apiBaseUrl"], json!("http://127.0.0.1:8000"));
        assert_eq!(migrated["customersPath"], json!(DEFAULT_CUSTOMERS_PATH));
    }

    #[test]
    fn effective_settings_join_base_url_and_path() {
        let settings = migrate_settings(json!({
            "apiBaseUrl": "https://dash.example.com/",
            "networkTotalsPolicy": "capToCustomer"
        }));
        let effective = effective_from_value(&settings);
        assert_eq!(
            effective.customers_url(),
            "https://dash.example.com/api/customer-dashboard/customers/"
        );
        assert_eq!(effective.network_totals_policy, NetworkTotalsPolicy::CapToCustomer);
    }
}
