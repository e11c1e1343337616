use anyhow::anyhow;
use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};
use serde_json::Value;
use tracing::info;

use super::{
    dto::{CooldownQuery, HealthResponse, RelayBody, SuccessResponse, TempQuery},
    errors::AppError,
    SharedState,
};
use crate::device::models::{DeviceConfig, StatusResponse};

pub async fn get_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let mut state = state.lock().await;
    state.reevaluate();
    Json(state.status())
}

pub async fn get_config(State(state): State<SharedState>) -> Json<DeviceConfig> {
    Json(state.lock().await.config.clone())
}

/// Merge the posted keys over the current config; unknown keys are kept.
pub async fn update_config(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<SuccessResponse>, AppError> {
    let Value::Object(update) = serde_json::from_slice::<Value>(&body).map_err(AppError::bad_request)?
    else {
        return Err(AppError::bad_request(anyhow!("config body must be a JSON object")));
    };

    let mut state = state.lock().await;
    let mut merged = serde_json::to_value(&state.config)?;
    if let Value::Object(current) = &mut merged {
        current.extend(update);
    }
    state.config = serde_json::from_value(merged).map_err(AppError::bad_request)?;
    info!(
        temp_critical = state.config.temp_critical,
        alert_delay_sec = state.config.alert_delay_sec,
        "Config updated"
    );
    state.reevaluate();

    Ok(Json(SuccessResponse::ok()))
}

pub async fn acknowledge_alert(State(state): State<SharedState>) -> Json<SuccessResponse> {
    state.lock().await.acknowledge();
    Json(SuccessResponse::ok())
}

pub async fn test_alert(State(state): State<SharedState>) -> Json<SuccessResponse> {
    state.lock().await.force_alert("TEST ALERT");
    Json(SuccessResponse::ok())
}

pub async fn set_relay(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<SuccessResponse>, AppError> {
    let body: RelayBody = serde_json::from_slice(&body).map_err(AppError::bad_request)?;
    let on = body.is_on();

    state.lock().await.relay_on = on;
    info!(relay_on = on, "Relay switched");

    Ok(Json(SuccessResponse {
        success: true,
        relay: Some(on),
    }))
}

pub async fn sim_temperature(
    State(state): State<SharedState>,
    Query(query): Query<TempQuery>,
) -> Result<String, AppError> {
    let v = query
        .v
        .ok_or_else(|| AppError::bad_request(anyhow!("missing query parameter v")))?;
    state.lock().await.set_temperature(v);
    info!(temperature = v, "Temperature forced");
    Ok(format!("Temperature: {v}°C"))
}

pub async fn sim_door(State(state): State<SharedState>) -> String {
    let open = state.lock().await.toggle_door();
    format!("Door: {}", if open { "OPEN" } else { "CLOSED" })
}

pub async fn sim_alert(State(state): State<SharedState>) -> String {
    let active = state.lock().await.toggle_alert();
    format!("Alert: {}", if active { "ACTIVE" } else { "INACTIVE" })
}

pub async fn sim_defrost(State(state): State<SharedState>) -> String {
    let on = state.lock().await.toggle_defrost();
    format!("Defrost: {}", if on { "ON" } else { "OFF" })
}

pub async fn sim_cooldown(
    State(state): State<SharedState>,
    Query(query): Query<CooldownQuery>,
) -> String {
    state.lock().await.start_cooldown(query.secs);
    format!("Cooldown: {}s", query.secs)
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        device_id: state.lock().await.identity.id.clone(),
    })
}
