//! JSON-RPC request handlers.

use crate::server::AppState;
use crate::wrapper::wrap_response;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use conductor_core::config::EventConfig;
use conductor_core::{ConductorError, ServiceId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = &request.method;
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, params);

    if method == "health_check" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, json!({"status": "ok"}))),
        );
    }

    match dispatch_method(&state, method, &params).await {
        Ok(Some(value)) => {
            let wrapped = wrap_response(method, value);
            (StatusCode::OK, Json(JsonRpcResponse::success(id, wrapped)))
        }
        Ok(None) => (
            StatusCode::OK,
            Json(JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", method),
            )),
        ),
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = e.to_rpc_error_code();
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, code, e.to_string())),
            )
        }
    }
}

/// Extract the required `service` parameter.
fn require_service(params: &Value) -> conductor_core::Result<ServiceId> {
    let name = params
        .get("service")
        .or_else(|| params.get("service_id"))
        .or_else(|| params.get("serviceId"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ConductorError::Validation {
            field: "service".to_string(),
            message: "Missing required parameter".to_string(),
        })?;
    ServiceId::from_str(name)
}

/// Dispatch a method call. `Ok(None)` means the method does not exist.
async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: &Value,
) -> conductor_core::Result<Option<Value>> {
    let conductor = &state.conductor;

    let value = match method {
        "start_services" => {
            let accepted = conductor.request_start().is_some();
            json!({ "accepted": accepted, "lifecycle": conductor.lifecycle() })
        }

        "stop_services" => {
            let accepted = conductor.request_stop().is_some();
            json!({ "accepted": accepted, "lifecycle": conductor.lifecycle() })
        }

        "restart_service" => {
            let id = require_service(params)?;
            conductor.request_restart(id).await?;
            json!({ "service": id })
        }

        "stop_service" => {
            let id = require_service(params)?;
            conductor.request_stop_one(id).await?;
            json!({ "service": id })
        }

        "get_status" => serde_json::to_value(conductor.query_display_state().await)?,

        "get_health" => {
            let snapshot = conductor.snapshot();
            let confirmed = conductor
                .descriptors()
                .map(|id, _| conductor.is_confirmed(id));
            json!({ "snapshot": snapshot.as_ref(), "confirmed": confirmed })
        }

        "get_system_stats" => serde_json::to_value(conductor.system_stats().await)?,

        "get_logs" => {
            let limit = params
                .get("limit")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(EventConfig::LOG_HISTORY);
            let lines: Vec<Value> = state
                .logs
                .recent(limit)
                .into_iter()
                .map(|line| {
                    json!({
                        "scope": line.scope,
                        "level": line.level,
                        "message": line.message,
                        "at": line.at,
                        "text": line.to_string(),
                    })
                })
                .collect();
            Value::Array(lines)
        }

        _ => return Ok(None),
    };

    Ok(Some(value))
}
