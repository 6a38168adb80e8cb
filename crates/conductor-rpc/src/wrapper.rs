//! Response wrapping for the control-surface client.
//!
//! Clients expect `{success: true, ...data}`. Query methods nest their payload
//! under a named key; command results are objects whose fields are merged in.

use serde_json::{json, Value};

pub fn wrap_response(method: &str, result: Value) -> Value {
    match method {
        "get_status" => json!({ "success": true, "status": result }),
        "get_health" => json!({ "success": true, "health": result }),
        "get_system_stats" => json!({ "success": true, "stats": result }),
        "get_logs" => json!({
            "success": true,
            "logs": if result.is_null() { json!([]) } else { result }
        }),

        _ => match result {
            Value::Object(mut fields) => {
                fields.insert("success".to_string(), Value::Bool(true));
                Value::Object(fields)
            }
            Value::Null => json!({ "success": true }),
            other => json!({ "success": true, "result": other }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_methods_nest_payload() {
        let wrapped = wrap_response("get_status", json!({"overall": "running"}));
        assert_eq!(wrapped["success"], true);
        assert_eq!(wrapped["status"]["overall"], "running");

        let logs = wrap_response("get_logs", Value::Null);
        assert_eq!(logs["logs"], json!([]));
    }

    #[test]
    fn test_command_results_are_merged() {
        let wrapped = wrap_response("start_services", json!({"accepted": true}));
        assert_eq!(wrapped, json!({"success": true, "accepted": true}));

        assert_eq!(wrap_response("stop_service", Value::Null), json!({"success": true}));
    }
}
