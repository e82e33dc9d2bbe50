//! Recognising the `initialize` request that opens a session

use serde_json::Value;

use crate::jsonrpc::JSONRPC_VERSION;

/// True when `value` is a single, well-formed `initialize` request.
///
/// Batches never qualify. The request must carry a non-null id and params
/// with `protocolVersion`, `capabilities` and `clientInfo { name, version }`.
pub fn is_initialize_request(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return false;
    }
    if obj.get("method").and_then(Value::as_str) != Some("initialize") {
        return false;
    }
    match obj.get("id") {
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => {}
        Some(Value::String(_)) => {}
        _ => return false,
    }

    let Some(params) = obj.get("params").and_then(Value::as_object) else {
        return false;
    };

    let has_version = params
        .get("protocolVersion")
        .map(Value::is_string)
        .unwrap_or(false);
    let has_capabilities = params
        .get("capabilities")
        .map(Value::is_object)
        .unwrap_or(false);
    let has_client_info = params
        .get("clientInfo")
        .and_then(Value::as_object)
        .map(|info| {
            info.get("name").map(Value::is_string).unwrap_or(false)
                && info.get("version").map(Value::is_string).unwrap_or(false)
        })
        .unwrap_or(false);

    has_version && has_capabilities && has_client_info
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn init() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "client", "version": "1.0.0" }
            }
        })
    }

    #[test]
    fn test_accepts_well_formed_initialize() {
        assert!(is_initialize_request(&init()));

        let mut string_id = init();
        string_id["id"] = json!("init-1");
        assert!(is_initialize_request(&string_id));

        let mut large_id = init();
        large_id["id"] = json!(u64::MAX);
        assert!(is_initialize_request(&large_id));
    }

    #[test]
    fn test_rejects_fractional_id() {
        let mut fractional = init();
        fractional["id"] = json!(1.5);
        assert!(!is_initialize_request(&fractional));
    }

    #[test]
    fn test_rejects_other_shapes() {
        assert!(!is_initialize_request(&json!([init()])));
        assert!(!is_initialize_request(&json!({"jsonrpc":"2.0","id":1,"method":"tools/list"})));

        let mut missing_params = init();
        missing_params.as_object_mut().unwrap().remove("params");
        assert!(!is_initialize_request(&missing_params));

        let mut null_id = init();
        null_id["id"] = Value::Null;
        assert!(!is_initialize_request(&null_id));

        let mut no_client_version = init();
        no_client_version["params"]["clientInfo"]
            .as_object_mut()
            .unwrap()
            .remove("version");
        assert!(!is_initialize_request(&no_client_version));

        let mut old_rpc = init();
        old_rpc["jsonrpc"] = json!("1.0");
        assert!(!is_initialize_request(&old_rpc));
    }
}
