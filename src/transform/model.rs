use crate::types::Result;
use serde_json::{json, Value};

/// Rewrite the model field in a JSON request body
pub fn rewrite_model_field(mut json: Value, target_model: &str) -> Result<Value> {
    if let Some(obj) = json.as_object_mut() {
        if obj.contains_key("model") {
            obj.insert("model".to_string(), Value::String(target_model.to_string()));
        }
    }
    Ok(json)
}

/// Make sure a streaming OpenAI body asks for a trailing usage chunk,
/// merging into caller-supplied `stream_options`. Returns whether the body
/// was changed.
pub fn ensure_stream_usage(json: &mut Value) -> bool {
    let Some(obj) = json.as_object_mut() else {
        return false;
    };

    match obj.get_mut("stream_options") {
        Some(Value::Object(options)) => {
            if options.get("include_usage") == Some(&Value::Bool(true)) {
                return false;
            }
            options.insert("include_usage".to_string(), Value::Bool(true));
        }
        _ => {
            obj.insert("stream_options".to_string(), json!({"include_usage": true}));
        }
    }
    true
}
