use sha2::{Digest, Sha256};

/// SHA-256 hex fingerprint of `{model, <selected fields>}` with all JSON
/// object keys sorted recursively.
pub fn request_fingerprint(
    internal_model_name: &str,
    body: &serde_json::Value,
    include_in_key: &[String],
) -> String {
    let mut selected = serde_json::Map::new();
    selected.insert(
        "model".to_string(),
        serde_json::Value::String(internal_model_name.to_string()),
    );
    for field in include_in_key {
        if let Some(value) = body.get(field) {
            selected.insert(field.clone(), value.clone());
        }
    }

    let canonical = canonical_json(&serde_json::Value::Object(selected));
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Serialize with object keys sorted at every level. Arrays keep their
/// order — element order is meaningful for message lists.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let elems: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", elems.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_requests_hash_identically() {
        let body = serde_json::json!({"messages": [{"role": "user", "content": "hi"}], "temperature": 0.1});
        let a = request_fingerprint("gpt-4o", &body, &fields(&["messages", "temperature"]));
        let b = request_fingerprint("gpt-4o", &body, &fields(&["messages", "temperature"]));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_ignores_field_insertion_order() {
        let a = serde_json::json!({"temperature": 0.1, "messages": [{"role": "user", "content": "hi"}]});
        let b = serde_json::json!({"messages": [{"role": "user", "content": "hi"}], "temperature": 0.1});
        // selection order in the rule must not matter either
        let fp_a = request_fingerprint("m", &a, &fields(&["messages", "temperature"]));
        let fp_b = request_fingerprint("m", &b, &fields(&["temperature", "messages"]));
        assert_eq!(fp_a, fp_b);
    }

    #[test]
    fn different_model_changes_fingerprint() {
        let body = serde_json::json!({"messages": []});
        let a = request_fingerprint("m1", &body, &fields(&["messages"]));
        let b = request_fingerprint("m2", &body, &fields(&["messages"]));
        assert_ne!(a, b);
    }

    #[test]
    fn excluded_fields_do_not_affect_fingerprint() {
        let a = serde_json::json!({"messages": [], "user": "alice"});
        let b = serde_json::json!({"messages": [], "user": "bob"});
        let fp_a = request_fingerprint("m", &a, &fields(&["messages"]));
        let fp_b = request_fingerprint("m", &b, &fields(&["messages"]));
        assert_eq!(fp_a, fp_b);
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let a = serde_json::json!({"options": {"b": 1, "a": 2}});
        let b = serde_json::json!({"options": {"a": 2, "b": 1}});
        let fp_a = request_fingerprint("m", &a, &fields(&["options"]));
        let fp_b = request_fingerprint("m", &b, &fields(&["options"]));
        assert_eq!(fp_a, fp_b);
    }
}
