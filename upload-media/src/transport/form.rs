//! Flattening of nested request data into multipart form fields.

use serde_json::Value;

/// Flatten `value` under `key` into `(name, value)` pairs.
///
/// Objects nest as `key[field]`, arrays repeat as `key[]`; nulls are
/// dropped.
pub fn flatten_form_data(key: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (name, inner) in map {
                flatten_form_data(&format!("{key}[{name}]"), inner, out);
            }
        }
        Value::Array(items) => {
            for inner in items {
                flatten_form_data(&format!("{key}[]"), inner, out);
            }
        }
        Value::String(s) => out.push((key.to_string(), s.clone())),
        Value::Bool(b) => out.push((key.to_string(), b.to_string())),
        Value::Number(n) => out.push((key.to_string(), n.to_string())),
    }
}

/// Flatten every top-level entry of `data`.
pub fn form_fields(data: &serde_json::Map<String, Value>) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(data.len());
    for (key, value) in data {
        flatten_form_data(key, value, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_nested_meta() {
        let data = json!({
            "featured_media": 123,
            "mexp_filename": "example.jpg",
            "meta": {
                "mexp_is_muted": false,
                "mexp_original_id": 9,
                "mexp_generated_poster_id": null,
            },
            "mexp_media_source": [4, 5],
        });

        let fields = form_fields(data.as_object().unwrap());
        let has = |k: &str, v: &str| fields.iter().any(|(a, b)| a == k && b == v);

        assert!(has("featured_media", "123"));
        assert!(has("mexp_filename", "example.jpg"));
        assert!(has("meta[mexp_is_muted]", "false"));
        assert!(has("meta[mexp_original_id]", "9"));
        assert!(has("mexp_media_source[]", "4"));
        assert!(has("mexp_media_source[]", "5"));
        assert!(!fields.iter().any(|(k, _)| k.contains("generated_poster")));
        assert_eq!(fields.len(), 6);
    }
}
