//! Hierarchical request composition.
//!
//! Requests are built by layering a step-level fragment over a method
//! template, and the result over service-wide defaults. Every layer uses the
//! same deep-merge rules:
//!
//! - a key missing from the target is copied from the source,
//! - two arrays concatenate (target elements first, then source elements),
//! - two objects merge recursively,
//! - anything else is overwritten by the source value.

use crate::document::Document;
use crate::error::StepweaveError;
use serde_json::Value;

/// Flag that drops inherited `headers` from the layer being merged into.
pub const IGNORE_BASE_HEADERS: &str = "ignoreBaseHeaders";

const HEADERS: &str = "headers";

/// Merges `source` into `target` and returns the merged target.
///
/// Both operands are taken by value; callers that need to keep an operand
/// pass a clone. If either operand is `null`, `target` is returned unchanged.
/// When `source` carries `ignoreBaseHeaders: true`, the top-level `headers`
/// of `target` are removed before merging.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use stepweave_core::merge;
///
/// let merged = merge(json!({"a": [1, 2], "b": 1}), json!({"a": [3], "b": 0, "c": true}));
/// assert_eq!(merged, json!({"a": [3, 1, 2], "b": 1, "c": true}));
/// ```
pub fn merge(source: Document, mut target: Document) -> Document {
    if source.is_null() || target.is_null() {
        return target;
    }
    if ignores_base_headers(&source) {
        if let Some(fields) = target.as_object_mut() {
            fields.remove(HEADERS);
        }
    }
    deep_merge(source, &mut target);
    target
}

/// Like [`merge`], but rejects inputs that cannot form a request.
///
/// Both layers must be objects (or `null`) and `ignoreBaseHeaders`, when
/// present, must be a boolean.
pub fn compose(source: Document, target: Document) -> Result<Document, StepweaveError> {
    for (layer, document) in [("override", &source), ("base", &target)] {
        if !(document.is_object() || document.is_null()) {
            return Err(StepweaveError::Composition(format!(
                "{layer} layer must be an object, got {}",
                type_name(document)
            )));
        }
    }
    if let Some(flag) = source.get(IGNORE_BASE_HEADERS) {
        if !flag.is_boolean() {
            return Err(StepweaveError::Composition(format!(
                "'{IGNORE_BASE_HEADERS}' must be a boolean, got {}",
                type_name(flag)
            )));
        }
    }
    Ok(merge(source, target))
}

/// Composes layers from most specific to least specific.
///
/// `compose_layers([fragment, template, defaults])` is
/// `compose(compose(fragment, template), defaults)`.
pub fn compose_layers<I>(layers: I) -> Result<Document, StepweaveError>
where
    I: IntoIterator<Item = Document>,
{
    let mut layers = layers.into_iter();
    let mut composed = layers.next().unwrap_or(Value::Null);
    for base in layers {
        if base.is_null() {
            continue;
        }
        if composed.is_null() {
            composed = base;
            continue;
        }
        composed = compose(composed, base)?;
    }
    Ok(composed)
}

fn deep_merge(source: Document, target: &mut Document) {
    let (Value::Object(source), Value::Object(target)) = (source, target) else {
        return;
    };
    for (key, source_value) in source {
        match target.get_mut(&key) {
            None => {
                target.insert(key, source_value);
            }
            Some(target_value) => match (source_value, target_value) {
                (Value::Array(items), Value::Array(existing)) => existing.extend(items),
                (source_value @ Value::Object(_), target_value @ Value::Object(_)) => {
                    deep_merge(source_value, target_value)
                }
                (source_value, target_value) => *target_value = source_value,
            },
        }
    }
}

fn ignores_base_headers(source: &Document) -> bool {
    source
        .get(IGNORE_BASE_HEADERS)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_append() {
        let merged = merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged, json!({"a": [3, 1, 2]}));
    }

    #[test]
    fn test_source_wins_on_scalar_conflict() {
        assert_eq!(merge(json!({"a": 1}), json!({"a": 2})), json!({"a": 1}));
    }

    #[test]
    fn test_type_mismatch_overwrites() {
        let merged = merge(json!({"a": {"x": 1}}), json!({"a": [1], "b": "keep"}));
        assert_eq!(merged, json!({"a": {"x": 1}, "b": "keep"}));

        let merged = merge(json!({"a": null}), json!({"a": {"x": 1}}));
        assert_eq!(merged, json!({"a": null}));
    }

    #[test]
    fn test_nested_objects_recurse() {
        let source = json!({"headers": {"accept": "application/json"}, "query": {"page": 2}});
        let target = json!({
            "baseUri": "https://shop.test",
            "headers": {"accept": "*/*", "x-trace": "on"},
            "query": {"size": 10}
        });
        assert_eq!(
            merge(source, target),
            json!({
                "baseUri": "https://shop.test",
                "headers": {"accept": "application/json", "x-trace": "on"},
                "query": {"size": 10, "page": 2}
            })
        );
    }

    #[test]
    fn test_ignore_base_headers() {
        let merged = merge(
            json!({"ignoreBaseHeaders": true, "a": 1}),
            json!({"headers": {"x": "y"}, "a": 0}),
        );
        assert!(merged.get("headers").is_none());
        assert_eq!(merged["a"], json!(1));
    }

    #[test]
    fn test_ignore_base_headers_keeps_own_headers() {
        let merged = merge(
            json!({"ignoreBaseHeaders": true, "headers": {"auth": "none"}}),
            json!({"headers": {"x": "y"}}),
        );
        assert_eq!(merged["headers"], json!({"auth": "none"}));
    }

    #[test]
    fn test_null_short_circuits() {
        assert_eq!(merge(Value::Null, json!({"a": 1})), json!({"a": 1}));
        assert_eq!(merge(json!({"a": 1}), Value::Null), Value::Null);
    }

    #[test]
    fn test_empty_operands_are_noops() {
        let target = json!({"a": [1], "b": {}});
        assert_eq!(merge(json!({}), target.clone()), target);
        assert_eq!(merge(json!({"a": [], "b": {}}), target.clone()), target);
    }

    #[test]
    fn test_merge_is_idempotent_without_arrays() {
        let source = json!({"a": 1, "n": {"x": "s", "y": null}});
        let target = json!({"a": 2, "n": {"x": "t", "z": false}, "t": 3});
        let once = merge(source, target.clone());
        let twice = merge(once.clone(), target);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_into_itself_without_arrays() {
        let document = json!({"a": 1, "n": {"x": {"deep": true}}});
        assert_eq!(merge(document.clone(), document.clone()), document);
    }

    #[test]
    fn test_deep_nesting() {
        let mut source = json!("leaf");
        let mut target = json!("old");
        for _ in 0..64 {
            source = json!({ "n": source });
            target = json!({ "n": target, "extra": 1 });
        }
        let merged = merge(source, target);
        let mut cursor = &merged;
        for _ in 0..64 {
            assert_eq!(cursor["extra"], json!(1));
            cursor = &cursor["n"];
        }
        assert_eq!(cursor, &json!("leaf"));
    }

    #[test]
    fn test_key_order_is_preserved() {
        let merged = merge(json!({"z": 1, "a": 2}), json!({"m": 0}));
        let keys: Vec<&String> = merged.as_object().map(|o| o.keys().collect()).unwrap_or_default();
        assert_eq!(keys, ["m", "z", "a"]);
    }

    #[test]
    fn test_compose_rejects_non_objects() {
        assert!(matches!(
            compose(json!([1]), json!({})),
            Err(StepweaveError::Composition(_))
        ));
        assert!(matches!(
            compose(json!({}), json!("text")),
            Err(StepweaveError::Composition(_))
        ));
        assert!(matches!(
            compose(json!({"ignoreBaseHeaders": "yes"}), json!({})),
            Err(StepweaveError::Composition(_))
        ));
    }

    #[test]
    fn test_compose_layers() {
        let composed = compose_layers([
            json!({"body": {"qty": 2}, "ignoreBaseHeaders": true}),
            json!({"path": "/orders", "method": "POST", "body": {"sku": "A1"}}),
            json!({"baseUri": "https://shop.test", "headers": {"x-api-key": "k"}}),
        ])
        .expect("valid layers");
        assert_eq!(
            composed,
            json!({
                "path": "/orders",
                "method": "POST",
                "body": {"sku": "A1", "qty": 2},
                "ignoreBaseHeaders": true,
                "baseUri": "https://shop.test"
            })
        );
    }

    #[test]
    fn test_compose_layers_skips_missing_fragment() {
        let composed = compose_layers([Value::Null, json!({"path": "/ping"})]).expect("valid layers");
        assert_eq!(composed, json!({"path": "/ping"}));

        let composed = compose_layers([json!({"body": {"id": 1}}), Value::Null, Value::Null])
            .expect("valid layers");
        assert_eq!(composed, json!({"body": {"id": 1}}));
    }
}
