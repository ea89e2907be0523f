//! `${name}` placeholder substitution from captured variables.

use serde_json::Value;
use stepweave_core::{Document, VariableCache};

/// Replaces `${name}` placeholders in every string of `document`.
///
/// A string that is exactly one placeholder becomes the cached value as-is,
/// keeping its type. Placeholders embedded in longer text are replaced by
/// the value's text form. Names missing from the cache stay untouched.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use stepweave::{substitute, VariableCache};
///
/// let mut variables = VariableCache::new();
/// variables.insert("orderId", json!(42));
///
/// let request = json!({"path": "/orders/${orderId}", "body": {"id": "${orderId}"}});
/// assert_eq!(
///     substitute(&request, &variables),
///     json!({"path": "/orders/42", "body": {"id": 42}})
/// );
/// ```
pub fn substitute(document: &Document, variables: &VariableCache) -> Document {
    match document {
        Value::String(text) => substitute_text(text, variables),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute(item, variables))
                .collect(),
        ),
        Value::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), substitute(value, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_text(text: &str, variables: &VariableCache) -> Document {
    if let Some(value) = whole_placeholder(text).and_then(|name| variables.get(name)) {
        return value.clone();
    }

    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            output.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = &after[..end];
        match variables.get(name).filter(|_| is_name(name)) {
            Some(value) => output.push_str(&render(value)),
            None => output.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Value::String(output)
}

fn whole_placeholder(text: &str) -> Option<&str> {
    text.strip_prefix("${")?
        .strip_suffix('}')
        .filter(|name| is_name(name))
}

fn is_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn render(value: &Document) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
