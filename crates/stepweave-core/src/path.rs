//! Path queries over documents.

use crate::document::Document;
use serde_json::Value;
use serde_json_path::JsonPath;
use thiserror::Error;

/// Why a path expression could not be evaluated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The expression is not valid path syntax.
    #[error("invalid path expression: {0}")]
    Invalid(String),
    /// A definite path selected nothing.
    #[error("no value at path")]
    NotFound,
}

/// Evaluates path expressions against documents.
///
/// Used identically by response assertions and variable extraction.
pub trait PathQuery: Send + Sync {
    /// Evaluates `expression` against `document`.
    ///
    /// A definite path yields the selected value itself; a path that may
    /// select several nodes yields an array of the matches (possibly empty).
    fn evaluate(&self, document: &Document, expression: &str) -> Result<Document, PathError>;
}

/// [`PathQuery`] backed by JSONPath (RFC 9535).
///
/// Expressions without a leading `$` are read relative to the root, so
/// `items[0].id` and `$.items[0].id` are equivalent.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use stepweave_core::{JsonPathQuery, PathQuery};
///
/// let response = json!({"items": [{"id": 1}, {"id": 2}]});
/// let query = JsonPathQuery;
///
/// assert_eq!(query.evaluate(&response, "items[1].id"), Ok(json!(2)));
/// assert_eq!(query.evaluate(&response, "$.items[*].id"), Ok(json!([1, 2])));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPathQuery;

impl PathQuery for JsonPathQuery {
    fn evaluate(&self, document: &Document, expression: &str) -> Result<Document, PathError> {
        let expression = rooted(expression);
        let path = JsonPath::parse(&expression).map_err(|e| PathError::Invalid(e.to_string()))?;
        let matches = path.query(document).all();

        if is_definite(&expression) {
            matches
                .first()
                .map(|value| (*value).clone())
                .ok_or(PathError::NotFound)
        } else {
            Ok(Value::Array(matches.into_iter().cloned().collect()))
        }
    }
}

fn rooted(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.starts_with('$') {
        trimmed.to_string()
    } else if trimmed.starts_with('[') {
        format!("${trimmed}")
    } else {
        format!("$.{trimmed}")
    }
}

/// Returns `true` if the path can select at most one node.
///
/// Wildcards, descendant segments, filters, unions and slices make a path
/// indefinite.
pub fn is_definite(expression: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut bracket_depth = 0usize;
    let mut previous = '\0';

    for c in expression.chars() {
        if let Some(open) = quote {
            if c == open && previous != '\\' {
                quote = None;
            }
            previous = c;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '*' | '?' => return false,
            '.' if previous == '.' => return false,
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            ',' | ':' if bracket_depth > 0 => return false,
            _ => {}
        }
        previous = c;
    }
    true
}
