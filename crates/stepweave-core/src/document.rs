//! The generic payload type and response body normalization.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// An ordered-key, arbitrarily nested semi-structured value.
///
/// Requests, responses and settings overrides all travel as documents.
pub type Document = Value;

/// Key under which transports place raw response payloads.
pub const BODY_KEY: &str = "body";

const TEXT_KEY: &str = "#text";
const ATTRIBUTE_PREFIX: &str = "-";

/// Returns a copy of `response` whose string `body` has been parsed.
///
/// A body holding serialized JSON is replaced by the parsed value, a body
/// holding XML by its document form (see [`xml_to_document`]). Any other body
/// is left as-is.
pub fn normalize_body(response: &Document) -> Document {
    let mut normalized = response.clone();
    if let Some(body) = normalized.get_mut(BODY_KEY) {
        if let Some(parsed) = body.as_str().and_then(parse_structured) {
            *body = parsed;
        }
    }
    normalized
}

fn parse_structured(raw: &str) -> Option<Document> {
    let trimmed = raw.trim();
    match trimmed.chars().next() {
        Some('{') | Some('[') => serde_json::from_str(trimmed).ok(),
        Some('<') => xml_to_document(trimmed).ok(),
        _ => None,
    }
}

/// Converts an XML string into a document.
///
/// The root element becomes the single top-level key. Attributes are stored
/// under `-name` keys, text mixed with attributes or children under `#text`,
/// repeated sibling elements collapse into an array, and an element holding
/// only text becomes a string.
pub fn xml_to_document(xml: &str) -> Result<Document, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // Each open element: its name and the object collected so far.
    let mut stack: Vec<(String, Map<String, Value>)> = Vec::new();
    let mut root = Map::new();

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) => {
                let frame = open_element(&start)?;
                stack.push(frame);
            }
            Event::Empty(start) => {
                let (name, attributes) = open_element(&start)?;
                let value = close_element(attributes);
                attach(&mut stack, &mut root, name, value);
            }
            Event::End(_) => {
                let (name, fields) = stack
                    .pop()
                    .ok_or_else(|| "unbalanced closing tag".to_string())?;
                let value = close_element(fields);
                attach(&mut stack, &mut root, name, value);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| e.to_string())?;
                append_text(&mut stack, &text)?;
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                append_text(&mut stack, &text)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err("unclosed element at end of input".to_string());
    }
    if root.is_empty() {
        return Err("no root element".to_string());
    }
    Ok(Value::Object(root))
}

fn open_element(start: &BytesStart<'_>) -> Result<(String, Map<String, Value>), String> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut fields = Map::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(|e| e.to_string())?;
        fields.insert(
            format!("{ATTRIBUTE_PREFIX}{key}"),
            Value::String(value.into_owned()),
        );
    }
    Ok((name, fields))
}

fn append_text(stack: &mut [(String, Map<String, Value>)], text: &str) -> Result<(), String> {
    let (_, fields) = stack
        .last_mut()
        .ok_or_else(|| "text outside of root element".to_string())?;
    match fields.get_mut(TEXT_KEY) {
        Some(Value::String(existing)) => existing.push_str(text),
        _ => {
            fields.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
        }
    }
    Ok(())
}

fn close_element(mut fields: Map<String, Value>) -> Value {
    if fields.is_empty() {
        return Value::Null;
    }
    if fields.len() == 1 {
        if let Some(text) = fields.remove(TEXT_KEY) {
            return text;
        }
    }
    Value::Object(fields)
}

fn attach(
    stack: &mut [(String, Map<String, Value>)],
    root: &mut Map<String, Value>,
    name: String,
    value: Value,
) {
    let parent = match stack.last_mut() {
        Some((_, fields)) => fields,
        None => root,
    };
    match parent.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            parent.insert(name, value);
        }
    }
}
