//! Selector resolution over the authorization document
//!
//! A selector is a dotted path with optional bracket indices
//! (`auth.identity.groups[0]`) and optional modifier suffixes, each
//! introduced by `@`:
//!
//! - `@case=lower` / `@case=upper`
//! - `@replace:old:new`
//! - `@extract:regex:group`
//!
//! Unknown paths resolve to [`Resolved::Unresolved`] rather than an
//! error so that optional fields can be addressed safely.

use regex::Regex;
use serde_json::Value;

/// Outcome of resolving a selector against a document
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// The selector addressed a value
    Value(Value),
    /// No value exists at the selector's path
    Unresolved,
}

impl Resolved {
    /// Check whether the selector failed to address a value
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Resolved::Unresolved)
    }

    /// The resolved value, if any
    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolved::Value(v) => Some(v),
            Resolved::Unresolved => None,
        }
    }

    /// String form of the resolved value; unresolved renders empty
    pub fn into_string(self) -> String {
        match self {
            Resolved::Value(v) => value_to_string(&v),
            Resolved::Unresolved => String::new(),
        }
    }
}

/// String form of a JSON value: strings unquoted, everything else as
/// compact JSON
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve a selector against a document
pub fn resolve(doc: &Value, selector: &str) -> Resolved {
    let mut parts = selector.split('@');
    let path = parts.next().unwrap_or_default().trim();

    let mut current = match walk(doc, path) {
        Some(v) => v.clone(),
        None => return Resolved::Unresolved,
    };

    for modifier in parts {
        current = match apply_modifier(current, modifier.trim()) {
            Some(v) => v,
            None => return Resolved::Unresolved,
        };
    }

    Resolved::Value(current)
}

/// Write a value at a plain dotted path, creating intermediate objects
///
/// Used by the phase runner, which is the sole writer of the document.
/// Modifiers and indices are not part of write paths.
pub fn set(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let segments: Vec<&str> = path.split('.').collect();

    for (i, segment) in segments.iter().enumerate() {
        if i == segments.len() - 1 {
            if let Value::Object(map) = current {
                map.insert((*segment).to_string(), value);
            }
            return;
        }
        let Value::Object(map) = current else {
            return;
        };
        current = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
    }
}

/// Either a literal value or a selector into the document, never both
#[derive(Debug, Clone, PartialEq)]
pub enum ValueOrSelector {
    /// A literal JSON value
    Static(Value),
    /// A selector resolved against the document at evaluation time
    Selector(String),
}

impl ValueOrSelector {
    /// Resolve against a document; unresolved selectors yield `Null`
    pub fn resolve(&self, doc: &Value) -> Value {
        match self {
            ValueOrSelector::Static(v) => v.clone(),
            ValueOrSelector::Selector(s) => {
                resolve(doc, s).into_value().unwrap_or(Value::Null)
            }
        }
    }

    /// Resolve to the string form; unresolved selectors yield empty
    pub fn resolve_string(&self, doc: &Value) -> String {
        match self {
            ValueOrSelector::Static(v) => value_to_string(v),
            ValueOrSelector::Selector(s) => resolve(doc, s).into_string(),
        }
    }
}

fn walk<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(doc);
    }

    let mut current = doc;
    for segment in path.split('.') {
        let (key, indices) = split_indices(segment)?;
        if !key.is_empty() {
            current = current.as_object()?.get(key)?;
        }
        for idx in indices {
            current = current.as_array()?.get(idx)?;
        }
    }
    Some(current)
}

/// Split `groups[0][1]` into `("groups", [0, 1])`
fn split_indices(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };

    let key = &segment[..open];
    let mut indices = Vec::new();
    let mut rest = &segment[open..];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indices.push(inner[..close].parse().ok()?);
        rest = &inner[close + 1..];
    }
    Some((key, indices))
}

fn apply_modifier(value: Value, modifier: &str) -> Option<Value> {
    let text = value_to_string(&value);

    if let Some(case) = modifier.strip_prefix("case=") {
        return match case {
            "lower" => Some(Value::String(text.to_lowercase())),
            "upper" => Some(Value::String(text.to_uppercase())),
            _ => None,
        };
    }

    if let Some(args) = modifier.strip_prefix("replace:") {
        let (old, new) = args.split_once(':')?;
        return Some(Value::String(text.replace(old, new)));
    }

    if let Some(args) = modifier.strip_prefix("extract:") {
        // The regex itself may contain ':', the group index cannot
        let (pattern, group) = args.rsplit_once(':')?;
        let group: usize = group.parse().ok()?;
        let re = Regex::new(pattern).ok()?;
        let captured = re.captures(&text)?.get(group)?;
        return Some(Value::String(captured.as_str().to_string()));
    }

    None
}
