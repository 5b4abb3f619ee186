//! Attribute-path compilation and retrieval.
//!
//! Declared field names reach nested attributes through a two-character
//! `__` delimiter: `a__b__c` reads attribute `a`, then `b`, then `c`.
//! Underscore-only segments keep the delimiter literal so private-style
//! names still participate (`_a___c` reads `_a`, then `_c`).

use crate::error::{Result, SchemaError};
use crate::value::Value;

/// Outcome of a fault-tolerant retrieval: either a real value (which may
/// legitimately be `Value::Null`) or the absence of the attribute.
///
/// `Missing` is a dedicated tag, never a value; it cannot leak into
/// results because the engine drops the field when it appears.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Retrieved {
    Value(Value),
    Missing,
}

/// Validate that a path segment is not empty and not all underscores.
fn valid(segment: &str) -> bool {
    !segment.is_empty() && !segment.chars().all(|c| c == '_')
}

/// Build the dotted accessor path for a declared field name.
///
/// ```text
/// "a__b"    -> "a.b"
/// "a__b__c" -> "a.b.c"
/// "_a___c"  -> "_a._c"
/// "__a"     -> "__a"
/// ```
pub(crate) fn construct_accessor(attribute: &str) -> String {
    let Some((before, after)) = attribute.split_once("__") else {
        return attribute.to_string();
    };

    if valid(before) && valid(after) {
        return format!("{before}.{}", construct_accessor(after));
    }

    // The delimiter sits next to an underscore-only segment; keep it
    // literal and only recurse past it when something real follows.
    let mut accessor = format!("{before}__");
    if valid(after) {
        accessor.push_str(&construct_accessor(after));
        return accessor;
    }
    accessor.push_str(after);
    accessor
}

/// A compiled attribute accessor.
///
/// The path segments are computed once at schema-compile time and walked
/// on every call. Strict accessors propagate the attribute-lookup failure
/// of the first segment that does not resolve; tolerant ones (used for
/// `optional` fields) short-circuit to [`Retrieved::Missing`] instead.
#[derive(Clone, Debug)]
pub(crate) struct Accessor {
    segments: Vec<String>,
    tolerant: bool,
}

impl Accessor {
    /// Compile the accessor for a declared field name. `literal` disables
    /// path splitting entirely (the `disable_accessor` setting).
    pub(crate) fn compile(field_name: &str, literal: bool, tolerant: bool) -> Self {
        let segments = if literal {
            vec![field_name.to_string()]
        } else {
            construct_accessor(field_name)
                .split('.')
                .map(str::to_string)
                .collect()
        };
        Accessor { segments, tolerant }
    }

    /// Retrieve the value at the compiled path.
    pub(crate) fn get(&self, object: &Value) -> Result<Retrieved> {
        let mut current: Option<Value> = None;
        for segment in &self.segments {
            let receiver = current.as_ref().unwrap_or(object);
            match receiver.attr(segment) {
                Some(value) => current = Some(value),
                None if self.tolerant => return Ok(Retrieved::Missing),
                None => {
                    return Err(SchemaError::Attribute {
                        type_name: receiver.type_name(),
                        attribute: segment.clone(),
                    })
                }
            }
        }
        Ok(Retrieved::Value(current.unwrap_or_else(|| object.clone())))
    }
}
