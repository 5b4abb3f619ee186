//! The serialization engine.
//!
//! Executes a compiled field list against one object, a list of objects,
//! or a JSON encoder's recursion. Engines are disposable: construct one
//! per call, read the result, drop it.

use std::fmt::{self, Debug};
use std::sync::Arc;

use once_cell::unsync::OnceCell;
use serde::ser::{Error as _, SerializeMap, SerializeSeq, Serializer as SerdeSerializer};
use serde::{Deserialize, Serialize};

use crate::accessor::Retrieved;
use crate::error::{Result, SchemaError};
use crate::schema::{Access, CompiledNested, ResolvedField, Schema, Transform};
use crate::value::{FieldMap, Value};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options passed through verbatim to the JSON encoder layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JsonOptions {
    /// Emit pretty-printed JSON.
    #[serde(default)]
    pub pretty: bool,
    /// Emit map keys in sorted order instead of field order.
    #[serde(default)]
    pub sort_keys: bool,
}

/// Construction options for a [`Serializer`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SerializeOptions {
    /// Subset of declared field names to serialize; `None` means all.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Treat the held data as a list of objects.
    #[serde(default)]
    pub many: bool,
    /// Produce JSON text instead of in-memory maps.
    #[serde(default)]
    pub to_json: bool,
    /// Encoder options used when `to_json` is set.
    #[serde(default)]
    pub json: JsonOptions,
}

/// The produced result: a single mapping, a list of mappings, or JSON
/// text, depending on the construction flags.
#[derive(Clone, Debug, PartialEq)]
pub enum Serialized {
    One(FieldMap),
    Many(Vec<FieldMap>),
    Json(String),
}

impl Serialized {
    pub fn as_one(&self) -> Option<&FieldMap> {
        match self {
            Serialized::One(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_many(&self) -> Option<&[FieldMap]> {
        match self {
            Serialized::Many(maps) => Some(maps),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&str> {
        match self {
            Serialized::Json(text) => Some(text),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A single-use serialization engine bound to a schema's compiled fields.
///
/// The first computed result is cached on the instance and returned
/// unchanged by every later call; the held data must not change after
/// construction. A legitimately empty result counts as computed.
pub struct Serializer {
    data: Option<Value>,
    many: bool,
    to_json: bool,
    json: JsonOptions,
    fields: Vec<ResolvedField>,
    result: OnceCell<Serialized>,
}

impl Serializer {
    /// Build an engine for `schema` over `data`.
    ///
    /// Fails immediately when `options.fields` names fields the schema
    /// does not declare.
    pub fn new(schema: &Arc<Schema>, data: Option<Value>, options: SerializeOptions) -> Result<Self> {
        let fields = schema.select_fields(options.fields.as_deref())?;
        Ok(Serializer {
            data,
            many: options.many,
            to_json: options.to_json,
            json: options.json,
            fields,
            result: OnceCell::new(),
        })
    }

    /// Serialize the held data. Idempotent by cache.
    pub fn serialize(&self) -> Result<&Serialized> {
        self.result.get_or_try_init(|| self.compute(None))
    }

    /// Serialize, falling back to `object` when the engine holds no data.
    pub fn serialize_with(&self, object: &Value) -> Result<&Serialized> {
        self.result.get_or_try_init(|| self.compute(Some(object)))
    }

    fn compute(&self, fallback: Option<&Value>) -> Result<Serialized> {
        let Some(data) = self.data.as_ref().or(fallback) else {
            return Err(SchemaError::NoData);
        };
        log::trace!(
            "serializing {} fields (many={}, to_json={})",
            self.fields.len(),
            self.many,
            self.to_json
        );

        if self.to_json {
            let view = JsonView {
                value: data,
                fields: &self.fields,
                sort_keys: self.json.sort_keys,
            };
            let text = if self.json.pretty {
                serde_json::to_string_pretty(&view)?
            } else {
                serde_json::to_string(&view)?
            };
            return Ok(Serialized::Json(text));
        }

        if self.many {
            let items = match data {
                Value::List(items) => items,
                other => return Err(SchemaError::NotMany(other.category().to_string())),
            };
            let results = items
                .iter()
                .map(|item| apply_fields(&self.fields, item))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Serialized::Many(results));
        }

        Ok(Serialized::One(apply_fields(&self.fields, data)?))
    }
}

impl Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("fields", &self.fields.len())
            .field("many", &self.many)
            .field("to_json", &self.to_json)
            .field("computed", &self.result.get().is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate the resolved fields against one object, in order.
///
/// A field whose accessor reports the missing marker is omitted from the
/// result entirely; everything else is transformed (if a transform is
/// declared) and bound to its alias.
pub(crate) fn apply_fields(fields: &[ResolvedField], object: &Value) -> Result<FieldMap> {
    let mut out = FieldMap::with_capacity(fields.len());
    for field in fields {
        let retrieved = match &field.access {
            Access::Attribute(accessor) => accessor.get(object)?,
            Access::Method(method) => Retrieved::Value(method(object)?),
        };
        let value = match retrieved {
            Retrieved::Missing => continue,
            Retrieved::Value(value) => value,
        };
        let value = match &field.transform {
            Transform::None => value,
            Transform::Func(transform) => transform(value)?,
            Transform::Nested(nested) => apply_nested(nested, value)?,
        };
        out.insert(field.alias.clone(), value);
    }
    Ok(out)
}

fn apply_nested(nested: &CompiledNested, value: Value) -> Result<Value> {
    if nested.many {
        let items = match value {
            Value::List(items) => items,
            other => return Err(SchemaError::NotMany(other.category().to_string())),
        };
        let results = items
            .iter()
            .map(|item| apply_fields(&nested.fields, item).map(Value::Map))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::List(results))
    } else {
        Ok(Value::Map(apply_fields(&nested.fields, &value)?))
    }
}

// ---------------------------------------------------------------------------
// JSON mode
// ---------------------------------------------------------------------------

/// Serde view over a value tree that resolves `Object` nodes through the
/// engine's field list as the encoder recurses. This is the extension
/// hook of a standard recursive encoder: anything natively encodable is
/// written as-is, and an unencodable object is first turned into a
/// mapping the encoder then descends into.
struct JsonView<'a> {
    value: &'a Value,
    fields: &'a [ResolvedField],
    sort_keys: bool,
}

impl JsonView<'_> {
    fn child<'b>(&'b self, value: &'b Value) -> JsonView<'b> {
        JsonView {
            value,
            fields: self.fields,
            sort_keys: self.sort_keys,
        }
    }

    fn serialize_entries<S>(&self, serializer: S, map: &FieldMap) -> std::result::Result<S::Ok, S::Error>
    where
        S: SerdeSerializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        if self.sort_keys {
            let mut entries: Vec<(&str, &Value)> = map.iter().collect();
            entries.sort_by_key(|(key, _)| *key);
            for (key, value) in entries {
                out.serialize_entry(key, &self.child(value))?;
            }
        } else {
            for (key, value) in map.iter() {
                out.serialize_entry(key, &self.child(value))?;
            }
        }
        out.end()
    }
}

impl Serialize for JsonView<'_> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: SerdeSerializer,
    {
        match self.value {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&self.child(item))?;
                }
                seq.end()
            }
            Value::Map(map) => self.serialize_entries(serializer, map),
            Value::Object(_) => {
                let map = apply_fields(self.fields, self.value).map_err(S::Error::custom)?;
                self.serialize_entries(serializer, &map)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// One-shot conveniences
// ---------------------------------------------------------------------------

impl Schema {
    /// Serialize one object with every declared field.
    pub fn serialize(&self, object: &Value) -> Result<FieldMap> {
        apply_fields(self.fields(), object)
    }

    /// Serialize a sequence of objects, preserving order and length.
    pub fn serialize_many(&self, objects: &[Value]) -> Result<Vec<FieldMap>> {
        objects
            .iter()
            .map(|object| apply_fields(self.fields(), object))
            .collect()
    }

    /// Serialize one object (or object graph) straight to JSON text.
    pub fn to_json(&self, object: &Value) -> Result<String> {
        let view = JsonView {
            value: object,
            fields: self.fields(),
            sort_keys: false,
        };
        Ok(serde_json::to_string(&view)?)
    }

    /// Build an engine over `data` with default options.
    pub fn serializer(self: &Arc<Self>, data: impl Into<Value>) -> Result<Serializer> {
        Serializer::new(self, Some(data.into()), SerializeOptions::default())
    }

    /// Build an engine with explicit options; `data` may be deferred to
    /// [`Serializer::serialize_with`].
    pub fn serializer_with(
        self: &Arc<Self>,
        data: Option<Value>,
        options: SerializeOptions,
    ) -> Result<Serializer> {
        Serializer::new(self, data, options)
    }
}
