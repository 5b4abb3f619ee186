//! Declarative field mapping and serialization for arbitrary source objects.
//!
//! This crate compiles declared schemas into ordered lists of resolved
//! fields and executes them against any type implementing [`Source`]:
//! - schema declaration with inheritance, mixins and per-field overrides
//! - an attribute-path micro-language (`a__b__c`) with optional-field
//!   missing-attribute semantics
//! - single, many and JSON serialization modes, with nested object
//!   graphs resolved during the JSON encoder's own recursion
//! - a runtime schema factory and a process-wide schema registry
//!
//! ```
//! use stencil::{record, FieldSpec, Schema, Value};
//!
//! let schema = Schema::builder("PointSchema")
//!     .field("x", FieldSpec::Plain)
//!     .field("y", FieldSpec::Plain)
//!     .build()?;
//!
//! let point = record! { "x" => 1, "y" => 2 };
//! let result = schema.serialize(&point)?;
//! assert_eq!(result.get("x"), Some(&Value::Int(1)));
//! # Ok::<(), stencil::SchemaError>(())
//! ```

mod accessor;
pub mod error;
mod macros;
pub mod registry;
pub mod schema;
pub mod serializer;
pub mod value;

pub use error::{Result, SchemaError};
pub use registry::{lookup_schema, register_schema};
pub use schema::{
    make_schema, Base, FieldSpec, MethodFn, Mixin, MixinBuilder, Namespace, NestedSchema, Schema,
    SchemaBuilder, SchemaSettings, TransformFn,
};
pub use serializer::{JsonOptions, SerializeOptions, Serialized, Serializer};
pub use value::{FieldMap, Record, Source, Value};

#[cfg(test)]
mod tests;
