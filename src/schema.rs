//! Schema declaration, merging and field compilation.
//!
//! A schema is declared once (with [`SchemaBuilder`] or [`make_schema`]),
//! merged across its base chain, compiled into an ordered list of
//! resolved fields, and cached for its whole lifetime. Engine instances
//! only ever read the compiled list.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::accessor::Accessor;
use crate::error::{Result, SchemaError};
use crate::registry;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Type aliases for the type-erased callables carried by compiled fields.
// ---------------------------------------------------------------------------

/// Post-retrieval transform applied to a raw attribute value.
pub type TransformFn = dyn Fn(Value) -> Result<Value> + Send + Sync;

/// Named schema method invoked with the whole source object. A field that
/// references one performs no attribute retrieval of its own.
pub type MethodFn = dyn Fn(&Value) -> Result<Value> + Send + Sync;

// ---------------------------------------------------------------------------
// Field specifiers
// ---------------------------------------------------------------------------

/// Declared mapping for a single field name.
#[derive(Clone)]
pub enum FieldSpec {
    /// Pass the retrieved value through untouched.
    Plain,
    /// Apply a callable to the retrieved value.
    Transform(Arc<TransformFn>),
    /// Call the named schema method with the whole source object.
    Method(String),
    /// Serialize the retrieved value with a nested schema.
    Nested(NestedSchema),
}

impl FieldSpec {
    /// Wrap a closure as a transform specifier.
    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        FieldSpec::Transform(Arc::new(f))
    }

    /// Reference a method declared in the schema namespace.
    pub fn method(name: impl Into<String>) -> Self {
        FieldSpec::Method(name.into())
    }

    /// Embed a single nested object through `schema`.
    pub fn nested(schema: &Arc<Schema>) -> Self {
        FieldSpec::Nested(NestedSchema::new(schema.clone()))
    }

    /// Bulk-embed a list of nested objects through `schema`.
    pub fn nested_many(schema: &Arc<Schema>) -> Self {
        FieldSpec::Nested(NestedSchema::new(schema.clone()).many())
    }
}

impl Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSpec::Plain => write!(f, "Plain"),
            FieldSpec::Transform(_) => write!(f, "Transform(<fn>)"),
            FieldSpec::Method(name) => write!(f, "Method({name})"),
            FieldSpec::Nested(nested) => write!(f, "Nested({})", nested.schema.name()),
        }
    }
}

impl From<NestedSchema> for FieldSpec {
    fn from(nested: NestedSchema) -> Self {
        FieldSpec::Nested(nested)
    }
}

impl From<Arc<Schema>> for FieldSpec {
    fn from(schema: Arc<Schema>) -> Self {
        FieldSpec::Nested(NestedSchema::new(schema))
    }
}

impl From<&Arc<Schema>> for FieldSpec {
    fn from(schema: &Arc<Schema>) -> Self {
        FieldSpec::Nested(NestedSchema::new(schema.clone()))
    }
}

/// A nested schema application, with its own single/many rule and an
/// optional field subset. Built from a bare `Arc<Schema>` it uses the
/// defaults: every field, single-object rule.
#[derive(Clone)]
pub struct NestedSchema {
    schema: Arc<Schema>,
    many: bool,
    fields: Option<Vec<String>>,
}

impl NestedSchema {
    pub fn new(schema: Arc<Schema>) -> Self {
        NestedSchema {
            schema,
            many: false,
            fields: None,
        }
    }

    /// Apply the many-object rule: the retrieved value must be a list and
    /// every element is embedded.
    pub fn many(mut self) -> Self {
        self.many = true;
        self
    }

    /// Restrict the embedding to a subset of the nested schema's fields.
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

impl Debug for NestedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NestedSchema({}, many={})", self.schema.name(), self.many)
    }
}

impl From<Arc<Schema>> for NestedSchema {
    fn from(schema: Arc<Schema>) -> Self {
        NestedSchema::new(schema)
    }
}

// ---------------------------------------------------------------------------
// Namespace and settings
// ---------------------------------------------------------------------------

/// A binding in the schema namespace (the class-body analogue): either a
/// field's output alias or a named method.
#[derive(Clone)]
pub(crate) enum NamespaceEntry {
    Alias(String),
    Method(Arc<MethodFn>),
}

/// Namespace bindings supplied to [`make_schema`].
#[derive(Clone, Default)]
pub struct Namespace {
    entries: Vec<(String, NamespaceEntry)>,
}

impl Namespace {
    pub fn new() -> Self {
        Namespace::default()
    }

    /// Bind a field name to a different output alias.
    pub fn alias(mut self, field: impl Into<String>, alias: impl Into<String>) -> Self {
        self.entries
            .push((field.into(), NamespaceEntry::Alias(alias.into())));
        self
    }

    /// Bind a named method usable by [`FieldSpec::Method`].
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.entries
            .push((name.into(), NamespaceEntry::Method(Arc::new(f))));
        self
    }
}

/// Per-schema settings recognized by the field compiler.
///
/// Settings are a namespace-level binding: in an inheritance chain the
/// most-derived declaration carrying settings wins wholly, there is no
/// per-key merging.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaSettings {
    /// Fields whose missing attributes are silently skipped.
    #[serde(default)]
    pub optional: HashSet<String>,
    /// Fields whose names are taken literally, never split on `__`.
    #[serde(default)]
    pub disable_accessor: HashSet<String>,
}

impl SchemaSettings {
    pub fn new() -> Self {
        SchemaSettings::default()
    }

    pub fn optional<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn disable_accessor<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disable_accessor
            .extend(names.into_iter().map(Into::into));
        self
    }
}

// ---------------------------------------------------------------------------
// Declarations, mixins and bases
// ---------------------------------------------------------------------------

/// The declared body of a schema or mixin: ordered field specifiers plus
/// namespace bindings. Re-binding a name within one body replaces the
/// value but keeps the original position.
#[derive(Clone, Default)]
pub(crate) struct Declaration {
    fields: Vec<(String, FieldSpec)>,
    namespace: HashMap<String, NamespaceEntry>,
    settings: Option<SchemaSettings>,
}

impl Declaration {
    fn add_field(&mut self, name: String, spec: FieldSpec) {
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = spec,
            None => self.fields.push((name, spec)),
        }
    }
}

/// A declaration-only base: contributes field specifiers and namespace
/// bindings to the merge without being a usable schema itself.
pub struct Mixin {
    name: String,
    decl: Declaration,
}

impl Mixin {
    pub fn builder(name: impl Into<String>) -> MixinBuilder {
        MixinBuilder {
            name: name.into(),
            decl: Declaration::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for Mixin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mixin({})", self.name)
    }
}

/// Builder for a [`Mixin`]. Mixins carry no compiled fields, so building
/// one cannot fail.
pub struct MixinBuilder {
    name: String,
    decl: Declaration,
}

impl MixinBuilder {
    pub fn field(mut self, name: impl Into<String>, spec: impl Into<FieldSpec>) -> Self {
        self.decl.add_field(name.into(), spec.into());
        self
    }

    pub fn alias(mut self, field: impl Into<String>, alias: impl Into<String>) -> Self {
        self.decl
            .namespace
            .insert(field.into(), NamespaceEntry::Alias(alias.into()));
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.decl
            .namespace
            .insert(name.into(), NamespaceEntry::Method(Arc::new(f)));
        self
    }

    pub fn settings(mut self, settings: SchemaSettings) -> Self {
        self.decl.settings = Some(settings);
        self
    }

    pub fn build(self) -> Arc<Mixin> {
        Arc::new(Mixin {
            name: self.name,
            decl: self.decl,
        })
    }
}

/// A base participating in schema inheritance.
#[derive(Clone, Debug)]
pub enum Base {
    Schema(Arc<Schema>),
    Mixin(Arc<Mixin>),
}

impl From<Arc<Schema>> for Base {
    fn from(schema: Arc<Schema>) -> Self {
        Base::Schema(schema)
    }
}

impl From<Arc<Mixin>> for Base {
    fn from(mixin: Arc<Mixin>) -> Self {
        Base::Mixin(mixin)
    }
}

// ---------------------------------------------------------------------------
// Resolved fields
// ---------------------------------------------------------------------------

/// The compiled unit for one field: output alias, value access strategy
/// and optional transform. Fixed for the lifetime of the schema; shared
/// by every engine instance through cheap clones.
#[derive(Clone)]
pub(crate) struct ResolvedField {
    pub(crate) name: String,
    pub(crate) alias: String,
    pub(crate) access: Access,
    pub(crate) transform: Transform,
}

#[derive(Clone)]
pub(crate) enum Access {
    Attribute(Accessor),
    Method(Arc<MethodFn>),
}

#[derive(Clone)]
pub(crate) enum Transform {
    None,
    Func(Arc<TransformFn>),
    Nested(CompiledNested),
}

/// A nested embedding with its field subset already selected and
/// validated at compile time.
#[derive(Clone)]
pub(crate) struct CompiledNested {
    pub(crate) fields: Vec<ResolvedField>,
    pub(crate) many: bool,
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A compiled schema: the ordered resolved fields plus the declaration
/// retained so further schemas can derive from it.
pub struct Schema {
    name: String,
    decl: Declaration,
    bases: Vec<Base>,
    fields: Vec<ResolvedField>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            bases: Vec::new(),
            decl: Declaration::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared field names in merged order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name.as_str()).collect()
    }

    pub(crate) fn fields(&self) -> &[ResolvedField] {
        &self.fields
    }

    /// Resolve a field subset against the compiled list, preserving the
    /// schema's field order. `None` selects every field. Unknown names
    /// fail before any evaluation happens.
    pub(crate) fn select_fields(&self, subset: Option<&[String]>) -> Result<Vec<ResolvedField>> {
        let Some(names) = subset else {
            return Ok(self.fields.clone());
        };
        let mut unknown: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| !self.fields.iter().any(|field| field.name == *name))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(SchemaError::UnknownFields(unknown.join(", ")));
        }
        Ok(self
            .fields
            .iter()
            .filter(|field| names.iter().any(|name| *name == field.name))
            .cloned()
            .collect())
    }
}

impl Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("fields", &self.field_names())
            .finish()
    }
}

/// Builder for declaring a schema the way a class body would.
pub struct SchemaBuilder {
    name: String,
    bases: Vec<Base>,
    decl: Declaration,
}

impl SchemaBuilder {
    /// Declare a field. Accepts a [`FieldSpec`], a nested schema, or a
    /// [`NestedSchema`] embedding directly.
    pub fn field(mut self, name: impl Into<String>, spec: impl Into<FieldSpec>) -> Self {
        self.decl.add_field(name.into(), spec.into());
        self
    }

    /// Bind a field name to a different output alias.
    pub fn alias(mut self, field: impl Into<String>, alias: impl Into<String>) -> Self {
        self.decl
            .namespace
            .insert(field.into(), NamespaceEntry::Alias(alias.into()));
        self
    }

    /// Declare a named method usable by [`FieldSpec::Method`].
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.decl
            .namespace
            .insert(name.into(), NamespaceEntry::Method(Arc::new(f)));
        self
    }

    /// Mark fields whose missing attributes are skipped instead of failing.
    pub fn optional<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decl
            .settings
            .get_or_insert_with(SchemaSettings::default)
            .optional
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Mark fields whose names are never split on `__`.
    pub fn disable_accessor<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decl
            .settings
            .get_or_insert_with(SchemaSettings::default)
            .disable_accessor
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Replace the settings wholesale.
    pub fn settings(mut self, settings: SchemaSettings) -> Self {
        self.decl.settings = Some(settings);
        self
    }

    /// Inherit from another schema.
    pub fn base(mut self, schema: &Arc<Schema>) -> Self {
        self.bases.push(Base::Schema(schema.clone()));
        self
    }

    /// Mix in a declaration-only base.
    pub fn mixin(mut self, mixin: &Arc<Mixin>) -> Self {
        self.bases.push(Base::Mixin(mixin.clone()));
        self
    }

    /// Merge, compile and register the schema.
    pub fn build(self) -> Result<Arc<Schema>> {
        compile_schema(self.name, self.bases, self.decl)
    }
}

// ---------------------------------------------------------------------------
// Merge and compile
// ---------------------------------------------------------------------------

/// Merged view of a schema's whole base chain.
struct Merged<'a> {
    /// First-seen (most-derived) specifier per field name, in merge order.
    fields: Vec<(&'a str, &'a FieldSpec)>,
    /// Most-derived namespace binding per name.
    namespace: HashMap<&'a str, &'a NamespaceEntry>,
    /// Most-derived settings, taken wholly.
    settings: SchemaSettings,
}

/// Collect base declarations most-derived-first, depth-first,
/// deduplicated by identity.
fn collect_declarations<'a>(
    bases: &'a [Base],
    out: &mut Vec<&'a Declaration>,
    seen: &mut HashSet<usize>,
) {
    for base in bases {
        match base {
            Base::Schema(schema) => {
                if seen.insert(Arc::as_ptr(schema) as usize) {
                    out.push(&schema.decl);
                    collect_declarations(&schema.bases, out, seen);
                }
            }
            Base::Mixin(mixin) => {
                if seen.insert(Arc::as_ptr(mixin) as usize) {
                    out.push(&mixin.decl);
                }
            }
        }
    }
}

/// Merge the collected declarations. The walk is most-derived-first, so a
/// name's first occurrence fixes both its position and its value.
fn merge_declarations<'a>(decls: &[&'a Declaration]) -> Merged<'a> {
    let mut fields = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut namespace: HashMap<&str, &NamespaceEntry> = HashMap::new();
    let mut settings: Option<SchemaSettings> = None;

    for decl in decls {
        for (name, spec) in &decl.fields {
            if seen.insert(name.as_str()) {
                fields.push((name.as_str(), spec));
            }
        }
        for (name, entry) in &decl.namespace {
            namespace.entry(name.as_str()).or_insert(entry);
        }
        if settings.is_none() {
            settings.clone_from(&decl.settings);
        }
    }

    Merged {
        fields,
        namespace,
        settings: settings.unwrap_or_default(),
    }
}

/// Compile one field against the merged view.
fn resolve_field(field_name: &str, spec: &FieldSpec, merged: &Merged<'_>) -> Result<ResolvedField> {
    let alias = match merged.namespace.get(field_name) {
        Some(NamespaceEntry::Alias(alias)) => alias.clone(),
        _ => field_name.to_string(),
    };

    let literal = merged.settings.disable_accessor.contains(field_name);
    let tolerant = merged.settings.optional.contains(field_name);
    let mut access = Access::Attribute(Accessor::compile(field_name, literal, tolerant));

    let transform = match spec {
        FieldSpec::Plain => Transform::None,
        FieldSpec::Transform(f) => Transform::Func(f.clone()),
        FieldSpec::Nested(nested) => {
            let fields = nested.schema.select_fields(nested.fields.as_deref())?;
            Transform::Nested(CompiledNested {
                fields,
                many: nested.many,
            })
        }
        FieldSpec::Method(method_name) => {
            match merged.namespace.get(method_name.as_str()) {
                Some(NamespaceEntry::Method(f)) => access = Access::Method(f.clone()),
                Some(_) => return Err(SchemaError::InvalidMethod(method_name.clone())),
                None => return Err(SchemaError::MissingMethod(method_name.clone())),
            }
            Transform::None
        }
    };

    Ok(ResolvedField {
        name: field_name.to_string(),
        alias,
        access,
        transform,
    })
}

fn compile_schema(name: String, bases: Vec<Base>, decl: Declaration) -> Result<Arc<Schema>> {
    let mut decls: Vec<&Declaration> = vec![&decl];
    let mut seen = HashSet::new();
    collect_declarations(&bases, &mut decls, &mut seen);
    let merged = merge_declarations(&decls);

    let mut fields = Vec::with_capacity(merged.fields.len());
    for (field_name, spec) in &merged.fields {
        fields.push(resolve_field(field_name, spec, &merged)?);
    }
    log::debug!("compiled schema '{}' with {} fields", name, fields.len());

    let schema = Arc::new(Schema {
        name,
        decl,
        bases,
        fields,
    });
    registry::register_schema(&schema);
    Ok(schema)
}

// ---------------------------------------------------------------------------
// Schema factory
// ---------------------------------------------------------------------------

/// Reserved words rejected for dynamically supplied field and namespace
/// keys.
static RESERVED_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "_", "abstract", "as", "async", "await", "become", "box", "break", "const", "continue",
        "crate", "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "if",
        "impl", "in", "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv",
        "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true",
        "try", "type", "typeof", "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
    ]
    .into_iter()
    .collect()
});

/// `true` when `name` is a syntactically legal identifier.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Build a schema at runtime from explicit field and namespace mappings,
/// the dynamic equivalent of declaring one with [`SchemaBuilder`].
///
/// Every field and namespace key must be a legal identifier and not a
/// reserved word. When `bases` is non-empty at least one of them must be
/// a schema; an empty base list roots the schema directly.
pub fn make_schema(
    name: impl Into<String>,
    bases: Vec<Base>,
    fields: Vec<(String, FieldSpec)>,
    namespace: Namespace,
    settings: Option<SchemaSettings>,
) -> Result<Arc<Schema>> {
    for key in fields
        .iter()
        .map(|(name, _)| name)
        .chain(namespace.entries.iter().map(|(name, _)| name))
    {
        if !is_identifier(key) {
            return Err(SchemaError::InvalidIdentifier(key.clone()));
        }
        if RESERVED_WORDS.contains(key.as_str()) {
            return Err(SchemaError::ReservedWord(key.clone()));
        }
    }

    if !bases.is_empty() && !bases.iter().any(|base| matches!(base, Base::Schema(_))) {
        return Err(SchemaError::Schema(
            "At least one base needs to be a schema".to_string(),
        ));
    }

    let mut decl = Declaration {
        settings,
        ..Declaration::default()
    };
    for (field_name, spec) in fields {
        decl.add_field(field_name, spec);
    }
    for (key, entry) in namespace.entries {
        decl.namespace.insert(key, entry);
    }

    compile_schema(name.into(), bases, decl)
}
