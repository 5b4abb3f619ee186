use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::accessor::construct_accessor;
use crate::{
    make_schema, record, vlist, Base, FieldSpec, JsonOptions, Mixin, Namespace, NestedSchema,
    Schema, SchemaError, SchemaSettings, SerializeOptions, Serializer, Source, Value,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---------------- Merge order and overrides ----------------

#[test]
fn test_field_order_and_override() -> Result<()> {
    init_logging();

    let base = Schema::builder("OrderBase")
        .field("a", FieldSpec::Plain)
        .field("b", FieldSpec::Plain)
        .build()?;
    let derived = Schema::builder("OrderDerived")
        .base(&base)
        .field(
            "b",
            FieldSpec::transform(|value| match value {
                Value::Int(i) => Ok(Value::Int(i * 2)),
                other => Ok(other),
            }),
        )
        .field("c", FieldSpec::Plain)
        .build()?;

    // First-seen order walking most-derived to least, value from the
    // most-derived declaration.
    assert_eq!(derived.field_names(), vec!["b", "c", "a"]);

    let result = derived.serialize(&record! { "a" => 1, "b" => 2, "c" => 3 })?;
    assert_eq!(result.keys().collect::<Vec<_>>(), vec!["b", "c", "a"]);
    assert_eq!(result.get("b"), Some(&Value::Int(4)));
    assert_eq!(result.get("a"), Some(&Value::Int(1)));
    Ok(())
}

#[test]
fn test_alias_override_in_derived() -> Result<()> {
    let base = Schema::builder("AliasBase")
        .field("b", FieldSpec::Plain)
        .alias("b", "bee")
        .build()?;
    let derived = Schema::builder("AliasDerived")
        .base(&base)
        .alias("b", "buzz")
        .build()?;

    let result = derived.serialize(&record! { "b" => 1 })?;
    assert!(result.contains_key("buzz"));
    assert!(!result.contains_key("bee"));
    Ok(())
}

#[test]
fn test_settings_override_wholesale() -> Result<()> {
    let base = Schema::builder("SettingsBase")
        .field("x", FieldSpec::Plain)
        .optional(["x"])
        .build()?;

    // A derived schema without settings inherits the base's.
    let inherits = Schema::builder("SettingsInherits").base(&base).build()?;
    assert!(inherits.serialize(&record! {})?.is_empty());

    // A derived schema with its own settings replaces them wholly.
    let replaces = Schema::builder("SettingsReplaces")
        .base(&base)
        .settings(SchemaSettings::new())
        .build()?;
    let err = replaces.serialize(&record! {}).unwrap_err();
    assert!(matches!(err, SchemaError::Attribute { .. }));
    Ok(())
}

// ---------------- Accessor paths ----------------

#[test]
fn test_construct_accessor() {
    assert_eq!(construct_accessor("a"), "a");
    assert_eq!(construct_accessor("a__b"), "a.b");
    assert_eq!(construct_accessor("a__b__c"), "a.b.c");
    assert_eq!(construct_accessor("_a___c"), "_a._c");
    assert_eq!(construct_accessor("__a"), "__a");
    assert_eq!(construct_accessor("a__"), "a__");
}

#[test]
fn test_nested_attribute_path() -> Result<()> {
    let schema = Schema::builder("NestedPath")
        .field("e__nested_attribute", FieldSpec::Plain)
        .build()?;

    let object = record! { "e" => record! { "nested_attribute" => 7 } };
    let result = schema.serialize(&object)?;
    assert_eq!(result.get("e__nested_attribute"), Some(&Value::Int(7)));
    Ok(())
}

#[test]
fn test_disable_accessor_keeps_name_literal() -> Result<()> {
    let object = record! { "a__b" => 3 };

    let literal = Schema::builder("LiteralPath")
        .field("a__b", FieldSpec::Plain)
        .disable_accessor(["a__b"])
        .build()?;
    assert_eq!(literal.serialize(&object)?.get("a__b"), Some(&Value::Int(3)));

    // Without the setting the same name is split and the walk fails on
    // the first segment.
    let split = Schema::builder("SplitPath")
        .field("a__b", FieldSpec::Plain)
        .build()?;
    let err = split.serialize(&object).unwrap_err();
    assert!(matches!(err, SchemaError::Attribute { ref attribute, .. } if attribute == "a"));
    Ok(())
}

// ---------------- Optional fields ----------------

#[test]
fn test_optional_field_omitted_when_missing() -> Result<()> {
    let schema = Schema::builder("OptionalSchema")
        .field("x", FieldSpec::Plain)
        .optional(["x"])
        .build()?;

    assert!(schema.serialize(&record! {})?.is_empty());

    // A present null is a real value, not a missing attribute.
    let with_null = schema.serialize(&record! { "x" => Value::Null })?;
    assert_eq!(with_null.get("x"), Some(&Value::Null));

    let strict = Schema::builder("StrictSchema")
        .field("x", FieldSpec::Plain)
        .build()?;
    let err = strict.serialize(&record! {}).unwrap_err();
    assert!(matches!(err, SchemaError::Attribute { .. }));
    Ok(())
}

// ---------------- Aliases, transforms and methods ----------------

#[test]
fn test_alias_and_transform() -> Result<()> {
    let schema = Schema::builder("AliasSchema")
        .field("a", FieldSpec::Plain)
        .field(
            "b",
            FieldSpec::transform(|value| match value {
                Value::Int(i) => Ok(Value::Int(i + 10)),
                other => Ok(other),
            }),
        )
        .alias("b", "bee")
        .build()?;

    let result = schema.serialize(&record! { "a" => 1, "b" => 5 })?;
    assert_eq!(result.get("a"), Some(&Value::Int(1)));
    assert_eq!(result.get("bee"), Some(&Value::Int(15)));
    assert!(!result.contains_key("b"));
    Ok(())
}

#[test]
fn test_method_field() -> Result<()> {
    let schema = Schema::builder("MethodSchema")
        .field("first", FieldSpec::Plain)
        .field("display", FieldSpec::method("make_display"))
        .method("make_display", |object: &Value| {
            match (object.attr("first"), object.attr("last")) {
                (Some(Value::String(first)), Some(Value::String(last))) => {
                    Ok(Value::String(format!("{first} {last}")))
                }
                _ => Ok(Value::Null),
            }
        })
        .build()?;

    let result = schema.serialize(&record! { "first" => "Ada", "last" => "Lovelace" })?;
    assert_eq!(
        result.get("display"),
        Some(&Value::String("Ada Lovelace".into()))
    );
    Ok(())
}

#[test]
fn test_method_resolution_errors() {
    let err = Schema::builder("MissingMethodSchema")
        .field("x", FieldSpec::method("nope"))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::MissingMethod(name) if name == "nope"));

    let err = Schema::builder("InvalidMethodSchema")
        .field("x", FieldSpec::method("helper"))
        .alias("helper", "H")
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidMethod(name) if name == "helper"));
}

#[test]
fn test_transform_failure_propagates() -> Result<()> {
    let schema = Schema::builder("FailingTransform")
        .field(
            "x",
            FieldSpec::transform(|_| Err(SchemaError::Schema("boom".to_string()))),
        )
        .build()?;
    assert!(schema.serialize(&record! { "x" => 1 }).is_err());
    Ok(())
}

// ---------------- Nested schemas ----------------

#[test]
fn test_nested_single_and_many() -> Result<()> {
    let author = Schema::builder("AuthorSchema")
        .field("name", FieldSpec::Plain)
        .field("email", FieldSpec::Plain)
        .build()?;
    let post = Schema::builder("PostSchema")
        .field("title", FieldSpec::Plain)
        .field("author", &author)
        .field("reviewers", FieldSpec::nested_many(&author))
        .build()?;

    let object = record! {
        "title" => "T",
        "author" => record! { "name" => "A", "email" => "a@example.com" },
        "reviewers" => vlist![
            record! { "name" => "R1", "email" => "r1@example.com" },
            record! { "name" => "R2", "email" => "r2@example.com" },
        ],
    };
    let result = post.serialize(&object)?;

    match result.get("author") {
        Some(Value::Map(map)) => {
            assert_eq!(map.get("name"), Some(&Value::String("A".into())));
        }
        other => panic!("expected embedded map, got {other:?}"),
    }
    match result.get("reviewers") {
        Some(Value::List(items)) => {
            assert_eq!(items.len(), 2);
            match &items[1] {
                Value::Map(map) => {
                    assert_eq!(map.get("name"), Some(&Value::String("R2".into())))
                }
                other => panic!("expected embedded map, got {other:?}"),
            }
        }
        other => panic!("expected embedded list, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_nested_field_subset() -> Result<()> {
    let author = Schema::builder("SubsetAuthor")
        .field("name", FieldSpec::Plain)
        .field("email", FieldSpec::Plain)
        .build()?;
    let brief = Schema::builder("BriefPost")
        .field("author", NestedSchema::new(author.clone()).fields(["name"]))
        .build()?;

    let object = record! { "author" => record! { "name" => "A", "email" => "a@example.com" } };
    match brief.serialize(&object)?.get("author") {
        Some(Value::Map(map)) => {
            assert!(map.contains_key("name"));
            assert!(!map.contains_key("email"));
        }
        other => panic!("expected embedded map, got {other:?}"),
    }

    let err = Schema::builder("BadNested")
        .field("author", NestedSchema::new(author).fields(["nope"]))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::UnknownFields(names) if names == "nope"));
    Ok(())
}

// ---------------- Engine modes ----------------

#[test]
fn test_many_mode_preserves_length_and_order() -> Result<()> {
    let schema = Schema::builder("ManySchema")
        .field("v", FieldSpec::Plain)
        .build()?;
    let data = vlist![
        record! { "v" => 1 },
        record! { "v" => 2 },
        record! { "v" => 3 },
    ];

    let engine = schema.serializer_with(
        Some(data),
        SerializeOptions {
            many: true,
            ..Default::default()
        },
    )?;
    let maps = engine.serialize()?.as_many().unwrap().to_vec();
    assert_eq!(maps.len(), 3);
    assert_eq!(maps[0].get("v"), Some(&Value::Int(1)));
    assert_eq!(maps[2].get("v"), Some(&Value::Int(3)));
    Ok(())
}

#[test]
fn test_many_mode_rejects_non_list() -> Result<()> {
    let schema = Schema::builder("ManyRejects")
        .field("v", FieldSpec::Plain)
        .build()?;
    let engine = schema.serializer_with(
        Some(Value::Int(1)),
        SerializeOptions {
            many: true,
            ..Default::default()
        },
    )?;
    let err = engine.serialize().unwrap_err();
    assert!(matches!(err, SchemaError::NotMany(category) if category == "int"));
    Ok(())
}

#[test]
fn test_field_subset_selection() -> Result<()> {
    let schema = Schema::builder("SubsetSchema")
        .field("a", FieldSpec::Plain)
        .field("b", FieldSpec::Plain)
        .field("c", FieldSpec::Plain)
        .build()?;

    let engine = schema.serializer_with(
        Some(record! { "a" => 1, "b" => 2, "c" => 3 }),
        SerializeOptions {
            fields: Some(vec!["c".to_string(), "a".to_string()]),
            ..Default::default()
        },
    )?;
    let map = engine.serialize()?.as_one().unwrap().clone();
    // Subsets keep the schema's field order, not the request order.
    assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "c"]);

    let err = Serializer::new(
        &schema,
        None,
        SerializeOptions {
            fields: Some(vec!["zap".to_string(), "b".to_string()]),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::UnknownFields(names) if names == "zap"));
    Ok(())
}

#[test]
fn test_serialize_is_idempotent() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let schema = Schema::builder("MemoSchema")
        .field(
            "a",
            FieldSpec::transform(move |value| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }),
        )
        .build()?;

    let engine = schema.serializer(record! { "a" => 1 })?;
    let first = engine.serialize()?.clone();
    let second = engine.serialize()?.clone();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[derive(Debug)]
struct CountingSource {
    hits: AtomicUsize,
}

impl Source for CountingSource {
    fn attr(&self, _name: &str) -> Option<Value> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        None
    }
}

#[test]
fn test_empty_result_is_memoized() -> Result<()> {
    let source = Arc::new(CountingSource {
        hits: AtomicUsize::new(0),
    });
    let schema = Schema::builder("EmptyMemoSchema")
        .field("x", FieldSpec::Plain)
        .optional(["x"])
        .build()?;

    let engine = schema.serializer_with(
        Some(Value::Object(source.clone() as Arc<dyn Source>)),
        SerializeOptions::default(),
    )?;
    assert!(engine.serialize()?.as_one().unwrap().is_empty());
    assert!(engine.serialize()?.as_one().unwrap().is_empty());
    // The empty result counts as computed; no second walk happened.
    assert_eq!(source.hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_deferred_data_and_no_data() -> Result<()> {
    let schema = Schema::builder("DeferredSchema")
        .field("x", FieldSpec::Plain)
        .build()?;
    let engine = schema.serializer_with(None, SerializeOptions::default())?;

    let err = engine.serialize().unwrap_err();
    assert!(matches!(err, SchemaError::NoData));

    let first = engine.serialize_with(&record! { "x" => 1 })?.clone();
    let second = engine.serialize_with(&record! { "x" => 2 })?.clone();
    assert_eq!(first, second);
    Ok(())
}

// ---------------- JSON mode ----------------

#[test]
fn test_json_round_trip_matches_single_mode() -> Result<()> {
    let schema = Schema::builder("JsonSchema")
        .field("name", FieldSpec::Plain)
        .field("count", FieldSpec::Plain)
        .field("missing", FieldSpec::Plain)
        .optional(["missing"])
        .build()?;

    let object = record! { "name" => "thing", "count" => 2 };
    let single = schema.serialize(&object)?;

    let engine = schema.serializer_with(
        Some(object),
        SerializeOptions {
            to_json: true,
            ..Default::default()
        },
    )?;
    let text = engine.serialize()?.as_json().unwrap().to_string();
    let parsed: serde_json::Value = serde_json::from_str(&text)?;

    assert_eq!(parsed, serde_json::to_value(&single)?);
    assert!(parsed.get("missing").is_none());
    Ok(())
}

#[test]
fn test_json_nested_object_graph() -> Result<()> {
    let node = Schema::builder("NodeSchema")
        .field("name", FieldSpec::Plain)
        .field("children", FieldSpec::Plain)
        .optional(["children"])
        .build()?;

    let tree = record! {
        "name" => "root",
        "children" => vlist![
            record! { "name" => "left" },
            record! {
                "name" => "right",
                "children" => vlist![record! { "name" => "leaf" }],
            },
        ],
    };

    let parsed: serde_json::Value = serde_json::from_str(&node.to_json(&tree)?)?;
    assert_eq!(
        parsed,
        serde_json::json!({
            "name": "root",
            "children": [
                { "name": "left" },
                { "name": "right", "children": [{ "name": "leaf" }] },
            ],
        })
    );
    Ok(())
}

#[test]
fn test_json_encoder_options() -> Result<()> {
    let schema = Schema::builder("SortedSchema")
        .field("b", FieldSpec::Plain)
        .field("a", FieldSpec::Plain)
        .build()?;
    let object = record! { "b" => 1, "a" => 2 };

    let plain = schema.serializer_with(
        Some(object.clone()),
        SerializeOptions {
            to_json: true,
            ..Default::default()
        },
    )?;
    assert_eq!(plain.serialize()?.as_json().unwrap(), r#"{"b":1,"a":2}"#);

    let sorted = schema.serializer_with(
        Some(object.clone()),
        SerializeOptions {
            to_json: true,
            json: JsonOptions {
                sort_keys: true,
                pretty: false,
            },
            ..Default::default()
        },
    )?;
    assert_eq!(sorted.serialize()?.as_json().unwrap(), r#"{"a":2,"b":1}"#);

    let pretty = schema.serializer_with(
        Some(object),
        SerializeOptions {
            to_json: true,
            json: JsonOptions {
                pretty: true,
                sort_keys: false,
            },
            ..Default::default()
        },
    )?;
    assert!(pretty.serialize()?.as_json().unwrap().contains('\n'));
    Ok(())
}

#[test]
fn test_json_mode_encodes_lists_natively() -> Result<()> {
    let schema = Schema::builder("JsonManySchema")
        .field("v", FieldSpec::Plain)
        .build()?;
    let data = vlist![record! { "v" => 1 }, record! { "v" => 2 }];

    let engine = schema.serializer_with(
        Some(data),
        SerializeOptions {
            to_json: true,
            many: true,
            ..Default::default()
        },
    )?;
    let parsed: serde_json::Value =
        serde_json::from_str(engine.serialize()?.as_json().unwrap())?;
    assert_eq!(parsed, serde_json::json!([{ "v": 1 }, { "v": 2 }]));
    Ok(())
}

#[test]
fn test_bare_object_refuses_plain_json_encoding() {
    let err = serde_json::to_string(&record! {}).unwrap_err();
    assert!(err.to_string().contains("unresolved object"));
}

// ---------------- Schema factory ----------------

#[test]
fn test_factory_with_optional_field() -> Result<()> {
    let schema = make_schema(
        "DynamicSchema",
        Vec::new(),
        vec![("x".to_string(), FieldSpec::Plain)],
        Namespace::new(),
        Some(SchemaSettings::new().optional(["x"])),
    )?;

    assert!(schema.serialize(&record! {})?.is_empty());
    assert_eq!(
        schema.serialize(&record! { "x" => 9 })?.get("x"),
        Some(&Value::Int(9))
    );
    Ok(())
}

#[test]
fn test_factory_rejects_bad_identifiers() {
    let err = make_schema(
        "BadIdentifiers",
        Vec::new(),
        vec![("not-ok".to_string(), FieldSpec::Plain)],
        Namespace::new(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidIdentifier(name) if name == "not-ok"));

    let err = make_schema(
        "BadKeyword",
        Vec::new(),
        vec![("fn".to_string(), FieldSpec::Plain)],
        Namespace::new(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::ReservedWord(name) if name == "fn"));

    let err = make_schema(
        "BadNamespaceKey",
        Vec::new(),
        Vec::new(),
        Namespace::new().alias("9lives", "cat"),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidIdentifier(name) if name == "9lives"));
}

#[test]
fn test_factory_base_rules() -> Result<()> {
    let mixin = Mixin::builder("TimestampsMixin")
        .field("created_at", FieldSpec::Plain)
        .build();

    let err = make_schema(
        "MixinOnly",
        vec![Base::Mixin(mixin.clone())],
        Vec::new(),
        Namespace::new(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::Schema(_)));

    let base = Schema::builder("FactoryBase")
        .field("id", FieldSpec::Plain)
        .build()?;
    let schema = make_schema(
        "FactoryDerived",
        vec![Base::Mixin(mixin), Base::Schema(base)],
        vec![("name".to_string(), FieldSpec::Plain)],
        Namespace::new(),
        None,
    )?;
    assert_eq!(schema.field_names(), vec!["name", "created_at", "id"]);
    Ok(())
}

// ---------------- Mixins ----------------

#[test]
fn test_mixin_contributes_fields_and_methods() -> Result<()> {
    let mixin = Mixin::builder("AuditMixin")
        .field("audit", FieldSpec::method("audit_line"))
        .method("audit_line", |object: &Value| match object.attr("id") {
            Some(Value::Int(id)) => Ok(Value::String(format!("audited #{id}"))),
            _ => Ok(Value::Null),
        })
        .build();

    let schema = Schema::builder("AuditedSchema")
        .mixin(&mixin)
        .field("id", FieldSpec::Plain)
        .build()?;

    let result = schema.serialize(&record! { "id" => 7 })?;
    assert_eq!(result.keys().collect::<Vec<_>>(), vec!["id", "audit"]);
    assert_eq!(
        result.get("audit"),
        Some(&Value::String("audited #7".into()))
    );
    Ok(())
}

// ---------------- Registry ----------------

#[test]
fn test_registry_lookup_and_replacement() -> Result<()> {
    let schema = Schema::builder("RegistrySchema")
        .field("x", FieldSpec::Plain)
        .build()?;
    let found = crate::lookup_schema("RegistrySchema").expect("schema registered on build");
    assert!(Arc::ptr_eq(&schema, &found));

    // Re-registering a name replaces the entry.
    let replacement = Schema::builder("RegistrySchema")
        .field("y", FieldSpec::Plain)
        .build()?;
    let found = crate::lookup_schema("RegistrySchema").expect("schema registered on build");
    assert!(Arc::ptr_eq(&replacement, &found));
    assert_eq!(found.field_names(), vec!["y"]);
    Ok(())
}

// ---------------- Values and macros ----------------

#[test]
fn test_value_conversions() {
    assert_eq!(Value::from(true), Value::Bool(true));
    assert_eq!(Value::from(7i64), Value::Int(7));
    assert_eq!(Value::from(7i32), Value::Int(7));
    assert_eq!(Value::from(2.5f64), Value::Float(2.5));
    assert_eq!(Value::from("hi"), Value::String("hi".into()));
    assert_eq!(
        Value::from(vec![1, 2]),
        Value::List(vec![Value::Int(1), Value::Int(2)])
    );
    assert_eq!(Value::from(None::<i64>), Value::Null);
}

#[test]
fn test_value_from_json() {
    let bridged = Value::from(serde_json::json!({ "a": [1, true, "x"], "b": null }));
    match bridged {
        Value::Map(map) => {
            assert_eq!(map.get("b"), Some(&Value::Null));
            assert_eq!(
                map.get("a"),
                Some(&Value::List(vec![
                    Value::Int(1),
                    Value::Bool(true),
                    Value::String("x".into()),
                ]))
            );
        }
        other => panic!("expected map, got {other:?}"),
    }
}

#[test]
fn test_record_macro_builds_objects() {
    let user = record! { "name" => "Ada", "logins" => 3 };
    assert_eq!(user.attr("name"), Some(Value::String("Ada".into())));
    assert_eq!(user.attr("logins"), Some(Value::Int(3)));
    assert_eq!(user.attr("absent"), None);
    assert_eq!(user.category(), "object");

    let empty = record! {};
    assert_eq!(empty.attr("anything"), None);
}
