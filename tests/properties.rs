use proptest::prelude::*;
use serde_json::{json, Value};

use resource_sdk::config::RecordTypeConfig;
use resource_sdk::schema::resolve;
use resource_sdk::transform::{to_internal, to_representation, IngestMode};
use resource_sdk::validation::validate;
use resource_sdk::{Declaration, FieldValue, InternalMap, Payload, Record, StorageField, StorageKind};

/// One generated storage column: kind index, nullable, optional max length.
#[derive(Clone, Debug)]
struct Column {
    kind: u8,
    nullable: bool,
    max_length: Option<usize>,
}

fn arb_column() -> impl Strategy<Value = Column> {
    (0u8..5, any::<bool>(), proptest::option::of(1usize..64)).prop_map(|(kind, nullable, max_length)| Column {
        kind,
        nullable,
        max_length,
    })
}

fn record_type(columns: &[Column]) -> RecordTypeConfig {
    let mut rt = RecordTypeConfig::new("thing").field(StorageField::new("id", StorageKind::Integer).with_default());
    for (i, column) in columns.iter().enumerate() {
        let kind = match column.kind {
            0 => StorageKind::String,
            1 => StorageKind::Integer,
            2 => StorageKind::Float,
            3 => StorageKind::Boolean,
            _ => StorageKind::Timestamp,
        };
        let mut field = StorageField::new(format!("f{}", i), kind);
        if column.nullable {
            field = field.nullable();
        }
        if let Some(n) = column.max_length {
            field = field.max_length(n);
        }
        rt = rt.field(field);
    }
    rt
}

fn people() -> RecordTypeConfig {
    RecordTypeConfig::new("person")
        .field(StorageField::new("id", StorageKind::Integer).with_default())
        .field(StorageField::new("name", StorageKind::String).max_length(5))
        .field(StorageField::new("age", StorageKind::Integer).nullable())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn resolution_is_deterministic(columns in proptest::collection::vec(arb_column(), 0..12)) {
        let rt = record_type(&columns);
        let declaration = Declaration::new("things");
        let first = resolve(&rt, &declaration).unwrap();
        let second = resolve(&rt, &declaration).unwrap();
        prop_assert!(first == second);
        let names: Vec<&str> = first.fields().iter().map(|f| f.name.as_str()).collect();
        prop_assert_eq!(names.len(), columns.len() + 1);
        prop_assert_eq!(names[0], "id");
    }

    #[test]
    fn every_invalid_field_is_reported(invalid in proptest::collection::vec(any::<bool>(), 1..10)) {
        let columns: Vec<Column> = invalid
            .iter()
            .map(|_| Column { kind: 0, nullable: false, max_length: Some(3) })
            .collect();
        let rt = record_type(&columns);
        let schema = resolve(&rt, &Declaration::new("things")).unwrap();

        let mut payload = Payload::new();
        for (i, bad) in invalid.iter().enumerate() {
            let value = if *bad { "too long" } else { "ok" };
            payload.insert(format!("f{}", i), json!(value));
        }
        let outcome = validate(&schema, to_internal(&schema, &payload, IngestMode::Full), None);

        let expected = invalid.iter().filter(|b| **b).count();
        prop_assert_eq!(outcome.errors.len(), expected);
        prop_assert_eq!(outcome.is_valid(), expected == 0);
        for (i, bad) in invalid.iter().enumerate() {
            prop_assert_eq!(outcome.errors.contains(&format!("f{}", i)), *bad);
        }
    }

    #[test]
    fn representation_ingests_back_to_the_same_values(
        id in 1i64..10_000,
        name in "[a-z]{1,5}",
        age in proptest::option::of(0i64..150),
    ) {
        let rt = people();
        let schema = resolve(&rt, &Declaration::new("people")).unwrap();

        let mut fields = InternalMap::new();
        fields.insert("id".into(), FieldValue::Int(id));
        fields.insert("name".into(), FieldValue::Text(name.clone()));
        fields.insert("age".into(), age.map(FieldValue::Int).unwrap_or(FieldValue::Null));
        let record = Record::new("person", "id", fields);

        let rendered = to_representation(&schema, &record);
        prop_assert_eq!(rendered.get("id"), Some(&Value::from(id)));

        let validated = validate(&schema, to_internal(&schema, &rendered, IngestMode::Full), None)
            .into_result()
            .unwrap();
        prop_assert_eq!(validated.get("name"), Some(&FieldValue::Text(name)));
        prop_assert_eq!(validated.get("age"), record.get("age"));
        prop_assert!(validated.get("id").is_none());
    }
}
