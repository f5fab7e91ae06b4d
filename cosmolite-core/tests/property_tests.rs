// Property-based tests using proptest
use cosmolite_core::{
    BulkDeleteOutcome, BulkDeleteProcedure, DatabaseCore, Document, ErrorKind, ExecuteOptions,
    ExecutionBudget, UpdateCommands, UpdateProcedure,
};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn doc_with(tags: &[i64], key: &str) -> Document {
    let mut fields = Map::new();
    fields.insert("key".to_string(), json!(key));
    fields.insert("tags".to_string(), json!(tags));
    Document::new("1", fields)
}

fn tags_of(doc: &Document) -> Vec<i64> {
    doc.get("tags")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

// ========== PROPERTY 1: Operators follow the fixed order ==========

proptest! {
    #[test]
    fn prop_update_matches_reference_model(
        tags in prop::collection::vec(any::<i64>(), 0..10),
        set_key in prop::option::of("[a-z]{1,8}"),
        pop in prop::option::of(-2i64..3),
        push in prop::option::of(any::<i64>()),
        unshift in prop::option::of(any::<i64>()),
    ) {
        let original = doc_with(&tags, "orig");

        let mut commands = UpdateCommands::new();
        if let Some(key) = &set_key {
            commands = commands.set("key", json!(key));
        }
        if let Some(direction) = pop {
            commands = commands.pop("tags", direction);
        }
        if let Some(value) = push {
            commands = commands.push("tags", json!(value));
        }
        if let Some(value) = unshift {
            commands = commands.unshift("tags", json!(value));
        }

        // Reference model over plain vectors
        let mut expected = tags.clone();
        if let Some(direction) = pop {
            if direction < 0 {
                if !expected.is_empty() {
                    expected.remove(0);
                }
            } else {
                expected.pop();
            }
        }
        if let Some(value) = push {
            expected.push(value);
        }
        if let Some(value) = unshift {
            expected.insert(0, value);
        }

        let updated = commands.applied_to(&original).unwrap();

        prop_assert_eq!(tags_of(&updated), expected);
        prop_assert_eq!(
            updated.get("key").unwrap(),
            &json!(set_key.as_deref().unwrap_or("orig"))
        );
        prop_assert_eq!(&updated.id, &original.id);
    }
}

// ========== PROPERTY 2: Set is idempotent, push is not ==========

proptest! {
    #[test]
    fn prop_set_idempotent_push_duplicates(
        tags in prop::collection::vec(any::<i64>(), 0..5),
        value in any::<i64>(),
        name in "[a-z]{1,10}",
    ) {
        let original = doc_with(&tags, "k");

        let set = UpdateCommands::new().set("name", json!(name));
        let once = set.applied_to(&original).unwrap();
        let twice = set.applied_to(&once).unwrap();
        prop_assert_eq!(&once, &twice);

        let push = UpdateCommands::new().push("tags", json!(value));
        let pushed = push.applied_to(&push.applied_to(&original).unwrap()).unwrap();
        let pushed_tags = tags_of(&pushed);
        prop_assert_eq!(pushed_tags.len(), tags.len() + 2);
        prop_assert_eq!(&pushed_tags[tags.len()..], &[value, value][..]);
    }
}

// ========== PROPERTY 3: Array operators on scalars fail and leave the input untouched ==========

proptest! {
    #[test]
    fn prop_array_operator_on_scalar_fails(scalar in any::<i64>(), which in 0usize..3) {
        let mut fields = Map::new();
        fields.insert("n".to_string(), json!(scalar));
        let original = Document::new("1", fields);

        let commands = match which {
            0 => UpdateCommands::new().pop("n", 1),
            1 => UpdateCommands::new().push("n", json!(1)),
            _ => UpdateCommands::new().unshift("n", json!(1)),
        };

        let err = commands.applied_to(&original).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::OperatorType);
        prop_assert_eq!(original.get("n").unwrap(), &json!(scalar));
    }
}

// ========== PROPERTY 4: Bulk delete counts ==========

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_bulk_delete_removes_everything(count in 0usize..60, page_size in 1usize..20) {
        let db = DatabaseCore::in_memory();
        let coll = db.collection("items").unwrap();
        for i in 0..count {
            coll.create_document(json!({"id": format!("d{}", i)})).unwrap();
        }
        let sproc = coll.create_procedure(Arc::new(BulkDeleteProcedure)).unwrap();

        let options = ExecuteOptions { page_size, ..Default::default() };
        let outcome = BulkDeleteOutcome::from_value(
            coll.execute_procedure(&sproc, json!([]), options).unwrap()
        ).unwrap();

        prop_assert_eq!(outcome, BulkDeleteOutcome { deleted: count as u64, complete: true });
        prop_assert_eq!(coll.count_documents().unwrap(), 0);
    }

    #[test]
    fn prop_bulk_delete_partial_runs_sum_to_total(
        count in 0usize..60,
        page_size in 1usize..10,
        max_operations in 2u64..15,
    ) {
        let db = DatabaseCore::in_memory();
        let coll = db.collection("items").unwrap();
        for i in 0..count {
            coll.create_document(json!({"id": format!("d{}", i)})).unwrap();
        }
        let sproc = coll.create_procedure(Arc::new(BulkDeleteProcedure)).unwrap();

        let mut total = 0u64;
        for _ in 0..200 {
            let options = ExecuteOptions {
                budget: ExecutionBudget::with_operations(max_operations),
                page_size,
            };
            let outcome = BulkDeleteOutcome::from_value(
                coll.execute_procedure(&sproc, json!([]), options).unwrap()
            ).unwrap();
            total += outcome.deleted;
            prop_assert_eq!(coll.count_documents().unwrap(), count as u64 - total);
            if outcome.complete {
                break;
            }
        }

        prop_assert_eq!(total, count as u64);
        prop_assert_eq!(coll.count_documents().unwrap(), 0);
    }
}

// ========== PROPERTY 5: Update through the procedure equals the pure form ==========

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_procedure_update_matches_pure_apply(
        tags in prop::collection::vec(any::<i64>(), 0..6),
        push in any::<i64>(),
        pop in -1i64..2,
    ) {
        let db = DatabaseCore::in_memory();
        let coll = db.collection("items").unwrap();
        let stored = coll.create_document(json!({"id": "1", "key": "k", "tags": tags})).unwrap();
        let sproc = coll.create_procedure(Arc::new(UpdateProcedure)).unwrap();

        let commands = UpdateCommands::new().pop("tags", pop).push("tags", json!(push));
        let expected = commands.applied_to(&stored).unwrap();

        let result = coll
            .execute_procedure(&sproc, json!(["1", commands.to_json()]), ExecuteOptions::default())
            .unwrap();
        let updated = Document::from_value(result).unwrap();

        prop_assert_eq!(&updated.fields, &expected.fields);
        prop_assert_ne!(&updated.etag, &stored.etag);
    }
}
