// src/update.rs
// Update operators applied by the "update" stored procedure

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

use crate::document::{Document, is_system_field};
use crate::error::{Result, CosmoLiteError};

/// Update command set: `{"$set": {..}, "$pop": {..}, "$push": {..}, "$unshift": {..}}`
///
/// Groups are applied in the fixed order `$set`, `$pop`, `$push`, `$unshift`,
/// so `$set` can create an array that a later operator then works on. Inside a
/// group, fields are applied in the order they were given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCommands {
    #[serde(rename = "$set", default, skip_serializing_if = "Option::is_none")]
    pub set: Option<Map<String, Value>>,

    /// field -> direction (negative removes the first element, anything else the last)
    #[serde(rename = "$pop", default, skip_serializing_if = "Option::is_none")]
    pub pop: Option<Map<String, Value>>,

    #[serde(rename = "$push", default, skip_serializing_if = "Option::is_none")]
    pub push: Option<Map<String, Value>>,

    #[serde(rename = "$unshift", default, skip_serializing_if = "Option::is_none")]
    pub unshift: Option<Map<String, Value>>,
}

impl UpdateCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the wire shape. Unknown operators and non-object groups are rejected.
    pub fn from_json(json: &Value) -> Result<Self> {
        match json {
            Value::Object(_) => serde_json::from_value(json.clone())
                .map_err(|e| CosmoLiteError::Validation(format!("invalid update commands: {}", e))),
            Value::Null => Err(CosmoLiteError::Validation("update commands are required".into())),
            _ => Err(CosmoLiteError::Validation("update commands must be a JSON object".into())),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Map::new()))
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set.get_or_insert_with(Map::new).insert(field.into(), value);
        self
    }

    pub fn pop(mut self, field: impl Into<String>, direction: i64) -> Self {
        self.pop.get_or_insert_with(Map::new).insert(field.into(), Value::from(direction));
        self
    }

    pub fn push(mut self, field: impl Into<String>, value: Value) -> Self {
        self.push.get_or_insert_with(Map::new).insert(field.into(), value);
        self
    }

    pub fn unshift(mut self, field: impl Into<String>, value: Value) -> Self {
        self.unshift.get_or_insert_with(Map::new).insert(field.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        [&self.set, &self.pop, &self.push, &self.unshift]
            .iter()
            .all(|group| group.as_ref().map_or(true, |m| m.is_empty()))
    }

    /// Apply every operator to `document`.
    ///
    /// On error the document may be partially modified; callers that need
    /// all-or-nothing semantics apply to a copy.
    pub fn apply(&self, document: &mut Document) -> Result<()> {
        if let Some(fields) = &self.set {
            for (field, value) in fields {
                if is_system_field(field) {
                    return Err(CosmoLiteError::Validation(format!(
                        "$set cannot modify system field '{}'", field
                    )));
                }
                document.set(field.clone(), value.clone());
            }
        }

        if let Some(fields) = &self.pop {
            for (field, direction) in fields {
                let array = array_field(document, "$pop", field)?;
                if pops_front(direction) {
                    if !array.is_empty() {
                        array.remove(0);
                    }
                } else {
                    array.pop();
                }
            }
        }

        if let Some(fields) = &self.push {
            for (field, value) in fields {
                array_field(document, "$push", field)?.push(value.clone());
            }
        }

        if let Some(fields) = &self.unshift {
            for (field, value) in fields {
                array_field(document, "$unshift", field)?.insert(0, value.clone());
            }
        }

        Ok(())
    }

    /// Pure form of [`apply`](Self::apply): the input is left untouched on error.
    pub fn applied_to(&self, document: &Document) -> Result<Document> {
        let mut updated = document.clone();
        self.apply(&mut updated)?;
        Ok(updated)
    }
}

fn array_field<'a>(document: &'a mut Document, operator: &str, field: &str) -> Result<&'a mut Vec<Value>> {
    match document.get_mut(field) {
        Some(Value::Array(array)) => Ok(array),
        Some(other) => Err(CosmoLiteError::operator(
            operator,
            field,
            format!("expected an array, found {}", type_name(other)),
        )),
        None => Err(CosmoLiteError::operator(operator, field, "field is missing")),
    }
}

// Missing, zero, positive and non-numeric directions all mean "last"
fn pops_front(direction: &Value) -> bool {
    direction.as_f64().map_or(false, |d| d < 0.0)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Document {
        match json!({"key": "test", "tags": ["a", "b"]}) {
            Value::Object(map) => Document::new("1", map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_push_appends() {
        let mut doc = sample();
        UpdateCommands::new().push("tags", json!("c")).apply(&mut doc).unwrap();

        assert_eq!(doc.get("tags").unwrap(), &json!(["a", "b", "c"]));
        assert_eq!(doc.get("key").unwrap(), &json!("test"));
    }

    #[test]
    fn test_pop_negative_removes_first() {
        let mut doc = sample();
        doc.set("tags".into(), json!(["a", "b", "c"]));
        UpdateCommands::new().pop("tags", -1).apply(&mut doc).unwrap();

        assert_eq!(doc.get("tags").unwrap(), &json!(["b", "c"]));
    }

    #[test]
    fn test_pop_default_removes_last() {
        let mut doc = sample();
        UpdateCommands::new().pop("tags", 1).apply(&mut doc).unwrap();
        assert_eq!(doc.get("tags").unwrap(), &json!(["a"]));

        let zero = UpdateCommands::from_json(&json!({"$pop": {"tags": 0}})).unwrap();
        zero.apply(&mut doc).unwrap();
        assert_eq!(doc.get("tags").unwrap(), &json!([]));
    }

    #[test]
    fn test_pop_non_numeric_direction_removes_last() {
        let mut doc = sample();
        let commands = UpdateCommands::from_json(&json!({"$pop": {"tags": null}})).unwrap();
        commands.apply(&mut doc).unwrap();

        assert_eq!(doc.get("tags").unwrap(), &json!(["a"]));
    }

    #[test]
    fn test_pop_empty_array_is_noop() {
        let mut doc = sample();
        doc.set("tags".into(), json!([]));

        UpdateCommands::new().pop("tags", -1).apply(&mut doc).unwrap();
        UpdateCommands::new().pop("tags", 1).apply(&mut doc).unwrap();

        assert_eq!(doc.get("tags").unwrap(), &json!([]));
    }

    #[test]
    fn test_unshift_prepends() {
        let mut doc = sample();
        doc.set("tags".into(), json!(["b", "c"]));
        UpdateCommands::new().unshift("tags", json!("z")).apply(&mut doc).unwrap();

        assert_eq!(doc.get("tags").unwrap(), &json!(["z", "b", "c"]));
    }

    #[test]
    fn test_set_creates_array_for_later_operators() {
        let mut doc = sample();
        let commands = UpdateCommands::from_json(&json!({
            "$unshift": {"list": 0},
            "$push": {"list": 3},
            "$pop": {"list": -1},
            "$set": {"list": [1, 2]}
        }))
        .unwrap();

        commands.apply(&mut doc).unwrap();

        // $set -> [1,2], $pop front -> [2], $push -> [2,3], $unshift -> [0,2,3]
        assert_eq!(doc.get("list").unwrap(), &json!([0, 2, 3]));
    }

    #[test]
    fn test_set_overwrites_and_creates() {
        let mut doc = sample();
        UpdateCommands::new()
            .set("key", json!("changed"))
            .set("nested", json!({"a": 1}))
            .apply(&mut doc)
            .unwrap();

        assert_eq!(doc.get("key").unwrap(), &json!("changed"));
        assert_eq!(doc.get("nested").unwrap(), &json!({"a": 1}));
    }

    #[test]
    fn test_array_operator_on_non_array_fails() {
        let doc = sample();

        for commands in [
            UpdateCommands::new().push("key", json!(1)),
            UpdateCommands::new().pop("key", 1),
            UpdateCommands::new().unshift("key", json!(1)),
        ] {
            let err = commands.applied_to(&doc).unwrap_err();
            assert!(matches!(err, CosmoLiteError::OperatorType { .. }), "got {:?}", err);
        }
    }

    #[test]
    fn test_array_operator_on_missing_field_fails() {
        let doc = sample();
        let err = UpdateCommands::new().push("missing", json!(1)).applied_to(&doc).unwrap_err();

        match err {
            CosmoLiteError::OperatorType { operator, field, .. } => {
                assert_eq!(operator, "$push");
                assert_eq!(field, "missing");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_applied_to_leaves_input_untouched_on_error() {
        let doc = sample();
        let commands = UpdateCommands::new()
            .set("key", json!("changed"))
            .push("key", json!(1));

        assert!(commands.applied_to(&doc).is_err());
        assert_eq!(doc, sample());
    }

    #[test]
    fn test_set_rejects_system_fields() {
        let doc = sample();
        for field in ["id", "_etag", "_self", "_ts", "_rid"] {
            let err = UpdateCommands::new().set(field, json!("x")).applied_to(&doc).unwrap_err();
            assert!(matches!(err, CosmoLiteError::Validation(_)));
        }
    }

    #[test]
    fn test_push_twice_duplicates() {
        let commands = UpdateCommands::new().push("tags", json!("c"));
        let once = commands.applied_to(&sample()).unwrap();
        let twice = commands.applied_to(&once).unwrap();

        assert_eq!(twice.get("tags").unwrap(), &json!(["a", "b", "c", "c"]));
    }

    #[test]
    fn test_set_is_idempotent() {
        let commands = UpdateCommands::new().set("key", json!("v")).set("n", json!(5));
        let once = commands.applied_to(&sample()).unwrap();
        let twice = commands.applied_to(&once).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_from_json_rejects_unknown_operator() {
        let err = UpdateCommands::from_json(&json!({"$inc": {"n": 1}})).unwrap_err();
        assert!(matches!(err, CosmoLiteError::Validation(_)));
    }

    #[test]
    fn test_from_json_rejects_null_and_scalars() {
        assert!(UpdateCommands::from_json(&Value::Null).is_err());
        assert!(UpdateCommands::from_json(&json!("set")).is_err());
        assert!(UpdateCommands::from_json(&json!({"$set": 5})).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let commands = UpdateCommands::new().set("a", json!(1)).push("tags", json!("x"));

        assert_eq!(commands.to_json(), json!({"$set": {"a": 1}, "$push": {"tags": "x"}}));
        assert!(UpdateCommands::new().is_empty());
        assert!(!commands.is_empty());
    }
}
