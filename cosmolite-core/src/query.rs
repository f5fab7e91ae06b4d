// src/query.rs
use serde_json::Value;
use std::cmp::Ordering;
use crate::document::Document;
use crate::error::{Result, CosmoLiteError};

/// Filter operators
#[derive(Debug, Clone)]
pub enum QueryOperator {
    // Comparison
    Eq(Value),           // $eq
    Ne(Value),           // $ne
    Gt(Value),           // $gt
    Gte(Value),          // $gte
    Lt(Value),           // $lt
    Lte(Value),          // $lte
    In(Vec<Value>),      // $in
    Nin(Vec<Value>),     // $nin
    Exists(bool),        // $exists
    Not(Box<QueryOperator>), // field-level $not

    // Logical
    And(Vec<Query>),     // $and
    Or(Vec<Query>),      // $or
    Nor(Vec<Query>),     // $nor
}

/// MongoDB-style document filter. An empty query matches every document.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub conditions: Vec<(String, QueryOperator)>,
}

impl Query {
    pub fn new() -> Self {
        Query { conditions: Vec::new() }
    }

    /// Matches every document
    pub fn all() -> Self {
        Self::new()
    }

    /// Equality on the document id
    pub fn by_id(id: &str) -> Self {
        Query {
            conditions: vec![("id".to_string(), QueryOperator::Eq(Value::String(id.to_string())))],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        let mut query = Query::new();

        match json {
            Value::Object(map) => {
                for (field, condition) in map {
                    if field.starts_with('$') {
                        let operator = Self::parse_logical_operator(field, condition)?;
                        query.conditions.push((field.clone(), operator));
                    } else {
                        // Several operators on one field must all hold
                        for operator in Self::parse_field_condition(condition)? {
                            query.conditions.push((field.clone(), operator));
                        }
                    }
                }
            }
            Value::Null => {}
            _ => return Err(CosmoLiteError::Validation("query must be a JSON object".into())),
        }

        Ok(query)
    }

    fn parse_query_list(op: &str, value: &Value) -> Result<Vec<Query>> {
        match value {
            Value::Array(arr) => arr.iter().map(Self::from_json).collect(),
            _ => Err(CosmoLiteError::Validation(format!("{} requires array", op))),
        }
    }

    fn parse_logical_operator(op: &str, value: &Value) -> Result<QueryOperator> {
        match op {
            "$and" => Ok(QueryOperator::And(Self::parse_query_list(op, value)?)),
            "$or" => Ok(QueryOperator::Or(Self::parse_query_list(op, value)?)),
            "$nor" => Ok(QueryOperator::Nor(Self::parse_query_list(op, value)?)),
            _ => Err(CosmoLiteError::Validation(format!("Unknown logical operator: {}", op))),
        }
    }

    /// Parse the condition on one field. An object whose keys are all
    /// operators yields one operator per key; an object without operator
    /// keys is embedded-document equality.
    fn parse_field_condition(value: &Value) -> Result<Vec<QueryOperator>> {
        let Value::Object(map) = value else {
            return Ok(vec![QueryOperator::Eq(value.clone())]);
        };

        let operators = map.keys().filter(|k| k.starts_with('$')).count();
        if operators == 0 {
            return Ok(vec![QueryOperator::Eq(value.clone())]);
        }
        if operators != map.len() {
            return Err(CosmoLiteError::Validation(
                "cannot mix operators and plain fields in one condition".into(),
            ));
        }

        map.iter().map(|(op, val)| Self::parse_operator(op, val)).collect()
    }

    fn parse_operator(op: &str, val: &Value) -> Result<QueryOperator> {
        match op {
            "$eq" => Ok(QueryOperator::Eq(val.clone())),
            "$ne" => Ok(QueryOperator::Ne(val.clone())),
            "$gt" => Ok(QueryOperator::Gt(val.clone())),
            "$gte" => Ok(QueryOperator::Gte(val.clone())),
            "$lt" => Ok(QueryOperator::Lt(val.clone())),
            "$lte" => Ok(QueryOperator::Lte(val.clone())),
            "$in" => match val {
                Value::Array(arr) => Ok(QueryOperator::In(arr.clone())),
                _ => Err(CosmoLiteError::Validation("$in requires array".into())),
            },
            "$nin" => match val {
                Value::Array(arr) => Ok(QueryOperator::Nin(arr.clone())),
                _ => Err(CosmoLiteError::Validation("$nin requires array".into())),
            },
            "$exists" => match val {
                Value::Bool(b) => Ok(QueryOperator::Exists(*b)),
                _ => Err(CosmoLiteError::Validation("$exists requires bool".into())),
            },
            "$not" => {
                let mut inner = Self::parse_field_condition(val)?;
                if inner.len() != 1 {
                    return Err(CosmoLiteError::Validation("$not takes exactly one operator".into()));
                }
                Ok(QueryOperator::Not(Box::new(inner.remove(0))))
            }
            _ => Err(CosmoLiteError::Validation(format!("Unknown operator: {}", op))),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|(field, operator)| {
            if field.starts_with('$') {
                Self::matches_logical_operator(operator, document)
            } else {
                Self::with_field(document, field, |value| Self::matches_operator(value, operator))
            }
        })
    }

    /// Resolve `field` (dotted paths allowed) and hand it to `f`.
    /// `id` resolves to the document id.
    fn with_field<R>(document: &Document, field: &str, f: impl FnOnce(Option<&Value>) -> R) -> R {
        if field == "id" {
            let id = Value::String(document.id.clone());
            return f(Some(&id));
        }

        let mut parts = field.split('.');
        let mut current = parts.next().and_then(|head| document.get(head));
        for part in parts {
            current = current.and_then(|v| match v {
                Value::Object(map) => map.get(part),
                Value::Array(arr) => part.parse::<usize>().ok().and_then(|i| arr.get(i)),
                _ => None,
            });
        }
        f(current)
    }

    fn matches_logical_operator(operator: &QueryOperator, document: &Document) -> bool {
        match operator {
            QueryOperator::And(queries) => queries.iter().all(|q| q.matches(document)),
            QueryOperator::Or(queries) => queries.iter().any(|q| q.matches(document)),
            QueryOperator::Nor(queries) => !queries.iter().any(|q| q.matches(document)),
            _ => false,
        }
    }

    fn matches_operator(value: Option<&Value>, operator: &QueryOperator) -> bool {
        match operator {
            QueryOperator::Eq(target) => value.map_or(false, |v| v == target),
            QueryOperator::Ne(target) => value.map_or(true, |v| v != target),
            QueryOperator::Gt(target) => {
                value.map_or(false, |v| Self::compare_values(v, target) == Some(Ordering::Greater))
            }
            QueryOperator::Gte(target) => value.map_or(false, |v| {
                matches!(Self::compare_values(v, target), Some(Ordering::Greater | Ordering::Equal))
            }),
            QueryOperator::Lt(target) => {
                value.map_or(false, |v| Self::compare_values(v, target) == Some(Ordering::Less))
            }
            QueryOperator::Lte(target) => value.map_or(false, |v| {
                matches!(Self::compare_values(v, target), Some(Ordering::Less | Ordering::Equal))
            }),
            QueryOperator::In(targets) => value.map_or(false, |v| targets.contains(v)),
            QueryOperator::Nin(targets) => value.map_or(true, |v| !targets.contains(v)),
            QueryOperator::Exists(should_exist) => value.is_some() == *should_exist,
            QueryOperator::Not(inner) => !Self::matches_operator(value, inner),
            QueryOperator::And(_) | QueryOperator::Or(_) | QueryOperator::Nor(_) => false,
        }
    }

    fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Number(n1), Value::Number(n2)) => {
                let f1 = n1.as_f64()?;
                let f2 = n2.as_f64()?;
                f1.partial_cmp(&f2)
            }
            (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
            (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
            _ => None,
        }
    }
}
