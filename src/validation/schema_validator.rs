use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

use crate::api::middleware::AppError;
use crate::models::{Cell, ColumnMapping, ColumnType, ResourceDescriptor, Row};

/// Follow a dot-separated path through objects (and arrays, for numeric segments)
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Checks values against declared column types and reshapes records
pub struct SchemaValidator;

impl SchemaValidator {
    /// Validate a value for a column, returning its normalized form
    pub fn check_value(column: &ColumnMapping, value: &Value) -> Result<Value, AppError> {
        if value.is_null() {
            return if column.nullable {
                Ok(Value::Null)
            } else {
                Err(AppError::SchemaMismatch(format!(
                    "Column '{}' is declared NOT NULL but the value is null",
                    column.name
                )))
            };
        }

        let normalized = match (column.column_type, value) {
            (ColumnType::Json, v) => Some(v.clone()),
            (ColumnType::String, Value::String(_)) => Some(value.clone()),
            (ColumnType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (ColumnType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
            (ColumnType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ColumnType::Float, Value::Number(_)) => Some(value.clone()),
            (ColumnType::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (ColumnType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|_| value.clone()),
            (ColumnType::Timestamp, Value::Number(n)) => n
                .as_i64()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .map(|ts| Value::String(ts.to_rfc3339())),
            _ => None,
        };

        normalized.ok_or_else(|| {
            AppError::SchemaMismatch(format!(
                "Column '{}' is declared {} but got {}",
                column.name,
                column.column_type.as_str(),
                Self::describe(value)
            ))
        })
    }

    /// Map one remote record onto the given columns
    ///
    /// A declared field absent from the record becomes `Cell::Missing`.
    pub fn map_record(columns: &[&ColumnMapping], record: &Value) -> Result<Row, AppError> {
        if !record.is_object() {
            return Err(AppError::SchemaMismatch(format!(
                "Expected a record object from the remote API, got {}",
                Self::describe(record)
            )));
        }

        let cells = columns
            .iter()
            .map(|column| match lookup_path(record, column.field_path()) {
                None => Ok(Cell::Missing),
                Some(value) => Self::check_value(column, value).map(Cell::Present),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Row::new(cells))
    }

    /// Locate the record array of a listing response
    pub fn extract_records<'a>(body: &'a Value, rows_path: Option<&str>) -> Result<Vec<&'a Value>, AppError> {
        let target = match rows_path {
            Some(path) => lookup_path(body, path).ok_or_else(|| {
                AppError::SchemaMismatch(format!("Response has no '{}' field holding the rows", path))
            })?,
            None => body,
        };

        match target {
            Value::Array(items) => Ok(items.iter().collect()),
            Value::Object(_) if rows_path.is_none() => Err(AppError::SchemaMismatch(
                "Expected an array of records but the response is an object; set rows_path to the field holding them"
                    .to_string(),
            )),
            other => Err(AppError::SchemaMismatch(format!(
                "Expected an array of records, got {}",
                Self::describe(other)
            ))),
        }
    }

    /// Build the remote body for a logical row, nesting values along field paths
    pub fn build_payload(descriptor: &ResourceDescriptor, input: &Map<String, Value>) -> Result<Value, AppError> {
        let mut payload = Value::Object(Map::new());
        for (name, value) in input {
            let column = descriptor.column(name).ok_or_else(|| {
                AppError::SchemaMismatch(format!(
                    "Column '{}' is not declared on resource '{}'",
                    name, descriptor.name
                ))
            })?;
            let normalized = Self::check_value(column, value)?;
            Self::set_path(&mut payload, column.field_path(), normalized);
        }
        Ok(payload)
    }

    pub(crate) fn set_path(target: &mut Value, path: &str, value: Value) {
        let mut current = target;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let map = match current {
                Value::Object(map) => map,
                _ => return,
            };
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value);
                return;
            }
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }

    fn describe(value: &Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "a boolean".to_string(),
            Value::Number(n) => format!("number {}", n),
            Value::String(s) => format!("string {:?}", s),
            Value::Array(_) => "an array".to_string(),
            Value::Object(_) => "an object".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Endpoint, HttpMethod, Operations};
    use serde_json::json;

    fn descriptor() -> ResourceDescriptor {
        ResourceDescriptor::new(
            "contacts",
            "crm",
            Operations::list_only(Endpoint::new(HttpMethod::Get, "/contacts")),
            vec![
                ColumnMapping::new("id", ColumnType::Integer).required(),
                ColumnMapping::new("name", ColumnType::String),
                ColumnMapping::new("email", ColumnType::String).with_path("properties.email"),
            ],
        )
    }

    #[test]
    fn test_lookup_path() {
        let record = json!({ "a": { "b": [ { "c": 1 } ] } });
        assert_eq!(lookup_path(&record, "a.b.0.c"), Some(&json!(1)));
        assert_eq!(lookup_path(&record, "a.x"), None);
        assert_eq!(lookup_path(&record, ""), Some(&record));
    }

    #[test]
    fn test_missing_field_becomes_marker() {
        let descriptor = descriptor();
        let columns: Vec<&ColumnMapping> = descriptor.columns.iter().collect();

        let row = SchemaValidator::map_record(&columns, &json!({ "id": 7, "properties": { "email": "" } })).unwrap();
        assert_eq!(row.get(0), Some(&Cell::Present(json!(7))));
        assert_eq!(row.get(1), Some(&Cell::Missing));
        // Present-but-empty stays empty, it is not the missing marker
        assert_eq!(row.get(2), Some(&Cell::Present(json!(""))));
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let column = ColumnMapping::new("id", ColumnType::Integer);
        assert!(matches!(
            SchemaValidator::check_value(&column, &json!("seven")),
            Err(AppError::SchemaMismatch(_))
        ));
        assert_eq!(SchemaValidator::check_value(&column, &json!("7")).unwrap(), json!(7));

        let required = ColumnMapping::new("id", ColumnType::Integer).required();
        assert!(SchemaValidator::check_value(&required, &Value::Null).is_err());
    }

    #[test]
    fn test_timestamp_normalization() {
        let column = ColumnMapping::new("created_at", ColumnType::Timestamp);
        assert_eq!(
            SchemaValidator::check_value(&column, &json!(0)).unwrap(),
            json!("1970-01-01T00:00:00+00:00")
        );
        assert!(SchemaValidator::check_value(&column, &json!("2024-03-01T10:00:00Z")).is_ok());
        assert!(SchemaValidator::check_value(&column, &json!("yesterday")).is_err());
    }

    #[test]
    fn test_extract_records() {
        let body = json!({ "data": { "items": [ { "id": 1 }, { "id": 2 } ] } });
        assert_eq!(SchemaValidator::extract_records(&body, Some("data.items")).unwrap().len(), 2);
        assert!(SchemaValidator::extract_records(&body, Some("results")).is_err());
        assert!(SchemaValidator::extract_records(&json!("nope"), None).is_err());
    }

    #[test]
    fn test_extract_records_rejects_unpointed_envelope() {
        let body = json!({ "data": [ { "id": 1 }, { "id": 2 } ] });
        assert!(matches!(
            SchemaValidator::extract_records(&body, None),
            Err(AppError::SchemaMismatch(_))
        ));
        assert!(SchemaValidator::extract_records(&json!({ "data": { "id": 1 } }), Some("data")).is_err());
    }

    #[test]
    fn test_build_payload_nests_paths() {
        let mut input = Map::new();
        input.insert("name".to_string(), json!("Ada"));
        input.insert("email".to_string(), json!("ada@example.com"));

        let payload = SchemaValidator::build_payload(&descriptor(), &input).unwrap();
        assert_eq!(
            payload,
            json!({ "name": "Ada", "properties": { "email": "ada@example.com" } })
        );

        input.insert("unknown".to_string(), json!(1));
        assert!(matches!(
            SchemaValidator::build_payload(&descriptor(), &input),
            Err(AppError::SchemaMismatch(_))
        ));
    }
}
