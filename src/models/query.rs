use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Comparison operators a filter condition can carry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    #[serde(alias = "=")]
    Eq,
    #[serde(alias = "!=", alias = "<>", alias = "ne")]
    NotEq,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    In,
    Like,
}

impl FilterOp {
    /// Short operator name used when rendering remote parameter names
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::NotEq => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Like => "like",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Normalized SELECT request handed over by the query parser
///
/// An empty `columns` list selects every declared column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QuerySpec {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Condition>,
    #[serde(default)]
    pub order_by: Vec<SortKey>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QuerySpec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filters.push(condition);
        self
    }

    pub fn order_by(mut self, key: SortKey) -> Self {
        self.order_by.push(key);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Position of a page within a paginated remote listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PageToken {
    First,
    Offset(u64),
    Page(u64),
    Cursor(String),
}

/// Result of an update or delete
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MutationStatus {
    Applied { affected: usize },
    /// Nothing matched the filter, or the remote API reported every target as gone
    TargetMissing,
}

/// Per-row outcome of a batch operation, indexes refer to the input order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BatchReport {
    pub succeeded: Vec<RowOutcome>,
    pub failed: Vec<RowFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowOutcome {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowFailure {
    pub index: usize,
    pub code: String,
    pub message: String,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn succeeded_indexes(&self) -> Vec<usize> {
        self.succeeded.iter().map(|r| r.index).collect()
    }

    pub fn failed_indexes(&self) -> Vec<usize> {
        self.failed.iter().map(|r| r.index).collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct InsertRequest {
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub filters: Vec<Condition>,
    pub changes: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub filters: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub rows: Vec<Map<String, Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_spec_from_json() {
        let spec: QuerySpec = serde_json::from_value(json!({
            "columns": ["id", "name"],
            "filters": [{ "field": "status", "op": "=", "value": "open" }],
            "order_by": [{ "column": "created_at", "direction": "desc" }],
            "limit": 10
        }))
        .unwrap();

        assert_eq!(spec.columns, vec!["id", "name"]);
        assert_eq!(spec.filters[0].op, FilterOp::Eq);
        assert_eq!(spec.order_by[0], SortKey::desc("created_at"));
        assert_eq!(spec.limit, Some(10));
    }

    #[test]
    fn test_empty_query_spec_selects_everything() {
        let spec: QuerySpec = serde_json::from_value(json!({})).unwrap();
        assert_eq!(spec, QuerySpec::all());
    }

    #[test]
    fn test_mutation_status_wire_shape() {
        assert_eq!(
            serde_json::to_value(MutationStatus::TargetMissing).unwrap(),
            json!({ "status": "target_missing" })
        );
        assert_eq!(
            serde_json::to_value(MutationStatus::Applied { affected: 2 }).unwrap(),
            json!({ "status": "applied", "affected": 2 })
        );
    }

    #[test]
    fn test_batch_report_indexes() {
        let report = BatchReport {
            succeeded: vec![RowOutcome { index: 0, returned: None }, RowOutcome { index: 2, returned: None }],
            failed: vec![RowFailure {
                index: 1,
                code: "REMOTE_ERROR".to_string(),
                message: "bad row".to_string(),
            }],
        };
        assert!(!report.is_complete());
        assert_eq!(report.total(), 3);
        assert_eq!(report.succeeded_indexes(), vec![0, 2]);
        assert_eq!(report.failed_indexes(), vec![1]);
    }
}
