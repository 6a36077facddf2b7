// Query Translator
//
// Turns a QuerySpec into the parameter set of one remote listing call.
// Anything the remote API cannot express is refused up front: dropping a
// filter would silently return a superset of the requested rows.

use serde_json::Value;

use crate::api::middleware::AppError;
use crate::models::{Condition, Endpoint, FilterOp, FilterStyle, QuerySpec, ResourceDescriptor, SortDirection};

/// A translated listing call
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub endpoint: Endpoint,
    /// Filter, sort and field-selection parameters; pagination is added per page
    pub params: Vec<(String, String)>,
    pub limit: Option<usize>,
    /// Output columns, in order
    pub projection: Vec<String>,
    /// Whether the remote API was asked for the projected fields only
    pub fields_requested: bool,
}

pub struct QueryTranslator;

impl QueryTranslator {
    pub fn translate(descriptor: &ResourceDescriptor, query: &QuerySpec) -> Result<RemoteCall, AppError> {
        let projection = Self::projection(descriptor, query)?;

        let mut params = Vec::new();
        for condition in &query.filters {
            params.push(Self::filter_param(descriptor, condition)?);
        }

        if let Some(sort) = Self::sort_param(descriptor, query)? {
            params.push(sort);
        }

        let fields_requested = match &descriptor.capabilities.field_selection {
            Some(param) if !query.columns.is_empty() => {
                let fields: Vec<&str> = projection
                    .iter()
                    .filter_map(|name| descriptor.column(name))
                    .map(|c| c.field_path())
                    .collect();
                params.push((param.clone(), fields.join(",")));
                true
            }
            _ => false,
        };

        tracing::debug!(
            "Translated query on '{}' into {} remote parameter(s), limit {:?}",
            descriptor.name,
            params.len(),
            query.limit
        );

        Ok(RemoteCall {
            endpoint: descriptor.operations.list.clone(),
            params,
            limit: query.limit,
            projection,
            fields_requested,
        })
    }

    fn projection(descriptor: &ResourceDescriptor, query: &QuerySpec) -> Result<Vec<String>, AppError> {
        if query.columns.is_empty() || query.columns.iter().any(|c| c == "*") {
            return Ok(descriptor.column_names());
        }
        for column in &query.columns {
            if descriptor.column(column).is_none() {
                return Err(AppError::TranslationUnsupported(format!(
                    "Column '{}' does not exist on resource '{}'",
                    column, descriptor.name
                )));
            }
        }
        Ok(query.columns.clone())
    }

    fn filter_param(descriptor: &ResourceDescriptor, condition: &Condition) -> Result<(String, String), AppError> {
        if descriptor.column(&condition.field).is_none() {
            return Err(AppError::TranslationUnsupported(format!(
                "Cannot filter on unknown column '{}' of '{}'",
                condition.field, descriptor.name
            )));
        }

        let capability = descriptor.filter_capability(&condition.field).ok_or_else(|| {
            AppError::TranslationUnsupported(format!(
                "Resource '{}' cannot filter on '{}' remotely",
                descriptor.name, condition.field
            ))
        })?;

        if !capability.operators.contains(&condition.op) {
            return Err(AppError::TranslationUnsupported(format!(
                "Operator '{}' is not supported for '{}' on '{}'",
                condition.op.as_str(),
                condition.field,
                descriptor.name
            )));
        }

        let base = capability.param_name();
        let name = match (condition.op, descriptor.capabilities.filter_style) {
            (FilterOp::Eq, _) => base.to_string(),
            (op, FilterStyle::Suffix) => format!("{}__{}", base, op.as_str()),
            (op, FilterStyle::Bracket) => format!("{}[{}]", base, op.as_str()),
        };

        Ok((name, Self::render_value(condition)?))
    }

    fn render_value(condition: &Condition) -> Result<String, AppError> {
        let scalar = |value: &Value| -> Option<String> {
            match value {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            }
        };

        let rendered = match (&condition.op, &condition.value) {
            // The list travels comma-joined, so an item may not carry a comma itself
            (FilterOp::In, Value::Array(items)) => items
                .iter()
                .map(|item| scalar(item).filter(|s| !s.contains(',')))
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.join(",")),
            (FilterOp::In, _) => None,
            (_, value) => scalar(value),
        };

        rendered.ok_or_else(|| {
            AppError::TranslationUnsupported(format!(
                "Value {} cannot be sent as a '{}' filter on '{}'",
                condition.value,
                condition.op.as_str(),
                condition.field
            ))
        })
    }

    fn sort_param(descriptor: &ResourceDescriptor, query: &QuerySpec) -> Result<Option<(String, String)>, AppError> {
        if query.order_by.is_empty() {
            return Ok(None);
        }

        let mut keys = Vec::with_capacity(query.order_by.len());
        for key in &query.order_by {
            if !descriptor.capabilities.sortable.contains(&key.column) {
                return Err(AppError::TranslationUnsupported(format!(
                    "Resource '{}' cannot sort by '{}' remotely",
                    descriptor.name, key.column
                )));
            }
            let field = descriptor
                .column(&key.column)
                .map(|c| c.field_path())
                .unwrap_or(&key.column);
            keys.push(match key.direction {
                SortDirection::Asc => field.to_string(),
                SortDirection::Desc => format!("-{}", field),
            });
        }

        Ok(Some((descriptor.capabilities.sort_param.clone(), keys.join(","))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnMapping, ColumnType, FilterCapability, HttpMethod, Operations, SortKey};
    use serde_json::json;

    fn descriptor() -> ResourceDescriptor {
        let mut descriptor = ResourceDescriptor::new(
            "tickets",
            "helpdesk",
            Operations::list_only(Endpoint::new(HttpMethod::Get, "/api/v2/tickets")),
            vec![
                ColumnMapping::new("id", ColumnType::Integer),
                ColumnMapping::new("status", ColumnType::String),
                ColumnMapping::new("priority", ColumnType::Integer),
                ColumnMapping::new("created_at", ColumnType::Timestamp).with_path("meta.created"),
                ColumnMapping::new("subject", ColumnType::String),
            ],
        );
        descriptor.capabilities.filters = vec![
            FilterCapability::new("status", vec![FilterOp::Eq, FilterOp::In]),
            FilterCapability {
                column: "priority".to_string(),
                operators: vec![FilterOp::Eq, FilterOp::Gt, FilterOp::Lte],
                param: Some("prio".to_string()),
            },
        ];
        descriptor.capabilities.sortable = vec!["created_at".to_string()];
        descriptor
    }

    #[test]
    fn test_translate_filters_and_sort() {
        let query = QuerySpec::all()
            .filter(Condition::eq("status", "open"))
            .filter(Condition::new("priority", FilterOp::Gt, 2))
            .order_by(SortKey::desc("created_at"))
            .limit(20);

        let call = QueryTranslator::translate(&descriptor(), &query).unwrap();
        assert_eq!(
            call.params,
            vec![
                ("status".to_string(), "open".to_string()),
                ("prio__gt".to_string(), "2".to_string()),
                ("sort".to_string(), "-meta.created".to_string()),
            ]
        );
        assert_eq!(call.limit, Some(20));
        assert_eq!(call.projection.len(), 5);
        assert!(!call.fields_requested);
    }

    #[test]
    fn test_bracket_style_and_in_list() {
        let mut descriptor = descriptor();
        descriptor.capabilities.filter_style = FilterStyle::Bracket;
        let query = QuerySpec::all()
            .filter(Condition::new("priority", FilterOp::Lte, 4))
            .filter(Condition::new("status", FilterOp::In, json!(["open", "pending"])));

        let call = QueryTranslator::translate(&descriptor, &query).unwrap();
        assert_eq!(call.params[0], ("prio[lte]".to_string(), "4".to_string()));
        assert_eq!(call.params[1], ("status[in]".to_string(), "open,pending".to_string()));
    }

    #[test]
    fn test_in_list_item_with_comma_is_unsupported() {
        let query = QuerySpec::all().filter(Condition::new("status", FilterOp::In, json!(["open", "on hold, waiting"])));
        assert!(matches!(
            QueryTranslator::translate(&descriptor(), &query),
            Err(AppError::TranslationUnsupported(_))
        ));
    }

    #[test]
    fn test_unsupported_operator_fails_fast() {
        let query = QuerySpec::all().filter(Condition::new("status", FilterOp::Like, "op%"));
        assert!(matches!(
            QueryTranslator::translate(&descriptor(), &query),
            Err(AppError::TranslationUnsupported(_))
        ));
    }

    #[test]
    fn test_unfilterable_column_fails_fast() {
        let query = QuerySpec::all().filter(Condition::eq("subject", "help"));
        assert!(matches!(
            QueryTranslator::translate(&descriptor(), &query),
            Err(AppError::TranslationUnsupported(_))
        ));
    }

    #[test]
    fn test_unsortable_column_fails_fast() {
        let query = QuerySpec::all().order_by(SortKey::asc("priority"));
        assert!(matches!(
            QueryTranslator::translate(&descriptor(), &query),
            Err(AppError::TranslationUnsupported(_))
        ));
    }

    #[test]
    fn test_projection_uses_field_selection_when_available() {
        let mut descriptor = descriptor();
        let query = QuerySpec::all().select(["id", "created_at"]);

        let call = QueryTranslator::translate(&descriptor, &query).unwrap();
        assert_eq!(call.projection, vec!["id", "created_at"]);
        assert!(!call.fields_requested);

        descriptor.capabilities.field_selection = Some("fields".to_string());
        let call = QueryTranslator::translate(&descriptor, &query).unwrap();
        assert!(call.fields_requested);
        assert!(call.params.contains(&("fields".to_string(), "id,meta.created".to_string())));
    }

    #[test]
    fn test_unknown_projection_column() {
        let query = QuerySpec::all().select(["id", "nope"]);
        assert!(QueryTranslator::translate(&descriptor(), &query).is_err());
    }

    #[test]
    fn test_null_filter_value_is_unsupported() {
        let query = QuerySpec::all().filter(Condition::eq("status", Value::Null));
        assert!(matches!(
            QueryTranslator::translate(&descriptor(), &query),
            Err(AppError::TranslationUnsupported(_))
        ));
    }
}
