use std::collections::HashSet;

use crate::api::middleware::AppError;
use crate::models::{PaginationStrategy, PredictorSpec, ResourceDescriptor, ResourceKind};

/// Registration-time checks for resource descriptors
pub struct DescriptorValidator;

impl DescriptorValidator {
    pub fn validate(descriptor: &ResourceDescriptor) -> Result<(), AppError> {
        if descriptor.name.trim().is_empty() {
            return Err(AppError::Validation("Resource name cannot be empty".to_string()));
        }
        if descriptor.integration.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Resource '{}' must name an integration",
                descriptor.name
            )));
        }
        if descriptor.columns.is_empty() {
            return Err(AppError::Validation(format!(
                "Resource '{}' declares no columns",
                descriptor.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &descriptor.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(AppError::Validation(format!(
                    "Column '{}' is declared twice on resource '{}'",
                    column.name, descriptor.name
                )));
            }
        }

        for key in &descriptor.key_columns {
            Self::require_column(descriptor, key, "key column")?;
        }
        for filter in &descriptor.capabilities.filters {
            Self::require_column(descriptor, &filter.column, "filter capability")?;
            if filter.operators.is_empty() {
                return Err(AppError::Validation(format!(
                    "Filter capability for '{}' lists no operators",
                    filter.column
                )));
            }
        }
        for column in &descriptor.capabilities.sortable {
            Self::require_column(descriptor, column, "sortable column")?;
        }

        Self::validate_pagination(descriptor)?;

        // Mutation paths are rendered from key values only
        for endpoint in [&descriptor.operations.update, &descriptor.operations.delete]
            .into_iter()
            .flatten()
        {
            for placeholder in endpoint.placeholders() {
                if !descriptor.key_columns.contains(&placeholder) {
                    return Err(AppError::Validation(format!(
                        "Path placeholder '{{{}}}' in '{}' is not a key column",
                        placeholder, endpoint.path
                    )));
                }
            }
        }

        if let ResourceKind::Model(spec) = &descriptor.kind {
            if descriptor.operations.predict.is_none() {
                return Err(AppError::Validation(format!(
                    "Model resource '{}' needs a predict endpoint",
                    descriptor.name
                )));
            }
            Self::validate_predictor(descriptor, spec)?;
        }

        Ok(())
    }

    /// Target, feature and time-series columns must exist, compared case-insensitively
    pub fn validate_predictor(descriptor: &ResourceDescriptor, spec: &PredictorSpec) -> Result<(), AppError> {
        let columns: HashSet<String> = descriptor.columns.iter().map(|c| c.name.to_lowercase()).collect();
        let has = |name: &str| columns.contains(&name.to_lowercase());

        if !has(&spec.target) {
            return Err(AppError::Validation(format!(
                "There is no column '{}' in resource '{}'",
                spec.target, descriptor.name
            )));
        }
        for feature in &spec.features {
            if !has(feature) {
                return Err(AppError::Validation(format!(
                    "There is no feature column '{}' in resource '{}'",
                    feature, descriptor.name
                )));
            }
            if feature.eq_ignore_ascii_case(&spec.target) {
                return Err(AppError::Validation(format!(
                    "Target '{}' cannot also be a feature",
                    spec.target
                )));
            }
        }

        if let Some(ts) = spec.timeseries.as_ref().filter(|ts| ts.is_timeseries) {
            if let Some(order_by) = &ts.order_by {
                if !has(order_by) {
                    return Err(AppError::Validation(format!(
                        "There is no column '{}' in resource '{}'",
                        order_by, descriptor.name
                    )));
                }
            }
            for column in &ts.group_by {
                if !has(column) {
                    return Err(AppError::Validation(format!(
                        "There is no column '{}' in resource '{}'",
                        column, descriptor.name
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_pagination(descriptor: &ResourceDescriptor) -> Result<(), AppError> {
        let page_size = match &descriptor.pagination {
            PaginationStrategy::None => return Ok(()),
            PaginationStrategy::Offset { page_size, .. } | PaginationStrategy::PageNumber { page_size, .. } => {
                *page_size
            }
            PaginationStrategy::Cursor {
                page_size,
                next_cursor_path,
                ..
            } => {
                if next_cursor_path.trim().is_empty() {
                    return Err(AppError::Validation(format!(
                        "Cursor pagination on '{}' needs a next_cursor_path",
                        descriptor.name
                    )));
                }
                *page_size
            }
        };

        if page_size == 0 {
            return Err(AppError::Validation(format!(
                "Page size for '{}' must be positive",
                descriptor.name
            )));
        }
        Ok(())
    }

    fn require_column(descriptor: &ResourceDescriptor, column: &str, role: &str) -> Result<(), AppError> {
        if descriptor.column(column).is_none() {
            return Err(AppError::Validation(format!(
                "The {} '{}' is not a declared column of '{}'",
                role, column, descriptor.name
            )));
        }
        Ok(())
    }
}
