use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::middleware::AppError;
use super::query::FilterOp;

/// Semantic type declared for a column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    /// RFC 3339 string, or integer seconds since the epoch on the wire
    Timestamp,
    Json,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
        }
    }
}

/// Logical column mapped onto a field of the remote record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMapping {
    pub name: String,
    /// Dot-separated path inside the remote record, defaults to the column name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnMapping {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            path: None,
            column_type,
            nullable: true,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn field_path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// POST may create a record on every attempt, so it is never replayed
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, HttpMethod::Post)
    }
}

/// Remote endpoint; `{column}` placeholders in the path are filled from key values
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub method: HttpMethod,
    pub path: String,
}

impl Endpoint {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    pub fn placeholders(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut rest = self.path.as_str();
        while let Some(start) = rest.find('{') {
            match rest[start..].find('}') {
                Some(end) => {
                    names.push(rest[start + 1..start + end].to_string());
                    rest = &rest[start + end + 1..];
                }
                None => break,
            }
        }
        names
    }

    /// Render the path, percent-encoding every substituted value
    pub fn render(&self, values: &Map<String, Value>) -> Result<String, AppError> {
        let mut path = self.path.clone();
        for name in self.placeholders() {
            let raw = match values.get(&name) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                _ => {
                    return Err(AppError::Validation(format!(
                        "No value for path placeholder '{{{}}}' in '{}'",
                        name, self.path
                    )))
                }
            };
            path = path.replace(&format!("{{{}}}", name), &urlencoding::encode(&raw));
        }
        Ok(path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operations {
    pub list: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<Endpoint>,
    /// Only meaningful for model resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predict: Option<Endpoint>,
}

impl Operations {
    pub fn list_only(list: Endpoint) -> Self {
        Self {
            list,
            create: None,
            update: None,
            delete: None,
            predict: None,
        }
    }
}

/// How the remote API splits a listing into pages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaginationStrategy {
    /// The whole listing comes back in one response
    #[default]
    None,
    Offset {
        #[serde(default = "default_limit_param")]
        limit_param: String,
        #[serde(default = "default_offset_param")]
        offset_param: String,
        #[serde(default)]
        page_size: usize,
    },
    PageNumber {
        #[serde(default = "default_page_param")]
        page_param: String,
        #[serde(default = "default_size_param")]
        size_param: String,
        #[serde(default)]
        page_size: usize,
        #[serde(default = "default_first_page")]
        first_page: u64,
    },
    Cursor {
        #[serde(default = "default_cursor_param")]
        cursor_param: String,
        #[serde(default = "default_limit_param")]
        size_param: String,
        #[serde(default)]
        page_size: usize,
        /// Dot-separated path of the next-page cursor in the response body
        next_cursor_path: String,
    },
}

impl PaginationStrategy {
    /// Fill a page size left unset (zero) in a submitted descriptor
    pub fn fill_page_size(&mut self, default: usize) {
        match self {
            PaginationStrategy::None => {}
            PaginationStrategy::Offset { page_size, .. }
            | PaginationStrategy::PageNumber { page_size, .. }
            | PaginationStrategy::Cursor { page_size, .. } => {
                if *page_size == 0 {
                    *page_size = default;
                }
            }
        }
    }
}

fn default_limit_param() -> String {
    "limit".to_string()
}

fn default_offset_param() -> String {
    "offset".to_string()
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_size_param() -> String {
    "per_page".to_string()
}

fn default_first_page() -> u64 {
    1
}

fn default_cursor_param() -> String {
    "cursor".to_string()
}

/// Naming of non-equality filter parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterStyle {
    /// `created__gt=...`
    #[default]
    Suffix,
    /// `created[gt]=...`
    Bracket,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterCapability {
    pub column: String,
    pub operators: Vec<FilterOp>,
    /// Remote parameter name, defaults to the column name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl FilterCapability {
    pub fn new(column: impl Into<String>, operators: Vec<FilterOp>) -> Self {
        Self {
            column: column.into(),
            operators,
            param: None,
        }
    }

    pub fn param_name(&self) -> &str {
        self.param.as_deref().unwrap_or(&self.column)
    }
}

/// What the remote listing endpoint can do on its own
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capabilities {
    #[serde(default)]
    pub filters: Vec<FilterCapability>,
    #[serde(default)]
    pub filter_style: FilterStyle,
    #[serde(default)]
    pub sortable: Vec<String>,
    #[serde(default = "default_sort_param")]
    pub sort_param: String,
    /// Parameter carrying a comma-separated field list, when supported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_selection: Option<String>,
}

fn default_sort_param() -> String {
    "sort".to_string()
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            filter_style: FilterStyle::default(),
            sortable: Vec::new(),
            sort_param: default_sort_param(),
            field_selection: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TimeseriesSettings {
    #[serde(default)]
    pub is_timeseries: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon: Option<u32>,
}

/// A REST-served model: which column it predicts from which features
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictorSpec {
    pub target: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeseries: Option<TimeseriesSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceKind {
    #[default]
    Data,
    Model(PredictorSpec),
}

/// Schema and endpoint metadata for one remote-backed table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDescriptor {
    pub name: String,
    pub integration: String,
    pub operations: Operations,
    pub columns: Vec<ColumnMapping>,
    /// Columns identifying a single remote record, used by update and delete
    #[serde(default)]
    pub key_columns: Vec<String>,
    /// Dot-separated path of the record array in a listing response, `None` for a top-level array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_path: Option<String>,
    #[serde(default)]
    pub pagination: PaginationStrategy,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub kind: ResourceKind,
}

impl ResourceDescriptor {
    pub fn new(
        name: impl Into<String>,
        integration: impl Into<String>,
        operations: Operations,
        columns: Vec<ColumnMapping>,
    ) -> Self {
        Self {
            name: name.into(),
            integration: integration.into(),
            operations,
            columns,
            key_columns: Vec::new(),
            rows_path: None,
            pagination: PaginationStrategy::None,
            capabilities: Capabilities::default(),
            kind: ResourceKind::Data,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn filter_capability(&self, column: &str) -> Option<&FilterCapability> {
        self.capabilities.filters.iter().find(|f| f.column == column)
    }

    pub fn predictor(&self) -> Option<&PredictorSpec> {
        match &self.kind {
            ResourceKind::Model(spec) => Some(spec),
            ResourceKind::Data => None,
        }
    }
}
