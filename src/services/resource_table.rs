// Table Façade
//
// One resource exposed as a virtual table. The lifecycle runs
// Uninitialized -> Registered -> Connected -> Serving, and only a serving
// table accepts reads and writes. Queries never open a connection.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::api::middleware::AppError;
use crate::models::{
    BatchReport, Cell, ColumnMapping, Condition, ConnectionStatusReport, Endpoint, FilterOp, PredictorSpec,
    QuerySpec, ResourceDescriptor, ResourceKind, ResultSet, Row, RowFailure, RowOutcome, SortKey,
    MutationStatus,
};
use crate::services::api_invoker::{ApiInvoker, CancellationFlag, RetryPolicy};
use crate::services::query_translator::QueryTranslator;
use crate::services::remote::{Queryable, RemoteRequest};
use crate::services::ConnectionManager;
use crate::validation::{DescriptorValidator, SchemaValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    Uninitialized,
    Registered,
    Connected,
    Serving,
}

impl TableState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableState::Uninitialized => "uninitialized",
            TableState::Registered => "registered",
            TableState::Connected => "connected",
            TableState::Serving => "serving",
        }
    }
}

/// Per-table knobs shared by every table of a catalog
#[derive(Debug, Clone)]
pub struct TableSettings {
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    /// Upper bound on concurrent per-row calls in batch operations
    pub concurrency: usize,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
            concurrency: num_cpus::get(),
        }
    }
}

struct Lifecycle {
    state: TableState,
    descriptor: Option<Arc<ResourceDescriptor>>,
}

enum TargetOutcome {
    Applied(Option<Value>),
    Missing,
    Failed(AppError),
}

pub struct ResourceTable {
    name: String,
    connection: Arc<ConnectionManager>,
    invoker: ApiInvoker,
    concurrency: usize,
    lifecycle: RwLock<Lifecycle>,
}

impl ResourceTable {
    pub fn new(
        name: impl Into<String>,
        connection: Arc<ConnectionManager>,
        remote: Arc<dyn Queryable>,
        settings: TableSettings,
    ) -> Self {
        let invoker = ApiInvoker::new(remote, connection.clone(), settings.retry, settings.call_timeout);
        Self {
            name: name.into(),
            connection,
            invoker,
            concurrency: settings.concurrency.max(1),
            lifecycle: RwLock::new(Lifecycle {
                state: TableState::Uninitialized,
                descriptor: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn integration(&self) -> &str {
        self.connection.integration()
    }

    pub async fn state(&self) -> TableState {
        self.lifecycle.read().await.state
    }

    pub async fn descriptor(&self) -> Option<Arc<ResourceDescriptor>> {
        self.lifecycle.read().await.descriptor.clone()
    }

    // ---- lifecycle ----

    /// Bind a descriptor; a re-registration drops the table back to Registered
    pub async fn register(&self, descriptor: Arc<ResourceDescriptor>) -> Result<(), AppError> {
        if descriptor.name != self.name {
            return Err(AppError::Validation(format!(
                "Descriptor '{}' cannot be registered on table '{}'",
                descriptor.name, self.name
            )));
        }
        if descriptor.integration != self.connection.integration() {
            return Err(AppError::Validation(format!(
                "Resource '{}' belongs to integration '{}', not '{}'",
                descriptor.name,
                descriptor.integration,
                self.connection.integration()
            )));
        }
        DescriptorValidator::validate(&descriptor)?;

        let mut lifecycle = self.lifecycle.write().await;
        let previous = lifecycle.state;
        lifecycle.descriptor = Some(descriptor);
        lifecycle.state = TableState::Registered;
        tracing::info!("Table '{}': {} -> registered", self.name, previous.as_str());
        Ok(())
    }

    /// Make sure the integration has a session, authenticating if needed
    pub async fn connect(&self) -> Result<ConnectionStatusReport, AppError> {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state == TableState::Uninitialized {
            return Err(AppError::NotReady(format!(
                "Table '{}' has no registered descriptor",
                self.name
            )));
        }

        let report = if self.connection.is_connected().await {
            self.connection.check_connection().await
        } else {
            self.connection.connect().await
        };
        if !report.connected {
            return Err(AppError::ConnectionFailure(report.message));
        }

        if lifecycle.state == TableState::Registered {
            lifecycle.state = TableState::Connected;
            tracing::info!("Table '{}': registered -> connected", self.name);
        }
        Ok(report)
    }

    /// Start accepting queries once a liveness probe succeeds
    pub async fn serve(&self) -> Result<(), AppError> {
        let mut lifecycle = self.lifecycle.write().await;
        match lifecycle.state {
            TableState::Serving => return Ok(()),
            TableState::Connected => {}
            other => {
                return Err(AppError::NotReady(format!(
                    "Table '{}' is {} and must be connected before serving",
                    self.name,
                    other.as_str()
                )))
            }
        }

        let report = self.connection.check_connection().await;
        if !report.connected {
            return Err(AppError::ConnectionFailure(report.message));
        }

        lifecycle.state = TableState::Serving;
        tracing::info!("Table '{}': connected -> serving", self.name);
        Ok(())
    }

    /// Forget the descriptor; the shared integration session is left alone
    pub async fn teardown(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state != TableState::Uninitialized {
            tracing::info!("Table '{}': {} -> uninitialized", self.name, lifecycle.state.as_str());
        }
        lifecycle.state = TableState::Uninitialized;
        lifecycle.descriptor = None;
    }

    // ---- schema ----

    /// Declared schema, answered locally in every state after registration
    pub async fn get_columns(&self) -> Result<Vec<ColumnMapping>, AppError> {
        let lifecycle = self.lifecycle.read().await;
        lifecycle
            .descriptor
            .as_ref()
            .map(|d| d.columns.clone())
            .ok_or_else(|| AppError::NotReady(format!("Table '{}' is not registered", self.name)))
    }

    // ---- reads ----

    pub async fn select(&self, query: &QuerySpec) -> Result<ResultSet, AppError> {
        self.select_with_cancel(query, &CancellationFlag::new()).await
    }

    pub async fn select_with_cancel(&self, query: &QuerySpec, cancel: &CancellationFlag) -> Result<ResultSet, AppError> {
        let descriptor = self.ready().await?;
        match &descriptor.kind {
            ResourceKind::Data => self.fetch(&descriptor, query, cancel).await,
            ResourceKind::Model(spec) => self.select_prediction(&descriptor, spec, query).await,
        }
    }

    /// Conditions, sort keys, limit and target columns as separate arguments
    pub async fn list(
        &self,
        conditions: Vec<Condition>,
        sort: Vec<SortKey>,
        limit: Option<usize>,
        targets: Vec<String>,
    ) -> Result<ResultSet, AppError> {
        let query = QuerySpec {
            columns: targets,
            filters: conditions,
            order_by: sort,
            limit,
        };
        self.select(&query).await
    }

    async fn fetch(
        &self,
        descriptor: &ResourceDescriptor,
        query: &QuerySpec,
        cancel: &CancellationFlag,
    ) -> Result<ResultSet, AppError> {
        let call = QueryTranslator::translate(descriptor, query)?;
        self.invoker.call(descriptor, &call, cancel).await
    }

    // ---- writes ----

    /// One create call per row; the report keeps input order
    pub async fn insert(&self, rows: Vec<Map<String, Value>>) -> Result<BatchReport, AppError> {
        let descriptor = self.ready().await?;
        let create = Self::require_endpoint(&descriptor, descriptor.operations.create.as_ref(), "insert")?;

        let outcomes: Vec<Result<RowOutcome, RowFailure>> = stream::iter(rows.into_iter().enumerate())
            .map(|(index, row)| self.insert_row(&descriptor, create, index, row))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(row) => report.succeeded.push(row),
                Err(failure) => report.failed.push(failure),
            }
        }

        if report.is_complete() {
            tracing::info!("Inserted {} row(s) into '{}'", report.succeeded.len(), self.name);
            Ok(report)
        } else {
            tracing::warn!(
                "Insert into '{}': {} succeeded, {} failed",
                self.name,
                report.succeeded.len(),
                report.failed.len()
            );
            Err(AppError::PartialBatchFailure(report))
        }
    }

    async fn insert_row(
        &self,
        descriptor: &ResourceDescriptor,
        create: &Endpoint,
        index: usize,
        row: Map<String, Value>,
    ) -> Result<RowOutcome, RowFailure> {
        let fail = |e: AppError| RowFailure {
            index,
            code: e.code().to_string(),
            message: e.to_string(),
        };

        let payload = SchemaValidator::build_payload(descriptor, &row).map_err(fail)?;
        let path = create.render(&row).map_err(fail)?;
        let request = RemoteRequest::new(create.method, path).with_body(payload);
        let response = self.invoker.execute(&request).await.map_err(fail)?;

        Ok(RowOutcome {
            index,
            returned: (!response.body.is_null()).then_some(response.body),
        })
    }

    pub async fn update(&self, filters: Vec<Condition>, changes: Map<String, Value>) -> Result<MutationStatus, AppError> {
        let descriptor = self.ready().await?;
        let endpoint = Self::require_endpoint(&descriptor, descriptor.operations.update.as_ref(), "update")?;
        if changes.is_empty() {
            return Err(AppError::Validation("Update needs at least one changed column".to_string()));
        }
        let payload = SchemaValidator::build_payload(&descriptor, &changes)?;
        self.mutate(&descriptor, endpoint, filters, Some(payload)).await
    }

    pub async fn delete(&self, filters: Vec<Condition>) -> Result<MutationStatus, AppError> {
        let descriptor = self.ready().await?;
        let endpoint = Self::require_endpoint(&descriptor, descriptor.operations.delete.as_ref(), "delete")?;
        self.mutate(&descriptor, endpoint, filters, None).await
    }

    /// Locate targets through a keyed select, then call the endpoint once per target
    async fn mutate(
        &self,
        descriptor: &ResourceDescriptor,
        endpoint: &Endpoint,
        filters: Vec<Condition>,
        payload: Option<Value>,
    ) -> Result<MutationStatus, AppError> {
        if filters.is_empty() {
            return Err(AppError::Validation(format!(
                "Refusing to modify every row of '{}': a filter is required",
                descriptor.name
            )));
        }
        if descriptor.key_columns.is_empty() {
            return Err(AppError::TranslationUnsupported(format!(
                "Resource '{}' declares no key columns to address rows by",
                descriptor.name
            )));
        }

        let locate = QuerySpec {
            columns: descriptor.key_columns.clone(),
            filters,
            order_by: Vec::new(),
            limit: None,
        };
        let targets = self.fetch(descriptor, &locate, &CancellationFlag::new()).await?;
        if targets.is_empty() {
            tracing::info!("No rows of '{}' matched the filter", descriptor.name);
            return Ok(MutationStatus::TargetMissing);
        }

        let calls: Vec<_> = targets
            .rows()
            .iter()
            .cloned()
            .map(|row| self.mutate_target(descriptor, endpoint, row, payload.as_ref()))
            .collect();
        let outcomes: Vec<TargetOutcome> = stream::iter(calls).buffered(self.concurrency).collect().await;

        let mut report = BatchReport::default();
        let mut missing = 0usize;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                TargetOutcome::Applied(returned) => report.succeeded.push(RowOutcome { index, returned }),
                TargetOutcome::Missing => missing += 1,
                TargetOutcome::Failed(e) => report.failed.push(RowFailure {
                    index,
                    code: e.code().to_string(),
                    message: e.to_string(),
                }),
            }
        }

        if !report.is_complete() {
            tracing::warn!(
                "{:?} on '{}': {} applied, {} missing, {} failed",
                endpoint.method,
                descriptor.name,
                report.succeeded.len(),
                missing,
                report.failed.len()
            );
            return Err(AppError::PartialBatchFailure(report));
        }
        if report.succeeded.is_empty() {
            return Ok(MutationStatus::TargetMissing);
        }

        tracing::info!(
            "{:?} on '{}' applied to {} row(s)",
            endpoint.method,
            descriptor.name,
            report.succeeded.len()
        );
        Ok(MutationStatus::Applied {
            affected: report.succeeded.len(),
        })
    }

    async fn mutate_target(
        &self,
        descriptor: &ResourceDescriptor,
        endpoint: &Endpoint,
        target: Row,
        payload: Option<&Value>,
    ) -> TargetOutcome {
        let mut keys = Map::new();
        for (position, key) in descriptor.key_columns.iter().enumerate() {
            match target.get(position) {
                Some(Cell::Present(value)) if !value.is_null() => {
                    keys.insert(key.clone(), value.clone());
                }
                _ => {
                    return TargetOutcome::Failed(AppError::SchemaMismatch(format!(
                        "Remote record of '{}' has no value for key column '{}'",
                        descriptor.name, key
                    )))
                }
            }
        }

        let path = match endpoint.render(&keys) {
            Ok(path) => path,
            Err(e) => return TargetOutcome::Failed(e),
        };
        let mut request = RemoteRequest::new(endpoint.method, path);
        if let Some(payload) = payload {
            request = request.with_body(payload.clone());
        }

        match self.invoker.execute(&request).await {
            Ok(response) => TargetOutcome::Applied((!response.body.is_null()).then_some(response.body)),
            Err(AppError::RemoteError { status: Some(404), .. }) => TargetOutcome::Missing,
            Err(e) => TargetOutcome::Failed(e),
        }
    }

    // ---- models ----

    /// Send feature rows to the model and return them completed with predictions
    pub async fn predict(&self, rows: Vec<Map<String, Value>>) -> Result<ResultSet, AppError> {
        let descriptor = self.ready().await?;
        let spec = Self::require_model(&descriptor)?;
        self.run_prediction(&descriptor, spec, rows).await
    }

    async fn run_prediction(
        &self,
        descriptor: &ResourceDescriptor,
        spec: &PredictorSpec,
        rows: Vec<Map<String, Value>>,
    ) -> Result<ResultSet, AppError> {
        let endpoint = Self::require_endpoint(descriptor, descriptor.operations.predict.as_ref(), "predict")?;
        let columns: Vec<&ColumnMapping> = descriptor.columns.iter().collect();
        let mut result = ResultSet::new(descriptor.column_names());
        if rows.is_empty() {
            return Ok(result);
        }

        let mut inputs = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            for feature in &spec.features {
                if !row.contains_key(feature) {
                    return Err(AppError::Validation(format!(
                        "Row {} is missing feature column '{}'",
                        index, feature
                    )));
                }
            }
            inputs.push(SchemaValidator::build_payload(descriptor, row)?);
        }

        let request = RemoteRequest::new(endpoint.method, endpoint.path.clone())
            .with_body(json!({ "rows": inputs.clone() }));
        let response = self.invoker.execute(&request).await?;
        let predictions = match (&response.body, descriptor.rows_path.as_deref()) {
            // A single prediction may come back as a bare record
            (Value::Object(_), None) => vec![&response.body],
            (body, rows_path) => SchemaValidator::extract_records(body, rows_path)?,
        };

        if predictions.len() != inputs.len() {
            return Err(AppError::SchemaMismatch(format!(
                "Model '{}' returned {} prediction(s) for {} row(s)",
                descriptor.name,
                predictions.len(),
                inputs.len()
            )));
        }

        let target = descriptor.column(&spec.target).map(|c| c.field_path()).unwrap_or(&spec.target);
        for (mut merged, prediction) in inputs.into_iter().zip(predictions) {
            match prediction {
                Value::Object(fields) => {
                    if let Value::Object(merged) = &mut merged {
                        merged.extend(fields.clone());
                    }
                }
                // Bare values are the target itself
                scalar => SchemaValidator::set_path(&mut merged, target, scalar.clone()),
            }
            result.push(SchemaValidator::map_record(&columns, &merged)?);
        }

        tracing::info!("Model '{}' predicted {} row(s)", descriptor.name, result.len());
        Ok(result)
    }

    /// `SELECT ... WHERE feature = value` on a model predicts that single row
    async fn select_prediction(
        &self,
        descriptor: &ResourceDescriptor,
        spec: &PredictorSpec,
        query: &QuerySpec,
    ) -> Result<ResultSet, AppError> {
        if !query.order_by.is_empty() {
            return Err(AppError::TranslationUnsupported(format!(
                "Model '{}' answers with a single prediction and cannot be ordered",
                descriptor.name
            )));
        }

        let mut row = Map::new();
        for condition in &query.filters {
            let is_feature = spec.features.iter().any(|f| f == &condition.field);
            if condition.op != FilterOp::Eq || !is_feature {
                return Err(AppError::TranslationUnsupported(format!(
                    "Model '{}' only accepts equality conditions on its feature columns",
                    descriptor.name
                )));
            }
            row.insert(condition.field.clone(), condition.value.clone());
        }

        let predicted = if query.limit == Some(0) {
            ResultSet::new(descriptor.column_names())
        } else {
            self.run_prediction(descriptor, spec, vec![row]).await?
        };
        if query.columns.is_empty() || query.columns.iter().any(|c| c == "*") {
            return Ok(predicted);
        }
        Self::project(descriptor, predicted, &query.columns)
    }

    /// Metadata rows for a resource, without a remote call
    ///
    /// Models answer `None`/`"model"` with a single summary row and
    /// `"features"` with one row per input column. Data resources describe
    /// their column mapping.
    pub async fn describe(&self, attribute: Option<&str>) -> Result<ResultSet, AppError> {
        let descriptor = self
            .lifecycle
            .read()
            .await
            .descriptor
            .clone()
            .ok_or_else(|| AppError::NotReady(format!("Table '{}' is not registered", self.name)))?;

        match (&descriptor.kind, attribute) {
            (ResourceKind::Model(spec), None | Some("model")) => {
                let ts = spec.timeseries.clone().unwrap_or_default();
                let mut result = ResultSet::new(
                    ["name", "target", "features", "is_timeseries", "order_by", "group_by", "window", "horizon"]
                        .iter()
                        .map(|c| c.to_string())
                        .collect(),
                );
                result.push(Row::new(vec![
                    Cell::Present(json!(descriptor.name)),
                    Cell::Present(json!(spec.target)),
                    Cell::Present(json!(spec.features)),
                    Cell::Present(json!(ts.is_timeseries)),
                    Cell::Present(json!(ts.order_by)),
                    Cell::Present(json!(ts.group_by)),
                    Cell::Present(json!(ts.window)),
                    Cell::Present(json!(ts.horizon)),
                ]));
                Ok(result)
            }
            (ResourceKind::Model(spec), Some("features")) => {
                let mut result = ResultSet::new(vec!["column".to_string(), "type".to_string(), "role".to_string()]);
                for column in &descriptor.columns {
                    let role = if column.name.eq_ignore_ascii_case(&spec.target) {
                        "target"
                    } else if spec.features.iter().any(|f| f.eq_ignore_ascii_case(&column.name)) {
                        "feature"
                    } else {
                        continue;
                    };
                    result.push(Row::new(vec![
                        Cell::Present(json!(column.name)),
                        Cell::Present(json!(column.column_type.as_str())),
                        Cell::Present(json!(role)),
                    ]));
                }
                Ok(result)
            }
            (ResourceKind::Data, None | Some("columns")) => {
                let mut result = ResultSet::new(
                    ["column", "type", "path", "nullable", "key"]
                        .iter()
                        .map(|c| c.to_string())
                        .collect(),
                );
                for column in &descriptor.columns {
                    result.push(Row::new(vec![
                        Cell::Present(json!(column.name)),
                        Cell::Present(json!(column.column_type.as_str())),
                        Cell::Present(json!(column.field_path())),
                        Cell::Present(json!(column.nullable)),
                        Cell::Present(json!(descriptor.key_columns.contains(&column.name))),
                    ]));
                }
                Ok(result)
            }
            (_, Some(other)) => Err(AppError::Validation(format!(
                "Unknown describe attribute '{}' for '{}'",
                other, descriptor.name
            ))),
        }
    }

    // ---- helpers ----

    /// Descriptor of a serving table with a live connection
    async fn ready(&self) -> Result<Arc<ResourceDescriptor>, AppError> {
        let descriptor = {
            let lifecycle = self.lifecycle.read().await;
            match (&lifecycle.descriptor, lifecycle.state) {
                (Some(descriptor), TableState::Serving) => descriptor.clone(),
                (_, state) => {
                    return Err(AppError::NotReady(format!(
                        "Table '{}' is {}, queries are accepted only while serving",
                        self.name,
                        state.as_str()
                    )))
                }
            }
        };

        if !self.connection.is_connected().await {
            return Err(AppError::NotReady(format!(
                "Integration '{}' of table '{}' is disconnected",
                self.connection.integration(),
                self.name
            )));
        }
        Ok(descriptor)
    }

    fn require_endpoint<'a>(
        descriptor: &ResourceDescriptor,
        endpoint: Option<&'a Endpoint>,
        operation: &str,
    ) -> Result<&'a Endpoint, AppError> {
        endpoint.ok_or_else(|| {
            AppError::TranslationUnsupported(format!(
                "Resource '{}' does not support {}",
                descriptor.name, operation
            ))
        })
    }

    fn require_model(descriptor: &ResourceDescriptor) -> Result<&PredictorSpec, AppError> {
        descriptor.predictor().ok_or_else(|| {
            AppError::Validation(format!("Resource '{}' is not a model", descriptor.name))
        })
    }

    fn project(descriptor: &ResourceDescriptor, full: ResultSet, columns: &[String]) -> Result<ResultSet, AppError> {
        let positions = columns
            .iter()
            .map(|name| {
                full.column_index(name).ok_or_else(|| {
                    AppError::TranslationUnsupported(format!(
                        "Column '{}' does not exist on resource '{}'",
                        name, descriptor.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut projected = ResultSet::new(columns.to_vec());
        for row in full.rows() {
            let cells = positions
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Cell::Missing))
                .collect();
            projected.push(Row::new(cells));
        }
        Ok(projected)
    }
}
