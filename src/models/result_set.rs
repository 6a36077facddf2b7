use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::{Map, Value};

/// A single cell of a remote-backed row
///
/// `Missing` means the remote record did not carry the declared field at all.
/// A field that was sent as JSON `null` is `Present(Value::Null)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Present(Value),
}

impl Cell {
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Cell::Missing => None,
            Cell::Present(value) => Some(value),
        }
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        Cell::Present(value)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    cells: Vec<Cell>,
}

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn get(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// JSON object keyed by column name; missing cells are left out of the object
    pub fn to_json(&self, columns: &[String]) -> Value {
        let mut object = Map::new();
        for (column, cell) in columns.iter().zip(self.cells.iter()) {
            if let Cell::Present(value) = cell {
                object.insert(column.clone(), value.clone());
            }
        }
        Value::Object(object)
    }
}

/// Ordered rows plus their column list, produced by one query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: Row) {
        debug_assert_eq!(row.cells.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Cell at `row` for `column`
    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    pub fn to_json_rows(&self) -> Vec<Value> {
        self.rows.iter().map(|row| row.to_json(&self.columns)).collect()
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ResultSet", 3)?;
        state.serialize_field("columns", &self.columns)?;
        state.serialize_field("rows", &self.to_json_rows())?;
        state.serialize_field("row_count", &self.rows.len())?;
        state.end()
    }
}
