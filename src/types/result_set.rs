use serde_json::{Map, Value};

/// One result row keyed by column name, in the database's column order.
pub type Row = Map<String, Value>;

/// Backend-native shape of a fetched result: column names plus positional values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RawResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Convert positional rows into name-keyed rows.
    ///
    /// Row order and column order are preserved. A repeated column name keeps
    /// the position of its first occurrence and the value of its last.
    pub fn normalize(self) -> QueryResult {
        let RawResultSet { columns, rows } = self;

        let rows = rows
            .into_iter()
            .map(|values| {
                let mut row = Map::with_capacity(columns.len());
                for (name, value) in columns.iter().zip(values) {
                    row.insert(name.clone(), value);
                }
                row
            })
            .collect();

        QueryResult::Rows { columns, rows }
    }
}

/// What a gateway call hands back on success.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows { columns: Vec<String>, rows: Vec<Row> },
    Acknowledgement { message: String },
}

impl QueryResult {
    pub fn acknowledgement(message: impl Into<String>) -> Self {
        QueryResult::Acknowledgement {
            message: message.into(),
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            QueryResult::Rows { rows, .. } => rows.len(),
            QueryResult::Acknowledgement { .. } => 0,
        }
    }
}
