use std::fmt;
use std::sync::Arc;

use serde::de::{MapAccess, Visitor};
use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Values that can be bound as statement parameters or read back from a row.
///
/// The wire form is plain JSON: `null`, an integer, a float, a string, or an array of
/// bytes for blobs. Integers and floats stay distinct across a round trip because
/// `serde_json` keeps the decimal point on `f64` values. NaN and infinite reals have no
/// JSON form and fail to serialize instead of turning into `null`.
/// ```rust
/// use sqlite_bridge::SqlValue;
///
/// let params = vec![
///     SqlValue::Integer(1),
///     SqlValue::Text("alice".into()),
///     SqlValue::Null,
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Integer(i64),
    /// Floating point value (64-bit)
    Real(f64),
    /// Text/string value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let SqlValue::Integer(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let SqlValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            SqlValue::Real(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            SqlValue::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let SqlValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_unit(),
            SqlValue::Integer(i) => serializer.serialize_i64(*i),
            SqlValue::Real(f) if f.is_finite() => serializer.serialize_f64(*f),
            SqlValue::Real(f) => Err(S::Error::custom(format!(
                "real value {f} has no JSON representation"
            ))),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Blob(bytes) => bytes.serialize(serializer),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// A single result row: column names in result order plus the matching values.
///
/// Serialized as a JSON object whose keys keep the statement's column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// The column names for this row (shared across all rows of one statement)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<SqlValue>,
}

impl Row {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<SqlValue>) -> Self {
        Self {
            column_names,
            values,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.column_names.iter().zip(self.values.iter()) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = Row;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column name to value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Row, A::Error> {
                let capacity = access.size_hint().unwrap_or(0);
                let mut names = Vec::with_capacity(capacity);
                let mut values = Vec::with_capacity(capacity);
                while let Some((name, value)) = access.next_entry::<String, SqlValue>()? {
                    names.push(name);
                    values.push(value);
                }
                Ok(Row::new(Arc::new(names), values))
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// Outcome of a `Run` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Rows inserted, updated or deleted by the statement
    pub changed_row_count: usize,
    /// Rowid of the most recent successful INSERT on the handle
    pub last_inserted_id: i64,
}

/// Kind-dependent success payload produced by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `Run`: change count and last inserted rowid
    Run(RunResult),
    /// `Get`: the first row, or `None` when the statement produced no rows
    Row(Option<Row>),
    /// `All`: every row in result order
    Rows(Vec<Row>),
    /// `Exec`: completion only
    Done,
}

impl Payload {
    /// Encode the payload as the `data` member of a response.
    ///
    /// # Errors
    /// Returns a `serde_json` error if a value cannot be represented as JSON, such as
    /// a NaN or infinite real.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Payload::Run(result) => serde_json::to_value(result),
            Payload::Row(row) => serde_json::to_value(row),
            Payload::Rows(rows) => serde_json::to_value(rows),
            Payload::Done => Ok(serde_json::Value::Null),
        }
    }
}
