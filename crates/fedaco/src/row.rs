//! Result rows and row mapping traits

use crate::error::{OrmError, OrmResult};
use crate::value::{FromValue, Value};

/// A single result row: ordered column names with their values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Raw value of a column, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Value at a column index.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Try to get a typed column value, returning [`OrmError::Decode`] on failure.
    pub fn try_get<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| OrmError::decode(column, "column not found"))?;
        T::from_value(value).map_err(|e| match e {
            OrmError::Decode { message, .. } => OrmError::decode(column, message),
            other => other,
        })
    }

    /// Set or append a column.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        match self.columns.iter().position(|c| *c == column) {
            Some(i) => self.values[i] = value.into(),
            None => {
                self.columns.push(column);
                self.values.push(value.into());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn into_pairs(self) -> impl Iterator<Item = (String, Value)> {
        self.columns.into_iter().zip(self.values)
    }
}

/// Trait for types that can be constructed from a result row
pub trait FromRow: Sized {
    /// Convert a result row into Self
    fn from_row(row: &Row) -> OrmResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> OrmResult<Self> {
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access() {
        let row = Row::from_pairs([("id", Value::Int(3)), ("name", Value::from("ann"))]);
        assert_eq!(row.try_get::<i64>("id").unwrap(), 3);
        assert_eq!(row.try_get::<String>("name").unwrap(), "ann");
        let err = row.try_get::<i64>("missing").unwrap_err();
        assert!(matches!(err, OrmError::Decode { column, .. } if column == "missing"));
    }

    #[test]
    fn set_replaces_existing_column() {
        let mut row = Row::from_pairs([("id", 1)]);
        row.set("id", 2);
        row.set("extra", "x");
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn decode_error_names_the_column() {
        let row = Row::from_pairs([("flag", Value::Bytes(vec![1]))]);
        let err = row.try_get::<bool>("flag").unwrap_err();
        assert!(matches!(err, OrmError::Decode { column, .. } if column == "flag"));
    }
}
