//! Driver-neutral column values and positional row access.

use std::ops::Range;

use crate::error::DecodeError;

/// One column value as handed out by a store driver.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A borrowed result row. Columns are addressed by position only.
///
/// `NULL` decodes to the zero value of every accessor; any other type
/// mismatch is a [`DecodeError::Type`].
#[derive(Clone, Copy, Debug)]
pub struct Row<'a> {
    values: &'a [Value],
    offset: usize,
}

impl<'a> Row<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        Self { values, offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    /// Fails unless the row has exactly `expected` columns.
    pub fn expect_width(&self, expected: usize) -> Result<(), DecodeError> {
        if self.values.len() != expected {
            return Err(DecodeError::Width {
                expected,
                actual: self.values.len(),
            });
        }
        Ok(())
    }

    /// Sub-row over `range`. Error positions stay relative to the full row.
    pub fn slice(&self, range: Range<usize>) -> Result<Row<'a>, DecodeError> {
        let values = self.values.get(range.clone()).ok_or(DecodeError::Width {
            expected: range.end,
            actual: self.values.len(),
        })?;
        Ok(Row {
            values,
            offset: self.offset + range.start,
        })
    }

    pub fn text(&self, index: usize) -> Result<String, DecodeError> {
        match self.column(index)? {
            Value::Text(text) => Ok(text.clone()),
            Value::Null => Ok(String::new()),
            other => Err(self.mismatch(index, "text", other)),
        }
    }

    /// Identifier column: text, or an integer key rendered in decimal.
    pub fn key(&self, index: usize) -> Result<String, DecodeError> {
        match self.column(index)? {
            Value::Text(text) => Ok(text.clone()),
            Value::Integer(value) => Ok(value.to_string()),
            Value::Null => Ok(String::new()),
            other => Err(self.mismatch(index, "text or integer", other)),
        }
    }

    pub fn integer(&self, index: usize) -> Result<i64, DecodeError> {
        match self.column(index)? {
            Value::Integer(value) => Ok(*value),
            Value::Null => Ok(0),
            other => Err(self.mismatch(index, "integer", other)),
        }
    }

    pub fn real(&self, index: usize) -> Result<f64, DecodeError> {
        match self.column(index)? {
            Value::Real(value) => Ok(*value),
            Value::Integer(value) => Ok(*value as f64),
            Value::Null => Ok(0.0),
            other => Err(self.mismatch(index, "real", other)),
        }
    }

    fn column(&self, index: usize) -> Result<&'a Value, DecodeError> {
        self.values.get(index).ok_or(DecodeError::Width {
            expected: index + 1,
            actual: self.values.len(),
        })
    }

    fn mismatch(&self, index: usize, expected: &'static str, found: &Value) -> DecodeError {
        DecodeError::Type {
            index: self.offset + index,
            expected,
            found: found.type_name(),
        }
    }
}
