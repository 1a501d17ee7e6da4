// SPDX-License-Identifier: Apache-2.0

//! A driver-agnostic row representation for the generic SQL query receiver
//! (§4.2), which must format a value into a log body or a metric data point
//! without knowing ahead of time whether it came from PostgreSQL or MySQL.

use dbscope_pdata::AttributeValue;

/// One column's value, widened to the handful of shapes the receiver cares
/// about: text, an integer, a float, or SQL NULL.
#[derive(Debug, Clone)]
pub enum CellValue {
    /// SQL NULL.
    Null,
    /// Any integral column (INT2/4/8, BIGINT, ...).
    Int(i64),
    /// Any floating-point or numeric column.
    Float(f64),
    /// Text, timestamp, or anything else rendered as a string.
    Text(String),
}

impl CellValue {
    /// Widens to `f64`, the shape required of a metric's value column.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            CellValue::Text(s) => s.parse().ok(),
            CellValue::Null => None,
        }
    }

    /// Widens to `u64`, used for tracking-column checkpoints.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            CellValue::Int(i) => u64::try_from(*i).ok(),
            CellValue::Float(f) => Some(*f as u64),
            CellValue::Text(s) => s.parse().ok(),
            CellValue::Null => None,
        }
    }

    /// Renders as a display string for log attributes.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Null => String::new(),
        }
    }
}

impl From<&CellValue> for AttributeValue {
    fn from(value: &CellValue) -> Self {
        match value {
            CellValue::Int(i) => AttributeValue::Int(*i),
            CellValue::Float(f) => AttributeValue::Double(*f),
            CellValue::Text(s) => AttributeValue::String(s.clone()),
            CellValue::Null => AttributeValue::String(String::new()),
        }
    }
}

/// One result row: column names alongside their widened values, in select order.
#[derive(Debug, Clone)]
pub struct QueryRow {
    /// Column names, in select order.
    pub columns: Vec<String>,
    /// Column values, parallel to `columns`.
    pub values: Vec<CellValue>,
}

impl QueryRow {
    /// Looks up a column's value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .map(|idx| &self.values[idx])
    }
}

/// Converts a `tokio_postgres` row into a driver-agnostic [`QueryRow`],
/// trying progressively wider types per column since the caller doesn't know
/// column types ahead of time for an arbitrary user query.
#[must_use]
pub fn from_postgres_row(row: &tokio_postgres::Row) -> QueryRow {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(
            row.try_get::<_, Option<i64>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Int)
                .or_else(|| row.try_get::<_, Option<f64>>(idx).ok().flatten().map(CellValue::Float))
                .or_else(|| row.try_get::<_, Option<bool>>(idx).ok().flatten().map(|b| CellValue::Int(b as i64)))
                .or_else(|| row.try_get::<_, Option<String>>(idx).ok().flatten().map(CellValue::Text))
                .unwrap_or(CellValue::Null),
        );
    }
    QueryRow { columns, values }
}

/// Converts a `mysql_async` row into a driver-agnostic [`QueryRow`].
#[must_use]
pub fn from_mysql_row(row: &mysql_async::Row) -> QueryRow {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();
    let mut values = Vec::with_capacity(columns.len());
    for idx in 0..columns.len() {
        let value = row.as_ref(idx).map_or(CellValue::Null, |v| match v {
            mysql_async::Value::NULL => CellValue::Null,
            mysql_async::Value::Int(i) => CellValue::Int(*i),
            mysql_async::Value::UInt(u) => i64::try_from(*u).map_or(CellValue::Text(u.to_string()), CellValue::Int),
            mysql_async::Value::Float(f) => CellValue::Float(f64::from(*f)),
            mysql_async::Value::Double(d) => CellValue::Float(*d),
            mysql_async::Value::Bytes(b) => CellValue::Text(String::from_utf8_lossy(b).into_owned()),
            other => CellValue::Text(format!("{other:?}")),
        });
        values.push(value);
    }
    QueryRow { columns, values }
}
