//! Result normalization
//!
//! Work functions can hand back anything: scalars, nested maps and lists,
//! large tables, or values that only know how to display themselves.
//! [`normalize`] turns any [`ResultValue`] into a `serde_json::Value` that can
//! always be persisted. It never fails. Values with no JSON form degrade to a
//! string, and a value that cannot even be rendered becomes [`UNSERIALIZABLE`].

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Tables longer than this are truncated to their first `MAX_TABLE_ROWS` rows
pub const MAX_TABLE_ROWS: usize = 100;

/// Substituted for values whose string rendering fails
pub const UNSERIALIZABLE: &str = "<unserializable>";

/// Column-oriented tabular payload, normalized into a list of row objects
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<ResultValue>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row. Cells are matched to columns by position; missing cells
    /// normalize to `null` and surplus cells are ignored.
    pub fn push_row<I, V>(&mut self, cells: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<ResultValue>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    pub fn with_row<I, V>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ResultValue>,
    {
        self.push_row(cells);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A result payload as produced by a work function
#[derive(Clone)]
pub enum ResultValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Already JSON; passes through untouched
    Json(Value),
    List(Vec<ResultValue>),
    Map(BTreeMap<String, ResultValue>),
    Table(Table),
    /// Anything else, kept only by its `Display` rendering
    Opaque(Arc<dyn fmt::Display + Send + Sync>),
}

impl ResultValue {
    pub fn opaque<T>(value: T) -> Self
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        Self::Opaque(Arc::new(value))
    }

    /// Build a map value from key/value pairs
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ResultValue>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Normalize this value; shorthand for [`normalize`]
    pub fn to_json(&self) -> Value {
        normalize(self)
    }
}

impl fmt::Debug for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Self::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Self::Table(table) => f
                .debug_struct("Table")
                .field("columns", &table.columns)
                .field("rows", &table.rows.len())
                .finish(),
            Self::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

/// Convert a result payload into a JSON value that can always be persisted
pub fn normalize(value: &ResultValue) -> Value {
    match value {
        ResultValue::Null => Value::Null,
        ResultValue::Bool(b) => Value::Bool(*b),
        ResultValue::Int(i) => Value::Number((*i).into()),
        ResultValue::Float(x) => match Number::from_f64(*x) {
            Some(n) => Value::Number(n),
            // NaN and infinities have no JSON number form
            None => Value::String(x.to_string()),
        },
        ResultValue::Text(s) => Value::String(s.clone()),
        ResultValue::Json(v) => v.clone(),
        ResultValue::List(items) => Value::Array(items.iter().map(normalize).collect()),
        ResultValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        ResultValue::Table(table) => normalize_table(table),
        ResultValue::Opaque(display) => Value::String(render(display.as_ref())),
    }
}

fn normalize_table(table: &Table) -> Value {
    let rows = table
        .rows
        .iter()
        .take(MAX_TABLE_ROWS)
        .map(|cells| {
            let mut row = Map::with_capacity(table.columns.len());
            for (idx, column) in table.columns.iter().enumerate() {
                let cell = cells.get(idx).map(normalize).unwrap_or(Value::Null);
                row.insert(column.clone(), cell);
            }
            Value::Object(row)
        })
        .collect();
    Value::Array(rows)
}

fn render(display: &(dyn fmt::Display + Send + Sync)) -> String {
    let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut out = String::new();
        write!(out, "{}", display).map(|_| out)
    }));

    match rendered {
        Ok(Ok(s)) => s,
        _ => UNSERIALIZABLE.to_string(),
    }
}

impl From<Value> for ResultValue {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

impl From<String> for ResultValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ResultValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for ResultValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ResultValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for ResultValue {
    fn from(i: i32) -> Self {
        Self::Int(i.into())
    }
}

impl From<u32> for ResultValue {
    fn from(i: u32) -> Self {
        Self::Int(i.into())
    }
}

impl From<f64> for ResultValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<Table> for ResultValue {
    fn from(t: Table) -> Self {
        Self::Table(t)
    }
}

impl<T: Into<ResultValue>> From<Option<T>> for ResultValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl<T: Into<ResultValue>> From<Vec<T>> for ResultValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Broken;

    impl fmt::Display for Broken {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    struct Exploding;

    impl fmt::Display for Exploding {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            panic!("cannot render");
        }
    }

    struct Price(u32);

    impl fmt::Display for Price {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "${}.00", self.0)
        }
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(normalize(&ResultValue::Null), Value::Null);
        assert_eq!(normalize(&true.into()), json!(true));
        assert_eq!(normalize(&42i64.into()), json!(42));
        assert_eq!(normalize(&1.5f64.into()), json!(1.5));
        assert_eq!(normalize(&"AAPL".into()), json!("AAPL"));
    }

    #[test]
    fn test_non_finite_floats_become_strings() {
        assert_eq!(normalize(&f64::NAN.into()), json!("NaN"));
        assert_eq!(normalize(&f64::INFINITY.into()), json!("inf"));
    }

    #[test]
    fn test_large_table_truncated_to_limit() {
        let mut table = Table::new(["symbol", "close"]);
        for i in 0..500 {
            table.push_row([ResultValue::from(format!("S{}", i)), ResultValue::from(i as f64)]);
        }
        assert_eq!(table.len(), 500);

        let normalized = normalize(&table.into());
        let rows = normalized.as_array().unwrap();
        assert_eq!(rows.len(), MAX_TABLE_ROWS);
        assert_eq!(rows[0], json!({"symbol": "S0", "close": 0.0}));
        assert_eq!(rows[99]["symbol"], json!("S99"));
    }

    #[test]
    fn test_table_rows_matched_by_position() {
        let table = Table::new(["a", "b"])
            .with_row([1i64])
            .with_row([2i64, 3, 4]);

        assert_eq!(
            normalize(&table.into()),
            json!([{"a": 1, "b": null}, {"a": 2, "b": 3}])
        );
    }

    #[test]
    fn test_nested_containers_recurse() {
        let inner = Table::new(["x"]).with_row([f64::NAN]);
        let value = ResultValue::map([
            ("rows", ResultValue::Table(inner)),
            ("tags", ResultValue::from(vec!["a", "b"])),
            ("price", ResultValue::opaque(Price(12))),
            ("raw", ResultValue::from(json!({"k": [1, 2]}))),
        ]);

        assert_eq!(
            normalize(&value),
            json!({
                "rows": [{"x": "NaN"}],
                "tags": ["a", "b"],
                "price": "$12.00",
                "raw": {"k": [1, 2]},
            })
        );
    }

    #[test]
    fn test_list_order_preserved() {
        let value = ResultValue::from(vec![3i64, 1, 2]);
        assert_eq!(normalize(&value), json!([3, 1, 2]));
    }

    #[test]
    fn test_failed_rendering_uses_sentinel() {
        assert_eq!(normalize(&ResultValue::opaque(Broken)), json!(UNSERIALIZABLE));
        assert_eq!(normalize(&ResultValue::opaque(Exploding)), json!(UNSERIALIZABLE));
    }

    #[test]
    fn test_normalized_output_serializes() {
        let value = ResultValue::from(vec![
            ResultValue::opaque(Broken),
            ResultValue::Float(f64::NEG_INFINITY),
            ResultValue::from(None::<i64>),
        ]);
        let text = serde_json::to_string(&value.to_json()).unwrap();
        assert_eq!(text, r#"["<unserializable>","-inf",null]"#);
    }
}
