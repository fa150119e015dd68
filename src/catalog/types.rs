use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Decimal,
    Varchar(u32),
    Varbinary(u32),
    Timestamp,
}

impl ColumnType {
    fn integer_rank(self) -> Option<u8> {
        match self {
            ColumnType::TinyInt => Some(1),
            ColumnType::SmallInt => Some(2),
            ColumnType::Integer => Some(3),
            ColumnType::BigInt => Some(4),
            _ => None,
        }
    }

    /// True when every value representable in `self` is representable in
    /// `target`, so existing rows survive the change without inspection.
    pub fn widens_to(self, target: ColumnType) -> bool {
        if self == target {
            return true;
        }
        if let (Some(from), Some(to)) = (self.integer_rank(), target.integer_rank()) {
            return from <= to;
        }
        match (self, target) {
            (ColumnType::Varchar(from), ColumnType::Varchar(to)) => from <= to,
            (ColumnType::Varbinary(from), ColumnType::Varbinary(to)) => from <= to,
            _ => false,
        }
    }

    /// Bytes one value of this type occupies in the in-memory footprint estimate.
    pub fn footprint_bytes(self) -> usize {
        match self {
            ColumnType::TinyInt => 1,
            ColumnType::SmallInt => 2,
            ColumnType::Integer => 4,
            ColumnType::BigInt | ColumnType::Float | ColumnType::Timestamp => 8,
            ColumnType::Decimal => 16,
            ColumnType::Varchar(n) | ColumnType::Varbinary(n) => n as usize,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.integer_rank().is_some() || matches!(self, ColumnType::Float | ColumnType::Decimal)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::TinyInt => write!(f, "TINYINT"),
            ColumnType::SmallInt => write!(f, "SMALLINT"),
            ColumnType::Integer => write!(f, "INTEGER"),
            ColumnType::BigInt => write!(f, "BIGINT"),
            ColumnType::Float => write!(f, "FLOAT"),
            ColumnType::Decimal => write!(f, "DECIMAL"),
            ColumnType::Varchar(n) => write!(f, "VARCHAR({n})"),
            ColumnType::Varbinary(n) => write!(f, "VARBINARY({n})"),
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

/// A parameter or result cell crossing the procedure-call surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(i64),
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) => 1,
            Value::Timestamp(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
            Value::Bytes(_) => 5,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "BIGINT",
            Value::Float(_) => "FLOAT",
            Value::Text(_) => "VARCHAR",
            Value::Bytes(_) => "VARBINARY",
            Value::Timestamp(_) => "TIMESTAMP",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
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

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) | Value::Timestamp(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "{}", hex::encode(b)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnType, Value};

    #[test]
    fn integer_widening_follows_rank() {
        assert!(ColumnType::TinyInt.widens_to(ColumnType::BigInt));
        assert!(ColumnType::Integer.widens_to(ColumnType::Integer));
        assert!(!ColumnType::BigInt.widens_to(ColumnType::SmallInt));
        assert!(!ColumnType::Integer.widens_to(ColumnType::Float));
    }

    #[test]
    fn varchar_widening_follows_length() {
        assert!(ColumnType::Varchar(16).widens_to(ColumnType::Varchar(64)));
        assert!(!ColumnType::Varchar(64).widens_to(ColumnType::Varchar(16)));
        assert!(!ColumnType::Varchar(16).widens_to(ColumnType::Varbinary(16)));
    }

    #[test]
    fn values_order_by_kind_then_content() {
        let mut values = vec![
            Value::Text("b".into()),
            Value::Integer(3),
            Value::Null,
            Value::Text("a".into()),
            Value::Integer(-1),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Integer(-1),
                Value::Integer(3),
                Value::Text("a".into()),
                Value::Text("b".into()),
            ]
        );
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn display_is_sql_like() {
        assert_eq!(ColumnType::Varchar(32).to_string(), "VARCHAR(32)");
        assert_eq!(Value::Bytes(vec![0xab, 0x01]).to_string(), "ab01");
    }
}
