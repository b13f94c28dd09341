//! Column value types.
//!
//! # Responsibility
//! - Map Rust field types onto the four storage kinds understood by the
//!   query layer.
//! - Convert field values to and from driver values.
//!
//! # Invariants
//! - `ColumnType` is implemented only for primitives, text and their
//!   `Option` forms, so non-mappable field types fail at compile time.
//! - Nullability is derived from `Option`, never declared separately.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Value, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage kind of one mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Boolean,
    Integer,
    Real,
    Text,
}

/// Semantic type of a mapped property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeclaredType {
    pub kind: ValueKind,
    pub nullable: bool,
}

impl DeclaredType {
    pub const fn required(kind: ValueKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    pub const fn nullable(kind: ValueKind) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }

    /// Zero value used when no explicit default is configured.
    ///
    /// - nullable types -> `NULL`
    /// - `Boolean`/`Integer` -> `0`
    /// - `Real` -> `0.0`
    /// - `Text` -> empty string
    pub fn default_value(&self) -> Value {
        if self.nullable {
            return Value::Null;
        }
        match self.kind {
            ValueKind::Boolean | ValueKind::Integer => Value::Integer(0),
            ValueKind::Real => Value::Real(0.0),
            ValueKind::Text => Value::Text(String::new()),
        }
    }

    /// Returns whether `value` can be stored in a column of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self.kind, value) {
            (_, Value::Null) => self.nullable,
            (ValueKind::Boolean, Value::Integer(flag)) => *flag == 0 || *flag == 1,
            (ValueKind::Integer, Value::Integer(_)) => true,
            (ValueKind::Real, Value::Real(_)) => true,
            (ValueKind::Real, Value::Integer(_)) => true,
            (ValueKind::Text, Value::Text(_)) => true,
            _ => false,
        }
    }
}

/// Rust type that can back one mapped column.
pub trait ColumnType: Sized + 'static {
    fn declared_type() -> DeclaredType;
    fn to_value(&self) -> Value;
    fn from_value(value: ValueRef<'_>) -> FromSqlResult<Self>;
}

/// Non-`Option` column types; the only valid payloads of `Option<T>`.
pub trait RequiredColumnType: ColumnType {}

macro_rules! impl_column_type {
    ($($ty:ty => $kind:ident, |$field:ident| $convert:expr;)*) => {$(
        impl ColumnType for $ty {
            fn declared_type() -> DeclaredType {
                DeclaredType::required(ValueKind::$kind)
            }

            fn to_value(&self) -> Value {
                let $field = self;
                $convert
            }

            fn from_value(value: ValueRef<'_>) -> FromSqlResult<Self> {
                <$ty as FromSql>::column_result(value)
            }
        }

        impl RequiredColumnType for $ty {}
    )*};
}

impl_column_type! {
    bool => Boolean, |v| Value::Integer(i64::from(*v));
    i8 => Integer, |v| Value::Integer(i64::from(*v));
    i16 => Integer, |v| Value::Integer(i64::from(*v));
    i32 => Integer, |v| Value::Integer(i64::from(*v));
    i64 => Integer, |v| Value::Integer(*v);
    u8 => Integer, |v| Value::Integer(i64::from(*v));
    u16 => Integer, |v| Value::Integer(i64::from(*v));
    u32 => Integer, |v| Value::Integer(i64::from(*v));
    f32 => Real, |v| Value::Real(f64::from(*v));
    f64 => Real, |v| Value::Real(*v);
    String => Text, |v| Value::Text(v.clone());
}

// Stored as canonical hyphenated text.
impl ColumnType for Uuid {
    fn declared_type() -> DeclaredType {
        DeclaredType::required(ValueKind::Text)
    }

    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }

    fn from_value(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Uuid::parse_str(text).map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

impl RequiredColumnType for Uuid {}

impl<T: RequiredColumnType> ColumnType for Option<T> {
    fn declared_type() -> DeclaredType {
        DeclaredType::nullable(T::declared_type().kind)
    }

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, ColumnType::to_value)
    }

    fn from_value(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
