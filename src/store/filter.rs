use std::cmp::Ordering;

use time::OffsetDateTime;
use uuid::Uuid;

use super::Field;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Uuid(Uuid),
    Bool(bool),
    Timestamp(OffsetDateTime),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Ordering between values of the same kind; nulls sort last.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            _ => Ordering::Equal,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(v: OffsetDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Structured predicate over a document's fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter<F> {
    Eq(F, Value),
    /// Also matches nulls, like `IS DISTINCT FROM`.
    Ne(F, Value),
    /// Strictly less than; never matches a null.
    Lt(F, Value),
    /// Case-insensitive substring match on a text field.
    Contains(F, String),
    Present(F),
    And(Vec<Filter<F>>),
    Or(Vec<Filter<F>>),
}

impl<F: Field> Filter<F> {
    /// Matches every record.
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    pub fn eq(field: F, value: impl Into<Value>) -> Self {
        Filter::Eq(field, value.into())
    }

    pub fn ne(field: F, value: impl Into<Value>) -> Self {
        Filter::Ne(field, value.into())
    }

    pub fn lt(field: F, value: impl Into<Value>) -> Self {
        Filter::Lt(field, value.into())
    }

    pub fn contains(field: F, needle: impl Into<String>) -> Self {
        Filter::Contains(field, needle.into())
    }

    pub fn any(filters: Vec<Filter<F>>) -> Self {
        Filter::Or(filters)
    }

    pub fn and(self, other: Filter<F>) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            single => Filter::And(vec![single, other]),
        }
    }

    /// Evaluates the predicate against a record's field accessor.
    pub fn matches(&self, get: &impl Fn(F) -> Value) -> bool {
        match self {
            Filter::Eq(f, v) => get(*f) == *v,
            Filter::Ne(f, v) => get(*f) != *v,
            Filter::Lt(f, v) => {
                let current = get(*f);
                !current.is_null()
                    && std::mem::discriminant(&current) == std::mem::discriminant(v)
                    && current.compare(v).is_lt()
            }
            Filter::Contains(f, needle) => match get(*f) {
                Value::Text(text) => text.to_lowercase().contains(&needle.to_lowercase()),
                _ => false,
            },
            Filter::Present(f) => !get(*f).is_null(),
            Filter::And(parts) => parts.iter().all(|p| p.matches(get)),
            Filter::Or(parts) => parts.iter().any(|p| p.matches(get)),
        }
    }
}
