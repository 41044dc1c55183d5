use crate::row::{ulid_value, value_to_ulid, Row, ID};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Le(Value),
    Gt(Value),
    Ge(Value),
    In(Vec<Value>),
}

impl FilterOp {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FilterOp::Eq(expected) => value == expected,
            FilterOp::Ne(expected) => value != expected,
            FilterOp::Lt(expected) => compare(value, expected) == Some(Ordering::Less),
            FilterOp::Le(expected) => matches!(compare(value, expected), Some(Ordering::Less | Ordering::Equal)),
            FilterOp::Gt(expected) => compare(value, expected) == Some(Ordering::Greater),
            FilterOp::Ge(expected) => matches!(compare(value, expected), Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::In(options) => options.contains(value),
        }
    }
}

/// Orders scalars of the same kind; anything else is incomparable and fails range filters.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Predicate tree over row fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Field { field: String, op: FilterOp },
    All(Vec<Filter>),
    Any(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn field(field: &str, op: FilterOp) -> Self {
        Filter::Field { field: field.to_string(), op }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::field(field, FilterOp::Eq(value.into()))
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Filter::field(field, FilterOp::Ne(value.into()))
    }

    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Filter::field(field, FilterOp::In(values))
    }

    pub fn id(id: Ulid) -> Self {
        Filter::field(ID, FilterOp::Eq(ulid_value(id)))
    }

    pub fn ids(ids: &[Ulid]) -> Self {
        Filter::field(ID, FilterOp::In(ids.iter().copied().map(ulid_value).collect()))
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Field { field, op } => op.matches(row.value(field)),
            Filter::All(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Any(filters) => filters.iter().any(|f| f.matches(row)),
            Filter::Not(filter) => !filter.matches(row),
        }
    }

    fn id_set(&self) -> Option<Vec<Ulid>> {
        match self {
            Filter::Field { field, op: FilterOp::Eq(v) } if field == ID => Some(value_to_ulid(v).into_iter().collect()),
            Filter::Field { field, op: FilterOp::In(vs) } if field == ID => Some(vs.iter().filter_map(value_to_ulid).collect()),
            Filter::All(filters) => filters.iter().find_map(Filter::id_set),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

/// A projected, filtered fetch against one table.
///
/// `filters` are a conjunction in the order supplied. `default_filter` is the table's
/// implicit predicate (e.g. soft-delete exclusion) and can be replaced wholesale by
/// override filters. `preload` carries builder-specific hints the store may ignore.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    pub table: String,
    pub select: Vec<String>,
    pub filters: Vec<Filter>,
    pub default_filter: Option<Filter>,
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub preload: Vec<String>,
}

impl Query {
    pub fn from_table(table: &str) -> Self {
        Query { table: table.to_string(), ..Default::default() }
    }

    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.select = columns;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn default_filter(mut self, filter: Option<Filter>) -> Self {
        self.default_filter = filter;
        self
    }

    pub fn order_by(mut self, field: &str, order: Order) -> Self {
        self.order_by.push((field.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// The full predicate: supplied filters first, then the default filter.
    pub fn predicate(&self) -> Filter {
        let mut all = self.filters.clone();
        all.extend(self.default_filter.clone());
        Filter::All(all)
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row)) && self.default_filter.as_ref().map_or(true, |f| f.matches(row))
    }

    /// Ids the query is restricted to, if any filter pins them. Lets stores use point reads
    /// instead of scans; the full predicate must still be applied.
    pub fn id_set(&self) -> Option<Vec<Ulid>> {
        let ids = self.filters.iter().find_map(Filter::id_set)?;
        let mut seen = HashSet::with_capacity(ids.len());
        Some(ids.into_iter().filter(|id| seen.insert(*id)).collect())
    }

    /// Applies ordering, paging and projection to rows that already passed the predicate.
    pub fn finish(&self, mut rows: Vec<Row>) -> Vec<Row> {
        if !self.order_by.is_empty() {
            rows.sort_by(|a, b| {
                for (field, order) in &self.order_by {
                    let ord = compare(a.value(field), b.value(field)).unwrap_or(Ordering::Equal);
                    let ord = if *order == Order::Desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        let limit = self.limit.unwrap_or(usize::MAX);
        rows.into_iter()
            .skip(self.offset)
            .take(limit)
            .map(|row| row.project(&self.select))
            .collect()
    }
}

/// Per-call knobs shared by the resolver, dispatcher and preloader.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub skip_permission_check: bool,
    /// Replaces the table's default filter instead of being ANDed with it.
    pub override_filters: Vec<Filter>,
    pub current_user: Option<String>,
    /// Re-fetch pointers that already carry a resolved record.
    pub force: bool,
    /// Fail a preload on the first group failure; `None` uses the configured default.
    pub strict: Option<bool>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_permission_check(mut self) -> Self {
        self.skip_permission_check = true;
        self
    }

    pub fn override_filters(mut self, filters: Vec<Filter>) -> Self {
        self.override_filters = filters;
        self
    }

    pub fn current_user(mut self, user: impl Into<String>) -> Self {
        self.current_user = Some(user.into());
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }
}
