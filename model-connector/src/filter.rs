use indexmap::IndexMap;
use itertools::Itertools;
use model_structure::{Record, Value};

/// An attribute-equality filter set. A `List` value is an IN-set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub conditions: IndexMap<String, Value>,
}

impl Filter {
    pub fn new(conditions: impl IntoIterator<Item = (String, Value)>) -> Self {
        Filter {
            conditions: conditions.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// All attribute names, sorted. Filters with different key-sets can never
    /// be merged into one group.
    pub fn key_set(&self) -> Vec<String> {
        self.conditions.keys().cloned().sorted().collect()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|(attr, expected)| {
            let actual = record.get(attr).unwrap_or(&Value::Null);
            value_matches(actual, expected)
        })
    }
}

impl<S> FromIterator<(S, Value)> for Filter
where
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (S, Value)>>(iter: T) -> Self {
        Filter::new(iter.into_iter().map(|(k, v)| (k.into(), v)))
    }
}

/// One disjunct of a combined WHERE clause: every attribute must equal one of
/// the listed values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterGroup {
    pub conditions: IndexMap<String, Vec<Value>>,
}

impl FilterGroup {
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|(attr, allowed)| {
            let actual = record.get(attr).unwrap_or(&Value::Null);
            allowed.iter().any(|v| v == actual)
        })
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::List(allowed) => allowed.iter().any(|v| v == actual),
        other => actual == other,
    }
}

/// Merges many independent equality filter sets into the minimal number of
/// disjunctive groups that still select exactly the same union of rows.
///
/// Filter sets are grouped by their exact key-set; within a group, a single
/// shared key collapses to one IN-list, while multiple keys are split on the
/// key with the fewest distinct values and combined recursively.
pub fn combine(filters: &[Filter]) -> Vec<FilterGroup> {
    let mut by_keys: IndexMap<Vec<String>, Vec<&Filter>> = IndexMap::new();

    for filter in filters {
        by_keys.entry(filter.key_set()).or_default().push(filter);
    }

    by_keys
        .into_iter()
        .flat_map(|(keys, group)| combine_core(&group, &keys))
        .collect()
}

fn combine_core(filters: &[&Filter], keys: &[String]) -> Vec<FilterGroup> {
    let Some((first_key, rest)) = keys.split_first() else {
        return vec![];
    };

    // A single shared key collapses into one group with an IN-list.
    if rest.is_empty() {
        let values = distinct_values(filters, first_key);

        let mut conditions = IndexMap::new();
        conditions.insert(first_key.clone(), values);

        return vec![FilterGroup { conditions }];
    }

    // Split on the key with the fewest distinct values across the group, then
    // combine the remaining keys within each partition.
    let min_key = keys
        .iter()
        .min_by_key(|key| distinct_values(filters, key).len())
        .expect("key-set is non-empty")
        .clone();

    let inner_keys: Vec<String> = keys.iter().filter(|k| **k != min_key).cloned().collect();

    let mut partitions: IndexMap<Value, Vec<&Filter>> = IndexMap::new();
    for filter in filters {
        let value = filter.conditions.get(&min_key).cloned().unwrap_or(Value::Null);
        partitions.entry(value).or_default().push(filter);
    }

    partitions
        .into_iter()
        .flat_map(|(value, partition)| {
            let min_key = min_key.clone();

            combine_core(&partition, &inner_keys).into_iter().map(move |inner| {
                let mut conditions = IndexMap::new();
                conditions.insert(min_key.clone(), flatten_value(value.clone()));
                conditions.extend(inner.conditions);

                FilterGroup { conditions }
            })
        })
        .collect()
}

fn distinct_values(filters: &[&Filter], key: &str) -> Vec<Value> {
    let mut seen = Vec::new();

    for filter in filters {
        let value = filter.conditions.get(key).cloned().unwrap_or(Value::Null);

        for v in flatten_value(value) {
            if !seen.contains(&v) {
                seen.push(v);
            }
        }
    }

    seen
}

fn flatten_value(value: Value) -> Vec<Value> {
    match value {
        Value::List(vals) => vals,
        other => vec![other],
    }
}
