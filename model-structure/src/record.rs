use indexmap::IndexMap;

use crate::{DomainError, Value};

/// One row as returned by the storage collaborator, keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub values: IndexMap<String, Value>,
}

impl Record {
    pub fn new(values: IndexMap<String, Value>) -> Record {
        Record { values }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn get_required(&self, field: &str, model: &str) -> crate::Result<&Value> {
        self.get(field).ok_or_else(|| DomainError::FieldNotFound {
            name: field.to_string(),
            model: model.to_string(),
        })
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Record {
            values: iter.into_iter().collect(),
        }
    }
}
