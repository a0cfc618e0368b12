use indexmap::IndexMap;
use model_structure::Value;

use crate::CoreError;

/// One node of a nested mutation input document.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Scalar(Value),
    Object(InputMap),
    List(Vec<InputValue>),
}

impl InputValue {
    pub fn is_null(&self) -> bool {
        matches!(self, InputValue::Scalar(Value::Null))
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            InputValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&InputMap> {
        match self {
            InputValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[InputValue]> {
        match self {
            InputValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// One object node of an input document: ordered field name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputMap {
    values: IndexMap<String, InputValue>,
}

impl InputMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&InputValue> {
        self.values.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: InputValue) {
        self.values.insert(field.into(), value);
    }

    pub fn set_scalar(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.insert(field, InputValue::Scalar(value.into()));
    }

    /// The string items of a list-of-strings field, e.g. `unsetFields`.
    /// A non-list or non-string item is an input error.
    pub fn string_list(&self, field: &str) -> crate::Result<Vec<String>> {
        let Some(value) = self.get(field) else {
            return Ok(vec![]);
        };

        let Some(items) = value.as_list() else {
            return Err(CoreError::InputError(format!("'{field}' must be a list of field names")));
        };

        items
            .iter()
            .map(|item| match item {
                InputValue::Scalar(Value::String(name)) => Ok(name.clone()),
                other => Err(CoreError::InputError(format!(
                    "'{field}' must contain only field names, got {other:?}"
                ))),
            })
            .collect()
    }
}

impl<S> FromIterator<(S, InputValue)> for InputMap
where
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (S, InputValue)>>(iter: T) -> Self {
        InputMap {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl TryFrom<serde_json::Value> for InputValue {
    type Error = CoreError;

    fn try_from(value: serde_json::Value) -> crate::Result<Self> {
        match value {
            serde_json::Value::Array(items) => Ok(InputValue::List(
                items.into_iter().map(InputValue::try_from).collect::<crate::Result<_>>()?,
            )),
            serde_json::Value::Object(map) => {
                let values = map
                    .into_iter()
                    .map(|(key, value)| Ok((key, InputValue::try_from(value)?)))
                    .collect::<crate::Result<IndexMap<String, InputValue>>>()?;

                Ok(InputValue::Object(InputMap { values }))
            }
            scalar => {
                let value = Value::try_from(scalar)
                    .map_err(|err| CoreError::InputError(format!("unsupported input value: {err}")))?;

                Ok(InputValue::Scalar(value))
            }
        }
    }
}

impl TryFrom<serde_json::Value> for InputMap {
    type Error = CoreError;

    fn try_from(value: serde_json::Value) -> crate::Result<Self> {
        match InputValue::try_from(value)? {
            InputValue::Object(map) => Ok(map),
            other => Err(CoreError::InputError(format!(
                "mutation input must be an object, got {other:?}"
            ))),
        }
    }
}
