/// Static metadata for one scalar attribute of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    pub name: String,
    pub type_identifier: TypeIdentifier,

    /// Whether the column rejects NULL. Drives derived nullability of the
    /// GraphQL field and the default `required` flag of mutation inputs.
    pub required: bool,
}

impl ScalarField {
    pub fn new(name: impl Into<String>, type_identifier: TypeIdentifier) -> Self {
        ScalarField {
            name: name.into(),
            type_identifier,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeIdentifier {
    String,
    Int,
    Float,
    Boolean,
    Enum,
    DateTime,
    Json,
}
