//! Ordered bind-parameter storage.

use crate::value::Value;

/// Bind parameters in the exact order their placeholders appear in the SQL text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamList {
    params: Vec<Value>,
}

impl ParamList {
    /// Create a new empty parameter list.
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Add a parameter and return its 1-based index.
    pub fn push(&mut self, value: impl Into<Value>) -> usize {
        self.params.push(value.into());
        self.params.len()
    }

    /// Get the current parameter count.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.params
    }

    /// Append another list's parameters after this one's.
    pub fn append(&mut self, other: &mut ParamList) {
        self.params.append(&mut other.params);
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.params
    }
}

impl From<Vec<Value>> for ParamList {
    fn from(params: Vec<Value>) -> Self {
        Self { params }
    }
}

impl FromIterator<Value> for ParamList {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}
