//! Parameters wire model.
//!
//! Parameters resources are echoed back verbatim in match responses, so the `value[x]` choice
//! and any unmodelled keys are kept as raw JSON alongside the named fields.

use crate::Resource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A `Parameters` resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter: Vec<Parameter>,

    /// `meta`, `text` and any other resource-level keys, kept for echoing.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One named parameter, possibly nested.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Box<Resource>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub part: Vec<Parameter>,

    /// `value[x]` and any other keys not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Parameters {
    /// First parameter with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<&Parameter> {
        self.parameter.iter().find(|p| p.name == name)
    }
}

impl Parameter {
    /// The `value[x]` element of this parameter, whatever its type suffix.
    pub fn value(&self) -> Option<&Value> {
        self.extra
            .iter()
            .find(|(key, _)| key.starts_with("value"))
            .map(|(_, value)| value)
    }

    /// Render the primitive `value[x]` of this parameter as a string.
    ///
    /// Returns `None` for missing values and for complex (object/array) values.
    pub fn value_as_string(&self) -> Option<String> {
        match self.value()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// The nested `Parameters` resource held by this parameter, if any.
    pub fn nested_parameters(&self) -> Option<&Parameters> {
        match self.resource.as_deref() {
            Some(Resource::Parameters(params)) => Some(params),
            _ => None,
        }
    }
}
