//! Polymorphic resource carrier keyed on `resourceType`.

use crate::{MessageHeader, OperationOutcome, Parameters, Patient};
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

const RESOURCE_TYPE_KEY: &str = "resourceType";

/// A resource found inside a bundle entry or a `Parameters.parameter.resource` slot.
///
/// Only the resource types the pipeline reads are typed. Everything else is retained as raw
/// JSON in [`Resource::Other`].
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    MessageHeader(MessageHeader),
    Parameters(Parameters),
    Patient(Patient),
    OperationOutcome(OperationOutcome),
    Other(Value),
}

impl Resource {
    /// The FHIR `resourceType` name of this resource.
    pub fn resource_type(&self) -> &str {
        match self {
            Resource::MessageHeader(_) => "MessageHeader",
            Resource::Parameters(_) => "Parameters",
            Resource::Patient(_) => "Patient",
            Resource::OperationOutcome(_) => "OperationOutcome",
            Resource::Other(value) => value
                .get(RESOURCE_TYPE_KEY)
                .and_then(Value::as_str)
                .unwrap_or("Unknown"),
        }
    }

    /// The logical id of this resource, if it has one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Resource::MessageHeader(r) => r.id.as_deref(),
            Resource::Parameters(r) => r.id.as_deref(),
            Resource::Patient(r) => r.id.as_deref(),
            Resource::OperationOutcome(r) => r.id.as_deref(),
            Resource::Other(value) => value.get("id").and_then(Value::as_str),
        }
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let kind = value
            .get(RESOURCE_TYPE_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::missing_field(RESOURCE_TYPE_KEY))?;

        let parsed = match kind {
            "MessageHeader" => serde_json::from_value(value).map(Resource::MessageHeader),
            "Parameters" => serde_json::from_value(value).map(Resource::Parameters),
            "Patient" => serde_json::from_value(value).map(Resource::Patient),
            "OperationOutcome" => serde_json::from_value(value).map(Resource::OperationOutcome),
            _ => Ok(Resource::Other(value)),
        };

        parsed.map_err(D::Error::custom)
    }
}

impl Serialize for Resource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let typed = match self {
            Resource::MessageHeader(r) => serde_json::to_value(r),
            Resource::Parameters(r) => serde_json::to_value(r),
            Resource::Patient(r) => serde_json::to_value(r),
            Resource::OperationOutcome(r) => serde_json::to_value(r),
            Resource::Other(value) => return value.serialize(serializer),
        };

        let mut value = typed.map_err(S::Error::custom)?;
        if let Value::Object(map) = &mut value {
            map.insert(
                RESOURCE_TYPE_KEY.to_string(),
                Value::String(self.resource_type().to_string()),
            );
        }
        value.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_resource_is_preserved() {
        let raw = json!({"resourceType": "Observation", "id": "obs-1", "status": "final"});
        let resource: Resource = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(resource.resource_type(), "Observation");
        assert_eq!(resource.id(), Some("obs-1"));
        assert_eq!(serde_json::to_value(&resource).unwrap(), raw);
    }

    #[test]
    fn test_typed_resource_renders_resource_type() {
        let raw = json!({"resourceType": "Patient", "id": "p1", "gender": "female"});
        let resource: Resource = serde_json::from_value(raw).unwrap();

        assert!(matches!(resource, Resource::Patient(_)));
        let rendered = serde_json::to_value(&resource).unwrap();
        assert_eq!(rendered["resourceType"], "Patient");
        assert_eq!(rendered["gender"], "female");
    }

    #[test]
    fn test_missing_resource_type_is_rejected() {
        let result = serde_json::from_value::<Resource>(json!({"id": "x"}));
        assert!(result.is_err());
    }
}
