//! MessageHeader wire model (DSTU2 messaging).

use serde::{Deserialize, Serialize};

/// Header of a FHIR message bundle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Coding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<MessageResponse>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<MessageSource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination: Vec<MessageDestination>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<Reference>,
}

/// A code from a code system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Marker that a message is a response to an earlier one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub identifier: String,
    pub code: ResponseCode,
}

/// Outcome code carried by a response message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseCode {
    Ok,
    TransientError,
    FatalError,
}

/// Originating system of a message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,

    pub endpoint: String,
}

/// Target system of a message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDestination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub endpoint: String,
}

/// A literal reference to another resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl MessageHeader {
    /// Whether the header's event matches `system`/`code`.
    pub fn has_event(&self, system: &str, code: &str) -> bool {
        self.event.as_ref().is_some_and(|e| {
            e.system.as_deref() == Some(system) && e.code.as_deref() == Some(code)
        })
    }
}

impl From<&MessageSource> for MessageDestination {
    fn from(source: &MessageSource) -> Self {
        Self {
            name: source.name.clone(),
            endpoint: source.endpoint.clone(),
        }
    }
}

impl From<&MessageDestination> for MessageSource {
    fn from(destination: &MessageDestination) -> Self {
        Self {
            name: destination.name.clone(),
            software: None,
            endpoint: destination.endpoint.clone(),
        }
    }
}
