use serde::{Deserialize, Serialize};

/// Contents of a route's `access.yaml`.
///
/// `groups: []` (or no `groups` at all) means "any authenticated caller".
/// A route without an `access.yaml` has no restriction whatsoever.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AccessDeclaration {
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    #[serde(default)]
    pub guests: Option<bool>,
}

impl AccessDeclaration {
    pub const FILE_NAME: &'static str = "access.yaml";

    /// Parse a declaration; an empty document is an empty declaration.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn groups(&self) -> &[String] {
        self.groups.as_deref().unwrap_or_default()
    }

    pub fn allows_guests(&self) -> bool {
        self.guests == Some(true)
    }

    /// No named group: every authenticated caller passes the gate.
    pub fn open_to_authenticated(&self) -> bool {
        self.groups().is_empty()
    }
}
