//! Manager action construction and wire encoding.
//!
//! An action is an ordered list of `Key: Value` fields optionally followed by
//! `Variable: name=value` lines. Insertion order is preserved all the way to
//! the wire because some manager actions are order-sensitive.

use std::fmt;

use uuid::Uuid;

/// Line terminator used by the manager wire protocol.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Well-known field carrying the correlation identifier.
const ACTION_ID_FIELD: &str = "ActionID";

/// Correlation identifier attached to an outbound action and echoed back in
/// the matching response or event.
///
/// Generated identifiers are unique; a caller may also supply its own (for
/// example to make a retried origination idempotent from its side).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId(String);

impl ActionId {
    /// Generate a fresh unique identifier.
    pub fn generate() -> Self {
        ActionId(Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ActionId {
    fn from(value: String) -> Self {
        ActionId(value)
    }
}

impl From<&str> for ActionId {
    fn from(value: &str) -> Self {
        ActionId(value.to_string())
    }
}

/// A manager action under construction.
///
/// Encoding is a pure function of the fields and variables; no validation is
/// performed here. Unknown or malformed field values are the caller's
/// responsibility.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmiAction {
    fields: Vec<(String, String)>,
    variables: Vec<(String, String)>,
}

impl AmiAction {
    /// Start an action with the given `Action` name.
    pub fn new(name: impl Into<String>) -> Self {
        AmiAction {
            fields: vec![("Action".to_string(), name.into())],
            variables: Vec::new(),
        }
    }

    /// Append a field, preserving insertion order.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    /// Append an extra channel variable, preserving insertion order.
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((name.into(), value.into()));
        self
    }

    /// Attach a correlation identifier (builder form).
    pub fn action_id(mut self, id: &ActionId) -> Self {
        self.set_action_id(id);
        self
    }

    /// Attach a correlation identifier, replacing any existing one.
    pub fn set_action_id(&mut self, id: &ActionId) {
        for (key, value) in &mut self.fields {
            if key.eq_ignore_ascii_case(ACTION_ID_FIELD) {
                *value = id.as_str().to_string();
                return;
            }
        }
        self.fields
            .push((ACTION_ID_FIELD.to_string(), id.as_str().to_string()));
    }

    /// The correlation identifier currently attached, if any.
    pub fn get_action_id(&self) -> Option<ActionId> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(ACTION_ID_FIELD))
            .map(|(_, value)| ActionId::from(value.as_str()))
    }

    /// The base fields in insertion order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// The extra variables in insertion order.
    pub fn variables(&self) -> &[(String, String)] {
        &self.variables
    }

    /// Serialize to the wire payload: `Key: Value` lines for the base fields
    /// followed by `Variable: name=value` lines, joined by CRLF with no
    /// trailing terminator. The frame terminator (a blank line) is appended
    /// by the session write primitive, not here.
    pub fn encode(&self) -> String {
        let mut lines = Vec::with_capacity(self.fields.len() + self.variables.len());
        for (key, value) in &self.fields {
            lines.push(format!("{}: {}", key, value));
        }
        for (name, value) in &self.variables {
            lines.push(format!("Variable: {}={}", name, value));
        }
        lines.join(LINE_TERMINATOR)
    }
}
