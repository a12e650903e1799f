//! Structural state snapshots and the diff between two of them.
//!
//! A [`State`] is an explicit, ordered map of field name to value. Resources
//! build it field by field from their payload, so equal payloads give equal
//! states and the snapshot can be persisted and compared later.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Snapshot of the semantically relevant fields of a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(BTreeMap<String, Value>);

impl State {
    /// The zero state, used when nothing has been observed yet.
    pub const EMPTY: Self = Self(BTreeMap::new());

    /// Creates an empty state.
    #[must_use]
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Adds a field.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Adds a field only when `value` is present.
    #[must_use]
    pub fn with_optional(self, field: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.with(field, v),
            None => self,
        }
    }

    /// Adds a nested state under `field`.
    #[must_use]
    pub fn with_state(mut self, field: impl Into<String>, state: Self) -> Self {
        self.0.insert(field.into(), Value::Object(state.0.into_iter().collect()));
        self
    }

    /// Returns the value of a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns a string field.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Returns a nested state stored with [`State::with_state`].
    #[must_use]
    pub fn nested(&self, field: &str) -> Option<Self> {
        match self.0.get(field) {
            Some(Value::Object(map)) => Some(Self(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )),
            _ => None,
        }
    }

    /// Returns true if the state holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// SHA-256 of the canonical JSON form, hex encoded.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (field, value) in &self.0 {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.to_string().as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (field, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// A single field that differs between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// Field name.
    pub field: String,
    /// Value in the earlier state.
    pub old_value: Option<Value>,
    /// Value in the later state.
    pub new_value: Option<Value>,
}

/// Comparison of two states.
///
/// Typically `previous` is the last recorded observation (or
/// [`State::EMPTY`] on a first pass) and `current` the fresh one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Earlier state.
    previous: State,
    /// Later state.
    current: State,
    /// Fields that differ, in name order.
    changes: Vec<FieldChange>,
}

impl Diff {
    /// The diff between two empty states.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            previous: State::EMPTY,
            current: State::EMPTY,
            changes: Vec::new(),
        }
    }

    /// Compares `previous` with `current`.
    #[must_use]
    pub fn between(previous: State, current: State) -> Self {
        let mut changes = Vec::new();

        for (field, old) in &previous.0 {
            match current.0.get(field) {
                Some(new) if new == old => {}
                new => changes.push(FieldChange {
                    field: field.clone(),
                    old_value: Some(old.clone()),
                    new_value: new.cloned(),
                }),
            }
        }
        for (field, new) in &current.0 {
            if !previous.0.contains_key(field) {
                changes.push(FieldChange {
                    field: field.clone(),
                    old_value: None,
                    new_value: Some(new.clone()),
                });
            }
        }
        changes.sort_by(|a, b| a.field.cmp(&b.field));

        Self {
            previous,
            current,
            changes,
        }
    }

    /// Returns true if both states are equal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Earlier state.
    #[must_use]
    pub const fn previous(&self) -> &State {
        &self.previous
    }

    /// Later state.
    #[must_use]
    pub const fn current(&self) -> &State {
        &self.current
    }

    /// Changed fields.
    #[must_use]
    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.changes.is_empty() {
            return write!(f, "no change");
        }
        for (i, change) in self.changes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", change.field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_diff() {
        let diff = Diff::empty();
        assert!(diff.is_empty());
        assert!(diff.previous().is_empty());
        assert!(diff.current().is_empty());
        assert_eq!(diff.to_string(), "no change");
    }

    #[test]
    fn test_equal_states_give_empty_diff() {
        let a = State::new().with("name", "kubelet").with("version", "1.15.3");
        let b = State::new().with("version", "1.15.3").with("name", "kubelet");
        assert_eq!(a, b);
        assert!(Diff::between(a, b).is_empty());
    }

    #[test]
    fn test_changed_added_and_removed_fields() {
        let old = State::new().with("name", "kubelet").with("version", "1.14.1").with("hold", true);
        let new = State::new()
            .with("name", "kubelet")
            .with("version", "1.15.3")
            .with("arch", "amd64");
        let diff = Diff::between(old, new);

        let fields: Vec<&str> = diff.changes().iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["arch", "hold", "version"]);

        let hold = &diff.changes()[1];
        assert_eq!(hold.old_value, Some(Value::Bool(true)));
        assert_eq!(hold.new_value, None);
        assert_eq!(diff.to_string(), "arch, hold, version");
    }

    #[test]
    fn test_nested_state_round_trip() {
        let child = State::new().with("script", "systemctl restart kubelet");
        let parent = State::new().with_state("restart", child.clone());
        assert_eq!(parent.nested("restart"), Some(child));
        assert_eq!(parent.nested("missing"), None);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = State::new().with("script", "echo a");
        let b = State::new().with("script", "echo b");
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_optional_field() {
        let state = State::new()
            .with_optional("undo", None::<String>)
            .with_optional("output", Some("slot"));
        assert!(state.get("undo").is_none());
        assert_eq!(state.get_str("output"), Some("slot"));
    }
}
