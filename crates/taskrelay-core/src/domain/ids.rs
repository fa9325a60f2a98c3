//! Domain identifiers (strongly-typed names).
//!
//! タスク ID もキュー名も「空でない文字列」ですが、混同すると delete が
//! 別キューに飛ぶので Phantom type で型を分けています。
//!
//! - `TaskId`: 呼び出し側が指定した name、または broker が採番した ULID
//! - `QueueName`: 論理キュー名（"default" など）

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;
use ulid::Ulid;

/// Marker trait for each name type.
pub trait NameMarker: Send + Sync + 'static {
    /// Used in validation errors ("task id", "queue name").
    fn kind() -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskMarker {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueMarker {}

impl NameMarker for TaskMarker {
    fn kind() -> &'static str {
        "task id"
    }
}

impl NameMarker for QueueMarker {
    fn kind() -> &'static str {
        "queue name"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} must not be empty")]
pub struct EmptyNameError {
    pub kind: &'static str,
}

/// A non-empty string identifier tagged with its marker type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name<T: NameMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: NameMarker> Name<T> {
    /// Build a name, rejecting empty strings.
    pub fn parse(value: impl Into<String>) -> Result<Self, EmptyNameError> {
        let value = value.into();
        if value.is_empty() {
            return Err(EmptyNameError { kind: T::kind() });
        }
        Ok(Self {
            value,
            _marker: PhantomData,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T: NameMarker> fmt::Display for Name<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: NameMarker> AsRef<str> for Name<T> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

pub type TaskId = Name<TaskMarker>;
pub type QueueName = Name<QueueMarker>;

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self {
            value: ulid.to_string(),
            _marker: PhantomData,
        }
    }
}

impl QueueName {
    pub const DEFAULT: &'static str = "default";
}

impl Default for QueueName {
    fn default() -> Self {
        Self {
            value: Self::DEFAULT.to_string(),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_names_are_rejected_with_their_kind() {
        let err = TaskId::parse("").unwrap_err();
        assert_eq!(err.to_string(), "task id must not be empty");

        let err = QueueName::parse(String::new()).unwrap_err();
        assert_eq!(err.to_string(), "queue name must not be empty");
    }

    #[test]
    fn ulid_task_ids_use_canonical_text() {
        let ulid = Ulid::new();
        let id = TaskId::from(ulid);
        assert_eq!(id.as_str(), ulid.to_string());
        assert_eq!(id.as_str().len(), 26);
    }

    #[test]
    fn names_serialize_as_plain_strings() {
        let q = QueueName::parse("emails").unwrap();
        assert_eq!(serde_json::to_string(&q).unwrap(), "\"emails\"");
        assert_eq!(QueueName::default().as_str(), "default");
    }
}
