//! Identifiers for projects, targets, and tasks.

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The separator between the project and target parts of a task id
pub const ID_SEPARATOR: char = ':';

/// An invalid identifier was given
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("invalid identifier: {0:?}")]
pub struct InvalidId(pub String);

/// Checks that a single identifier part is usable as a project or target name.
///
/// Names are opaque strings, but they must be non-empty and can not contain
/// the separator or whitespace. Plugin-supplied external names like
/// `npm:lodash` are ids, not parts.
pub fn is_valid_name(name: &str) -> Result<(), InvalidId> {
    if name.is_empty()
        || name.contains(ID_SEPARATOR)
        || name.chars().any(char::is_whitespace)
    {
        return Err(InvalidId(name.to_string()));
    }
    Ok(())
}

/// Identifies one concrete task: a target ran on a project.
///
/// Displays as `project:target`.
///
/// # Example
/// ```
/// # use forge_core::identifier::TaskId;
/// let id: TaskId = "app:build".parse().unwrap();
/// assert_eq!(id.project(), "app");
/// assert_eq!(id.target(), "build");
/// assert_eq!(id.to_string(), "app:build");
/// ```
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    project: String,
    target: String,
}

impl TaskId {
    /// Create a new task id from its parts.
    ///
    /// # Error
    /// Errors if either part isn't a valid name.
    pub fn new<P: AsRef<str>, T: AsRef<str>>(project: P, target: T) -> Result<Self, InvalidId> {
        let project = project.as_ref();
        let target = target.as_ref();
        is_valid_name(project)?;
        is_valid_name(target)?;
        Ok(Self {
            project: project.to_string(),
            target: target.to_string(),
        })
    }

    /// The project part of the id.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The target part of the id.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{ID_SEPARATOR}{}", self.project, self.target)
    }
}

impl Debug for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl FromStr for TaskId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, target) = s
            .split_once(ID_SEPARATOR)
            .ok_or_else(|| InvalidId(s.to_string()))?;
        Self::new(project, target)
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = String::deserialize(deserializer)?;
        repr.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_task_id() {
        let id: TaskId = "lib:test".parse().unwrap();
        assert_eq!(id, TaskId::new("lib", "test").unwrap());
    }

    #[test]
    fn reject_invalid_ids() {
        assert!("just-a-project".parse::<TaskId>().is_err());
        assert!("a:b:c".parse::<TaskId>().is_err());
        assert!(":build".parse::<TaskId>().is_err());
        assert!("app:".parse::<TaskId>().is_err());
        assert!(TaskId::new("has space", "build").is_err());
    }

    #[test]
    fn serde_round_trip() {
        let id: TaskId = "app:build".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"app:build\"");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
