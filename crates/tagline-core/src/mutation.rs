use crate::TagGroups;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("malformed mutation: {0}")]
    Malformed(String),
}

/// A change to a profile's tag groups.
///
/// Consumers only ever apply a mutation or move it through JSON; the
/// operations it encodes stay private to the implementation.
pub trait Mutation: Clone + Send + Sync + 'static {
    fn apply(&self, tags: &mut TagGroups);

    fn to_json(&self) -> Value;

    fn from_json(value: &Value) -> Result<Self, MutationError>;
}

/// Add, remove and set operations keyed by tag group.
///
/// Wire form: `{"add": {group: [tags]}, "remove": {...}, "set": {...}}` with
/// every operation optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroupsMutation {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    add: TagGroups,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    remove: TagGroups,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    set: TagGroups,
}

impl TagGroupsMutation {
    pub fn add_tags<I, T>(group: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::default().with_add(group, tags)
    }

    pub fn remove_tags<I, T>(group: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::default().with_remove(group, tags)
    }

    pub fn set_tags<I, T>(group: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::default().with_set(group, tags)
    }

    pub fn with_add<I, T>(mut self, group: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let group = group.trim();
        let tags = normalize_tags(tags);
        if !group.is_empty() && !tags.is_empty() {
            self.add.entry(group.to_string()).or_default().extend(tags);
        }
        self
    }

    pub fn with_remove<I, T>(mut self, group: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let group = group.trim();
        let tags = normalize_tags(tags);
        if !group.is_empty() && !tags.is_empty() {
            self.remove.entry(group.to_string()).or_default().extend(tags);
        }
        self
    }

    // An empty set is meaningful: it clears the group.
    pub fn with_set<I, T>(mut self, group: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let group = group.trim();
        if !group.is_empty() {
            self.set.insert(group.to_string(), normalize_tags(tags));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.set.is_empty()
    }
}

impl Mutation for TagGroupsMutation {
    fn apply(&self, tags: &mut TagGroups) {
        for (group, added) in &self.add {
            tags.entry(group.clone())
                .or_default()
                .extend(added.iter().cloned());
        }

        for (group, removed) in &self.remove {
            if let Some(existing) = tags.get_mut(group) {
                existing.retain(|tag| !removed.contains(tag));
            }
        }

        for (group, replacement) in &self.set {
            tags.insert(group.clone(), replacement.clone());
        }
    }

    fn to_json(&self) -> Value {
        // String-keyed maps of strings always serialize.
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    fn from_json(value: &Value) -> Result<Self, MutationError> {
        if !value.is_object() {
            return Err(MutationError::Malformed(format!(
                "expected object, found {value}"
            )));
        }
        serde_json::from_value(value.clone()).map_err(|err| MutationError::Malformed(err.to_string()))
    }
}

fn normalize_tags<I, T>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    tags.into_iter()
        .map(Into::<String>::into)
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}
