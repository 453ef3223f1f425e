//! Dot-path field updates: the merger's output and the store's input.

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldPathError {
    #[error("empty field path")]
    EmptyPath,
    #[error("cannot descend into non-object at {path}")]
    NotAnObject { path: String },
    #[error("{path} holds a non-array value")]
    NotAnArray { path: String },
}

/// Flat mapping of `a.b.c` paths to values, applied verbatim by a store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldUpdates(BTreeMap<String, JsonValue>);

impl FieldUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(path.into(), value.into());
    }

    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        self.0.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    pub fn extend(&mut self, other: FieldUpdates) {
        self.0.extend(other.0);
    }
}

impl IntoIterator for FieldUpdates {
    type Item = (String, JsonValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, JsonValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn descend<'a>(doc: &'a mut JsonValue, path: &str) -> Result<(&'a mut Map<String, JsonValue>, String), FieldPathError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = match segments.pop() {
        Some(leaf) if !leaf.is_empty() => leaf.to_string(),
        _ => return Err(FieldPathError::EmptyPath),
    };

    let mut current = doc;
    let mut walked = String::new();
    for segment in segments {
        if segment.is_empty() {
            return Err(FieldPathError::EmptyPath);
        }
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);

        let map = current
            .as_object_mut()
            .ok_or_else(|| FieldPathError::NotAnObject { path: walked.clone() })?;
        let child = map
            .entry(segment.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if child.is_null() {
            *child = JsonValue::Object(Map::new());
        }
        current = child;
    }

    let map = current
        .as_object_mut()
        .ok_or_else(|| FieldPathError::NotAnObject { path: walked })?;
    Ok((map, leaf))
}

/// Sets every path in `updates`, creating intermediate objects as needed.
pub fn apply_dot_paths(doc: &mut JsonValue, updates: &FieldUpdates) -> Result<(), FieldPathError> {
    for (path, value) in updates.iter() {
        let (map, leaf) = descend(doc, path)?;
        map.insert(leaf, value.clone());
    }
    Ok(())
}

/// Appends `entry` to the array at `path`, keeping only the newest `cap` items.
pub fn push_capped(doc: &mut JsonValue, path: &str, entry: JsonValue, cap: usize) -> Result<(), FieldPathError> {
    let (map, leaf) = descend(doc, path)?;
    let slot = map.entry(leaf).or_insert_with(|| JsonValue::Array(Vec::new()));
    if slot.is_null() {
        *slot = JsonValue::Array(Vec::new());
    }
    let items = slot
        .as_array_mut()
        .ok_or_else(|| FieldPathError::NotAnArray { path: path.to_string() })?;
    items.push(entry);
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
    Ok(())
}

/// Reads the value at a dot-path, if present.
pub fn get_path<'a>(doc: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(doc, |node, segment| node.get(segment))
}
