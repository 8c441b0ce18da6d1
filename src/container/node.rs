//! In-memory tree of groups, datasets and external links
//!
//! Paths are slash-separated and relative to the root group; a leading `/` is
//! accepted and ignored, so `/entry/data` and `entry/data` name the same node.

use crate::array::DataArray;
use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute value attached to a group or dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

/// Attribute set, sorted by name
pub type Attributes = BTreeMap<String, AttrValue>;

/// Dataset payload
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    /// Anything the other variants cannot hold (nested objects, mixed lists)
    Json(serde_json::Value),
    /// Dense numeric array, stored chunked and compressed
    Array(DataArray),
}

impl Value {
    /// Convert a configuration value received from the detector
    ///
    /// Homogeneous numeric lists become [`Value::IntList`] or
    /// [`Value::FloatList`]; everything else that is not a scalar is kept as
    /// JSON.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match value {
            J::Bool(b) => Value::Bool(b),
            J::String(s) => Value::Text(s),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Json(J::Number(n))),
            },
            J::Array(items) => {
                if !items.is_empty() && items.iter().all(|v| v.is_i64()) {
                    Value::IntList(items.iter().filter_map(|v| v.as_i64()).collect())
                } else if !items.is_empty() && items.iter().all(|v| v.is_number()) {
                    Value::FloatList(items.iter().filter_map(|v| v.as_f64()).collect())
                } else {
                    Value::Json(J::Array(items))
                }
            }
            other => Value::Json(other),
        }
    }

    /// Numeric scalar view
    ///
    /// Single-element lists and arrays count as scalars.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::IntList(v) if v.len() == 1 => Some(v[0] as f64),
            Value::FloatList(v) if v.len() == 1 => Some(v[0]),
            Value::Array(a) if a.len() == 1 => a.to_f64_vec().first().copied(),
            _ => None,
        }
    }

    /// Integer scalar view
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::IntList(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// Text view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Array view
    pub fn as_array(&self) -> Option<&DataArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// All values as floats, for numeric lists and arrays
    pub fn to_f64_list(&self) -> Option<Vec<f64>> {
        match self {
            Value::Int(_) | Value::Float(_) => self.as_f64().map(|v| vec![v]),
            Value::IntList(v) => Some(v.iter().map(|&i| i as f64).collect()),
            Value::FloatList(v) => Some(v.clone()),
            Value::Array(a) => Some(a.to_f64_vec()),
            _ => None,
        }
    }

    /// Short type name for logs
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::IntList(_) => "int_list",
            Value::FloatList(_) => "float_list",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::FloatList(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntList(v)
    }
}

impl From<DataArray> for Value {
    fn from(v: DataArray) -> Self {
        Value::Array(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json(v)
    }
}

/// Dataset with attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub attrs: Attributes,
    pub value: Value,
}

impl Dataset {
    pub fn new(value: Value) -> Self {
        Self {
            attrs: Attributes::new(),
            value,
        }
    }
}

/// Reference to a node inside another container file
///
/// `file` is relative to the directory of the container holding the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub file: String,
    pub path: String,
}

/// Tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
    Link(ExternalLink),
}

impl Node {
    fn kind(&self) -> &'static str {
        match self {
            Node::Group(_) => "group",
            Node::Dataset(_) => "dataset",
            Node::Link(_) => "link",
        }
    }
}

/// Group of named child nodes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    pub attrs: Attributes,
    pub children: BTreeMap<String, Node>,
}

/// Split a path into its non-empty components
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Canonical form of a path: no leading or trailing slash, no empty components
pub fn normalize_path(path: &str) -> String {
    split_path(path).join("/")
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, replacing any previous value under the same name
    pub fn set_attr(&mut self, name: &str, value: impl Into<AttrValue>) {
        self.attrs.insert(name.to_string(), value.into());
    }

    /// Look up a node by path; the empty path is not a node
    pub fn get(&self, path: &str) -> Option<&Node> {
        let components = split_path(path);
        let (last, parents) = components.split_last()?;
        let mut group = self;
        for name in parents {
            match group.children.get(*name)? {
                Node::Group(g) => group = g,
                _ => return None,
            }
        }
        group.children.get(*last)
    }

    /// Mutable lookup by path
    pub fn get_mut(&mut self, path: &str) -> Option<&mut Node> {
        let components = split_path(path);
        let (last, parents) = components.split_last()?;
        let mut group = self;
        for name in parents {
            match group.children.get_mut(*name)? {
                Node::Group(g) => group = g,
                _ => return None,
            }
        }
        group.children.get_mut(*last)
    }

    /// True if a node exists at `path`
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Group at `path`, if the node there is a group
    pub fn group(&self, path: &str) -> Option<&Group> {
        if split_path(path).is_empty() {
            return Some(self);
        }
        match self.get(path)? {
            Node::Group(g) => Some(g),
            _ => None,
        }
    }

    /// Dataset at `path`, if the node there is a dataset
    pub fn dataset(&self, path: &str) -> Option<&Dataset> {
        match self.get(path)? {
            Node::Dataset(d) => Some(d),
            _ => None,
        }
    }

    /// Return the group at `path`, creating it and any missing parents
    ///
    /// Fails if a component already exists as a dataset or link.
    pub fn ensure_group(&mut self, path: &str) -> Result<&mut Group> {
        let mut group = self;
        for name in split_path(path) {
            let node = group
                .children
                .entry(name.to_string())
                .or_insert_with(|| Node::Group(Group::new()));
            group = match node {
                Node::Group(g) => g,
                other => {
                    return Err(StreamError::EntryExists(format!(
                        "{} ({} in the way of a group)",
                        path,
                        other.kind()
                    )))
                }
            };
        }
        Ok(group)
    }

    /// Insert a new node, creating parent groups as needed
    ///
    /// An existing node at `path` is never replaced.
    pub fn insert(&mut self, path: &str, node: Node) -> Result<()> {
        let components = split_path(path);
        let (last, parents) = components
            .split_last()
            .ok_or_else(|| StreamError::EntryExists("/".to_string()))?;
        let parent = self.ensure_group(&parents.join("/"))?;
        if parent.children.contains_key(*last) {
            return Err(StreamError::EntryExists(normalize_path(path)));
        }
        parent.children.insert(last.to_string(), node);
        Ok(())
    }

    /// Remove and return the node at `path`
    pub fn remove(&mut self, path: &str) -> Result<Node> {
        let components = split_path(path);
        let not_found = || StreamError::EntryNotFound(normalize_path(path));
        let (last, parents) = components.split_last().ok_or_else(not_found)?;
        let parent = if parents.is_empty() {
            self
        } else {
            match self.get_mut(&parents.join("/")) {
                Some(Node::Group(g)) => g,
                _ => return Err(not_found()),
            }
        };
        parent.children.remove(*last).ok_or_else(not_found)
    }

    /// Number of nodes below this group, recursively
    pub fn node_count(&self) -> usize {
        self.children
            .values()
            .map(|node| match node {
                Node::Group(g) => 1 + g.node_count(),
                _ => 1,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_creates_parents() {
        let mut root = Group::new();
        root.insert("/entry/sample/goniometer/omega", Node::Dataset(Dataset::new(Value::Float(1.5))))
            .unwrap();
        assert!(root.group("entry/sample").is_some());
        let omega = root.dataset("entry/sample/goniometer/omega").unwrap();
        assert_eq!(omega.value.as_f64(), Some(1.5));
        assert_eq!(root.node_count(), 4);
    }

    #[test]
    fn test_insert_refuses_existing() {
        let mut root = Group::new();
        root.insert("a/b", Node::Dataset(Dataset::new(1.into()))).unwrap();
        let err = root
            .insert("a/b", Node::Dataset(Dataset::new(2.into())))
            .unwrap_err();
        assert!(matches!(err, StreamError::EntryExists(p) if p == "a/b"));
        // a dataset cannot become a group
        assert!(root.ensure_group("a/b/c").is_err());
    }

    #[test]
    fn test_remove() {
        let mut root = Group::new();
        root.insert("a/b", Node::Dataset(Dataset::new(1.into()))).unwrap();
        assert!(root.remove("a/b").is_ok());
        assert!(!root.contains("a/b"));
        assert!(root.contains("a"));
        assert!(matches!(
            root.remove("a/b").unwrap_err(),
            StreamError::EntryNotFound(_)
        ));
        assert!(root.remove("x/y").is_err());
    }

    #[test]
    fn test_ensure_group_is_idempotent() {
        let mut root = Group::new();
        root.ensure_group("entry/data").unwrap().set_attr("NX_class", "NXdata");
        root.ensure_group("entry/data").unwrap().set_attr("NX_class", "NXdata");
        let data = root.group("entry/data").unwrap();
        assert_eq!(data.attrs.len(), 1);
        assert_eq!(root.node_count(), 2);
    }

    #[test]
    fn test_value_from_json() {
        use serde_json::json;
        assert_eq!(Value::from_json(json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(json!(0.5)), Value::Float(0.5));
        assert_eq!(Value::from_json(json!("Si")), Value::Text("Si".into()));
        assert_eq!(Value::from_json(json!([1, 2])), Value::IntList(vec![1, 2]));
        assert_eq!(
            Value::from_json(json!([1, 2.5])),
            Value::FloatList(vec![1.0, 2.5])
        );
        assert!(matches!(Value::from_json(json!({"a": 1})), Value::Json(_)));
        assert!(matches!(Value::from_json(json!([])), Value::Json(_)));
    }

    #[test]
    fn test_scalar_views() {
        assert_eq!(Value::IntList(vec![4]).as_f64(), Some(4.0));
        assert_eq!(Value::FloatList(vec![1.0, 2.0]).as_f64(), None);
        assert_eq!(Value::Text("x".into()).as_f64(), None);
        assert_eq!(Value::Int(3).to_f64_list(), Some(vec![3.0]));
    }
}
