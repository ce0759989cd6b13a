use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

pub const PATH_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        Self::Key(value.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(value: String) -> Self {
        Self::Key(value)
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

/// Ordered sequence of field ids and row indices addressing a location in a
/// document or an options tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path(Vec<PathSegment>);

impl Path {
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parses a dot separated path; purely numeric segments become indices.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::root();
        }
        Self(
            raw.split(PATH_SEPARATOR)
                .map(|segment| match segment.parse::<usize>() {
                    Ok(index) => PathSegment::Index(index),
                    Err(_) => PathSegment::Key(segment.to_string()),
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(PathSegment::Key(key.into()));
        self
    }

    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    #[must_use]
    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    #[must_use]
    pub fn join(&self, other: &Path) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    #[must_use]
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn flat(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(&PATH_SEPARATOR.to_string())
    }

    /// Prefix test on the flat form that never matches across a segment
    /// boundary: `shared` is not a prefix of `shared_username`.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        flat_is_prefix(&self.flat(), &other.flat())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flat())
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<Vec<PathSegment>> for Path {
    fn from(value: Vec<PathSegment>) -> Self {
        Self(value)
    }
}

impl FromIterator<PathSegment> for Path {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[must_use]
pub fn flat_is_prefix(prefix: &str, flat: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    flat == prefix
        || (flat.starts_with(prefix)
            && flat[prefix.len()..].starts_with(PATH_SEPARATOR))
}

#[derive(Debug)]
struct InternedPathInner {
    flat: String,
    path: Path,
}

/// Canonical, shared path token. Two tokens produced by the same interner for
/// equal flat forms point at the same allocation.
#[derive(Debug, Clone)]
pub struct InternedPath(Arc<InternedPathInner>);

impl InternedPath {
    #[must_use]
    pub fn flat(&self) -> &str {
        &self.0.flat
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0.path
    }

    #[must_use]
    pub fn same_instance(left: &Self, right: &Self) -> bool {
        Arc::ptr_eq(&left.0, &right.0)
    }
}

impl PartialEq for InternedPath {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.flat == other.0.flat
    }
}

impl Eq for InternedPath {}

impl Hash for InternedPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.flat.hash(state);
    }
}

#[derive(Debug, Default)]
pub struct PathInterner {
    cache: Mutex<HashMap<String, InternedPath>>,
}

impl PathInterner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canonicalize(&self, path: &Path) -> InternedPath {
        let flat = path.flat();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(flat.clone())
            .or_insert_with(|| {
                InternedPath(Arc::new(InternedPathInner {
                    flat,
                    path: path.clone(),
                }))
            })
            .clone()
    }

    #[must_use]
    pub fn lookup(&self, flat: &str) -> Option<InternedPath> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(flat)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[must_use]
pub fn value_at<'a>(value: &'a Value, path: &Path) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(value, |current, segment| match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get(key),
            (Value::Object(map), PathSegment::Index(index)) => map.get(&index.to_string()),
            (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
            (Value::Array(items), PathSegment::Key(key)) => key
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        })
}

pub fn value_at_mut<'a>(value: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path.segments() {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key)?,
            (Value::Object(map), PathSegment::Index(index)) => map.get_mut(&index.to_string())?,
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
            (Value::Array(items), PathSegment::Key(key)) => {
                items.get_mut(key.parse::<usize>().ok()?)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Writes `new_value` at `path`, creating intermediate objects or arrays
/// (chosen by the kind of the following segment) where they are missing.
pub fn set_at(value: &mut Value, path: &Path, new_value: Value) {
    let Some((last, parents)) = path.segments().split_last() else {
        *value = new_value;
        return;
    };

    let mut current = value;
    for (position, segment) in parents.iter().enumerate() {
        let next_is_index = matches!(path.segments()[position + 1], PathSegment::Index(_));
        current = descend_or_create(current, segment, next_is_index);
    }

    match (current, last) {
        (Value::Array(items), PathSegment::Index(index)) => {
            if *index >= items.len() {
                items.resize(*index + 1, Value::Null);
            }
            items[*index] = new_value;
        }
        (Value::Object(map), segment) => {
            map.insert(segment.to_string(), new_value);
        }
        (slot, segment) => {
            let mut map = Map::new();
            map.insert(segment.to_string(), new_value);
            *slot = Value::Object(map);
        }
    }
}

fn descend_or_create<'a>(
    current: &'a mut Value,
    segment: &PathSegment,
    next_is_index: bool,
) -> &'a mut Value {
    let empty = || {
        if next_is_index {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    };

    let indexes_array = current.is_array() && matches!(segment, PathSegment::Index(_));
    if !indexes_array && !current.is_object() {
        *current = Value::Object(Map::new());
    }

    let slot = match (current, segment) {
        (Value::Array(items), PathSegment::Index(index)) => {
            if *index >= items.len() {
                items.resize(*index + 1, Value::Null);
            }
            &mut items[*index]
        }
        (Value::Object(map), segment) => map.entry(segment.to_string()).or_insert_with(empty),
        (other, _) => other,
    };
    if !slot.is_object() && !slot.is_array() {
        *slot = empty();
    }
    slot
}
