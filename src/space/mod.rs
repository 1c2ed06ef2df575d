//! # Object Spaces
//!
//! An object space is a relatable host whose relations are addressed by
//! separator-delimited paths. Every segment but the last must name a
//! descriptor of the current space's namespace whose value is itself an
//! [`ObjectSpace`]; the last segment is resolved in the innermost space and
//! the relation operation runs there.
//!
//! ```text
//! root ── a: ObjectSpace ── b: ObjectSpace ── c: i64
//!                        └─ d: String
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{AnyRelationType, Relatable, Relation, RelationType, RelationValue, Relations};
use crate::registry::Namespace;
use crate::{Error, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Path parsing options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    /// Segment separator.
    pub separator: char,
    /// Skip empty segments from leading, trailing or doubled separators.
    /// When false they are an error.
    pub ignore_empty_segments: bool,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            separator: '/',
            ignore_empty_segments: true,
        }
    }
}

impl SpaceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidArgument(format!("invalid space config: {e}")))
    }
}

// ============================================================================
// SpacePath
// ============================================================================

/// A parsed object space path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacePath {
    raw: String,
    segments: Vec<String>,
}

impl SpacePath {
    pub fn parse(path: &str, config: &SpaceConfig) -> Result<Self> {
        let mut segments = Vec::new();
        for segment in path.split(config.separator) {
            if segment.is_empty() {
                if config.ignore_empty_segments {
                    continue;
                }
                return Err(Error::PathResolution {
                    path: path.to_owned(),
                    segment: String::new(),
                    reason: "empty segment".into(),
                });
            }
            segments.push(segment.to_owned());
        }
        if segments.is_empty() {
            return Err(Error::PathResolution {
                path: path.to_owned(),
                segment: String::new(),
                reason: "path has no segments".into(),
            });
        }
        Ok(Self {
            raw: path.to_owned(),
            segments,
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// All segments but the last.
    pub fn parents(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    pub fn leaf(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    fn error(&self, segment: &str, reason: impl Into<String>) -> Error {
        Error::PathResolution {
            path: self.raw.clone(),
            segment: segment.to_owned(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SpacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ============================================================================
// ObjectSpace
// ============================================================================

/// A hierarchical relatable host. Cloning yields another handle to the same
/// space.
#[derive(Clone)]
pub struct ObjectSpace {
    relations: Relations,
    namespace: Arc<Namespace>,
    config: Arc<SpaceConfig>,
}

impl ObjectSpace {
    pub fn new(namespace: Arc<Namespace>) -> Self {
        Self::with_config(namespace, SpaceConfig::default())
    }

    pub fn with_config(namespace: Arc<Namespace>, config: SpaceConfig) -> Self {
        Self {
            relations: Relations::new(),
            namespace,
            config: Arc::new(config),
        }
    }

    /// A descriptor for a sub-space that is created on first write through
    /// a path.
    pub fn subspace_type(name: impl Into<String>, namespace: Arc<Namespace>) -> RelationType<ObjectSpace> {
        RelationType::builder(name)
            .initial_fn(move |_| ObjectSpace::new(Arc::clone(&namespace)))
            .build()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    pub fn ptr_eq(&self, other: &ObjectSpace) -> bool {
        self.relations.ptr_eq(&other.relations)
    }

    /// Store `value` at `path`, creating intermediate sub-spaces from their
    /// initial values where needed.
    pub fn put<T: RelationValue>(&self, path: &str, value: T) -> Result<Relation> {
        let path = SpacePath::parse(path, &self.config)?;
        let parent = self.walk(&path, true)?;
        let leaf = parent.leaf_type::<T>(&path)?;
        parent.relations.set(&leaf, value)
    }

    /// The value at `path`, or the leaf descriptor's default.
    pub fn get<T: RelationValue>(&self, path: &str) -> Result<Option<T>> {
        let path = SpacePath::parse(path, &self.config)?;
        let parent = self.walk(&path, false)?;
        let leaf = parent.leaf_type::<T>(&path)?;
        Ok(parent.relations.get(&leaf))
    }

    /// Whether a relation exists at `path`. Unresolvable paths yield false.
    pub fn contains(&self, path: &str) -> bool {
        let Ok(path) = SpacePath::parse(path, &self.config) else {
            return false;
        };
        let Ok(parent) = self.walk(&path, false) else {
            return false;
        };
        parent
            .descriptor(&path, path.leaf())
            .is_ok_and(|leaf| parent.relations.has_relation(&leaf))
    }

    /// Delete the relation at `path`. A deleted sub-space is then cleared,
    /// recursively; siblings are unaffected. Nothing is cleared when the
    /// delete itself is rejected.
    pub fn delete(&self, path: &str) -> Result<()> {
        let path = SpacePath::parse(path, &self.config)?;
        let parent = self.walk(&path, false)?;
        let leaf = parent.descriptor(&path, path.leaf())?;
        let _guard = parent.relations.lock();
        let child = if leaf.is::<ObjectSpace>() {
            parent.relations.get_relation(&leaf).and_then(|r| r.target::<ObjectSpace>())
        } else {
            None
        };
        parent.relations.delete(&leaf)?;
        if let Some(child) = child {
            child.clear()?;
            debug!(path = %path, "sub-space cleared");
        }
        Ok(())
    }

    /// Remove every relation of this space and its sub-spaces.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.relations.lock();
        for relation in self.relations.get_all(&|r: &Relation| r.relation_type().is::<ObjectSpace>()) {
            if let Some(child) = relation.target::<ObjectSpace>() {
                child.clear()?;
            }
        }
        self.relations.clear()
    }

    /// Descend to the space holding the leaf of `path`.
    fn walk(&self, path: &SpacePath, materialize: bool) -> Result<ObjectSpace> {
        let mut current = self.clone();
        for segment in path.parents() {
            let rtype = current.descriptor(path, segment)?;
            let space_type = rtype
                .downcast::<ObjectSpace>()
                .map_err(|_| path.error(segment, "not an object space"))?;
            let next = match current.relations.get_relation(&space_type) {
                Some(relation) => relation.target::<ObjectSpace>(),
                None if materialize => current.relations.init(&space_type)?.target::<ObjectSpace>(),
                None => None,
            };
            current = next.ok_or_else(|| path.error(segment, "no object space stored"))?;
        }
        Ok(current)
    }

    fn descriptor(&self, path: &SpacePath, segment: &str) -> Result<AnyRelationType> {
        self.namespace
            .slot(segment)
            .cloned()
            .ok_or_else(|| path.error(segment, format!("not declared in namespace {}", self.namespace.id())))
    }

    fn leaf_type<T: RelationValue>(&self, path: &SpacePath) -> Result<RelationType<T>> {
        self.descriptor(path, path.leaf())?.downcast::<T>()
    }
}

impl Relatable for ObjectSpace {
    fn relations(&self) -> &Relations {
        &self.relations
    }
}

impl fmt::Debug for ObjectSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSpace")
            .field("namespace", &self.namespace.id())
            .field("relations", &self.relations)
            .finish()
    }
}
