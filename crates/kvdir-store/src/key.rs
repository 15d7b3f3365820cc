//! Derived record keys.
//!
//! Every record is addressed by its kind plus a path of name components
//! joined with [`KEY_SEPARATOR`]. Child keys are computed from their parent's
//! path, never stored:
//!
//! ```text
//! Namespace  idx
//! Segment    idx \0 _0.cfs
//! Hunk       idx \0 _0.cfs \0 0000000000000003
//! Lock       idx \0 write.lock
//! ```
//!
//! Hunk ids are zero-padded hex so lexical key order equals numeric order.
//! The first component is the entity group: transactions are scoped to it.

use crate::tables;
use kvdir_common::{HunkId, KEY_SEPARATOR};
use redb::TableDefinition;
use std::fmt;

/// Record kinds known to the store, one redb table each
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// One logical index
    Namespace,
    /// One logical file
    Segment,
    /// One payload chunk of a file
    Hunk,
    /// An existence-based lock
    Lock,
}

impl RecordKind {
    /// Every kind, in registration order
    pub const ALL: [Self; 4] = [Self::Namespace, Self::Segment, Self::Hunk, Self::Lock];

    /// Stable name of the kind
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Segment => "segment",
            Self::Hunk => "hunk",
            Self::Lock => "lock",
        }
    }

    pub(crate) const fn table(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Self::Namespace => tables::NAMESPACES,
            Self::Segment => tables::SEGMENTS,
            Self::Hunk => tables::HUNKS,
            Self::Lock => tables::LOCKS,
        }
    }
}

/// Key of a single record
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordKey {
    kind: RecordKind,
    path: String,
}

impl RecordKey {
    /// Root key of an index
    pub fn namespace(name: &str) -> Self {
        debug_assert!(!name.contains(KEY_SEPARATOR));
        Self {
            kind: RecordKind::Namespace,
            path: name.to_string(),
        }
    }

    /// Key of a file inside `namespace`
    pub fn segment(namespace: &Self, name: &str) -> Self {
        debug_assert_eq!(namespace.kind, RecordKind::Namespace);
        namespace.child(RecordKind::Segment, name)
    }

    /// Key of a lock inside `namespace`
    pub fn lock(namespace: &Self, name: &str) -> Self {
        debug_assert_eq!(namespace.kind, RecordKind::Namespace);
        namespace.child(RecordKind::Lock, name)
    }

    /// Key of hunk `id` of `segment`
    pub fn hunk(segment: &Self, id: HunkId) -> Self {
        debug_assert_eq!(segment.kind, RecordKind::Segment);
        segment.child(RecordKind::Hunk, &format!("{id:016x}"))
    }

    pub(crate) fn from_raw(kind: RecordKind, path: String) -> Self {
        Self { kind, path }
    }

    fn child(&self, kind: RecordKind, name: &str) -> Self {
        debug_assert!(!name.contains(KEY_SEPARATOR));
        let mut path = String::with_capacity(self.path.len() + 1 + name.len());
        path.push_str(&self.path);
        path.push(KEY_SEPARATOR);
        path.push_str(name);
        Self { kind, path }
    }

    /// Kind of record this key addresses
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Encoded path used as the redb key
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Entity group (namespace name) this key belongs to
    #[must_use]
    pub fn group(&self) -> &str {
        self.path
            .split(KEY_SEPARATOR)
            .next()
            .unwrap_or(self.path.as_str())
    }

    /// Last path component: the namespace, file or lock name
    #[must_use]
    pub fn name(&self) -> &str {
        self.path
            .rsplit(KEY_SEPARATOR)
            .next()
            .unwrap_or(self.path.as_str())
    }

    /// Numeric id of a hunk key
    #[must_use]
    pub fn hunk_id(&self) -> Option<HunkId> {
        match self.kind {
            RecordKind::Hunk => HunkId::from_str_radix(self.name(), 16).ok(),
            _ => None,
        }
    }

    /// Parent key, derived by dropping the last component
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (parent, _) = self.path.rsplit_once(KEY_SEPARATOR)?;
        let kind = match self.kind {
            RecordKind::Namespace => return None,
            RecordKind::Segment | RecordKind::Lock => RecordKind::Namespace,
            RecordKind::Hunk => RecordKind::Segment,
        };
        Some(Self::from_raw(kind, parent.to_string()))
    }

    /// Whether `self` is `ancestor` or lives below it
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        self.path
            .strip_prefix(ancestor.path.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(KEY_SEPARATOR))
    }

    /// Half-open key range `[lower, upper)` covering every descendant path
    pub(crate) fn descendant_range(&self) -> (String, String) {
        let mut lower = self.path.clone();
        lower.push(KEY_SEPARATOR);
        let mut upper = self.path.clone();
        upper.push('\u{1}');
        (lower, upper)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind.name())?;
        for (i, part) in self.path.split(KEY_SEPARATOR).enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(part)?;
        }
        f.write_str(")")
    }
}
