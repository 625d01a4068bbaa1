//! Runtime type descriptors used for signature checking.
//!
//! Rust has no class inheritance, so "is `A` a subtype of `B`" is answered by
//! a [`TypeHierarchy`]: a registry of nominal relations declared by the
//! application. Every type is a subtype of itself, relations are transitive,
//! and untyped parameters ([`ParamType::Any`]) match anything.
//!
//! ```
//! use horizon_signal::types::{ParamType, TypeHierarchy};
//!
//! struct Widget;
//! struct Button;
//!
//! TypeHierarchy::global().register::<Button, Widget>();
//!
//! let button = ParamType::of::<Button>();
//! let widget = ParamType::of::<Widget>();
//! assert!(button.is_subtype_of(&widget));
//! assert!(!widget.is_subtype_of(&button));
//! ```

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use parking_lot::RwLock;

/// Identity and display name of a concrete Rust type.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// The tag for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying `TypeId`.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The full type name as reported by `std::any::type_name`.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.name)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The declared type of one positional parameter.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ParamType {
    /// No declared type; matches anything on either side of a check.
    #[default]
    Any,
    /// Exactly one concrete type.
    Exact(TypeTag),
    /// Any one of several types.
    Union(Vec<TypeTag>),
}

impl ParamType {
    /// An exact parameter type for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Exact(TypeTag::of::<T>())
    }

    /// A union over `tags`.
    ///
    /// Duplicates are removed. A single branch collapses to [`ParamType::Exact`]
    /// and an empty union collapses to [`ParamType::Any`].
    pub fn union(tags: impl IntoIterator<Item = TypeTag>) -> Self {
        let mut branches: Vec<TypeTag> = Vec::new();
        for tag in tags {
            if !branches.contains(&tag) {
                branches.push(tag);
            }
        }
        match branches.len() {
            0 => Self::Any,
            1 => Self::Exact(branches[0]),
            _ => Self::Union(branches),
        }
    }

    /// Whether this parameter is untyped.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Subtype check against the process-wide [`TypeHierarchy`].
    pub fn is_subtype_of(&self, other: &ParamType) -> bool {
        self.is_subtype_of_in(other, TypeHierarchy::global())
    }

    /// Subtype check against a specific hierarchy.
    ///
    /// A union on the left is a subtype when at least one of its branches is;
    /// a union on the right accepts a type that is a subtype of any branch.
    pub fn is_subtype_of_in(&self, other: &ParamType, hierarchy: &TypeHierarchy) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Union(left), _) => left
                .iter()
                .any(|tag| Self::Exact(*tag).is_subtype_of_in(other, hierarchy)),
            (Self::Exact(left), Self::Exact(right)) => hierarchy.is_subtype(*left, *right),
            (Self::Exact(left), Self::Union(right)) => {
                right.iter().any(|tag| hierarchy.is_subtype(*left, *tag))
            }
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("_"),
            Self::Exact(tag) => write!(f, "{tag}"),
            Self::Union(tags) => {
                for (i, tag) in tags.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{tag}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<TypeTag> for ParamType {
    fn from(tag: TypeTag) -> Self {
        Self::Exact(tag)
    }
}

/// Registry of nominal subtype relations.
///
/// Relations are only consulted when a connection requests type checking;
/// they have no effect on how emitted values are delivered.
#[derive(Default)]
pub struct TypeHierarchy {
    /// Direct supertypes of each registered type.
    supertypes: RwLock<HashMap<TypeTag, Vec<TypeTag>>>,
}

impl TypeHierarchy {
    /// Create an empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide hierarchy used by dispatchers.
    pub fn global() -> &'static TypeHierarchy {
        static GLOBAL: OnceLock<TypeHierarchy> = OnceLock::new();
        GLOBAL.get_or_init(TypeHierarchy::new)
    }

    /// Declare `Sub` as a direct subtype of `Super`.
    pub fn register<Sub: ?Sized + 'static, Super: ?Sized + 'static>(&self) {
        self.register_tags(TypeTag::of::<Sub>(), TypeTag::of::<Super>());
    }

    /// Declare `sub` as a direct subtype of `sup`.
    pub fn register_tags(&self, sub: TypeTag, sup: TypeTag) {
        if sub == sup {
            return;
        }
        let mut supertypes = self.supertypes.write();
        let direct = supertypes.entry(sub).or_default();
        if !direct.contains(&sup) {
            tracing::trace!(target: "horizon_signal::types", sub = sub.name(), sup = sup.name(), "registered subtype");
            direct.push(sup);
        }
    }

    /// The direct supertypes registered for `tag`.
    pub fn direct_supertypes(&self, tag: TypeTag) -> Vec<TypeTag> {
        self.supertypes.read().get(&tag).cloned().unwrap_or_default()
    }

    /// Whether `sub` equals `sup` or reaches it through registered relations.
    pub fn is_subtype(&self, sub: TypeTag, sup: TypeTag) -> bool {
        if sub == sup {
            return true;
        }
        let supertypes = self.supertypes.read();
        let mut visited = HashSet::new();
        let mut pending = vec![sub];
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(direct) = supertypes.get(&current) {
                if direct.contains(&sup) {
                    return true;
                }
                pending.extend(direct.iter().copied());
            }
        }
        false
    }
}

impl fmt::Debug for TypeHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHierarchy")
            .field("registered", &self.supertypes.read().len())
            .finish()
    }
}
