//! The entity arena backing the name tree.
//!
//! The name tree is inherently cyclic: children point to parents, and type
//! chains refer to sibling chains. Instead of sharing pointers, every named
//! entity lives in a central arena owned by the [`World`] and is addressed by
//! an [`EntityId`]. Since all mutation happens on the compiler thread, we
//! only ever need one mutable reference at a time.

use smallvec::SmallVec;
use strum::{Display, EnumString};

use crate::{
    bs::block::{BlockData, LocalVarData},
    diag::SrcPos,
    doc::DocSource,
    name::{SimpleName, SimplePart},
    package::PackageData,
    typesys::{FunctionData, GlobalVarData, MemberVarData, ThreadData, TypeData},
    value::Value,
    world::World,
};

/// Unique identifier for entities stored in the world's arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct EntityId(u32);

impl EntityId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index.try_into().expect("entity arena overflow"))
    }

    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Who may see an entity from where.
///
/// Visibility objects are singletons: one variant per access level, with a
/// single predicate evaluated against the lookup source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Visibility {
    /// Visible from everywhere.
    Public,
    /// Visible only from within the enclosing type.
    TypePrivate,
    /// Visible from the enclosing type and types derived from it.
    TypeProtected,
    /// Visible from anywhere within the enclosing package.
    PackagePrivate,
    /// Visible only from the same source file.
    FilePrivate,
}

/// Kind-specific payload of an entity.
///
/// Frontend extension points (expressions, grammar tokens) are traits; the
/// entities of the name tree itself form this closed set.
#[derive(Debug)]
pub enum EntityKind {
    /// A package, optionally backed by a directory.
    Package(PackageData),
    /// A type; also a name set holding its members.
    Type(TypeData),
    /// A function with a late-bound body.
    Function(FunctionData),
    /// A member variable of a type.
    MemberVar(MemberVarData),
    /// A global variable bound to a thread.
    GlobalVar(GlobalVarData),
    /// A named logical thread.
    Thread(ThreadData),
    /// A frontend block hooked into the tree so local lookups resolve
    /// before enclosing scopes.
    Block(BlockData),
    /// A local variable inside a block.
    LocalVar(LocalVarData),
}

impl EntityKind {
    /// Short label for messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Package(_) => "package",
            Self::Type(_) => "type",
            Self::Function(_) => "function",
            Self::MemberVar(_) => "member variable",
            Self::GlobalVar(_) => "global variable",
            Self::Thread(_) => "thread",
            Self::Block(_) => "block",
            Self::LocalVar(_) => "local variable",
        }
    }
}

/// A named entity in the tree.
#[derive(Debug)]
pub struct Entity {
    /// The entity's name within its parent.
    pub name: String,
    /// Parameters for overload disambiguation. The composite key
    /// `(name, params)` is unique within one overloads slot.
    pub params: SmallVec<[Value; 4]>,
    /// Access control; `None` behaves as public.
    pub visibility: Option<Visibility>,
    /// Where the entity was declared. Unknown for synthetic entities.
    pub pos: SrcPos,
    /// Deferred documentation, if a doc comment was seen.
    pub doc: Option<DocSource>,
    /// The containing lookup node. Unset until the entity is added
    /// somewhere.
    pub parent: Option<EntityId>,
    /// Kind-specific payload.
    pub kind: EntityKind,
}

impl Entity {
    /// Creates an entity with no parameters at an unknown position.
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            params: SmallVec::new(),
            visibility: None,
            pos: SrcPos::unknown(),
            doc: None,
            parent: None,
            kind,
        }
    }

    /// Creates an entity with parameters.
    pub fn with_params(name: impl Into<String>, params: impl IntoIterator<Item = Value>, kind: EntityKind) -> Self {
        Self {
            params: params.into_iter().collect(),
            ..Self::new(name, kind)
        }
    }

    /// Sets the declaration position.
    #[must_use]
    pub fn at(mut self, pos: SrcPos) -> Self {
        self.pos = pos;
        self
    }

    /// Sets the visibility.
    #[must_use]
    pub fn visible_as(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// The identifying part of this entity: name plus parameters.
    pub fn identity(&self) -> SimplePart {
        SimplePart {
            name: self.name.clone(),
            params: self.params.clone(),
        }
    }
}

impl World {
    /// Walks `parent` pointers from `from` (inclusive) and returns the first
    /// entity satisfying `pred`.
    pub fn closest(&self, from: EntityId, pred: impl Fn(&Entity) -> bool) -> Option<EntityId> {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let entity = self.entity(id);
            if pred(entity) {
                return Some(id);
            }
            cur = entity.parent;
        }
        None
    }

    /// The closest enclosing package of `from`, or the root package.
    pub fn closest_pkg(&self, from: EntityId) -> EntityId {
        self.closest(from, |e| matches!(e.kind, EntityKind::Package(_)))
            .unwrap_or_else(|| self.root())
    }

    /// The closest enclosing type of `from`, if any.
    pub fn closest_type(&self, from: EntityId) -> Option<EntityId> {
        self.closest(from, |e| matches!(e.kind, EntityKind::Type(_)))
    }

    /// The source file an entity belongs to, walking outward until a
    /// position with a file is found.
    pub fn source_file(&self, from: EntityId) -> Option<std::sync::Arc<std::path::PathBuf>> {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let entity = self.entity(id);
            if let Some(file) = &entity.pos.file {
                return Some(file.clone());
            }
            cur = entity.parent;
        }
        None
    }

    /// The full path of an entity from the root, as a resolved name.
    pub fn path(&self, id: EntityId) -> SimpleName {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(e) = cur {
            if e == self.root() {
                break;
            }
            let entity = self.entity(e);
            parts.push(entity.identity());
            cur = entity.parent;
        }
        parts.reverse();
        SimpleName::from_parts(parts)
    }

    /// The dotted path of an entity, without parameters.
    pub fn path_string(&self, id: EntityId) -> String {
        self.path(id).to_string()
    }

    /// Evaluates the visibility predicate: may `source` see `check`?
    ///
    /// A `None` source sees only public entities. An unset visibility
    /// behaves as public.
    pub fn visible(&self, check: EntityId, source: Option<EntityId>) -> bool {
        let Some(visibility) = self.entity(check).visibility else {
            return true;
        };
        match visibility {
            Visibility::Public => true,
            Visibility::TypePrivate => {
                let Some(source) = source else { return false };
                let Some(owner) = self.closest_type(check) else {
                    return false;
                };
                self.closest_type_is(source, owner)
            }
            Visibility::TypeProtected => {
                let Some(source) = source else { return false };
                let Some(owner) = self.closest_type(check) else {
                    return false;
                };
                self.closest_type(source).is_some_and(|t| self.is_a(t, owner))
            }
            Visibility::PackagePrivate => {
                let Some(source) = source else { return false };
                self.closest_pkg(source) == self.closest_pkg(check)
            }
            Visibility::FilePrivate => {
                let Some(source) = source else { return false };
                match (self.source_file(source), self.source_file(check)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
        }
    }

    fn closest_type_is(&self, source: EntityId, owner: EntityId) -> bool {
        self.closest_type(source) == Some(owner)
    }
}
