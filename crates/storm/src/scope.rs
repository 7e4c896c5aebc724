//! Scopes and lookup policy.
//!
//! A [`Scope`] is little more than a pointer to the topmost lookup node plus
//! a [`ScopeLookup`] policy object describing how to search from there. The
//! default policy walks outward through `parent` pointers, attempting to
//! resolve the full name relative to every node on the way, and intersperses
//! the well-known `core` package just before the absolute root so built-ins
//! appear as if imported everywhere. Language frontends install their own
//! policies (for instance a file scope with `use`-declared packages searched
//! first).

use std::{fmt, rc::Rc};

use crate::{
    diag::{CResult, CompileError, ErrorKind, SrcPos},
    entity::{EntityId, EntityKind},
    name::{Name, SimpleName},
    value::Value,
    world::World,
};

/// The lookup strategy for a scope.
pub trait ScopeLookup: fmt::Debug {
    /// Finds `name` in `scope`.
    fn find(&self, world: &mut World, scope: &Scope, name: &SimpleName) -> CResult<Option<EntityId>>;

    /// What `void` is called in this language, if anything.
    fn void_name(&self) -> Option<&str> {
        None
    }

    /// Resolves `name` to a value.
    ///
    /// Recognises the language's `void` alias, rejects entities that are not
    /// types with a syntax error, and reports unresolvable names likewise.
    fn value(&self, world: &mut World, scope: &Scope, name: &Name, pos: SrcPos) -> CResult<Value> {
        if let [part] = name.parts() {
            if Some(part.name()) == self.void_name() {
                return Ok(Value::VOID);
            }
        }
        let resolved = name.resolve(world, scope)?;
        match self.find(world, scope, &resolved)? {
            Some(found) => match &world.entity(found).kind {
                EntityKind::Type(_) => Ok(Value::new(found)),
                other => Err(CompileError::syntax(
                    pos,
                    format!("{} is a {}, not a type", world.path_string(found), other.label()),
                )),
            },
            None => Err(CompileError::syntax(pos, format!("can not find the type {resolved}"))),
        }
    }
}

/// The default lookup policy.
#[derive(Debug, Default)]
pub struct DefaultLookup {
    /// The name of `void` in the current language, if any.
    pub void_name: Option<String>,
}

impl DefaultLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_void(name: impl Into<String>) -> Self {
        Self {
            void_name: Some(name.into()),
        }
    }

    /// The candidate nodes to search, in order: the top node and its
    /// parents, with `core` inserted before the absolute root.
    fn candidates(world: &World, top: EntityId) -> Vec<EntityId> {
        let mut result = Vec::new();
        let mut cur = Some(top);
        while let Some(id) = cur {
            result.push(id);
            cur = world.entity(id).parent;
        }
        let core = world.core();
        if !result.contains(&core) {
            let root_at = result.len().saturating_sub(1);
            result.insert(root_at, core);
        }
        result
    }
}

/// Resolves the full `name` relative to `at`, one part at a time.
pub fn find_at(world: &mut World, at: EntityId, name: &SimpleName, scope: &Scope) -> CResult<Option<EntityId>> {
    let mut cur = at;
    for part in name.parts() {
        match world.find_in(cur, part, scope)? {
            Some(next) => cur = next,
            None => return Ok(None),
        }
    }
    Ok(Some(cur))
}

impl ScopeLookup for DefaultLookup {
    fn find(&self, world: &mut World, scope: &Scope, name: &SimpleName) -> CResult<Option<EntityId>> {
        if name.is_empty() {
            return Ok(None);
        }
        if let [part] = name.parts() {
            if Some(part.name.as_str()) == self.void_name.as_deref() {
                return Ok(None);
            }
        }
        let Some(top) = scope.top else {
            return Ok(None);
        };
        for candidate in Self::candidates(world, top) {
            if let Some(found) = find_at(world, candidate, name, scope)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn void_name(&self) -> Option<&str> {
        self.void_name.as_deref()
    }
}

/// A lookup with extra top-level nodes searched ahead of the default
/// traversal. Used for file scopes with `use`-declared packages.
#[derive(Debug, Default)]
pub struct ScopeExtra {
    base: DefaultLookup,
    /// Additional nodes to search first.
    pub extra: Vec<EntityId>,
}

impl ScopeExtra {
    pub fn new(base: DefaultLookup) -> Self {
        Self {
            base,
            extra: Vec::new(),
        }
    }

    pub fn push(&mut self, lookup: EntityId) {
        if !self.extra.contains(&lookup) {
            self.extra.push(lookup);
        }
    }
}

impl ScopeLookup for ScopeExtra {
    /// The extra nodes win: a `use`-imported name shadows anything the
    /// default traversal would find under the same name.
    fn find(&self, world: &mut World, scope: &Scope, name: &SimpleName) -> CResult<Option<EntityId>> {
        for &at in &self.extra {
            if let Some(found) = find_at(world, at, name, scope)? {
                return Ok(Some(found));
            }
        }
        self.base.find(world, scope, name)
    }

    fn void_name(&self) -> Option<&str> {
        self.base.void_name()
    }
}

/// A point to look up names from: the topmost node plus the policy.
///
/// The empty scope never finds anything. Scopes are cheap to clone and to
/// re-root with [`Scope::child`].
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// The topmost node, if any.
    pub top: Option<EntityId>,
    /// The policy, if any.
    pub lookup: Option<Rc<dyn ScopeLookup>>,
}

impl Scope {
    /// A scope that never returns anything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default lookup rooted at `top`.
    pub fn with_default(top: EntityId) -> Self {
        Self {
            top: Some(top),
            lookup: Some(Rc::new(DefaultLookup::new())),
        }
    }

    /// A custom lookup rooted at `top`.
    pub fn with_lookup(top: EntityId, lookup: Rc<dyn ScopeLookup>) -> Self {
        Self {
            top: Some(top),
            lookup: Some(lookup),
        }
    }

    /// This scope re-rooted at `top`, keeping the policy.
    #[must_use]
    pub fn child(&self, top: EntityId) -> Self {
        Self {
            top: Some(top),
            lookup: self.lookup.clone(),
        }
    }

    /// Finds a possibly-unresolved name relative to this scope.
    pub fn find(&self, world: &mut World, name: &Name) -> CResult<Option<EntityId>> {
        let Some(lookup) = self.lookup.clone() else {
            return Ok(None);
        };
        let resolved = name.resolve(world, self)?;
        lookup.find(world, self, &resolved)
    }

    /// Finds a resolved name relative to this scope.
    pub fn find_simple(&self, world: &mut World, name: &SimpleName) -> CResult<Option<EntityId>> {
        let Some(lookup) = self.lookup.clone() else {
            return Ok(None);
        };
        lookup.find(world, self, name)
    }

    /// Looks up a value. Fails with a syntax error when `name` does not
    /// resolve, or resolves to something that is not a type.
    pub fn value(&self, world: &mut World, name: &Name, pos: SrcPos) -> CResult<Value> {
        let Some(lookup) = self.lookup.clone() else {
            return Err(CompileError::at(
                ErrorKind::SyntaxError,
                pos,
                format!("can not find the type {name} in an empty scope"),
            ));
        };
        lookup.value(world, self, name, pos)
    }
}
