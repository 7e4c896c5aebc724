//! The type hierarchy representation with O(1) subtype queries.
//!
//! Every type owns an ordered vector of ancestors from the root of its
//! hierarchy down to itself (Cohen's algorithm). A type `a` is a subtype of
//! `b` exactly when `a.chain[b.chain.len() - 1] == b`, which is a constant
//! time check. Changing a supertype rebuilds the chain of the type and all
//! of its descendants, breadth-first.

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::{
    diag::{CResult, CompileError, ErrorKind},
    entity::{EntityId, EntityKind},
    world::World,
};

/// The ancestor vector of one type.
///
/// Invariant: `chain[chain.len() - 1]` is always the owning type itself, so
/// the vector is never empty once attached to a type.
#[derive(Debug, Clone)]
pub struct TypeChain {
    /// Ancestors from the hierarchy root down to the owner.
    pub chain: SmallVec<[EntityId; 4]>,
    /// Direct children. Updated transactionally by `set_super` so the
    /// Cohen invariant holds on all descendants at all times.
    pub children: Vec<EntityId>,
}

impl TypeChain {
    /// Creates the chain for a fresh type with no supertype.
    pub fn new(owner: EntityId) -> Self {
        Self {
            chain: SmallVec::from_slice(&[owner]),
            children: Vec::new(),
        }
    }

    /// The owner of this chain.
    pub fn owner(&self) -> EntityId {
        *self.chain.last().expect("type chain is never empty")
    }

    /// The direct supertype, if any.
    pub fn super_type(&self) -> Option<EntityId> {
        if self.chain.len() >= 2 {
            Some(self.chain[self.chain.len() - 2])
        } else {
            None
        }
    }

    /// Is the owner derived from `other` (whose chain has `depth` entries)?
    pub fn is_a(&self, other: EntityId, depth: usize) -> bool {
        self.chain.len() >= depth && self.chain[depth - 1] == other
    }
}

impl World {
    /// The ancestor chain of a type, root first, the type itself last.
    ///
    /// # Panics
    /// Panics when `ty` is not a type; querying the hierarchy of anything
    /// else is an internal error.
    pub fn type_chain(&self, ty: EntityId) -> &[EntityId] {
        &self.type_data(ty).chain.chain
    }

    /// Is `a` derived from (or equal to) `b`? Constant time.
    pub fn is_a(&self, a: EntityId, b: EntityId) -> bool {
        if a == b {
            return true;
        }
        let (EntityKind::Type(ta), EntityKind::Type(tb)) = (&self.entity(a).kind, &self.entity(b).kind) else {
            return false;
        };
        ta.chain.is_a(b, tb.chain.chain.len())
    }

    /// Inheritance distance from `a` up to `b`, or -1 when unrelated.
    pub fn type_distance(&self, a: EntityId, b: EntityId) -> i32 {
        if !self.is_a(a, b) {
            return -1;
        }
        let la = self.type_data(a).chain.chain.len();
        let lb = self.type_data(b).chain.chain.len();
        i32::try_from(la - lb).unwrap_or(i32::MAX)
    }

    /// The direct supertype of `ty`, if any.
    pub fn super_of(&self, ty: EntityId) -> Option<EntityId> {
        self.type_data(ty).chain.super_type()
    }

    /// Direct children of `ty`. Not ordered in any particular way.
    pub fn children_of(&self, ty: EntityId) -> Vec<EntityId> {
        self.type_data(ty).chain.children.clone()
    }

    /// Sets the supertype of `ty` to `super_ty`, rebuilding the chain of
    /// `ty` and all of its descendants.
    ///
    /// Rebuilding proceeds breadth-first over the descendant tree. Setting a
    /// supertype that would introduce a cycle is an internal error and is
    /// detected before anything is mutated.
    pub fn set_super(&mut self, ty: EntityId, super_ty: Option<EntityId>) -> CResult<()> {
        if let Some(s) = super_ty {
            if s == ty || self.is_a(s, ty) {
                return Err(CompileError::new(
                    ErrorKind::InternalTypeError,
                    format!(
                        "setting {} as the super type of {} would create a cycle",
                        self.path_string(s),
                        self.path_string(ty)
                    ),
                ));
            }
        }

        // Detach from the previous super's child set.
        if let Some(old) = self.type_data(ty).chain.super_type() {
            self.type_data_mut(old).chain.children.retain(|&c| c != ty);
        }

        // Attach to the new super and rebuild our own chain.
        let mut prefix: SmallVec<[EntityId; 4]> = match super_ty {
            Some(s) => {
                self.type_data_mut(s).chain.children.push(ty);
                SmallVec::from_slice(self.type_chain(s))
            }
            None => SmallVec::new(),
        };
        prefix.push(ty);
        self.type_data_mut(ty).chain.chain = prefix;

        // Notify descendants breadth-first.
        let mut queue: VecDeque<EntityId> = self.type_data(ty).chain.children.iter().copied().collect();
        while let Some(child) = queue.pop_front() {
            let parent = self.type_data(child).chain.super_type().expect("child has a super");
            let mut chain: SmallVec<[EntityId; 4]> = SmallVec::from_slice(self.type_chain(parent));
            chain.push(child);
            self.type_data_mut(child).chain.chain = chain;
            queue.extend(self.type_data(child).chain.children.iter().copied());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{typesys::TypeFlags, world::World};

    #[test]
    fn subtype_is_constant_time_lookup() {
        let mut w = World::bare();
        let a = w.new_type("A", TypeFlags::CLASS).unwrap();
        let b = w.new_type("B", TypeFlags::CLASS).unwrap();
        let c = w.new_type("C", TypeFlags::CLASS).unwrap();
        w.set_super(b, Some(a)).unwrap();
        w.set_super(c, Some(b)).unwrap();

        assert!(w.is_a(c, a));
        assert!(w.is_a(c, b));
        assert!(w.is_a(b, a));
        assert!(!w.is_a(a, c));
        assert_eq!(w.type_distance(c, a), 2);
        assert_eq!(w.type_distance(c, b), 1);
        assert_eq!(w.type_distance(a, c), -1);
    }

    #[test]
    fn chain_invariant_holds_after_reparenting() {
        let mut w = World::bare();
        let a = w.new_type("A", TypeFlags::CLASS).unwrap();
        let b = w.new_type("B", TypeFlags::CLASS).unwrap();
        let c = w.new_type("C", TypeFlags::CLASS).unwrap();
        let d = w.new_type("D", TypeFlags::CLASS).unwrap();
        w.set_super(c, Some(b)).unwrap();
        w.set_super(d, Some(c)).unwrap();
        w.set_super(b, Some(a)).unwrap();

        for ty in [a, b, c, d] {
            assert_eq!(*w.type_chain(ty).last().unwrap(), ty);
        }
        assert_eq!(w.type_chain(d), &[a, b, c, d]);
        assert!(w.is_a(d, a));

        // Move c (and its subtree) to hang off a directly.
        w.set_super(c, Some(a)).unwrap();
        assert_eq!(w.type_chain(d), &[a, c, d]);
        assert!(!w.is_a(d, b));
    }

    #[test]
    fn cycles_are_rejected_as_internal_errors() {
        let mut w = World::bare();
        let a = w.new_type("A", TypeFlags::CLASS).unwrap();
        let b = w.new_type("B", TypeFlags::CLASS).unwrap();
        w.set_super(b, Some(a)).unwrap();
        let err = w.set_super(a, Some(b)).unwrap_err();
        assert!(!err.is_user_error());
        assert!(w.set_super(a, Some(a)).is_err());
    }
}
