//! Runtime services: the minimal surface the rest of the compiler depends
//! on.
//!
//! The machine-code back-end and the collector itself are external
//! collaborators; this module defines the interface the substrate needs
//! from them: an abstract runtime value, per-type handles with the canonical
//! operations, identity-preserving deep copies for cross-thread calls, and
//! the object-identity map used during hot reload.

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{entity::EntityId, world::World};

/// A heap object: a type tag and named fields.
#[derive(Debug, Clone, Default)]
pub struct RtObject {
    /// The type of the object, when known to the name tree.
    pub ty: Option<EntityId>,
    pub fields: IndexMap<String, RtValue>,
}

/// An abstract runtime value.
///
/// Immediate values are stored inline; arrays and objects are shared
/// through reference counting so that object identity is observable, which
/// is what cross-thread cloning must sever.
#[derive(Debug, Clone, Default)]
pub enum RtValue {
    #[default]
    Unit,
    Bool(bool),
    Byte(u8),
    Int(i64),
    Nat(u64),
    Float(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<RtValue>>>),
    Object(Rc<RefCell<RtObject>>),
}

impl RtValue {
    /// Creates a fresh shared array.
    pub fn array(items: Vec<RtValue>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    /// Creates a fresh shared object.
    pub fn object(ty: Option<EntityId>, fields: IndexMap<String, RtValue>) -> Self {
        Self::Object(Rc::new(RefCell::new(RtObject { ty, fields })))
    }

    /// The type of a heap value, if it carries one.
    pub fn type_of(&self) -> Option<EntityId> {
        match self {
            Self::Object(obj) => obj.borrow().ty,
            _ => None,
        }
    }

    /// Does this value share any heap storage with `other`?
    pub fn shares_with(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Array(a), Self::Object(_)) => a.borrow().iter().any(|v| v.shares_with(other)),
            (Self::Object(a), _) => a.borrow().fields.values().any(|v| v.shares_with(other)),
            _ => false,
        }
    }

    /// Deep copy through `env`, preserving identity within one copy: a
    /// value reachable twice in the source graph is reachable twice in the
    /// copy, pointing at one shared clone.
    pub fn deep_copy(&self, env: &mut CloneEnv) -> Self {
        match self {
            Self::Array(arr) => {
                let key = Rc::as_ptr(arr) as usize;
                if let Some(done) = env.copied.get(&key) {
                    return done.clone();
                }
                let fresh = Rc::new(RefCell::new(Vec::new()));
                env.copied.insert(key, Self::Array(Rc::clone(&fresh)));
                let items: Vec<RtValue> = arr.borrow().iter().map(|v| v.deep_copy(env)).collect();
                *fresh.borrow_mut() = items;
                Self::Array(fresh)
            }
            Self::Object(obj) => {
                let key = Rc::as_ptr(obj) as usize;
                if let Some(done) = env.copied.get(&key) {
                    return done.clone();
                }
                let fresh = Rc::new(RefCell::new(RtObject::default()));
                env.copied.insert(key, Self::Object(Rc::clone(&fresh)));
                let src = obj.borrow();
                let fields: IndexMap<String, RtValue> =
                    src.fields.iter().map(|(k, v)| (k.clone(), v.deep_copy(env))).collect();
                *fresh.borrow_mut() = RtObject { ty: src.ty, fields };
                Self::Object(fresh)
            }
            other => other.clone(),
        }
    }
}

/// Identity map threading a single deep copy, so value identity across the
/// thread boundary is preserved within the copied graph.
#[derive(Debug, Default)]
pub struct CloneEnv {
    copied: AHashMap<usize, RtValue>,
}

impl CloneEnv {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Is `obj` an instance of `ty` or a subtype of it?
pub fn is_a(world: &World, obj: &RtValue, ty: EntityId) -> bool {
    obj.type_of().is_some_and(|t| world.is_a(t, ty))
}

/// The immutable per-type handle used by generated code: the canonical
/// operations on values of that type.
#[derive(Clone, Copy)]
pub struct TypeHandle {
    pub copy_ctor: fn(&RtValue) -> RtValue,
    pub destructor: Option<fn(&mut RtValue)>,
    pub hash: fn(&RtValue) -> u64,
    pub equals: fn(&RtValue, &RtValue) -> bool,
    pub to_s: fn(&RtValue) -> String,
    /// Produces the serialization tag of the type, when it is
    /// serializable.
    pub serialized_type: Option<fn(&RtValue) -> u32>,
}

impl std::fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeHandle").finish_non_exhaustive()
    }
}

fn default_copy(v: &RtValue) -> RtValue {
    v.deep_copy(&mut CloneEnv::new())
}

fn default_hash(v: &RtValue) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = ahash::AHasher::default();
    match v {
        RtValue::Unit => 0u8.hash(&mut h),
        RtValue::Bool(b) => b.hash(&mut h),
        RtValue::Byte(b) => b.hash(&mut h),
        RtValue::Int(i) => i.hash(&mut h),
        RtValue::Nat(n) => n.hash(&mut h),
        RtValue::Float(f) => f.to_bits().hash(&mut h),
        RtValue::Str(s) => s.hash(&mut h),
        RtValue::Array(a) => (Rc::as_ptr(a) as usize).hash(&mut h),
        RtValue::Object(o) => (Rc::as_ptr(o) as usize).hash(&mut h),
    }
    h.finish()
}

fn default_equals(a: &RtValue, b: &RtValue) -> bool {
    match (a, b) {
        (RtValue::Unit, RtValue::Unit) => true,
        (RtValue::Bool(x), RtValue::Bool(y)) => x == y,
        (RtValue::Byte(x), RtValue::Byte(y)) => x == y,
        (RtValue::Int(x), RtValue::Int(y)) => x == y,
        (RtValue::Nat(x), RtValue::Nat(y)) => x == y,
        (RtValue::Float(x), RtValue::Float(y)) => x == y,
        (RtValue::Str(x), RtValue::Str(y)) => x == y,
        (RtValue::Array(x), RtValue::Array(y)) => {
            Rc::ptr_eq(x, y) || {
                let (x, y) = (x.borrow(), y.borrow());
                x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| default_equals(a, b))
            }
        }
        (RtValue::Object(x), RtValue::Object(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn default_to_s(v: &RtValue) -> String {
    match v {
        RtValue::Unit => "()".to_string(),
        RtValue::Bool(b) => b.to_string(),
        RtValue::Byte(b) => b.to_string(),
        RtValue::Int(i) => i.to_string(),
        RtValue::Nat(n) => n.to_string(),
        RtValue::Float(f) => f.to_string(),
        RtValue::Str(s) => s.to_string(),
        RtValue::Array(a) => {
            let items: Vec<String> = a.borrow().iter().map(default_to_s).collect();
            format!("[{}]", items.join(", "))
        }
        RtValue::Object(o) => format!("<object at {:p}>", Rc::as_ptr(o)),
    }
}

impl World {
    /// The handle for `ty`. Handles are immutable records; all types share
    /// the default operations until a frontend installs specialised ones.
    pub fn type_handle(&self, _ty: EntityId) -> TypeHandle {
        TypeHandle {
            copy_ctor: default_copy,
            destructor: None,
            hash: default_hash,
            equals: default_equals,
            to_s: default_to_s,
            serialized_type: None,
        }
    }

    /// Installs the dispatch record of a late-bound type on an object.
    /// Calling this on anything that is not a heap object is a programming
    /// error and is reported as internal.
    pub fn set_vtable(&self, obj: &RtValue, ty: EntityId) -> crate::diag::CResult<()> {
        match obj {
            RtValue::Object(cell) => {
                cell.borrow_mut().ty = Some(ty);
                Ok(())
            }
            other => Err(crate::diag::CompileError::internal(format!(
                "set_vtable on a non-object value: {}",
                default_to_s(other)
            ))),
        }
    }

    /// The fully qualified name of a type, for messages.
    pub fn type_name(&self, ty: EntityId) -> String {
        self.path_string(ty)
    }
}

/// An object-identity map, used to drive the global reference swap during
/// hot reload: populated with (old, new) pairs, then applied to every root.
#[derive(Debug, Default)]
pub struct ObjMap {
    map: AHashMap<EntityId, EntityId>,
}

impl ObjMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old: EntityId, new: EntityId) {
        self.map.insert(old, new);
    }

    /// The replacement for `id`, following chains until a fixpoint.
    pub fn resolve(&self, id: EntityId) -> EntityId {
        let mut cur = id;
        let mut steps = 0;
        while let Some(&next) = self.map.get(&cur) {
            cur = next;
            steps += 1;
            debug_assert!(steps <= self.map.len(), "cycle in identity map");
            if steps > self.map.len() {
                break;
            }
        }
        cur
    }

    pub fn get(&self, id: EntityId) -> Option<EntityId> {
        self.map.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, EntityId)> + '_ {
        self.map.iter().map(|(&k, &v)| (k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_copy_severs_sharing_with_the_source() {
        let original = RtValue::array(vec![RtValue::Int(1), RtValue::Int(2), RtValue::Int(3)]);
        let copy = original.deep_copy(&mut CloneEnv::new());
        assert!(!copy.shares_with(&original));

        if let RtValue::Array(arr) = &copy {
            arr.borrow_mut().push(RtValue::Int(4));
        }
        if let RtValue::Array(arr) = &original {
            assert_eq!(arr.borrow().len(), 3);
        }
    }

    #[test]
    fn deep_copy_preserves_identity_within_the_graph() {
        let shared = RtValue::array(vec![RtValue::Int(7)]);
        let outer = RtValue::array(vec![shared.clone(), shared.clone()]);
        let copy = outer.deep_copy(&mut CloneEnv::new());

        let RtValue::Array(outer_copy) = &copy else {
            panic!("expected an array")
        };
        let items = outer_copy.borrow();
        assert!(items[0].shares_with(&items[1]), "internal sharing must survive the copy");
        assert!(!items[0].shares_with(&shared), "sharing with the source must not");
    }
}
