//! The polymorphic operand descriptor used throughout the compiler.
//!
//! A [`Value`] describes any operand a language frontend can produce: a type
//! from the name tree together with a by-reference flag. The absent type
//! denotes `void`. `Value` is deliberately small and `Copy`; all interesting
//! queries go through the [`World`] that owns the types.

use serde::{Deserialize, Serialize};

use crate::{
    entity::{EntityId, EntityKind},
    typesys::{TypeFlags, ValType},
    world::World,
};

/// Flags modifying [`Value::matches`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchFlags {
    /// Require exact type equality rather than accepting subtypes.
    pub no_inheritance: bool,
}

impl MatchFlags {
    pub const NONE: Self = Self { no_inheritance: false };
    pub const NO_INHERITANCE: Self = Self { no_inheritance: true };
}

/// A value inside the compiler: a type and a by-reference flag.
///
/// Invariants: `void` (absent type) is never by-ref, and actor types are
/// never treated as value types. The constructors uphold the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Value {
    /// The type this value refers to. `None` denotes void.
    pub ty: Option<EntityId>,
    /// Is the value passed by reference?
    pub by_ref: bool,
}

impl Value {
    /// The void value.
    pub const VOID: Self = Self { ty: None, by_ref: false };

    /// Creates a non-reference value of the given type.
    pub fn new(ty: EntityId) -> Self {
        Self {
            ty: Some(ty),
            by_ref: false,
        }
    }

    /// Creates a value of the given type with an explicit reference flag.
    pub fn with_ref(ty: EntityId, by_ref: bool) -> Self {
        Self {
            ty: Some(ty),
            by_ref,
        }
    }

    /// True when this value denotes void.
    pub fn is_void(self) -> bool {
        self.ty.is_none()
    }

    /// This value as a reference (or not). Void stays void and never becomes
    /// a reference.
    #[must_use]
    pub fn as_ref(self, by_ref: bool) -> Self {
        Self {
            ty: self.ty,
            by_ref: by_ref && self.ty.is_some(),
        }
    }

    fn flags(self, world: &World) -> Option<TypeFlags> {
        let ty = self.ty?;
        match &world.entity(ty).kind {
            EntityKind::Type(t) => Some(t.flags),
            _ => None,
        }
    }

    /// Is this a value type? Mutually exclusive with `is_class`, `is_actor`
    /// and `is_built_in`.
    pub fn is_value(self, world: &World) -> bool {
        self.flags(world).is_some_and(TypeFlags::is_value) && !self.is_built_in(world)
    }

    /// Is this a heap-allocated class type?
    pub fn is_class(self, world: &World) -> bool {
        self.flags(world).is_some_and(TypeFlags::is_class)
    }

    /// Is this a thread-bound actor type?
    pub fn is_actor(self, world: &World) -> bool {
        self.flags(world).is_some_and(TypeFlags::is_actor)
    }

    /// Is this one of the built-in machine types (Int, Float, ...)?
    pub fn is_built_in(self, world: &World) -> bool {
        self.ty.is_some_and(|ty| world.builtins().is_built_in(ty))
    }

    /// Is this a heap object, i.e. a class or an actor?
    pub fn is_heap_obj(self, world: &World) -> bool {
        self.is_class(world) || self.is_actor(world)
    }

    /// Is this value represented as a pointer? Heap objects always are, and
    /// anything passed by reference is.
    pub fn is_ptr(self, world: &World) -> bool {
        self.by_ref || self.is_heap_obj(world)
    }

    /// Operand metadata for the code generator.
    pub fn val_type(self, world: &World) -> ValType {
        match self.ty {
            Some(ty) if !self.by_ref && !self.is_heap_obj(world) => world.type_size(ty),
            Some(_) => ValType::pointer(),
            None => ValType::VOID,
        }
    }

    /// Can a slot typed `self` store a value of type `x`?
    ///
    /// True iff `self` is void, or `x` is a subtype of `self`. For class
    /// slots, a value-mode `x` cannot satisfy a reference slot unless the
    /// types already match exactly.
    pub fn can_store(self, world: &World, x: Value) -> bool {
        let Some(to) = self.ty else {
            // Anything can be stored in a void slot by discarding it.
            return true;
        };
        let Some(from) = x.ty else {
            return false;
        };
        if !world.is_a(from, to) {
            return false;
        }
        if self.by_ref && self.is_class(world) && !x.by_ref && !x.is_heap_obj(world) {
            return from == to;
        }
        true
    }

    /// Does `other` match this value under `flags`? With no flags set this
    /// is `can_store`; the relation is not symmetric.
    pub fn matches(self, world: &World, other: Value, flags: MatchFlags) -> bool {
        if flags.no_inheritance {
            self.ty == other.ty
        } else {
            self.can_store(world, other)
        }
    }

    /// Conversion badness from `other` into a slot of this type.
    ///
    /// 0 means exact, larger values mean more conversions, -1 means the
    /// conversion is impossible. A void actual always fits with badness 0.
    /// Subtype conversions cost their chain distance; built-in numeric
    /// widenings cost one step per size increase plus one for a signedness
    /// change.
    pub fn conversion_cost(self, world: &World, other: Value) -> i32 {
        if other.is_void() {
            // An exactly-void actual contributes nothing.
            return 0;
        }
        // A non-void actual can never satisfy a void formal.
        let (Some(to), Some(from)) = (self.ty, other.ty) else {
            return -1;
        };
        let chain = world.type_distance(from, to);
        if chain >= 0 {
            return chain;
        }
        world.builtins().numeric_cost(from, to)
    }

    /// Human-readable form, e.g. `core.Int&`.
    pub fn describe(self, world: &World) -> String {
        match self.ty {
            Some(ty) => {
                let mut s = world.path_string(ty);
                if self.by_ref {
                    s.push('&');
                }
                s
            }
            None => "void".to_string(),
        }
    }
}

/// Computes the common denominator of two values: the most derived type both
/// `a` and `b` can be cast to. Returns void when the types are unrelated.
pub fn common(world: &World, a: Value, b: Value) -> Value {
    let (Some(ta), Some(tb)) = (a.ty, b.ty) else {
        return Value::VOID;
    };
    let chain_a = world.type_chain(ta);
    let chain_b = world.type_chain(tb);
    let mut found = None;
    for (x, y) in chain_a.iter().zip(chain_b.iter()) {
        if x == y {
            found = Some(*x);
        } else {
            break;
        }
    }
    match found {
        Some(ty) => Value::with_ref(ty, a.by_ref && b.by_ref),
        None => Value::VOID,
    }
}

/// Creates the `this` pointer value for a type: a reference for value types,
/// a plain pointer for heap objects.
pub fn this_ptr(world: &World, ty: EntityId) -> Value {
    let v = Value::new(ty);
    if v.is_heap_obj(world) { v } else { v.as_ref(true) }
}
