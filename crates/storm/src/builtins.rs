//! The built-in machine types and their conversion rules.
//!
//! Built-ins are ordinary type entities living in `core`; this module keeps
//! the well-known ids and implements the numeric conversion cost table used
//! during overload selection: widening within one signedness class costs
//! one per size step, a signedness change costs one more, and anything
//! lossy (narrowing, signed to unsigned, integer to float) is impossible.

use ahash::{AHashMap, AHashSet};

use crate::entity::EntityId;

/// Signedness class of a built-in numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumClass {
    Unsigned,
    Signed,
    Float,
}

/// Well-known ids of the built-in types.
///
/// The ids are placeholders until [`Builtins::finish`] runs at the end of
/// bootstrap; nothing queries them earlier.
#[derive(Debug)]
pub struct Builtins {
    pub bool_: EntityId,
    pub byte: EntityId,
    pub int: EntityId,
    pub nat: EntityId,
    pub long: EntityId,
    pub word: EntityId,
    pub float: EntityId,
    pub double: EntityId,
    pub str_: EntityId,
    /// The root of the exception hierarchy; catch clauses must derive from
    /// it.
    pub exception: EntityId,
    all: AHashSet<EntityId>,
    floats: AHashSet<EntityId>,
    numeric: AHashMap<EntityId, (NumClass, u32)>,
}

impl Default for Builtins {
    fn default() -> Self {
        let placeholder = EntityId::new(0);
        Self {
            bool_: placeholder,
            byte: placeholder,
            int: placeholder,
            nat: placeholder,
            long: placeholder,
            word: placeholder,
            float: placeholder,
            double: placeholder,
            str_: placeholder,
            exception: placeholder,
            all: AHashSet::new(),
            floats: AHashSet::new(),
            numeric: AHashMap::new(),
        }
    }
}

impl Builtins {
    /// Records a built-in type id during bootstrap.
    pub(crate) fn register(&mut self, id: EntityId, float: bool) {
        self.all.insert(id);
        if float {
            self.floats.insert(id);
        }
    }

    /// Finishes bootstrap: wires up the well-known ids and the numeric
    /// table.
    pub(crate) fn finish(&mut self, ids: &AHashMap<&str, EntityId>, str_ty: EntityId, exception: EntityId) {
        self.bool_ = ids["Bool"];
        self.byte = ids["Byte"];
        self.int = ids["Int"];
        self.nat = ids["Nat"];
        self.long = ids["Long"];
        self.word = ids["Word"];
        self.float = ids["Float"];
        self.double = ids["Double"];
        self.str_ = str_ty;
        self.exception = exception;
        self.numeric = AHashMap::from_iter([
            (self.byte, (NumClass::Unsigned, 1)),
            (self.nat, (NumClass::Unsigned, 4)),
            (self.word, (NumClass::Unsigned, 8)),
            (self.int, (NumClass::Signed, 4)),
            (self.long, (NumClass::Signed, 8)),
            (self.float, (NumClass::Float, 4)),
            (self.double, (NumClass::Float, 8)),
        ]);
    }

    /// Is `ty` one of the built-in machine types?
    pub fn is_built_in(&self, ty: EntityId) -> bool {
        self.all.contains(&ty)
    }

    /// Is `ty` a floating-point type?
    pub fn is_float(&self, ty: EntityId) -> bool {
        self.floats.contains(&ty)
    }

    /// The conversion cost from `from` to `to` between built-in numerics,
    /// or -1 when the conversion would lose information.
    ///
    /// Unsigned types widen into larger unsigned or strictly larger signed
    /// types, so `Byte` converts to `Nat` for 1 and to `Int` for 2: the
    /// extra step is the signedness change, which is why the unsigned
    /// overload wins for an unsigned argument.
    pub fn numeric_cost(&self, from: EntityId, to: EntityId) -> i32 {
        if from == to {
            return 0;
        }
        let (Some(&(fc, fs)), Some(&(tc, ts))) = (self.numeric.get(&from), self.numeric.get(&to)) else {
            return -1;
        };
        match (fc, tc) {
            _ if fc == tc => {
                if ts > fs {
                    size_steps(fc, fs, ts)
                } else {
                    -1
                }
            }
            (NumClass::Unsigned, NumClass::Signed) => {
                if ts > fs {
                    size_steps(tc, fs, ts) + 1
                } else {
                    -1
                }
            }
            _ => -1,
        }
    }
}

/// Number of representable sizes in `class` above `from` up to and
/// including `to`.
fn size_steps(class: NumClass, from: u32, to: u32) -> i32 {
    let sizes: &[u32] = match class {
        NumClass::Unsigned => &[1, 4, 8],
        NumClass::Signed => &[4, 8],
        NumClass::Float => &[4, 8],
    };
    let steps = sizes.iter().filter(|&&s| s > from && s <= to).count();
    i32::try_from(steps).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use crate::world::World;

    #[test]
    fn unsigned_widening_is_cheaper_than_a_sign_change() {
        let w = World::bare();
        let b = w.builtins();
        assert_eq!(b.numeric_cost(b.byte, b.nat), 1);
        assert_eq!(b.numeric_cost(b.byte, b.int), 2);
        assert_eq!(b.numeric_cost(b.byte, b.word), 2);
        assert_eq!(b.numeric_cost(b.byte, b.long), 3);
        assert_eq!(b.numeric_cost(b.int, b.long), 1);
        assert_eq!(b.numeric_cost(b.float, b.double), 1);
    }

    #[test]
    fn lossy_conversions_are_rejected() {
        let w = World::bare();
        let b = w.builtins();
        assert_eq!(b.numeric_cost(b.int, b.byte), -1);
        assert_eq!(b.numeric_cost(b.int, b.nat), -1);
        assert_eq!(b.numeric_cost(b.nat, b.int), -1);
        assert_eq!(b.numeric_cost(b.int, b.float), -1);
        assert_eq!(b.numeric_cost(b.double, b.float), -1);
    }
}
