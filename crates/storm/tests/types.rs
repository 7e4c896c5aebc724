//! Type system properties: subtype queries, common denominators, value
//! semantics, and enums.

use storm::{MatchFlags, TypeFlags, Value, World, common};

/// The constant-time subtype test agrees with chain membership after
/// arbitrary re-parenting, as long as the hierarchy stays acyclic.
#[test]
fn subtype_queries_agree_with_the_chains() {
    let mut w = World::bare();
    let names = ["A", "B", "C", "D", "E"];
    let types: Vec<_> = names
        .iter()
        .map(|n| w.new_type(*n, TypeFlags::CLASS).unwrap())
        .collect();

    // A sequence of set_super operations, including re-parenting.
    let moves = [
        (1, Some(0)),
        (2, Some(1)),
        (3, Some(2)),
        (4, Some(0)),
        (2, Some(4)),
        (3, Some(2)),
        (1, None),
    ];
    for (child, parent) in moves {
        w.set_super(types[child], parent.map(|p| types[p])).unwrap();

        for &a in &types {
            for &b in &types {
                let by_chain = w.type_chain(a).contains(&b);
                assert_eq!(w.is_a(a, b), by_chain, "is_a disagrees with the chain");
                if w.is_a(a, b) {
                    let depth = w.type_chain(a).len() - w.type_chain(b).len();
                    assert_eq!(w.type_distance(a, b), i32::try_from(depth).unwrap());
                } else {
                    assert_eq!(w.type_distance(a, b), -1);
                }
            }
        }
    }
}

/// `common` is symmetric and idempotent, and unrelated types meet at void.
#[test]
fn common_denominators_are_symmetric() {
    let mut w = World::bare();
    let a = w.new_type("A", TypeFlags::CLASS).unwrap();
    let b = w.new_type("B", TypeFlags::CLASS).unwrap();
    let c = w.new_type("C", TypeFlags::CLASS).unwrap();
    let lone = w.new_type("Lone", TypeFlags::CLASS).unwrap();
    w.set_super(b, Some(a)).unwrap();
    w.set_super(c, Some(a)).unwrap();

    let va = Value::new(a);
    let vb = Value::new(b);
    let vc = Value::new(c);
    let vl = Value::new(lone);

    assert_eq!(common(&w, vb, vc), common(&w, vc, vb));
    assert_eq!(common(&w, vb, vc), va);
    assert_eq!(common(&w, vb, vb), vb);
    assert_eq!(common(&w, va, vb), va);
    assert!(common(&w, va, vl).is_void());
    assert!(common(&w, va, Value::VOID).is_void());
}

/// `can_store` accepts subtypes and void slots; `matches` with the
/// no-inheritance flag requires exact equality.
#[test]
fn storage_compatibility() {
    let mut w = World::bare();
    let base = w.new_type("Base", TypeFlags::CLASS).unwrap();
    let derived = w.new_type("Derived", TypeFlags::CLASS).unwrap();
    w.set_super(derived, Some(base)).unwrap();

    let vb = Value::new(base);
    let vd = Value::new(derived);
    assert!(vb.can_store(&w, vd));
    assert!(!vd.can_store(&w, vb));
    assert!(Value::VOID.can_store(&w, vb));
    assert!(!vb.can_store(&w, Value::VOID));

    assert!(vb.matches(&w, vd, MatchFlags::NONE));
    assert!(!vb.matches(&w, vd, MatchFlags::NO_INHERITANCE));
    assert!(vb.matches(&w, vb, MatchFlags::NO_INHERITANCE));
}

/// Void is never a reference, and `as_ref` keeps it that way.
#[test]
fn void_is_never_by_reference() {
    let w = World::bare();
    let void = Value::VOID;
    assert!(!void.as_ref(true).by_ref);
    let int = Value::new(w.builtins().int);
    assert!(int.as_ref(true).by_ref);
    assert!(!int.as_ref(true).as_ref(false).by_ref);
}

/// Built-in metadata for the code generator: sizes and the float flag.
#[test]
fn operand_metadata_for_builtins() {
    let w = World::bare();
    let b = w.builtins();
    let int = Value::new(b.int).val_type(&w);
    assert_eq!(int.size.bytes, 4);
    assert!(!int.float);
    let double = Value::new(b.double).val_type(&w);
    assert_eq!(double.size.bytes, 8);
    assert!(double.float);
    // Heap objects are pointers.
    let s = Value::new(b.str_).val_type(&w);
    assert_eq!(s.size.bytes, 8);
}

/// Enum types carry named integer constants; bitmask enums combine them.
#[test]
fn enums_hold_named_constants() {
    let mut w = World::bare();
    let flags = w
        .new_type("Mode", TypeFlags::ENUM.with(TypeFlags::BITMASK))
        .unwrap();
    let root = w.root();
    w.add_to(root, flags).unwrap();
    w.add_enum_value(flags, "read", 1).unwrap();
    w.add_enum_value(flags, "write", 2).unwrap();

    assert_eq!(w.enum_value(flags, "read"), Some(1));
    assert_eq!(w.enum_value(flags, "write"), Some(2));
    assert_eq!(w.enum_value(flags, "missing"), None);
    let union = w.enum_value(flags, "read").unwrap() | w.enum_value(flags, "write").unwrap();
    assert_eq!(union, 3);

    // Enum constants are value-typed members of their enum.
    let not_enum = w.new_type("Plain", TypeFlags::CLASS).unwrap();
    assert!(w.add_enum_value(not_enum, "x", 1).is_err());
}

/// Actor types are heap objects bound to a thread and never value types.
#[test]
fn actors_are_heap_objects() {
    let mut w = World::bare();
    let thread = w.new_named_thread("Worker");
    let root = w.root();
    w.add_to(root, thread).unwrap();
    let actor = w.new_type("Service", TypeFlags::ACTOR).unwrap();
    w.type_data_mut(actor).thread = Some(thread);

    let v = Value::new(actor);
    assert!(v.is_actor(&w));
    assert!(v.is_heap_obj(&w));
    assert!(!v.is_value(&w));
    assert!(!v.is_class(&w));
}
