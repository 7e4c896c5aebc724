//! Scope traversal, value resolution, and visibility.

use std::rc::Rc;

use storm::{
    DefaultLookup, ErrorKind, Name, Scope, ScopeExtra, SimpleName, SimplePart, TypeFlags, Value, Visibility, World,
};

/// The default traversal walks outward and sees `core` before the root,
/// so built-ins resolve from everywhere.
#[test]
fn core_is_visible_from_everywhere() {
    let mut w = World::bare();
    let root = w.root();
    let deep = w.new_package("deep");
    w.add_to(root, deep).unwrap();
    let deeper = w.new_package("deeper");
    w.add_to(deep, deeper).unwrap();

    let scope = Scope::with_default(deeper);
    let name = SimpleName::parse("Int").unwrap();
    let found = scope.find_simple(&mut w, &name).unwrap();
    assert_eq!(found, Some(w.builtins().int));
}

/// The full name resolves relative to each candidate: a sibling package is
/// reachable through the root.
#[test]
fn full_names_resolve_relative_to_candidates() {
    let mut w = World::bare();
    let root = w.root();
    let a = w.new_package("a");
    let b = w.new_package("b");
    w.add_to(root, a).unwrap();
    w.add_to(root, b).unwrap();
    let ty = w.new_type("Thing", TypeFlags::CLASS).unwrap();
    w.add_to(b, ty).unwrap();

    let scope = Scope::with_default(a);
    let found = scope.find_simple(&mut w, &SimpleName::parse("b.Thing").unwrap()).unwrap();
    assert_eq!(found, Some(ty));
}

/// If `scope.find` resolves to a type, `scope.value` yields exactly that
/// type; a non-type is a syntax error.
#[test]
fn value_resolution_is_consistent_with_find() {
    let mut w = World::bare();
    let root = w.root();
    let pkg = w.new_package("pkg");
    w.add_to(root, pkg).unwrap();
    let ty = w.new_type("T", TypeFlags::CLASS).unwrap();
    w.add_to(pkg, ty).unwrap();
    let f = w.new_function("func", Value::VOID, []);
    w.add_to(pkg, f).unwrap();

    let scope = Scope::with_default(pkg);
    let found = scope.find(&mut w, &Name::parse("T").unwrap()).unwrap();
    assert_eq!(found, Some(ty));
    let value = scope.value(&mut w, &Name::parse("T").unwrap(), Default::default()).unwrap();
    assert_eq!(value, Value::new(ty));

    let err = scope
        .value(&mut w, &Name::parse("func").unwrap(), Default::default())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

/// The language's void name resolves to the void value, and is rejected by
/// plain lookup.
#[test]
fn void_is_recognised_by_the_lookup_policy() {
    let mut w = World::bare();
    let root = w.root();
    let lookup = Rc::new(DefaultLookup::with_void("void"));
    let scope = Scope::with_lookup(root, lookup);

    let value = scope
        .value(&mut w, &Name::parse("void").unwrap(), Default::default())
        .unwrap();
    assert!(value.is_void());
    let found = scope.find(&mut w, &Name::parse("void").unwrap()).unwrap();
    assert_eq!(found, None);
}

/// Extra lookups (use-declarations) run ahead of the default traversal:
/// an imported name shadows one the outward walk would find.
#[test]
fn extra_lookups_are_searched_first() {
    let mut w = World::bare();
    let root = w.root();
    let here = w.new_package("here");
    let used = w.new_package("used");
    w.add_to(root, here).unwrap();
    w.add_to(root, used).unwrap();

    // The same simple name exists twice: once in the used package, once
    // where the default traversal from `here` finds it on its own.
    let imported = w.new_type("Thing", TypeFlags::CLASS).unwrap();
    w.add_to(used, imported).unwrap();
    let ambient = w.new_type("Thing", TypeFlags::CLASS).unwrap();
    w.add_to(root, ambient).unwrap();

    // Without the import, the outward walk reaches the root's Thing.
    let plain = Scope::with_default(here);
    let found = plain
        .find_simple(&mut w, &SimpleName::parse("Thing").unwrap())
        .unwrap();
    assert_eq!(found, Some(ambient));

    // With it, the imported Thing wins.
    let mut extra = ScopeExtra::new(DefaultLookup::new());
    extra.push(used);
    let scope = Scope::with_lookup(here, Rc::new(extra));
    let found = scope
        .find_simple(&mut w, &SimpleName::parse("Thing").unwrap())
        .unwrap();
    assert_eq!(found, Some(imported));
}

/// Package-private entities are invisible from other packages.
#[test]
fn package_private_limits_lookup() {
    let mut w = World::bare();
    let root = w.root();
    let a = w.new_package("a");
    let b = w.new_package("b");
    w.add_to(root, a).unwrap();
    w.add_to(root, b).unwrap();

    let f = w.new_function("secret", Value::VOID, []);
    w.entity_mut(f).visibility = Some(Visibility::PackagePrivate);
    w.add_to(a, f).unwrap();

    let from_a = Scope::with_default(a);
    let found = w.find_in(a, &SimplePart::new("secret"), &from_a).unwrap();
    assert_eq!(found, Some(f));

    let from_b = Scope::with_default(b);
    let found = w.find_in(a, &SimplePart::new("secret"), &from_b).unwrap();
    assert_eq!(found, None);
}

/// Type-protected members are visible from derived types only.
#[test]
fn type_protected_follows_the_hierarchy() {
    let mut w = World::bare();
    let root = w.root();
    let pkg = w.new_package("pkg");
    w.add_to(root, pkg).unwrap();
    let base = w.new_type("Base", TypeFlags::CLASS).unwrap();
    let derived = w.new_type("Derived", TypeFlags::CLASS).unwrap();
    let other = w.new_type("Other", TypeFlags::CLASS).unwrap();
    for ty in [base, derived, other] {
        w.add_to(pkg, ty).unwrap();
    }
    w.set_super(derived, Some(base)).unwrap();

    let m = w.new_member_var("guarded", Value::new(w.builtins().int));
    w.entity_mut(m).visibility = Some(Visibility::TypeProtected);
    w.add_to(base, m).unwrap();

    assert!(w.visible(m, Some(derived)));
    assert!(!w.visible(m, Some(other)));
    assert!(!w.visible(m, None));
}
