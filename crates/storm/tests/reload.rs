//! Hot reload: identity preservation, member migration, template
//! bookkeeping, and kind-change rejection.

use storm::{EntityId, ErrorKind, Scope, SimplePart, TypeFlags, Value, World, replace_package};

fn pkg_with_class(w: &mut World, pkg_name: &str, class_name: &str, members: &[&str]) -> (EntityId, EntityId) {
    let pkg = w.new_package(pkg_name);
    let root = w.root();
    w.add_to(root, pkg).unwrap();
    let ty = w.new_type(class_name, TypeFlags::CLASS).unwrap();
    w.add_to(pkg, ty).unwrap();
    let int = Value::new(w.builtins().int);
    for member in members {
        let var = w.new_member_var(*member, int);
        w.add_to(ty, var).unwrap();
    }
    (pkg, ty)
}

/// Reloading identical content leaves every entity's identity untouched.
#[test]
fn unchanged_reload_preserves_identity() {
    let mut w = World::bare();
    let (old_pkg, old_ty) = pkg_with_class(&mut w, "app", "C", &["a"]);
    let f = w.new_function("work", Value::VOID, [Value::new(old_ty)]);
    w.add_to(old_pkg, f).unwrap();

    // The parallel graph built from the "reloaded" (identical) source.
    let (new_pkg, new_ty) = pkg_with_class(&mut w, "app2", "C", &["a"]);
    let f2 = w.new_function("work", Value::VOID, [Value::new(new_ty)]);
    w.add_to(new_pkg, f2).unwrap();
    // The new function refers to the new C; matching resolves that.

    replace_package(&mut w, old_pkg, new_pkg).unwrap();

    let scope = Scope::with_default(old_pkg);
    let found = w.find_in(old_pkg, &SimplePart::new("C"), &scope).unwrap();
    assert_eq!(found, Some(old_ty), "C keeps its identity");
    let found = w
        .find_in(old_pkg, &SimplePart::with_param("work", Value::new(old_ty)), &scope)
        .unwrap();
    assert_eq!(found, Some(f), "the function keeps its identity");
    // The new function's parameter was re-pointed to the surviving C.
    assert_eq!(w.entity(f).params[0].ty, Some(old_ty));
}

/// Scenario: a class gains a member across a reload. References to the
/// class, including template instances over it, keep their identity; the
/// new member is simply there.
#[test]
fn reload_adds_a_member_in_place() {
    let mut w = World::bare();
    let (old_pkg, old_ty) = pkg_with_class(&mut w, "app", "C", &["a"]);

    // Something instantiated over C before the reload.
    let array_before = w.array_of(Value::new(old_ty)).unwrap();

    let (new_pkg, _new_ty) = pkg_with_class(&mut w, "appnew", "C", &["a", "b"]);
    replace_package(&mut w, old_pkg, new_pkg).unwrap();

    let scope = Scope::with_default(old_pkg);
    let c = w.find_in(old_pkg, &SimplePart::new("C"), &scope).unwrap();
    assert_eq!(c, Some(old_ty), "C is the same object");

    let b = w.find_in(old_ty, &SimplePart::new("b"), &scope).unwrap();
    assert!(b.is_some(), "the new member is visible");
    let a = w.find_in(old_ty, &SimplePart::new("a"), &scope).unwrap();
    assert!(a.is_some(), "the old member survives");

    let array_after = w.array_of(Value::new(old_ty)).unwrap();
    assert_eq!(array_after, array_before, "template instances keep their identity");
}

/// Members that disappeared are orphaned and removed with notifications.
#[test]
fn removed_members_fire_watch_notifications() {
    let mut w = World::bare();
    let (old_pkg, old_ty) = pkg_with_class(&mut w, "app", "C", &["a", "b"]);
    let watcher = w.new_package("watcher");
    let root = w.root();
    w.add_to(root, watcher).unwrap();
    w.watch_add(old_ty, watcher).unwrap();

    let (new_pkg, _) = pkg_with_class(&mut w, "appnew", "C", &["a"]);
    w.take_watch_events();
    replace_package(&mut w, old_pkg, new_pkg).unwrap();

    let scope = Scope::with_default(old_pkg);
    let b = w.find_in(old_ty, &SimplePart::new("b"), &scope).unwrap();
    assert!(b.is_none(), "the dropped member is gone");
    let events = w.take_watch_events();
    assert!(
        events.iter().any(|e| e.watcher == watcher && !e.added),
        "the removal was observed: {events:?}"
    );
}

/// A template instance whose ingredient type disappeared is dropped from
/// the registry and its owner.
#[test]
fn template_instances_over_removed_types_are_dropped() {
    let mut w = World::bare();
    let (old_pkg, old_ty) = pkg_with_class(&mut w, "app", "Gone", &[]);
    let array = w.array_of(Value::new(old_ty)).unwrap();
    assert!(w.template_instances().iter().any(|t| t.generated == array));

    // The new graph no longer contains the type.
    let new_pkg = w.new_package("appnew");
    let root = w.root();
    w.add_to(root, new_pkg).unwrap();
    replace_package(&mut w, old_pkg, new_pkg).unwrap();

    assert!(
        !w.template_instances().iter().any(|t| t.generated == array),
        "the instance left the registry"
    );
    let scope = Scope::with_default(old_pkg);
    let core = w.core();
    let found = w.find_name(core, "Array");
    assert!(!found.contains(&array), "the instance left its slot");
    let _ = scope;
}

/// A kind change between a type and a non-type refuses to reload, before
/// anything is mutated.
#[test]
fn kind_changes_are_replace_errors() {
    let mut w = World::bare();
    let (old_pkg, old_ty) = pkg_with_class(&mut w, "app", "X", &["a"]);

    let new_pkg = w.new_package("appnew");
    let root = w.root();
    w.add_to(root, new_pkg).unwrap();
    let f = w.new_function("X", Value::VOID, []);
    w.add_to(new_pkg, f).unwrap();

    let err = replace_package(&mut w, old_pkg, new_pkg).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReplaceError);

    // Nothing was mutated: the old type is still in place with its member.
    let scope = Scope::with_default(old_pkg);
    assert_eq!(w.find_in(old_pkg, &SimplePart::new("X"), &scope).unwrap(), Some(old_ty));
    assert!(w.find_in(old_ty, &SimplePart::new("a"), &scope).unwrap().is_some());
}

/// A changed supertype is migrated onto the surviving type.
#[test]
fn supertype_changes_apply_to_the_survivor() {
    let mut w = World::bare();
    let root = w.root();
    let old_pkg = w.new_package("app");
    w.add_to(root, old_pkg).unwrap();
    let base1 = w.new_type("Base1", TypeFlags::CLASS).unwrap();
    let base2 = w.new_type("Base2", TypeFlags::CLASS).unwrap();
    let child = w.new_type("Child", TypeFlags::CLASS).unwrap();
    for ty in [base1, base2, child] {
        w.add_to(old_pkg, ty).unwrap();
    }
    w.set_super(child, Some(base1)).unwrap();

    // In the new graph, Child extends Base2.
    let new_pkg = w.new_package("appnew");
    w.add_to(root, new_pkg).unwrap();
    let nb1 = w.new_type("Base1", TypeFlags::CLASS).unwrap();
    let nb2 = w.new_type("Base2", TypeFlags::CLASS).unwrap();
    let nchild = w.new_type("Child", TypeFlags::CLASS).unwrap();
    for ty in [nb1, nb2, nchild] {
        w.add_to(new_pkg, ty).unwrap();
    }
    w.set_super(nchild, Some(nb2)).unwrap();

    replace_package(&mut w, old_pkg, new_pkg).unwrap();
    assert_eq!(w.super_of(child), Some(base2), "the super moved to the old Base2");
    assert!(w.is_a(child, base2));
    assert!(!w.is_a(child, base1));
}
