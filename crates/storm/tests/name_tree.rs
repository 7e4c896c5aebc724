//! Behaviour of the name tree: uniqueness, lazy loading, watch
//! notifications, templates, and export traversal.

use std::rc::Rc;

use storm::{
    CResult, CompileError, Entity, EntityId, EntityKind, ErrorKind, FunctionData, LoadState, NameSetLoader, Scope,
    SimplePart, Template, TypeFlags, Value, World,
};

fn add_fn(w: &mut World, pkg: EntityId, name: &str, result: Value, params: &[Value]) -> EntityId {
    let f = w.new_function(name, result, params.iter().copied());
    w.add_to(pkg, f).unwrap();
    f
}

/// For every (name, params) key there is at most one entity in a set.
#[test]
fn duplicate_identities_are_rejected() {
    let mut w = World::bare();
    let pkg = w.new_package("test");
    let root = w.root();
    w.add_to(root, pkg).unwrap();

    let int = Value::new(w.builtins().int);
    add_fn(&mut w, pkg, "f", int, &[int]);
    let dup = w.new_function("f", int, [int]);
    let err = w.add_to(pkg, dup).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypedefError);

    // A different parameter list under the same name is fine.
    let nat = Value::new(w.builtins().nat);
    add_fn(&mut w, pkg, "f", int, &[nat]);
    assert_eq!(w.find_name(pkg, "f").len(), 2);
}

/// Overload selection: exact matches win, and an unsigned argument prefers
/// the unsigned overload because the sign change costs an extra step.
#[test]
fn overload_selection_prefers_cheaper_conversions() {
    let mut w = World::bare();
    let pkg = w.new_package("test");
    let root = w.root();
    w.add_to(root, pkg).unwrap();

    let int = Value::new(w.builtins().int);
    let nat = Value::new(w.builtins().nat);
    let byte = Value::new(w.builtins().byte);
    let f_int = add_fn(&mut w, pkg, "f", int, &[int]);
    let f_nat = add_fn(&mut w, pkg, "f", int, &[nat]);

    let scope = Scope::with_default(pkg);
    let got = w.find_in(pkg, &SimplePart::with_param("f", int), &scope).unwrap();
    assert_eq!(got, Some(f_int));
    let got = w.find_in(pkg, &SimplePart::with_param("f", nat), &scope).unwrap();
    assert_eq!(got, Some(f_nat));

    // Byte -> Nat costs 1, Byte -> Int costs 2.
    let part = SimplePart::with_param("f", byte);
    let got = w.find_in(pkg, &part, &scope).unwrap();
    assert_eq!(got, Some(f_nat));
    assert!(part.badness(&w, f_nat) > 0);
    assert!(part.badness(&w, f_int) > part.badness(&w, f_nat));
}

/// A tie at the minimum badness is an ambiguity error naming every
/// candidate.
#[test]
fn ambiguous_overloads_are_an_error() {
    let mut w = World::bare();
    let pkg = w.new_package("test");
    let root = w.root();
    w.add_to(root, pkg).unwrap();

    let int = Value::new(w.builtins().int);
    let nat = Value::new(w.builtins().nat);
    let byte = Value::new(w.builtins().byte);
    add_fn(&mut w, pkg, "h", int, &[int, nat]);
    add_fn(&mut w, pkg, "h", int, &[nat, int]);

    let scope = Scope::with_default(pkg);
    let err = w
        .find_in(pkg, &SimplePart::with_params("h", [byte, byte]), &scope)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.msg.contains("ambiguous"), "unexpected message: {}", err.msg);
}

/// A loader driving the two-step protocol, counting its invocations.
#[derive(Debug)]
struct CountingLoader {
    name_calls: Rc<std::cell::Cell<u32>>,
    all_calls: Rc<std::cell::Cell<u32>>,
}

impl NameSetLoader for CountingLoader {
    fn load_name(&mut self, world: &mut World, set: EntityId, part: &SimplePart) -> CResult<bool> {
        self.name_calls.set(self.name_calls.get() + 1);
        if part.name == "lazy" {
            let f = world.new_function("lazy", Value::VOID, []);
            world.add_to(set, f)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn load_all(&mut self, world: &mut World, set: EntityId) -> CResult<()> {
        self.all_calls.set(self.all_calls.get() + 1);
        let f = world.new_function("eager", Value::VOID, []);
        world.add_to(set, f)?;
        Ok(())
    }
}

/// The lazy-load state machine: Unloaded -> PartiallyLoaded through a
/// single name, FullyLoaded through a full load, and FullyLoaded is
/// terminal.
#[test]
fn lazy_loading_runs_in_two_steps() {
    let mut w = World::bare();
    let name_calls = Rc::new(std::cell::Cell::new(0));
    let all_calls = Rc::new(std::cell::Cell::new(0));
    let pkg = w.new_package("test");
    let root = w.root();
    w.add_to(root, pkg).unwrap();
    w.name_set_mut(pkg).unwrap().loader = Some(Box::new(CountingLoader {
        name_calls: Rc::clone(&name_calls),
        all_calls: Rc::clone(&all_calls),
    }));

    let scope = Scope::with_default(pkg);
    assert_eq!(w.name_set(pkg).unwrap().state, LoadState::Unloaded);

    // Step 1 satisfies the lookup; no full load happens.
    let got = w.find_in(pkg, &SimplePart::new("lazy"), &scope).unwrap();
    assert!(got.is_some());
    assert_eq!(name_calls.get(), 1);
    assert_eq!(all_calls.get(), 0);
    assert_eq!(w.name_set(pkg).unwrap().state, LoadState::PartiallyLoaded);

    // A name step 1 can not provide escalates to the full load.
    let got = w.find_in(pkg, &SimplePart::new("eager"), &scope).unwrap();
    assert!(got.is_some());
    assert_eq!(all_calls.get(), 1);
    assert_eq!(w.name_set(pkg).unwrap().state, LoadState::FullyLoaded);

    // FullyLoaded is terminal: further misses never touch a loader.
    let got = w.find_in(pkg, &SimplePart::new("missing"), &scope).unwrap();
    assert!(got.is_none());
    assert_eq!(name_calls.get(), 2);
    assert_eq!(all_calls.get(), 1);
}

/// A loader that always fails with a user error.
#[derive(Debug)]
struct FailingLoader;

impl NameSetLoader for FailingLoader {
    fn load_all(&mut self, _world: &mut World, _set: EntityId) -> CResult<()> {
        Err(CompileError::new(ErrorKind::SyntaxError, "broken body"))
    }
}

/// A failed lazy load is recorded and replayed; only an explicit force
/// load retries.
#[test]
fn failed_loads_replay_until_forced() {
    let mut w = World::bare();
    let pkg = w.new_package("broken");
    let root = w.root();
    w.add_to(root, pkg).unwrap();
    w.name_set_mut(pkg).unwrap().loader = Some(Box::new(FailingLoader));

    let scope = Scope::with_default(pkg);
    let err = w.find_in(pkg, &SimplePart::new("x"), &scope).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);

    // The recorded error replays without invoking the loader again.
    let again = w.find_in(pkg, &SimplePart::new("y"), &scope).unwrap_err();
    assert_eq!(again, err);

    // An explicit force load retries (and fails the same way here).
    let forced = w.force_load(pkg).unwrap_err();
    assert_eq!(forced.kind, ErrorKind::SyntaxError);
}

/// Additions and removals notify watchers, including on fully loaded sets.
#[test]
fn watchers_are_notified_of_changes() {
    let mut w = World::bare();
    let pkg = w.new_package("test");
    let root = w.root();
    w.add_to(root, pkg).unwrap();
    let watcher = w.new_package("watcher");
    w.add_to(root, watcher).unwrap();
    w.watch_add(pkg, watcher).unwrap();
    w.force_load(pkg).unwrap();

    let f = w.new_function("f", Value::VOID, []);
    w.add_to(pkg, f).unwrap();
    let events = w.take_watch_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].watcher, watcher);
    assert_eq!(events[0].subject, f);
    assert!(events[0].added);

    w.remove_from(pkg, f).unwrap();
    let events = w.take_watch_events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].added);
}

/// Templates answer lookups no entity satisfies; instances are cached, and
/// the first registered template wins.
#[test]
fn templates_generate_and_cache_instances() {
    let mut w = World::bare();
    let pkg = w.new_package("test");
    let root = w.root();
    w.add_to(root, pkg).unwrap();

    let calls = Rc::new(std::cell::Cell::new(0u32));
    let calls_in = Rc::clone(&calls);
    w.add_template(
        pkg,
        Template {
            name: "Box".to_string(),
            generate: Rc::new(move |world, part| {
                calls_in.set(calls_in.get() + 1);
                if part.params.len() != 1 {
                    return Ok(None);
                }
                let ty = world.new_type(part.name.clone(), TypeFlags::CLASS)?;
                world.entity_mut(ty).params = part.params.clone();
                Ok(Some(ty))
            }),
        },
    )
    .unwrap();
    // A second template under the same name never runs for parts the
    // first one accepts.
    w.add_template(
        pkg,
        Template {
            name: "Box".to_string(),
            generate: Rc::new(|_, _| panic!("the first template wins")),
        },
    )
    .unwrap();

    let int = Value::new(w.builtins().int);
    let scope = Scope::with_default(pkg);
    let part = SimplePart::with_param("Box", int);
    let first = w.find_in(pkg, &part, &scope).unwrap().unwrap();
    let second = w.find_in(pkg, &part, &scope).unwrap().unwrap();
    assert_eq!(first, second, "instances are cached under the slot");
    assert_eq!(calls.get(), 1);
    assert_eq!(w.template_instances().len(), 1);
}

/// Lookup failing locally consults exported packages transitively, with
/// cycles broken.
#[test]
fn exports_are_searched_transitively_and_cycle_safe() {
    let mut w = World::bare();
    let root = w.root();
    let a = w.new_package("a");
    let b = w.new_package("b");
    let c = w.new_package("c");
    for pkg in [a, b, c] {
        w.add_to(root, pkg).unwrap();
    }
    // a -> b -> c, and a cycle back from c to a.
    w.add_export(a, b).unwrap();
    w.add_export(b, c).unwrap();
    w.add_export(c, a).unwrap();

    let f = w.new_function("deep", Value::VOID, []);
    w.add_to(c, f).unwrap();

    let scope = Scope::with_default(a);
    let got = w.find_in(a, &SimplePart::new("deep"), &scope).unwrap();
    assert_eq!(got, Some(f));

    let exports = w.recursive_exports(a);
    assert_eq!(exports.len(), 2, "a's own cycle entry is not an export of itself");
}

/// Anonymous names are unique per set and monotonic.
#[test]
fn anon_names_are_monotonic_per_set() {
    let mut w = World::bare();
    let pkg = w.new_package("test");
    let root = w.root();
    w.add_to(root, pkg).unwrap();
    let other = w.new_package("other");
    w.add_to(root, other).unwrap();

    let a = w.anon_name(pkg).unwrap();
    let b = w.anon_name(pkg).unwrap();
    let c = w.anon_name(other).unwrap();
    assert_ne!(a, b);
    assert_eq!(a, c, "each set owns its own counter");
}

/// Explicit adds keep working after the set is fully loaded.
#[test]
fn adds_work_after_full_load() {
    let mut w = World::bare();
    let pkg = w.new_package("test");
    let root = w.root();
    w.add_to(root, pkg).unwrap();
    w.force_load(pkg).unwrap();
    assert!(w.name_set(pkg).unwrap().all_loaded());

    let f = w.new_function("late", Value::VOID, []);
    w.add_to(pkg, f).unwrap();
    assert_eq!(w.find_name(pkg, "late"), vec![f]);
}

/// Entities remember their parent, and adding an owned entity elsewhere is
/// an error.
#[test]
fn parents_are_assigned_exactly_once() {
    let mut w = World::bare();
    let root = w.root();
    let a = w.new_package("a");
    let b = w.new_package("b");
    w.add_to(root, a).unwrap();
    w.add_to(root, b).unwrap();

    let f = w.new_function("f", Value::VOID, []);
    assert!(matches!(w.entity(f).kind, EntityKind::Function(FunctionData { .. })));
    w.add_to(a, f).unwrap();
    assert_eq!(w.entity(f).parent, Some(a));
    assert!(w.add_to(b, f).is_err());
}

/// The path of an entity reflects its position in the tree.
#[test]
fn paths_follow_the_tree() {
    let mut w = World::bare();
    let root = w.root();
    let outer = w.new_package("outer");
    w.add_to(root, outer).unwrap();
    let inner = w.new_package("inner");
    w.add_to(outer, inner).unwrap();
    let f = w.new_function("f", Value::VOID, []);
    w.add_to(inner, f).unwrap();
    assert_eq!(w.path_string(f), "outer.inner.f");

    let entity = Entity::new("loose", EntityKind::Package(storm::PackageData::virtual_pkg()));
    let loose = w.add_entity(entity);
    assert_eq!(w.path_string(loose), "loose");
}
