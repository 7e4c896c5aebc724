//! The representative frontend: blocks, conditions, casting, operators,
//! and whole files read through the pipeline.

use std::path::PathBuf;

use storm::{
    CodeGen, EntityId, ErrorKind, Instr, MatchFlags, RunOn, Scope, SimplePart, SrcPos, Value, World,
    bs::{
        Actuals, Constant, Expr, ExprBlock,
        block::Block,
        call::{FnCall, named_expr},
        cast::{cast_penalty, cast_to},
        cond::{If, create_condition},
        expr::ExprRef,
        fnptr::FnPtr,
        loops::Return,
        op::{OpInfo, prioritize},
    },
};

fn pos() -> SrcPos {
    SrcPos::unknown()
}

fn test_pkg(w: &mut World) -> EntityId {
    let pkg = w.new_package("test");
    let root = w.root();
    w.add_to(root, pkg).unwrap();
    pkg
}

fn call_names(w: &World, to: &CodeGen) -> Vec<String> {
    to.listing
        .instrs
        .iter()
        .filter_map(|i| match i {
            Instr::Call { func, .. } | Instr::PostCall { func, .. } => Some(w.entity(*func).name.clone()),
            _ => None,
        })
        .collect()
}

/// Inside `if (x)` where `x: Maybe<Str>`, `x` resolves to a fresh local of
/// the unwrapped type; outside, the outer maybe-typed variable is still
/// there.
#[test]
fn maybe_unwrap_narrows_inside_the_success_branch() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    let scope = Scope::with_default(pkg);
    let outer = ExprBlock::new(&mut w, pos(), &scope);

    let str_v = Value::new(w.builtins().str_);
    let maybe_ty = w.maybe_of(str_v).unwrap();
    outer.block.add_var(&mut w, "x", Value::new(maybe_ty), pos()).unwrap();

    let access = named_expr(&mut w, &outer.block, pos(), "x", Actuals::new()).unwrap();
    assert_eq!(access.result(&mut w).unwrap().value().ty, Some(maybe_ty));

    let cond = create_condition(&mut w, access, Some("x".to_string())).unwrap();
    let if_stmt = If::new(&mut w, pos(), &outer.block.scope, cond).unwrap();

    // In the success branch, `x` is the narrowed Str.
    let inner = named_expr(&mut w, &if_stmt.success.block, pos(), "x", Actuals::new()).unwrap();
    assert_eq!(inner.result(&mut w).unwrap().value().ty, Some(w.builtins().str_));

    // Outside, `x` is still the Maybe.
    let after = named_expr(&mut w, &outer.block, pos(), "x", Actuals::new()).unwrap();
    assert_eq!(after.result(&mut w).unwrap().value().ty, Some(maybe_ty));
}

/// A non-bool, non-maybe condition is a syntax error.
#[test]
fn bad_conditions_are_syntax_errors() {
    let mut w = World::bare();
    let expr: ExprRef = Box::new(Constant::int(pos(), 3));
    let err = create_condition(&mut w, expr, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

/// Casting is idempotent: casting an already-cast expression to the same
/// type is free and changes nothing.
#[test]
fn cast_to_is_idempotent() {
    let mut w = World::bare();
    let root = w.root();
    let scope = Scope::with_default(root);
    let nat = Value::new(w.builtins().nat);

    let literal: ExprRef = Box::new(Constant::int(pos(), 5));
    assert_eq!(
        cast_penalty(&mut w, &*literal, nat, MatchFlags::NONE, &scope).unwrap(),
        100,
        "a literal conversion costs 100 x its expression penalty"
    );

    let once = cast_to(&mut w, literal, nat, &scope).unwrap().unwrap();
    assert_eq!(once.result(&mut w).unwrap().value(), nat);
    assert_eq!(cast_penalty(&mut w, &*once, nat, MatchFlags::NONE, &scope).unwrap(), 0);

    let twice = cast_to(&mut w, once, nat, &scope).unwrap().unwrap();
    assert_eq!(twice.result(&mut w).unwrap().value(), nat);
    assert_eq!(cast_penalty(&mut w, &*twice, nat, MatchFlags::NONE, &scope).unwrap(), 0);
}

/// A literal that can not hold the target type does not cast.
#[test]
fn out_of_range_literals_do_not_cast() {
    let mut w = World::bare();
    let root = w.root();
    let scope = Scope::with_default(root);
    let byte = Value::new(w.builtins().byte);
    let fits: ExprRef = Box::new(Constant::int(pos(), 255));
    assert!(cast_to(&mut w, fits, byte, &scope).unwrap().is_some());
    let too_big: ExprRef = Box::new(Constant::int(pos(), 256));
    assert!(cast_to(&mut w, too_big, byte, &scope).unwrap().is_none());
}

/// `a + b * c` binds the multiplication tighter.
#[test]
fn prioritize_respects_priorities() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    let scope = Scope::with_default(pkg);
    let block = Block::new(&mut w, pos(), &scope);

    let operands: Vec<ExprRef> = vec![
        Box::new(Constant::int(pos(), 1)),
        Box::new(Constant::int(pos(), 2)),
        Box::new(Constant::int(pos(), 3)),
    ];
    let operators = vec![
        OpInfo::for_symbol("+", pos()).unwrap(),
        OpInfo::for_symbol("*", pos()).unwrap(),
    ];
    let expr = prioritize(&mut w, &block, operands, operators).unwrap();

    let mut to = CodeGen::new(RunOn::Any);
    expr.code(&mut w, &mut to).unwrap();
    assert_eq!(call_names(&w, &to), vec!["*", "+"], "the multiplication runs first");
}

/// Equal priorities group left for left-associative operators.
#[test]
fn prioritize_groups_left_on_equal_priorities() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    let scope = Scope::with_default(pkg);
    let block = Block::new(&mut w, pos(), &scope);

    let operands: Vec<ExprRef> = vec![
        Box::new(Constant::int(pos(), 1)),
        Box::new(Constant::int(pos(), 2)),
        Box::new(Constant::int(pos(), 3)),
    ];
    let operators = vec![
        OpInfo::for_symbol("-", pos()).unwrap(),
        OpInfo::for_symbol("-", pos()).unwrap(),
    ];
    let expr = prioritize(&mut w, &block, operands, operators).unwrap();

    let mut to = CodeGen::new(RunOn::Any);
    expr.code(&mut w, &mut to).unwrap();
    // ((1 - 2) - 3): the literal 3 is loaded after the first subtraction.
    let lits: Vec<&Instr> = to
        .listing
        .instrs
        .iter()
        .filter(|i| matches!(i, Instr::IntLit(_) | Instr::Call { .. }))
        .collect();
    assert!(matches!(lits[0], Instr::IntLit(1)));
    assert!(matches!(lits[1], Instr::IntLit(2)));
    assert!(matches!(lits[2], Instr::Call { .. }));
    assert!(matches!(lits[3], Instr::IntLit(3)));
    assert!(matches!(lits[4], Instr::Call { .. }));
}

/// `<=` is not declared for the built-ins; it rewrites to `!(b < a)`.
#[test]
fn missing_comparisons_rewrite_through_their_duals() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    let scope = Scope::with_default(pkg);
    let block = Block::new(&mut w, pos(), &scope);

    let operands: Vec<ExprRef> = vec![
        Box::new(Constant::int(pos(), 1)),
        Box::new(Constant::int(pos(), 2)),
    ];
    let operators = vec![OpInfo::for_symbol("<=", pos()).unwrap()];
    let expr = prioritize(&mut w, &block, operands, operators).unwrap();

    let mut to = CodeGen::new(RunOn::Any);
    expr.code(&mut w, &mut to).unwrap();
    assert_eq!(call_names(&w, &to), vec!["<"]);
    assert!(to.listing.instrs.contains(&Instr::Not), "the rewrite negates");
    // The operands swap: 2 < 1.
    let lits: Vec<i64> = to
        .listing
        .instrs
        .iter()
        .filter_map(|i| match i {
            Instr::IntLit(v) => Some(*v),
            _ => None,
        })
        .collect();
    assert_eq!(lits, vec![2, 1]);
}

/// A block whose non-final expression never returns yields no result, and
/// its printed form flags the unreachable code.
#[test]
fn unreachable_code_is_detected_and_marked() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    let scope = Scope::with_default(pkg);
    let mut block = ExprBlock::new(&mut w, pos(), &scope);
    block.add(Box::new(Return { pos: pos(), expr: None }));
    block.add(Box::new(Constant::int(pos(), 1)));

    let result = block.result(&mut w).unwrap();
    assert!(!result.returns());
    assert!(block.describe().contains("// unreachable code:"));
}

/// Variables lift only one hierarchy level.
#[test]
fn lift_vars_is_limited_to_one_level() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    let scope = Scope::with_default(pkg);
    let outer = Block::new(&mut w, pos(), &scope);
    let middle = Block::new(&mut w, pos(), &outer.scope);
    let inner = Block::new(&mut w, pos(), &middle.scope);
    let int = Value::new(w.builtins().int);
    inner.add_var(&mut w, "v", int, pos()).unwrap();

    assert!(outer.lift_vars(&mut w, &inner).is_err());
    middle.lift_vars(&mut w, &inner).unwrap();
    assert!(middle.variable(&w, "v").is_some());
    outer.lift_vars(&mut w, &middle).unwrap();
    assert!(outer.variable(&w, "v").is_some());
}

/// A function-pointer literal resolves its overload by the declared
/// parameter types and takes the matching Fn instance as its type.
#[test]
fn function_pointers_carry_the_fn_type() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    let int = Value::new(w.builtins().int);
    let func = w.new_function("add", int, [int, int]);
    w.add_to(pkg, func).unwrap();
    let other = w.new_function("add", int, []);
    w.add_to(pkg, other).unwrap();

    let scope = Scope::with_default(pkg);
    let block = Block::new(&mut w, pos(), &scope);
    let name = storm::SimpleName::from_parts(vec![SimplePart::with_params("add", [int, int])]);
    let ptr = FnPtr::resolve(&mut w, &block, pos(), &name).unwrap();
    assert_eq!(ptr.func, func, "the declared parameter types pick the overload");

    // The pointer is typed Fn(R, P...).
    let ty = ptr.result(&mut w).unwrap().value().ty.unwrap();
    let entity = w.entity(ty);
    assert_eq!(entity.name, "Fn");
    assert_eq!(entity.params.to_vec(), vec![int, int, int]);

    let mut to = CodeGen::new(RunOn::Any);
    ptr.code(&mut w, &mut to).unwrap();
    assert!(to.listing.instrs.contains(&Instr::FnRef(func)));

    // A second reference reuses the cached Fn instance.
    let again = FnPtr::resolve(&mut w, &block, pos(), &name).unwrap();
    assert_eq!(again.ty, ptr.ty);

    // Taking the address of something that is not a function is an error.
    let bad = storm::SimpleName::parse("Int").unwrap();
    let err = FnPtr::resolve(&mut w, &block, pos(), &bad).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

/// A call to a function bound to another thread becomes a posted call;
/// same-thread calls stay direct.
#[test]
fn cross_thread_calls_are_posted() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    let thread = w.new_named_thread("Other");
    w.add_to(pkg, thread).unwrap();

    let int = Value::new(w.builtins().int);
    let func = w.new_function("remote", int, [int]);
    if let storm::EntityKind::Function(data) = &mut w.entity_mut(func).kind {
        data.run_on = RunOn::Named(thread);
    }
    w.add_to(pkg, func).unwrap();

    let scope = Scope::with_default(pkg);
    let mut args = Actuals::new();
    args.push(Box::new(Constant::int(pos(), 1)));
    let call = FnCall::new(&mut w, pos(), func, args, &scope).unwrap();

    let mut to = CodeGen::new(RunOn::Any);
    call.code(&mut w, &mut to).unwrap();
    assert!(to.listing.instrs.iter().any(|i| matches!(i, Instr::PostCall { .. })));

    let mut to = CodeGen::new(RunOn::Named(thread));
    call.code(&mut w, &mut to).unwrap();
    assert!(to.listing.instrs.iter().any(|i| matches!(i, Instr::Call { .. })));
    assert!(!to.listing.instrs.iter().any(|i| matches!(i, Instr::PostCall { .. })));
}

// ---------------------------------------------------------------------
// Whole files through the pipeline
// ---------------------------------------------------------------------

struct TempTree {
    root: PathBuf,
}

impl TempTree {
    fn new(name: &str, files: &[(&str, &str)]) -> Self {
        let root = std::env::temp_dir().join(format!("storm-test-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        for (rel, contents) in files {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        Self { root }
    }
}

impl Drop for TempTree {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

/// A package of .bs files compiles: functions and classes appear in the
/// tree, bodies generate code, and use-declarations resolve across
/// packages.
#[test]
fn bs_package_compiles_end_to_end() {
    let tree = TempTree::new(
        "e2e",
        &[
            (
                "demo/main.bs",
                r#"
use other;

Int add(Int a, Int b) {
    return a + b;
}

Int compute() {
    Int x = add(1, 2);
    if (x < 10) {
        x = x + helper();
    }
    return x;
}

void pointers() {
    &add(Int, Int);
}

class Point {
    Int x;
    Int y;
}
"#,
            ),
            (
                "other/util.bs",
                r#"
Int helper() {
    return 7;
}
"#,
            ),
        ],
    );

    let mut w = World::new(Some(tree.root.clone()), Box::new(storm::NoopTracer)).unwrap();
    let demo = w
        .find_root(&storm::SimpleName::parse("demo").unwrap())
        .unwrap()
        .expect("the demo package exists");
    w.compile(demo).unwrap();
    assert!(w.diags.is_empty(), "unexpected diagnostics: {:?}", w.diags.errors());

    // Functions exist and have generated bodies.
    let scope = Scope::with_default(demo);
    let int = Value::new(w.builtins().int);
    let compute = w
        .find_in(demo, &SimplePart::new("compute"), &scope)
        .unwrap()
        .expect("compute exists");
    if let storm::EntityKind::Function(data) = &w.entity(compute).kind {
        assert!(matches!(data.code, storm::CodeRef::Generated(_)));
        assert_eq!(data.result, int);
    } else {
        panic!("compute is not a function");
    }

    // The function-pointer literal instantiated Fn(Int, Int, Int).
    assert!(
        w.template_instances().iter().any(|t| t.part.name == "Fn"),
        "taking &add produced a Fn instance"
    );

    // The class loads its members on demand.
    let point = w
        .find_in(demo, &SimplePart::new("Point"), &scope)
        .unwrap()
        .expect("Point exists");
    let member = w.find_in(point, &SimplePart::new("x"), &scope).unwrap();
    assert!(member.is_some());
    let size = w.finalize_layout(point).unwrap();
    assert!(size.bytes >= 24, "two ints after the object header");
}

/// One broken class does not poison its package: the valid class loads,
/// and the broken one reports the same recorded error at every use site.
#[test]
fn broken_class_bodies_surface_at_their_use_sites() {
    let tree = TempTree::new(
        "broken",
        &[(
            "bad/code.bs",
            r#"
class A {
    Int x;
    Int broken(
}

class B {
    Int ok;
}
"#,
        )],
    );

    let mut w = World::new(Some(tree.root.clone()), Box::new(storm::NoopTracer)).unwrap();
    let bad = w
        .find_root(&storm::SimpleName::parse("bad").unwrap())
        .unwrap()
        .expect("the bad package exists");

    let scope = Scope::with_default(bad);
    // B is intact: it resolves and its members load.
    let b = w.find_in(bad, &SimplePart::new("B"), &scope).unwrap().expect("B loads");
    let ok = w.find_in(b, &SimplePart::new("ok"), &scope).unwrap();
    assert!(ok.is_some());

    // A resolves as an entity, but looking inside it surfaces the recorded
    // syntax error, not an internal one.
    let a = w.find_in(bad, &SimplePart::new("A"), &scope).unwrap().expect("A exists");
    let err = w.find_in(a, &SimplePart::new("x"), &scope).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    let again = w.find_in(a, &SimplePart::new("x"), &scope).unwrap_err();
    assert_eq!(again, err, "the same error replays at every use site");
}
