//! Automatic casting.
//!
//! The casting rules are restrictive: a cast is free when the target can
//! already store the source, costs `100 ×` the expression-level penalty for
//! literal stretching, and costs `1000` when it goes through a constructor
//! marked as an automatic cast. Anything else is impossible. The penalties
//! feed overload resolution, and `cast_to` materialises the chosen
//! conversion so casting an already-cast expression is free.

use crate::{
    bs::expr::{Expr, ExprRef, ExprResult},
    codegen::CodeGen,
    diag::{CResult, CompileError, SrcPos},
    entity::{EntityId, EntityKind},
    name::SimplePart,
    scope::Scope,
    typesys::FnFlags,
    value::{MatchFlags, Value},
    world::World,
};

/// Penalty of casting `from` to `to` without any conversions: 0 when
/// directly storable, -1 otherwise. A `NoReturn` source casts to anything.
pub fn plain_cast_penalty(world: &World, from: ExprResult, to: Value, flags: MatchFlags) -> i32 {
    match from {
        ExprResult::NoReturn => 0,
        ExprResult::Value(v) => {
            if to.matches(world, v, flags) {
                0
            } else {
                -1
            }
        }
    }
}

/// The full cast penalty of `expr` towards `to`: 0 when assignable, `100 ×`
/// the expression-level penalty, 1000 through an auto-cast constructor, -1
/// when impossible.
pub fn cast_penalty(world: &mut World, expr: &dyn Expr, to: Value, flags: MatchFlags, scope: &Scope) -> CResult<i32> {
    let from = expr.result(world)?;
    let plain = plain_cast_penalty(world, from, to, flags);
    if plain >= 0 {
        return Ok(plain);
    }
    let expr_level = expr.cast_penalty(world, to)?;
    if expr_level >= 0 {
        return Ok(100 * expr_level);
    }
    if find_auto_cast_ctor(world, from.value(), to, scope)?.is_some() {
        return Ok(1000);
    }
    Ok(-1)
}

/// Is `expr` castable to `to` at all?
pub fn castable(world: &mut World, expr: &dyn Expr, to: Value, scope: &Scope) -> CResult<bool> {
    Ok(cast_penalty(world, expr, to, MatchFlags::NONE, scope)? >= 0)
}

/// Finds a constructor of `to` taking exactly `from` that is marked as an
/// automatic cast.
fn find_auto_cast_ctor(world: &mut World, from: Value, to: Value, scope: &Scope) -> CResult<Option<EntityId>> {
    let Some(to_ty) = to.ty else { return Ok(None) };
    if from.is_void() {
        return Ok(None);
    }
    let this = crate::value::this_ptr(world, to_ty);
    let part = SimplePart::with_params("__init", [this, from]);
    let Some(ctor) = world.find_in(to_ty, &part, scope)? else {
        return Ok(None);
    };
    let EntityKind::Function(data) = &world.entity(ctor).kind else {
        return Ok(None);
    };
    if data.flags.contains(FnFlags::AUTO_CAST) {
        Ok(Some(ctor))
    } else {
        Ok(None)
    }
}

/// An expression converted through an auto-cast constructor.
#[derive(Debug)]
pub struct CtorCast {
    pub pos: SrcPos,
    pub ctor: EntityId,
    pub to: Value,
    pub expr: ExprRef,
}

impl Expr for CtorCast {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, _world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::Value(self.to))
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        self.expr.code(world, to)?;
        to.listing.push(crate::codegen::Instr::Call {
            func: self.ctor,
            params: 1,
        });
        Ok(())
    }
}

/// Materialises the cast of `expr` to `to`, or returns `None` when it is
/// impossible. Casting the result again to the same type is the identity.
pub fn cast_to(world: &mut World, expr: ExprRef, to: Value, scope: &Scope) -> CResult<Option<ExprRef>> {
    let from = expr.result(world)?;
    if plain_cast_penalty(world, from, to, MatchFlags::NONE) >= 0 {
        return Ok(Some(expr));
    }
    if expr.cast_penalty(world, to)? >= 0 {
        // Literal-level conversion: the expression itself produces the
        // target type, no wrapper needed.
        return Ok(Some(Box::new(Retyped { expr, to })));
    }
    if let Some(ctor) = find_auto_cast_ctor(world, from.value(), to, scope)? {
        let pos = expr.pos().clone();
        return Ok(Some(Box::new(CtorCast {
            pos,
            ctor,
            to,
            expr,
        })));
    }
    Ok(None)
}

/// As `cast_to`, but a failed cast is a type error at the expression.
pub fn expect_cast_to(world: &mut World, expr: ExprRef, to: Value, scope: &Scope) -> CResult<ExprRef> {
    let from = expr.result(world)?.value().describe(world);
    let pos = expr.pos().clone();
    match cast_to(world, expr, to, scope)? {
        Some(done) => Ok(done),
        None => Err(CompileError::type_error(
            pos,
            format!("can not convert {from} to {}", to.describe(world)),
        )),
    }
}

/// An expression whose literal was re-typed to the target type.
#[derive(Debug)]
struct Retyped {
    expr: ExprRef,
    to: Value,
}

impl Expr for Retyped {
    fn pos(&self) -> &SrcPos {
        self.expr.pos()
    }

    fn result(&self, _world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::Value(self.to))
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        self.expr.code(world, to)
    }

    fn describe(&self) -> String {
        self.expr.describe()
    }
}

/// The lowest common type both expressions can be cast to.
pub fn common_type(world: &mut World, a: &dyn Expr, b: &dyn Expr, scope: &Scope) -> CResult<ExprResult> {
    let ra = a.result(world)?;
    let rb = b.result(world)?;
    let merged = ra.common(world, rb);
    if merged.value().is_void() && ra.returns() && rb.returns() {
        // Unrelated static types can still meet through casts.
        if castable(world, a, rb.value(), scope)? {
            return Ok(rb);
        }
        if castable(world, b, ra.value(), scope)? {
            return Ok(ra);
        }
    }
    Ok(merged)
}
