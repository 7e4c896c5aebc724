//! Conditions: the unifying abstraction over boolean tests and weak casts.
//!
//! `if` and the loops all accept a [`Condition`]: either a regular boolean
//! expression, or a weak cast (`as`, or unwrapping a `Maybe`). A successful
//! weak cast introduces a new variable in the success block, shadowing the
//! tested variable with its narrowed type.

use crate::{
    bs::{
        block::Block,
        cast::expect_cast_to,
        expr::{Expr, ExprRef, ExprResult},
    },
    codegen::{CodeGen, Instr},
    diag::{CResult, CompileError, SrcPos},
    entity::EntityId,
    scope::Scope,
    value::Value,
    world::World,
};

/// How a weak cast narrows its operand.
#[derive(Debug)]
pub enum WeakKind {
    /// Unwraps `Maybe<T>` to `T`.
    MaybeUnwrap,
    /// Downcasts to a more derived type (`x as T`).
    Downcast,
}

/// A weak cast used as a condition.
#[derive(Debug)]
pub struct WeakCast {
    pub pos: SrcPos,
    pub expr: ExprRef,
    /// Name for the narrowed variable; usually the tested variable's name.
    pub var_name: Option<String>,
    pub kind: WeakKind,
    /// The narrowed type a success produces.
    pub result_ty: Value,
}

/// A condition: a regular boolean expression or a weak cast.
#[derive(Debug)]
pub enum Condition {
    Bool { pos: SrcPos, expr: ExprRef },
    Weak(WeakCast),
}

impl Condition {
    pub fn pos(&self) -> &SrcPos {
        match self {
            Self::Bool { pos, .. } => pos,
            Self::Weak(weak) => &weak.pos,
        }
    }

    /// The variable a successful condition introduces, if any.
    pub fn result_ty(&self) -> Option<(&str, Value)> {
        match self {
            Self::Bool { .. } => None,
            Self::Weak(weak) => weak
                .var_name
                .as_deref()
                .map(|name| (name, weak.result_ty)),
        }
    }

    /// Emits the evaluation of the condition, leaving a boolean for the
    /// branch. For weak casts, the narrowed value is stored into `var`.
    pub fn code(&self, world: &mut World, to: &mut CodeGen, var: Option<EntityId>) -> CResult<()> {
        match self {
            Self::Bool { expr, .. } => expr.code(world, to),
            Self::Weak(weak) => {
                weak.expr.code(world, to)?;
                if let Some(var) = var {
                    let slot = match &world.entity(var).kind {
                        crate::entity::EntityKind::LocalVar(data) => data.slot,
                        _ => None,
                    };
                    if let Some(slot) = slot {
                        to.listing.push(Instr::StoreLocal(slot));
                        to.listing.push(Instr::Activate(slot));
                        to.listing.push(Instr::LoadLocal(slot));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Picks a condition for `expr`: a boolean test for `Bool`, a weak unwrap
/// for `Maybe<T>`, and a syntax error for everything else. `name_hint` is
/// the variable name a weak condition re-introduces (the tested variable).
pub fn create_condition(world: &mut World, expr: ExprRef, name_hint: Option<String>) -> CResult<Condition> {
    let result = expr.result(world)?.value();
    let pos = expr.pos().clone();
    let Some(ty) = result.ty else {
        return Err(CompileError::syntax(pos, "the condition does not produce a value"));
    };
    if ty == world.builtins().bool_ {
        return Ok(Condition::Bool { pos, expr });
    }
    let entity = world.entity(ty);
    if entity.name == "Maybe" && entity.params.len() == 1 {
        let result_ty = entity.params[0];
        return Ok(Condition::Weak(WeakCast {
            pos,
            expr,
            var_name: name_hint,
            kind: WeakKind::MaybeUnwrap,
            result_ty,
        }));
    }
    Err(CompileError::syntax(
        pos,
        format!("{} is not usable as a condition", result.describe(world)),
    ))
}

/// Creates a downcast condition: `expr as to`.
pub fn create_downcast(world: &mut World, expr: ExprRef, to: Value, name_hint: Option<String>) -> CResult<Condition> {
    let from = expr.result(world)?.value();
    let pos = expr.pos().clone();
    let (Some(from_ty), Some(to_ty)) = (from.ty, to.ty) else {
        return Err(CompileError::syntax(pos, "as requires a typed operand and target"));
    };
    // A downcast only makes sense towards a more derived type.
    if !world.is_a(to_ty, from_ty) {
        return Err(CompileError::type_error(
            pos,
            format!(
                "{} is not derived from {}, the cast can never succeed",
                to.describe(world),
                from.describe(world)
            ),
        ));
    }
    Ok(Condition::Weak(WeakCast {
        pos,
        expr,
        var_name: name_hint,
        kind: WeakKind::Downcast,
        result_ty: to,
    }))
}

/// The block encapsulating the variable created by a successful weak cast.
#[derive(Debug)]
pub struct CondSuccess {
    pub block: Block,
    /// The variable introduced by the condition, if any.
    pub created: Option<EntityId>,
    expr: Option<ExprRef>,
}

impl CondSuccess {
    /// Creates the success block of `cond` inside `parent`. The narrowed
    /// variable, if any, is declared here so it shadows the tested one.
    pub fn new(world: &mut World, pos: SrcPos, parent: &Scope, cond: &Condition) -> CResult<Self> {
        let block = Block::new(world, pos.clone(), parent);
        let created = match cond.result_ty() {
            Some((name, ty)) => Some(block.add_var(world, name, ty, pos)?),
            None => None,
        };
        Ok(Self {
            block,
            created,
            expr: None,
        })
    }

    /// Sets the single contained expression. Using it twice is an internal
    /// error.
    pub fn set(&mut self, expr: ExprRef) -> CResult<()> {
        if self.expr.is_some() {
            return Err(CompileError::internal("the success branch is already set"));
        }
        self.expr = Some(expr);
        Ok(())
    }

    /// Sets or replaces the contained expression.
    pub fn replace(&mut self, expr: ExprRef) {
        self.expr = Some(expr);
    }
}

impl Expr for CondSuccess {
    fn pos(&self) -> &SrcPos {
        &self.block.pos
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        match &self.expr {
            Some(expr) => expr.result(world),
            None => Ok(ExprResult::Value(Value::VOID)),
        }
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        to.enter_block();
        self.block.create_vars(world, to)?;
        if let Some(expr) = &self.expr {
            expr.code(world, to)?;
        }
        to.leave_block();
        Ok(())
    }

    fn cast_penalty(&self, world: &mut World, to: Value) -> CResult<i32> {
        match &self.expr {
            Some(expr) => expr.cast_penalty(world, to),
            None => Ok(-1),
        }
    }
}

/// The if-statement, built on a condition.
#[derive(Debug)]
pub struct If {
    pub pos: SrcPos,
    pub cond: Condition,
    pub success: CondSuccess,
    pub fail: Option<ExprRef>,
}

impl If {
    pub fn new(world: &mut World, pos: SrcPos, parent: &Scope, cond: Condition) -> CResult<Self> {
        let success = CondSuccess::new(world, pos.clone(), parent, &cond)?;
        Ok(Self {
            pos,
            cond,
            success,
            fail: None,
        })
    }
}

impl Expr for If {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    /// With an else branch, the common type of both branches; without one,
    /// void.
    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        match &self.fail {
            Some(fail) => {
                let a = self.success.result(world)?;
                let b = fail.result(world)?;
                Ok(a.common(world, b))
            }
            None => Ok(ExprResult::Value(Value::VOID)),
        }
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        let else_label = to.listing.label();
        let end_label = to.listing.label();
        self.cond.code(world, to, self.success.created)?;
        to.listing.push(Instr::JumpIfFalse(else_label));
        self.success.code(world, to)?;
        to.listing.push(Instr::Jump(end_label));
        to.listing.push(Instr::Mark(else_label));
        if let Some(fail) = &self.fail {
            fail.code(world, to)?;
        }
        to.listing.push(Instr::Mark(end_label));
        Ok(())
    }
}

/// An `unless` statement: the inverse of `if` for weak casts. The body
/// must not return, and the narrowed variable is visible in the code that
/// follows.
#[derive(Debug)]
pub struct Unless {
    pub pos: SrcPos,
    pub cond: Condition,
    pub fail: ExprRef,
    pub rest: CondSuccess,
}

impl Unless {
    pub fn new(world: &mut World, pos: SrcPos, parent: &Scope, cond: Condition, fail: ExprRef) -> CResult<Self> {
        let result = fail.result(world)?;
        if result.returns() {
            return Err(CompileError::syntax(
                fail.pos().clone(),
                "the unless branch must not fall through",
            ));
        }
        let rest = CondSuccess::new(world, pos.clone(), parent, &cond)?;
        Ok(Self {
            pos,
            cond,
            fail,
            rest,
        })
    }
}

impl Expr for Unless {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        self.rest.result(world)
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        let ok_label = to.listing.label();
        self.cond.code(world, to, self.rest.created)?;
        to.listing.push(Instr::JumpIfFalse(ok_label));
        // Condition held: skip the failure branch entirely.
        let end_label = to.listing.label();
        to.listing.push(Instr::Jump(end_label));
        to.listing.push(Instr::Mark(ok_label));
        self.fail.code(world, to)?;
        to.listing.push(Instr::Mark(end_label));
        self.rest.code(world, to)
    }
}

/// Ensures `expr` evaluates to a plain boolean, casting if needed.
pub fn expect_bool(world: &mut World, expr: ExprRef, scope: &Scope) -> CResult<ExprRef> {
    let bool_ty = Value::new(world.builtins().bool_);
    expect_cast_to(world, expr, bool_ty, scope)
}
