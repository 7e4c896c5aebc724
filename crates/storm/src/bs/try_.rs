//! Try/catch.
//!
//! The try block allocates a slot for the exception pointer in the block
//! *outside* the protected region, so catch handlers can enter their block
//! without clobbering anything live. Every catch type must derive from the
//! root exception type.

use crate::{
    bs::{
        block::Block,
        expr::{Expr, ExprRef, ExprResult},
    },
    codegen::{CodeGen, Instr},
    diag::{CResult, CompileError, SrcPos},
    entity::EntityId,
    scope::Scope,
    value::Value,
    world::World,
};

/// One catch handler: a type to catch, an optional variable, a body.
#[derive(Debug)]
pub struct CatchBlock {
    pub pos: SrcPos,
    pub ty: EntityId,
    pub block: Block,
    /// The handler variable bound to the caught exception, if named.
    pub var: Option<EntityId>,
    pub body: Option<ExprRef>,
}

impl CatchBlock {
    /// Creates a handler for `ty` inside `parent`. The type must derive
    /// from the root exception type.
    pub fn new(
        world: &mut World,
        pos: SrcPos,
        parent: &Scope,
        ty: EntityId,
        var_name: Option<&str>,
    ) -> CResult<Self> {
        let exception = world.builtins().exception;
        if !world.is_a(ty, exception) {
            return Err(CompileError::type_error(
                pos,
                format!(
                    "{} does not inherit from {}, it can not be caught",
                    world.path_string(ty),
                    world.path_string(exception)
                ),
            ));
        }
        let block = Block::new(world, pos.clone(), parent);
        let var = match var_name {
            Some(name) => Some(block.add_var(world, name, Value::new(ty), pos.clone())?),
            None => None,
        };
        Ok(Self {
            pos,
            ty,
            block,
            var,
            body: None,
        })
    }
}

/// The try block with its catch handlers.
#[derive(Debug)]
pub struct TryBlock {
    pub pos: SrcPos,
    pub block: Block,
    pub body: Option<ExprRef>,
    pub catches: Vec<CatchBlock>,
}

impl TryBlock {
    pub fn new(world: &mut World, pos: SrcPos, parent: &Scope) -> Self {
        Self {
            pos: pos.clone(),
            block: Block::new(world, pos, parent),
            body: None,
            catches: Vec::new(),
        }
    }

    pub fn add_catch(&mut self, catch: CatchBlock) {
        self.catches.push(catch);
    }
}

impl Expr for TryBlock {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    /// The common result of the protected body and every handler.
    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        let mut result = match &self.body {
            Some(body) => body.result(world)?,
            None => ExprResult::Value(Value::VOID),
        };
        for catch in &self.catches {
            let handler = match &catch.body {
                Some(body) => body.result(world)?,
                None => ExprResult::Value(Value::VOID),
            };
            result = result.common(world, handler);
        }
        Ok(result)
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        // The exception slot lives outside the protected block, so the
        // handlers can enter their blocks without touching live registers.
        let exc_slot = to.listing.var();
        to.listing.push(Instr::CreateVar {
            slot: exc_slot,
            ty: crate::typesys::ValType::pointer(),
        });

        let end = to.listing.label();
        to.enter_block();
        self.block.create_vars(world, to)?;
        if let Some(body) = &self.body {
            body.code(world, to)?;
        }
        to.leave_block();
        to.listing.push(Instr::Jump(end));

        for catch in &self.catches {
            to.listing.push(Instr::CatchBegin {
                ty: catch.ty,
                slot: exc_slot,
            });
            to.enter_block();
            catch.block.create_vars(world, to)?;
            if let Some(var) = catch.var {
                let slot = match &world.entity(var).kind {
                    crate::entity::EntityKind::LocalVar(data) => data.slot,
                    _ => None,
                };
                if let Some(slot) = slot {
                    to.listing.push(Instr::LoadLocal(exc_slot));
                    to.listing.push(Instr::StoreLocal(slot));
                    to.listing.push(Instr::Activate(slot));
                }
            }
            if let Some(body) = &catch.body {
                body.code(world, to)?;
            }
            to.leave_block();
            to.listing.push(Instr::CatchEnd);
            to.listing.push(Instr::Jump(end));
        }
        to.listing.push(Instr::Mark(end));
        Ok(())
    }
}

/// The throw expression.
#[derive(Debug)]
pub struct Throw {
    pub pos: SrcPos,
    pub expr: ExprRef,
}

impl Throw {
    pub fn new(world: &mut World, pos: SrcPos, expr: ExprRef) -> CResult<Self> {
        let value = expr.result(world)?.value();
        let exception = world.builtins().exception;
        let ok = value.ty.is_some_and(|ty| world.is_a(ty, exception));
        if !ok {
            return Err(CompileError::type_error(
                pos,
                format!("can not throw {}", value.describe(world)),
            ));
        }
        Ok(Self { pos, expr })
    }
}

impl Expr for Throw {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, _world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::NoReturn)
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        self.expr.code(world, to)?;
        to.listing.push(Instr::Throw);
        Ok(())
    }
}
