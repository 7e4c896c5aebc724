//! Blocks, local variables, and variable access.
//!
//! A block owns its variables and hooks into the name tree through a block
//! entity, so name lookup resolves locals before walking out into enclosing
//! scopes. Lifting variables from a child block is restricted to one
//! hierarchy level, which keeps scoping sound when the grammar produces
//! nested helper blocks.

use indexmap::IndexMap;

use crate::{
    bs::expr::{Expr, ExprRef, ExprResult},
    codegen::{CodeGen, Instr, VarSlot},
    diag::{CResult, CompileError, ErrorKind, SrcPos},
    entity::{Entity, EntityId, EntityKind},
    scope::Scope,
    value::Value,
    world::World,
};

/// Payload of a block entity in the name tree.
#[derive(Debug, Default)]
pub struct BlockData {
    /// Variables of this block, in declaration order.
    pub vars: IndexMap<String, EntityId>,
    /// May break/continue target this block?
    pub breakable: bool,
    /// A break targeting this block exists somewhere inside.
    pub will_break: bool,
    /// A continue targeting this block exists somewhere inside.
    pub will_continue: bool,
}

/// Payload of a local variable entity.
#[derive(Debug)]
pub struct LocalVarData {
    pub ty: Value,
    /// The slot assigned during code generation.
    pub slot: Option<VarSlot>,
}

/// A block: the scoping building piece of the frontend.
#[derive(Debug)]
pub struct Block {
    pub pos: SrcPos,
    /// The block's entity in the name tree.
    pub lookup: EntityId,
    /// The scope inside this block: rooted at `lookup`.
    pub scope: Scope,
}

impl Block {
    /// Creates a block nested inside `parent` (a scope whose `top` becomes
    /// the parent of the block's lookup entity).
    pub fn new(world: &mut World, pos: SrcPos, parent: &Scope) -> Self {
        let lookup = world.add_entity(Entity::new("", EntityKind::Block(BlockData::default())));
        world.entity_mut(lookup).parent = parent.top;
        world.entity_mut(lookup).pos = pos.clone();
        Self {
            pos,
            lookup,
            scope: parent.child(lookup),
        }
    }

    fn data<'w>(&self, world: &'w World) -> &'w BlockData {
        match &world.entity(self.lookup).kind {
            EntityKind::Block(data) => data,
            _ => unreachable!("a block lookup entity is always a block"),
        }
    }

    fn data_mut<'w>(&self, world: &'w mut World) -> &'w mut BlockData {
        match &mut world.entity_mut(self.lookup).kind {
            EntityKind::Block(data) => data,
            _ => unreachable!("a block lookup entity is always a block"),
        }
    }

    /// Declares a variable in this block. Redeclaration is an error.
    pub fn add_var(&self, world: &mut World, name: &str, ty: Value, pos: SrcPos) -> CResult<EntityId> {
        if self.data(world).vars.contains_key(name) {
            return Err(CompileError::at(
                ErrorKind::TypedefError,
                pos,
                format!("the variable {name} is already declared in this block"),
            ));
        }
        let var = world.add_entity(
            Entity::new(name, EntityKind::LocalVar(LocalVarData { ty, slot: None })).at(pos),
        );
        world.entity_mut(var).parent = Some(self.lookup);
        self.data_mut(world).vars.insert(name.to_string(), var);
        Ok(var)
    }

    /// The variable named `name` declared directly in this block.
    pub fn variable(&self, world: &World, name: &str) -> Option<EntityId> {
        self.data(world).vars.get(name).copied()
    }

    /// Takes all variables of `child` into this block. Restricted to a
    /// direct child, so lifting cannot smuggle a variable past an
    /// intermediate scope.
    pub fn lift_vars(&self, world: &mut World, child: &Block) -> CResult<()> {
        if world.entity(child.lookup).parent != Some(self.lookup) {
            return Err(CompileError::internal(
                "lift_vars is restricted to one hierarchy level",
            ));
        }
        let lifted = std::mem::take(&mut child.data_mut(world).vars);
        for (name, var) in lifted {
            if self.data(world).vars.contains_key(&name) {
                return Err(CompileError::at(
                    ErrorKind::TypedefError,
                    world.entity(var).pos.clone(),
                    format!("the variable {name} is already declared in the enclosing block"),
                ));
            }
            world.entity_mut(var).parent = Some(self.lookup);
            self.data_mut(world).vars.insert(name, var);
        }
        Ok(())
    }

    /// Marks this block as a break/continue target.
    pub fn mark_breakable(&self, world: &mut World) {
        self.data_mut(world).breakable = true;
    }

    /// Allocates code slots for the variables of this block.
    pub fn create_vars(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        let vars: Vec<EntityId> = self.data(world).vars.values().copied().collect();
        for var in vars {
            let slot = to.listing.var();
            let EntityKind::LocalVar(data) = &mut world.entity_mut(var).kind else {
                unreachable!("block vars are local variables");
            };
            data.slot = Some(slot);
            let ty = data.ty;
            to.listing.push(Instr::CreateVar {
                slot,
                ty: ty.val_type(world),
            });
        }
        Ok(())
    }
}

/// A block sequencing a list of expressions.
#[derive(Debug)]
pub struct ExprBlock {
    pub block: Block,
    exprs: Vec<ExprRef>,
}

impl ExprBlock {
    pub fn new(world: &mut World, pos: SrcPos, parent: &Scope) -> Self {
        Self {
            block: Block::new(world, pos, parent),
            exprs: Vec::new(),
        }
    }

    pub fn add(&mut self, expr: ExprRef) {
        self.exprs.push(expr);
    }

    pub fn exprs(&self) -> &[ExprRef] {
        &self.exprs
    }

    /// Index of the first expression after one that never returns, if any.
    fn unreachable_from(&self, world: &mut World) -> CResult<Option<usize>> {
        for (i, expr) in self.exprs.iter().enumerate() {
            if !expr.result(world)?.returns() && i + 1 < self.exprs.len() {
                return Ok(Some(i + 1));
            }
        }
        Ok(None)
    }
}

impl Expr for ExprBlock {
    fn pos(&self) -> &SrcPos {
        &self.block.pos
    }

    /// The result of the last expression; `NoReturn` as soon as any
    /// expression other than the last never returns.
    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        let Some(last) = self.exprs.last() else {
            return Ok(ExprResult::Value(Value::VOID));
        };
        for expr in &self.exprs[..self.exprs.len() - 1] {
            if !expr.result(world)?.returns() {
                return Ok(ExprResult::NoReturn);
            }
        }
        last.result(world)
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        to.enter_block();
        self.block.create_vars(world, to)?;
        for expr in &self.exprs {
            expr.code(world, to)?;
        }
        to.leave_block();
        Ok(())
    }

    fn cast_penalty(&self, world: &mut World, to: Value) -> CResult<i32> {
        match self.exprs.last() {
            Some(last) => last.cast_penalty(world, to),
            None => Ok(-1),
        }
    }

    fn describe(&self) -> String {
        let mut out = String::from("{\n");
        let mut no_return = false;
        for expr in &self.exprs {
            if no_return {
                out.push_str("    // unreachable code:\n");
            }
            out.push_str("    ");
            out.push_str(&expr.describe());
            out.push_str(";\n");
            // Conservative textual marker: anything after a terminator
            // statement is flagged.
            let text = expr.describe();
            if text.starts_with("return") || text.starts_with("break") || text.starts_with("continue") {
                no_return = true;
            }
        }
        out.push('}');
        out
    }
}

/// Reading a local variable.
#[derive(Debug)]
pub struct LocalVarAccess {
    pub pos: SrcPos,
    pub var: EntityId,
}

impl Expr for LocalVarAccess {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        let EntityKind::LocalVar(data) = &world.entity(self.var).kind else {
            return Err(CompileError::internal("local access to a non-local"));
        };
        // Locals are assignable, so the access yields a reference.
        Ok(ExprResult::Value(data.ty.as_ref(true)))
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        let EntityKind::LocalVar(data) = &world.entity(self.var).kind else {
            return Err(CompileError::internal("local access to a non-local"));
        };
        let slot = data
            .slot
            .ok_or_else(|| CompileError::internal("local variable used before its slot was created"))?;
        to.listing.push(Instr::LoadLocal(slot));
        Ok(())
    }

    fn emit_store(&self, world: &mut World, to: &mut CodeGen) -> CResult<bool> {
        let EntityKind::LocalVar(data) = &world.entity(self.var).kind else {
            return Err(CompileError::internal("local access to a non-local"));
        };
        let slot = data
            .slot
            .ok_or_else(|| CompileError::internal("local assigned before its slot was created"))?;
        to.listing.push(Instr::StoreLocal(slot));
        Ok(true)
    }

    fn describe(&self) -> String {
        "<local>".to_string()
    }
}

/// Reading a member variable of an evaluated object.
#[derive(Debug)]
pub struct MemberVarAccess {
    pub pos: SrcPos,
    pub target: ExprRef,
    pub member: EntityId,
}

impl Expr for MemberVarAccess {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        let EntityKind::MemberVar(data) = &world.entity(self.member).kind else {
            return Err(CompileError::internal("member access to a non-member"));
        };
        Ok(ExprResult::Value(data.ty.as_ref(true)))
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        self.target.code(world, to)?;
        let EntityKind::MemberVar(data) = &world.entity(self.member).kind else {
            return Err(CompileError::internal("member access to a non-member"));
        };
        let offset = data
            .offset
            .ok_or_else(|| CompileError::internal("member accessed before layout was finalised"))?;
        to.listing.push(Instr::LoadMember { offset });
        Ok(())
    }

    fn emit_store(&self, world: &mut World, to: &mut CodeGen) -> CResult<bool> {
        self.target.code(world, to)?;
        let EntityKind::MemberVar(data) = &world.entity(self.member).kind else {
            return Err(CompileError::internal("member access to a non-member"));
        };
        let offset = data
            .offset
            .ok_or_else(|| CompileError::internal("member assigned before layout was finalised"))?;
        to.listing.push(Instr::StoreMember { offset });
        Ok(true)
    }
}

/// Reading a global variable. Access from a thread other than the global's
/// owner copies the value.
#[derive(Debug)]
pub struct GlobalVarAccess {
    pub pos: SrcPos,
    pub var: EntityId,
}

impl Expr for GlobalVarAccess {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        let EntityKind::GlobalVar(data) = &world.entity(self.var).kind else {
            return Err(CompileError::internal("global access to a non-global"));
        };
        Ok(ExprResult::Value(data.ty))
    }

    fn code(&self, _world: &mut World, to: &mut CodeGen) -> CResult<()> {
        to.listing.push(Instr::LoadGlobal(self.var));
        Ok(())
    }
}

/// A variable declaration with an optional initializer.
#[derive(Debug)]
pub struct VarDecl {
    pub pos: SrcPos,
    pub var: EntityId,
    pub init: Option<ExprRef>,
}

impl VarDecl {
    /// Declares `name` in `block`, type-checking the initializer.
    pub fn new(
        world: &mut World,
        block: &Block,
        ty: Value,
        name: &str,
        init: Option<ExprRef>,
        pos: SrcPos,
    ) -> CResult<Self> {
        let init = match init {
            Some(expr) => Some(crate::bs::cast::expect_cast_to(world, expr, ty, &block.scope)?),
            None => None,
        };
        let var = block.add_var(world, name, ty, pos.clone())?;
        Ok(Self { pos, var, init })
    }
}

impl Expr for VarDecl {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        let EntityKind::LocalVar(data) = &world.entity(self.var).kind else {
            return Err(CompileError::internal("declared a non-local"));
        };
        Ok(ExprResult::Value(data.ty.as_ref(true)))
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        let EntityKind::LocalVar(data) = &world.entity(self.var).kind else {
            return Err(CompileError::internal("declared a non-local"));
        };
        let slot = data
            .slot
            .ok_or_else(|| CompileError::internal("variable declared outside its block"))?;
        if let Some(init) = &self.init {
            init.code(world, to)?;
            to.listing.push(Instr::StoreLocal(slot));
        }
        to.listing.push(Instr::Activate(slot));
        Ok(())
    }
}
