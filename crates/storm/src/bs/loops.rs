//! Loops, and the break/continue machinery.
//!
//! Loop bodies are breakable blocks. A `break` or `continue` resolves up
//! the block lookup chain to the nearest breakable block and registers its
//! intent there, so the loop knows whether to allocate its jump labels.
//! During code generation the current loop's labels are kept on a stack in
//! the generator state.

use crate::{
    bs::{
        block::{Block, BlockData},
        cond::Condition,
        expr::{Expr, ExprRef, ExprResult},
    },
    codegen::{CodeGen, Instr, Label},
    diag::{CResult, CompileError, ErrorKind, SrcPos},
    entity::{EntityId, EntityKind},
    scope::Scope,
    value::Value,
    world::World,
};

/// Jump targets of the innermost loop during code generation.
#[derive(Debug, Clone, Copy)]
pub struct LoopLabels {
    pub break_to: Label,
    pub continue_to: Label,
}

thread_local! {
    /// Label stack of loops currently generating code. Kept per thread so
    /// independent compilations never observe each other.
    static LOOP_STACK: std::cell::RefCell<Vec<LoopLabels>> = const { std::cell::RefCell::new(Vec::new()) };
}

fn push_loop(labels: LoopLabels) {
    LOOP_STACK.with_borrow_mut(|s| s.push(labels));
}

fn pop_loop() {
    LOOP_STACK.with_borrow_mut(|s| {
        s.pop();
    });
}

fn current_loop() -> Option<LoopLabels> {
    LOOP_STACK.with_borrow(|s| s.last().copied())
}

/// Finds the nearest breakable block walking `parent` pointers from
/// `from`, registering the intent.
fn nearest_breakable(world: &mut World, from: EntityId, will_break: bool) -> CResult<EntityId> {
    let mut cur = Some(from);
    while let Some(id) = cur {
        let entity = world.entity(id);
        let parent = entity.parent;
        if let EntityKind::Block(data) = &entity.kind {
            if data.breakable {
                let EntityKind::Block(data) = &mut world.entity_mut(id).kind else {
                    unreachable!("kind checked above");
                };
                if will_break {
                    data.will_break = true;
                } else {
                    data.will_continue = true;
                }
                return Ok(id);
            }
        }
        cur = parent;
    }
    Err(CompileError::new(
        ErrorKind::SyntaxError,
        "break or continue outside of a loop",
    ))
}

/// The while / do-while loop.
///
/// `do { body } while (cond);` evaluates the body before the condition;
/// `while (cond) { body }` is the same loop with the condition up front.
#[derive(Debug)]
pub struct Loop {
    pub pos: SrcPos,
    pub block: Block,
    pub cond: Option<Condition>,
    pub body: Option<ExprRef>,
    /// Evaluate the body once before the first condition check.
    pub do_first: bool,
}

impl Loop {
    pub fn new(world: &mut World, pos: SrcPos, parent: &Scope) -> Self {
        let block = Block::new(world, pos.clone(), parent);
        block.mark_breakable(world);
        Self {
            pos,
            block,
            cond: None,
            body: None,
            do_first: false,
        }
    }

    fn flags(&self, world: &World) -> (bool, bool) {
        match &world.entity(self.block.lookup).kind {
            EntityKind::Block(BlockData {
                will_break,
                will_continue,
                ..
            }) => (*will_break, *will_continue),
            _ => (false, false),
        }
    }
}

impl Expr for Loop {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    /// An infinite loop without breaks never returns; anything else is
    /// void.
    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        let (will_break, _) = self.flags(world);
        if self.cond.is_none() && !will_break {
            Ok(ExprResult::NoReturn)
        } else {
            Ok(ExprResult::Value(Value::VOID))
        }
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        let start = to.listing.label();
        let check = to.listing.label();
        let end = to.listing.label();
        push_loop(LoopLabels {
            break_to: end,
            continue_to: check,
        });

        to.enter_block();
        self.block.create_vars(world, to)?;
        if !self.do_first {
            to.listing.push(Instr::Jump(check));
        }
        to.listing.push(Instr::Mark(start));
        if let Some(body) = &self.body {
            body.code(world, to)?;
        }
        to.listing.push(Instr::Mark(check));
        match &self.cond {
            Some(cond) => {
                cond.code(world, to, None)?;
                to.listing.push(Instr::JumpIfFalse(end));
                to.listing.push(Instr::Jump(start));
            }
            None => to.listing.push(Instr::Jump(start)),
        }
        to.listing.push(Instr::Mark(end));
        to.leave_block();

        pop_loop();
        Ok(())
    }
}

/// The C-style for loop: `for (init; cond; update) body`.
#[derive(Debug)]
pub struct For {
    pub pos: SrcPos,
    pub block: Block,
    pub init: Option<ExprRef>,
    pub cond: Option<ExprRef>,
    pub update: Option<ExprRef>,
    pub body: Option<ExprRef>,
}

impl For {
    pub fn new(world: &mut World, pos: SrcPos, parent: &Scope) -> Self {
        let block = Block::new(world, pos.clone(), parent);
        block.mark_breakable(world);
        Self {
            pos,
            block,
            init: None,
            cond: None,
            update: None,
            body: None,
        }
    }
}

impl Expr for For {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        let start = to.listing.label();
        let update_label = to.listing.label();
        let end = to.listing.label();
        push_loop(LoopLabels {
            break_to: end,
            continue_to: update_label,
        });

        to.enter_block();
        self.block.create_vars(world, to)?;
        if let Some(init) = &self.init {
            init.code(world, to)?;
        }
        to.listing.push(Instr::Mark(start));
        if let Some(cond) = &self.cond {
            cond.code(world, to)?;
            to.listing.push(Instr::JumpIfFalse(end));
        }
        if let Some(body) = &self.body {
            body.code(world, to)?;
        }
        to.listing.push(Instr::Mark(update_label));
        if let Some(update) = &self.update {
            update.code(world, to)?;
        }
        to.listing.push(Instr::Jump(start));
        to.listing.push(Instr::Mark(end));
        to.leave_block();

        pop_loop();
        Ok(())
    }
}

/// The break expression.
#[derive(Debug)]
pub struct Break {
    pub pos: SrcPos,
    /// The breakable block being left.
    pub target: EntityId,
}

impl Break {
    /// Creates a break inside `block`, resolving and notifying the nearest
    /// breakable ancestor.
    pub fn new(world: &mut World, pos: SrcPos, block: &Block) -> CResult<Self> {
        let target = nearest_breakable(world, block.lookup, true)?;
        Ok(Self { pos, target })
    }
}

impl Expr for Break {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, _world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::NoReturn)
    }

    fn code(&self, _world: &mut World, to: &mut CodeGen) -> CResult<()> {
        let labels = current_loop().ok_or_else(|| CompileError::internal("break generated outside a loop"))?;
        to.listing.push(Instr::Jump(labels.break_to));
        Ok(())
    }

    fn describe(&self) -> String {
        "break".to_string()
    }
}

/// The continue expression.
#[derive(Debug)]
pub struct Continue {
    pub pos: SrcPos,
    pub target: EntityId,
}

impl Continue {
    pub fn new(world: &mut World, pos: SrcPos, block: &Block) -> CResult<Self> {
        let target = nearest_breakable(world, block.lookup, false)?;
        Ok(Self { pos, target })
    }
}

impl Expr for Continue {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, _world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::NoReturn)
    }

    fn code(&self, _world: &mut World, to: &mut CodeGen) -> CResult<()> {
        let labels = current_loop().ok_or_else(|| CompileError::internal("continue generated outside a loop"))?;
        to.listing.push(Instr::Jump(labels.continue_to));
        Ok(())
    }

    fn describe(&self) -> String {
        "continue".to_string()
    }
}

/// The return expression.
#[derive(Debug)]
pub struct Return {
    pub pos: SrcPos,
    pub expr: Option<ExprRef>,
}

impl Expr for Return {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, _world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::NoReturn)
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        if let Some(expr) = &self.expr {
            expr.code(world, to)?;
        }
        to.listing.push(Instr::Return);
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.expr {
            Some(expr) => format!("return {}", expr.describe()),
            None => "return".to_string(),
        }
    }
}
