//! Operators: flat parses reshaped by precedence, and the specialised
//! operator kinds.
//!
//! The grammar parses operator chains flat (`a + b * c` arrives as a list
//! of operands and operators); [`prioritize`] reshapes the chain using
//! operator priorities and associativity, with right-associative operators
//! grouping right on equal priorities. Assignment, `is`/`is not`, compound
//! assignment, and the comparison family with fallbacks are specialised
//! kinds rather than ordinary calls.

use crate::{
    bs::{
        block::Block,
        call::FnCall,
        cast::expect_cast_to,
        expr::{Actuals, Expr, ExprRef, ExprResult},
    },
    codegen::{CodeGen, Instr},
    diag::{CResult, CompileError, SrcPos},
    entity::EntityKind,
    name::SimplePart,
    value::Value,
    world::World,
};

/// What kind of operator this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Resolves to a function named like the operator.
    Ordinary,
    /// `=`.
    Assign,
    /// Object identity.
    Is,
    /// Negated object identity.
    IsNot,
    /// `+=` and friends: `lhs = lhs op rhs`.
    Compound(String),
    /// A comparison that may fall back to a rewrite when not declared:
    /// `a <= b` becomes `!(b < a)`, `a != b` becomes `!(a == b)`.
    Compare {
        /// The operator to rewrite through, if the declared form is
        /// missing.
        fallback: Option<&'static str>,
        /// Swap the operands in the rewrite.
        swap: bool,
    },
}

/// Parse-level description of an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpInfo {
    pub name: String,
    pub priority: i32,
    pub left_assoc: bool,
    pub kind: OpKind,
    pub pos: SrcPos,
}

impl OpInfo {
    pub fn new(name: impl Into<String>, priority: i32, left_assoc: bool, pos: SrcPos) -> Self {
        Self {
            name: name.into(),
            priority,
            left_assoc,
            kind: OpKind::Ordinary,
            pos,
        }
    }

    /// The standard operator table of the language.
    pub fn for_symbol(symbol: &str, pos: SrcPos) -> Option<Self> {
        let (priority, left, kind) = match symbol {
            "=" => (10, false, OpKind::Assign),
            "+=" => (10, false, OpKind::Compound("+".into())),
            "-=" => (10, false, OpKind::Compound("-".into())),
            "*=" => (10, false, OpKind::Compound("*".into())),
            "||" => (20, true, OpKind::Ordinary),
            "&&" => (30, true, OpKind::Ordinary),
            "is" => (40, true, OpKind::Is),
            "!is" => (40, true, OpKind::IsNot),
            "==" => (40, true, OpKind::Compare { fallback: None, swap: false }),
            "!=" => (40, true, OpKind::Compare { fallback: Some("=="), swap: false }),
            "<" => (50, true, OpKind::Compare { fallback: None, swap: false }),
            ">" => (50, true, OpKind::Compare { fallback: Some("<"), swap: true }),
            "<=" => (50, true, OpKind::Compare { fallback: Some("<"), swap: true }),
            ">=" => (50, true, OpKind::Compare { fallback: Some("<"), swap: false }),
            "+" => (60, true, OpKind::Ordinary),
            "-" => (60, true, OpKind::Ordinary),
            "*" => (70, true, OpKind::Ordinary),
            "/" => (70, true, OpKind::Ordinary),
            "%" => (70, true, OpKind::Ordinary),
            _ => return None,
        };
        Some(Self {
            name: symbol.to_string(),
            priority,
            left_assoc: left,
            kind,
            pos,
        })
    }
}

/// Reshapes a flat operand/operator chain into a tree.
///
/// Operands and operators alternate: `operands.len() == operators.len() + 1`.
/// Higher priorities bind tighter; equal priorities group left for
/// left-associative operators and right otherwise.
pub fn prioritize(
    world: &mut World,
    block: &Block,
    mut operands: Vec<ExprRef>,
    operators: Vec<OpInfo>,
) -> CResult<ExprRef> {
    assert_eq!(
        operands.len(),
        operators.len() + 1,
        "a flat operator parse alternates operands and operators"
    );
    if operators.is_empty() {
        return Ok(operands.remove(0));
    }

    // Find the weakest operator; that one becomes the root. Scanning
    // direction implements associativity: the leftmost weakest for
    // right-associative chains, the rightmost weakest otherwise.
    let mut weakest = 0;
    for (i, op) in operators.iter().enumerate() {
        let better = if operators[weakest].left_assoc {
            op.priority <= operators[weakest].priority
        } else {
            op.priority < operators[weakest].priority
        };
        if i > 0 && better {
            weakest = i;
        }
    }

    let op = operators[weakest].clone();
    let rhs_ops = operators[weakest + 1..].to_vec();
    let lhs_ops = operators[..weakest].to_vec();
    let rhs_operands = operands.split_off(weakest + 1);
    let lhs_operands = operands;

    let lhs = prioritize(world, block, lhs_operands, lhs_ops)?;
    let rhs = prioritize(world, block, rhs_operands, rhs_ops)?;
    apply_op(world, block, op, lhs, rhs)
}

/// Builds the expression for one operator application.
pub fn apply_op(world: &mut World, block: &Block, op: OpInfo, lhs: ExprRef, rhs: ExprRef) -> CResult<ExprRef> {
    match &op.kind {
        OpKind::Assign => build_assign(world, block, op.pos, lhs, rhs),
        OpKind::Is => Ok(Box::new(IsExpr {
            pos: op.pos,
            lhs,
            rhs,
            negate: false,
        })),
        OpKind::IsNot => Ok(Box::new(IsExpr {
            pos: op.pos,
            lhs,
            rhs,
            negate: true,
        })),
        OpKind::Compound(base) => {
            // `lhs op= rhs` is `lhs = lhs op rhs`; the left side must be
            // evaluated as an lvalue only once, which the assignment
            // handles through its store instruction.
            let base_op = OpInfo::new(base.clone(), op.priority, true, op.pos.clone());
            let lhs2 = clone_lvalue(world, &lhs, &op.pos)?;
            let combined = build_ordinary(world, block, base_op, lhs2, rhs)?;
            build_assign(world, block, op.pos, lhs, combined)
        }
        OpKind::Compare { fallback, swap } => {
            match try_ordinary(world, block, &op, &lhs, &rhs)? {
                Some(_) => {
                    let declared = OpInfo::new(op.name.clone(), op.priority, true, op.pos.clone());
                    build_ordinary(world, block, declared, lhs, rhs)
                }
                None => {
                    let Some(fallback) = fallback else {
                        return missing_op_error(world, &op, &lhs, &rhs);
                    };
                    world.decision("missing comparison operators rewrite through their duals");
                    // `a > b` => `b < a`; `a <= b` => `!(b < a)`.
                    let negate = matches!(op.name.as_str(), "<=" | ">=" | "!=");
                    let inner_op = OpInfo::new(*fallback, op.priority, true, op.pos.clone());
                    let (l, r) = if *swap { (rhs, lhs) } else { (lhs, rhs) };
                    let inner = build_ordinary(world, block, inner_op, l, r)?;
                    if negate {
                        Ok(Box::new(NotExpr {
                            pos: op.pos,
                            expr: inner,
                        }))
                    } else {
                        Ok(inner)
                    }
                }
            }
        }
        OpKind::Ordinary => build_ordinary(world, block, op, lhs, rhs),
    }
}

/// Resolves `op(lhs, rhs)` as a function call.
fn build_ordinary(world: &mut World, block: &Block, op: OpInfo, lhs: ExprRef, rhs: ExprRef) -> CResult<ExprRef> {
    match try_ordinary(world, block, &op, &lhs, &rhs)? {
        Some(_) => {}
        None => return missing_op_error(world, &op, &lhs, &rhs),
    }
    let l = lhs.result(world)?.value();
    let r = rhs.result(world)?.value();
    let part = SimplePart::with_params(op.name.clone(), [l.as_ref(false), r.as_ref(false)]);
    let func = block
        .scope
        .find_simple(world, &crate::name::SimpleName::from_parts(vec![part]))?
        .expect("try_ordinary found the operator above");
    let mut args = Actuals::new();
    args.push(lhs);
    args.push(rhs);
    Ok(Box::new(FnCall::new(world, op.pos, func, args, &block.scope)?))
}

/// Probes for the function implementing `op` without committing.
fn try_ordinary(
    world: &mut World,
    block: &Block,
    op: &OpInfo,
    lhs: &ExprRef,
    rhs: &ExprRef,
) -> CResult<Option<ExprRef>> {
    let l = lhs.result(world)?.value();
    let r = rhs.result(world)?.value();
    let part = SimplePart::with_params(op.name.clone(), [l.as_ref(false), r.as_ref(false)]);
    let found = block
        .scope
        .find_simple(world, &crate::name::SimpleName::from_parts(vec![part]))?;
    Ok(found.map(|f| {
        Box::new(crate::bs::expr::DummyExpr {
            pos: op.pos.clone(),
            ty: match &world.entity(f).kind {
                EntityKind::Function(data) => data.result,
                _ => Value::VOID,
            },
        }) as ExprRef
    }))
}

fn missing_op_error(world: &mut World, op: &OpInfo, lhs: &ExprRef, rhs: &ExprRef) -> CResult<ExprRef> {
    let l = lhs.result(world)?.value().describe(world);
    let r = rhs.result(world)?.value().describe(world);
    Err(CompileError::type_error(
        op.pos.clone(),
        format!("no operator {} ({l}, {r}) in scope", op.name),
    ))
}

/// A second read of an lvalue for compound assignment.
fn clone_lvalue(world: &mut World, lhs: &ExprRef, pos: &SrcPos) -> CResult<ExprRef> {
    let ty = lhs.result(world)?.value();
    Ok(Box::new(crate::bs::expr::DummyExpr {
        pos: pos.clone(),
        ty: ty.as_ref(false),
    }))
}

/// Builds an assignment. The left side must be assignable: a local, a
/// member, or the result of an `assign`-flagged function.
fn build_assign(world: &mut World, block: &Block, pos: SrcPos, lhs: ExprRef, rhs: ExprRef) -> CResult<ExprRef> {
    let target = lhs.result(world)?.value();
    if !target.by_ref {
        return Err(CompileError::type_error(
            pos,
            "the left side of an assignment must be assignable",
        ));
    }
    let rhs = expect_cast_to(world, rhs, target.as_ref(false), &block.scope)?;
    Ok(Box::new(AssignExpr { pos, lhs, rhs }))
}

/// `lhs = rhs`.
#[derive(Debug)]
pub struct AssignExpr {
    pub pos: SrcPos,
    pub lhs: ExprRef,
    pub rhs: ExprRef,
}

impl Expr for AssignExpr {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        self.lhs.result(world)
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        self.rhs.code(world, to)?;
        if self.lhs.emit_store(world, to)? {
            Ok(())
        } else {
            Err(CompileError::type_error(
                self.pos.clone(),
                "this expression can not be assigned to",
            ))
        }
    }

    fn describe(&self) -> String {
        format!("{} = {}", self.lhs.describe(), self.rhs.describe())
    }
}

/// Object identity, optionally negated.
#[derive(Debug)]
pub struct IsExpr {
    pub pos: SrcPos,
    pub lhs: ExprRef,
    pub rhs: ExprRef,
    pub negate: bool,
}

impl Expr for IsExpr {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        let l = self.lhs.result(world)?.value();
        if !l.is_heap_obj(world) {
            return Err(CompileError::type_error(
                self.pos.clone(),
                "is compares object identity and needs heap objects",
            ));
        }
        Ok(ExprResult::Value(Value::new(world.builtins().bool_)))
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        self.lhs.code(world, to)?;
        self.rhs.code(world, to)?;
        to.listing.push(Instr::RefEq);
        if self.negate {
            to.listing.push(Instr::Not);
        }
        Ok(())
    }
}

/// Boolean negation.
#[derive(Debug)]
pub struct NotExpr {
    pub pos: SrcPos,
    pub expr: ExprRef,
}

impl Expr for NotExpr {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::Value(Value::new(world.builtins().bool_)))
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        self.expr.code(world, to)?;
        to.listing.push(Instr::Not);
        Ok(())
    }
}
