//! The expression base of the frontend.
//!
//! There is no difference between statements and expressions in this
//! language. [`Expr`] is the open extension point: other languages and
//! libraries add their own node types, so it stays a trait with a small
//! fixed set of capabilities rather than a closed sum.

use std::fmt;

use crate::{
    codegen::{CodeGen, Instr},
    diag::{CResult, SrcPos},
    value::{Value, common},
    world::World,
};

/// The result of evaluating an expression: a value, or the certainty that
/// control never returns (a `return`, `break`, or `throw`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprResult {
    Value(Value),
    NoReturn,
}

impl ExprResult {
    /// The result as a value; no-return behaves as void.
    pub fn value(self) -> Value {
        match self {
            Self::Value(v) => v,
            Self::NoReturn => Value::VOID,
        }
    }

    /// Does control continue past the expression?
    pub fn returns(self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// The common result of two branches. No-return propagates the other
    /// side, so `if (x) return 1; else 2` has the type of `2`.
    pub fn common(self, world: &World, other: Self) -> Self {
        match (self, other) {
            (Self::NoReturn, other) | (other, Self::NoReturn) => other,
            (Self::Value(a), Self::Value(b)) => {
                if a == b {
                    Self::Value(a)
                } else {
                    Self::Value(common(world, a, b))
                }
            }
        }
    }
}

impl From<Value> for ExprResult {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// An expression in the frontend's tree.
pub trait Expr: fmt::Debug {
    /// Where this expression is located in the source.
    fn pos(&self) -> &SrcPos;

    /// The result of the expression. Default is void.
    fn result(&self, _world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::Value(Value::VOID))
    }

    /// Generates code into the listing.
    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()>;

    /// Expression-level cast penalty towards `to`: how far this particular
    /// expression can stretch beyond its static type (literals mainly).
    /// Negative means no expression-level cast exists.
    fn cast_penalty(&self, _world: &mut World, _to: Value) -> CResult<i32> {
        Ok(-1)
    }

    /// Emits a store of the value on top of the stack into the location
    /// this expression denotes. Returns false when the expression is not
    /// assignable.
    fn emit_store(&self, _world: &mut World, _gen: &mut CodeGen) -> CResult<bool> {
        Ok(false)
    }

    /// Source-like rendition for messages and listings.
    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// Owned expression node.
pub type ExprRef = Box<dyn Expr>;

/// A literal constant.
#[derive(Debug)]
pub enum Constant {
    Int { pos: SrcPos, value: i64 },
    Float { pos: SrcPos, value: f64 },
    Str { pos: SrcPos, value: String },
    Bool { pos: SrcPos, value: bool },
}

impl Constant {
    pub fn int(pos: SrcPos, value: i64) -> Self {
        Self::Int { pos, value }
    }

    pub fn str(pos: SrcPos, value: impl Into<String>) -> Self {
        Self::Str {
            pos,
            value: value.into(),
        }
    }

    pub fn bool(pos: SrcPos, value: bool) -> Self {
        Self::Bool { pos, value }
    }
}

impl Expr for Constant {
    fn pos(&self) -> &SrcPos {
        match self {
            Self::Int { pos, .. } | Self::Float { pos, .. } | Self::Str { pos, .. } | Self::Bool { pos, .. } => pos,
        }
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        let b = world.builtins();
        let ty = match self {
            Self::Int { .. } => b.int,
            Self::Float { .. } => b.float,
            Self::Str { .. } => b.str_,
            Self::Bool { .. } => b.bool_,
        };
        Ok(ExprResult::Value(Value::new(ty)))
    }

    fn code(&self, _world: &mut World, to: &mut CodeGen) -> CResult<()> {
        let instr = match self {
            Self::Int { value, .. } => Instr::IntLit(*value),
            Self::Float { value, .. } => Instr::IntLit(value.to_bits() as i64),
            Self::Str { value, .. } => Instr::StrLit(value.clone()),
            Self::Bool { value, .. } => Instr::BoolLit(*value),
        };
        to.listing.push(instr);
        Ok(())
    }

    /// Literal conversions: an integer literal fits any numeric type that
    /// can represent its value, at a small penalty.
    fn cast_penalty(&self, world: &mut World, to: Value) -> CResult<i32> {
        let Some(to_ty) = to.ty else { return Ok(-1) };
        let b = world.builtins();
        match self {
            Self::Int { value, .. } => {
                let fits = if to_ty == b.byte {
                    u8::try_from(*value).is_ok()
                } else if to_ty == b.nat {
                    u32::try_from(*value).is_ok()
                } else if to_ty == b.word {
                    u64::try_from(*value).is_ok()
                } else if to_ty == b.int {
                    i32::try_from(*value).is_ok()
                } else if to_ty == b.long {
                    true
                } else if to_ty == b.float || to_ty == b.double {
                    true
                } else {
                    false
                };
                Ok(if fits { 1 } else { -1 })
            }
            Self::Float { .. } => Ok(if to_ty == b.double || to_ty == b.float { 1 } else { -1 }),
            _ => Ok(-1),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Int { value, .. } => value.to_string(),
            Self::Float { value, .. } => value.to_string(),
            Self::Str { value, .. } => format!("{value:?}"),
            Self::Bool { value, .. } => value.to_string(),
        }
    }
}

/// An expression with a known type that generates no code. Used by
/// machinery that needs a typed placeholder (e.g. probing overload
/// resolution).
#[derive(Debug)]
pub struct DummyExpr {
    pub pos: SrcPos,
    pub ty: Value,
}

impl Expr for DummyExpr {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, _world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::Value(self.ty))
    }

    fn code(&self, _world: &mut World, _gen: &mut CodeGen) -> CResult<()> {
        Ok(())
    }
}

/// The actual parameters of a call.
#[derive(Debug, Default)]
pub struct Actuals {
    pub exprs: Vec<ExprRef>,
}

impl Actuals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, expr: ExprRef) {
        self.exprs.push(expr);
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// The static types of all arguments.
    pub fn values(&self, world: &mut World) -> CResult<Vec<Value>> {
        self.exprs.iter().map(|e| Ok(e.result(world)?.value())).collect()
    }
}
