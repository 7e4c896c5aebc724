//! Function and constructor calls, and name-based expression resolution.
//!
//! A call site resolves through the same overload machinery as every other
//! lookup: the argument types form the parameters of a [`SimplePart`], and
//! the best candidate wins. Whether the call crosses a thread boundary is
//! decided from the callee's `RunOn` against the generated code's; a
//! crossing call clones its parameters through a fresh clone environment at
//! the send boundary.

use crate::{
    bs::{
        block::{Block, GlobalVarAccess, LocalVarAccess, MemberVarAccess},
        cast::expect_cast_to,
        expr::{Actuals, Expr, ExprRef, ExprResult},
    },
    codegen::{CodeGen, Instr},
    diag::{CResult, CompileError, SrcPos},
    entity::{EntityId, EntityKind},
    name::SimplePart,
    scope::Scope,
    typesys::RunOn,
    value::{Value, this_ptr},
    world::World,
};

/// A resolved function call.
#[derive(Debug)]
pub struct FnCall {
    pub pos: SrcPos,
    pub func: EntityId,
    pub args: Actuals,
}

impl FnCall {
    /// Creates a call, casting every argument to its formal type.
    pub fn new(world: &mut World, pos: SrcPos, func: EntityId, mut args: Actuals, scope: &Scope) -> CResult<Self> {
        let formals: Vec<Value> = world.entity(func).params.to_vec();
        if formals.len() != args.len() {
            return Err(CompileError::type_error(
                pos,
                format!(
                    "{} expects {} parameters, got {}",
                    world.path_string(func),
                    formals.len(),
                    args.len()
                ),
            ));
        }
        let exprs = std::mem::take(&mut args.exprs);
        for (formal, expr) in formals.into_iter().zip(exprs) {
            args.exprs.push(expect_cast_to(world, expr, formal, scope)?);
        }
        Ok(Self { pos, func, args })
    }

    fn fn_data<'w>(&self, world: &'w World) -> CResult<&'w crate::typesys::FunctionData> {
        match &world.entity(self.func).kind {
            EntityKind::Function(data) => Ok(data),
            _ => Err(CompileError::internal("calling a non-function")),
        }
    }
}

impl Expr for FnCall {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::Value(self.fn_data(world)?.result))
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        for arg in &self.args.exprs {
            arg.code(world, to)?;
        }
        let run_on = self.fn_data(world)?.run_on;
        let params = u32::try_from(self.args.len()).unwrap_or(u32::MAX);
        // A call to a foreign thread is reified as a task: the back-end
        // clones the parameters through a fresh clone environment and
        // blocks this fiber on the future.
        let instr = if to.run_on.needs_dispatch(run_on) {
            Instr::PostCall { func: self.func, params }
        } else {
            Instr::Call { func: self.func, params }
        };
        to.listing.push(instr);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("<call #{}>", self.func.index())
    }
}

/// A constructor call: creates a value of `ty` through the chosen
/// constructor.
#[derive(Debug)]
pub struct CtorCall {
    pub pos: SrcPos,
    pub ctor: EntityId,
    pub ty: Value,
    pub args: Actuals,
}

impl CtorCall {
    /// Resolves the constructor of `ty` accepting `args`.
    pub fn resolve(world: &mut World, pos: SrcPos, ty: EntityId, mut args: Actuals, scope: &Scope) -> CResult<Self> {
        let this = this_ptr(world, ty);
        let mut params = vec![this];
        params.extend(args.values(world)?);
        let part = SimplePart::with_params("__init", params);
        let Some(ctor) = world.find_in(ty, &part, scope)? else {
            return Err(CompileError::type_error(
                pos,
                format!("no constructor {} found", part.describe(world)),
            ));
        };
        // Cast the arguments to the constructor's formals (skipping the
        // receiver).
        let formals: Vec<Value> = world.entity(ctor).params.iter().skip(1).copied().collect();
        let exprs = std::mem::take(&mut args.exprs);
        for (formal, expr) in formals.into_iter().zip(exprs) {
            args.exprs.push(expect_cast_to(world, expr, formal, scope)?);
        }
        Ok(Self {
            pos,
            ctor,
            ty: Value::new(ty),
            args,
        })
    }
}

impl Expr for CtorCall {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, _world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::Value(self.ty))
    }

    fn code(&self, world: &mut World, to: &mut CodeGen) -> CResult<()> {
        for arg in &self.args.exprs {
            arg.code(world, to)?;
        }
        to.listing.push(Instr::Call {
            func: self.ctor,
            params: u32::try_from(self.args.len() + 1).unwrap_or(u32::MAX),
        });
        Ok(())
    }
}

/// Resolves a bare name with optional arguments into an expression:
/// local variables first (through the block lookup chain), then functions,
/// constructors, globals, and member variables.
pub fn named_expr(
    world: &mut World,
    block: &Block,
    pos: SrcPos,
    name: &str,
    args: Actuals,
) -> CResult<ExprRef> {
    let scope = block.scope.clone();
    let part = SimplePart::with_params(name, args.values(world)?);
    let found = scope.find_simple(world, &crate::name::SimpleName::from_parts(vec![part.clone()]))?;
    let Some(found) = found else {
        return Err(CompileError::syntax(
            pos,
            format!("can not find {}", part.describe(world)),
        ));
    };
    build_access(world, block, pos, found, args)
}

/// Builds the access expression for a resolved entity.
pub fn build_access(
    world: &mut World,
    block: &Block,
    pos: SrcPos,
    found: EntityId,
    args: Actuals,
) -> CResult<ExprRef> {
    match &world.entity(found).kind {
        EntityKind::LocalVar(_) => Ok(Box::new(LocalVarAccess { pos, var: found })),
        EntityKind::GlobalVar(_) => Ok(Box::new(GlobalVarAccess { pos, var: found })),
        EntityKind::Function(_) => Ok(Box::new(FnCall::new(world, pos, found, args, &block.scope)?)),
        EntityKind::Type(_) => Ok(Box::new(CtorCall::resolve(world, pos, found, args, &block.scope)?)),
        EntityKind::MemberVar(_) => {
            // An unqualified member access implies `this`.
            let this = named_expr(world, block, pos.clone(), "this", Actuals::new())?;
            Ok(Box::new(MemberVarAccess {
                pos,
                target: this,
                member: found,
            }))
        }
        other => Err(CompileError::syntax(
            pos,
            format!("{} ({}) is not usable here", world.path_string(found), other.label()),
        )),
    }
}

/// Resolves `target.name(args)`: a member function or a member variable of
/// the target's type.
pub fn member_expr(
    world: &mut World,
    block: &Block,
    pos: SrcPos,
    target: ExprRef,
    name: &str,
    mut args: Actuals,
) -> CResult<ExprRef> {
    let target_val = target.result(world)?.value();
    let Some(ty) = target_val.ty else {
        return Err(CompileError::type_error(pos, "void has no members"));
    };
    // Member functions receive the receiver as their first parameter.
    let mut params = vec![this_ptr(world, ty)];
    params.extend(args.values(world)?);
    let part = SimplePart::with_params(name, params);
    let scope = block.scope.clone();
    if let Some(found) = world.find_in(ty, &part, &scope)? {
        return match &world.entity(found).kind {
            EntityKind::Function(_) => {
                let mut full = Actuals::new();
                full.push(target);
                for expr in std::mem::take(&mut args.exprs) {
                    full.push(expr);
                }
                Ok(Box::new(FnCall::new(world, pos, found, full, &scope)?) as ExprRef)
            }
            _ => Err(CompileError::type_error(
                pos,
                format!("{} is not callable", world.path_string(found)),
            )),
        };
    }
    // A plain member variable access.
    if args.is_empty() {
        let var_part = SimplePart::new(name);
        if let Some(found) = world.find_in(ty, &var_part, &scope)? {
            if matches!(world.entity(found).kind, EntityKind::MemberVar(_)) {
                return Ok(Box::new(MemberVarAccess {
                    pos,
                    target,
                    member: found,
                }));
            }
        }
    }
    Err(CompileError::type_error(
        pos,
        format!("{} has no member {}", target_val.describe(world), part.describe(world)),
    ))
}
