//! Function-pointer literals.
//!
//! `&add(Int, Int)` resolves the named function against the surrounding
//! scope and produces a first-class function value typed as the matching
//! `Fn(R, P...)` instance. The parameter list names the formal types, so
//! overloads disambiguate the same way calls do; a bare `&name` resolves
//! the paramless overload.

use crate::{
    bs::{
        block::Block,
        expr::{Expr, ExprResult},
    },
    codegen::{CodeGen, Instr},
    diag::{CResult, CompileError, SrcPos},
    entity::{EntityId, EntityKind},
    name::SimpleName,
    typesys::RunOn,
    value::Value,
    world::World,
};

/// A reference to a function as a value.
#[derive(Debug)]
pub struct FnPtr {
    pub pos: SrcPos,
    /// The referenced function.
    pub func: EntityId,
    /// The `Fn(R, P...)` instance describing the pointer.
    pub ty: Value,
}

impl FnPtr {
    /// Resolves `name` (the last part carrying the declared parameter
    /// types) against the scope of `block` and wraps the match.
    ///
    /// Pointers to functions bound to a specific thread are allowed; the
    /// cross-thread dispatch happens when the pointer is invoked, so the
    /// reference itself is thread-agnostic.
    pub fn resolve(world: &mut World, block: &Block, pos: SrcPos, name: &SimpleName) -> CResult<Self> {
        let found = block.scope.find_simple(world, name)?.ok_or_else(|| {
            CompileError::syntax(pos.clone(), format!("can not find the function {name}"))
        })?;
        let EntityKind::Function(data) = &world.entity(found).kind else {
            return Err(CompileError::type_error(
                pos,
                format!("{} is not a function, it has no address", world.path_string(found)),
            ));
        };
        let result = data.result;
        if matches!(data.run_on, RunOn::Runtime) {
            return Err(CompileError::type_error(
                pos,
                format!(
                    "{} reads its thread from a parameter; it can not be referenced directly",
                    world.path_string(found)
                ),
            ));
        }
        let params: Vec<Value> = world.entity(found).params.to_vec();
        let instance = world.fn_of(result, &params)?;
        Ok(Self {
            pos,
            func: found,
            ty: Value::new(instance),
        })
    }
}

impl Expr for FnPtr {
    fn pos(&self) -> &SrcPos {
        &self.pos
    }

    fn result(&self, _world: &mut World) -> CResult<ExprResult> {
        Ok(ExprResult::Value(self.ty))
    }

    fn code(&self, _world: &mut World, to: &mut CodeGen) -> CResult<()> {
        to.listing.push(Instr::FnRef(self.func));
        Ok(())
    }

    fn describe(&self) -> String {
        format!("<&fn #{}>", self.func.index())
    }
}
