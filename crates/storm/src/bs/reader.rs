//! The `.bs` file reader.
//!
//! The frontend reads a file in the pipeline's phases: types (and their
//! lazily-parsed bodies) first, then inheritance, then function
//! signatures, then bodies. Class bodies are not parsed until someone
//! looks inside the class, so a file full of broken classes still lets
//! every valid declaration load.

use std::sync::Arc;

use crate::{
    bs::{
        block::{Block, ExprBlock, VarDecl},
        call::{member_expr, named_expr},
        cond::{self, Condition, If},
        expr::{Actuals, Constant, Expr, ExprRef},
        fnptr::FnPtr,
        loops::{Break, Continue, For, Loop, Return},
        op::{OpInfo, prioritize},
        try_::{CatchBlock, Throw, TryBlock},
    },
    codegen::CodeGen,
    diag::{CResult, CompileError, ErrorKind, SrcPos},
    entity::{EntityId, EntityKind},
    name::{Name, SimpleName, SimplePart},
    nameset::NameSetLoader,
    reader::{FileInfo, FileReader},
    scope::{DefaultLookup, Scope, ScopeExtra},
    typesys::{CodeRef, RunOn, TypeFlags},
    value::{Value, this_ptr},
    world::World,
};

// ---------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum TKind {
    Ident,
    Int,
    Str,
    Punct,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TKind,
    text: String,
    pos: usize,
}

/// Multi-character operators, longest first so the lexer is greedy.
const PUNCTS: [&str; 27] = [
    "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "*=", "{", "}", "(", ")", ";", ",", ".", "=", "<", ">", "+", "-",
    "*", "/", "%", "!", "?", "&",
];

fn lex(src: &str) -> CResult<Vec<Token>> {
    let mut out = Vec::new();
    let mut pos = 0;
    let bytes = src.as_bytes();
    'outer: while pos < src.len() {
        let rest = &src[pos..];
        let c = rest.chars().next().expect("pos is on a char boundary");
        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }
        if rest.starts_with("//") {
            pos += rest.find('\n').map_or(rest.len(), |n| n + 1);
            continue;
        }
        if c == '"' {
            let mut end = pos + 1;
            while end < src.len() {
                match bytes[end] {
                    b'"' => {
                        out.push(Token {
                            kind: TKind::Str,
                            text: src[pos + 1..end].to_string(),
                            pos,
                        });
                        pos = end + 1;
                        continue 'outer;
                    }
                    b'\\' => end += 2,
                    _ => end += 1,
                }
            }
            return Err(CompileError::new(
                ErrorKind::SyntaxError,
                format!("unterminated string at offset {pos}"),
            ));
        }
        if c.is_ascii_digit() {
            let len = rest.find(|ch: char| !ch.is_ascii_digit()).unwrap_or(rest.len());
            out.push(Token {
                kind: TKind::Int,
                text: rest[..len].to_string(),
                pos,
            });
            pos += len;
            continue;
        }
        if c.is_alphanumeric() || c == '_' {
            let len = rest
                .find(|ch: char| !ch.is_alphanumeric() && ch != '_')
                .unwrap_or(rest.len());
            out.push(Token {
                kind: TKind::Ident,
                text: rest[..len].to_string(),
                pos,
            });
            pos += len;
            continue;
        }
        for punct in PUNCTS {
            if rest.starts_with(punct) {
                out.push(Token {
                    kind: TKind::Punct,
                    text: punct.to_string(),
                    pos,
                });
                pos += punct.len();
                continue 'outer;
            }
        }
        return Err(CompileError::new(
            ErrorKind::SyntaxError,
            format!("unexpected character {c:?} at offset {pos}"),
        ));
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------

/// A reference to a type in source: a dotted name, optionally `?` for a
/// maybe-wrapped value.
#[derive(Debug, Clone)]
struct TypeRef {
    name: String,
    maybe: bool,
    pos: usize,
}

#[derive(Debug, Clone)]
struct ParamDecl {
    ty: TypeRef,
    name: String,
}

#[derive(Debug, Clone)]
struct FnDecl {
    result: TypeRef,
    name: String,
    params: Vec<ParamDecl>,
    on: Option<String>,
    /// Token range of the body, braces excluded.
    body: (usize, usize),
    pos: usize,
}

#[derive(Debug, Clone)]
struct ClassDecl {
    name: String,
    value_kind: bool,
    super_: Option<String>,
    on: Option<String>,
    body: (usize, usize),
    pos: usize,
}

#[derive(Debug, Clone, Default)]
struct BsFile {
    uses: Vec<(String, bool)>,
    classes: Vec<ClassDecl>,
    fns: Vec<FnDecl>,
}

// ---------------------------------------------------------------------
// Declaration-level parser
// ---------------------------------------------------------------------

struct DeclParser<'t> {
    toks: &'t [Token],
    i: usize,
}

impl<'t> DeclParser<'t> {
    fn new(toks: &'t [Token]) -> Self {
        Self { toks, i: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.i)
    }

    fn at_ident(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.kind == TKind::Ident && t.text == text)
    }

    fn at_punct(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.kind == TKind::Punct && t.text == text)
    }

    fn pos(&self) -> usize {
        self.peek().map_or(usize::MAX, |t| t.pos)
    }

    fn bump(&mut self) -> CResult<Token> {
        let tok = self
            .peek()
            .cloned()
            .ok_or_else(|| CompileError::new(ErrorKind::SyntaxError, "unexpected end of file"))?;
        self.i += 1;
        Ok(tok)
    }

    fn expect_punct(&mut self, text: &str) -> CResult<()> {
        let at = self.pos();
        let tok = self.bump()?;
        if tok.kind == TKind::Punct && tok.text == text {
            Ok(())
        } else {
            Err(CompileError::new(
                ErrorKind::SyntaxError,
                format!("expected {text:?} at offset {at}, found {:?}", tok.text),
            ))
        }
    }

    fn ident(&mut self, what: &str) -> CResult<String> {
        let at = self.pos();
        let tok = self.bump()?;
        if tok.kind == TKind::Ident {
            Ok(tok.text)
        } else {
            Err(CompileError::new(
                ErrorKind::SyntaxError,
                format!("expected {what} at offset {at}, found {:?}", tok.text),
            ))
        }
    }

    fn dotted(&mut self, what: &str) -> CResult<String> {
        let mut name = self.ident(what)?;
        while self.at_punct(".") {
            self.bump()?;
            name.push('.');
            name.push_str(&self.ident(what)?);
        }
        Ok(name)
    }

    fn type_ref(&mut self) -> CResult<TypeRef> {
        let pos = self.pos();
        let name = self.dotted("a type name")?;
        let maybe = self.at_punct("?");
        if maybe {
            self.bump()?;
        }
        Ok(TypeRef { name, maybe, pos })
    }

    /// The token range of a brace-balanced body; the opening brace is the
    /// current token.
    fn body_range(&mut self) -> CResult<(usize, usize)> {
        self.expect_punct("{")?;
        let start = self.i;
        let mut depth = 1;
        while depth > 0 {
            let tok = self.bump()?;
            if tok.kind == TKind::Punct {
                match tok.text.as_str() {
                    "{" => depth += 1,
                    "}" => depth -= 1,
                    _ => {}
                }
            }
        }
        Ok((start, self.i - 1))
    }

    fn file(&mut self) -> CResult<BsFile> {
        let mut out = BsFile::default();
        while self.peek().is_some() {
            if self.at_ident("use") || self.at_ident("export") {
                let export = self.at_ident("export");
                if export {
                    self.bump()?;
                }
                if !self.at_ident("use") {
                    return Err(CompileError::new(
                        ErrorKind::SyntaxError,
                        format!("expected use after export at offset {}", self.pos()),
                    ));
                }
                self.bump()?;
                let name = self.dotted("a package name")?;
                self.expect_punct(";")?;
                out.uses.push((name, export));
            } else if self.at_ident("class") || self.at_ident("value") {
                out.classes.push(self.class_decl()?);
            } else {
                out.fns.push(self.fn_decl()?);
            }
        }
        Ok(out)
    }

    fn class_decl(&mut self) -> CResult<ClassDecl> {
        let pos = self.pos();
        let value_kind = self.at_ident("value");
        self.bump()?;
        let name = self.ident("a class name")?;
        let mut super_ = None;
        let mut on = None;
        if self.at_ident("extends") {
            self.bump()?;
            super_ = Some(self.dotted("a class name")?);
        }
        if self.at_ident("on") {
            self.bump()?;
            on = Some(self.dotted("a thread name")?);
        }
        let body = self.body_range()?;
        Ok(ClassDecl {
            name,
            value_kind,
            super_,
            on,
            body,
            pos,
        })
    }

    fn fn_decl(&mut self) -> CResult<FnDecl> {
        let pos = self.pos();
        let result = self.type_ref()?;
        let name = self.ident("a function name")?;
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            if !params.is_empty() {
                self.expect_punct(",")?;
            }
            let ty = self.type_ref()?;
            let pname = self.ident("a parameter name")?;
            params.push(ParamDecl { ty, name: pname });
        }
        self.expect_punct(")")?;
        let mut on = None;
        if self.at_ident("on") {
            self.bump()?;
            on = Some(self.dotted("a thread name")?);
        }
        let body = self.body_range()?;
        Ok(FnDecl {
            result,
            name,
            params,
            on,
            body,
            pos,
        })
    }
}

// ---------------------------------------------------------------------
// Statement parser
// ---------------------------------------------------------------------

/// Parses statements of one body into an expression block.
struct StmtParser<'t> {
    toks: &'t [Token],
    i: usize,
    end: usize,
    file: Arc<std::path::PathBuf>,
}

impl<'t> StmtParser<'t> {
    fn new(toks: &'t [Token], range: (usize, usize), file: Arc<std::path::PathBuf>) -> Self {
        Self {
            toks,
            i: range.0,
            end: range.1,
            file,
        }
    }

    fn peek(&self) -> Option<&Token> {
        if self.i < self.end { self.toks.get(self.i) } else { None }
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        if self.i + n < self.end {
            self.toks.get(self.i + n)
        } else {
            None
        }
    }

    fn at_punct(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.kind == TKind::Punct && t.text == text)
    }

    fn at_ident(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.kind == TKind::Ident && t.text == text)
    }

    fn src_pos(&self) -> SrcPos {
        let pos = self.peek().map_or(0, |t| t.pos);
        SrcPos::new(Arc::clone(&self.file), u32::try_from(pos).unwrap_or(u32::MAX), 1)
    }

    fn bump(&mut self) -> CResult<Token> {
        let tok = self
            .peek()
            .cloned()
            .ok_or_else(|| CompileError::syntax(self.src_pos(), "unexpected end of the block"))?;
        self.i += 1;
        Ok(tok)
    }

    fn expect_punct(&mut self, text: &str) -> CResult<()> {
        let pos = self.src_pos();
        let tok = self.bump()?;
        if tok.kind == TKind::Punct && tok.text == text {
            Ok(())
        } else {
            Err(CompileError::syntax(
                pos,
                format!("expected {text:?}, found {:?}", tok.text),
            ))
        }
    }

    fn ident(&mut self, what: &str) -> CResult<String> {
        let pos = self.src_pos();
        let tok = self.bump()?;
        if tok.kind == TKind::Ident {
            Ok(tok.text)
        } else {
            Err(CompileError::syntax(pos, format!("expected {what}, found {:?}", tok.text)))
        }
    }

    fn dotted(&mut self, what: &str) -> CResult<String> {
        let mut name = self.ident(what)?;
        while self.at_punct(".") {
            self.bump()?;
            name.push('.');
            name.push_str(&self.ident(what)?);
        }
        Ok(name)
    }

    /// Is the upcoming statement a variable declaration? The shape is
    /// `Type name =` or `Type name ;` with a possibly dotted, possibly
    /// maybe-suffixed type.
    fn at_var_decl(&self) -> bool {
        let mut n = 0;
        let ident = |t: Option<&Token>| t.is_some_and(|t| t.kind == TKind::Ident);
        if !ident(self.peek_at(n)) {
            return false;
        }
        n += 1;
        while self.peek_at(n).is_some_and(|t| t.text == ".") && ident(self.peek_at(n + 1)) {
            n += 2;
        }
        if self.peek_at(n).is_some_and(|t| t.text == "?") {
            n += 1;
        }
        if !ident(self.peek_at(n)) {
            return false;
        }
        n += 1;
        self.peek_at(n).is_some_and(|t| t.text == "=" || t.text == ";")
    }

    fn parse_block_into(&mut self, world: &mut World, block: &mut ExprBlock) -> CResult<()> {
        while self.peek().is_some() {
            let stmt = self.statement(world, &block.block)?;
            block.add(stmt);
        }
        Ok(())
    }

    /// Parses a braced block as a nested expression block.
    fn braced_block(&mut self, world: &mut World, parent: &Scope) -> CResult<ExprBlock> {
        let pos = self.src_pos();
        self.expect_punct("{")?;
        let mut block = ExprBlock::new(world, pos, parent);
        while !self.at_punct("}") {
            let stmt = self.statement(world, &block.block)?;
            block.add(stmt);
        }
        self.expect_punct("}")?;
        Ok(block)
    }

    fn statement(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        if self.at_punct("{") {
            return Ok(Box::new(self.braced_block(world, &block.scope)?));
        }
        if self.at_ident("if") {
            return self.if_stmt(world, block);
        }
        if self.at_ident("while") {
            return self.while_stmt(world, block);
        }
        if self.at_ident("do") {
            return self.do_stmt(world, block);
        }
        if self.at_ident("for") {
            return self.for_stmt(world, block);
        }
        if self.at_ident("try") {
            return self.try_stmt(world, block);
        }
        if self.at_ident("break") {
            let pos = self.src_pos();
            self.bump()?;
            self.expect_punct(";")?;
            return Ok(Box::new(Break::new(world, pos, block)?));
        }
        if self.at_ident("continue") {
            let pos = self.src_pos();
            self.bump()?;
            self.expect_punct(";")?;
            return Ok(Box::new(Continue::new(world, pos, block)?));
        }
        if self.at_ident("return") {
            let pos = self.src_pos();
            self.bump()?;
            let expr = if self.at_punct(";") {
                None
            } else {
                Some(self.expr(world, block)?)
            };
            self.expect_punct(";")?;
            return Ok(Box::new(Return { pos, expr }));
        }
        if self.at_ident("throw") {
            let pos = self.src_pos();
            self.bump()?;
            let expr = self.expr(world, block)?;
            self.expect_punct(";")?;
            return Ok(Box::new(Throw::new(world, pos, expr)?));
        }
        if self.at_var_decl() {
            let stmt = self.var_decl(world, block)?;
            self.expect_punct(";")?;
            return Ok(stmt);
        }
        let expr = self.expr(world, block)?;
        self.expect_punct(";")?;
        Ok(expr)
    }

    fn var_decl(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        let pos = self.src_pos();
        let ty_name = {
            let mut name = self.ident("a type name")?;
            while self.at_punct(".") {
                self.bump()?;
                name.push('.');
                name.push_str(&self.ident("a type name")?);
            }
            name
        };
        let mut ty = block.scope.value(world, &Name::parse(&ty_name)?, pos.clone())?;
        if self.at_punct("?") {
            self.bump()?;
            let wrapped = world.maybe_of(ty)?;
            ty = Value::new(wrapped);
        }
        let name = self.ident("a variable name")?;
        let init = if self.at_punct("=") {
            self.bump()?;
            Some(self.expr(world, block)?)
        } else {
            None
        };
        Ok(Box::new(VarDecl::new(world, block, ty, &name, init, pos)?))
    }

    fn if_stmt(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        let pos = self.src_pos();
        self.bump()?;
        self.expect_punct("(")?;
        let cond = self.condition(world, block)?;
        self.expect_punct(")")?;
        let mut stmt = If::new(world, pos, &block.scope, cond)?;
        let body = self.braced_block(world, &stmt.success.block.scope)?;
        stmt.success.set(Box::new(body))?;
        if self.at_ident("else") {
            self.bump()?;
            let fail: ExprRef = if self.at_ident("if") {
                self.if_stmt(world, block)?
            } else {
                Box::new(self.braced_block(world, &block.scope)?)
            };
            stmt.fail = Some(fail);
        }
        Ok(Box::new(stmt))
    }

    /// A condition: a plain expression (boolean or maybe-typed), possibly
    /// with an `as` downcast.
    fn condition(&mut self, world: &mut World, block: &Block) -> CResult<Condition> {
        // Remember the tested name so the narrowed variable shadows it.
        let hint = match (self.peek(), self.peek_at(1)) {
            (Some(t), Some(next)) if t.kind == TKind::Ident && (next.text == ")" || next.text == "as") => {
                Some(t.text.clone())
            }
            _ => None,
        };
        let expr = self.expr(world, block)?;
        if self.at_ident("as") {
            self.bump()?;
            let pos = self.src_pos();
            let ty_name = self.dotted("a type name")?;
            let to = block.scope.value(world, &Name::parse(&ty_name)?, pos)?;
            return cond::create_downcast(world, expr, to, hint);
        }
        cond::create_condition(world, expr, hint)
    }

    fn while_stmt(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        let pos = self.src_pos();
        self.bump()?;
        self.expect_punct("(")?;
        let mut stmt = Loop::new(world, pos, &block.scope);
        let cond = self.condition(world, &stmt.block)?;
        self.expect_punct(")")?;
        stmt.cond = Some(cond);
        let body = self.braced_block(world, &stmt.block.scope)?;
        stmt.body = Some(Box::new(body));
        Ok(Box::new(stmt))
    }

    fn do_stmt(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        let pos = self.src_pos();
        self.bump()?;
        let mut stmt = Loop::new(world, pos, &block.scope);
        stmt.do_first = true;
        let body = self.braced_block(world, &stmt.block.scope)?;
        stmt.body = Some(Box::new(body));
        if self.at_ident("while") {
            self.bump()?;
            self.expect_punct("(")?;
            let cond = self.condition(world, &stmt.block)?;
            self.expect_punct(")")?;
            stmt.cond = Some(cond);
        }
        self.expect_punct(";")?;
        Ok(Box::new(stmt))
    }

    fn for_stmt(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        let pos = self.src_pos();
        self.bump()?;
        self.expect_punct("(")?;
        let mut stmt = For::new(world, pos, &block.scope);
        if !self.at_punct(";") {
            stmt.init = Some(if self.at_var_decl() {
                self.var_decl(world, &stmt.block)?
            } else {
                self.expr(world, &stmt.block)?
            });
        }
        self.expect_punct(";")?;
        if !self.at_punct(";") {
            let cond = self.expr(world, &stmt.block)?;
            stmt.cond = Some(cond::expect_bool(world, cond, &stmt.block.scope)?);
        }
        self.expect_punct(";")?;
        if !self.at_punct(")") {
            stmt.update = Some(self.expr(world, &stmt.block)?);
        }
        self.expect_punct(")")?;
        let body = self.braced_block(world, &stmt.block.scope)?;
        stmt.body = Some(Box::new(body));
        Ok(Box::new(stmt))
    }

    fn try_stmt(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        let pos = self.src_pos();
        self.bump()?;
        let mut stmt = TryBlock::new(world, pos, &block.scope);
        let body = self.braced_block(world, &stmt.block.scope)?;
        stmt.body = Some(Box::new(body));
        while self.at_ident("catch") {
            let cpos = self.src_pos();
            self.bump()?;
            self.expect_punct("(")?;
            let ty_name = self.dotted("an exception type")?;
            let ty = block.scope.value(world, &Name::parse(&ty_name)?, cpos.clone())?;
            let ty = ty
                .ty
                .ok_or_else(|| CompileError::syntax(cpos.clone(), "can not catch void"))?;
            let var = if self.at_punct(")") {
                None
            } else {
                Some(self.ident("a variable name")?)
            };
            self.expect_punct(")")?;
            let mut catch = CatchBlock::new(world, cpos, &block.scope, ty, var.as_deref())?;
            let body = self.braced_block(world, &catch.block.scope)?;
            catch.body = Some(Box::new(body));
            stmt.add_catch(catch);
        }
        Ok(Box::new(stmt))
    }

    // Expressions: a flat operator parse reshaped afterwards.

    fn expr(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        let mut operands = vec![self.unary(world, block)?];
        let mut operators = Vec::new();
        loop {
            let Some(tok) = self.peek() else { break };
            let symbol = if tok.kind == TKind::Ident && tok.text == "is" {
                "is".to_string()
            } else if tok.kind == TKind::Punct {
                tok.text.clone()
            } else {
                break;
            };
            let pos = self.src_pos();
            let Some(op) = OpInfo::for_symbol(&symbol, pos) else {
                break;
            };
            self.bump()?;
            operators.push(op);
            operands.push(self.unary(world, block)?);
        }
        prioritize(world, block, operands, operators)
    }

    fn unary(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        if self.at_punct("&") {
            return self.fn_ptr(world, block);
        }
        if self.at_punct("!") {
            let pos = self.src_pos();
            self.bump()?;
            let expr = self.unary(world, block)?;
            let expr = cond::expect_bool(world, expr, &block.scope)?;
            return Ok(Box::new(crate::bs::op::NotExpr { pos, expr }));
        }
        if self.at_punct("-") {
            let pos = self.src_pos();
            self.bump()?;
            // Unary minus is `0 - expr`.
            let zero: ExprRef = Box::new(Constant::int(pos.clone(), 0));
            let rhs = self.unary(world, block)?;
            let op = OpInfo::for_symbol("-", pos).expect("minus is in the table");
            return crate::bs::op::apply_op(world, block, op, zero, rhs);
        }
        self.postfix(world, block)
    }

    /// A function-pointer literal: `&name(Type, ...)`, or `&name` for the
    /// paramless overload.
    fn fn_ptr(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        let pos = self.src_pos();
        self.bump()?;
        let mut parts: Vec<SimplePart> = vec![SimplePart::new(self.ident("a function name")?)];
        while self.at_punct(".") {
            self.bump()?;
            parts.push(SimplePart::new(self.ident("a function name")?));
        }
        if self.at_punct("(") {
            self.bump()?;
            let mut params = Vec::new();
            while !self.at_punct(")") {
                if !params.is_empty() {
                    self.expect_punct(",")?;
                }
                let tpos = self.src_pos();
                let ty_name = self.dotted("a parameter type")?;
                let mut ty = block.scope.value(world, &Name::parse(&ty_name)?, tpos)?;
                if self.at_punct("?") {
                    self.bump()?;
                    let wrapped = world.maybe_of(ty)?;
                    ty = Value::new(wrapped);
                }
                params.push(ty);
            }
            self.expect_punct(")")?;
            let last = parts.last_mut().expect("at least the function name");
            last.params = params.into_iter().collect();
        }
        let name = SimpleName::from_parts(parts);
        Ok(Box::new(FnPtr::resolve(world, block, pos, &name)?))
    }

    fn postfix(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        let mut expr = self.primary(world, block)?;
        while self.at_punct(".") {
            self.bump()?;
            let pos = self.src_pos();
            let name = self.ident("a member name")?;
            let args = if self.at_punct("(") {
                self.call_args(world, block)?
            } else {
                Actuals::new()
            };
            expr = member_expr(world, block, pos, expr, &name, args)?;
        }
        Ok(expr)
    }

    fn call_args(&mut self, world: &mut World, block: &Block) -> CResult<Actuals> {
        self.expect_punct("(")?;
        let mut args = Actuals::new();
        while !self.at_punct(")") {
            if !args.is_empty() {
                self.expect_punct(",")?;
            }
            args.push(self.expr(world, block)?);
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn primary(&mut self, world: &mut World, block: &Block) -> CResult<ExprRef> {
        let pos = self.src_pos();
        if self.at_punct("(") {
            self.bump()?;
            let expr = self.expr(world, block)?;
            self.expect_punct(")")?;
            return Ok(expr);
        }
        let tok = self.bump()?;
        match tok.kind {
            TKind::Int => {
                let value: i64 = tok
                    .text
                    .parse()
                    .map_err(|_| CompileError::syntax(pos.clone(), "integer literal out of range"))?;
                Ok(Box::new(Constant::int(pos, value)))
            }
            TKind::Str => Ok(Box::new(Constant::str(pos, unescape(&tok.text)))),
            TKind::Ident if tok.text == "true" => Ok(Box::new(Constant::bool(pos, true))),
            TKind::Ident if tok.text == "false" => Ok(Box::new(Constant::bool(pos, false))),
            TKind::Ident => {
                let args = if self.at_punct("(") {
                    self.call_args(world, block)?
                } else {
                    Actuals::new()
                };
                named_expr(world, block, pos, &tok.text, args)
            }
            TKind::Punct => Err(CompileError::syntax(
                pos,
                format!("expected an expression, found {:?}", tok.text),
            )),
        }
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------------
// Class body loading
// ---------------------------------------------------------------------

/// The lazy loader of a class body: the member declarations are not even
/// parsed until someone looks inside the class, so a syntax error inside
/// one class surfaces at its use sites and nowhere else.
#[derive(Debug)]
struct ClassBodyLoader {
    toks: Vec<Token>,
    range: (usize, usize),
    file: Arc<std::path::PathBuf>,
    uses: Vec<String>,
}

impl ClassBodyLoader {
    fn scope(&self, world: &mut World, ty: EntityId) -> CResult<Scope> {
        file_scope(world, ty, &self.uses)
    }
}

impl NameSetLoader for ClassBodyLoader {
    fn load_all(&mut self, world: &mut World, set: EntityId) -> CResult<()> {
        let scope = self.scope(world, set)?;

        // Parse the whole body first, so a syntax error anywhere in the
        // class surfaces before any member is added.
        let mut vars: Vec<(TypeRef, String)> = Vec::new();
        let mut fns: Vec<FnDecl> = Vec::new();
        {
            let mut p = DeclParser {
                toks: &self.toks,
                i: self.range.0,
            };
            while p.i < self.range.1 {
                // A member is either `Type name;` or a member function.
                let save = p.i;
                let ty_ref = p.type_ref().map_err(|e| at_offset(&self.file, e))?;
                let name = p.ident("a member name").map_err(|e| at_offset(&self.file, e))?;
                if p.at_punct(";") {
                    p.bump().map_err(|e| at_offset(&self.file, e))?;
                    vars.push((ty_ref, name));
                } else {
                    p.i = save;
                    fns.push(p.fn_decl().map_err(|e| at_offset(&self.file, e))?);
                }
            }
        }

        for (ty_ref, name) in vars {
            let pos = SrcPos::new(Arc::clone(&self.file), u32::try_from(ty_ref.pos).unwrap_or(0), 1);
            let ty = resolve_type_ref(world, &scope, &ty_ref, &pos)?;
            let member = world.new_member_var(name, ty);
            world.entity_mut(member).pos = pos;
            world.add_to(set, member)?;
        }

        // The member layout must exist before any body touches a member.
        world.finalize_layout(set)?;

        for decl in fns {
            let pos = SrcPos::new(Arc::clone(&self.file), u32::try_from(decl.pos).unwrap_or(0), 1);
            let result = resolve_type_ref(world, &scope, &decl.result, &pos)?;
            let mut params = vec![this_ptr(world, set)];
            let mut names = vec!["this".to_string()];
            for param in &decl.params {
                params.push(resolve_type_ref(world, &scope, &param.ty, &pos)?);
                names.push(param.name.clone());
            }
            let func = world.new_function(decl.name.clone(), result, params.clone());
            world.entity_mut(func).pos = pos.clone();
            world.add_to(set, func)?;
            let listing = generate_body(
                world,
                &scope,
                &self.toks,
                decl.body,
                &params,
                &names,
                result,
                Arc::clone(&self.file),
            )?;
            set_code(world, func, listing);
        }

        // The dispatch table has to cover the member functions added after
        // the first layout pass.
        let data = world.type_data_mut(set);
        if data.vtable.is_some() {
            data.layout = None;
            data.vtable = None;
            world.finalize_layout(set)?;
        }
        Ok(())
    }
}

fn at_offset(file: &Arc<std::path::PathBuf>, mut error: CompileError) -> CompileError {
    if error.pos.is_unknown() {
        error.pos = SrcPos::new(Arc::clone(file), 0, 0);
    }
    error
}

/// Resolves a source type reference, wrapping `T?` into `Maybe(T)`.
fn resolve_type_ref(world: &mut World, scope: &Scope, ty: &TypeRef, pos: &SrcPos) -> CResult<Value> {
    let value = scope.value(world, &Name::parse(&ty.name)?, pos.clone())?;
    if ty.maybe {
        let wrapped = world.maybe_of(value)?;
        Ok(Value::new(wrapped))
    } else {
        Ok(value)
    }
}

/// Builds the file scope: the package (or type), `core` built-ins through
/// the default traversal, and every used package ahead of it.
fn file_scope(world: &mut World, top: EntityId, uses: &[String]) -> CResult<Scope> {
    let mut extra = ScopeExtra::new(DefaultLookup::with_void("void"));
    for used in uses {
        if let Some(pkg) = world.find_root(&SimpleName::parse(used)?)? {
            extra.push(pkg);
        }
    }
    Ok(Scope::with_lookup(top, std::rc::Rc::new(extra)))
}

/// Parses and generates one function body.
#[expect(clippy::too_many_arguments, reason = "all pieces of one function")]
fn generate_body(
    world: &mut World,
    scope: &Scope,
    toks: &[Token],
    range: (usize, usize),
    params: &[Value],
    names: &[String],
    result: Value,
    file: Arc<std::path::PathBuf>,
) -> CResult<crate::codegen::Listing> {
    let pos = SrcPos::new(Arc::clone(&file), 0, 0);
    let mut root = ExprBlock::new(world, pos.clone(), scope);
    for (value, name) in params.iter().zip(names) {
        root.block.add_var(world, name, *value, pos.clone())?;
    }
    let mut parser = StmtParser::new(toks, range, file);
    parser.parse_block_into(world, &mut root)?;

    // The body must produce the declared result (or never return).
    let produced = root.result(world)?;
    if produced.returns() && !result.is_void() && !result.can_store(world, produced.value()) {
        return Err(CompileError::type_error(
            pos,
            format!(
                "the body produces {}, expected {}",
                produced.value().describe(world),
                result.describe(world)
            ),
        ));
    }

    let mut to = CodeGen::new(RunOn::Any);
    root.code(world, &mut to)?;
    Ok(to.listing)
}

fn set_code(world: &mut World, func: EntityId, listing: crate::codegen::Listing) {
    if let EntityKind::Function(data) = &mut world.entity_mut(func).kind {
        data.code = CodeRef::Generated(listing);
    }
}

// ---------------------------------------------------------------------
// The file reader
// ---------------------------------------------------------------------

/// The `.bs` file reader, advancing through the pipeline phases.
#[derive(Debug)]
pub struct BsFileReader {
    info: FileInfo,
    toks: Vec<Token>,
    parsed: Option<BsFile>,
    /// Functions declared during the functions phase, resolved later.
    declared_fns: Vec<(EntityId, FnDecl)>,
    /// Types declared during the types phase.
    declared_types: Vec<(EntityId, ClassDecl)>,
}

impl BsFileReader {
    pub fn new(info: FileInfo) -> Self {
        Self {
            info,
            toks: Vec::new(),
            parsed: None,
            declared_fns: Vec::new(),
            declared_types: Vec::new(),
        }
    }

    /// Lexes and parses the top level of the file, once.
    fn ensure_parsed(&mut self) -> CResult<&BsFile> {
        if self.parsed.is_none() {
            self.toks = lex(self.info.text()).map_err(|e| at_offset(&self.info.url, e))?;
            let mut parser = DeclParser::new(&self.toks);
            self.parsed = Some(parser.file().map_err(|e| at_offset(&self.info.url, e))?);
        }
        Ok(self.parsed.as_ref().expect("parsed above"))
    }

    fn uses(&self) -> Vec<String> {
        self.parsed
            .as_ref()
            .map(|f| f.uses.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    fn scope(&self, world: &mut World) -> CResult<Scope> {
        file_scope(world, self.info.pkg, &self.uses())
    }

    fn resolve_thread(&self, world: &mut World, scope: &Scope, name: &str, pos: &SrcPos) -> CResult<EntityId> {
        let found = scope
            .find(world, &Name::parse(name)?)?
            .ok_or_else(|| CompileError::syntax(pos.clone(), format!("can not find the thread {name}")))?;
        if matches!(world.entity(found).kind, EntityKind::Thread(_)) {
            Ok(found)
        } else {
            Err(CompileError::syntax(
                pos.clone(),
                format!("{} is not a thread", world.path_string(found)),
            ))
        }
    }
}

impl FileReader for BsFileReader {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Declares types; their bodies stay unparsed until used.
    fn read_types(&mut self, world: &mut World) -> CResult<()> {
        self.ensure_parsed()?;
        let parsed = self.parsed.clone().expect("parsed above");
        let pkg = self.info.pkg;
        let scope = self.scope(world)?;

        for (used, export) in &parsed.uses {
            if *export {
                if let Some(target) = world.find_root(&SimpleName::parse(used)?)? {
                    world.add_export(pkg, target)?;
                }
            }
        }

        for decl in &parsed.classes {
            let pos = self.info.pos(decl.pos, decl.name.len());
            let flags = if decl.value_kind {
                TypeFlags::VALUE
            } else if decl.on.is_some() {
                TypeFlags::ACTOR
            } else {
                TypeFlags::CLASS
            };
            if decl.value_kind && decl.on.is_some() {
                return Err(CompileError::syntax(pos, "a value type can not be bound to a thread"));
            }
            let ty = world.new_type(decl.name.clone(), flags)?;
            world.entity_mut(ty).pos = pos.clone();
            if let Some(on) = &decl.on {
                let thread = self.resolve_thread(world, &scope, on, &pos)?;
                world.type_data_mut(ty).thread = Some(thread);
            }
            world.type_data_mut(ty).members.loader = Some(Box::new(ClassBodyLoader {
                toks: self.toks.clone(),
                range: decl.body,
                file: Arc::clone(&self.info.url),
                uses: self.uses(),
            }));
            world.add_to(pkg, ty)?;
            self.declared_types.push((ty, decl.clone()));
        }
        Ok(())
    }

    /// Resolves inheritance. Layout stays lazy; it is finalised when the
    /// type is compiled or first used by the back-end.
    fn resolve_types(&mut self, world: &mut World) -> CResult<()> {
        let scope = self.scope(world)?;
        let declared = self.declared_types.clone();
        for (ty, decl) in declared {
            if let Some(super_name) = &decl.super_ {
                let pos = self.info.pos(decl.pos, decl.name.len());
                let found = scope
                    .find(world, &Name::parse(super_name)?)?
                    .ok_or_else(|| CompileError::syntax(pos.clone(), format!("can not find {super_name}")))?;
                if !matches!(world.entity(found).kind, EntityKind::Type(_)) {
                    return Err(CompileError::syntax(
                        pos,
                        format!("{} is not a type", world.path_string(found)),
                    ));
                }
                world.set_super(ty, Some(found))?;
            }
        }
        Ok(())
    }

    /// Declares free function signatures.
    fn read_functions(&mut self, world: &mut World) -> CResult<()> {
        self.ensure_parsed()?;
        let parsed = self.parsed.clone().expect("parsed above");
        let scope = self.scope(world)?;
        for decl in &parsed.fns {
            let pos = self.info.pos(decl.pos, decl.name.len());
            let result = resolve_type_ref(world, &scope, &decl.result, &pos)?;
            let mut params = Vec::with_capacity(decl.params.len());
            for param in &decl.params {
                params.push(resolve_type_ref(world, &scope, &param.ty, &pos)?);
            }
            let func = world.new_function(decl.name.clone(), result, params);
            world.entity_mut(func).pos = pos.clone();
            if let Some(on) = &decl.on {
                let thread = self.resolve_thread(world, &scope, on, &pos)?;
                if let EntityKind::Function(data) = &mut world.entity_mut(func).kind {
                    data.run_on = RunOn::Named(thread);
                }
            }
            world.add_to(self.info.pkg, func)?;
            self.declared_fns.push((func, decl.clone()));
        }
        Ok(())
    }

    /// Generates function bodies. A body that fails to compile is reported
    /// and leaves the placeholder code reference in place, so the rest of
    /// the package stays usable.
    fn resolve_functions(&mut self, world: &mut World) -> CResult<()> {
        let scope = self.scope(world)?;
        let declared = self.declared_fns.clone();
        for (func, decl) in declared {
            let (params, result, run_on) = {
                let entity = world.entity(func);
                let EntityKind::Function(data) = &entity.kind else {
                    continue;
                };
                (entity.params.to_vec(), data.result, data.run_on)
            };
            let names: Vec<String> = decl.params.iter().map(|p| p.name.clone()).collect();
            let pos = self.info.pos(decl.pos, decl.name.len());
            let mut gen_scope = scope.clone();
            gen_scope.top = Some(self.info.pkg);
            match generate_fn(world, &gen_scope, &self.toks, decl.body, &params, &names, result, run_on, &self.info) {
                Ok(listing) => set_code(world, func, listing),
                Err(error) if error.is_user_error() => {
                    let error = CompileError::at(error.kind, if error.pos.is_unknown() { pos.clone() } else { error.pos }, error.msg);
                    world.report(error);
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }
}

/// As [`generate_body`], but honouring the function's thread binding.
#[expect(clippy::too_many_arguments, reason = "all pieces of one function")]
fn generate_fn(
    world: &mut World,
    scope: &Scope,
    toks: &[Token],
    range: (usize, usize),
    params: &[Value],
    names: &[String],
    result: Value,
    run_on: RunOn,
    info: &FileInfo,
) -> CResult<crate::codegen::Listing> {
    let pos = info.pos(0, 0);
    let mut root = ExprBlock::new(world, pos.clone(), scope);
    for (value, name) in params.iter().zip(names) {
        root.block.add_var(world, name, *value, pos.clone())?;
    }
    let mut parser = StmtParser::new(toks, range, Arc::clone(&info.url));
    parser.parse_block_into(world, &mut root)?;

    let produced = root.result(world)?;
    if produced.returns() && !result.is_void() && !result.can_store(world, produced.value()) {
        return Err(CompileError::type_error(
            pos,
            format!(
                "the body produces {}, expected {}",
                produced.value().describe(world),
                result.describe(world)
            ),
        ));
    }

    let mut to = CodeGen::new(run_on);
    root.code(world, &mut to)?;
    Ok(to.listing)
}
