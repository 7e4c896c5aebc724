//! The reader for the grammar definition language (`.bnf` files).
//!
//! A grammar file declares used packages, the optional/required delimiter
//! rules, rules, and productions:
//!
//! ```text
//! use lang.bs;
//! optional = SWhitespace;
//! void Start();
//! Start : "a"+ = test;
//! ```
//!
//! A rule declaration may carry a production directly (`void Start() :
//! "a"+ = test;`), which declares both at once. Rules load during the
//! syntax-rules phase and productions during the syntax-productions phase,
//! so rules from every file exist before any production refers to them.

use std::sync::Arc;

use crate::{
    diag::{CResult, CompileError, ErrorKind, SrcPos},
    entity::EntityId,
    name::{Name, SimpleName},
    reader::{FileInfo, FileReader},
    scope::{DefaultLookup, Scope, ScopeExtra},
    syntax::{
        production::{DelimKind, IndentInfo, IndentType, Matcher, Production, RegexMatcher, RepType, Token, TokenBinding},
        rule::TokenColor,
    },
    world::World,
};

// ---------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i32),
    Colon,
    Semi,
    Comma,
    Tilde,
    LParen,
    RParen,
    Eq,
    /// `=>`
    Arrow,
    /// `->`
    Invoke,
    DotDot,
    Dot,
    Hash,
    Dash,
    At,
    Question,
    Plus,
    Star,
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn tokens(mut self) -> CResult<Vec<(Tok, usize)>> {
        let mut out = Vec::new();
        while let Some(tok) = self.next_token()? {
            out.push(tok);
        }
        Ok(out)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_trivia(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if self.rest().starts_with("//") {
                match self.rest().find('\n') {
                    Some(nl) => self.pos += nl + 1,
                    None => self.pos = self.src.len(),
                }
            } else {
                return;
            }
        }
    }

    fn next_token(&mut self) -> CResult<Option<(Tok, usize)>> {
        self.skip_trivia();
        let start = self.pos;
        let mut chars = self.rest().chars();
        let Some(c) = chars.next() else {
            return Ok(None);
        };
        let tok = match c {
            ':' => {
                self.pos += 1;
                Tok::Colon
            }
            ';' => {
                self.pos += 1;
                Tok::Semi
            }
            ',' => {
                self.pos += 1;
                Tok::Comma
            }
            '~' => {
                self.pos += 1;
                Tok::Tilde
            }
            '(' => {
                self.pos += 1;
                Tok::LParen
            }
            ')' => {
                self.pos += 1;
                Tok::RParen
            }
            '#' => {
                self.pos += 1;
                Tok::Hash
            }
            '@' => {
                self.pos += 1;
                Tok::At
            }
            '?' => {
                self.pos += 1;
                Tok::Question
            }
            '+' => {
                self.pos += 1;
                Tok::Plus
            }
            '*' => {
                self.pos += 1;
                Tok::Star
            }
            '=' => {
                if self.rest().starts_with("=>") {
                    self.pos += 2;
                    Tok::Arrow
                } else {
                    self.pos += 1;
                    Tok::Eq
                }
            }
            '-' => {
                if self.rest().starts_with("->") {
                    self.pos += 2;
                    Tok::Invoke
                } else if chars.next().is_some_and(|d| d.is_ascii_digit()) {
                    return self.lex_int(start);
                } else {
                    self.pos += 1;
                    Tok::Dash
                }
            }
            '.' => {
                if self.rest().starts_with("..") {
                    self.pos += 2;
                    Tok::DotDot
                } else {
                    self.pos += 1;
                    Tok::Dot
                }
            }
            '[' => {
                self.pos += 1;
                return self.lex_priority(start);
            }
            '"' => return self.lex_string(start).map(Some),
            c if c.is_alphanumeric() || c == '_' => {
                if c.is_ascii_digit() {
                    return self.lex_int(start);
                }
                let len = self
                    .rest()
                    .find(|ch: char| !ch.is_alphanumeric() && ch != '_')
                    .unwrap_or(self.rest().len());
                let ident = self.rest()[..len].to_string();
                self.pos += len;
                Tok::Ident(ident)
            }
            other => {
                return Err(CompileError::new(
                    ErrorKind::SyntaxError,
                    format!("unexpected character {other:?} at offset {start}"),
                ));
            }
        };
        Ok(Some((tok, start)))
    }

    /// `[` was consumed; lex `int ]` as one priority token.
    fn lex_priority(&mut self, start: usize) -> CResult<Option<(Tok, usize)>> {
        self.skip_trivia();
        let negative = self.rest().starts_with('-');
        if negative {
            self.pos += 1;
        }
        let digits = self
            .rest()
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest().len());
        if digits == 0 {
            return Err(CompileError::new(
                ErrorKind::SyntaxError,
                format!("expected a priority after [ at offset {start}"),
            ));
        }
        let value: i32 = self.rest()[..digits]
            .parse()
            .map_err(|_| CompileError::new(ErrorKind::SyntaxError, "priority out of range"))?;
        self.pos += digits;
        self.skip_trivia();
        if !self.rest().starts_with(']') {
            return Err(CompileError::new(
                ErrorKind::SyntaxError,
                format!("expected ] after the priority at offset {start}"),
            ));
        }
        self.pos += 1;
        Ok(Some((Tok::Int(if negative { -value } else { value }), start)))
    }

    fn lex_int(&mut self, start: usize) -> CResult<Option<(Tok, usize)>> {
        let negative = self.rest().starts_with('-');
        if negative {
            self.pos += 1;
        }
        let digits = self
            .rest()
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest().len());
        let value: i32 = self.rest()[..digits]
            .parse()
            .map_err(|_| CompileError::new(ErrorKind::SyntaxError, "number out of range"))?;
        self.pos += digits;
        Ok(Some((Tok::Int(if negative { -value } else { value }), start)))
    }

    fn lex_string(&mut self, start: usize) -> CResult<(Tok, usize)> {
        self.pos += 1;
        let mut value = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok((Tok::Str(value), start));
                }
                '\\' => {
                    let Some((_, escaped)) = chars.next() else { break };
                    // Keep regex escapes intact; only the quote is special.
                    if escaped == '"' {
                        value.push('"');
                    } else {
                        value.push('\\');
                        value.push(escaped);
                    }
                }
                c => value.push(c),
            }
        }
        Err(CompileError::new(
            ErrorKind::SyntaxError,
            format!("unterminated string starting at offset {start}"),
        ))
    }
}

// ---------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------

/// A parsed token with its capture information.
#[derive(Debug, Clone)]
struct TokenDecl {
    kind: TokenDeclKind,
    target: Option<String>,
    invoke: Option<String>,
    raw: bool,
    color: Option<String>,
    pos: usize,
}

#[derive(Debug, Clone)]
enum TokenDeclKind {
    Regex(String),
    Rule(String),
    Delim(DelimKind),
}

/// The body of a production: everything after the rule name.
#[derive(Debug, Clone, Default)]
struct ProdBody {
    priority: i32,
    result: Option<String>,
    result_params: Vec<String>,
    tokens: Vec<TokenDecl>,
    rep_start: usize,
    rep_end: usize,
    rep: RepType,
    rep_capture: Option<String>,
    indent: Option<(usize, usize, IndentType)>,
    name: Option<String>,
}

#[derive(Debug, Clone)]
struct RuleDecl {
    result: String,
    name: String,
    params: Vec<(String, String)>,
    color: Option<String>,
    pos: usize,
    /// A production declared on the rule itself.
    body: Option<ProdBody>,
}

#[derive(Debug, Clone)]
struct ProdDecl {
    rule: String,
    parent: Option<String>,
    body: ProdBody,
    pos: usize,
}

#[derive(Debug, Clone, Default)]
struct BnfDecls {
    uses: Vec<String>,
    optional_delim: Option<String>,
    required_delim: Option<String>,
    rules: Vec<RuleDecl>,
    prods: Vec<ProdDecl>,
}

// ---------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------

struct BnfParser {
    toks: Vec<(Tok, usize)>,
    i: usize,
}

impl BnfParser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.i).map(|(t, _)| t)
    }

    fn pos(&self) -> usize {
        self.toks.get(self.i).map_or(usize::MAX, |(_, p)| *p)
    }

    fn next(&mut self) -> CResult<Tok> {
        let tok = self
            .toks
            .get(self.i)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| CompileError::new(ErrorKind::SyntaxError, "unexpected end of grammar file"))?;
        self.i += 1;
        Ok(tok)
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> CResult<()> {
        let at = self.pos();
        let got = self.next()?;
        if got == *tok {
            Ok(())
        } else {
            Err(CompileError::new(
                ErrorKind::SyntaxError,
                format!("expected {what} at offset {at}, found {got:?}"),
            ))
        }
    }

    fn ident(&mut self, what: &str) -> CResult<String> {
        let at = self.pos();
        match self.next()? {
            Tok::Ident(name) => Ok(name),
            other => Err(CompileError::new(
                ErrorKind::SyntaxError,
                format!("expected {what} at offset {at}, found {other:?}"),
            )),
        }
    }

    /// A dotted identifier, e.g. `lang.bs.SExpr`.
    fn dotted(&mut self, what: &str) -> CResult<String> {
        let mut name = self.ident(what)?;
        while self.peek() == Some(&Tok::Dot) {
            self.next()?;
            name.push('.');
            name.push_str(&self.ident(what)?);
        }
        Ok(name)
    }

    fn file(&mut self) -> CResult<BnfDecls> {
        let mut decls = BnfDecls::default();
        while let Some(tok) = self.peek() {
            match tok {
                Tok::Ident(word) if word == "use" => {
                    self.next()?;
                    decls.uses.push(self.dotted("a package name")?);
                    self.expect(&Tok::Semi, ";")?;
                }
                Tok::Ident(word) if word == "optional" || word == "delimiter" => {
                    self.next()?;
                    self.expect(&Tok::Eq, "=")?;
                    decls.optional_delim = Some(self.dotted("a rule name")?);
                    self.expect(&Tok::Semi, ";")?;
                }
                Tok::Ident(word) if word == "required" => {
                    self.next()?;
                    self.expect(&Tok::Eq, "=")?;
                    decls.required_delim = Some(self.dotted("a rule name")?);
                    self.expect(&Tok::Semi, ";")?;
                }
                Tok::Ident(_) => self.declaration(&mut decls)?,
                other => {
                    return Err(CompileError::new(
                        ErrorKind::SyntaxError,
                        format!("unexpected {other:?} at offset {}", self.pos()),
                    ));
                }
            }
        }
        Ok(decls)
    }

    /// Two identifiers in a row (the first possibly dotted) start a rule
    /// declaration; anything else is a production.
    fn looks_like_rule(&self) -> bool {
        let mut i = self.i;
        let ident = |i: usize| matches!(self.toks.get(i).map(|(t, _)| t), Some(Tok::Ident(_)));
        if !ident(i) {
            return false;
        }
        i += 1;
        while self.toks.get(i).map(|(t, _)| t) == Some(&Tok::Dot) && ident(i + 1) {
            i += 2;
        }
        ident(i)
    }

    /// Either a rule declaration (`type name(params)...`) or a production
    /// (`name : ...`); both start with an identifier.
    fn declaration(&mut self, decls: &mut BnfDecls) -> CResult<()> {
        if self.looks_like_rule() {
            let rule = self.rule_decl()?;
            decls.rules.push(rule);
        } else {
            let prod = self.prod_decl()?;
            decls.prods.push(prod);
        }
        Ok(())
    }

    fn rule_decl(&mut self) -> CResult<RuleDecl> {
        let pos = self.pos();
        let result = self.dotted("a result type")?;
        let name = self.ident("a rule name")?;
        self.expect(&Tok::LParen, "(")?;
        let mut params = Vec::new();
        while self.peek() != Some(&Tok::RParen) {
            if !params.is_empty() {
                self.expect(&Tok::Comma, ",")?;
            }
            let ty = self.dotted("a parameter type")?;
            let pname = self.ident("a parameter name")?;
            params.push((ty, pname));
        }
        self.expect(&Tok::RParen, ")")?;
        let mut color = None;
        if self.peek() == Some(&Tok::Hash) {
            self.next()?;
            color = Some(self.ident("a color name")?);
        }
        let mut header = ProdBody::default();
        if self.peek() == Some(&Tok::Arrow) {
            self.next()?;
            header.result = Some(self.dotted("a result expression")?);
            if self.peek() == Some(&Tok::LParen) {
                self.next()?;
                while self.peek() != Some(&Tok::RParen) {
                    if !header.result_params.is_empty() {
                        self.expect(&Tok::Comma, ",")?;
                    }
                    header.result_params.push(self.ident("an argument name")?);
                }
                self.expect(&Tok::RParen, ")")?;
            }
        }
        let body = match self.next()? {
            Tok::Semi => None,
            Tok::Colon => {
                let body = self.prod_body_tokens(header)?;
                self.expect(&Tok::Semi, ";")?;
                Some(body)
            }
            other => {
                return Err(CompileError::new(
                    ErrorKind::SyntaxError,
                    format!("expected ; or : after the rule header, found {other:?}"),
                ));
            }
        };
        Ok(RuleDecl {
            result,
            name,
            params,
            color,
            pos,
            body,
        })
    }

    fn prod_decl(&mut self) -> CResult<ProdDecl> {
        let pos = self.pos();
        let first = self.dotted("a rule name")?;
        let (parent, rule) = if self.peek() == Some(&Tok::DotDot) {
            self.next()?;
            (Some(first), self.dotted("a rule name")?)
        } else {
            (None, first)
        };
        let mut body = ProdBody::default();
        if let Some(Tok::Int(priority)) = self.peek() {
            body.priority = *priority;
            self.next()?;
        }
        if self.peek() == Some(&Tok::Arrow) {
            self.next()?;
            body.result = Some(self.dotted("a result expression")?);
            if self.peek() == Some(&Tok::LParen) {
                self.next()?;
                while self.peek() != Some(&Tok::RParen) {
                    if !body.result_params.is_empty() {
                        self.expect(&Tok::Comma, ",")?;
                    }
                    body.result_params.push(self.ident("an argument name")?);
                }
                self.expect(&Tok::RParen, ")")?;
            }
        }
        self.expect(&Tok::Colon, ":")?;
        let rest = self.prod_body_tokens(std::mem::take(&mut body))?;
        self.expect(&Tok::Semi, ";")?;
        Ok(ProdDecl {
            rule,
            parent,
            body: rest,
            pos,
        })
    }

    /// Tokens, the optional repetition range, and the production name.
    fn prod_body_tokens(&mut self, mut body: ProdBody) -> CResult<ProdBody> {
        let mut range_start: Option<usize> = None;
        loop {
            match self.peek() {
                None | Some(Tok::Semi) => break,
                Some(Tok::Eq) => {
                    self.next()?;
                    body.name = Some(self.ident("a production name")?);
                    break;
                }
                Some(Tok::Dash) => {
                    // Explicit token separator; no delimiter is inserted.
                    self.next()?;
                }
                Some(Tok::LParen) => {
                    self.next()?;
                    range_start = Some(body.tokens.len());
                }
                Some(Tok::RParen) => {
                    self.next()?;
                    let start = range_start.take().ok_or_else(|| {
                        CompileError::new(ErrorKind::SyntaxError, "unmatched ) in a production body")
                    })?;
                    body.rep_start = start;
                    body.rep_end = body.tokens.len();
                    self.rep_suffix(&mut body)?;
                }
                Some(_) => {
                    let token = self.token_decl()?;
                    body.tokens.push(token);
                    // A repetition marker directly after a single token.
                    if range_start.is_none() {
                        if let Some(rep) = self.peek_rep() {
                            self.next()?;
                            body.rep_start = body.tokens.len() - 1;
                            body.rep_end = body.tokens.len();
                            body.rep = rep;
                        }
                    }
                }
            }
        }
        Ok(body)
    }

    fn peek_rep(&self) -> Option<RepType> {
        match self.peek() {
            Some(Tok::Question) => Some(RepType::ZeroOne),
            Some(Tok::Plus) => Some(RepType::OnePlus),
            Some(Tok::Star) => Some(RepType::ZeroPlus),
            _ => None,
        }
    }

    /// What follows a closed `)` range: a repetition marker, or a capture
    /// name for the raw range text.
    fn rep_suffix(&mut self, body: &mut ProdBody) -> CResult<()> {
        if let Some(rep) = self.peek_rep() {
            self.next()?;
            body.rep = rep;
            return Ok(());
        }
        if let Some(Tok::Ident(_)) = self.peek() {
            body.rep = RepType::None;
            body.rep_capture = Some(self.ident("a capture name")?);
        }
        Ok(())
    }

    fn token_decl(&mut self) -> CResult<TokenDecl> {
        let pos = self.pos();
        let kind = match self.next()? {
            Tok::Str(regex) => TokenDeclKind::Regex(regex),
            Tok::Ident(name) => {
                let mut name = name;
                while self.peek() == Some(&Tok::Dot) {
                    self.next()?;
                    name.push('.');
                    name.push_str(&self.ident("a rule name")?);
                }
                TokenDeclKind::Rule(name)
            }
            Tok::Comma => TokenDeclKind::Delim(DelimKind::Optional),
            Tok::Tilde => TokenDeclKind::Delim(DelimKind::Required),
            other => {
                return Err(CompileError::new(
                    ErrorKind::SyntaxError,
                    format!("expected a token at offset {pos}, found {other:?}"),
                ));
            }
        };
        let mut decl = TokenDecl {
            kind,
            target: None,
            invoke: None,
            raw: false,
            color: None,
            pos,
        };
        match self.peek() {
            Some(Tok::At) => {
                self.next()?;
                decl.raw = true;
                if let Some(Tok::Ident(_)) = self.peek() {
                    decl.target = Some(self.ident("a capture name")?);
                }
            }
            Some(Tok::Invoke) => {
                self.next()?;
                decl.invoke = Some(self.ident("a member to invoke")?);
            }
            Some(Tok::Ident(_)) => {
                decl.target = Some(self.ident("a capture name")?);
            }
            _ => {}
        }
        if self.peek() == Some(&Tok::Hash) {
            self.next()?;
            decl.color = Some(self.ident("a color name")?);
        }
        Ok(decl)
    }
}

// ---------------------------------------------------------------------
// The file reader
// ---------------------------------------------------------------------

/// The `.bnf` file reader: parses the whole file up front, then applies
/// rules and productions during their respective phases.
#[derive(Debug)]
pub struct BnfFileReader {
    info: FileInfo,
    decls: BnfDecls,
    /// Rules declared by this file, resolved during the rules phase.
    declared: Vec<(String, EntityId)>,
}

impl BnfFileReader {
    pub fn new(info: FileInfo) -> CResult<Self> {
        let toks = Lexer::new(info.text()).tokens().map_err(|e| at_file(&info, e))?;
        let mut parser = BnfParser { toks, i: 0 };
        let decls = parser.file().map_err(|e| at_file(&info, e))?;
        Ok(Self {
            info,
            decls,
            declared: Vec::new(),
        })
    }

    /// The scope names in this file resolve in: the containing package,
    /// extended with every `use`d package.
    fn scope(&self, world: &mut World) -> CResult<Scope> {
        let mut extra = ScopeExtra::new(DefaultLookup::with_void("void"));
        for used in &self.decls.uses {
            let name = SimpleName::parse(used)?;
            match world.find_root(&name)? {
                Some(pkg) => extra.push(pkg),
                None => world.report(CompileError::at(
                    ErrorKind::SyntaxError,
                    self.info.pos(0, 0),
                    format!("can not find the package {used}"),
                )),
            }
        }
        Ok(Scope::with_lookup(self.info.pkg, std::rc::Rc::new(extra)))
    }

    fn resolve_rule(&self, world: &mut World, scope: &Scope, name: &str, pos: &SrcPos) -> CResult<EntityId> {
        let parsed = Name::parse(name)?;
        let found = scope.find(world, &parsed)?.ok_or_else(|| {
            CompileError::syntax(pos.clone(), format!("can not find the rule {name}"))
        })?;
        if world.rule_data(found).is_none() {
            return Err(CompileError::syntax(
                pos.clone(),
                format!("{} is not a rule", world.path_string(found)),
            ));
        }
        Ok(found)
    }

    fn color_of(&self, name: Option<&str>, pos: &SrcPos) -> CResult<Option<TokenColor>> {
        match name {
            None => Ok(None),
            Some(name) => name
                .parse::<TokenColor>()
                .map(Some)
                .map_err(|_| CompileError::syntax(pos.clone(), format!("unknown color {name}"))),
        }
    }

    /// Builds a production from its declaration.
    fn build_production(
        &self,
        world: &mut World,
        scope: &Scope,
        rule: EntityId,
        parent: Option<&String>,
        body: &ProdBody,
        pos: &SrcPos,
    ) -> CResult<Production> {
        let needs_delim = body
            .tokens
            .iter()
            .any(|t| matches!(t.kind, TokenDeclKind::Delim(_)));
        let (optional, required) = if needs_delim {
            let optional = match &self.decls.optional_delim {
                Some(name) => Some(self.resolve_rule(world, scope, name, pos)?),
                None => None,
            };
            let required = match &self.decls.required_delim {
                Some(name) => Some(self.resolve_rule(world, scope, name, pos)?),
                None => None,
            };
            (optional, required)
        } else {
            (None, None)
        };

        let mut tokens = Vec::with_capacity(body.tokens.len());
        for decl in &body.tokens {
            let tpos = self.info.pos(decl.pos, 1);
            let matcher = match &decl.kind {
                TokenDeclKind::Regex(pattern) => Matcher::Regex(RegexMatcher::compile(pattern)?),
                TokenDeclKind::Rule(name) => Matcher::Rule {
                    rule: self.resolve_rule(world, scope, name, &tpos)?,
                    params: Vec::new(),
                },
                TokenDeclKind::Delim(kind) => {
                    let rule = match kind {
                        DelimKind::Optional => optional,
                        DelimKind::Required => required,
                    };
                    Matcher::Delim { kind: *kind, rule }
                }
            };
            tokens.push(Token {
                matcher,
                binding: TokenBinding {
                    target: decl.target.clone(),
                    invoke: decl.invoke.clone(),
                    raw: decl.raw,
                    color: self.color_of(decl.color.as_deref(), &tpos)?,
                },
            });
        }

        let mut production = Production::new(rule, tokens);
        production.priority = body.priority;
        production.name.clone_from(&body.name);
        production.result.clone_from(&body.result);
        production.result_params.clone_from(&body.result_params);
        production.rep_start = body.rep_start;
        production.rep_end = body.rep_end;
        production.rep = body.rep;
        if let Some(capture) = &body.rep_capture {
            production.rep_capture = Some(TokenBinding {
                target: Some(capture.clone()),
                ..TokenBinding::default()
            });
        }
        if let Some((start, end, kind)) = body.indent {
            production.indent = Some(IndentInfo { start, end, kind });
        }
        if let Some(parent) = parent {
            production.parent = Some(self.resolve_rule(world, scope, parent, pos)?);
        }
        Ok(production)
    }
}

fn at_file(info: &FileInfo, mut error: CompileError) -> CompileError {
    if error.pos.is_unknown() {
        error.pos = SrcPos::new(Arc::clone(&info.url), 0, 0);
    }
    error
}

impl FileReader for BnfFileReader {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    fn read_syntax_rules(&mut self, world: &mut World) -> CResult<()> {
        let scope = self.scope(world)?;
        let rules = self.decls.rules.clone();
        for decl in rules {
            let pos = self.info.pos(decl.pos, decl.name.len());
            let result = scope.value(world, &Name::parse(&decl.result)?, pos.clone())?;
            let mut params = Vec::with_capacity(decl.params.len());
            for (ty, name) in &decl.params {
                let value = scope.value(world, &Name::parse(ty)?, pos.clone())?;
                params.push((value, name.clone()));
            }
            let rule = world.new_rule(decl.name.clone(), result)?;
            world.entity_mut(rule).pos = pos.clone();
            let data = world
                .type_data_mut(rule)
                .rule
                .as_mut()
                .expect("new_rule attaches rule data");
            data.params = params;
            data.color = self.color_of(decl.color.as_deref(), &pos)?;
            world.add_to(self.info.pkg, rule)?;
            self.declared.push((decl.name.clone(), rule));
        }
        Ok(())
    }

    fn read_syntax_productions(&mut self, world: &mut World) -> CResult<()> {
        let scope = self.scope(world)?;
        let decls = self.decls.clone();
        for decl in &decls.rules {
            let Some(body) = &decl.body else { continue };
            let pos = self.info.pos(decl.pos, decl.name.len());
            let rule = self.resolve_rule(world, &scope, &decl.name, &pos)?;
            let production = self.build_production(world, &scope, rule, None, body, &pos)?;
            world.attach_production(production)?;
        }
        for decl in &decls.prods {
            let pos = self.info.pos(decl.pos, decl.rule.len());
            let rule = self.resolve_rule(world, &scope, &decl.rule, &pos)?;
            let production = self.build_production(world, &scope, rule, decl.parent.as_ref(), &decl.body, &pos)?;
            world.attach_production(production)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Tok> {
        Lexer::new(src).tokens().unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lexes_the_operators_greedily() {
        assert_eq!(
            lex("=> -> .. = - ."),
            vec![Tok::Arrow, Tok::Invoke, Tok::DotDot, Tok::Eq, Tok::Dash, Tok::Dot]
        );
    }

    #[test]
    fn lexes_strings_with_escapes() {
        assert_eq!(lex(r#""a\"b" "\\w+""#), vec![Tok::Str("a\"b".into()), Tok::Str("\\\\w+".into())]);
    }

    #[test]
    fn parses_a_combined_rule_and_production() {
        let toks = Lexer::new(r#"void Start() : "a"+ = test;"#).tokens().unwrap();
        let decls = BnfParser { toks, i: 0 }.file().unwrap();
        assert_eq!(decls.rules.len(), 1);
        let rule = &decls.rules[0];
        assert_eq!(rule.name, "Start");
        assert_eq!(rule.result, "void");
        let body = rule.body.as_ref().unwrap();
        assert_eq!(body.tokens.len(), 1);
        assert_eq!(body.rep, RepType::OnePlus);
        assert_eq!((body.rep_start, body.rep_end), (0, 1));
        assert_eq!(body.name.as_deref(), Some("test"));
    }

    #[test]
    fn parses_uses_and_delimiters() {
        let toks = Lexer::new("use lang.bs;\noptional = SDelim;\nrequired = SReq;")
            .tokens()
            .unwrap();
        let decls = BnfParser { toks, i: 0 }.file().unwrap();
        assert_eq!(decls.uses, vec!["lang.bs".to_string()]);
        assert_eq!(decls.optional_delim.as_deref(), Some("SDelim"));
        assert_eq!(decls.required_delim.as_deref(), Some("SReq"));
    }

    #[test]
    fn parses_bindings_and_ranges() {
        let toks = Lexer::new(r#"Sum : Expr a - "\+" - Expr b = add;"#).tokens().unwrap();
        let decls = BnfParser { toks, i: 0 }.file().unwrap();
        let body = &decls.prods[0].body;
        assert_eq!(body.tokens.len(), 3);
        assert_eq!(body.tokens[0].target.as_deref(), Some("a"));
        assert_eq!(body.tokens[2].target.as_deref(), Some("b"));
    }
}
