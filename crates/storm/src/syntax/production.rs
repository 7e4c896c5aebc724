//! Productions and their tokens.
//!
//! A production is one alternative of a rule: a priority, a token sequence,
//! an optional repetition over a half-open token range, and optional
//! indentation annotations for editor tooling. Tokens match a regex,
//! another rule, or the declared delimiter rules; each token may capture
//! its match into a member of the production type or send it to an invoked
//! setter.

use std::fmt::Write as _;

use regex::Regex;
use strum::{Display, EnumString};

use crate::{
    diag::{CResult, CompileError, ErrorKind},
    entity::EntityId,
    name::Name,
    syntax::rule::TokenColor,
    world::World,
};

/// Unique identifier of a registered production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProductionId(u32);

impl ProductionId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index.try_into().expect("production arena overflow"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Repetition over a token range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum RepType {
    /// No repetition; a `rep_capture` may still capture the raw range.
    #[default]
    None,
    /// `?`: zero or one. Captured fields become `Maybe<T>`.
    ZeroOne,
    /// `+`: one or more. Captured fields become `Array<T>`.
    OnePlus,
    /// `*`: zero or more. Captured fields become `Array<T>`.
    ZeroPlus,
}

impl RepType {
    /// May the range be skipped entirely?
    pub fn skippable(self) -> bool {
        matches!(self, Self::ZeroOne | Self::ZeroPlus)
    }

    /// May the range match more than once?
    pub fn repeatable(self) -> bool {
        matches!(self, Self::OnePlus | Self::ZeroPlus)
    }

    /// The surface marker, e.g. `?`.
    pub fn marker(self) -> &'static str {
        match self {
            Self::None => "",
            Self::ZeroOne => "?",
            Self::OnePlus => "+",
            Self::ZeroPlus => "*",
        }
    }
}

/// How a token range influences editor indentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "camelCase")]
pub enum IndentType {
    /// Lines inside the range are indented one level further.
    Increase,
    /// Lines inside the range are indented one level less.
    Decrease,
    /// As `Increase`, except for the line the range starts on.
    WeakIncrease,
    /// Lines inside align with the start of the range.
    AlignBegin,
    /// Lines inside align with the end of the range.
    AlignEnd,
}

/// An indentation annotation on a token range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndentInfo {
    /// First token of the annotated range.
    pub start: usize,
    /// One past the last token of the annotated range.
    pub end: usize,
    pub kind: IndentType,
}

impl IndentInfo {
    /// Is token index `i` inside the annotated range?
    pub fn contains(&self, i: usize) -> bool {
        i >= self.start && i < self.end
    }
}

/// Which delimiter rule a `,` or `~` token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DelimKind {
    /// `,`: may match nothing.
    Optional,
    /// `~`: must match something.
    Required,
}

impl DelimKind {
    /// The surface marker.
    pub fn marker(self) -> &'static str {
        match self {
            Self::Optional => ",",
            Self::Required => "~",
        }
    }
}

/// Capture information attached to a token.
#[derive(Debug, Clone, Default)]
pub struct TokenBinding {
    /// Member of the production type the match is stored in.
    pub target: Option<String>,
    /// Setter on the transform result the match is sent to.
    pub invoke: Option<String>,
    /// Capture the raw match tree rather than the transformed value.
    pub raw: bool,
    /// Color override for this token.
    pub color: Option<TokenColor>,
}

impl TokenBinding {
    /// Is this token captured at all?
    pub fn bound(&self) -> bool {
        self.target.is_some() || self.invoke.is_some()
    }

    /// The member name the capture lands in, however it is delivered.
    pub fn capture_name(&self) -> Option<&str> {
        self.target.as_deref().or(self.invoke.as_deref())
    }
}

/// What a token matches.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// A regular expression, matched at the current position.
    Regex(RegexMatcher),
    /// Another rule, with optional parameters passed to its transform.
    Rule { rule: EntityId, params: Vec<Name> },
    /// One of the declared delimiter rules.
    Delim { kind: DelimKind, rule: Option<EntityId> },
}

/// A compiled regex token: the surface pattern plus the anchored regex.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    /// The pattern as written in the grammar.
    pub pattern: String,
    regex: Regex,
}

impl RegexMatcher {
    pub fn compile(pattern: &str) -> CResult<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
            CompileError::new(ErrorKind::LangDefError, format!("invalid regex {pattern:?}: {e}"))
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Length of the match at the start of `text`, if any. Zero-length
    /// matches are valid (e.g. optional whitespace).
    pub fn match_len(&self, text: &str) -> Option<usize> {
        self.regex.find(text).map(|m| m.end())
    }
}

/// One token of a production.
#[derive(Debug, Clone)]
pub struct Token {
    pub matcher: Matcher,
    pub binding: TokenBinding,
}

impl Token {
    pub fn regex(pattern: &str) -> CResult<Self> {
        Ok(Self {
            matcher: Matcher::Regex(RegexMatcher::compile(pattern)?),
            binding: TokenBinding::default(),
        })
    }

    pub fn rule(rule: EntityId) -> Self {
        Self {
            matcher: Matcher::Rule { rule, params: Vec::new() },
            binding: TokenBinding::default(),
        }
    }

    pub fn delim(kind: DelimKind, rule: Option<EntityId>) -> Self {
        Self {
            matcher: Matcher::Delim { kind, rule },
            binding: TokenBinding::default(),
        }
    }

    /// Binds the capture to a member of the production type.
    #[must_use]
    pub fn store_in(mut self, member: impl Into<String>) -> Self {
        self.binding.target = Some(member.into());
        self
    }

    /// Sends the capture to a setter on the transform result.
    #[must_use]
    pub fn invoke(mut self, method: impl Into<String>) -> Self {
        self.binding.invoke = Some(method.into());
        self
    }

    /// Is this a delimiter token?
    pub fn is_delim(&self) -> bool {
        matches!(self.matcher, Matcher::Delim { .. })
    }
}

/// One alternative of a rule.
#[derive(Debug, Clone)]
pub struct Production {
    /// The rule this production belongs to.
    pub rule: EntityId,
    /// The production type generated for this production, once attached.
    pub ty: Option<EntityId>,
    /// The declared production name (`= name`), if any.
    pub name: Option<String>,
    /// Higher priorities are tried first.
    pub priority: i32,
    pub tokens: Vec<Token>,
    /// First token of the repeated range.
    pub rep_start: usize,
    /// One past the last token of the repeated range.
    pub rep_end: usize,
    pub rep: RepType,
    /// With `RepType::None`, captures the raw text of the range.
    pub rep_capture: Option<TokenBinding>,
    /// Indentation annotation, if any.
    pub indent: Option<IndentInfo>,
    /// Declared result expression of the transform, resolved against the
    /// captured members.
    pub result: Option<String>,
    /// Declared constructor argument names of the result.
    pub result_params: Vec<String>,
    /// Required parent rule for context-dependent productions
    /// (`parent..name`).
    pub parent: Option<EntityId>,
}

impl Production {
    /// Creates a plain production of `rule` from tokens.
    pub fn new(rule: EntityId, tokens: Vec<Token>) -> Self {
        Self {
            rule,
            ty: None,
            name: None,
            priority: 0,
            tokens,
            rep_start: 0,
            rep_end: 0,
            rep: RepType::None,
            rep_capture: None,
            indent: None,
            result: None,
            result_params: Vec::new(),
            parent: None,
        }
    }

    /// Annotates a repetition over `[start, end)`.
    #[must_use]
    pub fn repeat(mut self, start: usize, end: usize, rep: RepType) -> Self {
        self.rep_start = start;
        self.rep_end = end;
        self.rep = rep;
        self
    }

    /// Names the production.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Is token index `i` inside the repeated range?
    pub fn in_rep(&self, i: usize) -> bool {
        self.rep != RepType::None && i >= self.rep_start && i < self.rep_end
    }

    /// Does this production have a repetition?
    pub fn has_rep(&self) -> bool {
        self.rep != RepType::None || self.rep_capture.is_some()
    }

    /// Prints the token sequence in .bnf surface syntax.
    fn tokens_to_bnf(&self, world: &World, out: &mut String) {
        let single_rep = self.has_rep() && self.rep_end == self.rep_start + 1;
        let mut last_was_plain = false;
        for (i, token) in self.tokens.iter().enumerate() {
            if self.has_rep() && i == self.rep_start && !single_rep {
                out.push_str(" (");
                last_was_plain = false;
            }
            if !token.is_delim() {
                if last_was_plain {
                    out.push_str(" -");
                }
                out.push(' ');
            }
            match &token.matcher {
                Matcher::Regex(r) => {
                    let _ = write!(out, "\"{}\"", r.pattern);
                }
                Matcher::Rule { rule, .. } => out.push_str(&world.entity(*rule).name),
                Matcher::Delim { kind, .. } => out.push_str(kind.marker()),
            }
            if let Some(target) = &token.binding.target {
                let _ = write!(out, " {target}");
            } else if let Some(invoke) = &token.binding.invoke {
                let _ = write!(out, " -> {invoke}");
            }
            if token.binding.raw {
                out.push('@');
            }
            if let Some(color) = token.binding.color {
                let _ = write!(out, " #{color}");
            }
            if self.has_rep() && i + 1 == self.rep_end {
                if !single_rep {
                    out.push_str(" )");
                }
                out.push_str(self.rep.marker());
                if let Some(capture) = &self.rep_capture {
                    if let Some(name) = capture.capture_name() {
                        let _ = write!(out, " {name}");
                    }
                }
            }
            last_was_plain = !token.is_delim();
        }
    }

    /// Prints the production (with its rule declaration) in .bnf surface
    /// syntax, e.g. `void Start() : "a"+ = test;`.
    pub fn to_bnf(&self, world: &World) -> String {
        let mut out = String::new();
        let rule_entity = world.entity(self.rule);
        if let Some(data) = world.rule_data(self.rule) {
            out.push_str(&data.result.describe(world));
            out.push(' ');
            out.push_str(&rule_entity.name);
            out.push('(');
            for (i, (value, name)) in data.params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{} {name}", value.describe(world));
            }
            out.push(')');
        } else {
            out.push_str(&rule_entity.name);
        }
        if self.priority != 0 {
            let _ = write!(out, "[{}]", self.priority);
        }
        if let Some(result) = &self.result {
            let _ = write!(out, " => {result}");
            if !self.result_params.is_empty() {
                let _ = write!(out, "({})", self.result_params.join(", "));
            }
        }
        out.push_str(" :");
        self.tokens_to_bnf(world, &mut out);
        if let Some(name) = &self.name {
            let _ = write!(out, " = {name}");
        }
        out.push(';');
        out
    }
}
