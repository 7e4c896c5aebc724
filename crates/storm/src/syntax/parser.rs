//! The parser front-end over the grammar runtime.
//!
//! A [`Parser`] is rooted at one rule and matches source text against the
//! rule's productions, highest priority first, with backtracking over
//! repetition counts and production alternatives. A successful parse yields
//! both trees: the match tree for transformation and the info tree for
//! editor tooling. [`Parser::parse_approx`] adds error recovery and reports
//! quantitative [`InfoErrors`] so two candidate parses can be compared.

use std::{path::PathBuf, sync::Arc};

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    diag::{CompileError, SrcPos},
    entity::EntityId,
    syntax::{
        node::{InfoNodeId, InfoTree},
        production::{DelimKind, Matcher, Production, ProductionId, RepType},
        tree::{SynNode, SynNodeId, SynTree, SynValue},
    },
    world::World,
};

/// Quantitative outcome of an error-recovering parse.
///
/// `shifts` counts successfully matched tokens, `skipped` counts characters
/// removed to make the parse succeed. Two candidate parses compare by
/// success first, then fewer skips, then more shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfoErrors {
    pub success: bool,
    pub shifts: u32,
    pub skipped: u32,
}

impl InfoErrors {
    /// Is this outcome strictly better than `other`?
    pub fn better_than(&self, other: &Self) -> bool {
        if self.success != other.success {
            return self.success;
        }
        if self.skipped != other.skipped {
            return self.skipped < other.skipped;
        }
        self.shifts > other.shifts
    }
}

/// One successful match: end position plus the two produced nodes.
type RuleMatch = (usize, SynNodeId, InfoNodeId);

/// A parser rooted at one rule.
#[derive(Debug)]
pub struct Parser {
    root: EntityId,
    src: String,
    file: Option<Arc<PathBuf>>,
    match_end: Option<usize>,
    syn: Option<SynTree>,
    info: Option<InfoTree>,
    errors: InfoErrors,
    furthest: usize,
}

impl Parser {
    /// Creates a parser matching `root`.
    pub fn new(root: EntityId) -> Self {
        Self {
            root,
            src: String::new(),
            file: None,
            match_end: None,
            syn: None,
            info: None,
            errors: InfoErrors::default(),
            furthest: 0,
        }
    }

    /// The root rule.
    pub fn root(&self) -> EntityId {
        self.root
    }

    /// Re-roots the parser at another rule, discarding any previous parse.
    pub fn set_root(&mut self, root: EntityId) {
        self.root = root;
        self.clear();
    }

    /// Do two parsers accept the same language? True when they share the
    /// root rule (productions are global to the world).
    pub fn same_syntax(&self, other: &Self) -> bool {
        self.root == other.root
    }

    /// Discards any previous parse.
    pub fn clear(&mut self) {
        self.match_end = None;
        self.syn = None;
        self.info = None;
        self.errors = InfoErrors::default();
        self.furthest = 0;
    }

    /// Parses `src` starting at byte `start`. Returns true on a match; the
    /// match does not have to reach the end of the text, see
    /// [`Parser::match_end`].
    pub fn parse(&mut self, world: &World, src: &str, file: Option<Arc<PathBuf>>, start: usize) -> bool {
        self.clear();
        self.src = src.to_string();
        self.file = file;
        let mut run = MatchRun {
            world,
            src: &self.src,
            file: self.file.clone(),
            syn: SynTree::new(),
            info: InfoTree::new(),
            active: AHashSet::new(),
            furthest: start,
            shifts: 0,
        };
        let matched = run.rule(self.root, start);
        self.furthest = run.furthest;
        self.errors.shifts = run.shifts;
        match matched {
            Some((end, syn_root, info_root)) => {
                run.syn.set_root(syn_root);
                run.info.set_root(info_root);
                self.syn = Some(run.syn);
                self.info = Some(run.info);
                self.match_end = Some(end);
                self.errors.success = true;
                true
            }
            None => false,
        }
    }

    /// Parses with error recovery: characters are skipped at the furthest
    /// failure position until the text parses or the repair budget runs
    /// out. The outcome is quantified in the returned [`InfoErrors`].
    pub fn parse_approx(&mut self, world: &World, src: &str, file: Option<Arc<PathBuf>>) -> InfoErrors {
        const MAX_REPAIRS: u32 = 200;

        let mut work = src.to_string();
        let mut skipped = 0u32;
        loop {
            // Recovery aims for a parse of the whole text; a partial match
            // counts as a failure at its end.
            if self.parse(world, &work, file.clone(), 0) && self.match_end == Some(work.len()) {
                self.errors.skipped = skipped;
                if skipped > 0 {
                    if let (Some(root), Some(info)) = (self.info_root(), self.info.as_mut()) {
                        info.set_error(root, true);
                    }
                }
                return self.errors;
            }
            let stuck_at = match self.match_end {
                Some(end) if end > self.furthest => end,
                _ => self.furthest,
            };
            if skipped >= MAX_REPAIRS || work.is_empty() {
                self.errors.success = false;
                self.errors.skipped = skipped;
                return self.errors;
            }
            // Remove one character at the furthest failure point and retry.
            let at = stuck_at.min(work.len().saturating_sub(1));
            let at = floor_char_boundary(&work, at);
            work.remove(at);
            skipped += 1;
        }
    }

    /// End of the match (byte offset into the source), when one exists.
    pub fn match_end(&self) -> Option<usize> {
        self.match_end
    }

    /// Did the last parse produce a tree?
    pub fn has_tree(&self) -> bool {
        self.syn.is_some()
    }

    /// The match tree of the last parse.
    pub fn tree(&mut self) -> Option<&mut SynTree> {
        self.syn.as_mut()
    }

    /// The info tree of the last parse, covering the matched range.
    pub fn info_tree(&mut self) -> Option<&mut InfoTree> {
        self.info.as_mut()
    }

    fn info_root(&self) -> Option<InfoNodeId> {
        self.info.as_ref().and_then(InfoTree::root)
    }

    /// The info tree extended to the full source: any text past the match
    /// end is appended as an error leaf.
    pub fn full_info_tree(&mut self) -> Option<&mut InfoTree> {
        let end = self.match_end?;
        if end < self.src.len() {
            let tail = self.src[end..].to_string();
            let info = self.info.as_mut()?;
            let root = info.root()?;
            let production = info.production(root)?;
            let leaf = info.leaf(None, tail);
            info.set_error(leaf, true);
            let new_root = info.internal(production, vec![root, leaf]);
            info.set_root(new_root);
            self.match_end = Some(self.src.len());
        }
        self.info.as_mut()
    }

    /// The quantified outcome of the last parse.
    pub fn errors(&self) -> InfoErrors {
        self.errors
    }

    /// The syntax error of the last failed parse, placed at the furthest
    /// position any production reached.
    pub fn error(&self) -> Option<CompileError> {
        if self.errors.success && self.errors.skipped == 0 {
            return None;
        }
        let pos = match &self.file {
            Some(file) => SrcPos::new(file.clone(), u32::try_from(self.furthest).unwrap_or(u32::MAX), 1),
            None => SrcPos::unknown(),
        };
        Some(CompileError::syntax(
            pos,
            format!("syntax error at offset {}", self.furthest),
        ))
    }
}

/// Rounds `at` down to a char boundary of `s`.
fn floor_char_boundary(s: &str, mut at: usize) -> usize {
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

/// State of one matching run.
struct MatchRun<'w> {
    world: &'w World,
    src: &'w str,
    file: Option<Arc<PathBuf>>,
    syn: SynTree,
    info: InfoTree,
    /// (rule, position) pairs currently being matched; breaks left
    /// recursion.
    active: AHashSet<(EntityId, usize)>,
    furthest: usize,
    shifts: u32,
}

/// Captures and info nodes produced while matching a token sequence.
#[derive(Default)]
struct SeqMatch {
    end: usize,
    /// (token index within the sequence, captured value).
    captures: Vec<(usize, SynValue)>,
    info: Vec<InfoNodeId>,
}

impl MatchRun<'_> {
    fn pos_of(&self, start: usize, end: usize) -> SrcPos {
        match &self.file {
            Some(file) => SrcPos::new(
                file.clone(),
                u32::try_from(start).unwrap_or(u32::MAX),
                u32::try_from(end - start).unwrap_or(0),
            ),
            None => SrcPos::unknown(),
        }
    }

    /// Matches `rule` at `pos`: its productions in priority order, first
    /// hit wins.
    fn rule(&mut self, rule: EntityId, pos: usize) -> Option<RuleMatch> {
        let key = (rule, pos);
        if !self.active.insert(key) {
            return None;
        }
        let mut productions: Vec<ProductionId> = self
            .world
            .rule_data(rule)
            .map(|d| d.productions.clone())
            .unwrap_or_default();
        productions.sort_by_key(|&p| std::cmp::Reverse(self.world.production(p).priority));

        let mut result = None;
        for prod in productions {
            if let Some(m) = self.production(prod, pos) {
                result = Some(m);
                break;
            }
        }
        self.active.remove(&key);
        result
    }

    /// Matches one production at `pos`.
    fn production(&mut self, prod_id: ProductionId, pos: usize) -> Option<RuleMatch> {
        let prod = self.world.production(prod_id).clone();
        let (rep_start, rep_end) = if prod.has_rep() {
            (prod.rep_start, prod.rep_end)
        } else {
            (prod.tokens.len(), prod.tokens.len())
        };

        let prefix = self.seq(&prod.tokens[..rep_start], pos)?;
        let range_start = prefix.end;

        // Collect repetition iterations greedily; the suffix below
        // backtracks over the count.
        let rep_tokens = &prod.tokens[rep_start..rep_end];
        let mut iterations: Vec<SeqMatch> = Vec::new();
        if !rep_tokens.is_empty() {
            let single = prod.rep == RepType::None || prod.rep == RepType::ZeroOne;
            let mut cur = range_start;
            loop {
                let Some(m) = self.seq(rep_tokens, cur) else { break };
                if m.end == cur {
                    // A zero-length iteration would repeat forever.
                    iterations.push(m);
                    break;
                }
                cur = m.end;
                iterations.push(m);
                if single {
                    break;
                }
            }
        }

        let min_count = match prod.rep {
            RepType::None => usize::from(!rep_tokens.is_empty()),
            RepType::OnePlus => 1,
            RepType::ZeroOne | RepType::ZeroPlus => 0,
        };
        let max_count = iterations.len();
        if max_count < min_count {
            return None;
        }

        // Try the suffix with the largest repetition count first.
        for count in (min_count..=max_count).rev() {
            let range_end = if count == 0 {
                range_start
            } else {
                iterations[count - 1].end
            };
            let Some(suffix) = self.seq(&prod.tokens[rep_end..], range_end) else {
                continue;
            };
            return Some(self.assemble(
                prod_id,
                &prod,
                pos,
                &prefix,
                &iterations[..count],
                range_start,
                range_end,
                &suffix,
            ));
        }
        None
    }

    /// Matches a token sequence with no internal alternatives.
    fn seq(&mut self, tokens: &[crate::syntax::production::Token], pos: usize) -> Option<SeqMatch> {
        let mut out = SeqMatch {
            end: pos,
            ..SeqMatch::default()
        };
        for (i, token) in tokens.iter().enumerate() {
            let (end, value, info) = self.token(token, out.end)?;
            out.end = end;
            out.info.push(info);
            if let Some(value) = value {
                out.captures.push((i, value));
            }
        }
        Some(out)
    }

    /// Matches one token at `pos`.
    fn token(
        &mut self,
        token: &crate::syntax::production::Token,
        pos: usize,
    ) -> Option<(usize, Option<SynValue>, InfoNodeId)> {
        match &token.matcher {
            Matcher::Regex(regex) => {
                let Some(len) = regex.match_len(&self.src[pos..]) else {
                    self.furthest = self.furthest.max(pos);
                    return None;
                };
                let text = &self.src[pos..pos + len];
                let leaf = self.info.leaf(Some(regex.pattern.clone()), text);
                if let Some(color) = token.binding.color {
                    self.info.set_color(leaf, color);
                }
                self.shifts += 1;
                let value = token
                    .binding
                    .bound()
                    .then(|| SynValue::Str(text.to_string(), self.pos_of(pos, pos + len)));
                Some((pos + len, value, leaf))
            }
            Matcher::Rule { rule, .. } => {
                let (end, node, info) = self.rule(*rule, pos)?;
                let value = token.binding.bound().then(|| {
                    if token.binding.raw {
                        SynValue::Raw(node)
                    } else {
                        SynValue::Node(node)
                    }
                });
                Some((end, value, info))
            }
            Matcher::Delim { kind, rule } => match rule {
                Some(rule) => {
                    let matched = self.rule(*rule, pos);
                    match (matched, kind) {
                        (Some((end, _, info)), _) => Some((end, None, info)),
                        (None, DelimKind::Optional) => {
                            let leaf = self.info.leaf(None, "");
                            Some((pos, None, leaf))
                        }
                        (None, DelimKind::Required) => {
                            self.furthest = self.furthest.max(pos);
                            None
                        }
                    }
                }
                None => match kind {
                    // No delimiter declared: the optional one matches
                    // nothing, the required one can never match.
                    DelimKind::Optional => {
                        let leaf = self.info.leaf(None, "");
                        Some((pos, None, leaf))
                    }
                    DelimKind::Required => {
                        self.furthest = self.furthest.max(pos);
                        None
                    }
                },
            },
        }
    }

    /// Builds the two result nodes out of a complete production match.
    #[expect(clippy::too_many_arguments, reason = "all pieces of one match")]
    fn assemble(
        &mut self,
        prod_id: ProductionId,
        prod: &Production,
        start: usize,
        prefix: &SeqMatch,
        iterations: &[SeqMatch],
        range_start: usize,
        range_end: usize,
        suffix: &SeqMatch,
    ) -> RuleMatch {
        let mut members: indexmap::IndexMap<String, SynValue> = indexmap::IndexMap::new();

        // Captures outside the repetition bind directly.
        for (i, value) in &prefix.captures {
            if let Some(name) = prod.tokens[*i].binding.capture_name() {
                members.insert(name.to_string(), value.clone());
            }
        }
        for (i, value) in &suffix.captures {
            if let Some(name) = prod.tokens[prod.rep_end + *i].binding.capture_name() {
                members.insert(name.to_string(), value.clone());
            }
        }

        // Captures inside the repetition get their shape from the mode.
        let rep_names: Vec<(usize, String)> = prod.tokens[prod.rep_start..prod.rep_end.min(prod.tokens.len())]
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.binding.capture_name().map(|n| (i, n.to_string())))
            .collect();
        for (i, name) in rep_names {
            let collected: Vec<SynValue> = iterations
                .iter()
                .flat_map(|iter| {
                    iter.captures
                        .iter()
                        .filter(|(ti, _)| *ti == i)
                        .map(|(_, v)| v.clone())
                })
                .collect();
            let value = match prod.rep {
                RepType::ZeroOne => SynValue::Maybe(collected.into_iter().next().map(Box::new)),
                RepType::OnePlus | RepType::ZeroPlus => SynValue::Array(collected),
                RepType::None => match collected.into_iter().next() {
                    Some(v) => v,
                    None => continue,
                },
            };
            members.insert(name, value);
        }

        // The raw range capture.
        if let Some(capture) = &prod.rep_capture {
            if let Some(name) = capture.capture_name() {
                members.insert(
                    name.to_string(),
                    SynValue::Str(
                        self.src[range_start..range_end].to_string(),
                        self.pos_of(range_start, range_end),
                    ),
                );
            }
        }

        let end = suffix.end;
        let node = self.syn.add(SynNode {
            production: prod_id,
            pos: self.pos_of(start, end),
            members,
        });

        let mut children: Vec<InfoNodeId> = prefix.info.clone();
        for iter in iterations {
            children.extend(iter.info.iter().copied());
        }
        children.extend(suffix.info.iter().copied());
        let info = self.info.internal(prod_id, children);
        if let Some(indent) = prod.indent {
            self.info.set_indent(info, indent);
        }
        (end, node, info)
    }
}
