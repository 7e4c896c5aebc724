//! The user-facing match tree and the transform contract.
//!
//! A successful parse produces a [`SynTree`]: one node per matched
//! production, with the captured tokens stored as the members of the
//! production type. Transforming a node turns it into the rule's declared
//! result: the transform constructs the result (`me`), materialises member
//! dependencies (rejecting cycles), sends invoke-marked captures to `me`,
//! and gives each repetition mode its control-flow shape: an if-let for
//! `?`, a bounded loop for `+` and `*`.

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::{
    diag::{CResult, CompileError, ErrorKind, SrcPos},
    syntax::production::ProductionId,
    world::World,
};

/// Identifier of a node within one [`SynTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SynNodeId(u32);

impl SynNodeId {
    fn new(index: usize) -> Self {
        Self(index.try_into().expect("match tree overflow"))
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A captured value in the match tree.
#[derive(Debug, Clone)]
pub enum SynValue {
    /// A matched string and where it matched.
    Str(String, SrcPos),
    /// A matched sub-rule, transformed on demand.
    Node(SynNodeId),
    /// A matched sub-rule captured raw: the transform leaves it alone.
    Raw(SynNodeId),
    /// A `?` capture.
    Maybe(Option<Box<SynValue>>),
    /// A `+` or `*` capture.
    Array(Vec<SynValue>),
}

/// One production instance in the match tree.
#[derive(Debug)]
pub struct SynNode {
    pub production: ProductionId,
    pub pos: SrcPos,
    /// Captured members, keyed by the member name of the production type.
    pub members: IndexMap<String, SynValue>,
}

/// An arena-backed match tree.
#[derive(Debug, Default)]
pub struct SynTree {
    nodes: Vec<SynNode>,
    root: Option<SynNodeId>,
}

impl SynTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<SynNodeId> {
        self.root
    }

    pub fn set_root(&mut self, root: SynNodeId) {
        self.root = Some(root);
    }

    pub fn add(&mut self, node: SynNode) -> SynNodeId {
        let id = SynNodeId::new(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: SynNodeId) -> &SynNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: SynNodeId) -> &mut SynNode {
        &mut self.nodes[id.index()]
    }

    /// Transforms `node` into the declared result of its rule.
    pub fn transform(&mut self, world: &mut World, node: SynNodeId) -> CResult<SynValue> {
        let mut t = Transformer {
            world,
            visiting: AHashSet::new(),
        };
        t.node(self, node)
    }
}

/// Transform state: tracks the members currently being materialised so
/// dependency cycles are rejected instead of looping.
struct Transformer<'w> {
    world: &'w mut World,
    visiting: AHashSet<(SynNodeId, String)>,
}

impl Transformer<'_> {
    fn node(&mut self, tree: &mut SynTree, id: SynNodeId) -> CResult<SynValue> {
        let production = tree.node(id).production;
        let prod = self.world.production(production).clone();

        // Construct `me`: a parameter literally named `me` wins, then the
        // declared result expression, then the production instance itself.
        let mut me = if tree.node(id).members.contains_key("me") {
            self.member(tree, id, "me")?
        } else if let Some(result) = &prod.result {
            if tree.node(id).members.contains_key(result.as_str()) {
                self.member(tree, id, result)?
            } else if prod.result_params.is_empty() {
                return Err(CompileError::new(
                    ErrorKind::LangDefError,
                    format!("the result {result} of {} is not a captured member", prod_label(&prod)),
                ));
            } else {
                // A constructor call: materialise the declared arguments
                // into a fresh instance of the production type.
                let mut members = IndexMap::new();
                for arg in &prod.result_params {
                    let value = self.member(tree, id, arg)?;
                    members.insert(arg.clone(), value);
                }
                let pos = tree.node(id).pos.clone();
                let fresh = tree.add(SynNode {
                    production,
                    pos,
                    members,
                });
                SynValue::Node(fresh)
            }
        } else {
            SynValue::Node(id)
        };

        // Deliver invoke-marked captures to `me`.
        let invokes: Vec<(String, String)> = prod
            .tokens
            .iter()
            .filter_map(|t| t.binding.invoke.as_ref().map(|i| (i.clone(), i.clone())))
            .chain(
                prod.rep_capture
                    .as_ref()
                    .and_then(|c| c.invoke.as_ref())
                    .map(|i| (i.clone(), i.clone())),
            )
            .collect();
        for (member, method) in invokes {
            if !tree.node(id).members.contains_key(member.as_str()) {
                continue;
            }
            let value = self.member(tree, id, &member)?;
            self.deliver(tree, &mut me, &method, value)?;
        }

        Ok(me)
    }

    /// Materialises one member: transforms captured sub-rules and gives
    /// repetitions their shapes. Cycles between members are an error.
    fn member(&mut self, tree: &mut SynTree, id: SynNodeId, name: &str) -> CResult<SynValue> {
        let key = (id, name.to_string());
        if !self.visiting.insert(key.clone()) {
            return Err(CompileError::new(
                ErrorKind::LangDefError,
                format!("cyclic dependency while materialising the member {name}"),
            ));
        }
        let value = tree.node(id).members.get(name).cloned().ok_or_else(|| {
            CompileError::new(ErrorKind::LangDefError, format!("no captured member named {name}"))
        })?;
        let result = self.value(tree, value);
        self.visiting.remove(&key);
        result
    }

    fn value(&mut self, tree: &mut SynTree, value: SynValue) -> CResult<SynValue> {
        match value {
            SynValue::Node(inner) => self.node(tree, inner),
            raw @ SynValue::Raw(_) => Ok(raw),
            s @ SynValue::Str(..) => Ok(s),
            // `?`: transform inside the if-let.
            SynValue::Maybe(inner) => Ok(SynValue::Maybe(match inner {
                Some(v) => Some(Box::new(self.value(tree, *v)?)),
                None => None,
            })),
            // `+` / `*`: transform each element in order.
            SynValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.value(tree, item)?);
                }
                Ok(SynValue::Array(out))
            }
        }
    }

    /// Sends `value` to the member `method` on `me`. Arrays accumulate;
    /// other members are overwritten by the latest delivery.
    fn deliver(&mut self, tree: &mut SynTree, me: &mut SynValue, method: &str, value: SynValue) -> CResult<()> {
        let target = match me {
            SynValue::Node(t) | SynValue::Raw(t) => *t,
            _ => {
                return Err(CompileError::new(
                    ErrorKind::LangDefError,
                    format!("can not invoke {method}: the transform result is not an object"),
                ));
            }
        };
        let members = &mut tree.node_mut(target).members;
        match (members.get_mut(method), value) {
            (Some(SynValue::Array(existing)), SynValue::Array(mut items)) => existing.append(&mut items),
            (Some(SynValue::Array(existing)), item) => existing.push(item),
            (_, value) => {
                members.insert(method.to_string(), value);
            }
        }
        Ok(())
    }
}

fn prod_label(prod: &crate::syntax::production::Production) -> String {
    prod.name.clone().unwrap_or_else(|| "an unnamed production".to_string())
}
