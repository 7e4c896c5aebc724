//! The concrete syntax tree used for editor tooling.
//!
//! Unlike the match tree, an info tree contains every character of the
//! parsed text, including partial parses where a failed non-terminal is
//! represented by a plain string leaf. Nodes carry no absolute offsets, so
//! the tree can be updated incrementally. Each node caches its length and
//! an error flag in a single 32-bit field; mutating a node invalidates the
//! caches up the parent chain.

use crate::syntax::{
    production::{IndentInfo, IndentType, ProductionId},
    rule::TokenColor,
};

/// Identifier of a node within one [`InfoTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoNodeId(u32);

impl InfoNodeId {
    fn new(index: usize) -> Self {
        Self(index.try_into().expect("info tree overflow"))
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Error flag: the most significant bit of the cache word.
const ERROR_MASK: u32 = 0x8000_0000;
/// Length cache: the remaining bits. All ones means "recompute".
const LENGTH_MASK: u32 = 0x7FFF_FFFF;

/// The indentation computed for a position: either an absolute level, or
/// "same as the indentation at this other position".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextIndent {
    Level(i32),
    AsPosition(u32),
}

#[derive(Debug)]
enum InfoKind {
    /// A matched string. `regex` is the pattern it matched, absent for
    /// error-recovery leaves.
    Leaf { regex: Option<String>, text: String },
    /// An inner node: an instance of a production.
    Internal {
        production: ProductionId,
        children: Vec<InfoNodeId>,
        indent: Option<IndentInfo>,
    },
}

#[derive(Debug)]
struct InfoNodeData {
    parent: Option<InfoNodeId>,
    color: Option<TokenColor>,
    /// msb: an error was corrected within this node (ignoring children).
    /// rest: cached length; all ones when it needs to be recomputed.
    cache: u32,
    kind: InfoKind,
}

/// An arena-backed concrete syntax tree.
#[derive(Debug, Default)]
pub struct InfoTree {
    nodes: Vec<InfoNodeData>,
    root: Option<InfoNodeId>,
}

impl InfoTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// The root node, if the tree is non-empty.
    pub fn root(&self) -> Option<InfoNodeId> {
        self.root
    }

    pub fn set_root(&mut self, root: InfoNodeId) {
        self.root = Some(root);
    }

    /// Creates a leaf node holding `text`.
    pub fn leaf(&mut self, regex: Option<String>, text: impl Into<String>) -> InfoNodeId {
        let id = InfoNodeId::new(self.nodes.len());
        self.nodes.push(InfoNodeData {
            parent: None,
            color: None,
            cache: LENGTH_MASK,
            kind: InfoKind::Leaf {
                regex,
                text: text.into(),
            },
        });
        id
    }

    /// Creates an internal node for `production` with `children`, wiring up
    /// the parent pointers.
    pub fn internal(&mut self, production: ProductionId, children: Vec<InfoNodeId>) -> InfoNodeId {
        let id = InfoNodeId::new(self.nodes.len());
        for &child in &children {
            self.nodes[child.index()].parent = Some(id);
        }
        self.nodes.push(InfoNodeData {
            parent: None,
            color: None,
            cache: LENGTH_MASK,
            kind: InfoKind::Internal {
                production,
                children,
                indent: None,
            },
        });
        id
    }

    /// The parent of `id`, if any.
    pub fn parent(&self, id: InfoNodeId) -> Option<InfoNodeId> {
        self.nodes[id.index()].parent
    }

    /// The production of an internal node.
    pub fn production(&self, id: InfoNodeId) -> Option<ProductionId> {
        match &self.nodes[id.index()].kind {
            InfoKind::Internal { production, .. } => Some(*production),
            InfoKind::Leaf { .. } => None,
        }
    }

    /// The children of an internal node; empty for leaves.
    pub fn children(&self, id: InfoNodeId) -> Vec<InfoNodeId> {
        match &self.nodes[id.index()].kind {
            InfoKind::Internal { children, .. } => children.clone(),
            InfoKind::Leaf { .. } => Vec::new(),
        }
    }

    /// Sets the indentation annotation of an internal node.
    pub fn set_indent(&mut self, id: InfoNodeId, indent: IndentInfo) {
        if let InfoKind::Internal { indent: slot, .. } = &mut self.nodes[id.index()].kind {
            *slot = Some(indent);
        }
    }

    pub fn set_color(&mut self, id: InfoNodeId, color: TokenColor) {
        self.nodes[id.index()].color = Some(color);
    }

    pub fn color(&self, id: InfoNodeId) -> Option<TokenColor> {
        self.nodes[id.index()].color
    }

    /// The error flag of this node (not counting children).
    pub fn error(&self, id: InfoNodeId) -> bool {
        self.nodes[id.index()].cache & ERROR_MASK != 0
    }

    pub fn set_error(&mut self, id: InfoNodeId, error: bool) {
        let cache = &mut self.nodes[id.index()].cache;
        if error {
            *cache |= ERROR_MASK;
        } else {
            *cache &= !ERROR_MASK;
        }
    }

    /// The length of the match below `id`, in characters. Cached; computed
    /// on first use.
    pub fn length(&mut self, id: InfoNodeId) -> u32 {
        let cached = self.nodes[id.index()].cache & LENGTH_MASK;
        if cached != LENGTH_MASK {
            return cached;
        }
        let computed = match &self.nodes[id.index()].kind {
            InfoKind::Leaf { text, .. } => u32::try_from(text.chars().count()).unwrap_or(LENGTH_MASK - 1),
            InfoKind::Internal { children, .. } => {
                let children = children.clone();
                children.into_iter().map(|c| self.length(c)).sum()
            }
        };
        let computed = computed.min(LENGTH_MASK - 1);
        let cache = &mut self.nodes[id.index()].cache;
        *cache = (*cache & ERROR_MASK) | computed;
        computed
    }

    /// Invalidate the cached length of `id` and every ancestor.
    fn invalidate(&mut self, id: InfoNodeId) {
        let mut cur = Some(id);
        while let Some(node) = cur {
            let data = &mut self.nodes[node.index()];
            data.cache |= LENGTH_MASK;
            cur = data.parent;
        }
    }

    /// Replaces the text of a leaf, invalidating caches up the chain.
    pub fn set_leaf_text(&mut self, id: InfoNodeId, text: impl Into<String>) {
        if let InfoKind::Leaf { text: slot, .. } = &mut self.nodes[id.index()].kind {
            *slot = text.into();
        }
        self.invalidate(id);
    }

    /// Replaces child `at` of an internal node, invalidating caches.
    pub fn set_child(&mut self, id: InfoNodeId, at: usize, child: InfoNodeId) {
        if let InfoKind::Internal { children, .. } = &mut self.nodes[id.index()].kind {
            children[at] = child;
            self.nodes[child.index()].parent = Some(id);
        }
        self.invalidate(id);
    }

    /// The first leaf with a non-zero length at `pos`, relative to `id`.
    pub fn leaf_at(&mut self, id: InfoNodeId, pos: u32) -> Option<InfoNodeId> {
        if pos >= self.length(id) {
            return None;
        }
        match &self.nodes[id.index()].kind {
            InfoKind::Leaf { .. } => Some(id),
            InfoKind::Internal { children, .. } => {
                let children = children.clone();
                let mut offset = pos;
                for child in children {
                    let len = self.length(child);
                    if offset < len {
                        return self.leaf_at(child, offset);
                    }
                    offset -= len;
                }
                None
            }
        }
    }

    /// Computes the indentation at `pos` relative to `id` by walking the
    /// path down to the position and applying the annotations of every
    /// internal node along the way.
    pub fn indent_at(&mut self, id: InfoNodeId, pos: u32) -> TextIndent {
        self.indent_walk(id, pos, 0)
    }

    fn indent_walk(&mut self, id: InfoNodeId, pos: u32, base: u32) -> TextIndent {
        let (children, indent) = match &self.nodes[id.index()].kind {
            InfoKind::Leaf { .. } => return TextIndent::Level(0),
            InfoKind::Internal { children, indent, .. } => (children.clone(), *indent),
        };
        let mut offset = pos;
        let mut child_base = base;
        for (i, child) in children.iter().enumerate() {
            let len = self.length(*child);
            if offset < len {
                let inner = self.indent_walk(*child, offset, child_base);
                return match (inner, indent) {
                    (TextIndent::AsPosition(p), _) => TextIndent::AsPosition(p),
                    (TextIndent::Level(level), Some(info)) if info.contains(i) => match info.kind {
                        IndentType::Increase => TextIndent::Level(level + 1),
                        IndentType::Decrease => TextIndent::Level(level - 1),
                        // The weak variant does not indent the very first
                        // character of the range.
                        IndentType::WeakIncrease => {
                            if i == info.start && offset == 0 {
                                TextIndent::Level(level)
                            } else {
                                TextIndent::Level(level + 1)
                            }
                        }
                        IndentType::AlignBegin => TextIndent::AsPosition(self.range_offset(&children, info.start, child_base)),
                        IndentType::AlignEnd => TextIndent::AsPosition(self.range_offset(&children, info.end, child_base)),
                    },
                    (level, _) => level,
                };
            }
            offset -= len;
            child_base += len;
        }
        TextIndent::Level(0)
    }

    /// Absolute offset of the start of child `index`, given the absolute
    /// offset of child 0.
    fn range_offset(&mut self, children: &[InfoNodeId], index: usize, first: u32) -> u32 {
        let mut offset = first;
        for child in &children[..index.min(children.len())] {
            offset += self.length(*child);
        }
        offset
    }

    fn format_into(&self, id: InfoNodeId, out: &mut String) {
        match &self.nodes[id.index()].kind {
            InfoKind::Leaf { text, .. } => out.push_str(text),
            InfoKind::Internal { children, .. } => {
                for child in children {
                    self.format_into(*child, out);
                }
            }
        }
    }

    /// Reconstructs the source below `id`, character for character.
    pub fn format(&self, id: InfoNodeId) -> String {
        let mut out = String::new();
        self.format_into(id, &mut out);
        out
    }

    /// Reconstructs the entire source.
    pub fn to_source(&self) -> String {
        match self.root {
            Some(root) => self.format(root),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prod() -> ProductionId {
        ProductionId::new(0)
    }

    #[test]
    fn length_is_cached_and_invalidated_up_the_chain() {
        let mut tree = InfoTree::new();
        let a = tree.leaf(None, "foo");
        let b = tree.leaf(None, "barbaz");
        let root = tree.internal(prod(), vec![a, b]);
        tree.set_root(root);

        assert_eq!(tree.length(root), 9);
        tree.set_leaf_text(a, "x");
        assert_eq!(tree.length(root), 7);
        assert_eq!(tree.length(a), 1);
    }

    #[test]
    fn error_flag_shares_the_cache_word() {
        let mut tree = InfoTree::new();
        let leaf = tree.leaf(None, "oops");
        assert!(!tree.error(leaf));
        tree.set_error(leaf, true);
        assert!(tree.error(leaf));
        // The length computation must not disturb the error bit.
        assert_eq!(tree.length(leaf), 4);
        assert!(tree.error(leaf));
        tree.set_error(leaf, false);
        assert_eq!(tree.length(leaf), 4);
    }

    #[test]
    fn format_round_trips_the_source() {
        let mut tree = InfoTree::new();
        let a = tree.leaf(Some("[a-z]+".into()), "hello");
        let ws = tree.leaf(Some("\\s*".into()), " ");
        let b = tree.leaf(Some("[a-z]+".into()), "world");
        let root = tree.internal(prod(), vec![a, ws, b]);
        tree.set_root(root);
        assert_eq!(tree.to_source(), "hello world");
    }

    #[test]
    fn leaf_at_finds_the_covering_leaf() {
        let mut tree = InfoTree::new();
        let a = tree.leaf(None, "ab");
        let b = tree.leaf(None, "cd");
        let root = tree.internal(prod(), vec![a, b]);
        tree.set_root(root);
        assert_eq!(tree.leaf_at(root, 0), Some(a));
        assert_eq!(tree.leaf_at(root, 1), Some(a));
        assert_eq!(tree.leaf_at(root, 2), Some(b));
        assert_eq!(tree.leaf_at(root, 4), None);
    }
}
