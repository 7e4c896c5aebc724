//! Names and name parts.
//!
//! A name is a sequence of parts, each carrying a string and zero or more
//! parameters. Parameters are either already resolved to [`Value`]s
//! ([`SimplePart`]) or are themselves names that must be resolved against a
//! scope first ([`RecPart`]). A [`SimpleName`] contains only resolved parts
//! and is usable as a deep map key; a [`Name`] may mix both.

use std::fmt;

use smallvec::SmallVec;

use crate::{
    diag::{CResult, CompileError, ErrorKind, SrcPos},
    entity::EntityId,
    nameset::NameOverloads,
    scope::Scope,
    value::Value,
    world::World,
};

/// One resolved part of a name: a string and resolved parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SimplePart {
    /// The identifier of this part.
    pub name: String,
    /// Resolved parameters, used for overload disambiguation.
    pub params: SmallVec<[Value; 4]>,
}

impl SimplePart {
    /// Creates a part with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: SmallVec::new(),
        }
    }

    /// Creates a part with parameters.
    pub fn with_params(name: impl Into<String>, params: impl IntoIterator<Item = Value>) -> Self {
        Self {
            name: name.into(),
            params: params.into_iter().collect(),
        }
    }

    /// Creates a part with a single parameter.
    pub fn with_param(name: impl Into<String>, param: Value) -> Self {
        Self::with_params(name, [param])
    }

    /// Computes the badness of `candidate` against this part.
    ///
    /// 0 is an exact match, larger values mean more conversions, and -1
    /// means the candidate is incompatible. The candidate's parameters are
    /// the formal ones; ours are the actuals.
    pub fn badness(&self, world: &World, candidate: EntityId) -> i32 {
        let formals = &world.entity(candidate).params;
        if formals.len() != self.params.len() {
            return -1;
        }
        let mut total = 0;
        for (formal, actual) in formals.iter().zip(self.params.iter()) {
            let cost = formal.conversion_cost(world, *actual);
            if cost < 0 {
                return -1;
            }
            total += cost;
        }
        total
    }

    /// Chooses the lowest-badness candidate from an overloads slot.
    ///
    /// Candidates not visible from `source` are skipped. A tie at the
    /// minimum badness between distinct candidates is an ambiguity error
    /// listing all of them.
    pub fn choose(&self, world: &World, from: &NameOverloads, source: &Scope) -> CResult<Option<EntityId>> {
        let mut best: Vec<EntityId> = Vec::new();
        let mut best_badness = i32::MAX;
        for &candidate in from.items() {
            if !world.visible(candidate, source.top) {
                continue;
            }
            let badness = self.badness(world, candidate);
            if badness < 0 {
                continue;
            }
            if badness < best_badness {
                best_badness = badness;
                best.clear();
                best.push(candidate);
            } else if badness == best_badness {
                best.push(candidate);
            }
        }
        match best.len() {
            0 => Ok(None),
            1 => Ok(Some(best[0])),
            _ => {
                let mut msg = format!("ambiguous match for {}: candidates are", self.describe(world));
                for id in &best {
                    msg.push_str(&format!(" {}", world.path_string(*id)));
                }
                Err(CompileError::new(ErrorKind::TypeError, msg))
            }
        }
    }

    /// Human-readable form, e.g. `f(core.Int, core.Str)`.
    pub fn describe(&self, world: &World) -> String {
        if self.params.is_empty() {
            return self.name.clone();
        }
        let params: Vec<String> = self.params.iter().map(|p| p.describe(world)).collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

impl fmt::Display for SimplePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}(...{})", self.name, self.params.len())
        }
    }
}

/// One unresolved part of a name: parameters are names themselves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecPart {
    /// The identifier of this part.
    pub name: String,
    /// Unresolved parameters.
    pub params: Vec<Name>,
}

impl RecPart {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Adds a parameter.
    pub fn push(&mut self, param: Name) {
        self.params.push(param);
    }

    /// Resolves every parameter against `scope`, producing a simple part.
    ///
    /// Fails with the parameter's resolution error if any parameter does not
    /// name a type in `scope`.
    pub fn resolve(&self, world: &mut World, scope: &Scope) -> CResult<SimplePart> {
        let mut params = SmallVec::with_capacity(self.params.len());
        for param in &self.params {
            params.push(scope.value(world, param, SrcPos::unknown())?);
        }
        Ok(SimplePart {
            name: self.name.clone(),
            params,
        })
    }
}

/// One part of a [`Name`]: either resolved or recursive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePart {
    Simple(SimplePart),
    Rec(RecPart),
}

impl NamePart {
    /// The string of this part regardless of variant.
    pub fn name(&self) -> &str {
        match self {
            Self::Simple(p) => &p.name,
            Self::Rec(p) => &p.name,
        }
    }

    /// Resolves this part against `scope`.
    pub fn resolve(&self, world: &mut World, scope: &Scope) -> CResult<SimplePart> {
        match self {
            Self::Simple(p) => Ok(p.clone()),
            Self::Rec(p) => p.resolve(world, scope),
        }
    }
}

/// A possibly-unresolved sequence of name parts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Name {
    parts: Vec<NamePart>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a name from a single simple part.
    pub fn simple(part: SimplePart) -> Self {
        Self {
            parts: vec![NamePart::Simple(part)],
        }
    }

    /// Parses a dotted name such as `core.lang.Int` into paramless parts.
    pub fn parse(text: &str) -> CResult<Self> {
        let simple = SimpleName::parse(text)?;
        Ok(Self {
            parts: simple.parts.into_iter().map(NamePart::Simple).collect(),
        })
    }

    pub fn push(&mut self, part: NamePart) {
        self.parts.push(part);
    }

    pub fn push_simple(&mut self, part: SimplePart) {
        self.parts.push(NamePart::Simple(part));
    }

    pub fn parts(&self) -> &[NamePart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Resolves all parts against `scope`, producing a [`SimpleName`].
    pub fn resolve(&self, world: &mut World, scope: &Scope) -> CResult<SimpleName> {
        let mut parts = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            parts.push(part.resolve(world, scope)?);
        }
        Ok(SimpleName { parts })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", part.name())?;
        }
        Ok(())
    }
}

/// A fully resolved name: a sequence of [`SimplePart`]s.
///
/// Equality and hashing are deep, so simple names are usable as map keys,
/// for instance in the reader registry and the template registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SimpleName {
    parts: Vec<SimplePart>,
}

impl SimpleName {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: Vec<SimplePart>) -> Self {
        Self { parts }
    }

    /// Parses a dotted name such as `lang.bs.reader` into paramless parts.
    ///
    /// Empty names and empty parts are [`ErrorKind::InvalidName`] errors.
    pub fn parse(text: &str) -> CResult<Self> {
        if text.is_empty() {
            return Err(CompileError::new(ErrorKind::InvalidName, "empty name"));
        }
        let mut parts = Vec::new();
        for piece in text.split('.') {
            if piece.is_empty() {
                return Err(CompileError::new(
                    ErrorKind::InvalidName,
                    format!("empty part in name {text:?}"),
                ));
            }
            parts.push(SimplePart::new(piece));
        }
        Ok(Self { parts })
    }

    pub fn push(&mut self, part: SimplePart) {
        self.parts.push(part);
    }

    pub fn parts(&self) -> &[SimplePart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// The last part, if any.
    pub fn last(&self) -> Option<&SimplePart> {
        self.parts.last()
    }

    /// Everything but the last part.
    #[must_use]
    pub fn parent(&self) -> Self {
        let mut parts = self.parts.clone();
        parts.pop();
        Self { parts }
    }

    /// Human-readable form with full parameter types.
    pub fn describe(&self, world: &World) -> String {
        let parts: Vec<String> = self.parts.iter().map(|p| p.describe(world)).collect();
        parts.join(".")
    }
}

impl fmt::Display for SimpleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl From<SimpleName> for Name {
    fn from(simple: SimpleName) -> Self {
        Self {
            parts: simple.parts.into_iter().map(NamePart::Simple).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dotted_name() {
        let name = SimpleName::parse("core.lang.Int").unwrap();
        assert_eq!(name.len(), 3);
        assert_eq!(name.parts()[0].name, "core");
        assert_eq!(name.last().unwrap().name, "Int");
        assert_eq!(name.to_string(), "core.lang.Int");
    }

    #[test]
    fn parse_rejects_empty_parts() {
        assert_eq!(SimpleName::parse("").unwrap_err().kind, ErrorKind::InvalidName);
        assert_eq!(SimpleName::parse("a..b").unwrap_err().kind, ErrorKind::InvalidName);
    }

    #[test]
    fn simple_names_are_deep_keys() {
        use std::collections::HashMap;

        let a = SimpleName::parse("core.Array").unwrap();
        let b = SimpleName::parse("core.Array").unwrap();
        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn parent_drops_the_last_part() {
        let name = SimpleName::parse("a.b.c").unwrap();
        assert_eq!(name.parent().to_string(), "a.b");
    }
}
