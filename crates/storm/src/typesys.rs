//! Types, members, functions, and the metadata the code generator needs.
//!
//! A type is also a name set: its members (variables, functions, nested
//! types) live in the name tree under it. Four kinds exist: value types
//! (copied by value, with synthesised constructors where none are declared),
//! classes (heap-allocated, polymorphic through a vtable), actors (heap
//! objects bound to a thread), and enums (integer-valued constants, with
//! optional bitmask semantics).

use std::{fmt, path::PathBuf, rc::Rc};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    chain::TypeChain,
    codegen::Listing,
    diag::{CResult, CompileError, ErrorKind},
    entity::{Entity, EntityId, EntityKind},
    nameset::NameSetData,
    reader::PkgReader,
    runtime::RtValue,
    syntax::production::ProductionId,
    syntax::rule::RuleData,
    thread::ThreadId,
    value::{Value, this_ptr},
    world::World,
};

/// Size of the object header preceding class members.
pub const OBJECT_HEADER: u32 = 16;
/// Size of a pointer on the targeted architectures.
pub const PTR_BYTES: u32 = 8;

/// A size and alignment pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub bytes: u32,
    pub align: u32,
}

impl Size {
    pub const ZERO: Self = Self { bytes: 0, align: 1 };
    pub const PTR: Self = Self {
        bytes: PTR_BYTES,
        align: PTR_BYTES,
    };

    pub fn new(bytes: u32, align: u32) -> Self {
        Self { bytes, align }
    }

    /// `offset` rounded up to this size's alignment.
    pub fn align_offset(self, offset: u32) -> u32 {
        let align = self.align.max(1);
        offset.div_ceil(align) * align
    }
}

/// Operand metadata handed to the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValType {
    pub size: Size,
    pub float: bool,
}

impl ValType {
    pub const VOID: Self = Self {
        size: Size::ZERO,
        float: false,
    };

    pub fn pointer() -> Self {
        Self {
            size: Size::PTR,
            float: false,
        }
    }
}

/// Kind and modifier flags of a type.
///
/// The kind bits (value, class, actor, enum) are mutually exclusive; the
/// modifier bits combine freely with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeFlags(u32);

impl TypeFlags {
    pub const VALUE: Self = Self(0x01);
    pub const CLASS: Self = Self(0x02);
    pub const ACTOR: Self = Self(0x04);
    pub const ENUM: Self = Self(0x08);
    /// Bitmask enum: constants combine with union/intersection.
    pub const BITMASK: Self = Self(0x10);
    pub const FINAL: Self = Self(0x20);
    pub const ABSTRACT: Self = Self(0x40);

    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_value(self) -> bool {
        self.contains(Self::VALUE) || self.contains(Self::ENUM)
    }

    pub fn is_class(self) -> bool {
        self.contains(Self::CLASS)
    }

    pub fn is_actor(self) -> bool {
        self.contains(Self::ACTOR)
    }

    pub fn is_enum(self) -> bool {
        self.contains(Self::ENUM)
    }
}

/// Pointer layout description used by the garbage collector.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GcType {
    /// Byte offsets of members that hold heap references.
    pub offsets: Vec<u32>,
    /// Does the type need a finalizer?
    pub finalizer: bool,
}

/// A specialised part matching a function in a super class whose signature
/// equals the queried one modulo the receiver type. Used to resolve
/// overrides into vtable slots without relying on name equality alone.
#[derive(Debug, Clone)]
pub struct OverridePart {
    part: crate::name::SimplePart,
}

impl OverridePart {
    /// Creates the override query for `func`.
    pub fn new(world: &World, func: EntityId) -> Self {
        Self {
            part: world.entity(func).identity(),
        }
    }

    /// Does `candidate` carry the same signature modulo the receiver?
    pub fn matches(&self, world: &World, candidate: EntityId) -> bool {
        let cand = world.entity(candidate);
        if cand.name != self.part.name || cand.params.len() != self.part.params.len() {
            return false;
        }
        if cand.params.is_empty() {
            return true;
        }
        let receivers_related = match (self.part.params[0].ty, cand.params[0].ty) {
            (Some(a), Some(b)) => world.is_a(a, b),
            _ => false,
        };
        receivers_related && self.part.params[1..] == cand.params[1..]
    }
}

/// A virtual dispatch table: function entities by slot index.
#[derive(Debug, Clone, Default)]
pub struct VTable {
    pub slots: Vec<EntityId>,
}

impl VTable {
    /// The slot a function occupies, if present.
    pub fn slot_of(&self, func: EntityId) -> Option<usize> {
        self.slots.iter().position(|&f| f == func)
    }
}

/// Payload of a type entity.
#[derive(Debug)]
pub struct TypeData {
    pub flags: TypeFlags,
    /// Members of this type; a type is also a name set.
    pub members: NameSetData,
    /// The inheritance chain; see [`TypeChain`].
    pub chain: TypeChain,
    /// Declared size for built-in types.
    pub declared_size: Option<Size>,
    /// The thread an actor type is bound to, if named.
    pub thread: Option<EntityId>,
    /// Computed total size, set when the layout is finalised.
    pub layout: Option<Size>,
    /// Garbage collection description, set with the layout.
    pub gc_type: Option<GcType>,
    /// Virtual dispatch table, class kinds only.
    pub vtable: Option<VTable>,
    /// The grammar non-terminal role of this type, if it is a rule.
    pub rule: Option<RuleData>,
    /// The production this type represents, if it is a production type.
    pub production: Option<ProductionId>,
}

impl TypeData {
    pub fn new(owner: EntityId, flags: TypeFlags) -> Self {
        Self {
            flags,
            members: NameSetData::new(),
            chain: TypeChain::new(owner),
            declared_size: None,
            thread: None,
            layout: None,
            gc_type: None,
            vtable: None,
            rule: None,
            production: None,
        }
    }
}

/// A member variable: a name, a type, and an offset assigned at layout time.
#[derive(Debug)]
pub struct MemberVarData {
    pub ty: Value,
    /// Byte offset inside the owner. Assigned once the layout is final.
    pub offset: Option<u32>,
}

/// Modifier flags of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FnFlags(u32);

impl FnFlags {
    pub const NONE: Self = Self(0);
    pub const PURE: Self = Self(0x01);
    /// Eligible as an implicit conversion constructor.
    pub const AUTO_CAST: Self = Self(0x02);
    pub const STATIC: Self = Self(0x04);
    pub const FINAL: Self = Self(0x08);
    /// Recognised by the assignment operator.
    pub const ASSIGN: Self = Self(0x10);
    pub const ABSTRACT: Self = Self(0x20);
    /// Synthesised by the compiler rather than declared.
    pub const SYNTHESIZED: Self = Self(0x40);

    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Which thread a function runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunOn {
    /// Any thread; the function is thread-agnostic.
    #[default]
    Any,
    /// A specific named thread.
    Named(EntityId),
    /// The thread is read from a hidden parameter at call time.
    Runtime,
}

impl RunOn {
    /// Does a caller running as `self` need to dispatch a call to a callee
    /// running as `other` across threads?
    pub fn needs_dispatch(self, other: Self) -> bool {
        match (self, other) {
            (_, Self::Any) => false,
            (Self::Named(a), Self::Named(b)) => a != b,
            // Runtime targets are resolved at the call site; conservatively
            // treat them as foreign.
            _ => true,
        }
    }
}

/// Native function implementation over the abstract runtime value.
pub type NativeFn = Rc<dyn Fn(&mut World, Vec<RtValue>) -> CResult<RtValue>>;

/// Factory behind a `lang.<ext>.reader` entry point.
pub type ReaderFactory = Rc<dyn Fn(&mut World, Vec<PathBuf>, EntityId) -> CResult<Box<dyn PkgReader>>>;

/// The late-bound body of a function.
///
/// A function may exist in the name tree long before any code exists for
/// it; `Missing` is the placeholder until code generation runs.
#[derive(Clone, Default)]
pub enum CodeRef {
    #[default]
    Missing,
    /// Implemented by the host.
    Native(NativeFn),
    /// Produces a package reader; the calling convention of the
    /// `lang.<ext>.reader` bootstrap entry points.
    MakeReader(ReaderFactory),
    /// Generated abstract code for the external back-end.
    Generated(Listing),
}

impl fmt::Debug for CodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "CodeRef::Missing"),
            Self::Native(_) => write!(f, "CodeRef::Native"),
            Self::MakeReader(_) => write!(f, "CodeRef::MakeReader"),
            Self::Generated(_) => write!(f, "CodeRef::Generated"),
        }
    }
}

/// Payload of a function entity. The parameters live on the entity itself,
/// since they are part of the overload key.
#[derive(Debug)]
pub struct FunctionData {
    pub result: Value,
    pub flags: FnFlags,
    pub run_on: RunOn,
    pub code: CodeRef,
}

impl FunctionData {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            flags: FnFlags::NONE,
            run_on: RunOn::Any,
            code: CodeRef::Missing,
        }
    }
}

/// Payload of a global variable entity.
#[derive(Debug)]
pub struct GlobalVarData {
    pub ty: Value,
    /// The thread the global belongs to; access from elsewhere copies.
    pub thread: Option<EntityId>,
    /// Constant value for enum members.
    pub const_value: Option<u64>,
}

/// Payload of a named thread entity.
#[derive(Debug)]
pub struct ThreadData {
    /// Handle of the logical thread in the scheduler.
    pub thread: ThreadId,
}

impl World {
    /// Creates a detached type entity.
    pub fn new_type(&mut self, name: impl Into<String>, flags: TypeFlags) -> CResult<EntityId> {
        let name = name.into();
        Ok(self.add_entity_with(|id| Entity::new(name, EntityKind::Type(TypeData::new(id, flags)))))
    }

    /// Creates a detached built-in type with a declared size.
    pub fn new_built_in_type(&mut self, name: impl Into<String>, size: Size, float: bool) -> CResult<EntityId> {
        let id = self.new_type(name, TypeFlags::VALUE.with(TypeFlags::FINAL))?;
        let data = self.type_data_mut(id);
        data.declared_size = Some(size);
        data.layout = Some(size);
        data.gc_type = Some(GcType::default());
        self.builtins_mut().register(id, float);
        Ok(id)
    }

    /// Creates a detached function entity. The first parameter of member
    /// functions is the receiver.
    pub fn new_function(
        &mut self,
        name: impl Into<String>,
        result: Value,
        params: impl IntoIterator<Item = Value>,
    ) -> EntityId {
        self.add_entity(Entity::with_params(
            name,
            params,
            EntityKind::Function(FunctionData::new(result)),
        ))
    }

    /// Creates a detached member variable entity.
    pub fn new_member_var(&mut self, name: impl Into<String>, ty: Value) -> EntityId {
        self.add_entity(Entity::new(
            name,
            EntityKind::MemberVar(MemberVarData { ty, offset: None }),
        ))
    }

    /// Creates a named logical thread entity backed by a fresh scheduler
    /// queue.
    pub fn new_named_thread(&mut self, name: impl Into<String>) -> EntityId {
        let thread = self.scheduler_mut().new_thread();
        self.add_entity(Entity::new(name, EntityKind::Thread(ThreadData { thread })))
    }

    /// The operand metadata of a type: its finalised size for value kinds,
    /// a pointer for heap kinds.
    pub fn type_size(&self, ty: EntityId) -> ValType {
        let data = self.type_data(ty);
        if data.flags.is_class() || data.flags.is_actor() {
            return ValType::pointer();
        }
        let size = data.layout.or(data.declared_size).unwrap_or(Size::PTR);
        ValType {
            size,
            float: self.builtins().is_float(ty),
        }
    }

    /// The member variables of a type, in declaration order.
    pub fn member_vars(&self, ty: EntityId) -> Vec<EntityId> {
        self.type_data(ty)
            .members
            .content()
            .into_iter()
            .filter(|&m| matches!(self.entity(m).kind, EntityKind::MemberVar(_)))
            .collect()
    }

    /// The member functions of a type, in declaration order.
    pub fn member_fns(&self, ty: EntityId) -> Vec<EntityId> {
        self.type_data(ty)
            .members
            .content()
            .into_iter()
            .filter(|&m| matches!(self.entity(m).kind, EntityKind::Function(_)))
            .collect()
    }

    /// Finalises the member layout of `ty`: the super-class part comes
    /// first (after the object header for root classes), then own members
    /// packed with natural alignment. Offsets are recorded on each member
    /// variable, the pointer-offset table is derived, and the vtable is
    /// built for class kinds.
    pub fn finalize_layout(&mut self, ty: EntityId) -> CResult<Size> {
        if let Some(done) = self.type_data(ty).layout {
            return Ok(done);
        }
        // Members must exist before they can be laid out.
        self.ensure_loaded(ty, None)?;
        let flags = self.type_data(ty).flags;

        let mut offset = match self.super_of(ty) {
            Some(super_ty) => self.finalize_layout(super_ty)?.bytes,
            None if flags.is_class() || flags.is_actor() => OBJECT_HEADER,
            None => 0,
        };
        let mut align = if flags.is_class() || flags.is_actor() { PTR_BYTES } else { 1 };
        let mut gc = match self.super_of(ty) {
            Some(super_ty) => self.type_data(super_ty).gc_type.clone().unwrap_or_default(),
            None => GcType::default(),
        };

        for member in self.member_vars(ty) {
            let EntityKind::MemberVar(var) = &self.entity(member).kind else {
                continue;
            };
            let vt = var.ty.val_type(self);
            let here = vt.size.align_offset(offset);
            if var.ty.is_heap_obj(self) || var.ty.by_ref {
                gc.offsets.push(here);
            }
            align = align.max(vt.size.align);
            offset = here + vt.size.bytes;
            let EntityKind::MemberVar(var) = &mut self.entity_mut(member).kind else {
                unreachable!("member kind changed during layout");
            };
            var.offset = Some(here);
        }

        let size = Size::new(Size::new(0, align).align_offset(offset).max(offset), align);
        if flags.is_value() {
            self.synthesize_value_fns(ty)?;
        }
        if flags.is_class() || flags.is_actor() {
            self.build_vtable(ty)?;
        }
        let data = self.type_data_mut(ty);
        data.layout = Some(size);
        data.gc_type = Some(gc);
        Ok(size)
    }

    /// Synthesises the default constructor, copy constructor, and
    /// destructor signature slots of a value type when none are declared.
    fn synthesize_value_fns(&mut self, ty: EntityId) -> CResult<()> {
        let this = this_ptr(self, ty);
        let wanted: [(&str, SmallVec<[Value; 4]>); 3] = [
            ("__init", SmallVec::from_slice(&[this])),
            ("__init", SmallVec::from_slice(&[this, this])),
            ("__destroy", SmallVec::from_slice(&[this])),
        ];
        for (name, params) in wanted {
            let declared = self.find_name(ty, name);
            let exists = declared
                .iter()
                .any(|&f| self.entity(f).params.as_slice() == params.as_slice());
            if !exists {
                let func = self.new_function(name, Value::VOID, params.clone());
                let EntityKind::Function(data) = &mut self.entity_mut(func).kind else {
                    unreachable!("just created a function");
                };
                data.flags = data.flags.with(FnFlags::SYNTHESIZED);
                self.add_to(ty, func)?;
            }
        }
        Ok(())
    }

    /// Builds the vtable of a class: the super's slots first, overrides
    /// resolved into the same slot, fresh virtual functions appended.
    fn build_vtable(&mut self, ty: EntityId) -> CResult<()> {
        let mut table = match self.super_of(ty) {
            Some(super_ty) => {
                self.finalize_layout(super_ty)?;
                self.type_data(super_ty).vtable.clone().unwrap_or_default()
            }
            None => VTable::default(),
        };
        for func in self.member_fns(ty) {
            let EntityKind::Function(data) = &self.entity(func).kind else {
                continue;
            };
            if data.flags.contains(FnFlags::STATIC) {
                continue;
            }
            match self.find_override_slot(func, &table) {
                Some(slot) => table.slots[slot] = func,
                None => table.slots.push(func),
            }
        }
        self.type_data_mut(ty).vtable = Some(table);
        Ok(())
    }

    /// Finds the vtable slot `func` overrides.
    fn find_override_slot(&self, func: EntityId, table: &VTable) -> Option<usize> {
        let query = OverridePart::new(self, func);
        table.slots.iter().position(|&candidate| query.matches(self, candidate))
    }

    /// The constant value of an enum member, if `name` is one.
    pub fn enum_value(&self, ty: EntityId, name: &str) -> Option<u64> {
        let members = self.find_name(ty, name);
        members.iter().find_map(|&m| match &self.entity(m).kind {
            EntityKind::GlobalVar(g) => g.const_value,
            _ => None,
        })
    }

    /// Adds a constant to an enum type.
    pub fn add_enum_value(&mut self, ty: EntityId, name: impl Into<String>, value: u64) -> CResult<()> {
        if !self.type_data(ty).flags.is_enum() {
            return Err(CompileError::new(
                ErrorKind::TypedefError,
                format!("{} is not an enum", self.path_string(ty)),
            ));
        }
        let member = self.add_entity(Entity::new(
            name,
            EntityKind::GlobalVar(GlobalVarData {
                ty: Value::new(ty),
                thread: None,
                const_value: Some(value),
            }),
        ));
        self.add_to(ty, member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;

    #[test]
    fn layout_packs_members_with_natural_alignment() {
        let mut w = World::bare();
        let ty = w.new_type("Pair", TypeFlags::VALUE).unwrap();
        let byte = w.builtins().byte;
        let int = w.builtins().int;
        let a = w.new_member_var("a", Value::new(byte));
        let b = w.new_member_var("b", Value::new(int));
        w.add_to(ty, a).unwrap();
        w.add_to(ty, b).unwrap();

        let size = w.finalize_layout(ty).unwrap();
        let offsets: Vec<u32> = w
            .member_vars(ty)
            .iter()
            .map(|&m| match &w.entity(m).kind {
                EntityKind::MemberVar(v) => v.offset.unwrap(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(offsets, vec![0, 4]);
        assert_eq!(size.bytes, 8);
        assert_eq!(size.align, 4);
    }

    #[test]
    fn class_members_start_after_the_object_header() {
        let mut w = World::bare();
        let ty = w.new_type("Node", TypeFlags::CLASS).unwrap();
        let int = w.builtins().int;
        let a = w.new_member_var("value", Value::new(int));
        let b = w.new_member_var("next", Value::new(ty));
        w.add_to(ty, a).unwrap();
        w.add_to(ty, b).unwrap();

        w.finalize_layout(ty).unwrap();
        let gc = w.type_data(ty).gc_type.clone().unwrap();
        // Only `next` is a heap reference; it sits after the header and the
        // aligned Int member.
        assert_eq!(gc.offsets, vec![24]);
    }

    #[test]
    fn value_types_get_synthesized_constructors() {
        let mut w = World::bare();
        let ty = w.new_type("Point", TypeFlags::VALUE).unwrap();
        w.finalize_layout(ty).unwrap();
        assert_eq!(w.find_name(ty, "__init").len(), 2);
        assert_eq!(w.find_name(ty, "__destroy").len(), 1);
    }

    #[test]
    fn overrides_land_in_the_same_vtable_slot() {
        let mut w = World::bare();
        let base = w.new_type("Base", TypeFlags::CLASS).unwrap();
        let derived = w.new_type("Derived", TypeFlags::CLASS).unwrap();
        w.set_super(derived, Some(base)).unwrap();

        let f_base = w.new_function("work", Value::VOID, [Value::new(base)]);
        w.add_to(base, f_base).unwrap();
        let f_derived = w.new_function("work", Value::VOID, [Value::new(derived)]);
        w.add_to(derived, f_derived).unwrap();

        w.finalize_layout(base).unwrap();
        w.finalize_layout(derived).unwrap();

        let base_table = w.type_data(base).vtable.clone().unwrap();
        let derived_table = w.type_data(derived).vtable.clone().unwrap();
        let slot = base_table.slot_of(f_base).unwrap();
        assert_eq!(derived_table.slots[slot], f_derived);
        assert_eq!(base_table.slots.len(), derived_table.slots.len());
    }
}
