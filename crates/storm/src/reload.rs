//! Hot reload: rebuilding parts of the name tree while preserving the
//! object identity of everything that did not change.
//!
//! Reloading a source file builds a new graph in parallel with the old
//! one. A [`ReplaceContext`] matches old and new entities structurally (by
//! name and parameters); matched entities keep their old identity and have
//! their contents migrated member by member, new entities are added, and
//! orphaned old entities are removed with watch notifications. Template
//! instantiations whose ingredients disappeared are dropped; the rest are
//! re-pointed. Finally [`ReplaceTasks::apply`] performs the global
//! reference swap through an object-identity map, with vtables replaced
//! last. All of it runs on the compiler thread with no user code running.

use crate::{
    diag::{CResult, CompileError, ErrorKind},
    entity::{EntityId, EntityKind},
    runtime::ObjMap,
    syntax::production::Matcher,
    trace::TraceEvent,
    world::World,
};

/// The pending global reference swap: an identity map populated during
/// matching, applied atomically at the end.
#[derive(Debug, Default)]
pub struct ReplaceTasks {
    map: ObjMap,
}

impl ReplaceTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules every reference to `from` to become a reference to `to`.
    pub fn replace(&mut self, from: EntityId, to: EntityId) {
        self.map.insert(from, to);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Performs the swap: walks every root the world knows about and
    /// rewrites scheduled references. Virtual dispatch tables are swapped
    /// last, so a partially rewritten graph never dispatches into stale
    /// code.
    pub fn apply(self, world: &mut World) {
        if self.map.is_empty() {
            return;
        }
        let fix = |id: EntityId| self.map.resolve(id);
        let ids: Vec<EntityId> = world.entities().collect();

        for id in &ids {
            let entity = world.entity_mut(*id);
            entity.parent = entity.parent.map(fix);
            for param in &mut entity.params {
                param.ty = param.ty.map(fix);
            }
            match &mut entity.kind {
                EntityKind::Type(data) => {
                    for link in &mut data.chain.chain {
                        *link = fix(*link);
                    }
                    for child in &mut data.chain.children {
                        *child = fix(*child);
                    }
                    data.thread = data.thread.map(fix);
                    if let Some(rule) = &mut data.rule {
                        rule.result.ty = rule.result.ty.map(fix);
                        for (value, _) in &mut rule.params {
                            value.ty = value.ty.map(fix);
                        }
                    }
                }
                EntityKind::Function(data) => {
                    data.result.ty = data.result.ty.map(fix);
                    if let crate::typesys::RunOn::Named(thread) = &mut data.run_on {
                        *thread = fix(*thread);
                    }
                    if let crate::typesys::CodeRef::Generated(listing) = &mut data.code {
                        for instr in &mut listing.instrs {
                            match instr {
                                crate::codegen::Instr::Call { func, .. }
                                | crate::codegen::Instr::PostCall { func, .. }
                                | crate::codegen::Instr::FnRef(func) => *func = fix(*func),
                                crate::codegen::Instr::LoadGlobal(g) | crate::codegen::Instr::StoreGlobal(g) => {
                                    *g = fix(*g);
                                }
                                crate::codegen::Instr::CatchBegin { ty, .. } => *ty = fix(*ty),
                                _ => {}
                            }
                        }
                    }
                }
                EntityKind::MemberVar(data) => data.ty.ty = data.ty.ty.map(fix),
                EntityKind::GlobalVar(data) => {
                    data.ty.ty = data.ty.ty.map(fix);
                    data.thread = data.thread.map(fix);
                }
                EntityKind::LocalVar(data) => data.ty.ty = data.ty.ty.map(fix),
                EntityKind::Package(_) | EntityKind::Thread(_) | EntityKind::Block(_) => {}
            }
        }

        // Productions refer to rules and production types.
        for i in 0..world.production_count() {
            let id = crate::syntax::production::ProductionId::new(i);
            let production = world.production_mut(id);
            production.rule = fix(production.rule);
            production.ty = production.ty.map(fix);
            production.parent = production.parent.map(fix);
            for token in &mut production.tokens {
                if let Matcher::Rule { rule, .. } | Matcher::Delim { rule: Some(rule), .. } = &mut token.matcher {
                    *rule = fix(*rule);
                }
            }
        }

        // vtables last.
        for id in ids {
            if let EntityKind::Type(data) = &mut world.entity_mut(id).kind {
                if let Some(vtable) = &mut data.vtable {
                    for slot in &mut vtable.slots {
                        *slot = fix(*slot);
                    }
                }
            }
        }
    }
}

/// Coordinator of one reload: the structural equivalence between the old
/// and the new graph, plus the scheduled reference swap.
#[derive(Debug, Default)]
pub struct ReplaceContext {
    pub tasks: ReplaceTasks,
    /// Old entities orphaned by the reload.
    pub removed: Vec<EntityId>,
    /// New entities adopted into the old graph.
    pub added: Vec<EntityId>,
    /// Deferred supertype changes: applied once the whole equivalence is
    /// known, so a new-graph supertype resolves to its old twin.
    super_fixups: Vec<(EntityId, Option<EntityId>)>,
}

impl ReplaceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the freshly loaded `new_set` into `old_set`, preserving the
    /// identity of every entity that exists in both.
    ///
    /// A kind change between a type and a non-type is a replace error; the
    /// reload is abandoned before anything is mutated in that case.
    pub fn merge(&mut self, world: &mut World, old_set: EntityId, new_set: EntityId) -> CResult<()> {
        world.ensure_loaded(old_set, None)?;
        world.ensure_loaded(new_set, None)?;
        self.check_kinds(world, old_set, new_set)?;
        self.merge_checked(world, old_set, new_set)
    }

    /// Validates every matched pair before mutation.
    fn check_kinds(&self, world: &mut World, old_set: EntityId, new_set: EntityId) -> CResult<()> {
        let new_members = world.name_set(new_set)?.content();
        for new_member in new_members {
            let identity = world.entity(new_member).identity();
            let old = world
                .find_name(old_set, &identity.name)
                .into_iter()
                .find(|&o| world.entity(o).identity() == identity);
            let Some(old) = old else { continue };
            let old_is_type = matches!(world.entity(old).kind, EntityKind::Type(_));
            let new_is_type = matches!(world.entity(new_member).kind, EntityKind::Type(_));
            if old_is_type != new_is_type {
                return Err(CompileError::new(
                    ErrorKind::ReplaceError,
                    format!(
                        "{} changed between a type and a non-type; that can not be reloaded",
                        world.path_string(old)
                    ),
                ));
            }
            if old_is_type {
                world.ensure_loaded(old, None)?;
                world.ensure_loaded(new_member, None)?;
                self.check_kinds(world, old, new_member)?;
            }
        }
        Ok(())
    }

    /// A new-graph identity with its parameters resolved through the
    /// equivalence built so far, so `work(new C)` matches `work(old C)`.
    fn resolved_identity(&self, world: &World, id: EntityId) -> crate::name::SimplePart {
        let mut identity = world.entity(id).identity();
        for param in &mut identity.params {
            param.ty = param.ty.map(|ty| self.tasks.map.resolve(ty));
        }
        identity
    }

    fn merge_checked(&mut self, world: &mut World, old_set: EntityId, new_set: EntityId) -> CResult<()> {
        let old_members = world.name_set(old_set)?.content();
        let new_members = world.name_set(new_set)?.content();

        // Types match first, so that by the time functions compare their
        // parameter lists the type equivalence is already in the map.
        let (new_types, new_others): (Vec<EntityId>, Vec<EntityId>) = new_members
            .into_iter()
            .partition(|&m| matches!(world.entity(m).kind, EntityKind::Type(_)));

        let mut matched_old: Vec<EntityId> = Vec::new();
        for new_member in new_types.into_iter().chain(new_others) {
            let identity = self.resolved_identity(world, new_member);
            let old = world
                .find_name(old_set, &identity.name)
                .into_iter()
                .find(|&o| world.entity(o).identity() == identity);
            match old {
                Some(old) => {
                    matched_old.push(old);
                    self.tasks.replace(new_member, old);
                    self.migrate(world, old, new_member)?;
                }
                None => {
                    // Adopt the new entity into the old graph.
                    world.remove_from(new_set, new_member)?;
                    world.add_to(old_set, new_member)?;
                    self.added.push(new_member);
                    let what = world.path_string(new_member);
                    world.trace(TraceEvent::ReloadStep {
                        what: format!("added {what}"),
                    });
                }
            }
        }

        // Old entities with no new equivalent are orphaned.
        for old_member in old_members {
            if matched_old.contains(&old_member) {
                continue;
            }
            world.remove_from(old_set, old_member)?;
            self.removed.push(old_member);
            let what = world.path_string(old_member);
            world.trace(TraceEvent::ReloadStep {
                what: format!("removed {what}"),
            });
        }
        Ok(())
    }

    /// Migrates the contents of a matched pair: the old entity survives,
    /// carrying the new entity's payload where that payload changed.
    fn migrate(&mut self, world: &mut World, old: EntityId, new: EntityId) -> CResult<()> {
        let new_is_type = matches!(world.entity(new).kind, EntityKind::Type(_));
        if new_is_type {
            world.ensure_loaded(old, None)?;
            world.ensure_loaded(new, None)?;
            // Member-by-member migration, one level at a time.
            self.merge_checked(world, old, new)?;
            // The supertype may have changed; the fixup is deferred until
            // the whole equivalence is known.
            self.super_fixups.push((old, world.super_of(new)));
            return Ok(());
        }
        // Non-types migrate their payload member by member: the old entity
        // keeps its identity, the new entity supplies the fresh contents.
        let new_kind = std::mem::replace(
            &mut world.entity_mut(new).kind,
            EntityKind::Block(crate::bs::block::BlockData::default()),
        );
        match new_kind {
            EntityKind::Function(new_data)
                if matches!(world.entity(old).kind, EntityKind::Function(_)) =>
            {
                let EntityKind::Function(old_data) = &mut world.entity_mut(old).kind else {
                    unreachable!("checked above");
                };
                *old_data = new_data;
            }
            EntityKind::MemberVar(new_data)
                if matches!(world.entity(old).kind, EntityKind::MemberVar(_)) =>
            {
                let EntityKind::MemberVar(old_data) = &mut world.entity_mut(old).kind else {
                    unreachable!("checked above");
                };
                old_data.ty = new_data.ty;
            }
            EntityKind::GlobalVar(new_data)
                if matches!(world.entity(old).kind, EntityKind::GlobalVar(_)) =>
            {
                let EntityKind::GlobalVar(old_data) = &mut world.entity_mut(old).kind else {
                    unreachable!("checked above");
                };
                *old_data = new_data;
            }
            other => world.entity_mut(new).kind = other,
        }
        Ok(())
    }

    /// Drops template instantiations that used any of the removed
    /// entities as an ingredient, and re-points the surviving ones.
    pub fn update_templates(&mut self, world: &mut World) -> CResult<()> {
        let instances: Vec<crate::world::TemplateInstance> = world.template_instances().to_vec();
        let mut keep = Vec::new();
        for instance in instances {
            let uses_removed = instance
                .part
                .params
                .iter()
                .any(|p| p.ty.is_some_and(|ty| self.removed.contains(&ty)));
            if uses_removed {
                let owner = instance.owner;
                world.remove_from(owner, instance.generated)?;
                self.removed.push(instance.generated);
                let what = world.path_string(instance.generated);
                world.trace(TraceEvent::ReloadStep {
                    what: format!("dropped the template instance {what}"),
                });
            } else {
                keep.push(instance);
            }
        }
        *world.template_instances_mut() = keep;
        Ok(())
    }

    /// Finishes the reload: supertype fixups once the equivalence is
    /// complete, template bookkeeping, then the global swap.
    pub fn apply(mut self, world: &mut World) -> CResult<()> {
        for (old, new_super) in std::mem::take(&mut self.super_fixups) {
            let resolved = new_super.map(|s| self.tasks.map.resolve(s));
            if world.super_of(old) != resolved {
                world.set_super(old, resolved)?;
            }
        }
        self.update_templates(world)?;
        self.tasks.apply(world);
        world.trace(TraceEvent::ReloadStep {
            what: "reference swap complete".to_string(),
        });
        Ok(())
    }
}

/// Reloads `old_pkg` from a parallel, freshly loaded `new_pkg`: the
/// standard entry point driving a [`ReplaceContext`] end to end.
pub fn replace_package(world: &mut World, old_pkg: EntityId, new_pkg: EntityId) -> CResult<()> {
    let mut ctx = ReplaceContext::new();
    ctx.merge(world, old_pkg, new_pkg)?;
    ctx.apply(world)
}
