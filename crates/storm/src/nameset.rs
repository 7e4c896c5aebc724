//! Name sets: the nodes of the name tree.
//!
//! A name set maps names to overload slots, where each slot holds every
//! entity sharing one name (differing in parameters) plus any templates
//! registered under that name. Name sets support lazy loading: at creation a
//! set may assume there is content that can be loaded on demand, and loading
//! happens in two steps:
//!
//! 1. The set asks its loader to load one specific name.
//! 2. The set asks its loader to load all content.
//!
//! Step 1 is optional for loaders; step 2 is mandatory. Once step 2 has run,
//! the set is fully loaded and step 1 is never invoked again. Content can
//! always be added eagerly through `add_to`; that does not interact with
//! lazy loading.

use std::{fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diag::{CResult, CompileError, ErrorKind},
    entity::{EntityId, EntityKind},
    name::SimplePart,
    scope::Scope,
    trace::TraceEvent,
    world::World,
};

/// Loading state of a name set.
///
/// `FullyLoaded` is terminal: no further lazy load may be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    PartiallyLoaded,
    FullyLoaded,
}

/// Factory invoked when a part does not match any existing entity.
pub type TemplateFn = Rc<dyn Fn(&mut World, &SimplePart) -> CResult<Option<EntityId>>>;

/// A named template: generates entities on demand for parameterised names
/// such as `Array(Int)`.
#[derive(Clone)]
pub struct Template {
    /// The name this template answers to.
    pub name: String,
    /// The generation function. Receives the resolved part and produces a
    /// fresh entity, or `None` when the parameters are not acceptable.
    pub generate: TemplateFn,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template").field("name", &self.name).finish()
    }
}

/// All entities sharing one name within a name set, plus templates.
#[derive(Debug, Default)]
pub struct NameOverloads {
    items: Vec<EntityId>,
    templates: Vec<Template>,
}

impl NameOverloads {
    /// True when there are neither items nor templates here.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.templates.is_empty()
    }

    /// The stored entities, in insertion order.
    pub fn items(&self) -> &[EntityId] {
        &self.items
    }

    /// The stored templates, in insertion order.
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }
}

/// Callback interface for lazily populating a name set.
///
/// Implementations call `World::add_to` on the set they were attached to.
/// The loader is temporarily detached from the set while running, so it may
/// freely mutate the world.
pub trait NameSetLoader: fmt::Debug {
    /// Loads candidates for one specific part. Returning `true` means the
    /// request was handled (even if nothing was added); returning `false`
    /// defers to `load_all`.
    fn load_name(&mut self, _world: &mut World, _set: EntityId, _part: &SimplePart) -> CResult<bool> {
        Ok(false)
    }

    /// Loads all content. After this returns successfully the set is fully
    /// loaded.
    fn load_all(&mut self, world: &mut World, set: EntityId) -> CResult<()>;
}

/// The name-to-overloads storage embedded in packages and types.
#[derive(Debug, Default)]
pub struct NameSetData {
    /// Overload slots by name. Insertion order is stable during a load
    /// phase and is the iteration order callers observe.
    overloads: IndexMap<String, NameOverloads>,
    /// Lazy-loading progress.
    pub state: LoadState,
    /// Guard against recursive lazy loads.
    loading: bool,
    /// A recorded lazy-load failure. Replayed on subsequent lookups until an
    /// explicit `force_load` clears it.
    pub load_error: Option<CompileError>,
    /// Identifier for the next anonymous entity.
    next_anon: u32,
    /// Entities notified when content is added or removed.
    watchers: Vec<EntityId>,
    /// The lazy loader, if this set has loadable content.
    pub loader: Option<Box<dyn NameSetLoader>>,
}

impl NameSetData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set with a lazy loader attached.
    pub fn with_loader(loader: Box<dyn NameSetLoader>) -> Self {
        Self {
            loader: Some(loader),
            ..Self::default()
        }
    }

    /// The overload slot for `name`, if present.
    pub fn overloads(&self, name: &str) -> Option<&NameOverloads> {
        self.overloads.get(name)
    }

    /// Iterates all slots in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NameOverloads)> {
        self.overloads.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// All entities in this set, in slot insertion order.
    pub fn content(&self) -> Vec<EntityId> {
        self.overloads.values().flat_map(|o| o.items.iter().copied()).collect()
    }

    /// True once `load_all` has completed.
    pub fn all_loaded(&self) -> bool {
        self.state == LoadState::FullyLoaded
    }
}

/// A notification that a watched name set changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchEvent {
    /// The entity that registered the watch.
    pub watcher: EntityId,
    /// The set that changed.
    pub set: EntityId,
    /// The entity that was added or removed.
    pub subject: EntityId,
    /// True for additions, false for removals.
    pub added: bool,
}

impl World {
    /// Adds `child` to the name set `set`.
    ///
    /// Validates that the child has no parent yet and that the composite
    /// `(name, params)` key is unique within the slot, then assigns the
    /// parent and fires watch notifications. Works regardless of load
    /// state.
    pub fn add_to(&mut self, set: EntityId, child: EntityId) -> CResult<()> {
        if self.entity(child).parent.is_some() {
            return Err(CompileError::new(
                ErrorKind::InternalError,
                format!("{} is already part of the name tree", self.path_string(child)),
            ));
        }
        let identity = self.entity(child).identity();
        {
            let data = self.name_set_mut(set)?;
            let slot = data.overloads.entry(identity.name.clone()).or_default();
            slot.items.push(child);
        }
        // Uniqueness check against the slot we just extended.
        let slot_items: Vec<EntityId> = self.name_set(set)?.overloads(&identity.name).map_or_else(Vec::new, |o| {
            o.items.iter().copied().collect()
        });
        let duplicate = slot_items
            .iter()
            .any(|&other| other != child && self.entity(other).identity() == identity);
        if duplicate {
            self.name_set_mut(set)?
                .overloads
                .get_mut(&identity.name)
                .expect("slot just created")
                .items
                .retain(|&i| i != child);
            return Err(CompileError::new(
                ErrorKind::TypedefError,
                format!("{} is already defined in {}", identity.name, self.path_string(set)),
            ));
        }
        self.entity_mut(child).parent = Some(set);
        self.notify_watchers(set, child, true);
        Ok(())
    }

    /// Removes `child` from `set`, firing watch notifications. Returns true
    /// when the child was present.
    pub fn remove_from(&mut self, set: EntityId, child: EntityId) -> CResult<bool> {
        let name = self.entity(child).name.clone();
        let data = self.name_set_mut(set)?;
        let Some(slot) = data.overloads.get_mut(&name) else {
            return Ok(false);
        };
        let before = slot.items.len();
        slot.items.retain(|&i| i != child);
        let removed = slot.items.len() != before;
        if removed {
            self.entity_mut(child).parent = None;
            self.notify_watchers(set, child, false);
        }
        Ok(removed)
    }

    /// Adds a template to `set` under the template's name.
    pub fn add_template(&mut self, set: EntityId, template: Template) -> CResult<()> {
        let data = self.name_set_mut(set)?;
        data.overloads.entry(template.name.clone()).or_default().templates.push(template);
        Ok(())
    }

    /// Registers `watcher` for add/remove notifications from `set`.
    pub fn watch_add(&mut self, set: EntityId, watcher: EntityId) -> CResult<()> {
        let data = self.name_set_mut(set)?;
        if !data.watchers.contains(&watcher) {
            data.watchers.push(watcher);
        }
        Ok(())
    }

    /// Removes a previously registered watch.
    pub fn watch_remove(&mut self, set: EntityId, watcher: EntityId) -> CResult<()> {
        self.name_set_mut(set)?.watchers.retain(|&w| w != watcher);
        Ok(())
    }

    fn notify_watchers(&mut self, set: EntityId, subject: EntityId, added: bool) {
        let watchers = match self.name_set(set) {
            Ok(data) => data.watchers.clone(),
            Err(_) => return,
        };
        for watcher in watchers {
            self.push_watch_event(WatchEvent {
                watcher,
                set,
                subject,
                added,
            });
        }
    }

    /// Returns a fresh synthetic name, unique within `set`.
    pub fn anon_name(&mut self, set: EntityId) -> CResult<String> {
        let data = self.name_set_mut(set)?;
        let id = data.next_anon;
        data.next_anon += 1;
        Ok(format!("@anon{id}"))
    }

    /// All overloads registered under `name`, without triggering lazy
    /// loading.
    pub fn find_name(&self, set: EntityId, name: &str) -> Vec<EntityId> {
        self.name_set(set)
            .ok()
            .and_then(|d| d.overloads(name))
            .map_or_else(Vec::new, |o| o.items.to_vec())
    }

    /// Looks `part` up in `set` without any lazy loading or templates.
    pub fn try_find_in(&self, set: EntityId, part: &SimplePart, scope: &Scope) -> CResult<Option<EntityId>> {
        match self.name_set(set)?.overloads(&part.name) {
            Some(slot) => part.choose(self, slot, scope),
            None => Ok(None),
        }
    }

    /// Finds `part` in `set`, the full contract:
    ///
    /// 1. Look the name up; if absent and the set is not fully loaded, ask
    ///    the loader for the name, then for everything (guarded against
    ///    recursion).
    /// 2. Choose the lowest-badness visible candidate; ties are ambiguity
    ///    errors.
    /// 3. Failing that, let templates under the name produce a candidate.
    /// 4. Failing that, walk the supertype chain for types, or the exported
    ///    packages for packages (cycle safe).
    pub fn find_in(&mut self, set: EntityId, part: &SimplePart, scope: &Scope) -> CResult<Option<EntityId>> {
        match &self.entity(set).kind {
            EntityKind::Package(_) | EntityKind::Type(_) => {}
            // Frontend blocks resolve their locals before enclosing scopes.
            EntityKind::Block(block) => {
                if part.params.is_empty() {
                    return Ok(block.vars.get(&part.name).copied());
                }
                return Ok(None);
            }
            _ => return Ok(None),
        }
        self.ensure_loaded(set, Some(part))?;

        if let Some(found) = self.try_find_in(set, part, scope)? {
            return Ok(Some(found));
        }

        if let Some(generated) = self.try_templates(set, part)? {
            return Ok(Some(generated));
        }

        match &self.entity(set).kind {
            EntityKind::Type(data) => {
                if let Some(super_ty) = data.chain.super_type() {
                    return self.find_in(super_ty, part, scope);
                }
                Ok(None)
            }
            EntityKind::Package(_) => crate::package::recursive_find(self, set, part, scope),
            _ => Ok(None),
        }
    }

    /// Runs the lazy-loading protocol so that a lookup of `part` (or of
    /// everything, when `part` is `None`) sees all loadable content.
    pub(crate) fn ensure_loaded(&mut self, set: EntityId, part: Option<&SimplePart>) -> CResult<()> {
        {
            let data = self.name_set(set)?;
            if data.state == LoadState::FullyLoaded || data.loading {
                return Ok(());
            }
            if let Some(error) = &data.load_error {
                return Err(error.clone());
            }
            let already_there = part.is_some_and(|p| data.overloads(&p.name).is_some_and(|o| !o.is_empty()));
            if already_there {
                return Ok(());
            }
            if data.loader.is_none() {
                return Ok(());
            }
        }

        // Step 1: ask for the single name.
        if let Some(part) = part {
            let handled = self.run_loader(set, |loader, world| loader.load_name(world, set, part))?;
            if handled {
                let data = self.name_set_mut(set)?;
                if data.state == LoadState::Unloaded {
                    data.state = LoadState::PartiallyLoaded;
                }
                let found = self.name_set(set)?.overloads(&part.name).is_some_and(|o| !o.is_empty());
                if found {
                    return Ok(());
                }
            }
        }

        // Step 2: load everything.
        self.force_load_inner(set)
    }

    /// Forces this set to be fully loaded, retrying after an earlier
    /// failure. This is the only place a recorded load error is cleared.
    pub fn force_load(&mut self, set: EntityId) -> CResult<()> {
        self.name_set_mut(set)?.load_error = None;
        self.force_load_inner(set)
    }

    fn force_load_inner(&mut self, set: EntityId) -> CResult<()> {
        {
            let data = self.name_set(set)?;
            if data.state == LoadState::FullyLoaded || data.loading {
                return Ok(());
            }
            if let Some(error) = &data.load_error {
                return Err(error.clone());
            }
            if data.loader.is_none() {
                self.name_set_mut(set)?.state = LoadState::FullyLoaded;
                return Ok(());
            }
        }
        let result = self.run_loader(set, |loader, world| loader.load_all(world, set).map(|()| true));
        match result {
            Ok(_) => {
                let data = self.name_set_mut(set)?;
                data.state = LoadState::FullyLoaded;
                data.loader = None;
                let path = self.path_string(set);
                self.trace(TraceEvent::LazyLoad { path, all: true });
                Ok(())
            }
            Err(error) if error.is_user_error() => {
                self.name_set_mut(set)?.load_error = Some(error.clone());
                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    /// Detaches the loader, runs `op` on it, and re-attaches it. The
    /// `loading` flag breaks recursive lookups that would otherwise re-enter
    /// the loader.
    fn run_loader(
        &mut self,
        set: EntityId,
        op: impl FnOnce(&mut Box<dyn NameSetLoader>, &mut Self) -> CResult<bool>,
    ) -> CResult<bool> {
        let Some(mut loader) = self.name_set_mut(set)?.loader.take() else {
            return Ok(true);
        };
        self.name_set_mut(set)?.loading = true;
        let result = op(&mut loader, self);
        let data = self.name_set_mut(set)?;
        data.loading = false;
        if data.loader.is_none() {
            data.loader = Some(loader);
        }
        result
    }

    /// Tries every template registered under `part`'s name, in insertion
    /// order: the first template that produces an entity wins. The produced
    /// entity is added to the slot and recorded in the root template
    /// registry so hot reload can find it.
    fn try_templates(&mut self, set: EntityId, part: &SimplePart) -> CResult<Option<EntityId>> {
        let templates: Vec<Template> = match self.name_set(set)?.overloads(&part.name) {
            Some(slot) if !slot.templates.is_empty() => slot.templates.to_vec(),
            _ => return Ok(None),
        };
        for template in templates {
            let generate = Rc::clone(&template.generate);
            if let Some(generated) = generate(self, part)? {
                self.add_to(set, generated)?;
                self.register_template_instance(set, part.clone(), generated);
                let name = self.entity(generated).identity().describe(self);
                self.trace(TraceEvent::TemplateInstantiated { name });
                return Ok(Some(generated));
            }
        }
        Ok(None)
    }
}
