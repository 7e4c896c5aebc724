//! The compiler context: the entity arena and everything process-wide.
//!
//! The original engine was a process-wide singleton; here it is an explicit
//! [`World`] threaded through every operation. The world owns the entity
//! arena behind the name tree, the well-known `root` and `core` packages,
//! the built-in types, the scheduler of logical threads, the tracer, and
//! the collected diagnostics. All mutation happens on the compiler thread;
//! other threads request it by posting tasks.

use std::path::PathBuf;

use ahash::{AHashMap, AHashSet};

use crate::{
    diag::{CResult, CompileError, Diagnostics, ErrorKind},
    entity::{Entity, EntityId, EntityKind},
    name::{SimpleName, SimplePart},
    nameset::{NameSetData, Template, WatchEvent},
    scope::Scope,
    thread::Scheduler,
    trace::{CompilerTracer, NoopTracer, TraceEvent},
    typesys::{Size, TypeData, TypeFlags},
    value::Value,
};

use crate::builtins::Builtins;

/// A template-generated entity, recorded so hot reload can re-match or
/// remove instantiations when their ingredients change.
#[derive(Debug, Clone)]
pub struct TemplateInstance {
    /// The name set the instance was generated into.
    pub owner: EntityId,
    /// The part that triggered the instantiation.
    pub part: SimplePart,
    /// The generated entity.
    pub generated: EntityId,
}

/// The compiler context.
#[derive(Debug)]
pub struct World {
    entities: Vec<Entity>,
    root: EntityId,
    core: EntityId,
    compiler_thread: EntityId,
    builtins: Builtins,
    scheduler: Scheduler,
    tracer: Box<dyn CompilerTracer>,
    /// User errors collected during reading; one broken entity never aborts
    /// its package.
    pub diags: Diagnostics,
    watch_events: Vec<WatchEvent>,
    template_instances: Vec<TemplateInstance>,
    decisions: AHashSet<String>,
    productions: Vec<crate::syntax::production::Production>,
}

impl World {
    /// Creates a world rooted at `root_dir`. The directory tree maps 1:1 to
    /// the root of the name tree; `core` and `lang` are virtual packages
    /// populated eagerly during bootstrap.
    pub fn new(root_dir: Option<PathBuf>, tracer: Box<dyn CompilerTracer>) -> CResult<Self> {
        let mut world = Self {
            entities: Vec::new(),
            root: EntityId::new(0),
            core: EntityId::new(0),
            compiler_thread: EntityId::new(0),
            builtins: Builtins::default(),
            scheduler: Scheduler::new(),
            tracer,
            diags: Diagnostics::new(),
            watch_events: Vec::new(),
            template_instances: Vec::new(),
            decisions: AHashSet::new(),
            productions: Vec::new(),
        };
        world.root = match root_dir {
            Some(dir) => world.new_package_at(String::new(), dir),
            None => world.new_package(String::new()),
        };
        world.core = world.new_package("core");
        world.add_to(world.root, world.core)?;
        world.compiler_thread = world.add_entity(Entity::new(
            "Compiler",
            EntityKind::Thread(crate::typesys::ThreadData {
                thread: crate::thread::COMPILER,
            }),
        ));
        let compiler_thread = world.compiler_thread;
        world.add_to(world.core, compiler_thread)?;
        world.bootstrap_builtins()?;
        world.bootstrap_templates()?;
        crate::reader::bootstrap_readers(&mut world)?;
        Ok(world)
    }

    /// A minimal world with no backing directory. Used heavily by tests.
    pub fn bare() -> Self {
        Self::new(None, Box::new(NoopTracer)).expect("bootstrap of a bare world cannot fail")
    }

    // ------------------------------------------------------------------
    // Arena access
    // ------------------------------------------------------------------

    /// Gets an entity by id.
    ///
    /// # Panics
    /// Panics if `id` is stale, which is an internal error: ids are never
    /// reused within one world.
    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.index()]
    }

    pub fn entity_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.index()]
    }

    /// Adds a detached entity to the arena.
    pub fn add_entity(&mut self, entity: Entity) -> EntityId {
        let id = EntityId::new(self.entities.len());
        self.entities.push(entity);
        id
    }

    /// Adds an entity that needs to know its own id while being built
    /// (types own their chain, and the chain ends in the owner).
    pub fn add_entity_with(&mut self, build: impl FnOnce(EntityId) -> Entity) -> EntityId {
        let id = EntityId::new(self.entities.len());
        let entity = build(id);
        self.entities.push(entity);
        id
    }

    /// Iterates all entity ids, in creation order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        (0..self.entities.len()).map(EntityId::new)
    }

    /// The root package.
    pub fn root(&self) -> EntityId {
        self.root
    }

    /// The well-known `core` package holding the built-ins.
    pub fn core(&self) -> EntityId {
        self.core
    }

    /// The named-thread entity of the compiler thread, where all name-tree
    /// mutation happens.
    pub fn compiler_thread(&self) -> EntityId {
        self.compiler_thread
    }

    // ------------------------------------------------------------------
    // Typed payload access
    // ------------------------------------------------------------------

    /// The name-set payload of a package or type.
    pub fn name_set(&self, id: EntityId) -> CResult<&NameSetData> {
        match &self.entity(id).kind {
            EntityKind::Package(p) => Ok(&p.members),
            EntityKind::Type(t) => Ok(&t.members),
            other => Err(CompileError::internal(format!(
                "{} ({}) is not a name set",
                self.path_string(id),
                other.label()
            ))),
        }
    }

    pub fn name_set_mut(&mut self, id: EntityId) -> CResult<&mut NameSetData> {
        match &mut self.entities[id.index()].kind {
            EntityKind::Package(p) => Ok(&mut p.members),
            EntityKind::Type(t) => Ok(&mut t.members),
            other => {
                let label = other.label();
                Err(CompileError::internal(format!("entity is not a name set ({label})")))
            }
        }
    }

    /// The type payload of `id`.
    ///
    /// # Panics
    /// Panics when `id` is not a type; callers check the kind first.
    pub fn type_data(&self, id: EntityId) -> &TypeData {
        match &self.entity(id).kind {
            EntityKind::Type(t) => t,
            other => panic!("{} is a {}, not a type", self.path_string(id), other.label()),
        }
    }

    pub fn type_data_mut(&mut self, id: EntityId) -> &mut TypeData {
        match &mut self.entities[id.index()].kind {
            EntityKind::Type(t) => t,
            other => panic!("entity is a {}, not a type", other.label()),
        }
    }

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub(crate) fn builtins_mut(&mut self) -> &mut Builtins {
        &mut self.builtins
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Emits a trace event.
    pub fn trace(&mut self, event: TraceEvent) {
        self.tracer.on_event(event);
    }

    /// Replaces the tracer, returning the old one.
    pub fn set_tracer(&mut self, tracer: Box<dyn CompilerTracer>) -> Box<dyn CompilerTracer> {
        std::mem::replace(&mut self.tracer, tracer)
    }

    /// Records a behavioural decision at an underspecified site, once.
    pub fn decision(&mut self, what: &str) {
        if self.decisions.insert(what.to_string()) {
            self.trace(TraceEvent::Decision { what: what.to_string() });
        }
    }

    /// Reports a user error through the diagnostics channel and the tracer.
    pub fn report(&mut self, error: CompileError) {
        self.trace(TraceEvent::Diagnostic { error: error.clone() });
        self.diags.report(error);
    }

    pub(crate) fn push_watch_event(&mut self, event: WatchEvent) {
        self.watch_events.push(event);
    }

    /// Removes and returns the pending watch notifications.
    pub fn take_watch_events(&mut self) -> Vec<WatchEvent> {
        std::mem::take(&mut self.watch_events)
    }

    pub(crate) fn register_template_instance(&mut self, owner: EntityId, part: SimplePart, generated: EntityId) {
        self.template_instances.push(TemplateInstance { owner, part, generated });
    }

    /// The template registry: every generated instance currently alive.
    pub fn template_instances(&self) -> &[TemplateInstance] {
        &self.template_instances
    }

    pub(crate) fn template_instances_mut(&mut self) -> &mut Vec<TemplateInstance> {
        &mut self.template_instances
    }

    /// Registers a production and returns its id.
    pub fn add_production(&mut self, production: crate::syntax::production::Production) -> crate::syntax::production::ProductionId {
        let id = crate::syntax::production::ProductionId::new(self.productions.len());
        self.productions.push(production);
        id
    }

    /// Gets a production by id.
    pub fn production(&self, id: crate::syntax::production::ProductionId) -> &crate::syntax::production::Production {
        &self.productions[id.index()]
    }

    /// Number of registered productions.
    pub fn production_count(&self) -> usize {
        self.productions.len()
    }

    pub fn production_mut(
        &mut self,
        id: crate::syntax::production::ProductionId,
    ) -> &mut crate::syntax::production::Production {
        &mut self.productions[id.index()]
    }

    // ------------------------------------------------------------------
    // Lookup drivers
    // ------------------------------------------------------------------

    /// Resolves an absolute name from the root of the tree.
    pub fn find_root(&mut self, name: &SimpleName) -> CResult<Option<EntityId>> {
        let scope = Scope::with_default(self.root);
        crate::scope::find_at(self, self.root, name, &scope)
    }

    /// Forces a package fully loaded, then finalises every type in it.
    /// This is one of the two places a recorded lazy-load failure is
    /// retried.
    pub fn compile(&mut self, pkg: EntityId) -> CResult<()> {
        self.force_load(pkg)?;
        let members = self.name_set(pkg)?.content();
        for member in members {
            if matches!(self.entity(member).kind, EntityKind::Type(_)) {
                self.finalize_layout(member)?;
            }
        }
        Ok(())
    }

    /// Declares a command-line import: `name` overlays the package at
    /// `path` onto the root of the tree.
    pub fn add_import(&mut self, name: &str, path: PathBuf) -> CResult<()> {
        if !path.is_dir() {
            return Err(CompileError::new(
                ErrorKind::InternalError,
                format!("import {name}: {} is not a directory", path.display()),
            ));
        }
        let pkg = self.new_package_at(name.to_string(), path);
        self.add_to(self.root, pkg)
    }

    // ------------------------------------------------------------------
    // Bootstrap
    // ------------------------------------------------------------------

    fn bootstrap_builtins(&mut self) -> CResult<()> {
        let specs: [(&str, u32, bool); 8] = [
            ("Bool", 1, false),
            ("Byte", 1, false),
            ("Int", 4, false),
            ("Nat", 4, false),
            ("Long", 8, false),
            ("Word", 8, false),
            ("Float", 4, true),
            ("Double", 8, true),
        ];
        let mut ids = AHashMap::new();
        for (name, bytes, float) in specs {
            let id = self.new_built_in_type(name, Size::new(bytes, bytes), float)?;
            self.add_to(self.core, id)?;
            ids.insert(name, id);
        }

        let str_ty = self.new_type("Str", TypeFlags::CLASS.with(TypeFlags::FINAL))?;
        self.add_to(self.core, str_ty)?;
        let exception = self.new_type("Exception", TypeFlags::CLASS)?;
        self.add_to(self.core, exception)?;

        self.builtins.finish(&ids, str_ty, exception);
        self.bootstrap_operators()?;
        Ok(())
    }

    /// The built-in operators: arithmetic and the two primitive
    /// comparisons per numeric type (everything else rewrites through
    /// them), plus the boolean connectives and string concatenation.
    /// They live in `core`, so the default lookup sees them everywhere.
    fn bootstrap_operators(&mut self) -> CResult<()> {
        let b = self.builtins();
        let bool_ty = b.bool_;
        let str_ty = b.str_;
        let numerics = [b.byte, b.int, b.nat, b.long, b.word, b.float, b.double];
        let floats = [b.float, b.double];
        let core = self.core;

        for ty in numerics {
            let v = Value::new(ty);
            for op in ["+", "-", "*", "/"] {
                let f = self.new_function(op, v, [v, v]);
                self.add_to(core, f)?;
            }
            if !floats.contains(&ty) {
                let f = self.new_function("%", v, [v, v]);
                self.add_to(core, f)?;
            }
            for op in ["<", "=="] {
                let f = self.new_function(op, Value::new(bool_ty), [v, v]);
                self.add_to(core, f)?;
            }
        }

        let vb = Value::new(bool_ty);
        for op in ["&&", "||", "=="] {
            let f = self.new_function(op, vb, [vb, vb]);
            self.add_to(core, f)?;
        }

        let vs = Value::new(str_ty);
        let concat = self.new_function("+", vs, [vs, vs]);
        self.add_to(core, concat)?;
        let str_eq = self.new_function("==", vb, [vs, vs]);
        self.add_to(core, str_eq)?;
        Ok(())
    }

    fn bootstrap_templates(&mut self) -> CResult<()> {
        let core = self.core;
        let specs: [(&str, Option<usize>, TypeFlags); 4] = [
            ("Array", Some(1), TypeFlags::CLASS.with(TypeFlags::FINAL)),
            ("Maybe", Some(1), TypeFlags::VALUE.with(TypeFlags::FINAL)),
            ("Map", Some(2), TypeFlags::CLASS.with(TypeFlags::FINAL)),
            // Fn is variadic: result type plus any number of parameters.
            ("Fn", None, TypeFlags::CLASS.with(TypeFlags::FINAL)),
        ];
        for (name, arity, flags) in specs {
            let template = Template {
                name: name.to_string(),
                generate: std::rc::Rc::new(move |world: &mut Self, part: &SimplePart| {
                    match arity {
                        Some(n) if part.params.len() != n => return Ok(None),
                        None if part.params.is_empty() => return Ok(None),
                        _ => {}
                    }
                    let ty = world.new_type(part.name.clone(), flags)?;
                    world.entity_mut(ty).params = part.params.clone();
                    Ok(Some(ty))
                }),
            };
            self.add_template(core, template)?;
        }
        Ok(())
    }

    /// Convenience: the `Maybe(T)` instance for a wrapped value.
    pub fn maybe_of(&mut self, wrapped: Value) -> CResult<EntityId> {
        let part = SimplePart::with_param("Maybe", wrapped);
        let scope = Scope::with_default(self.root);
        self.find_in(self.core, &part, &scope)?
            .ok_or_else(|| CompileError::internal("the Maybe template did not produce an instance"))
    }

    /// Convenience: the `Array(T)` instance for an element value.
    pub fn array_of(&mut self, element: Value) -> CResult<EntityId> {
        let part = SimplePart::with_param("Array", element);
        let scope = Scope::with_default(self.root);
        self.find_in(self.core, &part, &scope)?
            .ok_or_else(|| CompileError::internal("the Array template did not produce an instance"))
    }

    /// Convenience: the `Fn(R, P...)` instance for a function signature.
    pub fn fn_of(&mut self, result: Value, params: &[Value]) -> CResult<EntityId> {
        let mut all = vec![result];
        all.extend_from_slice(params);
        let part = SimplePart::with_params("Fn", all);
        let scope = Scope::with_default(self.root);
        self.find_in(self.core, &part, &scope)?
            .ok_or_else(|| CompileError::internal("the Fn template did not produce an instance"))
    }
}
