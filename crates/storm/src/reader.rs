//! The reader pipeline: how packages load their source files.
//!
//! Files in a package are grouped by extension; each extension maps to a
//! `lang.<ext>.reader` entry point looked up in the name tree itself, which
//! produces a [`PkgReader`] for those files. The pipeline then advances
//! every reader through the fixed phases, each phase running on every
//! reader before the next begins, so inter-language dependencies resolve
//! correctly.

use std::{
    path::PathBuf,
    rc::Rc,
    sync::Arc,
};

use ahash::AHashMap;
use strum::{Display, EnumString};

use crate::{
    diag::{CResult, CompileError, ErrorKind, SrcPos},
    entity::{Entity, EntityId, EntityKind},
    name::SimplePart,
    trace::TraceEvent,
    typesys::{CodeRef, FunctionData, GlobalVarData},
    value::Value,
    world::World,
};

/// The fixed phases of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, serde::Serialize, serde::Deserialize)]
pub enum ReaderPhase {
    /// Declare grammar rules.
    SyntaxRules,
    /// Declare productions, populating the rules.
    SyntaxProductions,
    /// Declare types and their top-level members, lazily where possible.
    Types,
    /// Resolve inheritance, compute layout, finalise sizes.
    ResolveTypes,
    /// Declare function signatures.
    Functions,
    /// Generate function bodies.
    ResolveFunctions,
}

impl ReaderPhase {
    /// All phases, in order.
    pub const ALL: [Self; 6] = [
        Self::SyntaxRules,
        Self::SyntaxProductions,
        Self::Types,
        Self::ResolveTypes,
        Self::Functions,
        Self::ResolveFunctions,
    ];
}

/// What the next reader in a file's chain is expected to provide; readers
/// may delay creating the next part until something relevant is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReaderQuery(u32);

impl ReaderQuery {
    pub const SYNTAX: Self = Self(0x01);
    pub const TYPES: Self = Self(0x02);
    pub const FUNCTIONS: Self = Self(0x04);
    pub const PARSER: Self = Self(0x08);

    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl From<ReaderPhase> for ReaderQuery {
    fn from(phase: ReaderPhase) -> Self {
        match phase {
            ReaderPhase::SyntaxRules | ReaderPhase::SyntaxProductions => Self::SYNTAX,
            ReaderPhase::Types | ReaderPhase::ResolveTypes => Self::TYPES,
            ReaderPhase::Functions | ReaderPhase::ResolveFunctions => Self::FUNCTIONS,
        }
    }
}

/// Loads a set of same-extension files into a package.
///
/// All methods default to doing nothing, so simple languages implement only
/// the phases they care about.
pub trait PkgReader: std::fmt::Debug {
    /// The package this reader loads into.
    fn pkg(&self) -> EntityId;

    fn read_syntax_rules(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    fn read_syntax_productions(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    fn read_types(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    fn resolve_types(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    fn read_functions(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    fn resolve_functions(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    /// Runs one phase.
    fn run_phase(&mut self, world: &mut World, phase: ReaderPhase) -> CResult<()> {
        match phase {
            ReaderPhase::SyntaxRules => self.read_syntax_rules(world),
            ReaderPhase::SyntaxProductions => self.read_syntax_productions(world),
            ReaderPhase::Types => self.read_types(world),
            ReaderPhase::ResolveTypes => self.resolve_types(world),
            ReaderPhase::Functions => self.read_functions(world),
            ReaderPhase::ResolveFunctions => self.resolve_functions(world),
        }
    }
}

/// Information about a single file (or a part of one) to be read.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// The contents of the file.
    pub contents: Arc<String>,
    /// Where in `contents` this part starts.
    pub start: usize,
    /// The file itself.
    pub url: Arc<PathBuf>,
    /// The package the file belongs to.
    pub pkg: EntityId,
}

impl FileInfo {
    /// Reads `url` from disk.
    pub fn read(url: PathBuf, pkg: EntityId) -> CResult<Self> {
        let contents = std::fs::read_to_string(&url).map_err(|e| {
            CompileError::new(ErrorKind::InternalError, format!("failed to read {}: {e}", url.display()))
        })?;
        Ok(Self {
            contents: Arc::new(contents),
            start: 0,
            url: Arc::new(url),
            pkg,
        })
    }

    /// A follow-up part of the same file, starting at `pos`.
    #[must_use]
    pub fn next(&self, pos: usize) -> Self {
        Self {
            contents: Arc::clone(&self.contents),
            start: pos,
            url: Arc::clone(&self.url),
            pkg: self.pkg,
        }
    }

    /// The text of this part.
    pub fn text(&self) -> &str {
        &self.contents[self.start..]
    }

    /// A source position within this part, relative to its start.
    pub fn pos(&self, offset: usize, len: usize) -> SrcPos {
        SrcPos::new(
            Arc::clone(&self.url),
            u32::try_from(self.start + offset).unwrap_or(u32::MAX),
            u32::try_from(len).unwrap_or(0),
        )
    }
}

/// A reader for one part of a single file; used with [`FilePkgReader`].
///
/// A file may split into multiple parts, each read by its own reader (for
/// instance a file that embeds a grammar followed by a program): when asked,
/// a reader may produce the reader of the next part.
pub trait FileReader: std::fmt::Debug {
    fn info(&self) -> &FileInfo;

    fn read_syntax_rules(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    fn read_syntax_productions(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    fn read_types(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    fn resolve_types(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    fn read_functions(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    fn resolve_functions(&mut self, _world: &mut World) -> CResult<()> {
        Ok(())
    }

    /// Creates the reader of the next part of the file, if there is one and
    /// it can provide what `query` asks for. Called until it returns `None`.
    fn create_next(&mut self, _world: &mut World, _query: ReaderQuery) -> CResult<Option<Box<dyn FileReader>>> {
        Ok(None)
    }

    fn run_phase(&mut self, world: &mut World, phase: ReaderPhase) -> CResult<()> {
        match phase {
            ReaderPhase::SyntaxRules => self.read_syntax_rules(world),
            ReaderPhase::SyntaxProductions => self.read_syntax_productions(world),
            ReaderPhase::Types => self.read_types(world),
            ReaderPhase::ResolveTypes => self.resolve_types(world),
            ReaderPhase::Functions => self.read_functions(world),
            ReaderPhase::ResolveFunctions => self.resolve_functions(world),
        }
    }
}

/// Creates a file reader from a file info.
pub type CreateFileReader = Rc<dyn Fn(FileInfo) -> CResult<Box<dyn FileReader>>>;

/// A [`PkgReader`] that delegates to a chain of [`FileReader`]s per file.
pub struct FilePkgReader {
    pkg: EntityId,
    files: Vec<PathBuf>,
    readers: Vec<Box<dyn FileReader>>,
    create: CreateFileReader,
    loaded: bool,
}

impl std::fmt::Debug for FilePkgReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePkgReader")
            .field("files", &self.files)
            .field("readers", &self.readers.len())
            .finish_non_exhaustive()
    }
}

impl FilePkgReader {
    pub fn new(files: Vec<PathBuf>, pkg: EntityId, create: CreateFileReader) -> Self {
        Self {
            pkg,
            files,
            readers: Vec::new(),
            create,
            loaded: false,
        }
    }

    /// Populates the initial reader of every file, once.
    fn load_readers(&mut self, world: &mut World) -> CResult<()> {
        if self.loaded {
            return Ok(());
        }
        self.loaded = true;
        for file in &self.files {
            match FileInfo::read(file.clone(), self.pkg) {
                Ok(info) => self.readers.push((self.create)(info)?),
                Err(error) => world.report(CompileError::at(
                    ErrorKind::SyntaxError,
                    SrcPos::new(Arc::new(file.clone()), 0, 0),
                    error.msg,
                )),
            }
        }
        Ok(())
    }

    /// Extends every chain with follow-up readers able to answer `query`.
    fn expand(&mut self, world: &mut World, query: ReaderQuery) -> CResult<()> {
        let mut i = 0;
        while i < self.readers.len() {
            if let Some(next) = self.readers[i].create_next(world, query)? {
                self.readers.insert(i + 1, next);
            }
            i += 1;
        }
        Ok(())
    }

    fn phase(&mut self, world: &mut World, phase: ReaderPhase) -> CResult<()> {
        self.load_readers(world)?;
        self.expand(world, phase.into())?;
        for reader in &mut self.readers {
            // User errors stay within the file: record and continue.
            if let Err(error) = reader.run_phase(world, phase) {
                if error.is_user_error() {
                    world.report(error);
                } else {
                    return Err(error);
                }
            }
        }
        Ok(())
    }
}

impl PkgReader for FilePkgReader {
    fn pkg(&self) -> EntityId {
        self.pkg
    }

    fn read_syntax_rules(&mut self, world: &mut World) -> CResult<()> {
        self.phase(world, ReaderPhase::SyntaxRules)
    }

    fn read_syntax_productions(&mut self, world: &mut World) -> CResult<()> {
        self.phase(world, ReaderPhase::SyntaxProductions)
    }

    fn read_types(&mut self, world: &mut World) -> CResult<()> {
        self.phase(world, ReaderPhase::Types)
    }

    fn resolve_types(&mut self, world: &mut World) -> CResult<()> {
        self.phase(world, ReaderPhase::ResolveTypes)
    }

    fn read_functions(&mut self, world: &mut World) -> CResult<()> {
        self.phase(world, ReaderPhase::Functions)
    }

    fn resolve_functions(&mut self, world: &mut World) -> CResult<()> {
        self.phase(world, ReaderPhase::ResolveFunctions)
    }
}

/// Groups `files` by extension, creates a reader per group through the
/// `lang.<ext>.reader` entry points, and advances all readers through the
/// fixed phases. Called when a package loads its directory.
pub fn load_files(world: &mut World, pkg: EntityId, files: Vec<PathBuf>) -> CResult<()> {
    // The advisory lock: a package already loading is left alone.
    {
        let EntityKind::Package(data) = &mut world.entity_mut(pkg).kind else {
            return Err(CompileError::internal("load_files on a non-package"));
        };
        if data.reload_lock {
            return Ok(());
        }
        data.reload_lock = true;
    }
    let result = load_files_locked(world, pkg, files);
    if let EntityKind::Package(data) = &mut world.entity_mut(pkg).kind {
        data.reload_lock = false;
    }
    result
}

fn load_files_locked(world: &mut World, pkg: EntityId, files: Vec<PathBuf>) -> CResult<()> {
    let mut by_ext: AHashMap<String, Vec<PathBuf>> = AHashMap::new();
    for file in files {
        let Some(ext) = file.extension().and_then(|e| e.to_str()).map(str::to_lowercase) else {
            continue;
        };
        by_ext.entry(ext).or_default().push(file);
    }
    let mut exts: Vec<String> = by_ext.keys().cloned().collect();
    exts.sort();

    let mut readers: Vec<Box<dyn PkgReader>> = Vec::new();
    for ext in exts {
        let files = by_ext.remove(&ext).expect("key comes from the map");
        match create_reader(world, &ext, files, pkg)? {
            Some(reader) => readers.push(reader),
            None => world.decision(&format!("no reader for the extension {ext}; its files are ignored")),
        }
    }

    let pkg_path = world.path_string(pkg);
    for phase in ReaderPhase::ALL {
        world.trace(TraceEvent::PhaseStart {
            pkg: pkg_path.clone(),
            phase,
        });
        for reader in &mut readers {
            if let Err(error) = reader.run_phase(world, phase) {
                if error.is_user_error() {
                    world.report(error);
                } else {
                    return Err(error);
                }
            }
        }
        world.trace(TraceEvent::PhaseEnd {
            pkg: pkg_path.clone(),
            phase,
        });
    }
    Ok(())
}

/// Resolves the `lang.<ext>.reader` entry point in the name tree and calls
/// it. Returns `None` when no reader is registered for the extension.
pub fn create_reader(
    world: &mut World,
    ext: &str,
    files: Vec<PathBuf>,
    pkg: EntityId,
) -> CResult<Option<Box<dyn PkgReader>>> {
    let scope = crate::scope::Scope::with_default(world.root());
    let root = world.root();
    let Some(lang) = world.find_in(root, &SimplePart::new("lang"), &scope)? else {
        return Ok(None);
    };
    let Some(ext_pkg) = world.find_in(lang, &SimplePart::new(ext), &scope)? else {
        return Ok(None);
    };
    let Some(func) = world.find_in(ext_pkg, &SimplePart::new("reader"), &scope)? else {
        return Ok(None);
    };
    let EntityKind::Function(data) = &world.entity(func).kind else {
        return Ok(None);
    };
    let CodeRef::MakeReader(factory) = &data.code else {
        return Err(CompileError::new(
            ErrorKind::LangDefError,
            format!("{} is not a reader entry point", world.path_string(func)),
        ));
    };
    let factory = Rc::clone(factory);
    factory(world, files, pkg).map(Some)
}

/// Registers a `lang.<ext>.reader` entry point. Extensions are plain
/// strings; anyone may contribute one at any time.
///
/// Registration never triggers lazy loading: the built-in language
/// packages are virtual and exist before any directory is scanned.
pub fn register_reader(world: &mut World, ext: &str, factory: crate::typesys::ReaderFactory) -> CResult<()> {
    let root = world.root();
    let lang = match world.find_name(root, "lang").first() {
        Some(&pkg) => pkg,
        None => {
            let pkg = world.new_package("lang");
            world.add_to(root, pkg)?;
            pkg
        }
    };
    let ext_pkg = match world.find_name(lang, ext).first() {
        Some(&pkg) => pkg,
        None => {
            let pkg = world.new_package(ext);
            world.add_to(lang, pkg)?;
            pkg
        }
    };
    let func = world.add_entity(Entity::new(
        "reader",
        EntityKind::Function(FunctionData {
            result: Value::VOID,
            flags: crate::typesys::FnFlags::NONE,
            run_on: crate::typesys::RunOn::Named(world.compiler_thread()),
            code: CodeRef::MakeReader(factory),
        }),
    ));
    world.add_to(ext_pkg, func)
}

/// Registers the readers the substrate ships with: the grammar language,
/// the representative frontend, and the license/version collaborators.
pub fn bootstrap_readers(world: &mut World) -> CResult<()> {
    register_reader(
        world,
        "bnf",
        Rc::new(|_, files, pkg| {
            Ok(Box::new(FilePkgReader::new(
                files,
                pkg,
                Rc::new(|info| Ok(Box::new(crate::syntax::bnf::BnfFileReader::new(info)?) as Box<dyn FileReader>)),
            )) as Box<dyn PkgReader>)
        }),
    )?;
    register_reader(
        world,
        "bs",
        Rc::new(|_, files, pkg| {
            Ok(Box::new(FilePkgReader::new(
                files,
                pkg,
                Rc::new(|info| Ok(Box::new(crate::bs::reader::BsFileReader::new(info)) as Box<dyn FileReader>)),
            )) as Box<dyn PkgReader>)
        }),
    )?;
    register_reader(world, "license", Rc::new(|_, files, pkg| Ok(Box::new(MetaReader::license(files, pkg)) as Box<dyn PkgReader>)))?;
    register_reader(world, "version", Rc::new(|_, files, pkg| Ok(Box::new(MetaReader::version(files, pkg)) as Box<dyn PkgReader>)))?;
    Ok(())
}

/// The license and version readers: single-phase collaborators that turn
/// each file into a string global named after the file stem, with the file
/// contents surfaced as its documentation.
#[derive(Debug)]
struct MetaReader {
    files: Vec<PathBuf>,
    pkg: EntityId,
    kind: &'static str,
}

impl MetaReader {
    fn license(files: Vec<PathBuf>, pkg: EntityId) -> Self {
        Self {
            files,
            pkg,
            kind: "license",
        }
    }

    fn version(files: Vec<PathBuf>, pkg: EntityId) -> Self {
        Self {
            files,
            pkg,
            kind: "version",
        }
    }
}

impl PkgReader for MetaReader {
    fn pkg(&self) -> EntityId {
        self.pkg
    }

    fn read_types(&mut self, world: &mut World) -> CResult<()> {
        for file in &self.files {
            let Some(stem) = file.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let len = std::fs::metadata(file).map(|m| m.len()).unwrap_or(0);
            let str_ty = world.builtins().str_;
            let mut entity = Entity::new(
                stem,
                EntityKind::GlobalVar(GlobalVarData {
                    ty: Value::new(str_ty),
                    thread: Some(world.compiler_thread()),
                    const_value: None,
                }),
            );
            entity.pos = SrcPos::new(Arc::new(file.clone()), 0, u32::try_from(len).unwrap_or(0));
            entity.doc = Some(crate::doc::DocSource {
                file: Arc::new(file.clone()),
                pos: 0,
                len: u32::try_from(len).unwrap_or(0),
            });
            let id = world.add_entity(entity);
            world.add_to(self.pkg, id)?;
            world.decision(&format!("{} files load as string globals", self.kind));
        }
        Ok(())
    }
}
