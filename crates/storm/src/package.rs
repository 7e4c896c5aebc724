//! Packages: name sets associated with a directory.
//!
//! A package is a name set optionally backed by a path, which allows it to
//! load sub-packages and source files from there on demand. A virtual
//! package has no path and must be populated eagerly. Packages may export
//! other packages: lookups that fail locally consult the exports
//! transitively, guarded against cycles.

use std::path::{Path, PathBuf};

use ahash::AHashSet;

use crate::{
    diag::{CResult, CompileError, ErrorKind},
    entity::{Entity, EntityId, EntityKind},
    name::SimplePart,
    nameset::{NameSetData, NameSetLoader},
    scope::Scope,
    world::World,
};

/// Package payload: membership plus the directory binding.
#[derive(Debug)]
pub struct PackageData {
    /// The members of this package.
    pub members: NameSetData,
    /// The backing directory. `None` for virtual packages.
    pub url: Option<PathBuf>,
    /// Exported packages. Append-only while the package loads.
    pub exported: Vec<EntityId>,
    /// Discard source info for memory once loading finishes.
    pub discard_on_load: bool,
    /// Advisory lock preventing concurrent reloads of this package.
    pub reload_lock: bool,
}

impl PackageData {
    /// Creates a virtual package with no backing directory.
    pub fn virtual_pkg() -> Self {
        Self {
            members: NameSetData::new(),
            url: None,
            exported: Vec::new(),
            discard_on_load: false,
            reload_lock: false,
        }
    }

    /// Creates a package backed by `path`; contents load lazily.
    pub fn at_path(path: PathBuf) -> Self {
        Self {
            members: NameSetData::with_loader(Box::new(DirLoader { path: path.clone() })),
            url: Some(path),
            exported: Vec::new(),
            discard_on_load: false,
            reload_lock: false,
        }
    }
}

impl World {
    /// Creates a virtual package entity named `name`. The package is not
    /// attached anywhere; use `add_to` for that.
    pub fn new_package(&mut self, name: impl Into<String>) -> EntityId {
        self.add_entity(Entity::new(name, EntityKind::Package(PackageData::virtual_pkg())))
    }

    /// Creates a directory-backed package entity named `name`.
    pub fn new_package_at(&mut self, name: impl Into<String>, path: PathBuf) -> EntityId {
        self.add_entity(Entity::new(name, EntityKind::Package(PackageData::at_path(path))))
    }

    /// The backing directory of a package, if it has one.
    pub fn package_url(&self, pkg: EntityId) -> Option<&Path> {
        match &self.entity(pkg).kind {
            EntityKind::Package(data) => data.url.as_deref(),
            _ => None,
        }
    }

    /// Adds an exported package. Exports influence lookup through
    /// `recursive_find`; the list is append-only until the package's loader
    /// is released.
    pub fn add_export(&mut self, pkg: EntityId, exported: EntityId) -> CResult<()> {
        let EntityKind::Package(data) = &mut self.entity_mut(pkg).kind else {
            return Err(CompileError::internal("add_export on a non-package"));
        };
        if !data.exported.contains(&exported) {
            data.exported.push(exported);
        }
        Ok(())
    }

    /// The direct exports of a package.
    pub fn exports(&self, pkg: EntityId) -> Vec<EntityId> {
        match &self.entity(pkg).kind {
            EntityKind::Package(data) => data.exported.clone(),
            _ => Vec::new(),
        }
    }

    /// All exports reachable from `pkg`, transitively, without duplicates.
    pub fn recursive_exports(&self, pkg: EntityId) -> Vec<EntityId> {
        let mut seen = AHashSet::new();
        seen.insert(pkg);
        let mut queue = self.exports(pkg);
        let mut result = Vec::new();
        while let Some(next) = queue.pop() {
            if seen.insert(next) {
                result.push(next);
                queue.extend(self.exports(next));
            }
        }
        result
    }

    /// Finds the loaded package backed by `path`, if any.
    pub fn package_at(&self, path: &Path) -> Option<EntityId> {
        self.entities().find(|&id| self.package_url(id) == Some(path))
    }
}

/// Lookup through the exports of `pkg`, transitively. Cycles are broken by
/// the visited set; the set itself is not searched again.
pub fn recursive_find(
    world: &mut World,
    pkg: EntityId,
    part: &SimplePart,
    scope: &Scope,
) -> CResult<Option<EntityId>> {
    let mut examined = AHashSet::new();
    examined.insert(pkg);
    let mut queue = world.exports(pkg);
    while let Some(next) = queue.pop() {
        if !examined.insert(next) {
            continue;
        }
        world.ensure_loaded(next, Some(part))?;
        if let Some(found) = world.try_find_in(next, part, scope)? {
            return Ok(Some(found));
        }
        queue.extend(world.exports(next));
    }
    Ok(None)
}

/// Lazy loader scanning a package directory.
///
/// Sub-directories become sub-packages (loadable one by one); files are
/// grouped by extension and handed to the reader pipeline, which only
/// happens on a full load.
#[derive(Debug)]
struct DirLoader {
    path: PathBuf,
}

impl DirLoader {
    /// Creates a sub-package for `part` if a directory with that name
    /// exists. Only paramless parts can name packages.
    fn load_sub_package(&self, world: &mut World, set: EntityId, name: &str) -> CResult<bool> {
        let dir = self.path.join(name);
        if !name.is_empty() && dir.is_dir() {
            let sub = world.new_package_at(name.to_string(), dir);
            world.add_to(set, sub)?;
            return Ok(true);
        }
        Ok(false)
    }
}

impl NameSetLoader for DirLoader {
    fn load_name(&mut self, world: &mut World, set: EntityId, part: &SimplePart) -> CResult<bool> {
        if !part.params.is_empty() {
            // Parameterised names never come from the file system; defer to
            // the full load so readers get a chance to provide them.
            return Ok(false);
        }
        self.load_sub_package(world, set, &part.name)
    }

    fn load_all(&mut self, world: &mut World, set: EntityId) -> CResult<()> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let entries = std::fs::read_dir(&self.path).map_err(|e| {
            CompileError::new(
                ErrorKind::InternalError,
                format!("failed to read package directory {}: {e}", self.path.display()),
            )
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            } else {
                files.push(path);
            }
        }
        dirs.sort();
        files.sort();

        for dir in dirs {
            let name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            let already = world.find_name(set, &name);
            if already.is_empty() {
                let sub = world.new_package_at(name, dir);
                world.add_to(set, sub)?;
            }
        }

        crate::reader::load_files(world, set, files)
    }
}
