//! Deferred documentation extraction.
//!
//! When a reader encounters a doc comment attached to a declaration it only
//! records where the comment is; the text itself is read from disk on
//! demand. Packages surface a `README` file as their documentation.

use std::{fs, path::PathBuf, sync::Arc};

use crate::{
    diag::{CResult, CompileError, ErrorKind},
    entity::{EntityId, EntityKind},
    world::World,
};

/// Where a doc comment lives: recorded eagerly, read lazily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSource {
    pub file: Arc<PathBuf>,
    pub pos: u32,
    pub len: u32,
}

/// Extracted documentation for an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doc {
    /// Name of the documented entity.
    pub name: String,
    /// The comment text, stripped of comment markers.
    pub body: String,
}

impl DocSource {
    /// Reads the comment text from disk and strips line-comment markers.
    pub fn load(&self) -> CResult<String> {
        let contents = fs::read_to_string(self.file.as_path()).map_err(|e| {
            CompileError::new(
                ErrorKind::DocError,
                format!("failed to read {}: {e}", self.file.display()),
            )
        })?;
        let start = self.pos as usize;
        let end = (self.pos + self.len) as usize;
        let Some(raw) = contents.get(start..end) else {
            return Err(CompileError::new(
                ErrorKind::DocError,
                format!("documentation range out of bounds in {}", self.file.display()),
            ));
        };
        let mut body = String::new();
        for line in raw.lines() {
            let line = line.trim_start();
            let line = line.strip_prefix("//").unwrap_or(line).trim_start();
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(line);
        }
        Ok(body)
    }
}

impl World {
    /// The documentation of an entity, read on demand.
    ///
    /// Entities without a recorded comment have no documentation, except
    /// packages, which fall back to a `README` file in their directory.
    pub fn doc(&self, id: EntityId) -> CResult<Option<Doc>> {
        let entity = self.entity(id);
        if let Some(source) = &entity.doc {
            return Ok(Some(Doc {
                name: entity.name.clone(),
                body: source.load()?,
            }));
        }
        if let EntityKind::Package(data) = &entity.kind {
            if let Some(dir) = &data.url {
                let readme = dir.join("README");
                if readme.is_file() {
                    let body = fs::read_to_string(&readme).map_err(|e| {
                        CompileError::new(ErrorKind::DocError, format!("failed to read {}: {e}", readme.display()))
                    })?;
                    return Ok(Some(Doc {
                        name: entity.name.clone(),
                        body: body.trim_end().to_string(),
                    }));
                }
            }
        }
        Ok(None)
    }
}
