use std::{env, path::PathBuf, process::ExitCode, time::Instant};

use storm::{CompileError, NoopTracer, SimpleName, World};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut json = false;
    let mut root: Option<PathBuf> = None;
    let mut imports: Vec<(String, PathBuf)> = Vec::new();
    let mut packages: Vec<String> = Vec::new();

    for arg in &args {
        if arg == "--json" {
            json = true;
        } else if let Some((name, path)) = arg.split_once('=') {
            imports.push((name.to_string(), PathBuf::from(path)));
        } else if root.is_none() {
            root = Some(PathBuf::from(arg));
        } else {
            packages.push(arg.clone());
        }
    }

    let Some(root) = root else {
        eprintln!("usage: storm [--json] <root-dir> [name=path ...] [package ...]");
        return ExitCode::FAILURE;
    };
    if !root.is_dir() {
        eprintln!("error: {} is not a directory", root.display());
        return ExitCode::FAILURE;
    }

    let start = Instant::now();
    let mut world = match World::new(Some(root), Box::new(NoopTracer)) {
        Ok(world) => world,
        Err(err) => return fail(err),
    };
    for (name, path) in imports {
        if let Err(err) = world.add_import(&name, path) {
            return fail(err);
        }
    }

    // With no explicit packages, compile the root itself.
    if packages.is_empty() {
        packages.push(String::new());
    }
    for pkg in &packages {
        let result = compile_package(&mut world, pkg);
        if let Err(err) = result {
            eprintln!("error: {err}");
            report(&mut world, json);
            return ExitCode::FAILURE;
        }
    }

    let elapsed = start.elapsed();
    let failed = !world.diags.is_empty();
    report(&mut world, json);
    if failed {
        ExitCode::FAILURE
    } else {
        eprintln!("compiled in {elapsed:?}");
        ExitCode::SUCCESS
    }
}

fn fail(err: CompileError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::FAILURE
}

fn compile_package(world: &mut World, pkg: &str) -> Result<(), CompileError> {
    let target = if pkg.is_empty() {
        world.root()
    } else {
        let name = SimpleName::parse(pkg)?;
        match world.find_root(&name)? {
            Some(found) => found,
            None => {
                return Err(CompileError::new(
                    storm::ErrorKind::InvalidName,
                    format!("can not find the package {pkg}"),
                ));
            }
        }
    };
    world.compile(target)
}

fn report(world: &mut World, json: bool) {
    let errors = world.diags.take();
    if json {
        match serde_json::to_string_pretty(&errors) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("error: failed to serialize diagnostics: {err}"),
        }
        return;
    }
    for error in &errors {
        eprintln!("{error}");
    }
}
