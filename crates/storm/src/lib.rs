#![doc = include_str!("../../../README.md")]

mod builtins;
pub mod bs;
mod chain;
mod codegen;
mod diag;
mod doc;
mod entity;
mod name;
mod nameset;
mod package;
mod reader;
mod reload;
mod runtime;
mod scope;
pub mod syntax;
mod thread;
pub mod trace;
mod typesys;
mod value;
mod world;

pub use crate::{
    builtins::Builtins,
    chain::TypeChain,
    codegen::{BlockId, CodeGen, Instr, Label, Listing, VarSlot},
    diag::{CResult, CompileError, Diagnostics, ErrorKind, SrcPos},
    doc::{Doc, DocSource},
    entity::{Entity, EntityId, EntityKind, Visibility},
    name::{Name, NamePart, RecPart, SimpleName, SimplePart},
    nameset::{LoadState, NameOverloads, NameSetData, NameSetLoader, Template, TemplateFn, WatchEvent},
    package::PackageData,
    reader::{
        CreateFileReader, FileInfo, FilePkgReader, FileReader, PkgReader, ReaderPhase, ReaderQuery, create_reader,
        load_files, register_reader,
    },
    reload::{ReplaceContext, ReplaceTasks, replace_package},
    runtime::{CloneEnv, ObjMap, RtObject, RtValue, TypeHandle},
    scope::{DefaultLookup, Scope, ScopeExtra, ScopeLookup},
    syntax::{
        DelimKind, IndentInfo, IndentType, InfoErrors, InfoTree, Parser, Production, ProductionId, RepType, RuleData,
        TextIndent, Token, TokenBinding, TokenColor,
    },
    thread::{COMPILER, Event, FutureValue, Scheduler, Sema, ThreadId, WaitResult},
    trace::{CompilerTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
    typesys::{
        CodeRef, FnFlags, FunctionData, GcType, GlobalVarData, MemberVarData, NativeFn, OverridePart, ReaderFactory,
        RunOn, Size, ThreadData, TypeData, TypeFlags, VTable, ValType,
    },
    value::{MatchFlags, Value, common, this_ptr},
    world::{TemplateInstance, World},
};
