// Copyright 2018-2025 the Deno authors. MIT license.

#![doc = include_str!("README.md")]
#![deny(clippy::unnecessary_wraps)]

pub mod error;
mod hooks;
mod modules;

// Re-exports
pub use deno_error;
pub use futures;
pub use serde_json;
pub use url;

pub use crate::hooks::ContextBinding;
pub use crate::hooks::ContextId;
pub use crate::hooks::DynamicImport;
pub use crate::hooks::DynamicImportCb;
pub use crate::hooks::HostCallback;
pub use crate::hooks::HostHooks;
pub use crate::hooks::HostHooksOptions;
pub use crate::hooks::ImportMeta;
pub use crate::hooks::ImportMetaCb;
pub use crate::hooks::ImportRequest;
pub use crate::hooks::ImportState;
pub use crate::hooks::ModuleIdentity;
pub use crate::hooks::ModuleNamespace;
pub use crate::hooks::ModuleWrap;
pub use crate::hooks::Referrer;
pub use crate::hooks::ResolverFuture;
pub use crate::hooks::ScriptOrModule;
pub use crate::hooks::standard_import_meta_initializer;
pub use crate::modules::CustomModuleEvaluationCb;
pub use crate::modules::FsModuleLoader;
pub use crate::modules::ModuleId;
pub use crate::modules::ModuleLoadOptions;
pub use crate::modules::ModuleLoadResponse;
pub use crate::modules::ModuleLoader;
pub use crate::modules::ModuleLoaderError;
pub use crate::modules::ModuleMap;
pub use crate::modules::ModuleMapOptions;
pub use crate::modules::ModuleResolutionError;
pub use crate::modules::ModuleSource;
pub use crate::modules::ModuleSourceCode;
pub use crate::modules::ModuleSourceFuture;
pub use crate::modules::ModuleSpecifier;
pub use crate::modules::ModuleStatus;
pub use crate::modules::ModuleType;
pub use crate::modules::NoopModuleLoader;
pub use crate::modules::RequestedModuleType;
pub use crate::modules::ResolutionKind;
pub use crate::modules::StaticModuleLoader;
pub use crate::modules::resolve_import;
