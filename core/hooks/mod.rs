// Copyright 2018-2025 the Deno authors. MIT license.

//! Host hooks for `import()` and `import.meta`.
//!
//! An engine calls into [`HostHooks`] whenever code evaluates a dynamic import
//! or a module gets instantiated. The hooks look up the [`ContextBinding`] of
//! the execution context the call came from and forward the request to the
//! callbacks the embedder registered for that context.

use crate::error::HookError;
use crate::error::type_of;
use deno_error::JsErrorBox;
use futures::future::LocalBoxFuture;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

mod binding;
mod dyn_import;
mod import_meta;
mod registry;

#[cfg(test)]
mod tests;

pub use binding::ContextBinding;
pub use binding::HostHooks;
pub use binding::HostHooksOptions;
pub use dyn_import::DynamicImport;
pub use dyn_import::ImportState;
pub(crate) use dyn_import::PendingImports;
pub use import_meta::standard_import_meta_initializer;
pub(crate) use import_meta::MetaInjector;
pub(crate) use registry::ResolutionRegistry;

/// Value a dynamic import settles with. For a real engine this is the module
/// namespace object.
pub type ModuleNamespace = serde_json::Value;

/// Future returned by a [`DynamicImportCb`]. The callback is expected to do
/// its I/O inside of it and never block when it is invoked.
pub type ResolverFuture =
  LocalBoxFuture<'static, Result<ModuleNamespace, JsErrorBox>>;

/// Callback resolving a dynamic import. Returning `Err` means the callback
/// itself failed, as opposed to the returned future rejecting later.
pub type DynamicImportCb =
  Rc<dyn Fn(&ImportRequest) -> Result<ResolverFuture, JsErrorBox>>;

/// Callback populating `import.meta` of a freshly instantiated module.
pub type ImportMetaCb =
  Rc<dyn Fn(&ModuleWrap, &mut ImportMeta) -> Result<(), JsErrorBox>>;

/// Identifies one execution context of the host engine.
#[derive(
  Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct ContextId(u64);

impl ContextId {
  pub const fn new(id: u64) -> Self {
    Self(id)
  }

  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl From<u64> for ContextId {
  fn from(id: u64) -> Self {
    Self(id)
  }
}

impl fmt::Display for ContextId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Opaque key of one instantiated module, stable for the module's lifetime.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ModuleIdentity(String);

impl ModuleIdentity {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for ModuleIdentity {
  fn from(id: &str) -> Self {
    Self(id.to_string())
  }
}

impl From<String> for ModuleIdentity {
  fn from(id: String) -> Self {
    Self(id)
  }
}

impl fmt::Display for ModuleIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// The script or module a dynamic import was issued from, as exposed by the
/// engine. Both queries are read-only.
pub trait ScriptOrModule {
  /// Resource name (usually an URL) of the referrer.
  fn resource_name(&self) -> Cow<'_, str>;

  /// Number of host defined options attached to the referrer. A non-zero
  /// value means the call site supplied import attributes.
  fn host_defined_options_len(&self) -> usize;
}

/// Plain [`ScriptOrModule`] for embedders that don't have an engine object
/// at hand.
#[derive(Clone, Debug, Default)]
pub struct Referrer {
  pub resource_name: String,
  pub host_defined_options: Vec<serde_json::Value>,
}

impl Referrer {
  pub fn new(resource_name: impl Into<String>) -> Self {
    Self {
      resource_name: resource_name.into(),
      host_defined_options: vec![],
    }
  }

  pub fn with_options(mut self, options: Vec<serde_json::Value>) -> Self {
    self.host_defined_options = options;
    self
  }
}

impl ScriptOrModule for Referrer {
  fn resource_name(&self) -> Cow<'_, str> {
    Cow::Borrowed(&self.resource_name)
  }

  fn host_defined_options_len(&self) -> usize {
    self.host_defined_options.len()
  }
}

/// A single `import()` call, handed to the registered [`DynamicImportCb`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
  specifier: String,
  referrer: String,
  has_assertions: bool,
}

impl ImportRequest {
  pub fn new(
    specifier: impl Into<String>,
    referrer: impl Into<String>,
    has_assertions: bool,
  ) -> Self {
    Self {
      specifier: specifier.into(),
      referrer: referrer.into(),
      has_assertions,
    }
  }

  pub(crate) fn from_referrer(
    specifier: &str,
    referrer: &dyn ScriptOrModule,
  ) -> Self {
    Self::new(
      specifier,
      referrer.resource_name(),
      referrer.host_defined_options_len() > 0,
    )
  }

  pub fn specifier(&self) -> &str {
    &self.specifier
  }

  pub fn referrer(&self) -> &str {
    &self.referrer
  }

  pub fn has_assertions(&self) -> bool {
    self.has_assertions
  }
}

/// What the import.meta initializer gets to see of a module.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ModuleWrap {
  pub identity: ModuleIdentity,
  /// Module name, usually the resolved URL.
  pub name: String,
  /// Resource name of the module that first requested this one.
  pub referrer: Option<String>,
  pub main: bool,
}

impl ModuleWrap {
  pub fn new(identity: impl Into<ModuleIdentity>, name: impl Into<String>) -> Self {
    Self {
      identity: identity.into(),
      name: name.into(),
      referrer: None,
      main: false,
    }
  }

  pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
    self.referrer = Some(referrer.into());
    self
  }

  pub fn with_main(mut self, main: bool) -> Self {
    self.main = main;
    self
  }
}

/// The `import.meta` object of one module instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ImportMeta(serde_json::Map<String, serde_json::Value>);

impl ImportMeta {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(
    &mut self,
    key: impl Into<String>,
    value: impl Into<serde_json::Value>,
  ) {
    self.0.insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
    self.0.get(key)
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.0.get(key).and_then(|v| v.as_str())
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn into_value(self) -> serde_json::Value {
    serde_json::Value::Object(self.0)
  }
}

/// An argument handed to one of the registration functions.
///
/// Engines pass registration arguments untyped, so a registration can
/// receive something that is not a function at all.
pub enum HostCallback<T> {
  Function(T),
  NotCallable(serde_json::Value),
}

impl HostCallback<DynamicImportCb> {
  pub fn dynamic_import<F>(f: F) -> Self
  where
    F: Fn(&ImportRequest) -> Result<ResolverFuture, JsErrorBox> + 'static,
  {
    Self::Function(Rc::new(f))
  }
}

impl HostCallback<ImportMetaCb> {
  pub fn import_meta<F>(f: F) -> Self
  where
    F: Fn(&ModuleWrap, &mut ImportMeta) -> Result<(), JsErrorBox> + 'static,
  {
    Self::Function(Rc::new(f))
  }
}

impl<T> HostCallback<T> {
  pub(crate) fn into_function(
    self,
    name: &'static str,
  ) -> Result<T, HookError> {
    match self {
      HostCallback::Function(f) => Ok(f),
      HostCallback::NotCallable(value) => Err(HookError::InvalidCallback {
        name,
        received: type_of(&value),
      }),
    }
  }
}

impl<T> fmt::Debug for HostCallback<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HostCallback::Function(_) => f.write_str("HostCallback::Function"),
      HostCallback::NotCallable(value) => {
        write!(f, "HostCallback::NotCallable({value})")
      }
    }
  }
}
