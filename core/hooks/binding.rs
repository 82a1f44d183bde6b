// Copyright 2018-2025 the Deno authors. MIT license.

use super::ContextId;
use super::DynamicImport;
use super::DynamicImportCb;
use super::HostCallback;
use super::ImportMeta;
use super::ImportMetaCb;
use super::ImportRequest;
use super::MetaInjector;
use super::ModuleIdentity;
use super::ModuleWrap;
use super::PendingImports;
use super::ResolutionRegistry;
use super::ScriptOrModule;
use crate::error::HookError;
use crate::error::ImportError;
use crate::error::ImportMetaError;
use log::debug;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

const DYNAMIC_IMPORT_CALLBACK: &str = "dynamic import callback";
const IMPORT_META_CALLBACK: &str = "import.meta callback";

#[derive(Default)]
pub struct HostHooksOptions {
  /// Installed as the dynamic import callback of every context binding when
  /// it gets created.
  pub dynamic_import_cb: Option<DynamicImportCb>,

  /// Installed as the import.meta callback of every context binding when it
  /// gets created.
  pub import_meta_cb: Option<ImportMetaCb>,
}

/// Registry state owned by a single execution context.
///
/// A binding is created by [`HostHooks`] the first time anything is
/// registered for its context. [`HostHooks::destroy_context`] tears it down,
/// the torn down binding stays in place so the context can't be revived.
pub struct ContextBinding {
  id: ContextId,
  registry: ResolutionRegistry,
  imports: Rc<PendingImports>,
  injector: MetaInjector,
  torn_down: Cell<bool>,
}

impl ContextBinding {
  fn new(id: ContextId) -> Self {
    Self {
      id,
      registry: Default::default(),
      imports: Rc::new(PendingImports::new(id)),
      injector: Default::default(),
      torn_down: Cell::new(false),
    }
  }

  pub fn id(&self) -> ContextId {
    self.id
  }

  pub fn is_torn_down(&self) -> bool {
    self.torn_down.get()
  }

  fn check_alive(&self) -> Result<(), HookError> {
    if self.is_torn_down() {
      return Err(HookError::ContextTornDown(self.id));
    }
    Ok(())
  }

  /// Replaces the dynamic import callback of this context. Imports that are
  /// already pending are not affected.
  pub fn set_dynamic_import_callback(
    &self,
    cb: HostCallback<DynamicImportCb>,
  ) -> Result<(), HookError> {
    let cb = cb.into_function(DYNAMIC_IMPORT_CALLBACK)?;
    self.check_alive()?;
    if self.registry.set_dynamic_import_callback(cb) {
      debug!("replaced dynamic import callback of context {}", self.id);
    } else {
      debug!("installed dynamic import callback for context {}", self.id);
    }
    Ok(())
  }

  /// Replaces the import.meta callback of this context.
  pub fn set_import_meta_callback(
    &self,
    cb: HostCallback<ImportMetaCb>,
  ) -> Result<(), HookError> {
    let cb = cb.into_function(IMPORT_META_CALLBACK)?;
    self.check_alive()?;
    if self.registry.set_import_meta_callback(cb) {
      debug!("replaced import.meta callback of context {}", self.id);
    } else {
      debug!("installed import.meta callback for context {}", self.id);
    }
    Ok(())
  }

  pub fn clear_dynamic_import_callback(&self) -> bool {
    self.registry.clear_dynamic_import_callback().is_some()
  }

  pub fn clear_import_meta_callback(&self) -> bool {
    self.registry.clear_import_meta_callback().is_some()
  }

  pub fn has_dynamic_import_callback(&self) -> bool {
    self.registry.has_dynamic_import_callback()
  }

  pub fn has_import_meta_callback(&self) -> bool {
    self.registry.has_import_meta_callback()
  }

  /// Makes `wrap` available to the import.meta initializer under its
  /// identity. Returns `false` if the identity was already taken.
  pub fn register_module(&self, wrap: ModuleWrap) -> bool {
    if self.is_torn_down() {
      return false;
    }
    self.injector.register_module(wrap)
  }

  pub fn get_module(&self, identity: &ModuleIdentity) -> Option<ModuleWrap> {
    self.injector.get_module(identity)
  }

  pub fn is_meta_initialized(&self, identity: &ModuleIdentity) -> bool {
    self.injector.is_initialized(identity)
  }

  /// Number of dynamic imports of this context that haven't settled yet.
  pub fn pending_import_count(&self) -> usize {
    self.imports.len()
  }

  /// Engine entry point for `import(specifier)` evaluated in code coming
  /// from `referrer`.
  pub fn import_module_dynamically(
    &self,
    referrer: &dyn ScriptOrModule,
    specifier: &str,
  ) -> DynamicImport {
    self.import(ImportRequest::from_referrer(specifier, referrer))
  }

  pub fn import(&self, request: ImportRequest) -> DynamicImport {
    if self.is_torn_down() {
      let err = ImportError::ContextTornDown {
        specifier: request.specifier().to_string(),
        context: self.id,
      };
      return DynamicImport::rejected(request, err);
    }
    let cb = self.registry.dynamic_import_callback();
    self.imports.dispatch(request, cb)
  }

  /// Engine entry point run once a module got instantiated and before its
  /// code is evaluated. An error means the module must not be evaluated.
  pub fn initialize_import_meta_object(
    &self,
    module: &ModuleIdentity,
    meta: &mut ImportMeta,
  ) -> Result<(), ImportMetaError> {
    if self.is_torn_down() {
      return Err(ImportMetaError::ContextTornDown(self.id));
    }
    let cb = self.registry.import_meta_callback();
    self.injector.initialize(module, meta, cb)
  }

  /// Rejects whatever is still pending and drops all callbacks. Returns the
  /// number of rejected imports.
  fn teardown(&self) -> usize {
    if self.torn_down.replace(true) {
      return 0;
    }
    let rejected = self.imports.reject_all();
    self.registry.clear();
    self.injector.clear();
    debug!(
      "context {} torn down, {} pending dynamic import(s) rejected",
      self.id, rejected
    );
    rejected
  }
}

/// Maps execution contexts to their [`ContextBinding`].
///
/// This is the surface an engine integration talks to: registration calls
/// coming from the embedder and the two host callbacks coming from the
/// engine.
pub struct HostHooks {
  options: HostHooksOptions,
  bindings: RefCell<HashMap<ContextId, Rc<ContextBinding>>>,
}

impl Default for HostHooks {
  fn default() -> Self {
    Self::new(Default::default())
  }
}

impl HostHooks {
  pub fn new(options: HostHooksOptions) -> Self {
    Self {
      options,
      bindings: Default::default(),
    }
  }

  pub fn binding(&self, context: ContextId) -> Option<Rc<ContextBinding>> {
    self.bindings.borrow().get(&context).cloned()
  }

  /// Returns the binding of `context`, creating it with the callbacks of
  /// [`HostHooksOptions`] if there is none. A destroyed context keeps its
  /// torn down binding, so nothing registered through it takes effect.
  pub fn binding_or_create(&self, context: ContextId) -> Rc<ContextBinding> {
    if let Some(binding) = self.binding(context) {
      return binding;
    }
    let binding = Rc::new(ContextBinding::new(context));
    if let Some(cb) = &self.options.dynamic_import_cb {
      binding.registry.set_dynamic_import_callback(cb.clone());
    }
    if let Some(cb) = &self.options.import_meta_cb {
      binding.registry.set_import_meta_callback(cb.clone());
    }
    debug!("created binding for context {context}");
    self.bindings.borrow_mut().insert(context, binding.clone());
    binding
  }

  /// Number of contexts that have a binding which hasn't been torn down.
  pub fn context_count(&self) -> usize {
    self
      .bindings
      .borrow()
      .values()
      .filter(|binding| !binding.is_torn_down())
      .count()
  }

  pub fn set_dynamic_import_callback(
    &self,
    context: ContextId,
    cb: HostCallback<DynamicImportCb>,
  ) -> Result<(), HookError> {
    // Validated before the binding exists, a bad argument must not create
    // one.
    let cb = cb.into_function(DYNAMIC_IMPORT_CALLBACK)?;
    self
      .binding_or_create(context)
      .set_dynamic_import_callback(HostCallback::Function(cb))
  }

  pub fn set_import_meta_callback(
    &self,
    context: ContextId,
    cb: HostCallback<ImportMetaCb>,
  ) -> Result<(), HookError> {
    let cb = cb.into_function(IMPORT_META_CALLBACK)?;
    self
      .binding_or_create(context)
      .set_import_meta_callback(HostCallback::Function(cb))
  }

  /// Host callback for `import()`.
  pub fn import_module_dynamically(
    &self,
    context: ContextId,
    referrer: &dyn ScriptOrModule,
    specifier: &str,
  ) -> DynamicImport {
    match self.binding(context) {
      Some(binding) => binding.import_module_dynamically(referrer, specifier),
      // Without a binding there can't be a callback.
      None => {
        let request = ImportRequest::from_referrer(specifier, referrer);
        let err = ImportError::NoResolverRegistered {
          specifier: request.specifier().to_string(),
          referrer: request.referrer().to_string(),
        };
        DynamicImport::rejected(request, err)
      }
    }
  }

  /// Host callback for `import.meta` initialization. A context without
  /// binding has no initializer, so the object stays empty.
  pub fn initialize_import_meta_object(
    &self,
    context: ContextId,
    module: &ModuleIdentity,
    meta: &mut ImportMeta,
  ) -> Result<(), ImportMetaError> {
    match self.binding(context) {
      Some(binding) => binding.initialize_import_meta_object(module, meta),
      None => Ok(()),
    }
  }

  /// Tears down the binding of `context`, rejecting every dynamic import
  /// that is still pending. Returns the number of rejected imports.
  ///
  /// The context stays known as destroyed: later registrations fail and
  /// later imports are rejected with `ContextTornDown`.
  pub fn destroy_context(&self, context: ContextId) -> usize {
    let binding = self
      .bindings
      .borrow_mut()
      .entry(context)
      .or_insert_with(|| Rc::new(ContextBinding::new(context)))
      .clone();
    binding.teardown()
  }
}

impl Drop for HostHooks {
  fn drop(&mut self) {
    let bindings = std::mem::take(self.bindings.get_mut());
    for binding in bindings.into_values() {
      binding.teardown();
    }
  }
}
