// Copyright 2018-2025 the Deno authors. MIT license.

use super::ModuleId;
use super::ModuleLoadOptions;
use super::ModuleLoadResponse;
use super::ModuleLoader;
use super::ModuleSource;
use super::ModuleSpecifier;
use super::ModuleType;
use super::ResolutionKind;
use crate::error::HookError;
use crate::hooks::ContextBinding;
use crate::hooks::HostCallback;
use crate::hooks::ImportMeta;
use crate::hooks::ImportRequest;
use crate::hooks::ModuleIdentity;
use crate::hooks::ModuleNamespace;
use crate::hooks::ModuleWrap;
use crate::hooks::ResolverFuture;
use deno_error::JsErrorBox;
use deno_error::JsErrorClass;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use futures::future::Shared;
use log::debug;
use log::trace;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::rc::Weak;

/// Evaluates modules whose type the map doesn't handle itself
/// (`JavaScript` and `Other`). Called after import.meta was initialized.
pub type CustomModuleEvaluationCb = Box<
  dyn Fn(
    &ModuleWrap,
    &ImportMeta,
    ModuleSource,
  ) -> Result<ModuleNamespace, JsErrorBox>,
>;

#[derive(Default)]
pub struct ModuleMapOptions {
  /// The module whose wrapper gets `main: true`.
  pub main_module: Option<ModuleSpecifier>,

  pub custom_module_evaluation_cb: Option<CustomModuleEvaluationCb>,

  /// Don't run the context's import.meta initializer before evaluation.
  pub skip_import_meta: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModuleStatus {
  Loading,
  Evaluated,
  Errored,
}

/// Errors are shared between every import of the same module, so only what
/// an exception needs is kept.
#[derive(Clone, Debug)]
struct ModuleFailure {
  class: Cow<'static, str>,
  message: Cow<'static, str>,
}

impl ModuleFailure {
  fn new(err: &JsErrorBox) -> Self {
    Self {
      class: err.get_class(),
      message: err.get_message(),
    }
  }

  fn to_error(&self) -> JsErrorBox {
    JsErrorBox::new(self.class.clone(), self.message.clone())
  }
}

/// How a module was asked for. Whether a module can be loaded at all may
/// depend on it (JSON needs an import attribute), so modules are keyed by URL
/// and requested type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RequestedModuleType {
  /// Imported without import attributes.
  None,
  /// Imported with import attributes, eg. `{ with: { type: "json" } }`.
  WithAttributes,
}

impl RequestedModuleType {
  pub fn from_assertions(has_assertions: bool) -> Self {
    if has_assertions {
      Self::WithAttributes
    } else {
      Self::None
    }
  }
}

type ModuleKey = (ModuleSpecifier, RequestedModuleType);

type ModuleLoadFuture =
  Shared<LocalBoxFuture<'static, Result<ModuleNamespace, ModuleFailure>>>;

struct ModuleRecord {
  specifier: ModuleSpecifier,
  status: ModuleStatus,
  import_meta: Option<ImportMeta>,
  load: ModuleLoadFuture,
  /// Set once the module was found to redirect to a module the map already
  /// had a record for.
  alias_of: Option<ModuleId>,
}

/// Keeps track of every module that was imported into one context.
///
/// A module is loaded and evaluated once per requested type; every later
/// import of the same URL (or of a URL that redirected to it) gets the same
/// namespace, or the same error.
pub struct ModuleMap {
  binding: Weak<ContextBinding>,
  loader: Rc<dyn ModuleLoader>,
  options: ModuleMapOptions,
  modules: RefCell<Vec<ModuleRecord>>,
  by_url: RefCell<HashMap<ModuleKey, ModuleId>>,
}

impl ModuleMap {
  /// Creates a module map for `binding` and registers it as the binding's
  /// dynamic import callback.
  pub fn install(
    binding: &Rc<ContextBinding>,
    loader: Rc<dyn ModuleLoader>,
    options: ModuleMapOptions,
  ) -> Result<Rc<Self>, HookError> {
    let map = Rc::new(Self {
      binding: Rc::downgrade(binding),
      loader,
      options,
      modules: Default::default(),
      by_url: Default::default(),
    });
    let resolver = map.clone();
    binding.set_dynamic_import_callback(HostCallback::dynamic_import(
      move |request| resolver.dynamic_import(request),
    ))?;
    debug!("module map installed for context {}", binding.id());
    Ok(map)
  }

  /// Number of distinct modules, redirects to an already known module are
  /// not counted.
  pub fn len(&self) -> usize {
    self
      .modules
      .borrow()
      .iter()
      .filter(|record| record.alias_of.is_none())
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get_id(
    &self,
    specifier: &ModuleSpecifier,
    requested_module_type: RequestedModuleType,
  ) -> Option<ModuleId> {
    let id = self
      .by_url
      .borrow()
      .get(&(specifier.clone(), requested_module_type))
      .copied()?;
    Some(self.canonical_id(id))
  }

  fn module_load(&self, id: ModuleId) -> ModuleLoadFuture {
    self.modules.borrow()[id].load.clone()
  }

  fn canonical_id(&self, mut id: ModuleId) -> ModuleId {
    let modules = self.modules.borrow();
    while let Some(target) = modules.get(id).and_then(|record| record.alias_of)
    {
      id = target;
    }
    id
  }

  pub fn get_status(
    &self,
    specifier: &ModuleSpecifier,
    requested_module_type: RequestedModuleType,
  ) -> Option<ModuleStatus> {
    let id = self.get_id(specifier, requested_module_type)?;
    self.modules.borrow().get(id).map(|record| record.status)
  }

  pub fn get_specifier(&self, id: ModuleId) -> Option<ModuleSpecifier> {
    let id = self.canonical_id(id);
    self
      .modules
      .borrow()
      .get(id)
      .map(|record| record.specifier.clone())
  }

  /// The import.meta object the module was evaluated with.
  pub fn get_import_meta(
    &self,
    specifier: &ModuleSpecifier,
    requested_module_type: RequestedModuleType,
  ) -> Option<ImportMeta> {
    let id = self.get_id(specifier, requested_module_type)?;
    self
      .modules
      .borrow()
      .get(id)
      .and_then(|record| record.import_meta.clone())
  }

  /// Registers a module whose namespace is provided by the host instead of
  /// being loaded, eg. a `node:` builtin. Every key of `exports` becomes a
  /// named export, `exports` itself is the default export unless it has a
  /// `default` key.
  ///
  /// The module is evaluated right away and can be imported with or without
  /// import attributes. Its import.meta is never initialized.
  pub fn add_synthetic_module(
    &self,
    specifier: ModuleSpecifier,
    exports: Map<String, Value>,
  ) -> Result<ModuleId, JsErrorBox> {
    let Some(binding) = self.binding.upgrade() else {
      return Err(JsErrorBox::generic(
        "Module map is not attached to a context",
      ));
    };
    let keys = [
      (specifier.clone(), RequestedModuleType::None),
      (specifier.clone(), RequestedModuleType::WithAttributes),
    ];
    if keys.iter().any(|key| self.by_url.borrow().contains_key(key)) {
      return Err(JsErrorBox::type_error(format!(
        "Module {specifier} is already registered"
      )));
    }

    let mut namespace = exports.clone();
    namespace
      .entry("default")
      .or_insert_with(|| Value::Object(exports));
    let namespace = Value::Object(namespace);

    let mut modules = self.modules.borrow_mut();
    let id = modules.len();
    let identity = ModuleIdentity::new(format!("{specifier}#{id}"));
    binding.register_module(ModuleWrap::new(identity, specifier.as_str()));
    modules.push(ModuleRecord {
      specifier: specifier.clone(),
      status: ModuleStatus::Evaluated,
      import_meta: None,
      load: futures::future::ready(Ok(namespace)).boxed_local().shared(),
      alias_of: None,
    });
    drop(modules);
    let mut by_url = self.by_url.borrow_mut();
    for key in keys {
      by_url.insert(key, id);
    }
    debug!("synthetic module {id} registered as {specifier}");
    Ok(id)
  }

  /// Resolver for the binding's dynamic import callback.
  ///
  /// Resolution failures are reported through the returned future, only a
  /// map whose context is gone fails synchronously.
  pub fn dynamic_import(
    self: &Rc<Self>,
    request: &ImportRequest,
  ) -> Result<ResolverFuture, JsErrorBox> {
    if self.binding.upgrade().is_none() {
      return Err(JsErrorBox::generic(
        "Module map is not attached to a context",
      ));
    }

    let resolved = self.loader.resolve(
      request.specifier(),
      request.referrer(),
      ResolutionKind::DynamicImport,
    );
    let specifier = match resolved {
      Ok(specifier) => specifier,
      Err(err) => {
        debug!(
          "failed to resolve {:?} from {:?}: {err}",
          request.specifier(),
          request.referrer()
        );
        return Ok(async move { Err::<ModuleNamespace, _>(err) }.boxed_local());
      }
    };

    let load = self.get_or_load(
      specifier,
      request.referrer(),
      RequestedModuleType::from_assertions(request.has_assertions()),
    );
    Ok(async move { load.await.map_err(|failure| failure.to_error()) }.boxed_local())
  }

  fn get_or_load(
    self: &Rc<Self>,
    specifier: ModuleSpecifier,
    referrer: &str,
    requested_module_type: RequestedModuleType,
  ) -> ModuleLoadFuture {
    if let Some(id) = self.get_id(&specifier, requested_module_type) {
      trace!("reusing module {id} for {specifier}");
      return self.module_load(id);
    }

    let mut modules = self.modules.borrow_mut();
    let id = modules.len();
    let load = Self::load(
      Rc::downgrade(self),
      self.loader.clone(),
      id,
      specifier.clone(),
      referrer.to_string(),
      requested_module_type,
    )
    .boxed_local()
    .shared();
    modules.push(ModuleRecord {
      specifier: specifier.clone(),
      status: ModuleStatus::Loading,
      import_meta: None,
      load: load.clone(),
      alias_of: None,
    });
    drop(modules);
    self
      .by_url
      .borrow_mut()
      .insert((specifier.clone(), requested_module_type), id);
    debug!("loading module {id} from {specifier}");
    load
  }

  /// Holds the map weakly: the future is stored inside of it.
  async fn load(
    map: Weak<Self>,
    loader: Rc<dyn ModuleLoader>,
    id: ModuleId,
    specifier: ModuleSpecifier,
    referrer: String,
    requested_module_type: RequestedModuleType,
  ) -> Result<ModuleNamespace, ModuleFailure> {
    let result = Self::fetch_and_instantiate(
      &map,
      loader.as_ref(),
      id,
      &specifier,
      &referrer,
      requested_module_type,
    )
    .await;

    if let Some(map) = map.upgrade() {
      let status = match &result {
        Ok(_) => ModuleStatus::Evaluated,
        Err(_) => ModuleStatus::Errored,
      };
      if let Some(record) = map.modules.borrow_mut().get_mut(id) {
        record.status = status;
      }
    }
    result.map_err(|err| {
      debug!("module {specifier} errored: {err}");
      ModuleFailure::new(&err)
    })
  }

  async fn fetch_and_instantiate(
    map: &Weak<Self>,
    loader: &dyn ModuleLoader,
    id: ModuleId,
    specifier: &ModuleSpecifier,
    referrer: &str,
    requested_module_type: RequestedModuleType,
  ) -> Result<ModuleNamespace, JsErrorBox> {
    let options = ModuleLoadOptions {
      is_dynamic_import: true,
      has_assertions: requested_module_type
        == RequestedModuleType::WithAttributes,
    };
    loader
      .prepare_load(specifier, Some(referrer.to_string()), true)
      .await?;
    let maybe_referrer = ModuleSpecifier::parse(referrer).ok();
    let source = match loader.load(specifier, maybe_referrer.as_ref(), options) {
      ModuleLoadResponse::Sync(result) => result?,
      ModuleLoadResponse::Async(fut) => fut.await?,
    };
    let found = ModuleSpecifier::parse(source.found_url())
      .map_err(|err| JsErrorBox::type_error(err.to_string()))?;

    // The map must not be kept alive while waiting on another module.
    let target_load = {
      let Some(map) = map.upgrade() else {
        return Err(JsErrorBox::generic("Module map was dropped"));
      };
      match map.redirect_target(id, &found, requested_module_type) {
        Some(target) => map.module_load(target),
        None => return map.instantiate(id, referrer, &found, source),
      }
    };
    target_load.await.map_err(|failure| failure.to_error())
  }

  /// Records that module `id` was found at `found`. If another module is
  /// already known under that URL, `id` becomes an alias of it and its id is
  /// returned.
  fn redirect_target(
    &self,
    id: ModuleId,
    found: &ModuleSpecifier,
    requested_module_type: RequestedModuleType,
  ) -> Option<ModuleId> {
    let key = (found.clone(), requested_module_type);
    let existing = self.by_url.borrow().get(&key).copied();
    match existing.map(|existing| self.canonical_id(existing)) {
      Some(target) if target != id => {
        trace!("module {id} redirected to {found}, reusing module {target}");
        if let Some(record) = self.modules.borrow_mut().get_mut(id) {
          record.alias_of = Some(target);
        }
        Some(target)
      }
      // The found module is already an alias of this one, the two redirect
      // to each other.
      Some(_) => None,
      None => {
        trace!("module {id} redirected to {found}");
        self.by_url.borrow_mut().insert(key, id);
        None
      }
    }
  }

  /// Registers the module with the context, initializes its import.meta and
  /// evaluates it. Nothing is evaluated if import.meta can't be initialized.
  fn instantiate(
    &self,
    id: ModuleId,
    referrer: &str,
    found: &ModuleSpecifier,
    source: ModuleSource,
  ) -> Result<ModuleNamespace, JsErrorBox> {
    let Some(binding) = self.binding.upgrade() else {
      return Err(JsErrorBox::generic("Module map is not attached to a context"));
    };
    let main = self.options.main_module.as_ref() == Some(found);
    let identity = ModuleIdentity::new(format!("{}#{id}", found));
    let wrap = ModuleWrap::new(identity.clone(), found.as_str())
      .with_referrer(referrer)
      .with_main(main);
    binding.register_module(wrap.clone());

    let mut meta = ImportMeta::new();
    if !self.options.skip_import_meta {
      binding
        .initialize_import_meta_object(&identity, &mut meta)
        .map_err(JsErrorBox::from_err)?;
    }
    if let Some(record) = self.modules.borrow_mut().get_mut(id) {
      record.import_meta = Some(meta.clone());
    }

    self.evaluate(&wrap, &meta, source)
  }

  fn evaluate(
    &self,
    wrap: &ModuleWrap,
    meta: &ImportMeta,
    source: ModuleSource,
  ) -> Result<ModuleNamespace, JsErrorBox> {
    let module_type = source.module_type.clone();
    match module_type {
      ModuleType::Json => {
        let code = source
          .code
          .as_str()
          .map_err(|err| JsErrorBox::type_error(err.to_string()))?;
        let value: serde_json::Value =
          serde_json::from_str(code).map_err(|err| {
            JsErrorBox::new(
              "SyntaxError",
              format!("Unable to parse JSON module {}: {err}", wrap.name),
            )
          })?;
        Ok(json!({ "default": value }))
      }
      ModuleType::Text => {
        let code = source
          .code
          .as_str()
          .map_err(|err| JsErrorBox::type_error(err.to_string()))?;
        Ok(json!({ "default": code }))
      }
      ModuleType::JavaScript | ModuleType::Other(_) => {
        match &self.options.custom_module_evaluation_cb {
          Some(cb) => cb(wrap, meta, source),
          None => Err(JsErrorBox::type_error(format!(
            "Importing {} modules is not supported: {}",
            module_type, wrap.name
          ))),
        }
      }
    }
  }
}
