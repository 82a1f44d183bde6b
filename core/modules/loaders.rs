// Copyright 2018-2025 the Deno authors. MIT license.

use super::ModuleLoadOptions;
use super::ModuleLoadResponse;
use super::ModuleLoaderError;
use super::ModuleSource;
use super::ModuleSourceCode;
use super::ModuleSpecifier;
use super::ModuleType;
use super::ResolutionKind;
use super::resolve_import;
use deno_error::JsErrorBox;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use std::collections::HashMap;
#[cfg(test)]
use std::cell::Cell;
#[cfg(test)]
use std::cell::RefCell;

const JSON_WITHOUT_ATTRIBUTE: &str = "Attempted to load JSON module without specifying \"type\": \"json\" attribute in the import statement.";

pub trait ModuleLoader {
  /// Returns an absolute URL.
  /// A standards compliant loader should implement exactly the
  /// algorithm described here:
  /// <https://html.spec.whatwg.org/multipage/webappapis.html#resolve-a-module-specifier>
  ///
  /// [`ResolutionKind::MainModule`] can be used to resolve from current working directory or
  /// apply import map for child imports.
  fn resolve(
    &self,
    specifier: &str,
    referrer: &str,
    kind: ResolutionKind,
  ) -> Result<ModuleSpecifier, ModuleLoaderError>;

  /// Given ModuleSpecifier, load its source code.
  ///
  /// `options.is_dynamic_import` can be used to check permissions or deny
  /// dynamic imports altogether.
  fn load(
    &self,
    module_specifier: &ModuleSpecifier,
    maybe_referrer: Option<&ModuleSpecifier>,
    options: ModuleLoadOptions,
  ) -> ModuleLoadResponse;

  /// This hook can be used by implementors to do some preparation
  /// work before starting loading of modules.
  ///
  /// For example implementor might download multiple modules in
  /// parallel and transpile them to final JS sources before
  /// yielding control back to the runtime.
  ///
  /// It's not required to implement this method.
  fn prepare_load(
    &self,
    _module_specifier: &ModuleSpecifier,
    _maybe_referrer: Option<String>,
    _is_dyn_import: bool,
  ) -> LocalBoxFuture<'static, Result<(), ModuleLoaderError>> {
    async { Ok(()) }.boxed_local()
  }
}

/// Placeholder structure used when creating
/// a runtime that doesn't support module loading.
pub struct NoopModuleLoader;

impl ModuleLoader for NoopModuleLoader {
  fn resolve(
    &self,
    specifier: &str,
    referrer: &str,
    _kind: ResolutionKind,
  ) -> Result<ModuleSpecifier, ModuleLoaderError> {
    resolve_import(specifier, referrer).map_err(JsErrorBox::from_err)
  }

  fn load(
    &self,
    module_specifier: &ModuleSpecifier,
    maybe_referrer: Option<&ModuleSpecifier>,
    _options: ModuleLoadOptions,
  ) -> ModuleLoadResponse {
    let maybe_referrer = match maybe_referrer {
      Some(url) => url.as_str(),
      None => "(no referrer)",
    };
    let err = JsErrorBox::generic(format!(
      "Module loading is not supported; attempted to load: \"{module_specifier}\" from \"{maybe_referrer}\"",
    ));
    ModuleLoadResponse::Sync(Err(err))
  }
}

/// Picks the module type from the file extension. Only `.json` and `.txt`
/// are special, everything else is handed to the evaluator as JavaScript.
fn module_type_for(specifier: &ModuleSpecifier) -> ModuleType {
  let path = specifier.path();
  let ext = match path.rsplit_once('.') {
    Some((_, ext)) if !ext.contains('/') => ext.to_lowercase(),
    _ => return ModuleType::JavaScript,
  };
  match ext.as_str() {
    "json" => ModuleType::Json,
    "txt" => ModuleType::Text,
    _ => ModuleType::JavaScript,
  }
}

fn check_module_type(
  module_type: &ModuleType,
  options: ModuleLoadOptions,
) -> Result<(), ModuleLoaderError> {
  // A JSON file can only be imported with an import attribute.
  if *module_type == ModuleType::Json && !options.has_assertions {
    return Err(JsErrorBox::type_error(JSON_WITHOUT_ATTRIBUTE));
  }
  Ok(())
}

/// Basic file system module loader.
///
/// Files are read with `tokio::fs`, so the returned futures must be driven
/// from within a tokio runtime.
pub struct FsModuleLoader;

impl ModuleLoader for FsModuleLoader {
  fn resolve(
    &self,
    specifier: &str,
    referrer: &str,
    _kind: ResolutionKind,
  ) -> Result<ModuleSpecifier, ModuleLoaderError> {
    resolve_import(specifier, referrer).map_err(JsErrorBox::from_err)
  }

  fn load(
    &self,
    module_specifier: &ModuleSpecifier,
    _maybe_referrer: Option<&ModuleSpecifier>,
    options: ModuleLoadOptions,
  ) -> ModuleLoadResponse {
    let module_specifier = module_specifier.clone();
    let fut = async move {
      let path = module_specifier.to_file_path().map_err(|_| {
        JsErrorBox::generic(format!(
          "Provided module specifier \"{module_specifier}\" is not a file URL."
        ))
      })?;
      let module_type = module_type_for(&module_specifier);
      check_module_type(&module_type, options)?;

      let code = tokio::fs::read(&path).await.map_err(|err| {
        JsErrorBox::new(
          "NotFound",
          format!("Failed to load {}: {err}", module_specifier.as_str()),
        )
      })?;
      Ok(ModuleSource::new(
        module_type,
        ModuleSourceCode::Bytes(code),
        &module_specifier,
      ))
    }
    .boxed_local();

    ModuleLoadResponse::Async(fut)
  }
}

/// A module loader that you can pre-load a number of modules into and resolve from. Useful for testing and
/// embedding situations where the filesystem is not usable or a good fit.
pub struct StaticModuleLoader {
  map: HashMap<ModuleSpecifier, String>,
}

impl StaticModuleLoader {
  /// Create a new [`StaticModuleLoader`] from an `Iterator` of specifiers and code.
  pub fn new(
    from: impl IntoIterator<Item = (ModuleSpecifier, impl Into<String>)>,
  ) -> Self {
    Self {
      map: from
        .into_iter()
        .map(|(url, code)| (url, code.into()))
        .collect(),
    }
  }

  /// Create a new [`StaticModuleLoader`] from a single code item.
  pub fn with(specifier: ModuleSpecifier, code: impl Into<String>) -> Self {
    Self::new([(specifier, code)])
  }
}

impl ModuleLoader for StaticModuleLoader {
  fn resolve(
    &self,
    specifier: &str,
    referrer: &str,
    _kind: ResolutionKind,
  ) -> Result<ModuleSpecifier, ModuleLoaderError> {
    resolve_import(specifier, referrer).map_err(JsErrorBox::from_err)
  }

  fn load(
    &self,
    module_specifier: &ModuleSpecifier,
    _maybe_referrer: Option<&ModuleSpecifier>,
    options: ModuleLoadOptions,
  ) -> ModuleLoadResponse {
    let Some(code) = self.map.get(module_specifier) else {
      return ModuleLoadResponse::Sync(Err(JsErrorBox::new(
        "NotFound",
        format!("Module not found: {module_specifier}"),
      )));
    };
    let module_type = module_type_for(module_specifier);
    let res = check_module_type(&module_type, options).map(|_| {
      ModuleSource::new(
        module_type,
        ModuleSourceCode::String(code.clone()),
        module_specifier,
      )
    });
    ModuleLoadResponse::Sync(res)
  }
}

/// Annotates a `ModuleLoader` with a log of all `load()` calls.
/// as well as a count of all `resolve()`, `prepare()`, and `load()` calls.
#[cfg(test)]
pub struct TestingModuleLoader<L: ModuleLoader> {
  loader: L,
  log: RefCell<Vec<ModuleSpecifier>>,
  load_count: Cell<usize>,
  prepare_count: Cell<usize>,
  resolve_count: Cell<usize>,
}

#[cfg(test)]
impl<L: ModuleLoader> TestingModuleLoader<L> {
  pub fn new(loader: L) -> Self {
    Self {
      loader,
      log: RefCell::new(vec![]),
      load_count: Default::default(),
      prepare_count: Default::default(),
      resolve_count: Default::default(),
    }
  }

  pub fn log(&self) -> Vec<ModuleSpecifier> {
    self.log.borrow().clone()
  }

  /// Retrieve the current module load event counts.
  pub fn counts(&self) -> ModuleLoadEventCounts {
    ModuleLoadEventCounts {
      load: self.load_count.get(),
      prepare: self.prepare_count.get(),
      resolve: self.resolve_count.get(),
    }
  }
}

#[cfg(test)]
impl<L: ModuleLoader> ModuleLoader for TestingModuleLoader<L> {
  fn resolve(
    &self,
    specifier: &str,
    referrer: &str,
    kind: ResolutionKind,
  ) -> Result<ModuleSpecifier, ModuleLoaderError> {
    self.resolve_count.set(self.resolve_count.get() + 1);
    self.loader.resolve(specifier, referrer, kind)
  }

  fn prepare_load(
    &self,
    module_specifier: &ModuleSpecifier,
    maybe_referrer: Option<String>,
    is_dyn_import: bool,
  ) -> LocalBoxFuture<'static, Result<(), ModuleLoaderError>> {
    self.prepare_count.set(self.prepare_count.get() + 1);
    self
      .loader
      .prepare_load(module_specifier, maybe_referrer, is_dyn_import)
  }

  fn load(
    &self,
    module_specifier: &ModuleSpecifier,
    maybe_referrer: Option<&ModuleSpecifier>,
    options: ModuleLoadOptions,
  ) -> ModuleLoadResponse {
    self.load_count.set(self.load_count.get() + 1);
    self.log.borrow_mut().push(module_specifier.clone());
    self.loader.load(module_specifier, maybe_referrer, options)
  }
}

#[cfg(test)]
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct ModuleLoadEventCounts {
  pub resolve: usize,
  pub prepare: usize,
  pub load: usize,
}

#[cfg(test)]
impl ModuleLoadEventCounts {
  pub fn new(resolve: usize, prepare: usize, load: usize) -> Self {
    Self {
      resolve,
      prepare,
      load,
    }
  }
}
