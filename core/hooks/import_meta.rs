// Copyright 2018-2025 the Deno authors. MIT license.

use super::HostCallback;
use super::ImportMeta;
use super::ImportMetaCb;
use super::ModuleIdentity;
use super::ModuleWrap;
use crate::error::ImportMetaError;
use deno_error::JsErrorBox;
use deno_error::JsErrorClass;
use log::debug;
use log::trace;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use url::Url;

enum MetaStatus {
  Initialized,
  Failed {
    class: Cow<'static, str>,
    message: Cow<'static, str>,
  },
}

/// Looks up module wrappers and runs the import.meta initializer for them,
/// at most once per module.
#[derive(Default)]
pub(crate) struct MetaInjector {
  modules: RefCell<HashMap<ModuleIdentity, ModuleWrap>>,
  status: RefCell<HashMap<ModuleIdentity, MetaStatus>>,
}

impl MetaInjector {
  /// Returns `false` if a module with the same identity is already known, in
  /// which case the existing wrapper is kept.
  pub fn register_module(&self, wrap: ModuleWrap) -> bool {
    let mut modules = self.modules.borrow_mut();
    if modules.contains_key(&wrap.identity) {
      return false;
    }
    trace!("registered module {} ({})", wrap.identity, wrap.name);
    modules.insert(wrap.identity.clone(), wrap);
    true
  }

  pub fn get_module(&self, identity: &ModuleIdentity) -> Option<ModuleWrap> {
    self.modules.borrow().get(identity).cloned()
  }

  pub fn is_initialized(&self, identity: &ModuleIdentity) -> bool {
    matches!(
      self.status.borrow().get(identity),
      Some(MetaStatus::Initialized)
    )
  }

  pub fn initialize(
    &self,
    identity: &ModuleIdentity,
    meta: &mut ImportMeta,
    cb: Option<ImportMetaCb>,
  ) -> Result<(), ImportMetaError> {
    match self.status.borrow().get(identity) {
      Some(MetaStatus::Initialized) => {
        trace!("import.meta of {identity} already initialized");
        return Ok(());
      }
      Some(MetaStatus::Failed { class, message }) => {
        return Err(ImportMetaError::MetaInitialization {
          module: identity.clone(),
          source: JsErrorBox::new(class.clone(), message.clone()),
        });
      }
      None => {}
    }

    let Some(wrap) = self.get_module(identity) else {
      return Err(ImportMetaError::UnknownModule(identity.clone()));
    };

    // Marked up front so that a re-entrant call for the same module can't
    // run the initializer a second time.
    self
      .status
      .borrow_mut()
      .insert(identity.clone(), MetaStatus::Initialized);

    let Some(cb) = cb else {
      return Ok(());
    };

    if let Err(err) = cb(&wrap, meta) {
      debug!("import.meta initializer failed for {identity}: {err}");
      self.status.borrow_mut().insert(
        identity.clone(),
        MetaStatus::Failed {
          class: err.get_class(),
          message: err.get_message(),
        },
      );
      return Err(ImportMetaError::MetaInitialization {
        module: identity.clone(),
        source: err,
      });
    }
    Ok(())
  }

  pub fn clear(&self) {
    self.modules.borrow_mut().clear();
    self.status.borrow_mut().clear();
  }
}

/// An initializer that fills `import.meta` the way most runtimes do: `url`
/// and `main`, plus `filename` and `dirname` for `file:` modules.
pub fn standard_import_meta_initializer() -> HostCallback<ImportMetaCb> {
  HostCallback::import_meta(|wrap, meta| {
    meta.set("url", wrap.name.as_str());
    meta.set("main", wrap.main);
    add_filename_dirname(meta, &wrap.name);
    Ok(())
  })
}

fn add_filename_dirname(meta: &mut ImportMeta, name: &str) {
  let Ok(name_url) = Url::parse(name) else {
    return;
  };

  if name_url.scheme() != "file" {
    return;
  }

  // If something goes wrong acquiring a filepath, skip instead of failing
  // (mostly concerned about file paths on Windows).
  let Ok(file_path) = name_url.to_file_path() else {
    return;
  };

  meta.set("filename", file_path.display().to_string());

  let dir_path = file_path
    .parent()
    .map(|p| p.to_owned())
    .unwrap_or_else(|| PathBuf::from("/"));
  meta.set("dirname", dir_path.display().to_string());
}
