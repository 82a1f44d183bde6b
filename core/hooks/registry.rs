// Copyright 2018-2025 the Deno authors. MIT license.

use super::DynamicImportCb;
use super::ImportMetaCb;
use std::cell::RefCell;

/// The two callback slots of one execution context.
///
/// Each slot holds at most one callback; storing a new one replaces the old
/// one. Imports that are already pending keep the future the previous
/// callback returned, so replacing a callback never touches them.
#[derive(Default)]
pub(crate) struct ResolutionRegistry {
  dynamic_import_cb: RefCell<Option<DynamicImportCb>>,
  import_meta_cb: RefCell<Option<ImportMetaCb>>,
}

impl ResolutionRegistry {
  /// Returns `true` if a previous callback got replaced.
  pub fn set_dynamic_import_callback(&self, cb: DynamicImportCb) -> bool {
    self.dynamic_import_cb.borrow_mut().replace(cb).is_some()
  }

  /// Returns `true` if a previous callback got replaced.
  pub fn set_import_meta_callback(&self, cb: ImportMetaCb) -> bool {
    self.import_meta_cb.borrow_mut().replace(cb).is_some()
  }

  pub fn clear_dynamic_import_callback(&self) -> Option<DynamicImportCb> {
    self.dynamic_import_cb.borrow_mut().take()
  }

  pub fn clear_import_meta_callback(&self) -> Option<ImportMetaCb> {
    self.import_meta_cb.borrow_mut().take()
  }

  // The callbacks are cloned out of the slot before being called, so that a
  // callback may register a new callback without hitting a borrow error.
  pub fn dynamic_import_callback(&self) -> Option<DynamicImportCb> {
    self.dynamic_import_cb.borrow().clone()
  }

  pub fn import_meta_callback(&self) -> Option<ImportMetaCb> {
    self.import_meta_cb.borrow().clone()
  }

  pub fn has_dynamic_import_callback(&self) -> bool {
    self.dynamic_import_cb.borrow().is_some()
  }

  pub fn has_import_meta_callback(&self) -> bool {
    self.import_meta_cb.borrow().is_some()
  }

  pub fn clear(&self) {
    self.dynamic_import_cb.borrow_mut().take();
    self.import_meta_cb.borrow_mut().take();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hooks::ImportMeta;
  use crate::hooks::ImportRequest;
  use crate::hooks::ModuleWrap;
  use crate::hooks::ResolverFuture;
  use deno_error::JsErrorBox;
  use futures::FutureExt;
  use serde_json::json;
  use std::rc::Rc;

  fn resolving_to(value: &'static str) -> DynamicImportCb {
    Rc::new(
      move |_: &ImportRequest| -> Result<ResolverFuture, JsErrorBox> {
        Ok(async move { Ok(json!(value)) }.boxed_local())
      },
    )
  }

  #[test]
  fn last_registration_wins() {
    let registry = ResolutionRegistry::default();
    assert!(!registry.has_dynamic_import_callback());
    assert!(!registry.set_dynamic_import_callback(resolving_to("a")));
    let first = registry.dynamic_import_callback().unwrap();
    assert!(registry.set_dynamic_import_callback(resolving_to("b")));
    let second = registry.dynamic_import_callback().unwrap();
    assert!(!Rc::ptr_eq(&first, &second));
    assert!(!registry.has_import_meta_callback());
  }

  #[test]
  fn clear_empties_both_slots() {
    let registry = ResolutionRegistry::default();
    registry.set_dynamic_import_callback(resolving_to("a"));
    registry.set_import_meta_callback(Rc::new(
      |_: &ModuleWrap, _: &mut ImportMeta| -> Result<(), JsErrorBox> { Ok(()) },
    ));
    registry.clear();
    assert!(registry.dynamic_import_callback().is_none());
    assert!(registry.import_meta_callback().is_none());
  }
}
