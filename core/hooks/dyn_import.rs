// Copyright 2018-2025 the Deno authors. MIT license.

use super::ContextId;
use super::DynamicImportCb;
use super::ImportRequest;
use super::ModuleNamespace;
use super::ResolverFuture;
use crate::error::ImportError;
use futures::FutureExt;
use log::debug;
use log::trace;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::rc::Weak;
use std::task::Context;
use std::task::Poll;
use std::task::Waker;

pub type ImportId = u64;

/// Observable state of a [`DynamicImport`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImportState {
  Pending,
  Resolved,
  Rejected,
}

enum SlotState {
  Pending,
  /// Settled but not yet observed by whoever awaits the import.
  Settled(Result<ModuleNamespace, ImportError>),
  /// Settled and handed out.
  Delivered(ImportState),
}

struct ImportSlot {
  state: SlotState,
  future: Option<ResolverFuture>,
  waker: Option<Waker>,
}

impl ImportSlot {
  fn pending(future: ResolverFuture) -> Self {
    Self {
      state: SlotState::Pending,
      future: Some(future),
      waker: None,
    }
  }

  fn settled(result: Result<ModuleNamespace, ImportError>) -> Self {
    Self {
      state: SlotState::Settled(result),
      future: None,
      waker: None,
    }
  }

  /// Moves a pending slot into its terminal state. A slot that already
  /// settled is left untouched and `false` is returned.
  fn settle(&mut self, result: Result<ModuleNamespace, ImportError>) -> bool {
    if !matches!(self.state, SlotState::Pending) {
      return false;
    }
    self.state = SlotState::Settled(result);
    // Whatever the resolver was doing is of no interest anymore.
    self.future = None;
    if let Some(waker) = self.waker.take() {
      waker.wake();
    }
    true
  }

  fn take_settled(&mut self) -> Option<Result<ModuleNamespace, ImportError>> {
    if !matches!(self.state, SlotState::Settled(_)) {
      return None;
    }
    let SlotState::Settled(result) =
      std::mem::replace(&mut self.state, SlotState::Pending)
    else {
      unreachable!()
    };
    self.state = SlotState::Delivered(match &result {
      Ok(_) => ImportState::Resolved,
      Err(_) => ImportState::Rejected,
    });
    Some(result)
  }

  fn import_state(&self) -> ImportState {
    match &self.state {
      SlotState::Pending => ImportState::Pending,
      SlotState::Settled(Ok(_)) => ImportState::Resolved,
      SlotState::Settled(Err(_)) => ImportState::Rejected,
      SlotState::Delivered(state) => *state,
    }
  }
}

/// Tracks the dynamic imports of one execution context that have not
/// settled yet.
pub(crate) struct PendingImports {
  context: ContextId,
  next_id: Cell<ImportId>,
  pending: RefCell<BTreeMap<ImportId, PendingImport>>,
}

struct PendingImport {
  specifier: String,
  slot: Rc<RefCell<ImportSlot>>,
}

impl PendingImports {
  pub fn new(context: ContextId) -> Self {
    Self {
      context,
      next_id: Cell::new(1),
      pending: Default::default(),
    }
  }

  /// Never hands out the id of an import that is still pending.
  fn next_id(&self) -> ImportId {
    let pending = self.pending.borrow();
    let mut id = self.next_id.get();
    while pending.contains_key(&id) {
      id = id.wrapping_add(1);
    }
    self.next_id.set(id.wrapping_add(1));
    id
  }

  pub fn len(&self) -> usize {
    self.pending.borrow().len()
  }

  /// Invokes `cb` for `request` and returns the future the engine should
  /// hand back to the importing code.
  pub fn dispatch(
    self: &Rc<Self>,
    request: ImportRequest,
    cb: Option<DynamicImportCb>,
  ) -> DynamicImport {
    let Some(cb) = cb else {
      debug!(
        "dynamic import of {:?} from {:?} without a registered callback",
        request.specifier(),
        request.referrer()
      );
      let err = ImportError::NoResolverRegistered {
        specifier: request.specifier().to_string(),
        referrer: request.referrer().to_string(),
      };
      return DynamicImport::rejected(request, err);
    };

    // No borrows of the table may be held here, the callback is free to
    // start more imports.
    let future = match cb(&request) {
      Ok(future) => future,
      Err(source) => {
        debug!(
          "dynamic import callback threw for {:?}: {}",
          request.specifier(),
          source
        );
        let err = ImportError::ResolverInvocation {
          specifier: request.specifier().to_string(),
          source,
        };
        return DynamicImport::rejected(request, err);
      }
    };

    let id = self.next_id();
    let slot = Rc::new(RefCell::new(ImportSlot::pending(future)));
    self.pending.borrow_mut().insert(
      id,
      PendingImport {
        specifier: request.specifier().to_string(),
        slot: slot.clone(),
      },
    );
    trace!(
      "dynamic import {id} of {:?} from {:?} is pending in context {}",
      request.specifier(),
      request.referrer(),
      self.context
    );
    DynamicImport {
      id: Some(id),
      request,
      slot,
      imports: Rc::downgrade(self),
    }
  }

  fn remove(&self, id: ImportId) {
    self.pending.borrow_mut().remove(&id);
  }

  /// Rejects every import that is still pending with
  /// [`ImportError::ContextTornDown`]. Returns how many were rejected.
  pub fn reject_all(&self) -> usize {
    let pending = std::mem::take(&mut *self.pending.borrow_mut());
    let mut rejected = 0;
    for (id, PendingImport { specifier, slot }) in pending {
      let mut slot = slot.borrow_mut();
      let err = ImportError::ContextTornDown {
        specifier,
        context: self.context,
      };
      if slot.settle(Err(err)) {
        trace!("dynamic import {id} rejected by teardown");
        rejected += 1;
      }
    }
    rejected
  }
}

/// The result of a dynamic import, as handed to the engine.
///
/// Settles exactly once: with whatever the registered callback's future
/// settles with, or with a rejection produced by the hooks themselves.
#[must_use = "futures do nothing unless polled"]
pub struct DynamicImport {
  id: Option<ImportId>,
  request: ImportRequest,
  slot: Rc<RefCell<ImportSlot>>,
  imports: Weak<PendingImports>,
}

impl DynamicImport {
  pub(crate) fn rejected(request: ImportRequest, err: ImportError) -> Self {
    Self {
      id: None,
      request,
      slot: Rc::new(RefCell::new(ImportSlot::settled(Err(err)))),
      imports: Weak::new(),
    }
  }

  pub fn request(&self) -> &ImportRequest {
    &self.request
  }

  pub fn state(&self) -> ImportState {
    self.slot.borrow().import_state()
  }

  fn finish(
    &mut self,
    result: Result<ModuleNamespace, ImportError>,
  ) -> Result<ModuleNamespace, ImportError> {
    if let (Some(id), Some(imports)) = (self.id.take(), self.imports.upgrade())
    {
      imports.remove(id);
    }
    result
  }
}

impl Future for DynamicImport {
  type Output = Result<ModuleNamespace, ImportError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();

    let settled = this.slot.borrow_mut().take_settled();
    if let Some(result) = settled {
      return Poll::Ready(this.finish(result));
    }

    // The future is taken out of the slot while it's polled, it might end up
    // tearing down its own context.
    let future = this.slot.borrow_mut().future.take();
    let Some(mut future) = future else {
      panic!("DynamicImport polled after completion");
    };

    match future.poll_unpin(cx) {
      Poll::Ready(result) => {
        let mut slot = this.slot.borrow_mut();
        // A teardown during the poll wins, the import was already rejected.
        if slot.settle(result.map_err(ImportError::Rejected)) {
          trace!("dynamic import of {:?} settled", this.request.specifier());
        }
        let result = slot.take_settled().expect("slot must be settled");
        drop(slot);
        Poll::Ready(this.finish(result))
      }
      Poll::Pending => {
        let mut slot = this.slot.borrow_mut();
        match slot.state {
          SlotState::Pending => {
            slot.future = Some(future);
            slot.waker = Some(cx.waker().clone());
            Poll::Pending
          }
          _ => {
            drop(future);
            let result = slot.take_settled().expect("slot must be settled");
            drop(slot);
            Poll::Ready(this.finish(result))
          }
        }
      }
    }
  }
}

impl Drop for DynamicImport {
  fn drop(&mut self) {
    if let (Some(id), Some(imports)) = (self.id.take(), self.imports.upgrade())
    {
      imports.remove(id);
    }
  }
}
