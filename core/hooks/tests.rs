// Copyright 2018-2025 the Deno authors. MIT license.

use super::*;
use crate::error::HookError;
use crate::error::ImportError;
use crate::error::ImportMetaError;
use deno_error::JsErrorBox;
use deno_error::JsErrorClass;
use futures::FutureExt;
use futures::channel::oneshot;
use futures::executor::block_on;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::Value;
use serde_json::json;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

const CTX: ContextId = ContextId::new(1);

fn resolve_to(value: &'static str) -> HostCallback<DynamicImportCb> {
  HostCallback::dynamic_import(move |_| {
    Ok(async move { Ok(json!(value)) }.boxed_local())
  })
}

type Senders = Rc<RefCell<Vec<(String, oneshot::Sender<Value>)>>>;

/// A dynamic import callback whose futures only settle when the test sends
/// a value through the recorded sender.
fn deferred_resolver(senders: Senders) -> HostCallback<DynamicImportCb> {
  HostCallback::dynamic_import(move |request| {
    let (tx, rx) = oneshot::channel();
    senders
      .borrow_mut()
      .push((request.specifier().to_string(), tx));
    Ok(
      rx.map(|r| r.map_err(|_| JsErrorBox::generic("sender dropped")))
        .boxed_local(),
    )
  })
}

#[test]
fn resolver_result_is_passed_through() {
  let hooks = HostHooks::default();
  hooks.set_dynamic_import_callback(CTX, resolve_to("ns:a")).unwrap();

  let import = hooks.import_module_dynamically(
    CTX,
    &Referrer::new("file:///x.js"),
    "./a.js",
  );
  assert_eq!(import.request().specifier(), "./a.js");
  assert_eq!(import.request().referrer(), "file:///x.js");
  assert!(!import.request().has_assertions());
  assert_eq!(block_on(import).unwrap(), json!("ns:a"));
}

#[test]
fn no_resolver_rejects_immediately() {
  let hooks = HostHooks::default();
  let mut import = hooks.import_module_dynamically(
    CTX,
    &Referrer::new("file:///x.js"),
    "./a.js",
  );
  assert_eq!(import.state(), ImportState::Rejected);
  let result = (&mut import).now_or_never().expect("settled immediately");
  assert!(matches!(
    result,
    Err(ImportError::NoResolverRegistered { ref specifier, ref referrer })
      if specifier == "./a.js" && referrer == "file:///x.js"
  ));
  // Lookups never create a binding.
  assert_eq!(hooks.context_count(), 0);

  // A binding with only an import.meta callback has no resolver either.
  hooks
    .set_import_meta_callback(CTX, HostCallback::import_meta(|_, _| Ok(())))
    .unwrap();
  let import =
    hooks.import_module_dynamically(CTX, &Referrer::new("file:///x.js"), "./b.js");
  assert!(matches!(
    import.now_or_never(),
    Some(Err(ImportError::NoResolverRegistered { .. }))
  ));
}

#[test]
fn resolver_throwing_synchronously() {
  let hooks = HostHooks::default();
  hooks
    .set_dynamic_import_callback(
      CTX,
      HostCallback::dynamic_import(|_| {
        Err(JsErrorBox::type_error("resolver is broken"))
      }),
    )
    .unwrap();
  let import =
    hooks.import_module_dynamically(CTX, &Referrer::new("file:///x.js"), "./a.js");
  assert_eq!(import.state(), ImportState::Rejected);
  let err = import.now_or_never().unwrap().unwrap_err();
  let ImportError::ResolverInvocation { specifier, source } = &err else {
    panic!("unexpected error: {err:?}");
  };
  assert_eq!(specifier, "./a.js");
  assert_eq!(source.get_class(), "TypeError");
  assert_eq!(err.get_class(), "Error");
  assert_eq!(hooks.binding(CTX).unwrap().pending_import_count(), 0);
}

#[test]
fn resolver_future_rejecting() {
  let hooks = HostHooks::default();
  hooks
    .set_dynamic_import_callback(
      CTX,
      HostCallback::dynamic_import(|request| {
        let specifier = request.specifier().to_string();
        Ok(
          async move {
            Err(JsErrorBox::new(
              "SyntaxError",
              format!("Unexpected token in {specifier}"),
            ))
          }
          .boxed_local(),
        )
      }),
    )
    .unwrap();
  let err = block_on(hooks.import_module_dynamically(
    CTX,
    &Referrer::new("file:///x.js"),
    "./bad.js",
  ))
  .unwrap_err();
  let ImportError::Rejected(inner) = &err else {
    panic!("unexpected error: {err:?}");
  };
  assert_eq!(inner.get_message(), "Unexpected token in ./bad.js");
  assert_eq!(err.get_class(), "SyntaxError");
  assert_eq!(
    err.into_js_error_box().get_message(),
    "Unexpected token in ./bad.js"
  );
}

#[test]
fn referrer_options_mean_assertions() {
  let hooks = HostHooks::default();
  let seen = Rc::new(RefCell::new(vec![]));
  {
    let seen = seen.clone();
    hooks
      .set_dynamic_import_callback(
        CTX,
        HostCallback::dynamic_import(move |request| {
          seen.borrow_mut().push(request.clone());
          Ok(async { Ok(Value::Null) }.boxed_local())
        }),
      )
      .unwrap();
  }
  let referrer =
    Referrer::new("file:///x.js").with_options(vec![json!({ "type": "json" })]);
  block_on(hooks.import_module_dynamically(CTX, &referrer, "./data.json"))
    .unwrap();
  assert_eq!(
    *seen.borrow(),
    vec![ImportRequest::new("./data.json", "file:///x.js", true)]
  );
}

#[test]
fn invalid_callback_is_rejected_at_registration() {
  let hooks = HostHooks::default();
  let err = hooks
    .set_dynamic_import_callback(CTX, HostCallback::NotCallable(json!(42)))
    .unwrap_err();
  assert!(matches!(
    err,
    HookError::InvalidCallback { received: "number", .. }
  ));
  assert_eq!(err.get_class(), "TypeError");
  assert_eq!(hooks.context_count(), 0);

  let err = hooks
    .set_import_meta_callback(CTX, HostCallback::NotCallable(Value::Null))
    .unwrap_err();
  assert_eq!(
    err.to_string(),
    "import.meta callback must be a function, received null"
  );

  // A bad argument doesn't clear a good registration.
  hooks.set_dynamic_import_callback(CTX, resolve_to("ok")).unwrap();
  let binding = hooks.binding(CTX).unwrap();
  assert!(
    binding
      .set_dynamic_import_callback(HostCallback::NotCallable(json!("f")))
      .is_err()
  );
  assert!(binding.has_dynamic_import_callback());
}

#[test]
fn reregistering_does_not_affect_pending_imports() {
  let hooks = HostHooks::default();
  let senders = Senders::default();
  hooks
    .set_dynamic_import_callback(CTX, deferred_resolver(senders.clone()))
    .unwrap();
  let referrer = Referrer::new("file:///x.js");
  let mut first = hooks.import_module_dynamically(CTX, &referrer, "./a.js");
  assert!((&mut first).now_or_never().is_none());

  hooks.set_dynamic_import_callback(CTX, resolve_to("second")).unwrap();
  let second = hooks.import_module_dynamically(CTX, &referrer, "./b.js");
  assert_eq!(block_on(second).unwrap(), json!("second"));

  assert_eq!(first.state(), ImportState::Pending);
  let (_, tx) = senders.borrow_mut().pop().unwrap();
  tx.send(json!("first")).unwrap();
  assert_eq!(block_on(first).unwrap(), json!("first"));
  assert_eq!(hooks.binding(CTX).unwrap().pending_import_count(), 0);
}

#[test]
fn imports_settle_in_any_order() {
  let hooks = HostHooks::default();
  let senders = Senders::default();
  hooks
    .set_dynamic_import_callback(CTX, deferred_resolver(senders.clone()))
    .unwrap();
  let referrer = Referrer::new("file:///main.js");
  let mut imports = (0..8)
    .map(|i| {
      hooks.import_module_dynamically(CTX, &referrer, &format!("./m{i}.js"))
    })
    .collect::<Vec<_>>();
  assert_eq!(hooks.binding(CTX).unwrap().pending_import_count(), 8);

  let mut pending = std::mem::take(&mut *senders.borrow_mut());
  fastrand::shuffle(&mut pending);
  for (specifier, tx) in pending {
    tx.send(json!(format!("ns:{specifier}"))).unwrap();
  }

  for (i, import) in imports.iter_mut().enumerate() {
    let result = (&mut *import).now_or_never().expect("should be ready");
    assert_eq!(result.unwrap(), json!(format!("ns:./m{i}.js")));
    assert_eq!(import.state(), ImportState::Resolved);
  }
  assert_eq!(hooks.binding(CTX).unwrap().pending_import_count(), 0);
}

#[test]
fn import_meta_initializer_decorates_meta() {
  let hooks = HostHooks::default();
  let calls = Rc::new(Cell::new(0));
  {
    let calls = calls.clone();
    hooks
      .set_import_meta_callback(
        CTX,
        HostCallback::import_meta(move |module, meta| {
          calls.set(calls.get() + 1);
          let referrer = module.referrer.as_deref().unwrap_or_default();
          meta.set("url", format!("{referrer}#{}", module.identity));
          Ok(())
        }),
      )
      .unwrap();
  }
  let binding = hooks.binding(CTX).unwrap();
  assert!(binding.register_module(
    ModuleWrap::new("m1", "file:///m1.js").with_referrer("file:///x.js")
  ));

  let mut meta = ImportMeta::new();
  hooks
    .initialize_import_meta_object(CTX, &"m1".into(), &mut meta)
    .unwrap();
  assert_eq!(meta.get_str("url"), Some("file:///x.js#m1"));
  assert_eq!(calls.get(), 1);
  assert!(binding.is_meta_initialized(&"m1".into()));
}

#[test]
fn import_meta_initialized_once_per_module() {
  let hooks = HostHooks::default();
  let calls = Rc::new(RefCell::new(vec![]));
  {
    let calls = calls.clone();
    hooks
      .set_import_meta_callback(
        CTX,
        HostCallback::import_meta(move |module, _| {
          calls.borrow_mut().push(module.identity.clone());
          Ok(())
        }),
      )
      .unwrap();
  }
  let binding = hooks.binding(CTX).unwrap();
  binding.register_module(
    ModuleWrap::new("file:///dep.js", "file:///dep.js")
      .with_referrer("file:///a.js"),
  );
  binding.register_module(ModuleWrap::new("file:///other.js", "file:///other.js"));
  // The same module requested again from another referrer keeps its first
  // wrapper.
  assert!(!binding.register_module(
    ModuleWrap::new("file:///dep.js", "file:///dep.js")
      .with_referrer("file:///b.js"),
  ));

  for _ in 0..3 {
    binding
      .initialize_import_meta_object(&"file:///dep.js".into(), &mut ImportMeta::new())
      .unwrap();
  }
  binding
    .initialize_import_meta_object(&"file:///other.js".into(), &mut ImportMeta::new())
    .unwrap();
  assert_eq!(
    *calls.borrow(),
    vec![
      ModuleIdentity::from("file:///dep.js"),
      ModuleIdentity::from("file:///other.js")
    ]
  );
}

#[test]
fn import_meta_without_initializer_is_noop() {
  let hooks = HostHooks::default();
  let mut meta = ImportMeta::new();
  hooks
    .initialize_import_meta_object(CTX, &"m1".into(), &mut meta)
    .unwrap();
  assert!(meta.is_empty());

  let binding = hooks.binding_or_create(CTX);
  binding.register_module(ModuleWrap::new("m1", "file:///m1.js"));
  hooks
    .initialize_import_meta_object(CTX, &"m1".into(), &mut meta)
    .unwrap();
  assert!(meta.is_empty());
}

#[test]
fn import_meta_initializer_failure() {
  let hooks = HostHooks::default();
  hooks
    .set_import_meta_callback(
      CTX,
      HostCallback::import_meta(|_, meta| {
        meta.set("partial", true);
        Err(JsErrorBox::generic("cannot compute url"))
      }),
    )
    .unwrap();
  hooks
    .binding(CTX)
    .unwrap()
    .register_module(ModuleWrap::new("m1", "file:///m1.js"));
  let err = hooks
    .initialize_import_meta_object(CTX, &"m1".into(), &mut ImportMeta::new())
    .unwrap_err();
  assert_eq!(
    err.to_string(),
    "Failed to initialize import.meta for m1: cannot compute url"
  );
  assert!(matches!(
    hooks.initialize_import_meta_object(CTX, &"m2".into(), &mut ImportMeta::new()),
    Err(ImportMetaError::UnknownModule(_))
  ));
}

struct DropFlag(Rc<Cell<bool>>);

impl Drop for DropFlag {
  fn drop(&mut self) {
    self.0.set(true);
  }
}

#[test]
fn destroying_context_rejects_pending_imports() {
  let hooks = HostHooks::default();
  let calls = Rc::new(Cell::new(0));
  let dropped = Rc::new(Cell::new(false));
  {
    let calls = calls.clone();
    let dropped = dropped.clone();
    hooks
      .set_dynamic_import_callback(
        CTX,
        HostCallback::dynamic_import(move |_| {
          calls.set(calls.get() + 1);
          let flag = DropFlag(dropped.clone());
          Ok(
            async move {
              let _flag = flag;
              futures::future::pending::<()>().await;
              Ok(Value::Null)
            }
            .boxed_local(),
          )
        }),
      )
      .unwrap();
  }
  let binding = hooks.binding(CTX).unwrap();
  let referrer = Referrer::new("file:///x.js");
  let mut import = hooks.import_module_dynamically(CTX, &referrer, "./slow.js");
  assert!((&mut import).now_or_never().is_none());
  assert_eq!(binding.pending_import_count(), 1);

  assert_eq!(hooks.destroy_context(CTX), 1);
  assert!(binding.is_torn_down());
  assert!(dropped.get());
  assert_eq!(import.state(), ImportState::Rejected);
  assert_eq!(binding.pending_import_count(), 0);
  assert_eq!(hooks.context_count(), 0);
  // Destroying twice is harmless.
  assert_eq!(hooks.destroy_context(CTX), 0);

  let err = (&mut import).now_or_never().unwrap().unwrap_err();
  assert!(matches!(
    err,
    ImportError::ContextTornDown { ref specifier, context }
      if specifier == "./slow.js" && context == CTX
  ));
  assert_eq!(import.state(), ImportState::Rejected);

  // The old binding refuses to do any more work.
  let late = binding.import_module_dynamically(&referrer, "./late.js");
  assert!(matches!(
    late.now_or_never(),
    Some(Err(ImportError::ContextTornDown { .. }))
  ));
  assert!(matches!(
    binding.set_dynamic_import_callback(resolve_to("x")),
    Err(HookError::ContextTornDown(_))
  ));
  assert!(matches!(
    binding.initialize_import_meta_object(&"m".into(), &mut ImportMeta::new()),
    Err(ImportMetaError::ContextTornDown(_))
  ));
  assert_eq!(calls.get(), 1);
}

#[test]
fn destroyed_context_stays_destroyed() {
  let calls = Rc::new(Cell::new(0));
  let counting: DynamicImportCb = {
    let calls = calls.clone();
    Rc::new(move |_: &ImportRequest| -> Result<ResolverFuture, JsErrorBox> {
      calls.set(calls.get() + 1);
      Ok(async { Ok(json!("ns")) }.boxed_local())
    })
  };
  let hooks = HostHooks::new(HostHooksOptions {
    dynamic_import_cb: Some(counting),
    import_meta_cb: None,
  });
  let referrer = Referrer::new("file:///x.js");
  assert!(matches!(
    block_on(hooks.import_module_dynamically(CTX, &referrer, "./a.js")),
    Err(ImportError::NoResolverRegistered { .. })
  ));
  hooks.binding_or_create(CTX);
  assert_eq!(
    block_on(hooks.import_module_dynamically(CTX, &referrer, "./a.js")).unwrap(),
    json!("ns")
  );
  assert_eq!(calls.get(), 1);

  assert_eq!(hooks.destroy_context(CTX), 0);
  assert_eq!(hooks.context_count(), 0);

  // Neither registering nor importing brings the context back.
  assert!(matches!(
    hooks.set_import_meta_callback(CTX, standard_import_meta_initializer()),
    Err(HookError::ContextTornDown(ctx)) if ctx == CTX
  ));
  assert!(matches!(
    hooks.set_dynamic_import_callback(CTX, resolve_to("revived")),
    Err(HookError::ContextTornDown(ctx)) if ctx == CTX
  ));
  assert!(hooks.binding_or_create(CTX).is_torn_down());
  assert!(!hooks.binding(CTX).unwrap().has_dynamic_import_callback());
  assert!(matches!(
    block_on(hooks.import_module_dynamically(CTX, &referrer, "./b.js")),
    Err(ImportError::ContextTornDown { ref specifier, context })
      if specifier == "./b.js" && context == CTX
  ));
  assert!(matches!(
    hooks.initialize_import_meta_object(CTX, &"m".into(), &mut ImportMeta::new()),
    Err(ImportMetaError::ContextTornDown(ctx)) if ctx == CTX
  ));
  assert_eq!(calls.get(), 1);
  assert_eq!(hooks.context_count(), 0);
}

#[test]
fn destroying_unknown_context_forbids_registration() {
  let hooks = HostHooks::default();
  assert_eq!(hooks.destroy_context(CTX), 0);
  assert!(matches!(
    hooks.set_dynamic_import_callback(CTX, resolve_to("x")),
    Err(HookError::ContextTornDown(_))
  ));
  assert!(matches!(
    block_on(hooks.import_module_dynamically(
      CTX,
      &Referrer::new("file:///x.js"),
      "./a.js"
    )),
    Err(ImportError::ContextTornDown { .. })
  ));
}

#[test]
fn destroying_one_context_leaves_others_alone() {
  let hooks = HostHooks::default();
  let a = ContextId::new(1);
  let b = ContextId::new(2);
  let senders = Senders::default();
  hooks
    .set_dynamic_import_callback(a, deferred_resolver(senders.clone()))
    .unwrap();
  hooks
    .set_dynamic_import_callback(b, deferred_resolver(senders.clone()))
    .unwrap();
  let referrer = Referrer::new("file:///x.js");
  let in_a = hooks.import_module_dynamically(a, &referrer, "./a.js");
  let in_b = hooks.import_module_dynamically(b, &referrer, "./b.js");

  assert_eq!(hooks.destroy_context(a), 1);
  for (specifier, tx) in senders.borrow_mut().drain(..) {
    // The receiver in context a is gone along with the resolver future.
    let _ = tx.send(json!(specifier));
  }
  assert!(matches!(
    block_on(in_a),
    Err(ImportError::ContextTornDown { .. })
  ));
  assert_eq!(block_on(in_b).unwrap(), json!("./b.js"));
}

#[test]
fn teardown_from_inside_resolver_future() {
  let hooks = Rc::new(HostHooks::default());
  {
    let weak = Rc::downgrade(&hooks);
    hooks
      .set_dynamic_import_callback(
        CTX,
        HostCallback::dynamic_import(move |_| {
          let weak = weak.clone();
          Ok(
            async move {
              if let Some(hooks) = weak.upgrade() {
                hooks.destroy_context(CTX);
              }
              Ok(json!("too late"))
            }
            .boxed_local(),
          )
        }),
      )
      .unwrap();
  }
  let import =
    hooks.import_module_dynamically(CTX, &Referrer::new("file:///x.js"), "./a.js");
  assert!(matches!(
    block_on(import),
    Err(ImportError::ContextTornDown { .. })
  ));
}

#[test]
fn dropping_hooks_rejects_everything() {
  let hooks = HostHooks::default();
  let senders = Senders::default();
  let referrer = Referrer::new("file:///x.js");
  let mut imports = vec![];
  for id in 1..=3 {
    let ctx = ContextId::new(id);
    hooks
      .set_dynamic_import_callback(ctx, deferred_resolver(senders.clone()))
      .unwrap();
    imports.push(hooks.import_module_dynamically(ctx, &referrer, "./a.js"));
  }
  drop(hooks);
  for import in imports {
    assert_eq!(import.state(), ImportState::Rejected);
  }
}

#[test]
fn dropped_import_is_forgotten() {
  let hooks = HostHooks::default();
  let senders = Senders::default();
  hooks
    .set_dynamic_import_callback(CTX, deferred_resolver(senders.clone()))
    .unwrap();
  let import =
    hooks.import_module_dynamically(CTX, &Referrer::new("file:///x.js"), "./a.js");
  assert_eq!(hooks.binding(CTX).unwrap().pending_import_count(), 1);
  drop(import);
  assert_eq!(hooks.binding(CTX).unwrap().pending_import_count(), 0);
  assert_eq!(hooks.destroy_context(CTX), 0);
}

#[rstest]
#[case(true, false)]
#[case(false, true)]
#[case(true, true)]
fn options_preregister_callbacks(
  #[case] with_resolver: bool,
  #[case] with_initializer: bool,
) {
  let dynamic_import_cb: Option<DynamicImportCb> = with_resolver.then(|| {
    let HostCallback::Function(cb) = resolve_to("from options") else {
      unreachable!()
    };
    cb
  });
  let import_meta_cb = with_initializer.then(|| {
    let HostCallback::Function(cb) = standard_import_meta_initializer() else {
      unreachable!()
    };
    cb
  });
  let hooks = HostHooks::new(HostHooksOptions {
    dynamic_import_cb,
    import_meta_cb,
  });
  let binding = hooks.binding_or_create(ContextId::new(7));
  assert_eq!(binding.has_dynamic_import_callback(), with_resolver);
  assert_eq!(binding.has_import_meta_callback(), with_initializer);

  let result = block_on(binding.import(ImportRequest::new(
    "./a.js",
    "file:///x.js",
    false,
  )));
  assert_eq!(result.is_ok(), with_resolver);

  binding.register_module(ModuleWrap::new("m", "file:///m.js"));
  let mut meta = ImportMeta::new();
  binding
    .initialize_import_meta_object(&"m".into(), &mut meta)
    .unwrap();
  assert_eq!(meta.get_str("url").is_some(), with_initializer);
}

#[test]
fn clearing_callbacks() {
  let hooks = HostHooks::default();
  hooks.set_dynamic_import_callback(CTX, resolve_to("a")).unwrap();
  let binding = hooks.binding(CTX).unwrap();
  assert!(binding.clear_dynamic_import_callback());
  assert!(!binding.clear_dynamic_import_callback());
  assert!(!binding.clear_import_meta_callback());
  let result = block_on(binding.import(ImportRequest::new(
    "./a.js",
    "file:///x.js",
    false,
  )));
  assert!(matches!(result, Err(ImportError::NoResolverRegistered { .. })));
}
