// Copyright 2018-2025 the Deno authors. MIT license.

use crate::hooks::ContextId;
use crate::hooks::ModuleIdentity;
use deno_error::JsErrorBox;
use deno_error::JsErrorClass;

pub use crate::modules::ModuleLoaderError;

/// Errors surfaced to whoever registers a callback with a context.
#[derive(Debug, thiserror::Error, deno_error::JsError)]
pub enum HookError {
  #[class(type)]
  #[error("{name} must be a function, received {received}")]
  InvalidCallback {
    name: &'static str,
    received: &'static str,
  },
  #[class(generic)]
  #[error("Execution context {0} has been torn down")]
  ContextTornDown(ContextId),
}

/// The rejection delivered through a [`crate::DynamicImport`].
///
/// `ResolverInvocation` and `Rejected` are kept apart on purpose: the former
/// means the registered callback failed before producing a future, the latter
/// is the callback's own future settling with an error.
#[derive(Debug, thiserror::Error, deno_error::JsError)]
pub enum ImportError {
  #[class(type)]
  #[error(
    "Cannot import \"{specifier}\" from \"{referrer}\": no dynamic import callback is registered"
  )]
  NoResolverRegistered { specifier: String, referrer: String },
  #[class(generic)]
  #[error("Dynamic import callback failed for \"{specifier}\": {source}")]
  ResolverInvocation {
    specifier: String,
    #[source]
    source: JsErrorBox,
  },
  #[class(inherit)]
  #[error(transparent)]
  Rejected(JsErrorBox),
  #[class(generic)]
  #[error(
    "Dynamic import of \"{specifier}\" was interrupted, execution context {context} has been torn down"
  )]
  ContextTornDown {
    specifier: String,
    context: ContextId,
  },
}

impl ImportError {
  /// Flattens the rejection into a [`JsErrorBox`] keeping class and message,
  /// which is what an engine would turn into an exception object.
  pub fn into_js_error_box(self) -> JsErrorBox {
    match self {
      ImportError::Rejected(err) => err,
      err => JsErrorBox::new(err.get_class(), err.get_message()),
    }
  }
}

#[derive(Debug, thiserror::Error, deno_error::JsError)]
pub enum ImportMetaError {
  #[class(generic)]
  #[error("Module {0} not found")]
  UnknownModule(ModuleIdentity),
  #[class(generic)]
  #[error("Failed to initialize import.meta for {module}: {source}")]
  MetaInitialization {
    module: ModuleIdentity,
    #[source]
    source: JsErrorBox,
  },
  #[class(generic)]
  #[error("Execution context {0} has been torn down")]
  ContextTornDown(ContextId),
}

/// Returns a string representing the type of the given value, the same way
/// `typeof` would for a value coming out of an engine.
pub(crate) fn type_of(value: &serde_json::Value) -> &'static str {
  match value {
    serde_json::Value::Null => "null",
    serde_json::Value::Bool(_) => "boolean",
    serde_json::Value::Number(_) => "number",
    serde_json::Value::String(_) => "string",
    serde_json::Value::Array(_) | serde_json::Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn import_error_classes() {
    let err = ImportError::NoResolverRegistered {
      specifier: "./a.js".to_string(),
      referrer: "file:///x.js".to_string(),
    };
    assert_eq!(err.get_class(), "TypeError");
    assert_eq!(
      err.get_message(),
      "Cannot import \"./a.js\" from \"file:///x.js\": no dynamic import callback is registered"
    );

    let err = ImportError::Rejected(JsErrorBox::new("RangeError", "boom"));
    assert_eq!(err.get_class(), "RangeError");
    assert_eq!(err.get_message(), "boom");

    let boxed = ImportError::ContextTornDown {
      specifier: "./a.js".to_string(),
      context: ContextId::new(3),
    }
    .into_js_error_box();
    assert_eq!(boxed.get_class(), "Error");
    assert!(boxed.get_message().contains("context 3"));
  }

  #[test]
  fn invalid_callback_message() {
    let err = HookError::InvalidCallback {
      name: "dynamic import callback",
      received: type_of(&json!({ "a": 1 })),
    };
    assert_eq!(err.get_class(), "TypeError");
    assert_eq!(
      err.to_string(),
      "dynamic import callback must be a function, received object"
    );
  }
}
