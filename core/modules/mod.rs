// Copyright 2018-2025 the Deno authors. MIT license.

//! A module loading policy that can be plugged into a [`crate::ContextBinding`]
//! as its dynamic import callback.

use deno_error::JsErrorBox;
use futures::future::LocalBoxFuture;
use std::borrow::Cow;
use std::fmt;
use url::ParseError;
use url::Url;

mod loaders;
mod map;


#[cfg(test)]
pub use loaders::ModuleLoadEventCounts;
#[cfg(test)]
pub use loaders::TestingModuleLoader;

pub use loaders::FsModuleLoader;
pub use loaders::ModuleLoader;
pub use loaders::NoopModuleLoader;
pub use loaders::StaticModuleLoader;
pub use map::CustomModuleEvaluationCb;
pub use map::ModuleMap;
pub use map::ModuleMapOptions;
pub use map::ModuleStatus;
pub use map::RequestedModuleType;

pub type ModuleId = usize;
pub type ModuleSpecifier = Url;
pub type ModuleLoaderError = JsErrorBox;
pub type ModuleSourceFuture =
  LocalBoxFuture<'static, Result<ModuleSource, ModuleLoaderError>>;

/// Error indicating the reason resolving a module specifier failed.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error, deno_error::JsError)]
#[class(type)]
pub enum ModuleResolutionError {
  #[error("invalid URL: {0}")]
  InvalidUrl(ParseError),
  #[error("invalid base URL for relative import: {0}")]
  InvalidBaseUrl(ParseError),
  #[error("Relative import path \"{specifier}\" not prefixed with / or ./ or ../{}", referrer_suffix(.maybe_referrer))]
  ImportPrefixMissing {
    specifier: String,
    maybe_referrer: Option<String>,
  },
}

fn referrer_suffix(maybe_referrer: &Option<String>) -> String {
  match maybe_referrer {
    Some(referrer) => format!(" from \"{referrer}\""),
    None => String::new(),
  }
}

/// Resolves module using this algorithm:
/// <https://html.spec.whatwg.org/multipage/webappapis.html#resolve-a-module-specifier>
pub fn resolve_import(
  specifier: &str,
  base: &str,
) -> Result<ModuleSpecifier, ModuleResolutionError> {
  match Url::parse(specifier) {
    // 1. Apply the URL parser to specifier.
    //    If the result is not failure, return the result.
    Ok(url) => Ok(url),

    // 2. If specifier does not start with the character U+002F SOLIDUS (/),
    //    the two-character sequence U+002E FULL STOP, U+002F SOLIDUS (./),
    //    or the three-character sequence U+002E FULL STOP, U+002E FULL STOP,
    //    U+002F SOLIDUS (../), return failure.
    Err(ParseError::RelativeUrlWithoutBase)
      if !(specifier.starts_with('/')
        || specifier.starts_with("./")
        || specifier.starts_with("../")) =>
    {
      let maybe_referrer = if base.is_empty() {
        None
      } else {
        Some(base.to_string())
      };
      Err(ModuleResolutionError::ImportPrefixMissing {
        specifier: specifier.to_string(),
        maybe_referrer,
      })
    }

    // 3. Return the result of applying the URL parser to specifier with base
    //    URL as the base URL.
    Err(ParseError::RelativeUrlWithoutBase) => {
      let base = Url::parse(base).map_err(ModuleResolutionError::InvalidBaseUrl)?;
      base.join(specifier).map_err(ModuleResolutionError::InvalidUrl)
    }

    // If parsing the specifier as a URL failed for a different reason than
    // it being relative, always return the original error.
    Err(err) => Err(ModuleResolutionError::InvalidUrl(err)),
  }
}

/// A type of module to be evaluated.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ModuleType {
  JavaScript,
  Json,
  Text,
  Other(Cow<'static, str>),
}

impl fmt::Display for ModuleType {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Self::JavaScript => write!(f, "JavaScript"),
      Self::Json => write!(f, "JSON"),
      Self::Text => write!(f, "text"),
      Self::Other(ty) => write!(f, "{ty}"),
    }
  }
}

#[derive(Debug)]
pub enum ModuleSourceCode {
  String(String),
  Bytes(Vec<u8>),
}

impl ModuleSourceCode {
  pub fn as_bytes(&self) -> &[u8] {
    match self {
      Self::String(s) => s.as_bytes(),
      Self::Bytes(b) => b,
    }
  }

  pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
    match self {
      Self::String(s) => Ok(s),
      Self::Bytes(b) => std::str::from_utf8(b),
    }
  }
}

/// Module source code as returned by a [`ModuleLoader`].
///
/// The URL a module was found at might differ from the one it was requested
/// with (an HTTP redirect for example). Both are kept so the module map can
/// alias the two.
#[derive(Debug)]
pub struct ModuleSource {
  pub code: ModuleSourceCode,
  pub module_type: ModuleType,
  module_url_specified: String,
  /// If the module was found somewhere other than the specified address, this will be [`Some`].
  module_url_found: Option<String>,
}

impl ModuleSource {
  /// Create a [`ModuleSource`] without a redirect.
  pub fn new(
    module_type: ModuleType,
    code: ModuleSourceCode,
    specifier: &ModuleSpecifier,
  ) -> Self {
    Self {
      code,
      module_type,
      module_url_specified: specifier.to_string(),
      module_url_found: None,
    }
  }

  /// Create a [`ModuleSource`] with a potential redirect. If the `specifier_found` parameter is the same as the
  /// specifier, the code behaves the same was as `ModuleSource::new`.
  pub fn new_with_redirect(
    module_type: ModuleType,
    code: ModuleSourceCode,
    specifier: &ModuleSpecifier,
    specifier_found: &ModuleSpecifier,
  ) -> Self {
    let module_url_found = if specifier == specifier_found {
      None
    } else {
      Some(specifier_found.to_string())
    };
    Self {
      code,
      module_type,
      module_url_specified: specifier.to_string(),
      module_url_found,
    }
  }

  pub fn specified_url(&self) -> &str {
    &self.module_url_specified
  }

  /// The URL the module ended up being loaded from.
  pub fn found_url(&self) -> &str {
    self
      .module_url_found
      .as_deref()
      .unwrap_or(&self.module_url_specified)
  }
}

/// Result of calling [`ModuleLoader::load`].
pub enum ModuleLoadResponse {
  /// Source file is available synchronously.
  Sync(Result<ModuleSource, ModuleLoaderError>),

  /// Source file needs to be loaded.
  Async(ModuleSourceFuture),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolutionKind {
  /// The top-level module of a program.
  MainModule,
  /// Static imports.
  Import,
  /// All modules that are loaded as a result of a call to `import()`.
  DynamicImport,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ModuleLoadOptions {
  pub is_dynamic_import: bool,
  /// Whether the import carried import attributes.
  pub has_assertions: bool,
}
