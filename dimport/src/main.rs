// Copyright 2018-2025 the Deno authors. MIT license.

use anyhow::Context;
use anyhow::Error;
use anyhow::anyhow;
use clap::ArgMatches;
use clap::builder::Arg;
use clap::builder::ArgAction;
use clap::builder::Command;
use import_hooks::ContextId;
use import_hooks::FsModuleLoader;
use import_hooks::HostHooks;
use import_hooks::ImportMeta;
use import_hooks::ModuleMap;
use import_hooks::ModuleMapOptions;
use import_hooks::ModuleNamespace;
use import_hooks::ModuleSource;
use import_hooks::ModuleSpecifier;
use import_hooks::ModuleWrap;
use import_hooks::Referrer;
use import_hooks::RequestedModuleType;
use import_hooks::deno_error::JsErrorBox;
use import_hooks::deno_error::JsErrorClass;
use import_hooks::resolve_import;
use import_hooks::standard_import_meta_initializer;
use serde_json::Value;
use serde_json::json;
use std::path::Path;
use std::rc::Rc;

const CONTEXT: ContextId = ContextId::new(0);

fn main() -> Result<(), Error> {
  let matches = build_cli().get_matches();
  let show_meta = matches.get_flag("meta");
  let assert_json = matches.get_flag("json");

  let cwd = std::env::current_dir().context("Unable to get CWD")?;
  let cwd_url = ModuleSpecifier::from_directory_path(&cwd)
    .map_err(|_| anyhow!("Unable to turn {} into a URL", cwd.display()))?;

  let main_module = matches
    .get_one::<String>("main")
    .map(|path| resolve_specifier(path, &cwd_url))
    .transpose()?;
  let mut targets = main_module.iter().cloned().collect::<Vec<_>>();
  for specifier in specifiers(&matches) {
    targets.push(resolve_specifier(specifier, &cwd_url)?);
  }
  if targets.is_empty() {
    return Err(anyhow!("Nothing to import"));
  }

  let hooks = HostHooks::default();
  hooks.set_import_meta_callback(CONTEXT, standard_import_meta_initializer())?;
  let binding = hooks
    .binding(CONTEXT)
    .context("Context binding was not created")?;
  let map = ModuleMap::install(
    &binding,
    Rc::new(FsModuleLoader),
    ModuleMapOptions {
      main_module,
      custom_module_evaluation_cb: Some(Box::new(source_module)),
      ..Default::default()
    },
  )?;

  let attributes = if assert_json {
    vec![json!({ "type": "json" })]
  } else {
    vec![]
  };
  let requested_module_type = RequestedModuleType::from_assertions(assert_json);
  let referrer = Referrer::new(cwd_url.as_str()).with_options(attributes);
  let imports = targets
    .iter()
    .map(|url| hooks.import_module_dynamically(CONTEXT, &referrer, url.as_str()))
    .collect::<Vec<_>>();

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()?;
  let results =
    runtime.block_on(import_hooks::futures::future::join_all(imports));

  let mut failed = 0;
  for (url, result) in targets.iter().zip(results) {
    let report = match result {
      Ok(namespace) => {
        let mut report = json!({
          "specifier": url.as_str(),
          "namespace": namespace,
        });
        if show_meta {
          report["meta"] = map
            .get_import_meta(url, requested_module_type)
            .map(ImportMeta::into_value)
            .unwrap_or(Value::Null);
        }
        report
      }
      Err(err) => {
        failed += 1;
        json!({
          "specifier": url.as_str(),
          "error": {
            "class": err.get_class(),
            "message": err.get_message(),
          },
        })
      }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
  }

  hooks.destroy_context(CONTEXT);
  if failed > 0 {
    return Err(anyhow!("{failed} of {} import(s) failed", targets.len()));
  }
  Ok(())
}

fn build_cli() -> Command {
  Command::new("dimport")
    .about("Dynamically imports modules and prints their namespaces as JSON")
    .arg(
      Arg::new("main")
        .long("main")
        .value_name("FILE")
        .help("Module to mark as the main module, imported along with the others")
        .value_hint(clap::ValueHint::FilePath)
        .value_parser(clap::value_parser!(String)),
    )
    .arg(
      Arg::new("meta")
        .long("meta")
        .action(ArgAction::SetTrue)
        .help("Print import.meta of every imported module"),
    )
    .arg(
      Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Import with a `type: \"json\"` attribute"),
    )
    .arg(
      Arg::new("specifiers")
        .help("Relative or absolute paths, or URLs, to import")
        .value_hint(clap::ValueHint::FilePath)
        .value_parser(clap::value_parser!(String))
        .num_args(0..)
        .action(ArgAction::Append),
    )
}

fn specifiers(matches: &ArgMatches) -> impl Iterator<Item = &String> {
  matches
    .get_many::<String>("specifiers")
    .into_iter()
    .flatten()
}

/// Turns a command line argument into a module URL. Anything that isn't a
/// URL is a path relative to the current directory.
fn resolve_specifier(
  specifier: &str,
  cwd_url: &ModuleSpecifier,
) -> Result<ModuleSpecifier, Error> {
  let path = Path::new(specifier);
  if path.is_absolute() {
    return ModuleSpecifier::from_file_path(path)
      .map_err(|_| anyhow!("Invalid path: {specifier}"));
  }
  if let Ok(url) = ModuleSpecifier::parse(specifier) {
    return Ok(url);
  }
  let relative = if specifier.starts_with("./") || specifier.starts_with("../")
  {
    specifier.to_string()
  } else {
    format!("./{specifier}")
  };
  Ok(resolve_import(&relative, cwd_url.as_str())?)
}

/// No JavaScript is executed, a module's namespace exposes its source.
fn source_module(
  wrap: &ModuleWrap,
  _meta: &ImportMeta,
  source: ModuleSource,
) -> Result<ModuleNamespace, JsErrorBox> {
  let code = source.code.as_str().map_err(|_| {
    JsErrorBox::type_error(format!("{} is not valid UTF-8", wrap.name))
  })?;
  Ok(json!({
    "type": source.module_type.to_string(),
    "source": code,
  }))
}
