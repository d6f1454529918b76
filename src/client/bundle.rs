//! Per-component bundle generation.
//!
//! Output is one shared prelude (a tiny module registry plus every
//! dependency module, each defined once) and one self-executing script per
//! detected component. A bundle defines its own component module
//! idempotently, decodes its props, mounts into its placeholder and flips the
//! readiness marker.

use std::collections::HashSet;
use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;

use super::modules::{load_graph, to_commonjs, LinkedModule, ModuleResolver};
use super::ClientComponentInfo;
use crate::error::ClientBundleError;

/// Attribute set on a placeholder once its component has mounted.
pub const READY_ATTR: &str = "data-docpress-ready";
/// Attribute carrying the mount error message when mounting failed.
pub const ERROR_ATTR: &str = "data-docpress-error";

/// The registry runtime. Defines `window.__docpress` once per page.
const RUNTIME: &str = r#"(function () {
  if (window.__docpress) return;
  var defs = {};
  var cache = {};
  function load(id) {
    if (cache[id]) return cache[id].exports;
    var def = defs[id];
    if (!def) throw new Error("docpress: module not registered: " + id);
    var module = { exports: {} };
    cache[id] = module;
    def.factory(function (spec) {
      return load(Object.prototype.hasOwnProperty.call(def.links, spec) ? def.links[spec] : spec);
    }, module, module.exports);
    return module.exports;
  }
  window.__docpress = {
    define: function (id, links, factory) {
      if (!defs[id]) defs[id] = { links: links, factory: factory };
    },
    require: load,
    decodeProps: function (b64) {
      var bytes = Uint8Array.from(atob(b64), function (c) { return c.charCodeAt(0); });
      return JSON.parse(new TextDecoder().decode(bytes));
    },
    mount: function (containerId, moduleId, b64) {
      var el = document.getElementById(containerId);
      if (!el) return;
      function fail(e) {
        el.setAttribute("data-docpress-ready", "error");
        el.setAttribute("data-docpress-error", String(e && e.message ? e.message : e));
      }
      try {
        var exp = load(moduleId);
        var mount = typeof exp === "function" ? exp : exp && exp.default;
        if (typeof mount !== "function") throw new Error(moduleId + " does not export a mount function");
        var props = window.__docpress.decodeProps(b64);
        Promise.resolve(mount(el, props)).then(function () {
          el.setAttribute("data-docpress-ready", "true");
        }, fail);
      } catch (e) {
        fail(e);
      }
    }
  };
})();
"#;

/// Script for one client component instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientBundle {
    /// Placeholder id the bundle mounts into.
    pub id: String,
    pub source: String,
    pub script: String,
}

/// Everything the orchestrator executes after loading a document.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BundleManifest {
    /// Registry runtime plus shared dependency modules. Runs first.
    pub prelude: String,
    pub bundles: Vec<ClientBundle>,
}

impl BundleManifest {
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Placeholder ids that must report ready.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.bundles.iter().map(|b| b.id.as_str())
    }
}

/// Bundle every detected component. Components that fail to resolve are
/// left out of the manifest and reported alongside it.
pub fn bundle(
    clients: &[ClientComponentInfo],
    resolver: &dyn ModuleResolver,
) -> (BundleManifest, Vec<ClientBundleError>) {
    if clients.is_empty() {
        return (BundleManifest::default(), Vec::new());
    }

    let mut errors = Vec::new();
    let mut resolved: Vec<(&ClientComponentInfo, Vec<LinkedModule>, String)> = Vec::new();
    for client in clients {
        let graph = match load_graph(resolver, &client.source) {
            Ok(graph) => graph,
            Err(unresolved) => {
                log::warn!(
                    "client component {} ({}): {}",
                    client.id,
                    client.source,
                    unresolved.reason
                );
                errors.push(ClientBundleError::Unresolved {
                    id: client.id.clone(),
                    specifier: unresolved.specifier,
                    reason: unresolved.reason,
                });
                continue;
            }
        };
        let props = match serde_json::to_vec(&client.props) {
            Ok(bytes) => STANDARD.encode(bytes),
            Err(e) => {
                errors.push(ClientBundleError::Props {
                    id: client.id.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        resolved.push((client, graph, props));
    }

    // Anything some graph reaches as a dependency is shared, even when it is
    // also another component's entry. Pure entries ride in their own bundles.
    let dependencies: HashSet<&str> = resolved
        .iter()
        .flat_map(|(_, graph, _)| {
            let deps = graph.len().saturating_sub(1);
            graph[..deps].iter().map(|m| m.module.id.as_str())
        })
        .collect();
    let mut prelude = String::from(RUNTIME);
    let mut shared = HashSet::new();
    for (_, graph, _) in &resolved {
        for linked in graph {
            let id = linked.module.id.as_str();
            if !dependencies.contains(id) || !shared.insert(id.to_string()) {
                continue;
            }
            prelude.push_str(&define_module(linked));
        }
    }

    let bundles = resolved
        .iter()
        .filter_map(|(client, graph, props)| {
            let entry = graph.last()?;
            Some(ClientBundle {
                id: client.id.clone(),
                source: client.source.clone(),
                script: bundle_script(&client.id, entry, props),
            })
        })
        .collect::<Vec<_>>();

    log::debug!(
        "bundled {} client component(s), {} shared module(s)",
        bundles.len(),
        shared.len()
    );
    (BundleManifest { prelude, bundles }, errors)
}

fn define_module(linked: &LinkedModule) -> String {
    let id = js_string(&linked.module.id);
    let links = serde_json::to_string(&linked.links).unwrap_or_else(|_| "{}".to_string());
    format!(
        "window.__docpress.define({id}, {links}, function (require, module, exports) {{\n{}\n}});\n",
        to_commonjs(&linked.module.code)
    )
}

fn bundle_script(id: &str, entry: &LinkedModule, props_b64: &str) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "(function () {{");
    script.push_str(&define_module(entry));
    let _ = writeln!(
        script,
        "window.__docpress.mount({}, {}, {});",
        js_string(id),
        js_string(&entry.module.id),
        js_string(props_b64)
    );
    script.push_str("})();\n");
    script
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
