//! Client module lookup and dependency discovery.
//!
//! Modules are CommonJS-style scripts. ES `import` / `export default` forms
//! are rewritten to `require` / `module.exports` on load so every module can
//! run inside the registry's factory wrapper.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

static REQUIRE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\brequire\(\s*["']([^"']+)["']\s*\)"#).unwrap());

/// `import x from "y"`, `import {a, b as c} from "y"`, `import * as ns from
/// "y"`, and the bare `import "y"`.
static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s+(?:([^'";]+?)\s+from\s+)?["']([^"']+)["'][ \t]*;?"#).unwrap()
});

static EXPORT_DEFAULT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export\s+default\s+").unwrap());

static EXPORT_FUNCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export\s+((?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*))").unwrap()
});

/// A loaded client module.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceModule {
    /// Canonical id, unique per module (e.g. `charts/bar.js`).
    pub id: String,
    /// Source text as authored.
    pub code: String,
}

impl SourceModule {
    pub fn new(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
        }
    }

    /// Specifiers this module requires or imports, in source order.
    pub fn dependencies(&self) -> Vec<String> {
        let mut found: Vec<(usize, String)> = REQUIRE_RE
            .captures_iter(&self.code)
            .chain(IMPORT_RE.captures_iter(&self.code))
            .filter_map(|caps| {
                let m = caps.get(caps.len() - 1)?;
                Some((m.start(), m.as_str().to_string()))
            })
            .collect();
        found.sort_by_key(|(at, _)| *at);
        let mut seen = HashSet::new();
        found
            .into_iter()
            .map(|(_, spec)| spec)
            .filter(|spec| seen.insert(spec.clone()))
            .collect()
    }
}

/// Source lookup for client component modules.
pub trait ModuleResolver: Send + Sync {
    /// Resolve `specifier` (relative to `importer` when given) to a module.
    fn resolve(&self, specifier: &str, importer: Option<&str>) -> Result<SourceModule, String>;
}

/// Join a specifier onto the importing module's directory. Bare specifiers
/// pass through unchanged.
pub fn resolve_specifier(specifier: &str, importer: Option<&str>) -> String {
    let relative = specifier.starts_with("./") || specifier.starts_with("../");
    let mut parts: Vec<&str> = match (relative, importer) {
        (true, Some(importer)) => {
            let mut dir: Vec<&str> = importer.split('/').collect();
            dir.pop();
            dir
        }
        _ => Vec::new(),
    };
    for seg in specifier.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn candidates(id: &str) -> Vec<String> {
    let mut out = vec![id.to_string()];
    if !id.ends_with(".js") && !id.ends_with(".mjs") && !id.ends_with(".cjs") {
        out.push(format!("{id}.js"));
        out.push(format!("{id}/index.js"));
    }
    out
}

// ---------------------------------------------------------------------------
// Resolvers
// ---------------------------------------------------------------------------

/// Modules held in memory, keyed by canonical id.
#[derive(Debug, Default, Clone)]
pub struct MemoryModuleResolver {
    modules: BTreeMap<String, String>,
}

impl MemoryModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, id: impl Into<String>, code: impl Into<String>) -> Self {
        self.insert(id, code);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, code: impl Into<String>) {
        self.modules.insert(id.into(), code.into());
    }
}

impl ModuleResolver for MemoryModuleResolver {
    fn resolve(&self, specifier: &str, importer: Option<&str>) -> Result<SourceModule, String> {
        let id = resolve_specifier(specifier, importer);
        candidates(&id)
            .into_iter()
            .find_map(|c| self.modules.get(&c).map(|code| SourceModule::new(c, code.clone())))
            .ok_or_else(|| format!("no module registered as {id:?}"))
    }
}

/// Modules read from a directory. Bare specifiers are also looked up under
/// `node_modules/`.
#[derive(Debug, Clone)]
pub struct FsModuleResolver {
    root: PathBuf,
}

impl FsModuleResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ModuleResolver for FsModuleResolver {
    fn resolve(&self, specifier: &str, importer: Option<&str>) -> Result<SourceModule, String> {
        let id = resolve_specifier(specifier, importer);
        if id.starts_with("..") || id.is_empty() {
            return Err(format!("{specifier:?} resolves outside {}", self.root.display()));
        }
        let bare = !(specifier.starts_with("./") || specifier.starts_with("../"));
        let mut tried = candidates(&id);
        if bare {
            tried.extend(candidates(&format!("node_modules/{id}")));
        }
        for candidate in tried {
            let path = self.root.join(&candidate);
            if path.is_file() {
                return std::fs::read_to_string(&path)
                    .map(|code| SourceModule::new(candidate, code))
                    .map_err(|e| format!("cannot read {}: {e}", path.display()));
            }
        }
        Err(format!("{id:?} not found under {}", self.root.display()))
    }
}

// ---------------------------------------------------------------------------
// Graph loading
// ---------------------------------------------------------------------------

/// A module together with the canonical ids of what it requires.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedModule {
    pub module: SourceModule,
    /// Specifier as written → canonical id.
    pub links: BTreeMap<String, String>,
}

/// A specifier in the graph that couldn't be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedModule {
    pub specifier: String,
    pub reason: String,
}

/// Load `entry` and its transitive dependencies. Dependencies come before
/// their dependents; the entry module is last.
pub fn load_graph(
    resolver: &dyn ModuleResolver,
    entry: &str,
) -> Result<Vec<LinkedModule>, UnresolvedModule> {
    let mut order = Vec::new();
    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    visit(resolver, entry, None, &mut visiting, &mut done, &mut order)?;
    Ok(order)
}

fn visit(
    resolver: &dyn ModuleResolver,
    specifier: &str,
    importer: Option<&str>,
    visiting: &mut HashSet<String>,
    done: &mut HashSet<String>,
    order: &mut Vec<LinkedModule>,
) -> Result<String, UnresolvedModule> {
    let module = resolver
        .resolve(specifier, importer)
        .map_err(|reason| UnresolvedModule {
            specifier: specifier.to_string(),
            reason,
        })?;
    let id = module.id.clone();
    // Cycles are fine: the registry hands out partial exports.
    if done.contains(&id) || !visiting.insert(id.clone()) {
        return Ok(id);
    }
    let mut links = BTreeMap::new();
    for dep in module.dependencies() {
        let dep_id = visit(resolver, &dep, Some(&id), visiting, done, order)?;
        links.insert(dep, dep_id);
    }
    visiting.remove(&id);
    done.insert(id.clone());
    order.push(LinkedModule { module, links });
    Ok(id)
}

/// Rewrite ES module syntax into the CommonJS form the registry runs.
pub fn to_commonjs(code: &str) -> String {
    let code = IMPORT_RE.replace_all(code, |caps: &regex::Captures| {
        let spec = serde_json::to_string(&caps[2]).unwrap_or_default();
        match caps.get(1).map(|m| m.as_str().trim()) {
            None => format!("require({spec});"),
            Some(clause) => import_bindings(clause, &spec),
        }
    });
    let code = EXPORT_DEFAULT_RE.replace_all(&code, "${1}module.exports.default = ");
    EXPORT_FUNCTION_RE
        .replace_all(&code, "${1}exports.${3} = ${3}; ${2}")
        .into_owned()
}

fn import_bindings(clause: &str, spec: &str) -> String {
    if let Some(ns) = clause.strip_prefix("* as ") {
        return format!("const {} = require({spec});", ns.trim());
    }
    let (default, named) = match clause.find('{') {
        Some(at) => (
            clause[..at].trim().trim_end_matches(',').trim(),
            Some(clause[at..].trim()),
        ),
        None => (clause, None),
    };
    let mut out = String::new();
    if !default.is_empty() {
        out.push_str(&format!(
            "const {default} = ((m) => (m && m.default !== undefined ? m.default : m))(require({spec}));"
        ));
    }
    if let Some(named) = named {
        let inner = named.trim_start_matches('{').trim_end_matches('}');
        let bindings: Vec<String> = inner
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(|b| match b.split_once(" as ") {
                Some((from, to)) => format!("{}: {}", from.trim(), to.trim()),
                None => b.to_string(),
            })
            .collect();
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&format!("const {{ {} }} = require({spec});", bindings.join(", ")));
    }
    out
}
