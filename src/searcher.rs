//! Module-name resolution for the injected package searcher.
//!
//! The host glue registers a searcher at position 2 of its loader list; the
//! path walking that searcher performs lives here. A module name is mapped
//! onto every `?`-template of the relevant search path, trying companion
//! suffixes in a fixed order: `.lua`, `.tl`, `.d.tl`, `.luau`. `LUA_PATH`,
//! `TL_PATH` and `LUAU_PATH` override the respective base paths.

use std::path::PathBuf;

use crate::config;

/// Fallback template when no environment override is present. The host's
/// own `package.path` is not visible from here.
pub const DEFAULT_PATH: &str = "./?.lua;?.lua";

/// The search paths one resolution walks.
#[derive(Debug, Clone, Copy)]
pub struct SearchPaths<'a> {
    pub lua: &'a str,
    pub tl: &'a str,
    pub luau: &'a str,
}

impl<'a> SearchPaths<'a> {
    /// Paths from the process environment, falling back to [`DEFAULT_PATH`].
    pub fn from_env() -> Self {
        let cfg = config::config();
        Self {
            lua: cfg.lua_path.as_deref().unwrap_or(DEFAULT_PATH),
            tl: cfg.tl_path.as_deref().unwrap_or(DEFAULT_PATH),
            luau: cfg.luau_path.as_deref().unwrap_or(DEFAULT_PATH),
        }
    }
}

/// Walks one `;`-separated path, substituting `?` with the module-as-path
/// and swapping the `.lua` template extension for `suffix`. Failed
/// candidates are recorded in `tried` in `package.searchers` style.
pub fn search_for(
    module_name: &str,
    suffix: &str,
    path: &str,
    tried: &mut Vec<String>,
) -> Option<PathBuf> {
    let slash_name = module_name.replace('.', "/");
    for entry in path.split(';').filter(|e| !e.is_empty()) {
        let filename = entry.replace('?', &slash_name);
        let candidate = match filename.strip_suffix(".lua") {
            Some(base) => format!("{base}{suffix}"),
            None => filename,
        };
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Some(candidate);
        }
        tried.push(format!("no file '{}'", candidate.display()));
    }
    None
}

/// Resolves a module name against explicit search paths.
///
/// On failure the accumulated "no file" messages come back for the host to
/// surface in its `require` error.
pub fn search_module_in(module_name: &str, paths: SearchPaths) -> Result<PathBuf, Vec<String>> {
    let mut tried = Vec::new();
    for (suffix, path) in [
        (".lua", paths.lua),
        (".tl", paths.tl),
        (".d.tl", paths.tl),
        (".luau", paths.luau),
    ] {
        if let Some(found) = search_for(module_name, suffix, path, &mut tried) {
            return Ok(found);
        }
    }
    Err(tried)
}

/// Resolves a module name against the environment-configured paths.
pub fn search_module(module_name: &str) -> Result<PathBuf, Vec<String>> {
    search_module_in(module_name, SearchPaths::from_env())
}
