//! Process-wide configuration, read from the environment exactly once.
//!
//! Every knob is a `LJP_*` variable with `"1"` meaning enabled; anything
//! else disables. Search-path overrides (`LUA_PATH`, `TL_PATH`, `LUAU_PATH`)
//! are captured here as well so the whole process sees one consistent view.

use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;

/// Root of the on-disk cache for intermediate artifacts.
pub const CACHE_DIR: &str = "./.luajit_pro";

const PROCESSED_SUFFIX: &str = ".1.proccessed.lua";
const TRANSFORMED_SUFFIX: &str = ".2.transformed.lua";

#[derive(Debug)]
pub struct Config {
    /// `LJP_NO_PID_DIR=1`: share one cache directory instead of per-PID.
    pub no_pid_dir: bool,
    /// `LJP_KEEP_FILE=1`: persist intermediate artifacts on disk.
    pub keep_file: bool,
    /// `LJP_WITH_PID_SUFFIX=1`: append the PID to artifact filenames.
    pub with_pid_suffix: bool,
    /// `LJP_VERBOSE_DO_STRING=1`: echo every compile-time evaluation result.
    pub verbose_do_string: bool,
    /// Cache directory, with the PID segment already applied.
    pub cache_dir: PathBuf,
    pub processed_suffix: String,
    pub transformed_suffix: String,
    pub lua_path: Option<String>,
    pub tl_path: Option<String>,
    pub luau_path: Option<String>,
}

fn env_flag(name: &str) -> bool {
    let enabled = std::env::var(name).map(|v| v == "1").unwrap_or(false);
    if enabled {
        println!("[luajit-pro] {name} is enabled");
    }
    enabled
}

static CONFIG: Lazy<Config> = Lazy::new(|| {
    let no_pid_dir = env_flag("LJP_NO_PID_DIR");
    let keep_file = env_flag("LJP_KEEP_FILE");
    let with_pid_suffix = env_flag("LJP_WITH_PID_SUFFIX");
    let verbose_do_string = env_flag("LJP_VERBOSE_DO_STRING");

    let pid = std::process::id();
    let cache_dir = if no_pid_dir {
        PathBuf::from(CACHE_DIR)
    } else {
        PathBuf::from(CACHE_DIR).join(pid.to_string())
    };

    let (processed_suffix, transformed_suffix) = if with_pid_suffix {
        (
            format!("{PROCESSED_SUFFIX}.{pid}"),
            format!("{TRANSFORMED_SUFFIX}.{pid}"),
        )
    } else {
        (PROCESSED_SUFFIX.to_string(), TRANSFORMED_SUFFIX.to_string())
    };

    Config {
        no_pid_dir,
        keep_file,
        with_pid_suffix,
        verbose_do_string,
        cache_dir,
        processed_suffix,
        transformed_suffix,
        lua_path: std::env::var("LUA_PATH").ok(),
        tl_path: std::env::var("TL_PATH").ok(),
        luau_path: std::env::var("LUAU_PATH").ok(),
    }
});

pub fn config() -> &'static Config {
    &CONFIG
}

static ARTIFACTS: Lazy<Mutex<Vec<PathBuf>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Records an on-disk artifact for removal at shutdown.
pub fn track_artifact(path: PathBuf) {
    ARTIFACTS.lock().expect("artifact registry poisoned").push(path);
}

/// Removes tracked artifacts and the cache directory.
///
/// A no-op under `LJP_KEEP_FILE=1`, where artifacts are the point. Removal
/// failures are ignored: the directory may be shared or already gone.
pub fn remove_artifacts() {
    if config().keep_file {
        return;
    }
    let mut artifacts = ARTIFACTS.lock().expect("artifact registry poisoned");
    for path in artifacts.drain(..) {
        let _ = std::fs::remove_file(path);
    }
    let _ = std::fs::remove_dir(&config().cache_dir);
}
