// SPDX-License-Identifier: MIT OR Apache-2.0
//! Import resolution: which packages a snippet needs that its environment
//! does not already provide.

use std::collections::{BTreeMap, BTreeSet};

use cillow_protocol::Environment;
use once_cell::sync::Lazy;

/// Modules whose distribution package carries a different name.
static MODULE_TO_PACKAGE: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("bs4", "beautifulsoup4"),
        ("cv2", "opencv-python"),
        ("dotenv", "python-dotenv"),
        ("PIL", "pillow"),
        ("psycopg2", "psycopg2-binary"),
        ("sklearn", "scikit-learn"),
        ("tk", "tkinter"),
        ("wx", "wxPython"),
        ("yaml", "pyyaml"),
        ("zmq", "pyzmq"),
    ])
});

/// Standard-library top-level modules that never need installation.
static STDLIB_MODULES: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    BTreeSet::from([
        "abc", "argparse", "array", "ast", "asyncio", "base64", "binascii", "bisect", "builtins",
        "calendar", "cmath", "codecs", "collections", "concurrent", "configparser", "contextlib",
        "copy", "csv", "ctypes", "dataclasses", "datetime", "decimal", "difflib", "email", "enum",
        "errno", "fnmatch", "fractions", "functools", "gc", "getpass", "glob", "gzip", "hashlib",
        "heapq", "hmac", "html", "http", "importlib", "inspect", "io", "itertools", "json",
        "logging", "math", "mimetypes", "multiprocessing", "operator", "os", "pathlib", "pickle",
        "platform", "pprint", "queue", "random", "re", "secrets", "select", "shlex", "shutil",
        "signal", "site", "socket", "sqlite3", "ssl", "statistics", "string", "struct",
        "subprocess", "sys", "tarfile", "tempfile", "textwrap", "threading", "time", "traceback",
        "types", "typing", "unicodedata", "unittest", "urllib", "uuid", "venv", "warnings",
        "weakref", "xml", "zipfile", "zlib",
    ])
});

/// Maps a snippet to the packages that must be installed before it runs.
///
/// The worker consults this once per `Code` request unless auto-install is
/// disabled. Implementations must not touch the network; installation is
/// the interpreter's job.
pub trait ImportResolver: Send + Sync {
    /// Packages imported by `code` but unavailable in `environment`.
    fn missing_packages(&self, code: &str, environment: &Environment) -> Vec<String>;
}

/// Line-scanning resolver: extracts top-level `import`/`from` targets,
/// drops standard-library names, and checks the environment's
/// `site-packages` directory for the rest.
///
/// System environments are assumed complete; managed environments get the
/// directory scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanResolver;

impl ScanResolver {
    /// Top-level module names the snippet imports.
    #[must_use]
    pub fn analyse(&self, code: &str) -> BTreeSet<String> {
        let mut modules = BTreeSet::new();
        for line in code.lines() {
            let line = line.trim_start();
            if let Some(rest) = line.strip_prefix("import ") {
                // `import a.b as c, d` introduces `a` and `d`.
                for part in rest.split(',') {
                    let name = part.split_whitespace().next().unwrap_or("");
                    if let Some(top) = top_level(name) {
                        modules.insert(top);
                    }
                }
            } else if let Some(rest) = line.strip_prefix("from ") {
                let name = rest.split_whitespace().next().unwrap_or("");
                // Relative imports never name an installable module.
                if !name.starts_with('.')
                    && let Some(top) = top_level(name)
                {
                    modules.insert(top);
                }
            }
        }
        modules
    }

    /// Top-level names importable from the environment's `site-packages`.
    #[must_use]
    pub fn installed(&self, environment: &Environment) -> BTreeSet<String> {
        let mut modules = BTreeSet::new();
        let Some(root) = environment.path() else {
            return modules;
        };
        let site = root.join("lib").join("site-packages");
        let Ok(entries) = std::fs::read_dir(site) else {
            return modules;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('_') || name.ends_with(".dist-info") {
                continue;
            }
            if let Some(stem) = name.strip_suffix(".py") {
                modules.insert(stem.to_string());
            } else if entry.path().is_dir() {
                modules.insert(name.to_string());
            }
        }
        modules
    }
}

impl ImportResolver for ScanResolver {
    fn missing_packages(&self, code: &str, environment: &Environment) -> Vec<String> {
        if environment.is_system() {
            return Vec::new();
        }
        let installed = self.installed(environment);
        self.analyse(code)
            .into_iter()
            .filter(|m| !STDLIB_MODULES.contains(m.as_str()))
            .filter(|m| !installed.contains(m))
            .map(|m| {
                MODULE_TO_PACKAGE
                    .get(m.as_str())
                    .map_or(m, |pkg| (*pkg).to_string())
            })
            .collect()
    }
}

fn top_level(name: &str) -> Option<String> {
    let top = name.split('.').next()?.trim();
    if top.is_empty() {
        return None;
    }
    Some(top.to_string())
}
