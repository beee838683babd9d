use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = ".dearblog.yaml";

/// Site configuration files Hugo looks for at the project root, in the order
/// Hugo itself resolves them.
pub const HUGO_CONFIG_FILES: &[&str] = &[
    "hugo.toml",
    "hugo.yaml",
    "hugo.json",
    "config.toml",
    "config.yaml",
    "config.json",
];

pub const HUGO_CONFIG_DIR: &str = "config/_default";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Return the site configuration that marks `root` as a Hugo project, if any.
pub fn hugo_site_config(root: &Path) -> Option<PathBuf> {
    HUGO_CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file())
        .or_else(|| {
            let dir = root.join(HUGO_CONFIG_DIR);
            dir.is_dir().then_some(dir)
        })
}

pub fn is_hugo_project(root: &Path) -> bool {
    hugo_site_config(root).is_some()
}
