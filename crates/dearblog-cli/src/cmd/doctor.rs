use crate::output::{print_fields, print_json};
use dearblog_core::error::HUGO_INSTALL_GUIDE;
use dearblog_core::paths;
use dearblog_core::toolchain::Hugo;
use std::path::Path;

/// Run the same `hugo version` pre-flight the preview uses and report what
/// was found. On failure the install guide can be opened with `--open-guide`.
pub fn run(root: &Path, hugo: Option<&str>, open_guide: bool, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root, hugo)?;
    let hugo = Hugo::new(config.hugo.binary);
    let site_config = paths::hugo_site_config(root);

    let report = match hugo.preflight() {
        Ok(report) => report,
        Err(e) => {
            if open_guide {
                println!("Opening {HUGO_INSTALL_GUIDE} ...");
                if let Err(err) = open::that(HUGO_INSTALL_GUIDE) {
                    tracing::warn!(error = %err, "failed to open browser");
                }
            }
            return Err(e.into());
        }
    };

    if json {
        let value = serde_json::json!({
            "hugo": report,
            "root": root,
            "site_config": site_config,
        });
        return print_json(&value);
    }

    let version = match &report.version {
        Some(v) => v.to_string(),
        None => format!("unrecognised ({})", report.output),
    };
    print_fields(&[
        ("hugo", report.binary.clone()),
        (
            "path",
            report
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("version", version),
        ("project", root.display().to_string()),
        (
            "site config",
            site_config
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "not found (not a Hugo project?)".to_string()),
        ),
    ]);
    Ok(())
}
