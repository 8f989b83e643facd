//! `~/.quill/config.toml` loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use quill_lsp::LspConfig;

#[derive(Debug, Default, Deserialize)]
pub struct QuillConfig {
    #[serde(default)]
    pub lsp: LspConfig,
}

/// `${VAR}` references are replaced by the variable's value (empty if unset).
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl QuillConfig {
    #[must_use]
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".quill").join("config.toml"))
    }

    /// Load the user config. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.lsp.map_commands(expand_env_vars);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("rust-analyzer"), "rust-analyzer");
    }

    #[test]
    fn expand_env_vars_known_and_unknown() {
        let home = env::var("HOME").unwrap_or_default();
        assert_eq!(expand_env_vars("${HOME}/bin/ls"), format!("{home}/bin/ls"));
        assert_eq!(expand_env_vars("a${QUILL_SURELY_UNSET_VAR}b"), "ab");
        assert_eq!(expand_env_vars("${}x"), "x");
    }

    #[test]
    fn expand_env_vars_unterminated() {
        assert_eq!(expand_env_vars("cmd ${HOME"), "cmd ${HOME");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = QuillConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(!config.lsp.enabled());
        assert!(config.lsp.servers().is_empty());
    }

    #[test]
    fn loads_lsp_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[lsp]
enabled = true
max_restarts = 5

[lsp.servers.rust]
command = "rust-analyzer"
language_id = "rust"
file_extensions = ["rs"]
root_markers = ["Cargo.toml"]

[lsp.servers.rust.initialization_options]
checkOnSave = false
"#,
        )
        .unwrap();

        let config = QuillConfig::load_from(&path).unwrap();
        assert!(config.lsp.enabled());
        assert_eq!(config.lsp.max_restarts(), 5);
        let rust = &config.lsp.servers()["rust"];
        assert_eq!(rust.command(), "rust-analyzer");
        assert_eq!(rust.file_extensions(), ["rs"]);
        assert_eq!(
            rust.initialization_options().unwrap()["checkOnSave"],
            serde_json::json!(false)
        );
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[lsp\nenabled = ").unwrap();
        let err = QuillConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
