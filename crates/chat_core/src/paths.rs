use std::path::{Path, PathBuf};

/// Application directory (~/.gptchat)
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".gptchat")
}

/// Path of config.json
pub fn config_json_path() -> PathBuf {
    app_dir().join("config.json")
}

/// Default location of the shared token cache
pub fn token_cache_path() -> PathBuf {
    app_dir().join("gpt-cache.json")
}

/// Create the parent directory of `path` when it has one.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_lives_under_app_dir() {
        assert!(token_cache_path().starts_with(app_dir()));
        assert!(config_json_path().starts_with(app_dir()));
    }

    #[test]
    fn ensure_parent_dir_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b").join("cache.json");

        ensure_parent_dir(&target).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());
    }

    #[test]
    fn ensure_parent_dir_accepts_bare_file_name() {
        ensure_parent_dir(Path::new("gpt-cache.json")).unwrap();
    }
}
