use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Filesystem locations used by the service.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub project_root: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub index_db_path: PathBuf,
    pub models_dir: PathBuf,
    pub corpus_dir: PathBuf,
    pub secrets_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let project_root = discover_project_root();
        let data_dir = discover_data_dir(&project_root);
        Self::with_roots(project_root, data_dir)
    }

    /// Lays out every path under explicit roots. Directories are created eagerly.
    pub fn with_roots(project_root: PathBuf, data_dir: PathBuf) -> Self {
        let log_dir = data_dir.join("logs");
        let index_db_path = data_dir.join("index.db");
        let models_dir = data_dir.join("models");
        let secrets_path = data_dir.join("secrets.yaml");
        let corpus_dir = env::var("POLICY_ASSISTANT_CORPUS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| project_root.join("policies"));

        for dir in [&data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            project_root,
            data_dir,
            log_dir,
            index_db_path,
            models_dir,
            corpus_dir,
            secrets_path,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_project_root() -> PathBuf {
    if let Ok(root) = env::var("POLICY_ASSISTANT_ROOT") {
        return PathBuf::from(root);
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if manifest_dir.join("config.yml").exists() {
        return manifest_dir;
    }

    env::current_dir().unwrap_or(manifest_dir)
}

fn discover_data_dir(project_root: &Path) -> PathBuf {
    if let Ok(dir) = env::var("POLICY_ASSISTANT_DATA_DIR") {
        return PathBuf::from(dir);
    }

    project_root.join("data")
}
