use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCSPAN_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docspan/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("DOCSPAN_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docspan")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// Path of the database holding corpus `name`, creating `corpora/`.
    pub fn corpus_db(&self, name: &str) -> Result<PathBuf> {
        validate_corpus_name(name)?;
        let dir = self.root.join("corpora");
        std::fs::create_dir_all(&dir)
            .map_err(|_| Error::DataDir(dir.clone()))?;
        Ok(dir.join(format!("{name}.redb")))
    }

    /// Names of all corpora saved under this directory, sorted.
    pub fn list_corpora(&self) -> Result<Vec<String>> {
        let dir = self.root.join("corpora");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "redb") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Corpus names become file names: ASCII letters, digits, `-` and `_` only.
pub fn validate_corpus_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "invalid corpus name '{name}' (use letters, digits, '-' or '_')"
        )))
    }
}
