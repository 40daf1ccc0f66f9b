use pipecore::{GraphError, PipelineError, Value};
use std::path::{Path, PathBuf};

/// Raw pipeline definitions: task name -> stage key -> stage body.
pub type RawGraph = serde_json::Map<String, Value>;

/// Source of raw pipeline definitions.
pub trait ConfigParser: Send + Sync {
    fn parse(&self) -> Result<RawGraph, PipelineError>;
}

impl ConfigParser for RawGraph {
    fn parse(&self) -> Result<RawGraph, PipelineError> {
        Ok(self.clone())
    }
}

/// Reads definitions from a file, or from every `.json`/`.yaml`/`.yml`
/// file of a directory. The task name is the file stem; stage order
/// follows the file.
#[derive(Debug, Clone)]
pub struct FileConfigParser {
    path: PathBuf,
}

impl FileConfigParser {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();
        if !path.exists() {
            return Err(GraphError::Invalid(format!(
                "The path must be dir or file: {}",
                path.display()
            ))
            .into());
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_file(path: &Path) -> Result<Value, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        match extension(path) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&text).map_err(|e| {
                GraphError::Invalid(format!("{}: {}", path.display(), e)).into()
            }),
            _ => Ok(serde_json::from_str(&text)?),
        }
    }
}

impl ConfigParser for FileConfigParser {
    fn parse(&self) -> Result<RawGraph, PipelineError> {
        let mut config = RawGraph::new();
        if self.path.is_dir() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(&self.path)? {
                let path = entry?.path();
                if path.is_file() && matches!(extension(&path), Some("json" | "yaml" | "yml")) {
                    files.push(path);
                }
            }
            files.sort();
            for path in files {
                config.insert(task_name(&path)?, Self::parse_file(&path)?);
            }
        } else {
            config.insert(task_name(&self.path)?, Self::parse_file(&self.path)?);
        }
        Ok(config)
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn task_name(path: &Path) -> Result<String, PipelineError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| GraphError::Invalid(format!("bad file name: {}", path.display())).into())
}
