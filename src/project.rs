use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// One registered project: an ordered set of absolute path prefixes that
/// resolve to it (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub paths: Vec<PathBuf>,
    pub description: Option<String>,
    pub created_at: i64,
}

/// Registry persisted at `project-registry.json` under the configured root.
///
/// Insertion order is preserved (`BTreeMap` is keyed by name, but `detect`
/// walks `order` so "first match wins" matches the registry's actual
/// insertion order rather than lexicographic name order).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    order: Vec<String>,
    #[serde(default)]
    projects: BTreeMap<String, ProjectRecord>,
}

pub struct ProjectResolver {
    path: PathBuf,
    registry: RegistryFile,
}

impl ProjectResolver {
    /// Loads the registry from `root/project-registry.json`, creating an
    /// empty one in memory if the file does not exist yet.
    pub fn open(root: &Path) -> EngineResult<Self> {
        let path = root.join("project-registry.json");
        let registry = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            RegistryFile::default()
        };
        Ok(Self { path, registry })
    }

    fn persist(&self) -> EngineResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.registry)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// First project whose any path is a prefix of the canonicalized `cwd`,
    /// in registry insertion order.
    pub fn detect(&self, cwd: &Path) -> Option<String> {
        let canon = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
        for name in &self.registry.order {
            let Some(record) = self.registry.projects.get(name) else {
                continue;
            };
            if record.paths.iter().any(|p| canon.starts_with(p)) {
                return Some(name.clone());
            }
        }
        None
    }

    pub fn create(
        &mut self,
        name: &str,
        path: Option<PathBuf>,
        description: Option<String>,
        now: i64,
    ) -> EngineResult<()> {
        if self.registry.projects.contains_key(name) {
            return Err(EngineError::AlreadyExists(format!(
                "project '{name}' already exists"
            )));
        }
        let paths = match path {
            Some(p) => vec![canonicalize_best_effort(&p)],
            None => Vec::new(),
        };
        self.registry.projects.insert(
            name.to_string(),
            ProjectRecord {
                paths,
                description,
                created_at: now,
            },
        );
        self.registry.order.push(name.to_string());
        self.persist()
    }

    pub fn add_path(&mut self, name: &str, path: PathBuf) -> EngineResult<()> {
        let record = self
            .registry
            .projects
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("project '{name}' not found")))?;
        let canon = canonicalize_best_effort(&path);
        if record.paths.contains(&canon) {
            return Err(EngineError::InvalidPath(format!(
                "path '{}' is already registered under '{name}'",
                canon.display()
            )));
        }
        record.paths.push(canon);
        self.persist()
    }

    pub fn delete(&mut self, name: &str) -> EngineResult<()> {
        if self.registry.projects.remove(name).is_none() {
            return Err(EngineError::NotFound(format!("project '{name}' not found")));
        }
        self.registry.order.retain(|n| n != name);
        self.persist()
    }

    pub fn get(&self, name: &str) -> EngineResult<ProjectRecord> {
        self.registry
            .projects
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("project '{name}' not found")))
    }

    pub fn update_description(&mut self, name: &str, description: Option<String>) -> EngineResult<()> {
        let record = self
            .registry
            .projects
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("project '{name}' not found")))?;
        record.description = description;
        self.persist()
    }

    pub fn list(&self) -> Vec<(String, ProjectRecord)> {
        self.registry
            .order
            .iter()
            .filter_map(|name| {
                self.registry
                    .projects
                    .get(name)
                    .map(|r| (name.clone(), r.clone()))
            })
            .collect()
    }
}

fn canonicalize_best_effort(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_prefers_first_registered_match() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = ProjectResolver::open(dir.path()).unwrap();

        let a = dir.path().join("a");
        let b = dir.path().join("a").join("b");
        std::fs::create_dir_all(&b).unwrap();

        resolver.create("outer", Some(a.clone()), None, 1000).unwrap();
        resolver.create("inner", Some(b.clone()), None, 1001).unwrap();

        assert_eq!(resolver.detect(&b).as_deref(), Some("outer"));
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = ProjectResolver::open(dir.path()).unwrap();
        resolver.create("web", None, None, 1000).unwrap();
        let err = resolver.create("web", None, None, 1000).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }

    #[test]
    fn add_path_rejects_duplicate_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = ProjectResolver::open(dir.path()).unwrap();
        let p = dir.path().join("proj");
        std::fs::create_dir_all(&p).unwrap();
        resolver.create("web", Some(p.clone()), None, 1000).unwrap();
        let err = resolver.add_path("web", p).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPath(_)));
    }

    #[test]
    fn delete_does_not_error_on_missing_path_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = ProjectResolver::open(dir.path()).unwrap();
        resolver.create("web", None, None, 1000).unwrap();
        resolver.delete("web").unwrap();
        assert!(resolver.get("web").is_err());
    }

    #[test]
    fn registry_round_trips_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut resolver = ProjectResolver::open(dir.path()).unwrap();
            resolver
                .create("web", None, Some("frontend".into()), 1000)
                .unwrap();
        }
        let resolver = ProjectResolver::open(dir.path()).unwrap();
        let record = resolver.get("web").unwrap();
        assert_eq!(record.description.as_deref(), Some("frontend"));
    }
}
