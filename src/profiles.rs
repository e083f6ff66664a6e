use crate::error::{ShellError, ValidationError};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROFILE: &str = "default";

/// Structured reply for the profile UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    pub profiles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
}

impl ProfileResponse {
    pub fn success(profiles: Vec<String>, current: Option<String>) -> Self {
        Self {
            ok: true,
            msg: None,
            profiles,
            current,
        }
    }

    /// The unchanged list and selection, with the error's UI message.
    pub fn failure(err: &ShellError, profiles: Vec<String>, current: Option<String>) -> Self {
        Self {
            ok: false,
            msg: Some(err.user_message()),
            profiles,
            current,
        }
    }
}

/// Ordered, deduplicated list of profile names. Sole writer of the identity
/// file; every mutation is persisted before returning.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<String>,
    path: Option<PathBuf>,
}

impl ProfileRegistry {
    pub fn in_memory(names: &[&str]) -> Self {
        Self {
            profiles: normalize(names.iter().map(|name| name.to_string())),
            path: None,
        }
    }

    /// Loads the identity file, creating `["default"]` on first run or when
    /// the file holds no usable names.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut registry = Self {
            profiles: read_profiles(&path),
            path: Some(path),
        };
        if registry.profiles.is_empty() {
            registry.profiles.push(DEFAULT_PROFILE.to_string());
            if let Err(err) = registry.persist() {
                tracing::warn!(error = %format!("{err:#}"), "failed to persist default profile list");
            }
        }
        registry
    }

    pub fn list(&self) -> Vec<String> {
        self.profiles.clone()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.iter().any(|p| p == name)
    }

    pub fn first(&self) -> Option<&str> {
        self.profiles.first().map(String::as_str)
    }

    pub fn create(&mut self, name: &str) -> Result<String, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.contains(name) {
            return Err(ValidationError::AlreadyExists);
        }
        self.profiles.push(name.to_string());
        self.persist_logged();
        Ok(name.to_string())
    }

    /// Checks a rename without applying it; returns the trimmed pair.
    pub fn validate_rename(
        &self,
        old_name: &str,
        new_name: &str,
    ) -> Result<(String, String), ValidationError> {
        let (old_name, new_name) = (old_name.trim(), new_name.trim());
        if old_name.is_empty() || new_name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if old_name == new_name {
            return Err(ValidationError::SameName);
        }
        if !self.contains(old_name) {
            return Err(ValidationError::NotFound);
        }
        if self.contains(new_name) {
            return Err(ValidationError::AlreadyExists);
        }
        Ok((old_name.to_string(), new_name.to_string()))
    }

    /// Replaces `old_name` in place, keeping its list position.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<(), ValidationError> {
        let (old_name, new_name) = self.validate_rename(old_name, new_name)?;
        if let Some(slot) = self.profiles.iter_mut().find(|p| **p == old_name) {
            *slot = new_name;
        }
        self.persist_logged();
        Ok(())
    }

    pub fn validate_delete(&self, name: &str) -> Result<String, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !self.contains(name) {
            return Err(ValidationError::NotFound);
        }
        if self.profiles.len() <= 1 {
            return Err(ValidationError::LastProfile);
        }
        Ok(name.to_string())
    }

    pub fn delete(&mut self, name: &str) -> Result<(), ValidationError> {
        let name = self.validate_delete(name)?;
        self.profiles.retain(|p| *p != name);
        self.persist_logged();
        Ok(())
    }

    fn persist_logged(&self) {
        if let Err(err) = self.persist() {
            tracing::warn!(error = %format!("{err:#}"), "failed to persist profile list");
        }
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create profile directory {}", parent.display())
            })?;
        }
        let json =
            serde_json::to_string_pretty(&self.profiles).context("failed to encode profiles")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write profiles {}", path.display()))
    }
}

fn read_profiles(path: &Path) -> Vec<String> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<serde_json::Value>>(&text) {
        Ok(values) => normalize(
            values
                .into_iter()
                .filter_map(|value| value.as_str().map(str::to_string)),
        ),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable profile list");
            Vec::new()
        }
    }
}

fn normalize(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let name = name.trim();
        if !name.is_empty() && !out.iter().any(|p| p == name) {
            out.push(name.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_PROFILE, ProfileRegistry, ProfileResponse};
    use crate::error::{ShellError, ValidationError};
    use tempfile::tempdir;

    #[test]
    fn first_run_creates_and_persists_default_profile() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("profiles.json");

        let registry = ProfileRegistry::load(&path);
        assert_eq!(registry.list(), vec![DEFAULT_PROFILE.to_string()]);

        let text = std::fs::read_to_string(&path).expect("profiles written");
        let on_disk: Vec<String> = serde_json::from_str(&text).expect("json array");
        assert_eq!(on_disk, vec!["default"]);
    }

    #[test]
    fn load_trims_filters_and_dedups() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("profiles.json");
        std::fs::write(&path, r#"[" work ", "", 7, "home", "work", "   "]"#).expect("write");

        let registry = ProfileRegistry::load(&path);
        assert_eq!(registry.list(), vec!["work", "home"]);
    }

    #[test]
    fn create_rejects_empty_and_duplicate_names() {
        let mut registry = ProfileRegistry::in_memory(&["default"]);

        assert_eq!(registry.create("work"), Ok("work".to_string()));
        assert_eq!(registry.list(), vec!["default", "work"]);
        assert_eq!(registry.create("work"), Err(ValidationError::AlreadyExists));
        assert_eq!(registry.create("   "), Err(ValidationError::EmptyName));
        // case-sensitive identity
        assert!(registry.create("Work").is_ok());
    }

    #[test]
    fn rename_preserves_position() {
        let mut registry = ProfileRegistry::in_memory(&["a", "b", "c"]);
        registry.rename("b", "beta").expect("rename");
        assert_eq!(registry.list(), vec!["a", "beta", "c"]);
    }

    #[test]
    fn rename_validation_order() {
        let registry = ProfileRegistry::in_memory(&["a", "b"]);
        assert_eq!(
            registry.validate_rename("", "x"),
            Err(ValidationError::EmptyName)
        );
        assert_eq!(
            registry.validate_rename("a", "a"),
            Err(ValidationError::SameName)
        );
        assert_eq!(
            registry.validate_rename("zzz", "x"),
            Err(ValidationError::NotFound)
        );
        assert_eq!(
            registry.validate_rename("a", "b"),
            Err(ValidationError::AlreadyExists)
        );
    }

    #[test]
    fn delete_never_removes_last_profile() {
        let mut registry = ProfileRegistry::in_memory(&["only"]);
        assert_eq!(registry.delete("only"), Err(ValidationError::LastProfile));
        assert_eq!(registry.delete("missing"), Err(ValidationError::NotFound));
        assert_eq!(registry.list(), vec!["only"]);

        let mut registry = ProfileRegistry::in_memory(&["default", "work"]);
        registry.delete("default").expect("delete");
        assert_eq!(registry.list(), vec!["work"]);
    }

    #[test]
    fn mutations_are_persisted() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("profiles.json");
        let mut registry = ProfileRegistry::load(&path);
        registry.create("work").expect("create");
        registry.rename("default", "home").expect("rename");

        let reloaded = ProfileRegistry::load(&path);
        assert_eq!(reloaded.list(), vec!["home", "work"]);
    }

    #[test]
    fn responses_serialize_for_profile_ui() {
        let ok = ProfileResponse::success(vec!["default".into()], Some("default".into()));
        assert_eq!(
            serde_json::to_value(&ok).expect("json"),
            serde_json::json!({"ok": true, "profiles": ["default"], "current": "default"})
        );

        let err = ShellError::from(ValidationError::AlreadyExists);
        let failed = ProfileResponse::failure(&err, vec!["default".into(), "work".into()], None);
        assert_eq!(
            serde_json::to_value(&failed).expect("json"),
            serde_json::json!({
                "ok": false,
                "msg": "Profile already exists",
                "profiles": ["default", "work"]
            })
        );
    }
}
