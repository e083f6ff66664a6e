use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_AUTO_LOCK_MINUTES: u32 = 10;

/// Persisted process-wide settings. Missing keys fall back to defaults so
/// older files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lock_enabled: bool,
    /// Hex SHA-256 of the PIN. The raw PIN is never stored.
    pub pin_hash: Option<String>,
    pub auto_lock_minutes: u32,
    /// Epoch milliseconds until which notices are muted.
    pub mute_until_ms: i64,
    pub presentation_mode: bool,
    pub hide_previews: bool,
    pub compact_mode: bool,
    pub force_dark: bool,
    pub hide_sidebar: bool,
    pub low_memory_mode: bool,
    pub always_on_top: bool,
    pub run_on_startup: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lock_enabled: false,
            pin_hash: None,
            auto_lock_minutes: DEFAULT_AUTO_LOCK_MINUTES,
            mute_until_ms: 0,
            presentation_mode: false,
            hide_previews: false,
            compact_mode: false,
            force_dark: false,
            hide_sidebar: false,
            low_memory_mode: false,
            always_on_top: false,
            run_on_startup: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    pub enabled: bool,
    pub pin_hash: Option<String>,
    pub auto_lock_minutes: u32,
}

impl LockConfig {
    pub fn has_pin(&self) -> bool {
        self.pin_hash.as_deref().is_some_and(|hash| !hash.is_empty())
    }

    /// Idle deadline to arm, if auto-lock is active at all.
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.enabled && self.auto_lock_minutes > 0 {
            Some(Duration::from_secs(u64::from(self.auto_lock_minutes) * 60))
        } else {
            None
        }
    }
}

/// Cosmetic snapshot pushed to content surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceSettings {
    pub compact_mode: bool,
    pub force_dark: bool,
    pub hide_sidebar: bool,
    pub mute: bool,
    pub hide_previews: bool,
    pub presentation_mode: bool,
    pub low_memory_mode: bool,
}

impl Settings {
    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            enabled: self.lock_enabled,
            pin_hash: self.pin_hash.clone(),
            auto_lock_minutes: self.auto_lock_minutes,
        }
    }

    pub fn apply_lock_config(&mut self, config: &LockConfig) {
        self.lock_enabled = config.enabled;
        self.pin_hash = config.pin_hash.clone();
        self.auto_lock_minutes = config.auto_lock_minutes;
    }

    /// The mute window includes its end instant.
    pub fn is_muted_at(&self, now_ms: i64) -> bool {
        now_ms <= self.mute_until_ms
    }

    /// Notices are suppressed while muted or presenting.
    pub fn notices_suppressed_at(&self, now_ms: i64) -> bool {
        self.is_muted_at(now_ms) || self.presentation_mode
    }

    pub fn surface_settings_at(&self, now_ms: i64) -> SurfaceSettings {
        SurfaceSettings {
            compact_mode: self.compact_mode,
            force_dark: self.force_dark,
            hide_sidebar: self.hide_sidebar,
            mute: self.is_muted_at(now_ms),
            hide_previews: self.hide_previews,
            presentation_mode: self.presentation_mode,
            low_memory_mode: self.low_memory_mode,
        }
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Settings document backed by an optional TOML file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: Settings,
}

impl SettingsStore {
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            current: settings,
        }
    }

    /// Loads the settings file, writing defaults when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings {}", path.display()))?;
            toml::from_str(&text).with_context(|| {
                format!("failed to parse settings {} (expected TOML)", path.display())
            })?
        } else {
            Settings::default()
        };

        let store = Self {
            path: Some(path),
            current,
        };
        if store.path.as_deref().is_some_and(|p| !p.exists()) {
            store.persist()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> &Settings {
        &self.current
    }

    /// Applies `change` in memory, then persists. The in-memory value is kept
    /// even when the write fails.
    pub fn update(&mut self, change: impl FnOnce(&mut Settings)) -> Result<()> {
        change(&mut self.current);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }
        let text = toml::to_string_pretty(&self.current).context("failed to encode settings")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write settings {}", path.display()))
    }
}
