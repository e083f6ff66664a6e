use crate::events::ShellEvent;
use crate::settings::SurfaceSettings;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

pub const DEFAULT_REMOTE_URL: &str = "https://web.whatsapp.com/";

/// Desktop browser identification so the remote service serves the full
/// experience.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

pub const SPELLCHECK_LANGUAGES: [&str; 2] = ["en-US", "id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The region below a fixed-height strip along the top edge.
    pub fn below_strip(&self, strip_height: u32) -> Bounds {
        Bounds {
            x: self.x,
            y: self.y.saturating_add(i32::try_from(strip_height).unwrap_or(i32::MAX)),
            width: self.width,
            height: self.height.saturating_sub(strip_height),
        }
    }
}

/// Storage partition for a profile. Deterministic so the same name maps to
/// the same storage across restarts.
pub fn partition_for(profile: &str) -> String {
    format!("profile:{profile}")
}

/// Downloads from every profile land in one shared directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPolicy {
    dir: PathBuf,
}

impl DownloadPolicy {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save path for a suggested file name; directory components are dropped.
    pub fn save_path(&self, suggested: &str) -> PathBuf {
        let name = Path::new(suggested.trim())
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty() && *n != "." && *n != "..")
            .unwrap_or("download");
        self.dir.join(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSpec {
    pub profile: String,
    pub partition: String,
    pub url: String,
    pub user_agent: String,
    pub spellcheck_languages: Vec<String>,
    /// New top-level browsing contexts go to the default external handler.
    pub open_new_windows_externally: bool,
    pub downloads: DownloadPolicy,
}

impl SurfaceSpec {
    pub fn for_profile(profile: &str, url: &str, downloads: DownloadPolicy, spellcheck: bool) -> Self {
        Self {
            profile: profile.to_string(),
            partition: partition_for(profile),
            url: url.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            spellcheck_languages: if spellcheck {
                SPELLCHECK_LANGUAGES.iter().map(|l| l.to_string()).collect()
            } else {
                Vec::new()
            },
            open_new_windows_externally: true,
            downloads,
        }
    }
}

/// Push events delivered to a content surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceMessage {
    Locked(bool),
    SettingsUpdated(SurfaceSettings),
}

/// Platform content-surface API. All calls are best-effort; callers log and
/// swallow failures.
#[async_trait]
pub trait SurfaceBackend: Send {
    fn create(&mut self, spec: &SurfaceSpec) -> Result<SurfaceId>;
    fn attach(&mut self, id: SurfaceId, bounds: Bounds) -> Result<()>;
    fn detach(&mut self, id: SurfaceId) -> Result<()>;
    fn send(&mut self, id: SurfaceId, message: &SurfaceMessage) -> Result<()>;
    fn destroy(&mut self, id: SurfaceId) -> Result<()>;
    async fn clear_storage(&mut self, partition: &str) -> Result<()>;
    fn open_external(&mut self, url: &str) -> Result<()>;
}

/// Backend that keeps each partition as a directory on disk. Remote content
/// is not rendered; a surface counts as loaded as soon as it exists.
pub struct PartitionDirBackend {
    root: PathBuf,
    next_id: u64,
    surfaces: HashMap<SurfaceId, String>,
    attached: Option<SurfaceId>,
    events: Option<UnboundedSender<ShellEvent>>,
}

impl PartitionDirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_id: 1,
            surfaces: HashMap::new(),
            attached: None,
            events: None,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<ShellEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn partition_dir(&self, partition: &str) -> PathBuf {
        self.root.join(hex::encode(partition.as_bytes()))
    }
}

#[async_trait]
impl SurfaceBackend for PartitionDirBackend {
    fn create(&mut self, spec: &SurfaceSpec) -> Result<SurfaceId> {
        let dir = self.partition_dir(&spec.partition);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create partition {}", dir.display()))?;
        std::fs::create_dir_all(spec.downloads.dir()).with_context(|| {
            format!(
                "failed to create downloads directory {}",
                spec.downloads.dir().display()
            )
        })?;

        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        self.surfaces.insert(id, spec.profile.clone());
        tracing::debug!(profile = %spec.profile, partition = %spec.partition, url = %spec.url, "surface created");

        if let Some(events) = &self.events {
            let _ = events.send(ShellEvent::SurfaceLoaded {
                profile: spec.profile.clone(),
            });
        }
        Ok(id)
    }

    fn attach(&mut self, id: SurfaceId, bounds: Bounds) -> Result<()> {
        let profile = self
            .surfaces
            .get(&id)
            .ok_or_else(|| anyhow!("unknown surface {}", id.0))?;
        tracing::debug!(%profile, ?bounds, "surface attached");
        self.attached = Some(id);
        Ok(())
    }

    fn detach(&mut self, id: SurfaceId) -> Result<()> {
        if self.attached == Some(id) {
            self.attached = None;
        }
        Ok(())
    }

    fn send(&mut self, id: SurfaceId, message: &SurfaceMessage) -> Result<()> {
        let profile = self
            .surfaces
            .get(&id)
            .ok_or_else(|| anyhow!("unknown surface {}", id.0))?;
        tracing::trace!(%profile, ?message, "surface message");
        Ok(())
    }

    fn destroy(&mut self, id: SurfaceId) -> Result<()> {
        self.detach(id)?;
        self.surfaces
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("unknown surface {}", id.0))
    }

    async fn clear_storage(&mut self, partition: &str) -> Result<()> {
        let dir = self.partition_dir(partition);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to clear partition {}", dir.display()))
            }
        }
    }

    fn open_external(&mut self, url: &str) -> Result<()> {
        opener::open(url).with_context(|| format!("failed to open {url} externally"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Create { profile: String, id: SurfaceId },
    Attach { id: SurfaceId, bounds: Bounds },
    Detach { id: SurfaceId },
    Send { id: SurfaceId, message: SurfaceMessage },
    Destroy { id: SurfaceId },
    ClearStorage { partition: String },
    OpenExternal { url: String },
}

/// In-memory backend that records every call.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    calls: Arc<Mutex<Vec<SurfaceCall>>>,
    specs: Arc<Mutex<Vec<SurfaceSpec>>>,
    next_id: Arc<Mutex<u64>>,
    fail_clear_storage: bool,
    fail_create_for: Option<String>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_storage_clear() -> Self {
        Self {
            fail_clear_storage: true,
            ..Self::default()
        }
    }

    /// Refuses to create a surface for `profile`.
    pub fn failing_create_for(profile: &str) -> Self {
        Self {
            fail_create_for: Some(profile.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn specs(&self) -> Vec<SurfaceSpec> {
        self.specs.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// Every `locked(..)` push, in order, as `(surface, locked)`.
    pub fn locked_messages(&self) -> Vec<(SurfaceId, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Send {
                    id,
                    message: SurfaceMessage::Locked(locked),
                } => Some((id, locked)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SurfaceCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl SurfaceBackend for RecordingBackend {
    fn create(&mut self, spec: &SurfaceSpec) -> Result<SurfaceId> {
        if self.fail_create_for.as_deref() == Some(spec.profile.as_str()) {
            return Err(anyhow!("renderer unavailable for {}", spec.profile));
        }
        let id = {
            let mut next = self
                .next_id
                .lock()
                .map_err(|_| anyhow!("surface id counter poisoned"))?;
            *next += 1;
            SurfaceId(*next)
        };
        if let Ok(mut specs) = self.specs.lock() {
            specs.push(spec.clone());
        }
        self.record(SurfaceCall::Create {
            profile: spec.profile.clone(),
            id,
        });
        Ok(id)
    }

    fn attach(&mut self, id: SurfaceId, bounds: Bounds) -> Result<()> {
        self.record(SurfaceCall::Attach { id, bounds });
        Ok(())
    }

    fn detach(&mut self, id: SurfaceId) -> Result<()> {
        self.record(SurfaceCall::Detach { id });
        Ok(())
    }

    fn send(&mut self, id: SurfaceId, message: &SurfaceMessage) -> Result<()> {
        self.record(SurfaceCall::Send {
            id,
            message: message.clone(),
        });
        Ok(())
    }

    fn destroy(&mut self, id: SurfaceId) -> Result<()> {
        self.record(SurfaceCall::Destroy { id });
        Ok(())
    }

    async fn clear_storage(&mut self, partition: &str) -> Result<()> {
        self.record(SurfaceCall::ClearStorage {
            partition: partition.to_string(),
        });
        if self.fail_clear_storage {
            return Err(anyhow!("partition {partition} is busy"));
        }
        Ok(())
    }

    fn open_external(&mut self, url: &str) -> Result<()> {
        self.record(SurfaceCall::OpenExternal {
            url: url.to_string(),
        });
        Ok(())
    }
}
