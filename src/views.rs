use crate::events::ShellEvent;
use crate::settings::SurfaceSettings;
use crate::surface::{
    Bounds, DownloadPolicy, SurfaceBackend, SurfaceId, SurfaceMessage, SurfaceSpec, partition_for,
};
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};

/// How long after first load a silent session detector stops blocking the
/// lock gate.
pub const AUTH_FALLBACK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unknown,
    Authenticated,
    NotAuthenticated,
    /// The detector stayed silent past the fallback; treated as authenticated
    /// for gating without ever being confirmed.
    AssumedAuthenticated,
}

impl SessionStatus {
    pub fn permits_lock(self) -> bool {
        matches!(
            self,
            SessionStatus::Authenticated | SessionStatus::AssumedAuthenticated
        )
    }
}

struct ViewEntry {
    id: SurfaceId,
    partition: String,
    status: SessionStatus,
    loaded: bool,
    fallback: Option<JoinHandle<()>>,
}

impl Drop for ViewEntry {
    fn drop(&mut self) {
        if let Some(task) = self.fallback.take() {
            task.abort();
        }
    }
}

/// One isolated content surface per profile, created lazily and torn down
/// only on rename or delete.
pub struct ViewPool {
    backend: Box<dyn SurfaceBackend>,
    entries: HashMap<String, ViewEntry>,
    attached: Option<String>,
    remote_url: String,
    downloads: DownloadPolicy,
    events: UnboundedSender<ShellEvent>,
    fallback_after: Duration,
}

impl ViewPool {
    pub fn new(
        backend: Box<dyn SurfaceBackend>,
        remote_url: impl Into<String>,
        downloads: DownloadPolicy,
        events: UnboundedSender<ShellEvent>,
    ) -> Self {
        Self {
            backend,
            entries: HashMap::new(),
            attached: None,
            remote_url: remote_url.into(),
            downloads,
            events,
            fallback_after: AUTH_FALLBACK,
        }
    }

    pub fn with_fallback_after(mut self, fallback_after: Duration) -> Self {
        self.fallback_after = fallback_after;
        self
    }

    pub fn contains(&self, profile: &str) -> bool {
        self.entries.contains_key(profile)
    }

    pub fn surface_id(&self, profile: &str) -> Option<SurfaceId> {
        self.entries.get(profile).map(|entry| entry.id)
    }

    pub fn attached(&self) -> Option<&str> {
        self.attached.as_deref()
    }

    /// `None` means no surface exists for `profile`, which is distinct from a
    /// surface whose status is still [`SessionStatus::Unknown`].
    pub fn status(&self, profile: &str) -> Option<SessionStatus> {
        self.entries.get(profile).map(|entry| entry.status)
    }

    /// Returns the existing surface or creates one. The bool is true when the
    /// surface was created by this call.
    pub fn ensure(&mut self, profile: &str, spellcheck: bool) -> Result<(SurfaceId, bool)> {
        if let Some(entry) = self.entries.get(profile) {
            return Ok((entry.id, false));
        }

        let spec = SurfaceSpec::for_profile(
            profile,
            &self.remote_url,
            self.downloads.clone(),
            spellcheck,
        );
        let id = self.backend.create(&spec).inspect_err(|err| {
            tracing::error!(%profile, error = %format!("{err:#}"), "failed to create content surface");
        })?;
        tracing::info!(%profile, partition = %spec.partition, "created content surface");
        self.entries.insert(
            profile.to_string(),
            ViewEntry {
                id,
                partition: spec.partition,
                status: SessionStatus::Unknown,
                loaded: false,
                fallback: None,
            },
        );
        Ok((id, true))
    }

    /// Swaps the attached surface for `profile`'s, filling `content`, and
    /// pushes the current cosmetic settings to it. When the surface cannot be
    /// created the previous one stays attached.
    pub fn activate(
        &mut self,
        profile: &str,
        content: Bounds,
        settings: SurfaceSettings,
        spellcheck: bool,
    ) -> Result<(SurfaceId, bool)> {
        let (id, created) = self.ensure(profile, spellcheck)?;

        if let Some(previous) = self.attached.take()
            && let Some(previous_id) = self.surface_id(&previous)
            && previous_id != id
            && let Err(err) = self.backend.detach(previous_id)
        {
            tracing::warn!(profile = %previous, error = %format!("{err:#}"), "failed to detach surface");
        }

        if let Err(err) = self.backend.attach(id, content) {
            tracing::warn!(%profile, error = %format!("{err:#}"), "failed to attach surface");
        }
        self.attached = Some(profile.to_string());
        self.send_to(profile, &SurfaceMessage::SettingsUpdated(settings));
        Ok((id, created))
    }

    pub fn resize_attached(&mut self, content: Bounds) {
        let Some(id) = self.attached.as_deref().and_then(|p| self.surface_id(p)) else {
            return;
        };
        if let Err(err) = self.backend.attach(id, content) {
            tracing::warn!(error = %format!("{err:#}"), "failed to resize attached surface");
        }
    }

    /// Tears down the surface, aborts its fallback task and waits for its
    /// storage partition to be cleared. The partition is cleared even when
    /// no surface was created in this process.
    pub async fn destroy(&mut self, profile: &str) {
        let partition = match self.entries.remove(profile) {
            Some(entry) => {
                if let Err(err) = self.backend.destroy(entry.id) {
                    tracing::warn!(%profile, error = %format!("{err:#}"), "surface teardown failed");
                }
                entry.partition.clone()
            }
            None => partition_for(profile),
        };
        if self.attached.as_deref() == Some(profile) {
            self.attached = None;
        }

        match self.backend.clear_storage(&partition).await {
            Ok(()) => tracing::info!(%profile, %partition, "cleared profile storage"),
            Err(err) => tracing::warn!(
                %profile,
                %partition,
                error = %format!("{err:#}"),
                "failed to clear profile storage; partition left orphaned"
            ),
        }
    }

    /// Records a detector event. Returns false when no surface exists.
    pub fn set_status(&mut self, profile: &str, authenticated: bool) -> bool {
        let Some(entry) = self.entries.get_mut(profile) else {
            return false;
        };
        entry.status = if authenticated {
            SessionStatus::Authenticated
        } else {
            SessionStatus::NotAuthenticated
        };
        true
    }

    /// Marks the first content load and starts the fallback countdown.
    /// Returns true only for the first load of the surface.
    pub fn surface_loaded(&mut self, profile: &str) -> bool {
        let Some(entry) = self.entries.get_mut(profile) else {
            return false;
        };
        if entry.loaded {
            return false;
        }
        entry.loaded = true;

        let events = self.events.clone();
        let profile = profile.to_string();
        let surface = entry.id;
        let deadline = Instant::now() + self.fallback_after;
        entry.fallback = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = events.send(ShellEvent::AuthFallbackElapsed { profile, surface });
        }));
        true
    }

    /// Applies the fallback if `surface` is still the live surface for
    /// `profile` and no authenticated status has been seen.
    pub fn apply_auth_fallback(&mut self, profile: &str, surface: SurfaceId) -> bool {
        let Some(entry) = self.entries.get_mut(profile) else {
            return false;
        };
        if entry.id != surface {
            return false;
        }
        entry.fallback = None;
        if entry.status == SessionStatus::Authenticated {
            return false;
        }
        entry.status = SessionStatus::AssumedAuthenticated;
        true
    }

    pub fn send_to(&mut self, profile: &str, message: &SurfaceMessage) {
        let Some(id) = self.surface_id(profile) else {
            return;
        };
        if let Err(err) = self.backend.send(id, message) {
            tracing::debug!(%profile, error = %format!("{err:#}"), "surface message dropped");
        }
    }

    /// Sends `message` to every surface, attached or not.
    pub fn broadcast(&mut self, message: &SurfaceMessage) {
        for (profile, entry) in &self.entries {
            if let Err(err) = self.backend.send(entry.id, message) {
                tracing::debug!(%profile, error = %format!("{err:#}"), "surface message dropped");
            }
        }
    }

    /// Where a download with `suggested` as its file name is saved.
    pub fn download_path(&self, suggested: &str) -> PathBuf {
        self.downloads.save_path(suggested)
    }

    pub fn open_external(&mut self, url: &str) {
        if let Err(err) = self.backend.open_external(url) {
            tracing::warn!(%url, error = %format!("{err:#}"), "failed to open link externally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionStatus, ViewPool};
    use crate::events::ShellEvent;
    use crate::settings::Settings;
    use crate::surface::{
        Bounds, DownloadPolicy, RecordingBackend, SurfaceCall, SurfaceMessage,
    };
    use tokio::sync::mpsc;
    use tokio::time::{Duration, advance};

    fn pool() -> (ViewPool, RecordingBackend, mpsc::UnboundedReceiver<ShellEvent>) {
        let backend = RecordingBackend::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = ViewPool::new(
            Box::new(backend.clone()),
            "https://example.invalid/",
            DownloadPolicy::new("/tmp/downloads"),
            tx,
        );
        (pool, backend, rx)
    }

    #[tokio::test]
    async fn ensure_is_lazy_and_idempotent() {
        let (mut pool, backend, _rx) = pool();
        assert_eq!(pool.status("work"), None);

        let (id, created) = pool.ensure("work", true).expect("surface");
        assert!(created);
        assert_eq!(pool.ensure("work", true).expect("existing"), (id, false));
        assert_eq!(pool.status("work"), Some(SessionStatus::Unknown));

        let specs = backend.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].partition, "profile:work");
        assert!(specs[0].open_new_windows_externally);
        assert!(specs[0].user_agent.contains("Chrome/"));
    }

    #[tokio::test]
    async fn activate_detaches_previous_and_pushes_settings() {
        let (mut pool, backend, _rx) = pool();
        let settings = Settings::default().surface_settings_at(0);
        let content = Bounds::new(0, 36, 800, 564);

        let (a, _) = pool.activate("a", content, settings, true).expect("a");
        let (b, _) = pool.activate("b", content, settings, true).expect("b");

        let calls = backend.calls();
        assert!(calls.contains(&SurfaceCall::Detach { id: a }));
        assert!(calls.contains(&SurfaceCall::Attach { id: b, bounds: content }));
        assert!(calls.contains(&SurfaceCall::Send {
            id: b,
            message: SurfaceMessage::SettingsUpdated(settings)
        }));
        assert_eq!(pool.attached(), Some("b"));
        // switching away preserves the surface
        assert!(pool.contains("a"));
    }

    #[tokio::test]
    async fn destroy_clears_storage_and_forgets_status() {
        let (mut pool, backend, _rx) = pool();
        pool.ensure("work", true).expect("surface");
        pool.set_status("work", true);

        pool.destroy("work").await;
        assert_eq!(pool.status("work"), None);
        assert!(backend.calls().contains(&SurfaceCall::ClearStorage {
            partition: "profile:work".to_string()
        }));

        pool.ensure("work", true).expect("surface");
        assert_eq!(pool.status("work"), Some(SessionStatus::Unknown));
    }

    #[tokio::test]
    async fn destroy_swallows_storage_failures() {
        let backend = RecordingBackend::failing_storage_clear();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = ViewPool::new(
            Box::new(backend),
            "https://example.invalid/",
            DownloadPolicy::new("/tmp/downloads"),
            tx,
        );
        pool.ensure("work", true).expect("surface");
        pool.destroy("work").await;
        assert!(!pool.contains("work"));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_assumes_authentication_after_first_load() {
        let (mut pool, _backend, mut rx) = pool();
        let (id, _) = pool.ensure("work", true).expect("surface");
        pool.set_status("work", false);

        assert!(pool.surface_loaded("work"));
        assert!(!pool.surface_loaded("work"));

        advance(Duration::from_secs(31)).await;
        match rx.recv().await.expect("fallback event") {
            ShellEvent::AuthFallbackElapsed { profile, surface } => {
                assert_eq!(profile, "work");
                assert_eq!(surface, id);
                assert!(pool.apply_auth_fallback(&profile, surface));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            pool.status("work"),
            Some(SessionStatus::AssumedAuthenticated)
        );
        assert!(pool.status("work").expect("status").permits_lock());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_deadline_counts_from_load() {
        let (mut pool, _backend, mut rx) = pool();
        pool.ensure("work", true).expect("surface");
        pool.surface_loaded("work");

        // the countdown task has not been polled yet
        advance(Duration::from_secs(30)).await;
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            rx.try_recv(),
            Ok(ShellEvent::AuthFallbackElapsed { .. })
        ));
    }

    #[tokio::test]
    async fn failed_create_keeps_previous_surface_attached() {
        let backend = RecordingBackend::failing_create_for("b");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = ViewPool::new(
            Box::new(backend.clone()),
            "https://example.invalid/",
            DownloadPolicy::new("/tmp/downloads"),
            tx,
        );
        let settings = Settings::default().surface_settings_at(0);
        let content = Bounds::new(0, 36, 800, 564);

        let (a, _) = pool.activate("a", content, settings, true).expect("a");
        assert!(pool.activate("b", content, settings, true).is_err());
        assert_eq!(pool.attached(), Some("a"));
        assert_eq!(pool.status("b"), None);
        assert!(!backend.calls().contains(&SurfaceCall::Detach { id: a }));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_is_cancelled_with_its_surface() {
        let (mut pool, _backend, mut rx) = pool();
        let (old_id, _) = pool.ensure("work", true).expect("surface");
        pool.surface_loaded("work");
        pool.destroy("work").await;

        advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        pool.ensure("work", true).expect("surface");
        assert!(!pool.apply_auth_fallback("work", old_id));
        assert_eq!(pool.status("work"), Some(SessionStatus::Unknown));
    }
}
