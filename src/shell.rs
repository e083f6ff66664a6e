use crate::error::{ShellError, ShellResult, ValidationError};
use crate::events::{ShellCommand, ShellEvent, ShellHandle, ShellState, ShellUpdate};
use crate::focus::{CHROME_HEIGHT, FocusCoordinator, OverlayWindow};
use crate::idle::IdleTimer;
use crate::lock::{GateInputs, LockEffect, LockMachine, LockPhase, LockTrigger, PinMode};
use crate::notify::{Notice, should_deliver};
use crate::profiles::{ProfileRegistry, ProfileResponse};
use crate::settings::{LockConfig, Settings, SettingsStore, now_ms};
use crate::surface::{Bounds, DEFAULT_REMOTE_URL, DownloadPolicy, SurfaceBackend, SurfaceMessage};
use crate::views::{AUTH_FALLBACK, SessionStatus, ViewPool};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

pub const LOCK_ON_LOAD_DELAY: Duration = Duration::from_millis(500);
pub const LOCK_AFTER_SETUP_DELAY: Duration = Duration::from_millis(150);

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub remote_url: String,
    pub downloads: DownloadPolicy,
    pub chrome_height: u32,
    /// Host window geometry in screen coordinates at startup.
    pub initial_window: Bounds,
    pub auth_fallback: Duration,
    pub lock_on_load_delay: Duration,
    pub lock_after_setup_delay: Duration,
}

impl ShellConfig {
    pub fn new(downloads: DownloadPolicy) -> Self {
        Self {
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            downloads,
            chrome_height: CHROME_HEIGHT,
            initial_window: Bounds::new(0, 0, 1200, 800),
            auth_fallback: AUTH_FALLBACK,
            lock_on_load_delay: LOCK_ON_LOAD_DELAY,
            lock_after_setup_delay: LOCK_AFTER_SETUP_DELAY,
        }
    }
}

/// The coordination loop. Owns the registry, view pool, lock machine, idle
/// timer and focus coordinator; every event is handled to completion before
/// the next one is read, so none of that state needs locking.
pub struct Shell {
    registry: ProfileRegistry,
    settings: SettingsStore,
    views: ViewPool,
    lock: LockMachine,
    idle: IdleTimer,
    focus: FocusCoordinator,
    events: mpsc::UnboundedSender<ShellEvent>,
    updates: Option<mpsc::UnboundedSender<ShellUpdate>>,
    active: Option<String>,
    published_phase: LockPhase,
    lock_on_load_delay: Duration,
    lock_after_setup_delay: Duration,
}

impl Shell {
    pub fn new(
        config: ShellConfig,
        registry: ProfileRegistry,
        settings: SettingsStore,
        backend: Box<dyn SurfaceBackend>,
        overlay: Box<dyn OverlayWindow>,
        events: mpsc::UnboundedSender<ShellEvent>,
    ) -> Self {
        let views = ViewPool::new(backend, config.remote_url, config.downloads, events.clone())
            .with_fallback_after(config.auth_fallback);
        Self {
            registry,
            settings,
            views,
            lock: LockMachine::new(),
            idle: IdleTimer::new(events.clone()),
            focus: FocusCoordinator::new(overlay, config.chrome_height, config.initial_window),
            events,
            updates: None,
            active: None,
            published_phase: LockPhase::Unlocked,
            lock_on_load_delay: config.lock_on_load_delay,
            lock_after_setup_delay: config.lock_after_setup_delay,
        }
    }

    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<ShellUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn handle(&self) -> ShellHandle {
        ShellHandle::new(self.events.clone())
    }

    /// Activates `initial` (or the first profile) and arms the idle timer.
    pub fn start(&mut self, initial: Option<&str>) {
        let profile = initial
            .filter(|name| self.registry.contains(name))
            .or_else(|| self.registry.first())
            .map(str::to_string);
        if let Some(profile) = profile
            && let Err(err) = self.activate_profile(&profile)
        {
            tracing::warn!(%profile, error = %err, "initial activation failed");
        }
        self.reset_idle();
        self.publish_chrome();
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ShellEvent>) {
        tracing::info!(active = ?self.active, "coordination loop started");
        while let Some(event) = events.recv().await {
            if !self.dispatch(event).await {
                break;
            }
        }
        self.idle.cancel();
        tracing::info!("coordination loop stopped");
    }

    /// Handles one event. Returns false once the loop should stop.
    pub async fn dispatch(&mut self, event: ShellEvent) -> bool {
        match event {
            ShellEvent::Activity => self.reset_idle(),
            ShellEvent::IdleExpired { generation } => {
                if self.idle.take_expiry(generation) {
                    tracing::debug!("idle deadline reached");
                    let (config, inputs) = (self.lock_config(), self.gate_inputs());
                    let effects = self.lock.attempt_auto_lock(&config, inputs);
                    self.apply_effects(effects, &config);
                }
            }
            ShellEvent::SessionStatus {
                profile,
                authenticated,
            } => {
                if self.views.set_status(&profile, authenticated) {
                    tracing::info!(%profile, authenticated, "session status changed");
                } else {
                    tracing::debug!(%profile, "session status for profile without a surface ignored");
                }
            }
            ShellEvent::SurfaceLoaded { profile } => {
                let config = self.lock_config();
                if self.views.surface_loaded(&profile) && config.enabled && config.has_pin() {
                    self.schedule(self.lock_on_load_delay, ShellEvent::LockOnLoad { profile });
                }
            }
            ShellEvent::AuthFallbackElapsed { profile, surface } => {
                if self.views.apply_auth_fallback(&profile, surface) {
                    tracing::info!(%profile, "no session status reported; assuming authenticated");
                }
            }
            ShellEvent::LockOnLoad { profile } => {
                if self.active.as_deref() == Some(profile.as_str()) {
                    self.request_lock(LockTrigger::OnLoad);
                }
            }
            ShellEvent::LockAfterSetup => {
                let config = self.lock_config();
                let effects = self.lock.lock_after_setup_elapsed(&config);
                self.apply_effects(effects, &config);
            }
            ShellEvent::WindowFocus { focused } => {
                self.focus.set_focused(focused);
                self.frontmost_changed();
            }
            ShellEvent::WindowVisibility { visible } => {
                self.focus.set_visible(visible);
                self.frontmost_changed();
            }
            ShellEvent::WindowGeometry { bounds } => {
                self.focus.on_geometry(bounds);
                self.views.resize_attached(self.focus.content_region());
            }
            ShellEvent::OverlayCloseRequested => {
                let config = self.lock_config();
                let effects = self.lock.overlay_close_requested();
                self.apply_effects(effects, &config);
            }
            ShellEvent::NewWindowRequested { profile, url } => {
                tracing::info!(%profile, %url, "redirecting new window to external handler");
                self.views.open_external(&url);
            }
            ShellEvent::DownloadFinished {
                profile,
                file_name,
                completed,
            } => {
                if completed {
                    tracing::info!(%profile, %file_name, "download complete");
                    self.notify(Notice::DownloadComplete { file_name });
                } else {
                    tracing::warn!(%profile, %file_name, "download interrupted");
                }
            }
            ShellEvent::Command(command) => self.handle_command(command).await,
            ShellEvent::Shutdown => return false,
        }
        true
    }

    async fn handle_command(&mut self, command: ShellCommand) {
        match command {
            ShellCommand::ListProfiles { reply } => {
                let _ = reply.send(self.profile_response());
            }
            ShellCommand::CreateProfile { name, reply } => {
                let result = self.create_profile(&name);
                let _ = reply.send(self.respond(result));
            }
            ShellCommand::RenameProfile {
                old_name,
                new_name,
                reply,
            } => {
                let result = self.rename_profile(&old_name, &new_name).await;
                let _ = reply.send(self.respond(result));
            }
            ShellCommand::DeleteProfile { name, reply } => {
                let result = self.delete_profile(&name).await;
                let _ = reply.send(self.respond(result));
            }
            ShellCommand::Activate { name, reply } => {
                let result = self.activate_profile(name.trim());
                let _ = reply.send(self.respond(result));
            }
            ShellCommand::LockNow { trigger } => self.request_lock(trigger),
            ShellCommand::StartDownload {
                profile,
                file_name,
                reply,
            } => {
                let path = self.views.download_path(&file_name);
                tracing::info!(%profile, path = %path.display(), "download started");
                let _ = reply.send(path);
            }
            ShellCommand::SubmitPin { pin, mode, reply } => {
                let _ = reply.send(self.submit_pin(&pin, mode));
            }
            ShellCommand::SetLockEnabled { enabled } => {
                self.update_settings(|s| s.lock_enabled = enabled);
                self.reset_idle();
            }
            ShellCommand::SetAutoLockMinutes { minutes } => {
                self.update_settings(|s| s.auto_lock_minutes = minutes);
                self.reset_idle();
            }
            ShellCommand::MuteFor { duration } => {
                let until = duration.map_or(0, |d| {
                    now_ms().saturating_add(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
                });
                self.update_settings(|s| s.mute_until_ms = until);
                self.broadcast_settings();
            }
            ShellCommand::SetPresentationMode { enabled } => {
                self.update_settings(|s| s.presentation_mode = enabled);
                self.broadcast_settings();
            }
            ShellCommand::GetState { reply } => {
                let _ = reply.send(self.state());
            }
        }
    }

    pub fn state(&self) -> ShellState {
        let snapshot = self.lock.snapshot();
        let settings = self.settings.get();
        let config = settings.lock_config();
        ShellState {
            phase: snapshot.phase,
            active_profile: self.active.clone(),
            pending_auto_lock: snapshot.pending_auto_lock,
            overlay_manually_hidden: snapshot.overlay_manually_hidden,
            profiles: self.registry.list(),
            lock_enabled: config.enabled,
            has_pin: config.has_pin(),
            auto_lock_minutes: config.auto_lock_minutes,
            idle_timer_armed: self.idle.is_armed(),
        }
    }

    pub fn session_status(&self, profile: &str) -> Option<SessionStatus> {
        self.views.status(profile)
    }

    pub fn settings(&self) -> &Settings {
        self.settings.get()
    }

    fn create_profile(&mut self, name: &str) -> ShellResult<ProfileResponse> {
        let name = self.registry.create(name)?;
        tracing::info!(profile = %name, "profile created");
        self.publish_chrome();
        Ok(self.profile_response())
    }

    /// Storage for the old name is wiped before the reply; the renamed
    /// profile starts with a fresh, unauthenticated surface.
    async fn rename_profile(&mut self, old_name: &str, new_name: &str) -> ShellResult<ProfileResponse> {
        let (old_name, new_name) = self.registry.validate_rename(old_name, new_name)?;
        self.views.destroy(&old_name).await;
        self.registry.rename(&old_name, &new_name)?;
        tracing::info!(from = %old_name, to = %new_name, "profile renamed");

        if self.active.as_deref() == Some(old_name.as_str()) {
            self.active = Some(new_name.clone());
            self.activate_profile(&new_name)?;
        }
        self.publish_chrome();
        Ok(self.profile_response())
    }

    async fn delete_profile(&mut self, name: &str) -> ShellResult<ProfileResponse> {
        let name = self.registry.validate_delete(name)?;
        self.views.destroy(&name).await;
        self.registry.delete(&name)?;
        tracing::info!(profile = %name, "profile deleted");

        if self.active.as_deref() == Some(name.as_str()) {
            self.active = None;
            if let Some(first) = self.registry.first().map(str::to_string) {
                self.activate_profile(&first)?;
            }
        }
        self.publish_chrome();
        Ok(self.profile_response())
    }

    fn activate_profile(&mut self, name: &str) -> ShellResult<ProfileResponse> {
        if !self.registry.contains(name) {
            return Err(ValidationError::NotFound.into());
        }
        let settings = self.settings.get();
        let spellcheck = !settings.low_memory_mode;
        let cosmetic = settings.surface_settings_at(now_ms());
        let content = self.focus.content_region();

        let (_, created) = self
            .views
            .activate(name, content, cosmetic, spellcheck)
            .map_err(ShellError::Platform)?;
        if created && self.lock.phase() == LockPhase::LockedVisible {
            self.views.send_to(name, &SurfaceMessage::Locked(true));
        }
        self.active = Some(name.to_string());
        tracing::debug!(profile = %name, "profile activated");
        self.publish_chrome();
        Ok(self.profile_response())
    }

    fn request_lock(&mut self, trigger: LockTrigger) {
        let (config, inputs) = (self.lock_config(), self.gate_inputs());
        let effects = self.lock.request_lock(trigger, &config, inputs);
        self.apply_effects(effects, &config);
    }

    fn submit_pin(&mut self, pin: &str, mode: PinMode) -> ShellResult<()> {
        let mut config = self.lock_config();
        match self.lock.submit_pin(pin, mode, &mut config) {
            Ok(effects) => {
                self.apply_effects(effects, &config);
                Ok(())
            }
            Err(err) => {
                tracing::info!(?mode, error = %err, "PIN rejected");
                self.publish(ShellUpdate::PinRejected {
                    message: err.user_message(),
                });
                Err(err)
            }
        }
    }

    fn frontmost_changed(&mut self) {
        let (config, inputs) = (self.lock_config(), self.gate_inputs());
        let effects = self
            .lock
            .focus_changed(inputs.window_focused, &config, inputs);
        self.apply_effects(effects, &config);
    }

    fn apply_effects(&mut self, effects: Vec<LockEffect>, config: &LockConfig) {
        for effect in effects {
            match effect {
                LockEffect::ShowOverlay { setup } => self.focus.show_overlay(setup),
                LockEffect::RefocusOverlay => self.focus.refocus_overlay(),
                LockEffect::HideOverlay => self.focus.hide_overlay(),
                LockEffect::CloseOverlay => self.focus.close_overlay(),
                LockEffect::BlockSurfaces(locked) => {
                    self.views.broadcast(&SurfaceMessage::Locked(locked))
                }
                LockEffect::Notify(notice) => self.notify(notice),
                LockEffect::ResetIdleTimer => self.reset_idle(),
                LockEffect::PersistLockConfig => {
                    self.update_settings(|s| s.apply_lock_config(config))
                }
                LockEffect::ScheduleLockAfterSetup => {
                    self.schedule(self.lock_after_setup_delay, ShellEvent::LockAfterSetup)
                }
            }
        }
        self.publish_phase();
    }

    fn gate_inputs(&self) -> GateInputs {
        let session_ready = self
            .active
            .as_deref()
            .and_then(|profile| self.views.status(profile))
            .is_some_and(SessionStatus::permits_lock);
        GateInputs {
            session_ready,
            window_focused: self.focus.is_frontmost(),
        }
    }

    fn lock_config(&self) -> LockConfig {
        self.settings.get().lock_config()
    }

    fn reset_idle(&mut self) {
        let timeout = self.lock_config().idle_timeout();
        self.idle.reset(timeout);
    }

    fn update_settings(&mut self, change: impl FnOnce(&mut Settings)) {
        if let Err(err) = self.settings.update(change) {
            tracing::warn!(error = %format!("{err:#}"), "failed to persist settings");
        }
    }

    fn broadcast_settings(&mut self) {
        let cosmetic = self.settings.get().surface_settings_at(now_ms());
        self.views.broadcast(&SurfaceMessage::SettingsUpdated(cosmetic));
    }

    fn notify(&self, notice: Notice) {
        if should_deliver(self.settings.get(), now_ms()) {
            self.publish(ShellUpdate::Notice(notice));
        } else {
            tracing::debug!(title = notice.title(), "notice suppressed");
        }
    }

    /// Delivers `event` once `delay` has passed from now.
    fn schedule(&self, delay: Duration, event: ShellEvent) {
        let events = self.events.clone();
        let deadline = Instant::now() + delay;
        tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = events.send(event);
        });
    }

    fn profile_response(&self) -> ProfileResponse {
        ProfileResponse::success(self.registry.list(), self.active.clone())
    }

    fn respond(&self, result: ShellResult<ProfileResponse>) -> ProfileResponse {
        result.unwrap_or_else(|err| {
            tracing::info!(error = %err, "profile operation refused");
            ProfileResponse::failure(&err, self.registry.list(), self.active.clone())
        })
    }

    fn publish_chrome(&self) {
        self.publish(ShellUpdate::Chrome {
            profiles: self.registry.list(),
            current: self.active.clone(),
        });
    }

    fn publish_phase(&mut self) {
        let phase = self.lock.phase();
        if phase != self.published_phase {
            tracing::info!(from = ?self.published_phase, to = ?phase, "lock phase changed");
            self.published_phase = phase;
            self.publish(ShellUpdate::Phase(phase));
        }
    }

    fn publish(&self, update: ShellUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }
}
