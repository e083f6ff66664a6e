use crate::error::{ShellError, ShellResult};
use crate::lock::{LockPhase, LockTrigger, PinMode};
use crate::notify::Notice;
use crate::profiles::ProfileResponse;
use crate::surface::{Bounds, SurfaceId};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Every input to the coordination loop. Timers, platform callbacks and UI
/// requests all arrive here and are handled one at a time.
#[derive(Debug)]
pub enum ShellEvent {
    /// Keyboard or pointer input in the window or a content surface.
    Activity,
    IdleExpired {
        generation: u64,
    },
    SessionStatus {
        profile: String,
        authenticated: bool,
    },
    SurfaceLoaded {
        profile: String,
    },
    AuthFallbackElapsed {
        profile: String,
        surface: SurfaceId,
    },
    LockOnLoad {
        profile: String,
    },
    LockAfterSetup,
    WindowFocus {
        focused: bool,
    },
    WindowVisibility {
        visible: bool,
    },
    WindowGeometry {
        bounds: Bounds,
    },
    OverlayCloseRequested,
    NewWindowRequested {
        profile: String,
        url: String,
    },
    DownloadFinished {
        profile: String,
        file_name: String,
        completed: bool,
    },
    Command(ShellCommand),
    Shutdown,
}

/// Requests handled inside the loop. Profile operations always answer with a
/// [`ProfileResponse`]; failures carry `ok: false` and the UI message.
#[derive(Debug)]
pub enum ShellCommand {
    ListProfiles {
        reply: oneshot::Sender<ProfileResponse>,
    },
    CreateProfile {
        name: String,
        reply: oneshot::Sender<ProfileResponse>,
    },
    RenameProfile {
        old_name: String,
        new_name: String,
        reply: oneshot::Sender<ProfileResponse>,
    },
    DeleteProfile {
        name: String,
        reply: oneshot::Sender<ProfileResponse>,
    },
    Activate {
        name: String,
        reply: oneshot::Sender<ProfileResponse>,
    },
    LockNow {
        trigger: LockTrigger,
    },
    /// A surface began a download; the reply is where it must be saved.
    StartDownload {
        profile: String,
        file_name: String,
        reply: oneshot::Sender<PathBuf>,
    },
    SubmitPin {
        pin: String,
        mode: PinMode,
        reply: oneshot::Sender<ShellResult<()>>,
    },
    SetLockEnabled {
        enabled: bool,
    },
    SetAutoLockMinutes {
        minutes: u32,
    },
    /// `None` clears the mute window.
    MuteFor {
        duration: Option<Duration>,
    },
    SetPresentationMode {
        enabled: bool,
    },
    GetState {
        reply: oneshot::Sender<ShellState>,
    },
}

/// Outbound notifications for the chrome strip, tray and notice display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellUpdate {
    Chrome {
        profiles: Vec<String>,
        current: Option<String>,
    },
    Phase(LockPhase),
    Notice(Notice),
    /// Overlay should push a PIN submission result message.
    PinRejected {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellState {
    pub phase: LockPhase,
    pub active_profile: Option<String>,
    pub pending_auto_lock: bool,
    pub overlay_manually_hidden: bool,
    pub profiles: Vec<String>,
    pub lock_enabled: bool,
    pub has_pin: bool,
    pub auto_lock_minutes: u32,
    pub idle_timer_armed: bool,
}

/// Cloneable publisher into the coordination loop.
#[derive(Debug, Clone)]
pub struct ShellHandle {
    tx: mpsc::UnboundedSender<ShellEvent>,
}

impl ShellHandle {
    pub fn new(tx: mpsc::UnboundedSender<ShellEvent>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: ShellEvent) -> ShellResult<()> {
        self.tx.send(event).map_err(|_| ShellError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn command(&self, command: ShellCommand) -> ShellResult<()> {
        self.send(ShellEvent::Command(command))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ShellCommand,
    ) -> ShellResult<T> {
        let (reply, rx) = oneshot::channel();
        self.command(build(reply))?;
        rx.await.map_err(|_| ShellError::Closed)
    }

    pub async fn list_profiles(&self) -> ShellResult<ProfileResponse> {
        self.request(|reply| ShellCommand::ListProfiles { reply }).await
    }

    pub async fn create_profile(&self, name: &str) -> ShellResult<ProfileResponse> {
        let name = name.to_string();
        self.request(|reply| ShellCommand::CreateProfile { name, reply })
            .await
    }

    pub async fn rename_profile(
        &self,
        old_name: &str,
        new_name: &str,
    ) -> ShellResult<ProfileResponse> {
        let (old_name, new_name) = (old_name.to_string(), new_name.to_string());
        self.request(|reply| ShellCommand::RenameProfile {
            old_name,
            new_name,
            reply,
        })
        .await
    }

    pub async fn delete_profile(&self, name: &str) -> ShellResult<ProfileResponse> {
        let name = name.to_string();
        self.request(|reply| ShellCommand::DeleteProfile { name, reply })
            .await
    }

    pub async fn activate(&self, name: &str) -> ShellResult<ProfileResponse> {
        let name = name.to_string();
        self.request(|reply| ShellCommand::Activate { name, reply })
            .await
    }

    pub async fn submit_pin(&self, pin: &str, mode: PinMode) -> ShellResult<()> {
        let pin = pin.to_string();
        self.request(|reply| ShellCommand::SubmitPin { pin, mode, reply })
            .await?
    }

    pub async fn start_download(&self, profile: &str, file_name: &str) -> ShellResult<PathBuf> {
        let (profile, file_name) = (profile.to_string(), file_name.to_string());
        self.request(|reply| ShellCommand::StartDownload {
            profile,
            file_name,
            reply,
        })
        .await
    }

    pub async fn state(&self) -> ShellResult<ShellState> {
        self.request(|reply| ShellCommand::GetState { reply }).await
    }

    pub fn lock_now(&self, trigger: LockTrigger) -> ShellResult<()> {
        self.command(ShellCommand::LockNow { trigger })
    }

    pub fn activity(&self) -> ShellResult<()> {
        self.send(ShellEvent::Activity)
    }

    pub fn shutdown(&self) -> ShellResult<()> {
        self.send(ShellEvent::Shutdown)
    }
}
