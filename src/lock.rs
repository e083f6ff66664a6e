//! Lock-screen state machine.
//!
//! The machine is pure: every transition returns the [`LockEffect`]s the
//! coordinator must apply (overlay visibility, surface blocking, notices,
//! idle re-arming). It never touches windows or storage itself, so a fresh
//! instance per test exercises every path.

use crate::error::{ShellError, ShellResult, ValidationError};
use crate::notify::Notice;
use crate::pin::{hash_pin, validate_new_pin, verify_pin};
use crate::settings::LockConfig;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum LockPhase {
    #[default]
    Unlocked,
    SetupPrompt,
    LockedVisible,
    LockedHiddenByBlur,
}

impl LockPhase {
    pub fn is_locked(self) -> bool {
        matches!(self, LockPhase::LockedVisible | LockPhase::LockedHiddenByBlur)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTrigger {
    /// Idle timer expiry.
    Auto,
    /// First load of a surface with locking configured. Gated, silent, and
    /// never deferred.
    OnLoad,
    /// Tray "lock now": gated on an authenticated session.
    ManualGated,
    /// Application-menu "lock now": bypasses the session gate.
    ManualForced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Setup,
    Unlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEffect {
    /// Create or reuse the overlay, push `lock-state{setup}`, show and focus it.
    ShowOverlay { setup: bool },
    /// Overlay close attempt while locked: keep it up and pull focus back.
    RefocusOverlay,
    HideOverlay,
    /// Programmatic close, only after setup completion/cancel or a verified unlock.
    CloseOverlay,
    /// Broadcast `locked(bool)` to every content surface.
    BlockSurfaces(bool),
    Notify(Notice),
    ResetIdleTimer,
    PersistLockConfig,
    ScheduleLockAfterSetup,
}

/// Conditions sampled by the coordinator at the moment of a transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateInputs {
    /// Active profile's session is authenticated (or assumed so).
    pub session_ready: bool,
    /// Host window is visible and frontmost.
    pub window_focused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    pub phase: LockPhase,
    pub pending_auto_lock: bool,
    pub overlay_manually_hidden: bool,
}

#[derive(Debug, Default)]
pub struct LockMachine {
    phase: LockPhase,
    pending_auto_lock: bool,
    overlay_manually_hidden: bool,
    lock_after_setup: bool,
}

impl LockMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> LockPhase {
        self.phase
    }

    pub fn snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            phase: self.phase,
            pending_auto_lock: self.pending_auto_lock,
            overlay_manually_hidden: self.overlay_manually_hidden,
        }
    }

    pub fn request_lock(
        &mut self,
        trigger: LockTrigger,
        config: &LockConfig,
        inputs: GateInputs,
    ) -> Vec<LockEffect> {
        if !config.has_pin() {
            return match trigger {
                LockTrigger::Auto | LockTrigger::OnLoad => Vec::new(),
                LockTrigger::ManualGated | LockTrigger::ManualForced => self.enter_setup(),
            };
        }

        match trigger {
            LockTrigger::Auto => self.attempt_auto_lock(config, inputs),
            LockTrigger::OnLoad => {
                if self.phase != LockPhase::Unlocked || !config.enabled || !inputs.session_ready {
                    return Vec::new();
                }
                self.enter_locked()
            }
            LockTrigger::ManualGated => {
                if !inputs.session_ready {
                    return vec![LockEffect::Notify(Notice::CannotLockNotAuthenticated)];
                }
                self.enter_locked()
            }
            LockTrigger::ManualForced => self.enter_locked(),
        }
    }

    /// Idle expiry. Re-checks the gate at fire time and silently does nothing
    /// when it is closed.
    pub fn attempt_auto_lock(&mut self, config: &LockConfig, inputs: GateInputs) -> Vec<LockEffect> {
        if !config.enabled || !config.has_pin() || !inputs.session_ready {
            return Vec::new();
        }
        if self.phase != LockPhase::Unlocked {
            return Vec::new();
        }
        if inputs.window_focused {
            return self.enter_locked();
        }
        let first_deferral = !self.pending_auto_lock;
        self.pending_auto_lock = true;
        if first_deferral {
            vec![LockEffect::Notify(Notice::AutoLockEngaged)]
        } else {
            Vec::new()
        }
    }

    pub fn submit_pin(
        &mut self,
        pin: &str,
        mode: PinMode,
        config: &mut LockConfig,
    ) -> ShellResult<Vec<LockEffect>> {
        match mode {
            PinMode::Setup => self.submit_setup(pin, config),
            PinMode::Unlock => self.submit_unlock(pin, config),
        }
    }

    fn submit_setup(&mut self, pin: &str, config: &mut LockConfig) -> ShellResult<Vec<LockEffect>> {
        if self.phase.is_locked() {
            return Err(ValidationError::PinChangeWhileLocked.into());
        }
        validate_new_pin(pin)?;

        config.pin_hash = Some(hash_pin(pin));
        config.enabled = true;
        let mut effects = vec![LockEffect::PersistLockConfig, LockEffect::ResetIdleTimer];

        if self.phase == LockPhase::SetupPrompt {
            self.phase = LockPhase::Unlocked;
            effects.push(LockEffect::CloseOverlay);
            if std::mem::take(&mut self.lock_after_setup) {
                effects.push(LockEffect::ScheduleLockAfterSetup);
            }
        }
        Ok(effects)
    }

    fn submit_unlock(&mut self, pin: &str, config: &LockConfig) -> ShellResult<Vec<LockEffect>> {
        let Some(stored) = config.pin_hash.as_deref().filter(|h| !h.is_empty()) else {
            return Err(ShellError::Auth);
        };
        if !verify_pin(pin.trim(), stored) {
            return Err(ShellError::Auth);
        }

        if !self.phase.is_locked() {
            return Ok(vec![LockEffect::ResetIdleTimer]);
        }
        self.phase = LockPhase::Unlocked;
        self.overlay_manually_hidden = false;
        self.pending_auto_lock = false;
        Ok(vec![
            LockEffect::BlockSurfaces(false),
            LockEffect::CloseOverlay,
            LockEffect::ResetIdleTimer,
        ])
    }

    pub fn focus_changed(
        &mut self,
        focused: bool,
        config: &LockConfig,
        inputs: GateInputs,
    ) -> Vec<LockEffect> {
        if !focused {
            if self.phase != LockPhase::LockedVisible {
                return Vec::new();
            }
            self.phase = LockPhase::LockedHiddenByBlur;
            self.overlay_manually_hidden = true;
            return vec![LockEffect::HideOverlay, LockEffect::BlockSurfaces(false)];
        }

        match self.phase {
            LockPhase::LockedHiddenByBlur => {
                self.phase = LockPhase::LockedVisible;
                self.overlay_manually_hidden = false;
                vec![
                    LockEffect::ShowOverlay { setup: false },
                    LockEffect::BlockSurfaces(true),
                ]
            }
            LockPhase::Unlocked if self.pending_auto_lock => {
                self.pending_auto_lock = false;
                let inputs = GateInputs {
                    window_focused: true,
                    ..inputs
                };
                self.attempt_auto_lock(config, inputs)
            }
            _ => Vec::new(),
        }
    }

    /// The overlay may only be closed by the user while it is a setup prompt.
    pub fn overlay_close_requested(&mut self) -> Vec<LockEffect> {
        match self.phase {
            LockPhase::LockedVisible => vec![LockEffect::RefocusOverlay],
            // hidden overlays stay hidden until focus returns
            LockPhase::LockedHiddenByBlur => Vec::new(),
            LockPhase::SetupPrompt => {
                self.phase = LockPhase::Unlocked;
                self.lock_after_setup = false;
                vec![LockEffect::CloseOverlay]
            }
            LockPhase::Unlocked => Vec::new(),
        }
    }

    /// Grace delay after setup elapsed: lock so the new PIN gets exercised.
    pub fn lock_after_setup_elapsed(&mut self, config: &LockConfig) -> Vec<LockEffect> {
        if self.phase != LockPhase::Unlocked || !config.has_pin() {
            return Vec::new();
        }
        self.enter_locked()
    }

    fn enter_setup(&mut self) -> Vec<LockEffect> {
        if self.phase.is_locked() {
            return Vec::new();
        }
        self.phase = LockPhase::SetupPrompt;
        self.lock_after_setup = true;
        vec![LockEffect::ShowOverlay { setup: true }]
    }

    fn enter_locked(&mut self) -> Vec<LockEffect> {
        self.phase = LockPhase::LockedVisible;
        self.pending_auto_lock = false;
        self.overlay_manually_hidden = false;
        vec![
            LockEffect::BlockSurfaces(true),
            LockEffect::ShowOverlay { setup: false },
        ]
    }
}
