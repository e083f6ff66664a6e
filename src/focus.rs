use crate::surface::Bounds;
use anyhow::Result;
use std::sync::{Arc, Mutex};

/// Height of the persistent tab strip. Content and the lock overlay sit
/// below it so profiles stay switchable while locked.
pub const CHROME_HEIGHT: u32 = 36;

/// Platform lock-overlay window.
pub trait OverlayWindow: Send {
    /// Creates the overlay at `bounds` in the given mode.
    fn open(&mut self, bounds: Bounds, setup: bool) -> Result<()>;
    /// Pushes `lock-state{setup}` to an existing overlay.
    fn send_state(&mut self, setup: bool) -> Result<()>;
    fn show(&mut self) -> Result<()>;
    fn hide(&mut self) -> Result<()>;
    fn focus(&mut self) -> Result<()>;
    fn set_bounds(&mut self, bounds: Bounds) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Keeps the overlay pinned to the host window's content region for as long
/// as an overlay instance exists, and tracks host focus and visibility.
pub struct FocusCoordinator {
    overlay: Box<dyn OverlayWindow>,
    chrome_height: u32,
    window: Bounds,
    focused: bool,
    visible: bool,
    bound: bool,
}

impl FocusCoordinator {
    pub fn new(overlay: Box<dyn OverlayWindow>, chrome_height: u32, window: Bounds) -> Self {
        Self {
            overlay,
            chrome_height,
            window,
            focused: true,
            visible: true,
            bound: false,
        }
    }

    pub fn window_bounds(&self) -> Bounds {
        self.window
    }

    /// Content surface bounds, relative to the window's content area.
    pub fn content_region(&self) -> Bounds {
        Bounds::new(0, 0, self.window.width, self.window.height).below_strip(self.chrome_height)
    }

    /// Overlay bounds in screen coordinates.
    pub fn overlay_bounds(&self) -> Bounds {
        self.window.below_strip(self.chrome_height)
    }

    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_frontmost(&self) -> bool {
        self.focused && self.visible
    }

    pub fn overlay_bound(&self) -> bool {
        self.bound
    }

    /// Records new host geometry and re-pins a live overlay.
    pub fn on_geometry(&mut self, bounds: Bounds) {
        self.window = bounds;
        if self.bound {
            let overlay_bounds = self.overlay_bounds();
            log_failure("sync overlay bounds", self.overlay.set_bounds(overlay_bounds));
        }
    }

    pub fn show_overlay(&mut self, setup: bool) {
        if self.bound {
            log_failure("push overlay state", self.overlay.send_state(setup));
            let overlay_bounds = self.overlay_bounds();
            log_failure("sync overlay bounds", self.overlay.set_bounds(overlay_bounds));
        } else {
            match self.overlay.open(self.overlay_bounds(), setup) {
                Ok(()) => self.bound = true,
                Err(err) => {
                    tracing::error!(error = %format!("{err:#}"), "failed to open lock overlay");
                    return;
                }
            }
        }
        self.refocus_overlay();
    }

    pub fn refocus_overlay(&mut self) {
        if !self.bound {
            return;
        }
        log_failure("show overlay", self.overlay.show());
        log_failure("focus overlay", self.overlay.focus());
    }

    pub fn hide_overlay(&mut self) {
        if self.bound {
            log_failure("hide overlay", self.overlay.hide());
        }
    }

    pub fn close_overlay(&mut self) {
        if !self.bound {
            return;
        }
        log_failure("close overlay", self.overlay.close());
        self.bound = false;
    }
}

fn log_failure(action: &str, result: Result<()>) {
    if let Err(err) = result {
        tracing::warn!(error = %format!("{err:#}"), "{action} failed");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayCall {
    Open { bounds: Bounds, setup: bool },
    SendState { setup: bool },
    Show,
    Hide,
    Focus,
    SetBounds(Bounds),
    Close,
}

/// Overlay that records calls, for headless runs and tests.
#[derive(Clone, Default)]
pub struct RecordingOverlay {
    calls: Arc<Mutex<Vec<OverlayCall>>>,
}

impl RecordingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<OverlayCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn record(&self, call: OverlayCall) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        Ok(())
    }
}

impl OverlayWindow for RecordingOverlay {
    fn open(&mut self, bounds: Bounds, setup: bool) -> Result<()> {
        self.record(OverlayCall::Open { bounds, setup })
    }

    fn send_state(&mut self, setup: bool) -> Result<()> {
        self.record(OverlayCall::SendState { setup })
    }

    fn show(&mut self) -> Result<()> {
        self.record(OverlayCall::Show)
    }

    fn hide(&mut self) -> Result<()> {
        self.record(OverlayCall::Hide)
    }

    fn focus(&mut self) -> Result<()> {
        self.record(OverlayCall::Focus)
    }

    fn set_bounds(&mut self, bounds: Bounds) -> Result<()> {
        self.record(OverlayCall::SetBounds(bounds))
    }

    fn close(&mut self) -> Result<()> {
        self.record(OverlayCall::Close)
    }
}
