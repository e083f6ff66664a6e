use anyhow::{Result, anyhow};
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use session_shell::events::{ShellCommand, ShellEvent, ShellHandle, ShellUpdate};
use session_shell::focus::OverlayWindow;
use session_shell::lock::{LockPhase, LockTrigger, PinMode};
use session_shell::paths::{
    default_data_dir, downloads_dir, partitions_dir, profiles_path, settings_path,
};
use session_shell::profiles::ProfileRegistry;
use session_shell::settings::SettingsStore;
use session_shell::shell::{Shell, ShellConfig};
use session_shell::surface::{Bounds, DownloadPolicy, PartitionDirBackend};
use std::thread;
use std::time::Duration;
use tao::dpi::{PhysicalPosition, PhysicalSize};
use tao::event::{ElementState, Event, StartCause, WindowEvent};
use tao::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy, EventLoopWindowTarget};
use tao::keyboard::Key;
use tao::window::{Window, WindowBuilder};
use tokio::sync::{mpsc, oneshot};
use tray_icon::menu::{CheckMenuItem, Menu, MenuEvent, MenuItem, PredefinedMenuItem, Submenu};
use tray_icon::{Icon, TrayIcon, TrayIconBuilder};

const AUTO_LOCK_CHOICES: [u32; 5] = [0, 1, 5, 10, 30];
const MUTE_CHOICES: [(&str, u64); 3] = [("1 hour", 1), ("8 hours", 8), ("24 hours", 24)];

#[derive(Debug, Clone)]
enum UserEvent {
    Menu(MenuEvent),
    Hotkey(GlobalHotKeyEvent),
    Overlay(OverlayRequest),
    Update(ShellUpdate),
}

/// Overlay calls from the coordinator thread, replayed on the UI thread.
#[derive(Debug, Clone)]
enum OverlayRequest {
    Open { bounds: Bounds, setup: bool },
    State { setup: bool },
    Show,
    Hide,
    Focus,
    SetBounds(Bounds),
    Close,
}

struct ProxyOverlay {
    proxy: EventLoopProxy<UserEvent>,
}

impl ProxyOverlay {
    fn forward(&self, request: OverlayRequest) -> Result<()> {
        self.proxy
            .send_event(UserEvent::Overlay(request))
            .map_err(|_| anyhow!("window event loop is closed"))
    }
}

impl OverlayWindow for ProxyOverlay {
    fn open(&mut self, bounds: Bounds, setup: bool) -> Result<()> {
        self.forward(OverlayRequest::Open { bounds, setup })
    }

    fn send_state(&mut self, setup: bool) -> Result<()> {
        self.forward(OverlayRequest::State { setup })
    }

    fn show(&mut self) -> Result<()> {
        self.forward(OverlayRequest::Show)
    }

    fn hide(&mut self) -> Result<()> {
        self.forward(OverlayRequest::Hide)
    }

    fn focus(&mut self) -> Result<()> {
        self.forward(OverlayRequest::Focus)
    }

    fn set_bounds(&mut self, bounds: Bounds) -> Result<()> {
        self.forward(OverlayRequest::SetBounds(bounds))
    }

    fn close(&mut self) -> Result<()> {
        self.forward(OverlayRequest::Close)
    }
}

/// The live lock overlay and the PIN typed into it so far.
struct LockOverlay {
    window: Window,
    setup: bool,
    typed: String,
}

impl LockOverlay {
    fn prompt(&self) -> String {
        let action = if self.setup { "Set a PIN" } else { "Enter PIN" };
        format!("{action}: {}", "\u{2022}".repeat(self.typed.chars().count()))
    }

    fn refresh(&self, status_item: &MenuItem) {
        let prompt = self.prompt();
        self.window.set_title(&prompt);
        status_item.set_text(prompt);
    }
}

/// Focus is reported to the coordinator per app, not per window, so moving
/// focus from the main window onto the overlay is not a blur.
#[derive(Debug, Default)]
struct FocusTracker {
    main: bool,
    overlay: bool,
    reported: Option<bool>,
}

impl FocusTracker {
    fn pending_change(&mut self) -> Option<bool> {
        let focused = self.main || self.overlay;
        if self.reported == Some(focused) {
            return None;
        }
        self.reported = Some(focused);
        Some(focused)
    }
}

fn main() -> Result<()> {
    session_shell::init_logging();

    let data_dir = default_data_dir();
    let settings = SettingsStore::open(settings_path(&data_dir))?;
    let initial = settings.get().clone();

    let event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();
    let proxy = event_loop.create_proxy();

    let proxy_for_menu = proxy.clone();
    MenuEvent::set_event_handler(Some(move |event| {
        let _ = proxy_for_menu.send_event(UserEvent::Menu(event));
    }));

    let hotkey_manager = match GlobalHotKeyManager::new() {
        Ok(manager) => Some(manager),
        Err(err) => {
            tracing::warn!(error = %err, "global hotkey unavailable");
            None
        }
    };
    let mut hotkey_id = None;
    if let Some(manager) = hotkey_manager.as_ref() {
        let toggle_window = HotKey::new(Some(Modifiers::CONTROL | Modifiers::ALT), Code::KeyW);
        let id = toggle_window.id();
        match manager.register(toggle_window) {
            Ok(()) => hotkey_id = Some(id),
            Err(err) => tracing::warn!(error = %err, "failed to register Ctrl+Alt+W"),
        }
    }
    let proxy_for_hotkey = proxy.clone();
    GlobalHotKeyEvent::set_event_handler(Some(move |event| {
        let _ = proxy_for_hotkey.send_event(UserEvent::Hotkey(event));
    }));

    let main_window = WindowBuilder::new()
        .with_title("Session Shell")
        .with_inner_size(PhysicalSize::new(1200u32, 800u32))
        .with_always_on_top(initial.always_on_top)
        .build(&event_loop)?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let handle = ShellHandle::new(event_tx.clone());
    spawn_shell(
        ShellConfig {
            initial_window: window_bounds(&main_window),
            ..ShellConfig::new(DownloadPolicy::new(downloads_dir(&data_dir)))
        },
        ProfileRegistry::load(profiles_path(&data_dir)),
        settings,
        PartitionDirBackend::new(partitions_dir(&data_dir)).with_events(event_tx.clone()),
        event_tx,
        event_rx,
        proxy.clone(),
    );

    let status_item = MenuItem::new("Unlocked", false, None);
    let show_item = MenuItem::new("Show window (Ctrl+Alt+W)", true, None);
    let lock_item = MenuItem::new("Lock now", true, None);
    let force_lock_item = MenuItem::new("Lock now (skip session check)", true, None);

    let auto_lock_menu = Submenu::new("Auto-lock", true);
    let auto_lock_items: Vec<(u32, CheckMenuItem)> = AUTO_LOCK_CHOICES
        .iter()
        .map(|&minutes| {
            let label = match minutes {
                0 => "Off".to_string(),
                1 => "1 minute".to_string(),
                n => format!("{n} minutes"),
            };
            let checked = minutes == initial.auto_lock_minutes;
            (minutes, CheckMenuItem::new(label, true, checked, None))
        })
        .collect();
    for (_, item) in &auto_lock_items {
        auto_lock_menu.append(item)?;
    }

    let mute_menu = Submenu::new("Mute notices", true);
    let unmute_item = MenuItem::new("Off", true, None);
    mute_menu.append(&unmute_item)?;
    let mute_items: Vec<(u64, MenuItem)> = MUTE_CHOICES
        .iter()
        .map(|&(label, hours)| (hours, MenuItem::new(label, true, None)))
        .collect();
    for (_, item) in &mute_items {
        mute_menu.append(item)?;
    }

    let presentation_item =
        CheckMenuItem::new("Presentation mode", true, initial.presentation_mode, None);
    let quit_item = MenuItem::new("Quit", true, None);

    let menu = Menu::new();
    menu.append(&status_item)?;
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&show_item)?;
    menu.append(&lock_item)?;
    menu.append(&force_lock_item)?;
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&auto_lock_menu)?;
    menu.append(&mute_menu)?;
    menu.append(&presentation_item)?;
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&quit_item)?;

    let icons = IconSet::new()?;
    let mut tray_icon: Option<TrayIcon> = None;
    let mut overlay: Option<LockOverlay> = None;
    let mut focus = FocusTracker::default();
    let mut window_visible = true;

    event_loop.run(move |event, target, control_flow| {
        *control_flow = ControlFlow::Wait;

        match event {
            Event::NewEvents(StartCause::Init) => {
                if tray_icon.is_none() {
                    match TrayIconBuilder::new()
                        .with_menu(Box::new(menu.clone()))
                        .with_tooltip("Session Shell")
                        .with_icon(icons.icon(LockPhase::Unlocked))
                        .build()
                    {
                        Ok(icon) => tray_icon = Some(icon),
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to create tray icon");
                            status_item.set_text("Tray icon unavailable");
                        }
                    }
                }
            }
            Event::WindowEvent {
                window_id, event, ..
            } if window_id == main_window.id() => match event {
                WindowEvent::Focused(focused) => focus.main = focused,
                WindowEvent::Moved(_) | WindowEvent::Resized(_) => {
                    let _ = handle.send(ShellEvent::WindowGeometry {
                        bounds: window_bounds(&main_window),
                    });
                }
                WindowEvent::CloseRequested => {
                    main_window.set_visible(false);
                    window_visible = false;
                    let _ = handle.send(ShellEvent::WindowVisibility { visible: false });
                }
                WindowEvent::KeyboardInput { .. } | WindowEvent::MouseInput { .. } => {
                    let _ = handle.activity();
                }
                _ => {}
            },
            Event::WindowEvent {
                window_id, event, ..
            } if overlay.as_ref().is_some_and(|o| o.window.id() == window_id) => match event {
                WindowEvent::Focused(focused) => focus.overlay = focused,
                WindowEvent::CloseRequested => {
                    let _ = handle.send(ShellEvent::OverlayCloseRequested);
                }
                WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                    let _ = handle.activity();
                    if let Some(lock) = overlay.as_mut() {
                        match event.logical_key {
                            Key::Enter => {
                                let pin = std::mem::take(&mut lock.typed);
                                let mode = if lock.setup {
                                    PinMode::Setup
                                } else {
                                    PinMode::Unlock
                                };
                                submit_pin(&handle, pin, mode);
                            }
                            Key::Backspace => {
                                lock.typed.pop();
                            }
                            Key::Escape => lock.typed.clear(),
                            Key::Character(text) => lock.typed.push_str(text),
                            _ => {}
                        }
                        lock.refresh(&status_item);
                    }
                }
                _ => {}
            },
            Event::MainEventsCleared => {
                if let Some(focused) = focus.pending_change() {
                    let _ = handle.send(ShellEvent::WindowFocus { focused });
                }
            }
            Event::UserEvent(UserEvent::Overlay(request)) => {
                apply_overlay_request(target, &mut overlay, request, &status_item);
                if overlay.is_none() {
                    focus.overlay = false;
                }
            }
            Event::UserEvent(UserEvent::Update(update)) => match update {
                ShellUpdate::Chrome { current, .. } => {
                    let title = match current {
                        Some(profile) => format!("Session Shell - {profile}"),
                        None => "Session Shell".to_string(),
                    };
                    main_window.set_title(&title);
                }
                ShellUpdate::Phase(phase) => {
                    if let Some(icon) = tray_icon.as_ref() {
                        let _ = icon.set_icon(Some(icons.icon(phase)));
                    }
                    status_item.set_text(phase_label(phase));
                }
                ShellUpdate::Notice(notice) => {
                    status_item.set_text(format!("{}: {}", notice.title(), notice.body()));
                }
                ShellUpdate::PinRejected { message } => {
                    status_item.set_text(message.clone());
                    if let Some(lock) = overlay.as_ref() {
                        lock.window.set_title(&message);
                    }
                }
            },
            Event::UserEvent(UserEvent::Hotkey(hotkey_event)) => {
                let matches = hotkey_id.as_ref().is_some_and(|id| hotkey_event.id == *id);
                if matches && hotkey_event.state == HotKeyState::Pressed {
                    window_visible = !window_visible;
                    set_main_visible(&main_window, &handle, window_visible);
                }
            }
            Event::UserEvent(UserEvent::Menu(menu_event)) => {
                if menu_event.id == show_item.id() {
                    window_visible = true;
                    set_main_visible(&main_window, &handle, true);
                } else if menu_event.id == lock_item.id() {
                    let _ = handle.lock_now(LockTrigger::ManualGated);
                } else if menu_event.id == force_lock_item.id() {
                    let _ = handle.lock_now(LockTrigger::ManualForced);
                } else if menu_event.id == unmute_item.id() {
                    let _ = handle.command(ShellCommand::MuteFor { duration: None });
                    status_item.set_text("Notices unmuted");
                } else if menu_event.id == presentation_item.id() {
                    let _ = handle.command(ShellCommand::SetPresentationMode {
                        enabled: presentation_item.is_checked(),
                    });
                } else if menu_event.id == quit_item.id() {
                    let _ = handle.shutdown();
                    *control_flow = ControlFlow::Exit;
                } else if let Some(&(minutes, _)) = auto_lock_items
                    .iter()
                    .find(|(_, item)| menu_event.id == item.id())
                {
                    for (choice, item) in &auto_lock_items {
                        item.set_checked(*choice == minutes);
                    }
                    let _ = handle.command(ShellCommand::SetAutoLockMinutes { minutes });
                } else if let Some(&(hours, _)) = mute_items
                    .iter()
                    .find(|(_, item)| menu_event.id == item.id())
                {
                    let _ = handle.command(ShellCommand::MuteFor {
                        duration: Some(Duration::from_secs(hours * 3600)),
                    });
                    status_item.set_text(format!("Notices muted for {hours}h"));
                }
            }
            _ => {}
        }
    });
}

fn spawn_shell(
    config: ShellConfig,
    registry: ProfileRegistry,
    settings: SettingsStore,
    backend: PartitionDirBackend,
    event_tx: mpsc::UnboundedSender<ShellEvent>,
    event_rx: mpsc::UnboundedReceiver<ShellEvent>,
    proxy: EventLoopProxy<UserEvent>,
) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(err) => {
                tracing::error!(error = %err, "failed to start coordinator runtime");
                return;
            }
        };

        runtime.block_on(async move {
            let (update_tx, mut update_rx) = mpsc::unbounded_channel();
            let overlay = ProxyOverlay {
                proxy: proxy.clone(),
            };
            let mut shell = Shell::new(
                config,
                registry,
                settings,
                Box::new(backend),
                Box::new(overlay),
                event_tx,
            )
            .with_updates(update_tx);
            shell.start(None);

            tokio::spawn(async move {
                while let Some(update) = update_rx.recv().await {
                    if proxy.send_event(UserEvent::Update(update)).is_err() {
                        break;
                    }
                }
            });
            shell.run(event_rx).await;
        });
    });
}

fn apply_overlay_request(
    target: &EventLoopWindowTarget<UserEvent>,
    overlay: &mut Option<LockOverlay>,
    request: OverlayRequest,
    status_item: &MenuItem,
) {
    match request {
        OverlayRequest::Open { bounds, setup } => {
            let built = WindowBuilder::new()
                .with_decorations(false)
                .with_always_on_top(true)
                .with_resizable(false)
                .with_position(PhysicalPosition::new(bounds.x, bounds.y))
                .with_inner_size(PhysicalSize::new(bounds.width, bounds.height))
                .build(target);
            match built {
                Ok(window) => {
                    let lock = LockOverlay {
                        window,
                        setup,
                        typed: String::new(),
                    };
                    lock.refresh(status_item);
                    *overlay = Some(lock);
                }
                Err(err) => tracing::error!(error = %err, "failed to create lock overlay window"),
            }
        }
        OverlayRequest::State { setup } => {
            if let Some(lock) = overlay.as_mut() {
                lock.setup = setup;
                lock.typed.clear();
                lock.refresh(status_item);
            }
        }
        OverlayRequest::Show => {
            if let Some(lock) = overlay.as_ref() {
                lock.window.set_visible(true);
            }
        }
        OverlayRequest::Hide => {
            if let Some(lock) = overlay.as_ref() {
                lock.window.set_visible(false);
            }
        }
        OverlayRequest::Focus => {
            if let Some(lock) = overlay.as_ref() {
                lock.window.set_focus();
            }
        }
        OverlayRequest::SetBounds(bounds) => {
            if let Some(lock) = overlay.as_ref() {
                lock.window
                    .set_outer_position(PhysicalPosition::new(bounds.x, bounds.y));
                lock.window
                    .set_inner_size(PhysicalSize::new(bounds.width, bounds.height));
            }
        }
        OverlayRequest::Close => {
            // dropping the window closes it
            *overlay = None;
        }
    }
}

fn submit_pin(handle: &ShellHandle, pin: String, mode: PinMode) {
    // rejections come back as ShellUpdate::PinRejected
    let (reply, _) = oneshot::channel();
    let _ = handle.command(ShellCommand::SubmitPin { pin, mode, reply });
}

fn set_main_visible(window: &Window, handle: &ShellHandle, visible: bool) {
    window.set_visible(visible);
    if visible {
        window.set_focus();
    }
    let _ = handle.send(ShellEvent::WindowVisibility { visible });
}

fn window_bounds(window: &Window) -> Bounds {
    let position = window
        .inner_position()
        .unwrap_or_else(|_| PhysicalPosition::new(0, 0));
    let size = window.inner_size();
    Bounds::new(position.x, position.y, size.width, size.height)
}

fn phase_label(phase: LockPhase) -> &'static str {
    match phase {
        LockPhase::Unlocked => "Unlocked",
        LockPhase::SetupPrompt => "Set a PIN to enable locking",
        LockPhase::LockedVisible => "Locked",
        LockPhase::LockedHiddenByBlur => "Locked (hidden while in background)",
    }
}

struct IconSet {
    unlocked: Icon,
    setup: Icon,
    locked: Icon,
}

impl IconSet {
    fn new() -> Result<Self> {
        Ok(Self {
            unlocked: build_state_icon([46, 204, 113])?,
            setup: build_state_icon([255, 179, 0])?,
            locked: build_state_icon([231, 76, 60])?,
        })
    }

    fn icon(&self, phase: LockPhase) -> Icon {
        match phase {
            LockPhase::Unlocked => self.unlocked.clone(),
            LockPhase::SetupPrompt => self.setup.clone(),
            LockPhase::LockedVisible | LockPhase::LockedHiddenByBlur => self.locked.clone(),
        }
    }
}

/// Padlock glyph: shackle outline over a filled body.
fn build_state_icon(fill_rgb: [u8; 3]) -> Result<Icon> {
    let (width, height) = (18usize, 18usize);
    let mut rgba = Vec::with_capacity(width * height * 4);
    let outline = [40, 40, 40, 255];
    let fill = [fill_rgb[0], fill_rgb[1], fill_rgb[2], 255];
    let background = [0, 0, 0, 0];

    for y in 0..height {
        for x in 0..width {
            let in_body = (3..15).contains(&x) && (8..17).contains(&y);
            let body_edge = in_body && (x == 3 || x == 14 || y == 8 || y == 16);
            let shackle = (2..8).contains(&y)
                && ((x == 5 || x == 12) || (y == 2 && (5..13).contains(&x)));
            let pixel = if body_edge || shackle {
                outline
            } else if in_body {
                fill
            } else {
                background
            };
            rgba.extend_from_slice(&pixel);
        }
    }

    Ok(Icon::from_rgba(rgba, width as u32, height as u32)?)
}
