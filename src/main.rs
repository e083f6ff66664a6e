use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use session_shell::console::{ConsoleCommand, HELP, parse_line};
use session_shell::events::{ShellCommand, ShellEvent, ShellHandle, ShellUpdate};
use session_shell::focus::OverlayWindow;
use session_shell::lock::PinMode;
use session_shell::paths::{
    default_data_dir, downloads_dir, partitions_dir, profiles_path, settings_path,
};
use session_shell::pin::{hash_pin, validate_new_pin};
use session_shell::profiles::{ProfileRegistry, ProfileResponse};
use session_shell::settings::SettingsStore;
use session_shell::shell::{Shell, ShellConfig};
use session_shell::surface::{
    Bounds, DownloadPolicy, PartitionDirBackend, SurfaceBackend, partition_for,
};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Debug, Parser)]
#[command(name = "session-shell")]
#[command(about = "Multi-profile session shell with PIN lock and auto-lock")]
struct Cli {
    /// Overrides the data directory for this invocation.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand)]
    Profiles(ProfileCommand),
    #[command(subcommand)]
    Pin(PinCommand),
    #[command(subcommand)]
    Lock(LockCommand),
    /// Prints the resolved storage locations.
    Paths,
    /// Runs the coordinator headless.
    Run(RunArgs),
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    List,
    Create { name: String },
    Rename { old_name: String, new_name: String },
    Delete { name: String },
}

#[derive(Debug, Subcommand)]
enum PinCommand {
    /// Stores a new PIN and enables locking.
    Set { pin: String },
}

#[derive(Debug, Subcommand)]
enum LockCommand {
    Enable,
    Disable,
    /// Idle minutes before auto-lock; 0 turns auto-lock off.
    Minutes { minutes: u32 },
}

#[derive(Debug, Args, Clone)]
struct RunArgs {
    /// Profile to activate first.
    #[arg(long)]
    profile: Option<String>,

    #[arg(long, action = ArgAction::SetTrue)]
    interactive: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    session_shell::init_logging();
    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::Profiles(command) => run_profiles(&data_dir, command).await,
        Commands::Pin(PinCommand::Set { pin }) => {
            validate_new_pin(&pin)?;
            let mut settings = SettingsStore::open(settings_path(&data_dir))?;
            settings.update(|s| {
                s.pin_hash = Some(hash_pin(&pin));
                s.lock_enabled = true;
            })?;
            println!("PIN saved; locking enabled");
            Ok(())
        }
        Commands::Lock(command) => {
            let mut settings = SettingsStore::open(settings_path(&data_dir))?;
            match command {
                LockCommand::Enable => {
                    if !settings.get().lock_config().has_pin() {
                        eprintln!("no PIN is set; run `session-shell pin set <pin>` before the lock can engage");
                    }
                    settings.update(|s| s.lock_enabled = true)?;
                }
                LockCommand::Disable => settings.update(|s| s.lock_enabled = false)?,
                LockCommand::Minutes { minutes } => {
                    settings.update(|s| s.auto_lock_minutes = minutes)?
                }
            }
            let config = settings.get().lock_config();
            println!(
                "lock enabled: {}, auto-lock minutes: {}, PIN set: {}",
                config.enabled,
                config.auto_lock_minutes,
                config.has_pin()
            );
            Ok(())
        }
        Commands::Paths => {
            println!("data:       {}", data_dir.display());
            println!("settings:   {}", settings_path(&data_dir).display());
            println!("profiles:   {}", profiles_path(&data_dir).display());
            println!("downloads:  {}", downloads_dir(&data_dir).display());
            println!("partitions: {}", partitions_dir(&data_dir).display());
            Ok(())
        }
        Commands::Run(args) => run_shell(&data_dir, args).await,
    }
}

async fn run_profiles(data_dir: &Path, command: ProfileCommand) -> Result<()> {
    let mut registry = ProfileRegistry::load(profiles_path(data_dir));
    let mut storage = PartitionDirBackend::new(partitions_dir(data_dir));

    match command {
        ProfileCommand::List => {}
        ProfileCommand::Create { name } => {
            let name = registry.create(&name)?;
            println!("created {name}");
        }
        ProfileCommand::Rename { old_name, new_name } => {
            let (old_name, new_name) = registry.validate_rename(&old_name, &new_name)?;
            clear_partition(&mut storage, &old_name).await;
            registry.rename(&old_name, &new_name)?;
            println!("renamed {old_name} to {new_name}; its session storage was cleared");
        }
        ProfileCommand::Delete { name } => {
            let name = registry.validate_delete(&name)?;
            clear_partition(&mut storage, &name).await;
            registry.delete(&name)?;
            println!("deleted {name}");
        }
    }

    for (index, name) in registry.list().iter().enumerate() {
        println!("{:>2}. {name}", index + 1);
    }
    Ok(())
}

/// A failed wipe leaves the partition orphaned; the registry change goes ahead.
async fn clear_partition(storage: &mut PartitionDirBackend, profile: &str) {
    let partition = partition_for(profile);
    if let Err(err) = storage.clear_storage(&partition).await {
        tracing::warn!(
            %profile,
            %partition,
            error = %format!("{err:#}"),
            "failed to clear profile storage; partition left orphaned"
        );
    }
}

async fn run_shell(data_dir: &Path, args: RunArgs) -> Result<()> {
    let registry = ProfileRegistry::load(profiles_path(data_dir));
    let settings = SettingsStore::open(settings_path(data_dir))?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();

    let backend = PartitionDirBackend::new(partitions_dir(data_dir)).with_events(event_tx.clone());
    let mut shell = Shell::new(
        ShellConfig::new(DownloadPolicy::new(downloads_dir(data_dir))),
        registry,
        settings,
        Box::new(backend),
        Box::new(ConsoleOverlay),
        event_tx,
    )
    .with_updates(update_tx);
    shell.start(args.profile.as_deref());
    let handle = shell.handle();

    let update_handle = tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            match update {
                ShellUpdate::Chrome { profiles, current } => {
                    println!(
                        "profiles: {} (current: {})",
                        profiles.join(", "),
                        current.as_deref().unwrap_or("-")
                    )
                }
                ShellUpdate::Phase(phase) => println!("lock phase: {phase:?}"),
                ShellUpdate::Notice(notice) => {
                    println!("notice: {} - {}", notice.title(), notice.body())
                }
                ShellUpdate::PinRejected { message } => eprintln!("PIN rejected: {message}"),
            }
        }
    });

    let shell_task = tokio::spawn(shell.run(event_rx));

    if args.interactive {
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        tokio::task::spawn_blocking(move || {
            eprintln!("{HELP}");
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });

        while let Some(line) = line_rx.recv().await {
            match parse_line(&line) {
                Ok(Some(ConsoleCommand::Quit)) => break,
                Ok(Some(command)) => {
                    if let Err(err) = run_console_command(&handle, command).await {
                        eprintln!("{err:#}");
                    }
                }
                Ok(None) => {}
                Err(message) => eprintln!("{message}"),
            }
            if handle.is_closed() {
                break;
            }
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
    }

    let _ = handle.shutdown();
    shell_task.await.context("coordination loop failed")?;
    drop(handle);
    update_handle.await.context("update task failed")?;
    Ok(())
}

async fn run_console_command(handle: &ShellHandle, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::Activate(name) => print_response(handle.activate(&name).await?),
        ConsoleCommand::Create(name) => print_response(handle.create_profile(&name).await?),
        ConsoleCommand::Rename { from, to } => {
            print_response(handle.rename_profile(&from, &to).await?)
        }
        ConsoleCommand::Delete(name) => print_response(handle.delete_profile(&name).await?),
        ConsoleCommand::List => print_response(handle.list_profiles().await?),
        ConsoleCommand::Status {
            profile,
            authenticated,
        } => handle.send(ShellEvent::SessionStatus {
            profile,
            authenticated,
        })?,
        ConsoleCommand::Loaded(profile) => handle.send(ShellEvent::SurfaceLoaded { profile })?,
        ConsoleCommand::Activity => handle.activity()?,
        ConsoleCommand::Focus => handle.send(ShellEvent::WindowFocus { focused: true })?,
        ConsoleCommand::Blur => handle.send(ShellEvent::WindowFocus { focused: false })?,
        ConsoleCommand::Resize(bounds) => handle.send(ShellEvent::WindowGeometry { bounds })?,
        ConsoleCommand::Lock(trigger) => handle.lock_now(trigger)?,
        ConsoleCommand::Pin(pin) => {
            handle.submit_pin(&pin, PinMode::Unlock).await?;
            println!("unlocked");
        }
        ConsoleCommand::Setup(pin) => {
            handle.submit_pin(&pin, PinMode::Setup).await?;
            println!("PIN saved");
        }
        ConsoleCommand::CloseOverlay => handle.send(ShellEvent::OverlayCloseRequested)?,
        ConsoleCommand::Mute(duration) => handle.command(ShellCommand::MuteFor { duration })?,
        ConsoleCommand::Present(enabled) => {
            handle.command(ShellCommand::SetPresentationMode { enabled })?
        }
        ConsoleCommand::Download { profile, file_name } => {
            let path = handle.start_download(&profile, &file_name).await?;
            println!("saving to {}", path.display());
            handle.send(ShellEvent::DownloadFinished {
                profile,
                file_name,
                completed: true,
            })?;
        }
        ConsoleCommand::State => {
            let state = handle.state().await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        ConsoleCommand::Quit => bail!("quit is handled by the console loop"),
    }
    Ok(())
}

fn print_response(response: ProfileResponse) {
    match serde_json::to_string(&response) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to encode response: {err}"),
    }
}

/// Overlay stand-in for headless runs: reports what a window would show.
struct ConsoleOverlay;

impl OverlayWindow for ConsoleOverlay {
    fn open(&mut self, bounds: Bounds, setup: bool) -> Result<()> {
        let mode = if setup { "set a PIN" } else { "enter PIN" };
        println!(
            "[overlay] {mode} ({}x{} at {},{})",
            bounds.width, bounds.height, bounds.x, bounds.y
        );
        Ok(())
    }

    fn send_state(&mut self, setup: bool) -> Result<()> {
        println!("[overlay] mode: {}", if setup { "setup" } else { "unlock" });
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        Ok(())
    }

    fn hide(&mut self) -> Result<()> {
        println!("[overlay] hidden while window is in background");
        Ok(())
    }

    fn focus(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_bounds(&mut self, _bounds: Bounds) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        println!("[overlay] closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ProfileCommand, run_profiles};
    use session_shell::paths::{partitions_dir, profiles_path};
    use session_shell::profiles::ProfileRegistry;
    use tempfile::tempdir;

    #[tokio::test]
    async fn delete_goes_ahead_when_storage_cannot_be_cleared() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(profiles_path(dir.path()), r#"["default", "work"]"#).expect("profiles");
        // a plain file where the partitions directory should be
        std::fs::write(partitions_dir(dir.path()), "").expect("blocker");

        run_profiles(
            dir.path(),
            ProfileCommand::Delete {
                name: "work".to_string(),
            },
        )
        .await
        .expect("delete");

        let registry = ProfileRegistry::load(profiles_path(dir.path()));
        assert_eq!(registry.list(), vec!["default"]);
    }
}
