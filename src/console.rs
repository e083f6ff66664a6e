use crate::lock::LockTrigger;
use crate::surface::Bounds;
use std::time::Duration;

pub const HELP: &str = "commands: activate <p> | create <p> | rename <old> <new> | delete <p> | list \
| status <p> <true|false> | loaded <p> | activity | focus | blur | resize <x> <y> <w> <h> \
| lock [gated|forced] | pin <pin> | setup <pin> | close-overlay | mute <duration|off> \
| present <on|off> | download <p> <file> | state | quit (quote names containing spaces)";

/// One line of the headless console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Activate(String),
    Create(String),
    Rename { from: String, to: String },
    Delete(String),
    List,
    Status { profile: String, authenticated: bool },
    Loaded(String),
    Activity,
    Focus,
    Blur,
    Resize(Bounds),
    Lock(LockTrigger),
    Pin(String),
    Setup(String),
    CloseOverlay,
    /// `None` unmutes.
    Mute(Option<Duration>),
    Present(bool),
    Download { profile: String, file_name: String },
    State,
    Quit,
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let words = split_words(line)?;
    let Some((verb, rest)) = words.split_first() else {
        return Ok(None);
    };
    let args: Vec<&str> = rest.iter().map(String::as_str).collect();

    let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("activate", [name]) => ConsoleCommand::Activate(name.to_string()),
        ("create", [name]) => ConsoleCommand::Create(name.to_string()),
        ("rename", [from, to]) => ConsoleCommand::Rename {
            from: from.to_string(),
            to: to.to_string(),
        },
        ("delete", [name]) => ConsoleCommand::Delete(name.to_string()),
        ("list", []) => ConsoleCommand::List,
        ("status", [profile, value]) => ConsoleCommand::Status {
            profile: profile.to_string(),
            authenticated: parse_bool(value)?,
        },
        ("loaded", [profile]) => ConsoleCommand::Loaded(profile.to_string()),
        ("activity", []) => ConsoleCommand::Activity,
        ("focus", []) => ConsoleCommand::Focus,
        ("blur", []) => ConsoleCommand::Blur,
        ("resize", [x, y, w, h]) => ConsoleCommand::Resize(Bounds::new(
            parse_number(x)?,
            parse_number(y)?,
            parse_number(w)?,
            parse_number(h)?,
        )),
        ("lock", []) | ("lock", ["gated"]) => ConsoleCommand::Lock(LockTrigger::ManualGated),
        ("lock", ["forced"]) => ConsoleCommand::Lock(LockTrigger::ManualForced),
        // raw remainder; unlock does its own trimming
        ("pin", [_, ..]) => ConsoleCommand::Pin(rest_after_verb(line)),
        ("setup", [pin]) => ConsoleCommand::Setup(pin.to_string()),
        ("close-overlay", []) => ConsoleCommand::CloseOverlay,
        ("mute", ["off"]) => ConsoleCommand::Mute(None),
        ("mute", [duration]) => ConsoleCommand::Mute(Some(
            humantime::parse_duration(duration).map_err(|e| e.to_string())?,
        )),
        ("present", [value]) => ConsoleCommand::Present(parse_bool(value)?),
        ("download", [profile, file_name]) => ConsoleCommand::Download {
            profile: profile.to_string(),
            file_name: file_name.to_string(),
        },
        ("state", []) => ConsoleCommand::State,
        ("quit" | "exit" | "stop", []) => ConsoleCommand::Quit,
        _ => return Err(format!("unrecognised input `{}`. {HELP}", line.trim())),
    };
    Ok(Some(command))
}

/// Whitespace-separated words; double quotes group a word with spaces.
fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quoted {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn rest_after_verb(line: &str) -> String {
    let trimmed = line.trim_start();
    let verb_len = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
    trimmed[verb_len..].trim_start_matches(' ').to_string()
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(format!("expected true or false, got `{other}`")),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("expected a number, got `{value}`"))
}

#[cfg(test)]
mod tests {
    use super::{ConsoleCommand, parse_line};
    use crate::lock::LockTrigger;
    use crate::surface::Bounds;
    use std::time::Duration;

    #[test]
    fn parses_profile_commands() {
        assert_eq!(
            parse_line("rename default home").expect("parse"),
            Some(ConsoleCommand::Rename {
                from: "default".to_string(),
                to: "home".to_string()
            })
        );
        assert_eq!(
            parse_line("  ACTIVATE work ").expect("parse"),
            Some(ConsoleCommand::Activate("work".to_string()))
        );
        assert_eq!(parse_line("   ").expect("blank"), None);
    }

    #[test]
    fn quoted_names_keep_their_spaces() {
        assert_eq!(
            parse_line(r#"rename "my work" "side project""#).expect("parse"),
            Some(ConsoleCommand::Rename {
                from: "my work".to_string(),
                to: "side project".to_string()
            })
        );
        assert_eq!(
            parse_line(r#"create "home office""#).expect("parse"),
            Some(ConsoleCommand::Create("home office".to_string()))
        );
        assert!(parse_line(r#"create "home"#).is_err());
    }

    #[test]
    fn lock_defaults_to_gated() {
        assert_eq!(
            parse_line("lock").expect("parse"),
            Some(ConsoleCommand::Lock(LockTrigger::ManualGated))
        );
        assert_eq!(
            parse_line("lock forced").expect("parse"),
            Some(ConsoleCommand::Lock(LockTrigger::ManualForced))
        );
    }

    #[test]
    fn parses_window_and_status_events() {
        assert_eq!(
            parse_line("resize 10 20 800 600").expect("parse"),
            Some(ConsoleCommand::Resize(Bounds::new(10, 20, 800, 600)))
        );
        assert_eq!(
            parse_line("status work false").expect("parse"),
            Some(ConsoleCommand::Status {
                profile: "work".to_string(),
                authenticated: false
            })
        );
        assert!(parse_line("resize 10 20 -800 600").is_err());
        assert!(parse_line("status work maybe").is_err());
    }

    #[test]
    fn unlock_pin_keeps_surrounding_text() {
        assert_eq!(
            parse_line("pin 1234 ").expect("parse"),
            Some(ConsoleCommand::Pin("1234 ".to_string()))
        );
    }

    #[test]
    fn mute_takes_human_durations() {
        assert_eq!(
            parse_line("mute 8h").expect("parse"),
            Some(ConsoleCommand::Mute(Some(Duration::from_secs(8 * 3600))))
        );
        assert_eq!(
            parse_line("mute off").expect("parse"),
            Some(ConsoleCommand::Mute(None))
        );
        assert!(parse_line("mute forever").is_err());
    }

    #[test]
    fn unknown_input_lists_commands() {
        let err = parse_line("dance").expect_err("unknown");
        assert!(err.contains("close-overlay"));
    }
}
