//! Notification delivery through platform command line tools.
//!
//! - macOS: `terminal-notifier`, falling back to `osascript`. DND is read
//!   from `defaults read com.apple.notificationcenterui doNotDisturb`.
//! - Linux: `notify-send`. DND is read from the GNOME `show-banners` key.
//!
//! Every command runs under a timeout and is killed if it overruns.

use std::time::{Duration, Instant};

use posture_core::notifier::{DeliveryError, Notification, Notifier};
use tokio::process::Command;

/// Timeout for posting a notification.
pub const POST_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for the DND query.
pub const DND_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum characters of any notification field passed to a command.
const MAX_FIELD_CHARS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
    Unsupported,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unsupported
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
            Platform::Unsupported => "unsupported",
        }
    }
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: &'static str,
    pub args: Vec<String>,
}

/// Strip control characters and cap length. Arguments are passed directly
/// to the program, never through a shell.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .take(MAX_FIELD_CHARS)
        .collect()
}

/// Escape text for inclusion in an AppleScript string literal.
fn applescript_quote(text: &str) -> String {
    let escaped = sanitize(text).replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Commands to try in order for posting `notification` on `platform`.
pub fn post_commands(platform: Platform, notification: &Notification) -> Vec<CommandSpec> {
    let title = sanitize(&notification.title);
    let message = sanitize(&notification.message);
    let subtitle = notification.subtitle.as_deref().map(sanitize);

    match platform {
        Platform::MacOs => {
            let mut tn_args = vec!["-title".to_string(), title, "-message".to_string(), message];
            if let Some(sub) = &subtitle {
                tn_args.push("-subtitle".to_string());
                tn_args.push(sub.clone());
            }

            let mut script = format!(
                "display notification {} with title {}",
                applescript_quote(&notification.message),
                applescript_quote(&notification.title),
            );
            if let Some(sub) = &notification.subtitle {
                script.push_str(&format!(" subtitle {}", applescript_quote(sub)));
            }

            vec![
                CommandSpec {
                    program: "terminal-notifier",
                    args: tn_args,
                },
                CommandSpec {
                    program: "osascript",
                    args: vec!["-e".to_string(), script],
                },
            ]
        }
        Platform::Linux => {
            let body = match subtitle {
                Some(sub) => format!("{sub}\n{message}"),
                None => message,
            };
            vec![CommandSpec {
                program: "notify-send",
                args: vec!["--app-name=posture-agent".to_string(), title, body],
            }]
        }
        Platform::Unsupported => Vec::new(),
    }
}

/// Command that reports DND state on `platform`, if any.
pub fn dnd_command(platform: Platform) -> Option<CommandSpec> {
    match platform {
        Platform::MacOs => Some(CommandSpec {
            program: "defaults",
            args: vec![
                "read".to_string(),
                "com.apple.notificationcenterui".to_string(),
                "doNotDisturb".to_string(),
            ],
        }),
        Platform::Linux => Some(CommandSpec {
            program: "gsettings",
            args: vec![
                "get".to_string(),
                "org.gnome.desktop.notifications".to_string(),
                "show-banners".to_string(),
            ],
        }),
        Platform::Unsupported => None,
    }
}

/// Interpret DND command output. Anything unexpected means "not active".
pub fn parse_dnd_output(platform: Platform, stdout: &str) -> bool {
    let value = stdout.trim();
    match platform {
        Platform::MacOs => value == "1",
        Platform::Linux => value == "false",
        Platform::Unsupported => false,
    }
}

async fn run(spec: &CommandSpec, timeout: Duration) -> Result<std::process::Output, DeliveryError> {
    let start = Instant::now();
    let result = tokio::time::timeout(
        timeout,
        Command::new(spec.program)
            .args(&spec.args)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match result {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(
            DeliveryError::Unavailable(format!("{} not found", spec.program)),
        ),
        Ok(Err(e)) => Err(DeliveryError::Io(e)),
        Err(_) => Err(DeliveryError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}

/// Posts notifications by running platform tools.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    platform: Platform,
    post_timeout: Duration,
    dnd_timeout: Duration,
}

impl CommandNotifier {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            post_timeout: POST_TIMEOUT,
            dnd_timeout: DND_TIMEOUT,
        }
    }

    pub fn for_current_platform() -> Self {
        Self::new(Platform::current())
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }
}

impl Notifier for CommandNotifier {
    async fn post(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let commands = post_commands(self.platform, notification);
        let mut last_error = DeliveryError::Unavailable(format!(
            "no notification backend for platform {}",
            self.platform.as_str()
        ));

        for spec in &commands {
            match run(spec, self.post_timeout).await {
                Ok(output) if output.status.success() => {
                    tracing::debug!(program = spec.program, "Notification posted");
                    return Ok(());
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    tracing::warn!(program = spec.program, stderr = %stderr, "Notification command failed");
                    last_error = DeliveryError::Failed {
                        exit_code: output.status.code().unwrap_or(-1),
                        stderr,
                    };
                }
                Err(e) => {
                    tracing::debug!(program = spec.program, error = %e, "Notification backend unusable");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn is_dnd_active(&self) -> bool {
        let Some(spec) = dnd_command(self.platform) else {
            return false;
        };
        match run(&spec, self.dnd_timeout).await {
            Ok(output) if output.status.success() => {
                parse_dnd_output(self.platform, &String::from_utf8_lossy(&output.stdout))
            }
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(error = %e, "DND query failed, assuming inactive");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macos_tries_terminal_notifier_then_osascript() {
        let n = Notification::new("Posture check", "Sit up").with_subtitle("DND ended");
        let cmds = post_commands(Platform::MacOs, &n);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].program, "terminal-notifier");
        assert_eq!(
            cmds[0].args,
            vec!["-title", "Posture check", "-message", "Sit up", "-subtitle", "DND ended"]
        );
        assert_eq!(cmds[1].program, "osascript");
        assert_eq!(
            cmds[1].args[1],
            "display notification \"Sit up\" with title \"Posture check\" subtitle \"DND ended\""
        );
    }

    #[test]
    fn applescript_quotes_are_escaped() {
        let n = Notification::new("T", r#"say "hi" \ bye"#);
        let cmds = post_commands(Platform::MacOs, &n);
        assert!(cmds[1].args[1].contains(r#""say \"hi\" \\ bye""#));
    }

    #[test]
    fn control_characters_stripped_and_length_capped() {
        let long = "a".repeat(1000);
        let n = Notification::new("Ti\ntle", long);
        let cmds = post_commands(Platform::Linux, &n);
        assert_eq!(cmds[0].program, "notify-send");
        assert_eq!(cmds[0].args[1], "Title");
        assert_eq!(cmds[0].args[2].chars().count(), MAX_FIELD_CHARS);
    }

    #[test]
    fn unsupported_platform_has_no_commands() {
        let n = Notification::new("T", "M");
        assert!(post_commands(Platform::Unsupported, &n).is_empty());
        assert!(dnd_command(Platform::Unsupported).is_none());
    }

    #[test]
    fn dnd_output_parsing() {
        assert!(parse_dnd_output(Platform::MacOs, "1\n"));
        assert!(!parse_dnd_output(Platform::MacOs, "0\n"));
        assert!(!parse_dnd_output(Platform::MacOs, ""));
        assert!(parse_dnd_output(Platform::Linux, "false\n"));
        assert!(!parse_dnd_output(Platform::Linux, "true\n"));
    }

    #[tokio::test]
    async fn unsupported_platform_post_is_unavailable() {
        let notifier = CommandNotifier::new(Platform::Unsupported);
        let err = notifier
            .post(&Notification::new("T", "M"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Unavailable(_)));
        assert!(!notifier.is_dnd_active().await);
    }
}
