/// Native desktop notifications via the platform notifier command.
/// Fire-and-forget: failures are logged, never surfaced.
use std::process::Command;
use tracing::debug;

#[derive(Clone)]
pub struct TrayNotifier {
    enabled: bool,
}

impl TrayNotifier {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// A notifier that swallows everything (tests, headless runs)
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Raise an OS-level notification
    pub fn notify(&self, title: &str, message: &str, context: &str) {
        if !self.enabled {
            return;
        }
        let body = if context.is_empty() {
            message.to_string()
        } else {
            format!("{}\n{}", message, context)
        };

        #[cfg(target_os = "linux")]
        let result = Command::new("notify-send").arg(title).arg(&body).spawn();

        #[cfg(target_os = "macos")]
        let result = Command::new("osascript")
            .arg("-e")
            .arg(format!(
                "display notification \"{}\" with title \"{}\"",
                body.replace('"', "'"),
                title.replace('"', "'")
            ))
            .spawn();

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        let result: std::io::Result<std::process::Child> = Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no native notifier on this platform",
        ));

        if let Err(e) = result {
            debug!("Native notification unavailable: {}", e);
        }
    }
}

impl Default for TrayNotifier {
    fn default() -> Self {
        Self::new()
    }
}
