use crate::settings::Settings;

/// Non-blocking user notices raised by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Idle timer fired while the window was in the background.
    AutoLockEngaged,
    CannotLockNotAuthenticated,
    DownloadComplete { file_name: String },
}

impl Notice {
    pub fn title(&self) -> &str {
        match self {
            Notice::AutoLockEngaged => "Auto-lock engaged",
            Notice::CannotLockNotAuthenticated => "Cannot lock",
            Notice::DownloadComplete { .. } => "Download complete",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notice::AutoLockEngaged => "The app will lock when you return".to_string(),
            Notice::CannotLockNotAuthenticated => "You must log in before locking".to_string(),
            Notice::DownloadComplete { file_name } => file_name.clone(),
        }
    }
}

/// Whether notices may be shown now given the mute window and
/// presentation mode.
pub fn should_deliver(settings: &Settings, now_ms: i64) -> bool {
    !settings.notices_suppressed_at(now_ms)
}

#[cfg(test)]
mod tests {
    use super::{Notice, should_deliver};
    use crate::settings::Settings;

    #[test]
    fn download_notice_carries_file_name() {
        let notice = Notice::DownloadComplete {
            file_name: "invoice.pdf".to_string(),
        };
        assert_eq!(notice.title(), "Download complete");
        assert_eq!(notice.body(), "invoice.pdf");
    }

    #[test]
    fn delivery_respects_mute_window() {
        let mut settings = Settings::default();
        assert!(should_deliver(&settings, 10));
        settings.mute_until_ms = 100;
        assert!(!should_deliver(&settings, 10));
        assert!(should_deliver(&settings, 101));
    }
}
