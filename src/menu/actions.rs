//! Fire-and-forget OS actions triggered from the menu

use tracing::debug;

pub trait SystemActions: Send + Sync {
    fn open_url(&self, url: &str);
    fn copy_text(&self, text: &str);
    /// Forcefully terminate `pid`
    fn terminate(&self, pid: &str);
}

/// Browser, clipboard and signals of the host OS. Failures are only logged.
pub struct OsActions;

impl SystemActions for OsActions {
    fn open_url(&self, url: &str) {
        if let Err(e) = open::that(url) {
            debug!("Failed to open {}: {}", url, e);
        }
    }

    fn copy_text(&self, text: &str) {
        let copied = arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(text.to_string()));
        if let Err(e) = copied {
            debug!("Failed to copy to clipboard: {}", e);
        }
    }

    #[cfg(unix)]
    fn terminate(&self, pid: &str) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // 0 and negatives address process groups
        let raw = match pid.parse::<i32>() {
            Ok(raw) if raw > 0 => raw,
            _ => {
                debug!("Not a pid: {}", pid);
                return;
            }
        };
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGKILL) {
            debug!("Failed to kill {}: {}", pid, e);
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, pid: &str) {
        debug!("Process termination unsupported on this platform (pid {})", pid);
    }
}
