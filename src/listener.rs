//! Listener records shared by discovery and the menu

/// A process holding a listening TCP socket, as seen in one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRecord {
    pub pid: String,
    pub command: String,
    pub port: u16,
    pub cwd: String,
    /// Classification attached after probing; 0 until then
    pub http_status: u16,
}

impl ListenerRecord {
    pub fn new(pid: impl Into<String>, command: impl Into<String>, port: u16) -> Self {
        Self {
            pid: pid.into(),
            command: command.into(),
            port,
            cwd: String::new(),
            http_status: 0,
        }
    }

    pub fn with_cwd(mut self, cwd: String) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = status;
        self
    }

    /// Answered with a 4xx/5xx and belongs below the separator
    pub fn is_failing(&self) -> bool {
        self.http_status >= 400
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

/// One row of the menu after grouping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEntry {
    Listener(ListenerRecord),
    /// Boundary between healthy and failing listeners
    Separator,
}
