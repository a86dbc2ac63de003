//! Full-dump persistence of the per-user message logs
//!
//! The registry copies its logs into a `LogDump` while holding the lock;
//! the file is written afterwards so a slow disk never stalls other sessions.
//! Every dump overwrites the previous file completely.

use std::path::Path;

/// Rendered copy of every user's log, in name order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogDump {
    sections: Vec<(String, Vec<String>)>,
}

impl LogDump {
    pub fn new(sections: Vec<(String, Vec<String>)>) -> Self {
        Self { sections }
    }

    pub fn user_count(&self) -> usize {
        self.sections.len()
    }

    /// One section per user: a header line, that user's lines, a blank line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, lines) in &self.sections {
            out.push_str(&format!("Log for {}:\n", name));
            for line in lines {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }

    /// Writes the dump to `path`, replacing any earlier dump
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::write(path, self.render()).await
    }
}
