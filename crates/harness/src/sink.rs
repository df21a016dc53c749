//! Event sinks - write-only narration of setup steps and verdicts
//!
//! Sinks never fail from the caller's point of view; anything that goes wrong
//! inside one is logged and dropped.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Structured narration observer
pub trait EventSink: Send + Sync {
    /// Top-level heading
    fn title(&self, text: &str) {
        self.section(text);
    }

    /// Section heading
    fn section(&self, title: &str);

    /// Heading nested under the current section
    fn subsection(&self, title: &str) {
        self.section(title);
    }

    /// Paragraph of text
    fn line(&self, text: &str);

    /// Preformatted multi-line block
    fn block(&self, text: &str);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn section(&self, _title: &str) {}
    fn line(&self, _text: &str) {}
    fn block(&self, _text: &str) {}
}

/// Mirrors narration into the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn title(&self, text: &str) {
        tracing::info!("=== {} ===", text);
    }

    fn section(&self, title: &str) {
        tracing::info!("== {} ==", title);
    }

    fn subsection(&self, title: &str) {
        tracing::info!("-- {} --", title);
    }

    fn line(&self, text: &str) {
        tracing::info!("{}", text);
    }

    fn block(&self, text: &str) {
        for line in text.lines() {
            tracing::info!("    {}", line);
        }
    }
}

/// Accumulates a markdown document
#[derive(Debug, Default)]
pub struct MarkdownReport {
    lines: Mutex<Vec<String>>,
}

impl MarkdownReport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, chunk: String) {
        self.lines.lock().push(chunk);
    }

    /// Rendered document
    pub fn render(&self) -> String {
        let mut out = self.lines.lock().join("\n\n");
        out.push('\n');
        out
    }

    /// Write the rendered document, replacing any existing file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path.as_ref(), self.render())?;
        tracing::info!("Report written to {:?}", path.as_ref());
        Ok(())
    }
}

impl EventSink for MarkdownReport {
    fn title(&self, text: &str) {
        self.push(format!("# {}", text));
    }

    fn section(&self, title: &str) {
        self.push(format!("## {}", title));
    }

    fn subsection(&self, title: &str) {
        self.push(format!("### {}", title));
    }

    fn line(&self, text: &str) {
        self.push(text.to_string());
    }

    fn block(&self, text: &str) {
        self.push(format!("```\n{}\n```", text.trim_end()));
    }
}

/// Fans every event out to several sinks
#[derive(Default, Clone)]
pub struct Tee {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Tee {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for Tee {
    fn title(&self, text: &str) {
        self.sinks.iter().for_each(|s| s.title(text));
    }

    fn section(&self, title: &str) {
        self.sinks.iter().for_each(|s| s.section(title));
    }

    fn subsection(&self, title: &str) {
        self.sinks.iter().for_each(|s| s.subsection(title));
    }

    fn line(&self, text: &str) {
        self.sinks.iter().for_each(|s| s.line(text));
    }

    fn block(&self, text: &str) {
        self.sinks.iter().for_each(|s| s.block(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_layout() {
        let report = MarkdownReport::new();
        report.title("Database: Replication report");
        report.section("Checking replication");
        report.subsection("On the read-only replica");
        report.line("primary count: `3`");
        report.block("File: log.000001\nPosition: 3\n");

        assert_eq!(
            report.render(),
            "# Database: Replication report\n\n## Checking replication\n\n\
             ### On the read-only replica\n\nprimary count: `3`\n\n\
             ```\nFile: log.000001\nPosition: 3\n```\n"
        );
    }

    #[test]
    fn test_tee_reaches_every_sink() {
        let a = Arc::new(MarkdownReport::new());
        let b = Arc::new(MarkdownReport::new());
        let tee = Tee::new().with(a.clone()).with(b.clone()).with(Arc::new(NullSink));
        tee.section("Setup");
        tee.line("hello");
        assert_eq!(a.render(), b.render());
        assert!(a.render().contains("## Setup"));
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("REPORT.md");
        let report = MarkdownReport::new();
        report.title("Report");
        report.write_to_file(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Report\n");
    }
}
