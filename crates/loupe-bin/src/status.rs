//! Transient status line at the bottom of the window.
//!
//! Messages carry a topic so the originating command can clear its own
//! message without wiping an unrelated one. Only one message is visible;
//! it expires on its own after a few seconds.

use std::time::{Duration, Instant};

const DISPLAY_DURATION: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Plain,
    Warning,
    Error,
}

#[derive(Debug)]
struct Message {
    topic: &'static str,
    text: String,
    severity: Severity,
    expires: Instant,
}

#[derive(Debug, Default)]
pub struct StatusLine {
    current: Option<Message>,
}

impl StatusLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_plain(&mut self, topic: &'static str, text: impl Into<String>) {
        self.show(topic, text, Severity::Plain);
    }

    pub fn show_warning(&mut self, topic: &'static str, text: impl Into<String>) {
        self.show(topic, text, Severity::Warning);
    }

    pub fn show_error(&mut self, topic: &'static str, text: impl Into<String>) {
        self.show(topic, text, Severity::Error);
    }

    fn show(&mut self, topic: &'static str, text: impl Into<String>, severity: Severity) {
        self.current = Some(Message {
            topic,
            text: text.into(),
            severity,
            expires: Instant::now() + DISPLAY_DURATION,
        });
    }

    /// Clear the message, but only when it belongs to the given topic.
    pub fn clear(&mut self, topic: &str) {
        if self.current.as_ref().is_some_and(|m| m.topic == topic) {
            self.current = None;
        }
    }

    /// Drop an expired message; returns true when the display changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.current.as_ref().is_some_and(|m| now >= m.expires) {
            self.current = None;
            true
        } else {
            false
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|m| m.expires)
    }

    pub fn visible(&self) -> Option<(&str, Severity)> {
        self.current
            .as_ref()
            .map(|m| (m.text.as_str(), m.severity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_message_replaces_older() {
        let mut s = StatusLine::new();
        s.show_warning("search", "no match");
        s.show_error("keycmd", "bad key");
        assert_eq!(s.visible().unwrap().1, Severity::Error);
    }

    #[test]
    fn clear_respects_topic() {
        let mut s = StatusLine::new();
        s.show_plain("search", "msg");
        s.clear("keycmd");
        assert!(s.visible().is_some());
        s.clear("search");
        assert!(s.visible().is_none());
    }

    #[test]
    fn message_expires() {
        let mut s = StatusLine::new();
        s.show_plain("search", "msg");
        assert!(!s.tick(Instant::now()));
        assert!(s.tick(Instant::now() + DISPLAY_DURATION + Duration::from_millis(1)));
        assert!(s.visible().is_none());
    }
}
