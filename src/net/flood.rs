//! Outbound rate limiting with deferred delivery.
//!
//! Unlike a rejecting limiter, a tripped [`FloodGuard`] never drops a
//! line: overflow is parked in order and replayed once the trailing
//! window has room again.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

/// Hard cap on a single line, including room for framing overhead.
pub const MAX_LINE_LEN: usize = 510;

/// Sliding-window rate limiter over outbound lines.
pub struct FloodGuard {
    window: Duration,
    max_lines: usize,
    send_times: VecDeque<Instant>,
    buffer: VecDeque<String>,
    active: bool,
}

impl FloodGuard {
    /// Limiter allowing `max_lines` sends per trailing `window`.
    pub fn new(window: Duration, max_lines: usize) -> Self {
        Self {
            window,
            max_lines,
            send_times: VecDeque::new(),
            buffer: VecDeque::new(),
            active: false,
        }
    }

    /// Whether the guard is currently holding lines back.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Lines currently parked.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Submit a line. Delivered through `sink` immediately when under
    /// the limit, otherwise parked in arrival order. Once tripped, the
    /// guard stays tripped until a [`FloodGuard::tick`] replay
    /// succeeds, so ordering is preserved across the burst.
    pub fn send_line(&mut self, now: Instant, line: &str, sink: &mut dyn FnMut(&str)) {
        while let Some(&front) = self.send_times.front() {
            if now.duration_since(front) > self.window {
                self.send_times.pop_front();
            } else {
                break;
            }
        }

        if self.active || self.send_times.len() > self.max_lines {
            if !self.active {
                debug!(buffered = self.buffer.len() + 1, "flood guard tripped");
            }
            self.active = true;
            self.buffer.push_back(line.to_string());
            return;
        }

        self.send_times.push_back(now);
        sink(truncate_line(line));
    }

    /// Replay parked lines through the limiter. Lines that still do
    /// not fit re-trip the guard and stay parked, in order.
    pub fn tick(&mut self, now: Instant, sink: &mut dyn FnMut(&str)) {
        if !self.active {
            return;
        }
        let parked = std::mem::take(&mut self.buffer);
        self.active = false;
        for line in parked {
            self.send_line(now, &line, sink);
        }
    }
}

fn truncate_line(line: &str) -> &str {
    &line[..floor_char_boundary(line, MAX_LINE_LEN)]
}

/// Largest index `<= max` that falls on a char boundary of `s`.
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(sink: &mut Vec<String>) -> impl FnMut(&str) + '_ {
        |line: &str| sink.push(line.to_string())
    }

    #[test]
    fn test_burst_over_limit_parks_overflow() {
        let now = Instant::now();
        let mut guard = FloodGuard::new(Duration::from_secs(9), 9);
        let mut sent = Vec::new();

        for n in 0..15 {
            guard.send_line(now, &format!("line {n}"), &mut collect(&mut sent));
        }

        assert_eq!(sent.len(), 10);
        assert_eq!(guard.buffered(), 5);
        assert!(guard.is_active());
        assert_eq!(sent[0], "line 0");
        assert_eq!(sent[9], "line 9");
    }

    #[test]
    fn test_tick_within_window_re_trips() {
        let now = Instant::now();
        let mut guard = FloodGuard::new(Duration::from_secs(9), 9);
        let mut sent = Vec::new();
        for n in 0..15 {
            guard.send_line(now, &format!("line {n}"), &mut collect(&mut sent));
        }
        sent.clear();

        guard.tick(now + Duration::from_secs(1), &mut collect(&mut sent));
        assert!(sent.is_empty());
        assert_eq!(guard.buffered(), 5);
        assert!(guard.is_active());
    }

    #[test]
    fn test_tick_after_window_drains_in_order() {
        let now = Instant::now();
        let mut guard = FloodGuard::new(Duration::from_secs(9), 9);
        let mut sent = Vec::new();
        for n in 0..15 {
            guard.send_line(now, &format!("line {n}"), &mut collect(&mut sent));
        }
        sent.clear();

        guard.tick(now + Duration::from_secs(10), &mut collect(&mut sent));
        assert_eq!(
            sent,
            vec!["line 10", "line 11", "line 12", "line 13", "line 14"]
        );
        assert!(!guard.is_active());
        assert_eq!(guard.buffered(), 0);
    }

    #[test]
    fn test_tripped_guard_parks_even_under_limit() {
        let now = Instant::now();
        let mut guard = FloodGuard::new(Duration::from_secs(9), 2);
        let mut sent = Vec::new();
        for n in 0..5 {
            guard.send_line(now, &format!("line {n}"), &mut collect(&mut sent));
        }
        sent.clear();

        // Still inside the window: newly submitted lines queue behind
        // the parked ones rather than jumping ahead.
        guard.send_line(now + Duration::from_secs(1), "late", &mut collect(&mut sent));
        assert!(sent.is_empty());
        assert_eq!(guard.buffered(), 3);
    }

    #[test]
    fn test_long_line_truncated_at_char_boundary() {
        let now = Instant::now();
        let mut guard = FloodGuard::new(Duration::from_secs(9), 9);
        let mut sent = Vec::new();

        // 509 ASCII bytes then a 2-byte char straddling the cap.
        let line = format!("{}é", "a".repeat(509));
        guard.send_line(now, &line, &mut collect(&mut sent));
        assert_eq!(sent[0].len(), 509);
        assert!(sent[0].chars().all(|c| c == 'a'));
    }

    #[test]
    fn test_window_expiry_frees_budget() {
        let start = Instant::now();
        let mut guard = FloodGuard::new(Duration::from_secs(9), 1);
        let mut sent = Vec::new();

        guard.send_line(start, "a", &mut collect(&mut sent));
        guard.send_line(start, "b", &mut collect(&mut sent));
        // Old sends fall out of the trailing window.
        guard.send_line(start + Duration::from_secs(10), "c", &mut collect(&mut sent));
        assert_eq!(sent, vec!["a", "b", "c"]);
    }
}
