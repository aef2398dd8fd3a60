//! Per-seat disconnect/reconnect state machine.
//!
//! A seat is `Connected`, in a `Grace` window waiting for the player to come
//! back, or `Forfeited`. Each window that runs out costs one lifeline and,
//! while lifelines remain, opens the next window. Windows are chained from
//! the previous deadline rather than from the time the expiry was noticed,
//! so a late poll never stretches the total grace period.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Connected,
    Grace { deadline: Instant },
    Forfeited,
}

/// Emitted each time a grace window runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowExpired {
    pub remaining: u8,
    /// Deadline of the window that replaces it, or `None` on forfeiture.
    pub next_deadline: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// Came back inside a window; no lifeline spent by the return itself.
    Resumed,
    AlreadyConnected,
    Forfeited,
}

#[derive(Debug, Clone)]
pub struct Lifeline {
    remaining: u8,
    link: Link,
}

impl Lifeline {
    pub fn new(initial: u8) -> Self {
        Self {
            remaining: initial,
            link: Link::Connected,
        }
    }

    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    pub fn link(&self) -> Link {
        self.link
    }

    pub fn in_grace(&self) -> bool {
        matches!(self.link, Link::Grace { .. })
    }

    pub fn is_forfeited(&self) -> bool {
        self.link == Link::Forfeited
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.link {
            Link::Grace { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Open a grace window. Returns its deadline, or `None` if the seat was
    /// not connected (a second disconnect never nests a second window).
    pub fn disconnect(&mut self, now: Instant, countdown: Duration) -> Option<Instant> {
        if self.link != Link::Connected {
            return None;
        }
        let deadline = now + countdown;
        self.link = Link::Grace { deadline };
        Some(deadline)
    }

    /// Apply every window that ran out strictly before `now`.
    pub fn poll(&mut self, now: Instant, countdown: Duration) -> Vec<WindowExpired> {
        let mut expired = Vec::new();
        while let Link::Grace { deadline } = self.link {
            if now <= deadline {
                break;
            }
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.link = Link::Forfeited;
                expired.push(WindowExpired {
                    remaining: 0,
                    next_deadline: None,
                });
                break;
            }
            let next = deadline + countdown;
            self.link = Link::Grace { deadline: next };
            expired.push(WindowExpired {
                remaining: self.remaining,
                next_deadline: Some(next),
            });
        }
        expired
    }

    /// Return to `Connected`. Windows already past are settled first, so a
    /// reconnect exactly at a deadline is on time and one just after it
    /// costs that window's lifeline.
    pub fn reconnect(
        &mut self,
        now: Instant,
        countdown: Duration,
    ) -> (Vec<WindowExpired>, Reconnect) {
        let expired = self.poll(now, countdown);
        let outcome = match self.link {
            Link::Connected => Reconnect::AlreadyConnected,
            Link::Forfeited => Reconnect::Forfeited,
            Link::Grace { .. } => {
                self.link = Link::Connected;
                Reconnect::Resumed
            }
        };
        (expired, outcome)
    }
}
