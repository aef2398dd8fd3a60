//! Server-authoritative two-sided chess clock.
//!
//! Time is kept in whole seconds. A tick charges only the whole seconds that
//! have elapsed and advances the last-update instant by exactly that amount,
//! so sub-second remainders carry over to the next tick instead of being lost
//! or rounded up.

use std::time::{Duration, Instant};

use net::protocol::{ClockWire, Side};
use rules::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    Running,
    Paused,
    Expired,
}

#[derive(Debug, Clone)]
pub struct ChessClock {
    white: u64,
    black: u64,
    side: Color,
    state: ClockState,
    last_update: Option<Instant>,
}

impl ChessClock {
    pub fn new(budget_secs: u64) -> Self {
        Self {
            white: budget_secs,
            black: budget_secs,
            side: Color::White,
            state: ClockState::Stopped,
            last_update: None,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn remaining(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    /// The side whose time is (or, while paused, would be) running.
    pub fn side(&self) -> Color {
        self.side
    }

    pub fn is_running(&self) -> bool {
        self.state == ClockState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state == ClockState::Paused
    }

    pub fn expired_side(&self) -> Option<Color> {
        (self.state == ClockState::Expired).then_some(self.side)
    }

    /// Begin running `side`'s time. Only a stopped clock can start.
    pub fn start(&mut self, side: Color, now: Instant) -> bool {
        if self.state != ClockState::Stopped {
            return false;
        }
        self.side = side;
        self.state = ClockState::Running;
        self.last_update = Some(now);
        self.check_expiry();
        true
    }

    /// Charge the running side for the whole seconds since the last update.
    /// Returns the side that ran out, if this tick expired it.
    pub fn tick(&mut self, now: Instant) -> Option<Color> {
        if self.state != ClockState::Running {
            return None;
        }
        let Some(last) = self.last_update else {
            return None;
        };
        let whole = now.saturating_duration_since(last).as_secs();
        if whole > 0 {
            let remaining = self.remaining_mut(self.side);
            *remaining = remaining.saturating_sub(whole);
            self.last_update = Some(last + Duration::from_secs(whole));
        }
        self.check_expiry()
    }

    /// Stop the clock without charging either side for the paused interval.
    pub fn pause(&mut self, now: Instant) {
        if self.state != ClockState::Running {
            return;
        }
        self.tick(now);
        if self.state == ClockState::Running {
            self.state = ClockState::Paused;
        }
    }

    /// Continue from the current remaining times. The last-update instant is
    /// reset so the pause is not charged.
    pub fn resume(&mut self, now: Instant) -> bool {
        if self.state != ClockState::Paused {
            return false;
        }
        self.state = ClockState::Running;
        self.last_update = Some(now);
        true
    }

    /// Charge the mover, then hand the clock to the other side.
    pub fn switch_side(&mut self, now: Instant) {
        if self.state != ClockState::Running {
            return;
        }
        if self.tick(now).is_some() {
            return;
        }
        self.side = self.side.opposite();
        self.last_update = Some(now);
        self.check_expiry();
    }

    /// Halt for good once the game is decided.
    pub fn stop(&mut self) {
        if matches!(self.state, ClockState::Running | ClockState::Paused) {
            self.state = ClockState::Stopped;
        }
    }

    /// Apply a client-reported value for `color` as a soft correction. It is
    /// taken only if lower than the server's and within `tolerance_secs` of
    /// it. Callers pass only the reporting seat's own side.
    pub fn reconcile(&mut self, color: Color, reported: u64, tolerance_secs: u64) -> bool {
        if matches!(self.state, ClockState::Expired) {
            return false;
        }
        let current = self.remaining_mut(color);
        if reported >= *current || *current - reported > tolerance_secs {
            return false;
        }
        *current = reported;
        self.check_expiry();
        true
    }

    pub fn to_wire(&self) -> ClockWire {
        ClockWire {
            white_secs: self.white,
            black_secs: self.black,
            running: self.is_running().then(|| match self.side {
                Color::White => Side::White,
                Color::Black => Side::Black,
            }),
            paused: self.is_paused(),
        }
    }

    fn remaining_mut(&mut self, color: Color) -> &mut u64 {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    fn check_expiry(&mut self) -> Option<Color> {
        if self.state == ClockState::Running && self.remaining(self.side) == 0 {
            self.state = ClockState::Expired;
            return Some(self.side);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn running(budget: u64) -> (ChessClock, Instant) {
        let t0 = Instant::now();
        let mut clock = ChessClock::new(budget);
        assert!(clock.start(Color::White, t0));
        (clock, t0)
    }

    #[test]
    fn start_only_once() {
        let (mut clock, t0) = running(900);
        assert!(clock.is_running());
        assert!(!clock.start(Color::Black, t0));
        assert_eq!(clock.side(), Color::White);
    }

    #[test]
    fn sub_second_remainder_carries_over() {
        let (mut clock, t0) = running(900);
        clock.tick(t0 + ms(1500));
        assert_eq!(clock.remaining(Color::White), 899);
        clock.tick(t0 + ms(1900));
        assert_eq!(clock.remaining(Color::White), 899);
        clock.tick(t0 + ms(2000));
        assert_eq!(clock.remaining(Color::White), 898);
        assert_eq!(clock.remaining(Color::Black), 900);
    }

    #[test]
    fn paused_time_is_free() {
        let (mut clock, t0) = running(900);
        clock.pause(t0 + ms(3000));
        assert!(clock.is_paused());
        assert_eq!(clock.remaining(Color::White), 897);

        clock.tick(t0 + ms(60_000));
        assert_eq!(clock.remaining(Color::White), 897);

        assert!(clock.resume(t0 + ms(60_000)));
        clock.tick(t0 + ms(62_000));
        assert_eq!(clock.remaining(Color::White), 895);
    }

    #[test]
    fn switch_charges_mover() {
        let (mut clock, t0) = running(900);
        clock.switch_side(t0 + ms(4200));
        assert_eq!(clock.remaining(Color::White), 896);
        assert_eq!(clock.side(), Color::Black);

        clock.tick(t0 + ms(6200));
        assert_eq!(clock.remaining(Color::Black), 898);
        assert_eq!(clock.remaining(Color::White), 896);
    }

    #[test]
    fn expiry_reports_side_once() {
        let (mut clock, t0) = running(2);
        assert_eq!(clock.tick(t0 + ms(1000)), None);
        assert_eq!(clock.tick(t0 + ms(5000)), Some(Color::White));
        assert_eq!(clock.remaining(Color::White), 0);
        assert_eq!(clock.state(), ClockState::Expired);
        assert_eq!(clock.expired_side(), Some(Color::White));
        assert_eq!(clock.tick(t0 + ms(9000)), None);
    }

    #[test]
    fn reconcile_only_lowers_within_tolerance() {
        let (mut clock, _) = running(900);
        assert!(clock.reconcile(Color::White, 880, 60));
        assert_eq!(clock.remaining(Color::White), 880);

        // Too far below.
        assert!(!clock.reconcile(Color::White, 700, 60));
        assert_eq!(clock.remaining(Color::White), 880);

        // Never upwards.
        assert!(!clock.reconcile(Color::White, 890, 60));
        assert!(!clock.reconcile(Color::Black, 950, 60));
        assert_eq!(clock.remaining(Color::White), 880);
        assert_eq!(clock.remaining(Color::Black), 900);
    }

    #[test]
    fn reconcile_to_zero_on_running_side_expires() {
        let (mut clock, _) = running(30);
        assert!(clock.reconcile(Color::White, 0, 60));
        assert_eq!(clock.expired_side(), Some(Color::White));
    }

    #[test]
    fn remaining_never_increases_while_running() {
        let (mut clock, t0) = running(900);
        let mut last = clock.remaining(Color::White);
        for step in 1..40u64 {
            clock.tick(t0 + ms(step * 370));
            let now = clock.remaining(Color::White);
            assert!(now <= last);
            last = now;
        }
    }

    #[test]
    fn wire_shape() {
        let (mut clock, t0) = running(900);
        let wire = clock.to_wire();
        assert_eq!(wire.running, Some(Side::White));
        assert!(!wire.paused);

        clock.pause(t0);
        let wire = clock.to_wire();
        assert_eq!(wire.running, None);
        assert!(wire.paused);

        clock.stop();
        assert_eq!(clock.state(), ClockState::Stopped);
    }
}
