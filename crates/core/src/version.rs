// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Monotonic version markers for events.
//!
//! A version is a millisecond wall-clock reading that never repeats or goes
//! backwards within one clock: when the wall clock stalls or steps back, the
//! clock advances the last issued value by one instead.

use std::sync::Mutex;

use chrono::Utc;

/// Current wall clock in milliseconds since Unix epoch.
pub fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Trait for getting the current wall clock time.
///
/// This allows injecting a mock clock for testing.
pub trait ClockSource: Send + Sync {
    /// Returns the current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The system wall clock, as read by [`now_ms`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        now_ms()
    }
}

impl<C: ClockSource> ClockSource for &C {
    fn now_ms(&self) -> u64 {
        (*self).now_ms()
    }
}

/// Generates strictly increasing version markers.
pub struct VersionClock<C: ClockSource = SystemClock> {
    clock: C,
    last: Mutex<u64>,
}

static PROCESS_CLOCK: VersionClock = VersionClock::with_clock(SystemClock);

impl VersionClock<SystemClock> {
    /// Creates a version clock backed by the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// The clock shared by everything in this process that stamps events.
    pub fn process() -> &'static Self {
        &PROCESS_CLOCK
    }
}

impl Default for VersionClock<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ClockSource> VersionClock<C> {
    /// Creates a version clock with a custom clock source.
    pub const fn with_clock(clock: C) -> Self {
        VersionClock { clock, last: Mutex::new(0) }
    }

    /// Returns the current wall-clock reading in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Issues the next version.
    pub fn next(&self) -> u64 {
        let physical = self.clock.now_ms();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *last = if physical > *last { physical } else { last.saturating_add(1) };
        *last
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod tests;
