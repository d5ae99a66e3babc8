//! Deadline scheduler
//!
//! Two countdown windows. The author window is started by hand; when it lapses
//! it stops itself and starts the compiler window within the same tick. The
//! final authority may toggle either window at any time, which can leave both
//! active at once.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineDuration {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
}

impl DeadlineDuration {
    #[inline]
    #[must_use]
    pub const fn new(days: u32, hours: u32, minutes: u32) -> Self {
        Self {
            days,
            hours,
            minutes,
        }
    }

    #[inline]
    #[must_use]
    pub const fn days(days: u32) -> Self {
        Self::new(days, 0, 0)
    }

    #[must_use]
    pub fn total(&self) -> Duration {
        Duration::days(i64::from(self.days))
            + Duration::hours(i64::from(self.hours))
            + Duration::minutes(i64::from(self.minutes))
    }

    #[must_use]
    pub fn total_ms(&self) -> i64 {
        self.total().num_milliseconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowKind {
    Author,
    Compiler,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeadlineWindow {
    pub active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: DeadlineDuration,
}

impl DeadlineWindow {
    #[must_use]
    pub fn with_duration(duration: DeadlineDuration) -> Self {
        Self {
            active: false,
            start_time: None,
            duration,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.active = true;
        self.start_time = Some(now);
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.start_time.filter(|_| self.active).map(|start| now - start)
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.elapsed(now)
            .map(|elapsed| (self.duration.total() - elapsed).max(Duration::zero()))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.elapsed(now)
            .is_some_and(|elapsed| elapsed.num_milliseconds() >= self.duration.total_ms())
    }
}

/// Configured durations for both windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlinePlan {
    pub author: DeadlineDuration,
    pub compiler: DeadlineDuration,
}

impl Default for DeadlinePlan {
    fn default() -> Self {
        Self {
            author: DeadlineDuration::days(7),
            compiler: DeadlineDuration::days(3),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineTick {
    AuthorLapsed { compiler_started: bool },
    CompilerLapsed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadlines {
    pub author: DeadlineWindow,
    pub compiler: DeadlineWindow,
    /// Configured durations; a one-off duration lasts for one run only
    #[serde(default)]
    pub plan: DeadlinePlan,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self::from_plan(DeadlinePlan::default())
    }
}

impl Deadlines {
    #[must_use]
    pub fn from_plan(plan: DeadlinePlan) -> Self {
        Self {
            author: DeadlineWindow::with_duration(plan.author),
            compiler: DeadlineWindow::with_duration(plan.compiler),
            plan,
        }
    }

    pub fn window(&self, kind: WindowKind) -> &DeadlineWindow {
        match kind {
            WindowKind::Author => &self.author,
            WindowKind::Compiler => &self.compiler,
        }
    }

    pub fn window_mut(&mut self, kind: WindowKind) -> &mut DeadlineWindow {
        match kind {
            WindowKind::Author => &mut self.author,
            WindowKind::Compiler => &mut self.compiler,
        }
    }

    /// At most one window changes per tick; author expiry is checked first.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<DeadlineTick> {
        if self.author.is_expired(now) {
            self.author.stop();
            let compiler_started = !self.compiler.active;
            if compiler_started {
                self.compiler.duration = self.plan.compiler;
                self.compiler.start(now);
            }
            return Some(DeadlineTick::AuthorLapsed { compiler_started });
        }
        if self.compiler.is_expired(now) {
            self.compiler.stop();
            return Some(DeadlineTick::CompilerLapsed);
        }
        None
    }

    /// Both windows inactive, back on their configured durations
    pub fn reset(&mut self) {
        self.author = DeadlineWindow::with_duration(self.plan.author);
        self.compiler = DeadlineWindow::with_duration(self.plan.compiler);
    }
}
