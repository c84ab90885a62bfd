use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntroPhase {
    Void,
    FogIn,
    TitleVisible,
    Loading,
    Ascend,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct IntroTimings {
    pub void: Duration,
    pub fog_in: Duration,
    pub title: Duration,
    pub min_loading: Duration,
    pub ascend: Duration,
}

impl Default for IntroTimings {
    fn default() -> Self {
        Self {
            void: Duration::from_millis(600),
            fog_in: Duration::from_millis(1800),
            title: Duration::from_millis(2500),
            min_loading: Duration::from_millis(1200),
            ascend: Duration::from_millis(1400),
        }
    }
}

/// Opening sequence, advanced by explicit timestamps rather than timers.
#[derive(Debug, Clone)]
pub struct IntroSequence {
    timings: IntroTimings,
    phase: IntroPhase,
    entered_at: Instant,
    ready_at: Option<Instant>,
}

impl IntroSequence {
    pub fn new(timings: IntroTimings, now: Instant) -> Self {
        Self {
            timings,
            phase: IntroPhase::Void,
            entered_at: now,
            ready_at: None,
        }
    }

    pub fn phase(&self) -> IntroPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == IntroPhase::Done
    }

    /// Content (configuration) is available; loading may finish.
    pub fn mark_content_ready(&mut self, now: Instant) {
        if self.ready_at.is_none() {
            self.ready_at = Some(now);
        }
    }

    pub fn skip(&mut self, now: Instant) {
        self.phase = IntroPhase::Done;
        self.entered_at = now;
    }

    /// Fraction of the current phase that has elapsed, for animation.
    pub fn progress(&self, now: Instant) -> f32 {
        let span = match self.phase {
            IntroPhase::Void => self.timings.void,
            IntroPhase::FogIn => self.timings.fog_in,
            IntroPhase::TitleVisible => self.timings.title,
            IntroPhase::Loading => self.timings.min_loading,
            IntroPhase::Ascend => self.timings.ascend,
            IntroPhase::Done => return 1.0,
        };
        if span.is_zero() {
            return 1.0;
        }
        (now.saturating_duration_since(self.entered_at).as_secs_f32() / span.as_secs_f32()).min(1.0)
    }

    /// Applies every transition due at `now` and returns the resulting phase.
    pub fn advance(&mut self, now: Instant) -> IntroPhase {
        while let Some(ends_at) = self.phase_end() {
            if now < ends_at {
                break;
            }
            self.phase = match self.phase {
                IntroPhase::Void => IntroPhase::FogIn,
                IntroPhase::FogIn => IntroPhase::TitleVisible,
                IntroPhase::TitleVisible => IntroPhase::Loading,
                IntroPhase::Loading => IntroPhase::Ascend,
                IntroPhase::Ascend | IntroPhase::Done => IntroPhase::Done,
            };
            self.entered_at = ends_at;
            debug!(phase = ?self.phase, "intro phase");
        }
        self.phase
    }

    fn phase_end(&self) -> Option<Instant> {
        let fixed = |span: Duration| Some(self.entered_at + span);
        match self.phase {
            IntroPhase::Void => fixed(self.timings.void),
            IntroPhase::FogIn => fixed(self.timings.fog_in),
            IntroPhase::TitleVisible => fixed(self.timings.title),
            IntroPhase::Loading => {
                let ready = self.ready_at?;
                Some(ready.max(self.entered_at + self.timings.min_loading))
            }
            IntroPhase::Ascend => fixed(self.timings.ascend),
            IntroPhase::Done => None,
        }
    }
}
