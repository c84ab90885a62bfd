use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::AudioSettings;
use crate::cue::TrackRef;

/// One playing, looping track.
pub trait AudioChannel: Send {
    fn set_volume(&mut self, volume: f32);
    fn stop(&mut self);
}

pub trait AudioBackend: Send + Sync {
    /// Starts looping playback of `track`. The channel must come up muted.
    fn open(&self, track: &TrackRef) -> Result<Box<dyn AudioChannel>>;
}

struct Voice {
    track: TrackRef,
    channel: Box<dyn AudioChannel>,
    volume: f32,
}

impl Voice {
    fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.volume = volume;
        self.channel.set_volume(volume);
    }

    fn stop(mut self) {
        self.set_volume(0.0);
        self.channel.stop();
    }
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    started: Instant,
    outgoing_from: f32,
    incoming_from: f32,
    next_tick: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossfadeState {
    pub active_track: Option<TrackRef>,
    pub active_volume: f32,
    pub incoming_track: Option<TrackRef>,
    pub incoming_volume: f32,
    pub fading: bool,
}

/// Owns at most one active and one incoming channel and ramps volume
/// between them whenever the target track changes.
///
/// The ramp advances only through [`CrossfadeController::tick`]; a new target
/// replaces the pending ramp, so a superseded fade never gets another tick.
pub struct CrossfadeController {
    backend: Arc<dyn AudioBackend>,
    clock: Arc<dyn Clock>,
    fade_duration: Duration,
    tick_interval: Duration,
    active: Option<Voice>,
    incoming: Option<Voice>,
    ramp: Option<Ramp>,
    failed: HashSet<TrackRef>,
}

impl CrossfadeController {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        clock: Arc<dyn Clock>,
        settings: &AudioSettings,
    ) -> Self {
        Self {
            backend,
            clock,
            fade_duration: settings.fade_duration(),
            tick_interval: settings.tick_interval(),
            active: None,
            incoming: None,
            ramp: None,
            failed: HashSet::new(),
        }
    }

    /// The track the controller is heading towards; `None` means silence.
    pub fn target(&self) -> Option<&TrackRef> {
        match (&self.incoming, &self.ramp, &self.active) {
            (Some(incoming), _, _) => Some(&incoming.track),
            (None, Some(_), _) => None,
            (None, None, Some(active)) => Some(&active.track),
            (None, None, None) => None,
        }
    }

    pub fn set_target(&mut self, track: Option<&TrackRef>) {
        let requested = track.filter(|track| !self.failed.contains(*track)).cloned();
        if requested.as_ref() == self.target() {
            return;
        }

        match requested {
            None => {
                self.keep_louder_voice();
                if self.active.is_none() {
                    self.ramp = None;
                    return;
                }
                debug!("fading to silence");
            }
            Some(track) => {
                if self.active.as_ref().map(|voice| &voice.track) == Some(&track) {
                    // Heading back to the outgoing track: swap roles and ramp from where both are.
                    let outgoing = self.active.take();
                    self.active = self.incoming.take();
                    self.incoming = outgoing;
                } else {
                    let channel = match self.backend.open(&track) {
                        Ok(channel) => channel,
                        Err(err) => {
                            warn!(track = %track, error = %err, "track failed to start, treating as silence");
                            self.failed.insert(track);
                            self.set_target(None);
                            return;
                        }
                    };
                    self.keep_louder_voice();
                    let mut voice = Voice {
                        track,
                        channel,
                        volume: 0.0,
                    };
                    voice.set_volume(0.0);
                    debug!(track = %voice.track, "fading in");
                    self.incoming = Some(voice);
                }
            }
        }

        self.start_ramp();
    }

    /// Applies one volume sample if it is due. Returns whether a fade is still running.
    pub fn tick(&mut self) -> bool {
        let now = self.clock.now();
        let Some(ramp) = self.ramp.as_mut() else {
            return false;
        };
        if now < ramp.next_tick {
            return true;
        }
        ramp.next_tick = now + self.tick_interval;
        let ramp = *ramp;

        let elapsed = now.saturating_duration_since(ramp.started);
        let progress = (elapsed.as_secs_f32() / self.fade_duration.as_secs_f32()).min(1.0);
        if let Some(active) = self.active.as_mut() {
            active.set_volume(ramp.outgoing_from * (1.0 - progress));
        }
        if let Some(incoming) = self.incoming.as_mut() {
            incoming.set_volume(ramp.incoming_from + (1.0 - ramp.incoming_from) * progress);
        }

        if progress >= 1.0 {
            self.finish();
            return false;
        }
        true
    }

    pub fn next_tick_at(&self) -> Option<Instant> {
        self.ramp.map(|ramp| ramp.next_tick)
    }

    pub fn is_fading(&self) -> bool {
        self.ramp.is_some()
    }

    pub fn state(&self) -> CrossfadeState {
        CrossfadeState {
            active_track: self.active.as_ref().map(|voice| voice.track.clone()),
            active_volume: self.active.as_ref().map_or(0.0, |voice| voice.volume),
            incoming_track: self.incoming.as_ref().map(|voice| voice.track.clone()),
            incoming_volume: self.incoming.as_ref().map_or(0.0, |voice| voice.volume),
            fading: self.ramp.is_some(),
        }
    }

    /// Stops everything immediately, without a fade.
    pub fn shutdown(&mut self) {
        self.ramp = None;
        if let Some(voice) = self.incoming.take() {
            voice.stop();
        }
        if let Some(voice) = self.active.take() {
            voice.stop();
        }
    }

    fn start_ramp(&mut self) {
        let now = self.clock.now();
        self.ramp = Some(Ramp {
            started: now,
            outgoing_from: self.active.as_ref().map_or(0.0, |voice| voice.volume),
            incoming_from: self.incoming.as_ref().map_or(0.0, |voice| voice.volume),
            next_tick: now + self.tick_interval,
        });
        if self.fade_duration.is_zero() {
            self.finish();
        }
    }

    /// Collapses active and incoming into one outgoing voice, stopping the quieter one.
    ///
    /// The dropped voice is cut at its current volume rather than ramped out, so
    /// a target change in the middle of a fade can click. This keeps the bound of
    /// two open channels; the cut is always the quieter of the two.
    fn keep_louder_voice(&mut self) {
        let Some(incoming) = self.incoming.take() else {
            return;
        };
        match self.active.take() {
            None => self.active = Some(incoming),
            Some(active) => {
                let (keep, dropped) = if incoming.volume > active.volume {
                    (incoming, active)
                } else {
                    (active, incoming)
                };
                debug!(track = %dropped.track, volume = dropped.volume, "dropping quieter voice");
                dropped.stop();
                self.active = Some(keep);
            }
        }
    }

    fn finish(&mut self) {
        self.ramp = None;
        let outgoing = self.active.take();
        if let Some(voice) = outgoing {
            voice.stop();
        }
        match self.incoming.take() {
            Some(mut voice) => {
                voice.set_volume(1.0);
                info!(track = %voice.track, "now playing");
                self.active = Some(voice);
            }
            None => debug!("audio faded out"),
        }
    }
}

impl Drop for CrossfadeController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
