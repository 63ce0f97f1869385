use crate::backend::{AudioBackend, BackendError, ParamRef};
use crate::{SynthError, MIN_TIME};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
ADSR Envelope Implementation
============================

This module implements a linear ADSR envelope that is *scheduled*, not
rendered: instead of stepping a level once per sample, it hands the whole
shape to the audio backend as parameter automation and keeps just enough
state to answer "what is audible right now?".

Vocabulary
----------

  value       The envelope's output at a point in time (0.0 to 1.0). This
              multiplies the voice's signal to control its amplitude.

  phase       Which part of the shape `now` falls in: Idle, Attack, Decay,
              Sustain, Release, or Finished.

  start       Backend clock time at which the attack was triggered. Every
              phase is derived from `now - start`; nothing ticks.

  target      The gain parameter(s) the envelope automates. One note may
              drive several (one per oscillator lane).


The Shape: Linear Ramps
-----------------------

  Value
    1.0 ┐     ╱╲
        │    ╱  ╲___________
    S   │   ╱               ╲
        │  ╱                 ╲
    0.0 └─╱───────────────────╲──→ Time
        Attack Decay  Sustain  Release
         (A)   (D)      (S)      (R)

With t = now - start:

    t <= A          value = t / A
    t <= A + D      value = 1 - (1 - S) * (t - A) / D
    otherwise       value = S


Scheduling
----------

trigger_attack(now) writes, per target:

    cancel_scheduled(now)
    set_value_at(0, now)
    ramp_linear(1, now + A)
    ramp_linear(S, now + A + D)

trigger_release(now) writes, per target:

    cancel_scheduled(now)
    set_value_at(value(now), now)
    ramp_linear(0, now + R)

Release always starts from value(now), the level that is audible at the
moment the key goes up, never from 1.0 or from S. Releasing halfway through
the attack therefore ramps down from ~0.5:

    1.0 ┐
        │    ╱╲ <- would click if we jumped here
    0.5 │   ╱ ●╲
        │  ╱    ╲___
    0.0 └─╱─────────╲──→ Time
             ^ release

The cancel-first rule also makes retriggering idempotent: whatever was
queued on the target is dropped before the new shape is written.


Fast Release
------------

A note that is being replaced (retrigger) cannot wait for its full release.
fast_release(fade) overrides any release in flight with a short ramp from
value(now) to zero; with fade = 0 the gain is set to zero immediately.
*/

/// ADSR timing and level.
///
/// Times are seconds, sustain is a ratio of full scale.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeParams {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            attack: 0.1,
            decay: 0.2,
            sustain: 0.7,
            release: 0.5,
        }
    }
}

impl EnvelopeParams {
    /// Validated constructor.
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Result<Self, SynthError> {
        let params = Self {
            attack,
            decay,
            sustain,
            release,
        };
        params.validate()?;
        Ok(params)
    }

    /// Clamping constructor: times are raised to the shortest representable
    /// duration and sustain is clamped to 0..=1.
    pub fn adsr(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack: attack.max(MIN_TIME),
            decay: decay.max(MIN_TIME),
            sustain: sustain.clamp(0.0, 1.0),
            release: release.max(MIN_TIME),
        }
    }

    pub fn validate(&self) -> Result<(), SynthError> {
        check_time("attack", self.attack)?;
        check_time("decay", self.decay)?;
        check_time("release", self.release)?;
        if !(0.0..=1.0).contains(&self.sustain) {
            return Err(SynthError::InvalidParameter {
                name: "sustain",
                value: self.sustain,
            });
        }
        Ok(())
    }

    pub fn set_attack(&mut self, seconds: f32) -> Result<(), SynthError> {
        check_time("attack", seconds)?;
        self.attack = seconds;
        Ok(())
    }

    pub fn set_decay(&mut self, seconds: f32) -> Result<(), SynthError> {
        check_time("decay", seconds)?;
        self.decay = seconds;
        Ok(())
    }

    pub fn set_sustain(&mut self, level: f32) -> Result<(), SynthError> {
        if !(0.0..=1.0).contains(&level) {
            return Err(SynthError::InvalidParameter {
                name: "sustain",
                value: level,
            });
        }
        self.sustain = level;
        Ok(())
    }

    pub fn set_release(&mut self, seconds: f32) -> Result<(), SynthError> {
        check_time("release", seconds)?;
        self.release = seconds;
        Ok(())
    }
}

fn check_time(name: &'static str, seconds: f32) -> Result<(), SynthError> {
    // rejects NaN too
    if seconds > 0.0 && seconds.is_finite() {
        Ok(())
    } else {
        Err(SynthError::InvalidParameter {
            name,
            value: seconds,
        })
    }
}

/// Where in its shape an envelope is at a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopePhase {
    Idle,     // never triggered (or queried before the trigger time)
    Attack,   // ramping 0 -> 1
    Decay,    // ramping 1 -> sustain
    Sustain,  // holding sustain
    Release,  // ramping value(release) -> 0
    Finished, // release complete, value = 0
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Release {
    at: f64,
    from: f32,
    duration: f32,
}

/// One note's private envelope.
///
/// Holds a copy of the template parameters taken at note-on, so later
/// template edits never change the timing of a note that is already sounding.
#[derive(Debug, Clone)]
pub struct Envelope {
    params: EnvelopeParams,
    start: Option<f64>,
    release: Option<Release>,
}

impl Envelope {
    pub fn new(params: EnvelopeParams) -> Self {
        Self {
            params,
            start: None,
            release: None,
        }
    }

    pub fn params(&self) -> &EnvelopeParams {
        &self.params
    }

    /// Time the attack was triggered, if it has been.
    pub fn start_time(&self) -> Option<f64> {
        self.start
    }

    /// Gate high: schedule attack and decay on every target.
    ///
    /// Resets any earlier release. A backend failure on one target does not
    /// stop the others from being scheduled; the first error is returned.
    pub fn trigger_attack<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        targets: &[ParamRef],
        now: f64,
    ) -> Result<(), BackendError> {
        self.start = Some(now);
        self.release = None;

        let attack_end = now + self.params.attack as f64;
        let decay_end = attack_end + self.params.decay as f64;
        let sustain = self.params.sustain;

        each_target(targets, |target| {
            backend.cancel_scheduled(target, now)?;
            backend.set_value_at(target, 0.0, now)?;
            backend.ramp_linear(target, 1.0, attack_end)?;
            backend.ramp_linear(target, sustain, decay_end)
        })
    }

    /// Gate low: ramp from the audible value to zero over the release time.
    ///
    /// No-op if a release is already in progress.
    pub fn trigger_release<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        targets: &[ParamRef],
        now: f64,
    ) -> Result<(), BackendError> {
        if self.release.is_some() {
            return Ok(());
        }
        self.release_over(backend, targets, now, self.params.release)
    }

    /// Override any release in flight with a `fade`-second ramp to zero.
    pub fn fast_release<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        targets: &[ParamRef],
        now: f64,
        fade: f32,
    ) -> Result<(), BackendError> {
        let fade = fade.min(self.params.release);
        self.release_over(backend, targets, now, fade.max(0.0))
    }

    fn release_over<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        targets: &[ParamRef],
        now: f64,
        duration: f32,
    ) -> Result<(), BackendError> {
        let from = self.value(now);
        self.release = Some(Release {
            at: now,
            from,
            duration,
        });

        each_target(targets, |target| {
            backend.cancel_scheduled(target, now)?;
            if duration > 0.0 {
                backend.set_value_at(target, from, now)?;
                backend.ramp_linear(target, 0.0, now + duration as f64)
            } else {
                backend.set_value_at(target, 0.0, now)
            }
        })
    }

    /// Time at which the release ramp reaches zero, once released.
    pub fn release_end(&self) -> Option<f64> {
        self.release.map(|r| r.at + r.duration as f64)
    }

    pub fn is_released(&self) -> bool {
        self.release.is_some()
    }

    /// Envelope value at `now`, the same curve the backend is rendering.
    pub fn value(&self, now: f64) -> f32 {
        if let Some(release) = self.release {
            if now >= release.at {
                if release.duration <= 0.0 {
                    return 0.0;
                }
                let progress = ((now - release.at) / release.duration as f64) as f32;
                return (release.from * (1.0 - progress)).max(0.0);
            }
        }
        self.held_value(now)
    }

    /// Attack/decay/sustain portion, ignoring any release.
    fn held_value(&self, now: f64) -> f32 {
        let Some(start) = self.start else {
            return 0.0;
        };
        let t = (now - start).max(0.0) as f32;
        let EnvelopeParams {
            attack,
            decay,
            sustain,
            ..
        } = self.params;

        if t <= attack {
            t / attack
        } else if t <= attack + decay {
            1.0 - (1.0 - sustain) * (t - attack) / decay
        } else {
            sustain
        }
    }

    pub fn phase(&self, now: f64) -> EnvelopePhase {
        if let Some(release) = self.release {
            if now >= release.at + release.duration as f64 {
                return EnvelopePhase::Finished;
            }
            if now >= release.at {
                return EnvelopePhase::Release;
            }
        }

        let Some(start) = self.start else {
            return EnvelopePhase::Idle;
        };
        let t = now - start;
        if t < 0.0 {
            EnvelopePhase::Idle
        } else if t < self.params.attack as f64 {
            EnvelopePhase::Attack
        } else if t < (self.params.attack + self.params.decay) as f64 {
            EnvelopePhase::Decay
        } else {
            EnvelopePhase::Sustain
        }
    }
}

fn each_target(
    targets: &[ParamRef],
    mut schedule: impl FnMut(ParamRef) -> Result<(), BackendError>,
) -> Result<(), BackendError> {
    let mut first_error = None;
    for &target in targets {
        if let Err(err) = schedule(target) {
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}
