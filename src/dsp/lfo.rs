//! Low Frequency Oscillator (LFO) ranges.

/*
Low Frequency Oscillators
=========================

An LFO is an oscillator running below the audible range. Here it is one
backend sound source feeding a gain stage (the depth); the gain stage's
output is summed onto exactly one destination parameter at a time.

Vocabulary
----------

  control-rate    Frequencies below human hearing: ~0.1 Hz to ~20 Hz.
                  These oscillators modulate parameters over time.

  depth           The LFO gain. The destination parameter swings by
                  +/- depth around its own value.

  period          Time for one complete oscillation.
                  At 5 Hz: period = 1/5 = 0.2 seconds = 200ms


Typical LFO Frequencies
-----------------------

    0.1 - 0.5 Hz    Slow sweeps, gradual filter movement
    0.5 - 2 Hz      Classic tremolo, auto-pan
    2 - 7 Hz        Vibrato sweet spot
    7 - 20 Hz       Fast tremolo, "helicopter" effect

Above ~20 Hz the modulation stops being heard as movement and starts
producing sidebands, so the rate is capped there.


Destination Math
----------------

The backend sums the LFO signal onto the parameter's scheduled value:

    effective = param_value + depth * lfo(t)        lfo(t) in [-1, 1]

So the modulation needs no knowledge of the base value. Retargeting is a
hard cutover: disconnect from the old parameter, connect to the new one.
*/

pub const MIN_FREQUENCY: f32 = 0.1;
pub const MAX_FREQUENCY: f32 = 20.0;
pub const MIN_AMPLITUDE: f32 = 0.0;
pub const MAX_AMPLITUDE: f32 = 1.0;

/// Clamp an LFO rate into the control-rate range.
#[inline]
pub fn clamp_frequency(frequency_hz: f32) -> f32 {
    frequency_hz.clamp(MIN_FREQUENCY, MAX_FREQUENCY)
}

/// Clamp an LFO depth into 0..=1.
#[inline]
pub fn clamp_amplitude(amplitude: f32) -> f32 {
    amplitude.clamp(MIN_AMPLITUDE, MAX_AMPLITUDE)
}

/// Calculate LFO period in seconds from frequency.
///
/// # Example
/// ```
/// use polyvoice::dsp::lfo::period_from_frequency;
/// let period = period_from_frequency(5.0);
/// assert!((period - 0.2).abs() < 1e-6); // 5 Hz = 200ms period
/// ```
#[inline]
pub fn period_from_frequency(frequency_hz: f32) -> f32 {
    1.0 / frequency_hz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_clamped_to_control_range() {
        assert_eq!(clamp_frequency(0.0), MIN_FREQUENCY);
        assert_eq!(clamp_frequency(5.0), 5.0);
        assert_eq!(clamp_frequency(440.0), MAX_FREQUENCY);
    }

    #[test]
    fn depth_is_a_ratio() {
        assert_eq!(clamp_amplitude(-0.5), 0.0);
        assert_eq!(clamp_amplitude(0.25), 0.25);
        assert_eq!(clamp_amplitude(3.0), 1.0);
    }

    #[test]
    fn test_period_from_frequency() {
        assert!((period_from_frequency(5.0) - 0.2).abs() < 1e-6);
        assert!((period_from_frequency(1.0) - 1.0).abs() < 1e-6);
        assert!((period_from_frequency(10.0) - 0.1).abs() < 1e-6);
    }
}
