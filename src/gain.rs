//! Gain and phase correction.
//!
//! Calibration yields, per clock range, the raw DFT magnitude seen for a known
//! reference impedance. The gain is kept in multiplicative form, ohms times raw
//! magnitude, so a measurement is corrected by dividing it by the raw magnitude.
//! Two-point calibration adds a linear term in frequency for both gain and phase.

use core::f32::consts::PI;

use libm::{atan2f, cosf, hypotf, remainderf, sinf};

use crate::frequency::ClockSource;
use crate::types::{GainFactor, GainFactorRawData, GainRange, ImpedanceSample, RawRange};

fn magnitude(real: i16, imag: i16) -> f32 {
    hypotf(f32::from(real), f32::from(imag))
}

fn phase(real: i16, imag: i16) -> f32 {
    atan2f(f32::from(imag), f32::from(real))
}

/// Fold a phase difference into (-π, π].
fn wrap_phase(phase: f32) -> f32 {
    // remainderf lands in [-π, π].
    let wrapped = remainderf(phase, 2.0 * PI);
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

fn gain_range(raw: &RawRange, impedance_ohms: f32, two_point: bool) -> GainRange {
    if !raw.is_used() {
        return GainRange::UNUSED;
    }

    let offset = magnitude(raw.real1, raw.imag1) * impedance_ohms;
    let phase_offset = phase(raw.real1, raw.imag1);
    let (slope, phase_slope) = if two_point && raw.freq2_hz != raw.freq1_hz {
        let span = raw.freq2_hz as f32 - raw.freq1_hz as f32;
        let offset2 = magnitude(raw.real2, raw.imag2) * impedance_ohms;
        let phase2 = phase(raw.real2, raw.imag2);
        (
            (offset2 - offset) / span,
            wrap_phase(phase2 - phase_offset) / span,
        )
    } else {
        (0.0, 0.0)
    };

    GainRange {
        freq1_hz: raw.freq1_hz as f32,
        offset,
        slope,
        phase_offset,
        phase_slope,
    }
}

/// Turn raw calibration samples into a [`GainFactor`].
///
/// Ranges without calibration data come out as [`GainRange::UNUSED`].
pub fn calculate_gain_factor(raw: &GainFactorRawData) -> GainFactor {
    let mut factor = GainFactor {
        two_point: raw.two_point,
        ..GainFactor::default()
    };
    for (out, range) in factor.ranges.iter_mut().zip(raw.ranges.iter()) {
        *out = gain_range(range, raw.impedance_ohms, raw.two_point);
    }
    factor
}

/// Calibration entry covering `frequency_hz`.
fn range_for(gain: &GainFactor, frequency_hz: u32) -> Option<&GainRange> {
    let source = ClockSource::for_frequency(frequency_hz)?;
    Some(&gain.ranges[source.index()])
}

/// Corrected impedance magnitude of `sample`, in ohms.
///
/// NaN if the sample's clock range was never calibrated, or the frequency is
/// outside every range.
pub fn get_magnitude(gain: &GainFactor, sample: &ImpedanceSample) -> f32 {
    let Some(range) = range_for(gain, sample.frequency_hz) else {
        return f32::NAN;
    };
    let df = sample.frequency_hz as f32 - range.freq1_hz;
    let scale = if gain.two_point {
        range.offset + range.slope * df
    } else {
        range.offset
    };
    scale / magnitude(sample.real, sample.imag)
}

/// Corrected impedance phase of `sample`, in radians within (-π, π].
pub fn get_phase(gain: &GainFactor, sample: &ImpedanceSample) -> f32 {
    let Some(range) = range_for(gain, sample.frequency_hz) else {
        return f32::NAN;
    };
    let df = sample.frequency_hz as f32 - range.freq1_hz;
    let reference = if gain.two_point {
        range.phase_offset + range.phase_slope * df
    } else {
        range.phase_offset
    };
    wrap_phase(phase(sample.real, sample.imag) - reference)
}

/// `(real, imaginary)` of a magnitude/phase pair.
pub fn convert_polar_to_cartesian(magnitude: f32, phase: f32) -> (f32, f32) {
    (magnitude * cosf(phase), magnitude * sinf(phase))
}
