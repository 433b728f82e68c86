//! Sweep, range and calibration data shared between the driver and its caller.

use crate::control::{OutputRange, PgaGain, SettlingMultiplier, MAX_SETTLING_CYCLES};
use crate::error::Invalid;
use crate::frequency::{ClockSource, CLOCK_SOURCES, MAX_FREQUENCY_HZ};

/// Largest number of frequency increments per sweep (9-bit register).
pub const MAX_INCREMENTS: u16 = 511;

/// Samples averaged per calibration point unless [`Config`] overrides it.
pub const CALIB_AVERAGES: u16 = 16;

/// Sweep parameters.
///
/// A sweep measures `increments + 1` points starting at `start_hz`, each
/// `increment_hz` above the previous one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SweepSpec {
    pub start_hz: u32,
    pub increment_hz: u32,
    pub increments: u16,        // 0..=511
    pub settling_cycles: u16,   // 0..=511
    pub settling_multiplier: SettlingMultiplier,
    pub averages: u16,          // >= 1
}

impl Default for SweepSpec {
    fn default() -> Self {
        SweepSpec {
            start_hz: 10_000,
            increment_hz: 1_000,
            increments: 10,
            settling_cycles: 15,
            settling_multiplier: SettlingMultiplier::X1,
            averages: 1,
        }
    }
}

impl SweepSpec {
    /// Number of points the sweep produces.
    pub const fn points(&self) -> usize {
        self.increments as usize + 1
    }

    /// Frequency of the last point, or `None` if it does not fit in `u32`.
    pub fn end_hz(&self) -> Option<u32> {
        self.increment_hz
            .checked_mul(u32::from(self.increments))
            .and_then(|span| self.start_hz.checked_add(span))
    }

    /// Check everything that can be checked without touching hardware.
    ///
    /// Only the first point has to sit inside a clock band here; later band
    /// changes are handled as the sweep reaches them. The increment is not
    /// checked against the first band's clock: a step that leaves the band is
    /// never programmed into the chip. The end frequency must still stay below
    /// [`MAX_FREQUENCY_HZ`].
    pub fn validate(&self) -> Result<(), Invalid> {
        if self.increment_hz == 0 {
            return Err(Invalid::ZeroIncrement);
        }
        if self.increments > MAX_INCREMENTS {
            return Err(Invalid::TooManyIncrements);
        }
        if self.averages == 0 {
            return Err(Invalid::ZeroAverages);
        }
        if self.settling_cycles > MAX_SETTLING_CYCLES {
            return Err(Invalid::SettlingCyclesOutOfRange);
        }
        let source =
            ClockSource::for_frequency(self.start_hz).ok_or(Invalid::FrequencyOutOfRange)?;
        source
            .encode(self.start_hz)
            .ok_or(Invalid::FrequencyOutOfRange)?;
        match self.end_hz() {
            Some(end) if end <= MAX_FREQUENCY_HZ => Ok(()),
            _ => Err(Invalid::FrequencyOutOfRange),
        }
    }
}

/// Analog front-end settings for one measurement.
///
/// `attenuation` and `feedback_ohms` describe the board multiplexers; the
/// driver keeps them with the captured settings but only programs the PGA and
/// output range into the chip.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RangeSettings {
    pub pga_gain: PgaGain,
    pub output_range: OutputRange,
    pub attenuation: u16,
    pub feedback_ohms: u32,
}

/// One averaged sweep point.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImpedanceSample {
    pub frequency_hz: u32,
    pub real: i16,
    pub imag: i16,
}

/// What to calibrate against.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationSpec {
    /// Reference impedance connected during calibration, in ohms.
    pub impedance_ohms: f32,
    /// Measure two points per clock range and fit a slope.
    pub two_point: bool,
    pub start_hz: u32,
    pub end_hz: u32,
}

impl CalibrationSpec {
    pub fn validate(&self) -> Result<(), Invalid> {
        if !(self.impedance_ohms.is_finite() && self.impedance_ohms > 0.0) {
            return Err(Invalid::InvalidImpedance);
        }
        if self.start_hz >= self.end_hz {
            return Err(Invalid::EmptySpan);
        }
        if ClockSource::for_frequency(self.start_hz).is_none() || self.end_hz > MAX_FREQUENCY_HZ {
            return Err(Invalid::FrequencyOutOfRange);
        }
        Ok(())
    }
}

/// Raw calibration samples for one clock range.
///
/// `freq1_hz == 0` marks a range the calibration span did not reach.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawRange {
    pub freq1_hz: u32,
    pub real1: i16,
    pub imag1: i16,
    pub freq2_hz: u32,
    pub real2: i16,
    pub imag2: i16,
}

impl RawRange {
    pub const fn is_used(&self) -> bool {
        self.freq1_hz != 0
    }
}

/// Raw calibration result, one entry per clock range.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GainFactorRawData {
    pub impedance_ohms: f32,
    pub two_point: bool,
    pub ranges: [RawRange; CLOCK_SOURCES],
}

/// Gain and phase correction for one clock range.
///
/// `freq1_hz` is NaN for a range without calibration data.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GainRange {
    pub freq1_hz: f32,
    pub offset: f32,
    pub slope: f32,
    pub phase_offset: f32,
    pub phase_slope: f32,
}

impl GainRange {
    pub const UNUSED: GainRange = GainRange {
        freq1_hz: f32::NAN,
        offset: f32::NAN,
        slope: f32::NAN,
        phase_offset: f32::NAN,
        phase_slope: f32::NAN,
    };

    pub fn is_used(&self) -> bool {
        !self.freq1_hz.is_nan()
    }
}

/// Calibrated gain factor derived from [`GainFactorRawData`].
///
/// Plain data so the board layer can persist it as-is.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GainFactor {
    pub two_point: bool,
    pub ranges: [GainRange; CLOCK_SOURCES],
}

impl Default for GainFactor {
    fn default() -> Self {
        GainFactor {
            two_point: false,
            ranges: [GainRange::UNUSED; CLOCK_SOURCES],
        }
    }
}

impl GainFactor {
    /// A gain factor is meaningful once at least one range carries data.
    pub fn is_valid(&self) -> bool {
        self.ranges.iter().any(GainRange::is_used)
    }
}

/// Driver configuration, fixed at construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Period of the caller's [`tick`](crate::Ad5933::tick) timer.
    pub tick_period_ms: u32,
    /// Time constant of the output coupling capacitor. The driver waits
    /// four time constants after enabling the output before starting a sweep.
    pub coupling_tau_ms: u32,
    /// Consecutive ticks without a ready flag before the operation faults.
    /// `None` waits forever.
    pub poll_timeout_ticks: Option<u32>,
    pub calibration_averages: u16,
    pub calibration_settling_cycles: u16,
    pub calibration_settling_multiplier: SettlingMultiplier,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tick_period_ms: 1,
            coupling_tau_ms: 25,
            poll_timeout_ticks: Some(30_000),
            calibration_averages: CALIB_AVERAGES,
            calibration_settling_cycles: 15,
            calibration_settling_multiplier: SettlingMultiplier::X1,
        }
    }
}

impl Config {
    /// Capacitor charge wait in whole ticks, rounded up.
    pub fn charge_ticks(&self) -> u32 {
        let period = self.tick_period_ms.max(1);
        (self.coupling_tau_ms.saturating_mul(4) + period - 1) / period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(start_hz: u32, increment_hz: u32, increments: u16) -> SweepSpec {
        SweepSpec {
            start_hz,
            increment_hz,
            increments,
            ..SweepSpec::default()
        }
    }

    #[test]
    fn sweep_validation() {
        assert_eq!(sweep(10_000, 1_000, 10).validate(), Ok(()));
        assert_eq!(sweep(10_000, 0, 10).validate(), Err(Invalid::ZeroIncrement));
        assert_eq!(sweep(10_000, 1, 512).validate(), Err(Invalid::TooManyIncrements));
        assert_eq!(sweep(50, 10, 10).validate(), Err(Invalid::FrequencyOutOfRange));
        assert_eq!(sweep(90_000, 1_000, 11).validate(), Err(Invalid::FrequencyOutOfRange));
        assert_eq!(sweep(90_000, 1_000, 10).validate(), Ok(()));

        let mut spec = sweep(10_000, 1_000, 10);
        spec.averages = 0;
        assert_eq!(spec.validate(), Err(Invalid::ZeroAverages));
        spec.averages = 1;
        spec.settling_cycles = 512;
        assert_eq!(spec.validate(), Err(Invalid::SettlingCyclesOutOfRange));
    }

    #[test]
    fn first_point_only_needs_a_band() {
        // Starts in the slowest band and crosses into every other one.
        assert_eq!(sweep(500, 199, 500).validate(), Ok(()));
        // A 20 kHz step is far beyond what the 250 kHz clock can encode, but
        // it leaves the band straight away.
        assert_eq!(sweep(500, 20_000, 2).validate(), Ok(()));
    }

    #[test]
    fn end_frequency_overflow_is_rejected() {
        assert_eq!(sweep(1_000, u32::MAX / 2, 3).end_hz(), None);
        assert_eq!(sweep(1_000, u32::MAX / 2, 3).validate(), Err(Invalid::FrequencyOutOfRange));
    }

    #[test]
    fn calibration_validation() {
        let spec = CalibrationSpec {
            impedance_ohms: 1_000.0,
            two_point: true,
            start_hz: 1_000,
            end_hz: 10_000,
        };
        assert_eq!(spec.validate(), Ok(()));
        assert_eq!(
            CalibrationSpec { impedance_ohms: 0.0, ..spec }.validate(),
            Err(Invalid::InvalidImpedance)
        );
        assert_eq!(
            CalibrationSpec { end_hz: 1_000, ..spec }.validate(),
            Err(Invalid::EmptySpan)
        );
        assert_eq!(
            CalibrationSpec { end_hz: 200_000, ..spec }.validate(),
            Err(Invalid::FrequencyOutOfRange)
        );
    }

    #[test]
    fn charge_wait_rounds_up_to_ticks() {
        let config = Config {
            tick_period_ms: 3,
            coupling_tau_ms: 5,
            ..Config::default()
        };
        assert_eq!(config.charge_ticks(), 7);
        assert_eq!(Config::default().charge_ticks(), 100);
    }

    #[test]
    fn default_gain_factor_is_not_valid() {
        assert!(!GainFactor::default().is_valid());
    }
}
