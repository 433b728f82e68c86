//! Per-clock-range gain/phase calibration.
//!
//! The calibration span is cut at the clock band edges. Every band the span
//! reaches gets its own one or two test frequencies, and the bands are then
//! measured one after another from the lowest up, each with a fresh sweep
//! setup on its own clock.

use super::{Ad5933, Output, Status};
use crate::control::{ControlFunction, MAX_SETTLING_CYCLES};
use crate::error::{Error, Invalid, Rejected};
use crate::frequency::{ClockGenerator, ClockSource, CLOCK_SOURCES};
use crate::types::{CalibrationSpec, GainFactorRawData, RangeSettings, RawRange, SweepSpec};
use crate::RegisterInterface;

/// Progress through a running calibration.
#[derive(Debug, Copy, Clone, Default)]
pub(super) struct CalibrationCursor {
    plan: [RawRange; CLOCK_SOURCES],
    two_point: bool,
    range: usize,
    second_point: bool,
}

impl CalibrationCursor {
    /// First populated range at or after `from`.
    fn next_range(&self, from: usize) -> Option<usize> {
        (from..CLOCK_SOURCES).find(|&index| self.plan[index].is_used())
    }
}

/// Test frequencies for every clock range the span reaches.
///
/// Two-point calibration measures a quarter of the way in from each edge of the
/// sub-span inside a band, one-point calibration its middle. Ranges the span
/// does not reach keep a zero `freq1_hz`.
pub(super) fn plan(spec: &CalibrationSpec) -> [RawRange; CLOCK_SOURCES] {
    let mut ranges = [RawRange::default(); CLOCK_SOURCES];
    for (source, range) in ClockSource::ALL.iter().zip(ranges.iter_mut()) {
        let lo = spec.start_hz.max(source.min_frequency_hz());
        let hi = spec.end_hz.min(source.band_end_hz() - 1);
        if lo >= hi {
            continue;
        }
        if spec.two_point {
            let quarter = (hi - lo) / 4;
            range.freq1_hz = lo + quarter;
            range.freq2_hz = hi - quarter;
        } else {
            range.freq1_hz = lo + (hi - lo) / 2;
        }
    }
    ranges
}

impl<'a, I, C> Ad5933<'a, I, C>
where
    I: RegisterInterface<AddressType = u8>,
    C: ClockGenerator,
{
    /// Start a calibration against the reference impedance in `spec`.
    ///
    /// `raw` is reset to the test frequencies straight away and filled in as
    /// each range finishes. Feed the finished data to
    /// [`calculate_gain_factor`](crate::calculate_gain_factor).
    ///
    /// # Errors
    ///
    /// Same as [`measure_impedance`](Self::measure_impedance), plus
    /// [`Invalid::EmptySpan`] when the span leaves no room for a test point and
    /// [`Invalid::InvalidImpedance`] for a reference that is not a positive
    /// number. `raw` is only touched once the arguments pass.
    pub fn calibrate(
        &mut self,
        spec: &CalibrationSpec,
        range: &RangeSettings,
        raw: &'a mut GainFactorRawData,
    ) -> Result<(), Rejected<&'a mut GainFactorRawData, I::Error, C::Error>> {
        let (cursor, first) = match self.prepare_calibration(spec) {
            Ok(prepared) => prepared,
            Err(error) => return Err(Rejected { error, output: raw }),
        };

        *raw = GainFactorRawData {
            impedance_ohms: spec.impedance_ohms,
            two_point: spec.two_point,
            ranges: cursor.plan,
        };
        self.range = *range;
        self.calibration = cursor;
        self.points = 0;
        self.fault = None;
        debug!(
            "calibrate {} Hz..{} Hz, two point: {}",
            spec.start_hz,
            spec.end_hz,
            spec.two_point
        );

        self.start(Status::Calibrate, raw, Output::Calibration, |this| {
            this.begin_calibration_range(first)
        })
    }

    fn prepare_calibration(
        &self,
        spec: &CalibrationSpec,
    ) -> Result<(CalibrationCursor, usize), Error<I::Error, C::Error>> {
        self.ensure_ready()?;
        spec.validate()?;
        let cursor = CalibrationCursor {
            plan: plan(spec),
            two_point: spec.two_point,
            range: 0,
            second_point: false,
        };
        let first = cursor.next_range(0).ok_or(Invalid::EmptySpan)?;
        Ok((cursor, first))
    }

    /// Program the test point(s) of one range as a short sweep.
    fn begin_calibration_range(&mut self, index: usize) -> Result<(), Error<I::Error, C::Error>> {
        let target = self.calibration.plan[index];
        let two_point = self.calibration.two_point;
        self.calibration.range = index;
        self.calibration.second_point = false;

        self.sweep = SweepSpec {
            start_hz: target.freq1_hz,
            increment_hz: if two_point {
                target.freq2_hz - target.freq1_hz
            } else {
                0
            },
            increments: u16::from(two_point),
            settling_cycles: self.config.calibration_settling_cycles.min(MAX_SETTLING_CYCLES),
            settling_multiplier: self.config.calibration_settling_multiplier,
            averages: self.config.calibration_averages.max(1),
        };
        self.frequency_hz = target.freq1_hz;
        self.acc = Default::default();
        debug!("calibration range {}", index);

        self.begin_sweep(target.freq1_hz, self.sweep.increments)
    }

    pub(super) fn step_calibration(&mut self) -> Result<(), Error<I::Error, C::Error>> {
        let Some(point) = self.acquire(self.sweep.averages)? else {
            return Ok(());
        };

        let index = self.calibration.range;
        let second_point = self.calibration.second_point;
        if let Output::Calibration(raw) = &mut self.output {
            let entry = &mut raw.ranges[index];
            if second_point {
                entry.real2 = point.real;
                entry.imag2 = point.imag;
            } else {
                entry.real1 = point.real;
                entry.imag1 = point.imag;
            }
        }

        if self.calibration.two_point && !second_point {
            self.calibration.second_point = true;
            self.frequency_hz = self.calibration.plan[index].freq2_hz;
            return self
                .command(ControlFunction::IncrementFrequency)
                .map_err(Error::Bus);
        }

        match self.calibration.next_range(index + 1) {
            Some(next) => self.begin_calibration_range(next),
            None => {
                info!("calibration finished");
                self.status = Status::FinishCalib;
                Ok(())
            }
        }
    }
}
