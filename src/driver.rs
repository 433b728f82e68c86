//! Tick-driven measurement state machine.

use core::mem;

use crate::control::{decode_temperature, ControlFunction};
use crate::error::{Error, Invalid, Rejected};
use crate::frequency::{ClockGenerator, ClockSource};
use crate::types::{Config, GainFactorRawData, ImpedanceSample, RangeSettings, SweepSpec};
use crate::{Ad5933Registers, Device, RegisterInterface};

mod calibration;

use calibration::CalibrationCursor;

/// Driver state, as returned by [`Ad5933::tick`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// Constructed, [`Ad5933::init`] not yet run
    Uninit,
    Idle,
    MeasureImpedance,
    FinishImpedance,
    MeasureTemp,
    FinishTemp,
    Calibrate,
    FinishCalib,
    /// An operation stopped on a bus error or poll timeout; see [`Ad5933::fault`]
    Faulted,
}

impl Status {
    /// True while an operation is in flight and the tick handler owns the chip.
    pub const fn is_busy(self) -> bool {
        matches!(
            self,
            Status::MeasureImpedance | Status::MeasureTemp | Status::Calibrate
        )
    }
}

/// Caller storage borrowed for the current operation.
#[derive(Debug, Default)]
pub enum Output<'a> {
    #[default]
    Empty,
    Sweep(&'a mut [ImpedanceSample]),
    Calibration(&'a mut GainFactorRawData),
    Temperature(&'a mut f32),
}

#[derive(Debug, Copy, Clone, Default)]
struct Accumulator {
    real: i32,
    imag: i32,
    count: u16,
}

/// An averaged conversion result.
#[derive(Debug, Copy, Clone)]
struct Point {
    real: i16,
    imag: i16,
    sweep_complete: bool,
}

/// AD5933 driver.
///
/// Owns the register interface and the external clock generator. Start an
/// operation with [`measure_impedance`](Self::measure_impedance),
/// [`measure_temperature`](Self::measure_temperature) or
/// [`calibrate`](Self::calibrate), then call [`tick`](Self::tick) once per
/// timer period until [`is_busy`](Self::is_busy) turns false.
///
/// The output storage handed to a start operation stays borrowed by the
/// driver; read results through [`samples`](Self::samples),
/// [`calibration_data`](Self::calibration_data) and
/// [`temperature`](Self::temperature), or get the borrow back with
/// [`take_output`](Self::take_output).
pub struct Ad5933<'a, I, C>
where
    I: RegisterInterface<AddressType = u8>,
    C: ClockGenerator,
{
    device: Device<I>,
    clock: C,
    config: Config,
    status: Status,
    output: Output<'a>,
    fault: Option<Error<I::Error, C::Error>>,

    // Captured at operation start.
    sweep: SweepSpec,
    range: RangeSettings,

    active_clock: Option<ClockSource>,
    ticks: u32,
    charge_from: Option<u32>,
    waiting_ticks: u32,
    // The chip's programmed sweep runs to the last point.
    final_leg: bool,
    acc: Accumulator,
    points: u16,
    frequency_hz: u32,
    calibration: CalibrationCursor,
}

impl<'a, I, C> Ad5933<'a, I, C>
where
    I: RegisterInterface<AddressType = u8>,
    C: ClockGenerator,
{
    /// Create the driver. Nothing is written to the chip until [`init`](Self::init).
    pub fn new(interface: I, clock: C, config: Config) -> Self {
        Self {
            device: Ad5933Registers::new(interface),
            clock,
            config,
            status: Status::Uninit,
            output: Output::Empty,
            fault: None,
            sweep: SweepSpec::default(),
            range: RangeSettings::default(),
            active_clock: None,
            ticks: 0,
            charge_from: None,
            waiting_ticks: 0,
            final_leg: false,
            acc: Accumulator::default(),
            points: 0,
            frequency_hz: 0,
            calibration: CalibrationCursor::default(),
        }
    }

    /// Pulse the chip's reset bit, leave it in standby and enter [`Status::Idle`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] while an operation is running and
    /// [`Error::Bus`] if the control register write fails.
    pub fn init(&mut self) -> Result<(), Error<I::Error, C::Error>> {
        if self.status.is_busy() {
            return Err(Error::Busy);
        }
        self.pulse_reset().map_err(Error::Bus)?;
        self.status = Status::Idle;
        info!("AD5933 initialized");
        Ok(())
    }

    /// Abort whatever is running and return to [`Status::Idle`].
    ///
    /// Always succeeds: bus or clock errors during the reset pulse are logged
    /// and dropped. Partial averages are discarded; points already stored stay
    /// readable through [`samples`](Self::samples).
    pub fn reset(&mut self) -> Status {
        let previous = self.active_clock.take();
        if self.pulse_reset().is_err() {
            warn!("reset: control register write failed");
        }
        if previous.is_some_and(ClockSource::is_external) && self.clock.disable().is_err() {
            warn!("reset: external clock did not stop");
        }
        if self.status.is_busy() {
            info!("{:?} aborted", self.status);
        }
        self.charge_from = None;
        self.waiting_ticks = 0;
        self.acc = Accumulator::default();
        self.fault = None;
        self.status = Status::Idle;
        self.status
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// True while an operation is in flight. Idle, finished and faulted
    /// states are all safe for starting a new operation.
    pub fn is_busy(&self) -> bool {
        self.status.is_busy()
    }

    /// Error that moved the driver to [`Status::Faulted`].
    pub fn fault(&self) -> Option<&Error<I::Error, C::Error>> {
        self.fault.as_ref()
    }

    /// Sweep points written so far.
    pub fn sweep_count(&self) -> usize {
        usize::from(self.points)
    }

    /// Clock range currently programmed into the chip.
    pub fn active_clock(&self) -> Option<ClockSource> {
        self.active_clock
    }

    /// Points written by the current or last sweep.
    pub fn samples(&self) -> &[ImpedanceSample] {
        match &self.output {
            Output::Sweep(buffer) => &buffer[..self.sweep_count().min(buffer.len())],
            _ => &[],
        }
    }

    /// Raw calibration data of the current or last calibration.
    pub fn calibration_data(&self) -> Option<&GainFactorRawData> {
        match &self.output {
            Output::Calibration(raw) => Some(&**raw),
            _ => None,
        }
    }

    /// Result of a finished temperature conversion, in °C.
    pub fn temperature(&self) -> Option<f32> {
        match (&self.output, self.status) {
            (Output::Temperature(dest), Status::FinishTemp) => Some(**dest),
            _ => None,
        }
    }

    /// Hand the output borrow back to the caller. Returns `None` while busy.
    pub fn take_output(&mut self) -> Option<Output<'a>> {
        if self.is_busy() {
            return None;
        }
        self.points = 0;
        Some(mem::take(&mut self.output))
    }

    /// Consume the driver and return the register interface and clock generator.
    pub fn release(self) -> (I, C) {
        let Ad5933Registers { interface, .. } = self.device;
        (interface, self.clock)
    }

    /// Start a frequency sweep writing one point per frequency into `buffer`.
    ///
    /// Arguments are checked before any register write. The clock range is
    /// checked for the first point only; later band crossings trigger a clock
    /// change when the sweep reaches them.
    ///
    /// # Errors
    ///
    /// On rejection `buffer` comes back inside [`Rejected`] together with:
    ///
    /// - [`Error::Busy`] if another operation is running; nothing changes
    /// - [`Error::InvalidArgument`] for a bad sweep or a `buffer` shorter than
    ///   `sweep.increments + 1`
    /// - [`Error::Bus`] / [`Error::Clock`] if programming the chip fails; the
    ///   chip is put back in standby and the driver is left idle
    pub fn measure_impedance(
        &mut self,
        sweep: &SweepSpec,
        range: &RangeSettings,
        buffer: &'a mut [ImpedanceSample],
    ) -> Result<(), Rejected<&'a mut [ImpedanceSample], I::Error, C::Error>> {
        let checked = self
            .ensure_ready()
            .and_then(|()| sweep.validate().map_err(Error::from))
            .and_then(|()| {
                if buffer.len() < sweep.points() {
                    Err(Invalid::BufferTooSmall.into())
                } else {
                    Ok(())
                }
            });
        if let Err(error) = checked {
            return Err(Rejected {
                error,
                output: buffer,
            });
        }

        self.sweep = *sweep;
        self.range = *range;
        self.points = 0;
        self.frequency_hz = sweep.start_hz;
        self.acc = Accumulator::default();
        self.fault = None;
        debug!(
            "sweep {} Hz + {} x {} Hz, {} averages",
            sweep.start_hz,
            sweep.increments,
            sweep.increment_hz,
            sweep.averages
        );

        self.start(Status::MeasureImpedance, buffer, Output::Sweep, |this| {
            this.begin_sweep(sweep.start_hz, sweep.increments)
        })
    }

    /// Start a one-shot temperature conversion into `dest`.
    pub fn measure_temperature(
        &mut self,
        dest: &'a mut f32,
    ) -> Result<(), Rejected<&'a mut f32, I::Error, C::Error>> {
        if let Err(error) = self.ensure_ready() {
            return Err(Rejected {
                error,
                output: dest,
            });
        }
        self.fault = None;
        self.start(Status::MeasureTemp, dest, Output::Temperature, |this| {
            this.command(ControlFunction::MeasureTemperature)
                .map_err(Error::Bus)
        })
    }

    /// Advance the running operation by one step.
    ///
    /// Call from a fixed-period timer. Each call performs at most a handful of
    /// register transfers and never waits on the chip.
    pub fn tick(&mut self) -> Status {
        self.ticks = self.ticks.wrapping_add(1);
        let step = match self.status {
            Status::MeasureImpedance => self.step_impedance(),
            Status::MeasureTemp => self.step_temperature(),
            Status::Calibrate => self.step_calibration(),
            _ => Ok(()),
        };
        if let Err(error) = step {
            warn!("{:?} faulted", self.status);
            self.fault = Some(error);
            self.quiesce();
            self.status = Status::Faulted;
        }
        self.status
    }

    fn ensure_ready(&self) -> Result<(), Error<I::Error, C::Error>> {
        match self.status {
            Status::Uninit => Err(Error::Uninitialized),
            status if status.is_busy() => Err(Error::Busy),
            _ => Ok(()),
        }
    }

    /// Run the hardware part of a start operation. On success the driver takes
    /// `output` and enters `status`; on failure it falls back to idle and hands
    /// `output` back.
    fn start<T, F>(
        &mut self,
        status: Status,
        output: T,
        store: fn(T) -> Output<'a>,
        program: F,
    ) -> Result<(), Rejected<T, I::Error, C::Error>>
    where
        F: FnOnce(&mut Self) -> Result<(), Error<I::Error, C::Error>>,
    {
        self.waiting_ticks = 0;
        match program(self) {
            Ok(()) => {
                self.output = store(output);
                self.status = status;
                Ok(())
            }
            Err(error) => {
                warn!("{:?} not started", status);
                self.quiesce();
                self.status = Status::Idle;
                Err(Rejected { error, output })
            }
        }
    }

    /// Put the chip in standby and stop the external clock after a failure.
    /// Errors on the way are logged and dropped.
    fn quiesce(&mut self) {
        if self.command(ControlFunction::Standby).is_err() {
            warn!("standby after failure not acknowledged");
        }
        if self.active_clock.take().is_some_and(ClockSource::is_external)
            && self.clock.disable().is_err()
        {
            warn!("external clock did not stop");
        }
        self.charge_from = None;
        self.acc = Accumulator::default();
    }

    fn write_control(&mut self, function: ControlFunction, reset: bool) -> Result<(), I::Error> {
        let range = self.range;
        let external = self.active_clock.is_some_and(ClockSource::is_external);
        trace!("control {:?} reset={}", function, reset);
        self.device.control().write(|r| {
            r.set_function(function.bits());
            r.set_voltage_range(range.output_range.bits());
            r.set_pga_unity(range.pga_gain.bit());
            r.set_soft_reset(reset);
            r.set_external_clock(external);
        })
    }

    fn command(&mut self, function: ControlFunction) -> Result<(), I::Error> {
        self.write_control(function, false)
    }

    fn pulse_reset(&mut self) -> Result<(), I::Error> {
        self.write_control(ControlFunction::Standby, true)?;
        self.command(ControlFunction::Standby)
    }

    fn switch_clock(&mut self, source: ClockSource) -> Result<(), Error<I::Error, C::Error>> {
        if self.active_clock.is_some_and(ClockSource::is_external) {
            self.clock.disable().map_err(Error::Clock)?;
        }
        if source.is_external() {
            self.clock.enable(source.mclk_hz()).map_err(Error::Clock)?;
        }
        debug!("mclk {:?} -> {:?}", self.active_clock, source);
        self.active_clock = Some(source);
        Ok(())
    }

    /// Program a (partial) sweep starting at `start_hz` from scratch.
    ///
    /// The chip cannot change clock in the middle of a sweep, so every clock
    /// change goes through here: standby, clock switch, frequency and count
    /// registers, "initialize with start frequency", then the capacitor charge
    /// wait before "start sweep" goes out from [`tick`](Self::tick).
    fn begin_sweep(
        &mut self,
        start_hz: u32,
        increments: u16,
    ) -> Result<(), Error<I::Error, C::Error>> {
        let sweep = self.sweep;
        let source = ClockSource::for_frequency(start_hz).ok_or(Invalid::FrequencyOutOfRange)?;
        let start_code = source.encode(start_hz).ok_or(Invalid::FrequencyOutOfRange)?;

        // A leg whose next point leaves the band holds a single point; the
        // band change reprograms everything, so the increment is never used.
        let next_in_band = increments > 0
            && start_hz
                .checked_add(sweep.increment_hz)
                .is_some_and(|next| next < source.band_end_hz());
        let (increment_code, leg_increments) = if next_in_band {
            let code = source
                .encode(sweep.increment_hz)
                .ok_or(Invalid::FrequencyOutOfRange)?;
            (code, increments)
        } else {
            (0, 0)
        };
        self.final_leg = next_in_band || increments == 0;

        self.command(ControlFunction::Standby).map_err(Error::Bus)?;
        self.switch_clock(source)?;
        // Standby again so the control register carries the new clock bit.
        self.command(ControlFunction::Standby).map_err(Error::Bus)?;

        self.device
            .start_frequency()
            .write(|r| r.set_value(start_code))
            .map_err(Error::Bus)?;
        self.device
            .frequency_increment()
            .write(|r| r.set_value(increment_code))
            .map_err(Error::Bus)?;
        self.device
            .increment_count()
            .write(|r| r.set_value(leg_increments))
            .map_err(Error::Bus)?;
        self.device
            .settling_time()
            .write(|r| {
                r.set_cycles(sweep.settling_cycles);
                r.set_multiplier(sweep.settling_multiplier.bits());
            })
            .map_err(Error::Bus)?;

        self.command(ControlFunction::InitWithStartFrequency)
            .map_err(Error::Bus)?;
        self.charge_from = Some(self.ticks);
        self.waiting_ticks = 0;
        Ok(())
    }

    /// While the coupling capacitor charges, returns `true` and issues "start
    /// sweep" once the wait is over.
    fn charging(&mut self) -> Result<bool, Error<I::Error, C::Error>> {
        let Some(since) = self.charge_from else {
            return Ok(false);
        };
        if self.ticks.wrapping_sub(since) >= self.config.charge_ticks() {
            self.command(ControlFunction::StartSweep).map_err(Error::Bus)?;
            self.charge_from = None;
            self.waiting_ticks = 0;
        }
        Ok(true)
    }

    /// Count a tick spent waiting on a ready flag.
    fn still_waiting(&mut self) -> Result<(), Error<I::Error, C::Error>> {
        self.waiting_ticks = self.waiting_ticks.saturating_add(1);
        match self.config.poll_timeout_ticks {
            Some(limit) if self.waiting_ticks > limit => Err(Error::Timeout),
            _ => Ok(()),
        }
    }

    /// Poll for a conversion and fold it into the running average.
    ///
    /// Returns the averaged point once `averages` conversions are in, issuing
    /// "repeat frequency" between them.
    fn acquire(&mut self, averages: u16) -> Result<Option<Point>, Error<I::Error, C::Error>> {
        if self.charging()? {
            return Ok(None);
        }

        let flags = self.device.status_flags().read().map_err(Error::Bus)?;
        if !flags.impedance_valid() {
            self.still_waiting()?;
            return Ok(None);
        }
        self.waiting_ticks = 0;

        let real = self.device.real_data().read().map_err(Error::Bus)?.value();
        let imag = self.device.imaginary_data().read().map_err(Error::Bus)?.value();
        self.acc.real += i32::from(real);
        self.acc.imag += i32::from(imag);
        self.acc.count += 1;

        if self.acc.count < averages {
            self.command(ControlFunction::RepeatFrequency)
                .map_err(Error::Bus)?;
            return Ok(None);
        }

        let count = i32::from(self.acc.count);
        let point = Point {
            real: (self.acc.real / count) as i16,
            imag: (self.acc.imag / count) as i16,
            sweep_complete: flags.sweep_complete(),
        };
        self.acc = Accumulator::default();
        Ok(Some(point))
    }

    fn step_impedance(&mut self) -> Result<(), Error<I::Error, C::Error>> {
        let Some(point) = self.acquire(self.sweep.averages)? else {
            return Ok(());
        };

        let index = self.sweep_count();
        let frequency_hz = self.frequency_hz;
        if let Output::Sweep(buffer) = &mut self.output {
            if let Some(slot) = buffer.get_mut(index) {
                *slot = ImpedanceSample {
                    frequency_hz,
                    real: point.real,
                    imag: point.imag,
                };
            }
        }
        self.points += 1;

        if (point.sweep_complete && self.final_leg) || self.points > self.sweep.increments {
            info!("sweep finished, {} points", self.points);
            self.status = Status::FinishImpedance;
            return Ok(());
        }

        let next_hz = frequency_hz + self.sweep.increment_hz;
        let source = ClockSource::for_frequency(next_hz).ok_or(Invalid::FrequencyOutOfRange)?;
        self.frequency_hz = next_hz;
        if Some(source) == self.active_clock {
            self.command(ControlFunction::IncrementFrequency)
                .map_err(Error::Bus)
        } else {
            self.begin_sweep(next_hz, self.sweep.increments - self.points)
        }
    }

    fn step_temperature(&mut self) -> Result<(), Error<I::Error, C::Error>> {
        let flags = self.device.status_flags().read().map_err(Error::Bus)?;
        if !flags.temperature_valid() {
            return self.still_waiting();
        }
        let raw = self
            .device
            .temperature_data()
            .read()
            .map_err(Error::Bus)?
            .value();
        let celsius = decode_temperature(raw);
        if let Output::Temperature(dest) = &mut self.output {
            **dest = celsius;
        }
        debug!("temperature raw {}", raw);
        self.status = Status::FinishTemp;
        Ok(())
    }
}
