//! Calibrate, then sweep an RC load across all four clock ranges
//!
//! This example runs the driver against a mock I2C bus that answers like an
//! AD5933 wired to a switchable load:
//! - Calibrates one point per clock range against a 10 kΩ reference resistor
//! - Sweeps a 10 kΩ ∥ 1 nF load from 500 Hz to 95 kHz
//! - Prints the corrected magnitude and phase of every point
//!
//! The tick loop stands in for a 1 ms timer interrupt.
//!
//! Run with: `cargo run --example sweep --features log`

use std::cell::Cell;
use std::convert::Infallible;
use std::f64::consts::PI;
use std::rc::Rc;

use ad5933::control::ControlFunction;
use ad5933::{
    calculate_gain_factor, convert_polar_to_cartesian, get_magnitude, get_phase,
    register_to_freq, Ad5933, Ad5933Interface, CalibrationSpec, ClockGenerator, ClockSource,
    Config, GainFactorRawData, ImpedanceSample, RangeSettings, Status, SweepSpec,
};
use embedded_hal::i2c::{ErrorType, I2c, Operation};

/// Raw counts per siemens of the simulated front end
const FRONT_END_GAIN: f64 = 2.0e7;

#[derive(Debug, Copy, Clone)]
enum Load {
    Resistor { ohms: f64 },
    ParallelRc { ohms: f64, farads: f64 },
}

impl Load {
    /// Complex impedance at `frequency_hz`.
    fn impedance(self, frequency_hz: f64) -> (f64, f64) {
        match self {
            Load::Resistor { ohms } => (ohms, 0.0),
            Load::ParallelRc { ohms, farads } => {
                let wrc = 2.0 * PI * frequency_hz * ohms * farads;
                let d = 1.0 + wrc * wrc;
                (ohms / d, -ohms * wrc / d)
            }
        }
    }
}

/// Mock AD5933 behind an I2C bus
///
/// Conversions complete instantly; the load and the MCLK fed by the clock
/// generator are shared with the rest of the example.
struct MockBus {
    load: Rc<Cell<Load>>,
    external_mclk: Rc<Cell<u32>>,
    pointer: u8,
    control: [u8; 2],
    start_code: u32,
    increment_code: u32,
    increments: u32,
    index: u32,
    status: u8,
    data: (i16, i16),
}

impl MockBus {
    fn new(load: Rc<Cell<Load>>, external_mclk: Rc<Cell<u32>>) -> Self {
        Self {
            load,
            external_mclk,
            pointer: 0,
            control: [0; 2],
            start_code: 0,
            increment_code: 0,
            increments: 0,
            index: 0,
            status: 0,
            data: (0, 0),
        }
    }

    fn mclk_hz(&self) -> u32 {
        if self.control[1] & 0x08 != 0 {
            self.external_mclk.get()
        } else {
            ClockSource::Internal.mclk_hz()
        }
    }

    fn convert(&mut self) {
        let code = self.start_code + self.index * self.increment_code;
        let frequency_hz = f64::from(register_to_freq(code, self.mclk_hz()));
        let (re, im) = self.load.get().impedance(frequency_hz);
        let counts = FRONT_END_GAIN / re.hypot(im);
        let angle = im.atan2(re);
        self.data = (
            (counts * angle.cos()) as i16,
            (counts * angle.sin()) as i16,
        );
        self.status = 0b010;
        if self.index >= self.increments {
            self.status |= 0b100;
        }
    }

    fn write_register(&mut self, register: u8, data: &[u8]) {
        let value = data.iter().fold(0u32, |acc, b| acc << 8 | u32::from(*b));
        match register {
            0x80 => {
                self.control = [data[0], data[1]];
                match ControlFunction::from_bits(data[0] >> 4) {
                    Some(ControlFunction::InitWithStartFrequency) => {
                        self.index = 0;
                        self.status = 0;
                    }
                    Some(ControlFunction::StartSweep | ControlFunction::RepeatFrequency) => {
                        self.convert()
                    }
                    Some(ControlFunction::IncrementFrequency) => {
                        self.index += 1;
                        self.convert();
                    }
                    Some(ControlFunction::MeasureTemperature) => self.status = 0b001,
                    _ => self.status = 0,
                }
            }
            0x82 => self.start_code = value,
            0x85 => self.increment_code = value,
            0x88 => self.increments = value,
            _ => {}
        }
    }

    fn read_register(&self, register: u8, buffer: &mut [u8]) {
        let value: u16 = match register {
            0x8F => u16::from(self.status),
            0x92 => 0x0320, // 25 °C
            0x94 => self.data.0 as u16,
            0x96 => self.data.1 as u16,
            _ => 0,
        };
        match buffer {
            [byte] => *byte = value as u8,
            _ => buffer.copy_from_slice(&value.to_be_bytes()),
        }
    }
}

impl ErrorType for MockBus {
    type Error = Infallible;
}

impl I2c for MockBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        assert_eq!(address, ad5933::DEFAULT_ADDRESS);
        match operations {
            [Operation::Write([0xB0, register])] => self.pointer = *register,
            [Operation::Write([0xA0, _, data @ ..])] => self.write_register(self.pointer, data),
            [Operation::Write([register, value])] => self.write_register(*register, &[*value]),
            [Operation::Read(buffer)] => self.read_register(self.pointer, buffer),
            [Operation::Write([0xA1, _]), Operation::Read(buffer)] => {
                self.read_register(self.pointer, buffer)
            }
            _ => panic!("unexpected I2C transaction"),
        }
        Ok(())
    }
}

/// Timer channel driving the MCLK pin
struct TimerClock {
    mclk: Rc<Cell<u32>>,
}

impl ClockGenerator for TimerClock {
    type Error = Infallible;

    fn enable(&mut self, frequency_hz: u32) -> Result<(), Self::Error> {
        println!("  → MCLK timer on at {} Hz", frequency_hz);
        self.mclk.set(frequency_hz);
        Ok(())
    }

    fn disable(&mut self) -> Result<(), Self::Error> {
        println!("  → MCLK timer off");
        self.mclk.set(0);
        Ok(())
    }
}

fn run<I, C>(ad5933: &mut Ad5933<'_, I, C>) -> Status
where
    I: ad5933::RegisterInterface<AddressType = u8>,
    C: ClockGenerator,
{
    loop {
        let status = ad5933.tick();
        if !status.is_busy() {
            return status;
        }
    }
}

fn main() {
    #[cfg(feature = "log")]
    init_logging();

    println!("=== AD5933 sweep example ===\n");

    let load = Rc::new(Cell::new(Load::Resistor { ohms: 10_000.0 }));
    let mclk = Rc::new(Cell::new(0));
    let bus = MockBus::new(load.clone(), mclk.clone());

    let mut raw = GainFactorRawData::default();
    let mut samples = [ImpedanceSample::default(); 20];
    let mut celsius = 0.0;

    let mut ad5933 = Ad5933::new(
        Ad5933Interface::new(bus),
        TimerClock { mclk },
        Config::default(),
    );
    ad5933.init().unwrap();

    println!("Measuring die temperature");
    ad5933.measure_temperature(&mut celsius).unwrap();
    run(&mut ad5933);
    println!("  ✓ {:.1} °C\n", ad5933.temperature().unwrap_or(f32::NAN));

    println!("Calibrating against 10 kΩ");
    let calibration = CalibrationSpec {
        impedance_ohms: 10_000.0,
        two_point: false,
        start_hz: 500,
        end_hz: 95_000,
    };
    ad5933
        .calibrate(&calibration, &RangeSettings::default(), &mut raw)
        .unwrap();
    assert_eq!(run(&mut ad5933), Status::FinishCalib);
    let gain = calculate_gain_factor(ad5933.calibration_data().unwrap());
    for (source, range) in ClockSource::ALL.iter().zip(gain.ranges.iter()) {
        println!(
            "  ✓ {:?}: {:.0} Hz, gain {:.3e}",
            source, range.freq1_hz, range.offset
        );
    }

    println!("\nSweeping 10 kΩ ∥ 1 nF");
    load.set(Load::ParallelRc {
        ohms: 10_000.0,
        farads: 1e-9,
    });
    let sweep = SweepSpec {
        start_hz: 500,
        increment_hz: 5_000,
        increments: 18,
        averages: 4,
        ..SweepSpec::default()
    };
    ad5933
        .measure_impedance(&sweep, &RangeSettings::default(), &mut samples)
        .unwrap();
    assert_eq!(run(&mut ad5933), Status::FinishImpedance);

    println!("  {:>8}  {:>10}  {:>8}  {:>10}  {:>10}", "Hz", "|Z| Ω", "∠Z °", "Re Ω", "Im Ω");
    for sample in ad5933.samples() {
        let magnitude = get_magnitude(&gain, sample);
        let phase = get_phase(&gain, sample);
        let (re, im) = convert_polar_to_cartesian(magnitude, phase);
        println!(
            "  {:>8}  {:>10.1}  {:>8.2}  {:>10.1}  {:>10.1}",
            sample.frequency_hz,
            magnitude,
            phase.to_degrees(),
            re,
            im
        );
    }

    let (interface, _clock) = ad5933.release();
    let _bus = interface.release();
    println!("\n=== Done ===");
}

#[cfg(feature = "log")]
fn init_logging() {
    struct Stdout;

    impl log::Log for Stdout {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            println!("  [{}] {}", record.level(), record.args());
        }

        fn flush(&self) {}
    }

    static LOGGER: Stdout = Stdout;
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(log::LevelFilter::Debug));
}
