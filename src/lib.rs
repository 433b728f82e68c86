#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! Non-blocking driver for the Analog Devices AD5933 impedance converter.
//!
//! The AD5933 excites an unknown impedance with a programmable frequency, samples
//! the response and hands back the real and imaginary parts of a 1024-point DFT.
//! This crate sequences the chip through complete frequency sweeps, temperature
//! conversions and gain/phase calibration without ever blocking: the caller
//! starts an operation and then calls [`Ad5933::tick`] from a periodic timer
//! until the driver reaches a finished status.
//!
//! # Features
//!
//! - **Typed register access** - The register map is generated with
//!   [`device-driver`](https://crates.io/crates/device-driver); bit-packed fields
//!   have their own enums in [`control`]
//! - **Tick-driven state machine** - Capacitor charge wait, ready-flag polling and
//!   averaging all advance one step per tick
//! - **Four clock ranges** - Sweeps crossing a band edge switch between the
//!   internal oscillator and three externally generated clocks automatically
//! - **Per-range calibration** - One- or two-point gain/phase calibration for each
//!   clock range the calibration span touches
//! - **No_std support** - Float math through `libm`, optional `defmt` or `log` output
//! - **Bring your own bus** - [`Ad5933Interface`] wraps any `embedded-hal` I2C bus;
//!   anything implementing [`RegisterInterface`] works
//!
//! # Hardware Notes
//!
//! ## Master clock
//!
//! Output frequencies below 30 kHz need a slower MCLK than the 16.776 MHz
//! internal oscillator. The driver expects the board to wire a timer output to the
//! MCLK pin and drives it through the [`ClockGenerator`] trait. See
//! [`ClockSource`] for the band table.
//!
//! ## Coupling capacitor
//!
//! Boards that AC-couple the excitation output need time for the coupling
//! capacitor to charge after the DDS starts. The driver waits four time
//! constants ([`Config::coupling_tau_ms`]) before issuing "start sweep", and
//! repeats that wait after every clock change.
//!
//! # Usage
//!
//! ```ignore
//! let mut ad5933 = Ad5933::new(Ad5933Interface::new(i2c), timer_clock, Config::default());
//! ad5933.init()?;
//!
//! static SAMPLES: StaticCell<[ImpedanceSample; 512]> = StaticCell::new();
//! let samples = SAMPLES.init([ImpedanceSample::default(); 512]);
//! // A rejected start hands `samples` back in `Rejected::output`.
//! ad5933
//!     .measure_impedance(&SweepSpec::default(), &RangeSettings::default(), samples)
//!     .map_err(|rejected| rejected.error)?;
//!
//! // From the 1 ms timer interrupt:
//! match ad5933.tick() {
//!     Status::FinishImpedance => report(ad5933.samples()),
//!     Status::Faulted => ad5933.reset(),
//!     _ => {}
//! }
//! ```
//!
//! # Register Map
//!
//! | Address | Register | Width |
//! |---|---|---|
//! | 0x80 | Control | 16 |
//! | 0x82 | Start frequency | 24 |
//! | 0x85 | Frequency increment | 24 |
//! | 0x88 | Number of increments | 9 of 16 |
//! | 0x8A | Settling time cycles | 11 of 16 |
//! | 0x8F | Status | 8 |
//! | 0x92 | Temperature | 14 of 16 |
//! | 0x94 | Real data | 16 |
//! | 0x96 | Imaginary data | 16 |

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub use device_driver::RegisterInterface;

device_driver::create_device!(
    device_name: Ad5933Registers,
    dsl: {
        config {
            type RegisterAddressType = u8;
            type DefaultByteOrder = BE;
        }
        /// Function code, excitation range, PGA gain, reset and clock source.
        register Control {
            const ADDRESS = 0x80;
            const SIZE_BITS = 16;

            function: uint = 12..16,
            voltage_range: uint = 9..11,
            /// Set for PGA ×1, clear for ×5.
            pga_unity: bool = 8,
            soft_reset: bool = 4,
            external_clock: bool = 3,
        },
        register StartFrequency {
            const ADDRESS = 0x82;
            const SIZE_BITS = 24;

            value: uint = 0..24,
        },
        register FrequencyIncrement {
            const ADDRESS = 0x85;
            const SIZE_BITS = 24;

            value: uint = 0..24,
        },
        register IncrementCount {
            const ADDRESS = 0x88;
            const SIZE_BITS = 16;

            value: uint = 0..9,
        },
        register SettlingTime {
            const ADDRESS = 0x8A;
            const SIZE_BITS = 16;

            cycles: uint = 0..9,
            multiplier: uint = 9..11,
        },
        register StatusFlags {
            type Access = RO;
            const ADDRESS = 0x8F;
            const SIZE_BITS = 8;

            temperature_valid: bool = 0,
            impedance_valid: bool = 1,
            sweep_complete: bool = 2,
        },
        register TemperatureData {
            type Access = RO;
            const ADDRESS = 0x92;
            const SIZE_BITS = 16;

            value: uint = 0..14,
        },
        register RealData {
            type Access = RO;
            const ADDRESS = 0x94;
            const SIZE_BITS = 16;

            value: int = 0..16,
        },
        register ImaginaryData {
            type Access = RO;
            const ADDRESS = 0x96;
            const SIZE_BITS = 16;

            value: int = 0..16,
        }
    }
);

/// Convenience alias for the generated register-level device.
pub type Device<I> = Ad5933Registers<I>;

/// Instantiate a register-level [`Device`] backed by the provided interface.
///
/// Most users want [`Ad5933`] instead; this is for direct register access.
pub fn new_device<I>(interface: I) -> Device<I>
where
    I: RegisterInterface<AddressType = u8>,
{
    Ad5933Registers::new(interface)
}

pub mod control;
mod driver;
mod error;
mod frequency;
mod gain;
mod interface;
mod types;

#[cfg(test)]
mod sim;

pub use driver::{Ad5933, Output, Status};
pub use error::{Error, Invalid, Rejected};
pub use frequency::{
    freq_to_register, register_to_freq, ClockGenerator, ClockSource, CLOCK_SOURCES,
    MAX_FREQUENCY_CODE, MAX_FREQUENCY_HZ,
};
pub use gain::{calculate_gain_factor, convert_polar_to_cartesian, get_magnitude, get_phase};
pub use interface::{Ad5933Interface, DEFAULT_ADDRESS};
pub use types::{
    CalibrationSpec, Config, GainFactor, GainFactorRawData, GainRange, ImpedanceSample,
    RangeSettings, RawRange, SweepSpec, CALIB_AVERAGES, MAX_INCREMENTS,
};
