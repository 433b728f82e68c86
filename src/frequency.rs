//! Frequency register encoding and master-clock selection
//!
//! The AD5933 DDS is programmed with 24-bit frequency codes that scale with the
//! master clock (MCLK). Low output frequencies need a slow MCLK to fit enough
//! excitation periods into the 1024-sample DFT window, so the driver switches
//! between the internal oscillator and three externally generated clocks as a
//! sweep crosses frequency bands.

/// Highest output frequency the driver will program, in Hz.
pub const MAX_FREQUENCY_HZ: u32 = 100_000;

/// Largest value the 24-bit frequency registers hold.
pub const MAX_FREQUENCY_CODE: u32 = (1 << 24) - 1;

/// Frequency code for an output frequency at a given master clock.
///
/// ```text
/// code = 2^27 × f_OUT / (MCLK / 4)
/// ```
///
/// Evaluated in 64 bits; the numerator needs 46 bits for a 100 kHz
/// output. The same formula encodes the start frequency and the increment.
///
/// ```
/// use ad5933::freq_to_register;
///
/// // 30 kHz on the 16.776 MHz internal oscillator.
/// assert_eq!(freq_to_register(30_000, 16_776_000), 960_069);
/// ```
pub fn freq_to_register(freq_hz: u32, mclk_hz: u32) -> u32 {
    ((u64::from(freq_hz) << 29) / u64::from(mclk_hz)) as u32
}

/// Inverse of [`freq_to_register`], truncated to whole hertz.
pub fn register_to_freq(code: u32, mclk_hz: u32) -> u32 {
    ((u64::from(code) * u64::from(mclk_hz)) >> 29) as u32
}

/// One of the four master clocks, ordered from slowest to fastest.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// 250 kHz from the external generator.
    ExternalSlow,
    /// 1 MHz from the external generator.
    ExternalMid,
    /// 4 MHz from the external generator.
    ExternalFast,
    /// The on-chip 16.776 MHz oscillator.
    Internal,
}

/// Number of clock ranges, and the length of per-range calibration tables.
pub const CLOCK_SOURCES: usize = 4;

impl ClockSource {
    /// All sources in ascending band order.
    pub const ALL: [ClockSource; CLOCK_SOURCES] = [
        ClockSource::ExternalSlow,
        ClockSource::ExternalMid,
        ClockSource::ExternalFast,
        ClockSource::Internal,
    ];

    /// Master clock rate in Hz.
    pub const fn mclk_hz(self) -> u32 {
        match self {
            ClockSource::ExternalSlow => 250_000,
            ClockSource::ExternalMid => 1_000_000,
            ClockSource::ExternalFast => 4_000_000,
            ClockSource::Internal => 16_776_000,
        }
    }

    /// Lowest output frequency this clock is used for.
    pub const fn min_frequency_hz(self) -> u32 {
        match self {
            ClockSource::ExternalSlow => 100,
            ClockSource::ExternalMid => 1_000,
            ClockSource::ExternalFast => 5_000,
            ClockSource::Internal => 30_000,
        }
    }

    /// First frequency past this clock's band (exclusive upper edge).
    pub const fn band_end_hz(self) -> u32 {
        match self {
            ClockSource::ExternalSlow => ClockSource::ExternalMid.min_frequency_hz(),
            ClockSource::ExternalMid => ClockSource::ExternalFast.min_frequency_hz(),
            ClockSource::ExternalFast => ClockSource::Internal.min_frequency_hz(),
            ClockSource::Internal => MAX_FREQUENCY_HZ + 1,
        }
    }

    /// Position in [`ClockSource::ALL`]; also the index into per-range tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn is_external(self) -> bool {
        !matches!(self, ClockSource::Internal)
    }

    /// Pick the clock for an output frequency.
    ///
    /// The slowest clock whose band contains `freq_hz` wins. Returns `None`
    /// below the lowest band or above [`MAX_FREQUENCY_HZ`].
    pub fn for_frequency(freq_hz: u32) -> Option<Self> {
        if freq_hz > MAX_FREQUENCY_HZ {
            return None;
        }
        Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|source| freq_hz >= source.min_frequency_hz())
    }

    /// Encode a frequency against this clock, rejecting codes that overflow 24 bits.
    pub fn encode(self, freq_hz: u32) -> Option<u32> {
        let code = freq_to_register(freq_hz, self.mclk_hz());
        (code <= MAX_FREQUENCY_CODE).then_some(code)
    }
}

/// External master-clock generator, typically a timer output-compare channel
/// wired to the AD5933 MCLK pin.
///
/// The driver only calls `enable` for the three external sources and stops the
/// output before every reprogramming.
pub trait ClockGenerator {
    /// Error type for generator operations
    type Error;

    /// Start (or retune) the output at `frequency_hz`.
    fn enable(&mut self, frequency_hz: u32) -> Result<(), Self::Error>;

    /// Stop the output.
    fn disable(&mut self) -> Result<(), Self::Error>;
}
