//! Typed views of the bit-packed fields in the control, settling-time and
//! temperature registers.
//!
//! The register map itself lives in the crate root; the enums here give each
//! multi-bit field a name and an explicit encode/decode pair.

/// Function code held in the upper nibble of the control register (D15..D12).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlFunction {
    /// Program the start frequency into the DDS and start exciting the load.
    InitWithStartFrequency,
    /// Begin the conversion at the current frequency point.
    StartSweep,
    /// Step to the next frequency point and convert.
    IncrementFrequency,
    /// Convert again at the current frequency point.
    RepeatFrequency,
    /// Start a one-shot temperature conversion.
    MeasureTemperature,
    /// Power down the output stage.
    PowerDown,
    /// Output stage biased, no excitation.
    Standby,
}

impl ControlFunction {
    /// Nibble value written to D15..D12.
    pub const fn bits(self) -> u8 {
        match self {
            ControlFunction::InitWithStartFrequency => 0b0001,
            ControlFunction::StartSweep => 0b0010,
            ControlFunction::IncrementFrequency => 0b0011,
            ControlFunction::RepeatFrequency => 0b0100,
            ControlFunction::MeasureTemperature => 0b1001,
            ControlFunction::PowerDown => 0b1010,
            ControlFunction::Standby => 0b1011,
        }
    }

    /// Decode a nibble read back from the control register.
    ///
    /// Returns `None` for the no-operation and reserved codes.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x0F {
            0b0001 => Some(ControlFunction::InitWithStartFrequency),
            0b0010 => Some(ControlFunction::StartSweep),
            0b0011 => Some(ControlFunction::IncrementFrequency),
            0b0100 => Some(ControlFunction::RepeatFrequency),
            0b1001 => Some(ControlFunction::MeasureTemperature),
            0b1010 => Some(ControlFunction::PowerDown),
            0b1011 => Some(ControlFunction::Standby),
            _ => None,
        }
    }
}

/// Excitation amplitude (control register D10..D9).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputRange {
    /// Range 1, 2.0 V peak-to-peak.
    #[default]
    Vpp2000mV,
    /// Range 4, 200 mV peak-to-peak.
    Vpp200mV,
    /// Range 3, 400 mV peak-to-peak.
    Vpp400mV,
    /// Range 2, 1.0 V peak-to-peak.
    Vpp1000mV,
}

impl OutputRange {
    /// Control register D10..D9 pattern.
    pub const fn bits(self) -> u8 {
        match self {
            OutputRange::Vpp2000mV => 0b00,
            OutputRange::Vpp200mV => 0b01,
            OutputRange::Vpp400mV => 0b10,
            OutputRange::Vpp1000mV => 0b11,
        }
    }

    /// Decode D10..D9; higher bits are ignored.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => OutputRange::Vpp2000mV,
            0b01 => OutputRange::Vpp200mV,
            0b10 => OutputRange::Vpp400mV,
            _ => OutputRange::Vpp1000mV,
        }
    }
}

/// Receive-path PGA gain (control register D8).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PgaGain {
    #[default]
    X1,
    X5,
}

impl PgaGain {
    /// State of the D8 bit; set selects ×1.
    pub const fn bit(self) -> bool {
        matches!(self, PgaGain::X1)
    }

    /// Inverse of [`bit`](Self::bit).
    pub const fn from_bit(bit: bool) -> Self {
        if bit {
            PgaGain::X1
        } else {
            PgaGain::X5
        }
    }
}

/// Settling-time multiplier (settling register D10..D9).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SettlingMultiplier {
    #[default]
    X1,
    X2,
    X4,
}

impl SettlingMultiplier {
    /// Settling register D10..D9 pattern.
    pub const fn bits(self) -> u8 {
        match self {
            SettlingMultiplier::X1 => 0b00,
            SettlingMultiplier::X2 => 0b01,
            SettlingMultiplier::X4 => 0b11,
        }
    }

    /// Decode D10..D9. The reserved `0b10` pattern reads back as `None`.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0b11 {
            0b00 => Some(SettlingMultiplier::X1),
            0b01 => Some(SettlingMultiplier::X2),
            0b11 => Some(SettlingMultiplier::X4),
            _ => None,
        }
    }

    /// Multiplier applied to the settling cycle count.
    pub const fn factor(self) -> u32 {
        match self {
            SettlingMultiplier::X1 => 1,
            SettlingMultiplier::X2 => 2,
            SettlingMultiplier::X4 => 4,
        }
    }
}

/// Largest settling-cycle count the 9-bit field holds.
pub const MAX_SETTLING_CYCLES: u16 = 511;

const TEMPERATURE_SIGN: u16 = 1 << 13;
const TEMPERATURE_MASK: u16 = (1 << 14) - 1;

/// Convert the 14-bit temperature word to degrees Celsius.
///
/// D13 is the sign bit; negative readings are offset by 2^14. One LSB is 1/32 °C.
pub fn decode_temperature(raw: u16) -> f32 {
    let raw = raw & TEMPERATURE_MASK;
    let signed = if raw & TEMPERATURE_SIGN != 0 {
        i32::from(raw) - (1 << 14)
    } else {
        i32::from(raw)
    };
    signed as f32 / 32.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_codes_decode_to_themselves() {
        let all = [
            ControlFunction::InitWithStartFrequency,
            ControlFunction::StartSweep,
            ControlFunction::IncrementFrequency,
            ControlFunction::RepeatFrequency,
            ControlFunction::MeasureTemperature,
            ControlFunction::PowerDown,
            ControlFunction::Standby,
        ];
        for function in all {
            assert_eq!(ControlFunction::from_bits(function.bits()), Some(function));
        }
        assert_eq!(ControlFunction::from_bits(0b0000), None);
        assert_eq!(ControlFunction::from_bits(0b1111), None);
    }

    #[test]
    fn settling_multiplier_skips_reserved_pattern() {
        assert_eq!(SettlingMultiplier::X4.bits(), 0b11);
        assert_eq!(SettlingMultiplier::from_bits(0b10), None);
        assert_eq!(SettlingMultiplier::from_bits(0b01), Some(SettlingMultiplier::X2));
    }

    #[test]
    fn pga_bit_selects_unity_gain() {
        assert!(PgaGain::X1.bit());
        assert_eq!(PgaGain::from_bit(false), PgaGain::X5);
    }

    #[test]
    fn temperature_sign_handling() {
        // Datasheet examples: 0x0C80 = +100 °C, 0x3E70 = -12.5 °C, 0x2000 = -256 °C.
        assert_eq!(decode_temperature(0x0C80), 100.0);
        assert_eq!(decode_temperature(0x0001), 1.0 / 32.0);
        assert_eq!(decode_temperature(0x3E70), -12.5);
        assert_eq!(decode_temperature(0x2000), -256.0);
        // Upper two bits are ignored.
        assert_eq!(decode_temperature(0xCC80), 100.0);
    }
}
