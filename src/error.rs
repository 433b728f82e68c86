/// Argument check that rejected an operation before any register was touched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Invalid {
    /// Sweep increment of 0 Hz
    ZeroIncrement,
    /// More than 511 increments
    TooManyIncrements,
    /// Averages per point of 0
    ZeroAverages,
    /// Settling cycles past the 9-bit field
    SettlingCyclesOutOfRange,
    /// A frequency outside every clock band, or not encodable on its clock
    FrequencyOutOfRange,
    /// Output slice shorter than the number of sweep points
    BufferTooSmall,
    /// Calibration span with start >= end
    EmptySpan,
    /// Calibration impedance not finite and positive
    InvalidImpedance,
}

/// Error type for driver operations
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<BusError, ClockError> {
    /// Another operation is in flight; retry once the driver is idle
    Busy,

    /// [`init`](crate::Ad5933::init) has not completed yet
    Uninitialized,

    /// Rejected argument
    InvalidArgument(Invalid),

    /// Error from the register interface
    Bus(BusError),

    /// Error from the external clock generator
    Clock(ClockError),

    /// The chip never raised its ready flag within the configured tick budget
    Timeout,
}

impl<BusError, ClockError> From<Invalid> for Error<BusError, ClockError> {
    fn from(invalid: Invalid) -> Self {
        Error::InvalidArgument(invalid)
    }
}

/// A start operation that did not start.
///
/// Carries the output storage back to the caller so the same buffer can be
/// handed to a retry.
#[derive(Debug, PartialEq)]
pub struct Rejected<T, BusError, ClockError> {
    pub error: Error<BusError, ClockError>,
    pub output: T,
}

impl<T, BusError, ClockError> Rejected<T, BusError, ClockError> {
    /// Split into the error and the returned storage.
    pub fn into_parts(self) -> (Error<BusError, ClockError>, T) {
        (self.error, self.output)
    }
}
