//! Register-level model of the AD5933 for driver tests.
//!
//! Conversions complete after `latency` status polls. Every command and clock
//! change is logged so tests can check the sequencing.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::control::ControlFunction;
use crate::frequency::ClockGenerator;
use crate::types::Config;
use crate::{Ad5933, RegisterInterface, Status};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusFault;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClockFault;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    /// Control write: function code and the external clock bit.
    Command(ControlFunction, bool),
    /// Control write with the reset bit set.
    Reset,
    /// `Some(hz)` for enable, `None` for disable.
    Clock(Option<u32>),
}

pub struct Chip {
    pub events: Vec<Event>,
    pub control: [u8; 2],
    pub start_code: u32,
    pub increment_code: u32,
    pub increments: u16,
    pub settling: u16,

    /// Results handed out in order, then `default_sample` forever.
    pub samples: VecDeque<(i16, i16)>,
    pub default_sample: (i16, i16),
    pub temperature_raw: u16,
    pub latency: u8,
    /// Never raise a ready flag.
    pub stall: bool,
    pub fail_bus: bool,
    /// Refuse to start the external clock.
    pub fail_clock: bool,
    pub status_reads: usize,

    converting: Option<u8>,
    temperature_pending: Option<u8>,
    impedance_valid: bool,
    temperature_valid: bool,
    index: u16,
    current: (i16, i16),
}

impl Default for Chip {
    fn default() -> Self {
        Chip {
            events: Vec::new(),
            control: [0; 2],
            start_code: 0,
            increment_code: 0,
            increments: 0,
            settling: 0,
            samples: VecDeque::new(),
            default_sample: (1_000, -500),
            temperature_raw: 0x0C80,
            latency: 2,
            stall: false,
            fail_bus: false,
            fail_clock: false,
            status_reads: 0,
            converting: None,
            temperature_pending: None,
            impedance_valid: false,
            temperature_valid: false,
            index: 0,
            current: (0, 0),
        }
    }
}

impl Chip {
    /// Number of control writes issuing `function`.
    pub fn count(&self, function: ControlFunction) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Command(f, _) if *f == function))
            .count()
    }

    pub fn clock_events(&self) -> Vec<Option<u32>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Clock(hz) => Some(*hz),
                _ => None,
            })
            .collect()
    }

    fn start_conversion(&mut self) {
        self.impedance_valid = false;
        self.converting = Some(self.latency);
    }

    fn control_write(&mut self, data: &[u8]) {
        self.control = [data[0], data[1]];
        let external = data[1] & 0x08 != 0;
        if data[1] & 0x10 != 0 {
            self.events.push(Event::Reset);
            self.converting = None;
            self.temperature_pending = None;
            self.impedance_valid = false;
            return;
        }

        let function = ControlFunction::from_bits(data[0] >> 4).expect("unknown function code");
        self.events.push(Event::Command(function, external));
        match function {
            ControlFunction::InitWithStartFrequency => {
                self.index = 0;
                self.impedance_valid = false;
                self.converting = None;
            }
            ControlFunction::StartSweep | ControlFunction::RepeatFrequency => {
                self.start_conversion()
            }
            ControlFunction::IncrementFrequency => {
                self.index += 1;
                self.start_conversion();
            }
            ControlFunction::MeasureTemperature => {
                self.temperature_valid = false;
                self.temperature_pending = Some(self.latency);
            }
            ControlFunction::PowerDown | ControlFunction::Standby => {
                self.converting = None;
                self.impedance_valid = false;
            }
        }
    }

    fn status(&mut self) -> u8 {
        self.status_reads += 1;
        if self.stall {
            return 0;
        }

        match self.converting {
            Some(0) => {
                self.converting = None;
                self.impedance_valid = true;
                self.current = self.samples.pop_front().unwrap_or(self.default_sample);
            }
            Some(n) => self.converting = Some(n - 1),
            None => {}
        }
        match self.temperature_pending {
            Some(0) => {
                self.temperature_pending = None;
                self.temperature_valid = true;
            }
            Some(n) => self.temperature_pending = Some(n - 1),
            None => {}
        }

        let complete = self.impedance_valid && self.index >= self.increments;
        u8::from(self.temperature_valid)
            | u8::from(self.impedance_valid) << 1
            | u8::from(complete) << 2
    }
}

fn be(data: &[u8]) -> u32 {
    data.iter().fold(0, |acc, b| acc << 8 | u32::from(*b))
}

pub struct SimInterface {
    chip: Rc<RefCell<Chip>>,
}

impl RegisterInterface for SimInterface {
    type Error = BusFault;
    type AddressType = u8;

    fn write_register(&mut self, address: u8, _size_bits: u32, data: &[u8]) -> Result<(), BusFault> {
        let mut chip = self.chip.borrow_mut();
        if chip.fail_bus {
            return Err(BusFault);
        }
        match address {
            0x80 => chip.control_write(data),
            0x82 => chip.start_code = be(data),
            0x85 => chip.increment_code = be(data),
            0x88 => chip.increments = be(data) as u16,
            0x8A => chip.settling = be(data) as u16,
            _ => panic!("write to {address:#04x}"),
        }
        Ok(())
    }

    fn read_register(&mut self, address: u8, _size_bits: u32, data: &mut [u8]) -> Result<(), BusFault> {
        let mut chip = self.chip.borrow_mut();
        if chip.fail_bus {
            return Err(BusFault);
        }
        match address {
            0x8F => data[0] = chip.status(),
            0x92 => data.copy_from_slice(&chip.temperature_raw.to_be_bytes()),
            0x94 => data.copy_from_slice(&chip.current.0.to_be_bytes()),
            0x96 => data.copy_from_slice(&chip.current.1.to_be_bytes()),
            _ => panic!("read from {address:#04x}"),
        }
        Ok(())
    }
}

pub struct SimClock {
    chip: Rc<RefCell<Chip>>,
}

impl ClockGenerator for SimClock {
    type Error = ClockFault;

    fn enable(&mut self, frequency_hz: u32) -> Result<(), ClockFault> {
        let mut chip = self.chip.borrow_mut();
        if chip.fail_clock {
            return Err(ClockFault);
        }
        chip.events.push(Event::Clock(Some(frequency_hz)));
        Ok(())
    }

    fn disable(&mut self) -> Result<(), ClockFault> {
        self.chip.borrow_mut().events.push(Event::Clock(None));
        Ok(())
    }
}

pub fn parts() -> (SimInterface, SimClock, Rc<RefCell<Chip>>) {
    let chip = Rc::new(RefCell::new(Chip::default()));
    (
        SimInterface { chip: chip.clone() },
        SimClock { chip: chip.clone() },
        chip,
    )
}

/// Initialized driver on a fresh simulated chip.
pub fn rig<'a>(config: Config) -> (Ad5933<'a, SimInterface, SimClock>, Rc<RefCell<Chip>>) {
    let (interface, clock, chip) = parts();
    let mut ad = Ad5933::new(interface, clock, config);
    ad.init().unwrap();
    (ad, chip)
}

/// Tick until the driver leaves its busy state, at most `limit` times.
pub fn run(ad: &mut Ad5933<'_, SimInterface, SimClock>, limit: usize) -> Status {
    for _ in 0..limit {
        let status = ad.tick();
        if !status.is_busy() {
            return status;
        }
    }
    ad.status()
}
