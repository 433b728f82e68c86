//! I2C register transport
//!
//! The AD5933 has an internal address pointer. Single registers are written as
//! `[address, value]`; anything wider goes through the pointer:
//!
//! ```text
//! set pointer:  0xB0 <address>
//! block write:  0xA0 <n> <byte 0> .. <byte n-1>
//! block read:   0xA1 <n>, then read n bytes
//! ```
//!
//! Bytes travel most-significant first, which matches the big-endian register
//! map in the crate root. Every call is a single bus transaction; timeouts are
//! left to the I2C implementation and errors are returned without retrying.

use embedded_hal::i2c::I2c;

use crate::RegisterInterface;

/// Fixed 7-bit bus address.
pub const DEFAULT_ADDRESS: u8 = 0x0D;

const BLOCK_WRITE: u8 = 0xA0;
const BLOCK_READ: u8 = 0xA1;
const ADDRESS_POINTER: u8 = 0xB0;

/// Widest register in the map, in bytes.
const MAX_BLOCK: usize = 3;

/// [`RegisterInterface`] over an `embedded-hal` I2C bus.
pub struct Ad5933Interface<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Ad5933Interface<I2C> {
    /// Interface on [`DEFAULT_ADDRESS`].
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, DEFAULT_ADDRESS)
    }

    /// Interface on a different 7-bit `address`.
    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Point the internal address pointer at `register`.
    pub fn set_address(&mut self, register: u8) -> Result<(), I2C::Error> {
        self.i2c.write(self.address, &[ADDRESS_POINTER, register])
    }

    /// Single-byte write: register address, then data.
    pub fn write_u8(&mut self, register: u8, value: u8) -> Result<(), I2C::Error> {
        self.i2c.write(self.address, &[register, value])
    }

    /// Block write of `value` MSB first, starting at `register`.
    pub fn write_u16(&mut self, register: u8, value: u16) -> Result<(), I2C::Error> {
        self.write_block(register, &value.to_be_bytes())
    }

    /// Block write of the low 24 bits of `value`, MSB first.
    pub fn write_u24(&mut self, register: u8, value: u32) -> Result<(), I2C::Error> {
        self.write_block(register, &value.to_be_bytes()[1..])
    }

    /// Set the pointer to `register` and read one byte back.
    pub fn read_u8(&mut self, register: u8) -> Result<u8, I2C::Error> {
        let mut buf = [0u8; 1];
        self.set_address(register)?;
        self.i2c.read(self.address, &mut buf)?;
        Ok(buf[0])
    }

    /// Block read of two bytes starting at `register`, MSB first.
    pub fn read_u16(&mut self, register: u8) -> Result<u16, I2C::Error> {
        let mut buf = [0u8; 2];
        self.read_block(register, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Consume the interface and return the bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<(), I2C::Error> {
        debug_assert!(data.len() <= MAX_BLOCK);
        let mut frame = [0u8; MAX_BLOCK + 2];
        frame[0] = BLOCK_WRITE;
        frame[1] = data.len() as u8;
        frame[2..2 + data.len()].copy_from_slice(data);

        self.set_address(register)?;
        self.i2c.write(self.address, &frame[..2 + data.len()])
    }

    fn read_block(&mut self, register: u8, data: &mut [u8]) -> Result<(), I2C::Error> {
        self.set_address(register)?;
        self.i2c
            .write_read(self.address, &[BLOCK_READ, data.len() as u8], data)
    }
}

impl<I2C: I2c> RegisterInterface for Ad5933Interface<I2C> {
    type Error = I2C::Error;
    type AddressType = u8;

    fn write_register(
        &mut self,
        address: Self::AddressType,
        _size_bits: u32,
        data: &[u8],
    ) -> Result<(), Self::Error> {
        match data {
            [value] => self.write_u8(address, *value),
            _ => self.write_block(address, data),
        }
    }

    fn read_register(
        &mut self,
        address: Self::AddressType,
        _size_bits: u32,
        data: &mut [u8],
    ) -> Result<(), Self::Error> {
        if let [byte] = data {
            *byte = self.read_u8(address)?;
            Ok(())
        } else {
            self.read_block(address, data)
        }
    }
}
