//! A platform agnostic driver for daisy-chained MAX7219 (LED matrix display driver) chips
//!
//! This driver was built using [`embedded-hal`] traits, with an async flavour
//! on top of [`embedded-hal-async`] in the [`asynch`] module.
//!
//! Devices in the chain are addressed 1-based: device 1 is the device
//! farthest from the controller, device N is the one wired to it.
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/~1.0
//! [`embedded-hal-async`]: https://docs.rs/embedded-hal-async/~1.0

#![deny(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod asynch;
pub mod connectors;
mod error;
pub mod frame;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{SpiBus, SpiDevice};

pub use crate::connectors::{ChainedConnector, Connector, SpiConnector};
pub use crate::error::{ConnectorError, Error};
use crate::frame::FRAME_CAPACITY;

/// Maximum number of displays connected in series supported by this lib.
pub const MAX_DISPLAYS: usize = 8;

/// Digits (matrix columns) per display
pub const MAX_DIGITS: usize = 8;

/// Possible command register values on the display chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Noop = 0x00,
    Digit0 = 0x01,
    Digit1 = 0x02,
    Digit2 = 0x03,
    Digit3 = 0x04,
    Digit4 = 0x05,
    Digit5 = 0x06,
    Digit6 = 0x07,
    Digit7 = 0x08,
    DecodeMode = 0x09,
    Intensity = 0x0A,
    ScanLimit = 0x0B,
    Power = 0x0C,
    DisplayTest = 0x0F,
}

impl Command {
    /// Digit registers in column order.
    pub const DIGITS: [Command; MAX_DIGITS] = [
        Command::Digit0,
        Command::Digit1,
        Command::Digit2,
        Command::Digit3,
        Command::Digit4,
        Command::Digit5,
        Command::Digit6,
        Command::Digit7,
    ];

    /// Digit register for a 1-based column, `None` outside `1..=8`.
    pub const fn column(column: u8) -> Option<Command> {
        Some(match column {
            1 => Command::Digit0,
            2 => Command::Digit1,
            3 => Command::Digit2,
            4 => Command::Digit3,
            5 => Command::Digit4,
            6 => Command::Digit5,
            7 => Command::Digit6,
            8 => Command::Digit7,
            _ => return None,
        })
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}

/// Decode modes for BCD encoded input.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeMode {
    NoDecode = 0x00,
    CodeBDigit0 = 0x01,
    CodeBDigits3_0 = 0x0F,
    CodeBDigits7_0 = 0xFF,
}

/// Driver settings that are fixed for the lifetime of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Number of devices connected in series, `1..=MAX_DISPLAYS`.
    pub devices: usize,
    /// Delay after every frame, in microseconds.
    pub settle_us: u32,
    /// How many times a failed frame is sent again before giving up.
    pub retries: u8,
    /// Shift a no-op frame through the chain after every column cleared.
    /// Some early chip revisions need it to flush the shift registers.
    pub flush_after_clear: bool,
}

impl Config {
    pub const fn new(devices: usize) -> Self {
        Config {
            devices,
            settle_us: 1_000,
            retries: 2,
            flush_after_clear: false,
        }
    }

    pub const fn with_settle_us(mut self, settle_us: u32) -> Self {
        self.settle_us = settle_us;
        self
    }

    pub const fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    pub const fn with_flush_after_clear(mut self, flush: bool) -> Self {
        self.flush_after_clear = flush;
        self
    }

    fn is_valid(&self) -> bool {
        (1..=MAX_DISPLAYS).contains(&self.devices)
    }
}

/// Narrows a raw register or data value to a byte.
fn to_byte<T: TryInto<u8>>(value: T) -> Option<u8> {
    value.try_into().ok()
}

fn device_in_range(devices: usize, addr: usize) -> bool {
    (1..=devices).contains(&addr)
}

/// Last byte committed to every column of every device.
#[derive(Debug, Clone, Copy)]
struct ColumnCache([[u8; MAX_DIGITS]; MAX_DISPLAYS]);

impl ColumnCache {
    const fn new() -> Self {
        ColumnCache([[0; MAX_DIGITS]; MAX_DISPLAYS])
    }

    fn get(&self, addr: usize, column: u8) -> u8 {
        self.0[addr - 1][usize::from(column) - 1]
    }

    fn set(&mut self, addr: usize, column: u8, data: u8) {
        self.0[addr - 1][usize::from(column) - 1] = data;
    }
}

///
/// Handles communication with a chain of MAX7219 chips.
/// Each display is connected in series with the next and all of them are
/// controlled over a single connection.
///
pub struct MAX7219<CONNECTOR> {
    c: CONNECTOR,
    config: Config,
    columns: ColumnCache,
}

impl<SPI, CS, D> MAX7219<SpiConnector<SPI, CS, D>>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    ///
    /// Returns a new MAX7219 handler for displays connected over SPI
    /// with a dedicated chip-select pin. No data is sent.
    ///
    /// # Arguments
    ///
    /// * `devices` - number of displays connected in series
    /// * `spi` - the SPI bus, configured for mode 0
    /// * `cs` - the CS/LOAD PIN previously set to Output mode
    /// * `delay` - delay provider used to settle between frames
    ///
    /// # Errors
    ///
    /// * `InvalidDeviceCount` - `devices` is 0 or above `MAX_DISPLAYS`
    ///
    pub fn from_spi(
        devices: usize,
        spi: SPI,
        cs: CS,
        delay: D,
    ) -> Result<Self, Error<ConnectorError<SPI::Error, CS::Error>>> {
        Self::with_config(SpiConnector::new(spi, cs, delay), Config::new(devices))
    }
}

impl<SPI, D> MAX7219<ChainedConnector<SPI, D>>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    ///
    /// Returns a new MAX7219 handler for displays connected over an
    /// `SpiDevice`, which frames each write as one transaction. No data is sent.
    ///
    /// # Arguments
    ///
    /// * `devices` - number of displays connected in series
    /// * `spi` - the SPI device, configured for mode 0
    /// * `delay` - delay provider used to settle between frames
    ///
    /// # Errors
    ///
    /// * `InvalidDeviceCount` - `devices` is 0 or above `MAX_DISPLAYS`
    ///
    pub fn from_spi_device(devices: usize, spi: SPI, delay: D) -> Result<Self, Error<SPI::Error>> {
        Self::with_config(ChainedConnector::new(spi, delay), Config::new(devices))
    }
}

impl<CONNECTOR> MAX7219<CONNECTOR>
where
    CONNECTOR: Connector,
{
    /// Wraps an already built connector. No data is sent.
    pub fn with_config(
        connector: CONNECTOR,
        config: Config,
    ) -> Result<Self, Error<CONNECTOR::Error>> {
        if !config.is_valid() {
            return Err(Error::InvalidDeviceCount);
        }
        Ok(MAX7219 {
            c: connector,
            config,
            columns: ColumnCache::new(),
        })
    }

    /// Number of devices in the chain.
    pub fn device_count(&self) -> usize {
        self.config.devices
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gives the connector back.
    pub fn release(self) -> CONNECTOR {
        self.c
    }

    ///
    /// Writes data to given register of one device in the chain. Every
    /// other device receives a no-op.
    ///
    /// # Arguments
    ///
    /// * `addr` - display to address as connected in series, 1-based
    /// * `register` - the register to write to, must fit a byte
    /// * `data` - the data value, must fit a byte
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - `register` or `data` is outside `0x00..=0xFF`
    /// * `InvalidDeviceIndex` - `addr` is outside `1..=device_count`
    /// * `TransferFailed` - the connector failed on every attempt
    ///
    pub fn write<R, V>(
        &mut self,
        addr: usize,
        register: R,
        data: V,
    ) -> Result<(), Error<CONNECTOR::Error>>
    where
        R: TryInto<u8>,
        V: TryInto<u8>,
    {
        let (Some(register), Some(data)) = (to_byte(register), to_byte(data)) else {
            return Err(Error::InvalidArgument);
        };
        self.write_raw(addr, register, data)
    }

    ///
    /// Writes data to given register as described by command
    ///
    /// # Arguments
    ///
    /// * `addr` - display to address as connected in series, 1-based
    /// * `command` - the command/register on the display to write to
    /// * `data` - the data byte value
    ///
    pub fn write_data(
        &mut self,
        addr: usize,
        command: Command,
        data: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_raw(addr, command as u8, data)
    }

    /// Sends the same command to every device in a single frame.
    pub fn write_all(&mut self, command: Command, data: u8) -> Result<(), Error<CONNECTOR::Error>> {
        debug!(
            "write {} to register {} of all devices",
            data, command as u8
        );
        let mut buffer = [0; FRAME_CAPACITY];
        let Some(frame) =
            frame::build_broadcast(self.config.devices, command as u8, data, &mut buffer)
        else {
            return Err(Error::InvalidDeviceCount);
        };
        Self::transmit(&mut self.c, &self.config, frame)
    }

    ///
    /// Sets how many digits (columns) the device scans
    ///
    /// # Arguments
    ///
    /// * `addr` - display to address as connected in series
    /// * `limit` - scan limit, `0x00` (digit 0 only) to `0x07` (all digits)
    ///
    pub fn set_scan_limit(
        &mut self,
        addr: usize,
        limit: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_data(addr, Command::ScanLimit, limit)
    }

    ///
    /// Sets intensity level on the display
    ///
    /// # Arguments
    ///
    /// * `addr` - display to address as connected in series
    /// * `intensity` - intensity value to set to `0x00` to 0x0F`
    ///
    pub fn set_intensity(
        &mut self,
        addr: usize,
        intensity: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_data(addr, Command::Intensity, intensity)
    }

    ///
    /// Set test mode on/off
    ///
    /// # Arguments
    ///
    /// * `addr` - display to address as connected in series
    /// * `is_on` - whether to turn test mode on or off
    ///
    pub fn set_display_test(
        &mut self,
        addr: usize,
        is_on: bool,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_data(addr, Command::DisplayTest, if is_on { 0x01 } else { 0x00 })
    }

    ///
    /// Writes one column (digit register) of a device
    ///
    /// # Arguments
    ///
    /// * `addr` - display to address as connected in series
    /// * `column` - column to write, `1..=8`
    /// * `data` - LED pattern for the column
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - `column` is outside `1..=8`
    ///
    pub fn write_column(
        &mut self,
        addr: usize,
        column: u8,
        data: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        let Some(register) = Command::column(column) else {
            return Err(Error::InvalidArgument);
        };
        self.write_data(addr, register, data)?;
        self.columns.set(addr, column, data);

        Ok(())
    }

    /// Last value committed to `column` of `addr` by this driver.
    pub fn column(&self, addr: usize, column: u8) -> Result<u8, Error<CONNECTOR::Error>> {
        if !device_in_range(self.config.devices, addr) {
            return Err(Error::InvalidDeviceIndex);
        }
        if Command::column(column).is_none() {
            return Err(Error::InvalidArgument);
        }
        Ok(self.columns.get(addr, column))
    }

    ///
    /// Takes a device out of shutdown (`true`) or puts it into shutdown (`false`)
    ///
    /// # Arguments
    ///
    /// * `addr` - display to address as connected in series
    /// * `enabled` - normal operation when set
    ///
    pub fn enable_display(
        &mut self,
        addr: usize,
        enabled: bool,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_data(addr, Command::Power, if enabled { 0x01 } else { 0x00 })
    }

    ///
    /// Sets the raw decode mode byte of a device. Any byte is forwarded;
    /// the chip understands the values of [`DecodeMode`].
    ///
    pub fn set_decode_mode(
        &mut self,
        addr: usize,
        mode: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_data(addr, Command::DecodeMode, mode)
    }

    /// Sets decode mode to be used on input sent to the display chip.
    pub fn set_decode(
        &mut self,
        addr: usize,
        mode: DecodeMode,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.set_decode_mode(addr, mode as u8)
    }

    ///
    /// Clears a display by writing zero to all columns, one frame per
    /// column, in ascending order
    ///
    /// # Arguments
    ///
    /// * `addr` - display to address as connected in series
    ///
    pub fn clear_display(&mut self, addr: usize) -> Result<(), Error<CONNECTOR::Error>> {
        if !device_in_range(self.config.devices, addr) {
            return Err(Error::InvalidDeviceIndex);
        }
        debug!("clear device {}", addr);

        for column in 1..=MAX_DIGITS as u8 {
            self.write_column(addr, column, 0x00)?;
            if self.config.flush_after_clear {
                self.write_all(Command::Noop, 0x00)?;
            }
        }

        Ok(())
    }

    /// Clears every display, one frame per column.
    pub fn clear_all(&mut self) -> Result<(), Error<CONNECTOR::Error>> {
        for register in Command::DIGITS {
            self.write_all(register, 0x00)?;
        }
        self.columns = ColumnCache::new();

        Ok(())
    }

    /// Powers on all connected displays
    pub fn power_on(&mut self) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_all(Command::Power, 0x01)
    }

    /// Powers off all connected displays
    pub fn power_off(&mut self) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_all(Command::Power, 0x00)
    }

    ///
    /// Brings every display into a known state: test mode off, all digits
    /// scanned, no decode, blank, powered off.
    ///
    pub fn init(&mut self) -> Result<(), Error<CONNECTOR::Error>> {
        for addr in 1..=self.config.devices {
            self.set_display_test(addr, false)?;
            self.set_scan_limit(addr, 0x07)?;
            self.set_decode(addr, DecodeMode::NoDecode)?;
            self.clear_display(addr)?;
        }
        self.power_off()
    }

    fn write_raw(
        &mut self,
        addr: usize,
        header: u8,
        data: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        let mut buffer = [0; FRAME_CAPACITY];
        let Some(frame) =
            frame::build_frame(self.config.devices, addr, header, data, &mut buffer)
        else {
            return Err(Error::InvalidDeviceIndex);
        };

        trace!("write {} to register {} of device {}", data, header, addr);
        Self::transmit(&mut self.c, &self.config, frame)
    }

    fn transmit(
        c: &mut CONNECTOR,
        config: &Config,
        frame: &[u8],
    ) -> Result<(), Error<CONNECTOR::Error>> {
        let mut attempt: u8 = 0;
        loop {
            match c.write_frame(frame) {
                Ok(()) => {
                    c.settle(config.settle_us);
                    return Ok(());
                }
                Err(_) if attempt < config.retries => {
                    attempt += 1;
                    warn!(
                        "frame write failed, retry {} of {}",
                        attempt, config.retries
                    );
                }
                Err(e) => return Err(Error::TransferFailed(e)),
            }
        }
    }
}
