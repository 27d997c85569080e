//! Async counterpart of the driver, built on [`embedded-hal-async`].
//!
//! Every operation suspends until its frame is on the wire and the settle
//! delay has elapsed, so frames never interleave on the bus.
//!
//! [`embedded-hal-async`]: https://docs.rs/embedded-hal-async/~1.0

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::{SpiBus, SpiDevice};

use crate::frame::{self, FRAME_CAPACITY};
use crate::{
    ColumnCache, Command, Config, ConnectorError, DecodeMode, Error, MAX_DIGITS, device_in_range,
    to_byte,
};

/// Describes the async interface used to connect to the MAX7219 chain
#[allow(async_fn_in_trait)]
pub trait AsyncConnector {
    type Error;

    /// Shifts one complete frame through the chain and commits it.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Waits out the minimum time the chip needs between two frames.
    async fn settle(&mut self, us: u32);
}

/// Async SPI bus with a dedicated chip-select pin. Frames are full length,
/// for the reason given on [`crate::SpiConnector`].
pub struct AsyncSpiConnector<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
}

impl<SPI, CS, D> AsyncSpiConnector<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, cs: CS, delay: D) -> Self {
        AsyncSpiConnector { spi, cs, delay }
    }

    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }
}

impl<SPI, CS, D> AsyncConnector for AsyncSpiConnector<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = ConnectorError<SPI::Error, CS::Error>;

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(ConnectorError::Pin)?;
        let mut result = self.spi.write(frame).await;
        if result.is_ok() {
            result = self.spi.flush().await;
        }
        self.cs.set_high().map_err(ConnectorError::Pin)?;

        result.map_err(ConnectorError::Spi)
    }

    async fn settle(&mut self, us: u32) {
        self.delay.delay_us(us).await;
    }
}

/// Async `SpiDevice`; each frame is one transaction.
pub struct AsyncChainedConnector<SPI, D> {
    spi: SPI,
    delay: D,
}

impl<SPI, D> AsyncChainedConnector<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub fn new(spi: SPI, delay: D) -> Self {
        AsyncChainedConnector { spi, delay }
    }

    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }
}

impl<SPI, D> AsyncConnector for AsyncChainedConnector<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    type Error = SPI::Error;

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.spi.write(frame).await
    }

    async fn settle(&mut self, us: u32) {
        self.delay.delay_us(us).await;
    }
}

/// Async handler for a chain of MAX7219 chips. See [`crate::MAX7219`].
pub struct MAX7219Async<CONNECTOR> {
    c: CONNECTOR,
    config: Config,
    columns: ColumnCache,
}

impl<SPI, CS, D> MAX7219Async<AsyncSpiConnector<SPI, CS, D>>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Returns a handler for an SPI bus with chip-select pin. No data is sent.
    pub fn from_spi(
        devices: usize,
        spi: SPI,
        cs: CS,
        delay: D,
    ) -> Result<Self, Error<ConnectorError<SPI::Error, CS::Error>>> {
        Self::with_config(AsyncSpiConnector::new(spi, cs, delay), Config::new(devices))
    }
}

impl<SPI, D> MAX7219Async<AsyncChainedConnector<SPI, D>>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    /// Returns a handler for an `SpiDevice`. No data is sent.
    pub fn from_spi_device(devices: usize, spi: SPI, delay: D) -> Result<Self, Error<SPI::Error>> {
        Self::with_config(AsyncChainedConnector::new(spi, delay), Config::new(devices))
    }
}

impl<CONNECTOR> MAX7219Async<CONNECTOR>
where
    CONNECTOR: AsyncConnector,
{
    pub fn with_config(
        connector: CONNECTOR,
        config: Config,
    ) -> Result<Self, Error<CONNECTOR::Error>> {
        if !config.is_valid() {
            return Err(Error::InvalidDeviceCount);
        }
        Ok(MAX7219Async {
            c: connector,
            config,
            columns: ColumnCache::new(),
        })
    }

    pub fn device_count(&self) -> usize {
        self.config.devices
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn release(self) -> CONNECTOR {
        self.c
    }

    /// Writes `data` to `register` of device `addr` (1-based).
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - `register` or `data` is outside `0x00..=0xFF`
    /// * `InvalidDeviceIndex` - `addr` is outside `1..=device_count`
    /// * `TransferFailed` - the connector failed on every attempt
    pub async fn write<R, V>(
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
        self.write_raw(addr, register, data).await
    }

    pub async fn write_data(
        &mut self,
        addr: usize,
        command: Command,
        data: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_raw(addr, command as u8, data).await
    }

    pub async fn write_all(
        &mut self,
        command: Command,
        data: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
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
        transmit(&mut self.c, &self.config, frame).await
    }

    pub async fn set_scan_limit(
        &mut self,
        addr: usize,
        limit: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_data(addr, Command::ScanLimit, limit).await
    }

    pub async fn set_intensity(
        &mut self,
        addr: usize,
        intensity: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_data(addr, Command::Intensity, intensity).await
    }

    pub async fn set_display_test(
        &mut self,
        addr: usize,
        is_on: bool,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_data(addr, Command::DisplayTest, if is_on { 0x01 } else { 0x00 }).await
    }

    /// Writes one column (`1..=8`) of a device.
    pub async fn write_column(
        &mut self,
        addr: usize,
        column: u8,
        data: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        let Some(register) = Command::column(column) else {
            return Err(Error::InvalidArgument);
        };
        self.write_data(addr, register, data).await?;
        self.columns.set(addr, column, data);

        Ok(())
    }

    pub fn column(&self, addr: usize, column: u8) -> Result<u8, Error<CONNECTOR::Error>> {
        if !device_in_range(self.config.devices, addr) {
            return Err(Error::InvalidDeviceIndex);
        }
        if Command::column(column).is_none() {
            return Err(Error::InvalidArgument);
        }
        Ok(self.columns.get(addr, column))
    }

    pub async fn enable_display(
        &mut self,
        addr: usize,
        enabled: bool,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_data(addr, Command::Power, if enabled { 0x01 } else { 0x00 }).await
    }

    pub async fn set_decode_mode(
        &mut self,
        addr: usize,
        mode: u8,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_data(addr, Command::DecodeMode, mode).await
    }

    pub async fn set_decode(
        &mut self,
        addr: usize,
        mode: DecodeMode,
    ) -> Result<(), Error<CONNECTOR::Error>> {
        self.set_decode_mode(addr, mode as u8).await
    }

    /// Clears a display, one frame per column, each awaited before the next.
    pub async fn clear_display(&mut self, addr: usize) -> Result<(), Error<CONNECTOR::Error>> {
        if !device_in_range(self.config.devices, addr) {
            return Err(Error::InvalidDeviceIndex);
        }
        debug!("clear device {}", addr);

        for column in 1..=MAX_DIGITS as u8 {
            self.write_column(addr, column, 0x00).await?;
            if self.config.flush_after_clear {
                self.write_all(Command::Noop, 0x00).await?;
            }
        }

        Ok(())
    }

    pub async fn clear_all(&mut self) -> Result<(), Error<CONNECTOR::Error>> {
        for register in Command::DIGITS {
            self.write_all(register, 0x00).await?;
        }
        self.columns = ColumnCache::new();

        Ok(())
    }

    pub async fn power_on(&mut self) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_all(Command::Power, 0x01).await
    }

    pub async fn power_off(&mut self) -> Result<(), Error<CONNECTOR::Error>> {
        self.write_all(Command::Power, 0x00).await
    }

    pub async fn init(&mut self) -> Result<(), Error<CONNECTOR::Error>> {
        for addr in 1..=self.config.devices {
            self.set_display_test(addr, false).await?;
            self.set_scan_limit(addr, 0x07).await?;
            self.set_decode(addr, DecodeMode::NoDecode).await?;
            self.clear_display(addr).await?;
        }
        self.power_off().await
    }

    async fn write_raw(
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
        transmit(&mut self.c, &self.config, frame).await
    }
}

async fn transmit<C: AsyncConnector>(
    c: &mut C,
    config: &Config,
    frame: &[u8],
) -> Result<(), Error<C::Error>> {
    let mut attempt: u8 = 0;
    loop {
        match c.write_frame(frame).await {
            Ok(()) => {
                c.settle(config.settle_us).await;
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
