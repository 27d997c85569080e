use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{SpiBus, SpiDevice};

use crate::ConnectorError;

/// Describes the interface used to connect to the MAX7219 chain
pub trait Connector {
    type Error;

    ///
    /// Shifts one complete frame through the chain and commits it,
    /// so every device latches the pair that ended up in it.
    ///
    /// # Arguments
    ///
    /// * `frame` - `2 * devices` bytes, pair for device 1 first
    ///
    /// # Errors
    ///
    /// * `Self::Error` - the bus or framing failed
    ///
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Waits out the minimum time the chip needs between two frames.
    fn settle(&mut self, us: u32);
}

///
/// Connects over an SPI bus with a dedicated chip-select pin.
/// The rising chip-select edge is what makes the devices latch.
///
/// Frames are always full length, leading no-ops included: every device
/// latches on the same edge, so a device beyond the addressed one would
/// otherwise latch whatever was left in the shift register before it,
/// usually the previous command.
///
pub struct SpiConnector<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
}

impl<SPI, CS, D> SpiConnector<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, cs: CS, delay: D) -> Self {
        SpiConnector { spi, cs, delay }
    }

    /// Returns the bus, pin and delay handed in at construction.
    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }
}

impl<SPI, CS, D> Connector for SpiConnector<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = ConnectorError<SPI::Error, CS::Error>;

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(ConnectorError::Pin)?;
        let result = self
            .spi
            .write(frame)
            .and_then(|()| self.spi.flush())
            .map_err(ConnectorError::Spi);
        // raise CS even if the bus failed so the next frame starts clean
        self.cs.set_high().map_err(ConnectorError::Pin)?;

        result
    }

    fn settle(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}

///
/// Connects over an `SpiDevice`. Each frame is one transaction, the device
/// implementation owns chip-select (or there is none at all).
///
pub struct ChainedConnector<SPI, D> {
    spi: SPI,
    delay: D,
}

impl<SPI, D> ChainedConnector<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub fn new(spi: SPI, delay: D) -> Self {
        ChainedConnector { spi, delay }
    }

    /// Returns the device and delay handed in at construction.
    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }
}

impl<SPI, D> Connector for ChainedConnector<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    type Error = SPI::Error;

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.spi.write(frame)
    }

    fn settle(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};
    use embedded_hal::digital;
    use embedded_hal::spi::{ErrorKind, ErrorType};
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction};

    use crate::{Command, Config, Error, MAX7219};

    /// SpiBus that fails a fixed number of writes, then records.
    struct FailingBus {
        failures: usize,
        attempts: usize,
        written: Vec<Vec<u8>>,
    }

    impl FailingBus {
        fn new(failures: usize) -> Self {
            FailingBus {
                failures,
                attempts: 0,
                written: Vec::new(),
            }
        }
    }

    impl ErrorType for FailingBus {
        type Error = ErrorKind;
    }

    impl SpiBus for FailingBus {
        fn read(&mut self, _words: &mut [u8]) -> Result<(), Self::Error> {
            Ok(())
        }

        fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
            self.attempts += 1;
            if self.failures > 0 {
                self.failures -= 1;
                return Err(ErrorKind::Other);
            }
            self.written.push(words.to_vec());
            Ok(())
        }

        fn transfer(&mut self, _read: &mut [u8], _write: &[u8]) -> Result<(), Self::Error> {
            Ok(())
        }

        fn transfer_in_place(&mut self, _words: &mut [u8]) -> Result<(), Self::Error> {
            Ok(())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    /// Chip-select line that refuses every level change.
    struct StuckPin;

    impl digital::ErrorType for StuckPin {
        type Error = digital::ErrorKind;
    }

    impl OutputPin for StuckPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            Err(digital::ErrorKind::Other)
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            Err(digital::ErrorKind::Other)
        }
    }

    fn cs_cycles(frames: usize) -> Vec<PinTransaction> {
        let mut expected = Vec::new();
        for _ in 0..frames {
            expected.push(PinTransaction::set(State::Low));
            expected.push(PinTransaction::set(State::High));
        }
        expected
    }

    #[test]
    fn spi_connector_frames_with_chip_select() {
        let mut spi = SpiMock::new(&[
            Transaction::write_vec(vec![0x0B, 0x07, 0x00, 0x00]),
            Transaction::flush(),
        ]);
        let mut cs = PinMock::new(&[
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ]);

        let mut connector = SpiConnector::new(&mut spi, &mut cs, NoopDelay::new());
        connector
            .write_frame(&[0x0B, 0x07, 0x00, 0x00])
            .expect("frame should be written");
        connector.settle(1_000);

        spi.done();
        cs.done();
    }

    #[test]
    fn chained_connector_uses_one_transaction() {
        let mut spi = SpiMock::new(&[
            Transaction::transaction_start(),
            Transaction::write_vec(vec![0x00, 0x00, 0x0C, 0x01]),
            Transaction::transaction_end(),
        ]);

        let mut connector = ChainedConnector::new(&mut spi, NoopDelay::new());
        connector
            .write_frame(&[0x00, 0x00, 0x0C, 0x01])
            .expect("frame should be written");

        spi.done();
    }

    #[test]
    fn spi_connector_raises_cs_after_bus_failure() {
        let mut cs = PinMock::new(&cs_cycles(1));

        let mut connector = SpiConnector::new(FailingBus::new(1), &mut cs, NoopDelay::new());
        assert_eq!(
            connector.write_frame(&[0x0C, 0x01]),
            Err(ConnectorError::Spi(ErrorKind::Other))
        );

        cs.done();
    }

    #[test]
    fn stuck_chip_select_is_a_pin_error() {
        let mut spi = SpiMock::new(&[]);

        let mut connector = SpiConnector::new(&mut spi, StuckPin, NoopDelay::new());
        assert_eq!(
            connector.write_frame(&[0x0C, 0x01]),
            Err(ConnectorError::Pin(digital::ErrorKind::Other))
        );

        spi.done();
    }

    #[test]
    fn driver_retries_framed_write_over_chip_select() {
        let mut cs = PinMock::new(&cs_cycles(2));
        let connector = SpiConnector::new(FailingBus::new(1), &mut cs, NoopDelay::new());
        let mut driver = MAX7219::with_config(connector, Config::new(2)).unwrap();

        driver
            .write_data(2, Command::Intensity, 0x04)
            .expect("second attempt should succeed");

        let (bus, _, _) = driver.release().release();
        assert_eq!(bus.attempts, 2);
        assert_eq!(bus.written, vec![vec![0x00, 0x00, 0x0A, 0x04]]);
        cs.done();
    }

    #[test]
    fn driver_reports_bus_failure_over_chip_select() {
        let mut cs = PinMock::new(&cs_cycles(2));
        let connector = SpiConnector::new(FailingBus::new(10), &mut cs, NoopDelay::new());
        let config = Config::new(1).with_retries(1);
        let mut driver = MAX7219::with_config(connector, config).unwrap();

        assert_eq!(
            driver.enable_display(1, true),
            Err(Error::TransferFailed(ConnectorError::Spi(ErrorKind::Other)))
        );

        let (bus, _, _) = driver.release().release();
        assert_eq!(bus.attempts, 2);
        assert!(bus.written.is_empty());
        cs.done();
    }

    #[test]
    fn driver_reports_stuck_chip_select() {
        let mut spi = SpiMock::new(&[]);
        let connector = SpiConnector::new(&mut spi, StuckPin, NoopDelay::new());
        let config = Config::new(1).with_retries(0);
        let mut driver = MAX7219::with_config(connector, config).unwrap();

        assert_eq!(
            driver.set_intensity(1, 0x01),
            Err(Error::TransferFailed(ConnectorError::Pin(digital::ErrorKind::Other)))
        );

        spi.done();
    }
}
