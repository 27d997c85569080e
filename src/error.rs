use core::fmt;

/// Errors returned by the driver.
///
/// `E` is the error type of the connector in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// A register, data byte or column index was out of range.
    InvalidArgument,
    /// The device index was outside `1..=device_count`.
    InvalidDeviceIndex,
    /// The chain was configured with zero devices or more than `MAX_DISPLAYS`.
    InvalidDeviceCount,
    /// The connector failed to deliver the frame, after retries.
    TransferFailed(E),
}

impl<E> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::TransferFailed(error)
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "argument out of range"),
            Error::InvalidDeviceIndex => write!(f, "device index out of range"),
            Error::InvalidDeviceCount => write!(f, "invalid number of chained devices"),
            Error::TransferFailed(e) => write!(f, "transfer failed: {e:?}"),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for Error<E> {}

///
/// Error raised by a connector that drives its own chip-select line:
/// either the bus or the pin failed.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectorError<S, P> {
    /// The SPI bus returned an error.
    Spi(S),
    /// The chip-select pin returned an error.
    Pin(P),
}

impl<S: fmt::Debug, P: fmt::Debug> fmt::Display for ConnectorError<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::Spi(e) => write!(f, "spi error: {e:?}"),
            ConnectorError::Pin(e) => write!(f, "chip select error: {e:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn display_messages() {
        let e: Error<()> = Error::InvalidArgument;
        assert_eq!(e.to_string(), "argument out of range");

        let e: Error<ConnectorError<u8, ()>> = Error::TransferFailed(ConnectorError::Spi(3));
        assert_eq!(e.to_string(), "transfer failed: Spi(3)");
    }

    #[test]
    fn transport_errors_convert() {
        let e: Error<u8> = 7.into();
        assert_eq!(e, Error::TransferFailed(7));
    }
}
