use crate::ds18b20::Temperature;
use crate::onewire::Address;
use core::fmt;
use embedded_hal::serial::nb::Write;
use heapless::Vec;

/// Separates the timestamp and sensor fields of a line.
pub const DELIMITER: char = ';';

/// Ends every emitted line.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Written in place of a temperature when a device could not be read.
pub const DEVICE_DISCONNECTED_C: f32 = -127.0;

/// Why a device produced no temperature this cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadFailure {
    /// The device did not answer, or the line read back stuck.
    NoResponse,
    /// The device answered with a corrupted scratchpad.
    BadData,
}

/// One device's contribution to a [`Reading`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sample {
    pub address: Address,
    pub temperature: Result<Temperature, ReadFailure>,
}

impl Sample {
    /// The measured temperature, if the device was read successfully.
    pub fn celsius(&self) -> Option<f32> {
        self.temperature.as_ref().ok().map(Temperature::celsius)
    }

    /// The value put on the wire: the measurement, or [`DEVICE_DISCONNECTED_C`] on failure.
    pub fn reported_celsius(&self) -> f32 {
        self.celsius().unwrap_or(DEVICE_DISCONNECTED_C)
    }
}

impl fmt::Display for Sample {
    /// Address and temperature with no separator between them, e.g. `28FF641A0416036D25.50`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}{:.2}", self.address, self.reported_celsius())
    }
}

/// Everything measured in one polling cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading<const N: usize> {
    /// Milliseconds since boot. Wraps at `u32::MAX`.
    pub timestamp_ms: u32,
    /// One sample per known device, in device table order.
    pub samples: Vec<Sample, N>,
}

impl<const N: usize> Reading<N> {
    pub fn new(timestamp_ms: u32) -> Self {
        Reading {
            timestamp_ms,
            samples: Vec::new(),
        }
    }

    /// How many samples failed to read.
    pub fn degraded_count(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| s.temperature.is_err())
            .count()
    }
}

impl<const N: usize> fmt::Display for Reading<N> {
    /// The line without its terminator, e.g. `152340;28FF641A0416036D25.50`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.timestamp_ms)?;
        for sample in self.samples.iter() {
            write!(f, "{}{}", DELIMITER, sample)?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
pub enum EmitError<TSerialError> {
    /// Wrapped error from the serial port.
    Wrapped(TSerialError),
    /// Formatting failed without the serial port reporting an error.
    Format,
}

/// Adapts a byte-oriented serial port to `core::fmt::Write`, keeping the first port error.
struct SerialWriter<'a, TSerial: Write<u8>> {
    serial: &'a mut TSerial,
    error: Option<TSerial::Error>,
}

impl<'a, TSerial: Write<u8>> fmt::Write for SerialWriter<'a, TSerial> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if let Err(error) = nb::block!(self.serial.write(byte)) {
                self.error = Some(error);
                return Err(fmt::Error);
            }
        }
        Ok(())
    }
}

/// Writes the reading as one terminated line, blocking until the port has taken every byte.
pub fn emit<TSerial, const N: usize>(
    serial: &mut TSerial,
    reading: &Reading<N>,
) -> Result<(), EmitError<TSerial::Error>>
where
    TSerial: Write<u8>,
{
    let mut writer = SerialWriter {
        serial: &mut *serial,
        error: None,
    };
    let written =
        fmt::Write::write_fmt(&mut writer, format_args!("{}{}", reading, LINE_TERMINATOR));
    if let Some(error) = writer.error {
        return Err(EmitError::Wrapped(error));
    }
    written.map_err(|_| EmitError::Format)?;
    nb::block!(serial.flush()).map_err(EmitError::Wrapped)
}

#[derive(Debug, PartialEq)]
pub enum ParseError {
    /// The line does not start with a millisecond count written as plain decimal digits.
    BadTimestamp,
    /// A sensor field is shorter than an address plus at least one digit.
    FieldTooShort,
    /// A sensor field does not start with 16 hex digits.
    BadAddress,
    /// A sensor field does not end with a temperature of the form `-12.34`.
    BadTemperature,
    /// The line has more sensor fields than the caller allowed for.
    TooManyFields,
}

/// A line as decoded by a consumer on the other end of the serial link.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedLine<const N: usize> {
    pub timestamp_ms: u32,
    pub fields: Vec<(Address, f32), N>,
}

/// Decodes one emitted line. A trailing terminator is ignored.
///
/// Only what [`emit`] produces is accepted. The timestamp carries no sign. A temperature has an
/// optional minus sign, digits on both sides of the point, and no exponent.
pub fn parse_line<const N: usize>(line: &str) -> Result<ParsedLine<N>, ParseError> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let mut fields = line.split(DELIMITER);
    let timestamp_ms = fields
        .next()
        .filter(|t| is_digits(t))
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or(ParseError::BadTimestamp)?;

    let mut parsed = ParsedLine {
        timestamp_ms,
        fields: Vec::new(),
    };
    for field in fields {
        if field.len() <= 16 || !field.is_char_boundary(16) {
            return Err(ParseError::FieldTooShort);
        }
        let (address, temperature) = field.split_at(16);
        let address = address
            .parse::<Address>()
            .map_err(|_| ParseError::BadAddress)?;
        if !is_fixed_point(temperature) {
            return Err(ParseError::BadTemperature);
        }
        let temperature = temperature
            .parse::<f32>()
            .map_err(|_| ParseError::BadTemperature)?;
        parsed
            .fields
            .push((address, temperature))
            .map_err(|_| ParseError::TooManyFields)?;
    }
    Ok(parsed)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_fixed_point(s: &str) -> bool {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    match unsigned.split_once('.') {
        Some((whole, fraction)) => is_digits(whole) && is_digits(fraction),
        None => false,
    }
}
