use crate::onewire::{crc8, Address, Bus};
use core::time::Duration;

/// The maximum resolution of the sensor when in 12-bit mode.
pub const MAX_RESOLUTION_F32: f32 = 0.0625;

const CONVERSION_TIME_9BIT: Duration = Duration::from_micros(93_750);
const CONVERSION_TIME_10BIT: Duration = Duration::from_micros(187_500);
const CONVERSION_TIME_11BIT: Duration = Duration::from_millis(375);
const CONVERSION_TIME_12BIT: Duration = Duration::from_millis(750);

/// Family codes of devices that share the DS18B20 scratchpad and temperature format: DS18B20,
/// DS1822, DS1825 and DS28EA00.
pub const FAMILY_CODES: [u8; 4] = [0x28, 0x22, 0x3B, 0x42];

const SCRATCHPAD_LEN: usize = 9;
const CONFIGURATION_BYTE: usize = 4;

#[derive(Debug, PartialEq)]
pub enum Error<TBusError> {
    /// Wrapped error from the bus.
    Wrapped(TBusError),
    /// No device answered, or the line read back stuck high or low.
    NoResponse,
    /// The scratchpad CRC did not match.
    BadData,
}

impl<TBusError> From<TBusError> for Error<TBusError> {
    fn from(error: TBusError) -> Error<TBusError> {
        Error::Wrapped(error)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResolutionMode {
    /// Nine-bit resolution reads the temperature in 0.5 degree increments.
    NineBit = 0b00,
    /// Ten-bit resolution reads the temperature in 0.25 degree increments.
    TenBit = 0b01,
    /// Eleven-bit resolution reads the temperature in 0.125 degree increments.
    ElevenBit = 0b10,
    /// Twelve-bit resolution reads the temperature in 0.0625 degree increments.
    TwelveBit = 0b11,
}

impl ResolutionMode {
    /// How long the device needs to finish a conversion at this resolution.
    pub fn conversion_time(self) -> Duration {
        match self {
            ResolutionMode::NineBit => CONVERSION_TIME_9BIT,
            ResolutionMode::TenBit => CONVERSION_TIME_10BIT,
            ResolutionMode::ElevenBit => CONVERSION_TIME_11BIT,
            ResolutionMode::TwelveBit => CONVERSION_TIME_12BIT,
        }
    }

    /// Decodes bits 5 and 6 of the scratchpad configuration register.
    pub fn from_configuration_byte(byte: u8) -> Self {
        match (byte >> 5) & 0b11 {
            0b00 => ResolutionMode::NineBit,
            0b01 => ResolutionMode::TenBit,
            0b10 => ResolutionMode::ElevenBit,
            _ => ResolutionMode::TwelveBit,
        }
    }

    pub fn configuration_byte(self) -> u8 {
        ((self as u8) << 5) | 0b1_1111
    }
}

/// Represents a temperature reading from the sensor.
///
/// Held as the raw two's complement register value, in sixteenths of a degree.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Temperature {
    raw: i16,
}

impl Temperature {
    pub fn from_bytes(low_sig: u8, high_sig: u8) -> Self {
        Temperature {
            raw: i16::from_le_bytes([low_sig, high_sig]),
        }
    }

    /// The register value, in units of [`MAX_RESOLUTION_F32`].
    pub fn sixteenths(&self) -> i16 {
        self.raw
    }

    /// The integer part of the temperature measurement, truncated toward zero.
    pub fn integer_part(&self) -> i16 {
        self.raw / 16
    }

    /// The decimal part of the temperature measurement, with the same sign as the temperature.
    ///
    /// Can be multiplied by [`MAX_RESOLUTION_F32`] to convert it to a floating point value. Note
    /// that the actual decimal resolution will be limited depending on the [`ResolutionMode`]
    /// that was used during the read.
    pub fn decimal_part(&self) -> i8 {
        (self.raw % 16) as i8
    }

    /// The nearest integer of the temperature measurement, with halves rounded away from zero.
    ///
    /// Calculated without performing floating-point operations.
    pub fn nearest_integer(&self) -> i16 {
        let raw = i32::from(self.raw);
        ((raw + 8 * raw.signum()) / 16) as i16
    }

    /// The temperature in degrees Celsius.
    pub fn celsius(&self) -> f32 {
        f32::from(self.raw) * MAX_RESOLUTION_F32
    }
}

impl From<Temperature> for f32 {
    fn from(temp: Temperature) -> Self {
        temp.celsius()
    }
}

impl From<Temperature> for f64 {
    fn from(temp: Temperature) -> Self {
        f64::from(temp.raw) * f64::from(MAX_RESOLUTION_F32)
    }
}

/// The nine bytes of a device's scratchpad memory, CRC already checked.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Scratchpad([u8; SCRATCHPAD_LEN]);

impl Scratchpad {
    /// Validates raw scratchpad bytes as read off the bus.
    ///
    /// A line that nobody drives reads back as all ones; a shorted line reads back as all zeros,
    /// which would otherwise pass the CRC.
    pub fn from_bytes<E>(bytes: [u8; SCRATCHPAD_LEN]) -> Result<Self, Error<E>> {
        if bytes.iter().all(|b| *b == 0xFF) || bytes.iter().all(|b| *b == 0x00) {
            return Err(Error::NoResponse);
        }
        if crc8(&bytes[..SCRATCHPAD_LEN - 1]) != bytes[SCRATCHPAD_LEN - 1] {
            return Err(Error::BadData);
        }
        Ok(Scratchpad(bytes))
    }

    pub fn temperature(&self) -> Temperature {
        Temperature::from_bytes(self.0[0], self.0[1])
    }

    pub fn resolution(&self) -> ResolutionMode {
        ResolutionMode::from_configuration_byte(self.0[CONFIGURATION_BYTE])
    }

    pub fn as_bytes(&self) -> &[u8; SCRATCHPAD_LEN] {
        &self.0
    }
}

/// Requests the sensor perform some operation.
///
/// These commands can only be sent after a `Match` or `Skip`
/// [`RomCommand`](crate::onewire::RomCommand).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FunctionCommand {
    /// Stores the current temperature in the 2-byte temperature register in the scratchpad memory.
    ///
    /// If in parasitic power mode, the line must be pulled-up within 10us of sending this command
    /// and held high while the conversion happens.
    ///
    /// After this command, the sensor returns to its low-power state.
    ConvertTemperature = 0x44,
    /// Reads the contents of the sensor's scratchpad.
    ///
    /// A reset may be issued mid-read to cancel the rest of the read.
    ///
    /// Bytes:
    ///
    /// 1. Byte 0: Temperature least-significant byte.
    /// 2. Byte 1: Temperature most-significant byte.
    /// 3. Byte 2: High temperature threshold for the alarm (T<sub>H</sub>).
    /// 4. Byte 3: Low temperature threshold for the alarm (T<sub>L</sub>).
    /// 5. Byte 4: Configuration (i.e. [`ResolutionMode`]).
    /// 6. Byte 5: Reserved (0xFF)
    /// 7. Byte 6: Reserved
    /// 8. Byte 7: Reserved (0x10)
    /// 9. Byte 8: The CRC byte.
    ReadScratchpad = 0xBE,
}

/// Whether the device speaks the DS18B20 temperature format.
pub fn is_supported(address: &Address) -> bool {
    FAMILY_CODES.contains(&address.family_code())
}

/// Asks every device on the bus to start a temperature conversion.
///
/// Returns immediately; the caller must wait for [`ResolutionMode::conversion_time`] before
/// reading results back. The line is left released so parasite-powered devices can draw from the
/// pull-up.
pub fn start_conversion<B: Bus>(bus: &mut B) -> Result<(), Error<B::Error>> {
    if !bus.skip()? {
        return Err(Error::NoResponse);
    }
    bus.write_byte(FunctionCommand::ConvertTemperature as u8)?;
    Ok(())
}

/// Reads and validates the scratchpad of a single device.
pub fn read_scratchpad<B: Bus>(
    bus: &mut B,
    address: &Address,
) -> Result<Scratchpad, Error<B::Error>> {
    if !bus.select(address)? {
        return Err(Error::NoResponse);
    }
    bus.write_byte(FunctionCommand::ReadScratchpad as u8)?;
    let mut data = [0u8; SCRATCHPAD_LEN];
    bus.read_bytes(&mut data)?;
    Scratchpad::from_bytes(data)
}

/// Reads back the result of the last conversion from a single device.
pub fn read_temperature<B: Bus>(
    bus: &mut B,
    address: &Address,
) -> Result<Temperature, Error<B::Error>> {
    Ok(read_scratchpad(bus, address)?.temperature())
}
