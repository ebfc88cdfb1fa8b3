use core::fmt;
use core::str::FromStr;
use embedded_hal::delay::blocking::DelayUs;
use embedded_hal::digital::blocking::{InputPin, OutputPin};

// Standard-speed slot timings, in microseconds.
const RESET_TIME_US: u32 = 480;
// Devices answer with a 60-240us presence pulse starting 15-60us after the reset.
const PRESENCE_SAMPLE_DELAY_US: u32 = 70;
const POST_PRESENCE_DELAY_US: u32 = RESET_TIME_US - PRESENCE_SAMPLE_DELAY_US;

const MIN_SLOT_DURATION_US: u32 = 70;
const WRITE_1_DURATION_US: u32 = 6;
const WRITE_1_POST_BIT_DELAY_US: u32 = MIN_SLOT_DURATION_US - WRITE_1_DURATION_US;
const WRITE_0_DURATION_US: u32 = 60;
const WRITE_0_POST_BIT_DELAY_US: u32 = MIN_SLOT_DURATION_US - WRITE_0_DURATION_US;
const READ_REQUEST_DURATION_US: u32 = 6;
const READ_SAMPLE_DELAY_US: u32 = 9;
const READ_POST_SAMPLE_DELAY_US: u32 =
    MIN_SLOT_DURATION_US - READ_REQUEST_DURATION_US - READ_SAMPLE_DELAY_US;

#[derive(Debug, PartialEq)]
pub enum Error<TPinError, TDelayError> {
    WrappedPin(TPinError),
    WrappedDelay(TDelayError),
}

/// The 64-bit ROM code of a device.
///
/// Byte 0 is the family code, bytes 1 to 6 the serial number, and byte 7 the CRC of the first
/// seven bytes. Rendered as 16 uppercase hex digits in bus order, e.g. `28FF641A0416036D`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address(pub [u8; 8]);

impl Address {
    /// Builds an address from its first seven bytes, appending the matching CRC.
    pub fn with_crc(rom: [u8; 7]) -> Self {
        let mut bytes = [0u8; 8];
        bytes[..7].copy_from_slice(&rom);
        bytes[7] = crc8(&rom);
        Address(bytes)
    }

    pub fn family_code(&self) -> u8 {
        self.0[0]
    }

    pub fn serial(&self) -> [u8; 6] {
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&self.0[1..7]);
        serial
    }

    pub fn crc(&self) -> u8 {
        self.0[7]
    }

    /// Whether the CRC byte matches the rest of the ROM code.
    pub fn is_valid(&self) -> bool {
        crc8(&self.0[..7]) == self.crc()
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    fn bit(&self, index: usize) -> bool {
        self.0[index / 8] & (1 << (index % 8)) != 0
    }

    fn set_bit(&mut self, index: usize, value: bool) {
        let mask = 1 << (index % 8);
        if value {
            self.0[index / 8] |= mask;
        } else {
            self.0[index / 8] &= !mask;
        }
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(self, f)
    }
}

#[derive(Debug, PartialEq)]
pub enum AddressParseError {
    /// The input was not exactly 16 characters long.
    BadLength,
    /// The input contained something other than hex digits.
    BadDigit,
}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Parses 16 hex digits, in either case, with no separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.is_ascii() {
            return Err(AddressParseError::BadLength);
        }
        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let digits = &s[2 * i..2 * i + 2];
            if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(AddressParseError::BadDigit);
            }
            *byte = u8::from_str_radix(digits, 16).map_err(|_| AddressParseError::BadDigit)?;
        }
        Ok(Address(bytes))
    }
}

/// Computes the Dallas/Maxim CRC-8 (polynomial x^8 + x^5 + x^4 + 1) of `data`.
///
/// Running this over a ROM code or scratchpad including its trailing CRC byte yields 0.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for byte in data.iter() {
        let mut byte = *byte;
        for _ in 0..8 {
            let mix = (crc ^ byte) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            byte >>= 1;
        }
    }
    crc
}

/// Administrative commands for operating the 1-bit data line.
///
/// These are used to retrieve information about devices on the line, or to request those devices
/// to perform more specific operations (see [`crate::ds18b20::FunctionCommand`]).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RomCommand {
    /// Searches for all devices on the line.
    ///
    /// Cannot be followed by a function command.
    Search = 0xF0,
    /// Reads the peripheral device's 64-bit ROM code.
    ///
    /// Only possible when there is a single device on the line.
    Read = 0x33,
    /// Selects a specific peripheral device by its 64-bit ROM code.
    ///
    /// Only the selected device will respond to the subsequent function command.
    Match = 0x55,
    /// Addresses all devices simultaneously.
    ///
    /// If there are multiple devices on the line, this only works for commands that need no
    /// response, such as `ConvertTemperature`.
    Skip = 0xCC,
}

/// Bit-level access to a one-wire bus.
///
/// Implementors supply the reset and time-slot primitives; byte transfers and ROM addressing are
/// built on top of them. Bytes go out and come back least-significant bit first.
pub trait Bus {
    type Error;

    /// Sends a reset pulse. Returns whether any device answered with a presence pulse.
    fn reset(&mut self) -> Result<bool, Self::Error>;

    fn write_bit(&mut self, bit: bool) -> Result<(), Self::Error>;

    fn read_bit(&mut self) -> Result<bool, Self::Error>;

    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        let mut byte = byte;
        for _ in 0..8 {
            self.write_bit(byte & 1 != 0)?;
            byte >>= 1;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, Self::Error> {
        let mut byte = 0u8;
        for bit in 0..8 {
            if self.read_bit()? {
                byte |= 1 << bit;
            }
        }
        Ok(byte)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        for byte in bytes.iter() {
            self.write_byte(*byte)?;
        }
        Ok(())
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error> {
        for byte in buffer.iter_mut() {
            *byte = self.read_byte()?;
        }
        Ok(())
    }

    /// Resets the line and addresses the device with the given ROM code.
    ///
    /// Returns `false`, without sending anything, if nothing answered the reset.
    fn select(&mut self, address: &Address) -> Result<bool, Self::Error> {
        if !self.reset()? {
            return Ok(false);
        }
        self.write_byte(RomCommand::Match as u8)?;
        self.write_bytes(address.as_bytes())?;
        Ok(true)
    }

    /// Resets the line and addresses every device on it.
    ///
    /// Returns `false`, without sending anything, if nothing answered the reset.
    fn skip(&mut self) -> Result<bool, Self::Error> {
        if !self.reset()? {
            return Ok(false);
        }
        self.write_byte(RomCommand::Skip as u8)?;
        Ok(true)
    }
}

/// A one-wire bus bit-banged over a single open-drain pin.
///
/// The pin must be configured as an open-drain output with a pull-up (typically 4.7k), so that
/// driving it high releases the line and reading it samples the line.
pub struct PinBus<TPin, TDelay> {
    pin: TPin,
    delay: TDelay,
}

impl<TPin, TDelay, TPinError, TDelayError> PinBus<TPin, TDelay>
where
    TPin: InputPin<Error = TPinError> + OutputPin<Error = TPinError>,
    TDelay: DelayUs<Error = TDelayError>,
{
    /// Takes ownership of the pin and releases the line.
    pub fn new(mut pin: TPin, delay: TDelay) -> Result<Self, Error<TPinError, TDelayError>> {
        pin.set_high().map_err(Error::WrappedPin)?;
        Ok(PinBus { pin, delay })
    }

    /// Gives back the pin and delay.
    pub fn release(self) -> (TPin, TDelay) {
        (self.pin, self.delay)
    }

    fn wait(&mut self, us: u32) -> Result<(), Error<TPinError, TDelayError>> {
        self.delay.delay_us(us).map_err(Error::WrappedDelay)
    }

    fn drive_low(&mut self) -> Result<(), Error<TPinError, TDelayError>> {
        self.pin.set_low().map_err(Error::WrappedPin)
    }

    fn release_line(&mut self) -> Result<(), Error<TPinError, TDelayError>> {
        self.pin.set_high().map_err(Error::WrappedPin)
    }
}

impl<TPin, TDelay, TPinError, TDelayError> Bus for PinBus<TPin, TDelay>
where
    TPin: InputPin<Error = TPinError> + OutputPin<Error = TPinError>,
    TDelay: DelayUs<Error = TDelayError>,
{
    type Error = Error<TPinError, TDelayError>;

    fn reset(&mut self) -> Result<bool, Self::Error> {
        // Hold the line low for at least 480us.
        self.drive_low()?;
        self.wait(RESET_TIME_US)?;
        self.release_line()?;

        self.wait(PRESENCE_SAMPLE_DELAY_US)?;
        let is_present = self.pin.is_low().map_err(Error::WrappedPin)?;

        // Wait out the rest of the presence window.
        self.wait(POST_PRESENCE_DELAY_US)?;
        Ok(is_present)
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), Self::Error> {
        let (low_us, high_us) = if bit {
            (WRITE_1_DURATION_US, WRITE_1_POST_BIT_DELAY_US)
        } else {
            (WRITE_0_DURATION_US, WRITE_0_POST_BIT_DELAY_US)
        };
        self.drive_low()?;
        self.wait(low_us)?;
        self.release_line()?;
        self.wait(high_us)
    }

    fn read_bit(&mut self) -> Result<bool, Self::Error> {
        // Request bit.
        self.drive_low()?;
        self.wait(READ_REQUEST_DURATION_US)?;
        self.release_line()?;

        // Read bit after sample delay.
        self.wait(READ_SAMPLE_DELAY_US)?;
        let bit = self.pin.is_high().map_err(Error::WrappedPin)?;

        // Wait for minimum slot duration.
        self.wait(READ_POST_SAMPLE_DELAY_US)?;
        Ok(bit)
    }
}

#[derive(Debug, PartialEq)]
pub enum SearchError<TBusError> {
    /// Wrapped error from the bus.
    Wrapped(TBusError),
    /// A ROM code was read whose CRC byte does not match. The search continues past it.
    BadCrc(Address),
}

/// State of a ROM search across the devices on a bus.
///
/// Each call to [`DeviceSearch::next`] walks the binary tree of ROM codes once and yields the next
/// device, lowest discrepancy branches first.
#[derive(Debug, Clone)]
pub struct DeviceSearch {
    rom: Address,
    // 1-based bit position of the last 0-branch taken at a discrepancy; 0 when none remain.
    last_discrepancy: usize,
    finished: bool,
}

impl Default for DeviceSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSearch {
    pub fn new() -> Self {
        DeviceSearch {
            rom: Address([0u8; 8]),
            last_discrepancy: 0,
            finished: false,
        }
    }

    /// Finds the next device on the bus, or `None` once every device has been visited.
    pub fn next<B: Bus>(&mut self, bus: &mut B) -> Result<Option<Address>, SearchError<B::Error>> {
        if self.finished {
            return Ok(None);
        }
        let result = self.step(bus);
        if let Err(SearchError::Wrapped(_)) = result {
            self.finished = true;
        }
        result
    }

    fn step<B: Bus>(&mut self, bus: &mut B) -> Result<Option<Address>, SearchError<B::Error>> {
        if !bus.reset().map_err(SearchError::Wrapped)? {
            self.finished = true;
            return Ok(None);
        }
        bus.write_byte(RomCommand::Search as u8)
            .map_err(SearchError::Wrapped)?;

        let mut last_zero = 0;
        for position in 1..=64 {
            let index = position - 1;
            let id_bit = bus.read_bit().map_err(SearchError::Wrapped)?;
            let complement_bit = bus.read_bit().map_err(SearchError::Wrapped)?;

            let direction = match (id_bit, complement_bit) {
                // Nobody is participating any more.
                (true, true) => {
                    self.finished = true;
                    return Ok(None);
                }
                (false, false) => {
                    let direction = if position < self.last_discrepancy {
                        self.rom.bit(index)
                    } else {
                        position == self.last_discrepancy
                    };
                    if !direction {
                        last_zero = position;
                    }
                    direction
                }
                (bit, _) => bit,
            };

            self.rom.set_bit(index, direction);
            bus.write_bit(direction).map_err(SearchError::Wrapped)?;
        }

        self.last_discrepancy = last_zero;
        if last_zero == 0 {
            self.finished = true;
        }

        if !self.rom.is_valid() {
            return Err(SearchError::BadCrc(self.rom));
        }
        Ok(Some(self.rom))
    }
}

/// Iterates over every device on the bus.
///
/// Iteration ends after the last device or after a bus error. Addresses with a bad CRC are
/// reported as errors without ending the iteration.
pub struct Devices<'a, B> {
    bus: &'a mut B,
    search: DeviceSearch,
}

/// Starts a ROM search over `bus`.
pub fn devices<B: Bus>(bus: &mut B) -> Devices<'_, B> {
    Devices {
        bus,
        search: DeviceSearch::new(),
    }
}

impl<'a, B: Bus> Iterator for Devices<'a, B> {
    type Item = Result<Address, SearchError<B::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.search.next(&mut *self.bus).transpose()
    }
}
