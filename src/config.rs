use crate::ds18b20::ResolutionMode;
use core::time::Duration;

/// The GPIO pin driving the one-wire bus on the reference board.
pub const ONE_WIRE_PIN: u8 = 2;

/// How many sensors the device table holds.
pub const DEVICE_CAPACITY: usize = 3;

/// Baud rate of the serial link. 8N1, no handshake.
pub const BAUD_RATE: u32 = 115_200;

/// The time between the starts of two consecutive polling cycles.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// What discovery does when the bus holds more sensors than the device table.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverflowPolicy {
    /// Keep the first sensors found, log a warning and ignore the rest.
    Truncate,
    /// Refuse to start.
    Fail,
}

/// Options to modify the behavior of discovery.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    pub overflow_policy: OverflowPolicy,
    /// Assumed for a sensor whose configuration register could not be read during discovery.
    pub default_resolution: ResolutionMode,
}

pub const DEFAULT_OPTIONS: Options = Options {
    overflow_policy: OverflowPolicy::Truncate,
    default_resolution: ResolutionMode::TwelveBit,
};

impl Default for Options {
    fn default() -> Self {
        DEFAULT_OPTIONS
    }
}
