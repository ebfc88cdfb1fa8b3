#![no_std]

mod fmt;

/// Compile-time parameters and discovery options.
pub mod config;
/// Fixed-capacity storage for the addresses of discovered sensors.
pub mod devices;
/// Driver for DS18B20 digital thermometers and family-compatible devices.
///
/// Refer to [this datasheet](https://datasheets.maximintegrated.com/en/ds/DS18B20.pdf) for more
/// information about these devices.
pub mod ds18b20;
/// Discovers sensors once, then polls them and streams one line per cycle.
pub mod logger;
/// One-wire link layer: reset, time slots, ROM addressing and device search.
pub mod onewire;
/// Readings and the line format they are emitted in.
pub mod record;

pub use logger::Logger;
