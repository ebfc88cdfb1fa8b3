use onewire_thermologger::onewire::{crc8, Address, Bus};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, PartialEq)]
pub enum Error {
    LineFault,
}

// Scratchpad temperature register value after power-up: 85 degrees.
const POWER_ON_RAW: i16 = 0x0550;

/// A simulated DS18B20.
#[derive(Clone, Debug)]
pub struct Device {
    pub address: Address,
    pub connected: bool,
    /// The temperature the device would measure now, in sixteenths of a degree.
    pub raw_temperature: i16,
    pub configuration: u8,
    pub corrupt_crc: bool,
    latched_raw: i16,
}

impl Device {
    pub fn new(address: Address, celsius: f32) -> Device {
        Device {
            address,
            connected: true,
            raw_temperature: (celsius * 16.0).round() as i16,
            configuration: 0x7F,
            corrupt_crc: false,
            latched_raw: POWER_ON_RAW,
        }
    }

    pub fn with_configuration(mut self, configuration: u8) -> Device {
        self.configuration = configuration;
        self
    }

    fn scratchpad(&self) -> [u8; 9] {
        let [low, high] = self.latched_raw.to_le_bytes();
        let mut bytes = [
            low,
            high,
            0x4B,
            0x46,
            self.configuration,
            0xFF,
            0x0C,
            0x10,
            0,
        ];
        bytes[8] = crc8(&bytes[..8]);
        if self.corrupt_crc {
            bytes[8] ^= 0xFF;
        }
        bytes
    }

    fn address_bit(&self, index: usize) -> bool {
        self.address.0[index / 8] & (1 << (index % 8)) != 0
    }
}

#[derive(Debug)]
enum State {
    /// Ignoring everything until the next reset.
    Idle,
    /// Collecting the ROM command byte.
    Rom,
    /// ROM search at the given bit; `phase` 0 and 1 are the two read slots, 2 the master's write.
    Search { bit: usize, phase: u8 },
    /// Receiving the 64 bits of a match ROM address.
    Matching { bit: usize },
    /// Collecting the function command byte.
    Function,
    /// Shifting out scratchpad bytes.
    Reading { bit: usize, data: [u8; 9] },
}

#[derive(Debug)]
struct Network {
    devices: Vec<Device>,
    selected: Vec<bool>,
    state: State,
    incoming: u8,
    incoming_bits: u8,
    resets: usize,
    conversions: usize,
    faulty: bool,
}

impl Network {
    fn participants(&self) -> impl Iterator<Item = &Device> {
        self.devices
            .iter()
            .zip(self.selected.iter())
            .filter(|(_, selected)| **selected)
            .map(|(device, _)| device)
    }

    fn deselect_where(&mut self, mismatch: impl Fn(&Device) -> bool) {
        for (device, selected) in self.devices.iter().zip(self.selected.iter_mut()) {
            if mismatch(device) {
                *selected = false;
            }
        }
    }

    fn receive_byte(&mut self, bit: bool) -> Option<u8> {
        if bit {
            self.incoming |= 1 << self.incoming_bits;
        }
        self.incoming_bits += 1;
        if self.incoming_bits < 8 {
            return None;
        }
        let byte = self.incoming;
        self.incoming = 0;
        self.incoming_bits = 0;
        Some(byte)
    }

    fn run_function(&mut self, command: u8) {
        self.state = match command {
            0x44 => {
                self.conversions += 1;
                for (device, selected) in self.devices.iter_mut().zip(self.selected.iter()) {
                    if *selected {
                        device.latched_raw = device.raw_temperature;
                    }
                }
                State::Idle
            }
            0xBE => {
                // Every selected device drives the line at once: a wired AND.
                let mut data = [0xFFu8; 9];
                for device in self.participants() {
                    for (out, byte) in data.iter_mut().zip(device.scratchpad().iter()) {
                        *out &= *byte;
                    }
                }
                State::Reading { bit: 0, data }
            }
            _ => State::Idle,
        };
    }
}

/// A one-wire network of simulated DS18B20 devices, driven bit by bit.
///
/// Clones share the same network, so a test can keep one to reconfigure devices while another is
/// owned by the code under test.
#[derive(Clone, Debug)]
pub struct SimulatedBus {
    network: Rc<RefCell<Network>>,
}

impl SimulatedBus {
    pub fn new(devices: Vec<Device>) -> SimulatedBus {
        let selected = vec![false; devices.len()];
        SimulatedBus {
            network: Rc::new(RefCell::new(Network {
                devices,
                selected,
                state: State::Idle,
                incoming: 0,
                incoming_bits: 0,
                resets: 0,
                conversions: 0,
                faulty: false,
            })),
        }
    }

    pub fn set_connected(&self, index: usize, connected: bool) {
        self.network.borrow_mut().devices[index].connected = connected;
    }

    pub fn set_temperature(&self, index: usize, celsius: f32) {
        self.network.borrow_mut().devices[index].raw_temperature = (celsius * 16.0).round() as i16;
    }

    pub fn set_corrupt_crc(&self, index: usize, corrupt: bool) {
        self.network.borrow_mut().devices[index].corrupt_crc = corrupt;
    }

    /// Makes every subsequent bus operation fail.
    pub fn set_faulty(&self, faulty: bool) {
        self.network.borrow_mut().faulty = faulty;
    }

    pub fn conversions(&self) -> usize {
        self.network.borrow().conversions
    }

    pub fn resets(&self) -> usize {
        self.network.borrow().resets
    }

    fn check(&self) -> Result<(), Error> {
        if self.network.borrow().faulty {
            return Err(Error::LineFault);
        }
        Ok(())
    }
}

impl Bus for SimulatedBus {
    type Error = Error;

    fn reset(&mut self) -> Result<bool, Self::Error> {
        self.check()?;
        let mut guard = self.network.borrow_mut();
        let network = &mut *guard;
        network.resets += 1;
        network.state = State::Rom;
        network.incoming = 0;
        network.incoming_bits = 0;
        network.selected = network.devices.iter().map(|d| d.connected).collect();
        let present = network.selected.iter().any(|selected| *selected);
        Ok(present)
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), Self::Error> {
        self.check()?;
        let mut guard = self.network.borrow_mut();
        let network = &mut *guard;
        match network.state {
            State::Rom => {
                if let Some(command) = network.receive_byte(bit) {
                    network.state = match command {
                        0xF0 => State::Search { bit: 0, phase: 0 },
                        0x55 => State::Matching { bit: 0 },
                        0xCC => State::Function,
                        _ => State::Idle,
                    };
                }
            }
            State::Search {
                bit: index,
                phase: 2,
            } => {
                network.deselect_where(|device| device.address_bit(index) != bit);
                network.state = if index == 63 {
                    State::Idle
                } else {
                    State::Search {
                        bit: index + 1,
                        phase: 0,
                    }
                };
            }
            State::Matching { bit: index } => {
                network.deselect_where(|device| device.address_bit(index) != bit);
                network.state = if index == 63 {
                    State::Function
                } else {
                    State::Matching { bit: index + 1 }
                };
            }
            State::Function => {
                if let Some(command) = network.receive_byte(bit) {
                    network.run_function(command);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, Self::Error> {
        self.check()?;
        let mut guard = self.network.borrow_mut();
        let network = &mut *guard;
        let (level, next) = match network.state {
            State::Search {
                bit: index,
                phase: 0,
            } => (
                network.participants().all(|device| device.address_bit(index)),
                State::Search {
                    bit: index,
                    phase: 1,
                },
            ),
            State::Search {
                bit: index,
                phase: 1,
            } => (
                network.participants().all(|device| !device.address_bit(index)),
                State::Search {
                    bit: index,
                    phase: 2,
                },
            ),
            State::Reading { bit: index, data } => {
                let level = index >= 72 || data[index / 8] & (1 << (index % 8)) != 0;
                (
                    level,
                    State::Reading {
                        bit: index + 1,
                        data,
                    },
                )
            }
            // Nobody drives the line, so the pull-up wins.
            _ => return Ok(true),
        };
        network.state = next;
        Ok(level)
    }
}
