use crate::config::{Options, OverflowPolicy, DEVICE_CAPACITY, POLL_INTERVAL};
use crate::devices::{CapacityExceeded, DeviceTable};
use crate::ds18b20;
use crate::onewire::{self, Bus, SearchError};
use crate::record::{self, EmitError, ReadFailure, Reading, Sample};
use core::convert::Infallible;
use core::future::Future;
use core::time::Duration;
use embedded_hal::serial::nb::Write;

#[derive(Debug, PartialEq)]
pub enum Error<TBusError> {
    /// Wrapped error from the bus.
    Wrapped(TBusError),
    /// The bus holds more sensors than the device table and the overflow policy is
    /// [`OverflowPolicy::Fail`].
    TooManyDevices { capacity: usize },
}

#[derive(Debug, PartialEq)]
pub enum RunError<TBusError, TSerialError> {
    Logger(Error<TBusError>),
    Emit(EmitError<TSerialError>),
}

/// Polls the sensors found on a one-wire bus and reports their temperatures.
///
/// The device table is filled once by [`Logger::discover`] and only read afterwards.
pub struct Logger<TBus, const N: usize = { DEVICE_CAPACITY }> {
    bus: TBus,
    devices: DeviceTable<N>,
    conversion_time: Duration,
}

impl<TBus: Bus, const N: usize> Logger<TBus, N> {
    /// Searches the bus for temperature sensors and records their addresses.
    ///
    /// Devices whose ROM code fails its CRC, or whose family does not use the DS18B20 format, are
    /// skipped. If more sensors are found than the table holds, `options.overflow_policy` decides
    /// between keeping the first `N` and failing.
    ///
    /// Each sensor's resolution is read so that polling waits just long enough for the slowest
    /// one to finish converting.
    pub fn discover(mut bus: TBus, options: &Options) -> Result<Self, Error<TBus::Error>> {
        let devices = find_sensors::<TBus, N>(&mut bus, options)?;

        let mut slowest = None;
        for address in devices.iter() {
            let resolution = match ds18b20::read_scratchpad(&mut bus, address) {
                Ok(scratchpad) => scratchpad.resolution(),
                Err(ds18b20::Error::Wrapped(error)) => return Err(Error::Wrapped(error)),
                Err(_) => {
                    warn!("could not read configuration of {}", address);
                    options.default_resolution
                }
            };
            slowest = slowest.max(Some(resolution));
        }
        let conversion_time = slowest
            .unwrap_or(options.default_resolution)
            .conversion_time();

        info!(
            "found {} sensors, conversion takes {} us",
            devices.len(),
            conversion_time.as_micros() as u32
        );
        Ok(Logger {
            bus,
            devices,
            conversion_time,
        })
    }

    pub fn devices(&self) -> &DeviceTable<N> {
        &self.devices
    }

    /// How long polling waits between starting a conversion and reading results.
    pub fn conversion_time(&self) -> Duration {
        self.conversion_time
    }

    pub fn release(self) -> TBus {
        self.bus
    }

    /// Converts and reads every known sensor once.
    ///
    /// A sensor that cannot be read yields a failed [`Sample`] rather than an error, so a
    /// disconnected sensor never costs a cycle. Only bus errors are returned.
    ///
    /// The conversion wait goes through `delay_fn`. The timestamp is taken from `millis_fn` once
    /// the conversion is complete.
    pub async fn poll<TimeFn, DelayFn, EmptyFuture>(
        &mut self,
        millis_fn: &TimeFn,
        delay_fn: DelayFn,
    ) -> Result<Reading<N>, Error<TBus::Error>>
    where
        TimeFn: Fn() -> u32,
        DelayFn: Fn(Duration) -> EmptyFuture,
        EmptyFuture: Future<Output = ()>,
    {
        if !self.devices.is_empty() {
            match ds18b20::start_conversion(&mut self.bus) {
                Ok(()) => delay_fn(self.conversion_time).await,
                Err(ds18b20::Error::Wrapped(error)) => return Err(Error::Wrapped(error)),
                Err(_) => warn!("no sensor answered the conversion request"),
            }
        }

        let mut reading = Reading::new(millis_fn());
        for address in self.devices.iter() {
            let temperature = match ds18b20::read_temperature(&mut self.bus, address) {
                Ok(temperature) => Ok(temperature),
                Err(ds18b20::Error::Wrapped(error)) => return Err(Error::Wrapped(error)),
                Err(ds18b20::Error::NoResponse) => Err(ReadFailure::NoResponse),
                Err(ds18b20::Error::BadData) => Err(ReadFailure::BadData),
            };
            if let Err(failure) = temperature {
                warn!("degraded reading from {}: {:?}", address, failure);
            }
            let pushed = reading.samples.push(Sample {
                address: *address,
                temperature,
            });
            debug_assert!(
                pushed.is_ok(),
                "a reading holds as many samples as the device table holds addresses"
            );
        }
        Ok(reading)
    }

    /// Polls once and writes the resulting line to `serial`.
    pub async fn cycle<TSerial, TimeFn, DelayFn, EmptyFuture>(
        &mut self,
        serial: &mut TSerial,
        millis_fn: &TimeFn,
        delay_fn: DelayFn,
    ) -> Result<Reading<N>, RunError<TBus::Error, TSerial::Error>>
    where
        TSerial: Write<u8>,
        TimeFn: Fn() -> u32,
        DelayFn: Fn(Duration) -> EmptyFuture,
        EmptyFuture: Future<Output = ()>,
    {
        let reading = self
            .poll(millis_fn, delay_fn)
            .await
            .map_err(RunError::Logger)?;
        record::emit(serial, &reading).map_err(RunError::Emit)?;
        debug!("emitted reading at {} ms", reading.timestamp_ms);
        Ok(reading)
    }

    /// Runs cycles forever, one every [`POLL_INTERVAL`].
    ///
    /// The time spent converting and emitting is subtracted from the wait, so lines are spaced by
    /// the interval rather than by the interval plus the cycle's own duration. A cycle that
    /// overruns the interval is followed immediately by the next one. Only returns on error.
    pub async fn run<TSerial, TimeFn, DelayFn, EmptyFuture>(
        &mut self,
        serial: &mut TSerial,
        millis_fn: TimeFn,
        delay_fn: DelayFn,
    ) -> Result<Infallible, RunError<TBus::Error, TSerial::Error>>
    where
        TSerial: Write<u8>,
        TimeFn: Fn() -> u32,
        DelayFn: Copy + Fn(Duration) -> EmptyFuture,
        EmptyFuture: Future<Output = ()>,
    {
        loop {
            let started_ms = millis_fn();
            self.cycle(&mut *serial, &millis_fn, delay_fn).await?;

            let elapsed = Duration::from_millis(u64::from(millis_fn().wrapping_sub(started_ms)));
            if elapsed > POLL_INTERVAL {
                warn!(
                    "cycle overran the poll interval by {} ms",
                    (elapsed - POLL_INTERVAL).as_millis() as u32
                );
            }
            delay_fn(POLL_INTERVAL.saturating_sub(elapsed)).await;
        }
    }
}

fn find_sensors<B: Bus, const N: usize>(
    bus: &mut B,
    options: &Options,
) -> Result<DeviceTable<N>, Error<B::Error>> {
    let mut devices = DeviceTable::new();
    for result in onewire::devices(bus) {
        let address = match result {
            Ok(address) => address,
            Err(SearchError::BadCrc(address)) => {
                warn!("skipping {}: bad CRC", address);
                continue;
            }
            Err(SearchError::Wrapped(error)) => return Err(Error::Wrapped(error)),
        };
        if !ds18b20::is_supported(&address) {
            warn!(
                "skipping {}: unsupported family {}",
                address,
                address.family_code()
            );
            continue;
        }

        debug!("found sensor {}", address);
        if let Err(CapacityExceeded(address)) = devices.insert(address) {
            match options.overflow_policy {
                OverflowPolicy::Truncate => {
                    warn!(
                        "device table holds {} sensors, ignoring {} and any after it",
                        N, address
                    );
                    break;
                }
                OverflowPolicy::Fail => return Err(Error::TooManyDevices { capacity: N }),
            }
        }
    }
    Ok(devices)
}
