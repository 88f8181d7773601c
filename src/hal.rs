//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides the sensor capability the logger loop polls.
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (adafruit driver) and a development machine (mock readings).
//!
//! relationships:
//!     - used by: logger.rs (polled once per iteration)
//!     - uses: gpio.rs (on feature="hardware")
//!
//! ==============================================================================

use crate::config::SensorConfig;
use std::sync::atomic::AtomicBool;

/// a humidity/temperature sensor
///
/// `read` returns `(humidity, temperature_celsius)`; either side is `None`
/// when the sensor could not produce it. retries, if any, happen inside and
/// stop early once `cancel` is set. blocking.
pub trait HumiditySensor: Send + Sync + 'static {
    fn read(&self, cancel: &AtomicBool) -> (Option<f64>, Option<f64>);
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct Dht22 {
    pin: u8,
}

#[cfg(not(feature = "hardware"))]
impl Dht22 {
    pub fn new(config: &SensorConfig) -> Self {
        tracing::info!("Using MOCK DHT22 (No hardware access)");
        Self { pin: config.gpio_pin }
    }
}

#[cfg(not(feature = "hardware"))]
impl HumiditySensor for Dht22 {
    fn read(&self, _cancel: &AtomicBool) -> (Option<f64>, Option<f64>) {
        tracing::debug!("[MOCK DHT22] Reading pin {}", self.pin);
        (Some(50.0), Some(25.0))
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Dht22 {
    driver: crate::gpio::DriverSpec,
    retries: u32,
    retry_delay: std::time::Duration,
}

#[cfg(feature = "hardware")]
impl Dht22 {
    pub fn new(config: &SensorConfig) -> Self {
        tracing::info!(pin = config.gpio_pin, python = %config.python, "Using REAL DHT22 (adafruit driver)");
        Self {
            driver: crate::gpio::DriverSpec {
                python: config.python.clone(),
                pin: config.gpio_pin,
                timeout: std::time::Duration::from_millis(config.driver_timeout_ms),
            },
            retries: config.retries,
            retry_delay: std::time::Duration::from_millis(config.retry_delay_ms),
        }
    }
}

#[cfg(feature = "hardware")]
impl HumiditySensor for Dht22 {
    fn read(&self, cancel: &AtomicBool) -> (Option<f64>, Option<f64>) {
        crate::gpio::read_retry(
            || crate::gpio::read_dht22(&self.driver, cancel),
            self.retries,
            self.retry_delay,
            cancel,
        )
    }
}
