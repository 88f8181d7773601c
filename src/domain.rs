use serde::{Deserialize, Serialize};

/// a complete temperature/humidity reading
///
/// the insert timestamp is not carried here; the store stamps each row
/// with its own server time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// temperature in celsius
    pub temperature_celsius: f64,
    /// relative humidity (0-100%)
    pub humidity_percent: f64,
}

impl Reading {
    /// build a reading from a raw `(humidity, temperature)` sensor pair
    ///
    /// returns `None` unless both values are present, so a half reading
    /// can never reach the store.
    pub fn from_pair(humidity: Option<f64>, temperature_celsius: Option<f64>) -> Option<Self> {
        match (humidity, temperature_celsius) {
            (Some(humidity_percent), Some(temperature_celsius)) => Some(Self {
                temperature_celsius,
                humidity_percent,
            }),
            _ => None,
        }
    }

    pub fn fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(self.temperature_celsius)
    }

    /// the three log-mode lines: fahrenheit + humidity, celsius, local time
    pub fn console_lines(&self, now: &chrono::DateTime<chrono::Local>) -> [String; 3] {
        [
            format!("Temp={:.1}F Humidity={:.1}%", self.fahrenheit(), self.humidity_percent),
            format!("Temp={:.1}C", self.temperature_celsius),
            now.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]
    }
}

/// F = C * 9/5 + 32
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// a row read back from the store, as exported
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// unix timestamp in seconds
    pub timestamp: i64,
    pub temperature: f64,
    pub humidity: f64,
}

/// column-oriented history, one array per quantity
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSeries {
    pub dateandtime: Vec<i64>,
    pub temperature: Vec<f64>,
    pub humidity: Vec<f64>,
}
