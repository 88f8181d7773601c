//! ==============================================================================
//! gpio.rs - dht22 capability via the adafruit driver
//! ==============================================================================
//!
//! purpose:
//!     reads the dht22 temperature/humidity sensor on a gpio pin and wraps the
//!     single read in the retry policy the logger relies on.
//!
//! relationships:
//!     - used by: hal.rs (Dht22Sensor, behind feature = "hardware")
//!     - uses: python/adafruit_dht (via subprocess for reliable timing)
//!
//! why subprocess to python?:
//!     dht22 sensors require precise bit-banging timing (~microseconds).
//!     pure rust in userspace is unreliable due to lack of real-time guarantees.
//!
//! cancellation:
//!     every wait in here (the driver process, the delay between attempts)
//!     is sliced and checks the cancel flag, so a shutdown never waits out
//!     a full retry cycle.
//!
//! ==============================================================================

use anyhow::{anyhow, bail, Result};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// granularity of every cancellable wait
const POLL_SLICE: Duration = Duration::from_millis(50);

/// one read; the pin arrives as argv[1], output is one json line or `null`
const DHT22_SCRIPT: &str = r#"
import json, sys
import adafruit_dht, board

dht = adafruit_dht.DHT22(getattr(board, "D" + sys.argv[1]))
try:
    t, h = dht.temperature, dht.humidity
finally:
    dht.exit()
print(json.dumps({"t": t, "h": h}) if t is not None and h is not None else "null")
"#;

/// where and how the driver runs
#[derive(Debug, Clone)]
pub struct DriverSpec {
    /// interpreter with adafruit_dht installed
    pub python: String,
    pub pin: u8,
    /// a single driver run is killed after this long
    pub timeout: Duration,
}

/// read dht22 once, returning `(temperature_celsius, humidity)`
pub fn read_dht22(driver: &DriverSpec, cancel: &AtomicBool) -> Result<(f64, f64)> {
    let mut child = Command::new(&driver.python)
        .arg("-c")
        .arg(DHT22_SCRIPT)
        .arg(driver.pin.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| anyhow!("Failed to run {}: {}", driver.python, e))?;

    let started = Instant::now();
    while child.try_wait()?.is_none() {
        let reason = if cancel.load(Ordering::SeqCst) {
            "cancelled"
        } else if started.elapsed() >= driver.timeout {
            "timed out"
        } else {
            std::thread::sleep(POLL_SLICE);
            continue;
        };
        let _ = child.kill();
        let _ = child.wait();
        bail!("dht22 driver {} after {:?}", reason, started.elapsed());
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let last = stderr.lines().last().unwrap_or("no output");
        bail!("driver exited with {}: {}", output.status, last.trim());
    }

    parse_driver_output(&String::from_utf8_lossy(&output.stdout))
}

/// parse one line of driver output: `{"t": .., "h": ..}` or `null`
pub fn parse_driver_output(stdout: &str) -> Result<(f64, f64)> {
    let stdout = stdout.trim();
    if stdout == "null" || stdout.is_empty() {
        bail!("Sensor returned null");
    }

    let parsed: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| anyhow!("JSON parse error: {} (got: {})", e, stdout))?;

    let temp = parsed["t"].as_f64().ok_or_else(|| anyhow!("Missing temp"))?;
    let humidity = parsed["h"].as_f64().ok_or_else(|| anyhow!("Missing humidity"))?;

    Ok((temp, humidity))
}

/// retry `read` up to `retries` times, `delay` apart
///
/// returns `(humidity, temperature)` from the first successful attempt, or
/// `(None, None)` once the attempts are exhausted or `cancel` is set.
/// blocking.
pub fn read_retry<F>(mut read: F, retries: u32, delay: Duration, cancel: &AtomicBool) -> (Option<f64>, Option<f64>)
where
    F: FnMut() -> Result<(f64, f64)>,
{
    for attempt in 1..=retries {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        match read() {
            Ok((temp, humidity)) => return (Some(humidity), Some(temp)),
            Err(e) => {
                tracing::debug!(attempt, retries, "dht22 read failed: {:#}", e);
                if attempt < retries && !sleep_unless_cancelled(delay, cancel) {
                    break;
                }
            }
        }
    }
    (None, None)
}

/// sleep in slices; false if `cancel` was set before `delay` elapsed
pub fn sleep_unless_cancelled(delay: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return true;
        }
        std::thread::sleep(left.min(POLL_SLICE));
    }
}
