//! ==============================================================================
//! logger.rs - the polling loop
//! ==============================================================================
//!
//! purpose:
//!     reads the sensor until shutdown: complete readings are echoed (log
//!     mode) and inserted, misses are retried after a backoff. every sleep
//!     also watches the shutdown channel.
//!
//!     ┌──────────────────────┐   valid read   ┌──────────────────────┐
//!     │  WaitingForSensor    │ ─────────────▶ │  Logging(reading)    │
//!     │  (miss → backoff)    │ ◀───────────── │  (insert + commit)   │
//!     └──────────────────────┘  interval      └──────────────────────┘
//!
//! relationships:
//!     - used by: main.rs
//!     - uses: hal.rs (HumiditySensor), store.rs (ReadingStore)
//!
//! ==============================================================================

use crate::config::{BackoffConfig, HostConfig};
use crate::domain::Reading;
use crate::error::{LoggerError, LoggerResult};
use crate::hal::HumiditySensor;
use crate::store::ReadingStore;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopState {
    WaitingForSensor,
    Logging(Reading),
}

/// delay between consecutive sensor misses
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { initial: delay, multiplier: 1.0, max_delay: delay, max_attempts: None }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            initial: Duration::from_secs(config.initial_seconds),
            multiplier: config.multiplier.max(1.0),
            max_delay: Duration::from_secs(config.max_seconds),
            max_attempts: config.max_attempts,
        }
    }

    /// delay after the `miss`-th consecutive miss (1-based)
    pub fn delay(&self, miss: u32) -> Duration {
        let exponent = miss.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    pub fn exhausted(&self, misses: u32) -> bool {
        self.max_attempts.is_some_and(|max| misses >= max)
    }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub warmup: Duration,
    pub interval: Duration,
    pub backoff: BackoffPolicy,
    /// shown in the log-mode confirmation line
    pub database_name: String,
}

impl LoopSettings {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            warmup: config.timing.warmup(),
            interval: config.timing.interval(),
            backoff: BackoffPolicy::from_config(&config.timing.backoff),
            database_name: config.database.name.clone(),
        }
    }
}

pub struct LoggerLoop<S, D, W> {
    sensor: Arc<S>,
    store: D,
    console: Option<W>,
    settings: LoopSettings,
    shutdown: watch::Receiver<bool>,
    /// set on shutdown so an in-flight sensor read gives up early
    cancel: Arc<AtomicBool>,
}

impl<S, D> LoggerLoop<S, D, std::io::Stdout> {
    pub fn new(sensor: Arc<S>, store: D, settings: LoopSettings, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            sensor,
            store,
            console: None,
            settings,
            shutdown,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<S, D, W> LoggerLoop<S, D, W>
where
    S: HumiditySensor,
    D: ReadingStore,
    W: Write,
{
    /// echo readings to `console`; `None` keeps the loop silent
    pub fn with_console<W2: Write>(self, console: Option<W2>) -> LoggerLoop<S, D, W2> {
        LoggerLoop {
            sensor: self.sensor,
            store: self.store,
            console,
            settings: self.settings,
            shutdown: self.shutdown,
            cancel: self.cancel,
        }
    }

    #[cfg(test)]
    pub fn into_store(self) -> D {
        self.store
    }

    /// `run`, then close the store whatever the outcome
    ///
    /// a close failure is only logged; the loop's own result is returned.
    pub async fn run_to_completion(mut self) -> LoggerResult<()> {
        let result = self.run().await;
        if let Err(e) = self.store.close().await {
            tracing::warn!("failed to close store connection: {}", e);
        }
        result
    }

    /// poll until shutdown (`Ok`) or a fatal error
    ///
    /// expects the warm-up (`warm_up`) to have happened already.
    pub async fn run(&mut self) -> LoggerResult<()> {
        tracing::info!(interval = ?self.settings.interval, "polling sensor");
        let mut misses = 0u32;
        loop {
            let Some(state) = self.poll().await? else {
                tracing::info!("shutdown during sensor read");
                return Ok(());
            };

            let delay = match state {
                LoopState::WaitingForSensor => {
                    misses += 1;
                    if self.settings.backoff.exhausted(misses) {
                        return Err(LoggerError::SensorUnavailable { attempts: misses });
                    }
                    let delay = self.settings.backoff.delay(misses);
                    tracing::warn!(misses, retry_in = ?delay, "sensor read failed");
                    delay
                }
                LoopState::Logging(reading) => {
                    misses = 0;
                    self.persist(&reading).await?;
                    self.settings.interval
                }
            };

            if self.pause(delay).await {
                tracing::info!("shutdown requested");
                return Ok(());
            }
        }
    }

    /// one sensor read; `None` if shutdown arrived first
    ///
    /// on shutdown the read is cancelled and awaited, so no blocking task
    /// outlives the loop.
    async fn poll(&mut self) -> LoggerResult<Option<LoopState>> {
        let sensor = Arc::clone(&self.sensor);
        let cancel = Arc::clone(&self.cancel);
        let mut read = tokio::task::spawn_blocking(move || sensor.read(&cancel));

        let (humidity, temperature) = tokio::select! {
            pair = &mut read => pair?,
            _ = wait_for_shutdown(&mut self.shutdown) => {
                self.cancel.store(true, Ordering::SeqCst);
                if let Err(e) = read.await {
                    tracing::warn!("sensor task failed during shutdown: {}", e);
                }
                return Ok(None);
            }
        };

        Ok(Some(match Reading::from_pair(humidity, temperature) {
            Some(reading) => LoopState::Logging(reading),
            None => LoopState::WaitingForSensor,
        }))
    }

    async fn persist(&mut self, reading: &Reading) -> LoggerResult<()> {
        if let Some(out) = self.console.as_mut() {
            for line in reading.console_lines(&chrono::Local::now()) {
                writeln!(out, "{}", line)?;
            }
            writeln!(out)?;
            out.flush()?;
        }

        self.store.insert(reading).await?;
        tracing::debug!(
            celsius = reading.temperature_celsius,
            humidity = reading.humidity_percent,
            "reading stored"
        );

        if let Some(out) = self.console.as_mut() {
            writeln!(out, "values logged to {} database", self.settings.database_name)?;
            out.flush()?;
        }
        Ok(())
    }

    async fn pause(&mut self, duration: Duration) -> bool {
        pause(duration, &mut self.shutdown).await
    }
}

/// give the sensor (and a freshly booted database) time to settle
///
/// returns false if shutdown was requested during the wait.
pub async fn warm_up(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tracing::info!(warmup = ?duration, "waiting for sensor warm-up");
    !pause(duration, shutdown).await
}

/// sleep for `duration`; true if shutdown was requested instead
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = wait_for_shutdown(shutdown) => true,
    }
}

/// resolves once the flag is true; never if the sender is gone
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Pair = (Option<f64>, Option<f64>);

    /// replays a fixed script of reads, then requests shutdown
    struct ScriptedSensor {
        script: Mutex<VecDeque<Pair>>,
        stop: watch::Sender<bool>,
    }

    impl HumiditySensor for ScriptedSensor {
        fn read(&self, _cancel: &AtomicBool) -> Pair {
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                let _ = self.stop.send(true);
                (None, None)
            })
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        rows: Vec<(Reading, Instant)>,
        fail: bool,
        closed: Arc<AtomicBool>,
    }

    impl ReadingStore for RecordingStore {
        async fn insert(&mut self, reading: &Reading) -> LoggerResult<()> {
            if self.fail {
                return Err(LoggerError::Store(sqlx::Error::PoolClosed));
            }
            self.rows.push((*reading, Instant::now()));
            Ok(())
        }

        async fn close(self) -> LoggerResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn settings() -> LoopSettings {
        LoopSettings::from_config(&HostConfig::default())
    }

    fn scripted(
        script: Vec<Pair>,
        store: RecordingStore,
        settings: LoopSettings,
    ) -> LoggerLoop<ScriptedSensor, RecordingStore, std::io::Stdout> {
        let (stop, shutdown) = watch::channel(false);
        let sensor = ScriptedSensor { script: Mutex::new(script.into()), stop };
        LoggerLoop::new(Arc::new(sensor), store, settings, shutdown)
    }

    #[tokio::test(start_paused = true)]
    async fn valid_read_inserts_raw_values_immediately() {
        let start = Instant::now();
        let mut logger = scripted(vec![(Some(45.2), Some(22.0))], RecordingStore::default(), settings());

        logger.run().await.unwrap();

        let store = logger.into_store();
        assert_eq!(store.rows.len(), 1);
        let (reading, at) = store.rows[0];
        assert_eq!(reading, Reading { temperature_celsius: 22.0, humidity_percent: 45.2 });
        assert!((reading.fahrenheit() - 71.6).abs() < 1e-9);
        assert_eq!(at, start);
    }

    #[tokio::test(start_paused = true)]
    async fn miss_skips_insert_and_retries_after_backoff() {
        let start = Instant::now();
        let mut logger = scripted(
            vec![(None, None), (Some(50.0), None), (Some(50.0), Some(20.0))],
            RecordingStore::default(),
            settings(),
        );

        logger.run().await.unwrap();

        let store = logger.into_store();
        assert_eq!(store.rows.len(), 1);
        assert_eq!(store.rows[0].1 - start, Duration::from_secs(10 + 10));
    }

    #[tokio::test(start_paused = true)]
    async fn every_valid_read_is_one_insert_spaced_by_interval() {
        let mut logger = scripted(
            vec![(Some(40.0), Some(18.5)), (Some(41.0), Some(19.0)), (Some(42.0), Some(19.5))],
            RecordingStore::default(),
            settings(),
        );

        logger.run().await.unwrap();

        let rows = logger.into_store().rows;
        let celsius: Vec<f64> = rows.iter().map(|(r, _)| r.temperature_celsius).collect();
        assert_eq!(celsius, vec![18.5, 19.0, 19.5]);
        assert_eq!(rows[1].1 - rows[0].1, Duration::from_secs(10));
        assert_eq!(rows[2].1 - rows[1].1, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn log_mode_prints_reading_and_confirmation() {
        let buf = SharedBuf::default();
        let mut logger = scripted(vec![(Some(50.0), Some(20.0))], RecordingStore::default(), settings())
            .with_console(Some(buf.clone()));

        logger.run().await.unwrap();

        let text = buf.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Temp=68.0F Humidity=50.0%");
        assert_eq!(lines[1], "Temp=20.0C");
        assert!(chrono::NaiveDateTime::parse_from_str(lines[2], "%Y-%m-%d %H:%M:%S").is_ok());
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "values logged to temperatures database");
    }

    #[tokio::test(start_paused = true)]
    async fn no_console_output_for_misses() {
        let buf = SharedBuf::default();
        let mut logger = scripted(vec![(None, None)], RecordingStore::default(), settings())
            .with_console(Some(buf.clone()));

        logger.run().await.unwrap();
        assert!(buf.text().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_backoff_escalates() {
        let mut settings = settings();
        settings.backoff = BackoffPolicy {
            initial: Duration::from_secs(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: Some(3),
        };
        let start = Instant::now();
        let mut logger = scripted(
            vec![(None, None), (None, None), (None, None), (Some(1.0), Some(1.0))],
            RecordingStore::default(),
            settings,
        );

        let err = logger.run().await.unwrap_err();
        assert!(matches!(err, LoggerError::SensorUnavailable { attempts: 3 }));
        // 10s and 20s backoffs before the third miss
        assert_eq!(Instant::now() - start, Duration::from_secs(10 + 20));
        assert!(logger.into_store().rows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_read_resets_miss_count() {
        let mut settings = settings();
        settings.backoff.max_attempts = Some(2);
        let mut logger = scripted(
            vec![(None, None), (Some(1.0), Some(2.0)), (None, None), (Some(3.0), Some(4.0))],
            RecordingStore::default(),
            settings,
        );

        logger.run().await.unwrap();
        assert_eq!(logger.into_store().rows.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_is_fatal() {
        let store = RecordingStore { fail: true, ..Default::default() };
        let mut logger = scripted(vec![(Some(50.0), Some(20.0))], store, settings());

        let err = logger.run().await.unwrap_err();
        assert!(matches!(err, LoggerError::Store(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn store_is_closed_after_fatal_error() {
        let store = RecordingStore { fail: true, ..Default::default() };
        let closed = Arc::clone(&store.closed);
        let logger = scripted(vec![(Some(50.0), Some(20.0))], store, settings());

        let err = logger.run_to_completion().await.unwrap_err();
        assert!(matches!(err, LoggerError::Store(_)));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn store_is_closed_after_shutdown() {
        let store = RecordingStore::default();
        let closed = Arc::clone(&store.closed);
        let logger = scripted(vec![(Some(50.0), Some(20.0))], store, settings());

        logger.run_to_completion().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_cancels_retrying_read() {
        /// fails every attempt with the driver's 2s spacing
        struct FlakySensor {
            attempts: Arc<std::sync::atomic::AtomicU32>,
            finished: Arc<AtomicBool>,
        }

        impl HumiditySensor for FlakySensor {
            fn read(&self, cancel: &AtomicBool) -> Pair {
                let pair = crate::gpio::read_retry(
                    || {
                        self.attempts.fetch_add(1, Ordering::SeqCst);
                        Err(anyhow::anyhow!("checksum"))
                    },
                    15,
                    Duration::from_secs(2),
                    cancel,
                );
                self.finished.store(true, Ordering::SeqCst);
                pair
            }
        }

        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let sensor = FlakySensor { attempts: Arc::clone(&attempts), finished: Arc::clone(&finished) };
        let (stop, shutdown) = watch::channel(false);
        let mut logger = LoggerLoop::new(Arc::new(sensor), RecordingStore::default(), settings(), shutdown);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = stop.send(true);
        });

        let started = std::time::Instant::now();
        logger.run().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
        assert!(finished.load(Ordering::SeqCst), "blocking read outlived the loop");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(logger.into_store().rows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn warm_up_waits_full_duration() {
        let (_stop, mut shutdown) = watch::channel(false);
        let start = Instant::now();

        assert!(warm_up(Duration::from_secs(30), &mut shutdown).await);
        assert_eq!(Instant::now() - start, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cuts_warm_up_short() {
        let (stop, mut shutdown) = watch::channel(false);
        let start = Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = stop.send(true);
        });

        assert!(!warm_up(Duration::from_secs(30), &mut shutdown).await);
        assert_eq!(Instant::now() - start, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_between_reads_stops_loop() {
        let (stop, shutdown) = watch::channel(false);
        let (unused, _) = watch::channel(false);
        let script = vec![(Some(1.0), Some(1.0)); 100];
        let sensor = ScriptedSensor { script: Mutex::new(script.into()), stop: unused };
        let mut logger = LoggerLoop::new(Arc::new(sensor), RecordingStore::default(), settings(), shutdown);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            let _ = stop.send(true);
        });

        logger.run().await.unwrap();
        // reads at 0s, 10s, 20s; shutdown lands in the third interval
        assert_eq!(logger.into_store().rows.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_does_not_spin() {
        let (stop, shutdown) = watch::channel(false);
        drop(stop);
        let (inner_stop, _) = watch::channel(false);
        let sensor = ScriptedSensor { script: Mutex::new(vec![(Some(1.0), Some(1.0))].into()), stop: inner_stop };
        let mut logger = LoggerLoop::new(Arc::new(sensor), RecordingStore::default(), settings(), shutdown);

        let start = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(15), logger.run()).await;
        assert!(result.is_err(), "loop should still be sleeping");
        assert_eq!(Instant::now() - start, Duration::from_secs(15));
    }

    #[test]
    fn fixed_policy_never_grows_or_gives_up() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(10));
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(1_000), Duration::from_secs(10));
        assert!(!policy.exhausted(u32::MAX));
    }

    #[test]
    fn default_config_is_fixed_ten_seconds() {
        let policy = BackoffPolicy::from_config(&BackoffConfig::default());
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(50), Duration::from_secs(10));
        assert!(!policy.exhausted(1_000_000));
    }

    #[test]
    fn exponential_policy_is_capped() {
        let policy = BackoffPolicy {
            initial: Duration::from_secs(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: Some(5),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(2), Duration::from_secs(20));
        assert_eq!(policy.delay(3), Duration::from_secs(40));
        assert_eq!(policy.delay(4), Duration::from_secs(60));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(60));
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
    }
}
