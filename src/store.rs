//! ==============================================================================
//! store.rs - the temperaturedata table
//! ==============================================================================
//!
//! purpose:
//!     owns the single connection readings are written through. opened once
//!     at startup, reused for every insert, closed when the loop ends.
//!
//! table shape:
//!     temperaturedata(dateandtime, <reserved, always null>, temperature, humidity)
//!
//! ==============================================================================

use crate::config::DatabaseConfig;
use crate::domain::{Reading, StoredReading};
use crate::error::LoggerResult;

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Row};

const INSERT_READING: &str = "INSERT INTO temperaturedata VALUES (NOW(), NULL, ?, ?)";

/// where readings are persisted
#[allow(async_fn_in_trait)]
pub trait ReadingStore {
    /// insert one row and commit before returning
    async fn insert(&mut self, reading: &Reading) -> LoggerResult<()>;

    /// release the connection
    async fn close(self) -> LoggerResult<()>;
}

pub struct MySqlStore {
    conn: MySqlConnection,
}

impl MySqlStore {
    pub async fn connect(config: &DatabaseConfig) -> LoggerResult<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        let conn = MySqlConnection::connect_with(&options).await?;
        tracing::info!(host = %config.host, database = %config.name, "connected to store");
        Ok(Self { conn })
    }

    /// rows from the last `hours` hours, oldest first; `hours <= 0` means all
    pub async fn history(&mut self, hours: i64) -> LoggerResult<Vec<StoredReading>> {
        let rows = if hours <= 0 {
            sqlx::query(
                "SELECT CAST(UNIX_TIMESTAMP(dateandtime) AS SIGNED) AS ts, \
                        CAST(temperature AS DOUBLE) AS temperature, \
                        CAST(humidity AS DOUBLE) AS humidity \
                 FROM temperaturedata ORDER BY dateandtime",
            )
            .fetch_all(&mut self.conn)
            .await?
        } else {
            sqlx::query(
                "SELECT CAST(UNIX_TIMESTAMP(dateandtime) AS SIGNED) AS ts, \
                        CAST(temperature AS DOUBLE) AS temperature, \
                        CAST(humidity AS DOUBLE) AS humidity \
                 FROM temperaturedata \
                 WHERE dateandtime >= (NOW() - INTERVAL ? HOUR) \
                 ORDER BY dateandtime",
            )
            .bind(hours)
            .fetch_all(&mut self.conn)
            .await?
        };

        rows.iter()
            .map(|row| {
                Ok(StoredReading {
                    timestamp: row.try_get::<i64, _>("ts")?,
                    temperature: row.try_get::<f64, _>("temperature")?,
                    humidity: row.try_get::<f64, _>("humidity")?,
                })
            })
            .collect()
    }
}

impl ReadingStore for MySqlStore {
    async fn insert(&mut self, reading: &Reading) -> LoggerResult<()> {
        let mut tx = self.conn.begin().await?;
        sqlx::query(INSERT_READING)
            .bind(reading.temperature_celsius)
            .bind(reading.humidity_percent)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn close(self) -> LoggerResult<()> {
        self.conn.close().await?;
        tracing::info!("store connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests require a real database with a temperaturedata table
    // Run with: RECORDTEMP_DB_PASSWORD=... cargo test -- --ignored

    fn test_config() -> DatabaseConfig {
        DatabaseConfig {
            password: std::env::var("RECORDTEMP_DB_PASSWORD").unwrap_or_default(),
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn insert_binds_positionally() {
        assert_eq!(INSERT_READING.matches('?').count(), 2);
        assert!(INSERT_READING.contains("NOW(), NULL"));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn insert_then_read_back() {
        let mut store = MySqlStore::connect(&test_config()).await.expect("connect failed");
        let reading = Reading { temperature_celsius: 22.0, humidity_percent: 45.2 };

        store.insert(&reading).await.expect("insert failed");
        let rows = store.history(1).await.expect("history failed");

        // exact against DOUBLE columns: values are bound as f64
        let last = rows.last().expect("row missing");
        assert_eq!(last.temperature, 22.0);
        assert_eq!(last.humidity, 45.2);
        store.close().await.expect("close failed");
    }
}
