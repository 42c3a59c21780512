use crate::config::DatabaseConfig;
use crate::error::{LinkError, LinkResult};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::time::Instant;

/// Opens one connection per logical operation. There is no pool: every caller closes the
/// connection it was handed through [`release`].
#[derive(Debug, Clone)]
pub struct Gateway {
    cfg: DatabaseConfig,
}

impl Gateway {
    pub fn new(cfg: DatabaseConfig) -> Self { Self { cfg } }

    pub async fn connect(&self) -> LinkResult<PgConnection> {
        let opts = PgConnectOptions::new()
            .host(&self.cfg.host)
            .port(self.cfg.port)
            .username(&self.cfg.username)
            .password(&self.cfg.password)
            .database(&self.cfg.database);
        let t0 = Instant::now();
        let conn = PgConnection::connect_with(&opts).await.map_err(|e| {
            LinkError::Persistence(format!(
                "cannot connect to PostgreSQL at {}:{} / db {}: {}",
                self.cfg.host, self.cfg.port, self.cfg.database, e
            ))
        })?;
        log::debug!("[DB] connected to {}:{} in {:?}", self.cfg.host, self.cfg.port, t0.elapsed());
        Ok(conn)
    }
}

/// Close a connection, logging rather than masking the outcome of the operation it served.
pub async fn release(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        log::warn!("[DB] closing connection failed: {}", e);
    }
}
