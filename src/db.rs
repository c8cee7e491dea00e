use sqlx::{Connection, PgConnection};
use stacked_errors::{Result, StackableErr};

use crate::{ConnectInfo, TableInfo};

/// The queries this tool runs against the warehouse. Every call opens its own
/// connection, nothing is pooled since each command is short lived.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    /// Connects and runs `SELECT usename FROM pg_user`, returning the first
    /// user name. Doubles as the readiness check.
    async fn first_user(&self, cinfo: &ConnectInfo) -> Result<String>;

    /// Returns `tables` in the same order with row counts attached to the
    /// tables that currently exist
    async fn row_counts(&self, cinfo: &ConnectInfo, tables: &[TableInfo])
        -> Result<Vec<TableInfo>>;
}

/// `sqlx` backed [Database]
#[derive(Debug, Clone, Copy, Default)]
pub struct PgDatabase;

/// Double quotes an identifier for interpolation into SQL
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

async fn connect(cinfo: &ConnectInfo) -> Result<PgConnection> {
    PgConnection::connect_with(&cinfo.to_connect_options())
        .await
        .stack_err_with(|| {
            format!(
                "could not connect to database \"{}\" on {}:{}",
                cinfo.db, cinfo.host, cinfo.port
            )
        })
}

#[async_trait::async_trait]
impl Database for PgDatabase {
    #[tracing::instrument(skip_all, fields(db.host = %cinfo.host))]
    async fn first_user(&self, cinfo: &ConnectInfo) -> Result<String> {
        let mut conn = connect(cinfo).await.stack()?;
        let (name,): (String,) = sqlx::query_as("SELECT usename::text FROM pg_user")
            .fetch_one(&mut conn)
            .await
            .stack()?;
        conn.close().await.stack()?;
        Ok(name)
    }

    #[tracing::instrument(skip_all, fields(db.host = %cinfo.host))]
    async fn row_counts(
        &self,
        cinfo: &ConnectInfo,
        tables: &[TableInfo],
    ) -> Result<Vec<TableInfo>> {
        let mut conn = connect(cinfo).await.stack()?;
        let mut res = Vec::with_capacity(tables.len());
        for table in tables {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
            )
            .bind(&table.name)
            .fetch_one(&mut conn)
            .await
            .stack_err_with(|| format!("checking if table {} exists", table.name))?;
            if exists {
                let (count,): (i64,) = sqlx::query_as(&format!(
                    "SELECT COUNT(*) FROM {}",
                    quote_ident(&table.name)
                ))
                .fetch_one(&mut conn)
                .await
                .stack_err_with(|| format!("counting rows of table {}", table.name))?;
                res.push(table.with_row_count(u64::try_from(count).unwrap_or(0)));
            } else {
                res.push(table.clone());
            }
        }
        conn.close().await.stack()?;
        Ok(res)
    }
}
