//! SQL Server driver implementation using tiberius
//!
//! Connection strings are ADO style and handed to tiberius as-is.
//! `simple_query` already yields a lazy token stream, so query results are
//! forwarded without buffering.

use crate::db::driver::{DatabaseBackend, DatabaseDriver, DriverConnection, RowStream};
use crate::db::query::{CellValue, QueryItem, Row};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::StreamExt;
use rust_decimal::Decimal;
use std::time::Duration;
use tiberius::{numeric::Numeric, Client, Column, ColumnType, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server driver
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlServerDriver;

impl SqlServerDriver {
    /// Internal TCP + TDS connection
    async fn connect_internal(connection_string: &str, timeout: Duration) -> Result<TdsClient> {
        let config = Config::from_ado_string(connection_string)
            .context("Invalid SQL Server connection string")?;

        let tcp = tokio::time::timeout(timeout, TcpStream::connect(config.get_addr()))
            .await
            .map_err(|_| anyhow!("TCP connect timed out after {}s", timeout.as_secs()))?
            .context("Failed to connect to SQL Server")?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .context("Failed to authenticate with SQL Server")?;

        Ok(client)
    }
}

#[async_trait]
impl DatabaseDriver for SqlServerDriver {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::SqlServer
    }

    async fn open_connection(
        &self,
        connection_string: &str,
        timeout: Duration,
    ) -> Result<Box<dyn DriverConnection>> {
        let client = Self::connect_internal(connection_string, timeout).await?;
        Ok(Box::new(SqlServerConnection {
            client: Some(client),
        }))
    }
}

/// An authenticated TDS session
pub struct SqlServerConnection {
    client: Option<TdsClient>,
}

impl SqlServerConnection {
    fn client(&mut self) -> Result<&mut TdsClient> {
        self.client
            .as_mut()
            .ok_or_else(|| anyhow!("SQL Server connection is closed"))
    }
}

#[async_trait]
impl DriverConnection for SqlServerConnection {
    async fn close(&mut self) -> Result<()> {
        match self.client.take() {
            Some(client) => client.close().await.context("Failed to close SQL Server connection"),
            None => Ok(()),
        }
    }

    async fn execute_non_query(&mut self, script: &str) -> Result<Vec<u64>> {
        let result = self.client()?.execute(script, &[]).await?;
        Ok(result.rows_affected().to_vec())
    }

    async fn execute_query<'a>(&'a mut self, script: &str) -> Result<RowStream<'a>> {
        let stream = self.client()?.simple_query(script.to_string()).await?;

        let items = stream.map(|item| match item {
            Ok(tiberius::QueryItem::Metadata(meta)) => Ok(QueryItem::Columns(
                meta.columns().iter().map(|c| c.name().to_string()).collect(),
            )),
            Ok(tiberius::QueryItem::Row(row)) => Ok(QueryItem::Row(row_values(&row))),
            Err(e) => Err(anyhow::Error::from(e).context("SQL Server query failed")),
        });
        Ok(items.boxed())
    }
}

fn row_values(row: &tiberius::Row) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| extract_cell_value(row, i, col))
        .collect()
}

// ---- Type conversion helpers ----

fn numeric_to_decimal(v: Numeric) -> CellValue {
    CellValue::Decimal(Decimal::from_i128_with_scale(v.value(), v.scale() as u32))
}

fn extract_cell_value(row: &tiberius::Row, index: usize, col: &Column) -> CellValue {
    match col.column_type() {
        ColumnType::Null => CellValue::Null,
        ColumnType::Bit | ColumnType::Bitn => row
            .get::<bool, _>(index)
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),
        ColumnType::Int1 => row
            .get::<u8, _>(index)
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int2 => row
            .get::<i16, _>(index)
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int4 => row
            .get::<i32, _>(index)
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int8 => row
            .get::<i64, _>(index)
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
        ColumnType::Intn => row
            .try_get::<i32, _>(index)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .or_else(|| row.try_get::<i64, _>(index).ok().flatten().map(CellValue::Int))
            .or_else(|| row.try_get::<i16, _>(index).ok().flatten().map(|v| CellValue::Int(v as i64)))
            .or_else(|| row.try_get::<u8, _>(index).ok().flatten().map(|v| CellValue::Int(v as i64)))
            .unwrap_or(CellValue::Null),
        ColumnType::Float4 => row
            .get::<f32, _>(index)
            .map(|v| CellValue::Float(v as f64))
            .unwrap_or(CellValue::Null),
        ColumnType::Float8 | ColumnType::Floatn => row
            .try_get::<f64, _>(index)
            .ok()
            .flatten()
            .map(CellValue::Float)
            .or_else(|| row.try_get::<f32, _>(index).ok().flatten().map(|v| CellValue::Float(v as f64)))
            .unwrap_or(CellValue::Null),
        ColumnType::Decimaln | ColumnType::Numericn => row
            .get::<Numeric, _>(index)
            .map(numeric_to_decimal)
            .unwrap_or(CellValue::Null),
        ColumnType::Money | ColumnType::Money4 => row
            .get::<f64, _>(index)
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
        ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetimen => row
            .get::<NaiveDateTime, _>(index)
            .map(|v| CellValue::DateTime(v.format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::Daten => row
            .get::<NaiveDate, _>(index)
            .map(|v| CellValue::DateTime(v.format("%Y-%m-%d").to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::Timen => row
            .get::<NaiveTime, _>(index)
            .map(|v| CellValue::DateTime(v.format("%H:%M:%S").to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::DatetimeOffsetn => row
            .get::<DateTime<FixedOffset>, _>(index)
            .map(|v| CellValue::DateTime(v.format("%Y-%m-%d %H:%M:%S %:z").to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::BigVarChar
        | ColumnType::BigChar
        | ColumnType::NVarchar
        | ColumnType::NChar
        | ColumnType::Text
        | ColumnType::NText
        | ColumnType::Xml => row
            .get::<&str, _>(index)
            .map(|v| CellValue::String(v.to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::Guid => row
            .get::<tiberius::Uuid, _>(index)
            .map(|v| CellValue::String(v.to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
            .get::<&[u8], _>(index)
            .map(|v| CellValue::Binary(v.to_vec()))
            .unwrap_or(CellValue::Null),
        _ => {
            if let Some(v) = row.try_get::<&str, _>(index).ok().flatten() {
                return CellValue::String(v.to_string());
            }
            if let Some(v) = row.try_get::<NaiveDateTime, _>(index).ok().flatten() {
                return CellValue::DateTime(v.format("%Y-%m-%d %H:%M:%S").to_string());
            }
            if let Some(v) = row.try_get::<i64, _>(index).ok().flatten() {
                return CellValue::Int(v);
            }
            if let Some(v) = row.try_get::<f64, _>(index).ok().flatten() {
                return CellValue::Float(v);
            }
            if let Some(v) = row.try_get::<Numeric, _>(index).ok().flatten() {
                return numeric_to_decimal(v);
            }
            CellValue::String(format!("<{:?}>", col.column_type()))
        }
    }
}
