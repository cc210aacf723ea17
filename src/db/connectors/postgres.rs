use super::{ConnectionConfig, DatabaseConnector, DatabaseEngine, ExecutionMode};
use crate::db::schema::{ColumnSchema, ForeignKeyInfo, Row, Value, NO_DESCRIPTION};
use anyhow::Context;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{Client, NoTls};

const COLUMNS_QUERY: &str = "SELECT column_name::text, \
            data_type::text, \
            col_description(format('%I.%I', table_schema, table_name)::regclass::oid, ordinal_position) AS description, \
            is_nullable::text, \
            column_default::text \
     FROM information_schema.columns \
     WHERE table_name = $1 \
     ORDER BY ordinal_position";

const FOREIGN_KEYS_QUERY: &str = "SELECT kcu.column_name::text, \
            ccu.table_name::text AS foreign_table_name, \
            ccu.column_name::text AS foreign_column_name \
     FROM information_schema.table_constraints AS tc \
     JOIN information_schema.key_column_usage AS kcu \
       ON tc.constraint_name = kcu.constraint_name \
     JOIN information_schema.constraint_column_usage AS ccu \
       ON ccu.constraint_name = tc.constraint_name \
     WHERE tc.constraint_type = 'FOREIGN KEY' \
       AND tc.table_name = $1";

/// PostgreSQL connector using tokio-postgres
pub struct PostgresConnector {
    config: ConnectionConfig,
}

impl PostgresConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Build a tokio-postgres Config from our ConnectionConfig
    fn build_pg_config(&self) -> anyhow::Result<tokio_postgres::Config> {
        let mut pg_config = match self.config.connection_string {
            Some(ref conn_str) => conn_str
                .parse::<tokio_postgres::Config>()
                .context("Failed to parse PostgreSQL connection string")?,
            None => {
                let mut cfg = tokio_postgres::Config::new();
                cfg.host(self.config.host.as_deref().unwrap_or("localhost"));
                cfg.port(self.config.port.unwrap_or(5432));
                if let Some(ref db) = self.config.database {
                    cfg.dbname(db);
                }
                if let Some(ref user) = self.config.username {
                    cfg.user(user);
                }
                if let Some(ref pass) = self.config.password {
                    cfg.password(pass);
                }
                cfg
            }
        };
        pg_config.connect_timeout(Duration::from_secs(self.config.connection_timeout_secs));
        Ok(pg_config)
    }

    /// Open a fresh connection. The driver task ends when the returned client is dropped.
    async fn open(&self) -> anyhow::Result<Client> {
        let pg_config = self.build_pg_config()?;
        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .context("Failed to connect to PostgreSQL")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::warn!("PostgreSQL connection closed with error: {}", e);
            }
        });

        Ok(client)
    }

    /// Convert a tokio-postgres row into our Row type
    fn row_to_map(row: &tokio_postgres::Row) -> anyhow::Result<Row> {
        let mut map = Row::with_capacity(row.len());
        for (idx, col) in row.columns().iter().enumerate() {
            let value = Self::column_to_value(row, idx)
                .with_context(|| format!("Failed to decode column {}", col.name()))?;
            map.insert(col.name(), value);
        }
        Ok(map)
    }

    /// Convert a single column value to a Value
    fn column_to_value(row: &tokio_postgres::Row, idx: usize) -> anyhow::Result<Value> {
        Ok(row
            .try_get::<_, Option<Cell>>(idx)?
            .map(|cell| cell.0)
            .unwrap_or(Value::Null))
    }
}

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// A non-null column value decoded from the binary wire format.
struct Cell(Value);

impl<'a> FromSql<'a> for Cell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        decode_binary(ty, raw).map(Cell)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Decode one binary-format value. Types without a known layout are kept
/// as raw bytes.
fn decode_binary(ty: &Type, raw: &[u8]) -> Result<Value, BoxError> {
    let value = match *ty {
        Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
        Type::CHAR => Value::Text(char::from(i8::from_sql(ty, raw)? as u8).to_string()),
        Type::INT2 => Value::Int(i16::from_sql(ty, raw)? as i64),
        Type::INT4 => Value::Int(i32::from_sql(ty, raw)? as i64),
        Type::INT8 => Value::Int(i64::from_sql(ty, raw)?),
        Type::OID => Value::Int(u32::from_sql(ty, raw)? as i64),
        Type::FLOAT4 => Value::Float(f32::from_sql(ty, raw)? as f64),
        Type::FLOAT8 => Value::Float(f64::from_sql(ty, raw)?),
        Type::NUMERIC => Value::Decimal(decode_numeric(raw)?),
        Type::MONEY => Value::Decimal(decode_money(raw)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN | Type::XML => {
            Value::Text(std::str::from_utf8(raw)?.to_string())
        }
        Type::BYTEA => Value::Bytes(raw.to_vec()),
        Type::DATE => Value::Date(chrono::NaiveDate::from_sql(ty, raw)?),
        Type::TIME => Value::Time(chrono::NaiveTime::from_sql(ty, raw)?),
        Type::TIMESTAMP => Value::Timestamp(chrono::NaiveDateTime::from_sql(ty, raw)?),
        Type::TIMESTAMPTZ => Value::TimestampTz(chrono::DateTime::<chrono::Utc>::from_sql(ty, raw)?),
        Type::UUID => Value::Uuid(uuid::Uuid::from_sql(ty, raw)?),
        Type::JSON | Type::JSONB => Value::Json(serde_json::Value::from_sql(ty, raw)?),
        Type::INTERVAL => Value::Text(decode_interval(raw)?),
        Type::INET | Type::CIDR => Value::Text(decode_inet(raw)?),
        _ => match ty.kind() {
            Kind::Array(member) => Value::Json(decode_array(member, raw)?),
            // Enum labels travel as plain text
            Kind::Enum(_) => Value::Text(std::str::from_utf8(raw)?.to_string()),
            Kind::Domain(inner) => decode_binary(inner, raw)?,
            _ if ty.name() == "citext" => Value::Text(std::str::from_utf8(raw)?.to_string()),
            _ => Value::Bytes(raw.to_vec()),
        },
    };
    Ok(value)
}

/// Big-endian cursor over a binary value.
struct WireReader<'a> {
    raw: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Self { raw, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BoxError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.raw.len())
            .ok_or("binary value truncated")?;
        let bytes = &self.raw[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, BoxError> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, BoxError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into()?))
    }

    fn i64(&mut self) -> Result<i64, BoxError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into()?))
    }
}

/// Decode an array of any dimension into nested JSON arrays.
fn decode_array(member: &Type, raw: &[u8]) -> Result<serde_json::Value, BoxError> {
    let mut r = WireReader::new(raw);
    let ndim = r.i32()?;
    let _has_nulls = r.i32()?;
    let _element_oid = r.i32()?;
    if ndim < 0 {
        return Err("negative array dimension count".into());
    }

    let mut dims = Vec::new();
    for _ in 0..ndim {
        let len = r.i32()?;
        let _lower_bound = r.i32()?;
        if len < 0 {
            return Err("negative array dimension".into());
        }
        dims.push(len as usize);
    }

    let total: usize = if dims.is_empty() {
        0
    } else {
        dims.iter()
            .try_fold(1usize, |acc, len| acc.checked_mul(*len))
            .ok_or("array too large")?
    };
    let mut elements = Vec::new();
    for _ in 0..total {
        let len = r.i32()?;
        if len < 0 {
            elements.push(serde_json::Value::Null);
        } else {
            let value = decode_binary(member, r.take(len as usize)?)?;
            elements.push(serde_json::to_value(value)?);
        }
    }

    Ok(nest(&dims, &mut elements.into_iter()))
}

fn nest<I>(dims: &[usize], elements: &mut I) -> serde_json::Value
where
    I: Iterator<Item = serde_json::Value>,
{
    match dims.split_first() {
        None => serde_json::Value::Array(vec![]),
        Some((&len, [])) => serde_json::Value::Array(elements.by_ref().take(len).collect()),
        Some((&len, rest)) => {
            serde_json::Value::Array((0..len).map(|_| nest(rest, elements)).collect())
        }
    }
}

/// Render an INTERVAL the way PostgreSQL prints it by default,
/// e.g. `1 year 2 mons 3 days 04:05:06.5`.
fn decode_interval(raw: &[u8]) -> Result<String, BoxError> {
    let mut r = WireReader::new(raw);
    let micros = r.i64()?;
    let days = r.i32()?;
    let months = r.i32()?;

    let unit = |n: i32, one: &str, many: &str| -> Option<String> {
        match n {
            0 => None,
            1 => Some(format!("1 {}", one)),
            _ => Some(format!("{} {}", n, many)),
        }
    };
    let mut parts: Vec<String> = [
        unit(months / 12, "year", "years"),
        unit(months % 12, "mon", "mons"),
        unit(days, "day", "days"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 {
            "-"
        } else if months < 0 || days < 0 {
            "+"
        } else {
            ""
        };
        let abs = micros.unsigned_abs();
        let secs = abs / 1_000_000;
        let frac = abs % 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        if frac != 0 {
            time.push('.');
            time.push_str(format!("{:06}", frac).trim_end_matches('0'));
        }
        parts.push(time);
    }
    Ok(parts.join(" "))
}

/// MONEY is a count of cents; assumes two fractional digits (the default lc_monetary).
fn decode_money(raw: &[u8]) -> Result<String, BoxError> {
    let cents = WireReader::new(raw).i64()?;
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    Ok(format!("{}{}.{:02}", sign, abs / 100, abs % 100))
}

/// INET/CIDR as `address[/prefix]`; the prefix is omitted for a single inet host.
fn decode_inet(raw: &[u8]) -> Result<String, BoxError> {
    let mut r = WireReader::new(raw);
    let family = r.u8()?;
    let bits = r.u8()?;
    let is_cidr = r.u8()? != 0;
    let len = r.u8()? as usize;
    let addr_bytes = r.take(len)?;

    let (addr, full) = match family {
        2 => {
            let octets: [u8; 4] = addr_bytes.try_into()?;
            (IpAddr::from(Ipv4Addr::from(octets)), 32)
        }
        3 => {
            let octets: [u8; 16] = addr_bytes.try_into()?;
            (IpAddr::from(Ipv6Addr::from(octets)), 128)
        }
        other => return Err(format!("unknown inet family {}", other).into()),
    };
    if is_cidr || bits != full {
        Ok(format!("{}/{}", addr, bits))
    } else {
        Ok(addr.to_string())
    }
}

/// Decode the binary wire format of a NUMERIC into its decimal text.
fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let read_u16 = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
    let ndigits = read_u16(0) as usize;
    let weight = read_u16(2) as i16 as i32;
    let sign = read_u16(4);
    let dscale = read_u16(6) as usize;

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("numeric value truncated".into());
    }
    let digits: Vec<u16> = (0..ndigits).map(|i| read_u16(8 + i * 2)).collect();
    let digit_at = |idx: i32| -> u16 {
        if idx >= 0 && (idx as usize) < digits.len() {
            digits[idx as usize]
        } else {
            0
        }
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for idx in 0..=weight {
            if idx == 0 {
                out.push_str(&digit_at(idx).to_string());
            } else {
                out.push_str(&format!("{:04}", digit_at(idx)));
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut idx = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(idx)));
            idx += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    async fn fetch_columns(&self, table_name: &str) -> anyhow::Result<Vec<ColumnSchema>> {
        let client = self.open().await?;
        let rows = client
            .query(COLUMNS_QUERY, &[&table_name])
            .await
            .context("Failed to query column definitions")?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0)?;
            let data_type: String = row.try_get(1)?;
            let description: Option<String> = row.try_get(2)?;
            let nullable: Option<String> = row.try_get(3)?;
            let default_value: Option<String> = row.try_get(4)?;

            columns.push(ColumnSchema {
                name,
                data_type,
                description: description.unwrap_or_else(|| NO_DESCRIPTION.to_string()),
                is_nullable: nullable.as_deref() != Some("NO"),
                default_value,
                foreign_key: None,
            });
        }
        Ok(columns)
    }

    async fn fetch_foreign_keys(&self, table_name: &str) -> anyhow::Result<Vec<ForeignKeyInfo>> {
        let client = self.open().await?;
        let rows = client
            .query(FOREIGN_KEYS_QUERY, &[&table_name])
            .await
            .context("Failed to query foreign keys")?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            keys.push(ForeignKeyInfo {
                column_name: row.try_get(0)?,
                references_table: row.try_get(1)?,
                references_column: row.try_get(2)?,
            });
        }
        Ok(keys)
    }

    async fn execute(&self, sql: &str, mode: ExecutionMode) -> anyhow::Result<Vec<Row>> {
        let mut client = self.open().await?;
        let tx = client.transaction().await?;

        let pg_rows = tx.query(sql, &[]).await?;
        let mut rows = Vec::with_capacity(pg_rows.len());
        for row in &pg_rows {
            rows.push(Self::row_to_map(row)?);
        }

        match mode {
            ExecutionMode::Commit => tx.commit().await?,
            ExecutionMode::ReadOnly => {
                // The rows are already fetched; a failed rollback ends with the connection
                if let Err(e) = tx.rollback().await {
                    log::warn!("Rollback after read-only statement failed: {}", e);
                }
            }
        }
        Ok(rows)
    }

    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::PostgreSql
    }
}
