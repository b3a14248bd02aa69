use super::{transaction_effect, Driver, DriverOutcome, NativeRow, TxEffect};
use crate::core::common::types::{BackendMode, Value};
use crate::core::common::CompatError;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use postgres::{Client, Column, NoTls, Row, Statement};
use std::error::Error;
use tracing::{debug, info, instrument};

type BoxedParam = Box<dyn ToSql + Sync>;
type PgResult<T> = Result<T, Box<dyn Error + Sync + Send>>;

/// PostgreSQL connection through the synchronous `postgres` client.
pub struct PostgresDriver {
    client: Option<Client>,
    in_transaction: bool,
}

impl PostgresDriver {
    #[instrument(skip_all)]
    pub fn connect(dsn: &str) -> Result<Self, CompatError> {
        let client = Client::connect(dsn, NoTls)?;
        info!(backend = "postgres", "connection opened");
        Ok(Self::from_client(client))
    }

    /// Wraps an already-connected client. It is assumed to be outside a transaction.
    pub fn from_client(client: Client) -> Self {
        Self { client: Some(client), in_transaction: false }
    }

    /// Opens a transaction first unless `sql` is itself transaction control.
    fn prepare(&mut self, sql: &str) -> Result<(&mut Client, Statement), CompatError> {
        let client = self.client.as_mut().ok_or(CompatError::ConnectionClosed)?;
        match transaction_effect(sql) {
            TxEffect::Begin => self.in_transaction = true,
            TxEffect::End => self.in_transaction = false,
            TxEffect::None if !self.in_transaction => {
                client.batch_execute("BEGIN")?;
                self.in_transaction = true;
            }
            TxEffect::None => {}
        }
        let statement = client.prepare(sql)?;
        Ok((client, statement))
    }

    fn end_transaction(&mut self, command: &str) -> Result<(), CompatError> {
        let client = self.client.as_mut().ok_or(CompatError::ConnectionClosed)?;
        if self.in_transaction {
            // The server leaves the transaction even when COMMIT fails.
            self.in_transaction = false;
            client.batch_execute(command)?;
        }
        Ok(())
    }
}

impl Driver for PostgresDriver {
    fn mode(&self) -> BackendMode {
        BackendMode::Postgres
    }

    #[instrument(skip_all, fields(backend = "postgres"))]
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<DriverOutcome, CompatError> {
        let (client, statement) = self.prepare(sql)?;
        let bound = bind_params(&statement, params)?;
        let refs = param_refs(&bound);

        if statement.columns().is_empty() {
            let affected = client.execute(&statement, &refs)?;
            debug!(rows = affected, "statement executed");
            return Ok(DriverOutcome::affected(affected));
        }

        let rows = client.query(&statement, &refs)?;
        let columns: Vec<String> = statement.columns().iter().map(|c| c.name().to_string()).collect();
        let mut fetched = Vec::with_capacity(rows.len());
        for row in &rows {
            let pairs = statement
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, column)| Ok((column.name().to_string(), decode_column(row, idx, column)?)))
                .collect::<Result<Vec<_>, CompatError>>()?;
            fetched.push(NativeRow::Named(pairs));
        }
        Ok(DriverOutcome { columns, rows: fetched, rows_affected: Some(rows.len() as u64) })
    }

    #[instrument(skip_all, fields(backend = "postgres", batch = batch.len()))]
    fn execute_many(&mut self, sql: &str, batch: &[Vec<Value>]) -> Result<u64, CompatError> {
        let (client, statement) = self.prepare(sql)?;
        let mut total = 0;
        for params in batch {
            let bound = bind_params(&statement, params)?;
            total += client.execute(&statement, &param_refs(&bound))?;
        }
        Ok(total)
    }

    fn last_insert_rowid(&self) -> Option<i64> {
        None
    }

    fn commit(&mut self) -> Result<(), CompatError> {
        self.end_transaction("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), CompatError> {
        self.end_transaction("ROLLBACK")
    }

    fn close(&mut self) -> Result<(), CompatError> {
        if let Some(client) = self.client.take() {
            self.in_transaction = false;
            client.close()?;
            info!(backend = "postgres", "connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.client.is_none()
    }
}

fn param_refs(bound: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect()
}

/// Converts every parameter to the type the server inferred for its placeholder.
fn bind_params(statement: &Statement, params: &[Value]) -> Result<Vec<BoxedParam>, CompatError> {
    let types = statement.params();
    if types.len() != params.len() {
        return Err(CompatError::Bind {
            index: params.len().min(types.len()),
            message: format!("statement expects {} parameters, {} supplied", types.len(), params.len()),
        });
    }
    params.iter().zip(types).enumerate().map(|(index, (value, ty))| bind_value(index, value, ty)).collect()
}

pub(crate) fn bind_value(index: usize, value: &Value, ty: &Type) -> Result<BoxedParam, CompatError> {
    let mismatch = || CompatError::Bind { index, message: format!("cannot convert {:?} to {}", value, ty) };
    if value.is_null() {
        return Ok(Box::new(PgNull));
    }
    let bound: BoxedParam = match *ty {
        Type::BOOL => Box::new(value.as_bool().ok_or_else(mismatch)?),
        Type::INT2 => {
            Box::new(value.as_i64().and_then(|i| i16::try_from(i).ok()).ok_or_else(mismatch)?)
        }
        Type::INT4 => {
            Box::new(value.as_i64().and_then(|i| i32::try_from(i).ok()).ok_or_else(mismatch)?)
        }
        Type::INT8 => Box::new(value.as_i64().ok_or_else(mismatch)?),
        #[allow(clippy::cast_possible_truncation)]
        Type::FLOAT4 => Box::new(value.as_f64().ok_or_else(mismatch)? as f32),
        Type::FLOAT8 => Box::new(value.as_f64().ok_or_else(mismatch)?),
        Type::NUMERIC => match value {
            Value::Integer(_) | Value::Float(_) | Value::Text(_) | Value::Boolean(_) => {
                let text = value.as_i64().map_or_else(|| value.to_text().unwrap_or_default(), |i| i.to_string());
                Box::new(PgNumeric(text))
            }
            _ => return Err(mismatch()),
        },
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Box::new(value.to_text().ok_or_else(mismatch)?)
        }
        Type::BYTEA => match value {
            Value::Blob(b) => Box::new(b.clone()),
            Value::Text(s) => Box::new(s.as_bytes().to_vec()),
            _ => return Err(mismatch()),
        },
        Type::JSON | Type::JSONB => match value {
            Value::Json(v) => Box::new(v.clone()),
            Value::Text(s) => Box::new(serde_json::from_str::<serde_json::Value>(s).map_err(|_| mismatch())?),
            Value::Integer(i) => Box::new(serde_json::Value::from(*i)),
            Value::Float(f) => Box::new(serde_json::Value::from(*f)),
            Value::Boolean(b) => Box::new(serde_json::Value::from(*b)),
            _ => return Err(mismatch()),
        },
        Type::TIMESTAMP => Box::new(value.as_timestamp().ok_or_else(mismatch)?),
        Type::TIMESTAMPTZ => Box::new(timestamptz(value).ok_or_else(mismatch)?),
        Type::DATE => Box::new(date(value).ok_or_else(mismatch)?),
        Type::UUID => match value {
            Value::Text(s) => Box::new(uuid::Uuid::parse_str(s.trim()).map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        },
        _ => return Err(mismatch()),
    };
    Ok(bound)
}

fn timestamptz(value: &Value) -> Option<DateTime<Utc>> {
    if let Value::Text(s) = value {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(s.trim()) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    value.as_timestamp().map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

fn date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .or_else(|| value.as_timestamp().map(|ts| ts.date())),
        _ => value.as_timestamp().map(|ts| ts.date()),
    }
}

fn decode_column(row: &Row, idx: usize, column: &Column) -> Result<Value, CompatError> {
    let decoded = match *column.type_() {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(|v| v.map(Value::Boolean)),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx).map(|v| v.map(|i| Value::Integer(i64::from(i)))),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx).map(|v| v.map(|i| Value::Integer(i64::from(i)))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(Value::Integer)),
        Type::OID => row.try_get::<_, Option<u32>>(idx).map(|v| v.map(|i| Value::Integer(i64::from(i)))),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx).map(|v| v.map(|f| Value::Float(f64::from(f)))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map(|v| v.map(Value::Float)),
        Type::NUMERIC => row.try_get::<_, Option<PgNumeric>>(idx).map(|v| v.map(PgNumeric::into_value)),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx).map(|v| v.map(Value::Blob)),
        Type::JSON | Type::JSONB => {
            row.try_get::<_, Option<serde_json::Value>>(idx).map(|v| v.map(Value::from))
        }
        Type::TIMESTAMP => row.try_get::<_, Option<NaiveDateTime>>(idx).map(|v| v.map(Value::Timestamp)),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| v.map(|ts| Value::Timestamp(ts.naive_utc()))),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| v.map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))),
        Type::UUID => row.try_get::<_, Option<uuid::Uuid>>(idx).map(|v| v.map(|u| Value::Text(u.to_string()))),
        _ => row.try_get::<_, Option<String>>(idx).map(|v| v.map(Value::Text)),
    };
    decoded.map(|v| v.unwrap_or(Value::Null)).map_err(|e| CompatError::Decode {
        column: column.name().to_string(),
        message: format!("unsupported column type {}: {}", column.type_(), e),
    })
}

/// SQL NULL for a placeholder of any type.
#[derive(Debug)]
struct PgNull;

impl ToSql for PgNull {
    fn to_sql(&self, _ty: &Type, _out: &mut BytesMut) -> PgResult<IsNull> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// A `numeric` carried as its decimal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PgNumeric(pub(crate) String);

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

impl PgNumeric {
    /// Integral values become `Integer`, the rest `Float`; `NaN` stays text.
    fn into_value(self) -> Value {
        if let Ok(i) = self.0.parse::<i64>() {
            return Value::Integer(i);
        }
        match self.0.parse::<f64>() {
            Ok(f) if f.is_finite() && self.0 != "NaN" => Value::Float(f),
            _ => Value::Text(self.0),
        }
    }
}

impl ToSql for PgNumeric {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> PgResult<IsNull> {
        encode_numeric(&self.0, out)?;
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> PgResult<Self> {
        decode_numeric(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

// Binary numeric: ndigits, weight, sign, dscale (all 16-bit), then base-10000 digits.
fn decode_numeric(raw: &[u8]) -> PgResult<String> {
    let word = |at: usize| -> PgResult<i16> {
        raw.get(at..at + 2).map(|b| i16::from_be_bytes([b[0], b[1]])).ok_or_else(|| "truncated numeric".into())
    };
    let ndigits = usize::try_from(word(0)?)?;
    let weight = i32::from(word(2)?);
    let sign = word(4)? as u16;
    let dscale = usize::from(word(6)? as u16);
    if sign == NUMERIC_NAN {
        return Ok("NaN".to_string());
    }
    let digits = (0..ndigits).map(|i| word(8 + 2 * i)).collect::<PgResult<Vec<i16>>>()?;
    let digit_at = |i: i32| -> i16 {
        usize::try_from(i).ok().and_then(|i| digits.get(i).copied()).unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                text.push_str(&digit_at(i).to_string());
            } else {
                text.push_str(&format!("{:04}", digit_at(i)));
            }
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

fn encode_numeric(text: &str, out: &mut BytesMut) -> PgResult<()> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part) {
        return Err(format!("invalid numeric literal: {text}").into());
    }

    let int_part = int_part.trim_start_matches('0');
    let int_padded = format!("{}{}", "0".repeat((4 - int_part.len() % 4) % 4), int_part);
    let frac_padded = format!("{}{}", frac_part, "0".repeat((4 - frac_part.len() % 4) % 4));
    let mut weight = i16::try_from(int_padded.len() / 4)? - 1;
    let mut groups = int_padded
        .as_bytes()
        .chunks(4)
        .chain(frac_padded.as_bytes().chunks(4))
        .map(|chunk| chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0')))
        .collect::<Vec<i16>>();
    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    out.put_i16(i16::try_from(groups.len())?);
    out.put_i16(weight);
    out.put_u16(if negative && !groups.is_empty() { NUMERIC_NEG } else { 0 });
    out.put_u16(u16::try_from(frac_part.len())?);
    for group in groups {
        out.put_i16(group);
    }
    Ok(())
}
