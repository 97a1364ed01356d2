/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

use crate::error::{StreamError, StreamResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

/// Layout of quote timestamps, e.g. `01/02/2006 15:04:05`.
pub const QUOTE_TIME_LAYOUT: &str = "%m/%d/%Y %H:%M:%S";

/// Inbound record decoded as a flat map of field name to text.
///
/// The venue sends the same field as a JSON string on one endpoint and as a
/// number on another, so every scalar is normalised to its text form here and
/// typed later, field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap(HashMap<String, String>);

impl FieldMap {
    pub fn from_slice(data: &[u8]) -> StreamResult<Self> {
        let raw: HashMap<String, Value> = serde_json::from_slice(data)?;
        Ok(Self(
            raw.into_iter()
                .map(|(key, value)| (key, scalar_text(value)))
                .collect(),
        ))
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Text value, empty when absent.
    pub fn text(&self, field: &str) -> String {
        self.get(field).unwrap_or_default().to_string()
    }

    /// Numeric value, zero when absent or empty.
    pub fn number<T>(&self, field: &str) -> StreamResult<T>
    where
        T: FromStr + Default,
        T::Err: Display,
    {
        match self.get(field).map(str::trim) {
            None | Some("") => Ok(T::default()),
            Some(raw) => raw.parse::<T>().map_err(|e| decode_error(field, raw, e)),
        }
    }

    /// Boolean value; accepts `true`/`false` and `1`/`0`, false when absent.
    pub fn flag(&self, field: &str) -> StreamResult<bool> {
        match self.get(field).map(str::trim) {
            None | Some("") => Ok(false),
            Some("true") | Some("True") | Some("1") => Ok(true),
            Some("false") | Some("False") | Some("0") => Ok(false),
            Some(raw) => Err(decode_error(field, raw, "not a boolean")),
        }
    }

    /// Quote-layout timestamp, `None` when absent.
    pub fn quote_time(&self, field: &str) -> StreamResult<Option<NaiveDateTime>> {
        match self.get(field).map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => NaiveDateTime::parse_from_str(raw, QUOTE_TIME_LAYOUT)
                .map(Some)
                .map_err(|e| decode_error(field, raw, e)),
        }
    }

    /// RFC 3339 timestamp, falling back to the quote layout read as UTC.
    pub fn timestamp(&self, field: &str) -> StreamResult<Option<DateTime<Utc>>> {
        match self.get(field).map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(time) => Ok(Some(time.with_timezone(&Utc))),
                Err(e) => NaiveDateTime::parse_from_str(raw, QUOTE_TIME_LAYOUT)
                    .map(|naive| Some(naive.and_utc()))
                    .map_err(|_| decode_error(field, raw, e)),
            },
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn scalar_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn decode_error(field: &str, raw: &str, reason: impl Display) -> StreamError {
    StreamError::Decode(format!("{}: {:?}: {}", field, raw, reason))
}

/// Level-1 quote from the Etna quote stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub time: Option<NaiveDateTime>,
    pub ask: f64,
    pub bid: f64,
    pub last: f64,
    pub size: f64,
    pub kind: String,
}

impl Quote {
    pub fn from_fields(fields: &FieldMap) -> StreamResult<Self> {
        Ok(Self {
            symbol: fields.text("Key"),
            time: fields.quote_time("Date")?,
            ask: fields.number("Ask")?,
            bid: fields.number("Bid")?,
            last: fields.number("Price")?,
            size: fields.number("Volume")?,
            kind: fields.text("QuoteTypes"),
        })
    }
}

/// OHLCV candle. In-progress candles arrive with `is_completed == false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Bar open time, unix seconds.
    pub time: i64,
    /// Bar lies within regular trading hours.
    pub is_market: bool,
    pub is_completed: bool,
}

impl Bar {
    pub fn from_fields(fields: &FieldMap) -> StreamResult<Self> {
        Ok(Self {
            symbol: fields.text("Key"),
            open: fields.number("Open")?,
            high: fields.number("High")?,
            low: fields.number("Low")?,
            close: fields.number("Close")?,
            volume: fields.number("Volume")?,
            time: fields.number("Time")?,
            is_market: fields.flag("IsMarket")?,
            is_completed: fields.flag("IsCompleted")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub account_id: i64,
    pub client_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub status: String,
    pub execution_status: String,
    pub time_in_force: String,
    pub quantity: f64,
    pub price: f64,
    pub stop_price: f64,
    pub executed_quantity: f64,
    pub leaves_quantity: f64,
    pub last_price: f64,
    pub last_quantity: f64,
    pub average_price: f64,
    pub date: Option<DateTime<Utc>>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub comment: String,
}

impl Order {
    pub fn from_fields(fields: &FieldMap) -> StreamResult<Self> {
        Ok(Self {
            id: fields.number("Id")?,
            account_id: fields.number("AccountId")?,
            client_id: fields.text("ClientId"),
            symbol: fields.text("Symbol"),
            side: fields.text("Side"),
            order_type: fields.text("Type"),
            status: fields.text("Status"),
            execution_status: fields.text("ExecutionStatus"),
            time_in_force: fields.text("TimeInForce"),
            quantity: fields.number("Quantity")?,
            price: fields.number("Price")?,
            stop_price: fields.number("StopPrice")?,
            executed_quantity: fields.number("ExecutedQuantity")?,
            leaves_quantity: fields.number("LeavesQuantity")?,
            last_price: fields.number("LastPrice")?,
            last_quantity: fields.number("LastQuantity")?,
            average_price: fields.number("AveragePrice")?,
            date: fields.timestamp("Date")?,
            transaction_date: fields.timestamp("TransactionDate")?,
            comment: fields.text("Comment"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub account_id: i64,
    pub security_id: i64,
    pub symbol: String,
    pub name: String,
    pub security_currency: String,
    pub security_type: String,
    pub quantity: i64,
    pub day_quantity: i64,
    pub average_open_price: f64,
    pub average_close_price: f64,
    pub realized_profit_loss: f64,
    pub daily_close_profit_loss: f64,
    pub cost_basis: f64,
    pub market_value_eod: f64,
    pub create_date: Option<DateTime<Utc>>,
    pub modify_date: Option<DateTime<Utc>>,
}

impl Position {
    pub fn from_fields(fields: &FieldMap) -> StreamResult<Self> {
        Ok(Self {
            id: fields.number("Id")?,
            account_id: fields.number("AccountId")?,
            security_id: fields.number("SecurityId")?,
            symbol: fields.text("Symbol"),
            name: fields.text("Name"),
            security_currency: fields.text("SecurityCurrency"),
            security_type: fields.text("SecurityType"),
            quantity: fields.number("Quantity")?,
            day_quantity: fields.number("DayQuantity")?,
            average_open_price: fields.number("AverageOpenPrice")?,
            average_close_price: fields.number("AverageClosePrice")?,
            realized_profit_loss: fields.number("RealizedProfitLoss")?,
            daily_close_profit_loss: fields.number("DailyCloseProfitLoss")?,
            cost_basis: fields.number("CostBasis")?,
            market_value_eod: fields.number("MarketValueEOD")?,
            create_date: fields.timestamp("CreateDate")?,
            modify_date: fields.timestamp("ModifyDate")?,
        })
    }
}

/// Trading account balance snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Balance {
    pub cash: f64,
    pub net_cash: f64,
    pub excess: f64,
    pub change_absolute: f64,
    pub change_percent: f64,
    pub equity_total: f64,
    pub pending_orders_count: f64,
    pub net_liquidity: f64,
    pub stock_long_market_value: f64,
    pub stock_short_market_value: f64,
    pub option_long_market_value: f64,
    pub option_short_market_value: f64,
    pub day_trades: f64,
    pub stock_buying_power: f64,
    pub option_buying_power: f64,
    pub pending_cash: f64,
    pub maintenance_margin: f64,
    #[serde(rename = "openPL")]
    pub open_pl: f64,
    #[serde(rename = "closePL")]
    pub close_pl: f64,
    pub market_value: f64,
    /// Derived: `open_pl + close_pl`.
    #[serde(rename = "totalPL")]
    pub total_pl: f64,
}

impl Balance {
    pub fn from_slice(data: &[u8]) -> StreamResult<Self> {
        let mut balance: Balance = serde_json::from_slice(data)?;
        balance.derive_totals();
        Ok(balance)
    }

    pub fn derive_totals(&mut self) {
        self.total_pl = self.open_pl + self.close_pl;
    }
}

/// Quote from the key-based (FMP) feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeQuote {
    #[serde(rename = "s")]
    pub symbol: String,
    /// Exchange time, unix nanoseconds.
    #[serde(rename = "t")]
    pub timestamp_ns: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "ap")]
    pub ask: f64,
    #[serde(rename = "as")]
    pub ask_size: f64,
    #[serde(rename = "bp")]
    pub bid: f64,
    #[serde(rename = "bs")]
    pub bid_size: f64,
    #[serde(rename = "lp")]
    pub last: f64,
    #[serde(rename = "ls")]
    pub size: f64,
}

impl TradeQuote {
    /// Trade prints (`type == "T"`) with a price; bid/ask ticks are not trades.
    pub fn is_trade(&self) -> bool {
        self.last != 0.0 && self.kind == "T"
    }

    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.timestamp_ns)
    }
}
