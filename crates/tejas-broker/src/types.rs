use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tejas_schemas::{Candle, Instrument, OrderSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    OneMinute,
    FiveMinute,
}

impl Interval {
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMinute => "minute",
            Interval::FiveMinute => "5minute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductType {
    Mis,
    Nrml,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub product: ProductType,
    pub limit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub last_price: Decimal,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub open_interest: Option<i64>,
    pub volume: Option<i64>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct BrokerPositionRow {
    pub symbol: String,
    pub quantity: i64,
    pub average_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct BrokerHolding {
    pub symbol: String,
    pub quantity: i64,
}

pub type CandleSeries = Vec<Candle>;
pub type InstrumentMaster = Vec<Instrument>;
