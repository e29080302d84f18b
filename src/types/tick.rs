use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Epoch numbers at or above this are read as milliseconds, below as seconds.
const EPOCH_MILLIS_CUTOFF: f64 = 100_000_000_000.0;

/// Naive timestamp layouts accepted when no offset is present (read as UTC).
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A single price observation for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl Tick {
    /// Create a tick. Non-finite prices are rejected.
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Option<Self> {
        price.is_finite().then_some(Self { timestamp, price })
    }

    /// Normalize a raw payload into a tick.
    ///
    /// Returns `None` when the timestamp or price cannot be recovered; the
    /// caller treats that as "no result for this tick".
    pub fn from_payload(payload: &TickPayload) -> Option<Self> {
        Self::new(payload.timestamp()?, payload.price()?)
    }
}

/// Raw JSON object delivered by a tick source, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickPayload(pub Map<String, Value>);

impl TickPayload {
    /// Wrap a JSON value. Only objects are payloads.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Parse a JSON document into a payload.
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str::<Value>(raw).ok().and_then(Self::from_value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Timestamp from `timestamp`, falling back to `time`.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.get("timestamp")
            .or_else(|| self.get("time"))
            .and_then(parse_timestamp)
    }

    /// Price from `price`, `mid` or `last`, else the bid/ask midpoint.
    pub fn price(&self) -> Option<f64> {
        ["price", "mid", "last"]
            .iter()
            .find_map(|key| self.get(key).and_then(as_number))
            .or_else(|| {
                let bid = self.get("bid").and_then(as_number)?;
                let ask = self.get("ask").and_then(as_number)?;
                Some((bid + ask) / 2.0)
            })
    }
}

/// Read a JSON number or numeric string as a finite `f64`.
pub fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Parse an ISO-8601 / RFC 3339 string or an epoch number into UTC.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(_) => as_number(value).and_then(from_epoch),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite()).and_then(from_epoch)
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    let seconds = if value.abs() >= EPOCH_MILLIS_CUTOFF {
        value / 1000.0
    } else {
        value
    };
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn payload(value: Value) -> TickPayload {
        TickPayload::from_value(value).unwrap()
    }

    #[test]
    fn test_iso_timestamp_with_z() {
        let p = payload(json!({"timestamp": "2025-03-01T12:00:05.250Z", "price": 1.3712}));
        let tick = Tick::from_payload(&p).unwrap();
        assert_eq!(
            tick.timestamp,
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 5).unwrap() + chrono::Duration::milliseconds(250)
        );
        assert_eq!(tick.price, 1.3712);
    }

    #[test]
    fn test_naive_timestamp_read_as_utc() {
        let p = payload(json!({"time": "2025-03-01 12:00:00", "price": "1.5"}));
        let tick = Tick::from_payload(&p).unwrap();
        assert_eq!(tick.timestamp, Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(tick.price, 1.5);
    }

    #[test]
    fn test_epoch_seconds_and_millis() {
        let secs = payload(json!({"timestamp": 1_700_000_000, "price": 2.0}));
        let millis = payload(json!({"timestamp": 1_700_000_000_000_i64, "price": 2.0}));
        assert_eq!(
            Tick::from_payload(&secs).unwrap().timestamp,
            Tick::from_payload(&millis).unwrap().timestamp
        );
    }

    #[test]
    fn test_mid_and_bid_ask_fallback() {
        let mid = payload(json!({"timestamp": 1_700_000_000, "mid": 1.25}));
        assert_eq!(mid.price(), Some(1.25));

        let quote = payload(json!({"timestamp": 1_700_000_000, "bid": "1.0", "ask": 1.5}));
        assert_eq!(quote.price(), Some(1.25));
    }

    #[test]
    fn test_missing_price_is_no_tick() {
        let p = payload(json!({"timestamp": 1_700_000_000, "bid": 1.0}));
        assert!(Tick::from_payload(&p).is_none());
    }

    #[test]
    fn test_unparseable_timestamp_is_no_tick() {
        let p = payload(json!({"timestamp": "yesterday", "price": 1.0}));
        assert!(Tick::from_payload(&p).is_none());
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert!(TickPayload::from_json("[1, 2]").is_none());
        assert!(TickPayload::from_json("not json").is_none());
    }

    #[test]
    fn test_non_finite_price_rejected() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(Tick::new(ts, f64::NAN).is_none());
        assert!(Tick::new(ts, f64::INFINITY).is_none());
    }
}
