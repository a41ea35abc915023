//! Helper utilities shared by the engine adapters.
//!
//! - [`AdapterState`]: lifecycle state, committed target and pool generation
//! - [`decode_json!`]: typed column decoding into JSON for sqlx rows
//! - value conversions used by every driver's row mapping

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use serde_json::Value as JsonValue;

#[cfg(any(feature = "mysql", feature = "postgresql", feature = "sqlite"))]
use crate::error::{DbBridgeError, classify_statement_error};
use crate::models::{AtomicConnectionState, ConnectionState};
#[cfg(any(feature = "mysql", feature = "postgresql", feature = "sqlite"))]
use crate::models::EngineType;

/// Mutable runtime bookkeeping of one adapter.
///
/// Pools live in each adapter; this holds what every engine tracks the same
/// way.
#[derive(Debug, Default)]
pub struct AdapterState {
    state: AtomicConnectionState,
    target: Mutex<Option<String>>,
    generation: AtomicU64,
}

impl AdapterState {
    pub fn new(initial_target: Option<String>) -> Self {
        Self {
            state: AtomicConnectionState::default(),
            target: Mutex::new(initial_target),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn set(&self, state: ConnectionState) {
        self.state.set(state);
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnectionState::Connected
    }

    pub fn target(&self) -> Option<String> {
        self.target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Commits a new target. Only called once the engine accepted it.
    pub fn commit_target(&self, target: Option<String>) {
        *self
            .target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = target;
    }

    /// Records that a fresh native pool was built.
    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Tries to decode column `$idx` of an sqlx row as `$ty`, mapping it with `$map`.
///
/// Evaluates to `Some(JsonValue)` when the type matched (SQL `NULL` becomes
/// `JsonValue::Null`) and `None` on a type mismatch, so attempts chain with
/// `or_else`.
///
/// ```rust,ignore
/// let value = decode_json!(row, idx, i64, |v: i64| json!(v))
///     .or_else(|| decode_json!(row, idx, String, JsonValue::String))
///     .unwrap_or(JsonValue::Null);
/// ```
macro_rules! decode_json {
    ($row:expr, $idx:expr, $ty:ty, $map:expr) => {
        match sqlx::Row::try_get::<Option<$ty>, _>($row, $idx) {
            Ok(Some(value)) => Some(($map)(value)),
            Ok(None) => Some(serde_json::Value::Null),
            Err(_) => None,
        }
    };
}

#[allow(unused_imports)]
pub(crate) use decode_json;

/// Encodes binary column data the same way for every engine.
pub fn bytes_to_json(bytes: &[u8]) -> JsonValue {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    JsonValue::String(format!("base64:{encoded}"))
}

/// Floats that JSON cannot represent (NaN, infinities) become strings.
pub fn float_to_json(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map_or_else(|| JsonValue::String(value.to_string()), JsonValue::Number)
}

/// Renders a scaled integer (`value * 10^-scale`) as exact decimal text.
///
/// ```rust
/// use dbbridge_core::adapters::helpers::format_scaled_decimal;
///
/// assert_eq!(format_scaled_decimal(12345, 2), "123.45");
/// assert_eq!(format_scaled_decimal(-5, 3), "-0.005");
/// assert_eq!(format_scaled_decimal(42, 0), "42");
/// ```
pub fn format_scaled_decimal(value: i128, scale: u8) -> String {
    if scale == 0 {
        return value.to_string();
    }
    let digits = value.unsigned_abs().to_string();
    let scale = usize::from(scale);
    let padded = if digits.len() <= scale {
        format!("{}{digits}", "0".repeat(scale.saturating_sub(digits.len()).saturating_add(1)))
    } else {
        digits
    };
    let split = padded.len().saturating_sub(scale);
    let sign = if value < 0 { "-" } else { "" };
    format!("{sign}{}.{}", &padded[..split], &padded[split..])
}

/// Classifies an sqlx statement failure by its message.
#[cfg(any(feature = "mysql", feature = "postgresql", feature = "sqlite"))]
pub fn sqlx_statement_error(engine: EngineType, error: sqlx::Error) -> DbBridgeError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            DbBridgeError::connection_failed(format!("{engine} session lost"), error)
        }
        other => classify_statement_error(engine, other.to_string()),
    }
}

/// Maps an sqlx catalog failure while describing `item`.
#[cfg(any(feature = "mysql", feature = "postgresql", feature = "sqlite"))]
pub fn sqlx_catalog_error(item: &str, error: sqlx::Error) -> DbBridgeError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            DbBridgeError::connection_failed(format!("Catalog read for '{item}' lost its session"), error)
        }
        other => DbBridgeError::introspection_failed(item, other),
    }
}

/// Reads one catalog column, mapping decode failures like [`sqlx_catalog_error`].
#[cfg(any(feature = "mysql", feature = "postgresql", feature = "sqlite"))]
pub fn catalog_value<'r, R, T, I>(row: &'r R, column: I, item: &str) -> crate::Result<T>
where
    R: sqlx::Row,
    I: sqlx::ColumnIndex<R>,
    T: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    row.try_get(column).map_err(|e| sqlx_catalog_error(item, e))
}

/// Converts a driver row count into `u64`, clamping negatives to zero.
pub fn count_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
