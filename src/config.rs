use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use tracing::warn;

use crate::engine::EngineConfig;
use crate::model::{Ms, MINUTE_MS};

const PREFIX: &str = "SLOTKEEPER_";

/// Server settings plus the booking policy, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(format!("{PREFIX}{key}")).ok())
    }

    /// Build from a key lookup (keys without the prefix). Unparseable values
    /// fall back to their defaults with a warning; an inconsistent policy is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let env = Env(lookup);
        let mut engine = EngineConfig::default();
        let rules = &mut engine.rules;

        rules.open = env.time("OPEN", rules.open);
        rules.close = env.time("CLOSE", rules.close);
        rules.last_end = env.time("LAST_END", rules.last_end);
        rules.min_duration_ms = env.minutes("MIN_DURATION_MIN", rules.min_duration_ms);
        rules.max_duration_ms = env.minutes("MAX_DURATION_MIN", rules.max_duration_ms);
        rules.slot_ms = env.minutes("SLOT_MIN", rules.slot_ms);
        rules.advance_buffer_ms = env.minutes("ADVANCE_BUFFER_MIN", rules.advance_buffer_ms);
        rules.payment_grace_ms = env.minutes("PAYMENT_GRACE_MIN", rules.payment_grace_ms);
        rules.utc_offset_secs = env.offset_secs("UTC_OFFSET_MIN", rules.utc_offset_secs);
        rules.validate().map_err(|e| format!("invalid booking policy: {e}"))?;

        engine.pricing.max_hourly_rate = env.parse::<Decimal>("MAX_HOURLY_RATE", engine.pricing.max_hourly_rate);
        engine.pricing.max_total = env.parse::<Decimal>("MAX_TOTAL", engine.pricing.max_total);
        if engine.pricing.max_hourly_rate.is_sign_negative() || engine.pricing.max_total.is_sign_negative() {
            return Err("price ceilings must not be negative".into());
        }
        engine.lock_timeout = Duration::from_millis(env.parse("LOCK_TIMEOUT_MS", 5_000));

        let sweep_secs: u64 = env.parse("SWEEP_INTERVAL_SECS", 5);
        Ok(Self {
            port: env.parse("PORT", 5433),
            bind: env.string("BIND", "0.0.0.0"),
            data_dir: PathBuf::from(env.string("DATA_DIR", "./data")),
            password: env.string("PASSWORD", "slotkeeper"),
            max_connections: env.parse("MAX_CONNECTIONS", 256),
            compact_threshold: env.parse("COMPACT_THRESHOLD", 1000),
            tls_cert: (env.0)("TLS_CERT"),
            tls_key: (env.0)("TLS_KEY"),
            metrics_port: (env.0)("METRICS_PORT").and_then(|s| s.parse().ok()),
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
            engine,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        let Some(raw) = (self.0)(key) else {
            return default;
        };
        match raw.trim().parse() {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "slotkeeper::config", "{PREFIX}{key}={raw:?} is invalid ({e}); using {default}");
                default
            }
        }
    }

    fn minutes(&self, key: &str, default_ms: Ms) -> Ms {
        let mins = self.parse(key, default_ms / MINUTE_MS);
        mins.checked_mul(MINUTE_MS).unwrap_or_else(|| {
            warn!(target: "slotkeeper::config", "{PREFIX}{key}={mins} is out of range; using {}", default_ms / MINUTE_MS);
            default_ms
        })
    }

    /// Minutes east of UTC, stored as seconds.
    fn offset_secs(&self, key: &str, default_secs: i32) -> i32 {
        let mins: i32 = self.parse(key, default_secs / 60);
        mins.checked_mul(60).unwrap_or_else(|| {
            warn!(target: "slotkeeper::config", "{PREFIX}{key}={mins} is out of range; using {}", default_secs / 60);
            default_secs
        })
    }

    fn time(&self, key: &str, default: NaiveTime) -> NaiveTime {
        let Some(raw) = (self.0)(key) else {
            return default;
        };
        NaiveTime::parse_from_str(raw.trim(), "%H:%M").unwrap_or_else(|e| {
            warn!(target: "slotkeeper::config", "{PREFIX}{key}={raw:?} is invalid ({e}); using {}", default.format("%H:%M"));
            default
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::model::HOUR_MS;

    fn config(vars: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 5433);
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.engine, EngineConfig::default());
    }

    #[test]
    fn policy_overrides() {
        let c = config(&[
            ("OPEN", "07:00"),
            ("LAST_END", "20:00"),
            ("CLOSE", "20:30"),
            ("MIN_DURATION_MIN", "60"),
            ("PAYMENT_GRACE_MIN", "120"),
            ("UTC_OFFSET_MIN", "480"),
            ("MAX_TOTAL", "2500.50"),
        ])
        .unwrap();
        let rules = &c.engine.rules;
        assert_eq!(rules.open, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        assert_eq!(rules.min_duration_ms, HOUR_MS);
        assert_eq!(rules.payment_grace_ms, 2 * HOUR_MS);
        assert_eq!(rules.utc_offset_secs, 8 * 3600);
        assert_eq!(c.engine.pricing.max_total, Decimal::new(250050, 2));
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let c = config(&[("PORT", "http"), ("OPEN", "eight"), ("LOCK_TIMEOUT_MS", "-3")]).unwrap();
        assert_eq!(c.port, 5433);
        assert_eq!(c.engine.rules.open, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(c.engine.lock_timeout, Duration::from_secs(5));
    }

    #[test]
    fn overflowing_minutes_fall_back_to_default() {
        let c = config(&[
            ("MIN_DURATION_MIN", "9223372036854775807"),
            ("PAYMENT_GRACE_MIN", "9223372036854775"),
            ("UTC_OFFSET_MIN", "2147483647"),
        ])
        .unwrap();
        let defaults = EngineConfig::default();
        assert_eq!(c.engine.rules.min_duration_ms, defaults.rules.min_duration_ms);
        assert_eq!(c.engine.rules.payment_grace_ms, defaults.rules.payment_grace_ms);
        assert_eq!(c.engine.rules.utc_offset_secs, 0);
    }

    #[test]
    fn inconsistent_policy_is_fatal() {
        assert!(config(&[("OPEN", "22:00")]).is_err());
        assert!(config(&[("MIN_DURATION_MIN", "900")]).is_err());
        assert!(config(&[("MAX_HOURLY_RATE", "-1")]).is_err());
    }
}
