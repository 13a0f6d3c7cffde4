//! Layered YAML configuration: load + deep-merge + canonicalize + hash,
//! then parse into a closed `EngineConfig` record. Unknown top-level or
//! nested keys are a load error (`serde(deny_unknown_fields)`), so a typo
//! in an operator's config file fails fast at startup instead of silently
//! being ignored.

pub mod secrets;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Parse the canonical config JSON into the closed `EngineConfig`
    /// record. Unrecognized keys at any level fail this step.
    pub fn parse_engine_config(&self) -> Result<EngineConfig> {
        serde_json::from_value(self.config_json.clone())
            .context("config has unrecognized keys or a type mismatch")
    }
}

fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Anti-hedging scope — default is per-strategy; an operator running
/// strategies that share an underlying may opt into the stricter global
/// behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AntiHedgingScope {
    #[default]
    PerStrategy,
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct ScalpingStrategyConfig {
    pub target_profit_percent: Decimal,
    pub stop_loss_percent: Decimal,
    pub time_stop_minutes: i64,
    #[serde(default)]
    pub signal_cooldown_seconds: i64,
    #[serde(default = "default_atr_period")]
    pub atr_period: i64,
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: Decimal,
}

fn default_atr_period() -> i64 {
    3
}

fn default_atr_multiplier() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    pub scalping: ScalpingStrategyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct EngineConfig {
    pub mode: tejas_schemas::TradingMode,
    pub paper_capital: Decimal,
    pub max_daily_loss: Decimal,
    pub max_positions: i64,
    pub capital_per_trade: Decimal,
    pub max_position_size: Decimal,
    #[serde(default = "default_strike_step")]
    pub atm_strike_step: i64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: i64,
    /// "HH:MM", IST.
    pub force_exit_time: String,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub anti_hedging_scope: AntiHedgingScope,
}

fn default_strike_step() -> i64 {
    50
}

fn default_tick_interval() -> i64 {
    1
}

impl EngineConfig {
    /// Parses `force_exit_time` ("HH:MM") into hour/minute, IST.
    pub fn force_exit_hm(&self) -> Result<(u32, u32)> {
        let (h, m) = self
            .force_exit_time
            .split_once(':')
            .context("force_exit_time must be HH:MM")?;
        Ok((h.parse()?, m.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("tejas-config-test-{}.yaml", uuid_like()));
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        p
    }

    fn uuid_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }

    #[test]
    fn deep_merge_overrides_later_layers() {
        let base = write_temp("mode: PAPER\npaper_capital: 100000\n");
        let overlay = write_temp("paper_capital: 200000\n");
        let base_s = base.to_str().unwrap().to_string();
        let overlay_s = overlay.to_str().unwrap().to_string();
        let loaded = load_layered_yaml(&[&base_s, &overlay_s]).unwrap();
        assert_eq!(loaded.config_json["paper_capital"], 200000);
        assert_eq!(loaded.config_json["mode"], "PAPER");
        let _ = fs::remove_file(base);
        let _ = fs::remove_file(overlay);
    }

    #[test]
    fn canonical_hash_is_stable_under_key_order() {
        let a = write_temp("mode: PAPER\npaper_capital: 1\n");
        let b = write_temp("paper_capital: 1\nmode: PAPER\n");
        let a_s = a.to_str().unwrap().to_string();
        let b_s = b.to_str().unwrap().to_string();
        let loaded_a = load_layered_yaml(&[&a_s]).unwrap();
        let loaded_b = load_layered_yaml(&[&b_s]).unwrap();
        assert_eq!(loaded_a.config_hash, loaded_b.config_hash);
        let _ = fs::remove_file(a);
        let _ = fs::remove_file(b);
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let p = write_temp(
            "mode: PAPER\npaper_capital: 200000\nmax_daily_loss: 5000\nmax_positions: 1\n\
             capital_per_trade: 20000\nmax_position_size: 20000\nforce_exit_time: \"15:05\"\n\
             strategy:\n  scalping:\n    target_profit_percent: 0.3\n    stop_loss_percent: 0.1\n\
             time_stop_minutes: 120\nbogus_key: true\n",
        );
        let p_s = p.to_str().unwrap().to_string();
        let loaded = load_layered_yaml(&[&p_s]).unwrap();
        assert!(loaded.parse_engine_config().is_err());
        let _ = fs::remove_file(p);
    }

    #[test]
    fn parses_full_recognized_schema() {
        let p = write_temp(
            "mode: PAPER\npaper_capital: 200000\nmax_daily_loss: 5000\nmax_positions: 1\n\
             capital_per_trade: 20000\nmax_position_size: 20000\nforce_exit_time: \"15:05\"\n\
             strategy:\n  scalping:\n    target_profit_percent: 0.3\n    stop_loss_percent: 0.1\n\
             time_stop_minutes: 120\n    signal_cooldown_seconds: 60\n",
        );
        let p_s = p.to_str().unwrap().to_string();
        let loaded = load_layered_yaml(&[&p_s]).unwrap();
        let cfg = loaded.parse_engine_config().unwrap();
        assert_eq!(cfg.mode, tejas_schemas::TradingMode::Paper);
        assert_eq!(cfg.atm_strike_step, 50);
        assert_eq!(cfg.force_exit_hm().unwrap(), (15, 5));
        let _ = fs::remove_file(p);
    }
}
