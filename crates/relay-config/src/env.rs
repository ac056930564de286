//! Environment-variable config source.

use relay_core::ConfigError;

use crate::RelayConfig;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_BROKER: &str = "KAFKA_BROKER";
pub const ENV_CLIENT_ID: &str = "KAFKA_CLIENT_ID";
pub const ENV_TOPIC: &str = "KAFKA_TOPIC";
pub const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
pub const ENV_POLL_INTERVAL_MS: &str = "POLL_INTERVAL_MS";
pub const ENV_REPLAY_MODE: &str = "REPLAY_MODE";
pub const ENV_MAX_CYCLES: &str = "MAX_CYCLES";

/// Build a validated config from the process environment.
pub fn from_env() -> Result<RelayConfig, ConfigError> {
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a validated config from any key lookup. Unset and empty values
/// both fall back to defaults.
pub fn from_lookup<F>(lookup: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let mut cfg = RelayConfig::default();

    if let Some(url) = get(ENV_DATABASE_URL) {
        cfg.database.url = url;
    }
    if let Some(brokers) = get(ENV_BROKER) {
        cfg.kafka.brokers = brokers;
    }
    if let Some(client_id) = get(ENV_CLIENT_ID) {
        cfg.kafka.client_id = client_id;
    }
    if let Some(topic) = get(ENV_TOPIC) {
        cfg.kafka.topic = topic;
    }
    if let Some(v) = get(ENV_BATCH_SIZE) {
        cfg.relay.batch_size = parse_number(ENV_BATCH_SIZE, &v)?;
    }
    if let Some(v) = get(ENV_POLL_INTERVAL_MS) {
        cfg.relay.poll_interval_ms = parse_number(ENV_POLL_INTERVAL_MS, &v)?;
    }
    if let Some(v) = get(ENV_REPLAY_MODE) {
        cfg.relay.replay = parse_bool(&v).ok_or_else(|| {
            ConfigError::invalid(ENV_REPLAY_MODE, format!("{v:?} is not a boolean"))
        })?;
    }
    if let Some(v) = get(ENV_MAX_CYCLES) {
        cfg.relay.max_cycles = Some(parse_number(ENV_MAX_CYCLES, &v)?);
    }

    cfg.validate()?;
    Ok(cfg)
}

/// `true/false`, `1/0`, `yes/no`, `on/off`, case-insensitive.
pub fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    v: &str,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    v.trim()
        .parse()
        .map_err(|e| ConfigError::invalid(key, format!("{v:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(
        pairs: &[(&str, &str)],
    ) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        (ENV_DATABASE_URL, "postgres://u:p@localhost/db"),
        (ENV_BROKER, "localhost:9092"),
        (ENV_CLIENT_ID, "rowrelay"),
        (ENV_TOPIC, "livedb.events"),
    ];

    #[test]
    fn required_vars_only_uses_defaults() {
        let cfg = from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(cfg.kafka.topic, "livedb.events");
        assert_eq!(cfg.relay.batch_size, 10);
        assert!(!cfg.relay.replay);
        assert_eq!(cfg.relay.max_cycles, None);
    }

    #[test]
    fn optional_vars_override_defaults() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            (ENV_BATCH_SIZE, "250"),
            (ENV_POLL_INTERVAL_MS, "750"),
            (ENV_REPLAY_MODE, "Yes"),
            (ENV_MAX_CYCLES, "3"),
        ]);
        let cfg = from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.relay.batch_size, 250);
        assert_eq!(cfg.relay.poll_interval_ms, 750);
        assert!(cfg.relay.replay);
        assert_eq!(cfg.relay.max_cycles, Some(3));
    }

    #[test]
    fn missing_topic_is_config_error() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != ENV_TOPIC)
            .collect();
        let err = from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref key } if key == "kafka.topic"));
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push((ENV_BATCH_SIZE, "ten"));
        assert!(matches!(
            from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
