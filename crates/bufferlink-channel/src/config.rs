use std::time::Duration;

use tracing::warn;

/// Default bound on each blocking channel call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable overriding [`ChannelConfig::reply_timeout`].
pub const REPLY_TIMEOUT_ENV: &str = "BUFFERLINK_REPLY_TIMEOUT_MS";
/// Environment variable overriding [`ChannelConfig::descriptor_timeout`].
pub const DESCRIPTOR_TIMEOUT_ENV: &str = "BUFFERLINK_DESCRIPTOR_TIMEOUT_MS";
/// Environment variable overriding [`ChannelConfig::write_timeout`].
pub const WRITE_TIMEOUT_ENV: &str = "BUFFERLINK_WRITE_TIMEOUT_MS";

/// Bounds on the blocking points of a channel.
///
/// Only two calls in the protocol block on the peer: the pool construction
/// round trip and the descriptor read that follows a buffer allocation.
/// Both, and every blocking send, give up with a timeout error once the
/// configured duration passes. `None` waits forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Client side: how long to wait for a request's reply.
    pub reply_timeout: Option<Duration>,
    /// Host side: how long to wait for the descriptor after an allocation.
    pub descriptor_timeout: Option<Duration>,
    /// Either side: how long a blocking send may wait for buffer space.
    pub write_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Some(DEFAULT_TIMEOUT),
            descriptor_timeout: Some(DEFAULT_TIMEOUT),
            write_timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl ChannelConfig {
    /// Defaults, overridden by the `BUFFERLINK_*_TIMEOUT_MS` environment
    /// variables. A value of `0` disables the corresponding timeout.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ChannelConfig::from_env`] with a caller-supplied lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        apply(&lookup, REPLY_TIMEOUT_ENV, &mut config.reply_timeout);
        apply(&lookup, DESCRIPTOR_TIMEOUT_ENV, &mut config.descriptor_timeout);
        apply(&lookup, WRITE_TIMEOUT_ENV, &mut config.write_timeout);
        config
    }

    /// Set every timeout to the same value.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            reply_timeout: timeout,
            descriptor_timeout: timeout,
            write_timeout: timeout,
        }
    }
}

fn apply(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Option<Duration>) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => *slot = None,
        Ok(ms) => *slot = Some(Duration::from_millis(ms)),
        Err(_) => warn!(key, value = %raw, "ignoring unparsable timeout override"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_bound_every_blocking_call() {
        let config = ChannelConfig::default();
        assert_eq!(config.reply_timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(config.descriptor_timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(config.write_timeout, Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn overrides_are_applied_per_key() {
        let config = ChannelConfig::from_lookup(lookup(&[
            (REPLY_TIMEOUT_ENV, "250"),
            (DESCRIPTOR_TIMEOUT_ENV, "0"),
        ]));
        assert_eq!(config.reply_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.descriptor_timeout, None);
        assert_eq!(config.write_timeout, Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn garbage_keeps_default() {
        let config = ChannelConfig::from_lookup(lookup(&[(WRITE_TIMEOUT_ENV, "soon")]));
        assert_eq!(config.write_timeout, Some(DEFAULT_TIMEOUT));
    }
}
