#![deny(unsafe_code)]

use std::fmt;
use std::num::NonZeroU16;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, File};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use trellismq_net::Result;
use trellismq_utils::{deserialize_duration, Bytesize};

use self::listener::Listeners;
use self::logging::Log;

pub use self::listener::Listener;
pub use self::options::Options;

pub mod listener;
pub mod logging;
pub mod options;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub broker: Broker,
    #[serde(default)]
    pub log: Log,
    #[serde(rename = "listener")]
    #[serde(default)]
    pub listeners: Listeners,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/trellismq/trellismq").required(false))
            .add_source(File::with_name("/etc/trellismq").required(false))
            .add_source(File::with_name("trellismq").required(false))
            .add_source(config::Environment::with_prefix("trellismq").try_parsing(true).list_separator(" "));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }

        let mut inner: Inner = builder.build()?.try_deserialize()?;

        inner.listeners.init();
        if inner.listeners.tcps.is_empty() {
            //set default
            inner.listeners.set_default();
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs() -> Result<()> {
        let cfg = Self::instance();
        log::debug!("Config info is {:?}", cfg.0);
        log::info!("allow_anonymous is {}", cfg.broker.allow_anonymous);
        log::info!("max_packet_size is {:?}", cfg.broker.max_packet_size);
        log::info!("max_inflight is {}", cfg.broker.max_inflight);
        for listener in cfg.listeners.tcps.values() {
            log::info!("listener {} on {}", listener.name, listener.addr);
        }
        Ok(())
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Broker {
    #[serde(default = "Broker::allow_anonymous_default")]
    pub allow_anonymous: bool,
    #[serde(default = "Broker::max_packet_size_default")]
    pub max_packet_size: Bytesize,
    #[serde(default = "Broker::max_clientid_len_default")]
    pub max_clientid_len: usize,
    #[serde(default = "Broker::min_keepalive_default")]
    pub min_keepalive: u16,
    #[serde(default = "Broker::max_keepalive_default")]
    pub max_keepalive: u16,
    #[serde(default = "Broker::allow_zero_keepalive_default")]
    pub allow_zero_keepalive: bool,
    #[serde(default = "Broker::keepalive_backoff_default")]
    pub keepalive_backoff: f32,
    #[serde(default = "Broker::handshake_timeout_default", deserialize_with = "deserialize_duration")]
    pub handshake_timeout: Duration,
    #[serde(default = "Broker::send_timeout_default", deserialize_with = "deserialize_duration")]
    pub send_timeout: Duration,
    #[serde(default = "Broker::max_inflight_default")]
    pub max_inflight: NonZeroU16,
}

impl Default for Broker {
    #[inline]
    fn default() -> Self {
        Self {
            allow_anonymous: Self::allow_anonymous_default(),
            max_packet_size: Self::max_packet_size_default(),
            max_clientid_len: Self::max_clientid_len_default(),
            min_keepalive: Self::min_keepalive_default(),
            max_keepalive: Self::max_keepalive_default(),
            allow_zero_keepalive: Self::allow_zero_keepalive_default(),
            keepalive_backoff: Self::keepalive_backoff_default(),
            handshake_timeout: Self::handshake_timeout_default(),
            send_timeout: Self::send_timeout_default(),
            max_inflight: Self::max_inflight_default(),
        }
    }
}

impl Broker {
    #[inline]
    fn allow_anonymous_default() -> bool {
        false
    }
    #[inline]
    fn max_packet_size_default() -> Bytesize {
        Bytesize(1024 * 1024)
    }
    #[inline]
    fn max_clientid_len_default() -> usize {
        65535
    }
    #[inline]
    fn min_keepalive_default() -> u16 {
        0
    }
    #[inline]
    fn max_keepalive_default() -> u16 {
        u16::MAX
    }
    #[inline]
    fn allow_zero_keepalive_default() -> bool {
        true
    }
    #[inline]
    fn keepalive_backoff_default() -> f32 {
        0.75
    }
    #[inline]
    fn handshake_timeout_default() -> Duration {
        Duration::from_secs(15)
    }
    #[inline]
    fn send_timeout_default() -> Duration {
        Duration::from_secs(10)
    }
    #[inline]
    fn max_inflight_default() -> NonZeroU16 {
        if let Some(max_inflight) = NonZeroU16::new(16) {
            max_inflight
        } else {
            unreachable!()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_defaults() {
        let settings = Settings::new(Options::default()).expect("Settings creation failed");
        assert!(!settings.broker.allow_anonymous);
        assert_eq!(settings.broker.max_packet_size.as_usize(), 1024 * 1024);
        assert_eq!(settings.broker.max_keepalive, u16::MAX);
        assert_eq!(settings.broker.handshake_timeout, Duration::from_secs(15));
        assert_eq!(settings.broker.max_inflight.get(), 16);
    }

    #[test]
    fn test_default_listener() {
        let settings = Settings::new(Options::default()).expect("Settings creation failed");
        assert!(!settings.listeners.tcps.is_empty());
        let listener = settings.listeners.get(3883).expect("default listener missing");
        assert_eq!(listener.addr.port(), 3883);
        assert_eq!(listener.backlog, 1024);
    }
}
