use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::multiplexer::ReconnectPolicy;
use crate::upstream::Topic;
use crate::utils::Result;

/// Top-level configuration settings for the relay.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub upstream: UpstreamSettings,
    pub relay: RelaySettings,
    pub reconnect: ReconnectSettings,
    pub logging: LoggingSettings,
}

/// Where downstream clients connect.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The upstream subscription service. Topics are appended to `url`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct UpstreamSettings {
    pub url: String,
}

impl UpstreamSettings {
    pub fn base_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.url)?)
    }
}

/// Topics the relay forwards.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RelaySettings {
    pub topics: Vec<TopicSettings>,
}

impl RelaySettings {
    pub fn topics(&self) -> Result<Vec<Topic>> {
        self.topics.iter().map(TopicSettings::to_topic).collect()
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TopicSettings {
    pub name: String,
    #[serde(default)]
    pub instance: Option<String>,
    /// JSON object passed upstream as the `query` parameter.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl TopicSettings {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instance: None,
            query: None,
            fields: Vec::new(),
        }
    }

    pub fn to_topic(&self) -> Result<Topic> {
        let mut topic = Topic::new(&self.name, self.instance.as_deref())?;
        if let Some(query) = &self.query {
            topic = topic.with_query(query)?;
        }
        topic.with_fields(&self.fields)
    }
}

/// Reconnection of upstream subscriptions. Off unless `enabled`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReconnectSettings {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0 retries forever.
    pub max_attempts: u32,
}

impl ReconnectSettings {
    pub fn policy(&self) -> ReconnectPolicy {
        let policy = ReconnectPolicy::exponential(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_max_attempts(self.max_attempts);

        ReconnectPolicy {
            enabled: self.enabled,
            ..policy
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled in from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub upstream: Option<PartialUpstreamSettings>,
    pub relay: Option<PartialRelaySettings>,
    pub reconnect: Option<PartialReconnectSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialUpstreamSettings {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRelaySettings {
    pub topics: Option<Vec<TopicSettings>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialReconnectSettings {
    pub enabled: Option<bool>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Overlay whatever was provided on top of the defaults.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();

        Settings {
            server: ServerSettings {
                host: self
                    .server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: self
                    .server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
            },
            upstream: UpstreamSettings {
                url: self
                    .upstream
                    .and_then(|u| u.url)
                    .unwrap_or(default.upstream.url),
            },
            relay: RelaySettings {
                topics: self
                    .relay
                    .and_then(|r| r.topics)
                    .unwrap_or(default.relay.topics),
            },
            reconnect: ReconnectSettings {
                enabled: self
                    .reconnect
                    .as_ref()
                    .and_then(|r| r.enabled)
                    .unwrap_or(default.reconnect.enabled),
                initial_delay_ms: self
                    .reconnect
                    .as_ref()
                    .and_then(|r| r.initial_delay_ms)
                    .unwrap_or(default.reconnect.initial_delay_ms),
                max_delay_ms: self
                    .reconnect
                    .as_ref()
                    .and_then(|r| r.max_delay_ms)
                    .unwrap_or(default.reconnect.max_delay_ms),
                max_attempts: self
                    .reconnect
                    .as_ref()
                    .and_then(|r| r.max_attempts)
                    .unwrap_or(default.reconnect.max_attempts),
            },
            logging: LoggingSettings {
                level: self
                    .logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Out of the box the relay listens on 7171 and forwards the `measurement`
/// feed from a subscription service on localhost:8888.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 7171,
            },
            upstream: UpstreamSettings {
                url: "ws://localhost:8888/subscribe/".to_string(),
            },
            relay: RelaySettings {
                topics: vec![TopicSettings::new("measurement")],
            },
            reconnect: ReconnectSettings {
                enabled: false,
                initial_delay_ms: 500,
                max_delay_ms: 8_000,
                max_attempts: 0,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
