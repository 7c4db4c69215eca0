// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::net::SocketAddr;

use ctfdx_deployer::ConfigError;
use ctfdx_deployer::config::{parsed, required};

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub discord_token: String,
    pub discord_channel: Option<u64>,
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub addr: SocketAddr,
    pub path: String,
    pub secret: Option<String>,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let webhook = parsed::<SocketAddr>(&lookup, "WEBHOOK_ADDR")?.map(|addr| WebhookConfig {
            addr,
            path: lookup("WEBHOOK_PATH")
                .filter(|p| p.starts_with('/'))
                .unwrap_or_else(|| "/webhook".into()),
            secret: lookup("WEBHOOK_SECRET").filter(|s| !s.is_empty()),
        });
        Ok(Self {
            discord_token: required(&lookup, "DISCORD_TOKEN")?,
            discord_channel: parsed(&lookup, "DISCORD_CHANNEL")?,
            webhook,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_disabled_without_addr() {
        let config = BotConfig::from_lookup(|key| match key {
            "DISCORD_TOKEN" => Some("token".into()),
            "WEBHOOK_SECRET" => Some("s3cret".into()),
            _ => None,
        })
        .unwrap();
        assert!(config.webhook.is_none());
        assert_eq!(config.discord_channel, None);
    }

    #[test]
    fn test_webhook_defaults() {
        let config = BotConfig::from_lookup(|key| match key {
            "DISCORD_TOKEN" => Some("token".into()),
            "DISCORD_CHANNEL" => Some("123456789012345678".into()),
            "WEBHOOK_ADDR" => Some("[::]:8080".into()),
            _ => None,
        })
        .unwrap();
        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.addr.port(), 8080);
        assert_eq!(webhook.path, "/webhook");
        assert_eq!(webhook.secret, None);
        assert_eq!(config.discord_channel, Some(123456789012345678));
    }

    #[test]
    fn test_token_required() {
        let err = BotConfig::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DISCORD_TOKEN")));
    }
}
