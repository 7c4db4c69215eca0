// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::error::Error;
use std::sync::Arc;

use ctfdx_deployer::{DeployerConfig, Scheduler};
use serenity::all::Http;
use serenity::prelude::*;
use tokio::net::TcpListener;

use crate::config::BotConfig;
use crate::discord::{ChannelSlot, DiscordNotifier, Handler};
use crate::webhook::WebhookState;

mod config;
mod discord;
mod format;
mod webhook;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| "Failed to set AWS-LC-RS as default TLS provider")?;

    let deployer = DeployerConfig::from_env()?;
    let bot = BotConfig::from_env()?;
    if bot.discord_channel.is_none() {
        tracing::warn!("DISCORD_CHANNEL is not set; use /set-channel to receive reports");
    }

    let channel = ChannelSlot::new(bot.discord_channel);
    let notifier = Arc::new(DiscordNotifier::new(
        Arc::new(Http::new(&bot.discord_token)),
        channel.clone(),
    ));
    let scheduler = Scheduler::new(Arc::new(deployer.pipeline()?), notifier.clone());
    tokio::spawn(notifier.watch_status(scheduler.status().subscribe()));

    scheduler.spawn_activation_timer(deployer.activation_check);
    if let Some(interval) = deployer.deploy_interval {
        tracing::info!("Deploying every {}s", interval.as_secs());
        scheduler.spawn_periodic_trigger(interval);
    }

    if let Some(webhook) = &bot.webhook {
        let listener = TcpListener::bind(webhook.addr).await?;
        let state = Arc::new(WebhookState::new(scheduler.clone(), webhook));
        tokio::spawn(async move {
            if let Err(e) = webhook::serve(state, listener).await {
                tracing::error!("Webhook listener stopped: {e}");
            }
        });
    }

    let mut client = Client::builder(&bot.discord_token, GatewayIntents::empty())
        .event_handler(Handler { scheduler, channel })
        .await?;
    client.start().await?;
    Ok(())
}
