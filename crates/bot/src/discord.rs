// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use ctfdx_deployer::{Admission, NotificationSink, RunReport, RunStatus, Scheduler, Trigger, TriggerSource};
use serenity::all::{
    ChannelId, Command, CommandInteraction, CreateCommand, CreateEmbed, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, EditMessage, Http, Interaction, MessageId,
    Ready, Timestamp,
};
use serenity::async_trait;
use serenity::prelude::*;
use tokio::sync::watch;

use crate::format;

/// Notification channel shared by the command handler and the notifier.
#[derive(Clone, Default)]
pub struct ChannelSlot(Arc<RwLock<Option<ChannelId>>>);

impl ChannelSlot {
    pub fn new(channel: Option<u64>) -> Self {
        Self(Arc::new(RwLock::new(channel.map(ChannelId::new))))
    }

    pub fn get(&self) -> Option<ChannelId> {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, channel: ChannelId) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(channel);
    }
}

pub struct Handler {
    pub scheduler: Scheduler,
    pub channel: ChannelSlot,
}

impl Handler {
    async fn respond(&self, ctx: &Context, command: &CommandInteraction, content: String, ephemeral: bool) {
        let message = CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(ephemeral);
        if let Err(e) = command
            .create_response(&ctx.http, CreateInteractionResponse::Message(message))
            .await
        {
            tracing::warn!("Failed to respond to /{}: {e}", command.data.name);
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!("Connected to Discord as {}", ready.user.name);
        let commands = vec![
            CreateCommand::new("ping").description("Check whether the bot is alive"),
            CreateCommand::new("set-channel")
                .description("Post deployment status to this channel"),
            CreateCommand::new("deploy").description("Deploy all challenges now"),
        ];
        if let Err(e) = Command::set_global_commands(&ctx.http, commands).await {
            tracing::error!("Failed to register commands: {e}");
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        match command.data.name.as_str() {
            "ping" => self.respond(&ctx, &command, "pong!".into(), true).await,
            "set-channel" => {
                self.channel.set(command.channel_id);
                tracing::info!("Notification channel set to {}", command.channel_id);
                self.respond(&ctx, &command, "Deployment status will be posted here.".into(), false)
                    .await
            }
            "deploy" => {
                let trigger = Trigger::new(TriggerSource::Command, Some(command.user.name.clone()));
                let reply = match self.scheduler.request_run(trigger) {
                    Admission::Started => "Deployment started.",
                    Admission::Queued => "A deployment is already running, yours will follow it.",
                };
                self.respond(&ctx, &command, reply.into(), false).await
            }
            other => tracing::debug!("Ignoring unknown command {other}"),
        }
    }
}

/// Posts run status and reports to the configured channel.
pub struct DiscordNotifier {
    http: Arc<Http>,
    channel: ChannelSlot,
    status_message: Mutex<Option<(ChannelId, MessageId)>>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, channel: ChannelSlot) -> Self {
        Self {
            http,
            channel,
            status_message: Mutex::new(None),
        }
    }

    fn status_embed(status: &RunStatus) -> CreateEmbed {
        format::status_fields(status).into_iter().fold(
            CreateEmbed::new()
                .title(format::status_headline(status))
                .colour(format::state_color(status.state))
                .timestamp(Timestamp::now()),
            |embed, (name, value)| embed.field(name, value, true),
        )
    }

    /// Edits the last status message, or posts a new one when that fails.
    pub async fn show_status(&self, status: &RunStatus) {
        let Some(channel) = self.channel.get() else {
            return;
        };
        let previous = *self
            .status_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((previous_channel, message)) = previous {
            if previous_channel == channel {
                let edit = EditMessage::new().embed(Self::status_embed(status));
                match channel.edit_message(&self.http, message, edit).await {
                    Ok(_) => return,
                    Err(e) => tracing::debug!("Could not edit status message: {e}"),
                }
            }
        }
        let message = CreateMessage::new().embed(Self::status_embed(status));
        match channel.send_message(&self.http, message).await {
            Ok(message) => {
                *self
                    .status_message
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some((channel, message.id));
            }
            Err(e) => tracing::warn!("Failed to post status message: {e}"),
        }
    }

    /// Mirrors every status change until the sender is dropped.
    pub async fn watch_status(self: Arc<Self>, mut status: watch::Receiver<RunStatus>) {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            self.show_status(&current).await;
        }
    }

    fn report_embed(report: &RunReport) -> CreateEmbed {
        let embed = match report {
            RunReport::Completed(summary) => format::summary_fields(summary).into_iter().fold(
                CreateEmbed::new()
                    .title("Deployment finished")
                    .description(format::summary_description(summary))
                    .colour(if summary.failed.is_empty() {
                        format::COLOR_DONE
                    } else {
                        format::COLOR_ERROR
                    }),
                |embed, (name, value)| embed.field(name, value, false),
            ),
            RunReport::Failed {
                name,
                error,
                causes,
                actor,
            } => format::failure_fields(name, causes, actor.as_deref())
                .into_iter()
                .fold(
                    CreateEmbed::new()
                        .title("Deployment failed")
                        .description(error)
                        .colour(format::COLOR_ERROR),
                    |embed, (name, value)| embed.field(name, value, false),
                ),
        };
        embed.timestamp(Timestamp::now())
    }
}

#[async_trait]
impl NotificationSink for DiscordNotifier {
    async fn run_finished(&self, report: &RunReport) {
        let Some(channel) = self.channel.get() else {
            tracing::warn!("No notification channel set, dropping run report");
            return;
        };
        let message = CreateMessage::new().embed(Self::report_embed(report));
        if let Err(e) = channel.send_message(&self.http, message).await {
            tracing::error!("Failed to post run report: {e}");
        }
    }
}
