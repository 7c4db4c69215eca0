// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Plain-text rendering of run status and reports for Discord embeds.

use ctfdx_deployer::{RunState, RunStatus, RunSummary};

/// Discord rejects embed field values longer than this.
const FIELD_LIMIT: usize = 1024;
const EMPTY: &str = "-";

pub const COLOR_PENDING: u32 = 0x95a5a6;
pub const COLOR_RUNNING: u32 = 0x3498db;
pub const COLOR_DONE: u32 = 0x2ecc71;
pub const COLOR_ERROR: u32 = 0xe74c3c;

pub fn state_color(state: RunState) -> u32 {
    match state {
        RunState::Pending => COLOR_PENDING,
        RunState::Running => COLOR_RUNNING,
        RunState::Done => COLOR_DONE,
        RunState::Error => COLOR_ERROR,
    }
}

pub fn status_headline(status: &RunStatus) -> String {
    format!("Currently, {}", status.state)
}

pub fn status_fields(status: &RunStatus) -> Vec<(&'static str, String)> {
    vec![
        (
            "Working on",
            status.phase.map(|p| p.to_string()).unwrap_or(EMPTY.into()),
        ),
        ("For", status.target.clone().unwrap_or(EMPTY.into())),
        (
            "Step",
            status.step.map(|s| s.to_string()).unwrap_or(EMPTY.into()),
        ),
    ]
}

pub fn summary_description(summary: &RunSummary) -> String {
    format!(
        "Deployed {} challenge{} in {:.1}s.",
        summary.deployed,
        if summary.deployed == 1 { "" } else { "s" },
        summary.elapsed.as_secs_f64()
    )
}

pub fn summary_fields(summary: &RunSummary) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    if !summary.failed.is_empty() {
        fields.push((
            format!("Failed ({})", summary.failed.len()),
            truncate(
                summary
                    .failed
                    .iter()
                    .map(|f| format!("**{}**: {}", f.target, f.reason))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        ));
    }
    if !summary.deferred.is_empty() {
        fields.push((
            format!("Scheduled ({})", summary.deferred.len()),
            truncate(
                summary
                    .deferred
                    .iter()
                    .map(|d| format!("**{}** at {}", d.target, d.at.format("%Y-%m-%d %H:%M UTC")))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        ));
    }
    if !summary.ignored.is_empty() {
        fields.push((
            format!("Ignored ({})", summary.ignored.len()),
            truncate(summary.ignored.join(", ")),
        ));
    }
    fields
}

pub fn failure_fields(
    name: &str,
    causes: &[String],
    actor: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut fields = vec![("Error", name.to_string())];
    if !causes.is_empty() {
        fields.push(("Caused by", truncate(causes.join("\n"))));
    }
    fields.push(("Requested by", actor.unwrap_or(EMPTY).to_string()));
    fields
}

/// Cuts `text` to the embed field limit on a character boundary.
pub fn truncate(text: String) -> String {
    if text.len() <= FIELD_LIMIT {
        return text;
    }
    let mut end = FIELD_LIMIT - 3;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
