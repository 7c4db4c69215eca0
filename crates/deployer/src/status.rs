// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Pending,
    Running,
    Done,
    Error,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Done => "done",
            RunState::Error => "error",
        })
    }
}

/// Coarse label of what a running deployment is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FetchingChallenges,
    Packaging,
    Uploading,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::FetchingChallenges => "fetching problems",
            Phase::Packaging => "packaging",
            Phase::Uploading => "uploading problems",
        })
    }
}

/// Per-target steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    LoadingConfiguration,
    ReplacingRedactedFiles,
    SearchingFlags,
    Compressing,
    BuildingConfiguration,
    CreatingOrPatching,
    UploadingFile,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::LoadingConfiguration => "loading configuration",
            Step::ReplacingRedactedFiles => "replacing redacted files",
            Step::SearchingFlags => "searching flags",
            Step::Compressing => "compressing",
            Step::BuildingConfiguration => "building configuration",
            Step::CreatingOrPatching => "creating/patching problem",
            Step::UploadingFile => "uploading file for user",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatus {
    pub state: RunState,
    /// Only set while running.
    pub phase: Option<Phase>,
    pub target: Option<String>,
    pub step: Option<Step>,
}

/// Write side of the run status. Receivers obtained from [`StatusHandle::subscribe`]
/// are read-only.
#[derive(Clone)]
pub struct StatusHandle(Arc<watch::Sender<RunStatus>>);

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        Self(Arc::new(watch::Sender::new(RunStatus::default())))
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.0.subscribe()
    }

    pub fn current(&self) -> RunStatus {
        self.0.borrow().clone()
    }

    /// Publishes a bare state; phase, target and step are cleared.
    pub(crate) fn set_state(&self, state: RunState) {
        self.0.send_replace(RunStatus {
            state,
            ..Default::default()
        });
    }

    pub fn phase(&self, phase: Phase) {
        self.0.send_modify(|s| s.phase = Some(phase));
    }

    pub fn target(&self, target: Option<&str>) {
        self.0.send_modify(|s| {
            s.target = target.map(str::to_string);
            s.step = None;
        });
    }

    pub fn step(&self, step: Step) {
        tracing::debug!("Step: {step}");
        self.0.send_modify(|s| s.step = Some(step));
    }
}
