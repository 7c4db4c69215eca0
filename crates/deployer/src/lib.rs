// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Packages challenge directories and keeps a CTFd instance in sync with them.

pub mod activation;
pub mod builder;
pub mod challenge;
pub mod config;
pub mod descriptor;
pub mod packager;
pub mod pipeline;
pub mod platform;
pub mod scanner;
pub mod scheduler;
pub mod source;
pub mod status;
pub mod sync;
pub mod target;
mod tree;

pub use config::{ConfigError, DeployerConfig};
pub use pipeline::{FailedTarget, Pipeline, RunError, RunSummary};
pub use scheduler::{
    Admission, NotificationSink, RunExecutor, RunReport, Scheduler, Trigger, TriggerSource,
};
pub use status::{Phase, RunState, RunStatus, StatusHandle, Step};
