// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Failed to start container build: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Container build for {tag} failed ({status}): {diagnostic}")]
    Failed {
        tag: String,
        status: String,
        diagnostic: String,
    },
}

/// Builds a container image from a build context.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerBuilder: Send + Sync {
    async fn build(&self, context_dir: &Path, image_tag: &str) -> Result<(), BuildError>;
}

/// Shells out to `docker build`.
pub struct DockerBuilder {
    pub program: String,
}

impl Default for DockerBuilder {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

#[async_trait]
impl ContainerBuilder for DockerBuilder {
    async fn build(&self, context_dir: &Path, image_tag: &str) -> Result<(), BuildError> {
        tracing::info!("Building image {image_tag} from {}", context_dir.display());
        let output = tokio::process::Command::new(&self.program)
            .args(["build", ".", "-t", image_tag])
            .current_dir(context_dir)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let diagnostic = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(BuildError::Failed {
                tag: image_tag.to_string(),
                status: output.status.to_string(),
                diagnostic: diagnostic.trim().to_string(),
            });
        }
        Ok(())
    }
}
