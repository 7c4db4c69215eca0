// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{Platform, PlatformError, RemoteChallenge, RemoteFile, RemoteFlag, RemoteTag};
use crate::challenge::ChallengeRecord;

/// Every CTFd API response is wrapped like this.
#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
}

#[derive(Deserialize)]
struct Created {
    id: i64,
}

/// Client for the CTFd admin REST API (`/api/v1`).
pub struct CtfdClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl CtfdClient {
    pub fn new(base_uri: &str, token: &str) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self::with_http(http, base_uri, token))
    }

    fn with_http(http: reqwest::Client, base_uri: &str, token: &str) -> Self {
        Self {
            http,
            api_base: format!("{}/api/v1", base_uri.trim_end_matches('/')),
            token: token.to_string(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<T>, PlatformError> {
        let mut request = self
            .http
            .request(method.clone(), format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Token {}", self.token));
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.finish(method, path, request).await
    }

    async fn finish<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>, PlatformError> {
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlatformError::Status {
                method,
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let envelope: Envelope<T> = resp.json().await?;
        if !envelope.success {
            return Err(PlatformError::Rejected {
                method,
                path: path.to_string(),
            });
        }
        Ok(envelope.data)
    }

    async fn call_data<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, PlatformError> {
        self.call(method.clone(), path, body)
            .await?
            .ok_or_else(|| PlatformError::Rejected {
                method,
                path: path.to_string(),
            })
    }
}

#[async_trait]
impl Platform for CtfdClient {
    async fn list_challenges(&self) -> Result<Vec<RemoteChallenge>, PlatformError> {
        self.call_data(Method::GET, "/challenges?view=admin", None)
            .await
    }

    async fn create_challenge(&self, record: &ChallengeRecord) -> Result<i64, PlatformError> {
        let created: Created = self
            .call_data(Method::POST, "/challenges", Some(record.to_json()))
            .await?;
        Ok(created.id)
    }

    async fn patch_challenge(
        &self,
        challenge_id: i64,
        record: &ChallengeRecord,
    ) -> Result<(), PlatformError> {
        self.call::<Value>(
            Method::PATCH,
            &format!("/challenges/{challenge_id}"),
            Some(record.to_json()),
        )
        .await?;
        Ok(())
    }

    async fn list_flags(&self, challenge_id: i64) -> Result<Vec<RemoteFlag>, PlatformError> {
        self.call_data(
            Method::GET,
            &format!("/flags?challenge_id={challenge_id}"),
            None,
        )
        .await
    }

    async fn create_flag(&self, challenge_id: i64, content: &str) -> Result<(), PlatformError> {
        self.call::<Value>(
            Method::POST,
            "/flags",
            Some(json!({
                "challenge": challenge_id,
                "content": content,
                "data": "",
                "type": "static",
            })),
        )
        .await?;
        Ok(())
    }

    async fn patch_flag(
        &self,
        flag_id: i64,
        challenge_id: i64,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.call::<Value>(
            Method::PATCH,
            &format!("/flags/{flag_id}"),
            Some(json!({
                "challenge": challenge_id,
                "content": content,
                "data": "",
                "type": "static",
            })),
        )
        .await?;
        Ok(())
    }

    async fn list_tags(&self, challenge_id: i64) -> Result<Vec<RemoteTag>, PlatformError> {
        self.call_data(
            Method::GET,
            &format!("/challenges/{challenge_id}/tags"),
            None,
        )
        .await
    }

    async fn create_tag(&self, challenge_id: i64, value: &str) -> Result<(), PlatformError> {
        self.call::<Value>(
            Method::POST,
            "/tags",
            Some(json!({ "challenge": challenge_id, "value": value })),
        )
        .await?;
        Ok(())
    }

    async fn delete_tag(&self, tag_id: i64) -> Result<(), PlatformError> {
        self.call::<Value>(Method::DELETE, &format!("/tags/{tag_id}"), None)
            .await?;
        Ok(())
    }

    async fn list_files(&self, challenge_id: i64) -> Result<Vec<RemoteFile>, PlatformError> {
        self.call_data(
            Method::GET,
            &format!("/challenges/{challenge_id}/files"),
            None,
        )
        .await
    }

    async fn delete_file(&self, file_id: i64) -> Result<(), PlatformError> {
        self.call::<Value>(Method::DELETE, &format!("/files/{file_id}"), None)
            .await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        challenge_id: i64,
        path: &Path,
        file_name: &str,
    ) -> Result<(), PlatformError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PlatformError::Io(path.to_path_buf(), e))?;
        let form = reqwest::multipart::Form::new()
            .text("type", "challenge")
            .text("challenge_id", challenge_id.to_string())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string()),
            );
        let request = self
            .http
            .post(format!("{}/files", self.api_base))
            .header("Authorization", format!("Token {}", self.token))
            .multipart(form);
        self.finish::<Value>(Method::POST, "/files", request).await?;
        Ok(())
    }
}
