//! Thin HTTP client for musterd.

use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::path::Path;

pub struct DaemonClient {
    http: Client,
    base: String,
}

/// Status and decoded JSON body of a daemon response.
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    /// The `detail` message of an error response, or a plain-text body.
    pub fn detail(&self) -> Option<&str> {
        self.body
            .get("detail")
            .and_then(Value::as_str)
            .or_else(|| self.body.as_str())
    }
}

impl DaemonClient {
    pub fn new(base: &str) -> Self {
        Self {
            http: Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn enroll(&self, external_id: &str, name: Option<&str>, image: &Path) -> Result<Reply> {
        let (file_name, bytes) = read_image(image).await?;
        self.enroll_bytes(external_id, name, file_name, bytes).await
    }

    pub async fn enroll_bytes(
        &self,
        external_id: &str,
        name: Option<&str>,
        file_name: String,
        image: Vec<u8>,
    ) -> Result<Reply> {
        let mut form = Form::new().text("external_id", external_id.to_string());
        if let Some(name) = name {
            form = form.text("display_name", name.to_string());
        }
        let form = form.part("image", Part::bytes(image).file_name(file_name));
        self.send(self.http.post(self.url("/enroll")).multipart(form))
            .await
    }

    pub async fn mark(&self, image: &Path, source: Option<&str>) -> Result<Reply> {
        let (file_name, bytes) = read_image(image).await?;
        let mut form = Form::new().part("image", Part::bytes(bytes).file_name(file_name));
        if let Some(source) = source {
            form = form.text("source", source.to_string());
        }
        self.send(self.http.post(self.url("/mark")).multipart(form))
            .await
    }

    pub async fn get(&self, path: &str) -> Result<Reply> {
        self.send(self.http.get(self.url(path))).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Reply> {
        let response = request
            .send()
            .await
            .with_context(|| format!("musterd not reachable at {}", self.base))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read musterd response")?;
        // Layer rejections (e.g. body too large) answer in plain text.
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(Reply { status, body })
    }
}

/// File name to report in the upload, falling back to `image`.
pub fn upload_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

async fn read_image(path: &Path) -> Result<(String, Vec<u8>)> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok((upload_name(path), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_detail() {
        let json_error = Reply {
            status: StatusCode::NOT_FOUND,
            body: json!({"detail": "unknown person: U9"}),
        };
        assert_eq!(json_error.detail(), Some("unknown person: U9"));

        let plain = Reply {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            body: Value::String("length limit exceeded".into()),
        };
        assert_eq!(plain.detail(), Some("length limit exceeded"));

        let success = Reply {
            status: StatusCode::OK,
            body: json!({"status": "ok"}),
        };
        assert_eq!(success.detail(), None);
    }

    #[test]
    fn test_upload_name() {
        assert_eq!(upload_name(Path::new("/data/U1_Ada/face.jpg")), "face.jpg");
        assert_eq!(upload_name(Path::new("/")), "image");
    }
}
