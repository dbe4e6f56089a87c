//! Bulk enrollment of a scanned dataset.
//!
//! Each folder ends up either enrolled or counted as a failure; only an
//! unreachable daemon stops the run.

use crate::client::{upload_name, DaemonClient, Reply};
use crate::dataset::PersonDir;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::path::PathBuf;

#[async_trait]
pub trait Enroller: Sync {
    async fn enroll(
        &self,
        external_id: &str,
        name: Option<&str>,
        file_name: String,
        image: Vec<u8>,
    ) -> Result<Reply>;
}

#[async_trait]
impl Enroller for DaemonClient {
    async fn enroll(
        &self,
        external_id: &str,
        name: Option<&str>,
        file_name: String,
        image: Vec<u8>,
    ) -> Result<Reply> {
        self.enroll_bytes(external_id, name, file_name, image).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FolderOutcome {
    Enrolled(PathBuf),
    /// Folder name yields an empty external id; nothing was sent.
    MissingId,
    /// Every image was rejected as unusable, or there were none.
    NoUsableImage,
    /// The daemon refused the folder outright.
    Rejected { status: StatusCode, detail: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub ok: usize,
    pub fail: usize,
}

/// Enroll every folder in order and report one line per folder.
pub async fn enroll_all<E>(enroller: &E, people: &[PersonDir]) -> Result<Summary>
where
    E: Enroller + ?Sized,
{
    let mut summary = Summary::default();

    for person in people {
        match enroll_person(enroller, person).await? {
            FolderOutcome::Enrolled(image) => {
                summary.ok += 1;
                println!("[ok]   {} ({})", person.folder, image.display());
            }
            FolderOutcome::MissingId => {
                summary.fail += 1;
                println!("[fail] {}: folder name has no id", person.folder);
            }
            FolderOutcome::NoUsableImage => {
                summary.fail += 1;
                println!("[fail] {}: no usable face image", person.folder);
            }
            FolderOutcome::Rejected { status, detail } => {
                summary.fail += 1;
                println!("[fail] {}: {status}: {detail}", person.folder);
            }
        }
    }

    Ok(summary)
}

/// Try the folder's images in order until one enrolls.
///
/// Unreadable images and 400/413 replies move on to the next image. Any
/// other non-success reply fails the folder. Only transport errors bubble up.
pub async fn enroll_person<E>(enroller: &E, person: &PersonDir) -> Result<FolderOutcome>
where
    E: Enroller + ?Sized,
{
    let external_id = person.external_id.trim();
    if external_id.is_empty() {
        tracing::warn!(folder = %person.folder, "skipping folder without an id");
        return Ok(FolderOutcome::MissingId);
    }

    for image in &person.images {
        let bytes = match tokio::fs::read(image).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(image = %image.display(), error = %err, "cannot read image");
                continue;
            }
        };

        let reply = enroller
            .enroll(external_id, person.name.as_deref(), upload_name(image), bytes)
            .await?;
        let detail = reply.detail().unwrap_or("no detail").to_string();

        match reply.status {
            s if s.is_success() => return Ok(FolderOutcome::Enrolled(image.clone())),
            StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => {
                tracing::warn!(
                    image = %image.display(),
                    status = %reply.status,
                    detail = %detail,
                    "image rejected"
                );
            }
            status => {
                tracing::warn!(
                    folder = %person.folder,
                    %status,
                    detail = %detail,
                    "enrollment failed"
                );
                return Ok(FolderOutcome::Rejected { status, detail });
            }
        }
    }

    Ok(FolderOutcome::NoUsableImage)
}
