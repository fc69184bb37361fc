//! Attachment selection and download.

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use tracing::debug;
use url::Url;

use super::playfile_error::{PlayfileError, PlayfileResult};

/// The parts of a chat attachment needed to play it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentRef {
    pub filename: String,
    pub size: u64,
    pub url: String,
}

impl From<&serenity::Attachment> for AttachmentRef {
    fn from(attachment: &serenity::Attachment) -> Self {
        Self {
            filename: attachment.filename.clone(),
            size: u64::from(attachment.size),
            url: attachment.url.clone(),
        }
    }
}

impl AttachmentRef {
    pub fn extension(&self) -> String {
        extension_of(&self.filename)
    }
}

/// Lowercased text after the last `.` of `filename`.
///
/// A name without a dot yields the whole name; [`select_attachment`] rejects such names outright.
pub fn extension_of(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map_or(filename, |(_, ext)| ext)
        .to_lowercase()
}

/// Pick the first attachment and check it against the allow-list
pub fn select_attachment<'a>(
    attachments: &'a [AttachmentRef],
    allowed_extensions: &[String],
    max_bytes: u64,
) -> PlayfileResult<&'a AttachmentRef> {
    let attachment = attachments.first().ok_or(PlayfileError::MissingAttachment)?;

    let extension = attachment.extension();
    let has_suffix = attachment.filename.contains('.');
    if !has_suffix || !allowed_extensions.iter().any(|allowed| *allowed == extension) {
        return Err(PlayfileError::DisallowedExtension {
            extension,
            allowed: allowed_extensions.to_vec(),
        });
    }

    if attachment.size > max_bytes {
        return Err(PlayfileError::AttachmentTooLarge {
            size: attachment.size,
            limit: max_bytes,
        });
    }

    Ok(attachment)
}

/// Source of attachment bytes
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn fetch(&self, attachment: &AttachmentRef) -> PlayfileResult<Vec<u8>>;
}

/// Downloads attachments from Discord's CDN over HTTP
pub struct HttpAttachmentStore {
    client: reqwest::Client,
}

impl HttpAttachmentStore {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AttachmentStore for HttpAttachmentStore {
    async fn fetch(&self, attachment: &AttachmentRef) -> PlayfileResult<Vec<u8>> {
        let url = Url::parse(&attachment.url)
            .map_err(|e| PlayfileError::Staging(format!("bad attachment url: {e}")))?;

        debug!("Downloading attachment {} from {}", attachment.filename, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| PlayfileError::Staging(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlayfileError::Staging(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}
