//! Upload admission policy.
//!
//! Every candidate file goes through the same pipeline before any byte reaches
//! disk: a pre-flight size check on the declared length, then the extension
//! allow-list, then the declared MIME type (which must land in the same
//! category as the extension). Accepted candidates receive a generated storage
//! name; the original filename only ever contributes its allow-listed
//! extension. Streaming size enforcement and partial-file cleanup live in
//! [`crate::upload_store`], which receives the same ceiling.
//!
//! The declared MIME type is supplied by the client and therefore spoofable. It
//! raises the bar relative to no check at all but is not content sniffing.

use std::fmt;
use std::path::Path;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::upload_store::{PersistError, UploadRecord, UploadStore};

/// Broad families of content the portal accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Pdf,
    Document,
    Video,
}

impl FileCategory {
    pub const ALL: [FileCategory; 4] = [
        FileCategory::Image,
        FileCategory::Pdf,
        FileCategory::Document,
        FileCategory::Video,
    ];

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FileCategory::Image => &["jpg", "jpeg", "png"],
            FileCategory::Pdf => &["pdf"],
            FileCategory::Document => &["docx"],
            FileCategory::Video => &["mp4"],
        }
    }

    pub fn mime_types(self) -> &'static [&'static str] {
        match self {
            FileCategory::Image => &["image/jpeg", "image/png"],
            FileCategory::Pdf => &["application/pdf"],
            FileCategory::Document => {
                &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"]
            }
            FileCategory::Video => &["video/mp4"],
        }
    }

    fn for_extension(extension: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.extensions().contains(&extension))
    }

    fn for_mime_type(essence: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.mime_types().contains(&essence))
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileCategory::Image => "images",
            FileCategory::Pdf => "PDF",
            FileCategory::Document => "DOCX",
            FileCategory::Video => "MP4",
        };
        f.write_str(label)
    }
}

/// Why an upload was turned away. Messages are stable and safe to show to users.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadRejection {
    #[error("File is too large. The maximum size is {limit_display}.")]
    TooLarge { limit: u64, limit_display: String },
    #[error("That file extension is not allowed. Supported: {allowed}.")]
    DisallowedExtension { allowed: String },
    #[error("The file type does not match an allowed format. Supported: {allowed}.")]
    DisallowedType { allowed: String },
    #[error("Select a file before uploading.")]
    EmptyUpload,
    #[error("Only one file can be uploaded at a time.")]
    MultipleFiles,
    #[error("The upload form could not be processed. Please try again.")]
    Malformed,
}

/// Anything that prevents an upload from completing.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Rejected(#[from] UploadRejection),
    #[error("upload stream failed: {0}")]
    Stream(Box<dyn std::error::Error + Send + Sync>),
    #[error("upload storage failed: {0}")]
    Store(#[source] std::io::Error),
}

impl From<PersistError> for UploadError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::TooLarge { limit } => UploadRejection::TooLarge {
                limit,
                limit_display: human_readable_size(limit),
            }
            .into(),
            PersistError::Empty => UploadRejection::EmptyUpload.into(),
            PersistError::Stream(err) => UploadError::Stream(err),
            PersistError::Io(err) => UploadError::Store(err),
        }
    }
}

/// Limits applied by [`UploadValidator`].
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    max_upload_bytes: u64,
    allowed_categories: Vec<FileCategory>,
    checks_enabled: bool,
}

impl UploadPolicy {
    pub fn new(max_upload_bytes: u64, allowed_categories: Vec<FileCategory>) -> Self {
        Self {
            max_upload_bytes,
            allowed_categories,
            checks_enabled: true,
        }
    }

    /// Policy with every gate switched off, mirroring an unprotected upload route.
    #[cfg(test)]
    pub(crate) fn unchecked() -> Self {
        Self {
            max_upload_bytes: u64::MAX,
            allowed_categories: FileCategory::ALL.to_vec(),
            checks_enabled: false,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn allowed_summary(&self) -> String {
        self.allowed_categories
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Metadata of a candidate that passed the allow-lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedUpload {
    pub stored_name: String,
    pub original_name: String,
    pub declared_type: String,
    pub category: FileCategory,
}

/// A file offered for upload: declared metadata plus its byte stream.
pub struct UploadCandidate<S> {
    pub original_name: String,
    pub declared_type: String,
    /// Length announced before the body is read, when the client sent one.
    pub declared_len: Option<u64>,
    pub body: S,
}

/// Gatekeeper for uploads, configured once at start-up.
#[derive(Debug, Clone)]
pub struct UploadValidator {
    policy: UploadPolicy,
}

impl UploadValidator {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Reject oversized uploads from the declared length alone.
    ///
    /// `allowance` covers framing around the file (multipart boundaries and
    /// headers) when the declared length is that of the whole request.
    pub fn preflight(&self, declared_len: Option<u64>, allowance: u64) -> Result<(), UploadRejection> {
        if !self.policy.checks_enabled {
            return Ok(());
        }

        let ceiling = self.policy.max_upload_bytes.saturating_add(allowance);
        match declared_len {
            Some(len) if len > ceiling => {
                debug!(target: "upload", declared_len = len, ceiling, "pre-flight size check failed");
                Err(self.too_large())
            }
            _ => Ok(()),
        }
    }

    /// Check the declared name and type and assign a storage name.
    pub fn admit(
        &self,
        original_name: &str,
        declared_type: &str,
    ) -> Result<AdmittedUpload, UploadRejection> {
        if !self.policy.checks_enabled {
            return Ok(AdmittedUpload {
                stored_name: original_name.to_string(),
                original_name: original_name.to_string(),
                declared_type: declared_type.to_string(),
                category: FileCategory::Document,
            });
        }

        let disallowed_extension = || UploadRejection::DisallowedExtension {
            allowed: self.policy.allowed_summary(),
        };

        let extension = file_extension(original_name).ok_or_else(disallowed_extension)?;
        let category = FileCategory::for_extension(&extension)
            .filter(|category| self.policy.allowed_categories.contains(category))
            .ok_or_else(disallowed_extension)?;

        let essence = mime_essence(declared_type);
        if FileCategory::for_mime_type(&essence) != Some(category) {
            return Err(UploadRejection::DisallowedType {
                allowed: self.policy.allowed_summary(),
            });
        }

        Ok(AdmittedUpload {
            stored_name: generate_stored_name(&extension),
            original_name: original_name.to_string(),
            declared_type: essence,
            category,
        })
    }

    fn too_large(&self) -> UploadRejection {
        UploadRejection::TooLarge {
            limit: self.policy.max_upload_bytes,
            limit_display: human_readable_size(self.policy.max_upload_bytes),
        }
    }
}

/// Run a candidate through the full pipeline and persist it on acceptance.
///
/// On any failure nothing is left in the upload directory.
pub async fn receive_upload<S, E>(
    validator: &UploadValidator,
    store: &UploadStore,
    candidate: UploadCandidate<S>,
) -> Result<UploadRecord, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    validator.preflight(candidate.declared_len, 0)?;

    let admitted = match validator.admit(&candidate.original_name, &candidate.declared_type) {
        Ok(admitted) => admitted,
        Err(rejection) => {
            warn!(
                target: "upload",
                original_name = %candidate.original_name,
                declared_type = %candidate.declared_type,
                %rejection,
                "upload rejected"
            );
            return Err(rejection.into());
        }
    };

    let record = store
        .persist(&admitted, candidate.body, validator.policy.max_upload_bytes)
        .await?;

    info!(
        target: "upload",
        stored_name = %record.stored_name,
        size_bytes = record.size_bytes,
        category = ?admitted.category,
        "upload accepted"
    );

    Ok(record)
}

/// Lower-cased extension of the final path segment, if it has one.
fn file_extension(name: &str) -> Option<String> {
    let file_name = name.rsplit(['/', '\\']).next()?;
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase)
}

/// `type/subtype` without parameters, lower-cased.
fn mime_essence(declared: &str) -> String {
    declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Storage names are a fresh ULID plus the validated extension.
fn generate_stored_name(extension: &str) -> String {
    format!("{}.{}", Ulid::new().to_string().to_ascii_lowercase(), extension)
}

/// Human-friendly byte size formatter used in rejection messages and views.
pub fn human_readable_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else if value >= 100.0 {
        format!("{value:.0} {}", UNITS[unit_index])
    } else if value >= 10.0 {
        format!("{value:.1} {}", UNITS[unit_index])
    } else {
        format!("{value:.2} {}", UNITS[unit_index])
    }
}
