//! Zip bundling for outbound attachments.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::EmailError;
use crate::store::EmailAttachment;

/// Bundle the given attachments into one zip attachment.
pub fn bundle(
    attachments: &[EmailAttachment],
    archive_name: &str,
) -> Result<EmailAttachment, EmailError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for attachment in attachments {
        writer
            .start_file(attachment.file_name.as_str(), options)
            .map_err(|e| EmailError::ArchiveFailed(format!("{e}")))?;
        writer
            .write_all(&attachment.bytes)
            .map_err(|e| EmailError::ArchiveFailed(format!("{e}")))?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| EmailError::ArchiveFailed(format!("{e}")))?;
    Ok(EmailAttachment {
        file_name: archive_name.to_string(),
        content_type: "application/zip".to_string(),
        bytes: cursor.into_inner(),
    })
}
