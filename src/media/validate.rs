use crate::config::IngestPolicy;
use crate::error::IngestError;
use crate::state::data::RawFile;

/// Check a file against the type and size policy.
///
/// Pure and I/O free: a rejected file never reaches the stores.
pub fn validate(file: &RawFile, policy: &IngestPolicy) -> Result<(), IngestError> {
    if !file.mime_type.starts_with("image/") {
        return Err(IngestError::InvalidFileType {
            file_name: file.name.clone(),
            mime_type: file.mime_type.clone(),
        });
    }

    // The limit itself is still accepted
    if file.size() > policy.max_file_bytes {
        return Err(IngestError::FileTooLarge {
            file_name: file.name.clone(),
            size: file.size(),
            limit: policy.max_file_bytes,
        });
    }

    Ok(())
}
