use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use llemmy_llm::ContentBlock;
use snafu::{OptionExt, ResultExt};

use crate::error::{ChatResult, ReadAttachmentSnafu, UnsupportedMimeTypeSnafu};

/// Attachment types a prompt may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MimeType {
    Pdf,
    Jpeg,
    Png,
    PlainText,
}

impl MimeType {
    pub const ALL: [MimeType; 4] = [Self::Pdf, Self::Jpeg, Self::Png, Self::PlainText];

    pub fn parse(raw: &str) -> ChatResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "application/pdf" => Ok(Self::Pdf),
            "image/jpeg" => Ok(Self::Jpeg),
            "image/png" => Ok(Self::Png),
            "text/plain" => Ok(Self::PlainText),
            _ => UnsupportedMimeTypeSnafu {
                stage: "mime-type-parse",
                mime_type: raw.to_string(),
            }
            .fail(),
        }
    }

    /// Guesses the type from the file extension.
    pub fn from_path(path: &Path) -> ChatResult<Self> {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase)
            .context(UnsupportedMimeTypeSnafu {
                stage: "mime-type-from-path",
                mime_type: path.display().to_string(),
            })?;

        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "txt" | "csv" => Ok(Self::PlainText),
            _ => UnsupportedMimeTypeSnafu {
                stage: "mime-type-from-path",
                mime_type: format!(".{extension}"),
            }
            .fail(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::PlainText => "text/plain",
        }
    }

    pub fn is_binary(&self) -> bool {
        !matches!(self, Self::PlainText)
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(pub u64);

/// A file folded into the pending prompt. Only lives until the prompt is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    id: AttachmentId,
    path: PathBuf,
    mime_type: MimeType,
    content: ContentBlock,
}

impl Attachment {
    pub(crate) fn load(id: AttachmentId, path: &Path, mime_type: MimeType) -> ChatResult<Self> {
        let content = if mime_type.is_binary() {
            let bytes = std::fs::read(path).context(ReadAttachmentSnafu {
                stage: "attachment-read-bytes",
                path: path.to_path_buf(),
            })?;
            let data_base64 = BASE64.encode(bytes);
            match mime_type {
                MimeType::Pdf => ContentBlock::Pdf {
                    mime_type: mime_type.as_str().to_string(),
                    data_base64,
                },
                _ => ContentBlock::Image {
                    mime_type: mime_type.as_str().to_string(),
                    data_base64,
                },
            }
        } else {
            let text = std::fs::read_to_string(path).context(ReadAttachmentSnafu {
                stage: "attachment-read-text",
                path: path.to_path_buf(),
            })?;
            ContentBlock::text(text)
        };

        Ok(Self {
            id,
            path: path.to_path_buf(),
            mime_type,
            content,
        })
    }

    pub fn id(&self) -> AttachmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime_type(&self) -> MimeType {
        self.mime_type
    }

    pub fn content(&self) -> &ContentBlock {
        &self.content
    }
}

impl fmt::Display for Attachment {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::ChatError;

    #[test]
    fn parse_rejects_unsupported_types() {
        let error = MimeType::parse("application/zip").expect_err("zip is not supported");
        assert!(matches!(error, ChatError::UnsupportedMimeType { .. }));
        assert_eq!(MimeType::parse("IMAGE/PNG").expect("png"), MimeType::Png);
    }

    #[test]
    fn extension_maps_to_mime_type() {
        assert_eq!(
            MimeType::from_path(Path::new("scan.JPG")).expect("jpg"),
            MimeType::Jpeg
        );
        assert_eq!(
            MimeType::from_path(Path::new("data.csv")).expect("csv"),
            MimeType::PlainText
        );
        assert!(MimeType::from_path(Path::new("archive.zip")).is_err());
        assert!(MimeType::from_path(Path::new("README")).is_err());
    }

    #[test]
    fn binary_attachment_is_base64_encoded() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(&[0x89, b'P', b'N', b'G']).expect("write png bytes");

        let attachment =
            Attachment::load(AttachmentId(1), file.path(), MimeType::Png).expect("load png");

        assert_eq!(
            attachment.content(),
            &ContentBlock::Image {
                mime_type: "image/png".to_string(),
                data_base64: BASE64.encode([0x89, b'P', b'N', b'G']),
            }
        );
    }

    #[test]
    fn text_attachment_is_read_verbatim() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "line one\nline two").expect("write text");

        let attachment = Attachment::load(AttachmentId(7), file.path(), MimeType::PlainText)
            .expect("load text");

        assert_eq!(attachment.content().as_text(), Some("line one\nline two"));
        assert_eq!(attachment.id(), AttachmentId(7));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let error = Attachment::load(
            AttachmentId(1),
            Path::new("/definitely/not/here.pdf"),
            MimeType::Pdf,
        )
        .expect_err("missing file");
        assert!(matches!(error, ChatError::ReadAttachment { .. }));
    }
}
