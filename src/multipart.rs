//! Positional `multipart/form-data` encoding for OpenRosa submissions.
//!
//! Aggregate expects the instance document as the first part and every
//! attachment as a further part, each with an explicit
//! `Content-Transfer-Encoding: binary` header. The whole body is assembled
//! in memory; submissions are bounded by what the form carries.

use uuid::Uuid;

/// One part of a submission: the instance document or a file attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPart {
    /// Form-data part name.
    pub name: String,
    /// File name advertised in the part's disposition.
    pub filename: String,
    /// Raw part content.
    pub content: Vec<u8>,
    /// MIME type of the content.
    pub content_type: String,
}

impl SubmissionPart {
    /// Create a part from its four components.
    pub fn new(
        name: impl Into<String>,
        filename: impl Into<String>,
        content: Vec<u8>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
            content,
            content_type: content_type.into(),
        }
    }
}

/// An encoded multipart body plus the `Content-Type` header value that
/// carries its boundary.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    /// Value for the request's `Content-Type` header.
    pub content_type: String,
    /// Encoded body bytes.
    pub body: Vec<u8>,
}

/// Encode parts into a `multipart/form-data` body.
///
/// A fresh random boundary is generated per call; two encodings never share
/// one. Part order is preserved.
pub fn encode_multipart(parts: &[SubmissionPart]) -> MultipartBody {
    let boundary = format!(
        "----------------AggregateClient{}",
        Uuid::new_v4().simple()
    );
    encode_with_boundary(parts, &boundary)
}

fn encode_with_boundary(parts: &[SubmissionPart], boundary: &str) -> MultipartBody {
    let mut body = Vec::new();

    for part in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.name, part.filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n", part.content_type).as_bytes());
        body.extend_from_slice(b"Content-Transfer-Encoding: binary\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.content);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    MultipartBody {
        content_type: format!("multipart/form-data; boundary={boundary}"),
        body,
    }
}
