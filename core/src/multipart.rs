//! `multipart/form-data` body assembly.
//!
//! # Design
//! The boundary combines the current time in hex milliseconds with a random
//! UUID, and is regenerated in the unlikely case it appears inside any part.
//! Field parts come first in the caller's order, then one part per file.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::types::FileUpload;

pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

const DISPOSITION: &str = "Content-Disposition: form-data;";

/// An assembled multipart body and the boundary that delimits it.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBody {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("{MULTIPART_FORM_DATA}; boundary={}", self.boundary)
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Encode fields and files with a fresh boundary that occurs in none of them.
pub fn encode(fields: &[(String, String)], files: &[FileUpload]) -> MultipartBody {
    let mut boundary = generate_boundary();
    while collides(&boundary, fields, files) {
        boundary = generate_boundary();
    }
    let body = assemble(&boundary, fields, files);
    MultipartBody { boundary, body }
}

fn generate_boundary() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("{millis:x}{}", Uuid::new_v4().simple())
}

fn collides(boundary: &str, fields: &[(String, String)], files: &[FileUpload]) -> bool {
    let needle = boundary.as_bytes();
    fields
        .iter()
        .any(|(name, value)| contains(name.as_bytes(), needle) || contains(value.as_bytes(), needle))
        || files.iter().any(|file| {
            contains(&file.content, needle)
                || contains(file.file_name.as_bytes(), needle)
                || contains(file.effective_field_name().as_bytes(), needle)
        })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

pub(crate) fn assemble(boundary: &str, fields: &[(String, String)], files: &[FileUpload]) -> Vec<u8> {
    let delimiter = format!("--{boundary}\r\n");
    let mut body = Vec::new();

    for (name, value) in fields {
        body.extend_from_slice(delimiter.as_bytes());
        body.extend_from_slice(format!("{DISPOSITION} name=\"{name}\"\r\n\r\n").as_bytes());
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    for file in files {
        body.extend_from_slice(delimiter.as_bytes());
        body.extend_from_slice(
            format!(
                "{DISPOSITION} name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.effective_field_name(),
                file.file_name,
                file.mime_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(&file.content);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
