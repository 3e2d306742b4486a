// Client-supplied files (image_url parts) prepared for upload
// Author: kelexine (https://github.com/kelexine)

use crate::error::{ProxyError, Result};
use crate::models::upstream::{Attachment, OutboundAsset};
use base64::Engine;
use bytes::Bytes;
use sha2::{Digest, Sha256};

const MULTIMODAL_TYPES: &[&str] = &["image/jpeg", "image/webp", "image/png", "image/gif"];

/// Document types the upstream indexes for retrieval, with their extensions.
const DOCUMENT_TYPES: &[(&str, &str)] = &[
    ("text/x-php", ".php"),
    ("application/msword", ".doc"),
    ("text/x-c", ".c"),
    ("text/html", ".html"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".docx",
    ),
    ("application/json", ".json"),
    ("text/javascript", ".js"),
    ("application/pdf", ".pdf"),
    ("text/x-java", ".java"),
    ("text/x-tex", ".tex"),
    ("text/x-typescript", ".ts"),
    ("text/x-sh", ".sh"),
    ("text/x-csharp", ".cs"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ".pptx",
    ),
    ("text/x-c++", ".cpp"),
    ("application/x-latext", ".latex"),
    ("text/markdown", ".md"),
    ("text/plain", ".txt"),
    ("text/x-ruby", ".rb"),
    ("text/x-script.python", ".py"),
];

/// Bytes of one client file and the MIME type it was declared with.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl InputFile {
    /// Decode a `data:<mime>;base64,<payload>` URI.
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| ProxyError::InvalidRequest("not a data URI".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| ProxyError::InvalidRequest("data URI has no payload".to_string()))?;
        let mime_type = header.split(';').next().unwrap_or_default().trim().to_string();

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| {
                ProxyError::InvalidRequest(format!("Invalid base64 data for {}: {}", mime_type, e))
            })?;

        Ok(Self {
            bytes: Bytes::from(bytes),
            mime_type,
        })
    }
}

/// Upload category the files endpoint expects for a MIME type.
pub fn use_case(mime_type: &str) -> &'static str {
    if MULTIMODAL_TYPES.contains(&mime_type) {
        "multimodal"
    } else if is_document(mime_type) {
        "my_files"
    } else {
        "ace_upload"
    }
}

fn is_document(mime_type: &str) -> bool {
    DOCUMENT_TYPES.iter().any(|(mime, _)| *mime == mime_type)
}

/// File extension (with the dot) for a MIME type, or empty when unknown.
pub fn extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        other => DOCUMENT_TYPES
            .iter()
            .find(|(mime, _)| *mime == other)
            .map(|(_, ext)| *ext)
            .unwrap_or(""),
    }
}

/// Name a file by the SHA-256 of its content.
pub fn content_name(bytes: &[u8], mime_type: &str) -> String {
    let digest = Sha256::digest(bytes);
    format!("{}{}", hex::encode(digest), extension(mime_type))
}

/// Pixel size read from the image header (PNG, GIF, WebP, JPEG).
pub fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") && data.len() >= 24 && &data[12..16] == b"IHDR" {
        return Some((be32(&data[16..20]), be32(&data[20..24])));
    }
    if (data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a")) && data.len() >= 10 {
        let width = u16::from_le_bytes([data[6], data[7]]);
        let height = u16::from_le_bytes([data[8], data[9]]);
        return Some((width.into(), height.into()));
    }
    if data.len() >= 30 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return webp_dimensions(data);
    }
    if data.starts_with(b"\xFF\xD8") {
        return jpeg_dimensions(data);
    }
    None
}

fn be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le24(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16
}

fn webp_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    match &data[12..16] {
        b"VP8X" => Some((1 + le24(&data[24..27]), 1 + le24(&data[27..30]))),
        b"VP8 " => {
            let width = u16::from_le_bytes([data[26], data[27]]) & 0x3fff;
            let height = u16::from_le_bytes([data[28], data[29]]) & 0x3fff;
            Some((width.into(), height.into()))
        }
        b"VP8L" => {
            let b = &data[21..25];
            let width = 1 + (u32::from(b[0]) | (u32::from(b[1]) & 0x3f) << 8);
            let height = 1
                + (u32::from(b[1]) >> 6 | u32::from(b[2]) << 2 | (u32::from(b[3]) & 0x0f) << 10);
            Some((width, height))
        }
        _ => None,
    }
}

fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 4 <= data.len() {
        if data[i] != 0xFF {
            return None;
        }
        let marker = data[i + 1];
        // Fill bytes and standalone markers carry no length.
        if marker == 0xFF {
            i += 1;
            continue;
        }
        if marker == 0x01 || (0xD0..=0xD9).contains(&marker) {
            i += 2;
            continue;
        }
        let length = usize::from(u16::from_be_bytes([data[i + 2], data[i + 3]]));
        let is_frame = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame {
            if i + 9 > data.len() {
                return None;
            }
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]);
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]);
            return Some((width.into(), height.into()));
        }
        i += 2 + length;
    }
    None
}

/// A file accepted by the upstream files service.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub file_id: String,
    pub file_name: String,
    pub size_bytes: usize,
    /// MIME type as registered; empty for unrecognized uploads.
    pub mime_type: String,
    pub dimensions: Option<(u32, u32)>,
}

impl UploadedFile {
    /// Asset-pointer part for images, `None` for other files.
    pub fn asset_part(&self) -> Option<OutboundAsset> {
        let (width, height) = self.dimensions?;
        if !self.mime_type.starts_with("image/") {
            return None;
        }
        Some(OutboundAsset {
            asset_pointer: format!("file-service://{}", self.file_id),
            size_bytes: self.size_bytes,
            width,
            height,
        })
    }

    pub fn attachment(&self) -> Attachment {
        let image = self.mime_type.starts_with("image/");
        Attachment {
            name: self.file_name.clone(),
            id: self.file_id.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size_bytes,
            width: self.dimensions.filter(|_| image).map(|(w, _)| w),
            height: self.dimensions.filter(|_| image).map(|(_, h)| h),
            file_token_size: is_document(&self.mime_type).then_some(self.file_name.len()),
        }
    }
}
