use std::collections::HashMap;

use axum::extract::Multipart;
use bytes::Bytes;

use crate::error::{ApiError, ApiResult, FieldErrors};

const CLIP_FORMATS: &[&str] = &["video/mp4"];

/// An uploaded file held in memory.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// A fully read multipart body. Text fields may repeat; a repeated file
/// field keeps the last upload.
#[derive(Debug, Default)]
pub struct Form {
    fields: HashMap<String, Vec<String>>,
    files: HashMap<String, Upload>,
}

impl Form {
    pub async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Multipart form parse error - {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();
            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let content_type = field.content_type().map(str::to_string);
                    let data = field.bytes().await.map_err(|e| {
                        ApiError::BadRequest(format!("Failed to read file data: {}", e))
                    })?;
                    form.files.insert(
                        name,
                        Upload {
                            filename,
                            content_type,
                            data,
                        },
                    );
                }
                None => {
                    let text = field.text().await.map_err(|e| {
                        ApiError::BadRequest(format!("Failed to read form field: {}", e))
                    })?;
                    form.fields.entry(name).or_default().push(text);
                }
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn texts(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.remove(name)
    }
}

/// `2.0 MB` style sizes for validation messages.
pub fn human_readable_size(bytes: usize) -> String {
    let mut num = bytes as f64;
    for unit in ["bytes", "KB", "MB", "GB"] {
        if num < 1024.0 {
            return format!("{:.1} {}", num, unit);
        }
        num /= 1024.0;
    }
    format!("{:.1} TB", num)
}

fn check_size(errors: &mut FieldErrors, field: &str, upload: &Upload, max: usize) -> bool {
    if upload.data.len() > max {
        errors.add(
            field,
            format!(
                "Ensure this file's size is at most {} (it is {}).",
                human_readable_size(max),
                human_readable_size(upload.data.len())
            ),
        );
        return false;
    }
    true
}

/// Validate an image upload, recording problems under `field`.
pub fn check_image(errors: &mut FieldErrors, field: &str, upload: &Upload, max: usize) {
    if upload.data.is_empty() {
        errors.add(field, "The submitted file is empty.");
        return;
    }
    if let Some(ct) = &upload.content_type {
        if !ct.starts_with("image/") {
            errors.add(
                field,
                "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
            );
            return;
        }
    }
    check_size(errors, field, upload, max);
}

/// Validate an mp4 upload, recording problems under `field`.
pub fn check_clip(errors: &mut FieldErrors, field: &str, upload: &Upload, max: usize) {
    if upload.data.is_empty() {
        errors.add(field, "The submitted file is empty.");
        return;
    }
    if !check_size(errors, field, upload, max) {
        return;
    }
    if let Some(ct) = &upload.content_type {
        if !CLIP_FORMATS.contains(&ct.as_str()) {
            errors.add(
                field,
                format!("Upload a valid mp4 file. Detected file type: {}", ct),
            );
        }
    }
}
