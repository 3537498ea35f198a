//! External metadata tool bridge (exiftool)
//!
//! Spawning the tool is expensive, so all fields for a file are read in one
//! invocation (`-j` JSON output) and all field writes go into one invocation.
//! Multi-valued fields are written by clearing the field first (an empty
//! assignment) and then appending each value, so the write replaces rather
//! than merges the tool-side list.

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

use crate::types::{FileMetadata, MetadataValue, ShapeEntry};

/// External tool invocation errors
#[derive(Debug, Error)]
pub enum ExifToolError {
    /// Failed to spawn the tool binary
    #[error("failed to execute {binary}: {message}")]
    Execution { binary: String, message: String },

    /// The tool ran but exited unsuccessfully
    #[error("exiftool exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    /// The tool's output was not the expected JSON
    #[error("failed to parse exiftool output: {0}")]
    Parse(String),

    /// The tool returned no entry for the requested file
    #[error("exiftool returned no entry for the requested file")]
    EmptyOutput,
}

/// Batched read/write bridge to the external metadata tool.
pub struct ExifTool {
    binary: String,
}

impl ExifTool {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Read all fields of `shape` from `path` in a single tool invocation.
    ///
    /// Missing response fields default to an empty string (single-valued) or
    /// an empty sequence (multi-valued); scalar responses for multi-valued
    /// fields are coerced into a one-element sequence.
    pub async fn read(
        &self,
        path: &Path,
        shape: &'static [ShapeEntry],
    ) -> Result<FileMetadata, ExifToolError> {
        let stdout = self.invoke(read_args(path, shape)).await?;
        parse_read_output(&stdout, shape)
    }

    /// Write all fields of `shape` to `path` in a single tool invocation,
    /// overwriting the file in place.
    pub async fn write(
        &self,
        path: &Path,
        shape: &'static [ShapeEntry],
        values: &FileMetadata,
    ) -> Result<(), ExifToolError> {
        self.invoke(write_args(path, shape, values)).await?;
        Ok(())
    }

    async fn invoke(&self, args: Vec<OsString>) -> Result<String, ExifToolError> {
        let binary = self.binary.clone();
        tracing::debug!(binary = %binary, args = args.len(), "invoking exiftool");

        let output = tokio::task::spawn_blocking({
            let binary = binary.clone();
            move || Command::new(&binary).args(&args).output()
        })
        .await
        .map_err(|e| ExifToolError::Execution {
            binary: binary.clone(),
            message: format!("task join error: {}", e),
        })?
        .map_err(|e| ExifToolError::Execution {
            binary: binary.clone(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(ExifToolError::Failed {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn read_args(path: &Path, shape: &[ShapeEntry]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![path.as_os_str().to_os_string(), "-j".into()];
    args.extend(shape.iter().map(|entry| entry.request.into()));
    args
}

fn write_args(path: &Path, shape: &[ShapeEntry], values: &FileMetadata) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        path.as_os_str().to_os_string(),
        "-overwrite_original_in_place".into(),
    ];
    for entry in shape {
        let value = values
            .get(entry.id)
            .cloned()
            .unwrap_or_else(|| MetadataValue::empty(entry.multi));
        match value {
            MetadataValue::Multi(items) => {
                // Empty assignment clears the tool-side list before appending
                args.push(format!("{}=", entry.request).into());
                for item in items {
                    args.push(format!("{}={}", entry.request, item).into());
                }
            }
            MetadataValue::Single(item) => {
                args.push(format!("{}={}", entry.request, item).into());
            }
        }
    }
    args
}

fn parse_read_output(
    stdout: &str,
    shape: &'static [ShapeEntry],
) -> Result<FileMetadata, ExifToolError> {
    let parsed: serde_json::Value =
        serde_json::from_str(stdout).map_err(|e| ExifToolError::Parse(e.to_string()))?;
    let record = parsed
        .as_array()
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.as_object())
        .ok_or(ExifToolError::EmptyOutput)?;

    let mut values = FileMetadata::new();
    for entry in shape {
        let raw = record.get(entry.response);
        let value = if entry.multi {
            let items = match raw {
                None | Some(serde_json::Value::Null) => Vec::new(),
                Some(serde_json::Value::Array(items)) => {
                    items.iter().map(scalar_to_string).collect()
                }
                Some(scalar) => vec![scalar_to_string(scalar)],
            };
            MetadataValue::Multi(items)
        } else {
            let item = match raw {
                None | Some(serde_json::Value::Null) => String::new(),
                Some(scalar) => scalar_to_string(scalar),
            };
            MetadataValue::Single(item)
        };
        values.insert(entry.id.to_string(), value);
    }
    Ok(values)
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
