// src/error.rs
//! Error types for the tile cache

use std::fmt;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Reasons a save request is refused before any download starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Estimated download exceeds the per-save cap.
    TooLarge { bytes: u64, max: u64 },
    /// A saved map with this (sanitised) name already exists.
    AlreadyExists(String),
    /// The catalog already holds the maximum number of saved maps.
    TooManyMaps { max: usize },
    /// The map has no current extent to cache.
    NoExtent,
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::TooLarge { bytes, max } => {
                write!(f, "Download size too large ({} bytes, max {} bytes)", bytes, max)
            }
            AdmissionError::AlreadyExists(name) => write!(f, "{} is already defined", name),
            AdmissionError::TooManyMaps { max } => {
                write!(f, "You have reached the maximum number of saved maps ({})", max)
            }
            AdmissionError::NoExtent => write!(f, "Map has no bounds, can't calculate download size"),
        }
    }
}

impl std::error::Error for AdmissionError {}

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Http(reqwest::Error),
    Image(image::ImageError),
    Xml(String),
    Admission(AdmissionError),
    Capabilities(String),
    TileFetch(String),
    Directory(String),
    Config(String),
    Other(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "IO error: {}", e),
            CacheError::Json(e) => write!(f, "JSON error: {}", e),
            CacheError::Http(e) => write!(f, "HTTP error: {}", e),
            CacheError::Image(e) => write!(f, "Image error: {}", e),
            CacheError::Xml(msg) => write!(f, "XML error: {}", msg),
            CacheError::Admission(e) => write!(f, "Save refused: {}", e),
            CacheError::Capabilities(msg) => write!(f, "Capabilities error: {}", msg),
            CacheError::TileFetch(msg) => write!(f, "Tile fetch error: {}", msg),
            CacheError::Directory(msg) => write!(f, "Storage directory error: {}", msg),
            CacheError::Config(msg) => write!(f, "Config error: {}", msg),
            CacheError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        CacheError::Io(error)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        CacheError::Json(error)
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(error: reqwest::Error) -> Self {
        CacheError::Http(error)
    }
}

impl From<image::ImageError> for CacheError {
    fn from(error: image::ImageError) -> Self {
        CacheError::Image(error)
    }
}

impl From<AdmissionError> for CacheError {
    fn from(error: AdmissionError) -> Self {
        CacheError::Admission(error)
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(error: anyhow::Error) -> Self {
        CacheError::Other(error.to_string())
    }
}
