//! Image Resolver - Local, Remote and Inline References
//!
//! Every accepted reference form resolves to a path relative to the static
//! roots. Failures never cross the resolver boundary: they are logged and
//! collapsed to `None`.

use std::fs;
use std::time::Duration;

use base64::Engine;
use log::{debug, warn};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use uuid::Uuid;

use crate::locator::{StaticRoots, DOWNLOAD_SUBDIR};

/// 1x1 white PNG
pub const SINGLE_WHITE_PIXEL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mP8/x8AAwMCAO+ip1sAAAAASUVORK5CYII=";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Not an image (content-type '{0}')")]
    NotAnImage(String),

    #[error("Malformed data URI: {0}")]
    MalformedDataUri(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("No temporary static directory configured")]
    NoScratchRoot,
}

/// The three reference forms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Local,
    Remote,
    Inline,
}

impl ImageSource {
    pub fn classify(reference: &str) -> Self {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            Self::Remote
        } else if reference.starts_with("data:") {
            Self::Inline
        } else {
            Self::Local
        }
    }
}

/// Bytes fetched from a remote location
#[derive(Debug, Clone)]
pub struct Fetched {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Transport seam for remote references
pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<Fetched, ResolveError>;
}

/// Blocking HTTP(S) fetcher. Non-2xx responses are errors.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ResolveError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ResolveError::Fetch(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Fetched, ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ResolveError::Fetch(e.to_string()))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .map_err(|e| ResolveError::Fetch(e.to_string()))?;

        Ok(Fetched {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

/// Resolves image references into paths relative to the static roots.
pub struct ImageResolver {
    roots: StaticRoots,
    fetcher: Box<dyn ImageFetcher + Send + Sync>,
}

impl ImageResolver {
    pub fn new(roots: StaticRoots, fetcher: Box<dyn ImageFetcher + Send + Sync>) -> Self {
        Self { roots, fetcher }
    }

    /// Resolver backed by [`HttpFetcher`]
    pub fn with_http(roots: StaticRoots) -> Result<Self, ResolveError> {
        Ok(Self::new(roots, Box::new(HttpFetcher::new()?)))
    }

    pub fn roots(&self) -> &StaticRoots {
        &self.roots
    }

    /// Validation-only check. Local references are a plain existence check;
    /// remote and inline references can only be confirmed by resolving them.
    pub fn validate(&self, reference: &str) -> bool {
        match ImageSource::classify(reference) {
            ImageSource::Local => self.roots.exists(reference),
            _ => self.resolve(reference).is_some(),
        }
    }

    /// Resolve a reference to a relative path, or `None` if it is unavailable.
    pub fn resolve(&self, reference: &str) -> Option<String> {
        match self.try_resolve(reference) {
            Ok(path) => {
                debug!("Resolved image '{}' to '{}'", abbreviate(reference), path);
                Some(path)
            }
            Err(e) => {
                warn!("Invalid image '{}': {}", abbreviate(reference), e);
                None
            }
        }
    }

    fn try_resolve(&self, reference: &str) -> Result<String, ResolveError> {
        match ImageSource::classify(reference) {
            ImageSource::Local => {
                if self.roots.exists(reference) {
                    Ok(reference.to_string())
                } else {
                    Err(ResolveError::NotFound(reference.to_string()))
                }
            }
            ImageSource::Remote => {
                let fetched = self.fetcher.fetch(reference)?;
                let content_type = fetched.content_type.unwrap_or_default();
                let essence = media_essence(&content_type);
                if !essence.starts_with("image/") {
                    return Err(ResolveError::NotAnImage(content_type));
                }
                self.store(&essence, &fetched.bytes)
            }
            ImageSource::Inline => {
                let uri = DataUri::parse(reference)?;
                if !uri.media_type.starts_with("image/") {
                    return Err(ResolveError::NotAnImage(uri.media_type));
                }
                let bytes = uri.decode()?;
                self.store(&uri.media_type, &bytes)
            }
        }
    }

    fn store(&self, media_type: &str, bytes: &[u8]) -> Result<String, ResolveError> {
        let dir = self.roots.download_dir().ok_or(ResolveError::NoScratchRoot)?;
        let file_name = format!(
            "image-{}.{}",
            Uuid::new_v4().simple(),
            extension_for(media_type)
        );
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(&file_name), bytes)?;
        Ok(format!("{}/{}", DOWNLOAD_SUBDIR, file_name))
    }

    /// Encode a located local image as a base64 data URI.
    pub fn to_data_uri(&self, reference: &str) -> Option<String> {
        let path = self.roots.locate(reference)?;
        let bytes = fs::read(&path)
            .map_err(|e| warn!("Failed to read image '{}': {}", path.display(), e))
            .ok()?;
        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        Some(format!(
            "data:{};base64,{}",
            mime.essence_str(),
            base64::engine::general_purpose::STANDARD.encode(bytes)
        ))
    }
}

/// `data:<media-type>[;<param>]*[;<encoding>],<payload>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri<'a> {
    pub media_type: String,
    pub encoding: Option<String>,
    pub payload: &'a str,
}

impl<'a> DataUri<'a> {
    pub fn parse(uri: &'a str) -> Result<Self, ResolveError> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| ResolveError::MalformedDataUri("missing 'data:' scheme".into()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| ResolveError::MalformedDataUri("missing ',' before payload".into()))?;

        let mut parts = meta.split(';');
        let media_type = parts.next().map(media_essence).unwrap_or_default();
        if media_type.is_empty() {
            return Err(ResolveError::MalformedDataUri("missing media type".into()));
        }
        let encoding = parts
            .filter(|p| !p.contains('='))
            .last()
            .map(|p| p.trim().to_ascii_lowercase());

        Ok(Self {
            media_type,
            encoding,
            payload,
        })
    }

    pub fn decode(&self) -> Result<Vec<u8>, ResolveError> {
        use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

        match self.encoding.as_deref() {
            Some("base64") => STANDARD
                .decode(self.payload.trim())
                .map_err(|e| ResolveError::Decode(e.to_string())),
            Some("base64url") => URL_SAFE_NO_PAD
                .decode(self.payload.trim().trim_end_matches('='))
                .map_err(|e| ResolveError::Decode(e.to_string())),
            None | Some("utf8" | "utf-8" | "ascii" | "latin1" | "binary") => {
                Ok(self.payload.as_bytes().to_vec())
            }
            Some(other) => Err(ResolveError::Decode(format!("unsupported encoding '{}'", other))),
        }
    }
}

fn media_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// File extension for a media type, e.g. `image/jpeg` -> `jpeg`.
pub fn extension_for(media_type: &str) -> String {
    let essence = media_essence(media_type);
    if let Some(exts) = mime_guess::get_mime_extensions_str(&essence) {
        if let Some(ext) = exts.iter().find(|e| essence.ends_with(*e)).or(exts.first()) {
            return ext.to_string();
        }
    }
    let subtype: String = essence
        .split('/')
        .nth(1)
        .unwrap_or_default()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if subtype.is_empty() {
        "bin".to_string()
    } else {
        subtype
    }
}

fn abbreviate(reference: &str) -> &str {
    match reference.char_indices().nth(64) {
        Some((idx, _)) => &reference[..idx],
        None => reference,
    }
}
