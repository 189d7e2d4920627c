//! Source references and materialization into local files.
//!
//! Remote and content-provider sources are streamed into the caller's
//! destination path, which then becomes the file that is decoded. Local files
//! are used in place.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Url;
use tokio::io::AsyncWriteExt;

use crate::config::AcquisitionConfig;
use crate::error::TaskError;
use crate::runner::run_blocking;

/// Scheme of content-provider handles.
pub const CONTENT_SCHEME: &str = "content";

/// Opens content-provider handles supplied by the host.
pub trait ContentResolver: Send + Sync {
    /// Open a byte stream for `uri` (a full `content://` reference).
    fn open(&self, uri: &str) -> std::io::Result<Box<dyn Read + Send>>;
}

/// A classified source reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Bare path or `file://` URL.
    File(PathBuf),
    /// `content://` handle, resolved by a [`ContentResolver`].
    Content(String),
    /// `http://` or `https://` URL.
    Remote(Url),
}

impl ImageSource {
    /// Classify a source reference.
    pub fn parse(reference: &str) -> Result<Self, TaskError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(TaskError::InvalidSource("empty source reference".to_string()));
        }

        let url = match Url::parse(reference) {
            Ok(url) => url,
            // Not a URL at all: a plain filesystem path
            Err(_) => return Ok(ImageSource::File(PathBuf::from(reference))),
        };

        match url.scheme() {
            "file" => url
                .to_file_path()
                .map(ImageSource::File)
                .map_err(|()| TaskError::InvalidSource(format!("not a local file URL: {reference}"))),
            CONTENT_SCHEME => Ok(ImageSource::Content(reference.to_string())),
            "http" | "https" => Ok(ImageSource::Remote(url)),
            // Windows drive letters parse as one-letter schemes
            scheme if scheme.len() == 1 => Ok(ImageSource::File(PathBuf::from(reference))),
            scheme => Err(TaskError::UnsupportedScheme(scheme.to_string())),
        }
    }

    /// Whether the source must be copied into a destination before decoding.
    pub fn needs_materialization(&self) -> bool {
        !matches!(self, ImageSource::File(_))
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::File(path) => write!(f, "{}", path.display()),
            ImageSource::Content(uri) => f.write_str(uri),
            ImageSource::Remote(url) => f.write_str(redact_url(url).as_str()),
        }
    }
}

/// Strip credentials and query parameters before logging.
fn redact_url(url: &Url) -> Url {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_query(None);
    url
}

/// Copies non-local sources into local files.
#[derive(Clone)]
pub struct Materializer {
    client: reqwest::Client,
    resolver: Option<Arc<dyn ContentResolver>>,
}

impl fmt::Debug for Materializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Materializer")
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

impl Materializer {
    /// Build the HTTP client from the acquisition settings.
    pub fn new(config: &AcquisitionConfig) -> Result<Self, TaskError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TaskError::InvalidInput(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            resolver: None,
        })
    }

    pub fn with_content_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Resolve `source` to a local file that can be decoded.
    ///
    /// Remote and content sources are written to `destination`, which is
    /// returned as the new source path.
    pub async fn materialize(
        &self,
        source: &ImageSource,
        destination: Option<&Path>,
    ) -> Result<PathBuf, TaskError> {
        match source {
            ImageSource::File(path) => {
                tokio::fs::metadata(path).await.map_err(|e| {
                    TaskError::InvalidSource(format!("cannot open {}: {e}", path.display()))
                })?;
                Ok(path.clone())
            }
            ImageSource::Remote(url) => {
                let destination = require_destination(source, destination)?;
                let bytes = self.download(url, destination).await?;
                log::debug!(
                    "source: downloaded {} bytes from {} to {}",
                    bytes,
                    source,
                    destination.display()
                );
                Ok(destination.to_path_buf())
            }
            ImageSource::Content(uri) => {
                let destination = require_destination(source, destination)?;
                let resolver = self.resolver.clone().ok_or_else(|| {
                    TaskError::InvalidSource(format!("no content resolver for {uri}"))
                })?;
                let bytes = copy_content(resolver, uri.clone(), destination.to_path_buf()).await?;
                log::debug!(
                    "source: copied {} bytes from {} to {}",
                    bytes,
                    uri,
                    destination.display()
                );
                Ok(destination.to_path_buf())
            }
        }
    }

    /// Stream the response body into `destination`.
    async fn download(&self, url: &Url, destination: &Path) -> Result<u64, TaskError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| {
                log::error!("source: request to {} failed: {}", redact_url(url), e);
                TaskError::InvalidSource(format!("cannot open {}: {e}", redact_url(url)))
            })?;

        if !response.status().is_success() {
            return Err(TaskError::InvalidSource(format!(
                "HTTP {} from {}",
                response.status().as_u16(),
                redact_url(url)
            )));
        }

        let mut file = tokio::fs::File::create(destination).await.map_err(|e| {
            log::error!("source: cannot create {}: {}", destination.display(), e);
            TaskError::IoFailure(e)
        })?;

        let mut written: u64 = 0;
        loop {
            let chunk = response.chunk().await.map_err(|e| {
                log::error!("source: body of {} interrupted: {}", redact_url(url), e);
                TaskError::IoFailure(std::io::Error::other(e))
            })?;
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

fn require_destination<'a>(
    source: &ImageSource,
    destination: Option<&'a Path>,
) -> Result<&'a Path, TaskError> {
    destination.ok_or_else(|| {
        TaskError::InvalidSource(format!("{source} needs a destination path"))
    })
}

async fn copy_content(
    resolver: Arc<dyn ContentResolver>,
    uri: String,
    destination: PathBuf,
) -> Result<u64, TaskError> {
    run_blocking(move || {
        let mut reader = resolver
            .open(&uri)
            .map_err(|e| TaskError::InvalidSource(format!("cannot open {uri}: {e}")))?;
        let mut file = std::fs::File::create(&destination).map_err(|e| {
            log::error!("source: cannot create {}: {}", destination.display(), e);
            TaskError::IoFailure(e)
        })?;
        let copied = std::io::copy(&mut reader, &mut file).map_err(|e| {
            log::error!("source: copying {} failed: {}", uri, e);
            TaskError::IoFailure(e)
        })?;
        Ok(copied)
    })
    .await
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: Absolute paths are always used in place, unchanged.
        #[test]
        fn prop_absolute_paths_are_files(segments in prop::collection::vec("[a-zA-Z0-9_.-]{1,12}", 1..5)) {
            let path = format!("/{}", segments.join("/"));
            prop_assert_eq!(
                ImageSource::parse(&path).unwrap(),
                ImageSource::File(PathBuf::from(&path))
            );
        }

        /// Property: http(s) references always become remote sources.
        #[test]
        fn prop_http_is_remote(
            secure in any::<bool>(),
            host in "[a-z]{1,10}\\.(com|org|net)",
            name in "[a-z0-9]{1,10}",
        ) {
            let scheme = if secure { "https" } else { "http" };
            let source = ImageSource::parse(&format!("{scheme}://{host}/{name}.jpg")).unwrap();
            prop_assert!(matches!(source, ImageSource::Remote(_)));
            prop_assert!(source.needs_materialization());
        }
    }
}
