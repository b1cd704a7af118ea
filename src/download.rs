use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use futures::{Stream, StreamExt, stream::BoxStream};
use reqwest::{RequestBuilder, StatusCode};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::client::failure_reason;
use crate::error::B2Error;

#[derive(Clone, Debug, Default)]
pub struct DownloadProgress {
    pub bytes_written: u64,
    pub total_bytes: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct DownloadComplete {
    pub path: PathBuf,
    pub bytes_written: u64,
}

#[derive(Debug)]
pub enum DownloadEvent {
    Progress(DownloadProgress),
    Complete(DownloadComplete),
}

/// A download in flight. Nothing is written to the target until the whole
/// body has been received.
pub struct Download<'a> {
    target: &'a Path,
    events: BoxStream<'a, Result<DownloadEvent, B2Error>>,
}

impl<'a> Download<'a> {
    pub(crate) fn new(request: Result<RequestBuilder, B2Error>, target: &'a Path) -> Self {
        let events = async_stream::try_stream! {
            let response = request?
                .send()
                .await
                .map_err(|e| B2Error::download(target, "request failed", e))?;

            if response.status() != StatusCode::OK {
                let reason = failure_reason(response).await;
                Err(B2Error::Download {
                    target: target.to_path_buf(),
                    reason,
                    source: None,
                })?;
            } else {
                let total_bytes = response.content_length();
                debug!(path = %target.display(), ?total_bytes, "Receiving download");

                let body = response.bytes_stream().map(move |chunk| {
                    chunk.map_err(|e| B2Error::download(target, "connection interrupted", e))
                });
                let mut writes = write_atomically(body, total_bytes, target);
                while let Some(event) = writes.next().await {
                    yield event?;
                }
            }
        };

        Self {
            target,
            events: Box::pin(events),
        }
    }

    pub async fn next_event(&mut self) -> Option<Result<DownloadEvent, B2Error>> {
        self.events.next().await
    }

    /// Drives the download to the end without reporting progress.
    pub async fn finish(mut self) -> Result<DownloadComplete, B2Error> {
        while let Some(event) = self.next_event().await {
            if let DownloadEvent::Complete(complete) = event? {
                return Ok(complete);
            }
        }
        Err(self.ended_early())
    }

    pub fn ended_early(&self) -> B2Error {
        B2Error::Download {
            target: self.target.to_path_buf(),
            reason: "download ended before the body was written".to_string(),
            source: None,
        }
    }
}

/// Creates the temporary file a download is written to. It takes the mode of
/// an existing `target`, or the umask default for a new file.
fn create_temp_file(dir: &Path, target: &Path) -> io::Result<NamedTempFile> {
    let existing = fs::metadata(target).ok().map(|metadata| metadata.permissions());

    #[cfg_attr(not(unix), allow(unused_mut))]
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }

    let file = builder.tempfile_in(dir)?;
    if let Some(permissions) = existing {
        file.as_file().set_permissions(permissions)?;
    }
    Ok(file)
}

/// Streams `body` into a temporary file beside `target`, then renames it over
/// `target`. On any error the temporary file is removed and `target` is left
/// as it was.
pub fn write_atomically<'a, S, B>(
    body: S,
    total_bytes: Option<u64>,
    target: &'a Path,
) -> BoxStream<'a, Result<DownloadEvent, B2Error>>
where
    S: Stream<Item = Result<B, B2Error>> + Send + 'a,
    B: AsRef<[u8]> + Send + 'a,
{
    let stream = async_stream::try_stream! {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = create_temp_file(dir, target)
            .map_err(|e| B2Error::download(target, "unable to create temporary file", e))?;

        let mut bytes_written = 0u64;
        yield DownloadEvent::Progress(DownloadProgress {
            bytes_written,
            total_bytes,
        });

        tokio::pin!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let chunk = chunk.as_ref();
            file.write_all(chunk)
                .map_err(|e| B2Error::download(target, "unable to write temporary file", e))?;
            bytes_written += chunk.len() as u64;
            yield DownloadEvent::Progress(DownloadProgress {
                bytes_written,
                total_bytes,
            });
        }

        file.as_file()
            .sync_all()
            .map_err(|e| B2Error::download(target, "unable to flush temporary file", e))?;
        file.persist(target)
            .map_err(|e| B2Error::download(target, "unable to move download into place", e.error))?;

        info!(path = %target.display(), bytes_written, "Download complete");
        yield DownloadEvent::Complete(DownloadComplete {
            path: target.to_path_buf(),
            bytes_written,
        });
    };

    Box::pin(stream)
}
