use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart::{Form, Part};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::disposition;
use crate::error::{CdnError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const UPLOAD_ENDPOINT: &str = "add-file";
const DOWNLOAD_ENDPOINT: &str = "get-file";
const FILE_FIELD: &str = "pai_file";

/// Client for the HTTP file service.
///
/// Uploads go to `{base}/add-file` as a multipart form and come back with a
/// service-minted `cdn_key`; downloads query `{base}/get-file?cdn_key=...`.
#[derive(Clone)]
pub struct CdnClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl CdnClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| CdnError::Transfer(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.base_url)
    }

    /// Stream `archive` to the service and return the key it was stored under.
    pub async fn upload(&self, archive: &Path) -> Result<String> {
        let file_name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("archive")
            .to_string();
        let file = tokio::fs::File::open(archive).await.map_err(|e| {
            CdnError::Transfer(format!("failed to open {}: {e}", archive.display()))
        })?;
        let length = file
            .metadata()
            .await
            .map_err(|e| CdnError::Transfer(format!("failed to stat {}: {e}", archive.display())))?
            .len();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length).file_name(file_name.clone());
        let form = Form::new().part(FILE_FIELD, part);

        let url = self.endpoint(UPLOAD_ENDPOINT);
        info!(url = %url, file = %file_name, bytes = length, "Uploading archive");
        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CdnError::request(&format!("POST {url}"), e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CdnError::Transfer(format!(
                "POST {url} returned {status}: {body}"
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| CdnError::request("failed to read upload response", e))?;
        let cdn_key = parse_cdn_key(&body)?;
        debug!(cdn_key = %cdn_key, "upload accepted");
        Ok(cdn_key)
    }

    /// Fetch the object stored under `cdn_key` into `destination_dir`, named
    /// after the response's Content-Disposition header. Returns the written path.
    pub async fn download(&self, cdn_key: &str, destination_dir: &Path) -> Result<PathBuf> {
        self.fetch(cdn_key).await?.save(destination_dir).await
    }

    /// Send the download request and read the headers. The body is left
    /// unread until [`PendingDownload::save`].
    pub async fn fetch(&self, cdn_key: &str) -> Result<PendingDownload> {
        let url = self.endpoint(DOWNLOAD_ENDPOINT);
        info!(url = %url, cdn_key, "Downloading object");
        let resp = self
            .http
            .get(&url)
            .query(&[("cdn_key", cdn_key)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CdnError::request(&format!("GET {url}"), e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CdnError::NotFound(format!(
                "GET {url}?cdn_key={cdn_key} returned {status}"
            )));
        }

        let header = resp
            .headers()
            .get(CONTENT_DISPOSITION)
            .ok_or_else(|| {
                CdnError::Protocol("response has no Content-Disposition header".to_string())
            })?
            .to_str()
            .map_err(|_| {
                CdnError::Protocol("Content-Disposition header is not valid text".to_string())
            })?;
        let file_name = disposition::filename(header)?;

        Ok(PendingDownload { file_name, resp })
    }
}

/// A download whose headers have arrived.
pub struct PendingDownload {
    file_name: String,
    resp: reqwest::Response,
}

impl PendingDownload {
    /// Name the service gave the object.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Write the body to `destination_dir/<file name>` through a `.part` file.
    pub async fn save(self, destination_dir: &Path) -> Result<PathBuf> {
        let file_name = self.file_name;
        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(|e| CdnError::write(destination_dir, e))?;
        let target = destination_dir.join(&file_name);
        let partial = destination_dir.join(format!("{file_name}.part"));

        let written = match write_body(self.resp, &partial).await {
            Ok(written) => written,
            Err(err) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(err);
            }
        };
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| CdnError::write(&target, e))?;

        info!(path = %target.display(), bytes = written, "Download complete");
        Ok(target)
    }
}

fn parse_cdn_key(body: &[u8]) -> Result<String> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| CdnError::Protocol(format!("upload response is not JSON: {e}")))?;
    value
        .get("cdn_key")
        .and_then(|v| v.as_str())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CdnError::Protocol("upload response has no `cdn_key` field".to_string()))
}

async fn write_body(resp: reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| CdnError::write(path, e))?;

    let stream = resp.bytes_stream();
    futures::pin_mut!(stream);
    let mut written = 0u64;
    while let Some(chunk) = stream
        .try_next()
        .await
        .map_err(|e| CdnError::request("failed to read response body", e))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| CdnError::write(path, e))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(|e| CdnError::write(path, e))?;
    file.sync_all().await.map_err(|e| CdnError::write(path, e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn cdn_key_must_be_a_non_empty_string() {
        assert_eq!(parse_cdn_key(br#"{"cdn_key":"abc"}"#).unwrap(), "abc");
        assert!(matches!(
            parse_cdn_key(br#"{"cdn_key":42}"#),
            Err(CdnError::Protocol(_))
        ));
        assert!(matches!(
            parse_cdn_key(br#"{"other":"abc"}"#),
            Err(CdnError::Protocol(_))
        ));
        assert!(matches!(parse_cdn_key(b"<html>"), Err(CdnError::Protocol(_))));
    }

    #[tokio::test]
    async fn upload_sends_multipart_field_and_returns_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/add-file")
            .match_header(
                "content-type",
                Matcher::Regex("multipart/form-data".to_string()),
            )
            .match_body(Matcher::Regex(r#"name="pai_file""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"cdn_key":"7c2f8a60-fa1a-4b20-ba24-64423e4c5e5c"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("notes.txt.gz");
        std::fs::write(&archive, "plain text payload").unwrap();

        let client = CdnClient::new(&format!("{}/", server.url())).unwrap();
        let key = client.upload(&archive).await.unwrap();

        assert_eq!(key, "7c2f8a60-fa1a-4b20-ba24-64423e4c5e5c");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upload_error_status_is_a_transfer_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/add-file")
            .with_status(500)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.gz");
        std::fs::write(&archive, "x").unwrap();

        let client = CdnClient::new(&server.url()).unwrap();
        let err = client.upload(&archive).await.unwrap_err();
        assert!(matches!(err, CdnError::Transfer(_)));
    }

    #[tokio::test]
    async fn download_uses_disposition_name() {
        let mut server = mockito::Server::new_async().await;
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mock = server
            .mock("GET", "/get-file")
            .match_query(Matcher::UrlEncoded(
                "cdn_key".to_string(),
                "opaque-123".to_string(),
            ))
            .with_status(200)
            .with_header("content-disposition", r#"attachment; filename="data.tgz""#)
            .with_body(payload.clone())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("restore");
        let client = CdnClient::new(&server.url()).unwrap();
        let path = client.download("opaque-123", &dest).await.unwrap();

        assert_eq!(path, dest.join("data.tgz"));
        assert_eq!(std::fs::read(&path).unwrap(), payload);
        assert!(!dest.join("data.tgz.part").exists());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn download_missing_object_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/get-file")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = CdnClient::new(&server.url()).unwrap();
        let err = client.download("nope", dir.path()).await.unwrap_err();
        assert!(matches!(err, CdnError::NotFound(_)));
    }

    #[tokio::test]
    async fn download_without_disposition_writes_nothing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/get-file")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("bytes")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = CdnClient::new(&server.url()).unwrap();
        let err = client.download("k", dir.path()).await.unwrap_err();

        assert!(matches!(err, CdnError::Protocol(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn fetch_reads_name_before_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/get-file")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-disposition", "attachment; filename=report.gz")
            .with_body("zipped")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = CdnClient::new(&server.url()).unwrap();
        let pending = client.fetch("k").await.unwrap();
        assert_eq!(pending.file_name(), "report.gz");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let path = pending.save(dir.path()).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"zipped");
    }

    #[tokio::test]
    async fn download_stalled_server_times_out() {
        // accepts connections at the TCP level but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let client =
            CdnClient::with_timeout(&format!("http://{addr}"), Duration::from_millis(200)).unwrap();
        let err = client.download("k", dir.path()).await.unwrap_err();

        assert!(matches!(err, CdnError::Timeout(_)), "{err:?}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        drop(listener);
    }
}
