//! Two-stage streamed relay: download the attachment to a scratch file, then
//! upload that file to the destination service.

use crate::error::RelayError;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::ReaderStream;

/// Buffer size for both stages; bounds the memory one transfer can hold.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Path appended to the destination base URL.
pub const UPLOAD_PATH: &str = "/api";

/// Multipart form field that carries the file.
pub const UPLOAD_FIELD: &str = "image";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one relay, ready to be shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct RelayResult {
    pub ok: bool,
    pub message: String,
    /// Parsed destination-service response on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

impl RelayResult {
    fn completed(target_filename: &str, response: serde_json::Value) -> Self {
        Self {
            ok: true,
            message: format!("Upload of {target_filename} complete: {response}"),
            response: Some(response),
        }
    }

    fn failed(err: &RelayError) -> Self {
        Self {
            ok: false,
            message: format!("File processing failed: {err}"),
            response: None,
        }
    }
}

/// Scratch file for one transfer.
///
/// [`ScratchFile::remove`] deletes it once the transfer settles. If the
/// transfer future is dropped before that (runtime shutdown), `Drop` unlinks
/// it synchronously instead.
struct ScratchFile {
    path: PathBuf,
    pending: bool,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            pending: true,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) {
        self.pending = false;
        log_removal(&self.path, tokio::fs::remove_file(&self.path).await);
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.pending {
            // Single unlink; only reached when the transfer was torn down mid-flight.
            log_removal(&self.path, std::fs::remove_file(&self.path));
        }
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::trace!(path = %path.display(), "scratch file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), err = %e, "failed to remove scratch file"),
    }
}

/// Streams files from a source URL to the destination service via local scratch storage.
pub struct TransferPipeline {
    http: reqwest::Client,
    scratch_dir: PathBuf,
}

impl TransferPipeline {
    pub fn new(scratch_dir: PathBuf) -> Self {
        let http = match reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(err = %e, "http client setup failed, using defaults without connect timeout");
                reqwest::Client::new()
            }
        };
        Self::with_client(http, scratch_dir)
    }

    pub fn with_client(http: reqwest::Client, scratch_dir: PathBuf) -> Self {
        Self { http, scratch_dir }
    }

    /// Scratch location for one transfer. `scratch_key` keeps concurrent
    /// sessions apart; only the final component of `target_filename` is used.
    pub fn scratch_path(&self, scratch_key: &str, target_filename: &str) -> PathBuf {
        let name = Path::new(target_filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        self.scratch_dir.join(format!("{scratch_key}-{name}"))
    }

    /// Download `source_url` and upload it as `target_filename`. Never fails;
    /// errors are folded into the returned [`RelayResult`].
    pub async fn relay(
        &self,
        source_url: &str,
        target_filename: &str,
        scratch_key: &str,
        destination_base_url: &str,
    ) -> RelayResult {
        match self
            .try_relay(source_url, target_filename, scratch_key, destination_base_url)
            .await
        {
            Ok(response) => RelayResult::completed(target_filename, response),
            Err(e) => {
                tracing::warn!(source = %source_url, file = %target_filename, err = %e, "relay failed");
                RelayResult::failed(&e)
            }
        }
    }

    /// Same as [`TransferPipeline::relay`] but keeps the typed error.
    pub async fn try_relay(
        &self,
        source_url: &str,
        target_filename: &str,
        scratch_key: &str,
        destination_base_url: &str,
    ) -> Result<serde_json::Value, RelayError> {
        let scratch = ScratchFile::new(self.scratch_path(scratch_key, target_filename));
        let result = self
            .relay_via(scratch.path(), source_url, target_filename, destination_base_url)
            .await;
        scratch.remove().await;
        result
    }

    async fn relay_via(
        &self,
        scratch: &Path,
        source_url: &str,
        target_filename: &str,
        destination_base_url: &str,
    ) -> Result<serde_json::Value, RelayError> {
        let bytes = self.download(source_url, scratch).await?;
        tracing::info!(file = %target_filename, bytes, "download complete");
        self.upload(scratch, target_filename, destination_base_url)
            .await
    }

    /// Stream `url` into `dest`. Requires HTTP 200. Returns the byte count.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, RelayError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::DownloadIo(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(RelayError::Download { status });
        }

        let file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| RelayError::DownloadIo(format!("create scratch file: {e}")))?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut body = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| RelayError::DownloadIo(e.to_string()))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| RelayError::DownloadIo(format!("write scratch file: {e}")))?;
            written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|e| RelayError::DownloadIo(format!("flush scratch file: {e}")))?;
        Ok(written)
    }

    /// Stream `path` to `{destination_base_url}/api` as a multipart upload.
    /// Requires HTTP 200 and returns the JSON response body.
    pub async fn upload(
        &self,
        path: &Path,
        target_filename: &str,
        destination_base_url: &str,
    ) -> Result<serde_json::Value, RelayError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| RelayError::UploadIo(format!("open scratch file: {e}")))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| RelayError::UploadIo(format!("stat scratch file: {e}")))?
            .len();
        let body = reqwest::Body::wrap_stream(ReaderStream::with_capacity(file, CHUNK_SIZE));
        let part = Part::stream_with_length(body, len).file_name(target_filename.to_string());
        let form = Form::new().part(UPLOAD_FIELD, part);

        let url = upload_url(destination_base_url);
        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::UploadIo(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(%url, %status, body = %body, "destination rejected upload");
            return Err(RelayError::Upload { status, body });
        }

        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| RelayError::UploadIo(format!("invalid response body: {e}")))
    }
}

fn upload_url(destination_base_url: &str) -> String {
    format!("{}{UPLOAD_PATH}", destination_base_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    /// Three chunks' worth of non-repeating bytes.
    fn payload() -> Vec<u8> {
        (0..3 * CHUNK_SIZE).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn upload_url_joins_base() {
        assert_eq!(upload_url("http://disk"), "http://disk/api");
        assert_eq!(upload_url("http://disk/"), "http://disk/api");
    }

    #[test]
    fn scratch_path_stays_in_scratch_dir() {
        let pipeline = TransferPipeline::new(PathBuf::from("/scratch"));
        assert_eq!(
            pipeline.scratch_path("s1", "report.pdf"),
            PathBuf::from("/scratch/s1-report.pdf")
        );
        assert_eq!(
            pipeline.scratch_path("s1", "../../etc/passwd"),
            PathBuf::from("/scratch/s1-passwd")
        );
        assert_eq!(
            pipeline.scratch_path("s1", ".."),
            PathBuf::from("/scratch/s1-upload.bin")
        );
    }

    #[test]
    fn scratch_paths_differ_per_session() {
        let pipeline = TransferPipeline::new(PathBuf::from("/scratch"));
        assert_ne!(
            pipeline.scratch_path("s1", "a.zip"),
            pipeline.scratch_path("s2", "a.zip")
        );
    }

    #[tokio::test]
    async fn download_streams_body_to_file() {
        let server = MockServer::start().await;
        let body = payload();
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pipeline = TransferPipeline::new(dir.path().to_path_buf());
        let dest = dir.path().join("out.bin");
        let written = pipeline
            .download(&format!("{}/x", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn relay_uploads_and_returns_response() {
        let server = MockServer::start().await;
        let body = payload();
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "abc"})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pipeline = TransferPipeline::new(dir.path().to_path_buf());
        let result = pipeline
            .relay(
                &format!("{}/x", server.uri()),
                "archive.zip",
                "s1",
                &server.uri(),
            )
            .await;

        assert!(result.ok, "{}", result.message);
        assert!(result.message.contains("abc"));
        assert_eq!(result.response.unwrap()["id"], "abc");
        assert_eq!(scratch_entries(dir.path()), 0);

        let requests = server.received_requests().await.unwrap();
        let upload = requests
            .iter()
            .find(|r| r.method.as_str() == "POST")
            .unwrap();
        let text = String::from_utf8_lossy(&upload.body);
        assert!(text.contains("name=\"image\""));
        assert!(text.contains("filename=\"archive.zip\""));
        assert!(upload.body.len() > body.len());
    }

    #[tokio::test]
    async fn download_404_skips_upload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pipeline = TransferPipeline::new(dir.path().to_path_buf());
        let err = pipeline
            .try_relay(
                &format!("{}/missing", server.uri()),
                "a.zip",
                "s1",
                &server.uri(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RelayError::Download { status } if status == StatusCode::NOT_FOUND
        ));
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn upload_error_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pipeline = TransferPipeline::new(dir.path().to_path_buf());
        let err = pipeline
            .try_relay(&format!("{}/x", server.uri()), "a.zip", "s1", &server.uri())
            .await
            .unwrap_err();

        match err {
            RelayError::Upload { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "disk full");
            }
            other => panic!("expected upload error, got {other:?}"),
        }
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn upload_error_body_reaches_the_user_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(507).set_body_string("quota exceeded for bucket"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pipeline = TransferPipeline::new(dir.path().to_path_buf());
        let result = pipeline
            .relay(&format!("{}/x", server.uri()), "a.zip", "s1", &server.uri())
            .await;

        assert!(!result.ok);
        assert!(result.message.contains("507"), "{}", result.message);
        assert!(result.message.contains("quota exceeded"), "{}", result.message);
    }

    /// Serve one GET with a 200 header promising three chunks, send one, then
    /// either close the connection or stall with it open.
    async fn short_body_source(stall: bool) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = sock.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
                3 * CHUNK_SIZE
            );
            sock.write_all(head.as_bytes()).await.unwrap();
            sock.write_all(&vec![1u8; CHUNK_SIZE]).await.unwrap();
            sock.flush().await.unwrap();
            if stall {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
        format!("http://{addr}/x")
    }

    #[tokio::test]
    async fn connection_lost_mid_download_is_download_io() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = TransferPipeline::new(dir.path().to_path_buf());
        let source = short_body_source(false).await;

        let err = pipeline
            .try_relay(&source, "big.bin", "s1", "http://127.0.0.1:1")
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::DownloadIo(_)), "{err:?}");
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn dropped_transfer_removes_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = TransferPipeline::new(dir.path().to_path_buf());
        let source = short_body_source(true).await;

        let outcome = tokio::time::timeout(
            Duration::from_millis(500),
            pipeline.try_relay(&source, "big.bin", "s1", "http://127.0.0.1:1"),
        )
        .await;

        assert!(outcome.is_err(), "transfer should still be stalled");
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn unreachable_source_is_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = TransferPipeline::new(dir.path().to_path_buf());
        let result = pipeline
            .relay("http://127.0.0.1:1/x", "a.zip", "s1", "http://127.0.0.1:1")
            .await;

        assert!(!result.ok);
        assert!(result.message.contains("download failed"), "{}", result.message);
        assert_eq!(scratch_entries(dir.path()), 0);
    }
}
