//! Downloader collaborator
//!
//! [`Downloader`] turns a job's source locator into local files. The only
//! implementation shells out to `yt-dlp`; the worker loop is written against
//! the trait so tests can substitute a fake.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::config::DownloaderConfig;

/// Preferred 720p..1080p streams, falling back through protocols and containers
const FORMAT_SELECTOR: &str = "bv[protocol=sabr][height>=720][height<=1080]+ba[protocol=sabr]\
/bestvideo[protocol=m3u8][height>=720][height<=1080]+bestaudio[protocol=m3u8]\
/(bestvideo[ext=mp4][height>=720][height<=1080]+bestaudio)\
/(best[ext=mp4][height>=720][height<=1080])";

/// Variant tag whose output is written with a `_v2` suffix
const RENAMED_VARIANT: &str = "v1";

const MEDIA_EXTENSION: &str = "mp4";
const SIDECAR_EXTENSION: &str = "info.json";

/// Keep this much of a failing child's stderr in the error
const STDERR_TAIL_BYTES: usize = 2000;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Failed to start {}: {source}", .binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Downloader exited with status {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("Downloader finished but {} was not produced", .expected.display())]
    MissingArtifact { expected: PathBuf },

    #[error("Download timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("Download cancelled by shutdown")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    /// Base file name the produced artifacts share (the job id)
    pub naming_hint: String,
    pub variant: Option<String>,
}

impl DownloadRequest {
    pub fn for_job(job: &harvest_common::Job) -> Self {
        Self {
            url: job.url.clone(),
            naming_hint: job.id.clone(),
            variant: job.version.clone(),
        }
    }

    /// Appended to `naming_hint` in every output file name
    pub fn suffix(&self) -> &'static str {
        match self.variant.as_deref() {
            Some(RENAMED_VARIANT) => "_v2",
            _ => "",
        }
    }

    fn stem(&self) -> String {
        format!("{}{}", self.naming_hint, self.suffix())
    }
}

/// One downloaded media file and its metadata sidecar, if written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub media: PathBuf,
    pub sidecar: Option<PathBuf>,
}

impl Artifact {
    /// Media first, then sidecar
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.media.as_path()).chain(self.sidecar.as_deref())
    }
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `request.url`. Partial files may be left behind on error.
    async fn download(&self, request: &DownloadRequest) -> Result<Vec<Artifact>, DownloadError>;
}

pub struct YtDlpDownloader {
    config: DownloaderConfig,
}

impl YtDlpDownloader {
    pub fn new(config: DownloaderConfig) -> Self {
        Self { config }
    }

    /// `yt-dlp --version`, for the startup log
    pub async fn version(&self) -> Result<String, DownloadError> {
        let output = Command::new(&self.config.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DownloadError::Spawn {
                binary: self.config.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DownloadError::ExitStatus {
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub(crate) fn build_args(&self, request: &DownloadRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--match-filter".into(),
            format!("duration>={}", self.config.min_duration_secs).into(),
        ];

        if let Some(cookies) = &self.config.cookies {
            args.push("--cookies".into());
            args.push(cookies.into());
        }

        args.extend(
            [
                "--write-info-json".to_string(),
                "-o".to_string(),
                output_template(request),
                "--sleep-requests".to_string(),
                self.config.sleep_requests.to_string(),
                "--sleep-interval".to_string(),
                self.config.sleep_interval.to_string(),
                "--extractor-args".to_string(),
                "youtube:formats=duplicate".to_string(),
                "-f".to_string(),
                FORMAT_SELECTOR.to_string(),
                "--remux-video".to_string(),
                MEDIA_EXTENSION.to_string(),
                "--".to_string(),
                request.url.clone(),
            ]
            .into_iter()
            .map(OsString::from),
        );

        args
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    #[instrument(skip(self), fields(url = %request.url))]
    async fn download(&self, request: &DownloadRequest) -> Result<Vec<Artifact>, DownloadError> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let args = self.build_args(request);
        debug!(binary = %self.config.binary.display(), ?args, "Spawning downloader");

        // Dropping the future (timeout, shutdown) kills the child.
        let output = Command::new(&self.config.binary)
            .args(&args)
            .current_dir(&self.config.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DownloadError::Spawn {
                binary: self.config.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DownloadError::ExitStatus {
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let artifacts = discover_artifacts(&self.config.work_dir, request).await?;
        info!(
            naming_hint = %request.naming_hint,
            artifacts = artifacts.len(),
            "Download finished"
        );
        Ok(artifacts)
    }
}

/// `<naming_hint><suffix>.%(ext)s`, with `%` escaped for yt-dlp
fn output_template(request: &DownloadRequest) -> String {
    format!("{}.%(ext)s", request.stem().replace('%', "%%"))
}

/// Locate `<stem>.mp4` and `<stem>.info.json` under `dir`.
///
/// The media file is required; the sidecar is optional.
pub async fn discover_artifacts(
    dir: &Path,
    request: &DownloadRequest,
) -> Result<Vec<Artifact>, DownloadError> {
    let stem = request.stem();
    let media = dir.join(format!("{stem}.{MEDIA_EXTENSION}"));
    let sidecar = dir.join(format!("{stem}.{SIDECAR_EXTENSION}"));

    if !tokio::fs::try_exists(&media).await? {
        return Err(DownloadError::MissingArtifact { expected: media });
    }

    let sidecar = tokio::fs::try_exists(&sidecar).await?.then_some(sidecar);

    Ok(vec![Artifact { media, sidecar }])
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
