use crate::core::{StreamError, StreamResult};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    LocalFile,
    Remote,
}

/// What the encoder actually reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveInput {
    pub kind: SourceKind,
    pub input: String,
}

impl EffectiveInput {
    /// Remote media URLs may expire or end, so only local files are looped.
    pub fn is_loopable(&self) -> bool {
        self.kind == SourceKind::LocalFile
    }
}

/// Classification is by prefix only; anything else is treated as a local path.
pub fn classify(source: &str) -> SourceKind {
    if source.starts_with("http://") || source.starts_with("https://") {
        SourceKind::Remote
    } else {
        SourceKind::LocalFile
    }
}

/// Turns a page URL (e.g. a YouTube link) into a directly playable media URL.
pub trait MediaExtractor: Send + Sync {
    fn extract_direct_media_url(&self, reference: &str) -> anyhow::Result<String>;
}

pub struct SourceResolver {
    extractor: Arc<dyn MediaExtractor>,
}

impl SourceResolver {
    pub fn new(extractor: Arc<dyn MediaExtractor>) -> Self {
        Self { extractor }
    }

    /// Re-checks the file or re-runs the extractor on every call; nothing is cached.
    pub fn resolve(&self, source: &str) -> StreamResult<EffectiveInput> {
        if source.is_empty() {
            return Err(StreamError::MissingField("Video path"));
        }

        match classify(source) {
            SourceKind::LocalFile => {
                if !Path::new(source).exists() {
                    return Err(StreamError::FileNotFound(source.to_string()));
                }
                Ok(EffectiveInput {
                    kind: SourceKind::LocalFile,
                    input: source.to_string(),
                })
            }
            SourceKind::Remote => {
                log::debug!("Extracting direct media URL for {}", source);
                let url = self
                    .extractor
                    .extract_direct_media_url(source)
                    .map_err(|e| StreamError::ResolutionFailed(e.to_string()))?;
                Ok(EffectiveInput {
                    kind: SourceKind::Remote,
                    input: url,
                })
            }
        }
    }
}

/// Extractor backed by the `yt-dlp` command line tool.
pub struct YtDlpExtractor {
    binary: PathBuf,
    timeout: Duration,
}

impl YtDlpExtractor {
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(binary: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.unwrap_or_else(|| PathBuf::from("yt-dlp")),
            timeout,
        }
    }

    fn command(&self, reference: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-playlist")
            .arg("--no-warnings")
            .arg("-f")
            .arg("best")
            .arg("-g")
            .arg(reference)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl MediaExtractor for YtDlpExtractor {
    fn extract_direct_media_url(&self, reference: &str) -> anyhow::Result<String> {
        let mut child = self.command(reference).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow::anyhow!("{} not found", self.binary.display())
            } else {
                anyhow::anyhow!("failed to run {}: {}", self.binary.display(), e)
            }
        })?;

        // Drain both pipes off-thread so a chatty child can never block on a full pipe.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow::anyhow!(
                    "yt-dlp did not answer within {}s",
                    self.timeout.as_secs()
                ));
            }
            thread::sleep(Self::POLL_INTERVAL);
        };

        let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
        let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

        if !status.success() {
            let detail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no output");
            return Err(anyhow::anyhow!("yt-dlp failed ({}): {}", status, detail.trim()));
        }

        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("yt-dlp returned no playable URL"))
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}
