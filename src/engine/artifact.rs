use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info};

/// Finalized recording plus sidecar metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Path to the recorded media
    pub path: PathBuf,

    /// Media duration in seconds (wall-clock estimate if the container can't be probed)
    pub duration_secs: f64,

    /// Number of tracks found in the container
    pub tracks: usize,

    /// File size in bytes
    pub size_bytes: u64,

    /// blake3 checksum of the file contents (hex)
    pub checksum: String,

    /// Whether the engine failed to confirm finalization
    pub partial: bool,

    /// When the capture started and ended
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Artifact {
    /// File name without extension, used to name derived files
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording".to_string())
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.stem())
    }
}

/// Container-level facts read with symphonia
struct ContainerInfo {
    duration_secs: Option<f64>,
    tracks: usize,
}

/// Build an artifact from the file at `path`
///
/// Fails only if the file is missing or unreadable. Truncated or unknown
/// containers still produce an artifact; duration then falls back to the
/// capture's wall-clock span.
pub fn probe_artifact(
    path: &Path,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    partial: bool,
) -> Result<Artifact> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Recording not found at {}", path.display()))?;

    let checksum = checksum_file(path)?;

    let wall_clock = ended_at
        .signed_duration_since(started_at)
        .num_milliseconds()
        .max(0) as f64
        / 1000.0;

    let (duration_secs, tracks) = match probe_container(path) {
        Ok(info) => (info.duration_secs.unwrap_or(wall_clock), info.tracks),
        Err(e) => {
            debug!("Could not probe {}: {:#}", path.display(), e);
            (wall_clock, 0)
        }
    };

    info!(
        "Artifact ready: {} ({:.1}s, {} tracks, {} bytes, partial={})",
        path.display(),
        duration_secs,
        tracks,
        metadata.len(),
        partial
    );

    Ok(Artifact {
        path: path.to_path_buf(),
        duration_secs,
        tracks,
        size_bytes: metadata.len(),
        checksum,
        partial,
        started_at,
        ended_at,
    })
}

fn checksum_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).context("Failed to read recording")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

fn probe_container(path: &Path) -> Result<ContainerInfo> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Unsupported or truncated container")?;

    let tracks = probed.format.tracks();

    let duration_secs = tracks
        .iter()
        .filter_map(|track| {
            let params = &track.codec_params;
            match (params.n_frames, params.time_base, params.sample_rate) {
                (Some(frames), Some(tb), _) => {
                    let time = tb.calc_time(frames);
                    Some(time.seconds as f64 + time.frac)
                }
                (Some(frames), None, Some(rate)) if rate > 0 => {
                    Some(frames as f64 / rate as f64)
                }
                _ => None,
            }
        })
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));

    Ok(ContainerInfo {
        duration_secs,
        tracks: tracks.len(),
    })
}
