//! Vocabulary tree resolution and download.
//!
//! `vocab_tree` matching needs a precomputed visual-word index. Users either
//! pass one explicitly or fetch the public Flickr100K tree once into the
//! per-user data directory, where later runs pick it up automatically.

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Public vocabulary tree published alongside COLMAP.
pub const DEFAULT_VOCAB_TREE_URL: &str =
    "https://demuc.de/colmap/vocab_tree_flickr100K_words32K.bin";

pub const VOCAB_TREE_EXTENSION: &str = "fbow";

const CACHE_FILE_NAME: &str = "vocab_tree.fbow";
const CHUNK_SIZE: usize = 64 * 1024;
const APP_DIR: &str = "nerfprep";

/// Per-user data directory: `$XDG_DATA_HOME/nerfprep`, falling back to
/// `~/.local/share/nerfprep`.
pub fn data_dir() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join(APP_DIR));
    }
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR)
    })
}

/// Where `vocab-tree fetch` stores the tree by default.
pub fn default_cache_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join(CACHE_FILE_NAME))
}

/// Check that `path` names a vocabulary tree file.
pub fn validate_path(path: &Path) -> Result<()> {
    let is_fbow = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e == VOCAB_TREE_EXTENSION)
        .unwrap_or(false);

    if !is_fbow {
        bail!(
            "Supplied vocab tree [{}] does not end with '.{}'; a valid vocab tree path is needed",
            path.display(),
            VOCAB_TREE_EXTENSION
        );
    }
    Ok(())
}

/// Pick the vocabulary tree for a run: the explicit path if given, else the
/// cached default when it exists on disk.
pub fn resolve(explicit: Option<&Path>, cached: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        validate_path(path)?;
        return Ok(path.to_path_buf());
    }

    match cached {
        Some(path) if path.is_file() => {
            tracing::debug!(path = %path.display(), "using cached vocab tree");
            Ok(path.to_path_buf())
        }
        _ => bail!(
            "matching_method is vocab_tree, so a vocab tree is needed: \
             pass --vocab-tree-path <file.{}> or run `nerfprep vocab-tree fetch`",
            VOCAB_TREE_EXTENSION
        ),
    }
}

/// Outcome of [`fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    AlreadyPresent(PathBuf),
    Downloaded { path: PathBuf, bytes: u64 },
}

/// Download the vocabulary tree at `url` to `dest`.
///
/// Skips the download when `dest` already exists unless `force` is set. The
/// body is streamed to a `.part` sibling that is renamed into place once
/// complete, so an interrupted download never leaves a truncated tree behind.
pub fn fetch(url: &str, dest: &Path, force: bool) -> Result<FetchOutcome> {
    validate_path(dest)?;

    if dest.exists() && !force {
        return Ok(FetchOutcome::AlreadyPresent(dest.to_path_buf()));
    }

    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(600))
        .build()?;

    tracing::info!(url, dest = %dest.display(), "downloading vocab tree");
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("Failed to request {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("Vocab tree download failed: HTTP {} from {}", status, url);
    }

    let total = response.content_length();
    let bytes = save_body(response, total, dest)
        .with_context(|| format!("Failed to download {}", url))?;

    Ok(FetchOutcome::Downloaded {
        path: dest.to_path_buf(),
        bytes,
    })
}

/// Stream `body` into `<dest>.part`, then rename it to `dest`. The `.part`
/// file is removed on every failure path.
fn save_body<R: Read>(body: R, total: Option<u64>, dest: &Path) -> Result<u64> {
    let part = part_path(dest);

    let result = stream_to_file(body, total, &part).and_then(|bytes| {
        if bytes == 0 {
            bail!("download was empty");
        }
        std::fs::rename(&part, dest)
            .with_context(|| format!("Failed to move {} into place", part.display()))?;
        Ok(bytes)
    });

    if result.is_err() {
        remove_part(&part);
    }
    result
}

fn stream_to_file<R: Read>(mut body: R, total: Option<u64>, part: &Path) -> Result<u64> {
    let bar = download_bar(total)?;

    let mut file = std::fs::File::create(part)
        .with_context(|| format!("Failed to create {}", part.display()))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;

    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                bar.abandon();
                return Err(anyhow::Error::new(e).context("Failed to read response body"));
            }
        };
        if let Err(e) = file.write_all(&buf[..n]) {
            bar.abandon();
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to write {}", part.display())));
        }
        written += n as u64;
        bar.set_position(written);
    }

    file.flush()
        .with_context(|| format!("Failed to write {}", part.display()))?;
    bar.finish_and_clear();
    Ok(written)
}

/// Byte progress on stderr; a spinner when the server sends no length.
/// Hidden automatically when stderr is not a terminal.
fn download_bar(total: Option<u64>) -> Result<ProgressBar> {
    let bar = match total {
        Some(len) => {
            let bar = ProgressBar::new(len);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} Downloading vocab tree [{bar:40.cyan/blue}] \
                     {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                )?
                .progress_chars("#>-"),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(ProgressStyle::with_template(
                "{spinner:.green} Downloading vocab tree {bytes} ({bytes_per_sec})",
            )?);
            bar
        }
    };
    Ok(bar)
}

fn remove_part(part: &Path) {
    if let Err(e) = std::fs::remove_file(part) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %part.display(), "could not remove partial download: {}", e);
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
