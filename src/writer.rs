use crate::error::{Result, ShotgunError};
use chrono::{DateTime, Local, TimeZone, Utc};
use std::fmt::Display;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const FILENAME_PREFIX: &str = "shotgun_prompt_";
pub const FILENAME_EXTENSION: &str = ".md";
pub const MAX_COLLISION_ATTEMPTS: u32 = 1000;

/// `shotgun_prompt_<YYYYMMDD>_<HHMM>.md`
pub fn generate_filename<Tz>(time: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!(
        "{FILENAME_PREFIX}{}{FILENAME_EXTENSION}",
        time.format("%Y%m%d_%H%M")
    )
}

/// Writes `content` into `directory` (current directory when empty) under a
/// fresh timestamped name and returns the final path.
///
/// # Errors
///
/// - `ShotgunError::EmptyContent` if `content` is empty.
/// - `ShotgunError::DirectoryNotFound`, `NotADirectory` or `NotWritable` if the
///   directory fails validation.
/// - `ShotgunError::Write` if the temp write, sync or rename fails.
pub fn write_prompt_file(content: &str, directory: &Path) -> Result<PathBuf> {
    write_prompt_file_at(content, directory, &Local::now())
}

/// [`write_prompt_file`] with an explicit timestamp for the file name
///
/// # Errors
///
/// See [`write_prompt_file`].
pub fn write_prompt_file_at<Tz>(
    content: &str,
    directory: &Path,
    time: &DateTime<Tz>,
) -> Result<PathBuf>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if content.is_empty() {
        return Err(ShotgunError::EmptyContent);
    }
    let directory = resolve_directory(directory)?;
    validate_writable(&directory)?;

    let path = write_unique(&directory, &generate_filename(time), content.as_bytes())?;
    log::info!("wrote {} bytes to {}", content.len(), path.display());
    Ok(path)
}

fn resolve_directory(directory: &Path) -> Result<PathBuf> {
    if directory.as_os_str().is_empty() {
        Ok(std::env::current_dir()?)
    } else {
        Ok(directory.to_path_buf())
    }
}

/// Checks that `directory` exists, is a directory, and accepts a probe file
///
/// # Errors
///
/// `ShotgunError::DirectoryNotFound`, `NotADirectory` or `NotWritable`.
pub fn validate_writable(directory: &Path) -> Result<()> {
    let metadata = match fs::metadata(directory) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ShotgunError::DirectoryNotFound {
                path: directory.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(ShotgunError::NotWritable {
                path: directory.to_path_buf(),
                source,
            });
        }
    };
    if !metadata.is_dir() {
        return Err(ShotgunError::NotADirectory {
            path: directory.to_path_buf(),
        });
    }

    let probe = tempfile::Builder::new()
        .prefix(".shotgun_write_probe_")
        .tempfile_in(directory)
        .map_err(|source| ShotgunError::NotWritable {
            path: directory.to_path_buf(),
            source,
        })?;
    probe.close().map_err(|source| ShotgunError::NotWritable {
        path: directory.to_path_buf(),
        source,
    })
}

/// Names tried in order: `file`, `file_1` … `file_1000`, then nanosecond suffixes
pub fn candidate_names(file_name: &str) -> impl Iterator<Item = String> + '_ {
    let (stem, extension) = match file_name.rfind('.') {
        Some(dot) if dot > 0 => file_name.split_at(dot),
        _ => (file_name, ""),
    };
    let numbered = (1..=MAX_COLLISION_ATTEMPTS).map(move |n| format!("{stem}_{n}{extension}"));
    let timestamped = (0..MAX_COLLISION_ATTEMPTS)
        .map(move |_| format!("{stem}_{}{extension}", nanos_now()));
    std::iter::once(file_name.to_string())
        .chain(numbered)
        .chain(timestamped)
}

fn nanos_now() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Writes `bytes` to a private temp file in `directory`, syncs it, then links it
/// under the first free candidate name. An existing file is never replaced; a
/// name taken in the meantime moves on to the next candidate. The temp file is
/// removed on every exit path.
///
/// # Errors
///
/// `ShotgunError::Write` carrying the failing path.
pub fn write_unique(directory: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ShotgunError::Write { path, source }
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".shotgun_prompt_")
        .suffix(".tmp")
        .tempfile_in(directory)
        .map_err(write_err(directory))?;
    temp.write_all(bytes).map_err(write_err(temp.path()))?;
    temp.flush().map_err(write_err(temp.path()))?;
    temp.as_file().sync_all().map_err(write_err(temp.path()))?;

    for (attempt, name) in candidate_names(file_name).enumerate() {
        let path = directory.join(&name);
        match temp.persist_noclobber(&path) {
            Ok(_) => {
                if attempt > MAX_COLLISION_ATTEMPTS as usize {
                    log::warn!("{MAX_COLLISION_ATTEMPTS} name collisions for {file_name}, used {name}");
                }
                return Ok(path);
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                log::debug!("{} exists, trying next name", path.display());
                temp = e.file;
            }
            Err(e) => return Err(write_err(&path)(e.error)),
        }
    }

    Err(ShotgunError::Write {
        path: directory.join(file_name),
        source: io::Error::new(io::ErrorKind::AlreadyExists, "no free file name"),
    })
}
