//! Path and file helpers shared by credential loading, host-name lookup and
//! the CLI.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

const HOSTNAME_FILE: &str = "/etc/hostname";
const FALLBACK_HOSTNAME: &str = "localhost";

/// Returns the user's home directory from `HOME`, if set and UTF-8.
#[must_use]
pub fn home_dir() -> Option<Utf8PathBuf> {
    std::env::var("HOME")
        .ok()
        .filter(|home| !home.trim().is_empty())
        .map(Utf8PathBuf::from)
}

/// Expands a leading `~/` prefix against `home`.
///
/// Without a home directory the path is returned unchanged.
///
/// # Examples
///
/// ```
/// # use camino::Utf8Path;
/// # use stratus::util::expand_tilde;
/// let home = Utf8Path::new("/home/ops");
/// assert_eq!(expand_tilde("~/.ssh/id_rsa", Some(home)), "/home/ops/.ssh/id_rsa");
/// assert_eq!(expand_tilde("/absolute/path", Some(home)), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str, home: Option<&Utf8Path>) -> Utf8PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home_path) = home
    {
        return home_path.join(rest);
    }
    Utf8PathBuf::from(path)
}

/// Name of the machine running the worker.
///
/// Tries `HOSTNAME`, then `/etc/hostname`, then falls back to `localhost`.
#[must_use]
pub fn local_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME")
        && !name.trim().is_empty()
    {
        return name.trim().to_owned();
    }
    read_to_string_ambient(Utf8Path::new(HOSTNAME_FILE))
        .ok()
        .map(|content| content.trim().to_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_HOSTNAME.to_owned())
}

/// Reads a UTF-8 file through an ambient directory handle.
///
/// # Errors
///
/// Returns the I/O error message when the directory cannot be opened or the
/// file cannot be read as UTF-8.
pub fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let (dir, file) = split_path(path)?;
    dir.read_to_string(file).map_err(|err| err.to_string())
}

/// Writes `contents` to a file through an ambient directory handle,
/// replacing any previous content.
///
/// # Errors
///
/// Returns the I/O error message when the directory cannot be opened or the
/// write fails.
pub fn write_string_ambient(path: &Utf8Path, contents: &str) -> Result<(), String> {
    let (dir, file) = split_path(path)?;
    dir.write(file, contents).map_err(|err| err.to_string())
}

fn split_path(path: &Utf8Path) -> Result<(Dir, &Utf8Path), String> {
    let (dir_path, file_path) = if path.is_absolute() {
        let parent = path
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path}"))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    Ok((dir, file_path))
}
