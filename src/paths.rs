//! Length-safe absolute path forms.
//!
//! Normalization is a pure string/path transform: the working directory used to resolve
//! relative inputs is captured once when a normalizer is built, so repeated calls never touch
//! the filesystem and `normalize(normalize(p)) == normalize(p)` holds for every input.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

const VERBATIM_PREFIX: &str = r"\\?\";
const VERBATIM_UNC_PREFIX: &str = r"\\?\UNC\";
const UNC_PREFIX: &str = r"\\";

pub trait PathNormalizer: Send + Sync {
    fn normalize(&self, path: &Path) -> PathBuf;
    fn name(&self) -> &'static str;
}

/// Normalizer for the platform this binary runs on.
pub fn platform_normalizer() -> Arc<dyn PathNormalizer> {
    if cfg!(windows) {
        Arc::new(ExtendedLengthNormalizer::from_current_dir())
    } else {
        Arc::new(PosixNormalizer::from_current_dir())
    }
}

fn current_dir_or_dot() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Windows extended-length (`\\?\`) rewriting, implemented over plain strings so the rules are
/// the same on every host.
#[derive(Debug, Clone)]
pub struct ExtendedLengthNormalizer {
    base: String,
}

impl ExtendedLengthNormalizer {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().replace('/', "\\"),
        }
    }

    pub fn from_current_dir() -> Self {
        Self::new(current_dir_or_dot().to_string_lossy().into_owned())
    }

    pub fn normalize_str(&self, raw: &str) -> String {
        let raw = raw.replace('/', "\\");
        if raw.starts_with(VERBATIM_PREFIX) {
            return raw;
        }

        let absolute = if raw.starts_with(UNC_PREFIX) || is_drive_absolute(&raw) {
            raw
        } else if raw.starts_with('\\') {
            format!("{}{}", drive_of(&self.base), raw)
        } else if let Some(rest) = drive_relative_rest(&raw) {
            format!("{}\\{}", &raw[..2], rest)
        } else if raw.is_empty() {
            self.base.clone()
        } else {
            format!("{}\\{}", self.base.trim_end_matches('\\'), raw)
        };

        if let Some(share) = absolute.strip_prefix(UNC_PREFIX) {
            // server and share are never folded away by `..`
            return format!("{VERBATIM_UNC_PREFIX}{}", clean_segments(share, 2));
        }

        if absolute.len() >= 2 && absolute.as_bytes()[1] == b':' {
            let (drive, rest) = absolute.split_at(2);
            return format!("{VERBATIM_PREFIX}{drive}\\{}", clean_segments(rest, 0));
        }

        // A base that is neither drive nor share qualified (only seen when the working
        // directory itself could not be resolved): prefix what we have.
        format!("{VERBATIM_PREFIX}{}", clean_segments(&absolute, 0))
    }
}

impl PathNormalizer for ExtendedLengthNormalizer {
    fn normalize(&self, path: &Path) -> PathBuf {
        PathBuf::from(self.normalize_str(&path.to_string_lossy()))
    }

    fn name(&self) -> &'static str {
        "extended-length"
    }
}

fn is_drive_absolute(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\'
}

fn drive_relative_rest(raw: &str) -> Option<&str> {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        Some(&raw[2..])
    } else {
        None
    }
}

fn drive_of(base: &str) -> &str {
    if base.len() >= 2 && base.as_bytes()[1] == b':' {
        &base[..2]
    } else {
        ""
    }
}

/// Drop empty and `.` segments and fold `..`, never popping below `keep` leading segments.
fn clean_segments(raw: &str, keep: usize) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in raw.split('\\') {
        match segment {
            "" | "." => {}
            ".." => {
                if out.len() > keep {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    out.join("\\")
}

/// POSIX has no length prefix; the lexically clean absolute path is already the safe form.
#[derive(Debug, Clone)]
pub struct PosixNormalizer {
    base: PathBuf,
}

impl PosixNormalizer {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn from_current_dir() -> Self {
        Self::new(current_dir_or_dot())
    }
}

impl PathNormalizer for PosixNormalizer {
    fn normalize(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        };
        lexical_clean(&joined)
    }

    fn name(&self) -> &'static str {
        "posix"
    }
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}
