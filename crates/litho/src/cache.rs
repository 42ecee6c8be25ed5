//! The persistent result cache.
//!
//! A compiled script is snapshotted with postcard into `.{basename}.plb`
//! next to its source. A cache file is used only when it is newer than the
//! script and every transitive dependency is itself cached and older than
//! the cache. Any decode failure falls through to a full recompile and is
//! never surfaced to the user.
//!
//! Because trees are stored pristine and carry no back-references, a loaded
//! snapshot needs no rewiring beyond the format-version check.

use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{debug, warn};

use crate::{
    error::{CompileResult, Error},
    script::{CompileOptions, DependencyMap, Script},
};

const CACHE_VERSION: u8 = 1;

/// `${dir}/.${basename}.plb`, next to the script.
pub(crate) fn cache_path(script_path: &Path) -> Option<PathBuf> {
    let stem = script_path.file_stem()?;
    let dir = script_path.parent()?;
    Some(dir.join(format!(".{}.plb", stem.to_string_lossy())))
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok()?.modified().ok()
}

/// Whether `path` has a cache file newer than both the source and
/// `newer_than`.
fn is_path_cached(path: &Path, newer_than: Option<SystemTime>) -> bool {
    let Some(cache) = cache_path(path) else {
        return false;
    };
    let (Some(source_time), Some(cache_time)) = (mtime(path), mtime(&cache)) else {
        return false;
    };
    source_time < cache_time && newer_than.is_none_or(|n| n < cache_time)
}

/// Recursive freshness: every dependency is cached, and the newest mtime
/// along the dependency tree is older than each cache along the way.
fn dependencies_fresh(deps: &DependencyMap, newer_than: Option<SystemTime>) -> bool {
    let newest = deps
        .0
        .keys()
        .filter_map(|p| mtime(p))
        .chain(newer_than)
        .max();
    deps.0.iter().all(|(path, sub)| {
        is_path_cached(path, newest) && (sub.0.is_empty() || dependencies_fresh(sub, newest))
    })
}

/// Loads the cached script for `path` when the cache is valid, else `None`.
pub(crate) fn try_load(path: &Path, opts: &CompileOptions) -> Option<Script> {
    if opts.force_rerender || !is_path_cached(path, None) {
        return None;
    }
    let bytes = fs::read(cache_path(path)?).ok()?;
    let script = match decode(&bytes) {
        Ok(script) => script,
        Err(err) => {
            debug!(%err, "cache load failed, recompiling");
            return None;
        }
    };
    if !dependencies_fresh(&script.dependencies, None) {
        debug!(path = %path.display(), "at least one dependency is outdated, rerendering");
        return None;
    }
    Some(script)
}

fn decode(bytes: &[u8]) -> CompileResult<Script> {
    let (&version, payload) = bytes
        .split_first()
        .ok_or_else(|| Error::cache("empty cache file"))?;
    if version != CACHE_VERSION {
        return Err(Error::cache(format!("unknown cache format version {version}")));
    }
    postcard::from_bytes(payload).map_err(|e| Error::cache(e.to_string()))
}

/// Persists a compiled script. Failures only warn; the compile result is
/// already in hand.
pub(crate) fn store(script: &Script) {
    let Some(path) = cache_path(&script.path) else {
        return;
    };
    match postcard::to_allocvec(script) {
        Ok(mut bytes) => {
            bytes.insert(0, CACHE_VERSION);
            if let Err(err) = fs::write(&path, &bytes) {
                warn!(path = %path.display(), %err, "could not write cache file");
            }
        }
        Err(err) => warn!(%err, "could not serialize cache snapshot"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_is_hidden_sibling() {
        let p = cache_path(Path::new("/work/chip.pls")).unwrap();
        assert_eq!(p, PathBuf::from("/work/.chip.plb"));
    }

    #[test]
    fn decode_rejects_unknown_versions() {
        let err = decode(&[99, 1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cache);
    }
}
