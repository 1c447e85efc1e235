// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Measurement-set lists. A list file contains one measurement-set path per
//! line; the order of entries is significant and preserved.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use thiserror::Error;
use vec1::Vec1;

/// The suffix DDF appends to a path to name its cache directory.
const CACHE_SUFFIX: &str = ".ddfcache";

/// An ordered, non-empty collection of measurement sets, read once from a
/// list file at pipeline start. The list itself is immutable for the whole
/// run; only the per-entry cache directories are ever touched.
#[derive(Debug, Clone)]
pub(crate) struct MsList {
    /// The path of the list file itself (used to name the list-level cache
    /// directory and passed verbatim to the external tools).
    path: PathBuf,

    entries: Vec1<PathBuf>,
}

impl MsList {
    /// Read a measurement-set list file. Lines are whitespace-stripped and
    /// blank lines are discarded.
    pub(crate) fn read<P: AsRef<Path>>(path: P) -> Result<MsList, MsListError> {
        let path = path.as_ref();
        let contents = read_to_string(path).map_err(|err| MsListError::Read {
            path: path.to_path_buf(),
            err,
        })?;
        let entries: Vec<PathBuf> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect();
        let entries = Vec1::try_from_vec(entries).map_err(|_| MsListError::Empty {
            path: path.to_path_buf(),
        })?;
        Ok(MsList {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn entries(&self) -> &Vec1<PathBuf> {
        &self.entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// The list-level DDF cache directory, resolved under `cache_base` when
    /// one is configured.
    pub(crate) fn cache_dir(&self, cache_base: Option<&Path>) -> PathBuf {
        cache_path(cache_base, &self.path)
    }

    /// Every per-entry DDF cache directory, in list order.
    pub(crate) fn entry_cache_dirs(
        &self,
        cache_base: Option<&Path>,
    ) -> impl Iterator<Item = PathBuf> + '_ {
        let cache_base = cache_base.map(Path::to_path_buf);
        self.entries
            .iter()
            .map(move |ms| cache_path(cache_base.as_deref(), ms))
    }
}

/// `<target>.ddfcache`, joined onto the cache base directory when one is set.
/// DDF itself creates these names relative to its `--Cache-Dir`.
fn cache_path(cache_base: Option<&Path>, target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(CACHE_SUFFIX);
    match cache_base {
        Some(base) => base.join(name),
        None => PathBuf::from(name),
    }
}

#[derive(Error, Debug)]
pub(crate) enum MsListError {
    #[error("Couldn't read measurement-set list {path}: {err}")]
    Read { path: PathBuf, err: std::io::Error },

    #[error("Measurement-set list {path} contains no measurement sets")]
    Empty { path: PathBuf },
}
