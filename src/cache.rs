// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Invalidation of the DDF cache directories.
//!
//! The imaging tool keeps a cache directory per measurement set (and one for
//! the list file itself). The cached facet layout goes stale whenever the
//! sky-model clustering is redone, so the driver clears these directories
//! after a clustering stage that actually ran, and optionally once at
//! pipeline start.

use std::path::Path;

use log::{debug, info};

use crate::mslist::MsList;

/// Remove the list-level cache directory and every per-entry cache
/// directory. Directories that don't exist are silently tolerated; a cache
/// can legitimately be partial (or already gone) after a crash.
pub(crate) fn clear(mslist: &MsList, cache_base: Option<&Path>) {
    info!("Clearing cache for {}", mslist.path().display());
    remove_dir(&mslist.cache_dir(cache_base));
    for dir in mslist.entry_cache_dirs(cache_base) {
        remove_dir(&dir);
    }
}

fn remove_dir(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!("Removed {}", dir.display()),
        Err(err) => debug!("Not removing {}: {}", dir.display(), err),
    }
}
