// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Manual cache invalidation, for when a run's cache is known to be stale
//! (e.g. after editing the measurement-set list by hand).

use std::path::PathBuf;

use clap::Parser;
use log::info;

use super::SelfcalError;
use crate::{cache, mslist::MsList};

#[derive(Parser, Debug)]
#[clap(about = "Remove the imaging tool's cache directories for a measurement-set list.")]
pub(super) struct ClearCacheArgs {
    /// File containing the measurement-set list, one path per line.
    #[clap(name = "MS_LIST", parse(from_os_str))]
    mslist: PathBuf,

    /// The directory the imaging tool keeps its caches under. Default: the
    /// working directory.
    #[clap(long, parse(from_os_str))]
    cache_dir: Option<PathBuf>,
}

impl ClearCacheArgs {
    pub(super) fn run(self, dry_run: bool) -> Result<(), SelfcalError> {
        let mslist = MsList::read(&self.mslist)?;
        if dry_run {
            info!("Dry run, not removing anything");
            return Ok(());
        }
        cache::clear(&mslist, self.cache_dir.as_deref());
        Ok(())
    }
}
