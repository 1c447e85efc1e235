// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Self-calibration pipeline driver for DDFacet and killMS imaging of LOFAR
data.

The pipeline sequences external imaging, calibration, masking and
sky-model tools, passing artifacts between stages by filename convention.
Run state lives entirely on the filesystem: every stage checks for its
primary output before running, so an interrupted run resumes where it
stopped.
 */

mod cache;
mod cli;
mod exec;
mod masks;
mod mslist;
mod params;
mod pipeline;
mod stages;
mod uvmin;

pub use cli::{Selfcal, SelfcalError};
