// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Data-driven choice of the calibration minimum baseline.
//!
//! Short baselines see extended emission that the clustered sky model
//! doesn't capture, which biases the gain solutions. The helpers report the
//! model's total apparent flux and the baseline length at which the
//! per-baseline visibility statistic drops to that level; everything shorter
//! is excluded from calibration, with a safety margin on top.

use log::info;
use thiserror::Error;

use crate::{
    exec::{ExecError, Executor, ToolCommand},
    mslist::MsList,
};

/// Scale factor applied to the crossing point the helper reports.
const SAFETY_MARGIN: f64 = 1.1;

/// Compute the minimum baseline [km] to calibrate on. Returns `None` under
/// dry-run, in which case the configured minimum stays in force.
pub(crate) fn optimize_uvmin(
    image_base: &str,
    mslist: &MsList,
    col_name: &str,
    exec: &Executor,
) -> Result<Option<f64>, UvMinError> {
    info!("Optimizing the minimum baseline for self-calibration");

    let mut sum = ToolCommand::new("SumDico.py");
    sum.arg("--InDicoModel", format!("{image_base}.DicoModel"));
    let level = match exec.run_capture(&sum)? {
        Some(reply) => parse_reply("SumDico.py", &reply)?,
        None => return Ok(None),
    };

    let mut find = ToolCommand::new("FindUVMin.py");
    find.arg("--MSList", mslist.path().display());
    find.arg("--Level", level);
    find.arg("--InCol", col_name);
    let crossing = match exec.run_capture(&find)? {
        Some(reply) => parse_reply("FindUVMin.py", &reply)?,
        None => return Ok(None),
    };

    let uvmin = crossing * SAFETY_MARGIN;
    info!("Will use a shortest baseline of {uvmin:.2} km");
    Ok(Some(uvmin))
}

/// The helpers print their result as the last token on stdout.
fn parse_reply(program: &str, reply: &str) -> Result<f64, UvMinError> {
    reply
        .split_whitespace()
        .last()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| UvMinError::BadReply {
            program: program.to_string(),
            reply: reply.trim().to_string(),
        })
}

#[derive(Error, Debug)]
pub(crate) enum UvMinError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Couldn't parse a baseline statistic from {program} output: {reply:?}")]
    BadReply { program: String, reply: String },
}
