// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The pipeline stages, one per external tool. Each stage builds its
//! command line from typed parameters, knows its primary output artifact,
//! and applies the skip policy through [`crate::exec::Executor`].

mod calibrate;
mod image;
mod mask;
mod model;

pub(crate) use calibrate::KillMs;
pub(crate) use image::{ApplyMode, CleanMode, DdfImage, ImageArgsError};
pub(crate) use mask::{ExternalMask, MakeMask};
pub(crate) use model::{MakeModel, MaskDicoModel};

use thiserror::Error;

use crate::{exec::ExecError, masks::MaskError};

#[derive(Error, Debug)]
pub(crate) enum StageError {
    #[error(transparent)]
    ImageArgs(#[from] ImageArgsError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Mask(#[from] MaskError),
}
