// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all ddf_selfcal-related errors. This should be the *only*
//! error enum that is publicly visible.

use thiserror::Error;

use super::run::RunArgsError;
use crate::{
    exec::ExecError,
    masks::MaskError,
    mslist::MsListError,
    pipeline::PipelineError,
    stages::StageError,
    uvmin::UvMinError,
};

/// The *only* publicly visible error from ddf_selfcal.
#[derive(Error, Debug)]
pub enum SelfcalError {
    /// An error with the pipeline configuration or its required inputs.
    #[error("{0}")]
    Config(String),

    /// A bad imaging-stage parameter combination.
    #[error("{0}")]
    Image(String),

    /// An error from in-crate FITS mask handling.
    #[error("{0}")]
    Mask(String),

    /// A failure starting, logging or completing an external tool.
    #[error("{0}")]
    Tool(String),

    /// An error from the minimum-baseline optimization helpers.
    #[error("{0}")]
    UvMin(String),

    /// An error related to argument files.
    #[error("{0}")]
    ArgFile(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<PipelineError> for SelfcalError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::MsList(e) => Self::from(e),
            PipelineError::Stage(e) => Self::from(e),
            PipelineError::Exec(e) => Self::from(e),
            PipelineError::UvMin(e) => Self::from(e),
            PipelineError::LogDir { .. } | PipelineError::Symlink { .. } => {
                Self::Generic(e.to_string())
            }
        }
    }
}

impl From<StageError> for SelfcalError {
    fn from(e: StageError) -> Self {
        match e {
            StageError::ImageArgs(e) => Self::Image(e.to_string()),
            StageError::Exec(e) => Self::from(e),
            StageError::Mask(e) => Self::Mask(e.to_string()),
        }
    }
}

impl From<UvMinError> for SelfcalError {
    fn from(e: UvMinError) -> Self {
        match e {
            UvMinError::Exec(e) => Self::from(e),
            UvMinError::BadReply { .. } => Self::UvMin(e.to_string()),
        }
    }
}

impl From<ExecError> for SelfcalError {
    fn from(e: ExecError) -> Self {
        Self::Tool(e.to_string())
    }
}

impl From<MsListError> for SelfcalError {
    fn from(e: MsListError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<RunArgsError> for SelfcalError {
    fn from(e: RunArgsError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<MaskError> for SelfcalError {
    fn from(e: MaskError) -> Self {
        Self::Mask(e.to_string())
    }
}

impl From<std::io::Error> for SelfcalError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
