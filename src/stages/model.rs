// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sky-model construction and masking stages.

use std::path::PathBuf;

use crate::{
    exec::{Executor, StageOutcome, ToolCommand},
    params::PipelineParams,
    stages::StageError,
};

/// Cluster a masked restored image into facets, producing the cluster
/// catalogue and per-direction model. The caller inspects the outcome: a run
/// that actually happened invalidates the facet layout cached by the imager.
#[derive(Debug, Clone)]
pub(crate) struct MakeModel {
    pub(crate) mask_name: PathBuf,
    pub(crate) image_name: String,
}

impl MakeModel {
    pub(crate) fn primary_output(&self) -> PathBuf {
        PathBuf::from(format!("{}.npy", self.image_name))
    }

    pub(crate) fn run(
        &self,
        params: &PipelineParams,
        exec: &Executor,
    ) -> Result<StageOutcome, StageError> {
        let mut cmd = ToolCommand::new("MakeModel.py");
        cmd.arg("--MaskName", self.mask_name.display());
        cmd.arg("--BaseImageName", &self.image_name);
        cmd.arg("--NCluster", params.cal.n_dir);
        cmd.arg("--DoPlot", 0);
        let log_name = format!("MakeModel-{}.log", file_label(&self.mask_name));
        let outcome = exec.run_or_skip(&self.primary_output(), &cmd, Some(&log_name))?;
        Ok(outcome)
    }
}

/// Apply a mask to a dico model, writing the masked model under a new name
/// for use as a calibration prior.
#[derive(Debug, Clone)]
pub(crate) struct MaskDicoModel {
    pub(crate) in_dico: PathBuf,
    pub(crate) mask_name: PathBuf,
    pub(crate) out_dico: PathBuf,
}

impl MaskDicoModel {
    pub(crate) fn run(&self, exec: &Executor) -> Result<StageOutcome, StageError> {
        let mut cmd = ToolCommand::new("MaskDicoModel.py");
        cmd.arg("--MaskName", self.mask_name.display());
        cmd.arg("--InDicoModel", self.in_dico.display());
        cmd.arg("--OutDicoModel", self.out_dico.display());
        let log_name = format!("MaskDicoModel-{}.log", file_label(&self.mask_name));
        let outcome = exec.run_or_skip(&self.out_dico, &cmd, Some(&log_name))?;
        Ok(outcome)
    }
}

fn file_label(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::params::tests::test_params;

    #[test]
    fn make_model_reports_a_skip_for_an_existing_catalogue() {
        let tmp = TempDir::new().unwrap();
        let image_name = tmp.path().join("image_dirin_SSD").display().to_string();
        std::fs::write(format!("{image_name}.npy"), "clusters").unwrap();

        let stage = MakeModel {
            mask_name: tmp.path().join("mask.fits"),
            image_name,
        };
        let params = test_params(tmp.path().join("mslist.txt"));
        let exec = Executor {
            restart: true,
            dry_run: false,
            log_dir: None,
        };
        assert_eq!(stage.run(&params, &exec).unwrap(), StageOutcome::Skipped);

        // Without restart the same stage runs (dry here).
        let exec = Executor {
            restart: false,
            dry_run: true,
            log_dir: None,
        };
        assert_eq!(stage.run(&params, &exec).unwrap(), StageOutcome::Ran);
    }

    #[test]
    fn mask_dicomodel_skips_on_existing_output() {
        let tmp = TempDir::new().unwrap();
        let out_dico = tmp.path().join("image_phase1_masked.DicoModel");
        std::fs::write(&out_dico, "model").unwrap();

        let stage = MaskDicoModel {
            in_dico: tmp.path().join("image_phase1.DicoModel"),
            mask_name: tmp.path().join("mask.fits"),
            out_dico,
        };
        let exec = Executor {
            restart: true,
            dry_run: false,
            log_dir: None,
        };
        assert_eq!(stage.run(&exec).unwrap(), StageOutcome::Skipped);
    }
}
