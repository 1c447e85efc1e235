// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The calibration stage: killMS, invoked once per measurement set.
//!
//! The per-entry loop is deliberate: a long list interrupted halfway resumes
//! from the first entry whose solutions file is missing, rather than redoing
//! the whole list.

use std::path::{Path, PathBuf};

use crate::{
    exec::{Executor, ToolCommand},
    mslist::MsList,
    params::{PipelineParams, UvRange},
    stages::StageError,
};

#[derive(Debug, Clone)]
pub(crate) struct KillMs {
    /// The image whose model the solver calibrates against.
    pub(crate) image_name: String,

    /// Label of the produced solution set.
    pub(crate) out_sols: String,

    /// Facet layout file restricting the solve directions.
    pub(crate) cluster_file: Option<PathBuf>,

    pub(crate) col_name: String,
    pub(crate) n_iter_kf: u32,

    /// A masked dico model to use as the sky model instead of the one
    /// implied by the image.
    pub(crate) dico_model: Option<PathBuf>,

    pub(crate) uv_range: Option<UvRange>,
}

impl KillMs {
    /// Where killMS leaves the solutions for one measurement set.
    pub(crate) fn solutions_path(ms: &Path, out_sols: &str) -> PathBuf {
        ms.join(format!("killMS.{out_sols}.sols.npz"))
    }

    fn command(&self, ms: &Path, params: &PipelineParams) -> ToolCommand {
        let mut cmd = ToolCommand::new("killMS.py");
        cmd.arg("--MSName", ms.display());
        cmd.arg("--SolverType", "KAFCA");
        cmd.arg("--PolMode", "Scalar");
        cmd.arg("--BaseImageName", &self.image_name);
        cmd.arg("--dt", params.cal.dt);
        cmd.arg("--Weighting", "Natural");
        cmd.arg("--BeamMode", "LOFAR");
        cmd.arg("--LOFARBeamMode", "A");
        cmd.arg("--NIterKF", self.n_iter_kf);
        cmd.arg("--CovQ", 0.1);
        cmd.arg("--LambdaKF", params.cal.lambda_kf);
        cmd.arg("--NCPU", params.cal.ncpu);
        cmd.arg("--OutSolsName", &self.out_sols);
        cmd.arg("--NChanSols", params.cal.nchan_sols);
        cmd.arg("--InCol", &self.col_name);
        if let Some(UvRange { min_km, max_km }) = self.uv_range {
            cmd.arg("--UVMinMax", format!("{min_km},{max_km}"));
        }
        if let Some(cluster_file) = &self.cluster_file {
            cmd.arg("--NodesFile", cluster_file.display());
        }
        if let Some(dico_model) = &self.dico_model {
            cmd.arg("--DicoModel", dico_model.display());
        }
        if params.quiet {
            cmd.arg("--DoBar", 0);
        }
        cmd
    }

    /// Calibrate every measurement set in the list, in order. The skip
    /// policy applies to each entry separately.
    pub(crate) fn run(
        &self,
        mslist: &MsList,
        params: &PipelineParams,
        exec: &Executor,
    ) -> Result<(), StageError> {
        for ms in mslist.entries() {
            let sols = KillMs::solutions_path(ms, &self.out_sols);
            let cmd = self.command(ms, params);
            let ms_label = ms
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| ms.display().to_string());
            let log_name = format!("KillMS-{}_{}.log", ms_label, self.out_sols);
            exec.run_or_skip(&sols, &cmd, Some(&log_name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;
    use crate::params::tests::test_params;

    #[test]
    fn solutions_live_inside_the_measurement_set() {
        assert_eq!(
            KillMs::solutions_path(Path::new("data/obs1.ms"), "killms_p1"),
            PathBuf::from("data/obs1.ms/killMS.killms_p1.sols.npz")
        );
    }

    #[test]
    fn command_carries_the_per_run_parameters() {
        let params = test_params(PathBuf::from("mslist.txt"));
        let stage = KillMs {
            image_name: "image_phase1".to_string(),
            out_sols: "killms_ap1".to_string(),
            cluster_file: None,
            col_name: "CORRECTED_DATA".to_string(),
            n_iter_kf: 6,
            dico_model: Some(PathBuf::from("image_phase1_masked.DicoModel")),
            uv_range: Some(UvRange {
                min_km: 0.5,
                max_km: 1000.0,
            }),
        };
        let cmd = stage.command(Path::new("obs1.ms"), &params);

        assert_eq!(cmd.value_of("--MSName"), Some("obs1.ms"));
        assert_eq!(cmd.value_of("--BaseImageName"), Some("image_phase1"));
        assert_eq!(cmd.value_of("--OutSolsName"), Some("killms_ap1"));
        assert_eq!(cmd.value_of("--NIterKF"), Some("6"));
        assert_eq!(cmd.value_of("--UVMinMax"), Some("0.5,1000"));
        assert_eq!(
            cmd.value_of("--DicoModel"),
            Some("image_phase1_masked.DicoModel")
        );
        assert!(!cmd.has_flag("--NodesFile"));
        assert!(!cmd.has_flag("--DoBar"));
    }

    #[test]
    fn pre_existing_solutions_are_skipped_per_entry() {
        let tmp = TempDir::new().unwrap();
        let ms1 = tmp.path().join("a.ms");
        let ms2 = tmp.path().join("b.ms");
        std::fs::create_dir(&ms1).unwrap();
        std::fs::create_dir(&ms2).unwrap();
        // Entry 1 already has solutions; entry 2 doesn't.
        std::fs::write(KillMs::solutions_path(&ms1, "killms_p1"), "sols").unwrap();

        let list_path = tmp.path().join("mslist.txt");
        let mut f = std::fs::File::create(&list_path).unwrap();
        writeln!(f, "{}", ms1.display()).unwrap();
        writeln!(f, "{}", ms2.display()).unwrap();
        let mslist = MsList::read(&list_path).unwrap();
        let params = test_params(list_path);

        let stage = KillMs {
            image_name: "image_dirin_SSD".to_string(),
            out_sols: "killms_p1".to_string(),
            cluster_file: None,
            col_name: "CORRECTED_DATA".to_string(),
            n_iter_kf: 6,
            dico_model: None,
            uv_range: None,
        };
        // Restart mode with a dry run: entry 1 is skipped outright, entry 2
        // reaches the executor (and is only logged).
        let exec = Executor {
            restart: true,
            dry_run: true,
            log_dir: None,
        };
        stage.run(&mslist, &params, &exec).unwrap();
    }
}
