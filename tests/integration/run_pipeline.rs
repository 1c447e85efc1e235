// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end pipeline runs against the stub tools.

use crate::{count_invocations, recorded_invocations, setup_pipeline_dir};

#[test]
fn first_run_produces_the_artifact_chain_and_a_rerun_skips_everything() {
    let dir = setup_pipeline_dir(&["obs1.ms"]);

    // Stale caches from some earlier run; the clustering stage runs, so
    // they must be invalidated.
    std::fs::create_dir(dir.artifact("mslist.txt.ddfcache")).unwrap();
    std::fs::create_dir(dir.artifact("obs1.ms.ddfcache")).unwrap();

    let result = dir.run_selfcal(&[]);
    let output = result.expect("first pipeline run failed");
    assert!(output.status.success());

    assert!(!dir.artifact("mslist.txt.ddfcache").exists());
    assert!(!dir.artifact("obs1.ms.ddfcache").exists());

    // The artifact chain of the subset recipe is in place.
    for artifact in [
        "image_dirin_SSD_init.dirty.fits",
        "external_mask.fits",
        "image_dirin_SSD.app.restored.fits",
        "image_dirin_SSD.app.restored.fits.mask.fits",
        "image_dirin_SSD_masked.DicoModel",
        "image_dirin_SSD.npy",
        "image_dirin_SSD.npy.ClusterCat.npy",
        "obs1.ms/killMS.killms_p1.sols.npz",
        "image_phase1.app.restored.fits",
        "image_phase1.app.restored.fits.mask.fits",
        "image_phase1_masked.DicoModel",
        "obs1.ms/killMS.killms_ap1.sols.npz",
        "image_ampphase1.app.restored.fits",
        "image_ampphase1.app.restored.fits.mask.fits",
        "image_ampphase1_masked.DicoModel",
    ] {
        assert!(
            dir.artifact(artifact).exists(),
            "expected artifact {artifact} after the first run"
        );
    }

    let first_run = recorded_invocations(dir.path());
    assert_eq!(count_invocations(&first_run, "DDF.py"), 4);
    assert_eq!(count_invocations(&first_run, "MakeMask.py"), 3);
    assert_eq!(count_invocations(&first_run, "MakeModel.py"), 1);
    assert_eq!(count_invocations(&first_run, "MaskDicoModel.py"), 3);
    assert_eq!(count_invocations(&first_run, "killMS.py"), 2);

    // Same working directory, restart mode (the default): every stage finds
    // its artifact and no tool runs again.
    let result = dir.run_selfcal(&[]);
    let output = result.expect("restart rerun failed");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("already exists"),
        "the rerun must report pre-existing artifacts"
    );

    let after_rerun = recorded_invocations(dir.path());
    assert_eq!(
        after_rerun, first_run,
        "the restart rerun must perform zero stage invocations"
    );
}

#[test]
fn partially_calibrated_list_resumes_per_entry_in_order() {
    let dir = setup_pipeline_dir(&["obs1.ms", "obs2.ms", "obs3.ms"]);

    // Pretend an earlier run got as far as the amplitude-phase image, except
    // that the phase-calibration pass died after entry 2. None of these need
    // to be readable: only the killMS stubs and the existence checks see
    // them.
    for artifact in [
        "image_dirin_SSD_init.dirty.fits",
        "external_mask.fits",
        "image_dirin_SSD.app.restored.fits",
        "image_dirin_SSD.app.restored.fits.mask.fits",
        "image_dirin_SSD_masked.DicoModel",
        "image_dirin_SSD.npy",
        "obs2.ms/killMS.killms_p1.sols.npz",
        "image_phase1.app.restored.fits",
        "image_phase1.app.restored.fits.mask.fits",
        "image_phase1_masked.DicoModel",
        "obs1.ms/killMS.killms_ap1.sols.npz",
        "obs2.ms/killMS.killms_ap1.sols.npz",
        "obs3.ms/killMS.killms_ap1.sols.npz",
        "image_ampphase1.app.restored.fits",
        "image_ampphase1.app.restored.fits.mask.fits",
        "image_ampphase1_masked.DicoModel",
    ] {
        std::fs::write(dir.artifact(artifact), "artifact").unwrap();
    }

    // The clustering stage is skipped this time, so existing caches stay.
    std::fs::create_dir(dir.artifact("obs2.ms.ddfcache")).unwrap();

    let result = dir.run_selfcal(&[]);
    let output = result.expect("resumed run failed");
    assert!(output.status.success());

    assert!(dir.artifact("obs2.ms.ddfcache").exists());

    // Exactly two calibration invocations, for the entries without
    // solutions, in list order; nothing else reruns.
    let invocations = recorded_invocations(dir.path());
    assert_eq!(invocations.len(), 2, "invocations: {invocations:?}");
    assert!(invocations[0].starts_with("killMS.py"));
    assert!(invocations[0].contains("obs1.ms"));
    assert!(invocations[1].starts_with("killMS.py"));
    assert!(invocations[1].contains("obs3.ms"));
}

#[test]
fn dry_run_spawns_no_stage_tools_and_writes_no_artifacts() {
    let dir = setup_pipeline_dir(&["obs1.ms"]);

    let result = dir.run_selfcal(&["--dry-run"]);
    let output = result.expect("dry run failed");
    assert!(output.status.success());

    assert!(recorded_invocations(dir.path()).is_empty());
    assert!(!dir.artifact("external_mask.fits").exists());
    assert!(!dir.artifact("image_dirin_SSD_init.dirty.fits").exists());
    assert!(!dir.artifact("image_dirin_SSD.Norm.fits").exists());
}

#[test]
fn a_failing_tool_aborts_the_whole_run() {
    let dir = setup_pipeline_dir(&["obs1.ms"]);
    // Make the deep-clean DDF call fail by poisoning the stub after the
    // first invocation.
    crate::write_stub(
        &dir.path().join("stub-bin"),
        "DDF.py",
        r#"#!/bin/sh
echo "DDF.py $@" >> stage_invocations.log
if [ -e ddf_has_run ]; then
    exit 1
fi
touch ddf_has_run
name=""
for a in "$@"; do
    case "$a" in
        --Output-Name=*) name="${a#--Output-Name=}";;
    esac
done
cp template.fits "$name.dirty.fits"
"#,
    );

    let result = dir.run_selfcal(&[]);
    let output = match result {
        Ok(output) => output,
        Err(err) => err.as_output().unwrap().clone(),
    };
    assert!(!output.status.success());

    // The first image ran, the second failed, nothing later was attempted.
    let invocations = recorded_invocations(dir.path());
    assert_eq!(count_invocations(&invocations, "DDF.py"), 2);
    assert_eq!(count_invocations(&invocations, "MakeMask.py"), 0);
    assert_eq!(count_invocations(&invocations, "killMS.py"), 0);
}
