// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests against the command-line interface itself.

use crate::{get_cmd_output, selfcal};

#[test]
fn test_selfcal_help_is_correct() {
    let mut stdouts = vec![];

    // First with --help
    let cmd = selfcal().arg("--help").ok();
    assert!(cmd.is_ok());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty());
    stdouts.push(stdout);

    // Then with -h
    let cmd = selfcal().arg("-h").ok();
    assert!(cmd.is_ok());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty());
    stdouts.push(stdout);

    for stdout in stdouts {
        assert!(stdout.contains("run"));
        assert!(stdout.contains("clear-cache"));
        assert!(stdout.contains("Self-calibration pipeline driver"));
    }
}

#[test]
fn test_run_help_lists_the_argument_groups() {
    let cmd = selfcal().args(["run", "--help"]).ok();
    assert!(cmd.is_ok());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty());

    for heading in [
        "INPUT DATA",
        "IMAGING",
        "CALIBRATION",
        "MASKING",
        "PIPELINE CONTROL",
    ] {
        assert!(
            stdout.contains(heading),
            "help is missing the {heading} group"
        );
    }
    assert!(stdout.contains("--mslist"));
    assert!(stdout.contains("--no-restart"));
}

#[test]
fn a_missing_mslist_fails_before_anything_runs() {
    let cmd = selfcal().arg("run").ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(
        stderr.contains("measurement-set list"),
        "stderr was: {stderr}"
    );
}
