//! Session launches through both execution backends.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use qd_app::{AppError, Capabilities, LaunchOutcome, SAVED_CONFIG_NAME, Session};
use qd_config::{ExecutionMode, QuanticsConfig, load_config};
use qd_core::WorkflowType;
use qd_platform::engine::SCHEDULER_DIRECT;
use qd_platform::{Code, DirectoryEngine, ProcessState};
use qd_records::CalcStatus;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dir.push(format!("{}_{}", prefix, nanos));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{}", body)).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

fn fake_toolchain(dir: &Path) -> PathBuf {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).unwrap();
    write_script(
        &bin.join("quantics"),
        "mkdir -p ho_out\necho 'log line' > ho_out/log\necho 'Total energy -0.5'\n",
    );
    write_script(&bin.join("rdcheck"), "echo \"rdcheck $*\"\n");
    write_script(
        &bin.join("rdgpop"),
        "read nz\nread dof\necho \"gpop $1 $nz $dof\"\n",
    );
    bin
}

fn session_config(dir: &Path, bin: &Path) -> QuanticsConfig {
    let inp = dir.join("ho.inp");
    let op = dir.join("ho.op");
    fs::write(&inp, "name = ho_out\nopname = ho\n").unwrap();
    fs::write(&op, "OP_DEFINE-SECTION\n").unwrap();
    QuanticsConfig {
        calculation_name: "session_run".to_string(),
        quantics_executable: bin.join("quantics"),
        base_directory: Some(dir.join("base")),
        inp_file: Some(inp),
        op_file: Some(op),
        analysis_tools: vec!["rdcheck etot".to_string(), "rdgpop".to_string()],
        rdgpop_nz: "4".to_string(),
        rdgpop_dof: "3".to_string(),
        show_cmdline: false,
        analysis_bin_dir: Some(bin.to_path_buf()),
        ..Default::default()
    }
}

#[test]
fn local_launch_runs_analyses_and_saves_config() {
    let dir = unique_temp_dir("qd_session_local");
    let bin = fake_toolchain(&dir);
    let config = session_config(&dir, &bin);
    let caps = Capabilities::local_only();

    let mut lines = Vec::new();
    let outcome = Session::new(&config, &caps)
        .launch(&mut |line| lines.push(line))
        .unwrap();
    let LaunchOutcome::Local(local) = outcome else {
        panic!("expected a local launch");
    };

    assert!(local.success);
    assert_eq!(local.calculation.status, CalcStatus::Completed);
    assert_eq!(local.analysis["rdcheck etot"], "rdcheck etot\n");
    assert_eq!(local.analysis["rdgpop"], "gpop -w 4 3\n");
    assert_eq!(
        local.calculation.results.analysis_with_params.len(),
        2,
        "configured parameters are used"
    );

    let saved = local.saved_config.clone().unwrap();
    assert_eq!(
        saved,
        local.calculation.working_directory.join(SAVED_CONFIG_NAME)
    );
    assert_eq!(load_config(&saved).unwrap(), config);

    let tree = local.results.clone().unwrap();
    assert_eq!(tree.name, "ho_out");
    let names: Vec<_> = tree.children.iter().map(|c| c.name.as_str()).collect();
    assert!(names.contains(&"log"));
    assert!(names.contains(&"rdgpop_output.txt"));

    assert!(lines.iter().any(|l| l == "=== Starting QUANTICS Calculation ==="));
    assert!(lines.iter().any(|l| l.contains("Running analysis tool: rdgpop")));
}

#[test]
fn cleanup_removes_database_copy_after_success() {
    let dir = unique_temp_dir("qd_session_cleanup");
    let bin = fake_toolchain(&dir);
    let db = dir.join("db");
    fs::create_dir_all(&db).unwrap();
    fs::write(db.join("pes.dat"), "1").unwrap();

    let config = QuanticsConfig {
        workflow_type: WorkflowType::DdVmcg,
        db_folder: Some(db),
        cleanup_on_success: true,
        save_inputs: false,
        analysis_tools: Vec::new(),
        ..session_config(&dir, &bin)
    };
    let caps = Capabilities::local_only();
    let outcome = Session::new(&config, &caps).launch(&mut |_| {}).unwrap();
    let LaunchOutcome::Local(local) = outcome else {
        panic!("expected a local launch");
    };

    assert!(local.success);
    assert!(local.saved_config.is_none());
    assert!(local.analysis.is_empty());
    assert!(!local.calculation.working_directory.join("db_data").exists());
}

#[test]
fn invalid_configuration_is_rejected_before_anything_runs() {
    let dir = unique_temp_dir("qd_session_invalid");
    let bin = fake_toolchain(&dir);
    let config = QuanticsConfig {
        calculation_name: "bad name".to_string(),
        ..session_config(&dir, &bin)
    };
    let caps = Capabilities::local_only();

    let err = Session::new(&config, &caps).launch(&mut |_| {}).unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(!dir.join("base").exists());
}

#[test]
fn platform_mode_without_platform_is_a_setup_error() {
    let dir = unique_temp_dir("qd_session_no_platform");
    let bin = fake_toolchain(&dir);
    let config = QuanticsConfig {
        execution_mode: ExecutionMode::Platform,
        ..session_config(&dir, &bin)
    };
    let caps = Capabilities::local_only();

    let err = Session::new(&config, &caps).launch(&mut |_| {}).unwrap_err();
    assert!(matches!(err, AppError::Setup { .. }));
}

#[test]
fn auto_mode_submits_when_platform_is_available() {
    let dir = unique_temp_dir("qd_session_platform");
    let bin = fake_toolchain(&dir);
    let engine = DirectoryEngine::open(dir.join("store")).unwrap();
    engine
        .register_code(Code {
            label: "quantics".to_string(),
            computer: "localhost".to_string(),
            executable: bin.join("quantics"),
            scheduler: SCHEDULER_DIRECT.to_string(),
            prepend_text: format!("PATH='{}':$PATH\nexport PATH", bin.display()),
        })
        .unwrap();
    let engine = Arc::new(engine);
    let caps = Capabilities::with_platform(engine.clone(), None);

    let config = QuanticsConfig {
        execution_mode: ExecutionMode::Auto,
        ..session_config(&dir, &bin)
    };
    let mut lines = Vec::new();
    let outcome = Session::new(&config, &caps)
        .launch(&mut |line| lines.push(line))
        .unwrap();
    let LaunchOutcome::Submitted { pk } = outcome else {
        panic!("expected a platform submission");
    };
    engine.wait_for_workers();

    let adapter = &caps.platform().unwrap().adapter;
    let status = adapter.get_calculation_status(pk).into_result().unwrap();
    assert_eq!(status.label, "session_run");
    assert_eq!(status.state, ProcessState::Finished);
    assert_eq!(status.exit_status, Some(0));
    assert!(lines.iter().any(|l| l.contains(&format!("PK: {}", pk))));
    assert!(!dir.join("base").exists());
}
