#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use qd_core::WorkflowType;
use qd_platform::engine::SCHEDULER_DIRECT;
use qd_platform::*;

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

/// Fake QUANTICS + analysis tools. The simulation creates the directory
/// named in `name =` and reports on stdout.
fn fake_toolchain(dir: &Path, quantics_exit: i32) -> PathBuf {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).unwrap();
    write_script(
        &bin.join("quantics"),
        &format!(
            "mkdir -p ho_out\n\
             echo 'log line' > ho_out/log\n\
             echo 'Total energy -1.5'\n\
             echo 'Convergence achieved'\n\
             exit {}\n",
            quantics_exit
        ),
    );
    write_script(&bin.join("rdcheck"), "echo \"rdcheck $*\"\n");
    write_script(
        &bin.join("rdgpop"),
        "read nz\nread dof\necho \"gpop $1 $nz $dof\"\n",
    );
    write_script(&bin.join("ddtraj"), "echo 'no trajectory' >&2\nexit 2\n");
    bin
}

fn engine_with_code(dir: &Path, bin: &Path) -> Arc<DirectoryEngine> {
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
    Arc::new(engine)
}

fn write_inputs(dir: &Path) -> (PathBuf, PathBuf) {
    let inp = dir.join("ho.inp");
    let op = dir.join("ho.op");
    fs::write(&inp, "RUN-SECTION\nname = ho_out\nopname = ho_model\nEND-RUN-SECTION\n").unwrap();
    fs::write(&op, "OP_DEFINE-SECTION\n").unwrap();
    (inp, op)
}

#[test]
fn successful_workchain_collects_outputs() {
    let dir = unique_temp_dir("qd_engine_ok");
    let bin = fake_toolchain(&dir, 0);
    let engine = engine_with_code(&dir, &bin);
    let adapter = PlatformAdapter::new(engine.clone(), Some("quantics@localhost"));
    let (inp, op) = write_inputs(&dir);

    let mut request = SubmitRequest::new(inp, op, WorkflowType::Mctdh);
    request.label = Some("ho".to_string());
    let pk = adapter.submit_calculation(request).unwrap();
    engine.wait_for_workers();

    let status = adapter.get_calculation_status(pk).into_result().unwrap();
    assert_eq!(status.state, ProcessState::Finished);
    assert_eq!(status.exit_status, Some(0));
    assert_eq!(status.label, "ho");

    let results = adapter.get_calculation_results(pk).into_result().unwrap();
    let calculation = results.calculation.unwrap();
    assert_eq!(calculation.total_energy, Some(-1.5));
    assert_eq!(calculation.converged, Some(true));

    let analysis = results.analysis.unwrap();
    assert_eq!(analysis["rdcheck etot"], "rdcheck etot\n");
    assert_eq!(analysis["rdcheck natpop 0 0"], "rdcheck natpop 0 0\n");
    assert_eq!(analysis["rdgpop"], "gpop -w 2 1\n");

    let files = results.output_files.unwrap();
    assert!(files.contains(&"log".to_string()));
    assert!(files.contains(&"rdgpop_output.txt".to_string()));

    let work = dir
        .join("store")
        .join("processes")
        .join(pk.to_string())
        .join("work");
    assert!(work.join("input.inp").exists());
    assert!(work.join("ho_model.op").exists());
    assert!(work.join("run_quantics.sh").exists());

    let node = engine.load_process(pk).unwrap();
    assert!(node.report.iter().any(|l| l == "WorkChain completed successfully"));
}

#[test]
fn failed_simulation_finishes_with_exit_400() {
    let dir = unique_temp_dir("qd_engine_fail");
    let bin = fake_toolchain(&dir, 3);
    let engine = engine_with_code(&dir, &bin);
    let adapter = PlatformAdapter::new(engine.clone(), None);
    let (inp, op) = write_inputs(&dir);

    let pk = adapter
        .submit_calculation(SubmitRequest::new(inp, op, WorkflowType::Vmcg))
        .unwrap();
    engine.wait_for_workers();

    let status = adapter.get_calculation_status(pk).into_result().unwrap();
    assert_eq!(status.state, ProcessState::Finished);
    assert_eq!(status.exit_status, Some(400));
    assert_eq!(status.label, format!("QUANTICS_{}", pk));
    assert!(adapter.get_calculation_results(pk).is_error());
}

#[test]
fn db_folder_is_materialised() {
    let dir = unique_temp_dir("qd_engine_db");
    let bin = fake_toolchain(&dir, 0);
    let engine = engine_with_code(&dir, &bin);
    let adapter = PlatformAdapter::new(engine.clone(), None);
    let (inp, op) = write_inputs(&dir);
    let db = dir.join("db");
    fs::create_dir_all(db.join("sub")).unwrap();
    fs::write(db.join("sub").join("points.dat"), "0.0").unwrap();

    let mut request = SubmitRequest::new(inp, op, WorkflowType::DdVmcg);
    request.db_folder = Some(db);
    request.run_analysis = false;
    let pk = adapter.submit_calculation(request).unwrap();
    engine.wait_for_workers();

    let work = engine
        .root()
        .join("processes")
        .join(pk.to_string())
        .join("work");
    assert_eq!(
        fs::read_to_string(work.join("db_data").join("sub").join("points.dat")).unwrap(),
        "0.0"
    );
    let results = adapter.get_calculation_results(pk).into_result().unwrap();
    assert!(results.analysis.is_none());
}

#[test]
fn processes_are_listed_newest_first() {
    let dir = unique_temp_dir("qd_engine_list");
    let bin = fake_toolchain(&dir, 0);
    let engine = engine_with_code(&dir, &bin);
    let adapter = PlatformAdapter::new(engine.clone(), None);
    let (inp, op) = write_inputs(&dir);

    let mut pks = Vec::new();
    for _ in 0..3 {
        let mut request = SubmitRequest::new(inp.clone(), op.clone(), WorkflowType::Vmcg);
        request.run_analysis = false;
        pks.push(adapter.submit_calculation(request).unwrap());
    }
    engine.wait_for_workers();

    let listed = adapter.list_calculations(2).into_result().unwrap();
    let listed_pks: Vec<_> = listed.iter().map(|s| s.pk).collect();
    assert_eq!(listed_pks, vec![pks[2], pks[1]]);
}

#[test]
fn failed_analysis_tool_is_tagged_as_error() {
    let dir = unique_temp_dir("qd_engine_tool_fail");
    let bin = fake_toolchain(&dir, 0);
    let engine = engine_with_code(&dir, &bin);
    let adapter = PlatformAdapter::new(engine.clone(), None);
    let (inp, op) = write_inputs(&dir);

    let pk = adapter
        .submit_calculation(SubmitRequest::new(inp, op, WorkflowType::DdVmcg))
        .unwrap();
    engine.wait_for_workers();

    let results = adapter.get_calculation_results(pk).into_result().unwrap();
    let analysis = results.analysis.unwrap();
    assert_eq!(analysis["ddtraj"], "Error: no trajectory\n");
    assert_eq!(analysis["rdcheck etot"], "rdcheck etot\n");

    let files = results.output_files.unwrap();
    assert!(files.iter().all(|f| !f.ends_with(".err")));
}
