use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use qd_core::{ParsedOutput, WorkflowType};
use qd_platform::engine::{SCHEDULER_DIRECT, SCHEDULER_SGE};
use qd_platform::*;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dir.push(format!("{}_{}", prefix, nanos));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn code(label: &str, computer: &str, scheduler: &str) -> Code {
    Code {
        label: label.to_string(),
        computer: computer.to_string(),
        executable: PathBuf::from("/opt/quantics/bin/quantics"),
        scheduler: scheduler.to_string(),
        prepend_text: String::new(),
    }
}

/// In-memory engine recording what was submitted.
#[derive(Default)]
struct MockEngine {
    codes: Vec<Code>,
    nodes: Mutex<BTreeMap<ProcessId, ProcessNode>>,
    submissions: Mutex<Vec<WorkflowSubmission>>,
}

impl MockEngine {
    fn with_codes(codes: Vec<Code>) -> Self {
        Self {
            codes,
            ..Default::default()
        }
    }

    fn insert_node(&self, node: ProcessNode) {
        self.nodes.lock().unwrap().insert(node.pk, node);
    }
}

impl WorkflowEngine for MockEngine {
    fn load_code(&self, label: &str) -> PlatformResult<Code> {
        self.codes
            .iter()
            .find(|c| c.matches_label(label))
            .cloned()
            .ok_or_else(|| PlatformError::CodeNotFound {
                label: label.to_string(),
            })
    }

    fn find_codes(&self, pattern: &str) -> PlatformResult<Vec<Code>> {
        Ok(self
            .codes
            .iter()
            .filter(|c| c.label.contains(pattern))
            .cloned()
            .collect())
    }

    fn submit(&self, submission: WorkflowSubmission) -> PlatformResult<ProcessId> {
        let mut nodes = self.nodes.lock().unwrap();
        let pk = nodes.keys().max().copied().unwrap_or(0) + 1;
        nodes.insert(pk, ProcessNode::new(pk, submission.label.clone()));
        self.submissions.lock().unwrap().push(submission);
        Ok(pk)
    }

    fn load_process(&self, pk: ProcessId) -> PlatformResult<ProcessNode> {
        self.nodes
            .lock()
            .unwrap()
            .get(&pk)
            .cloned()
            .ok_or(PlatformError::ProcessNotFound { pk })
    }

    fn recent_processes(&self, limit: usize) -> PlatformResult<Vec<ProcessNode>> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

fn write_inputs(dir: &Path) -> (PathBuf, PathBuf) {
    let inp = dir.join("ho.inp");
    let op = dir.join("ho.op");
    std::fs::write(&inp, "name = ho_out\nopname = ho\n").unwrap();
    std::fs::write(&op, "OP_DEFINE-SECTION\n").unwrap();
    (inp, op)
}

fn finished_node(pk: ProcessId, exit_status: i32) -> ProcessNode {
    let mut node = ProcessNode::new(pk, Some("ho".to_string()));
    node.process_state = ProcessState::Finished;
    node.exit_status = Some(exit_status);
    node.outputs.calculation_results = Some(ParsedOutput {
        total_energy: Some(-1.0),
        ..Default::default()
    });
    node.outputs.output_folder = Some(vec!["log".to_string()]);
    node
}

#[test]
fn configured_label_wins_over_candidates() {
    let engine = MockEngine::with_codes(vec![
        code("quantics", "localhost", SCHEDULER_DIRECT),
        code("mine", "cluster", SCHEDULER_SGE),
    ]);
    let adapter = PlatformAdapter::new(Arc::new(engine), Some("mine@cluster"));
    assert_eq!(adapter.code().unwrap().full_label(), "mine@cluster");
}

#[test]
fn candidates_are_tried_in_order() {
    let engine = MockEngine::with_codes(vec![
        code("quantics", "localhost", SCHEDULER_DIRECT),
        code("quantics-hartree", "hartree", SCHEDULER_SGE),
    ]);
    let adapter = PlatformAdapter::new(Arc::new(engine), Some("missing@nowhere"));
    assert_eq!(adapter.code().unwrap().full_label(), "quantics-hartree@hartree");
}

#[test]
fn falls_back_to_any_quantics_code() {
    let engine = MockEngine::with_codes(vec![
        code("gaussian", "localhost", SCHEDULER_DIRECT),
        code("my-quantics", "lab", SCHEDULER_DIRECT),
    ]);
    let adapter = PlatformAdapter::new(Arc::new(engine), None);
    assert_eq!(adapter.code().unwrap().full_label(), "my-quantics@lab");
}

#[test]
fn submit_without_code_is_setup_error() {
    let dir = unique_temp_dir("qd_platform_nocode");
    let (inp, op) = write_inputs(&dir);
    let adapter = PlatformAdapter::new(Arc::new(MockEngine::default()), None);
    assert!(!adapter.is_configured());

    let err = adapter
        .submit_calculation(SubmitRequest::new(inp, op, WorkflowType::Mctdh))
        .unwrap_err();
    assert!(matches!(err, PlatformError::Setup { .. }));
}

#[test]
fn submit_packages_inputs_and_tools() {
    let dir = unique_temp_dir("qd_platform_submit");
    let (inp, op) = write_inputs(&dir);
    let db = dir.join("db");
    std::fs::create_dir_all(db.join("nested")).unwrap();
    std::fs::write(db.join("nested").join("geo.dat"), "1 2 3").unwrap();

    let engine = Arc::new(MockEngine::with_codes(vec![code(
        "quantics",
        "hartree",
        SCHEDULER_SGE,
    )]));
    let adapter = PlatformAdapter::new(engine.clone(), Some("quantics@hartree"));

    let mut request = SubmitRequest::new(inp, op, WorkflowType::DdVmcg);
    request.db_folder = Some(db);
    request.job.num_mpiprocs = 8;
    let pk = adapter.submit_calculation(request).unwrap();
    assert_eq!(pk, 1);

    let submissions = engine.submissions.lock().unwrap();
    let sub = &submissions[0];
    assert_eq!(sub.inp_file.filename(), "ho.inp");
    assert_eq!(sub.inp_file.content_str(), "name = ho_out\nopname = ho\n");
    assert_eq!(sub.inp_file.checksum().len(), 64);
    assert_eq!(sub.analysis_tools, WorkflowType::DdVmcg.analysis_tools().to_vec());
    let db = sub.db_folder.as_ref().unwrap();
    assert_eq!(db.names().collect::<Vec<_>>(), vec!["nested/geo.dat"]);
    assert_eq!(
        sub.options.resources,
        ResourceRequest::ParallelEnv {
            parallel_env: "smp".to_string(),
            tot_num_mpiprocs: 8,
        }
    );
    assert_eq!(sub.options.max_wallclock_seconds, 3600);
}

#[test]
fn submit_skips_missing_db_and_analysis_when_disabled() {
    let dir = unique_temp_dir("qd_platform_nodb");
    let (inp, op) = write_inputs(&dir);
    let engine = Arc::new(MockEngine::with_codes(vec![code(
        "quantics",
        "localhost",
        SCHEDULER_DIRECT,
    )]));
    let adapter = PlatformAdapter::new(engine.clone(), None);

    let mut request = SubmitRequest::new(inp, op, WorkflowType::DdVmcg);
    request.db_folder = Some(dir.join("does_not_exist"));
    request.run_analysis = false;
    adapter.submit_calculation(request).unwrap();

    let submissions = engine.submissions.lock().unwrap();
    assert!(submissions[0].db_folder.is_none());
    assert!(submissions[0].analysis_tools.is_empty());
}

#[test]
fn lookups_return_error_replies() {
    let adapter = PlatformAdapter::new(Arc::new(MockEngine::default()), None);
    let status = adapter.get_calculation_status(99);
    assert!(status.is_error());
    assert!(adapter.get_calculation_results(99).is_error());
}

#[test]
fn results_require_successful_finish() {
    let engine = Arc::new(MockEngine::default());
    engine.insert_node(ProcessNode::new(1, None));
    engine.insert_node(finished_node(2, 400));
    engine.insert_node(finished_node(3, 0));
    let adapter = PlatformAdapter::new(engine, None);

    for pk in [1, 2] {
        assert_eq!(
            adapter.get_calculation_results(pk),
            PlatformReply::error("Calculation not completed successfully")
        );
    }

    let results = adapter.get_calculation_results(3).into_result().unwrap();
    assert_eq!(results.calculation.unwrap().total_energy, Some(-1.0));
    assert_eq!(results.output_files, Some(vec!["log".to_string()]));
    assert_eq!(results.analysis, None);

    let status = adapter.get_calculation_status(3).into_result().unwrap();
    assert_eq!(status.label, "ho");
    assert!(status.finished.is_some());
    assert!(status.has_outputs);
}

#[test]
fn list_is_newest_first_and_limited() {
    let engine = Arc::new(MockEngine::default());
    for pk in 1..=5 {
        engine.insert_node(ProcessNode::new(pk, None));
    }
    let adapter = PlatformAdapter::new(engine, None);
    let listed = adapter.list_calculations(3).into_result().unwrap();
    let pks: Vec<_> = listed.iter().map(|s| s.pk).collect();
    assert_eq!(pks, vec![5, 4, 3]);
}

#[test]
fn monitor_reports_finish_once_and_unwatches() {
    let engine = Arc::new(MockEngine::default());
    engine.insert_node(finished_node(1, 0));
    let adapter = Arc::new(PlatformAdapter::new(engine, None));

    let (monitor, events) = StatusMonitor::start(adapter, Duration::from_millis(10)).unwrap();
    monitor.watch(1);
    monitor.watch(404);

    let mut finished = 0;
    let mut errors = 0;
    while finished + errors < 2 {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            MonitorEvent::Finished { status, results } => {
                assert_eq!(status.pk, 1);
                assert!(!results.is_error());
                finished += 1;
            }
            MonitorEvent::Error { pk, .. } => {
                assert_eq!(pk, 404);
                errors += 1;
            }
            MonitorEvent::StatusUpdated(status) => panic!("unexpected update: {:?}", status),
        }
    }
    assert!(monitor.watched().is_empty());
    monitor.stop();
}

#[test]
fn monitor_streams_updates_while_running() {
    let engine = Arc::new(MockEngine::default());
    let mut node = ProcessNode::new(1, None);
    node.process_state = ProcessState::Running;
    engine.insert_node(node);
    let adapter = Arc::new(PlatformAdapter::new(engine.clone(), None));

    let (monitor, events) = StatusMonitor::start(adapter, Duration::from_millis(10)).unwrap();
    monitor.watch(1);
    match events.recv_timeout(Duration::from_secs(5)).unwrap() {
        MonitorEvent::StatusUpdated(status) => assert_eq!(status.state, ProcessState::Running),
        other => panic!("unexpected event: {:?}", other),
    }

    engine.insert_node(finished_node(1, 400));
    loop {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            MonitorEvent::StatusUpdated(_) => continue,
            MonitorEvent::Finished { status, results } => {
                assert_eq!(status.exit_status, Some(400));
                assert!(results.is_error());
                break;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
    monitor.stop();
}
