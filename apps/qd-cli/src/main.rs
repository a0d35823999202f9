use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use qd_app::{
    AppError, AppResult, Capabilities, CreateRequest, LaunchOutcome, LocalRunner, RunnerEvent,
    Session, default_analysis_tools,
};
use qd_config::{ExecutionMode, QuanticsConfig, load_config};
use qd_core::{AnalysisParams, WorkflowType};
use qd_platform::engine::SCHEDULER_DIRECT;
use qd_platform::{
    Code, DEFAULT_POLL_INTERVAL, DirectoryEngine, JobSettings, MonitorEvent, PlatformAdapter,
    ProcessId, StatusMonitor, SubmitRequest,
};

/// Directory of the bundled example, relative to the current directory.
const EXAMPLE_DIR: &str = "Exercise_1/ho";
const EXAMPLE_NAME: &str = "ho_example";
/// Store directory under the base directory when `--store` is not given.
const PLATFORM_STORE_DIR: &str = "platform";

#[derive(Parser)]
#[command(name = "qd-cli")]
#[command(about = "QUANTICS calculation manager", long_about = None)]
struct Cli {
    /// Base directory for calculations (default: ~/.quantics_local)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new calculation
    Create {
        /// Calculation name
        name: String,
        /// QUANTICS input file (.inp)
        inp_file: PathBuf,
        /// Operator file (.op)
        op_file: PathBuf,
        /// Workflow type (MCTDH, vMCG, DD-vMCG)
        #[arg(long, default_value = "MCTDH")]
        workflow: WorkflowType,
        /// Database folder (DD-vMCG only)
        #[arg(long)]
        db_folder: Option<PathBuf>,
    },
    /// Run a calculation
    Run {
        /// Calculation name
        name: String,
        /// QUANTICS executable
        #[arg(long, default_value = "quantics")]
        quantics_exe: PathBuf,
    },
    /// Run analysis tools on a completed calculation
    Analyze {
        /// Calculation name
        name: String,
        /// Tools to run, e.g. "rdcheck etot" (default: the workflow's tools)
        tools: Vec<String>,
        /// Grid points answered to rdgpop
        #[arg(long)]
        rdgpop_nz: Option<String>,
        /// Degree of freedom answered to rdgpop
        #[arg(long)]
        rdgpop_dof: Option<String>,
        /// Directory holding the analysis executables
        #[arg(long)]
        bin_dir: Option<PathBuf>,
    },
    /// Show the status of all calculations
    Status,
    /// Create and, when quantics is on PATH, run the harmonic oscillator example
    Example,
    /// Headless session: validate a configuration and launch it
    Gui {
        /// Execution mode (default: the configuration's, else local)
        #[arg(long)]
        mode: Option<ExecutionMode>,
        /// Configuration file (.json, .yaml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Workflow-platform operations
    Platform(PlatformArgs),
}

#[derive(Args)]
struct PlatformArgs {
    /// Workflow store directory (default: <base-dir>/platform)
    #[arg(long)]
    store: Option<PathBuf>,
    /// Code label to submit with (default: first registered QUANTICS code)
    #[arg(long)]
    code: Option<String>,

    #[command(subcommand)]
    command: PlatformCommands,
}

#[derive(Subcommand)]
enum PlatformCommands {
    /// Register a QUANTICS code with the store
    SetupCode {
        #[arg(long, default_value = "quantics")]
        label: String,
        #[arg(long, default_value = "localhost")]
        computer: String,
        /// Path of the QUANTICS executable on the computer
        #[arg(long)]
        executable: PathBuf,
        /// Scheduler plugin, e.g. core.direct or core.sge
        #[arg(long, default_value = SCHEDULER_DIRECT)]
        scheduler: String,
        /// Shell lines run before QUANTICS (module loads, PATH)
        #[arg(long, default_value = "")]
        prepend_text: String,
    },
    /// Submit a calculation and wait for it to finish
    Submit {
        inp_file: PathBuf,
        op_file: PathBuf,
        #[arg(long, default_value = "MCTDH")]
        workflow: WorkflowType,
        #[arg(long)]
        db_folder: Option<PathBuf>,
        #[arg(long)]
        label: Option<String>,
        /// Skip the workflow's analysis tools
        #[arg(long)]
        no_analysis: bool,
        /// Number of MPI processes
        #[arg(long, default_value_t = 1)]
        resources: u32,
        /// Wall-clock budget in seconds
        #[arg(long, default_value_t = 3600)]
        walltime: u64,
        #[arg(long)]
        queue: Option<String>,
    },
    /// Show the status of a process
    Status { pk: ProcessId },
    /// Show the results of a finished process
    Results { pk: ProcessId },
    /// List recent processes
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Poll processes until they reach a terminal state
    Watch {
        #[arg(required = true)]
        pks: Vec<ProcessId>,
        /// Poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },
}

fn main() -> AppResult<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let base_dir = cli.base_dir;

    match cli.command {
        Commands::Create {
            name,
            inp_file,
            op_file,
            workflow,
            db_folder,
        } => cmd_create(
            base_dir,
            CreateRequest {
                name,
                inp_file,
                op_file,
                workflow_type: workflow,
                db_folder,
            },
        ),
        Commands::Run { name, quantics_exe } => cmd_run(base_dir, &name, &quantics_exe),
        Commands::Analyze {
            name,
            tools,
            rdgpop_nz,
            rdgpop_dof,
            bin_dir,
        } => cmd_analyze(base_dir, &name, tools, rdgpop_nz, rdgpop_dof, bin_dir),
        Commands::Status => cmd_status(base_dir),
        Commands::Example => cmd_example(base_dir),
        Commands::Gui { mode, config } => cmd_session(base_dir, mode, config.as_deref()),
        Commands::Platform(args) => cmd_platform(base_dir, args),
    }
}

fn open_runner(base_dir: Option<PathBuf>) -> AppResult<LocalRunner> {
    LocalRunner::open(base_dir)
}

fn cmd_create(base_dir: Option<PathBuf>, request: CreateRequest) -> AppResult<()> {
    let mut runner = open_runner(base_dir)?;
    let calc = runner.create_calculation(request)?;
    println!("✓ Created calculation '{}'", calc.name);
    println!("  Working directory: {}", calc.working_directory.display());
    Ok(())
}

fn cmd_run(base_dir: Option<PathBuf>, name: &str, quantics_exe: &Path) -> AppResult<()> {
    let mut runner = open_runner(base_dir)?;
    let success = runner.run_calculation_with_progress(
        name,
        quantics_exe,
        Some(&mut |event: RunnerEvent| println!("{}", event.log_line())),
    )?;
    print_run_outcome(&runner, name, success);
    Ok(())
}

fn print_run_outcome(runner: &LocalRunner, name: &str, success: bool) {
    let Some(calc) = runner.get_calculation(name) else {
        return;
    };
    if !success {
        println!("✗ Calculation '{}' failed ({})", name, calc.status);
        println!(
            "  See {}",
            calc.working_directory.join("quantics.log").display()
        );
        return;
    }
    println!("✓ Calculation '{}' completed", name);
    if let Some(dir) = &calc.results.output_directory {
        println!("  Output directory: {}", dir.display());
    }
    if !calc.results.output_files.is_empty() {
        println!("  Output files: {}", calc.results.output_files.join(", "));
    }
    if let Some(summary) = &calc.results.summary {
        if let Some(energy) = summary.total_energy {
            println!("  Total energy: {}", energy);
        }
        if let Some(time) = summary.final_time {
            println!("  Final time: {}", time);
        }
        if let Some(converged) = summary.converged {
            println!("  Converged: {}", converged);
        }
    }
}

fn cmd_analyze(
    base_dir: Option<PathBuf>,
    name: &str,
    tools: Vec<String>,
    rdgpop_nz: Option<String>,
    rdgpop_dof: Option<String>,
    bin_dir: Option<PathBuf>,
) -> AppResult<()> {
    let mut runner = LocalRunner::open_with_options(
        base_dir,
        qd_app::RunnerOptions {
            analysis_bin_dir: bin_dir,
        },
    )?;
    let calc = runner
        .get_calculation(name)
        .ok_or_else(|| AppError::CalculationNotFound(name.to_string()))?;
    let tools = if tools.is_empty() {
        default_analysis_tools(calc.workflow_type)
    } else {
        tools
    };

    let results = if rdgpop_nz.is_some() || rdgpop_dof.is_some() {
        let defaults = AnalysisParams::default();
        let params = AnalysisParams {
            rdgpop_nz: rdgpop_nz.unwrap_or(defaults.rdgpop_nz),
            rdgpop_dof: rdgpop_dof.unwrap_or(defaults.rdgpop_dof),
            show_cmdline: defaults.show_cmdline,
        };
        runner.run_analysis_with_params(name, &tools, &params)?
    } else {
        runner.run_analysis(name, &tools)?
    };

    if results.is_empty() {
        println!("No analysis results for '{}'", name);
        return Ok(());
    }
    println!(
        "Analysis results saved to: {}",
        runner.output_directory(name)?.display()
    );
    for (tool, text) in &results {
        println!("\n== {} ==\n{}", tool, text.trim_end());
    }
    Ok(())
}

fn cmd_status(base_dir: Option<PathBuf>) -> AppResult<()> {
    let runner = open_runner(base_dir)?;
    let rows = runner.status_rows();
    if rows.is_empty() {
        println!("No calculations found");
        return Ok(());
    }
    println!("{:<24} {:<10} {:<8} Started", "Name", "Status", "Workflow");
    for row in rows {
        println!(
            "{:<24} {:<10} {:<8} {}",
            row.name,
            row.status.as_str(),
            row.workflow_type.as_str(),
            row.start_time
        );
    }
    Ok(())
}

fn cmd_example(base_dir: Option<PathBuf>) -> AppResult<()> {
    let example_dir = Path::new(EXAMPLE_DIR);
    if !example_dir.is_dir() {
        println!("Example file directory {} not found", EXAMPLE_DIR);
        return Ok(());
    }

    let mut runner = open_runner(base_dir)?;
    let calc = runner.create_calculation(CreateRequest {
        name: EXAMPLE_NAME.to_string(),
        inp_file: example_dir.join("ho.inp"),
        op_file: example_dir.join("ho.op"),
        workflow_type: WorkflowType::Mctdh,
        db_folder: None,
    })?;
    println!("✓ Created example calculation '{}'", calc.name);

    let Some(quantics) = find_on_path("quantics") else {
        println!("quantics executable not found, please run manually:");
        println!(
            "  cd {} && quantics -mnd input.inp",
            calc.working_directory.display()
        );
        return Ok(());
    };

    tracing::debug!(path = %quantics.display(), "found quantics on PATH");
    println!("Detected quantics executable, starting run...");
    let success = runner.run_calculation(EXAMPLE_NAME, &quantics)?;
    print_run_outcome(&runner, EXAMPLE_NAME, success);
    if success {
        println!("Running basic analysis...");
        let tools = vec!["rdcheck etot".to_string(), "rdcheck spop".to_string()];
        for (tool, text) in runner.run_analysis(EXAMPLE_NAME, &tools)? {
            println!("\n== {} ==\n{}", tool, text.trim_end());
        }
    }
    Ok(())
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Loaded configuration with command-line overrides applied. `--mode` and
/// `--base-dir` only apply when given and the file leaves them unset.
fn session_config(
    base_dir: Option<PathBuf>,
    mode: Option<ExecutionMode>,
    config_path: Option<&Path>,
) -> AppResult<QuanticsConfig> {
    let mut config = match config_path {
        Some(path) => load_config(path)?,
        None => QuanticsConfig::default(),
    };
    if let Some(mode) = mode {
        config.execution_mode = mode;
    }
    if config.runner_base().is_none() {
        config.base_directory = base_dir;
    }
    Ok(config)
}

fn cmd_session(
    base_dir: Option<PathBuf>,
    mode: Option<ExecutionMode>,
    config_path: Option<&Path>,
) -> AppResult<()> {
    let config = session_config(base_dir, mode, config_path)?;
    let capabilities = Capabilities::detect(&config);
    println!(
        "Execution mode: {} (platform {})",
        config.execution_mode,
        if capabilities.platform_available() {
            "available"
        } else {
            "not available"
        }
    );

    let outcome =
        Session::new(&config, &capabilities).launch(&mut |line| println!("{}", line))?;
    match outcome {
        LaunchOutcome::Local(local) => {
            if let Some(tree) = &local.results {
                println!("\nResults:");
                print!("{}", tree.render());
            }
            if let Some(saved) = &local.saved_config {
                println!("Configuration saved to {}", saved.display());
            }
        }
        LaunchOutcome::Submitted { pk } => {
            if let Some(platform) = capabilities.platform() {
                println!("Waiting for process {}...", pk);
                platform.engine.wait_for_workers();
                print_json(&platform.adapter.get_calculation_status(pk))?;
            }
        }
    }
    Ok(())
}

fn cmd_platform(base_dir: Option<PathBuf>, args: PlatformArgs) -> AppResult<()> {
    let store = match args.store {
        Some(store) => store,
        None => base_dir
            .unwrap_or_else(LocalRunner::default_base_directory)
            .join(PLATFORM_STORE_DIR),
    };
    tracing::debug!(store = %store.display(), "opening workflow store");
    let engine = Arc::new(DirectoryEngine::open(&store)?);

    if let PlatformCommands::SetupCode {
        label,
        computer,
        executable,
        scheduler,
        prepend_text,
    } = args.command
    {
        let code = Code {
            label,
            computer,
            executable,
            scheduler,
            prepend_text,
        };
        let full_label = code.full_label();
        engine.register_code(code)?;
        println!("✓ Registered code '{}' in {}", full_label, store.display());
        return Ok(());
    }

    let adapter = Arc::new(PlatformAdapter::new(engine.clone(), args.code.as_deref()));
    match args.command {
        PlatformCommands::SetupCode { .. } => Ok(()),
        PlatformCommands::Submit {
            inp_file,
            op_file,
            workflow,
            db_folder,
            label,
            no_analysis,
            resources,
            walltime,
            queue,
        } => {
            let request = SubmitRequest {
                label,
                db_folder,
                run_analysis: !no_analysis,
                job: JobSettings {
                    num_mpiprocs: resources,
                    max_wallclock_seconds: walltime,
                    queue_name: queue,
                },
                ..SubmitRequest::new(inp_file, op_file, workflow)
            };
            let pk = adapter.submit_calculation(request)?;
            println!("✓ Submitted calculation with PK: {}", pk);
            // workchains run on this process's threads
            engine.wait_for_workers();
            print_json(&adapter.get_calculation_status(pk))
        }
        PlatformCommands::Status { pk } => print_json(&adapter.get_calculation_status(pk)),
        PlatformCommands::Results { pk } => print_json(&adapter.get_calculation_results(pk)),
        PlatformCommands::List { limit } => print_json(&adapter.list_calculations(limit)),
        PlatformCommands::Watch { pks, interval } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL);
            cmd_watch(adapter, &pks, interval)
        }
    }
}

fn cmd_watch(
    adapter: Arc<PlatformAdapter>,
    pks: &[ProcessId],
    interval: Duration,
) -> AppResult<()> {
    let (monitor, events) = StatusMonitor::start(adapter, interval)?;
    for &pk in pks {
        monitor.watch(pk);
    }

    let pending: BTreeSet<ProcessId> = pks.iter().copied().collect();
    let outcome = drain_until_settled(&events, pending.len(), |event| match event {
        MonitorEvent::StatusUpdated(status) => {
            println!("PK {} ({}): {}", status.pk, status.label, status.state);
            Ok(())
        }
        MonitorEvent::Finished { status, results } => {
            println!(
                "PK {} ({}) finished: {} exit={:?}",
                status.pk, status.label, status.state, status.exit_status
            );
            print_json(&results)
        }
        MonitorEvent::Error { pk, message } => {
            println!("PK {}: {}", pk, message);
            Ok(())
        }
    });
    monitor.stop();
    outcome
}

/// Hand events to `handle` until `expected` processes have finished or
/// failed. The watch set empties before the last events are delivered, so
/// terminal events are counted instead.
fn drain_until_settled(
    events: &Receiver<MonitorEvent>,
    expected: usize,
    mut handle: impl FnMut(MonitorEvent) -> AppResult<()>,
) -> AppResult<()> {
    let mut settled = 0;
    while settled < expected {
        let Ok(event) = events.recv() else {
            break;
        };
        if matches!(
            event,
            MonitorEvent::Finished { .. } | MonitorEvent::Error { .. }
        ) {
            settled += 1;
        }
        handle(event)?;
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(io::Error::from)?;
    println!("{}", text);
    Ok(())
}
