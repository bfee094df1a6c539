//! CPU performance control daemon (nitroperfd)
//!
//! Privileged service applying governor/EPP/turbo profiles across all
//! logical cores of one verified laptop model. Structurally identical to
//! nitrofand: identity gate, single control task, Unix socket endpoint,
//! and a fail-safe reversion to the conservative profile on exit.

mod control;

use nitro_core::SysfsCpu;
use nitro_daemon::server::{self, shutdown_signal};
use nitro_daemon::{runtime, Command, Failsafe};
use nitro_protocol::PerfRequest;
use tokio::sync::mpsc;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DAEMON_NAME: &str = "nitroperfd";

fn print_help() {
    eprintln!("nitroperfd {} - CPU performance control daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    nitroperfd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -s, --socket PATH   Socket path (default: {})", runtime::default_socket_path(DAEMON_NAME));
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}           Log level (trace, debug, info, warn, error)", runtime::LOG_ENV_VAR);
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    runtime::install_panic_hook();

    // Hardening before anything else runs
    runtime::sanitize_environment();
    runtime::set_secure_umask();
    runtime::set_resource_limits();
    runtime::secure_working_directory();

    let args: Vec<String> = std::env::args().collect();
    let mut socket_path = runtime::default_socket_path(DAEMON_NAME);

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("nitroperfd {}", VERSION);
                return Ok(());
            }
            "-s" | "--socket" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --socket requires a path argument");
                    std::process::exit(1);
                }
                socket_path = args[i].clone();
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    runtime::init_logging();
    info!("STARTUP: nitroperfd {} starting", VERSION);

    if let Err(e) = runtime::verify_privileges() {
        error!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = runtime::validate_socket_path(&socket_path) {
        error!("Invalid socket path: {}", e);
        std::process::exit(1);
    }

    // Identity gate: no sysfs write of any kind before this passes
    let model = match nitro_core::verify() {
        Ok(model) => {
            info!("Hardware compatibility verified: {}", model.name);
            model
        }
        Err(e) => {
            error!("HARDWARE SAFETY LOCK ENGAGED");
            error!("{}", e);
            error!("Driving cpufreq on unsupported hardware risks instability");
            std::process::exit(1);
        }
    };

    let cpu = match SysfsCpu::discover(&model.cpu) {
        Ok(cpu) => cpu,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let mut controller = control::PerfController::new(cpu);
    controller.mark_verified();

    let pid_path = runtime::pid_file_path(DAEMON_NAME);
    if let Err(e) = runtime::write_pid_file(&pid_path) {
        error!("Could not write PID file: {}", e);
        std::process::exit(1);
    }

    info!("STARTUP: Socket path: {}", socket_path);
    info!("STARTUP: PID: {}", std::process::id());
    info!("Available profiles: {}", nitro_protocol::VALID_PERF_PROFILES);

    let (tx, rx) = mpsc::channel(32);
    let control_task = tokio::spawn(control_loop(rx, controller));

    let result = server::run_server(&socket_path, tx).await;

    if let Err(e) = control_task.await {
        error!("Control task failed: {}", e);
    }

    runtime::cleanup(&socket_path, &pid_path);

    if let Err(e) = result {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Single-writer control task: owns the controller, serves requests in
/// arrival order, and reverts to the conservative profile on every exit
/// route
async fn control_loop(
    mut rx: mpsc::Receiver<Command<PerfRequest>>,
    controller: control::PerfController<SysfsCpu>,
) {
    let mut controller = Failsafe::arm(controller);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            // Reversion preempts queued requests but never an in-flight one
            _ = &mut shutdown => break,
            command = rx.recv() => match command {
                Some(command) => {
                    let response = controller.handle(command.request);
                    let _ = command.reply.send(response);
                }
                None => break,
            },
        }
    }
    // Failsafe drop restores the conservative profile here
}
