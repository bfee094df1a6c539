//! Fan control daemon (nitrofand)
//!
//! Privileged service applying open-loop fan duty-cycle profiles to the
//! embedded controller of one verified laptop model. Unprivileged clients
//! talk to it over a Unix domain socket; the daemon refuses to start on any
//! other machine and restores automatic fan control before it exits.

mod control;

use nitro_core::EcDev;
use nitro_daemon::server::{self, shutdown_signal};
use nitro_daemon::{runtime, Command, Failsafe};
use nitro_protocol::FanRequest;
use tokio::sync::mpsc;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DAEMON_NAME: &str = "nitrofand";

fn print_help() {
    eprintln!("nitrofand {} - EC fan control daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    nitrofand [OPTIONS]");
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
                println!("nitrofand {}", VERSION);
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
    info!("STARTUP: nitrofand {} starting", VERSION);

    if let Err(e) = runtime::verify_privileges() {
        error!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = runtime::validate_socket_path(&socket_path) {
        error!("Invalid socket path: {}", e);
        std::process::exit(1);
    }

    // Identity gate: no EC access of any kind before this passes
    let model = match nitro_core::verify() {
        Ok(model) => {
            info!("Hardware compatibility verified: {}", model.name);
            model
        }
        Err(e) => {
            error!("HARDWARE SAFETY LOCK ENGAGED");
            error!("{}", e);
            error!("Writing EC registers on unsupported hardware risks thermal damage");
            std::process::exit(1);
        }
    };

    let bus = match EcDev::open() {
        Ok(bus) => bus,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let mut controller = control::FanController::new(bus, model);
    controller.mark_verified();

    let pid_path = runtime::pid_file_path(DAEMON_NAME);
    if let Err(e) = runtime::write_pid_file(&pid_path) {
        error!("Could not write PID file: {}", e);
        std::process::exit(1);
    }

    info!("STARTUP: Socket path: {}", socket_path);
    info!("STARTUP: PID: {}", std::process::id());
    info!("Available profiles: {}", nitro_protocol::VALID_FAN_PROFILES);

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
/// arrival order, and reverts to automatic fan control on every exit route
async fn control_loop(
    mut rx: mpsc::Receiver<Command<FanRequest>>,
    controller: control::FanController<EcDev>,
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
    // Failsafe drop restores automatic fan control here
}
