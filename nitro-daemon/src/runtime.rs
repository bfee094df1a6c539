//! Daemon startup hardening and process housekeeping
//!
//! Both daemons run the same startup phases before touching hardware:
//! environment sanitization, umask, resource limits, working directory,
//! privilege check, logging, socket path validation, and PID-file based
//! single-instance enforcement. The hardware itself has no locking
//! primitive, so two instances of the same daemon would race at the
//! register level with no detection - the PID file is the guard.

use nitro_error::{NitroError, Result};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Log level environment variable shared by both daemons
pub const LOG_ENV_VAR: &str = "NITRO_LOG";

/// Strip loader- and resolver-controlled variables from the environment
pub fn sanitize_environment() {
    const DANGEROUS_VARS: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "LD_DEBUG",
        "LD_PROFILE",
        "MALLOC_CHECK_",
        "HOSTALIASES",
        "LOCALDOMAIN",
        "RES_OPTIONS",
        "TMPDIR",
        "IFS",
        "PATH", // We'll set our own
    ];

    for var in DANGEROUS_VARS {
        std::env::remove_var(var);
    }

    std::env::set_var("PATH", "/usr/sbin:/usr/bin:/sbin:/bin");
    std::env::set_var("LC_ALL", "C");
    std::env::set_var("LANG", "C");
}

/// Clamp resource limits for a long-lived root process
pub fn set_resource_limits() {
    // No core dumps from a root daemon
    set_rlimit(libc::RLIMIT_CORE as i32, 0, 0);

    // Socket + connections + a handful of /sys files + logging
    set_rlimit(libc::RLIMIT_NOFILE as i32, 256, 256);
}

fn set_rlimit(resource: i32, soft: u64, hard: u64) {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: setrlimit is safe with a known RLIMIT_* constant and an
    // initialized rlimit struct.
    unsafe {
        #[allow(clippy::useless_conversion)]
        if libc::setrlimit(resource as libc::__rlimit_resource_t, &limit) != 0 {
            warn!("Failed to set rlimit for resource {}", resource);
        }
    }
}

/// Set restrictive umask (owner-only for anything we create)
pub fn set_secure_umask() {
    // SAFETY: umask only sets the file creation mask for the process.
    unsafe { libc::umask(0o077) };
}

/// Run from / so no inherited working directory stays held open
pub fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        warn!("Could not chdir to /");
    }
}

/// Require root: EC and sysfs writes need euid 0
pub fn verify_privileges() -> Result<()> {
    // SAFETY: geteuid and getuid just return the process's user IDs.
    let euid = unsafe { libc::geteuid() };
    let uid = unsafe { libc::getuid() };

    if euid != 0 {
        return Err("Daemon must run as root (euid=0) for hardware access".into());
    }

    if uid != 0 && euid == 0 {
        warn!("Running as setuid root - this is not recommended");
    }

    info!("Running as root (uid={}, euid={})", uid, euid);
    Ok(())
}

/// Install a panic hook that logs instead of silently dying
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));
}

/// Initialize tracing to the systemd journal, falling back to stdout
pub fn init_logging() {
    let log_level = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "info".to_string());

    let journald_available = Path::new("/run/systemd/journal/socket").exists();

    if journald_available {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
}

/// Default socket path for a daemon name
pub fn default_socket_path(name: &str) -> String {
    if Path::new("/run").exists() {
        format!("/run/{}.sock", name)
    } else {
        format!("/var/run/{}.sock", name)
    }
}

/// PID file path for a daemon name
pub fn pid_file_path(name: &str) -> String {
    if Path::new("/run").exists() {
        format!("/run/{}.pid", name)
    } else {
        format!("/var/run/{}.pid", name)
    }
}

/// Validate a socket path for security
pub fn validate_socket_path(path: &str) -> Result<()> {
    let p = Path::new(path);

    if !p.is_absolute() {
        return Err("Socket path must be absolute".into());
    }

    if path.contains("..") {
        return Err("Socket path contains path traversal".into());
    }

    if path.contains('\0') {
        return Err("Socket path contains null byte".into());
    }

    let safe_dirs = ["/run/", "/var/run/", "/tmp/"];
    if !safe_dirs.iter().any(|d| path.starts_with(d)) {
        return Err(format!("Socket path must be under {:?}", safe_dirs).into());
    }

    if let Some(parent) = p.parent() {
        if !parent.exists() {
            return Err(format!("Parent directory does not exist: {:?}", parent).into());
        }
    }

    // Refuse to reuse a symlink (symlink attack prevention)
    if p.exists()
        && p.symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    {
        return Err("Refusing symlinked socket path".into());
    }

    Ok(())
}

/// Write the PID file, detecting a still-running previous instance
pub fn write_pid_file(path: &str) -> Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    if Path::new(path).exists() {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(old_pid) = content.trim().parse::<i32>() {
                // SAFETY: kill with signal 0 only checks process existence.
                if unsafe { libc::kill(old_pid, 0) } == 0 {
                    return Err(NitroError::generic(format!(
                        "Another instance is running (PID {})",
                        old_pid
                    )));
                }
            }
        }
        // Left behind by a dead instance
        let _ = std::fs::remove_file(path);
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true) // Fail if exists (race condition protection)
        .mode(0o644)
        .open(path)
        .map_err(|source| NitroError::FileWrite {
            path: path.into(),
            source,
        })?;

    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;

    debug!("PID file written: {}", path);
    Ok(())
}

/// Remove the socket and PID file on shutdown
pub fn cleanup(socket_path: &str, pid_path: &str) {
    for path in [socket_path, pid_path] {
        if Path::new(path).exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path, e);
            }
        }
    }
    info!("Cleanup complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_paths_outside_safe_dirs_are_rejected() {
        assert!(validate_socket_path("/run/nitrofand.sock").is_ok());
        assert!(validate_socket_path("/tmp/test.sock").is_ok());
        assert!(validate_socket_path("relative.sock").is_err());
        assert!(validate_socket_path("/etc/nitrofand.sock").is_err());
        assert!(validate_socket_path("/run/../etc/passwd").is_err());
    }

    #[test]
    fn default_paths_use_the_daemon_name() {
        assert!(default_socket_path("nitrofand").ends_with("/nitrofand.sock"));
        assert!(pid_file_path("nitroperfd").ends_with("/nitroperfd.pid"));
    }
}
