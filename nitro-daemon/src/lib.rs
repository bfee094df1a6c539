//! Shared chassis for the nitro privileged daemons
//!
//! The fan and performance daemons are structurally identical: a hardened
//! root process, one Unix socket, newline-delimited JSON requests funneled
//! into a single control task that owns the hardware state. This crate
//! carries everything both binaries share:
//!
//! - `runtime` - startup hardening, logging, PID file, socket path handling
//! - `server` - the generic socket server with peer-credential auditing,
//!   bounded messages, timeouts, and rate limiting
//! - `failsafe` - the scoped reversion guard wrapping a daemon's controller
//!
//! # Security Model
//! - **Privilege**: runs as root for EC/sysfs hardware access only
//! - **Validation**: profile names validated before any hardware access
//! - **Audit**: peer credential logging (UID/GID/PID) for all connections
//! - **Limits**: connection limits, message size limits, rate limiting
//! - **Isolation**: restrictive umask, working directory set to /
//! - **Signals**: graceful shutdown with hardware reversion

pub mod failsafe;
pub mod runtime;
pub mod server;

pub use failsafe::{Failsafe, FailsafeRevert};
pub use server::{run_server, Command};
