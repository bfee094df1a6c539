//! Core library for the nitro control daemons
//!
//! Everything the two privileged daemons share below the IPC layer:
//!
//! - `model` - the static table of supported hardware models with their EC
//!   register maps and cpufreq attribute sets
//! - `identity` - the DMI-based hardware identity gate
//! - `ec` - raw embedded-controller register access and the fan I/O wrapper
//! - `cpufreq` - per-core governor/EPP/turbo attribute access
//! - `profile` - pure resolvers from operator profiles to ordered write plans
//!
//! All hardware I/O sits behind the `EcBus` and `CpuCtl` traits so the
//! daemons' state machines can be exercised against recording fakes.

pub mod cpufreq;
pub mod ec;
pub mod identity;
pub mod model;
pub mod profile;

pub use cpufreq::{CpuCtl, SysfsCpu};
pub use ec::{EcBus, EcDev, FanIo, EC_IO_PATH};
pub use identity::{read_product_name, verify, DMI_PRODUCT_NAME};
pub use model::{match_model, AttributeSet, Fan, FanMode, HardwareModel, RegisterMap, SUPPORTED_MODELS, SUPPORTED_NAMES};
pub use profile::{resolve_fan, resolve_perf, FanStep, PerfPlan, SAFE_FAN_PROFILE, SAFE_PERF_PROFILE};
