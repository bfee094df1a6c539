//! Supported hardware models
//!
//! A flat, compiled-in table keyed by DMI product name. Every register
//! offset and mode byte the daemons ever write comes from here; nothing is
//! probed at runtime. Adding support for another machine means adding one
//! entry to [`SUPPORTED_MODELS`] - the shipped build verifies exactly one.

/// The two fans the embedded controller exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fan {
    Cpu,
    Gpu,
}

/// Fan ownership: software-controlled duty cycle vs. firmware thermal logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    Manual,
    Auto,
}

/// EC register offsets and mode bytes for one model's fans
///
/// Offsets are byte positions in the EC debug interface file. The mode
/// bytes are what the EC firmware expects in the per-fan mode registers;
/// they differ between the CPU and GPU fan.
#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    pub cpu_fan_mode: u64,
    pub gpu_fan_mode: u64,
    pub cpu_fan_duty: u64,
    pub gpu_fan_duty: u64,
    pub cpu_fan_tach: u64,
    pub gpu_fan_tach: u64,
    pub cpu_manual: u8,
    pub cpu_auto: u8,
    pub gpu_manual: u8,
    pub gpu_auto: u8,
}

impl RegisterMap {
    pub fn mode_register(&self, fan: Fan) -> u64 {
        match fan {
            Fan::Cpu => self.cpu_fan_mode,
            Fan::Gpu => self.gpu_fan_mode,
        }
    }

    pub fn duty_register(&self, fan: Fan) -> u64 {
        match fan {
            Fan::Cpu => self.cpu_fan_duty,
            Fan::Gpu => self.gpu_fan_duty,
        }
    }

    pub fn tach_register(&self, fan: Fan) -> u64 {
        match fan {
            Fan::Cpu => self.cpu_fan_tach,
            Fan::Gpu => self.gpu_fan_tach,
        }
    }

    pub fn mode_byte(&self, fan: Fan, mode: FanMode) -> u8 {
        match (fan, mode) {
            (Fan::Cpu, FanMode::Manual) => self.cpu_manual,
            (Fan::Cpu, FanMode::Auto) => self.cpu_auto,
            (Fan::Gpu, FanMode::Manual) => self.gpu_manual,
            (Fan::Gpu, FanMode::Auto) => self.gpu_auto,
        }
    }
}

/// cpufreq sysfs locations for one model
#[derive(Debug, Clone, Copy)]
pub struct AttributeSet {
    /// Root containing the per-core cpuN/cpufreq policy directories
    pub cpufreq_root: &'static str,
    /// Global turbo-disable toggle ("1" = turbo off)
    pub no_turbo: &'static str,
}

/// Immutable descriptor for one supported machine
#[derive(Debug, Clone, Copy)]
pub struct HardwareModel {
    /// Substring the DMI product name must contain
    pub name: &'static str,
    pub ec: RegisterMap,
    pub cpu: AttributeSet,
}

/// Compiled-in allowlist of supported machines
pub const SUPPORTED_MODELS: &[HardwareModel] = &[HardwareModel {
    name: "Nitro AN515-57",
    ec: RegisterMap {
        cpu_fan_mode: 34,
        gpu_fan_mode: 33,
        cpu_fan_duty: 55,
        gpu_fan_duty: 58,
        cpu_fan_tach: 19,
        gpu_fan_tach: 21,
        cpu_manual: 0x0C,
        cpu_auto: 0x04,
        gpu_manual: 0x30,
        gpu_auto: 0x10,
    },
    cpu: AttributeSet {
        cpufreq_root: "/sys/devices/system/cpu",
        no_turbo: "/sys/devices/system/cpu/intel_pstate/no_turbo",
    },
}];

/// Human-readable list of supported model names, for diagnostics
pub const SUPPORTED_NAMES: &str = "Nitro AN515-57";

/// Match a detected identity string against the allowlist
///
/// Substring match: DMI product names often carry vendor prefixes or
/// trailing whitespace around the model designation.
pub fn match_model(identity: &str) -> Option<&'static HardwareModel> {
    SUPPORTED_MODELS
        .iter()
        .find(|model| identity.contains(model.name))
}
