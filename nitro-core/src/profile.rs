//! Profile resolvers
//!
//! Pure mappings from an operator-selected profile to the concrete ordered
//! writes that realize it. No I/O, no state; the daemons' state machines
//! execute the plans through the access layers.

use crate::model::{Fan, FanMode};
use nitro_protocol::{FanProfile, PerfProfile};

/// Profile the fan daemon reverts to on shutdown
pub const SAFE_FAN_PROFILE: FanProfile = FanProfile::Auto;

/// Profile the performance daemon reverts to on shutdown
pub const SAFE_PERF_PROFILE: PerfProfile = PerfProfile::Balanced;

/// One step of a fan write plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanStep {
    Mode(Fan, FanMode),
    Duty(Fan, u8),
}

/// Resolve a fan profile into its ordered write plan
///
/// For manual profiles the mode write precedes the duty write for each fan:
/// the EC only latches a duty value while the fan is under manual control.
/// Auto emits mode writes only; the previously set duty becomes irrelevant
/// once firmware resumes ownership.
pub fn resolve_fan(profile: FanProfile) -> Vec<FanStep> {
    let duty = match profile {
        FanProfile::Silent => 25,
        FanProfile::Balanced => 50,
        FanProfile::MaxPower => 100,
        FanProfile::Auto => {
            return vec![
                FanStep::Mode(Fan::Cpu, FanMode::Auto),
                FanStep::Mode(Fan::Gpu, FanMode::Auto),
            ];
        }
    };

    vec![
        FanStep::Mode(Fan::Cpu, FanMode::Manual),
        FanStep::Duty(Fan::Cpu, duty),
        FanStep::Mode(Fan::Gpu, FanMode::Manual),
        FanStep::Duty(Fan::Gpu, duty),
    ]
}

/// Governor, energy preference, and turbo state for one performance profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfPlan {
    pub governor: &'static str,
    pub epp: &'static str,
    pub turbo: bool,
}

/// Resolve a performance profile; applied identically to every core
pub fn resolve_perf(profile: PerfProfile) -> PerfPlan {
    match profile {
        PerfProfile::Silent => PerfPlan {
            governor: "powersave",
            epp: "power",
            turbo: false,
        },
        PerfProfile::Balanced => PerfPlan {
            governor: "powersave",
            epp: "balance_performance",
            turbo: true,
        },
        PerfProfile::WarSpeed => PerfPlan {
            governor: "performance",
            epp: "performance",
            turbo: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANUAL_PROFILES: [FanProfile; 3] =
        [FanProfile::Silent, FanProfile::Balanced, FanProfile::MaxPower];

    #[test]
    fn mode_precedes_duty_for_each_fan() {
        for profile in MANUAL_PROFILES {
            let plan = resolve_fan(profile);
            for fan in [Fan::Cpu, Fan::Gpu] {
                let mode_at = plan
                    .iter()
                    .position(|s| matches!(s, FanStep::Mode(f, FanMode::Manual) if *f == fan))
                    .unwrap_or_else(|| panic!("{:?}: no manual mode write for {:?}", profile, fan));
                let duty_at = plan
                    .iter()
                    .position(|s| matches!(s, FanStep::Duty(f, _) if *f == fan))
                    .unwrap_or_else(|| panic!("{:?}: no duty write for {:?}", profile, fan));
                assert!(mode_at < duty_at, "{:?}: duty before mode for {:?}", profile, fan);
            }
        }
    }

    #[test]
    fn auto_emits_no_duty_writes() {
        let plan = resolve_fan(FanProfile::Auto);
        assert_eq!(
            plan,
            vec![
                FanStep::Mode(Fan::Cpu, FanMode::Auto),
                FanStep::Mode(Fan::Gpu, FanMode::Auto),
            ]
        );
    }

    #[test]
    fn duty_cycles_stay_in_range() {
        for profile in MANUAL_PROFILES {
            for step in resolve_fan(profile) {
                if let FanStep::Duty(_, percent) = step {
                    assert!(percent <= 100, "{:?}: duty {} out of range", profile, percent);
                }
            }
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        assert_eq!(resolve_fan(FanProfile::MaxPower), resolve_fan(FanProfile::MaxPower));
        assert_eq!(resolve_perf(PerfProfile::WarSpeed), resolve_perf(PerfProfile::WarSpeed));
    }

    #[test]
    fn warspeed_is_full_performance() {
        let plan = resolve_perf(PerfProfile::WarSpeed);
        assert_eq!(plan.governor, "performance");
        assert_eq!(plan.epp, "performance");
        assert!(plan.turbo);
    }

    #[test]
    fn silent_disables_turbo() {
        let plan = resolve_perf(PerfProfile::Silent);
        assert_eq!(plan.governor, "powersave");
        assert_eq!(plan.epp, "power");
        assert!(!plan.turbo);
    }
}
