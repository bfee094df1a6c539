//! CPU performance profile state machine
//!
//! Mirror of the fan daemon's controller for the cpufreq domain: one
//! instance owns the sysfs access layer and the current-profile state,
//! driven only from the single control task.

use nitro_core::{resolve_perf, CpuCtl, SAFE_PERF_PROFILE};
use nitro_daemon::FailsafeRevert;
use nitro_error::{NitroError, Result};
use nitro_protocol::{CpuStatus, PerfProfile, PerfRequest, Response, ResponseData};
use tracing::{error, info};

pub struct PerfController<C: CpuCtl> {
    cpu: C,
    verified: bool,
    current: PerfProfile,
}

impl<C: CpuCtl> PerfController<C> {
    pub fn new(cpu: C) -> Self {
        Self {
            cpu,
            verified: false,
            current: SAFE_PERF_PROFILE,
        }
    }

    /// Record that the startup identity gate passed
    pub fn mark_verified(&mut self) {
        self.verified = true;
    }

    pub fn current(&self) -> PerfProfile {
        self.current
    }

    /// Apply a profile to every enumerated core, then the turbo toggle;
    /// state is recorded only after the full sequence succeeded
    pub fn apply(&mut self, profile: PerfProfile) -> Result<()> {
        if !self.verified {
            return Err(NitroError::NotVerified);
        }

        let plan = resolve_perf(profile);

        for core in 0..self.cpu.core_count() {
            self.cpu.write_governor(core, plan.governor)?;
        }
        for core in 0..self.cpu.core_count() {
            self.cpu.write_epp(core, plan.epp)?;
        }
        self.cpu.write_turbo(plan.turbo)?;

        self.current = profile;
        info!(
            "Performance profile applied: {} (governor={}, epp={}, turbo={})",
            profile, plan.governor, plan.epp, plan.turbo
        );
        Ok(())
    }

    /// Governor/EPP of the first core plus the turbo state
    pub fn cpu_status(&self) -> Result<CpuStatus> {
        if !self.verified {
            return Err(NitroError::NotVerified);
        }
        Ok(CpuStatus {
            governor: self.cpu.read_governor(0)?,
            epp: self.cpu.read_epp(0)?,
            turbo: self.cpu.read_turbo()?,
        })
    }

    /// The command endpoint: one validated request in, one response out
    pub fn handle(&mut self, request: PerfRequest) -> Response {
        match request {
            PerfRequest::Ping => Response::ok_string("pong"),

            PerfRequest::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

            PerfRequest::SetPerformanceProfile { profile } => {
                let profile = match profile.parse::<PerfProfile>() {
                    Ok(p) => p,
                    Err(e) => return Response::error(e),
                };
                match self.apply(profile) {
                    Ok(()) => {
                        Response::ok_string(format!("Performance profile set to: {}", profile))
                    }
                    Err(e) => {
                        error!("Failed to apply performance profile {}: {}", profile, e);
                        Response::error(e)
                    }
                }
            }

            PerfRequest::GetPerformanceProfile => {
                Response::Ok(ResponseData::performance_profile(self.current))
            }

            PerfRequest::GetCpuStatus => match self.cpu_status() {
                Ok(status) => Response::Ok(ResponseData::cpu_status(status)),
                Err(e) => {
                    error!("Failed to read CPU status: {}", e);
                    Response::error(e)
                }
            },
        }
    }
}

impl<C: CpuCtl> FailsafeRevert for PerfController<C> {
    fn revert(&mut self) {
        match self.apply(SAFE_PERF_PROFILE) {
            Ok(()) => info!("Conservative CPU profile restored"),
            Err(e) => error!("Failed to restore conservative CPU profile: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nitro_daemon::Failsafe;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Governor(usize, String),
        Epp(usize, String),
        Turbo(bool),
    }

    /// cpufreq fake recording every write for a fixed core count
    struct RecordingCpu {
        ops: Rc<RefCell<Vec<Op>>>,
        cores: usize,
        fail_governor_core: Option<usize>,
    }

    impl RecordingCpu {
        fn new(ops: Rc<RefCell<Vec<Op>>>, cores: usize) -> Self {
            Self {
                ops,
                cores,
                fail_governor_core: None,
            }
        }
    }

    impl CpuCtl for RecordingCpu {
        fn core_count(&self) -> usize {
            self.cores
        }

        fn write_governor(&mut self, core: usize, governor: &str) -> Result<()> {
            if self.fail_governor_core == Some(core) {
                return Err(NitroError::AttrWrite {
                    path: format!("cpu{}/cpufreq/scaling_governor", core).into(),
                    reason: "write rejected".into(),
                });
            }
            self.ops
                .borrow_mut()
                .push(Op::Governor(core, governor.to_string()));
            Ok(())
        }

        fn write_epp(&mut self, core: usize, epp: &str) -> Result<()> {
            self.ops.borrow_mut().push(Op::Epp(core, epp.to_string()));
            Ok(())
        }

        fn write_turbo(&mut self, enabled: bool) -> Result<()> {
            self.ops.borrow_mut().push(Op::Turbo(enabled));
            Ok(())
        }

        fn read_governor(&self, _core: usize) -> Result<String> {
            Ok("powersave".into())
        }

        fn read_epp(&self, _core: usize) -> Result<String> {
            Ok("balance_performance".into())
        }

        fn read_turbo(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn verified_controller(
        ops: Rc<RefCell<Vec<Op>>>,
        cores: usize,
    ) -> PerfController<RecordingCpu> {
        let mut controller = PerfController::new(RecordingCpu::new(ops, cores));
        controller.mark_verified();
        controller
    }

    #[test]
    fn warspeed_hits_every_core_then_turbo() {
        let ops = Rc::new(RefCell::new(Vec::new()));
        let mut controller = verified_controller(ops.clone(), 2);

        let response = controller.handle(PerfRequest::SetPerformanceProfile {
            profile: "warspeed".into(),
        });

        assert_eq!(
            *ops.borrow(),
            vec![
                Op::Governor(0, "performance".into()),
                Op::Governor(1, "performance".into()),
                Op::Epp(0, "performance".into()),
                Op::Epp(1, "performance".into()),
                Op::Turbo(true),
            ]
        );
        assert_eq!(controller.current(), PerfProfile::WarSpeed);
        match response {
            Response::Ok(data) => assert!(data.value.unwrap().contains("warspeed")),
            Response::Error { message } => panic!("unexpected error: {}", message),
        }
    }

    #[test]
    fn unknown_profile_is_rejected_without_io() {
        let ops = Rc::new(RefCell::new(Vec::new()));
        let mut controller = verified_controller(ops.clone(), 4);

        let response = controller.handle(PerfRequest::SetPerformanceProfile {
            profile: "ludicrous".into(),
        });

        assert!(ops.borrow().is_empty());
        assert_eq!(controller.current(), PerfProfile::Balanced);
        match response {
            Response::Error { message } => assert!(message.contains("ludicrous")),
            Response::Ok(_) => panic!("unknown profile accepted"),
        }
    }

    #[test]
    fn reapplying_a_profile_is_byte_identical() {
        let ops = Rc::new(RefCell::new(Vec::new()));
        let mut controller = verified_controller(ops.clone(), 2);

        controller.apply(PerfProfile::Silent).unwrap();
        let first = ops.borrow().clone();
        ops.borrow_mut().clear();

        controller.apply(PerfProfile::Silent).unwrap();

        assert_eq!(*ops.borrow(), first);
        assert_eq!(controller.current(), PerfProfile::Silent);
    }

    #[test]
    fn unverified_controller_never_writes() {
        let ops = Rc::new(RefCell::new(Vec::new()));
        let mut controller = PerfController::new(RecordingCpu::new(ops.clone(), 2));

        let err = controller.apply(PerfProfile::WarSpeed).unwrap_err();

        assert!(matches!(err, NitroError::NotVerified));
        assert!(ops.borrow().is_empty());
    }

    #[test]
    fn failed_write_preserves_recorded_state() {
        let ops = Rc::new(RefCell::new(Vec::new()));
        let mut cpu = RecordingCpu::new(ops.clone(), 2);
        cpu.fail_governor_core = Some(1);
        let mut controller = PerfController::new(cpu);
        controller.mark_verified();

        let err = controller.apply(PerfProfile::WarSpeed).unwrap_err();

        assert!(matches!(err, NitroError::AttrWrite { .. }));
        assert_eq!(controller.current(), PerfProfile::Balanced);
        // Core 0 was written before the failure; no EPP or turbo writes ran
        assert_eq!(*ops.borrow(), vec![Op::Governor(0, "performance".into())]);
    }

    #[test]
    fn termination_reverts_to_the_conservative_profile() {
        let ops = Rc::new(RefCell::new(Vec::new()));
        {
            let mut guard = Failsafe::arm(verified_controller(ops.clone(), 2));
            guard.apply(PerfProfile::WarSpeed).unwrap();
            ops.borrow_mut().clear();
        }
        assert_eq!(
            *ops.borrow(),
            vec![
                Op::Governor(0, "powersave".into()),
                Op::Governor(1, "powersave".into()),
                Op::Epp(0, "balance_performance".into()),
                Op::Epp(1, "balance_performance".into()),
                Op::Turbo(true),
            ]
        );
    }

    #[test]
    fn cpu_status_reads_back_the_first_core() {
        let ops = Rc::new(RefCell::new(Vec::new()));
        let controller = verified_controller(ops, 2);

        let status = controller.cpu_status().unwrap();
        assert_eq!(status.governor, "powersave");
        assert_eq!(status.epp, "balance_performance");
        assert!(status.turbo);
    }
}
