//! Fan profile state machine
//!
//! One controller instance owns the EC bus and the single current-profile
//! state variable. It is only ever driven from the daemon's control task,
//! so there is exactly one in-flight apply at any time and no locking
//! anywhere below.

use nitro_core::{resolve_fan, EcBus, Fan, FanIo, FanStep, HardwareModel, SAFE_FAN_PROFILE};
use nitro_daemon::FailsafeRevert;
use nitro_error::{NitroError, Result};
use nitro_protocol::{FanProfile, FanRequest, FanSpeeds, Response, ResponseData};
use tracing::{error, info};

pub struct FanController<B: EcBus> {
    io: FanIo<B>,
    verified: bool,
    current: FanProfile,
}

impl<B: EcBus> FanController<B> {
    /// Create an unverified controller; no request is served and no
    /// register is written until [`mark_verified`](Self::mark_verified)
    pub fn new(bus: B, model: &'static HardwareModel) -> Self {
        Self {
            io: FanIo::new(bus, &model.ec),
            verified: false,
            current: SAFE_FAN_PROFILE,
        }
    }

    /// Record that the startup identity gate passed
    pub fn mark_verified(&mut self) {
        self.verified = true;
    }

    pub fn current(&self) -> FanProfile {
        self.current
    }

    /// Apply a profile: execute the resolver's write plan in order and
    /// record the new state only after every write succeeded
    ///
    /// On failure the recorded state keeps its prior value and the error is
    /// surfaced; the EC may be mid-sequence, which a re-issued apply
    /// resolves.
    pub fn apply(&mut self, profile: FanProfile) -> Result<()> {
        if !self.verified {
            return Err(NitroError::NotVerified);
        }

        for step in resolve_fan(profile) {
            match step {
                FanStep::Mode(fan, mode) => self.io.write_fan_mode(fan, mode)?,
                FanStep::Duty(fan, percent) => self.io.write_fan_duty(fan, percent)?,
            }
        }

        self.current = profile;
        info!("Fan profile applied: {}", profile);
        Ok(())
    }

    /// Duty-cycle telemetry for both fans
    pub fn fan_speeds(&mut self) -> Result<FanSpeeds> {
        if !self.verified {
            return Err(NitroError::NotVerified);
        }
        Ok(FanSpeeds {
            cpu: self.io.read_fan_duty(Fan::Cpu)?,
            gpu: self.io.read_fan_duty(Fan::Gpu)?,
        })
    }

    /// The command endpoint: one validated request in, one response out
    pub fn handle(&mut self, request: FanRequest) -> Response {
        match request {
            FanRequest::Ping => Response::ok_string("pong"),

            FanRequest::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

            FanRequest::SetFanProfile { profile } => {
                let profile = match profile.parse::<FanProfile>() {
                    Ok(p) => p,
                    Err(e) => return Response::error(e),
                };
                match self.apply(profile) {
                    Ok(()) => Response::ok_string(format!("Fan profile set to: {}", profile)),
                    Err(e) => {
                        error!("Failed to apply fan profile {}: {}", profile, e);
                        Response::error(e)
                    }
                }
            }

            FanRequest::GetFanProfile => Response::Ok(ResponseData::fan_profile(self.current)),

            FanRequest::GetFanSpeeds => match self.fan_speeds() {
                Ok(speeds) => Response::Ok(ResponseData::fan_speeds(speeds)),
                Err(e) => {
                    error!("Failed to read fan speeds: {}", e);
                    Response::error(e)
                }
            },
        }
    }
}

impl<B: EcBus> FailsafeRevert for FanController<B> {
    fn revert(&mut self) {
        match self.apply(SAFE_FAN_PROFILE) {
            Ok(()) => info!("Automatic fan control restored"),
            Err(e) => error!("Failed to restore automatic fan control: {}", e),
        }
    }
}
