//! Shared IPC protocol types for the nitro control daemons
//!
//! Each daemon listens on its own Unix socket and speaks newline-delimited
//! JSON: one request envelope per line in, one response envelope per line
//! out. Envelopes carry a correlation ID so clients can match responses to
//! requests over a pooled connection.

use nitro_error::NitroError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope<R> {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: R,
}

impl<R> RequestEnvelope<R> {
    pub fn new(request: R) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: R, id: u64) -> Self {
        Self { id, request }
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Comma-separated list of accepted fan profile names, for error messages
pub const VALID_FAN_PROFILES: &str = "silent, balanced, maxpower, auto";

/// Comma-separated list of accepted performance profile names
pub const VALID_PERF_PROFILES: &str = "silent, balanced, warspeed";

/// Fan profile selected by the operator
///
/// Manual profiles fix both fans at an open-loop duty cycle; `Auto` hands
/// control back to the embedded controller's own thermal logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanProfile {
    Silent,
    Balanced,
    MaxPower,
    Auto,
}

impl FanProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanProfile::Silent => "silent",
            FanProfile::Balanced => "balanced",
            FanProfile::MaxPower => "maxpower",
            FanProfile::Auto => "auto",
        }
    }
}

impl fmt::Display for FanProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FanProfile {
    type Err = NitroError;

    /// Case-normalized parse accepting the historical aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "silent" => Ok(FanProfile::Silent),
            "balanced" => Ok(FanProfile::Balanced),
            "maxpower" | "max_power" | "max" => Ok(FanProfile::MaxPower),
            "auto" => Ok(FanProfile::Auto),
            _ => Err(NitroError::invalid_profile(s, VALID_FAN_PROFILES)),
        }
    }
}

/// CPU performance profile selected by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerfProfile {
    Silent,
    Balanced,
    WarSpeed,
}

impl PerfProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerfProfile::Silent => "silent",
            PerfProfile::Balanced => "balanced",
            PerfProfile::WarSpeed => "warspeed",
        }
    }
}

impl fmt::Display for PerfProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerfProfile {
    type Err = NitroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "silent" => Ok(PerfProfile::Silent),
            "balanced" => Ok(PerfProfile::Balanced),
            "warspeed" | "war_speed" => Ok(PerfProfile::WarSpeed),
            _ => Err(NitroError::invalid_profile(s, VALID_PERF_PROFILES)),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Request type name for audit logging, implemented by both daemons' enums
pub trait RequestKind {
    fn type_name(&self) -> &'static str;
}

/// Requests understood by the fan daemon (nitrofand)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum FanRequest {
    Ping,
    Version,
    SetFanProfile { profile: String },
    GetFanProfile,
    GetFanSpeeds,
}

impl RequestKind for FanRequest {
    fn type_name(&self) -> &'static str {
        match self {
            FanRequest::Ping => "Ping",
            FanRequest::Version => "Version",
            FanRequest::SetFanProfile { .. } => "SetFanProfile",
            FanRequest::GetFanProfile => "GetFanProfile",
            FanRequest::GetFanSpeeds => "GetFanSpeeds",
        }
    }
}

/// Requests understood by the performance daemon (nitroperfd)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum PerfRequest {
    Ping,
    Version,
    SetPerformanceProfile { profile: String },
    GetPerformanceProfile,
    GetCpuStatus,
}

impl RequestKind for PerfRequest {
    fn type_name(&self) -> &'static str {
        match self {
            PerfRequest::Ping => "Ping",
            PerfRequest::Version => "Version",
            PerfRequest::SetPerformanceProfile { .. } => "SetPerformanceProfile",
            PerfRequest::GetPerformanceProfile => "GetPerformanceProfile",
            PerfRequest::GetCpuStatus => "GetCpuStatus",
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Duty-cycle readback for both fans, in percent
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FanSpeeds {
    pub cpu: u8,
    pub gpu: u8,
}

/// Current cpufreq state as reported by the first core plus the turbo toggle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuStatus {
    pub governor: String,
    pub epp: String,
    pub turbo: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_profile: Option<FanProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_profile: Option<PerfProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_speeds: Option<FanSpeeds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_status: Option<CpuStatus>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn fan_profile(p: FanProfile) -> Self { Self { fan_profile: Some(p), ..Self::default() } }
    pub fn performance_profile(p: PerfProfile) -> Self { Self { performance_profile: Some(p), ..Self::default() } }
    pub fn fan_speeds(s: FanSpeeds) -> Self { Self { fan_speeds: Some(s), ..Self::default() } }
    pub fn cpu_status(s: CpuStatus) -> Self { Self { cpu_status: Some(s), ..Self::default() } }
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn error(msg: impl ToString) -> Self {
        Response::Error { message: msg.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_profile_parse_accepts_aliases_and_case() {
        assert_eq!("silent".parse::<FanProfile>().unwrap(), FanProfile::Silent);
        assert_eq!("Balanced".parse::<FanProfile>().unwrap(), FanProfile::Balanced);
        assert_eq!("MAXPOWER".parse::<FanProfile>().unwrap(), FanProfile::MaxPower);
        assert_eq!("max_power".parse::<FanProfile>().unwrap(), FanProfile::MaxPower);
        assert_eq!("max".parse::<FanProfile>().unwrap(), FanProfile::MaxPower);
        assert_eq!(" auto ".parse::<FanProfile>().unwrap(), FanProfile::Auto);
    }

    #[test]
    fn fan_profile_parse_rejects_unknown_names() {
        let err = "bogus".parse::<FanProfile>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bogus"), "error should name the input: {}", msg);
        assert!(msg.contains(VALID_FAN_PROFILES), "error should list valid names: {}", msg);
    }

    #[test]
    fn perf_profile_parse_accepts_aliases() {
        assert_eq!("warspeed".parse::<PerfProfile>().unwrap(), PerfProfile::WarSpeed);
        assert_eq!("war_speed".parse::<PerfProfile>().unwrap(), PerfProfile::WarSpeed);
        assert!("turbo".parse::<PerfProfile>().is_err());
    }

    #[test]
    fn request_envelope_wire_shape() {
        let env = RequestEnvelope::with_id(
            FanRequest::SetFanProfile { profile: "maxpower".into() },
            7,
        );
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(
            json,
            r#"{"id":7,"cmd":"SetFanProfile","data":{"profile":"maxpower"}}"#
        );

        let parsed: RequestEnvelope<FanRequest> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, 7);
        assert!(matches!(parsed.request, FanRequest::SetFanProfile { ref profile } if profile == "maxpower"));
    }

    #[test]
    fn response_envelope_wire_shape() {
        let ok = ResponseEnvelope::new(3, Response::ok_string("pong"));
        let json = serde_json::to_string(&ok).unwrap();
        assert_eq!(json, r#"{"id":3,"status":"ok","value":"pong"}"#);

        let err: ResponseEnvelope =
            serde_json::from_str(r#"{"id":4,"status":"error","message":"nope"}"#).unwrap();
        assert!(matches!(err.response, Response::Error { ref message } if message == "nope"));
    }

    #[test]
    fn request_ids_are_monotonic() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert!(b > a);
    }
}
