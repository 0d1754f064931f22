//! Shared protocol types: services, capabilities, sideband channels, and
//! the ref-update commands of a push.

use std::fmt;
use std::str::FromStr;

use crate::{errors::GitError, hash::ObjectHash};

/// The flush packet marker.
pub const PKT_FLUSH: &[u8; 4] = b"0000";

/// Capabilities this client announces when the server offers them.
pub const CLIENT_AGENT: &str = "agent=rsgit/0.1.0";

/// Git service types for the smart protocol.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ServiceType {
    UploadPack,
    ReceivePack,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServiceType::UploadPack => write!(f, "git-upload-pack"),
            ServiceType::ReceivePack => write!(f, "git-receive-pack"),
        }
    }
}

impl FromStr for ServiceType {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(ServiceType::UploadPack),
            "git-receive-pack" => Ok(ServiceType::ReceivePack),
            _ => Err(GitError::network(format!("invalid service: {s}"))),
        }
    }
}

/// Protocol capabilities the client understands. Unknown ones are carried
/// verbatim for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    MultiAck,
    MultiAckDetailed,
    NoDone,
    SideBand64k,
    ThinPack,
    OfsDelta,
    ReportStatus,
    DeleteRefs,
    Shallow,
    /// `symref=HEAD:refs/heads/<default>` and friends.
    Symref(String),
    Agent(String),
    Unknown(String),
}

impl FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("agent=") {
            return Ok(Capability::Agent(rest.to_string()));
        }
        if let Some(rest) = s.strip_prefix("symref=") {
            return Ok(Capability::Symref(rest.to_string()));
        }
        match s {
            "multi_ack" => Ok(Capability::MultiAck),
            "multi_ack_detailed" => Ok(Capability::MultiAckDetailed),
            "no-done" => Ok(Capability::NoDone),
            "side-band-64k" => Ok(Capability::SideBand64k),
            "thin-pack" => Ok(Capability::ThinPack),
            "ofs-delta" => Ok(Capability::OfsDelta),
            "report-status" => Ok(Capability::ReportStatus),
            "delete-refs" => Ok(Capability::DeleteRefs),
            "shallow" => Ok(Capability::Shallow),
            _ => Ok(Capability::Unknown(s.to_string())),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Capability::MultiAck => write!(f, "multi_ack"),
            Capability::MultiAckDetailed => write!(f, "multi_ack_detailed"),
            Capability::NoDone => write!(f, "no-done"),
            Capability::SideBand64k => write!(f, "side-band-64k"),
            Capability::ThinPack => write!(f, "thin-pack"),
            Capability::OfsDelta => write!(f, "ofs-delta"),
            Capability::ReportStatus => write!(f, "report-status"),
            Capability::DeleteRefs => write!(f, "delete-refs"),
            Capability::Shallow => write!(f, "shallow"),
            Capability::Symref(v) => write!(f, "symref={v}"),
            Capability::Agent(v) => write!(f, "agent={v}"),
            Capability::Unknown(v) => write!(f, "{v}"),
        }
    }
}

/// Side-band channels of a multiplexed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideBand {
    /// Channel 1 carries packfile data.
    PackfileData,
    /// Channel 2 carries progress text.
    ProgressInfo,
    /// Channel 3 carries a fatal error message.
    Error,
}

impl SideBand {
    pub fn value(&self) -> u8 {
        match self {
            Self::PackfileData => 0x01,
            Self::ProgressInfo => 0x02,
            Self::Error => 0x03,
        }
    }

    pub fn from_value(v: u8) -> Option<SideBand> {
        match v {
            0x01 => Some(SideBand::PackfileData),
            0x02 => Some(SideBand::ProgressInfo),
            0x03 => Some(SideBand::Error),
            _ => None,
        }
    }
}

/// One ref update of a push: `<old> <new> <name>`. The zero id stands for
/// creation (old) or deletion (new).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old: ObjectHash,
    pub new: ObjectHash,
    pub name: String,
}

/// Per-ref outcome from the server's report-status reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPushResult {
    pub name: String,
    pub ok: bool,
    pub message: Option<String>,
}

/// Parsed receive-pack report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub unpack_ok: bool,
    pub results: Vec<RefPushResult>,
}

impl PushReport {
    pub fn all_ok(&self) -> bool {
        self.unpack_ok && self.results.iter().all(|r| r.ok)
    }
}
