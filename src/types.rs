use std::fmt;
use std::str::FromStr;

/// Host value that runs commands directly instead of through the remote login.
pub const LOCALHOST: &str = "localhost";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::After => "after",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    ZfsLvm,
    Rdiff,
    RdiffLvm,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ZfsLvm => "zfs-lvm",
            JobKind::Rdiff => "rdiff",
            JobKind::RdiffLvm => "rdiff-lvm",
        }
    }

    pub fn uses_lvm(&self) -> bool {
        matches!(self, JobKind::ZfsLvm | JobKind::RdiffLvm)
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zfs-lvm" | "zfs_lvm" => Ok(JobKind::ZfsLvm),
            "rdiff" | "rdiff-backup" => Ok(JobKind::Rdiff),
            "rdiff-lvm" | "rdiff_lvm" => Ok(JobKind::RdiffLvm),
            _ => Err(format!(
                "invalid job kind {}; expected zfs-lvm, rdiff, or rdiff-lvm",
                s
            )),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_local(host: &str) -> bool {
    host == LOCALHOST
}
