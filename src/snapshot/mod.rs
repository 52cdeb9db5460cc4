pub mod lvm;
pub mod zfs;

pub use lvm::{LvmSettings, LvmSnapshots, SnapshotRecord, Volume};
pub use zfs::{RetentionSettings, RetentionSnapshot, ZfsRetention};
