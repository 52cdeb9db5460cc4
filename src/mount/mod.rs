pub mod inspect;

pub use inspect::{MountProbe, SystemMountProbe};
