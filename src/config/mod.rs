pub mod load;
pub mod model;

pub use load::{load_job, load_settings, DEFAULT_SETTINGS_PATH};
pub use model::{CommandHookConfig, RuntimeJob, Settings, Target, VolumeConfig};
