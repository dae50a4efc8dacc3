//! 租户通知配置存储：校验、版本历史、回滚与热加载

pub mod error;
pub mod file_source;
pub mod source;
pub mod store;
pub mod version;

pub use error::{validate_tenant_id, ConfigError, Result};
pub use file_source::{FileFormat, FileSource};
pub use source::{MemorySource, SettingsSource, SettingsWatcher};
pub use store::{SettingsChange, SettingsStore, DEFAULT_MAX_VERSIONS};
pub use version::{SettingsSection, SettingsVersion, VersionHistory};
