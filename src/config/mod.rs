pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{apply_patches, check_patches, resolve_target};
pub use loader::{load_from_path, load_from_str, load_from_str_as, ConfigError, ConfigFormat};
pub use schema::{
    FileDefinition, Metadata, PatchConfig, RuleDefinition, ValidationError, ValidationIssue,
};
