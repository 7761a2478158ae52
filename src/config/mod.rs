// Configuration management module
// TOML settings, environment overrides and the interactive setup wizard

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    CompletionConfig, Config, ConfigError, EmbeddingConfig, HttpConfig, PipelineConfig,
    SearchConfig, SourceConfig, mask_secret,
};

/// Resolve the configuration directory: an explicit override, or the platform default.
#[inline]
pub fn resolve_config_dir(
    override_dir: Option<std::path::PathBuf>,
) -> Result<std::path::PathBuf, ConfigError> {
    override_dir.map_or_else(Config::config_dir, Ok)
}
