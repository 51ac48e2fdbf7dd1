/// TOML configuration file model and loader.
pub mod toml_config;
