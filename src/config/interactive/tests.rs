use super::load_existing_config as load_existing_config_impl;
use tempfile::TempDir;

#[test]
fn load_existing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");

    assert!(!config.ollama.host.is_empty());
    assert!(config.ollama.port > 0);
    assert!(!config.ollama.model.is_empty());
    assert!(config.ollama.batch_size > 0);
    assert_eq!(config.base_dir.as_deref(), Some(temp_dir.path()));
}

#[test]
fn invalid_existing_config_falls_back_to_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join("config.toml"), "not = [valid")
        .expect("should write config");

    let config = load_existing_config_impl(temp_dir.path()).expect("falls back to defaults");
    assert_eq!(config.chunking.chunk_size, 500);
    assert_eq!(config.base_dir.as_deref(), Some(temp_dir.path()));
}
