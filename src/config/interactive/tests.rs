use tempfile::TempDir;

use super::load_existing_config as load_existing_config_impl;
use super::*;

#[test]
fn load_existing_config_without_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert!(config.store.max_embeddings > 0);
    assert_eq!(config.embeddings.remote, None);
}

#[test]
fn load_existing_config_reads_saved_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut saved = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    saved.store.max_embeddings = 42;
    saved.save().expect("should save");

    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");
    assert_eq!(config.store.max_embeddings, 42);
}

#[test]
fn invalid_existing_config_falls_back_to_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[store]\nmax_embeddings = 0\n",
    )
    .expect("should write config");

    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");
    assert_eq!(config.store.max_embeddings, 10_000);
    assert_eq!(config.get_base_dir(), temp_dir.path());
}

#[test]
fn strategy_positions_match_menu() {
    assert_eq!(strategy_position(OverflowStrategy::TruncateOld), 0);
    assert_eq!(strategy_position(OverflowStrategy::TruncateMiddle), 1);
}
