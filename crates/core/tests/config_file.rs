//! Loading engine configuration from disk.

use std::path::PathBuf;

use ember_core::config::{EngineConfig, PresentModePreference};
use ember_core::{Error, FilterKind};

fn write_temp(name: &str, text: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("ember-{}-{}.toml", name, std::process::id()));
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_load_full_file() {
    let path = write_temp(
        "full",
        r#"
        [window]
        title = "Test"
        width = 640
        height = 360

        [render]
        validation = false
        present_mode = "immediate"
        msaa_samples = 4
        clear_color = [0.1, 0.2, 0.3, 1.0]
        fence_timeout_ms = 1000

        [post]
        chain = ["bloom", "grayscale"]
        lighting = false
        exposure = 2.5

        [logging]
        filter = "warn"

        [assets]
        shader_dir = "build/shaders"
        "#,
    );

    let config = EngineConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.window.title, "Test");
    assert_eq!((config.window.width, config.window.height), (640, 360));
    assert!(!config.render.validation);
    assert_eq!(config.render.present_mode, PresentModePreference::Immediate);
    assert_eq!(config.render.msaa_samples, 4);
    assert_eq!(config.render.clear_color, [0.1, 0.2, 0.3, 1.0]);
    assert_eq!(config.post.chain, [FilterKind::Bloom, FilterKind::Grayscale]);
    assert!(!config.post.lighting);
    assert_eq!(config.post.exposure, 2.5);
    // Unset keys in a present section keep their defaults.
    assert_eq!(config.post.bloom_intensity, 0.04);
    assert_eq!(config.logging.filter, "warn");
    assert_eq!(
        config.assets.shader_path("tonemap.comp.spv"),
        PathBuf::from("build/shaders/tonemap.comp.spv")
    );
}

#[test]
fn test_invalid_file_reports_config_error() {
    let path = write_temp("dupes", "[post]\nchain = [\"tonemap\", \"tonemap\"]\n");
    let result = EngineConfig::load(&path);
    std::fs::remove_file(&path).unwrap();

    let err = result.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("tonemap"));
}

#[test]
fn test_empty_chain_is_allowed() {
    let config = EngineConfig::from_toml_str("[post]\nchain = []\n").unwrap();
    assert!(config.post.validated_chain().unwrap().is_empty());
}
