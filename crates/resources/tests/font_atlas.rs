//! Font atlas metadata loaded the way asset loaders hand it over.

use ember_resources::{FontAtlas, MeshData, ResourceError};

const ATLAS: &str = r#"
line_height = 18.0

[glyphs.A]
bounds = [0.0, -12.0, 9.0, 0.0]
advance = 10.0
uv = [0.0, 0.0, 0.25, 0.5]

[glyphs." "]
bounds = [0.0, 0.0, 0.0, 0.0]
advance = 5.0
uv = [0.0, 0.0, 0.0, 0.0]
"#;

#[test]
fn test_atlas_from_toml() {
    let atlas: FontAtlas = toml::from_str(ATLAS).expect("atlas parses");
    assert_eq!(atlas.line_height(), 18.0);
    assert_eq!(atlas.glyph_count(), 2);

    let a = atlas.glyph('A').expect("glyph A");
    assert_eq!(a.advance, 10.0);
    assert_eq!(a.uv_rect().z, 0.25);
    assert!(atlas.glyph(' ').expect("space").is_blank());
}

#[test]
fn test_missing_field_is_rejected() {
    let result: Result<FontAtlas, _> = toml::from_str("line_height = 1.0");
    assert!(result.is_err());
}

#[test]
fn test_mesh_rejects_empty_data() {
    let result = MeshData::<[f32; 3]>::new("quad", Vec::new(), vec![0, 1, 2]);
    assert_eq!(result, Err(ResourceError::EmptyMesh("quad".to_string())));
}
