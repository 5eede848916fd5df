//! Font atlas metadata.
//!
//! Glyph boxes and advances are in pixels relative to the pen position on the
//! baseline (y grows downward). UV rectangles are normalized to the atlas.

use std::collections::HashMap;

use glam::Vec4;
use serde::Deserialize;

use crate::error::{ResourceError, ResourceResult};

/// Placement of one character in the atlas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct Glyph {
    /// `[min_x, min_y, max_x, max_y]`
    pub bounds: [f32; 4],
    /// Pen advance after the glyph
    pub advance: f32,
    /// `[u0, v0, u1, v1]`
    pub uv: [f32; 4],
}

impl Glyph {
    /// UV rectangle as a vector.
    #[inline]
    pub fn uv_rect(&self) -> Vec4 {
        Vec4::from_array(self.uv)
    }

    /// Whitespace glyphs advance the pen but have no quad.
    #[inline]
    pub fn is_blank(&self) -> bool {
        self.bounds[2] <= self.bounds[0] || self.bounds[3] <= self.bounds[1]
    }
}

/// Glyph table for one bitmap font.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct FontAtlas {
    pub line_height: f32,
    glyphs: HashMap<char, Glyph>,
}

impl FontAtlas {
    /// Build an atlas, rejecting a non-positive line height.
    pub fn new(line_height: f32, glyphs: HashMap<char, Glyph>) -> ResourceResult<Self> {
        if line_height <= 0.0 {
            return Err(ResourceError::FontAtlas(format!(
                "line height must be positive, got {}",
                line_height
            )));
        }
        Ok(Self {
            line_height,
            glyphs,
        })
    }

    /// Atlas laid out as a grid of equal cells holding consecutive characters
    /// starting at `first`, row by row.
    pub fn grid(first: char, columns: u32, rows: u32, cell_width: f32, cell_height: f32) -> ResourceResult<Self> {
        if columns == 0 || rows == 0 {
            return Err(ResourceError::FontAtlas("grid must have cells".to_string()));
        }
        let start = first as u32;
        let mut glyphs = HashMap::new();
        for cell in 0..columns * rows {
            let Some(ch) = char::from_u32(start + cell) else {
                continue;
            };
            let (column, row) = (cell % columns, cell / columns);
            let u0 = column as f32 / columns as f32;
            let v0 = row as f32 / rows as f32;
            glyphs.insert(
                ch,
                Glyph {
                    bounds: [0.0, -cell_height, cell_width, 0.0],
                    advance: cell_width,
                    uv: [u0, v0, u0 + 1.0 / columns as f32, v0 + 1.0 / rows as f32],
                },
            );
        }
        Self::new(cell_height, glyphs)
    }

    /// Glyph for `ch`, if the atlas has one.
    pub fn glyph(&self, ch: char) -> Option<&Glyph> {
        self.glyphs.get(&ch)
    }

    #[inline]
    pub fn line_height(&self) -> f32 {
        self.line_height
    }

    #[inline]
    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_atlas() {
        let atlas = FontAtlas::grid(' ', 16, 6, 8.0, 16.0).unwrap();
        assert_eq!(atlas.glyph_count(), 96);
        assert_eq!(atlas.line_height(), 16.0);

        let a = atlas.glyph('A').unwrap();
        // 'A' is cell 33: column 1, row 2
        assert_eq!(a.uv, [1.0 / 16.0, 2.0 / 6.0, 2.0 / 16.0, 3.0 / 6.0]);
        assert_eq!(a.advance, 8.0);
        assert!(!a.is_blank());
        assert!(atlas.glyph('\u{00e9}').is_none());
    }

    #[test]
    fn test_blank_glyph() {
        let space = Glyph {
            bounds: [0.0, 0.0, 0.0, 0.0],
            advance: 4.0,
            uv: [0.0; 4],
        };
        assert!(space.is_blank());
    }

    #[test]
    fn test_invalid_line_height() {
        assert!(FontAtlas::new(0.0, HashMap::new()).is_err());
        assert!(FontAtlas::grid('a', 0, 1, 1.0, 1.0).is_err());
    }
}
