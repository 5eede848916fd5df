//! Built-in 3x5 pixel font for the frame statistics readout.

use std::collections::HashMap;

use ember_resources::{FontAtlas, Glyph, ResourceResult};

const GLYPH_W: usize = 3;
const GLYPH_H: usize = 5;
/// Cell size in the atlas, including one pixel of padding right and below.
const CELL_W: usize = GLYPH_W + 1;
const CELL_H: usize = GLYPH_H + 1;

const GLYPHS: [(char, [&str; GLYPH_H]); 16] = [
    ('0', ["###", "#.#", "#.#", "#.#", "###"]),
    ('1', [".#.", "##.", ".#.", ".#.", "###"]),
    ('2', ["###", "..#", "###", "#..", "###"]),
    ('3', ["###", "..#", "###", "..#", "###"]),
    ('4', ["#.#", "#.#", "###", "..#", "..#"]),
    ('5', ["###", "#..", "###", "..#", "###"]),
    ('6', ["###", "#..", "###", "#.#", "###"]),
    ('7', ["###", "..#", "..#", "..#", "..#"]),
    ('8', ["###", "#.#", "###", "#.#", "###"]),
    ('9', ["###", "#.#", "###", "..#", "###"]),
    ('.', ["...", "...", "...", "...", ".#."]),
    (':', ["...", ".#.", "...", ".#.", "..."]),
    ('F', ["###", "#..", "##.", "#..", "#.."]),
    ('P', ["###", "#.#", "###", "#..", "#.."]),
    ('S', ["###", "#..", "###", "..#", "###"]),
    ('M', ["#.#", "###", "#.#", "#.#", "#.#"]),
];

pub struct HudFont {
    pub atlas: FontAtlas,
    pub width: u32,
    pub height: u32,
    /// RGBA8, white with coverage in alpha.
    pub pixels: Vec<u8>,
}

pub fn hud_font() -> ResourceResult<HudFont> {
    let width = CELL_W * GLYPHS.len();
    let height = CELL_H;
    let mut pixels = vec![0u8; width * height * 4];
    let mut glyphs = HashMap::new();

    for (cell, (ch, rows)) in GLYPHS.iter().enumerate() {
        let x0 = cell * CELL_W;
        for (y, row) in rows.iter().enumerate() {
            for (x, bit) in row.bytes().enumerate() {
                let offset = (y * width + x0 + x) * 4;
                let alpha = if bit == b'#' { 255 } else { 0 };
                pixels[offset..offset + 4].copy_from_slice(&[255, 255, 255, alpha]);
            }
        }
        glyphs.insert(
            *ch,
            Glyph {
                bounds: [0.0, -(GLYPH_H as f32), GLYPH_W as f32, 0.0],
                advance: CELL_W as f32,
                uv: [
                    x0 as f32 / width as f32,
                    0.0,
                    (x0 + GLYPH_W) as f32 / width as f32,
                    GLYPH_H as f32 / height as f32,
                ],
            },
        );
    }
    glyphs.insert(
        ' ',
        Glyph {
            advance: CELL_W as f32,
            ..Default::default()
        },
    );

    Ok(HudFont {
        atlas: FontAtlas::new(CELL_H as f32, glyphs)?,
        width: width as u32,
        height: height as u32,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_glyph_has_a_cell() {
        let font = hud_font().unwrap();
        assert_eq!(font.pixels.len(), (font.width * font.height * 4) as usize);
        assert_eq!(font.atlas.glyph_count(), GLYPHS.len() + 1);
        assert!(font.atlas.glyph(' ').unwrap().is_blank());
        assert!(!font.atlas.glyph('7').unwrap().is_blank());
    }

    #[test]
    fn test_coverage_lands_in_alpha() {
        let font = hud_font().unwrap();
        // Top-left pixel of '0' is set; the padding column after it is not.
        assert_eq!(&font.pixels[0..4], &[255, 255, 255, 255]);
        let padding = GLYPH_W * 4;
        assert_eq!(font.pixels[padding + 3], 0);
    }
}
