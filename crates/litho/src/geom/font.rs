//! Built-in 5×7 raster font for `text(...)`.
//!
//! Each glyph is seven rows of five pixels, top row first, bit 4 being the
//! leftmost column. Lit pixels become axis-aligned rectangles (one per
//! horizontal run), scaled so the glyph height matches the requested `dy`
//! or the whole string matches `dx`.

use smallvec::smallvec;

use super::{Point, Polygon, Shape, TextSize};
use crate::error::{CompileResult, Error};

const GLYPH_ROWS: usize = 7;
const GLYPH_WIDTH: f64 = 5.0;
const ADVANCE: f64 = 6.0;

#[rustfmt::skip]
fn glyph(c: char) -> [u8; GLYPH_ROWS] {
    match c.to_ascii_uppercase() {
        ' ' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        ',' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00110, 0b00110, 0b01100],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '+' => [0b00000, 0b00100, 0b00100, 0b11111, 0b00100, 0b00100, 0b00000],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '/' => [0b00001, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b10000],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '[' => [0b01110, 0b01000, 0b01000, 0b01000, 0b01000, 0b01000, 0b01110],
        ']' => [0b01110, 0b00010, 0b00010, 0b00010, 0b00010, 0b00010, 0b01110],
        '=' => [0b00000, 0b00000, 0b11111, 0b00000, 0b11111, 0b00000, 0b00000],
        '"' => [0b01010, 0b01010, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000],
        '\'' => [0b00100, 0b00100, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000],
        '#' => [0b01010, 0b01010, 0b11111, 0b01010, 0b11111, 0b01010, 0b01010],
        '<' => [0b00010, 0b00100, 0b01000, 0b10000, 0b01000, 0b00100, 0b00010],
        '>' => [0b01000, 0b00100, 0b00010, 0b00001, 0b00010, 0b00100, 0b01000],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100],
        '?' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100],
        '*' => [0b00000, 0b00100, 0b10101, 0b01110, 0b10101, 0b00100, 0b00000],
        '%' => [0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011],
        // unknown characters render as a hollow box
        _ => [0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    }
}

/// Renders `text` as filled rectangles, baseline on y = 0, left edge on
/// x = 0, glyph tops at the glyph height. Unanchored; the caller positions
/// the result.
pub(super) fn render(text: &str, size: TextSize) -> CompileResult<Shape> {
    let chars: Vec<char> = text.chars().collect();
    let total_width = if chars.is_empty() {
        0.0
    } else {
        ADVANCE * chars.len() as f64 - (ADVANCE - GLYPH_WIDTH)
    };
    let scale = match size {
        TextSize::Height(dy) => {
            if dy <= 0.0 {
                return Err(Error::domain("text height (dy) must be positive"));
            }
            dy / GLYPH_ROWS as f64
        }
        TextSize::Width(dx) => {
            if dx <= 0.0 {
                return Err(Error::domain("text width (dx) must be positive"));
            }
            if total_width == 0.0 {
                1.0
            } else {
                dx / total_width
            }
        }
    };

    let mut polygons: Vec<Polygon> = Vec::new();
    for (index, &c) in chars.iter().enumerate() {
        let rows = glyph(c);
        let x0 = index as f64 * ADVANCE;
        for (row, bits) in rows.iter().enumerate() {
            let y_top = (GLYPH_ROWS - row) as f64;
            let mut col = 0usize;
            while col < 5 {
                if bits & (0b10000 >> col) == 0 {
                    col += 1;
                    continue;
                }
                let start = col;
                while col < 5 && bits & (0b10000 >> col) != 0 {
                    col += 1;
                }
                let (xa, xb) = (x0 + start as f64, x0 + col as f64);
                polygons.push(smallvec![
                    Point::new(xa * scale, (y_top - 1.0) * scale),
                    Point::new(xb * scale, (y_top - 1.0) * scale),
                    Point::new(xb * scale, y_top * scale),
                    Point::new(xa * scale, y_top * scale),
                ]);
            }
        }
    }
    Ok(Shape::new(polygons))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_sizing_matches_dy() {
        let shape = render("A", TextSize::Height(7.0)).unwrap();
        let bb = shape.bounding_box().unwrap();
        assert!((bb.max.y - 7.0).abs() < 1e-9);
        assert!(bb.min.y >= 0.0);
    }

    #[test]
    fn width_sizing_matches_dx() {
        let shape = render("AB", TextSize::Width(22.0)).unwrap();
        let bb = shape.bounding_box().unwrap();
        assert!((bb.width() - 22.0).abs() < 1e-9);
    }

    #[test]
    fn empty_text_renders_nothing() {
        let shape = render("", TextSize::Height(5.0)).unwrap();
        assert!(shape.is_empty());
    }
}
