//! Minimal vector PDF plots: one page per cell, one filled path per
//! polygon, grayscale by layer. References are flattened before drawing.

use std::{fs, path::Path};

use crate::{
    error::{CompileResult, Error},
    library::{LayerPolygon, Library},
};

const MARGIN: f64 = 36.0;
const MAX_PAGE: f64 = 1400.0;

/// Writes one PDF per cell. A single-cell library writes `<base>.pdf`,
/// otherwise `<base>/<cell>.pdf`.
pub fn write(library: &Library, base: &Path) -> CompileResult<()> {
    let names = library.sorted_names();
    let multi = names.len() > 1;
    for name in names {
        let target = if multi {
            fs::create_dir_all(base).map_err(|e| Error::parse(format!("cannot create {}: {e}", base.display())))?;
            base.join(format!("{name}.pdf"))
        } else {
            base.with_extension("pdf")
        };
        let polygons = library.flatten(name);
        let bytes = render_page(&polygons);
        fs::write(&target, bytes).map_err(|e| Error::parse(format!("cannot write {}: {e}", target.display())))?;
    }
    Ok(())
}

fn layer_gray(layer: u16) -> f64 {
    // spread layers over mid grays, darkest first
    0.15 + 0.7 * (f64::from(layer % 8) / 8.0)
}

fn render_page(polygons: &[LayerPolygon]) -> Vec<u8> {
    // bounding box over everything
    let mut min = (f64::INFINITY, f64::INFINITY);
    let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for poly in polygons {
        for p in &poly.points {
            min.0 = min.0.min(p.x);
            min.1 = min.1.min(p.y);
            max.0 = max.0.max(p.x);
            max.1 = max.1.max(p.y);
        }
    }
    let (w, h) = if polygons.is_empty() {
        (1.0, 1.0)
    } else {
        ((max.0 - min.0).max(1e-9), (max.1 - min.1).max(1e-9))
    };
    let scale = ((MAX_PAGE - 2.0 * MARGIN) / w.max(h)).min(72.0);
    let page_w = w * scale + 2.0 * MARGIN;
    let page_h = h * scale + 2.0 * MARGIN;

    let mut content = String::new();
    for poly in polygons {
        if poly.points.len() < 3 {
            continue;
        }
        content.push_str(&format!("{:.3} g\n", layer_gray(poly.layer)));
        for (k, p) in poly.points.iter().enumerate() {
            let x = (p.x - min.0) * scale + MARGIN;
            let y = (p.y - min.1) * scale + MARGIN;
            content.push_str(&format!("{x:.2} {y:.2} {}\n", if k == 0 { "m" } else { "l" }));
        }
        content.push_str("h f\n");
    }

    build_pdf(page_w, page_h, &content)
}

/// Assembles a single-page PDF with a correct xref table.
fn build_pdf(page_w: f64, page_h: f64, content: &str) -> Vec<u8> {
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_owned(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_owned(),
        format!("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {page_w:.2} {page_h:.2}] /Contents 4 0 R >>"),
        format!("<< /Length {} >>\nstream\n{content}endstream", content.len()),
    ];

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{body}\nendobj\n", i + 1));
    }
    let xref_at = out.len();
    out.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for offset in offsets {
        out.push_str(&format!("{offset:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    ));
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_start_with_the_pdf_magic() {
        let bytes = render_page(&[]);
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(bytes.ends_with(b"%%EOF\n"));
    }
}
