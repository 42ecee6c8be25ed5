//! GDSII stream format writer.
//!
//! User unit is the micrometre, database unit the nanometre: coordinates
//! are written as `round(value * 1000)`. Cells are emitted in sorted name
//! order; record timestamps come from the caller so identical libraries
//! produce byte-identical files.

use std::{fs, io::Write as _, path::Path};

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::{
    error::{CompileResult, Error},
    library::{Library, Reference},
};

const DB_PER_USER: f64 = 1000.0;

// record type/datatype pairs
const HEADER: [u8; 2] = [0x00, 0x02];
const BGNLIB: [u8; 2] = [0x01, 0x02];
const LIBNAME: [u8; 2] = [0x02, 0x06];
const UNITS: [u8; 2] = [0x03, 0x05];
const ENDLIB: [u8; 2] = [0x04, 0x00];
const BGNSTR: [u8; 2] = [0x05, 0x02];
const STRNAME: [u8; 2] = [0x06, 0x06];
const ENDSTR: [u8; 2] = [0x07, 0x00];
const BOUNDARY: [u8; 2] = [0x08, 0x00];
const SREF: [u8; 2] = [0x0A, 0x00];
const AREF: [u8; 2] = [0x0B, 0x00];
const LAYER: [u8; 2] = [0x0D, 0x02];
const DATATYPE: [u8; 2] = [0x0E, 0x02];
const XY: [u8; 2] = [0x10, 0x03];
const ENDEL: [u8; 2] = [0x11, 0x00];
const SNAME: [u8; 2] = [0x12, 0x06];
const COLROW: [u8; 2] = [0x13, 0x02];
const ANGLE: [u8; 2] = [0x1C, 0x05];

fn record(out: &mut Vec<u8>, kind: [u8; 2], payload: &[u8]) {
    let len = u16::try_from(4 + payload.len()).expect("record payloads stay small");
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&kind);
    out.extend_from_slice(payload);
}

fn string_payload(s: &str) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    if bytes.len() % 2 != 0 {
        bytes.push(0);
    }
    bytes
}

fn i16s(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// GDSII 8-byte real: sign bit, excess-64 base-16 exponent, 56-bit
/// fraction.
fn gds_real(value: f64) -> [u8; 8] {
    if value == 0.0 {
        return [0; 8];
    }
    let sign = value < 0.0;
    let mut mantissa = value.abs();
    let mut exponent = 0i32;
    while mantissa >= 1.0 {
        mantissa /= 16.0;
        exponent += 1;
    }
    while mantissa < 1.0 / 16.0 {
        mantissa *= 16.0;
        exponent -= 1;
    }
    let frac = (mantissa * (1u64 << 56) as f64) as u64;
    let mut out = [0u8; 8];
    out[0] = (u8::from(sign) << 7) | ((exponent + 64) as u8 & 0x7F);
    out[1..].copy_from_slice(&frac.to_be_bytes()[1..]);
    out
}

fn timestamp_payload(ts: NaiveDateTime) -> Vec<u8> {
    let stamp = [
        ts.year() as i16,
        ts.month() as i16,
        ts.day() as i16,
        ts.hour() as i16,
        ts.minute() as i16,
        ts.second() as i16,
    ];
    i16s(&[stamp, stamp].concat())
}

fn coord(v: f64) -> CompileResult<i32> {
    let scaled = (v * DB_PER_USER).round();
    if scaled.abs() > f64::from(i32::MAX) {
        return Err(Error::domain(format!("coordinate {v} overflows the database grid")));
    }
    Ok(scaled as i32)
}

fn xy_payload(points: impl IntoIterator<Item = (f64, f64)>) -> CompileResult<Vec<u8>> {
    let mut out = Vec::new();
    for (x, y) in points {
        out.extend_from_slice(&coord(x)?.to_be_bytes());
        out.extend_from_slice(&coord(y)?.to_be_bytes());
    }
    Ok(out)
}

/// Writes `library` as a GDSII stream file.
pub fn write(library: &Library, path: &Path, timestamp: Option<NaiveDateTime>) -> CompileResult<()> {
    let ts = timestamp.unwrap_or_else(|| chrono::Local::now().naive_local());
    let mut out = Vec::new();

    record(&mut out, HEADER, &i16s(&[600]));
    record(&mut out, BGNLIB, &timestamp_payload(ts));
    record(&mut out, LIBNAME, &string_payload("LITHO"));
    let mut units = Vec::new();
    units.extend_from_slice(&gds_real(1.0 / DB_PER_USER));
    units.extend_from_slice(&gds_real(1e-9));
    record(&mut out, UNITS, &units);

    for name in library.sorted_names() {
        let cell = library.get(name).expect("sorted_names lists existing cells");
        record(&mut out, BGNSTR, &timestamp_payload(ts));
        record(&mut out, STRNAME, &string_payload(name));

        for poly in &cell.polygons {
            record(&mut out, BOUNDARY, &[]);
            record(&mut out, LAYER, &i16s(&[poly.layer as i16]));
            record(&mut out, DATATYPE, &i16s(&[0]));
            let closed = poly
                .points
                .iter()
                .map(|p| (p.x, p.y))
                .chain(poly.points.first().map(|p| (p.x, p.y)));
            record(&mut out, XY, &xy_payload(closed)?);
            record(&mut out, ENDEL, &[]);
        }

        for reference in &cell.references {
            match reference {
                Reference::Single(r) => {
                    record(&mut out, SREF, &[]);
                    record(&mut out, SNAME, &string_payload(&r.cell));
                    if r.rotation != 0.0 {
                        record(&mut out, ANGLE, &gds_real(r.rotation));
                    }
                    record(&mut out, XY, &xy_payload([(r.origin.x, r.origin.y)])?);
                    record(&mut out, ENDEL, &[]);
                }
                Reference::Array(a) => {
                    record(&mut out, AREF, &[]);
                    record(&mut out, SNAME, &string_payload(&a.cell));
                    if a.rotation != 0.0 {
                        record(&mut out, ANGLE, &gds_real(a.rotation));
                    }
                    record(&mut out, COLROW, &i16s(&[a.cols as i16, a.rows as i16]));
                    let o = a.origin;
                    record(
                        &mut out,
                        XY,
                        &xy_payload([
                            (o.x, o.y),
                            (o.x + a.spacing.x * f64::from(a.cols), o.y),
                            (o.x, o.y + a.spacing.y * f64::from(a.rows)),
                        ])?,
                    );
                    record(&mut out, ENDEL, &[]);
                }
            }
        }

        record(&mut out, ENDSTR, &[]);
    }
    record(&mut out, ENDLIB, &[]);

    let mut file = fs::File::create(path).map_err(|e| Error::parse(format!("cannot write {}: {e}", path.display())))?;
    file.write_all(&out)
        .map_err(|e| Error::parse(format!("cannot write {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reals_encode_known_values() {
        // 1.0 = 1/16 * 16^1 -> exponent 65, fraction 2^52
        assert_eq!(gds_real(1.0)[0], 65);
        assert_eq!(gds_real(-1.0)[0], 0x80 | 65);
        assert_eq!(gds_real(0.0), [0; 8]);
    }

    #[test]
    fn coordinates_round_to_the_nm_grid() {
        assert_eq!(coord(1.0).unwrap(), 1000);
        assert_eq!(coord(-0.0005).unwrap(), -1);
        assert!(coord(1e8).is_err());
    }
}
