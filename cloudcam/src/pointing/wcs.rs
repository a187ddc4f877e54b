//! Minimal FITS WCS header access.
//!
//! The solver writes a header-only FITS file (`<prefix>.wcs`). Only the
//! reference-pixel sky coordinates are needed here: `CRVAL1` (RA) and
//! `CRVAL2` (Dec) are read after a solve and rewritten before each overlay
//! render so the projection follows the sky.

use std::fs;
use std::ops::Range;
use std::path::Path;

use crate::error::{OpsError, OpsResult};
use crate::models::SkyCoordinate;

const CARD_LEN: usize = 80;

/// Byte ranges of the header cards, up to and including `END`.
fn card_spans(header: &[u8]) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    if header.contains(&b'\n') {
        let mut start = 0;
        for line in header.split(|&b| b == b'\n') {
            let mut end = start + line.len();
            if line.last() == Some(&b'\r') {
                end -= 1;
            }
            spans.push(start..end);
            start += line.len() + 1;
        }
    } else {
        let mut start = 0;
        while start < header.len() {
            let end = (start + CARD_LEN).min(header.len());
            spans.push(start..end);
            start = end;
        }
    }

    if let Some(pos) = spans
        .iter()
        .position(|span| keyword(&header[span.clone()]) == "END")
    {
        spans.truncate(pos + 1);
    }
    spans
}

fn keyword(card: &[u8]) -> String {
    let end = card.len().min(8);
    String::from_utf8_lossy(&card[..end]).trim().to_string()
}

/// Numeric value of a `KEY = value / comment` card.
fn numeric_value(card: &[u8]) -> Option<f64> {
    let text = String::from_utf8_lossy(card);
    let rest = text.get(8..)?.trim_start().strip_prefix('=')?;
    let value = rest.split('/').next()?.trim();
    // FITS allows a Fortran-style D exponent
    value.replace(['D', 'd'], "E").parse().ok()
}

fn find_value(header: &[u8], key: &str) -> OpsResult<f64> {
    card_spans(header)
        .into_iter()
        .map(|span| &header[span])
        .find(|card| keyword(card) == key)
        .and_then(numeric_value)
        .ok_or_else(|| OpsError::Solver(format!("WCS header has no numeric {}", key)))
}

/// Reference-pixel coordinate of a WCS header.
pub fn read_center(header: &[u8]) -> OpsResult<SkyCoordinate> {
    let ra = find_value(header, "CRVAL1")?;
    let dec = find_value(header, "CRVAL2")?;
    Ok(SkyCoordinate::new(ra, dec))
}

/// Format a fixed-format real-valued card, padded to 80 columns.
fn format_card(key: &str, value: f64, comment: &str) -> String {
    let mut card = format!("{:<8}= {:>20} / {}", key, format!("{:.10}", value), comment);
    card.truncate(CARD_LEN);
    format!("{:<width$}", card, width = CARD_LEN)
}

/// Return a copy of `header` with `CRVAL1`/`CRVAL2` set to `center`.
pub fn repoint(header: &[u8], center: &SkyCoordinate) -> OpsResult<Vec<u8>> {
    let line_based = header.contains(&b'\n');
    let spans = card_spans(header);

    let mut replacements: Vec<(Range<usize>, String)> = Vec::new();
    for (key, value, comment) in [
        ("CRVAL1", center.ra_deg(), "Updated RA of reference pixel"),
        ("CRVAL2", center.dec_deg(), "Updated Dec of reference pixel"),
    ] {
        let span = spans
            .iter()
            .find(|span| keyword(&header[(*span).clone()]) == key)
            .cloned()
            .ok_or_else(|| OpsError::Solver(format!("WCS header has no {}", key)))?;
        let mut card = format_card(key, value, comment);
        if line_based {
            card = card.trim_end().to_string();
        }
        replacements.push((span, card));
    }
    replacements.sort_by_key(|(span, _)| span.start);

    let mut out = Vec::with_capacity(header.len());
    let mut cursor = 0;
    for (span, card) in replacements {
        out.extend_from_slice(&header[cursor..span.start]);
        out.extend_from_slice(card.as_bytes());
        cursor = span.end;
    }
    out.extend_from_slice(&header[cursor..]);
    Ok(out)
}

pub fn read_center_file(path: &Path) -> OpsResult<SkyCoordinate> {
    read_center(&fs::read(path)?)
}

/// Write a repointed copy of the header at `source` to `destination`.
pub fn repoint_file(source: &Path, destination: &Path, center: &SkyCoordinate) -> OpsResult<()> {
    let header = fs::read(source)?;
    fs::write(destination, repoint(&header, center)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_header() -> Vec<u8> {
        let cards = [
            format!("{:<80}", "SIMPLE  =                    T / Standard FITS file"),
            format!("{:<80}", "CTYPE1  = 'RA---TAN-SIP'        / TAN (gnomic) projection + SIP distortions"),
            format!("{:<80}", "CRVAL1  =        287.512345678 / RA  of reference point"),
            format!("{:<80}", "CRVAL2  =        20.0123456789 / DEC of reference point"),
            format!("{:<80}", "CRPIX1  =               1024.5 / X reference pixel"),
            format!("{:<80}", "END"),
        ];
        let mut bytes = cards.concat().into_bytes();
        bytes.resize(2880, b' ');
        bytes
    }

    #[test]
    fn test_read_center_from_fixed_cards() {
        let center = read_center(&fixed_header()).unwrap();
        assert!((center.ra_deg() - 287.512345678).abs() < 1e-9);
        assert!((center.dec_deg() - 20.0123456789).abs() < 1e-9);
    }

    #[test]
    fn test_read_center_from_lines() {
        let text = "CRVAL1  = 1.5D2 / RA\nCRVAL2  = -12.25 / Dec\nEND\n";
        let center = read_center(text.as_bytes()).unwrap();
        assert_eq!(center.ra_deg(), 150.0);
        assert_eq!(center.dec_deg(), -12.25);
    }

    #[test]
    fn test_missing_crval_is_solver_error() {
        let err = read_center(b"CRVAL1  = 10.0\nEND\n").unwrap_err();
        assert_eq!(err.kind(), "solver");
    }

    #[test]
    fn test_repoint_preserves_block_layout() {
        let header = fixed_header();
        let updated = repoint(&header, &SkyCoordinate::new(12.5, -3.25)).unwrap();
        assert_eq!(updated.len(), header.len());

        let center = read_center(&updated).unwrap();
        assert_eq!(center.ra_deg(), 12.5);
        assert_eq!(center.dec_deg(), -3.25);
        // untouched cards survive byte for byte
        assert_eq!(&updated[..160], &header[..160]);
        assert_eq!(&updated[320..], &header[320..]);
    }

    #[test]
    fn test_repoint_line_header() {
        let text = "CRVAL1  = 1.0 / a\nCRVAL2  = 2.0 / b\nEND\n";
        let updated = repoint(text.as_bytes(), &SkyCoordinate::new(100.0, 45.0)).unwrap();
        let center = read_center(&updated).unwrap();
        assert_eq!(center.ra_deg(), 100.0);
        assert_eq!(center.dec_deg(), 45.0);
        assert!(String::from_utf8(updated).unwrap().ends_with("END\n"));
    }
}
