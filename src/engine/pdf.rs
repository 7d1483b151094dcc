//! Inspection helpers for PDF bytes produced by the engine.

use lazy_static::lazy_static;
use regex::bytes::Regex;

lazy_static! {
    static ref MEDIA_BOX: Regex = Regex::new(
        r"/MediaBox\s*\[\s*(-?[0-9.]+)\s+(-?[0-9.]+)\s+(-?[0-9.]+)\s+(-?[0-9.]+)\s*\]"
    )
    .expect("valid regex");
}

/// Check the `%PDF` magic bytes.
pub fn is_pdf(data: &[u8]) -> bool {
    data.starts_with(b"%PDF")
}

/// Width and height in points of the first `/MediaBox` found in the document.
///
/// Works on uncompressed page dictionaries, which is what Chrome emits.
pub fn media_box(data: &[u8]) -> Option<(f64, f64)> {
    let caps = MEDIA_BOX.captures(data)?;
    let coord = |i: usize| -> Option<f64> {
        std::str::from_utf8(caps.get(i)?.as_bytes())
            .ok()?
            .parse::<f64>()
            .ok()
    };

    let (x0, y0, x1, y1) = (coord(1)?, coord(2)?, coord(3)?, coord(4)?);
    Some(((x1 - x0).abs(), (y1 - y0).abs()))
}
