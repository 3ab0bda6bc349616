//! Barcode validation for report-eligible products.
//!
//! Hanteo only accepts numeric product codes: EAN-8, UPC-A (12), EAN-13,
//! or the 10/13-digit ISBN forms (ISBN-10 may end in an `X` check digit).

use once_cell::sync::Lazy;
use regex::Regex;

static BARCODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d{8}|\d{12}|\d{13}|\d{9}[0-9Xx])$").expect("valid barcode regex"));

/// Returns true if `value` (after trimming surrounding whitespace) is an
/// acceptable report barcode. Internal whitespace invalidates the value.
pub fn is_valid_barcode(value: &str) -> bool {
    BARCODE_RE.is_match(value.trim())
}
