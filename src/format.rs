//! Plain-text numeric formats.
//!
//! Two renderings of `f64` are needed for output compatibility with existing
//! experiment archives:
//! - [`general`]: `%g`-style, 6 significant digits (`1`, `0.01`, `1e-08`),
//!   used in experiment directory names.
//! - [`scientific`]: `%e`-style, 6 fractional digits (`1.000000e-02`), used in
//!   `data_info.txt`.
//!
//! Matrices are stored as whitespace-delimited text, one row per line. Values
//! round-trip exactly; magnitudes outside `[1e-5, 1e16)` are written with an
//! exponent so the unevaluated marker (`f64::MAX`) stays one short token.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::{Error, Result};

const PRECISION: usize = 6;

fn non_finite(v: f64) -> Option<&'static str> {
    if v.is_nan() {
        Some("nan")
    } else if v == f64::INFINITY {
        Some("inf")
    } else if v == f64::NEG_INFINITY {
        Some("-inf")
    } else {
        None
    }
}

/// Shortest round-trip text for `v`, switching to exponent form for very
/// large or very small magnitudes.
fn write_value(out: &mut String, v: f64) {
    let a = v.abs();
    if a != 0.0 && a.is_finite() && !(1e-5..1e16).contains(&a) {
        let _ = write!(out, "{v:e}");
    } else {
        let _ = write!(out, "{v}");
    }
}

/// Split Rust's `{:e}` output into mantissa and a C-style exponent (`e-08`).
fn c_exponent(formatted: &str) -> (&str, i32) {
    let (mantissa, exp) = formatted
        .split_once('e')
        .unwrap_or((formatted, "0"));
    (mantissa, exp.parse().unwrap_or(0))
}

fn push_exponent(out: &mut String, exp: i32) {
    let sign = if exp < 0 { '-' } else { '+' };
    let _ = write!(out, "e{sign}{:02}", exp.abs());
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Render like a default-configured C++ output stream (`%g`, precision 6).
pub fn general(v: f64) -> String {
    if let Some(s) = non_finite(v) {
        return s.to_owned();
    }
    if v == 0.0 {
        return "0".to_owned();
    }

    let sci = format!("{:.*e}", PRECISION - 1, v);
    let (mantissa, exp) = c_exponent(&sci);

    if exp < -4 || exp >= PRECISION as i32 {
        let mut out = trim_fraction(mantissa).to_owned();
        push_exponent(&mut out, exp);
        out
    } else {
        let decimals = (PRECISION as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{v:.decimals$}");
        trim_fraction(&fixed).to_owned()
    }
}

/// Render like `std::scientific` with precision 6 (`1.000000e-02`).
pub fn scientific(v: f64) -> String {
    if let Some(s) = non_finite(v) {
        return s.to_owned();
    }
    let sci = format!("{:.*e}", PRECISION, v);
    let (mantissa, exp) = c_exponent(&sci);
    let mut out = mantissa.to_owned();
    push_exponent(&mut out, exp);
    out
}

/// Serialize a row-major `(rows, cols)` matrix as text.
pub fn matrix_to_string(data: &[f64], rows: usize, cols: usize) -> String {
    assert_eq!(
        data.len(),
        rows * cols,
        "matrix buffer len {} does not match rows * cols ({rows} * {cols})",
        data.len()
    );

    let mut out = String::with_capacity(data.len() * 8);
    for row in data.chunks(cols.max(1)) {
        for (j, v) in row.iter().enumerate() {
            if j > 0 {
                out.push(' ');
            }
            write_value(&mut out, *v);
        }
        out.push('\n');
    }
    out
}

/// Serialize a vector as text, one value per line.
pub fn vector_to_string(data: &[f64]) -> String {
    let mut out = String::with_capacity(data.len() * 8);
    for v in data {
        write_value(&mut out, *v);
        out.push('\n');
    }
    out
}

/// A dense row-major matrix parsed from text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

/// Parse whitespace-delimited matrix text. Blank lines are ignored.
pub fn parse_matrix(text: &str) -> Result<TextMatrix> {
    let mut data = Vec::new();
    let mut rows = 0;
    let mut cols = None;

    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let before = data.len();
        for tok in line.split_whitespace() {
            let v = parse_value(tok).ok_or_else(|| {
                Error::InvalidData(format!(
                    "line {}: cannot parse '{tok}' as a number",
                    line_no + 1
                ))
            })?;
            data.push(v);
        }
        let width = data.len() - before;
        match cols {
            None => cols = Some(width),
            Some(c) if c != width => {
                return Err(Error::InvalidData(format!(
                    "line {} has {width} values, expected {c}",
                    line_no + 1
                )));
            }
            Some(_) => {}
        }
        rows += 1;
    }

    let cols = cols.ok_or_else(|| Error::InvalidData("matrix text is empty".to_owned()))?;
    Ok(TextMatrix { rows, cols, data })
}

fn parse_value(tok: &str) -> Option<f64> {
    match tok {
        "nan" | "NaN" | "-nan" => Some(f64::NAN),
        "inf" | "Inf" => Some(f64::INFINITY),
        "-inf" | "-Inf" => Some(f64::NEG_INFINITY),
        _ => tok.parse().ok(),
    }
}

/// Read and parse a matrix file.
pub fn read_matrix(path: &Path) -> Result<TextMatrix> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_matrix(&text).map_err(|e| Error::InvalidData(format!("{}: {e}", path.display())))
}
