//! Memory image loading.
//!
//! Parses the two textual formats the MSP430 toolchain uses for firmware
//! images into a flat sequence of `(address, byte)` pairs, which the
//! caller feeds to [`crate::bus::Bus::load_image`]. Format is chosen by
//! file extension: `.txt` is TI-Text, anything else is Intel-HEX.

use std::path::Path;

use log::{error, warn};
use thiserror::Error;

/// An error raised while parsing a memory image.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("line {0}: does not start with ':'")]
    MissingColon(usize),
    #[error("line {0}: malformed hex record")]
    Malformed(usize),
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parses `text` as an image, choosing Intel-HEX or TI-Text by whether
/// `path` ends in `.txt`.
pub fn parse(path: &Path, text: &str) -> Result<Vec<(u16, u8)>> {
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("txt")) {
        Ok(parse_ti_text(text))
    } else {
        parse_intel_hex(text)
    }
}

/// Parses Intel-HEX records: `:LLAAAATT DD...CC`, all fields hex.
///
/// Record type 0 (data) emits `(address + i, byte)` pairs. Types 1..3 are
/// recognised and silently ignored. Any other type is logged and skipped.
/// A record whose trailing checksum byte doesn't match the two's-
/// complement sum of every preceding decoded byte is logged and skipped;
/// the declared byte count `LL` is trusted structurally since it
/// determines how many hex pairs are consumed, not cross-checked against
/// anything else.
pub fn parse_intel_hex(text: &str) -> Result<Vec<(u16, u8)>> {
    let mut out = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(':') {
            return Err(Error::MissingColon(lineno + 1));
        }
        let bytes = hex_bytes(&line[1..]).ok_or(Error::Malformed(lineno + 1))?;
        if bytes.len() < 5 {
            return Err(Error::Malformed(lineno + 1));
        }
        let count = bytes[0] as usize;
        let address = (u16::from(bytes[1]) << 8) | u16::from(bytes[2]);
        let record_type = bytes[3];
        if bytes.len() < 4 + count + 1 {
            return Err(Error::Malformed(lineno + 1));
        }
        let data = &bytes[4..4 + count];
        let checksum = bytes[4 + count];
        let sum: u8 = bytes[..4 + count].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum.wrapping_add(checksum) != 0 {
            error!("line {}: checksum mismatch, skipping record", lineno + 1);
            continue;
        }
        match record_type {
            0x00 => {
                for (i, byte) in data.iter().enumerate() {
                    out.push((address.wrapping_add(i as u16), *byte));
                }
            }
            0x01..=0x03 => {}
            other => warn!("line {}: unknown Intel-HEX record type {other:#04x}, skipping", lineno + 1),
        }
    }
    Ok(out)
}

fn hex_bytes(s: &str) -> Option<Vec<u8>> {
    let s = s.trim_end();
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Parses TI-Text: whitespace-separated hex byte pairs, with `@HHHH`
/// directives setting the current address, terminated by a line starting
/// with `q`.
pub fn parse_ti_text(text: &str) -> Vec<(u16, u8)> {
    let mut out = Vec::new();
    let mut addr: u16 = 0;
    'lines: for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('q') {
            break 'lines;
        }
        for token in trimmed.split_whitespace() {
            if let Some(hex) = token.strip_prefix('@') {
                match u16::from_str_radix(hex, 16) {
                    Ok(value) => addr = value,
                    Err(_) => warn!("malformed @ address directive {token:?}"),
                }
                continue;
            }
            match u8::from_str_radix(token, 16) {
                Ok(byte) => {
                    out.push((addr, byte));
                    addr = addr.wrapping_add(1);
                }
                Err(_) => warn!("malformed TI-Text byte token {token:?}"),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intel_hex_data_record_places_bytes() {
        // :02 0000 00 1234 B8 (B8 = two's-complement of the byte sum)
        let text = ":020000001234B8\n:00000001FF\n";
        let image = parse_intel_hex(text).unwrap();
        assert_eq!(image, vec![(0x0000, 0x12), (0x0001, 0x34)]);
    }

    #[test]
    fn intel_hex_bad_checksum_is_skipped() {
        let text = ":020000001234FF\n"; // wrong checksum
        let image = parse_intel_hex(text).unwrap();
        assert!(image.is_empty());
    }

    #[test]
    fn intel_hex_ignores_record_types_one_to_three() {
        let text = ":00000001FF\n";
        let image = parse_intel_hex(text).unwrap();
        assert!(image.is_empty());
    }

    #[test]
    fn ti_text_honours_address_directive_and_terminator() {
        let text = "@F000\n12 34 56\nq\nFF FF\n";
        let image = parse_ti_text(text);
        assert_eq!(image, vec![(0xF000, 0x12), (0xF001, 0x34), (0xF002, 0x56)]);
    }
}
