//! Packet framing for the remote-debug wire protocol.
//!
//! Wire format is `$payload#cc`, where `cc` is the two-hex-digit 8-bit
//! modular checksum of `payload`. A stray `0x03` byte anywhere in the
//! stream, inside or outside a packet, is an asynchronous interrupt signal
//! and never part of a payload.

use std::io::{self, Read, Write};

use thiserror::Error;

/// An error raised while framing or parsing a packet.
#[derive(Debug, Error)]
pub enum Error {
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("malformed packet")]
    Malformed,
    #[error("connection closed")]
    Eof,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Byte that signals an asynchronous interrupt, out of band of any packet.
pub const INTERRUPT_BYTE: u8 = 0x03;

/// The 8-bit modular sum of `data`, as the protocol's checksum.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Reads one `$payload#cc` packet, returning its payload.
///
/// `on_interrupt` is called (without consuming the rest of the stream) for
/// every `0x03` byte encountered, whether before, inside, or after a
/// packet; the caller uses it to set the run loop's interrupt flag.
///
/// # Errors
///
/// Returns [`Error::Eof`] if the stream closes before a full packet is
/// read, [`Error::ChecksumMismatch`] if the trailing checksum doesn't
/// match, and [`Error::Malformed`] if the checksum digits or payload
/// aren't valid.
pub fn read_packet(reader: &mut impl Read, mut on_interrupt: impl FnMut()) -> Result<String> {
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte)? == 0 {
            return Err(Error::Eof);
        }
        match byte[0] {
            INTERRUPT_BYTE => on_interrupt(),
            b'$' => break,
            _ => {}
        }
    }

    let mut payload = Vec::new();
    let mut sum: u8 = 0;
    loop {
        if reader.read(&mut byte)? == 0 {
            return Err(Error::Eof);
        }
        match byte[0] {
            INTERRUPT_BYTE => on_interrupt(),
            b'#' => break,
            b => {
                payload.push(b);
                sum = sum.wrapping_add(b);
            }
        }
    }

    let mut csum_hex = [0u8; 2];
    reader.read_exact(&mut csum_hex).map_err(|_| Error::Malformed)?;
    let text = std::str::from_utf8(&csum_hex).map_err(|_| Error::Malformed)?;
    let csum = u8::from_str_radix(text, 16).map_err(|_| Error::Malformed)?;
    if csum != sum {
        return Err(Error::ChecksumMismatch);
    }

    String::from_utf8(payload).map_err(|_| Error::Malformed)
}

/// Writes a `$payload#cc` packet and flushes.
pub fn write_packet(writer: &mut impl Write, payload: &str) -> io::Result<()> {
    write!(writer, "${payload}#{:02x}", checksum(payload.as_bytes()))?;
    writer.flush()
}

/// Writes the single-byte positive acknowledgement.
pub fn write_ack(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(b"+")?;
    writer.flush()
}

/// Writes the single-byte negative acknowledgement.
pub fn write_nack(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(b"-")?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_packet() {
        let mut buf = Vec::new();
        write_packet(&mut buf, "OK").unwrap();
        assert_eq!(buf, b"$OK#9a");
        let mut cursor = Cursor::new(buf);
        let payload = read_packet(&mut cursor, || {}).unwrap();
        assert_eq!(payload, "OK");
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut cursor = Cursor::new(b"$OK#00".to_vec());
        let err = read_packet(&mut cursor, || {}).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch));
    }

    #[test]
    fn interrupt_byte_invokes_callback_and_is_excluded_from_payload() {
        // 0x67 is "g"'s checksum (its own ASCII value, a single-byte payload).
        let mut cursor = Cursor::new(b"\x03$\x03g#67".to_vec());
        let mut interrupts = 0;
        let payload = read_packet(&mut cursor, || interrupts += 1).unwrap();
        assert_eq!(payload, "g");
        assert_eq!(interrupts, 2);
    }

    #[test]
    fn eof_before_a_full_packet_is_an_error() {
        let mut cursor = Cursor::new(b"$g".to_vec());
        let err = read_packet(&mut cursor, || {}).unwrap_err();
        assert!(matches!(err, Error::Eof));
    }
}
