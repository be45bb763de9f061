//! APDU decoding, value formatting and frame builders.
//!
//! A group telegram's application payload starts with two header bytes. The
//! top two bits of the second byte carry the service (read, response,
//! write). Values of up to 6 bits travel inline in that byte ("short APDU");
//! larger values follow the header ("long APDU").

use std::fmt;

use crate::address::{GroupAddress, PhysicalAddress};
use crate::error::CodecError;

/// Service bits of the second APDU byte.
pub const APCI_MASK: u8 = 0xC0;

/// Group value read service flag.
pub const READ_FLAG: u8 = 0x00;

/// Group value response service flag.
pub const RESPONSE_FLAG: u8 = 0x40;

/// Group value write service flag.
pub const WRITE_FLAG: u8 = 0x80;

/// Inline value bits of a short APDU.
pub const SHORT_VALUE_MASK: u8 = 0x3F;

// ============================================================================
// APDU Kind
// ============================================================================

/// Group service carried by a telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApduKind {
    Read,
    Response,
    Write,
}

impl ApduKind {
    /// Decodes the service from a frame's first two bytes.
    ///
    /// # Errors
    ///
    /// - `CodecError::FrameTooShort` if the frame has fewer than two bytes
    /// - `CodecError::UnknownApdu` if `byte0 & 0x3 != 0` or the service bits
    ///   are `0xC0`
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let (byte0, byte1) = match frame {
            [b0, b1, ..] => (*b0, *b1),
            _ => return Err(CodecError::FrameTooShort { len: frame.len() }),
        };

        if byte0 & 0x3 != 0 {
            return Err(CodecError::UnknownApdu { byte0, byte1 });
        }

        match byte1 & APCI_MASK {
            READ_FLAG => Ok(Self::Read),
            RESPONSE_FLAG => Ok(Self::Response),
            WRITE_FLAG => Ok(Self::Write),
            _ => Err(CodecError::UnknownApdu { byte0, byte1 }),
        }
    }

    /// Returns the service flag for the second APDU byte.
    pub const fn flag(self) -> u8 {
        match self {
            Self::Read => READ_FLAG,
            Self::Response => RESPONSE_FLAG,
            Self::Write => WRITE_FLAG,
        }
    }

    /// Whether telegrams of this kind carry a value worth relaying.
    pub const fn carries_value(self) -> bool {
        matches!(self, Self::Response | Self::Write)
    }
}

impl fmt::Display for ApduKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Response => write!(f, "response"),
            Self::Write => write!(f, "write"),
        }
    }
}

// ============================================================================
// Value Formatting
// ============================================================================

/// Formats a frame's value as uppercase hex.
///
/// A 2-byte frame is a short APDU: the value is the low 6 bits of the second
/// byte. Longer frames carry their value from offset 2 onwards, rendered as
/// space-separated byte pairs.
pub fn format_value(frame: &[u8]) -> String {
    if let [_, byte1] = frame {
        return format!("{:02X}", byte1 & SHORT_VALUE_MASK);
    }

    frame
        .get(2..)
        .unwrap_or_default()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Parses a textual write value into bytes.
///
/// Accepts hex digits only; an odd digit count is left-padded with `0`. A
/// value of zero encodes as a single `0x00` byte, anything else as the full
/// byte sequence.
///
/// # Errors
///
/// `CodecError::UnsupportedValueEncoding` if the text is empty or not hex.
pub fn parse_hex_value(text: &str) -> Result<Vec<u8>, CodecError> {
    let unsupported = || CodecError::UnsupportedValueEncoding {
        value: text.to_string(),
    };

    let digits = text.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(unsupported());
    }

    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };

    let bytes = padded
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| unsupported())
        })
        .collect::<Result<Vec<u8>, CodecError>>()?;

    if bytes.iter().all(|b| *b == 0) {
        return Ok(vec![0x00]);
    }

    Ok(bytes)
}

// ============================================================================
// Frame Builders
// ============================================================================

/// Builds a group read APDU.
pub fn read_apdu() -> Vec<u8> {
    vec![0x00, ApduKind::Read.flag()]
}

/// Builds a long-form group write APDU: `[0x00, 0x80, value...]`.
pub fn write_apdu(value: &[u8]) -> Vec<u8> {
    let mut apdu = Vec::with_capacity(value.len() + 2);
    apdu.push(0x00);
    apdu.push(ApduKind::Write.flag());
    apdu.extend_from_slice(value);
    apdu
}

// ============================================================================
// Telegram
// ============================================================================

/// One decoded group telegram received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    /// Sending device
    pub source: PhysicalAddress,

    /// Destination group
    pub destination: GroupAddress,

    /// Group service
    pub kind: ApduKind,

    /// Raw APDU bytes, header included
    pub apdu: Vec<u8>,
}

impl Telegram {
    /// Decodes a telegram from raw routing addresses and its APDU.
    ///
    /// # Errors
    ///
    /// Propagates `ApduKind::decode` failures (malformed telegrams).
    pub fn decode(source: u16, destination: u16, apdu: &[u8]) -> Result<Self, CodecError> {
        let kind = ApduKind::decode(apdu)?;
        Ok(Self {
            source: PhysicalAddress::from_raw(source),
            destination: GroupAddress::from_raw(destination),
            kind,
            apdu: apdu.to_vec(),
        })
    }

    /// Value carried by the telegram, as formatted hex.
    pub fn value(&self) -> String {
        format_value(&self.apdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_kinds() {
        assert_eq!(ApduKind::decode(&[0x00, 0x00]), Ok(ApduKind::Read));
        assert_eq!(ApduKind::decode(&[0x00, 0x41]), Ok(ApduKind::Response));
        assert_eq!(ApduKind::decode(&[0x00, 0x81, 0x01]), Ok(ApduKind::Write));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(
            ApduKind::decode(&[0x00]),
            Err(CodecError::FrameTooShort { len: 1 })
        );
        assert!(matches!(
            ApduKind::decode(&[0x01, 0x40]),
            Err(CodecError::UnknownApdu { .. })
        ));
        assert!(matches!(
            ApduKind::decode(&[0x00, 0xC0]),
            Err(CodecError::UnknownApdu { .. })
        ));
    }

    #[test]
    fn test_format_value_long_apdu() {
        assert_eq!(format_value(&[0x00, 0x40, 0xFF]), "FF");
        assert_eq!(format_value(&[0x00, 0x80, 0x0C, 0x1A]), "0C 1A");
    }

    #[test]
    fn test_format_value_short_apdu() {
        assert_eq!(format_value(&[0x00, 0x43]), "03");
        assert_eq!(format_value(&[0x00, 0xBF]), "3F");
    }

    #[test]
    fn test_parse_hex_value() {
        assert_eq!(parse_hex_value("FF"), Ok(vec![0xFF]));
        assert_eq!(parse_hex_value("0c1a"), Ok(vec![0x0C, 0x1A]));
        assert_eq!(parse_hex_value("1"), Ok(vec![0x01]));
        assert_eq!(parse_hex_value("123"), Ok(vec![0x01, 0x23]));
    }

    #[test]
    fn test_parse_hex_value_zero_is_single_byte() {
        assert_eq!(parse_hex_value("0"), Ok(vec![0x00]));
        assert_eq!(parse_hex_value("0000"), Ok(vec![0x00]));
    }

    #[test]
    fn test_parse_hex_value_rejects_non_hex() {
        assert!(matches!(
            parse_hex_value("ZZ"),
            Err(CodecError::UnsupportedValueEncoding { .. })
        ));
        assert!(parse_hex_value("").is_err());
    }

    #[test]
    fn test_builders() {
        assert_eq!(read_apdu(), vec![0x00, 0x00]);
        assert_eq!(write_apdu(&[0x01]), vec![0x00, 0x80, 0x01]);
        assert_eq!(ApduKind::decode(&read_apdu()), Ok(ApduKind::Read));
        assert_eq!(ApduKind::decode(&write_apdu(&[0x01])), Ok(ApduKind::Write));
    }

    #[test]
    fn test_telegram_decode() {
        let telegram = Telegram::decode(0x1101, 0x7801, &[0x00, 0x40, 0x0C, 0x1A]).unwrap();
        assert_eq!(telegram.source.to_string(), "1.1.1");
        assert_eq!(telegram.destination.to_string(), "15/0/1");
        assert_eq!(telegram.kind, ApduKind::Response);
        assert_eq!(telegram.value(), "0C 1A");
    }
}
