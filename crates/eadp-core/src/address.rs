//! KNX address value objects.
//!
//! Group addresses identify broadcast destinations (`main/middle/sub`),
//! physical addresses identify individual bus devices (`area.line.device`).
//! Both pack into 16 bits on the wire.

use std::fmt;
use std::str::FromStr;

use crate::error::CodecError;

// ============================================================================
// Group Address
// ============================================================================

/// Largest main group in 3-level and 2-level notation (5 bits).
pub const MAX_MAIN_GROUP: u16 = 0x1F;

/// Largest middle group in 3-level notation (3 bits).
pub const MAX_MIDDLE_GROUP: u16 = 0x07;

/// Largest sub group in 3-level notation (8 bits).
pub const MAX_SUB_GROUP: u16 = 0xFF;

/// Largest sub group in 2-level notation (11 bits).
pub const MAX_SUB_GROUP_2_LEVEL: u16 = 0x7FF;

/// 16-bit KNX group address.
///
/// Parses from:
/// - `a/b/c` → `(a << 11) | (b << 8) | c`
/// - `a/b` → `(a << 11) | b`
/// - `a` → hexadecimal literal
///
/// Always displays in 3-level notation, so `"1/2"` renders as `"1/0/2"`;
/// compare values, not strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupAddress(u16);

impl GroupAddress {
    /// Creates a group address from its raw 16-bit value.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Creates a group address from its three levels.
    ///
    /// Returns `None` if any level exceeds its bit width.
    pub fn from_levels(main: u16, middle: u16, sub: u16) -> Option<Self> {
        if main > MAX_MAIN_GROUP || middle > MAX_MIDDLE_GROUP || sub > MAX_SUB_GROUP {
            return None;
        }
        Some(Self((main << 11) | (middle << 8) | sub))
    }

    /// Returns the raw 16-bit value.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Main group, bits `[15:11]`.
    pub const fn main(self) -> u16 {
        (self.0 >> 11) & MAX_MAIN_GROUP
    }

    /// Middle group, bits `[10:8]`.
    pub const fn middle(self) -> u16 {
        (self.0 >> 8) & MAX_MIDDLE_GROUP
    }

    /// Sub group, bits `[7:0]`.
    pub const fn sub(self) -> u16 {
        self.0 & MAX_SUB_GROUP
    }

    /// Big-endian wire bytes.
    pub const fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl FromStr for GroupAddress {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CodecError::InvalidGroupAddress {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        let text = s.trim();
        if text.is_empty() {
            return Err(invalid("empty"));
        }

        let parts: Vec<&str> = text.split('/').collect();
        match parts.as_slice() {
            [bare] => {
                let digits = bare
                    .strip_prefix("0x")
                    .or_else(|| bare.strip_prefix("0X"))
                    .unwrap_or(*bare);
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(invalid("not a hexadecimal literal"));
                }
                u16::from_str_radix(digits, 16)
                    .map(Self)
                    .map_err(|_| invalid("not a hexadecimal literal"))
            }
            [main, sub] => {
                let main = parse_level(main, MAX_MAIN_GROUP).ok_or_else(|| invalid("main group"))?;
                let sub = parse_level(sub, MAX_SUB_GROUP_2_LEVEL)
                    .ok_or_else(|| invalid("sub group"))?;
                Ok(Self((main << 11) | sub))
            }
            [main, middle, sub] => {
                let main = parse_level(main, MAX_MAIN_GROUP).ok_or_else(|| invalid("main group"))?;
                let middle = parse_level(middle, MAX_MIDDLE_GROUP)
                    .ok_or_else(|| invalid("middle group"))?;
                let sub = parse_level(sub, MAX_SUB_GROUP).ok_or_else(|| invalid("sub group"))?;
                Self::from_levels(main, middle, sub).ok_or_else(|| invalid("level out of range"))
            }
            _ => Err(invalid("too many levels")),
        }
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

impl From<u16> for GroupAddress {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<GroupAddress> for u16 {
    fn from(addr: GroupAddress) -> Self {
        addr.0
    }
}

// ============================================================================
// Physical Address
// ============================================================================

/// 16-bit KNX individual (physical) address, `area.line.device` in 4/4/8 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalAddress(u16);

impl PhysicalAddress {
    /// Creates a physical address from its raw 16-bit value.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn area(self) -> u16 {
        (self.0 >> 12) & 0x0F
    }

    pub const fn line(self) -> u16 {
        (self.0 >> 8) & 0x0F
    }

    pub const fn device(self) -> u16 {
        self.0 & 0xFF
    }
}

impl FromStr for PhysicalAddress {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CodecError::InvalidPhysicalAddress {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.trim().split('.').collect();
        let [area, line, device] = parts.as_slice() else {
            return Err(invalid("expected area.line.device"));
        };

        let area = parse_level(area, 0x0F).ok_or_else(|| invalid("area"))?;
        let line = parse_level(line, 0x0F).ok_or_else(|| invalid("line"))?;
        let device = parse_level(device, 0xFF).ok_or_else(|| invalid("device"))?;

        Ok(Self((area << 12) | (line << 8) | device))
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

impl From<u16> for PhysicalAddress {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

/// Parses one decimal address level, rejecting values above `max`.
fn parse_level(text: &str, max: u16) -> Option<u16> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<u16>().ok().filter(|v| *v <= max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_address_three_level() {
        assert_eq!("0/0/0".parse::<GroupAddress>().unwrap().raw(), 0x0000);
        assert_eq!("1/0/7".parse::<GroupAddress>().unwrap().raw(), 0x0807);
        assert_eq!("5/3/128".parse::<GroupAddress>().unwrap().raw(), 0x2B80);
        assert_eq!("31/7/255".parse::<GroupAddress>().unwrap().raw(), 0xFFFF);
    }

    #[test]
    fn test_group_address_two_level() {
        let addr: GroupAddress = "1/2".parse().unwrap();
        assert_eq!(addr.raw(), (1 << 11) | 2);
        assert_eq!(addr.to_string(), "1/0/2");

        let wide: GroupAddress = "3/1025".parse().unwrap();
        assert_eq!(wide.raw(), (3 << 11) | 1025);
    }

    #[test]
    fn test_group_address_bare_is_hex() {
        assert_eq!("15".parse::<GroupAddress>().unwrap().raw(), 0x15);
        assert_eq!("0x0807".parse::<GroupAddress>().unwrap().to_string(), "1/0/7");
    }

    #[test]
    fn test_group_address_roundtrip() {
        let addr: GroupAddress = "15/0/1".parse().unwrap();
        assert_eq!(addr.to_string(), "15/0/1");
        assert_eq!(GroupAddress::from_raw(addr.raw()).to_string(), "15/0/1");
    }

    #[test]
    fn test_group_address_invalid() {
        assert!("32/0/0".parse::<GroupAddress>().is_err());
        assert!("0/8/0".parse::<GroupAddress>().is_err());
        assert!("1/0/256".parse::<GroupAddress>().is_err());
        assert!("1/2048".parse::<GroupAddress>().is_err());
        assert!("1/2/3/4".parse::<GroupAddress>().is_err());
        assert!("a/b/c".parse::<GroupAddress>().is_err());
        assert!("1//3".parse::<GroupAddress>().is_err());
        assert!("".parse::<GroupAddress>().is_err());
        assert!("10000".parse::<GroupAddress>().is_err());
    }

    #[test]
    fn test_group_address_levels() {
        let addr = GroupAddress::from_levels(5, 3, 128).unwrap();
        assert_eq!((addr.main(), addr.middle(), addr.sub()), (5, 3, 128));
        assert!(GroupAddress::from_levels(32, 0, 0).is_none());
        assert_eq!(addr.to_bytes(), [0x2B, 0x80]);
        assert_eq!("5/3/128".parse::<GroupAddress>().unwrap(), addr);
    }

    #[test]
    fn test_physical_address() {
        let addr: PhysicalAddress = "1.1.20".parse().unwrap();
        assert_eq!(addr.raw(), 0x1114);
        assert_eq!(addr.to_string(), "1.1.20");
        assert_eq!(PhysicalAddress::from_raw(0xFFFF).to_string(), "15.15.255");
    }

    #[test]
    fn test_physical_address_invalid() {
        assert!("16.0.0".parse::<PhysicalAddress>().is_err());
        assert!("1.1".parse::<PhysicalAddress>().is_err());
        assert!("1/1/1".parse::<PhysicalAddress>().is_err());
    }
}
