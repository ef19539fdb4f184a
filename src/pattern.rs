//! the pattern model: masked byte sequences and the bucket key.
use std::collections::BTreeSet;

use bitvec::prelude::*;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while_m_n},
    combinator::{all_consuming, map, map_res},
    multi::many1,
    IResult,
};

use crate::pat::PatError;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum SigElement {
    Byte(u8),
    Wildcard,
}

impl SigElement {
    pub fn is_match(&self, b: u8) -> bool {
        match self {
            SigElement::Byte(v) => *v == b,
            SigElement::Wildcard => true,
        }
    }
}

impl std::fmt::Display for SigElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigElement::Byte(v) => write!(f, "{v:02X}"),
            SigElement::Wildcard => write!(f, ".."),
        }
    }
}

/// a byte sequence with wildcards at positions that vary across builds.
///
/// two patterns are equal when they have the same length,
/// wildcards at the same positions, and the same literal bytes everywhere else.
/// this is the identity of a basic node.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pattern(pub Vec<SigElement>);

impl Pattern {
    /// mask the given relocation offsets out of the bytes.
    ///
    /// ```
    /// use std::collections::BTreeSet;
    /// use flirt_sigtree::Pattern;
    ///
    /// let relocs: BTreeSet<usize> = [1, 2, 3, 4].into_iter().collect();
    /// let pattern = Pattern::from_masked(b"\xE8\x00\x00\x00\x00\xC3", &relocs);
    /// assert_eq!(format!("{pattern}"), "E8........C3");
    /// ```
    pub fn from_masked(bytes: &[u8], relocations: &BTreeSet<usize>) -> Pattern {
        Pattern(
            bytes
                .iter()
                .enumerate()
                .map(|(i, &b)| {
                    if relocations.contains(&i) {
                        SigElement::Wildcard
                    } else {
                        SigElement::Byte(b)
                    }
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn wildcard_count(&self) -> usize {
        self.0.iter().filter(|e| matches!(e, SigElement::Wildcard)).count()
    }

    /// per-byte flags, set where the pattern has a wildcard.
    pub fn wildcard_mask(&self) -> BitVec {
        self.0.iter().map(|e| matches!(e, SigElement::Wildcard)).collect()
    }

    /// compare the pattern against an exact-length window.
    ///
    /// positions that are wildcards in the pattern, or flagged in `hints`,
    /// are not compared.
    pub fn is_match(&self, window: &[u8], hints: &BitSlice) -> bool {
        if window.len() != self.0.len() {
            return false;
        }

        self.0
            .iter()
            .zip(window.iter())
            .enumerate()
            .all(|(i, (elem, &b))| hints.get(i).map(|h| *h).unwrap_or(false) || elem.is_match(b))
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for elem in self.0.iter() {
            write!(f, "{elem}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

fn is_hex_digit(c: char) -> bool {
    c.is_ascii_hexdigit()
}

fn from_hex(input: &str) -> Result<u8, std::num::ParseIntError> {
    u8::from_str_radix(input, 16)
}

/// parse a single hex byte, like `AB`
pub(crate) fn hex(input: &str) -> IResult<&str, u8> {
    map_res(take_while_m_n(2, 2, is_hex_digit), from_hex)(input)
}

/// parse a single byte signature element, which is either a hex byte or a
/// wildcard.
fn sig_element(input: &str) -> IResult<&str, SigElement> {
    alt((map(hex, SigElement::Byte), map(tag(".."), |_| SigElement::Wildcard)))(input)
}

/// parse byte signature elements, hex or wildcard.
pub(crate) fn byte_signature(input: &str) -> IResult<&str, Pattern> {
    let (input, elems) = many1(sig_element)(input)?;
    Ok((input, Pattern(elems)))
}

/// parse a pattern from a string like `AABB..DD`.
impl std::str::FromStr for Pattern {
    type Err = PatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(byte_signature)(s) {
            Ok((_, pattern)) => Ok(pattern),
            Err(_) => Err(PatError::CorruptPattern(s.to_string())),
        }
    }
}

/// the bucket key of a hash node.
///
/// ordered by crc16, then by leading length.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Key {
    pub crc16:          u16,
    pub leading_length: usize,
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CRC16:{:04X} leadingLength:{:02X}", self.crc16, self.leading_length)
    }
}
