// A FLIRT-style function recognizer.
//
// A catalogue of known functions (usually library or compiler-generated code)
// is loaded into a signature tree. Each function is reduced to a key:
//
// ```
//     518B4C240C895C240C8D5C240C508D442408F7D923C18D60F88B43F08904248B 20 6562 0066 :0000 __EH_prolog3_catch_align
//     ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ leading bytes, compared verbatim
//                                                                      ^^ number of bytes crc16'd
//                                                                         ^^^^ crc16
// ```
//
// the tree is bucketed by `(crc16, leading length)`, and inside each bucket
// by the full masked pattern. functions that share a masked pattern are
// clones, and a match against them is reported as ambiguous.
//
// ```
//     signature tree
//       └── hash node (crc16, leading length)
//             └── basic node (masked pattern)
//                   └── module descriptors (f1, f2, ...)
// ```

extern crate anyhow;
extern crate nom;
extern crate thiserror;

pub mod config;
pub mod dump;
pub mod module;
pub mod pat;
pub mod pattern;
pub mod tree;

#[cfg(test)]
pub(crate) mod test;

pub use config::Config;
pub use dump::DumpContext;
pub use module::ModuleDescriptor;
pub use pattern::{Key, Pattern, SigElement};
pub use tree::{
    policy::{Disambiguate, KeepAll, PreferResolvedReferences},
    LoadReport, MatchResult, SignatureTree, SignatureTreeBuilder, Stats, TreeError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub offset: i64,
    pub name:   String,
}

/// a name attached to a catalogued function.
///
/// public names identify the function itself (usually at offset 0),
/// local names label interior addresses,
/// and references name the targets of calls/pointers within the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Public(Name),
    Local(Name),
    Reference(Name),
}

impl Symbol {
    pub fn public(name: &str) -> Symbol {
        Symbol::Public(Name {
            offset: 0,
            name:   name.to_string(),
        })
    }

    pub fn reference(offset: i64, name: &str) -> Symbol {
        Symbol::Reference(Name {
            offset,
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Symbol::Public(name) => write!(f, ":{:04X} {}", name.offset, name.name),
            Symbol::Local(name) => write!(f, ":{:04X}@ {}", name.offset, name.name),
            Symbol::Reference(name) => write!(f, "^{:04X} {}", name.offset, name.name),
        }
    }
}

/// compute the IDA-specific CRC16 checksum for the given bytes.
///
/// this is the checksum found in the second and third columns of a .pat line,
/// so keys derived here agree with keys loaded from a signature database.
///
/// ```
/// assert_eq!(flirt_sigtree::crc16(b""), 0x0000);
/// assert_eq!(flirt_sigtree::crc16(b"\xC3"), flirt_sigtree::crc16(b"\xC3"));
/// ```
pub fn crc16(buf: &[u8]) -> u16 {
    const POLY: u32 = 0x8408;

    if buf.is_empty() {
        return 0;
    }

    let mut crc: u32 = 0xFFFF;
    for &b in buf {
        let mut b = b as u32;

        for _ in 0..8 {
            if ((crc ^ b) & 1) > 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
            b >>= 1;
        }
    }

    crc = !crc;

    // swap u16 byte order
    let h1: u16 = (crc & 0xFF) as u16;
    let h2: u16 = ((crc >> 8) & 0xFF) as u16;

    (h1 << 8) | h2
}
