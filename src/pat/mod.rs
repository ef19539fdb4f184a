// from: https://github.com/Maktm/FLIRTDB/blob/1f5763535e02d7cccf2f90a96a8ebaa36e9b2495/cmt/windows/libcmt_15_msvc_x86.pat#L355
//
//    3B0D........F27502F2C3F2E9...................................... 00 0000 0011 :0000 @__security_check_cookie@4 :000B@ $failure$4 ^0002 ___security_cookie ^000D ___report_gsfailure
//    ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ leading bytes, `..` for relocations
//                                                                     ^^ number of bytes crc16'd
//                                                                        ^^^^ crc16
//                                                                             ^^^^ size of fn
//
// :0000 @__security_check_cookie@4     public name at offset 0
// :000B@ $failure$4                    local name
// ^0002 ___security_cookie             reference
//
// an optional footer pattern follows the names. it starts at the end of the crc16 block.
//
// each line becomes one `ModuleDescriptor`:
//
//   - leading bytes are copied, wildcards become relocations,
//   - the crc16 block isn't recorded, so its bytes become relocations
//     (the crc16 in the key still covers them),
//   - the footer fills in the rest, and anything it doesn't cover is a relocation.

use std::collections::BTreeSet;

use anyhow::Result;
use log::{debug, trace};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_while},
    combinator::{map, opt, peek},
    multi::{many0, many1},
    sequence::pair,
    IResult,
};
use thiserror::Error;

use crate::{
    config::Config,
    module::ModuleDescriptor,
    pattern::{byte_signature, hex, Pattern, SigElement},
    Name, Symbol,
};

#[derive(Debug, Error)]
pub enum PatError {
    #[error("The pattern is not supported")]
    NotSupported,
    #[error("The .pat file is corrupt (or unsupported)")]
    CorruptPatFile,
    #[error("The byte pattern is invalid: {0}")]
    CorruptPattern(String),
}

enum Offset {
    Public(u16),
    Local(u16),
    Reference(u16),
}

/// a literal byte at an offset from the start of the function, like
/// `(0012: 87)`.
#[derive(Debug, Clone)]
struct TailByte {
    offset: u64,
    value:  u8,
}

/// one line of a .pat file, as written.
struct PatLine {
    leading:    Pattern,
    crc_length: u8,
    crc16:      u16,
    size:       u16,
    names:      Vec<Symbol>,
    footer:     Option<Pattern>,
    tail_bytes: Vec<TailByte>,
}

fn whitespace(input: &str) -> IResult<&str, &str> {
    take_while(|c| c == ' ')(input)
}

fn hex_byte(input: &str) -> IResult<&str, u8> {
    hex(input)
}

fn hex_word(input: &str) -> IResult<&str, u16> {
    let (input, v1) = hex(input)?;
    let (input, v2) = hex(input)?;
    let v: u16 = ((v1 as u16) << 8) | (v2 as u16);
    Ok((input, v))
}

/// parse a hex-encoded offset, like `0000`
/// max is 0x8000.
fn hex_offset(input: &str) -> IResult<&str, u16> {
    hex_word(input)
}

/// parse a public offset, like `:0000`
fn public_offset(input: &str) -> IResult<&str, u16> {
    let (input, _) = tag(":")(input)?;
    let (input, offset) = hex_offset(input)?;
    let (input, _) = peek(tag(" "))(input)?;

    Ok((input, offset))
}

/// parse a local offset, like `:000B@`
fn local_offset(input: &str) -> IResult<&str, u16> {
    let (input, _) = tag(":")(input)?;
    let (input, offset) = hex_offset(input)?;
    let (input, _) = tag("@")(input)?;

    Ok((input, offset))
}

/// parse an external reference, like `^0002`
fn reference_offset(input: &str) -> IResult<&str, u16> {
    let (input, _) = tag("^")(input)?;
    let (input, offset) = hex_offset(input)?;

    Ok((input, offset))
}

fn offset(input: &str) -> IResult<&str, Offset> {
    alt((
        // this must go first, because it has trailing `@`,
        // otherwise, the same as public.
        map(local_offset, Offset::Local),
        map(public_offset, Offset::Public),
        map(reference_offset, Offset::Reference),
    ))(input)
}

fn symbol_name(input: &str) -> IResult<&str, &str> {
    take_till1(|c| c == ' ' || c == '\n' || c == '\r')(input)
}

/// parse a (offset, symbol) pair.
///
/// note: this also consumes trailing spaces so that a sequence of these can be
/// easily parsed.
fn symbol(input: &str) -> IResult<&str, Symbol> {
    let (input, offset) = offset(input)?;
    let (input, _) = whitespace(input)?;
    let (input, name) = symbol_name(input)?;
    let (input, _) = opt(whitespace)(input)?;

    let (offset, wrap): (u16, fn(Name) -> Symbol) = match offset {
        Offset::Public(v) => (v, Symbol::Public),
        Offset::Local(v) => (v, Symbol::Local),
        Offset::Reference(v) => (v, Symbol::Reference),
    };

    Ok((
        input,
        wrap(Name {
            name:   name.to_string(),
            offset: offset as i64,
        }),
    ))
}

fn symbols(input: &str) -> IResult<&str, Vec<Symbol>> {
    many1(symbol)(input)
}

// like: `(0012: 87)`
fn tail_byte(input: &str) -> IResult<&str, TailByte> {
    let (input, _) = tag("(")(input)?;
    let (input, offset) = hex_offset(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, _) = whitespace(input)?;
    let (input, value) = hex_byte(input)?;
    let (input, _) = tag(")")(input)?;
    let (input, _) = whitespace(input)?;

    Ok((
        input,
        TailByte {
            offset: offset as u64,
            value,
        },
    ))
}

fn tail_bytes(input: &str) -> IResult<&str, Vec<TailByte>> {
    many0(tail_byte)(input)
}

fn pat_line(input: &str) -> IResult<&str, PatLine> {
    let (input, leading) = byte_signature(input)?;
    let (input, _) = whitespace(input)?;
    trace!("sig: {:?}", leading);

    let (input, crc_length) = hex_byte(input)?;
    let (input, _) = whitespace(input)?;
    trace!("crc16 len: {:02x}", crc_length);

    let (input, crc16) = hex_word(input)?;
    let (input, _) = whitespace(input)?;
    trace!("crc16: {:04x}", crc16);

    let (input, size) = hex_word(input)?;
    let (input, _) = whitespace(input)?;
    trace!("function size: {:04x}", size);

    let (input, names) = symbols(input)?;
    trace!("names: {:?}", names);

    let (input, footer) = opt(byte_signature)(input)?;
    let (input, _) = whitespace(input)?;
    trace!("footer: {:?}", footer);

    let (input, tail_bytes) = tail_bytes(input)?;
    trace!("tail bytes: {:02x?}", tail_bytes);

    Ok((
        input,
        PatLine {
            leading,
            crc_length,
            crc16,
            size,
            names,
            footer,
            tail_bytes,
        },
    ))
}

/// parse a .pat file into lines.
fn pat(input: &str) -> IResult<&str, Vec<PatLine>> {
    // each signature is newline separated.
    // drop the newline after we've parsed it.
    let line = map(pair(pat_line, alt((tag("\r\n"), tag("\n")))), |p| p.0);
    let (input, lines) = many0(line)(input)?;

    // the file ends with `---`.
    let (input, _) = tag("---")(input)?;

    Ok((input, lines))
}

impl PatLine {
    fn into_descriptor(self, config: &Config) -> Result<ModuleDescriptor, PatError> {
        if self.leading.len() > config.leading_length {
            return Err(PatError::NotSupported);
        }

        let size = self.size as usize;
        let leading_length = std::cmp::min(size, self.leading.len());
        let crc_length = self.crc_length as usize;
        let footer_start = leading_length + crc_length;
        let footer = self.footer.unwrap_or_else(|| Pattern(vec![]));

        if footer_start > size || footer.len() > size - footer_start {
            return Err(PatError::CorruptPatFile);
        }

        let mut bytes = vec![0u8; size];
        let mut relocations: BTreeSet<usize> = Default::default();

        for (i, elem) in self.leading.0.iter().take(leading_length).enumerate() {
            match elem {
                SigElement::Byte(b) => bytes[i] = *b,
                SigElement::Wildcard => {
                    relocations.insert(i);
                }
            }
        }

        relocations.extend(leading_length..footer_start);

        for i in footer_start..size {
            match footer.0.get(i - footer_start) {
                Some(SigElement::Byte(b)) => bytes[i] = *b,
                _ => {
                    relocations.insert(i);
                }
            }
        }

        for tail_byte in self.tail_bytes.iter() {
            let offset = tail_byte.offset as usize;
            if offset >= size {
                return Err(PatError::CorruptPatFile);
            }
            bytes[offset] = tail_byte.value;
            relocations.remove(&offset);
        }

        Ok(ModuleDescriptor {
            names: self.names,
            description: None,
            bytes,
            relocations,
            crc16: self.crc16,
            crc_length,
            leading_length,
        })
    }
}

/// parse a .pat file into module descriptors, ready to insert into a tree
/// built with `config`.
///
/// ```
/// use flirt_sigtree::{pat, Config};
/// let pat_buf = "3B0D........F27502F2C3F2E9...................................... 00 0000 0011 :0000 @__security_check_cookie@4 :000B@ $failure$4 ^0002 ___security_cookie ^000D ___report_gsfailure\n---";
/// let modules = pat::parse(pat_buf, &Config::default()).unwrap();
/// assert_eq!(modules.len(), 1);
/// assert_eq!(modules[0].name(), Some("@__security_check_cookie@4"));
/// assert_eq!(modules[0].len(), 0x11);
/// ```
pub fn parse(buf: &str, config: &Config) -> Result<Vec<ModuleDescriptor>> {
    let lines = match pat(buf) {
        Ok((_, lines)) => lines,
        Err(_) => return Err(PatError::CorruptPatFile.into()),
    };

    debug!("pat: {} lines", lines.len());

    let mut modules = Vec::with_capacity(lines.len());
    for line in lines.into_iter() {
        modules.push(line.into_descriptor(config)?);
    }

    Ok(modules)
}

/// render module descriptors as a .pat file.
pub fn render<'a, I: IntoIterator<Item = &'a ModuleDescriptor>>(modules: I) -> String {
    let mut s = String::new();
    for module in modules.into_iter() {
        s.push_str(&module.render_pat());
        s.push('\n');
    }
    s.push_str("---\n");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test::{hints, init_logging},
        SignatureTreeBuilder,
    };

    const EH_PROLOG3_PAT: &str = "\
518B4C240C895C240C8D5C240C508D442408F7D923C18D60F88B43F08904248B 21 B4FE 006E :0000 __EH_prolog3_GS_align ^0041 ___security_cookie ........33C5508941FC8B4DF0895DF08B4304894504FF75F464A1000000008945F48D45F464A300000000F2C3
518B4C240C895C240C8D5C240C508D442408F7D923C18D60F88B43F08904248B 1F E4CF 0063 :0000 __EH_prolog3_align ^003F ___security_cookie ........33C5508B4304894504FF75F464A1000000008945F48D45F464A300000000F2C3
518B4C240C895C240C8D5C240C508D442408F7D923C18D60F88B43F08904248B 22 E4CE 006F :0000 __EH_prolog3_catch_GS_align ^0042 ___security_cookie ........33C5508941FC8B4DF08965F08B4304894504FF75F464A1000000008945F48D45F464A300000000F2C3
518B4C240C895C240C8D5C240C508D442408F7D923C18D60F88B43F08904248B 20 6562 0066 :0000 __EH_prolog3_catch_align ^0040 ___security_cookie ........33C5508965F08B4304894504FF75F464A1000000008945F48D45F464A300000000C3
---";

    // apds.dll / 4FD932C41DF96D019DC265E26E94B81B
    // __EH_prolog3_catch_align
    const EH_PROLOG3_CATCH_ALIGN: &[u8] = &[
        // first 0x20
        0x51, 0x8B, 0x4C, 0x24, 0x0C, 0x89, 0x5C, 0x24, 0x0C, 0x8D, 0x5C, 0x24, 0x0C, 0x50, 0x8D, 0x44, 0x24, 0x08, 0xF7,
        0xD9, 0x23, 0xC1, 0x8D, 0x60, 0xF8, 0x8B, 0x43, 0xF0, 0x89, 0x04, 0x24, 0x8B,
        // crc16 start
        0x43, 0xF8, 0x50, 0x8B, 0x43, 0xFC, 0x8B, 0x4B, 0xF4, 0x89, 0x6C, 0x24, 0x0C, 0x8D, 0x6C, 0x24, 0x0C, 0xC7, 0x44,
        0x24, 0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0x51, 0x53, 0x2B, 0xE0, 0x56, 0x57, 0xA1,
        // crc end
        0xD4, 0xAD, 0x19, 0x01, 0x33, 0xC5, 0x50, 0x89, 0x65, 0xF0, 0x8B, 0x43, 0x04, 0x89, 0x45, 0x04, 0xFF, 0x75, 0xF4,
        0x64, 0xA1, 0x00, 0x00, 0x00, 0x00, 0x89, 0x45, 0xF4, 0x8D, 0x45, 0xF4, 0x64, 0xA3, 0x00, 0x00, 0x00, 0x00, 0xC3,
    ];

    #[test]
    fn test_parse() {
        init_logging();

        let modules = parse(EH_PROLOG3_PAT, &Config::default()).unwrap();
        assert_eq!(modules.len(), 4);

        let m = &modules[3];
        assert_eq!(m.name(), Some("__EH_prolog3_catch_align"));
        assert_eq!(m.len(), 0x66);
        assert_eq!(m.leading_length, 0x20);
        assert_eq!(m.crc_length, 0x20);
        assert_eq!(m.crc16, 0x6562);
        assert_eq!(m.references().next().unwrap().name, "___security_cookie");
        // the crc16 block, and the four bytes of the reference.
        assert_eq!(m.relocations, (0x20..0x44).collect::<BTreeSet<usize>>());
        assert!(m.validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_match() {
        let config = Config::default();
        let mut b = SignatureTreeBuilder::new(config.clone());
        let report = b.load(parse(EH_PROLOG3_PAT, &config).unwrap());
        assert_eq!(report.inserted, 4);
        let tree = b.build();

        // the reference to ___security_cookie is relocated.
        let m = tree.r#match(EH_PROLOG3_CATCH_ALIGN, &hints(&[0x40, 0x41, 0x42, 0x43]));
        assert!(m.is_unique());
        assert_eq!(m.names(), vec!["__EH_prolog3_catch_align"]);

        // the checksummed region must match.
        let mut buf = EH_PROLOG3_CATCH_ALIGN.to_vec();
        buf[0x30] ^= 0xFF;
        assert!(tree.r#match(&buf, &hints(&[0x40, 0x41, 0x42, 0x43])).is_none());

        // and so must the footer.
        let mut buf = EH_PROLOG3_CATCH_ALIGN.to_vec();
        buf[0x50] ^= 0xFF;
        assert!(tree.r#match(&buf, &hints(&[0x40, 0x41, 0x42, 0x43])).is_none());
    }

    #[test]
    fn test_render_roundtrip() {
        let config = Config::default();
        let modules = parse(EH_PROLOG3_PAT, &config).unwrap();
        let rendered = render(modules.iter());
        assert!(rendered.starts_with(
            "518B4C240C895C240C8D5C240C508D442408F7D923C18D60F88B43F08904248B 21 B4FE 006E :0000 \
             __EH_prolog3_GS_align ^0041 ___security_cookie ........33C550"
        ));

        let reparsed = parse(&rendered, &config).unwrap();
        assert_eq!(reparsed.len(), modules.len());
        for (a, b) in modules.iter().zip(reparsed.iter()) {
            assert_eq!(a.key(), b.key());
            assert_eq!(a.pattern(), b.pattern());
            assert_eq!(a.names, b.names);
        }
    }

    #[test]
    fn test_tail_bytes() {
        let modules = parse(
            "558BEC........5DC3 00 0000 0009 :0000 _f (0004: 87)\n558BEC........5DC3 00 0000 0009 :0000 _g\n---",
            &Config::default(),
        )
        .unwrap();
        assert_eq!(modules[0].bytes[4], 0x87);
        assert!(!modules[0].relocations.contains(&4));
        assert!(modules[1].relocations.contains(&4));
        assert_ne!(modules[0].pattern(), modules[1].pattern());
    }

    #[test]
    fn test_corrupt() {
        let config = Config::default();
        // missing terminator.
        assert!(parse("558BEC5DC3 00 0000 0005 :0000 _f\n", &config).is_err());
        // footer longer than the function.
        assert!(parse("558BEC 00 0000 0004 :0000 _f 5DC3\n---", &config).is_err());
        // leading pattern wider than the tree supports.
        assert!(parse("558BEC5DC3 00 0000 0005 :0000 _f\n---", &config.clone().with_leading_length(4)).is_err());
        // empty file is fine.
        assert_eq!(parse("---", &config).unwrap().len(), 0);
    }

    #[test]
    fn test_leading_width() {
        // .pat lines always carry 0x20 leading elements, so only the default
        // leading length loads them.
        let line = EH_PROLOG3_PAT.lines().nth(3).unwrap().to_string() + "\n---";

        let config = Config::default();
        let mut b = SignatureTreeBuilder::new(config.clone());
        let report = b.load(parse(&line, &config).unwrap());
        assert_eq!(report.inserted, 1);

        assert!(parse(&line, &config.clone().with_leading_length(0x10)).is_err());

        let wide = config.with_leading_length(0x30);
        let mut b = SignatureTreeBuilder::new(wide.clone());
        let report = b.load(parse(&line, &wide).unwrap());
        assert_eq!(report.inserted, 0);
        assert_eq!(report.malformed, 1);
    }

    #[test]
    fn test_crlf() {
        let modules = parse("558BEC5DC3 00 0000 0005 :0000 _f\r\n---\r\n", &Config::default()).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name(), Some("_f"));
    }
}
