//! one catalogued function, as handed to the signature tree by a loader.
use std::collections::BTreeSet;

use crate::{
    config::Config,
    pattern::{Key, Pattern},
    tree::TreeError,
    Name, Symbol,
};

#[derive(Clone)]
pub struct ModuleDescriptor {
    pub names:          Vec<Symbol>,
    pub description:    Option<String>,
    /// raw bytes of the function.
    /// bytes at relocation offsets are not meaningful.
    pub bytes:          Vec<u8>,
    /// offsets into `bytes` that vary across builds.
    pub relocations:    BTreeSet<usize>,
    pub crc16:          u16,
    /// number of bytes passed to the crc16, starting at `leading_length`.
    pub crc_length:     usize,
    pub leading_length: usize,
}

impl ModuleDescriptor {
    /// build a descriptor from raw function bytes,
    /// deriving the key the same way a query does.
    ///
    /// ```
    /// use flirt_sigtree::{Config, ModuleDescriptor};
    ///
    /// let m = ModuleDescriptor::from_bytes("g", b"\xE8\x00\x00\x00\x00\xC3", [1, 2, 3, 4], &Config::default());
    /// assert_eq!(m.name(), Some("g"));
    /// assert_eq!(m.leading_length, 6);
    /// assert_eq!(m.render_pat(), "E8........C3 00 0000 0006 :0000 g");
    /// ```
    pub fn from_bytes<R: IntoIterator<Item = usize>>(
        name: &str,
        bytes: &[u8],
        relocations: R,
        config: &Config,
    ) -> ModuleDescriptor {
        let relocations: BTreeSet<usize> = relocations.into_iter().collect();
        let (key, crc_length) = config.key(bytes, &relocations);

        ModuleDescriptor {
            names: vec![Symbol::public(name)],
            description: None,
            bytes: bytes.to_vec(),
            relocations,
            crc16: key.crc16,
            crc_length,
            leading_length: key.leading_length,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_symbol(mut self, symbol: Symbol) -> Self {
        self.names.push(symbol);
        self
    }

    /// the primary name: the public name at offset 0,
    /// or failing that, the first public name.
    pub fn name(&self) -> Option<&str> {
        let mut fallback = None;
        for name in self.names.iter() {
            if let Symbol::Public(name) = name {
                if name.offset == 0x0 {
                    return Some(name.name.as_str());
                }
                if fallback.is_none() {
                    fallback = Some(name.name.as_str());
                }
            }
        }

        fallback
    }

    /// names of functions referenced from within the body.
    pub fn references(&self) -> impl Iterator<Item = &Name> {
        self.names.iter().filter_map(|name| match name {
            Symbol::Reference(name) => Some(name),
            _ => None,
        })
    }

    pub fn key(&self) -> Key {
        Key {
            crc16:          self.crc16,
            leading_length: self.leading_length,
        }
    }

    /// the bytes with relocations masked out.
    pub fn pattern(&self) -> Pattern {
        Pattern::from_masked(&self.bytes, &self.relocations)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// reject descriptors that cannot be placed into a tree built with
    /// `config`.
    pub fn validate(&self, config: &Config) -> Result<(), TreeError> {
        let malformed = |reason: String| Err(TreeError::MalformedDescriptor(reason));
        let name = self.name().unwrap_or("<unnamed>");

        if self.bytes.is_empty() {
            return malformed(format!("{name}: no bytes"));
        }

        if self.name().is_none() {
            return malformed("no public name".to_string());
        }

        if self.leading_length > self.bytes.len() {
            return malformed(format!(
                "{name}: leading length {:#x} exceeds size {:#x}",
                self.leading_length,
                self.bytes.len()
            ));
        }

        if self.leading_length != config.leading_length_of(self.bytes.len()) {
            return malformed(format!(
                "{name}: leading length {:#x}, expected {:#x}",
                self.leading_length,
                config.leading_length_of(self.bytes.len())
            ));
        }

        if self.crc_length > config.max_crc_length || self.leading_length + self.crc_length > self.bytes.len() {
            return malformed(format!("{name}: crc16 length {:#x} out of range", self.crc_length));
        }

        if let Some(&offset) = self.relocations.iter().next_back() {
            if offset >= self.bytes.len() {
                return malformed(format!("{name}: relocation {offset:#x} out of range"));
            }
        }

        Ok(())
    }

    /// render the descriptor as a line of a .pat file.
    pub fn render_pat(&self) -> String {
        let pattern = self.pattern();
        let leading_length = std::cmp::min(self.leading_length, pattern.len());
        let leading = Pattern(pattern.0[..leading_length].to_vec());

        let mut parts = vec![
            format!("{leading}"),
            format!("{:02X}", self.crc_length),
            format!("{:04X}", self.crc16),
            format!("{:04X}", self.bytes.len()),
        ];
        parts.extend(self.names.iter().map(|name| format!("{name}")));

        // malformed descriptors are still rendered, so clamp to the bytes present.
        let footer_start = leading_length.saturating_add(self.crc_length);
        if footer_start < pattern.len() {
            parts.push(format!("{}", Pattern(pattern.0[footer_start..].to_vec())));
        }

        parts.join(" ")
    }
}

impl std::fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {:04x}", self.name().unwrap_or("<unnamed>"), self.key(), self.bytes.len())
    }
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render_pat())?;
        if let Some(description) = &self.description {
            write!(f, " ({description})")?;
        }
        Ok(())
    }
}
