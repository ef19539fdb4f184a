/// formatting state for `debug_dump`.
///
/// each level of the tree is rendered one `tab` deeper than its parent.
#[derive(Debug, Clone)]
pub struct DumpContext {
    pub prefix: String,
    pub tab:    String,
}

impl Default for DumpContext {
    fn default() -> Self {
        DumpContext {
            prefix: String::new(),
            tab:    "  ".to_string(),
        }
    }
}

impl DumpContext {
    pub fn with_prefix(prefix: &str) -> DumpContext {
        DumpContext {
            prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    /// a context one level deeper.
    pub fn nested(&self) -> DumpContext {
        DumpContext {
            prefix: format!("{}{}", self.prefix, self.tab),
            tab:    self.tab.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested() {
        let ctx = DumpContext::with_prefix("> ");
        assert_eq!(ctx.nested().prefix, ">   ");
        assert_eq!(ctx.nested().nested().prefix, ">     ");
    }
}
