//! Shared output helpers: pretty text for humans, stable JSON for tools.

use serde::Serialize;
use std::io::{self, Write};

pub const PRETTY_RULE_WIDTH: usize = 72;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Section heading followed by a rule.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Left-aligned key/value line.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<14} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Pretty,
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Pretty-printed JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_pads_key() {
        let mut buf = Vec::new();
        pretty_kv(&mut buf, "Seeds", "10").expect("write");
        assert_eq!(String::from_utf8(buf).expect("utf8"), "Seeds:         10\n");
    }

    #[test]
    fn section_has_rule() {
        let mut buf = Vec::new();
        pretty_section(&mut buf, "Heading").expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.starts_with("Heading\n"));
        assert!(text.trim_end().ends_with(&"-".repeat(PRETTY_RULE_WIDTH)));
    }
}
