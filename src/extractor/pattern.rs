//! STIX pattern comparisons
//!
//! Only the comparison-expression level of the STIX patterning grammar is read:
//!
//! ```text
//! [ <object-type>:<property-path> <op> '<literal>' ( AND|OR ... )* ]
//! ```
//!
//! Property paths may contain quoted segments (`file:hashes.'SHA-256'`).
//! String literals use `\'` and `\\` as escapes. Every comparison in the
//! pattern is reported, whatever boolean operator joins it to the others.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::IocType;

static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<object>[a-z0-9][a-z0-9-]*)
        :
        (?P<path>(?:[A-Za-z0-9_-]+|'[^']*')(?:\.(?:[A-Za-z0-9_-]+|'[^']*'))*)
        \s*
        (?P<op>!=|<=|>=|=|<|>|\bLIKE\b|\bMATCHES\b)
        \s*
        '(?P<value>(?:[^'\\]|\\.)*)'
        ",
    )
    .expect("comparison regex is valid")
});

/// One `object:path op 'literal'` term of a pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison<'a> {
    pub object_type: &'a str,
    pub path: &'a str,
    pub operator: &'a str,
    pub value: String,
}

impl Comparison<'_> {
    /// Indicator type this comparison describes, if it is an equality on a
    /// property the indicator store understands
    pub fn ioc_type(&self) -> Option<IocType> {
        if self.operator != "=" {
            return None;
        }

        match (self.object_type, self.path) {
            ("domain-name", "value") => Some(IocType::Domain),
            ("ipv4-addr", "value") => Some(IocType::Ipv4),
            ("ipv6-addr", "value") => Some(IocType::Ipv6),
            ("file", path) => {
                let algorithm = path.strip_prefix("hashes.")?;
                let algorithm = algorithm.trim_matches('\'').replace('-', "");
                match algorithm.to_ascii_uppercase().as_str() {
                    "MD5" => Some(IocType::Md5),
                    "SHA256" => Some(IocType::Sha256),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// All comparisons in `pattern`, left to right
pub fn comparisons(pattern: &str) -> impl Iterator<Item = Comparison<'_>> {
    COMPARISON.captures_iter(pattern).filter_map(|caps| {
        Some(Comparison {
            object_type: caps.name("object")?.as_str(),
            path: caps.name("path")?.as_str(),
            operator: caps.name("op")?.as_str(),
            value: unescape(caps.name("value")?.as_str()),
        })
    })
}

fn unescape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}
