//! A small compound-selector matcher for the data-driven selector tables.
//!
//! Supports comma-separated lists of compound selectors built from a tag
//! name (or `*`), `#id`, `.class` and attribute tests (`[a]`, `[a=v]`,
//! `[a^=v]`, `[a$=v]`, `[a*=v]`, `[a~=v]`). Combinators are rejected.

use anyhow::{bail, Result};

use crate::dom::{Document, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Prefix,
    Suffix,
    Contains,
    Word,
}

#[derive(Debug, Clone, PartialEq)]
struct AttrTest {
    name: String,
    op: AttrOp,
    value: String,
}

impl AttrTest {
    fn matches(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        let v = self.value.as_str();
        match self.op {
            AttrOp::Exists => true,
            AttrOp::Equals => actual == v,
            AttrOp::Prefix => !v.is_empty() && actual.starts_with(v),
            AttrOp::Suffix => !v.is_empty() && actual.ends_with(v),
            AttrOp::Contains => !v.is_empty() && actual.contains(v),
            AttrOp::Word => actual.split_ascii_whitespace().any(|w| w == v),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
}

impl Compound {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(el) = doc.element(node) else {
            return false;
        };
        if let Some(tag) = &self.tag {
            if el.tag != *tag {
                return false;
            }
        }
        self.ids.iter().all(|id| el.attr("id") == Some(id.as_str()))
            && self.classes.iter().all(|c| el.has_class(c))
            && self.attrs.iter().all(|a| a.matches(el.attr(&a.name)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectorList {
    compounds: Vec<Compound>,
}

impl SelectorList {
    pub fn parse(source: &str) -> Result<Self> {
        let compounds = source
            .split(',')
            .map(|part| parse_compound(part.trim()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { compounds })
    }

    /// Parse and merge several selector strings into one list.
    pub fn parse_all<S: AsRef<str>>(sources: &[S]) -> Result<Self> {
        let mut compounds = Vec::new();
        for s in sources {
            compounds.extend(Self::parse(s.as_ref())?.compounds);
        }
        Ok(Self { compounds })
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.compounds.iter().any(|c| c.matches(doc, node))
    }

    pub fn len(&self) -> usize {
        self.compounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty()
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn take_ident(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn parse_compound(source: &str) -> Result<Compound> {
    if source.is_empty() {
        bail!("empty selector");
    }
    let chars: Vec<char> = source.chars().collect();
    let mut pos = 0;
    let mut compound = Compound::default();

    if chars[0] == '*' {
        pos = 1;
    } else if is_ident_char(chars[0]) {
        compound.tag = Some(take_ident(&chars, &mut pos).to_ascii_lowercase());
    }

    while pos < chars.len() {
        match chars[pos] {
            '.' | '#' => {
                let sigil = chars[pos];
                pos += 1;
                let ident = take_ident(&chars, &mut pos);
                if ident.is_empty() {
                    bail!("selector `{source}`: expected a name after `{sigil}`");
                }
                if sigil == '.' {
                    compound.classes.push(ident);
                } else {
                    compound.ids.push(ident);
                }
            }
            '[' => {
                pos += 1;
                compound.attrs.push(parse_attr(source, &chars, &mut pos)?);
            }
            c => bail!("selector `{source}`: unsupported character `{c}`"),
        }
    }
    Ok(compound)
}

fn parse_attr(source: &str, chars: &[char], pos: &mut usize) -> Result<AttrTest> {
    let name = take_ident(chars, pos).to_ascii_lowercase();
    if name.is_empty() {
        bail!("selector `{source}`: expected an attribute name");
    }
    let op = match chars.get(*pos) {
        Some(']') => {
            *pos += 1;
            return Ok(AttrTest {
                name,
                op: AttrOp::Exists,
                value: String::new(),
            });
        }
        Some('=') => {
            *pos += 1;
            AttrOp::Equals
        }
        Some(&c @ ('^' | '$' | '*' | '~')) if chars.get(*pos + 1) == Some(&'=') => {
            *pos += 2;
            match c {
                '^' => AttrOp::Prefix,
                '$' => AttrOp::Suffix,
                '*' => AttrOp::Contains,
                _ => AttrOp::Word,
            }
        }
        _ => bail!("selector `{source}`: malformed attribute test"),
    };

    let value = match chars.get(*pos) {
        Some(&quote @ ('"' | '\'')) => {
            *pos += 1;
            let start = *pos;
            while *pos < chars.len() && chars[*pos] != quote {
                *pos += 1;
            }
            if *pos >= chars.len() {
                bail!("selector `{source}`: unterminated string");
            }
            let v: String = chars[start..*pos].iter().collect();
            *pos += 1;
            v
        }
        _ => take_ident(chars, pos),
    };

    if chars.get(*pos) != Some(&']') {
        bail!("selector `{source}`: expected `]`");
    }
    *pos += 1;
    Ok(AttrTest { name, op, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::parse(
            r#"<main id="m" class="content grid"></main>
               <div role="main"></div>
               <a id="rel" href="/about">About</a>
               <a id="abs" href="https://x.com/">X</a>
               <link rel="stylesheet" href="/a.css">"#,
            None,
        )
    }

    #[test]
    fn tag_class_and_id() {
        let d = doc();
        let m = d.find_by_id("m").unwrap();
        assert!(SelectorList::parse("main").unwrap().matches(&d, m));
        assert!(SelectorList::parse(".grid").unwrap().matches(&d, m));
        assert!(SelectorList::parse("main#m.content.grid").unwrap().matches(&d, m));
        assert!(!SelectorList::parse("section, .post").unwrap().matches(&d, m));
    }

    #[test]
    fn attribute_operators() {
        let d = doc();
        let rel = d.find_by_id("rel").unwrap();
        let abs = d.find_by_id("abs").unwrap();
        let list = SelectorList::parse(r#"a[href^="/"]"#).unwrap();
        assert!(list.matches(&d, rel));
        assert!(!list.matches(&d, abs));
        assert!(SelectorList::parse("a[href^=http]").unwrap().matches(&d, abs));
        assert!(SelectorList::parse("a[href*='x.com']").unwrap().matches(&d, abs));
        assert!(SelectorList::parse("a[href$=\"/\"]").unwrap().matches(&d, abs));
    }

    #[test]
    fn select_over_document() {
        let d = doc();
        let list = SelectorList::parse(r#"[role="main"], link[rel~=stylesheet]"#).unwrap();
        assert_eq!(d.select(&list).len(), 2);
    }

    #[test]
    fn rejects_combinators_and_garbage() {
        assert!(SelectorList::parse("nav a").is_err());
        assert!(SelectorList::parse("div > p").is_err());
        assert!(SelectorList::parse("[href=\"x]").is_err());
        assert!(SelectorList::parse("a,").is_err());
        assert!(SelectorList::parse(".").is_err());
    }

    #[test]
    fn parse_all_merges_lists() {
        let list = SelectorList::parse_all(&["main", ".post, article"]).unwrap();
        assert_eq!(list.len(), 3);
        assert!(!list.is_empty());
    }
}
