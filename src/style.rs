//! Inline style declarations and the computed-style view the rules query.
//!
//! There is no cascade engine here. The host supplies whatever computed
//! values its stylesheet engine produced (see [`crate::dom::Document::set_computed_style`]),
//! and inline declarations are layered on top of them.

use std::collections::BTreeMap;
use std::fmt;

use cssparser::{
    AtRuleParser, CowRcStr, DeclarationParser, ParseError, Parser, ParserInput, ParserState,
    QualifiedRuleParser, RuleBodyItemParser, RuleBodyParser,
};

/// One `name: value [!important]` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub value: String,
    pub important: bool,
}

/// Parsed contents of a `style` attribute, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineStyle {
    declarations: Vec<Declaration>,
}

/// Declaration-only body parser. Values are kept as raw source text, so
/// `url(...)`, strings and comments containing `;` survive a rewrite.
struct InlineDeclParser;

impl<'i> DeclarationParser<'i> for InlineDeclParser {
    type Declaration = Declaration;
    type Error = ();

    fn parse_value<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
        _declaration_start: &ParserState,
    ) -> Result<Self::Declaration, ParseError<'i, Self::Error>> {
        let start = input.position();
        while input.next_including_whitespace_and_comments().is_ok() {}
        let (value, important) = split_important(input.slice_from(start));
        Ok(Declaration {
            name: name.to_ascii_lowercase(),
            value,
            important,
        })
    }
}

impl<'i> AtRuleParser<'i> for InlineDeclParser {
    type Prelude = ();
    type AtRule = Declaration;
    type Error = ();
}

impl<'i> QualifiedRuleParser<'i> for InlineDeclParser {
    type Prelude = ();
    type QualifiedRule = Declaration;
    type Error = ();
}

impl<'i> RuleBodyItemParser<'i, Declaration, ()> for InlineDeclParser {
    fn parse_declarations(&self) -> bool {
        true
    }

    fn parse_qualified(&self) -> bool {
        false
    }
}

/// Strip a trailing `!important`, in any case and with any spacing after `!`.
fn split_important(raw: &str) -> (String, bool) {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    if let Some(head) = lower.strip_suffix("important").map(str::trim_end) {
        if let Some(head) = head.strip_suffix('!') {
            return (trimmed[..head.len()].trim_end().to_string(), true);
        }
    }
    (trimmed.to_string(), false)
}

impl InlineStyle {
    /// Parse a `style` attribute. Invalid declarations are dropped, the rest
    /// are kept in source order.
    pub fn parse(text: &str) -> Self {
        let mut input = ParserInput::new(text);
        let mut parser = Parser::new(&mut input);
        let mut body = InlineDeclParser;
        let declarations = RuleBodyParser::new(&mut parser, &mut body)
            .flatten()
            .filter(|d| !d.name.is_empty())
            .collect();
        Self { declarations }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.declarations
            .iter()
            .rev()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Set or replace a property. Returns false when nothing changed.
    pub fn set(&mut self, name: &str, value: &str, important: bool) -> bool {
        if let Some(existing) = self.declarations.iter_mut().find(|d| d.name == name) {
            if existing.value == value && existing.important == important {
                return false;
            }
            existing.value = value.to_string();
            existing.important = important;
            return true;
        }
        self.declarations.push(Declaration {
            name: name.to_string(),
            value: value.to_string(),
            important,
        });
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.declarations.len();
        self.declarations.retain(|d| d.name != name);
        before != self.declarations.len()
    }
}

impl fmt::Display for InlineStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.declarations.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}: {}", d.name, d.value)?;
            if d.important {
                f.write_str(" !important")?;
            }
            f.write_str(";")?;
        }
        Ok(())
    }
}

/// Resolved property values for one element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputedStyle {
    values: BTreeMap<String, String>,
}

impl ComputedStyle {
    /// Layer `inline` over host-computed `base` values. Inline wins unless
    /// the base value was itself important and the inline one is not.
    pub fn resolve(base: Option<&InlineStyle>, inline: &InlineStyle) -> Self {
        let mut values = BTreeMap::new();
        let mut important = BTreeMap::new();
        if let Some(base) = base {
            for d in base.declarations() {
                values.insert(d.name.clone(), d.value.clone());
                important.insert(d.name.clone(), d.important);
            }
        }
        for d in inline.declarations() {
            if important.get(&d.name).copied().unwrap_or(false) && !d.important {
                continue;
            }
            values.insert(d.name.clone(), d.value.clone());
        }
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn display_none(&self) -> bool {
        self.get("display")
            .is_some_and(|v| v.eq_ignore_ascii_case("none"))
    }

    pub fn visibility_hidden(&self) -> bool {
        self.get("visibility").is_some_and(|v| {
            v.eq_ignore_ascii_case("hidden") || v.eq_ignore_ascii_case("collapse")
        })
    }

    /// Parsed opacity, `1.0` when unset or unparseable. Percentages are accepted.
    pub fn opacity(&self) -> f32 {
        let Some(raw) = self.get("opacity") else {
            return 1.0;
        };
        let raw = raw.trim();
        if let Some(pct) = raw.strip_suffix('%') {
            return pct.trim().parse::<f32>().map(|p| p / 100.0).unwrap_or(1.0);
        }
        raw.parse().unwrap_or(1.0)
    }

    pub fn is_hidden(&self) -> bool {
        self.display_none() || self.visibility_hidden() || self.opacity() <= 0.0
    }

    /// True when an animation or transition is declared and not `none`.
    pub fn has_motion(&self) -> bool {
        let active = |name: &str| {
            self.get(name).is_some_and(|v| {
                let v = v.trim();
                !v.is_empty() && !v.eq_ignore_ascii_case("none") && !v.eq_ignore_ascii_case("all 0s")
            })
        };
        active("animation") || active("animation-name") || active("transition")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_serialize() {
        let s = InlineStyle::parse("display:none; color : red !important;;");
        assert_eq!(s.get("display"), Some("none"));
        assert_eq!(s.get("color"), Some("red"));
        assert!(s.declarations()[1].important);
        assert_eq!(s.to_string(), "display: none; color: red !important;");
    }

    #[test]
    fn semicolons_inside_urls_and_strings_survive() {
        let text = r#"background-image: url(data:image/png;base64,AAAA); font-family: "a;b", serif; color: red"#;
        let mut s = InlineStyle::parse(text);
        assert_eq!(s.declarations().len(), 3);
        assert_eq!(s.get("background-image"), Some("url(data:image/png;base64,AAAA)"));
        assert_eq!(s.get("font-family"), Some(r#""a;b", serif"#));
        assert!(s.set("content-visibility", "auto", false));
        assert_eq!(
            s.to_string(),
            r#"background-image: url(data:image/png;base64,AAAA); font-family: "a;b", serif; color: red; content-visibility: auto;"#
        );

        let quoted = InlineStyle::parse(
            r#"background: url("data:image/svg+xml;charset=utf8,%3Csvg%3E") no-repeat"#,
        );
        assert_eq!(
            quoted.get("background"),
            Some(r#"url("data:image/svg+xml;charset=utf8,%3Csvg%3E") no-repeat"#)
        );
    }

    #[test]
    fn important_spacing_and_case() {
        let s = InlineStyle::parse("opacity: 1 ! IMPORTANT; color: red");
        assert_eq!(s.get("opacity"), Some("1"));
        assert!(s.declarations()[0].important);
        assert!(!s.declarations()[1].important);
    }

    #[test]
    fn set_reports_changes_only() {
        let mut s = InlineStyle::parse("opacity: 0");
        assert!(s.set("opacity", "1", true));
        assert!(!s.set("opacity", "1", true));
        assert!(s.remove("opacity"));
        assert!(!s.remove("opacity"));
        assert!(s.is_empty());
    }

    #[test]
    fn inline_overrides_base() {
        let base = InlineStyle::parse("display: none; opacity: 0");
        let inline = InlineStyle::parse("display: block");
        let computed = ComputedStyle::resolve(Some(&base), &inline);
        assert!(!computed.display_none());
        assert_eq!(computed.opacity(), 0.0);
        assert!(computed.is_hidden());
    }

    #[test]
    fn important_base_beats_plain_inline() {
        let base = InlineStyle::parse("display: none !important");
        let computed = ComputedStyle::resolve(Some(&base), &InlineStyle::parse("display: block"));
        assert!(computed.display_none());
        let forced = ComputedStyle::resolve(
            Some(&base),
            &InlineStyle::parse("display: block !important"),
        );
        assert!(!forced.display_none());
    }

    #[test]
    fn opacity_percent_and_garbage() {
        let c = ComputedStyle::resolve(None, &InlineStyle::parse("opacity: 0%"));
        assert_eq!(c.opacity(), 0.0);
        let c = ComputedStyle::resolve(None, &InlineStyle::parse("opacity: banana"));
        assert_eq!(c.opacity(), 1.0);
    }

    #[test]
    fn motion_detection() {
        let c = ComputedStyle::resolve(None, &InlineStyle::parse("transition: opacity .3s"));
        assert!(c.has_motion());
        let c = ComputedStyle::resolve(None, &InlineStyle::parse("animation: none"));
        assert!(!c.has_motion());
    }
}
