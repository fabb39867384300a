//! Tagged-tree persistence
//!
//! A small XML writer and reader, enough for project files: elements,
//! attributes and nesting. Text content is never produced and is skipped
//! on read.

use crate::{CfError, CfResult};

/// Elements nested deeper than this are rejected by the reader
pub const MAX_PARSE_DEPTH: usize = 256;

// ═══════════════════════════════════════════════════════════════════════════
// NUMBER FORMATTING
// ═══════════════════════════════════════════════════════════════════════════

/// Format `value` with `digits` significant digits, like C's `%.Ng`
///
/// Trailing zeros are dropped; scientific notation is used when the
/// decimal exponent is below -4 or at least `digits`.
///
/// Precision is relative. Clip offsets written with 8 digits keep sample
/// accuracy at 44.1 kHz only below 1000 s; from there on the last digit
/// is 0.0001 s (about 4 samples), so a saved offset can come back a few
/// samples off.
pub fn format_significant(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let digits = digits.max(1);

    // Let the formatter do the rounding, then read back the exponent
    let sci = format!("{:.*e}", digits - 1, value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exp < -4 || exp >= digits as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let decimals = (digits as i32 - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Validate and parse a floating-point attribute
pub fn parse_f64_attr(name: &str, value: &str) -> CfResult<f64> {
    let parsed = value
        .parse::<f64>()
        .map_err(|_| CfError::Parse(format!("attribute '{name}' is not a number: '{value}'")))?;
    if !parsed.is_finite() {
        return Err(CfError::Parse(format!(
            "attribute '{name}' is not finite: '{value}'"
        )));
    }
    Ok(parsed)
}

/// Validate and parse an integer attribute
pub fn parse_i64_attr(name: &str, value: &str) -> CfResult<i64> {
    value
        .parse::<i64>()
        .map_err(|_| CfError::Parse(format!("attribute '{name}' is not an integer: '{value}'")))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// WRITER
// ═══════════════════════════════════════════════════════════════════════════

/// Streaming XML writer
///
/// Attributes must be written right after `start_tag`, before any child.
#[derive(Debug, Default)]
pub struct XmlWriter {
    out: String,
    open: Vec<String>,
    /// Current start tag has not been closed with `>` yet
    in_start_tag: bool,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_tag(&mut self, name: &str) {
        if self.in_start_tag {
            self.out.push_str(">\n");
        }
        self.indent();
        self.out.push('<');
        self.out.push_str(name);
        self.open.push(name.to_string());
        self.in_start_tag = true;
    }

    pub fn write_attr(&mut self, name: &str, value: &str) -> CfResult<()> {
        if !self.in_start_tag {
            return Err(CfError::inconsistency(format!(
                "attribute '{name}' written outside a start tag"
            )));
        }
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str("=\"");
        self.out.push_str(&escape(value));
        self.out.push('"');
        Ok(())
    }

    pub fn write_attr_i64(&mut self, name: &str, value: i64) -> CfResult<()> {
        self.write_attr(name, &value.to_string())
    }

    /// Write a float attribute with the given number of significant digits
    pub fn write_attr_f64(&mut self, name: &str, value: f64, digits: usize) -> CfResult<()> {
        self.write_attr(name, &format_significant(value, digits))
    }

    pub fn end_tag(&mut self, name: &str) -> CfResult<()> {
        match self.open.pop() {
            Some(open) if open == name => {}
            Some(open) => {
                return Err(CfError::inconsistency(format!(
                    "end tag '{name}' closes '{open}'"
                )));
            }
            None => {
                return Err(CfError::inconsistency(format!(
                    "end tag '{name}' without start tag"
                )));
            }
        }
        if self.in_start_tag {
            self.out.push_str("/>\n");
            self.in_start_tag = false;
        } else {
            self.indent();
            self.out.push_str("</");
            self.out.push_str(name);
            self.out.push_str(">\n");
        }
        Ok(())
    }

    /// Finish writing; fails if any element is still open
    pub fn into_string(self) -> CfResult<String> {
        if let Some(open) = self.open.last() {
            return Err(CfError::inconsistency(format!("element '{open}' left open")));
        }
        Ok(self.out)
    }

    fn indent(&mut self) {
        for _ in 0..self.open.len() {
            self.out.push('\t');
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TREE
// ═══════════════════════════════════════════════════════════════════════════

/// One parsed element
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub name: String,
    /// Attributes in document order
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// First attribute with this name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute that must be present
    pub fn required_attr(&self, name: &str) -> CfResult<&str> {
        self.attr(name).ok_or_else(|| {
            CfError::Parse(format!("<{}> is missing attribute '{name}'", self.name))
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// READER
// ═══════════════════════════════════════════════════════════════════════════

/// Parse a document and return its root element
pub fn parse_document(src: &str) -> CfResult<XmlElement> {
    let mut parser = Parser { src, pos: 0 };
    parser.skip_misc()?;
    if !parser.rest().starts_with('<') {
        return Err(parser.error("expected root element"));
    }
    let root = parser.element(0)?;
    parser.skip_misc()?;
    if parser.pos < src.len() {
        return Err(parser.error("content after root element"));
    }
    Ok(root)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn error(&self, what: &str) -> CfError {
        CfError::Parse(format!("{what} at byte {}", self.pos))
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Skip everything up to and including `end`
    fn skip_past(&mut self, end: &str) -> CfResult<()> {
        match self.rest().find(end) {
            Some(i) => {
                self.pos += i + end.len();
                Ok(())
            }
            None => Err(self.error(&format!("unterminated construct, expected '{end}'"))),
        }
    }

    /// Whitespace, declarations, comments and doctype between elements
    fn skip_misc(&mut self) -> CfResult<()> {
        loop {
            self.skip_ws();
            let rest = self.rest();
            if rest.starts_with("<?") {
                self.skip_past("?>")?;
            } else if rest.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if rest.starts_with("<!") {
                self.skip_past(">")?;
            } else {
                return Ok(());
            }
        }
    }

    fn expect(&mut self, token: &str) -> CfResult<()> {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{token}'")))
        }
    }

    fn name(&mut self) -> CfResult<&'a str> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected a name"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn element(&mut self, depth: usize) -> CfResult<XmlElement> {
        if depth >= MAX_PARSE_DEPTH {
            return Err(self.error("elements nested too deeply"));
        }
        self.expect("<")?;
        let mut element = XmlElement::new(self.name()?);

        loop {
            self.skip_ws();
            if self.rest().starts_with("/>") {
                self.pos += 2;
                return Ok(element);
            }
            if self.rest().starts_with('>') {
                self.pos += 1;
                break;
            }
            let key = self.name()?;
            self.skip_ws();
            self.expect("=")?;
            self.skip_ws();
            let value = self.quoted()?;
            element.attributes.push((key.to_string(), value));
        }

        loop {
            // Text content is not meaningful here
            match self.rest().find('<') {
                Some(i) => self.pos += i,
                None => return Err(self.error(&format!("unclosed element <{}>", element.name))),
            }
            let rest = self.rest();
            if rest.starts_with("</") {
                self.pos += 2;
                let end = self.name()?;
                if end != element.name {
                    return Err(self.error(&format!(
                        "mismatched end tag </{end}> for <{}>",
                        element.name
                    )));
                }
                self.skip_ws();
                self.expect(">")?;
                return Ok(element);
            } else if rest.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if rest.starts_with("<![CDATA[") {
                self.skip_past("]]>")?;
            } else if rest.starts_with("<?") {
                self.skip_past("?>")?;
            } else {
                element.children.push(self.element(depth + 1)?);
            }
        }
    }

    fn quoted(&mut self) -> CfResult<String> {
        let quote = match self.rest().chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected quoted attribute value")),
        };
        self.pos += 1;
        let rest = self.rest();
        let end = rest
            .find(quote)
            .ok_or_else(|| self.error("unterminated attribute value"))?;
        self.pos += end + 1;
        decode_entities(&rest[..end]).map_err(|e| self.error(&e))
    }
}

fn decode_entities(raw: &str) -> Result<String, String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| format!("unterminated entity in '{raw}'"))?;
        let entity = &after[..semi];
        let decoded = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32)
                    .ok_or_else(|| format!("unknown entity '&{entity};'"))?
            }
        };
        out.push(decoded);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_significant_like_printf() {
        assert_eq!(format_significant(0.0, 8), "0");
        assert_eq!(format_significant(1.5, 8), "1.5");
        assert_eq!(format_significant(2.0, 8), "2");
        assert_eq!(format_significant(-0.25, 8), "-0.25");
        assert_eq!(format_significant(1.0 / 3.0, 8), "0.33333333");
        assert_eq!(format_significant(123456.789, 8), "123456.79");
        assert_eq!(format_significant(123456789.0, 8), "1.2345679e+08");
        assert_eq!(format_significant(0.0001, 8), "0.0001");
        assert_eq!(format_significant(0.00001, 8), "1e-05");
    }

    #[test]
    fn test_format_significant_resolution_drops_with_magnitude() {
        assert_eq!(format_significant(999.12345678, 8), "999.12346");
        assert_eq!(format_significant(1234.5678912, 8), "1234.5679");
    }

    #[test]
    fn test_writer_nesting() {
        let mut w = XmlWriter::new();
        w.start_tag("clip");
        w.write_attr_f64("offset", 1.25, 8).unwrap();
        w.write_attr("name", "a<b").unwrap();
        w.start_tag("point");
        w.write_attr_i64("n", 3).unwrap();
        w.end_tag("point").unwrap();
        w.end_tag("clip").unwrap();
        let text = w.into_string().unwrap();
        assert_eq!(
            text,
            "<clip offset=\"1.25\" name=\"a&lt;b\">\n\t<point n=\"3\"/>\n</clip>\n"
        );
    }

    #[test]
    fn test_writer_rejects_mismatched_end() {
        let mut w = XmlWriter::new();
        w.start_tag("a");
        assert!(w.end_tag("b").is_err());

        let mut w = XmlWriter::new();
        w.start_tag("a");
        assert!(w.into_string().is_err());
    }

    #[test]
    fn test_parse_document() {
        let doc = r#"<?xml version="1.0"?>
<!-- project -->
<track rate='44100' title="Tom &amp; Jerry">
    some ignored text
    <clip offset="0.5"/>
    <clip offset="2"><inner/></clip>
</track>"#;
        let root = parse_document(doc).unwrap();
        assert_eq!(root.name, "track");
        assert_eq!(root.attr("rate"), Some("44100"));
        assert_eq!(root.attr("title"), Some("Tom & Jerry"));
        assert_eq!(root.children_named("clip").count(), 2);
        assert_eq!(root.children[1].children[0].name, "inner");
        assert!(root.attr("missing").is_none());
        assert!(root.required_attr("missing").is_err());
    }

    #[test]
    fn test_parse_writer_output() {
        let mut w = XmlWriter::new();
        w.start_tag("a");
        w.write_attr("q", "\"quoted\" & 'single'").unwrap();
        w.start_tag("b");
        w.end_tag("b").unwrap();
        w.end_tag("a").unwrap();
        let root = parse_document(&w.into_string().unwrap()).unwrap();
        assert_eq!(root.attr("q"), Some("\"quoted\" & 'single'"));
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_document("<a>").is_err());
        assert!(parse_document("<a></b>").is_err());
        assert!(parse_document("<a x=1/>").is_err());
        assert!(parse_document("<a x=\"&bogus;\"/>").is_err());
        assert!(parse_document("<a/><b/>").is_err());

        let deep = "<a>".repeat(MAX_PARSE_DEPTH + 1);
        assert!(parse_document(&deep).is_err());
    }

    #[test]
    fn test_numeric_attr_validation() {
        assert_eq!(parse_f64_attr("offset", "1.5").unwrap(), 1.5);
        assert!(parse_f64_attr("offset", "").is_err());
        assert!(parse_f64_attr("offset", "1.5x").is_err());
        assert!(parse_f64_attr("offset", "NaN").is_err());
        assert!(parse_f64_attr("offset", "inf").is_err());
        assert_eq!(parse_i64_attr("colorindex", "-3").unwrap(), -3);
        assert!(parse_i64_attr("colorindex", "3.0").is_err());
    }
}
