use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::Value;

const BYTE_ORDER_MARK: char = '\u{feff}';
const FALLBACK_INDENT: &str = "    ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

/// Formatting traits of a JSON document as it was found on disk.
///
/// Launcher files are written by different tools over time (tabs, two or four
/// spaces, CRLF on Windows, sometimes a BOM). A rewrite reproduces what was read
/// so that the only visible diff is the mutated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonStyle {
    indent: Option<String>,
    line_ending: LineEnding,
    trailing_newline: bool,
    byte_order_mark: bool,
}

impl Default for JsonStyle {
    fn default() -> Self {
        Self {
            indent: Some(FALLBACK_INDENT.to_string()),
            line_ending: LineEnding::Lf,
            trailing_newline: true,
            byte_order_mark: false,
        }
    }
}

impl JsonStyle {
    pub fn detect(raw: &str) -> Self {
        let byte_order_mark = raw.starts_with(BYTE_ORDER_MARK);
        let body = strip_byte_order_mark(raw);
        let line_ending = if body.contains("\r\n") {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        };
        let trailing_newline = body.ends_with('\n');

        let trimmed = body.trim();
        let indent = if trimmed.contains('\n') {
            let unit = trimmed.lines().skip(1).find_map(|line| {
                let leading: String = line
                    .chars()
                    .take_while(|ch| *ch == ' ' || *ch == '\t')
                    .collect();
                (!leading.is_empty()).then_some(leading)
            });
            Some(unit.unwrap_or_else(|| FALLBACK_INDENT.to_string()))
        } else {
            None
        };

        Self {
            indent,
            line_ending,
            trailing_newline,
            byte_order_mark,
        }
    }

    pub fn indent(&self) -> Option<&str> {
        self.indent.as_deref()
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    pub fn trailing_newline(&self) -> bool {
        self.trailing_newline
    }

    pub fn byte_order_mark(&self) -> bool {
        self.byte_order_mark
    }

    pub fn render(&self, value: &Value) -> Result<String, serde_json::Error> {
        let body = match &self.indent {
            None => serde_json::to_string(value)?,
            Some(indent) => {
                let mut out = Vec::new();
                let formatter = PrettyFormatter::with_indent(indent.as_bytes());
                let mut serializer = Serializer::with_formatter(&mut out, formatter);
                value.serialize(&mut serializer)?;
                String::from_utf8_lossy(&out).into_owned()
            }
        };

        let mut rendered = String::with_capacity(body.len() + 4);
        if self.byte_order_mark {
            rendered.push(BYTE_ORDER_MARK);
        }
        rendered.push_str(&body);
        if self.trailing_newline {
            rendered.push('\n');
        }

        // Serialized JSON never carries a raw newline inside a string literal.
        if self.line_ending == LineEnding::CrLf {
            rendered = rendered.replace('\n', "\r\n");
        }
        Ok(rendered)
    }
}

pub(crate) fn strip_byte_order_mark(raw: &str) -> &str {
    raw.strip_prefix(BYTE_ORDER_MARK).unwrap_or(raw)
}

pub(crate) fn parse_document(raw: &str) -> Result<(Value, JsonStyle), serde_json::Error> {
    let value = serde_json::from_str(strip_byte_order_mark(raw))?;
    Ok((value, JsonStyle::detect(raw)))
}
