//! Cursor lexer.
//!
//! Cursors are plain text with a small fixed token vocabulary: decimal
//! integers, hex ids and guids, `a-b` ranges, `(...)` groups with
//! nesting, and percent-escaped free strings. [`Scanner`] walks a
//! cursor string and reports [`GraphError::Lexical`] with a byte
//! offset on any malformed token, which the engine surfaces to callers
//! as `BADCURSOR`.

use crate::error::{GraphError, GraphResult};
use crate::ident::{Guid, Id};

/// Characters that structure the cursor grammar and must be escaped
/// inside free-string tokens.
const RESERVED: &[char] = &['%', '/', ':', '(', ')', '@', ',', '[', ']', '-'];

/// Percent-escape a free string for embedding in a cursor.
pub fn escape_token(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        let c = b as char;
        if RESERVED.contains(&c) || b < 0x20 || b == 0x7f {
            out.push('%');
            out.push_str(&format!("{b:02x}"));
        } else {
            out.push(c);
        }
    }
    out
}

/// Inverse of [`escape_token`].
pub fn unescape_token(s: &str) -> GraphResult<String> {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3).ok_or(GraphError::Lexical {
                at: i,
                what: "truncated escape".into(),
            })?;
            let b = u8::from_str_radix(hex, 16).map_err(|_| GraphError::Lexical {
                at: i,
                what: format!("bad escape %{hex}"),
            })?;
            out.push(b);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| GraphError::Lexical {
        at: 0,
        what: "escape does not decode to utf-8".into(),
    })
}

/// Incremental reader over a cursor slice.
pub struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Scanner<'a> {
        Scanner { src, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn done(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn err(&self, what: impl Into<String>) -> GraphError {
        GraphError::Lexical {
            at: self.pos,
            what: what.into(),
        }
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Consume `c` if it is next; report whether it was.
    pub fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, c: char) -> GraphResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.err(format!("expected {c:?}")))
        }
    }

    /// Consume a literal keyword.
    pub fn expect_str(&mut self, s: &str) -> GraphResult<()> {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            Ok(())
        } else {
            Err(self.err(format!("expected {s:?}")))
        }
    }

    /// Read up to (not including) any of `delims` or end of input.
    pub fn until(&mut self, delims: &[char]) -> &'a str {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|(_, c)| delims.contains(c))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += end;
        &rest[..end]
    }

    /// Decimal unsigned integer.
    pub fn u64(&mut self) -> GraphResult<u64> {
        let tok = self.take_while(|c| c.is_ascii_digit());
        if tok.is_empty() {
            return Err(self.err("expected decimal integer"));
        }
        tok.parse().map_err(|_| self.err("integer overflow"))
    }

    /// Signed decimal integer (budget and cost numbers).
    pub fn i64(&mut self) -> GraphResult<i64> {
        let neg = self.eat('-');
        let n = self.u64()? as i64;
        Ok(if neg { -n } else { n })
    }

    pub fn usize(&mut self) -> GraphResult<usize> {
        Ok(self.u64()? as usize)
    }

    /// Hex primitive id; `*` is the NONE sentinel.
    pub fn id(&mut self) -> GraphResult<Id> {
        if self.eat('*') {
            return Ok(Id::NONE);
        }
        let tok = self.take_while(|c| c.is_ascii_hexdigit());
        if tok.is_empty() {
            return Err(self.err("expected hex id"));
        }
        u64::from_str_radix(tok, 16)
            .map(Id::new)
            .map_err(|_| self.err("id overflow"))
    }

    /// Dotted hex guid.
    pub fn guid(&mut self) -> GraphResult<Guid> {
        let tok = self.take_while(|c| c.is_ascii_hexdigit() || c == '.');
        Guid::parse(tok).map_err(|e| self.err(e.to_string()))
    }

    /// A `[low-high]` id range bracket.
    pub fn id_range(&mut self) -> GraphResult<(Id, Id)> {
        self.expect('[')?;
        let low = self.id()?;
        self.expect('-')?;
        let high = self.id()?;
        self.expect(']')?;
        Ok((low, high))
    }

    /// A parenthesised group, with nesting; returns the interior.
    pub fn group(&mut self) -> GraphResult<&'a str> {
        self.expect('(')?;
        let rest = self.rest();
        let mut depth = 1usize;
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += i + 1;
                        return Ok(&rest[..i]);
                    }
                }
                _ => {}
            }
        }
        Err(self.err("unterminated group"))
    }

    /// Escaped free string ending at any reserved delimiter.
    pub fn token(&mut self) -> GraphResult<String> {
        let raw = self.until(&['/', ':', '(', ')', '@', ',', '[', ']']);
        unescape_token(raw)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|(_, c)| !pred(*c))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += end;
        &rest[..end]
    }
}
