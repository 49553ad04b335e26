//! A minimal line-oriented tokenizer shared by the document parsers.
//!
//! Every Tor directory document is a sequence of lines, each starting
//! with a keyword and followed by whitespace-separated arguments; some
//! keywords are followed by a PEM-style `-----BEGIN ...-----` blob.
//! This is not a general grammar engine — just enough structure to
//! pull out the handful of keywords each document type cares about.

use std::time::SystemTime;

use crate::err::{Error, Pos, Result};

/// One logical line of a directory document.
pub(crate) struct Item<'a> {
    /// The line number this item started on (1-indexed).
    pub(crate) pos: Pos,
    /// The keyword at the start of the line.
    pub(crate) keyword: &'a str,
    /// The whitespace-separated arguments after the keyword.
    pub(crate) args: Vec<&'a str>,
}

impl<'a> Item<'a> {
    /// Return the `n`th argument, or a [`Error::BadArgument`] if it's
    /// missing.
    pub(crate) fn arg(&self, n: usize, keyword: &'static str) -> crate::err::Result<&'a str> {
        self.args.get(n).copied().ok_or_else(|| Error::BadArgument {
            keyword,
            problem: format!("expected at least {} argument(s)", n + 1),
            pos: self.pos,
        })
    }
}

/// Split `text` into [`Item`]s, one per non-blank, non-PEM-body line.
///
/// PEM blocks (`-----BEGIN X-----` ... `-----END X-----`) are folded
/// into the `Item` for the line that precedes them, with their base64
/// body collected separately by the caller via [`take_object`].
pub(crate) fn items(text: &str) -> Vec<Item<'_>> {
    let mut out = Vec::new();
    let mut lines = text.lines().enumerate().peekable();
    while let Some((idx, line)) = lines.next() {
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_ascii_whitespace();
        let keyword = match parts.next() {
            Some(k) => k,
            None => continue,
        };
        let args: Vec<&str> = parts.collect();
        out.push(Item {
            pos: Pos::at_line(idx + 1),
            keyword,
            args,
        });
        // Skip over a following PEM object; the object's own content
        // is recovered by `take_object` using the original text.
        if let Some(&(_, next)) = lines.peek() {
            if next.starts_with("-----BEGIN") {
                for (_, l) in lines.by_ref() {
                    if l.starts_with("-----END") {
                        break;
                    }
                }
            }
        }
    }
    out
}

/// Extract the base64 body of the PEM object that follows `after_line`
/// (1-indexed) in `text`, decoding it.
pub(crate) fn take_object(text: &str, after_line: usize) -> crate::err::Result<Vec<u8>> {
    let mut lines = text.lines().skip(after_line);
    let header = lines.next().ok_or_else(|| Error::MissingToken {
        keyword: "-----BEGIN",
        pos: Pos::at_line(after_line),
    })?;
    if !header.starts_with("-----BEGIN") {
        return Err(Error::MissingToken {
            keyword: "-----BEGIN",
            pos: Pos::at_line(after_line + 1),
        });
    }
    let mut b64 = String::new();
    for line in lines {
        if line.starts_with("-----END") {
            use base64ct::Encoding;
            return base64ct::Base64::decode_vec(&b64).map_err(|e| Error::BadEncoding {
                problem: e.to_string(),
                pos: Pos::at_line(after_line),
            });
        }
        b64.push_str(line);
    }
    Err(Error::MissingToken {
        keyword: "-----END",
        pos: Pos::at_line(after_line),
    })
}

/// Parse a `YYYY-MM-DD HH:MM:SS`-style timestamp line's first two
/// arguments as an RFC-3339-ish instant.
pub(crate) fn parse_timestamp(item: &Item<'_>, keyword: &'static str) -> Result<SystemTime> {
    let joined = item.args.join(" ");
    let date = item.args.first().copied().unwrap_or_default();
    let time = item.args.get(1).copied().unwrap_or_default();
    humantime::parse_rfc3339_weak(&format!("{date}T{time}Z"))
        .map_err(|e| Error::BadArgument {
            keyword,
            problem: format!("{e} (from {joined:?})"),
            pos: item.pos,
        })
}
