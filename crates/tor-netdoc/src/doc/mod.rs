//! Top-level document types.

pub mod authcert;
pub mod microdesc;
pub mod netstatus;

/// Whether a parser should accept `@`-prefixed annotation lines before
/// a document.
///
/// Cache files written by the directory cache itself may be preceded
/// by annotations like `@downloaded-at <time>` recording when and from
/// whom a document was fetched; documents received fresh over the
/// network never carry them, and a parser that accepted them there
/// would let a remote party forge cache metadata.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AllowAnnotations {
    /// Accept and parse leading annotation lines.
    AnnotationsAllowed,
    /// Reject any input that starts with an annotation line.
    AnnotationsNotAllowed,
}

/// Split `text` into its leading `@`-annotation lines (if any) and the
/// remainder, honoring `allow`.
pub(crate) fn split_annotations(
    text: &str,
    allow: AllowAnnotations,
) -> crate::err::Result<(Vec<&str>, &str)> {
    let mut annotations = Vec::new();
    let mut rest = text;
    loop {
        let line_end = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
        let line = &rest[..line_end];
        if line.trim_end().starts_with('@') {
            if allow == AllowAnnotations::AnnotationsNotAllowed {
                return Err(crate::err::Error::BadArgument {
                    keyword: "@",
                    problem: "annotations not allowed here".into(),
                    pos: crate::err::Pos::none(),
                });
            }
            annotations.push(line.trim_end());
            rest = &rest[line_end..];
        } else {
            break;
        }
    }
    Ok((annotations, rest))
}
