//! Placeholder source reconstruction.

/// The zero-width space filling a placeholder.
const FILL: char = '\u{200b}';

/// Builds a source string whose engine-observed length is `length`.
///
/// For `length > 1` the placeholder is a string literal: a double quote,
/// `length - 2` zero-width spaces, and a closing double quote. Each of those
/// characters is one UTF-16 unit. Lengths 0 and 1 yield the empty string,
/// so a blob compiled from a one-unit source never validates.
pub fn build_placeholder_source(length: u32) -> String {
    if length <= 1 {
        return String::new();
    }
    let fill = (length - 2) as usize;
    let mut out = String::with_capacity(2 + fill * FILL.len_utf8());
    out.push('"');
    out.extend(std::iter::repeat(FILL).take(fill));
    out.push('"');
    out
}
