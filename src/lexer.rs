//! Tokenizer and canonicalizer for CQL scripts.
//!
//! Lexing rules (tried in this order at every position; the first match
//! wins):
//!
//! 1. `string` — `'…'` or `"…"`, doubled delimiter is an escape.
//! 2. `comment` — `/* … */` (non-greedy, multi-line), `//…` or `--…` to
//!    end of line (two or more leading slashes/dashes).
//! 3. `uuid` — `8-4-4-4-12` hex.
//! 4. `whitespace` — one or more whitespace characters.
//! 5. `symbol` — a single non-word character (tried after whitespace, or
//!    it would swallow it).
//! 6. `identifier-or-value` — `[A-Za-z0-9_]+`.
//!
//! Case is preserved throughout; no normalization of any kind is applied
//! to token content.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    String,
    Comment,
    Uuid,
    Whitespace,
    Symbol,
    Ident,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

/// Lexes `input` into a sequence of tokens, or returns the byte offset at
/// which no token class matched.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, usize> {
    let bytes = input.as_bytes();
    let mut pos = 0usize;
    let mut tokens = Vec::new();

    while pos < bytes.len() {
        if let Some(len) = match_string(bytes, pos) {
            tokens.push(Token { kind: TokenKind::String, text: &input[pos..pos + len] });
            pos += len;
        } else if let Some(len) = match_comment(bytes, pos) {
            tokens.push(Token { kind: TokenKind::Comment, text: &input[pos..pos + len] });
            pos += len;
        } else if let Some(len) = match_uuid(bytes, pos) {
            tokens.push(Token { kind: TokenKind::Uuid, text: &input[pos..pos + len] });
            pos += len;
        } else if let Some(len) = match_whitespace(bytes, pos) {
            tokens.push(Token { kind: TokenKind::Whitespace, text: &input[pos..pos + len] });
            pos += len;
        } else if let Some(len) = match_symbol(input, bytes, pos) {
            tokens.push(Token { kind: TokenKind::Symbol, text: &input[pos..pos + len] });
            pos += len;
        } else if let Some(len) = match_ident(bytes, pos) {
            tokens.push(Token { kind: TokenKind::Ident, text: &input[pos..pos + len] });
            pos += len;
        } else {
            return Err(pos);
        }
    }

    Ok(tokens)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn match_string(bytes: &[u8], pos: usize) -> Option<usize> {
    let quote = *bytes.get(pos)?;
    if quote != b'\'' && quote != b'"' {
        return None;
    }
    let mut i = pos + 1;
    loop {
        if i >= bytes.len() {
            // Unterminated string: consume to end rather than failing the
            // whole lex, matching the "any other character is literal
            // content" rule for everything inside the opened quote.
            return Some(bytes.len() - pos);
        }
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1 - pos);
        }
        i += 1;
    }
}

fn match_comment(bytes: &[u8], pos: usize) -> Option<usize> {
    if bytes[pos..].starts_with(b"/*") {
        let rest = &bytes[pos + 2..];
        return rest
            .windows(2)
            .position(|w| w == b"*/")
            .map(|i| i + 2 + 2)
            .or(Some(bytes.len() - pos));
    }
    if bytes[pos..].starts_with(b"//") || bytes[pos..].starts_with(b"--") {
        let end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i)
            .unwrap_or(bytes.len());
        return Some(end - pos);
    }
    None
}

fn match_uuid(bytes: &[u8], pos: usize) -> Option<usize> {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];
    let mut i = pos;
    for (idx, &len) in GROUPS.iter().enumerate() {
        if i + len > bytes.len() {
            return None;
        }
        if !bytes[i..i + len].iter().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        i += len;
        if idx != GROUPS.len() - 1 {
            if bytes.get(i) != Some(&b'-') {
                return None;
            }
            i += 1;
        }
    }
    Some(i - pos)
}

fn match_whitespace(bytes: &[u8], pos: usize) -> Option<usize> {
    let mut i = pos;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i > pos {
        Some(i - pos)
    } else {
        None
    }
}

/// A single non-word character, one full `char` wide. Must slice on a
/// UTF-8 char boundary rather than a raw byte — a multi-byte character
/// (e.g. a pasted smart quote or em dash) reaching this branch would
/// otherwise panic on a mid-character byte index.
fn match_symbol(input: &str, bytes: &[u8], pos: usize) -> Option<usize> {
    let b = bytes[pos];
    if is_word_byte(b) || b.is_ascii_whitespace() {
        return None;
    }
    input[pos..].chars().next().map(|c| c.len_utf8())
}

fn match_ident(bytes: &[u8], pos: usize) -> Option<usize> {
    let mut i = pos;
    while i < bytes.len() && is_word_byte(bytes[i]) {
        i += 1;
    }
    if i > pos {
        Some(i - pos)
    } else {
        None
    }
}

/// Joins the non-comment, non-whitespace tokens of `cql` with a single
/// ASCII space, preserving case and literal string contents exactly.
pub fn canonicalize(cql: &str) -> Result<String, usize> {
    let tokens = tokenize(cql)?;
    let parts: Vec<&str> = tokens
        .iter()
        .filter(|t| !matches!(t.kind, TokenKind::Comment | TokenKind::Whitespace))
        .map(|t| t.text)
        .collect();
    Ok(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_block_and_line_comments() {
        let input = "/* c */\nCREATE TABLE foo.bar (\n  baz text, -- x\n  PRIMARY KEY ((baz))\n);";
        let out = canonicalize(input).unwrap();
        assert_eq!(
            out,
            "CREATE TABLE foo . bar ( baz text , PRIMARY KEY ( ( baz ) ) ) ;"
        );
    }

    #[test]
    fn preserves_doubled_quote_escapes() {
        let input = "INSERT INTO foo.bar (baz) VALUES ('foo''s');";
        let out = canonicalize(input).unwrap();
        assert_eq!(
            out,
            "INSERT INTO foo . bar ( baz ) VALUES ( 'foo''s' ) ;"
        );
    }

    #[test]
    fn whitespace_only_differences_canonicalize_equal() {
        let a = canonicalize("CREATE TABLE t (a int);").unwrap();
        let b = canonicalize("CREATE   TABLE\n t (a   int);  -- trailing\n").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn string_literal_content_is_preserved_verbatim() {
        let input = "SELECT * FROM t WHERE x = '-- not a comment /* also not */';";
        let out = canonicalize(input).unwrap();
        assert!(out.contains("'-- not a comment /* also not */'"));
    }

    #[test]
    fn double_slash_requires_two_or_more() {
        let input = "a / b // comment\nc";
        let tokens = tokenize(input).unwrap();
        let texts: Vec<_> = tokens.iter().map(|t| t.text).collect();
        assert!(texts.contains(&"/"));
    }

    #[test]
    fn uuid_literal_is_a_single_token() {
        let input = "SELECT * FROM t WHERE id = 123e4567-e89b-12d3-a456-426614174000;";
        let tokens = tokenize(input).unwrap();
        assert!(tokens
            .iter()
            .any(|t| t.kind == TokenKind::Uuid && t.text == "123e4567-e89b-12d3-a456-426614174000"));
    }

    /// A multi-byte character outside any string/comment/UUID falls to the
    /// symbol class and must be sliced on its own char boundary, not a raw
    /// byte — this used to panic on a mid-character index.
    #[test]
    fn multibyte_symbol_does_not_panic_on_char_boundary() {
        let input = "SELECT * FROM t WHERE name = foo\u{2019}bar\u{2014}baz;";
        let tokens = tokenize(input).unwrap();
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Symbol && t.text == "\u{2019}"));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Symbol && t.text == "\u{2014}"));
    }

    #[test]
    fn canonicalize_preserves_non_breaking_space_as_a_symbol() {
        let input = "SELECT\u{00a0}1;";
        let out = canonicalize(input).unwrap();
        assert_eq!(out, "SELECT \u{a0} 1 ;");
    }
}
