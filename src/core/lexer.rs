/// Expression tokenizer — turns expression text into a flat token list.

use crate::core::parser::ParseError;

/// Lexical category of a token. Keyword and symbol spellings that mean the
/// same thing (`and`/`&&`, `=`/`==`, `not`/`!`) share a kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Or,
    And,
    Not,
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Bool(bool),
    Number(f64),
    Str(String),
    Ident(String),
}

/// A token with its source spelling and character offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: usize,
}

/// Split `input` into tokens, skipping whitespace.
///
/// Recognized forms, tried in order at each position:
/// - two-character operators: `>=` `<=` `==` `!=` `&&` `||`
/// - single-character operators and punctuation: `=` `>` `<` `(` `)` `,` `+` `-` `/` `*` `!`
/// - words: `and` `or` `not`, `true`/`false` (any case), otherwise identifiers
/// - integer or decimal numbers not followed by identifier characters
/// - single- or double-quoted strings, taken verbatim
///
/// A leading `-` is always an operator; negative literals come out of the
/// parser as a negated number.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        let next = chars.get(i + 1).copied();

        let two_char = match (c, next) {
            ('>', Some('=')) => Some(TokenKind::Gte),
            ('<', Some('=')) => Some(TokenKind::Lte),
            ('=', Some('=')) => Some(TokenKind::Eq),
            ('!', Some('=')) => Some(TokenKind::NotEq),
            ('&', Some('&')) => Some(TokenKind::And),
            ('|', Some('|')) => Some(TokenKind::Or),
            _ => None,
        };
        if let Some(kind) = two_char {
            i += 2;
            tokens.push(make_token(kind, &chars, start, i));
            continue;
        }

        let single = match c {
            '=' => Some(TokenKind::Eq),
            '>' => Some(TokenKind::Gt),
            '<' => Some(TokenKind::Lt),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            ',' => Some(TokenKind::Comma),
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '/' => Some(TokenKind::Slash),
            '*' => Some(TokenKind::Star),
            '!' => Some(TokenKind::Not),
            _ => None,
        };
        if let Some(kind) = single {
            i += 1;
            tokens.push(make_token(kind, &chars, start, i));
            continue;
        }

        if is_ident_start(c) {
            while i < len && is_ident_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let kind = match word.as_str() {
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                "not" => TokenKind::Not,
                w if w.eq_ignore_ascii_case("true") => TokenKind::Bool(true),
                w if w.eq_ignore_ascii_case("false") => TokenKind::Bool(false),
                _ => TokenKind::Ident(word.clone()),
            };
            tokens.push(Token {
                kind,
                text: word,
                position: start,
            });
            continue;
        }

        if c.is_ascii_digit() {
            while i < len && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < len && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                i += 1;
                while i < len && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            // `5abc` is neither a number nor an identifier.
            if i < len && is_ident_start(chars[i]) {
                return Err(unrecognized(&chars, start));
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse().map_err(|_| unrecognized(&chars, start))?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                text,
                position: start,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let close = chars[i + 1..]
                .iter()
                .position(|&ch| ch == c)
                .ok_or_else(|| unrecognized(&chars, start))?;
            let end = i + 1 + close;
            let content: String = chars[i + 1..end].iter().collect();
            i = end + 1;
            tokens.push(Token {
                kind: TokenKind::Str(content),
                text: chars[start..i].iter().collect(),
                position: start,
            });
            continue;
        }

        return Err(unrecognized(&chars, start));
    }

    Ok(tokens)
}

fn make_token(kind: TokenKind, chars: &[char], start: usize, end: usize) -> Token {
    Token {
        kind,
        text: chars[start..end].iter().collect(),
        position: start,
    }
}

fn unrecognized(chars: &[char], position: usize) -> ParseError {
    ParseError::UnrecognizedToken {
        position,
        remainder: chars[position..].iter().collect(),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
