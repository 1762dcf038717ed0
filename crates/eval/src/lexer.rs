use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifiers and keywords, distinguished in the parser
    Word(String),
    /// Quoted string literal (content without quotes, escapes resolved)
    Str(String),
    /// Integer literal
    Int(i64),
    /// Decimal literal, kept as text so the parser can build an exact Decimal
    Float(String),
    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    // Comparison operators
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    // Arithmetic operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    // End of input
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    /// Byte offset of the first character of the token.
    pub offset: usize,
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, EvalError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut pos = 0usize;

    let at = |i: usize| chars.get(i).map(|&(_, c)| c);
    let offset_of = |i: usize| chars.get(i).map_or(src.len(), |&(o, _)| o);

    while pos < chars.len() {
        let (offset, c) = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        // String literal
        if c == '"' || c == '\'' {
            let quote = c;
            pos += 1;
            let mut s = String::new();
            loop {
                let Some(sc) = at(pos) else {
                    return Err(EvalError::syntax(offset, "unterminated string literal"));
                };
                if sc == quote {
                    pos += 1;
                    break;
                }
                if sc == '\\' {
                    pos += 1;
                    let Some(esc) = at(pos) else {
                        return Err(EvalError::syntax(offset, "unterminated escape in string"));
                    };
                    match esc {
                        '\\' => s.push('\\'),
                        '\'' => s.push('\''),
                        '"' => s.push('"'),
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        'r' => s.push('\r'),
                        '0' => s.push('\0'),
                        other => {
                            s.push('\\');
                            s.push(other);
                        }
                    }
                    pos += 1;
                    continue;
                }
                if sc == '\n' {
                    return Err(EvalError::syntax(offset, "unterminated string literal"));
                }
                s.push(sc);
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Str(s),
                offset,
            });
            continue;
        }

        // Number: 12, 1.5, .5, 1e3, 2.5E-2
        let starts_number =
            c.is_ascii_digit() || (c == '.' && at(pos + 1).is_some_and(|n| n.is_ascii_digit()));
        if starts_number {
            let start = pos;
            let mut is_float = false;
            while at(pos).is_some_and(|d| d.is_ascii_digit() || d == '_') {
                pos += 1;
            }
            if at(pos) == Some('.') && at(pos + 1).map_or(true, |d| !d.is_alphabetic() && d != '_')
            {
                is_float = true;
                pos += 1;
                while at(pos).is_some_and(|d| d.is_ascii_digit() || d == '_') {
                    pos += 1;
                }
            }
            if matches!(at(pos), Some('e') | Some('E')) {
                let mut look = pos + 1;
                if matches!(at(look), Some('+') | Some('-')) {
                    look += 1;
                }
                if at(look).is_some_and(|d| d.is_ascii_digit()) {
                    is_float = true;
                    pos = look;
                    while at(pos).is_some_and(|d| d.is_ascii_digit()) {
                        pos += 1;
                    }
                }
            }
            let text: String = src[offset..offset_of(pos)]
                .chars()
                .filter(|&ch| ch != '_')
                .collect();
            if at(pos).is_some_and(|d| d.is_alphabetic() || d == '_') {
                return Err(EvalError::syntax(
                    offset_of(start),
                    format!("invalid number literal '{}'", &src[offset..offset_of(pos + 1)]),
                ));
            }
            let token = if is_float {
                Token::Float(text)
            } else {
                Token::Int(text.parse::<i64>().map_err(|_| {
                    EvalError::syntax(offset, format!("integer literal '{}' is out of range", text))
                })?)
            };
            tokens.push(Spanned { token, offset });
            continue;
        }

        // Identifier / keyword
        if c.is_alphabetic() || c == '_' {
            let start = offset;
            while at(pos).is_some_and(|d| d.is_alphanumeric() || d == '_') {
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Word(src[start..offset_of(pos)].to_owned()),
                offset: start,
            });
            continue;
        }

        // Operators and punctuation
        let next = at(pos + 1);
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Neq, 2),
            ('<', Some('=')) => (Token::Lte, 2),
            ('>', Some('=')) => (Token::Gte, 2),
            ('*', Some('*')) | ('/', Some('/')) => {
                return Err(EvalError::syntax(
                    offset,
                    format!("unsupported operator '{}{}'", c, c),
                ));
            }
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            ('.', _) => (Token::Dot, 1),
            ('=', _) => {
                return Err(EvalError::syntax(offset, "assignment is not allowed"));
            }
            (other, _) => {
                return Err(EvalError::syntax(
                    offset,
                    format!("unexpected character '{}'", other),
                ));
            }
        };
        tokens.push(Spanned { token, offset });
        pos += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: src.len(),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lexes_comparison_with_attribute() {
        assert_eq!(
            kinds("item.total_value >= 10.50"),
            vec![
                Token::Word("item".into()),
                Token::Dot,
                Token::Word("total_value".into()),
                Token::Gte,
                Token::Float("10.50".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn lexes_both_quote_styles_and_escapes() {
        assert_eq!(
            kinds(r#"'61' "a\"b" 'x\qy'"#),
            vec![
                Token::Str("61".into()),
                Token::Str("a\"b".into()),
                Token::Str("x\\qy".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_offsets() {
        let toks = lex("a + .5 * 1e2 - 1_000").unwrap();
        assert_eq!(toks[2].token, Token::Float(".5".into()));
        assert_eq!(toks[2].offset, 4);
        assert_eq!(toks[4].token, Token::Float("1e2".into()));
        assert_eq!(toks[6].token, Token::Int(1000));
        assert_eq!(toks.last().map(|t| t.offset), Some(20));
    }

    #[test]
    fn rejects_unsupported_operators() {
        assert!(matches!(lex("2 ** 3"), Err(EvalError::Syntax { offset: 2, .. })));
        assert!(matches!(lex("7 // 2"), Err(EvalError::Syntax { .. })));
        assert!(matches!(lex("x = 1"), Err(EvalError::Syntax { .. })));
        assert!(matches!(lex("a & b"), Err(EvalError::Syntax { .. })));
        assert!(matches!(lex("'open"), Err(EvalError::Syntax { offset: 0, .. })));
    }

    #[test]
    fn integer_overflow_is_syntax_error() {
        assert!(matches!(
            lex("99999999999999999999"),
            Err(EvalError::Syntax { .. })
        ));
    }
}
