//! Hand-rolled lexer for the console script language.

use std::fmt;

use num_bigint::BigInt;

/// A lexing or parsing failure, with the 1-based source line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    BigInt(BigInt),
    Str(String),
    Ident(String),
    // Keywords
    Let,
    If,
    Else,
    While,
    Throw,
    Await,
    True,
    False,
    Null,
    Undefined,
    // Punctuation and operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Assign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    Dot,
}

/// A token with the line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

/// Tokenize the whole input.
pub fn lex(source: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1usize;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    // Line comment.
                    while let Some(&c) = chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        chars.next();
                    }
                } else {
                    tokens.push(Spanned { token: Token::Slash, line });
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        None => return Err(ParseError::new("unterminated string", line)),
                        Some(c) if c == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('r') => s.push('\r'),
                            Some('\\') => s.push('\\'),
                            Some(c) if c == quote => s.push(c),
                            Some(c) => {
                                return Err(ParseError::new(
                                    format!("unknown escape '\\{}'", c),
                                    line,
                                ))
                            }
                            None => return Err(ParseError::new("unterminated string", line)),
                        },
                        Some('\n') => return Err(ParseError::new("unterminated string", line)),
                        Some(c) => s.push(c),
                    }
                }
                tokens.push(Spanned { token: Token::Str(s), line });
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.peek() == Some(&'n') {
                    chars.next();
                    let big = text
                        .parse::<BigInt>()
                        .map_err(|_| ParseError::new(format!("invalid bigint '{}n'", text), line))?;
                    tokens.push(Spanned { token: Token::BigInt(big), line });
                } else {
                    let n = text
                        .parse::<f64>()
                        .map_err(|_| ParseError::new(format!("invalid number '{}'", text), line))?;
                    tokens.push(Spanned { token: Token::Number(n), line });
                }
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match word.as_str() {
                    "let" => Token::Let,
                    "if" => Token::If,
                    "else" => Token::Else,
                    "while" => Token::While,
                    "throw" => Token::Throw,
                    "await" => Token::Await,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "undefined" => Token::Undefined,
                    _ => Token::Ident(word),
                };
                tokens.push(Spanned { token, line });
            }
            _ => {
                chars.next();
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => {
                        if chars.peek() == Some(&'*') {
                            chars.next();
                            Token::StarStar
                        } else {
                            Token::Star
                        }
                    }
                    '%' => Token::Percent,
                    '=' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::EqEq
                        } else {
                            Token::Assign
                        }
                    }
                    '!' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::NotEq
                        } else {
                            Token::Bang
                        }
                    }
                    '<' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::LtEq
                        } else {
                            Token::Lt
                        }
                    }
                    '>' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::GtEq
                        } else {
                            Token::Gt
                        }
                    }
                    '&' => {
                        if chars.peek() == Some(&'&') {
                            chars.next();
                            Token::AndAnd
                        } else {
                            return Err(ParseError::new("expected '&&'", line));
                        }
                    }
                    '|' => {
                        if chars.peek() == Some(&'|') {
                            chars.next();
                            Token::OrOr
                        } else {
                            return Err(ParseError::new("expected '||'", line));
                        }
                    }
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    ',' => Token::Comma,
                    ';' => Token::Semi,
                    ':' => Token::Colon,
                    '.' => Token::Dot,
                    other => {
                        return Err(ParseError::new(
                            format!("unexpected character '{}'", other),
                            line,
                        ))
                    }
                };
                tokens.push(Spanned { token, line });
            }
        }
    }

    Ok(tokens)
}
