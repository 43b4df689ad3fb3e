use num_bigint::BigInt;
use rust_decimal::Decimal;

use dvm_types::error::VmError;

/// One lexical token of contract script, tagged with its source line for
/// error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(BigInt),
    Dec(Decimal),
    Str(String),

    // keywords
    Contract,
    Export,
    Private,
    Fn,
    Let,
    If,
    Else,
    While,
    For,
    In,
    Return,
    Assert,
    Fail,
    True,
    False,
    And,
    Or,
    Not,
    SelfKw,

    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semi,
    Dot,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusAssign,
    MinusAssign,

    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier `{name}`"),
            Self::Int(_) => "integer literal".to_string(),
            Self::Dec(_) => "decimal literal".to_string(),
            Self::Str(_) => "string literal".to_string(),
            Self::Eof => "end of source".to_string(),
            other => format!("`{}`", other.lexeme()),
        }
    }

    fn lexeme(&self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::Export => "export",
            Self::Private => "private",
            Self::Fn => "fn",
            Self::Let => "let",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::For => "for",
            Self::In => "in",
            Self::Return => "return",
            Self::Assert => "assert",
            Self::Fail => "fail",
            Self::True => "true",
            Self::False => "false",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::SelfKw => "self",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::Semi => ";",
            Self::Dot => ".",
            Self::Assign => "=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            _ => "?",
        }
    }
}

fn keyword(ident: &str) -> Option<TokenKind> {
    Some(match ident {
        "contract" => TokenKind::Contract,
        "export" => TokenKind::Export,
        "private" => TokenKind::Private,
        "fn" => TokenKind::Fn,
        "let" => TokenKind::Let,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "return" => TokenKind::Return,
        "assert" => TokenKind::Assert,
        "fail" => TokenKind::Fail,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "self" => TokenKind::SelfKw,
        _ => return None,
    })
}

/// Tokenizes `source`. Comments run from `#` to end of line; whitespace is
/// insignificant beyond separating tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, VmError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    macro_rules! push {
        ($kind:expr) => {
            tokens.push(Token { kind: $kind, line })
        };
    }

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('"') => s.push('"'),
                            Some('\\') => s.push('\\'),
                            other => {
                                return Err(compile_err(
                                    line,
                                    format!("unknown escape {other:?} in string literal"),
                                ))
                            }
                        },
                        Some('\n') | None => {
                            return Err(compile_err(line, "unterminated string literal"))
                        }
                        Some(c) => s.push(c),
                    }
                }
                push!(TokenKind::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                let mut is_decimal = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        chars.next();
                    } else if c == '.' && !is_decimal {
                        // A digit must follow; `1.x` is not a number.
                        let mut ahead = chars.clone();
                        ahead.next();
                        if ahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                            is_decimal = true;
                            digits.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                if is_decimal {
                    let dec = digits
                        .parse::<Decimal>()
                        .map_err(|e| compile_err(line, format!("bad decimal literal: {e}")))?;
                    push!(TokenKind::Dec(dec));
                } else {
                    let int = digits
                        .parse::<BigInt>()
                        .map_err(|e| compile_err(line, format!("bad integer literal: {e}")))?;
                    push!(TokenKind::Int(int));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match keyword(&ident) {
                    Some(kw) => push!(kw),
                    None => push!(TokenKind::Ident(ident)),
                }
            }
            _ => {
                chars.next();
                let kind = match c {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    ',' => TokenKind::Comma,
                    ':' => TokenKind::Colon,
                    ';' => TokenKind::Semi,
                    '.' => TokenKind::Dot,
                    '+' if chars.peek() == Some(&'=') => {
                        chars.next();
                        TokenKind::PlusAssign
                    }
                    '+' => TokenKind::Plus,
                    '-' if chars.peek() == Some(&'=') => {
                        chars.next();
                        TokenKind::MinusAssign
                    }
                    '-' => TokenKind::Minus,
                    '*' => TokenKind::Star,
                    '/' => TokenKind::Slash,
                    '%' => TokenKind::Percent,
                    '=' if chars.peek() == Some(&'=') => {
                        chars.next();
                        TokenKind::Eq
                    }
                    '=' => TokenKind::Assign,
                    '!' if chars.peek() == Some(&'=') => {
                        chars.next();
                        TokenKind::Ne
                    }
                    '<' if chars.peek() == Some(&'=') => {
                        chars.next();
                        TokenKind::Le
                    }
                    '<' => TokenKind::Lt,
                    '>' if chars.peek() == Some(&'=') => {
                        chars.next();
                        TokenKind::Ge
                    }
                    '>' => TokenKind::Gt,
                    other => {
                        return Err(compile_err(line, format!("unexpected character {other:?}")))
                    }
                };
                push!(kind);
            }
        }
    }
    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
    });
    Ok(tokens)
}

pub(crate) fn compile_err(line: usize, msg: impl std::fmt::Display) -> VmError {
    VmError::Compile(format!("line {line}: {msg}"))
}
