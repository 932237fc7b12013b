use std::fmt::{Display, Formatter};

use anyhow::{bail, Result};

use crate::error::CompileError;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Int(i64),
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Dot,
    Fetch,
    Store,
    Colon,
    SemiColon,
    OpenBracket,
    CloseBracket,
    Ident(String),
    Kwd(Keyword),
}

/// A token with its position. `line` and `col` are 1-based, `start`/`end`
/// are byte offsets into the source.
#[derive(Debug, PartialEq, Clone)]
pub struct TokenSpan {
    pub token: Token,
    pub line: usize,
    pub col: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Keyword {
    If,
    Else,
    Then,
    Do,
    Loop,
}

impl Display for Keyword {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Keyword::If => write!(f, "IF"),
            Keyword::Else => write!(f, "ELSE"),
            Keyword::Then => write!(f, "THEN"),
            Keyword::Do => write!(f, "DO"),
            Keyword::Loop => write!(f, "LOOP"),
        }
    }
}

// keywords are matched against the whole identifier, never a prefix of it
fn keyword_lookup(name: String) -> Token {
    match name.as_str() {
        "IF" => Token::Kwd(Keyword::If),
        "ELSE" => Token::Kwd(Keyword::Else),
        "THEN" => Token::Kwd(Keyword::Then),
        "DO" => Token::Kwd(Keyword::Do),
        "LOOP" => Token::Kwd(Keyword::Loop),
        _ => Token::Ident(name),
    }
}

/// Lazy token source over a source buffer.
///
/// `next_token` keeps returning [`Token::Eof`] once the input is exhausted.
/// The lexer can only be restarted from the beginning with [`Lexer::rewind`].
pub struct Lexer<'a> {
    input: &'a [u8],
    index: usize,
    line: usize,
    line_start: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            index: 0,
            line: 1,
            line_start: 0,
            finished: false,
        }
    }

    pub fn rewind(&mut self) {
        self.index = 0;
        self.line = 1;
        self.line_start = 0;
        self.finished = false;
    }

    fn col(&self, index: usize) -> usize {
        index - self.line_start + 1
    }

    fn lexical_error(&self, message: String, index: usize) -> CompileError {
        CompileError::Lexical {
            message,
            line: self.line,
            col: self.col(index),
        }
    }

    pub fn next_token(&mut self) -> Result<TokenSpan> {
        self.skip_trivia()?;

        macro_rules! cur {
            () => {
                self.input.get(self.index)
            };
        }
        macro_rules! single {
            ($token: expr) => {{
                self.index += 1;
                $token
            }};
        }

        let start = self.index;
        let token = match cur!() {
            None => Token::Eof,
            Some(b':') => single!(Token::Colon),
            Some(b';') => single!(Token::SemiColon),
            Some(b'[') => single!(Token::OpenBracket),
            Some(b']') => single!(Token::CloseBracket),
            Some(b'+') => single!(Token::Add),
            Some(b'-') => single!(Token::Sub),
            Some(b'*') => single!(Token::Mul),
            Some(b'/') => single!(Token::Div),
            Some(b'%') => single!(Token::Mod),
            Some(b'.') => single!(Token::Dot),
            Some(b'@') => single!(Token::Fetch),
            Some(b'!') => single!(Token::Store),
            Some(b'0'..=b'9') => {
                while let Some(b'0'..=b'9') = cur!() {
                    self.index += 1;
                }
                let text = String::from_utf8_lossy(&self.input[start..self.index]);
                match text.parse::<i64>() {
                    Ok(value) => Token::Int(value),
                    Err(_) => bail!(self.lexical_error(
                        format!("Integer literal {text} is out of range"),
                        start
                    )),
                }
            }
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'_') => {
                while let Some(b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'0'..=b'9') = cur!() {
                    self.index += 1;
                }
                let name = String::from_utf8_lossy(&self.input[start..self.index]).into_owned();
                keyword_lookup(name)
            }
            Some(_) => {
                let unknown = String::from_utf8_lossy(&self.input[start..])
                    .chars()
                    .next()
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                bail!(self.lexical_error(format!("Unknown token found: {unknown}"), start))
            }
        };

        Ok(TokenSpan {
            token,
            line: self.line,
            col: self.col(start),
            start,
            end: self.index,
        })
    }

    /// Skips whitespace, `\ line comments` and `( block comments )`.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            let next_is_blank = matches!(
                self.input.get(self.index + 1),
                None | Some(b' ' | b'\t' | b'\r' | b'\n')
            );
            match self.input.get(self.index) {
                Some(b' ' | b'\t' | b'\r') => self.index += 1,
                Some(b'\n') => {
                    self.index += 1;
                    self.line += 1;
                    self.line_start = self.index;
                }
                Some(b'\\') if next_is_blank => {
                    while !matches!(self.input.get(self.index), None | Some(b'\n')) {
                        self.index += 1;
                    }
                }
                Some(b'(') if next_is_blank => {
                    let (open_line, open_index) = (self.line, self.index);
                    let open_col = self.col(open_index);
                    loop {
                        self.index += 1;
                        match self.input.get(self.index) {
                            Some(b')') => {
                                self.index += 1;
                                break;
                            }
                            Some(b'\n') => {
                                self.line += 1;
                                self.line_start = self.index + 1;
                            }
                            Some(_) => {}
                            None => bail!(CompileError::Lexical {
                                message: "Unterminated comment".to_string(),
                                line: open_line,
                                col: open_col,
                            }),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<TokenSpan>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_token();
        if matches!(
            result,
            Ok(TokenSpan {
                token: Token::Eof,
                ..
            }) | Err(_)
        ) {
            self.finished = true;
        }
        Some(result)
    }
}

pub fn tokenize(input: &[u8]) -> Result<Vec<TokenSpan>> {
    Lexer::new(input).collect()
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Token::Eof => write!(f, "end of file"),
            Token::Int(i) => write!(f, "{}", i),
            Token::Add => write!(f, "+"),
            Token::Sub => write!(f, "-"),
            Token::Mul => write!(f, "*"),
            Token::Div => write!(f, "/"),
            Token::Mod => write!(f, "%"),
            Token::Dot => write!(f, "."),
            Token::Fetch => write!(f, "@"),
            Token::Store => write!(f, "!"),
            Token::Colon => write!(f, ":"),
            Token::SemiColon => write!(f, ";"),
            Token::OpenBracket => write!(f, "["),
            Token::CloseBracket => write!(f, "]"),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Kwd(k) => write!(f, "{}", k),
        }
    }
}
