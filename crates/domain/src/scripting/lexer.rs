//! Tokenizer for the script language
//!
//! Newlines end statements except inside brackets. `--` and `#` start
//! comments that run to the end of the line.

use super::error::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Number(f64),
    Str(String),
    Name(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Assign,
    /// Augmented assignment; carries the arithmetic operator token
    AugAssign(Box<Tok>),
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Newline,
    Eof,
}

impl Tok {
    pub(crate) fn describe(&self) -> String {
        match self {
            Tok::Number(n) => format!("number {n}"),
            Tok::Str(_) => "string".to_string(),
            Tok::Name(name) => format!("'{name}'"),
            Tok::Newline => "end of line".to_string(),
            Tok::Eof => "end of script".to_string(),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub tok: Tok,
    pub line: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ScriptError> {
    Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        out: Vec::new(),
    }
    .run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    /// Bracket nesting; newlines inside brackets are insignificant
    depth: usize,
    out: Vec<Spanned>,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.out.push(Spanned {
            tok,
            line: self.line,
        });
    }

    fn run(mut self) -> Result<Vec<Spanned>, ScriptError> {
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                    }
                    self.line += 1;
                    self.pos += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '#' => self.skip_comment(),
                '-' if self.peek_at(1) == Some('-') => self.skip_comment(),
                '"' | '\'' => self.string(c)?,
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.name(),
                _ => self.operator(c)?,
            }
        }
        self.push(Tok::Newline);
        self.push(Tok::Eof);
        Ok(self.out)
    }

    fn skip_comment(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
    }

    fn string(&mut self, quote: char) -> Result<(), ScriptError> {
        let start_line = self.line;
        self.pos += 1;
        let mut text = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ScriptError::syntax(start_line, "unterminated string"));
            };
            self.pos += 1;
            match c {
                c if c == quote => break,
                '\n' => return Err(ScriptError::syntax(start_line, "unterminated string")),
                '\\' => {
                    let escaped = self
                        .peek()
                        .ok_or_else(|| ScriptError::syntax(start_line, "unterminated string"))?;
                    self.pos += 1;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                other => text.push(other),
            }
        }
        self.push(Tok::Str(text));
        Ok(())
    }

    fn number(&mut self) -> Result<(), ScriptError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if self.peek().is_some_and(|c| c == 'e' || c == 'E') {
            self.pos += 1;
            if self.peek().is_some_and(|c| c == '+' || c == '-') {
                self.pos += 1;
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            return Err(ScriptError::syntax(self.line, format!("invalid number '{text}'")));
        }
        let value = text
            .parse::<f64>()
            .map_err(|_| ScriptError::syntax(self.line, format!("invalid number '{text}'")))?;
        self.push(Tok::Number(value));
        Ok(())
    }

    fn name(&mut self) {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        self.push(Tok::Name(text));
    }

    fn operator(&mut self, c: char) -> Result<(), ScriptError> {
        let next = self.peek_at(1);
        let third = self.peek_at(2);
        let (tok, width) = match (c, next) {
            ('*', Some('*')) => (Tok::DoubleStar, 2),
            ('/', Some('/')) if third == Some('=') => (Tok::AugAssign(Box::new(Tok::DoubleSlash)), 3),
            ('/', Some('/')) => (Tok::DoubleSlash, 2),
            ('+', Some('=')) => (Tok::AugAssign(Box::new(Tok::Plus)), 2),
            ('-', Some('=')) => (Tok::AugAssign(Box::new(Tok::Minus)), 2),
            ('*', Some('=')) => (Tok::AugAssign(Box::new(Tok::Star)), 2),
            ('/', Some('=')) => (Tok::AugAssign(Box::new(Tok::Slash)), 2),
            ('%', Some('=')) => (Tok::AugAssign(Box::new(Tok::Percent)), 2),
            ('=', Some('=')) => (Tok::EqEq, 2),
            ('!', Some('=')) | ('~', Some('=')) => (Tok::NotEq, 2),
            ('<', Some('=')) => (Tok::Le, 2),
            ('>', Some('=')) => (Tok::Ge, 2),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            ('[', _) => (Tok::LBracket, 1),
            (']', _) => (Tok::RBracket, 1),
            ('{', _) => (Tok::LBrace, 1),
            ('}', _) => (Tok::RBrace, 1),
            (',', _) => (Tok::Comma, 1),
            (':', _) => (Tok::Colon, 1),
            (';', _) => (Tok::Semicolon, 1),
            ('.', _) => (Tok::Dot, 1),
            ('+', _) => (Tok::Plus, 1),
            ('-', _) => (Tok::Minus, 1),
            ('*', _) => (Tok::Star, 1),
            ('/', _) => (Tok::Slash, 1),
            ('%', _) => (Tok::Percent, 1),
            ('=', _) => (Tok::Assign, 1),
            ('<', _) => (Tok::Lt, 1),
            ('>', _) => (Tok::Gt, 1),
            (other, _) => {
                return Err(ScriptError::syntax(
                    self.line,
                    format!("unexpected character '{other}'"),
                ))
            }
        };

        match tok {
            Tok::LParen | Tok::LBracket | Tok::LBrace => self.depth += 1,
            Tok::RParen | Tok::RBracket | Tok::RBrace => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.pos += width;
        self.push(tok);
        Ok(())
    }
}
