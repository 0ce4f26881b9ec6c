//! Single-pass lexer with one character of lookahead.
//!
//! Newlines and semicolons both become a single line-break token class;
//! runs of them are collapsed by the parser. Line breaks inside `(...)`
//! and `[...]` nesting are suppressed entirely, so expressions can span
//! lines. A `#` outside a string ends lexing; everything after it is
//! payload, not program.

use yq_core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    AndAnd,
    OrOr,
    Not,
    Arrow,
    // Literals and names
    Int,
    Str,
    Ident,
    // Keywords
    If,
    Else,
    Func,
    Return,
    While,
    Continue,
    Break,
    For,
    In,
    Init,
    Say,
    Nudge,
    PicSave,
    PicSend,
    // Statement separator (newline or semicolon)
    LineBreak,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    /// 0-indexed source line.
    pub line: usize,
}

impl Token {
    fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
            line,
        }
    }
}

fn keyword(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "func" => TokenKind::Func,
        "return" => TokenKind::Return,
        "while" => TokenKind::While,
        "continue" => TokenKind::Continue,
        "break" => TokenKind::Break,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "init" => TokenKind::Init,
        "say" => TokenKind::Say,
        "nudge" => TokenKind::Nudge,
        "picsave" => TokenKind::PicSave,
        "picsend" => TokenKind::PicSend,
        _ => return None,
    };
    Some(kind)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    /// Paren/bracket nesting depth; line breaks inside are dropped.
    depth: usize,
    tokens: Vec<Token>,
}

/// Tokenize a whole program.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 0,
        column: 0,
        depth: 0,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Lex {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    fn push(&mut self, kind: TokenKind, lexeme: impl Into<String>) {
        self.tokens.push(Token::new(kind, lexeme, self.line));
    }

    /// Consume `=` after a compound operator head, choosing between the
    /// plain and the compound token.
    fn op_or_assign(&mut self, plain: TokenKind, compound: TokenKind, head: char) {
        if self.peek() == Some('=') {
            self.bump();
            self.push(compound, format!("{}=", head));
        } else {
            self.push(plain, head.to_string());
        }
    }

    fn run(&mut self) -> Result<()> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    if self.depth == 0 {
                        self.push(TokenKind::LineBreak, "\\n");
                    }
                    self.bump();
                }
                ';' => {
                    self.bump();
                    self.push(TokenKind::LineBreak, ";");
                }
                '#' => break,
                '/' => {
                    self.bump();
                    match self.peek() {
                        Some('/') => {
                            while let Some(c) = self.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.bump();
                            }
                        }
                        Some('=') => {
                            self.bump();
                            self.push(TokenKind::SlashAssign, "/=");
                        }
                        _ => self.push(TokenKind::Slash, "/"),
                    }
                }
                '0'..='9' => self.lex_number(),
                '"' | '\'' => self.lex_string(c, false)?,
                'r' if matches!(self.peek2(), Some('"') | Some('\'')) => {
                    self.bump();
                    let delim = self.peek().expect("checked by peek2");
                    self.lex_string(delim, true)?;
                }
                c if c.is_alphabetic() || c == '_' || c == '$' => self.lex_ident(),
                '(' => {
                    self.bump();
                    self.depth += 1;
                    self.push(TokenKind::LParen, "(");
                }
                ')' => {
                    self.bump();
                    self.depth = self.depth.saturating_sub(1);
                    self.push(TokenKind::RParen, ")");
                }
                '[' => {
                    self.bump();
                    self.depth += 1;
                    self.push(TokenKind::LBracket, "[");
                }
                ']' => {
                    self.bump();
                    self.depth = self.depth.saturating_sub(1);
                    self.push(TokenKind::RBracket, "]");
                }
                '{' => {
                    self.bump();
                    self.push(TokenKind::LBrace, "{");
                }
                '}' => {
                    self.bump();
                    self.push(TokenKind::RBrace, "}");
                }
                ',' => {
                    self.bump();
                    self.push(TokenKind::Comma, ",");
                }
                '.' => {
                    self.bump();
                    self.push(TokenKind::Dot, ".");
                }
                ':' => {
                    self.bump();
                    self.push(TokenKind::Colon, ":");
                }
                '+' => {
                    self.bump();
                    self.op_or_assign(TokenKind::Plus, TokenKind::PlusAssign, '+');
                }
                '-' => {
                    self.bump();
                    if self.peek() == Some('>') {
                        self.bump();
                        self.push(TokenKind::Arrow, "->");
                    } else {
                        self.op_or_assign(TokenKind::Minus, TokenKind::MinusAssign, '-');
                    }
                }
                '*' => {
                    self.bump();
                    self.op_or_assign(TokenKind::Star, TokenKind::StarAssign, '*');
                }
                '%' => {
                    self.bump();
                    self.op_or_assign(TokenKind::Percent, TokenKind::PercentAssign, '%');
                }
                '=' => {
                    self.bump();
                    self.op_or_assign(TokenKind::Assign, TokenKind::EqEq, '=');
                }
                '!' => {
                    self.bump();
                    self.op_or_assign(TokenKind::Not, TokenKind::NotEq, '!');
                }
                '<' => {
                    self.bump();
                    self.op_or_assign(TokenKind::Less, TokenKind::LessEq, '<');
                }
                '>' => {
                    self.bump();
                    self.op_or_assign(TokenKind::Greater, TokenKind::GreaterEq, '>');
                }
                '&' => {
                    self.bump();
                    if self.peek() == Some('&') {
                        self.bump();
                        self.push(TokenKind::AndAnd, "&&");
                    } else {
                        return Err(self.error("expected '&&'"));
                    }
                }
                '|' => {
                    self.bump();
                    if self.peek() == Some('|') {
                        self.bump();
                        self.push(TokenKind::OrOr, "||");
                    } else {
                        return Err(self.error("expected '||'"));
                    }
                }
                other => {
                    return Err(self.error(format!("unexpected character '{}'", other)));
                }
            }
        }
        self.push(TokenKind::Eof, "");
        Ok(())
    }

    fn lex_number(&mut self) {
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                lexeme.push(c);
                self.bump();
            } else {
                break;
            }
        }
        self.push(TokenKind::Int, lexeme);
    }

    fn lex_ident(&mut self) {
        let mut lexeme = String::new();
        let first = self.bump().expect("caller checked");
        lexeme.push(first);
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                lexeme.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match keyword(&lexeme) {
            Some(kind) => self.push(kind, lexeme),
            None => self.push(TokenKind::Ident, lexeme),
        }
    }

    /// Both quote styles share the same escape rules; a raw string takes
    /// every character verbatim until the closing delimiter.
    fn lex_string(&mut self, delim: char, raw: bool) -> Result<()> {
        self.bump(); // opening delimiter
        let mut text = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            if c == delim {
                self.bump();
                break;
            }
            if c == '\n' {
                return Err(self.error("newline inside string"));
            }
            if !raw && c == '\\' {
                self.bump();
                let Some(escaped) = self.peek() else {
                    return Err(self.error("unterminated string"));
                };
                let resolved = match escaped {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    // \\, \", \' and any unknown escape pass the
                    // character through.
                    other => other,
                };
                text.push(resolved);
                self.bump();
            } else {
                text.push(c);
                self.bump();
            }
        }
        self.push(TokenKind::Str, text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_compound_operators() {
        assert_eq!(
            kinds("a += 1 == 2 -> <="),
            vec![
                TokenKind::Ident,
                TokenKind::PlusAssign,
                TokenKind::Int,
                TokenKind::EqEq,
                TokenKind::Int,
                TokenKind::Arrow,
                TokenKind::LessEq,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_newline_and_semicolon_are_one_class() {
        let toks = tokenize("a\nb;c").unwrap();
        assert_eq!(toks[1].kind, TokenKind::LineBreak);
        assert_eq!(toks[3].kind, TokenKind::LineBreak);
    }

    #[test]
    fn test_newlines_suppressed_inside_parens() {
        let source = "range(1,\n 5)\n";
        let ks = kinds(source);
        assert_eq!(
            ks,
            vec![
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::Int,
                TokenKind::Comma,
                TokenKind::Int,
                TokenKind::RParen,
                TokenKind::LineBreak,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let toks = tokenize(r#"say "a\tb\n\"q\" \x""#).unwrap();
        assert_eq!(toks[1].lexeme, "a\tb\n\"q\" x");
    }

    #[test]
    fn test_raw_strings_keep_backslashes() {
        let toks = tokenize(r#"r"\d+" r'\w'"#).unwrap();
        assert_eq!(toks[0].kind, TokenKind::Str);
        assert_eq!(toks[0].lexeme, r"\d+");
        assert_eq!(toks[1].lexeme, r"\w");
    }

    #[test]
    fn test_r_identifier_is_not_a_raw_string() {
        let toks = tokenize("rand r2").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Ident);
        assert_eq!(toks[0].lexeme, "rand");
        assert_eq!(toks[1].lexeme, "r2");
    }

    #[test]
    fn test_hash_terminates_lexing() {
        let ks = kinds("say 1 # the rest is ] not [ code \"");
        assert_eq!(
            ks,
            vec![TokenKind::Say, TokenKind::Int, TokenKind::Eof]
        );
    }

    #[test]
    fn test_line_comment() {
        let ks = kinds("say 1 // trailing\nsay 2");
        assert_eq!(
            ks,
            vec![
                TokenKind::Say,
                TokenKind::Int,
                TokenKind::LineBreak,
                TokenKind::Say,
                TokenKind::Int,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_dollar_identifiers() {
        let toks = tokenize("$ $0 $12 $name").unwrap();
        assert!(toks[..4].iter().all(|t| t.kind == TokenKind::Ident));
        assert_eq!(toks[0].lexeme, "$");
        assert_eq!(toks[1].lexeme, "$0");
        assert_eq!(toks[2].lexeme, "$12");
        assert_eq!(toks[3].lexeme, "$name");
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let err = tokenize("say \"oops").unwrap_err();
        match err {
            Error::Lex { line, .. } => assert_eq!(line, 0),
            other => panic!("expected lex error, got {:?}", other),
        }
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("if else func while for in init break continue return"),
            vec![
                TokenKind::If,
                TokenKind::Else,
                TokenKind::Func,
                TokenKind::While,
                TokenKind::For,
                TokenKind::In,
                TokenKind::Init,
                TokenKind::Break,
                TokenKind::Continue,
                TokenKind::Return,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lone_ampersand_is_an_error() {
        assert!(tokenize("a & b").is_err());
    }
}
