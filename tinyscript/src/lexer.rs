// Tokenizer
//
// Turns source text into positioned tokens. Lines and columns are 1-based.

use crate::error::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Number(f64),
    Str(String),
    Ident(String),
    Keyword(Keyword),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Let,
    Const,
    Function,
    Return,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Finally,
    True,
    False,
    Null,
    Undefined,
    New,
    Typeof,
}

impl Keyword {
    fn lookup(word: &str) -> Option<Keyword> {
        let kw = match word {
            "var" => Keyword::Var,
            "let" => Keyword::Let,
            "const" => Keyword::Const,
            "function" => Keyword::Function,
            "return" => Keyword::Return,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "throw" => Keyword::Throw,
            "try" => Keyword::Try,
            "catch" => Keyword::Catch,
            "finally" => Keyword::Finally,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "null" => Keyword::Null,
            "undefined" => Keyword::Undefined,
            "new" => Keyword::New,
            "typeof" => Keyword::Typeof,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    pub column: u32,
}

// Longest first so that "===" wins over "==" and "="
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "*=", "/=", "++", "--", "(",
    ")", "{", "}", "[", "]", ",", ";", ".", ":", "?", "+", "-", "*", "/", "%", "!", "=", "<",
    ">",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    let mut line = 1u32;
    let mut column = 1u32;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            i += 1;
            line += 1;
            column = 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            column += 1;
            continue;
        }

        // Comments
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let (start_line, start_column) = (line, column);
            i += 2;
            column += 2;
            loop {
                if i >= chars.len() {
                    return Err(SyntaxError::new(
                        start_line,
                        start_column,
                        "Unterminated comment",
                    ));
                }
                if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    i += 2;
                    column += 2;
                    break;
                }
                if chars[i] == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
                i += 1;
            }
            continue;
        }

        let (tok_line, tok_column) = (line, column);

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| {
                SyntaxError::new(tok_line, tok_column, format!("Invalid number '{}'", text))
            })?;
            column += (i - start) as u32;
            tokens.push(Token {
                tok: Tok::Number(value),
                line: tok_line,
                column: tok_column,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            column += (i - start) as u32;
            let tok = match Keyword::lookup(&word) {
                Some(kw) => Tok::Keyword(kw),
                None => Tok::Ident(word),
            };
            tokens.push(Token {
                tok,
                line: tok_line,
                column: tok_column,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            column += 1;
            let mut text = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(SyntaxError::new(
                        tok_line,
                        tok_column,
                        "Unterminated string literal",
                    ));
                };
                i += 1;
                column += 1;
                if ch == quote {
                    break;
                }
                if ch == '\n' {
                    return Err(SyntaxError::new(
                        tok_line,
                        tok_column,
                        "Unterminated string literal",
                    ));
                }
                if ch == '\\' {
                    let Some(&escaped) = chars.get(i) else {
                        continue;
                    };
                    i += 1;
                    column += 1;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                } else {
                    text.push(ch);
                }
            }
            tokens.push(Token {
                tok: Tok::Str(text),
                line: tok_line,
                column: tok_column,
            });
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                i += p.len();
                column += p.len() as u32;
                tokens.push(Token {
                    tok: Tok::Punct(*p),
                    line: tok_line,
                    column: tok_column,
                });
            }
            None => {
                return Err(SyntaxError::new(
                    tok_line,
                    tok_column,
                    format!("Unexpected character '{}'", c),
                ));
            }
        }
    }

    tokens.push(Token {
        tok: Tok::Eof,
        line,
        column,
    });
    Ok(tokens)
}
