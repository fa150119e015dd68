#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare identifier or keyword, as written.
    Ident(String),
    Number(String),
    /// Single-quoted literal with `''` escapes resolved.
    Str(String),
    Symbol(&'static str),
    /// `?` placeholder.
    Param,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

const SYMBOLS: &[&str] = &[
    "<=", ">=", "<>", "!=", "||", "(", ")", ",", ";", "=", "<", ">", "*", ".", "+", "-", "/", "%",
];

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, String> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if src[i..].starts_with("--") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        let start = i;
        if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len() {
                let ch = bytes[i] as char;
                if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                    i += 1;
                } else {
                    break;
                }
            }
            out.push(Spanned {
                token: Token::Ident(src[start..i].to_string()),
                offset: start,
            });
            continue;
        }
        if c.is_ascii_digit() {
            while i < bytes.len() && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            out.push(Spanned {
                token: Token::Number(src[start..i].to_string()),
                offset: start,
            });
            continue;
        }
        if c == '\'' {
            i += 1;
            let mut text = String::new();
            loop {
                let Some(&b) = bytes.get(i) else {
                    return Err(format!("unterminated string literal at offset {start}"));
                };
                if b == b'\'' {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        text.push('\'');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                let ch_len = src[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                text.push_str(&src[i..i + ch_len]);
                i += ch_len;
            }
            out.push(Spanned {
                token: Token::Str(text),
                offset: start,
            });
            continue;
        }
        if c == '?' {
            i += 1;
            out.push(Spanned {
                token: Token::Param,
                offset: start,
            });
            continue;
        }
        match SYMBOLS.iter().find(|s| src[i..].starts_with(**s)) {
            Some(sym) => {
                i += sym.len();
                out.push(Spanned {
                    token: Token::Symbol(sym),
                    offset: start,
                });
            }
            None => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(format!("unexpected character '{ch}' at offset {start}"));
            }
        }
    }
    Ok(out)
}

/// Splits a script on `;` outside string literals and `--` comments,
/// dropping empty statements.
pub fn split_statements(src: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        if in_string {
            current.push(c);
            if c == '\'' {
                in_string = false;
            }
            continue;
        }
        match c {
            '\'' => {
                in_string = true;
                current.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            ';' => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    out.push(stmt.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let stmt = current.trim();
    if !stmt.is_empty() {
        out.push(stmt.to_string());
    }
    out
}

/// Forward-only reader over a token stream with keyword helpers.
pub struct TokenCursor<'a> {
    src: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    pub fn new(src: &'a str) -> Result<Self, String> {
        Ok(Self {
            src,
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    pub fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    pub fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    pub fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_keyword(&mut self, keyword: &str) -> Result<(), String> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(format!("expected {keyword}, found {}", self.describe_next()))
        }
    }

    pub fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_symbol(&mut self, symbol: &str) -> Result<(), String> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(format!("expected '{symbol}', found {}", self.describe_next()))
        }
    }

    pub fn expect_ident(&mut self) -> Result<String, String> {
        match self.peek() {
            Some(Token::Ident(word)) => {
                let word = word.clone();
                self.pos += 1;
                Ok(word)
            }
            _ => Err(format!("expected identifier, found {}", self.describe_next())),
        }
    }

    /// Reads `a.b.C` style dotted names.
    pub fn expect_qualified_name(&mut self) -> Result<String, String> {
        let mut name = self.expect_ident()?;
        while self.eat_symbol(".") {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(name)
    }

    pub fn expect_number(&mut self) -> Result<String, String> {
        match self.peek() {
            Some(Token::Number(n)) => {
                let n = n.clone();
                self.pos += 1;
                Ok(n)
            }
            _ => Err(format!("expected number, found {}", self.describe_next())),
        }
    }

    /// Source text from the current token to the end.
    pub fn rest_source(&self) -> &'a str {
        match self.tokens.get(self.pos) {
            Some(s) => self.src[s.offset..].trim(),
            None => "",
        }
    }

    /// Byte offset of the current token, or the source length at the end.
    pub fn source_offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.src.len(), |s| s.offset)
    }

    /// Source text from `start` up to the current token.
    pub fn source_since(&self, start: usize) -> &'a str {
        self.src[start..self.source_offset()].trim()
    }

    pub fn describe_next(&self) -> String {
        match self.peek() {
            None => "end of statement".into(),
            Some(Token::Ident(w)) => format!("'{w}'"),
            Some(Token::Number(n)) => format!("'{n}'"),
            Some(Token::Str(s)) => format!("'{s}'"),
            Some(Token::Symbol(s)) => format!("'{s}'"),
            Some(Token::Param) => "'?'".into(),
        }
    }
}
