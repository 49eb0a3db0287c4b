// SQL Lexer Implementation
//
// Tokenizes the DML subset the interception layer needs to understand:
// INSERT / REPLACE / UPDATE / DELETE / SELECT with bound placeholders.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// SQL Token types
#[derive(Debug, PartialEq, Clone)]
pub enum TokenType {
    // Keywords
    SELECT,
    FROM,
    WHERE,
    INSERT,
    REPLACE,
    INTO,
    VALUES,
    VALUE,
    DELETE,
    UPDATE,
    SET,
    AND,
    OR,
    NOT,
    IN,
    BETWEEN,
    IS,
    NULL,
    LIKE,
    ORDER,
    BY,
    ASC,
    DESC,
    LIMIT,
    OFFSET,
    FOR,
    ON,
    DUPLICATE,
    KEY,
    TRUE,
    FALSE,
    AS,

    // Literals
    STRING(String),
    /// Charset-introduced string such as `_utf8mb4'abc'` (charset, text)
    CharsetString(String, String),
    INTEGER(i64),
    FLOAT(f64),

    // Bind parameters
    PLACEHOLDER,
    NamedParam(String),

    // Identifiers
    IDENTIFIER(String),

    // Operators
    EQUALS,         // =
    LessThan,       // <
    GreaterThan,    // >
    LessEqual,      // <=
    GreaterEqual,   // >=
    NotEqual,       // <> or !=
    PLUS,           // +
    MINUS,          // -
    MULTIPLY,       // *
    DIVIDE,         // /
    MODULO,         // %

    // Punctuation
    SEMICOLON,      // ;
    COMMA,          // ,
    LeftParen,      // (
    RightParen,     // )
    DOT,            // .

    // Special
    EOF,
    ILLEGAL(String),
}

/// A Token represents a lexical unit in the SQL query
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    /// Source text of the token, verbatim
    pub literal: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}({})", self.token_type, self.literal)
    }
}

/// SQL Lexer for breaking a query string into tokens
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
    ch: Option<char>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer from a SQL query string
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer {
            input: input.chars().peekable(),
            line: 1,
            column: 0,
            ch: None,
        };
        lexer.read_char();
        lexer
    }

    /// Tokenize the whole input, including the trailing EOF token
    pub fn tokenize(input: &'a str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let is_eof = token.token_type == TokenType::EOF;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.next();
        self.ch = ch;

        if let Some(c) = ch {
            self.column += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            }
        }

        ch
    }

    fn peek_char(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    /// Skip whitespace and `--`, `#`, `/* */` comments
    fn skip_whitespace(&mut self) {
        loop {
            let current = self.ch;
            let next = self.peek_char();
            match current {
                Some(ch) if ch.is_whitespace() => {
                    self.read_char();
                }
                Some('-') if next == Some('-') => self.skip_line_comment(),
                Some('#') => self.skip_line_comment(),
                Some('/') if next == Some('*') => {
                    self.read_char();
                    self.read_char();
                    while let Some(ch) = self.ch {
                        if ch == '*' && self.peek_char() == Some('/') {
                            self.read_char();
                            self.read_char();
                            break;
                        }
                        self.read_char();
                    }
                }
                _ => break,
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.ch {
            if ch == '\n' {
                break;
            }
            self.read_char();
        }
    }

    /// Read an identifier or keyword; leaves `ch` on the character after it
    fn read_identifier(&mut self) -> String {
        let mut identifier = String::new();

        if let Some(ch) = self.ch {
            identifier.push(ch);
        }

        while let Some(next_ch) = self.peek_char() {
            if is_letter(next_ch) || next_ch.is_ascii_digit() || next_ch == '$' {
                identifier.push(next_ch);
                self.read_char();
            } else {
                break;
            }
        }

        self.read_char();
        identifier
    }

    /// Read a backtick-quoted identifier; `ch` is the opening backtick
    fn read_quoted_identifier(&mut self) -> String {
        let mut identifier = String::new();
        self.read_char();

        while let Some(ch) = self.ch {
            if ch == '`' {
                if self.peek_char() == Some('`') {
                    identifier.push('`');
                    self.read_char();
                    self.read_char();
                    continue;
                }
                self.read_char();
                break;
            }
            identifier.push(ch);
            self.read_char();
        }

        identifier
    }

    /// Read a number (integer or float)
    fn read_number(&mut self) -> String {
        let mut number = String::new();
        let mut has_dot = false;

        if let Some(ch) = self.ch {
            number.push(ch);
        }

        while let Some(next_ch) = self.peek_char() {
            if next_ch.is_ascii_digit() {
                number.push(next_ch);
                self.read_char();
            } else if next_ch == '.' && !has_dot {
                has_dot = true;
                number.push(next_ch);
                self.read_char();
            } else {
                break;
            }
        }

        self.read_char();
        number
    }

    /// Read a quoted string; `ch` is the opening quote. Returns the unescaped
    /// value and the raw source text between the quotes.
    fn read_string(&mut self, quote: char) -> (String, String) {
        let mut value = String::new();
        let mut raw = String::new();

        self.read_char();

        while let Some(ch) = self.ch {
            if ch == quote {
                if self.peek_char() == Some(quote) {
                    value.push(quote);
                    raw.push(quote);
                    raw.push(quote);
                    self.read_char();
                    self.read_char();
                    continue;
                }
                self.read_char();
                break;
            } else if ch == '\\' {
                raw.push(ch);
                if let Some(escaped) = self.read_char() {
                    raw.push(escaped);
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                    self.read_char();
                }
            } else {
                value.push(ch);
                raw.push(ch);
                self.read_char();
            }
        }

        (value, raw)
    }

    fn lookup_identifier(&self, ident: &str) -> TokenType {
        match ident.to_uppercase().as_str() {
            "SELECT" => TokenType::SELECT,
            "FROM" => TokenType::FROM,
            "WHERE" => TokenType::WHERE,
            "INSERT" => TokenType::INSERT,
            "REPLACE" => TokenType::REPLACE,
            "INTO" => TokenType::INTO,
            "VALUES" => TokenType::VALUES,
            "VALUE" => TokenType::VALUE,
            "DELETE" => TokenType::DELETE,
            "UPDATE" => TokenType::UPDATE,
            "SET" => TokenType::SET,
            "AND" => TokenType::AND,
            "OR" => TokenType::OR,
            "NOT" => TokenType::NOT,
            "IN" => TokenType::IN,
            "BETWEEN" => TokenType::BETWEEN,
            "IS" => TokenType::IS,
            "NULL" => TokenType::NULL,
            "LIKE" => TokenType::LIKE,
            "ORDER" => TokenType::ORDER,
            "BY" => TokenType::BY,
            "ASC" => TokenType::ASC,
            "DESC" => TokenType::DESC,
            "LIMIT" => TokenType::LIMIT,
            "OFFSET" => TokenType::OFFSET,
            "FOR" => TokenType::FOR,
            "ON" => TokenType::ON,
            "DUPLICATE" => TokenType::DUPLICATE,
            "KEY" => TokenType::KEY,
            "TRUE" => TokenType::TRUE,
            "FALSE" => TokenType::FALSE,
            "AS" => TokenType::AS,
            _ => TokenType::IDENTIFIER(ident.to_string()),
        }
    }

    /// Get the next token from the input
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let mut token = Token {
            token_type: TokenType::EOF,
            literal: String::new(),
            line: self.line,
            column: self.column,
        };

        let ch = match self.ch {
            Some(ch) => ch,
            None => return token,
        };
        token.literal = ch.to_string();

        match ch {
            ';' => token.token_type = TokenType::SEMICOLON,
            ',' => token.token_type = TokenType::COMMA,
            '(' => token.token_type = TokenType::LeftParen,
            ')' => token.token_type = TokenType::RightParen,
            '.' => token.token_type = TokenType::DOT,
            '+' => token.token_type = TokenType::PLUS,
            '-' => token.token_type = TokenType::MINUS,
            '*' => token.token_type = TokenType::MULTIPLY,
            '/' => token.token_type = TokenType::DIVIDE,
            '%' => token.token_type = TokenType::MODULO,
            '=' => token.token_type = TokenType::EQUALS,
            '?' => token.token_type = TokenType::PLACEHOLDER,
            '<' => match self.peek_char() {
                Some('=') => {
                    self.read_char();
                    token.literal.push('=');
                    token.token_type = TokenType::LessEqual;
                }
                Some('>') => {
                    self.read_char();
                    token.literal.push('>');
                    token.token_type = TokenType::NotEqual;
                }
                _ => token.token_type = TokenType::LessThan,
            },
            '>' => {
                if self.peek_char() == Some('=') {
                    self.read_char();
                    token.literal.push('=');
                    token.token_type = TokenType::GreaterEqual;
                } else {
                    token.token_type = TokenType::GreaterThan;
                }
            }
            '!' => {
                if self.peek_char() == Some('=') {
                    self.read_char();
                    token.literal.push('=');
                    token.token_type = TokenType::NotEqual;
                } else {
                    token.token_type = TokenType::ILLEGAL(ch.to_string());
                }
            }
            ':' => {
                if self.peek_char().is_some_and(is_letter) {
                    self.read_char();
                    let name = self.read_identifier();
                    token.literal = format!(":{}", name);
                    token.token_type = TokenType::NamedParam(name);
                    return token;
                }
                token.token_type = TokenType::ILLEGAL(ch.to_string());
            }
            '\'' | '"' => {
                let (value, raw) = self.read_string(ch);
                token.literal = format!("{}{}{}", ch, raw, ch);
                token.token_type = TokenType::STRING(value);
                return token;
            }
            '`' => {
                let name = self.read_quoted_identifier();
                token.literal = format!("`{}`", name);
                token.token_type = TokenType::IDENTIFIER(name);
                return token;
            }
            _ => {
                if is_letter(ch) {
                    let identifier = self.read_identifier();
                    // `_utf8mb4'text'` style charset introducer
                    if identifier.starts_with('_') && self.ch == Some('\'') {
                        let (value, raw) = self.read_string('\'');
                        token.literal = format!("{}'{}'", identifier, raw);
                        token.token_type = TokenType::CharsetString(identifier, value);
                        return token;
                    }
                    token.literal = identifier.clone();
                    token.token_type = self.lookup_identifier(&identifier);
                    return token;
                } else if ch.is_ascii_digit() {
                    let number = self.read_number();
                    token.literal = number.clone();
                    token.token_type = if number.contains('.') {
                        number.parse::<f64>()
                            .map(TokenType::FLOAT)
                            .unwrap_or_else(|_| TokenType::ILLEGAL(number.clone()))
                    } else {
                        number.parse::<i64>()
                            .map(TokenType::INTEGER)
                            .unwrap_or_else(|_| TokenType::ILLEGAL(number.clone()))
                    };
                    return token;
                } else {
                    token.token_type = TokenType::ILLEGAL(ch.to_string());
                }
            }
        }

        self.read_char();
        token
    }
}

/// Check if a character can start an identifier
fn is_letter(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}
