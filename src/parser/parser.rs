// SQL Parser Implementation
//
// Recursive descent parser that turns lexer tokens into the statement AST.
// Bind placeholders are numbered in source order across the whole statement.

use std::fmt;
use std::iter::Peekable;
use std::mem;
use std::vec::IntoIter;

use super::ast::*;
use super::lexer::{Lexer, Token, TokenType};

/// SQL Parsing errors
#[derive(Debug, Clone)]
pub enum ParseError {
    UnexpectedToken(Token),
    ExpectedToken(TokenType, Token),
    InvalidSyntax(String),
    Unsupported(String),
    EndOfInput,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken(token) => {
                write!(f, "unexpected token {} at {}:{}", token, token.line, token.column)
            }
            ParseError::ExpectedToken(expected, actual) => {
                write!(f, "expected {:?}, found {} at {}:{}", expected, actual, actual.line, actual.column)
            }
            ParseError::InvalidSyntax(reason) => write!(f, "invalid syntax: {}", reason),
            ParseError::Unsupported(what) => write!(f, "unsupported statement: {}", what),
            ParseError::EndOfInput => write!(f, "unexpected end of input"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_NOT: u8 = 3;
const PREC_COMPARE: u8 = 4;
const PREC_ADDITIVE: u8 = 5;
const PREC_MULTIPLICATIVE: u8 = 6;
const PREC_UNARY: u8 = 7;

/// Deepest expression nesting accepted before parsing gives up
pub const MAX_EXPRESSION_DEPTH: usize = 256;

/// SQL Parser for constructing an AST from SQL tokens
pub struct Parser {
    tokens: Peekable<IntoIter<Token>>,
    current_token: Option<Token>,
    placeholder_count: usize,
    depth: usize,
}

impl Parser {
    /// Create a new parser from a SQL query string
    pub fn new(input: &str) -> Self {
        let mut parser = Parser {
            tokens: Lexer::tokenize(input).into_iter().peekable(),
            current_token: None,
            placeholder_count: 0,
            depth: 0,
        };

        parser.next_token();
        parser
    }

    /// Number of placeholders seen so far
    pub fn placeholder_count(&self) -> usize {
        self.placeholder_count
    }

    fn next_token(&mut self) -> Option<Token> {
        self.current_token = self.tokens.next();
        self.current_token.clone()
    }

    fn peek_token_is(&mut self, token_type: &TokenType) -> bool {
        match self.tokens.peek() {
            Some(token) => matches_token_type(&token.token_type, token_type),
            None => false,
        }
    }

    fn expect_token(&mut self, expected: TokenType) -> ParseResult<Token> {
        match self.current_token.clone() {
            Some(token) if matches_token_type(&token.token_type, &expected) => {
                self.next_token();
                Ok(token)
            }
            Some(token) if token.token_type == TokenType::EOF => Err(ParseError::EndOfInput),
            Some(token) => Err(ParseError::ExpectedToken(expected, token)),
            None => Err(ParseError::EndOfInput),
        }
    }

    fn current_token_is(&self, token_type: &TokenType) -> bool {
        match &self.current_token {
            Some(token) => matches_token_type(&token.token_type, token_type),
            None => false,
        }
    }

    /// Consume the current token when it matches
    fn consume_if(&mut self, token_type: &TokenType) -> bool {
        if self.current_token_is(token_type) {
            self.next_token();
            true
        } else {
            false
        }
    }

    fn current_or_eof(&self) -> ParseResult<Token> {
        match &self.current_token {
            Some(token) if token.token_type != TokenType::EOF => Ok(token.clone()),
            _ => Err(ParseError::EndOfInput),
        }
    }

    fn parse_identifier(&mut self) -> ParseResult<String> {
        let token = self.current_or_eof()?;
        if let TokenType::IDENTIFIER(name) = &token.token_type {
            let identifier = name.clone();
            self.next_token();
            Ok(identifier)
        } else {
            Err(ParseError::ExpectedToken(TokenType::IDENTIFIER(String::new()), token))
        }
    }

    /// Parse a single SQL statement; trailing tokens other than `;` are an error
    pub fn parse_statement(&mut self) -> ParseResult<Statement> {
        let token = self.current_or_eof()?;
        let statement = match token.token_type {
            TokenType::SELECT => Statement::Select(self.parse_select()?),
            TokenType::INSERT => self.parse_insert(false)?,
            TokenType::REPLACE => self.parse_insert(true)?,
            TokenType::UPDATE => self.parse_update()?,
            TokenType::DELETE => self.parse_delete()?,
            TokenType::IDENTIFIER(word) => return Err(ParseError::Unsupported(word.to_uppercase())),
            _ => return Err(ParseError::UnexpectedToken(token)),
        };

        self.consume_if(&TokenType::SEMICOLON);
        match &self.current_token {
            Some(token) if token.token_type != TokenType::EOF => {
                Err(ParseError::InvalidSyntax(format!("trailing input starting at {}", token)))
            }
            _ => Ok(statement),
        }
    }

    fn parse_table_reference(&mut self) -> ParseResult<TableReference> {
        let first = self.parse_identifier()?;
        let (schema, name) = if self.consume_if(&TokenType::DOT) {
            (Some(first), self.parse_identifier()?)
        } else {
            (None, first)
        };

        let alias = if self.consume_if(&TokenType::AS) {
            Some(self.parse_identifier()?)
        } else if let Some(Token { token_type: TokenType::IDENTIFIER(alias), .. }) = &self.current_token {
            let alias = alias.clone();
            self.next_token();
            Some(alias)
        } else {
            None
        };

        Ok(TableReference { schema, name, alias })
    }

    fn parse_column_reference(&mut self) -> ParseResult<ColumnReference> {
        let first = self.parse_identifier()?;
        if self.consume_if(&TokenType::DOT) {
            let name = self.parse_identifier()?;
            Ok(ColumnReference { table: Some(first), name })
        } else {
            Ok(ColumnReference { table: None, name: first })
        }
    }

    /// Parse a SELECT statement (single table, no joins or grouping)
    fn parse_select(&mut self) -> ParseResult<SelectStatement> {
        self.expect_token(TokenType::SELECT)?;

        let mut columns = Vec::new();
        loop {
            if self.consume_if(&TokenType::MULTIPLY) {
                columns.push(SelectColumn::Wildcard);
            } else {
                let expr = self.parse_expression(0)?;
                let alias = if self.consume_if(&TokenType::AS) {
                    Some(self.parse_identifier()?)
                } else {
                    None
                };
                columns.push(SelectColumn::Expression { expr, alias });
            }
            if !self.consume_if(&TokenType::COMMA) {
                break;
            }
        }

        self.expect_token(TokenType::FROM)?;
        let table = self.parse_table_reference()?;
        if self.current_token_is(&TokenType::COMMA) {
            return Err(ParseError::Unsupported("multi-table SELECT".to_string()));
        }

        let where_clause = self.parse_optional_where()?;
        let order_by = self.parse_optional_order_by()?;
        let limit = self.parse_optional_limit()?;

        let for_update = if self.consume_if(&TokenType::FOR) {
            self.expect_token(TokenType::UPDATE)?;
            true
        } else {
            false
        };

        Ok(SelectStatement { columns, table, where_clause, order_by, limit, for_update })
    }

    /// Parse INSERT / REPLACE, including `ON DUPLICATE KEY UPDATE`
    fn parse_insert(&mut self, replace: bool) -> ParseResult<Statement> {
        if replace {
            self.expect_token(TokenType::REPLACE)?;
        } else {
            self.expect_token(TokenType::INSERT)?;
        }
        self.consume_if(&TokenType::INTO);

        let table = self.parse_table_reference()?;

        let mut columns = Vec::new();
        if self.consume_if(&TokenType::LeftParen) {
            loop {
                columns.push(self.parse_column_reference()?.name);
                if !self.consume_if(&TokenType::COMMA) {
                    break;
                }
            }
            self.expect_token(TokenType::RightParen)?;
        }

        if self.current_token_is(&TokenType::SELECT) {
            return Err(ParseError::Unsupported("INSERT ... SELECT".to_string()));
        }
        if !self.consume_if(&TokenType::VALUES) {
            self.expect_token(TokenType::VALUE)?;
        }

        let mut rows = Vec::new();
        loop {
            self.expect_token(TokenType::LeftParen)?;
            let mut row = Vec::new();
            if !self.current_token_is(&TokenType::RightParen) {
                loop {
                    row.push(self.parse_expression(0)?);
                    if !self.consume_if(&TokenType::COMMA) {
                        break;
                    }
                }
            }
            self.expect_token(TokenType::RightParen)?;
            if !columns.is_empty() && row.len() != columns.len() {
                return Err(ParseError::InvalidSyntax(format!(
                    "column count {} does not match value count {}",
                    columns.len(),
                    row.len()
                )));
            }
            rows.push(row);
            if !self.consume_if(&TokenType::COMMA) {
                break;
            }
        }

        let mut on_duplicate_update = Vec::new();
        if self.consume_if(&TokenType::ON) {
            if replace {
                return Err(ParseError::InvalidSyntax("REPLACE cannot use ON DUPLICATE KEY".to_string()));
            }
            self.expect_token(TokenType::DUPLICATE)?;
            self.expect_token(TokenType::KEY)?;
            self.expect_token(TokenType::UPDATE)?;
            on_duplicate_update = self.parse_assignments()?;
        }

        Ok(Statement::Insert(InsertStatement { table, columns, rows, replace, on_duplicate_update }))
    }

    fn parse_assignments(&mut self) -> ParseResult<Vec<Assignment>> {
        let mut assignments = Vec::new();
        loop {
            let column = self.parse_column_reference()?;
            self.expect_token(TokenType::EQUALS)?;
            let value = self.parse_expression(0)?;
            assignments.push(Assignment { column, value });
            if !self.consume_if(&TokenType::COMMA) {
                break;
            }
        }
        Ok(assignments)
    }

    /// Parse an UPDATE statement
    fn parse_update(&mut self) -> ParseResult<Statement> {
        self.expect_token(TokenType::UPDATE)?;
        let table = self.parse_table_reference()?;
        if self.current_token_is(&TokenType::COMMA) {
            return Err(ParseError::Unsupported("multi-table UPDATE".to_string()));
        }

        self.expect_token(TokenType::SET)?;
        let assignments = self.parse_assignments()?;
        let where_clause = self.parse_optional_where()?;
        let order_by = self.parse_optional_order_by()?;
        let limit = self.parse_optional_limit()?;

        Ok(Statement::Update(UpdateStatement { table, assignments, where_clause, order_by, limit }))
    }

    /// Parse a DELETE statement
    fn parse_delete(&mut self) -> ParseResult<Statement> {
        self.expect_token(TokenType::DELETE)?;
        self.expect_token(TokenType::FROM)?;
        let table = self.parse_table_reference()?;
        if self.current_token_is(&TokenType::COMMA) {
            return Err(ParseError::Unsupported("multi-table DELETE".to_string()));
        }

        let where_clause = self.parse_optional_where()?;
        let order_by = self.parse_optional_order_by()?;
        let limit = self.parse_optional_limit()?;

        Ok(Statement::Delete(DeleteStatement { table, where_clause, order_by, limit }))
    }

    fn parse_optional_where(&mut self) -> ParseResult<Option<Expression>> {
        if self.consume_if(&TokenType::WHERE) {
            Ok(Some(self.parse_expression(0)?))
        } else {
            Ok(None)
        }
    }

    fn parse_optional_order_by(&mut self) -> ParseResult<Vec<OrderByItem>> {
        let mut items = Vec::new();
        if !self.consume_if(&TokenType::ORDER) {
            return Ok(items);
        }
        self.expect_token(TokenType::BY)?;
        loop {
            let expr = self.parse_expression(0)?;
            let descending = if self.consume_if(&TokenType::DESC) {
                Some(true)
            } else if self.consume_if(&TokenType::ASC) {
                Some(false)
            } else {
                None
            };
            items.push(OrderByItem { expr, descending });
            if !self.consume_if(&TokenType::COMMA) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_optional_limit(&mut self) -> ParseResult<Option<Limit>> {
        if !self.consume_if(&TokenType::LIMIT) {
            return Ok(None);
        }
        let first = self.parse_expression(0)?;
        if self.consume_if(&TokenType::COMMA) {
            let count = self.parse_expression(0)?;
            return Ok(Some(Limit { count, offset: Some(first) }));
        }
        if self.consume_if(&TokenType::OFFSET) {
            let offset = self.parse_expression(0)?;
            return Ok(Some(Limit { count: first, offset: Some(offset) }));
        }
        Ok(Some(Limit { count: first, offset: None }))
    }

    /// Parse an expression with operator precedence
    pub fn parse_expression(&mut self, precedence: u8) -> ParseResult<Expression> {
        if self.depth >= MAX_EXPRESSION_DEPTH {
            return Err(ParseError::InvalidSyntax(format!(
                "expression nested deeper than {} levels",
                MAX_EXPRESSION_DEPTH
            )));
        }
        self.depth += 1;
        let result = self.parse_operators(precedence);
        self.depth -= 1;
        result
    }

    fn parse_operators(&mut self, precedence: u8) -> ParseResult<Expression> {
        let mut left = self.parse_prefix_expression()?;

        loop {
            let token_type = match &self.current_token {
                Some(token) => token.token_type.clone(),
                None => break,
            };

            // Postfix predicates bind at comparison precedence
            let negated = token_type == TokenType::NOT
                && (self.peek_token_is(&TokenType::IN)
                    || self.peek_token_is(&TokenType::BETWEEN)
                    || self.peek_token_is(&TokenType::LIKE));
            let is_predicate = negated
                || matches!(token_type, TokenType::IN | TokenType::BETWEEN | TokenType::IS | TokenType::LIKE);

            if is_predicate {
                if precedence >= PREC_COMPARE {
                    break;
                }
                if negated {
                    self.next_token();
                }
                left = self.parse_predicate(left, negated)?;
                continue;
            }

            let op_precedence = get_operator_precedence(&token_type);
            if op_precedence == 0 || precedence >= op_precedence {
                break;
            }
            let op = token_to_operator(&token_type)
                .ok_or_else(|| ParseError::InvalidSyntax(format!("not a binary operator: {:?}", token_type)))?;
            self.next_token();
            let right = self.parse_expression(op_precedence)?;
            left = Expression::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
        }

        Ok(left)
    }

    /// IN / BETWEEN / IS [NOT] NULL / [NOT] LIKE following `left`
    fn parse_predicate(&mut self, left: Expression, negated: bool) -> ParseResult<Expression> {
        let token = self.current_or_eof()?;
        match token.token_type {
            TokenType::IN => {
                self.next_token();
                self.expect_token(TokenType::LeftParen)?;
                let list = if self.current_token_is(&TokenType::SELECT) {
                    vec![Expression::Subquery(Box::new(self.parse_select()?))]
                } else {
                    let mut list = Vec::new();
                    loop {
                        list.push(self.parse_expression(0)?);
                        if !self.consume_if(&TokenType::COMMA) {
                            break;
                        }
                    }
                    list
                };
                self.expect_token(TokenType::RightParen)?;
                Ok(Expression::InList { expr: Box::new(left), list, negated })
            }
            TokenType::BETWEEN => {
                self.next_token();
                let low = self.parse_expression(PREC_COMPARE)?;
                self.expect_token(TokenType::AND)?;
                let high = self.parse_expression(PREC_COMPARE)?;
                Ok(Expression::Between {
                    expr: Box::new(left),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                })
            }
            TokenType::LIKE => {
                self.next_token();
                let right = self.parse_expression(PREC_COMPARE)?;
                let op = if negated { Operator::NotLike } else { Operator::Like };
                Ok(Expression::BinaryOp { left: Box::new(left), op, right: Box::new(right) })
            }
            TokenType::IS => {
                self.next_token();
                let not = self.consume_if(&TokenType::NOT);
                self.expect_token(TokenType::NULL)?;
                Ok(Expression::IsNull { expr: Box::new(left), negated: not })
            }
            _ => Err(ParseError::UnexpectedToken(token)),
        }
    }

    fn next_placeholder(&mut self, name: Option<String>) -> Expression {
        let index = self.placeholder_count;
        self.placeholder_count += 1;
        Expression::Placeholder(Placeholder { index, name })
    }

    /// Parse a prefix expression (literal, identifier, placeholder, group, ...)
    fn parse_prefix_expression(&mut self) -> ParseResult<Expression> {
        let token = self.current_or_eof()?;
        match token.token_type.clone() {
            TokenType::INTEGER(v) => {
                self.next_token();
                Ok(Expression::Literal(Value::Integer(v)))
            }
            TokenType::FLOAT(v) => {
                self.next_token();
                Ok(Expression::Literal(Value::Float(v)))
            }
            TokenType::STRING(s) => {
                self.next_token();
                Ok(Expression::Literal(Value::String(s)))
            }
            TokenType::CharsetString(charset, text) => {
                self.next_token();
                Ok(Expression::CharsetLiteral { charset, text, raw: token.literal })
            }
            TokenType::NULL => {
                self.next_token();
                Ok(Expression::Literal(Value::Null))
            }
            TokenType::TRUE => {
                self.next_token();
                Ok(Expression::Literal(Value::Boolean(true)))
            }
            TokenType::FALSE => {
                self.next_token();
                Ok(Expression::Literal(Value::Boolean(false)))
            }
            TokenType::PLACEHOLDER => {
                self.next_token();
                Ok(self.next_placeholder(None))
            }
            TokenType::NamedParam(name) => {
                self.next_token();
                Ok(self.next_placeholder(Some(name)))
            }
            TokenType::MINUS => {
                self.next_token();
                let operand = self.parse_expression(PREC_UNARY)?;
                Ok(Expression::UnaryOp { op: UnaryOperator::Minus, expr: Box::new(operand) })
            }
            TokenType::NOT => {
                self.next_token();
                let operand = self.parse_expression(PREC_NOT)?;
                Ok(Expression::UnaryOp { op: UnaryOperator::Not, expr: Box::new(operand) })
            }
            TokenType::LeftParen => {
                self.next_token();
                if self.current_token_is(&TokenType::SELECT) {
                    let select = self.parse_select()?;
                    self.expect_token(TokenType::RightParen)?;
                    return Ok(Expression::Subquery(Box::new(select)));
                }
                let first = self.parse_expression(0)?;
                if self.current_token_is(&TokenType::COMMA) {
                    let mut items = vec![first];
                    while self.consume_if(&TokenType::COMMA) {
                        items.push(self.parse_expression(0)?);
                    }
                    self.expect_token(TokenType::RightParen)?;
                    return Ok(Expression::Tuple(items));
                }
                self.expect_token(TokenType::RightParen)?;
                Ok(Expression::Nested(Box::new(first)))
            }
            // VALUES(col) and REPLACE(...) are functions when followed by a parenthesis
            TokenType::VALUES | TokenType::REPLACE if self.peek_token_is(&TokenType::LeftParen) => {
                self.next_token();
                self.parse_function_arguments(token.literal.to_uppercase())
            }
            TokenType::IDENTIFIER(name) => {
                if self.peek_token_is(&TokenType::LeftParen) {
                    self.next_token();
                    return self.parse_function_arguments(name);
                }
                Ok(Expression::Column(self.parse_column_reference()?))
            }
            _ => Err(ParseError::UnexpectedToken(token)),
        }
    }

    /// Parse `( args )` of a function whose name was already consumed
    fn parse_function_arguments(&mut self, name: String) -> ParseResult<Expression> {
        self.expect_token(TokenType::LeftParen)?;
        let mut args = Vec::new();
        if !self.current_token_is(&TokenType::RightParen) {
            loop {
                if self.consume_if(&TokenType::MULTIPLY) {
                    args.push(Expression::Column(ColumnReference { table: None, name: "*".to_string() }));
                } else {
                    args.push(self.parse_expression(0)?);
                }
                if !self.consume_if(&TokenType::COMMA) {
                    break;
                }
            }
        }
        self.expect_token(TokenType::RightParen)?;
        Ok(Expression::Function { name, args })
    }
}

/// Compare token kinds, ignoring any payload
fn matches_token_type(actual: &TokenType, expected: &TokenType) -> bool {
    mem::discriminant(actual) == mem::discriminant(expected)
}

fn get_operator_precedence(token_type: &TokenType) -> u8 {
    match token_type {
        TokenType::OR => PREC_OR,
        TokenType::AND => PREC_AND,
        TokenType::EQUALS
        | TokenType::NotEqual
        | TokenType::LessThan
        | TokenType::GreaterThan
        | TokenType::LessEqual
        | TokenType::GreaterEqual => PREC_COMPARE,
        TokenType::PLUS | TokenType::MINUS => PREC_ADDITIVE,
        TokenType::MULTIPLY | TokenType::DIVIDE | TokenType::MODULO => PREC_MULTIPLICATIVE,
        _ => 0,
    }
}

fn token_to_operator(token_type: &TokenType) -> Option<Operator> {
    Some(match token_type {
        TokenType::OR => Operator::Or,
        TokenType::AND => Operator::And,
        TokenType::EQUALS => Operator::Equals,
        TokenType::NotEqual => Operator::NotEquals,
        TokenType::LessThan => Operator::LessThan,
        TokenType::GreaterThan => Operator::GreaterThan,
        TokenType::LessEqual => Operator::LessEquals,
        TokenType::GreaterEqual => Operator::GreaterEquals,
        TokenType::PLUS => Operator::Plus,
        TokenType::MINUS => Operator::Minus,
        TokenType::MULTIPLY => Operator::Multiply,
        TokenType::DIVIDE => Operator::Divide,
        TokenType::MODULO => Operator::Modulo,
        _ => return None,
    })
}
