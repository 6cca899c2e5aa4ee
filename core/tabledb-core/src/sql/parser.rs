//! SQL Parser
//!
//! Recursive-descent parser over the token stream from [`super::lexer`].
//! Keywords are case-insensitive, identifiers keep their case. Predicates
//! bind `OR` < `AND` < `NOT` < comparison.

use super::ast::*;
use super::lexer::{is_keyword, tokenize};
use crate::error::{TdbError, TdbResult};
use crate::storage::ForeignKey;
use crate::value::{ColumnType, Value};
use sqlparser::tokenizer::{Token, Word};

/// Words that end a table reference or a select item instead of aliasing it.
const RESERVED: &[&str] = &[
    "FROM", "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "OUTER", "FULL", "ON", "GROUP", "ORDER",
    "LIMIT", "OFFSET", "SET", "VALUES", "AS", "AND", "OR", "NOT", "BY",
];

pub struct SqlParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl SqlParser {
    pub fn new(sql: &str) -> TdbResult<Self> {
        Ok(Self {
            tokens: tokenize(sql)?,
            pos: 0,
        })
    }

    /// Parse exactly one statement (a trailing `;` is allowed).
    pub fn parse_sql(sql: &str) -> TdbResult<Statement> {
        let mut parser = Self::new(sql)?;
        if parser.tokens.is_empty() {
            return Err(TdbError::invalid_query("empty statement"));
        }
        let statement = parser.parse_statement()?;
        parser.finish()?;
        Ok(statement)
    }

    /// Parse a standalone predicate such as `age > 30 AND city = 'Oslo'`.
    pub fn parse_predicate_str(text: &str) -> TdbResult<Predicate> {
        let mut parser = Self::new(text)?;
        let predicate = parser.parse_predicate()?;
        parser.finish()?;
        Ok(predicate)
    }

    fn finish(&mut self) -> TdbResult<()> {
        while self.consume(&Token::SemiColon) {}
        if self.peek().is_some() {
            return self.expected("end of statement");
        }
        Ok(())
    }

    // ===== Token helpers =====

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expected<T>(&self, expected: &str) -> TdbResult<T> {
        let found = self
            .peek()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "end of input".to_string());
        Err(TdbError::invalid_query(format!(
            "Expected {}, found: {}",
            expected, found
        )))
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| is_keyword(t, keyword))
    }

    fn parse_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_keywords(&mut self, keywords: &[&str]) -> bool {
        let matches = keywords
            .iter()
            .enumerate()
            .all(|(i, k)| self.peek_nth(i).is_some_and(|t| is_keyword(t, k)));
        if matches {
            self.pos += keywords.len();
        }
        matches
    }

    fn expect_keyword(&mut self, keyword: &str) -> TdbResult<()> {
        if self.parse_keyword(keyword) {
            Ok(())
        } else {
            self.expected(keyword)
        }
    }

    fn consume(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, token: &Token) -> TdbResult<()> {
        if self.consume(token) {
            Ok(())
        } else {
            self.expected(&token.to_string())
        }
    }

    fn parse_identifier(&mut self) -> TdbResult<String> {
        match self.peek() {
            Some(Token::Word(Word { value, .. })) => {
                let value = value.clone();
                self.pos += 1;
                Ok(value)
            }
            _ => self.expected("identifier"),
        }
    }

    fn parse_identifier_list(&mut self) -> TdbResult<Vec<String>> {
        self.expect_token(&Token::LParen)?;
        let mut names = vec![self.parse_identifier()?];
        while self.consume(&Token::Comma) {
            names.push(self.parse_identifier()?);
        }
        self.expect_token(&Token::RParen)?;
        Ok(names)
    }

    /// Optional alias: `AS name` or a bare non-reserved word.
    fn parse_optional_alias(&mut self) -> TdbResult<Option<String>> {
        if self.parse_keyword("AS") {
            return self.parse_identifier().map(Some);
        }
        match self.peek() {
            Some(Token::Word(w))
                if w.quote_style.is_some()
                    || !RESERVED.iter().any(|r| w.value.eq_ignore_ascii_case(r)) =>
            {
                self.parse_identifier().map(Some)
            }
            _ => Ok(None),
        }
    }

    fn parse_usize(&mut self, what: &str) -> TdbResult<usize> {
        match self.peek() {
            Some(Token::Number(n, _)) => match n.parse::<usize>() {
                Ok(v) => {
                    self.pos += 1;
                    Ok(v)
                }
                Err(_) => self.expected(what),
            },
            _ => self.expected(what),
        }
    }

    // ===== Statements =====

    pub fn parse_statement(&mut self) -> TdbResult<Statement> {
        if self.parse_keyword("CREATE") {
            if self.parse_keyword("TABLE") {
                return self.parse_create_table();
            }
            if self.parse_keyword("INDEX") {
                return self.parse_create_index();
            }
            if self.parse_keyword("DATABASE") {
                let name = self.parse_identifier()?;
                return Ok(Statement::CreateDatabase { name });
            }
            return self.expected("TABLE, INDEX or DATABASE after CREATE");
        }
        if self.parse_keyword("DROP") {
            if self.parse_keyword("TABLE") {
                let if_exists = self.parse_keywords(&["IF", "EXISTS"]);
                let table = self.parse_identifier()?;
                return Ok(Statement::DropTable { table, if_exists });
            }
            if self.parse_keyword("DATABASE") {
                let name = self.parse_identifier()?;
                return Ok(Statement::DropDatabase { name });
            }
            return self.expected("TABLE or DATABASE after DROP");
        }
        if self.parse_keyword("ALTER") {
            return self.parse_alter_table();
        }
        if self.parse_keyword("INSERT") {
            return self.parse_insert();
        }
        if self.parse_keyword("SELECT") {
            return self.parse_select().map(Statement::Select);
        }
        if self.parse_keyword("UPDATE") {
            return self.parse_update();
        }
        if self.parse_keyword("DELETE") {
            self.expect_keyword("FROM")?;
            let table = self.parse_identifier()?;
            let filter = self.parse_where()?;
            return Ok(Statement::Delete(Delete { table, filter }));
        }
        if self.parse_keyword("SHOW") {
            if self.parse_keyword("TABLES") {
                return Ok(Statement::ShowTables);
            }
            if self.parse_keyword("DATABASES") {
                return Ok(Statement::ShowDatabases);
            }
            return self.expected("TABLES or DATABASES after SHOW");
        }
        if self.parse_keyword("DESCRIBE") || self.parse_keyword("DESC") {
            let table = self.parse_identifier()?;
            return Ok(Statement::Describe { table });
        }
        if self.parse_keyword("USE") {
            let database = self.parse_identifier()?;
            return Ok(Statement::Use { database });
        }
        self.expected("a statement")
    }

    fn parse_create_table(&mut self) -> TdbResult<Statement> {
        let if_not_exists = self.parse_keywords(&["IF", "NOT", "EXISTS"]);
        let name = self.parse_identifier()?;
        let mut create = CreateTable {
            name,
            if_not_exists,
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        };

        self.expect_token(&Token::LParen)?;
        loop {
            if self.parse_keywords(&["PRIMARY", "KEY"]) {
                create.primary_key.extend(self.parse_identifier_list()?);
            } else if self.parse_keyword("INDEX") {
                create.indexes.extend(self.parse_identifier_list()?);
            } else if self.parse_keywords(&["FOREIGN", "KEY"]) {
                let column = self.parse_single_column_list()?;
                self.expect_keyword("REFERENCES")?;
                let references_table = self.parse_identifier()?;
                let references_column = self.parse_single_column_list()?;
                create.foreign_keys.push(ForeignKey {
                    column,
                    references_table,
                    references_column,
                });
            } else {
                create.columns.push(self.parse_column_def()?);
            }
            if self.consume(&Token::Comma) {
                continue;
            }
            self.expect_token(&Token::RParen)?;
            break;
        }
        Ok(Statement::CreateTable(create))
    }

    fn parse_single_column_list(&mut self) -> TdbResult<String> {
        let mut list = self.parse_identifier_list()?;
        if list.len() != 1 {
            return Err(TdbError::invalid_query(
                "FOREIGN KEY takes exactly one column",
            ));
        }
        Ok(list.remove(0))
    }

    fn parse_column_def(&mut self) -> TdbResult<ColumnDef> {
        let name = self.parse_identifier()?;
        let ty = self.parse_column_type()?;
        let mut def = ColumnDef::new(name, ty);
        loop {
            if self.parse_keywords(&["PRIMARY", "KEY"]) {
                def.primary_key = true;
            } else if self.parse_keyword("AUTOINCREMENT") || self.parse_keyword("AUTO_INCREMENT")
            {
                def.autoincrement = true;
            } else if self.parse_keywords(&["NOT", "NULL"]) {
                def.not_null = true;
            } else if self.parse_keyword("NULL") {
                def.not_null = false;
            } else if self.parse_keyword("DEFAULT") {
                def.default = Some(if self.parse_keyword("CURRENT_TIMESTAMP") {
                    DefaultValue::CurrentTimestamp
                } else {
                    DefaultValue::Literal(self.parse_literal()?)
                });
            } else {
                break;
            }
        }
        Ok(def)
    }

    fn parse_column_type(&mut self) -> TdbResult<ColumnType> {
        let name = match self.peek() {
            Some(Token::Word(w)) if w.quote_style.is_none() => w.value.clone(),
            _ => return self.expected("column type"),
        };
        self.pos += 1;
        let mut text = name;
        if self.consume(&Token::LParen) {
            let n = self.parse_usize("type length")?;
            self.expect_token(&Token::RParen)?;
            text = format!("{}({})", text, n);
        }
        text.parse()
    }

    fn parse_create_index(&mut self) -> TdbResult<Statement> {
        let name = self.parse_identifier()?;
        self.expect_keyword("ON")?;
        let table = self.parse_identifier()?;
        let column = self.parse_single_column_list().map_err(|_| {
            TdbError::invalid_query("CREATE INDEX takes exactly one column")
        })?;
        Ok(Statement::CreateIndex {
            name,
            table,
            column,
        })
    }

    fn parse_alter_table(&mut self) -> TdbResult<Statement> {
        self.expect_keyword("TABLE")?;
        let table = self.parse_identifier()?;
        if !self.parse_keyword("ADD") {
            return self.expected("ADD (only ALTER TABLE ... ADD is supported)");
        }
        self.parse_keyword("COLUMN");
        let column = self.parse_identifier()?;
        let ty = self.parse_column_type()?;
        Ok(Statement::AlterTableAdd { table, column, ty })
    }

    fn parse_insert(&mut self) -> TdbResult<Statement> {
        self.expect_keyword("INTO")?;
        let table = self.parse_identifier()?;
        let columns = if self.peek() == Some(&Token::LParen) {
            Some(self.parse_identifier_list()?)
        } else {
            None
        };
        self.expect_keyword("VALUES")?;
        let mut rows = Vec::new();
        loop {
            self.expect_token(&Token::LParen)?;
            let mut values = vec![self.parse_literal()?];
            while self.consume(&Token::Comma) {
                values.push(self.parse_literal()?);
            }
            self.expect_token(&Token::RParen)?;
            rows.push(values);
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        Ok(Statement::Insert(Insert {
            table,
            columns,
            rows,
        }))
    }

    fn parse_update(&mut self) -> TdbResult<Statement> {
        let table = self.parse_identifier()?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.parse_identifier()?;
            if !(self.consume(&Token::Eq) || self.consume(&Token::DoubleEq)) {
                return self.expected("=");
            }
            assignments.push((column, self.parse_literal()?));
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        let filter = self.parse_where()?;
        Ok(Statement::Update(Update {
            table,
            assignments,
            filter,
        }))
    }

    fn parse_where(&mut self) -> TdbResult<Option<Predicate>> {
        if self.parse_keyword("WHERE") {
            self.parse_predicate().map(Some)
        } else {
            Ok(None)
        }
    }

    // ===== SELECT =====

    fn parse_select(&mut self) -> TdbResult<Select> {
        let distinct = self.parse_keyword("DISTINCT");
        let mut items = vec![self.parse_select_item()?];
        while self.consume(&Token::Comma) {
            items.push(self.parse_select_item()?);
        }

        self.expect_keyword("FROM")?;
        let from = self.parse_table_ref()?;
        let join = self.parse_join()?;
        let filter = self.parse_where()?;

        let mut group_by = Vec::new();
        if self.parse_keywords(&["GROUP", "BY"]) {
            group_by.push(self.parse_column_ref()?);
            while self.consume(&Token::Comma) {
                group_by.push(self.parse_column_ref()?);
            }
        }

        let mut order_by = Vec::new();
        if self.parse_keywords(&["ORDER", "BY"]) {
            loop {
                let column = self.parse_column_ref()?;
                let descending = if self.parse_keyword("DESC") {
                    true
                } else {
                    self.parse_keyword("ASC");
                    false
                };
                order_by.push(OrderBy { column, descending });
                if !self.consume(&Token::Comma) {
                    break;
                }
            }
        }

        let mut limit = None;
        let mut offset = None;
        if self.parse_keyword("LIMIT") {
            limit = Some(self.parse_usize("LIMIT count")?);
            if self.parse_keyword("OFFSET") {
                offset = Some(self.parse_usize("OFFSET count")?);
            }
        }

        Ok(Select {
            distinct,
            items,
            from,
            join,
            filter,
            group_by,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_select_item(&mut self) -> TdbResult<SelectItem> {
        if self.consume(&Token::Mul) {
            return Ok(SelectItem::Wildcard);
        }
        if let (Some(Token::Word(w)), Some(Token::Period), Some(Token::Mul)) =
            (self.peek(), self.peek_nth(1), self.peek_nth(2))
        {
            let qualifier = w.value.clone();
            self.pos += 3;
            return Ok(SelectItem::QualifiedWildcard(qualifier));
        }
        if let Some(func) = self.peek_aggregate() {
            self.pos += 2; // name + '('
            let arg = if self.consume(&Token::Mul) {
                if func != AggregateFunc::Count {
                    return Err(TdbError::invalid_query(format!(
                        "{}(*) is not supported",
                        func
                    )));
                }
                None
            } else {
                Some(self.parse_column_ref()?)
            };
            self.expect_token(&Token::RParen)?;
            let alias = self.parse_optional_alias()?;
            return Ok(SelectItem::Aggregate { func, arg, alias });
        }
        let column = self.parse_column_ref()?;
        let alias = self.parse_optional_alias()?;
        Ok(SelectItem::Column { column, alias })
    }

    fn peek_aggregate(&self) -> Option<AggregateFunc> {
        let word = match self.peek() {
            Some(Token::Word(w)) if w.quote_style.is_none() => w,
            _ => return None,
        };
        if self.peek_nth(1) != Some(&Token::LParen) {
            return None;
        }
        match word.value.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateFunc::Count),
            "SUM" => Some(AggregateFunc::Sum),
            "AVG" => Some(AggregateFunc::Avg),
            "MIN" => Some(AggregateFunc::Min),
            "MAX" => Some(AggregateFunc::Max),
            _ => None,
        }
    }

    fn parse_table_ref(&mut self) -> TdbResult<TableRef> {
        let name = self.parse_identifier()?;
        let alias = self.parse_optional_alias()?;
        Ok(TableRef { name, alias })
    }

    fn parse_join(&mut self) -> TdbResult<Option<Join>> {
        let kind = if self.parse_keyword("LEFT") {
            JoinKind::Left
        } else if self.parse_keyword("RIGHT") {
            JoinKind::Right
        } else if self.parse_keyword("INNER") {
            JoinKind::Inner
        } else if self.peek_keyword("JOIN") {
            JoinKind::Inner
        } else {
            return Ok(None);
        };
        self.parse_keyword("OUTER");
        self.expect_keyword("JOIN")?;
        let table = self.parse_table_ref()?;
        self.expect_keyword("ON")?;
        let left = self.parse_column_ref()?;
        if !(self.consume(&Token::Eq) || self.consume(&Token::DoubleEq)) {
            return self.expected("= in JOIN condition");
        }
        let right = self.parse_column_ref()?;
        if self.peek_keyword("JOIN") || self.peek_keyword("LEFT") || self.peek_keyword("RIGHT") {
            return Err(TdbError::invalid_query("only one JOIN is supported"));
        }
        Ok(Some(Join {
            kind,
            table,
            left,
            right,
        }))
    }

    fn parse_column_ref(&mut self) -> TdbResult<ColumnRef> {
        let first = self.parse_identifier()?;
        if self.consume(&Token::Period) {
            let name = self.parse_identifier()?;
            Ok(ColumnRef::qualified(first, name))
        } else {
            Ok(ColumnRef::bare(first))
        }
    }

    // ===== Predicates =====

    pub fn parse_predicate(&mut self) -> TdbResult<Predicate> {
        let mut left = self.parse_and()?;
        while self.parse_keyword("OR") {
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> TdbResult<Predicate> {
        let mut left = self.parse_not()?;
        while self.parse_keyword("AND") {
            let right = self.parse_not()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> TdbResult<Predicate> {
        if self.parse_keyword("NOT") {
            return Ok(Predicate::Not(Box::new(self.parse_not()?)));
        }
        self.parse_condition()
    }

    fn parse_condition(&mut self) -> TdbResult<Predicate> {
        if self.consume(&Token::LParen) {
            let inner = self.parse_predicate()?;
            self.expect_token(&Token::RParen)?;
            return Ok(inner);
        }

        let operand = self.parse_operand()?;

        if self.parse_keyword("IS") {
            let negated = self.parse_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Predicate::IsNull { operand, negated });
        }

        let negated = self.parse_keyword("NOT");
        if self.parse_keyword("LIKE") {
            let pattern = self.parse_operand()?;
            return Ok(Predicate::Like {
                operand,
                pattern,
                negated,
            });
        }
        if self.parse_keyword("IN") {
            self.expect_token(&Token::LParen)?;
            let mut list = vec![self.parse_operand()?];
            while self.consume(&Token::Comma) {
                list.push(self.parse_operand()?);
            }
            self.expect_token(&Token::RParen)?;
            return Ok(Predicate::InList {
                operand,
                list,
                negated,
            });
        }
        if negated {
            return self.expected("LIKE or IN after NOT");
        }

        let op = match self.peek() {
            Some(Token::Eq | Token::DoubleEq) => CompareOp::Eq,
            Some(Token::Neq) => CompareOp::NotEq,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::LtEq) => CompareOp::LtEq,
            Some(Token::GtEq) => CompareOp::GtEq,
            _ => return self.expected("comparison operator"),
        };
        self.pos += 1;
        let right = self.parse_operand()?;
        Ok(Predicate::Compare {
            left: operand,
            op,
            right,
        })
    }

    fn parse_operand(&mut self) -> TdbResult<Operand> {
        match self.peek() {
            Some(Token::Word(w))
                if w.quote_style.is_none()
                    && ["NULL", "TRUE", "FALSE"]
                        .iter()
                        .any(|k| w.value.eq_ignore_ascii_case(k)) =>
            {
                self.parse_literal().map(Operand::Literal)
            }
            Some(Token::Word(_)) => self.parse_column_ref().map(Operand::Column),
            _ => self.parse_literal().map(Operand::Literal),
        }
    }

    fn parse_literal(&mut self) -> TdbResult<Value> {
        let negative = if self.consume(&Token::Minus) {
            true
        } else {
            self.consume(&Token::Plus);
            false
        };
        match self.next_token() {
            Some(Token::Number(n, _)) => {
                let text = if negative { format!("-{}", n) } else { n };
                if let Ok(i) = text.parse::<i64>() {
                    return Ok(Value::Int(i));
                }
                text.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| TdbError::invalid_query(format!("bad number '{}'", text)))
            }
            Some(Token::SingleQuotedString(s)) if !negative => Ok(Value::Text(s)),
            Some(Token::Word(w)) if !negative && w.quote_style.is_none() => {
                match w.value.to_ascii_uppercase().as_str() {
                    "NULL" => Ok(Value::Null),
                    "TRUE" => Ok(Value::Bool(true)),
                    "FALSE" => Ok(Value::Bool(false)),
                    _ => {
                        self.pos -= 1;
                        self.expected("literal value")
                    }
                }
            }
            Some(_) => {
                self.pos -= 1;
                self.expected("literal value")
            }
            None => self.expected("literal value"),
        }
    }
}

/// Parse one statement.
pub fn parse_statement(sql: &str) -> TdbResult<Statement> {
    SqlParser::parse_sql(sql)
}

/// Parse a standalone WHERE-style predicate.
pub fn parse_predicate(text: &str) -> TdbResult<Predicate> {
    SqlParser::parse_predicate_str(text)
}
