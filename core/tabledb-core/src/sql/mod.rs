// SQL 모듈 진입점
pub mod ast;
pub mod executor;
pub mod lexer;
pub mod parser;

pub use ast::{
    AggregateFunc, ColumnDef, ColumnRef, CompareOp, Delete, Insert, Join, JoinKind, Operand,
    OrderBy, Predicate, Select, SelectItem, Statement, TableRef, Update,
};
pub use executor::{QueryExecutor, QueryResult, QueryStatus};
pub use lexer::split_statements;
pub use parser::{SqlParser, parse_predicate, parse_statement};
