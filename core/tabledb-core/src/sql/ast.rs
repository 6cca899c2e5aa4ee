//! SQL 문장 AST: one variant per accepted statement shape.

use crate::auth::Permission;
use crate::storage::ForeignKey;
use crate::value::{ColumnType, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTable),
    /// `ALTER TABLE t ADD [COLUMN] c type`
    AlterTableAdd {
        table: String,
        column: String,
        ty: ColumnType,
    },
    DropTable {
        table: String,
        if_exists: bool,
    },
    /// `CREATE INDEX name ON t (col)`
    CreateIndex {
        name: String,
        table: String,
        column: String,
    },
    Insert(Insert),
    Select(Select),
    Update(Update),
    Delete(Delete),
    ShowTables,
    Describe {
        table: String,
    },
    CreateDatabase {
        name: String,
    },
    DropDatabase {
        name: String,
    },
    ShowDatabases,
    Use {
        database: String,
    },
}

impl Statement {
    /// Permission the acting user must hold.
    pub fn permission(&self) -> Permission {
        match self {
            Statement::Select(_)
            | Statement::ShowTables
            | Statement::Describe { .. }
            | Statement::ShowDatabases
            | Statement::Use { .. } => Permission::Select,
            Statement::Insert(_) => Permission::Insert,
            Statement::Update(_) => Permission::Update,
            Statement::Delete(_) => Permission::Delete,
            Statement::CreateTable(_)
            | Statement::CreateIndex { .. }
            | Statement::CreateDatabase { .. } => Permission::Create,
            Statement::AlterTableAdd { .. } => Permission::Alter,
            Statement::DropTable { .. } | Statement::DropDatabase { .. } => Permission::Drop,
        }
    }

    /// Whether the statement runs without a selected database.
    pub fn is_database_level(&self) -> bool {
        matches!(
            self,
            Statement::CreateDatabase { .. }
                | Statement::DropDatabase { .. }
                | Statement::ShowDatabases
                | Statement::Use { .. }
        )
    }

    /// Whether the statement changes table contents or schema.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Statement::Select(_)
                | Statement::ShowTables
                | Statement::Describe { .. }
                | Statement::ShowDatabases
                | Statement::Use { .. }
        )
    }
}

/// `DEFAULT` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Literal(Value),
    CurrentTimestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub not_null: bool,
    pub default: Option<DefaultValue>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key: false,
            autoincrement: false,
            not_null: false,
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub name: String,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDef>,
    /// Table-level `PRIMARY KEY(...)`.
    pub primary_key: Vec<String>,
    /// `INDEX(...)` columns.
    pub indexes: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    /// `None` means every schema column in order.
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Value>>,
}

/// `col` or `qualifier.col`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnRef),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::LtEq => "<=",
            CompareOp::GtEq => ">=",
        };
        f.write_str(op)
    }
}

/// WHERE 조건 트리
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Like {
        operand: Operand,
        pattern: Operand,
        negated: bool,
    },
    InList {
        operand: Operand,
        list: Vec<Operand>,
        negated: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Every column the predicate reads.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        fn push<'a>(operand: &'a Operand, out: &mut Vec<&'a ColumnRef>) {
            if let Operand::Column(c) = operand {
                out.push(c);
            }
        }
        match self {
            Predicate::Compare { left, right, .. } => {
                push(left, out);
                push(right, out);
            }
            Predicate::Like {
                operand, pattern, ..
            } => {
                push(operand, out);
                push(pattern, out);
            }
            Predicate::InList { operand, list, .. } => {
                push(operand, out);
                for item in list {
                    push(item, out);
                }
            }
            Predicate::IsNull { operand, .. } => push(operand, out),
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
            Predicate::Not(p) => p.collect_columns(out),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Wildcard,
    /// `t.*`
    QualifiedWildcard(String),
    Column {
        column: ColumnRef,
        alias: Option<String>,
    },
    /// `arg == None` is `COUNT(*)`.
    Aggregate {
        func: AggregateFunc,
        arg: Option<ColumnRef>,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// Name columns of this table are qualified with.
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

/// Single equality join `ON a.c = b.c`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: TableRef,
    pub join: Option<Join>,
    pub filter: Option<Predicate>,
    pub group_by: Vec<ColumnRef>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub filter: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: Option<Predicate>,
}
