//! Statement vocabulary shared by the pool, the cache and the drivers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Value;

/// The kind of statement a connection produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Ad-hoc statement; SQL text is supplied on each execute call
    Plain,
    /// Precompiled statement with `?` placeholders
    Prepared,
    /// Stored procedure call
    Callable,
}

impl StatementKind {
    /// Name of the connection operation that creates this kind of statement.
    pub fn create_method(&self) -> &'static str {
        match self {
            StatementKind::Plain => "create_statement",
            StatementKind::Prepared => "prepare_statement",
            StatementKind::Callable => "prepare_call",
        }
    }
}

/// Extra argument passed when a statement is created
///
/// Mirrors the overloads drivers offer for statement creation: result set
/// type/concurrency/holdability flags, generated-key requests by index or
/// by column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrepareArg {
    Int(i32),
    Ints(Vec<i32>),
    Text(String),
    Texts(Vec<String>),
}

/// Cache identity of a statement creation call
///
/// Two calls are cache-equivalent only when kind, method, SQL text and
/// creation arguments are all equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementKey {
    kind: StatementKind,
    method: &'static str,
    sql: String,
    args: Vec<PrepareArg>,
}

impl StatementKey {
    pub fn new(
        kind: StatementKind,
        method: &'static str,
        sql: impl Into<String>,
        args: Vec<PrepareArg>,
    ) -> Self {
        Self {
            kind,
            method,
            sql: sql.into(),
            args,
        }
    }

    /// Key for a plain statement; plain statements carry no SQL text.
    pub fn plain(args: Vec<PrepareArg>) -> Self {
        Self::new(
            StatementKind::Plain,
            StatementKind::Plain.create_method(),
            String::new(),
            args,
        )
    }

    pub fn prepared(sql: impl Into<String>, args: Vec<PrepareArg>) -> Self {
        Self::new(
            StatementKind::Prepared,
            StatementKind::Prepared.create_method(),
            sql,
            args,
        )
    }

    pub fn callable(sql: impl Into<String>, args: Vec<PrepareArg>) -> Self {
        Self::new(
            StatementKind::Callable,
            StatementKind::Callable.create_method(),
            sql,
            args,
        )
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[PrepareArg] {
        &self.args
    }
}

impl fmt::Display for StatementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?}", self.method, self.sql)?;
        if !self.args.is_empty() {
            write!(f, ", {:?}", self.args)?;
        }
        write!(f, ")")
    }
}

/// The execute operation invoked on a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMethod {
    /// Generic execute; the driver decides whether rows or a count come back
    Execute,
    /// Execute returning a result cursor
    ExecuteQuery,
    /// Execute returning an update count
    ExecuteUpdate,
}

impl ExecuteMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ExecuteMethod::Execute => "execute",
            ExecuteMethod::ExecuteQuery => "execute_query",
            ExecuteMethod::ExecuteUpdate => "execute_update",
        }
    }
}

/// One parameter binding call, recorded in call order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    /// Logical setter name, e.g. `set_string`
    pub setter: String,
    /// 1-based parameter index
    pub index: usize,
    pub value: Value,
}

impl BoundParam {
    pub fn new(setter: impl Into<String>, index: usize, value: Value) -> Self {
        Self {
            setter: setter.into(),
            index,
            value,
        }
    }
}

impl fmt::Display for BoundParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.setter, self.index, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn test_keys_equal_only_when_every_field_matches() {
        let a = StatementKey::prepared("select * from t where id = ?", vec![]);
        let b = StatementKey::prepared("select * from t where id = ?", vec![]);
        assert_eq!(a, b);

        let other_sql = StatementKey::prepared("select * from t", vec![]);
        let other_kind = StatementKey::callable("select * from t where id = ?", vec![]);
        let other_args =
            StatementKey::prepared("select * from t where id = ?", vec![PrepareArg::Int(1)]);
        let other_method = StatementKey::new(
            StatementKind::Prepared,
            "prepare_statement_keys",
            "select * from t where id = ?",
            vec![],
        );

        let keys: HashSet<_> = [a, b, other_sql, other_kind, other_args, other_method]
            .into_iter()
            .collect();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn test_plain_key_has_no_sql() {
        let key = StatementKey::plain(vec![]);
        assert_eq!(key.kind(), StatementKind::Plain);
        assert_eq!(key.method(), "create_statement");
        assert_eq!(key.sql(), "");
    }

    #[test]
    fn test_bound_param_display() {
        let param = BoundParam::new("set_string", 1, Value::from("street"));
        assert_eq!(param.to_string(), "set_string(1, street)");
    }
}
