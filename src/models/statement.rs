use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DdlDialect {
    /// Relational warehouse (Synapse T-SQL)
    Synapse,
    /// Distributed compute catalog (Spark SQL)
    Spark,
}

impl DdlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            DdlDialect::Synapse => "synapse",
            DdlDialect::Spark => "spark",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    DropIfExists,
    CreateTable,
    CreateExternalTable,
    CreateView,
    CreateStatistics,
}

impl StatementKind {
    /// The statement that defines the table's object (target of view-syntax overrides)
    pub fn is_primary_create(&self) -> bool {
        matches!(
            self,
            StatementKind::CreateTable | StatementKind::CreateExternalTable | StatementKind::CreateView
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlStatement {
    pub dialect: DdlDialect,
    pub kind: StatementKind,
    pub text: String,
    /// Originating table, used to correlate execution results
    pub table_name: String,
}

impl DdlStatement {
    pub fn new(
        dialect: DdlDialect,
        kind: StatementKind,
        table_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            kind,
            text: text.into(),
            table_name: table_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Succeeded,
    /// The object already exists; nothing to do
    Skipped { reason: String },
    Failed { error: String },
    /// Never sent: no driver is linked for the target
    #[serde(rename = "not_executed")]
    NotExecuted { reason: String },
}

/// Outcome of one statement; owned by whoever issued the statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub table_name: String,
    pub kind: StatementKind,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
    pub execution_time_ms: u64,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn new(statement: &DdlStatement, outcome: ExecutionOutcome, execution_time_ms: u64) -> Self {
        Self {
            table_name: statement.table_name.clone(),
            kind: statement.kind,
            outcome,
            execution_time_ms,
            executed_at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Failed { .. })
    }
}
