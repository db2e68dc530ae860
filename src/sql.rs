use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, TableWithJoins, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::ReactorFilter;
use crate::model::*;
use crate::period;

const REACTOR_COLUMNS: &[&str] = &[
    "serial_no",
    "max_capacity_liters",
    "capacity_range",
    "moc",
    "agitator_type",
    "plant_name",
    "block_name",
    "commission_date",
    "notes",
];

const COMMITMENT_COLUMNS: &[&str] = &[
    "id",
    "reactor",
    "team",
    "product_name",
    "stage",
    "batch_number",
    "operation",
    "start",
    "end",
    "status",
    "requested_by",
];

const WINDOW_COLUMNS: &[&str] = &[
    "id",
    "reactor",
    "category",
    "reason",
    "start",
    "end",
    "updated_by",
];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReactor {
        serial_no: String,
        spec: ReactorSpec,
    },
    UpdateReactor {
        serial_no: String,
        patch: ReactorPatch,
    },
    DeleteReactor {
        serial_no: String,
    },
    SelectReactors {
        filter: ReactorFilter,
    },
    InsertCommitment {
        id: Ulid,
        commitment: NewCommitment,
        status: CommitmentStatus,
    },
    DeleteCommitment {
        id: Ulid,
    },
    SelectCommitments {
        reactor: Option<String>,
    },
    InsertMaintenance {
        id: Ulid,
        window: NewMaintenanceWindow,
    },
    RescheduleMaintenance {
        id: Ulid,
        start: Ms,
        end: Ms,
        updated_by: Option<String>,
    },
    CancelMaintenance {
        id: Ulid,
        updated_by: Option<String>,
    },
    SelectMaintenance {
        reactor: Option<String>,
    },
    SelectOccupancy {
        start: Ms,
        end: Ms,
        filter: ReactorFilter,
    },
    SelectConflicts {
        reactor: String,
        start: Ms,
        end: Ms,
        status: Option<CommitmentStatus>,
        exclude: Option<Ulid>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row<'a> {
    table: &'static str,
    values: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.values.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    fn string_or_default(&self, col: &str) -> Result<String, SqlError> {
        self.get(col).map_or(Ok(String::new()), parse_string)
    }
}

/// Pair the single VALUES row with its column names: the explicit column
/// list when given, otherwise `columns` in order.
fn insert_row<'a>(
    insert: &'a ast::Insert,
    table: &'static str,
    columns: &[&str],
) -> Result<Row<'a>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let values = match rows.as_slice() {
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        [row] => row,
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };

    let names: Vec<String> = if insert.columns.is_empty() {
        if values.len() > columns.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        columns.iter().map(|c| c.to_string()).collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        let mut names = Vec::with_capacity(insert.columns.len());
        for ident in &insert.columns {
            let name = ident.value.to_lowercase();
            if !columns.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(table, name));
            }
            names.push(name);
        }
        names
    };

    Ok(Row {
        table,
        values: names.into_iter().zip(values.iter()).collect(),
    })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "reactors" => {
            let row = insert_row(insert, "reactors", REACTOR_COLUMNS)?;
            let spec = ReactorSpec {
                max_capacity_liters: row.get("max_capacity_liters").map_or(Ok(0), parse_u32)?,
                capacity_range: row.string_or_default("capacity_range")?,
                moc: row.string_or_default("moc")?,
                agitator_type: row.string_or_default("agitator_type")?,
                plant_name: row.string_or_default("plant_name")?,
                block_name: row.string_or_default("block_name")?,
                commission_date: row
                    .get("commission_date")
                    .map_or(Ok(None), parse_timestamp_or_null)?,
                notes: row.get("notes").map_or(Ok(None), parse_string_or_null)?,
            };
            Ok(Command::InsertReactor {
                serial_no: parse_string(row.require("serial_no")?)?,
                spec,
            })
        }
        "commitments" => {
            let row = insert_row(insert, "commitments", COMMITMENT_COLUMNS)?;
            let status = match row.get("status") {
                Some(expr) => parse_status(expr)?,
                None => CommitmentStatus::Proposed,
            };
            Ok(Command::InsertCommitment {
                id: row.get("id").map_or(Ok(Ulid::new()), parse_ulid)?,
                commitment: NewCommitment {
                    reactor: parse_string(row.require("reactor")?)?,
                    team: row.string_or_default("team")?,
                    product_name: row.string_or_default("product_name")?,
                    stage: row.string_or_default("stage")?,
                    batch_number: row.string_or_default("batch_number")?,
                    operation: row.string_or_default("operation")?,
                    start: parse_timestamp(row.require("start")?)?,
                    end: parse_timestamp(row.require("end")?)?,
                    requested_by: row.string_or_default("requested_by")?,
                },
                status,
            })
        }
        "maintenance_windows" => {
            let row = insert_row(insert, "maintenance_windows", WINDOW_COLUMNS)?;
            let category = match row.get("category") {
                Some(expr) => MaintenanceCategory::parse(&parse_string(expr)?),
                None => MaintenanceCategory::Maintenance,
            };
            Ok(Command::InsertMaintenance {
                id: row.get("id").map_or(Ok(Ulid::new()), parse_ulid)?,
                window: NewMaintenanceWindow {
                    reactor: parse_string(row.require("reactor")?)?,
                    category,
                    reason: row.string_or_default("reason")?,
                    start: parse_timestamp(row.require("start")?)?,
                    end: parse_timestamp(row.require("end")?)?,
                    updated_by: row.string_or_default("updated_by")?,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((col, &a.value));
    }

    match table.as_str() {
        "reactors" => {
            let serial_no = parse_string(extract_where_eq(selection, "serial_no")?)?;
            let mut patch = ReactorPatch::default();
            for (col, value) in set {
                match col.as_str() {
                    "max_capacity_liters" => patch.max_capacity_liters = Some(parse_u32(value)?),
                    "capacity_range" => patch.capacity_range = Some(parse_string(value)?),
                    "moc" => patch.moc = Some(parse_string(value)?),
                    "agitator_type" => patch.agitator_type = Some(parse_string(value)?),
                    "plant_name" => patch.plant_name = Some(parse_string(value)?),
                    "block_name" => patch.block_name = Some(parse_string(value)?),
                    "commission_date" => {
                        patch.commission_date = Some(parse_timestamp_or_null(value)?)
                    }
                    "notes" => patch.notes = Some(parse_string_or_null(value)?),
                    "serial_no" => {
                        return Err(SqlError::Unsupported("serial_no cannot be changed".into()));
                    }
                    _ => return Err(SqlError::UnknownColumn("reactors", col)),
                }
            }
            Ok(Command::UpdateReactor { serial_no, patch })
        }
        "maintenance_windows" => {
            let id = parse_ulid(extract_where_eq(selection, "id")?)?;
            let (mut start, mut end, mut cancelled, mut updated_by) = (None, None, None, None);
            for (col, value) in set {
                match col.as_str() {
                    "start" => start = Some(parse_timestamp(value)?),
                    "end" => end = Some(parse_timestamp(value)?),
                    "cancelled" => cancelled = Some(parse_bool(value)?),
                    "updated_by" => updated_by = Some(parse_string(value)?),
                    _ => {
                        return Err(SqlError::Unsupported(format!(
                            "cannot update maintenance_windows.{col}"
                        )));
                    }
                }
            }
            match (cancelled, start, end) {
                (Some(true), None, None) => Ok(Command::CancelMaintenance { id, updated_by }),
                (Some(false), ..) => Err(SqlError::Unsupported(
                    "a cancelled window cannot be restored".into(),
                )),
                (Some(true), ..) => Err(SqlError::Unsupported(
                    "cancel and reschedule in separate statements".into(),
                )),
                (None, Some(start), Some(end)) => Ok(Command::RescheduleMaintenance {
                    id,
                    start,
                    end,
                    updated_by,
                }),
                (None, None, _) => Err(SqlError::MissingColumn("maintenance_windows", "start")),
                (None, Some(_), None) => Err(SqlError::MissingColumn("maintenance_windows", "end")),
            }
        }
        "commitments" => Err(SqlError::Unsupported(
            "commitments cannot be edited; delete and re-propose".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "reactors" => Ok(Command::DeleteReactor {
            serial_no: parse_string(extract_where_eq(&delete.selection, "serial_no")?)?,
        }),
        "commitments" => Ok(Command::DeleteCommitment {
            id: parse_ulid(extract_where_eq(&delete.selection, "id")?)?,
        }),
        "maintenance_windows" => Err(SqlError::Unsupported(
            "maintenance windows are cancelled with UPDATE ... SET cancelled = true".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// `column <op> value` term of a conjunctive WHERE clause.
struct Filter<'a> {
    column: String,
    op: ast::BinaryOperator,
    value: &'a Expr,
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push(Filter {
                column,
                op: op.clone(),
                value: right,
            });
            Ok(())
        }
        Expr::Nested(inner) => collect_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn find_filter<'a>(filters: &[Filter<'a>], column: &str, op: ast::BinaryOperator) -> Option<&'a Expr> {
    filters
        .iter()
        .find(|f| f.column == column && f.op == op)
        .map(|f| f.value)
}

fn eq_filter<'a>(filters: &[Filter<'a>], column: &str) -> Option<&'a Expr> {
    find_filter(filters, column, ast::BinaryOperator::Eq)
}

fn reactor_filter(filters: &[Filter<'_>]) -> Result<ReactorFilter, SqlError> {
    Ok(ReactorFilter {
        plant_name: eq_filter(filters, "plant_name").map(parse_string).transpose()?,
        block_name: eq_filter(filters, "block_name").map(parse_string).transpose()?,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }
    let reactor = || eq_filter(&filters, "reactor").map(parse_string).transpose();

    match table.as_str() {
        "reactors" => Ok(Command::SelectReactors {
            filter: reactor_filter(&filters)?,
        }),
        "commitments" => Ok(Command::SelectCommitments { reactor: reactor()? }),
        "maintenance_windows" => Ok(Command::SelectMaintenance { reactor: reactor()? }),
        "occupancy" => {
            let (start, end) = if let Some(month) = eq_filter(&filters, "month") {
                let text = parse_string(month)?;
                let span = period::parse_month(&text)
                    .ok_or_else(|| SqlError::Parse(format!("bad month: {text} (expected YYYY-MM)")))?;
                (span.start, span.end)
            } else {
                let start = find_filter(&filters, "start", ast::BinaryOperator::GtEq)
                    .ok_or(SqlError::MissingFilter("month or start"))?;
                let end = find_filter(&filters, "end", ast::BinaryOperator::LtEq)
                    .ok_or(SqlError::MissingFilter("end"))?;
                (parse_timestamp(start)?, parse_timestamp(end)?)
            };
            Ok(Command::SelectOccupancy {
                start,
                end,
                filter: reactor_filter(&filters)?,
            })
        }
        "conflicts" => {
            let required = |col: &'static str| eq_filter(&filters, col).ok_or(SqlError::MissingFilter(col));
            Ok(Command::SelectConflicts {
                reactor: parse_string(required("reactor")?)?,
                start: parse_timestamp(required("start")?)?,
                end: parse_timestamp(required("end")?)?,
                status: eq_filter(&filters, "status").map(parse_status).transpose()?,
                exclude: eq_filter(&filters, "exclude_id").map(parse_ulid).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// The value of `WHERE <column> = <value>`.
fn extract_where_eq<'a>(selection: &'a Option<Expr>, column: &'static str) -> Result<&'a Expr, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some(column) => Ok(right),
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_string(expr).map(Some)
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = parse_string(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// Integer milliseconds or an ISO 8601 string.
fn parse_timestamp(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => period::parse_timestamp(s)
            .ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}"))),
        _ => parse_i64(expr),
    }
}

fn parse_timestamp_or_null(expr: &Expr) -> Result<Option<Ms>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_timestamp(expr).map(Some)
    }
}

fn parse_status(expr: &Expr) -> Result<CommitmentStatus, SqlError> {
    let s = parse_string(expr)?;
    CommitmentStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown status: {s}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {t}.{c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_reactor_named() {
        let sql = "INSERT INTO reactors (serial_no, plant_name, max_capacity_liters, moc) \
                   VALUES ('R-101', 'Plant A', 2500, 'SS316')";
        match parse_sql(sql).unwrap() {
            Command::InsertReactor { serial_no, spec } => {
                assert_eq!(serial_no, "R-101");
                assert_eq!(spec.plant_name, "Plant A");
                assert_eq!(spec.max_capacity_liters, 2500);
                assert_eq!(spec.moc, "SS316");
                assert_eq!(spec.block_name, "");
                assert_eq!(spec.notes, None);
            }
            cmd => panic!("expected InsertReactor, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reactor_positional() {
        let sql = "INSERT INTO reactors VALUES ('R-7', 1000, '500-1000 L', 'GLR', 'Anchor', \
                   'Plant B', 'Block 1', '2019-06-01', NULL)";
        match parse_sql(sql).unwrap() {
            Command::InsertReactor { serial_no, spec } => {
                assert_eq!(serial_no, "R-7");
                assert_eq!(spec.agitator_type, "Anchor");
                assert_eq!(spec.block_name, "Block 1");
                assert_eq!(spec.commission_date, period::parse_timestamp("2019-06-01"));
                assert_eq!(spec.notes, None);
            }
            cmd => panic!("expected InsertReactor, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_reactor() {
        let sql = "UPDATE reactors SET block_name = 'Block 3', notes = NULL WHERE serial_no = 'R-101'";
        match parse_sql(sql).unwrap() {
            Command::UpdateReactor { serial_no, patch } => {
                assert_eq!(serial_no, "R-101");
                assert_eq!(patch.block_name.as_deref(), Some("Block 3"));
                assert_eq!(patch.notes, Some(None));
                assert_eq!(patch.plant_name, None);
            }
            cmd => panic!("expected UpdateReactor, got {cmd:?}"),
        }
    }

    #[test]
    fn update_reactor_serial_rejected() {
        let sql = "UPDATE reactors SET serial_no = 'R-2' WHERE serial_no = 'R-1'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_delete_reactor() {
        let cmd = parse_sql("DELETE FROM reactors WHERE serial_no = 'R-101'").unwrap();
        assert_eq!(cmd, Command::DeleteReactor { serial_no: "R-101".into() });
    }

    #[test]
    fn parse_insert_commitment_iso_timestamps() {
        let sql = format!(
            r#"INSERT INTO commitments (id, reactor, product_name, start, "end", status)
               VALUES ('{ID}', 'R-101', 'API-7', '2026-03-01T08:00:00Z', '2026-03-01T20:00:00Z', 'Actual')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertCommitment { id, commitment, status } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(commitment.reactor, "R-101");
                assert_eq!(commitment.product_name, "API-7");
                assert_eq!(commitment.end - commitment.start, 12 * HOUR_MS);
                assert_eq!(status, CommitmentStatus::Confirmed);
            }
            cmd => panic!("expected InsertCommitment, got {cmd:?}"),
        }
    }

    #[test]
    fn commitment_defaults_to_proposed_with_fresh_id() {
        let sql = r#"INSERT INTO commitments (reactor, start, "end") VALUES ('R-101', 1000, 2000)"#;
        match parse_sql(sql).unwrap() {
            Command::InsertCommitment { commitment, status, .. } => {
                assert_eq!(status, CommitmentStatus::Proposed);
                assert_eq!((commitment.start, commitment.end), (1000, 2000));
                assert_eq!(commitment.team, "");
            }
            cmd => panic!("expected InsertCommitment, got {cmd:?}"),
        }
    }

    #[test]
    fn commitment_positional_order() {
        let sql = format!(
            "INSERT INTO commitments VALUES ('{ID}', 'R-101', 'Mfg', 'API-7', 'S2', 'B-42', \
             'Crystallization', 1000, 2000, 'Proposed', 'planner@example.com')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertCommitment { commitment, .. } => {
                assert_eq!(commitment.team, "Mfg");
                assert_eq!(commitment.batch_number, "B-42");
                assert_eq!(commitment.operation, "Crystallization");
                assert_eq!(commitment.requested_by, "planner@example.com");
            }
            cmd => panic!("expected InsertCommitment, got {cmd:?}"),
        }
    }

    #[test]
    fn commitment_missing_reactor() {
        let sql = r#"INSERT INTO commitments (start, "end") VALUES (1000, 2000)"#;
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("commitments", "reactor"))
        ));
    }

    #[test]
    fn unknown_status_errors() {
        let sql = r#"INSERT INTO commitments (reactor, start, "end", status) VALUES ('R-1', 1, 2, 'Maybe')"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn unknown_column_errors() {
        let sql = "INSERT INTO reactors (serial_no, colour) VALUES ('R-1', 'blue')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn("reactors", _))));
    }

    #[test]
    fn arity_mismatch_errors() {
        let sql = "INSERT INTO reactors (serial_no, moc) VALUES ('R-1')";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity("reactors", 2, 1))));
    }

    #[test]
    fn parse_delete_commitment() {
        let cmd = parse_sql(&format!("DELETE FROM commitments WHERE id = '{ID}'")).unwrap();
        assert!(matches!(cmd, Command::DeleteCommitment { id } if id.to_string() == ID));
    }

    #[test]
    fn parse_insert_maintenance() {
        let sql = format!(
            r#"INSERT INTO maintenance_windows (id, reactor, category, reason, start, "end", updated_by)
               VALUES ('{ID}', 'R-101', 'Cleaning', 'CIP', 5000, 9000, 'ops@example.com')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertMaintenance { window, .. } => {
                assert_eq!(window.category, MaintenanceCategory::Cleaning);
                assert_eq!(window.reason, "CIP");
                assert_eq!((window.start, window.end), (5000, 9000));
            }
            cmd => panic!("expected InsertMaintenance, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_reschedule() {
        let sql = format!(
            r#"UPDATE maintenance_windows SET start = 7000, "end" = 8000 WHERE id = '{ID}'"#
        );
        match parse_sql(&sql).unwrap() {
            Command::RescheduleMaintenance { start, end, updated_by, .. } => {
                assert_eq!((start, end), (7000, 8000));
                assert_eq!(updated_by, None);
            }
            cmd => panic!("expected RescheduleMaintenance, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_cancel() {
        let sql = format!(
            "UPDATE maintenance_windows SET cancelled = true, updated_by = 'ops' WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::CancelMaintenance { updated_by, .. } => {
                assert_eq!(updated_by.as_deref(), Some("ops"));
            }
            cmd => panic!("expected CancelMaintenance, got {cmd:?}"),
        }
    }

    #[test]
    fn reschedule_requires_both_bounds() {
        let sql = format!("UPDATE maintenance_windows SET start = 7000 WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("maintenance_windows", "end"))
        ));
    }

    #[test]
    fn uncancel_rejected() {
        let sql = format!("UPDATE maintenance_windows SET cancelled = false WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn commitments_cannot_be_updated() {
        let sql = format!("UPDATE commitments SET team = 'QA' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_lists() {
        assert_eq!(
            parse_sql("SELECT * FROM commitments WHERE reactor = 'R-101'").unwrap(),
            Command::SelectCommitments { reactor: Some("R-101".into()) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM maintenance_windows").unwrap(),
            Command::SelectMaintenance { reactor: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM reactors WHERE plant_name = 'Plant A'").unwrap(),
            Command::SelectReactors {
                filter: ReactorFilter {
                    plant_name: Some("Plant A".into()),
                    block_name: None,
                }
            }
        );
    }

    #[test]
    fn parse_select_occupancy_month() {
        let cmd = parse_sql("SELECT * FROM occupancy WHERE month = '2026-03' AND block_name = 'B1'").unwrap();
        match cmd {
            Command::SelectOccupancy { start, end, filter } => {
                assert_eq!((end - start) / HOUR_MS, 744);
                assert_eq!(filter.block_name.as_deref(), Some("B1"));
                assert_eq!(filter.plant_name, None);
            }
            cmd => panic!("expected SelectOccupancy, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_occupancy_range() {
        let cmd = parse_sql(r#"SELECT * FROM occupancy WHERE start >= 0 AND "end" <= 36000000"#).unwrap();
        assert_eq!(
            cmd,
            Command::SelectOccupancy {
                start: 0,
                end: 36_000_000,
                filter: ReactorFilter::default(),
            }
        );
    }

    #[test]
    fn occupancy_requires_period() {
        assert!(matches!(
            parse_sql("SELECT * FROM occupancy"),
            Err(SqlError::MissingFilter(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM occupancy WHERE month = 'March'"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn parse_select_conflicts() {
        let sql = format!(
            r#"SELECT * FROM conflicts WHERE reactor = 'R-101' AND start = 1000 AND "end" = 2000
               AND status = 'Confirmed' AND exclude_id = '{ID}'"#
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectConflicts { reactor, start, end, status, exclude } => {
                assert_eq!(reactor, "R-101");
                assert_eq!((start, end), (1000, 2000));
                assert_eq!(status, Some(CommitmentStatus::Confirmed));
                assert_eq!(exclude.map(|u| u.to_string()).as_deref(), Some(ID));
            }
            cmd => panic!("expected SelectConflicts, got {cmd:?}"),
        }
    }

    #[test]
    fn conflicts_require_window() {
        let sql = "SELECT * FROM conflicts WHERE reactor = 'R-101' AND start = 1000";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("end"))));
    }

    #[test]
    fn negative_timestamp_parses() {
        let sql = r#"SELECT * FROM conflicts WHERE reactor = 'R' AND start = -5 AND "end" = 5"#;
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::SelectConflicts { start: -5, end: 5, .. }
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
