use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::dates::{self, YearMonth};
use crate::model::BookingPatch;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertEquipment {
        id: String,
        name: String,
    },
    RenameEquipment {
        id: String,
        name: String,
    },
    InsertBooking {
        equipment_id: String,
        user_name: String,
        user_email: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    UpdateBooking {
        id: String,
        patch: BookingPatch,
    },
    ApproveReturn {
        id: String,
    },
    DeleteBooking {
        id: String,
    },
    ReportDamage {
        booking_id: String,
        description: String,
    },
    SelectEquipment,
    SelectBookings {
        equipment_id: Option<String>,
    },
    SelectDamageReports {
        equipment_id: String,
    },
    SelectOverdue,
    SelectPendingInspection,
    SelectCalendar {
        month: YearMonth,
    },
    SelectReminder {
        booking_id: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

const EQUIPMENT_COLUMNS: [&str; 2] = ["id", "name"];
const BOOKING_COLUMNS: [&str; 5] = ["equipment_id", "user_name", "user_email", "start_date", "end_date"];
const DAMAGE_COLUMNS: [&str; 2] = ["booking_id", "description"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "equipment" => {
            let [id, name] = arrange_insert_values("equipment", &EQUIPMENT_COLUMNS, insert, &values)?;
            Ok(Command::InsertEquipment {
                id: parse_string(id)?,
                name: parse_string(name)?,
            })
        }
        "bookings" => {
            let [equipment_id, user_name, user_email, start_date, end_date] =
                arrange_insert_values("bookings", &BOOKING_COLUMNS, insert, &values)?;
            Ok(Command::InsertBooking {
                equipment_id: parse_string(equipment_id)?,
                user_name: parse_string(user_name)?,
                user_email: parse_string(user_email)?,
                start_date: parse_date(start_date)?,
                end_date: parse_date(end_date)?,
            })
        }
        "damage_reports" => {
            let [booking_id, description] =
                arrange_insert_values("damage_reports", &DAMAGE_COLUMNS, insert, &values)?;
            Ok(Command::ReportDamage {
                booking_id: parse_string(booking_id)?,
                description: parse_string(description)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Put the VALUES row into `columns` order. Without a column list the row is
/// positional; with one, every listed name must be known and every column given.
fn arrange_insert_values<'a, const N: usize>(
    table: &'static str,
    columns: &[&'static str; N],
    insert: &ast::Insert,
    values: &'a [Expr],
) -> Result<[&'a Expr; N], SqlError> {
    let mut slots: [Option<&'a Expr>; N] = [None; N];

    if insert.columns.is_empty() {
        if values.len() < N {
            return Err(SqlError::WrongArity(table, N, values.len()));
        }
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = Some(value);
        }
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        for (ident, value) in insert.columns.iter().zip(values) {
            let name = ident.value.to_lowercase();
            let idx = columns
                .iter()
                .position(|c| *c == name)
                .ok_or_else(|| SqlError::UnknownColumn(name.clone()))?;
            if slots[idx].replace(value).is_some() {
                return Err(SqlError::Parse(format!("column {name} given twice")));
            }
        }
    }

    let arranged = slots
        .into_iter()
        .zip(columns)
        .map(|(slot, column)| slot.ok_or(SqlError::MissingColumn(*column)))
        .collect::<Result<Vec<_>, _>>()?;
    arranged
        .try_into()
        .map_err(|_| SqlError::Parse(format!("{table}: column count mismatch")))
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_eq(selection, "id")?;

    let mut sets = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => return Err(SqlError::Unsupported("tuple assignment".into())),
        };
        sets.push((column, &a.value));
    }

    match table.as_str() {
        "equipment" => match sets.as_slice() {
            [(col, value)] if col == "name" => Ok(Command::RenameEquipment {
                id,
                name: parse_string(value)?,
            }),
            _ => Err(SqlError::Unsupported("equipment: only name can be updated".into())),
        },
        "bookings" => {
            if let Some((_, value)) = sets.iter().find(|(col, _)| col == "is_checked") {
                if sets.len() != 1 {
                    return Err(SqlError::Unsupported(
                        "is_checked cannot be combined with other columns".into(),
                    ));
                }
                if !parse_bool(value)? {
                    return Err(SqlError::Unsupported("a returned booking cannot be reopened".into()));
                }
                return Ok(Command::ApproveReturn { id });
            }
            let mut patch = BookingPatch::default();
            for (col, value) in sets {
                match col.as_str() {
                    "equipment_id" => patch.equipment_id = Some(parse_string(value)?),
                    "user_name" => patch.user_name = Some(parse_string(value)?),
                    "user_email" => patch.user_email = Some(parse_string(value)?),
                    "start_date" => patch.start_date = Some(parse_date(value)?),
                    "end_date" => patch.end_date = Some(parse_date(value)?),
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::UpdateBooking { id, patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_eq(&delete.selection, "id")?;

    match table.as_str() {
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "equipment" => Ok(Command::SelectEquipment),
        "bookings" => Ok(Command::SelectBookings {
            equipment_id: optional_where_eq(&select.selection, "equipment_id")?,
        }),
        "damage_reports" => Ok(Command::SelectDamageReports {
            equipment_id: extract_where_eq(&select.selection, "equipment_id")?,
        }),
        "overdue" => Ok(Command::SelectOverdue),
        "pending_inspection" => Ok(Command::SelectPendingInspection),
        "calendar" => {
            let raw = extract_where_eq(&select.selection, "month")?;
            let month = raw.parse::<YearMonth>().map_err(SqlError::Parse)?;
            Ok(Command::SelectCalendar { month })
        }
        "reminders" => Ok(Command::SelectReminder {
            booking_id: extract_where_eq(&select.selection, "booking_id")?,
        }),
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row VALUES".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Value of `column = '…'` in a WHERE clause, searching through ANDs.
fn find_where_eq(expr: &Expr, column: &str) -> Result<Option<String>, SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => match find_where_eq(left, column)? {
            Some(v) => Ok(Some(v)),
            None => find_where_eq(right, column),
        },
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => parse_string(right).map(Some),
        Expr::Nested(inner) => find_where_eq(inner, column),
        _ => Ok(None),
    }
}

fn optional_where_eq(selection: &Option<Expr>, column: &'static str) -> Result<Option<String>, SqlError> {
    match selection {
        Some(sel) => match find_where_eq(sel, column)? {
            Some(v) => Ok(Some(v)),
            None => Err(SqlError::Unsupported(format!("only {column} can be filtered on"))),
        },
        None => Ok(None),
    }
}

fn extract_where_eq(selection: &Option<Expr>, column: &'static str) -> Result<String, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    find_where_eq(sel, column)?.ok_or(SqlError::MissingFilter(column))
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let raw = parse_string(expr)?;
    dates::revive_date(&raw).ok_or_else(|| SqlError::Parse(format!("bad date: {raw} (expected YYYY-MM-DD)")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingColumn(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
