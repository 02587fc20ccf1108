use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Which reservations a `SELECT ... FROM reservations` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationQuery {
    ById(Ulid),
    PendingForHost(Ulid),
    PendingForGuest(Ulid),
    ActiveForHost(Ulid),
    ActiveForGuest(Ulid),
    PendingForAccommodation(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertWindow {
        accommodation_id: Ulid,
        price: i64,
        start: Ms,
        end: Ms,
    },
    UpdateWindow {
        id: Ulid,
        start: Ms,
        end: Ms,
    },
    SelectWindows {
        accommodation_id: Ulid,
    },
    InsertReservation(ReserveRequest),
    AcceptReservation {
        id: Ulid,
    },
    DeclineReservation {
        id: Ulid,
    },
    /// `DELETE` is a guest cancellation; the row survives as `declined`.
    CancelReservation {
        id: Ulid,
    },
    SelectReservations(ReservationQuery),
    SelectQuotes {
        accommodation_ids: Vec<Ulid>,
        start: Ms,
        end: Ms,
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
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        // (accommodation_id, price, start, "end")
        "windows" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("windows", 4, values.len()));
            }
            Ok(Command::InsertWindow {
                accommodation_id: parse_ulid_expr(&values[0])?,
                price: parse_i64_expr(&values[1])?,
                start: parse_i64_expr(&values[2])?,
                end: parse_i64_expr(&values[3])?,
            })
        }
        // (accommodation_id, guest_id, host_id, guest_count, start, "end")
        "reservations" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("reservations", 6, values.len()));
            }
            Ok(Command::InsertReservation(ReserveRequest {
                accommodation_id: parse_ulid_expr(&values[0])?,
                guest_id: parse_ulid_expr(&values[1])?,
                host_id: parse_ulid_expr(&values[2])?,
                guest_count: parse_u32(&values[3])?,
                start: parse_i64_expr(&values[4])?,
                end: parse_i64_expr(&values[5])?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &a.value));
    }
    let lookup = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, v)| *v);

    match table.as_str() {
        "windows" => {
            let start = lookup("start").ok_or(SqlError::MissingAssignment("start"))?;
            let end = lookup("end").ok_or(SqlError::MissingAssignment("end"))?;
            Ok(Command::UpdateWindow {
                id,
                start: parse_i64_expr(start)?,
                end: parse_i64_expr(end)?,
            })
        }
        "reservations" => {
            let status = lookup("status").ok_or(SqlError::MissingAssignment("status"))?;
            match parse_string_expr(status)?.to_lowercase().as_str() {
                "accepted" => Ok(Command::AcceptReservation { id }),
                "declined" => Ok(Command::DeclineReservation { id }),
                other => Err(SqlError::BadStatus(other.to_string())),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::CancelReservation { id }),
        "windows" => Err(SqlError::Unsupported("windows cannot be deleted".into())),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column predicates collected from a `WHERE` clause joined by `AND`.
#[derive(Debug, Default)]
struct Filters {
    id: Option<Ulid>,
    accommodation_ids: Vec<Ulid>,
    host_id: Option<Ulid>,
    guest_id: Option<Ulid>,
    status: Option<String>,
    start: Option<Ms>,
    end: Option<Ms>,
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

    let mut f = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut f)?;
    }

    match table.as_str() {
        "windows" => Ok(Command::SelectWindows {
            accommodation_id: single_accommodation(&f)?,
        }),
        "reservations" => parse_reservation_query(f).map(Command::SelectReservations),
        "quotes" => {
            if f.accommodation_ids.is_empty() {
                return Err(SqlError::MissingFilter("accommodation_id"));
            }
            Ok(Command::SelectQuotes {
                accommodation_ids: f.accommodation_ids,
                start: f.start.ok_or(SqlError::MissingFilter("start"))?,
                end: f.end.ok_or(SqlError::MissingFilter("end"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_reservation_query(f: Filters) -> Result<ReservationQuery, SqlError> {
    if let Some(id) = f.id {
        return Ok(ReservationQuery::ById(id));
    }
    let status = f.status.clone().ok_or(SqlError::MissingFilter("status"))?;
    match status.as_str() {
        "pending" => {
            if let Some(host) = f.host_id {
                Ok(ReservationQuery::PendingForHost(host))
            } else if let Some(guest) = f.guest_id {
                Ok(ReservationQuery::PendingForGuest(guest))
            } else {
                single_accommodation(&f).map(ReservationQuery::PendingForAccommodation)
            }
        }
        "active" => {
            if let Some(host) = f.host_id {
                Ok(ReservationQuery::ActiveForHost(host))
            } else if let Some(guest) = f.guest_id {
                Ok(ReservationQuery::ActiveForGuest(guest))
            } else {
                Err(SqlError::MissingFilter("host_id or guest_id"))
            }
        }
        other => Err(SqlError::BadStatus(other.to_string())),
    }
}

fn single_accommodation(f: &Filters) -> Result<Ulid, SqlError> {
    match f.accommodation_ids.as_slice() {
        [id] => Ok(*id),
        _ => Err(SqlError::MissingFilter("accommodation_id")),
    }
}

fn extract_filters(expr: &Expr, f: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, f)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, f)?;
                extract_filters(right, f)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => f.id = Some(parse_ulid_expr(right)?),
                Some("accommodation_id") => f.accommodation_ids = vec![parse_ulid_expr(right)?],
                Some("host_id") => f.host_id = Some(parse_ulid_expr(right)?),
                Some("guest_id") => f.guest_id = Some(parse_ulid_expr(right)?),
                Some("status") => f.status = Some(parse_string_expr(right)?.to_lowercase()),
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    f.start = Some(parse_i64_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    f.end = Some(parse_i64_expr(right)?);
                }
            }
            _ => {}
        },
        Expr::InList {
            expr,
            list,
            negated: false,
        } => {
            if expr_column_name(expr).as_deref() == Some("accommodation_id") {
                f.accommodation_ids = list.iter().map(parse_ulid_expr).collect::<Result<_, _>>()?;
            }
        }
        _ => {}
    }
    Ok(())
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
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("missing SET {0}")]
    MissingAssignment(&'static str),
    #[error("unknown status: {0}")]
    BadStatus(String),
}
