use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::limits::MAX_SQL_LEN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: ObjectId,
        name: String,
        role: Role,
    },
    InsertLeave {
        stylist_id: ObjectId,
        date: NaiveDate,
    },
    InsertAppointment {
        client_id: ObjectId,
        stylist_id: ObjectId,
        date: NaiveDate,
        slot_number: i64,
    },
    /// The id stays raw: resolving it is part of the transition.
    UpdateAppointmentStatus {
        id: String,
        decision: Decision,
    },
    SelectAppointment {
        id: String,
    },
    SelectAllAppointments,
    SelectPendingForClient {
        client_id: ObjectId,
    },
    SelectApprovedForClient {
        client_id: ObjectId,
    },
    SelectRequestedForStylist {
        stylist_id: ObjectId,
    },
    SelectUpcomingForStylist {
        stylist_id: ObjectId,
    },
    SelectAvailableSlots {
        stylist_id: ObjectId,
        date: NaiveDate,
    },
    SelectAvailableStylists {
        date: NaiveDate,
    },
    SelectStylists,
    InsertService {
        name: String,
        duration: i64,
        price: i64,
        image_url: Option<String>,
    },
    UpdateService {
        id: String,
        patch: ServicePatch,
    },
    DeleteService {
        id: String,
    },
    SelectService {
        id: String,
    },
    SelectServices,
}

/// The status changes a client may request through `UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
    Cancel,
}

/// Columns a statement returns, known before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Empty,
    Booking,
    Appointments,
    Slots,
    Stylists,
    Services,
}

const USER_COLUMNS: [&str; 3] = ["id", "name", "role"];
const LEAVE_COLUMNS: [&str; 2] = ["stylist_id", "date"];
const APPOINTMENT_COLUMNS: [&str; 4] = ["client_id", "stylist_id", "date", "slot_number"];
const SERVICE_COLUMNS: [&str; 3] = ["name", "duration", "price"];
const SERVICE_OPTIONAL_COLUMNS: [&str; 1] = ["image_url"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match parse_statement(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table, &assignments, &selection),
        Statement::Delete(delete) => parse_delete(&delete),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result columns for `sql` without executing it. Placeholders are fine here,
/// so this serves the extended protocol's describe step.
pub fn result_shape(sql: &str) -> ResultShape {
    let Ok(stmt) = parse_statement(sql) else {
        return ResultShape::Empty;
    };
    let table = match &stmt {
        Statement::Insert(insert) => insert_table_name(insert).ok(),
        Statement::Update { table, .. } => table_factor_name(&table.relation).ok(),
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(s) => s.from.first().and_then(|t| table_factor_name(&t.relation).ok()),
            _ => None,
        },
        _ => None,
    };
    match (&stmt, table.as_deref()) {
        (Statement::Insert(_), Some("appointments")) => ResultShape::Booking,
        (Statement::Update { .. }, Some("appointments")) => ResultShape::Appointments,
        (
            Statement::Query(_),
            Some(
                "appointments"
                | "pending_appointments"
                | "approved_appointments"
                | "requested_appointments"
                | "upcoming_appointments",
            ),
        ) => ResultShape::Appointments,
        (Statement::Query(_), Some("available_slots")) => ResultShape::Slots,
        (Statement::Query(_), Some("available_stylists" | "stylists")) => ResultShape::Stylists,
        (Statement::Insert(_) | Statement::Update { .. } | Statement::Query(_), Some("services")) => {
            ResultShape::Services
        }
        _ => ResultShape::Empty,
    }
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::TooLong(sql.len()));
    }
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    Ok(stmts.remove(0))
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "users" => {
            let row = insert_row(insert, &USER_COLUMNS, &[])?;
            let role = parse_text(&row["role"])?;
            Ok(Command::InsertUser {
                id: parse_object_id(&row["id"])?,
                name: parse_text(&row["name"])?,
                role: role.parse().map_err(SqlError::Parse)?,
            })
        }
        "leaves" => {
            let row = insert_row(insert, &LEAVE_COLUMNS, &[])?;
            Ok(Command::InsertLeave {
                stylist_id: parse_object_id(&row["stylist_id"])?,
                date: parse_date(&row["date"])?,
            })
        }
        "appointments" => {
            let row = insert_row(insert, &APPOINTMENT_COLUMNS, &[])?;
            Ok(Command::InsertAppointment {
                client_id: parse_object_id(&row["client_id"])?,
                stylist_id: parse_object_id(&row["stylist_id"])?,
                date: parse_date(&row["date"])?,
                slot_number: parse_i64(&row["slot_number"])?,
            })
        }
        "services" => {
            let row = insert_row(insert, &SERVICE_COLUMNS, &SERVICE_OPTIONAL_COLUMNS)?;
            let image_url = match row.get("image_url") {
                Some(expr) => parse_text_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertService {
                name: parse_text(&row["name"])?,
                duration: parse_i64(&row["duration"])?,
                price: parse_i64(&row["price"])?,
                image_url,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Map the single VALUES row onto `required` and `optional` columns. Without
/// a column list the values are taken positionally, required columns first.
fn insert_row(
    insert: &ast::Insert,
    required: &[&'static str],
    optional: &[&'static str],
) -> Result<HashMap<&'static str, Expr>, SqlError> {
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

    let known: Vec<&'static str> = required.iter().chain(optional).copied().collect();
    let columns: Vec<String> = if insert.columns.is_empty() {
        if values.len() < required.len() || values.len() > known.len() {
            return Err(SqlError::WrongArity(required.len(), values.len()));
        }
        known[..values.len()].iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity(columns.len(), values.len()));
    }

    let mut row = HashMap::new();
    for (column, value) in columns.iter().zip(values) {
        let name = known
            .iter()
            .find(|c| **c == column.as_str())
            .ok_or_else(|| SqlError::UnknownColumn(column.clone()))?;
        row.insert(*name, value.clone());
    }
    for column in required {
        if !row.contains_key(column) {
            return Err(SqlError::MissingColumn(column));
        }
    }
    Ok(row)
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    let command = match name.as_str() {
        "appointments" => parse_status_update(assignments)?,
        "services" => parse_service_update(assignments)?,
        _ => return Err(SqlError::UnknownTable(name)),
    };

    let filters = where_filters(selection, &["id"])?;
    let id = parse_text(filters.get("id").ok_or(SqlError::MissingFilter("id"))?)?;
    Ok(match command {
        UpdateTarget::Appointment(decision) => Command::UpdateAppointmentStatus { id, decision },
        UpdateTarget::Service(patch) => Command::UpdateService { id, patch },
    })
}

/// The SET part of an UPDATE, before the row it applies to is known.
enum UpdateTarget {
    Appointment(Decision),
    Service(ServicePatch),
}

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        AssignmentTarget::ColumnName(obj) => {
            object_name_last(obj).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        AssignmentTarget::Tuple(_) => Err(SqlError::Unsupported("tuple assignment".into())),
    }
}

fn parse_status_update(assignments: &[ast::Assignment]) -> Result<UpdateTarget, SqlError> {
    let mut status = None;
    for assignment in assignments {
        match assignment_column(assignment)?.as_str() {
            "status" => status = Some(parse_text(&assignment.value)?),
            other => return Err(SqlError::ReadOnlyColumn(other.to_string())),
        }
    }
    let status = status.ok_or(SqlError::MissingColumn("status"))?;
    let status: AppointmentStatus = status.parse().map_err(SqlError::Parse)?;
    let decision = match status {
        AppointmentStatus::Accepted => Decision::Accept,
        AppointmentStatus::Rejected => Decision::Reject,
        AppointmentStatus::Cancelled => Decision::Cancel,
        other => return Err(SqlError::StatusNotSettable(other)),
    };
    Ok(UpdateTarget::Appointment(decision))
}

fn parse_service_update(assignments: &[ast::Assignment]) -> Result<UpdateTarget, SqlError> {
    let mut patch = ServicePatch::default();
    for assignment in assignments {
        let value = &assignment.value;
        match assignment_column(assignment)?.as_str() {
            "name" => patch.name = Some(parse_text(value)?),
            "duration" => patch.duration = Some(parse_i64(value)?),
            "price" => patch.price = Some(parse_i64(value)?),
            "image_url" => patch.image_url = Some(parse_text_or_null(value)?),
            "id" => return Err(SqlError::ReadOnlyColumn("id".into())),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
    Ok(UpdateTarget::Service(patch))
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    let first = tables
        .first()
        .ok_or(SqlError::Parse("DELETE without table".into()))?;
    let table = table_factor_name(&first.relation)?;
    if table != "services" {
        return Err(SqlError::Unsupported(format!("DELETE FROM {table}")));
    }
    let filters = where_filters(&delete.selection, &["id"])?;
    let id = filters.get("id").ok_or(SqlError::MissingFilter("id"))?;
    Ok(Command::DeleteService { id: parse_text(id)? })
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let first = select
        .from
        .first()
        .ok_or(SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&first.relation)?;
    let allowed: &[&str] = match table.as_str() {
        "appointments" | "services" => &["id"],
        "pending_appointments" | "approved_appointments" => &["client_id"],
        "requested_appointments" | "upcoming_appointments" => &["stylist_id"],
        "available_slots" => &["stylist_id", "date"],
        "available_stylists" => &["date"],
        "stylists" => &[],
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let filters = where_filters(&select.selection, allowed)?;
    let required = |col: &'static str| filters.get(col).ok_or(SqlError::MissingFilter(col));

    match table.as_str() {
        "appointments" => match filters.get("id") {
            Some(id) => Ok(Command::SelectAppointment { id: parse_text(id)? }),
            None => Ok(Command::SelectAllAppointments),
        },
        "pending_appointments" => Ok(Command::SelectPendingForClient {
            client_id: parse_object_id(required("client_id")?)?,
        }),
        "approved_appointments" => Ok(Command::SelectApprovedForClient {
            client_id: parse_object_id(required("client_id")?)?,
        }),
        "requested_appointments" => Ok(Command::SelectRequestedForStylist {
            stylist_id: parse_object_id(required("stylist_id")?)?,
        }),
        "upcoming_appointments" => Ok(Command::SelectUpcomingForStylist {
            stylist_id: parse_object_id(required("stylist_id")?)?,
        }),
        "available_slots" => Ok(Command::SelectAvailableSlots {
            stylist_id: parse_object_id(required("stylist_id")?)?,
            date: parse_date(required("date")?)?,
        }),
        "available_stylists" => Ok(Command::SelectAvailableStylists {
            date: parse_date(required("date")?)?,
        }),
        "stylists" => Ok(Command::SelectStylists),
        "services" => match filters.get("id") {
            Some(id) => Ok(Command::SelectService { id: parse_text(id)? }),
            None => Ok(Command::SelectServices),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` pairs joined by AND, restricted to the `allowed` columns.
/// Any other predicate, or a filter on any other column, is rejected.
fn where_filters(
    selection: &Option<Expr>,
    allowed: &[&str],
) -> Result<HashMap<String, Expr>, SqlError> {
    let mut filters = HashMap::new();
    if let Some(expr) = selection {
        collect_eq_filters(expr, allowed, &mut filters)?;
    }
    Ok(filters)
}

fn collect_eq_filters(
    expr: &Expr,
    allowed: &[&str],
    out: &mut HashMap<String, Expr>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, allowed, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, allowed, out)?;
            collect_eq_filters(right, allowed, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            if !allowed.contains(&col.as_str()) {
                return Err(SqlError::UnknownColumn(col));
            }
            out.insert(col, right.as_ref().clone());
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("predicate {other}"))),
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
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
        Expr::TypedString(ts) => Some(&ts.value.value),
        Expr::Nested(inner) => extract_value(inner),
        _ => None,
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::DoubleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_text(expr).map(Some),
    }
}

fn parse_object_id(expr: &Expr) -> Result<ObjectId, SqlError> {
    let raw = parse_text(expr)?;
    raw.trim().parse().map_err(|_| SqlError::InvalidId(raw))
}

/// `YYYY-MM-DD`, or an RFC 3339 timestamp whose calendar day is taken as written.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let raw = parse_text(expr)?;
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(trimmed).map(|dt| dt.date_naive()))
        .map_err(|_| SqlError::InvalidDate(raw))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(other) => Err(SqlError::Parse(format!("expected number, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    TooLong(usize),
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(&'static str),
    ReadOnlyColumn(String),
    WrongArity(usize, usize),
    MissingFilter(&'static str),
    InvalidId(String),
    InvalidDate(String),
    StatusNotSettable(AppointmentStatus),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::TooLong(n) => write!(f, "statement too long: {n} bytes"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::ReadOnlyColumn(c) => write!(f, "column {c} cannot be updated"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidId(raw) => write!(f, "invalid resource id: {raw:?}"),
            SqlError::InvalidDate(raw) => write!(f, "invalid date: {raw:?}"),
            SqlError::StatusNotSettable(status) => {
                write!(f, "status {status} cannot be set directly")
            }
        }
    }
}

impl std::error::Error for SqlError {}
