use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertFacility {
        id: Ulid,
        name: String,
        hourly_rate: Decimal,
        capacity: u32,
        category: Option<String>,
    },
    DeactivateFacility {
        id: Ulid,
    },
    CloseFacility {
        facility_id: Ulid,
        reason: String,
        until: Option<NaiveDate>,
    },
    ReopenFacility {
        facility_id: Ulid,
    },
    InsertPricingOption {
        id: Ulid,
        facility_id: Ulid,
        name: String,
        price: Decimal,
        sort_order: i32,
    },
    RetirePricingOption {
        id: Ulid,
    },
    InsertReservation {
        id: Ulid,
        facility_id: Ulid,
        user_id: String,
        start: Ms,
        end: Ms,
        addons: Vec<Ulid>,
        contact: Option<String>,
    },
    /// `user_id: None` cancels as administrator.
    CancelReservation {
        id: Ulid,
        user_id: Option<String>,
    },
    /// `verified = false` records uploaded proof; `true` is administrator verification.
    RecordPayment {
        reservation_id: Ulid,
        verified: bool,
    },
    RejectPaymentProof {
        reservation_id: Ulid,
    },
    JoinWaitlist {
        id: Ulid,
        facility_id: Ulid,
        user_id: String,
        start: Ms,
        end: Ms,
    },
    LeaveWaitlist {
        id: Ulid,
        user_id: Option<String>,
    },
    SelectFacilities,
    SelectPricingOptions {
        facility_id: Ulid,
    },
    SelectReservations {
        facility_id: Ulid,
    },
    SelectWaitlist {
        user_id: String,
    },
    SelectAvailability {
        facility_id: Ulid,
        date: NaiveDate,
    },
    SelectSlots {
        facility_id: Ulid,
        date: NaiveDate,
    },
    SelectOccupancy {
        facility_id: Ulid,
        date: NaiveDate,
    },
    SelectValidation {
        facility_id: Ulid,
        start: Ms,
        end: Ms,
    },
    SelectQuote {
        facility_id: Ulid,
        start: Ms,
        end: Ms,
        addons: Vec<Ulid>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, for describing result columns before
/// parameters are bound.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name. Without an explicit column list the
/// table's canonical column order applies.
struct Row<'a> {
    cols: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn new(insert: &ast::Insert, canonical: &[&str], values: &'a [Expr]) -> Self {
        let names: Vec<String> = if insert.columns.is_empty() {
            canonical.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        Self {
            cols: names.into_iter().zip(values.iter()).collect(),
        }
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.cols.iter().find(|(name, _)| name == col).map(|(_, e)| *e)
    }

    fn req(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(col))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "facilities" => {
            let row = Row::new(insert, &["id", "name", "hourly_rate", "capacity", "category"], &values);
            Ok(Command::InsertFacility {
                id: parse_ulid(row.req("id")?)?,
                name: parse_string(row.req("name")?)?,
                hourly_rate: parse_decimal(row.req("hourly_rate")?)?,
                capacity: row.get("capacity").map(parse_u32).transpose()?.unwrap_or(1),
                category: row.get("category").map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "closures" => {
            let row = Row::new(insert, &["facility_id", "reason", "until"], &values);
            Ok(Command::CloseFacility {
                facility_id: parse_ulid(row.req("facility_id")?)?,
                reason: parse_string(row.req("reason")?)?,
                until: row.get("until").map(parse_date_or_null).transpose()?.flatten(),
            })
        }
        "pricing_options" => {
            let row = Row::new(insert, &["id", "facility_id", "name", "price", "sort_order"], &values);
            Ok(Command::InsertPricingOption {
                id: parse_ulid(row.req("id")?)?,
                facility_id: parse_ulid(row.req("facility_id")?)?,
                name: parse_string(row.req("name")?)?,
                price: parse_decimal(row.req("price")?)?,
                sort_order: row.get("sort_order").map(parse_i32).transpose()?.unwrap_or(0),
            })
        }
        "reservations" => {
            let row = Row::new(
                insert,
                &["id", "facility_id", "user_id", "start", "end", "addons", "contact"],
                &values,
            );
            Ok(Command::InsertReservation {
                id: parse_ulid(row.req("id")?)?,
                facility_id: parse_ulid(row.req("facility_id")?)?,
                user_id: parse_string(row.req("user_id")?)?,
                start: parse_instant(row.req("start")?)?,
                end: parse_instant(row.req("end")?)?,
                addons: row.get("addons").map(parse_ulid_list).transpose()?.unwrap_or_default(),
                contact: row.get("contact").map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "payments" => {
            let row = Row::new(insert, &["reservation_id", "verified"], &values);
            Ok(Command::RecordPayment {
                reservation_id: parse_ulid(row.req("reservation_id")?)?,
                verified: row.get("verified").map(parse_bool).transpose()?.unwrap_or(false),
            })
        }
        "waitlist" => {
            let row = Row::new(insert, &["id", "facility_id", "user_id", "start", "end"], &values);
            Ok(Command::JoinWaitlist {
                id: parse_ulid(row.req("id")?)?,
                facility_id: parse_ulid(row.req("facility_id")?)?,
                user_id: parse_string(row.req("user_id")?)?,
                start: parse_instant(row.req("start")?)?,
                end: parse_instant(row.req("end")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "facilities" => Ok(Command::DeactivateFacility {
            id: filters.ulid("id")?,
        }),
        "closures" => Ok(Command::ReopenFacility {
            facility_id: filters.ulid("facility_id")?,
        }),
        "pricing_options" => Ok(Command::RetirePricingOption {
            id: filters.ulid("id")?,
        }),
        "reservations" => Ok(Command::CancelReservation {
            id: filters.ulid("id")?,
            user_id: filters.optional("user_id", parse_string)?,
        }),
        "payments" => Ok(Command::RejectPaymentProof {
            reservation_id: filters.ulid("reservation_id")?,
        }),
        "waitlist" => Ok(Command::LeaveWaitlist {
            id: filters.ulid("id")?,
            user_id: filters.optional("user_id", parse_string)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let f = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "facilities" => Ok(Command::SelectFacilities),
        "pricing_options" => Ok(Command::SelectPricingOptions {
            facility_id: f.ulid("facility_id")?,
        }),
        "reservations" => Ok(Command::SelectReservations {
            facility_id: f.ulid("facility_id")?,
        }),
        "waitlist" => Ok(Command::SelectWaitlist {
            user_id: f.required("user_id", parse_string)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            facility_id: f.ulid("facility_id")?,
            date: f.required("date", parse_date)?,
        }),
        "slots" => Ok(Command::SelectSlots {
            facility_id: f.ulid("facility_id")?,
            date: f.required("date", parse_date)?,
        }),
        "occupancy" => Ok(Command::SelectOccupancy {
            facility_id: f.ulid("facility_id")?,
            date: f.required("date", parse_date)?,
        }),
        "validation" => Ok(Command::SelectValidation {
            facility_id: f.ulid("facility_id")?,
            start: f.required("start", parse_instant)?,
            end: f.required("end", parse_instant)?,
        }),
        "quote" => Ok(Command::SelectQuote {
            facility_id: f.ulid("facility_id")?,
            start: f.required("start", parse_instant)?,
            end: f.required("end", parse_instant)?,
            addons: f.optional("addons", parse_ulid_list)?.unwrap_or_default(),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` terms of a WHERE clause joined by AND.
struct Filters<'a> {
    terms: Vec<(String, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_equalities(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.terms.iter().find(|(name, _)| name == col).map(|(_, e)| *e)
    }

    fn required<T>(&self, col: &'static str, parse: fn(&Expr) -> Result<T, SqlError>) -> Result<T, SqlError> {
        parse(self.get(col).ok_or(SqlError::MissingFilter(col))?)
    }

    fn optional<T>(&self, col: &str, parse: fn(&Expr) -> Result<T, SqlError>) -> Result<Option<T>, SqlError> {
        self.get(col).map(parse).transpose()
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        self.required(col, parse_ulid)
    }
}

fn collect_equalities<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_equalities(left, out)?;
            collect_equalities(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

/// First VALUES row. Bookings are made one at a time.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

/// Text of a literal; numbers keep their source spelling.
fn literal_text(expr: &Expr) -> Result<String, SqlError> {
    match expr {
        Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => Ok(format!("-{}", literal_text(expr)?)),
        _ => match extract_value(expr) {
            Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
            Some(value) => Err(SqlError::Parse(format!("expected literal, got {value}"))),
            None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

/// Comma-separated ULIDs; NULL or empty means none.
fn parse_ulid_list(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(Vec::new());
    }
    literal_text(expr)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}"))))
        .collect()
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
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

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    let s = literal_text(expr)?;
    s.parse().map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    let s = literal_text(expr)?;
    Decimal::from_str(&s).map_err(|e| SqlError::Parse(format!("bad amount {s:?}: {e}")))
}

/// Unix milliseconds, or an RFC 3339 timestamp with offset.
fn parse_instant(expr: &Expr) -> Result<Ms, SqlError> {
    let s = literal_text(expr)?;
    if let Ok(ms) = s.parse::<Ms>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| SqlError::Parse(format!("bad timestamp {s:?}: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_date(expr).map(Some)
    }
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
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
