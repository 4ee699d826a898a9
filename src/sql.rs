use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{GymServiceChanges, TrainerChanges};
use crate::model::*;

/// Which appointments a `SELECT … FROM appointments` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentFilter {
    Id(Ulid),
    Trainer(Ulid),
    Member(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertGym(Gym),
    InsertService(Service),
    InsertGymService(GymService),
    UpdateGymService {
        id: Ulid,
        changes: GymServiceChanges,
    },
    InsertTrainer(Trainer),
    UpdateTrainer {
        id: Ulid,
        changes: TrainerChanges,
    },
    DeleteTrainer {
        id: Ulid,
    },
    InsertTrainerService {
        trainer_id: Ulid,
        service_id: Ulid,
    },
    InsertAvailability(AvailabilityWindow),
    DeleteAvailability {
        id: Ulid,
    },
    InsertMember(Member),
    DeleteMember {
        id: Ulid,
    },
    /// The member is whoever is logged in.
    InsertAppointment {
        id: Ulid,
        trainer_id: Ulid,
        gym_service_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        notes: Option<String>,
    },
    /// Status kept as text; the engine decides whether it names a real status.
    UpdateAppointmentStatus {
        id: Ulid,
        status: String,
    },
    SelectCandidates {
        gym_id: Ulid,
        gym_service_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        duration: Option<Minute>,
    },
    SelectAppointments {
        filter: AppointmentFilter,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    parse_batch(sql)?.into_iter().next().ok_or(SqlError::Empty)
}

/// Every `;`-separated statement of a simple query, in order.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
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

fn require(table: &'static str, values: &[Expr], n: usize) -> Result<(), SqlError> {
    if values.len() < n {
        Err(SqlError::WrongArity(table, n, values.len()))
    } else {
        Ok(())
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let opt = |i: usize| values.get(i);

    match table.as_str() {
        "gyms" => {
            require("gyms", &values, 4)?;
            Ok(Command::InsertGym(Gym {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                hours: Span {
                    start: parse_minute(&values[2])?,
                    end: parse_minute(&values[3])?,
                },
                working_days: opt(4).map(parse_working_days).transpose()?.flatten(),
                is_active: opt(5).map(parse_bool).transpose()?.unwrap_or(true),
            }))
        }
        "services" => {
            require("services", &values, 2)?;
            Ok(Command::InsertService(Service {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                is_active: opt(2).map(parse_bool).transpose()?.unwrap_or(true),
            }))
        }
        "gym_services" => {
            require("gym_services", &values, 5)?;
            Ok(Command::InsertGymService(GymService {
                id: parse_ulid(&values[0])?,
                gym_id: parse_ulid(&values[1])?,
                service_id: parse_ulid(&values[2])?,
                duration: parse_u32(&values[3])?,
                price: parse_u64(&values[4])?,
                is_active: opt(5).map(parse_bool).transpose()?.unwrap_or(true),
            }))
        }
        "trainers" => {
            require("trainers", &values, 3)?;
            Ok(Command::InsertTrainer(Trainer {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                gym_id: parse_ulid_or_null(&values[2])?,
                is_active: true,
                experience: opt(3).map(parse_u32).transpose()?.unwrap_or(0),
                bio: opt(4).map(parse_string_or_null).transpose()?.flatten(),
                services: BTreeSet::new(),
            }))
        }
        "trainer_services" => {
            require("trainer_services", &values, 2)?;
            Ok(Command::InsertTrainerService {
                trainer_id: parse_ulid(&values[0])?,
                service_id: parse_ulid(&values[1])?,
            })
        }
        "availability" => {
            require("availability", &values, 5)?;
            let day = parse_u32(&values[2])?;
            Ok(Command::InsertAvailability(AvailabilityWindow {
                id: parse_ulid(&values[0])?,
                trainer_id: parse_ulid(&values[1])?,
                day_of_week: u8::try_from(day).map_err(|_| SqlError::Parse(format!("bad day_of_week: {day}")))?,
                span: Span {
                    start: parse_minute(&values[3])?,
                    end: parse_minute(&values[4])?,
                },
                is_available: opt(5).map(parse_bool).transpose()?.unwrap_or(true),
            }))
        }
        "members" => {
            require("members", &values, 2)?;
            Ok(Command::InsertMember(Member {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                gym_id: opt(2).map(parse_ulid_or_null).transpose()?.flatten(),
            }))
        }
        "appointments" => {
            require("appointments", &values, 5)?;
            Ok(Command::InsertAppointment {
                id: parse_ulid(&values[0])?,
                trainer_id: parse_ulid(&values[1])?,
                gym_service_id: parse_ulid(&values[2])?,
                date: parse_date(&values[3])?,
                time: parse_time(&values[4])?,
                notes: opt(5).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
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

    match table.as_str() {
        "gym_services" => {
            let mut changes = GymServiceChanges::default();
            for (column, value) in set {
                match column.as_str() {
                    "duration" => changes.duration = Some(parse_u32(value)?),
                    "price" => changes.price = Some(parse_u64(value)?),
                    "is_active" => changes.is_active = Some(parse_bool(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateGymService { id, changes })
        }
        "trainers" => {
            let mut changes = TrainerChanges::default();
            for (column, value) in set {
                match column.as_str() {
                    "is_active" => changes.is_active = Some(parse_bool(value)?),
                    "gym_id" => changes.gym_id = Some(parse_ulid_or_null(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateTrainer { id, changes })
        }
        "appointments" => match set.as_slice() {
            [(column, value)] if column == "status" => Ok(Command::UpdateAppointmentStatus {
                id,
                status: parse_string(value)?,
            }),
            _ => Err(SqlError::Unsupported("appointments: only SET status = … is allowed".into())),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "trainers" => Ok(Command::DeleteTrainer { id }),
        "availability" => Ok(Command::DeleteAvailability { id }),
        "members" => Ok(Command::DeleteMember { id }),
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let find = |col: &str| filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "candidates" => {
            let need = |col: &'static str| find(col).ok_or(SqlError::MissingFilter(col));
            Ok(Command::SelectCandidates {
                gym_id: parse_ulid(need("gym_id")?)?,
                gym_service_id: parse_ulid(need("gym_service_id")?)?,
                date: parse_date(need("date")?)?,
                time: parse_time(need("time")?)?,
                duration: find("duration").map(parse_u32).transpose()?,
            })
        }
        "appointments" => {
            let filter = if let Some(e) = find("id") {
                AppointmentFilter::Id(parse_ulid(e)?)
            } else if let Some(e) = find("trainer_id") {
                AppointmentFilter::Trainer(parse_ulid(e)?)
            } else if let Some(e) = find("member_id") {
                AppointmentFilter::Member(parse_ulid(e)?)
            } else {
                return Err(SqlError::MissingFilter("id, trainer_id or member_id"));
            };
            Ok(Command::SelectAppointments { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y AND …` into `(column, value)` pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
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
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
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

fn value_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.as_str()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = value_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_ulid(expr).map(Some) }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    value_text(expr).map(str::to_string)
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_string(expr).map(Some) }
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let s = value_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad unsigned integer {s:?}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_u64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
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
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// `'YYYY-MM-DD'`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = value_text(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

/// `'HH:MM'` or `'HH:MM:SS'`. Seconds must be zero; the engine works in minutes.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = value_text(expr)?;
    let t = s.trim();
    let time = NaiveTime::parse_from_str(t, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
        .map_err(|e| SqlError::Parse(format!("bad time {s:?}: {e}")))?;
    if minute_of_day(time) * 60 != chrono::Timelike::num_seconds_from_midnight(&time) {
        return Err(SqlError::Parse(format!("time {s:?} is not on a whole minute")));
    }
    Ok(time)
}

/// A time-of-day bound in minutes. Accepts `'24:00'` as end of day.
fn parse_minute(expr: &Expr) -> Result<Minute, SqlError> {
    if let Ok(s) = value_text(expr)
        && matches!(s.trim(), "24:00" | "24:00:00")
    {
        return Ok(MINUTES_PER_DAY);
    }
    parse_time(expr).map(minute_of_day)
}

/// `'1,2,3'` (0 = Sunday) or NULL for every day.
fn parse_working_days(expr: &Expr) -> Result<Option<BTreeSet<u8>>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let s = value_text(expr)?;
    s.split(',')
        .map(|d| {
            d.trim()
                .parse::<u8>()
                .map_err(|e| SqlError::Parse(format!("bad working day {d:?}: {e}")))
        })
        .collect::<Result<BTreeSet<u8>, _>>()
        .map(Some)
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
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn parse_insert_gym() {
        let sql = format!("INSERT INTO gyms (id, name, opening, closing, working_days) VALUES ('{ID}', 'Downtown', '06:00', '22:00', '1,2,3,4,5')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertGym(gym) => {
                assert_eq!(gym.id, id());
                assert_eq!(gym.name, "Downtown");
                assert_eq!(gym.hours, Span::new(360, 1320));
                assert_eq!(gym.working_days, Some(BTreeSet::from([1, 2, 3, 4, 5])));
                assert!(gym.is_active);
            }
            _ => panic!("expected InsertGym, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_gym_keeps_backwards_hours_for_the_engine() {
        let sql = format!("INSERT INTO gyms (id, name, opening, closing, working_days, is_active) VALUES ('{ID}', 'G', '22:00', '06:00', NULL, false)");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertGym(gym) => {
                assert_eq!(gym.hours, Span { start: 1320, end: 360 });
                assert_eq!(gym.working_days, None);
                assert!(!gym.is_active);
            }
            _ => panic!("expected InsertGym, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_gym_service() {
        let sql = format!("INSERT INTO gym_services (id, gym_id, service_id, duration, price) VALUES ('{ID}', '{ID}', '{ID}', 60, 500)");
        match parse_sql(&sql).unwrap() {
            Command::InsertGymService(gs) => {
                assert_eq!((gs.duration, gs.price, gs.is_active), (60, 500, true));
            }
            other => panic!("expected InsertGymService, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_trainer_variants() {
        let sql = format!("INSERT INTO trainers (id, name, gym_id) VALUES ('{ID}', 'Sam', NULL)");
        match parse_sql(&sql).unwrap() {
            Command::InsertTrainer(trainer) => {
                assert_eq!(trainer.gym_id, None);
                assert_eq!(trainer.experience, 0);
                assert_eq!(trainer.bio, None);
            }
            other => panic!("expected InsertTrainer, got {other:?}"),
        }

        let sql = format!("INSERT INTO trainers (id, name, gym_id, experience, bio) VALUES ('{ID}', 'Sam', '{ID}', 7, 'kettlebells')");
        match parse_sql(&sql).unwrap() {
            Command::InsertTrainer(trainer) => {
                assert_eq!(trainer.gym_id, Some(id()));
                assert_eq!(trainer.experience, 7);
                assert_eq!(trainer.bio.as_deref(), Some("kettlebells"));
            }
            other => panic!("expected InsertTrainer, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_availability_end_of_day() {
        let sql = format!(r#"INSERT INTO availability (id, trainer_id, day_of_week, start, "end") VALUES ('{ID}', '{ID}', 1, '18:00', '24:00')"#);
        match parse_sql(&sql).unwrap() {
            Command::InsertAvailability(w) => {
                assert_eq!(w.day_of_week, 1);
                assert_eq!(w.span, Span::new(18 * 60, MINUTES_PER_DAY));
                assert!(w.is_available);
            }
            other => panic!("expected InsertAvailability, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_appointment() {
        let sql = format!("INSERT INTO appointments (id, trainer_id, gym_service_id, date, time, notes) VALUES ('{ID}', '{ID}', '{ID}', '2024-06-03', '09:00', 'first session')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertAppointment {
                id: id(),
                trainer_id: id(),
                gym_service_id: id(),
                date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
                time: t(9, 0),
                notes: Some("first session".into()),
            }
        );
    }

    #[test]
    fn parse_bad_date_and_time() {
        let sql = format!("INSERT INTO appointments (id, trainer_id, gym_service_id, date, time) VALUES ('{ID}', '{ID}', '{ID}', '2024-02-30', '09:00')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
        let sql = format!("INSERT INTO appointments (id, trainer_id, gym_service_id, date, time) VALUES ('{ID}', '{ID}', '{ID}', '2024-06-03', '09:00:30')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
        let sql = format!("INSERT INTO appointments (id, trainer_id, gym_service_id, date, time) VALUES ('{ID}', '{ID}', '{ID}', '2024-06-03', '25:00')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_update_gym_service() {
        let sql = format!("UPDATE gym_services SET price = 800, is_active = false WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateGymService {
                id: id(),
                changes: GymServiceChanges { duration: None, price: Some(800), is_active: Some(false) },
            }
        );
    }

    #[test]
    fn parse_update_trainer_unassign() {
        let sql = format!("UPDATE trainers SET gym_id = NULL WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateTrainer {
                id: id(),
                changes: TrainerChanges { is_active: None, gym_id: Some(None) },
            }
        );
    }

    #[test]
    fn parse_update_appointment_status() {
        let sql = format!("UPDATE appointments SET status = 'Approved' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateAppointmentStatus { id: id(), status: "Approved".into() }
        );

        let sql = format!("UPDATE appointments SET price = 0 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
        let sql = "UPDATE appointments SET status = 'Approved'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_deletes() {
        let sql = format!("DELETE FROM members WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteMember { id: id() });
        let sql = format!("DELETE FROM trainers WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteTrainer { id: id() });
        let sql = format!("DELETE FROM availability WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteAvailability { id: id() });
        let sql = format!("DELETE FROM appointments WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_select_candidates() {
        let sql = format!(r#"SELECT * FROM candidates WHERE gym_id = '{ID}' AND gym_service_id = '{ID}' AND "date" = '2024-06-03' AND "time" = '09:30'"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectCandidates {
                gym_id: id(),
                gym_service_id: id(),
                date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
                time: t(9, 30),
                duration: None,
            }
        );

        let sql = format!(r#"SELECT * FROM candidates WHERE gym_id = '{ID}' AND gym_service_id = '{ID}' AND "date" = '2024-06-03' AND "time" = '09:30' AND duration = 45"#);
        match parse_sql(&sql).unwrap() {
            Command::SelectCandidates { duration, .. } => assert_eq!(duration, Some(45)),
            other => panic!("expected SelectCandidates, got {other:?}"),
        }

        let sql = format!("SELECT * FROM candidates WHERE gym_id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("gym_service_id"))));
    }

    #[test]
    fn parse_select_appointments() {
        let sql = format!("SELECT * FROM appointments WHERE trainer_id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAppointments { filter: AppointmentFilter::Trainer(id()) }
        );
        let sql = format!("SELECT * FROM appointments WHERE member_id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAppointments { filter: AppointmentFilter::Member(id()) }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM appointments"),
            Err(SqlError::MissingFilter(_))
        ));
    }

    #[test]
    fn parse_rejects_range_filters() {
        let sql = format!("SELECT * FROM appointments WHERE trainer_id = '{ID}' OR member_id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_wrong_arity() {
        let sql = format!("INSERT INTO gym_services (id, gym_id) VALUES ('{ID}', '{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("gym_services", 5, 2))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn parse_batch_keeps_order() {
        let sql = format!(
            "INSERT INTO services (id, name) VALUES ('{ID}', 'PT'); DELETE FROM members WHERE id = '{ID}';"
        );
        let cmds = parse_batch(&sql).unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], Command::InsertService(_)));
        assert!(matches!(cmds[1], Command::DeleteMember { .. }));

        let bad = format!("INSERT INTO services (id, name) VALUES ('{ID}', 'PT'); DROP TABLE x");
        assert!(parse_batch(&bad).is_err());
    }
}
