use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{actor_from_login, GymSlotAuthSource};
use crate::engine::{BookingRequest, Engine, EngineError, RejectionReason};
use crate::model::*;
use crate::observability;
use crate::sql::{self, AppointmentFilter, Command, SqlError};

pub struct GymSlotHandler {
    engine: Arc<Engine>,
    query_parser: Arc<GymSlotQueryParser>,
}

impl GymSlotHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(GymSlotQueryParser),
        }
    }

    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        let user = client.metadata().get("user").map(String::as_str).unwrap_or_default();
        actor_from_login(user).ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("unknown user {user:?}"),
            )))
        })
    }

    /// Parse, run and time one statement.
    async fn run<C: ClientInfo>(&self, client: &C, sql: &str) -> PgWireResult<Response> {
        let actor = self.resolve_actor(client)?;
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        self.run_command(&actor, cmd).await
    }

    /// Statements of a simple query run in order and each commits on its own. The
    /// first failure stops the batch: the client gets a completion for every
    /// statement that ran, then the error.
    async fn run_batch<C: ClientInfo>(&self, client: &C, sql: &str) -> PgWireResult<Vec<Response>> {
        let actor = self.resolve_actor(client)?;
        let cmds = sql::parse_batch(sql).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            match self.run_command(&actor, cmd).await {
                Ok(response) => responses.push(response),
                Err(PgWireError::UserError(info)) => {
                    responses.push(Response::Error(info));
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(responses)
    }

    async fn run_command(&self, actor: &Actor, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result.map_err(engine_err)
    }

    async fn execute_command(&self, actor: &Actor, cmd: Command) -> Result<Response, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::InsertGym(gym) => {
                require_admin(actor)?;
                engine.add_gym(gym).await?;
                Ok(inserted())
            }
            Command::InsertService(service) => {
                require_admin(actor)?;
                engine.add_service(service).await?;
                Ok(inserted())
            }
            Command::InsertGymService(gs) => {
                require_admin(actor)?;
                engine.add_gym_service(gs).await?;
                Ok(inserted())
            }
            Command::UpdateGymService { id, changes } => {
                require_admin(actor)?;
                engine.update_gym_service(id, changes).await?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::InsertTrainer(trainer) => {
                require_admin(actor)?;
                engine.add_trainer(trainer).await?;
                Ok(inserted())
            }
            Command::UpdateTrainer { id, changes } => {
                require_admin(actor)?;
                engine.update_trainer(id, changes).await?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteTrainer { id } => {
                require_admin(actor)?;
                engine.remove_trainer(id).await?;
                Ok(deleted())
            }
            Command::InsertTrainerService { trainer_id, service_id } => {
                require_admin(actor)?;
                engine.add_trainer_service(trainer_id, service_id).await?;
                Ok(inserted())
            }
            Command::InsertAvailability(window) => {
                require_admin(actor)?;
                engine.add_window(window).await?;
                Ok(inserted())
            }
            Command::DeleteAvailability { id } => {
                require_admin(actor)?;
                engine.remove_window(id).await?;
                Ok(deleted())
            }
            Command::InsertMember(member) => {
                require_admin(actor)?;
                engine.add_member(member).await?;
                Ok(inserted())
            }
            Command::DeleteMember { id } => {
                require_admin(actor)?;
                engine.remove_member(id).await?;
                Ok(deleted())
            }
            Command::InsertAppointment {
                id,
                trainer_id,
                gym_service_id,
                date,
                time,
                notes,
            } => {
                let member_id = actor
                    .member_id()
                    .ok_or(EngineError::Rejected(RejectionReason::InvalidMember))?;
                let req = BookingRequest {
                    id,
                    member_id,
                    trainer_id,
                    gym_service_id,
                    date,
                    time,
                    notes,
                };
                engine.create_appointment(actor, req).await?;
                Ok(inserted())
            }
            Command::UpdateAppointmentStatus { id, status } => {
                engine.transition_str(actor, id, &status).await?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectCandidates {
                gym_id,
                gym_service_id,
                date,
                time,
                duration,
            } => {
                let trainers = engine
                    .find_available(gym_id, gym_service_id, date, time, duration)
                    .await?;
                Ok(candidates_response(trainers))
            }
            Command::SelectAppointments { filter } => {
                let appointments = match filter {
                    AppointmentFilter::Id(id) => vec![engine.get_appointment(id).await?],
                    AppointmentFilter::Trainer(id) => engine.appointments_for_trainer(id).await,
                    AppointmentFilter::Member(id) => engine.appointments_for_member(id).await,
                };
                let visible = appointments
                    .into_iter()
                    .filter(|a| visible_to(actor, a))
                    .collect();
                Ok(appointments_response(visible))
            }
        }
    }
}

fn require_admin(actor: &Actor) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("reference data is admin-only"))
    }
}

fn visible_to(actor: &Actor, appointment: &Appointment) -> bool {
    match actor {
        Actor::Admin => true,
        Actor::Member(id) => appointment.member_id == *id,
        Actor::Trainer(id) => appointment.trainer_id == *id,
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("member_id", Type::VARCHAR),
        text_field("trainer_id", Type::VARCHAR),
        text_field("gym_service_id", Type::VARCHAR),
        text_field("date", Type::VARCHAR),
        text_field("time", Type::VARCHAR),
        text_field("duration", Type::INT4),
        text_field("price", Type::INT8),
        text_field("status", Type::VARCHAR),
        text_field("notes", Type::VARCHAR),
        text_field("created_at", Type::INT8),
        text_field("updated_at", Type::INT8),
    ]
}

fn candidates_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("experience", Type::INT4),
        text_field("bio", Type::VARCHAR),
    ]
}

fn appointments_response(appointments: Vec<Appointment>) -> Response {
    let schema = Arc::new(appointments_schema());
    let rows: Vec<PgWireResult<_>> = appointments
        .into_iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.member_id.to_string())?;
            encoder.encode_field(&a.trainer_id.to_string())?;
            encoder.encode_field(&a.gym_service_id.to_string())?;
            encoder.encode_field(&a.date.format("%Y-%m-%d").to_string())?;
            encoder.encode_field(&a.time.format("%H:%M").to_string())?;
            encoder.encode_field(&(a.duration as i32))?;
            encoder.encode_field(&(a.price as i64))?;
            encoder.encode_field(&a.status.to_string())?;
            encoder.encode_field(&a.notes)?;
            encoder.encode_field(&a.created_at)?;
            encoder.encode_field(&a.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn candidates_response(trainers: Vec<TrainerInfo>) -> Response {
    let schema = Arc::new(candidates_schema());
    let rows: Vec<PgWireResult<_>> = trainers
        .into_iter()
        .map(|t| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&t.id.to_string())?;
            encoder.encode_field(&t.name)?;
            encoder.encode_field(&(t.experience as i32))?;
            encoder.encode_field(&t.bio)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Columns a statement will return, judged from its text (parameters may still be unbound).
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        vec![]
    } else if upper.contains("CANDIDATES") {
        candidates_schema()
    } else if upper.contains("APPOINTMENTS") {
        appointments_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for GymSlotHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run_batch(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct GymSlotQueryParser;

#[async_trait]
impl QueryParser for GymSlotQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for GymSlotHandler {
    type Statement = String;
    type QueryParser = GymSlotQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so `$1`
/// never clobbers `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        result = result.replace(&format!("${}", i + 1), &quote_param(param.as_deref()));
    }
    result
}

fn quote_param(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
        None => "NULL".to_string(),
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct GymSlotFactory {
    handler: Arc<GymSlotHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<GymSlotAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl GymSlotFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = GymSlotAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(GymSlotHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for GymSlotFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(GymSlotFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(..) => "P0002",
        EngineError::AlreadyExists(..) => "23505",
        EngineError::Validation(_) => "22023",
        EngineError::Rejected(RejectionReason::SlotConflict) => "23P01",
        EngineError::Rejected(_) => "23514",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::Forbidden(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(detail) = &e {
        tracing::error!("store failure: {detail}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EntityKind;
    use ulid::Ulid;

    #[test]
    fn sqlstates_distinguish_error_classes() {
        let id = Ulid::new();
        let cases = [
            (EngineError::NotFound(EntityKind::Appointment, id), "P0002"),
            (EngineError::AlreadyExists(EntityKind::Gym, id), "23505"),
            (EngineError::Validation("x".into()), "22023"),
            (EngineError::Rejected(RejectionReason::SlotConflict), "23P01"),
            (EngineError::Rejected(RejectionReason::OutsideAvailability), "23514"),
            (
                EngineError::InvalidTransition {
                    from: AppointmentStatus::Completed,
                    to: AppointmentStatus::Pending,
                },
                "55000",
            ),
            (EngineError::Forbidden("x"), "42501"),
            (EngineError::LimitExceeded("x"), "54000"),
            (EngineError::WalError("disk".into()), "58030"),
        ];
        for (err, code) in cases {
            assert_eq!(sqlstate(&err), code, "{err}");
        }
    }

    #[test]
    fn count_params_takes_highest_index() {
        assert_eq!(count_params("SELECT * FROM appointments WHERE id = $1"), 1);
        assert_eq!(count_params("INSERT INTO x VALUES ($2, $1, $10)"), 10);
        assert_eq!(count_params("SELECT 1"), 0);
        assert_eq!(count_params("SELECT '$'"), 0);
    }

    #[test]
    fn quote_param_escapes() {
        assert_eq!(quote_param(Some(b"O'Brien")), "'O''Brien'");
        assert_eq!(quote_param(None), "NULL");
    }

    #[test]
    fn result_schema_by_table() {
        assert_eq!(result_schema("select * from candidates where gym_id = $1").len(), 4);
        assert_eq!(result_schema("SELECT * FROM appointments WHERE id = $1").len(), 12);
        assert!(result_schema("UPDATE appointments SET status = $1 WHERE id = $2").is_empty());
    }

    #[test]
    fn members_see_only_their_appointments() {
        let member = Ulid::new();
        let trainer = Ulid::new();
        let a = Appointment {
            id: Ulid::new(),
            member_id: member,
            trainer_id: trainer,
            gym_service_id: Ulid::new(),
            date: chrono::NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            time: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            duration: 60,
            price: 500,
            status: AppointmentStatus::Pending,
            notes: None,
            created_at: 0,
            updated_at: None,
        };
        assert!(visible_to(&Actor::Admin, &a));
        assert!(visible_to(&Actor::Member(member), &a));
        assert!(visible_to(&Actor::Trainer(trainer), &a));
        assert!(!visible_to(&Actor::Member(Ulid::new()), &a));
        assert!(!visible_to(&Actor::Trainer(member), &a));
        assert!(require_admin(&Actor::Member(member)).is_err());
    }
}
