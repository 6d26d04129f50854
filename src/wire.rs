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
use rust_decimal::Decimal;
use tokio::net::TcpStream;
use tracing::error;

use crate::auth::SlotkeeperAuthSource;
use crate::engine::{now_ms, Actor, Engine, EngineError, LineKind, ReservationRequest, Verdict};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct SlotkeeperHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotkeeperQueryParser>,
}

impl SlotkeeperHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotkeeperQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertFacility {
                id,
                name,
                hourly_rate,
                capacity,
                category,
            } => {
                engine
                    .create_facility(id, name, hourly_rate, capacity, category)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::DeactivateFacility { id } => {
                engine.deactivate_facility(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::CloseFacility {
                facility_id,
                reason,
                until,
            } => {
                engine
                    .close_facility(facility_id, reason, until)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::ReopenFacility { facility_id } => {
                engine.reopen_facility(facility_id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::InsertPricingOption {
                id,
                facility_id,
                name,
                price,
                sort_order,
            } => {
                engine
                    .add_pricing_option(id, facility_id, name, price, sort_order)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::RetirePricingOption { id } => {
                engine.retire_pricing_option(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::InsertReservation {
                id,
                facility_id,
                user_id,
                start,
                end,
                addons,
                contact,
            } => {
                let req = ReservationRequest {
                    id,
                    facility_id,
                    user_id,
                    span: Span { start, end },
                    addon_ids: addons,
                    contact,
                };
                engine
                    .create_reservation(req, now_ms())
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::CancelReservation { id, user_id } => {
                engine
                    .cancel_reservation(id, &actor(user_id))
                    .await
                    .map_err(engine_err)?;
                Ok(deleted())
            }
            Command::RecordPayment {
                reservation_id,
                verified,
            } => {
                let result = if verified {
                    engine.verify_payment(reservation_id).await
                } else {
                    engine.record_payment_proof(reservation_id).await
                };
                result.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::RejectPaymentProof { reservation_id } => {
                engine
                    .reject_payment_proof(reservation_id)
                    .await
                    .map_err(engine_err)?;
                Ok(deleted())
            }
            Command::JoinWaitlist {
                id,
                facility_id,
                user_id,
                start,
                end,
            } => {
                engine
                    .join_waitlist(id, facility_id, user_id, Span { start, end }, now_ms())
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::LeaveWaitlist { id, user_id } => {
                engine
                    .leave_waitlist(id, &actor(user_id))
                    .await
                    .map_err(engine_err)?;
                Ok(deleted())
            }
            Command::SelectFacilities => {
                let facilities = engine.list_facilities().await;
                Ok(rows("facilities", facilities, |enc, f| {
                    enc.encode_field(&f.id.to_string())?;
                    enc.encode_field(&f.name)?;
                    enc.encode_field(&money(f.hourly_rate))?;
                    enc.encode_field(&i64::from(f.capacity))?;
                    enc.encode_field(&f.category)?;
                    enc.encode_field(&f.active)?;
                    enc.encode_field(&f.closure.as_ref().map(|c| c.reason.clone()))?;
                    enc.encode_field(&f.closure.and_then(|c| c.until).map(|d| d.to_string()))
                }))
            }
            Command::SelectPricingOptions { facility_id } => {
                let options = engine
                    .active_pricing_options(facility_id)
                    .await
                    .map_err(engine_err)?;
                Ok(rows("pricing_options", options, |enc, o| {
                    enc.encode_field(&o.id.to_string())?;
                    enc.encode_field(&o.facility_id.to_string())?;
                    enc.encode_field(&o.name)?;
                    enc.encode_field(&money(o.price))?;
                    enc.encode_field(&o.sort_order)
                }))
            }
            Command::SelectReservations { facility_id } => {
                let reservations = engine
                    .reservations_for_facility(facility_id)
                    .await
                    .map_err(engine_err)?;
                Ok(rows("reservations", reservations, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.facility_id.to_string())?;
                    enc.encode_field(&r.user_id)?;
                    enc.encode_field(&r.span.start)?;
                    enc.encode_field(&r.span.end)?;
                    enc.encode_field(&r.status.to_string())?;
                    enc.encode_field(&money(r.total_amount))?;
                    enc.encode_field(&r.payment_status.as_str().to_string())?;
                    enc.encode_field(&r.payment_deadline)?;
                    enc.encode_field(&r.payment_proof)?;
                    let addons: Vec<String> = r.addon_ids.iter().map(|id| id.to_string()).collect();
                    enc.encode_field(&addons.join(","))?;
                    enc.encode_field(&r.created_at)
                }))
            }
            Command::SelectWaitlist { user_id } => {
                let entries = engine.waitlist_for_user(&user_id).await;
                Ok(rows("waitlist", entries, |enc, w| {
                    enc.encode_field(&w.id.to_string())?;
                    enc.encode_field(&w.facility_id.to_string())?;
                    enc.encode_field(&w.user_id)?;
                    enc.encode_field(&w.span.start)?;
                    enc.encode_field(&w.span.end)?;
                    enc.encode_field(&w.created_at)
                }))
            }
            Command::SelectAvailability { facility_id, date } => {
                let schedule = engine.availability(facility_id, date).await.map_err(engine_err)?;
                let fid = facility_id.to_string();
                let rules = engine.rules();
                Ok(rows("availability", schedule.availability.free, |enc, span| {
                    enc.encode_field(&fid)?;
                    enc.encode_field(&span.start)?;
                    enc.encode_field(&span.end)?;
                    enc.encode_field(&rules.format_window(&span))
                }))
            }
            Command::SelectSlots { facility_id, date } => {
                let schedule = engine.availability(facility_id, date).await.map_err(engine_err)?;
                let fid = facility_id.to_string();
                let rules = engine.rules();
                Ok(rows("slots", schedule.slots, |enc, slot| {
                    enc.encode_field(&fid)?;
                    enc.encode_field(&slot.span.start)?;
                    enc.encode_field(&slot.span.end)?;
                    enc.encode_field(&rules.format_time(slot.span.start))?;
                    enc.encode_field(&slot.state.as_str().to_string())
                }))
            }
            Command::SelectOccupancy { facility_id, date } => {
                let day = engine
                    .availability(facility_id, date)
                    .await
                    .map_err(engine_err)?
                    .availability;
                let free = serde_json::to_string(&day.free).map_err(|e| internal_err(e.to_string()))?;
                let fid = facility_id.to_string();
                Ok(rows("occupancy", [day], |enc, day| {
                    enc.encode_field(&fid)?;
                    enc.encode_field(&day.date.to_string())?;
                    enc.encode_field(&day.fully_booked)?;
                    enc.encode_field(&day.utilization_percent)?;
                    enc.encode_field(&day.closed)?;
                    enc.encode_field(&free)
                }))
            }
            Command::SelectValidation {
                facility_id,
                start,
                end,
            } => {
                let verdict = engine
                    .validate_booking(facility_id, Span { start, end }, now_ms())
                    .await
                    .map_err(engine_err)?;
                let lines: Vec<(Option<String>, Option<String>)> = match &verdict {
                    Verdict::Accept => vec![(None, None)],
                    Verdict::Reject(reasons) => reasons
                        .iter()
                        .map(|r| (Some(r.kind().to_string()), Some(r.to_string())))
                        .collect(),
                };
                let accepted = verdict.is_accepted();
                Ok(rows("validation", lines, |enc, (kind, message)| {
                    enc.encode_field(&accepted)?;
                    enc.encode_field(&kind)?;
                    enc.encode_field(&message)
                }))
            }
            Command::SelectQuote {
                facility_id,
                start,
                end,
                addons,
            } => {
                let quote = engine
                    .quote(facility_id, Span { start, end }, &addons)
                    .await
                    .map_err(engine_err)?;
                let mut lines: Vec<(&'static str, String, Decimal)> = quote
                    .breakdown
                    .iter()
                    .map(|item| {
                        let kind = match item.kind {
                            LineKind::Facility => "facility",
                            LineKind::Addon => "addon",
                        };
                        (kind, item.label.clone(), item.amount)
                    })
                    .collect();
                lines.push(("total", "Total".into(), quote.display_total()));
                Ok(rows("quote", lines, |enc, (kind, label, amount)| {
                    enc.encode_field(&kind.to_string())?;
                    enc.encode_field(&label)?;
                    enc.encode_field(&money(amount))
                }))
            }
        }
    }
}

fn actor(user_id: Option<String>) -> Actor {
    user_id.map_or(Actor::Admin, Actor::User)
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

fn money(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// Encode one row per item against the table's result schema.
fn rows<T>(
    table: &str,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(result_schema(table));
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

/// Result columns for each readable table. Amounts are rendered as text.
fn result_schema(table: &str) -> Vec<FieldInfo> {
    match table {
        "facilities" => vec![
            field("id", Type::VARCHAR),
            field("name", Type::VARCHAR),
            field("hourly_rate", Type::VARCHAR),
            field("capacity", Type::INT8),
            field("category", Type::VARCHAR),
            field("active", Type::BOOL),
            field("closed_reason", Type::VARCHAR),
            field("closed_until", Type::VARCHAR),
        ],
        "pricing_options" => vec![
            field("id", Type::VARCHAR),
            field("facility_id", Type::VARCHAR),
            field("name", Type::VARCHAR),
            field("price", Type::VARCHAR),
            field("sort_order", Type::INT4),
        ],
        "reservations" => vec![
            field("id", Type::VARCHAR),
            field("facility_id", Type::VARCHAR),
            field("user_id", Type::VARCHAR),
            field("start", Type::INT8),
            field("end", Type::INT8),
            field("status", Type::VARCHAR),
            field("total_amount", Type::VARCHAR),
            field("payment_status", Type::VARCHAR),
            field("payment_deadline", Type::INT8),
            field("payment_proof", Type::BOOL),
            field("addons", Type::VARCHAR),
            field("created_at", Type::INT8),
        ],
        "waitlist" => vec![
            field("id", Type::VARCHAR),
            field("facility_id", Type::VARCHAR),
            field("user_id", Type::VARCHAR),
            field("start", Type::INT8),
            field("end", Type::INT8),
            field("created_at", Type::INT8),
        ],
        "availability" => vec![
            field("facility_id", Type::VARCHAR),
            field("start", Type::INT8),
            field("end", Type::INT8),
            field("label", Type::VARCHAR),
        ],
        "slots" => vec![
            field("facility_id", Type::VARCHAR),
            field("start", Type::INT8),
            field("end", Type::INT8),
            field("label", Type::VARCHAR),
            field("state", Type::VARCHAR),
        ],
        "occupancy" => vec![
            field("facility_id", Type::VARCHAR),
            field("date", Type::VARCHAR),
            field("fully_booked", Type::BOOL),
            field("utilization_percent", Type::FLOAT8),
            field("closed", Type::BOOL),
            field("free", Type::VARCHAR),
        ],
        "validation" => vec![
            field("accepted", Type::BOOL),
            field("reason", Type::VARCHAR),
            field("message", Type::VARCHAR),
        ],
        "quote" => vec![
            field("kind", Type::VARCHAR),
            field("label", Type::VARCHAR),
            field("amount", Type::VARCHAR),
        ],
        _ => vec![],
    }
}

fn describe(sql: &str) -> Vec<FieldInfo> {
    sql::select_table(sql).map_or_else(Vec::new, |table| result_schema(&table))
}

#[async_trait]
impl SimpleQueryHandler for SlotkeeperHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(&engine, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotkeeperQueryParser;

#[async_trait]
impl QueryParser for SlotkeeperQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotkeeperHandler {
    type Statement = String;
    type QueryParser = SlotkeeperQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(&engine, cmd).await
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
        Ok(DescribeStatementResponse::new(param_types, describe(&target.statement)))
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
        Ok(DescribePortalResponse::new(describe(&target.statement.statement)))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    substitute(&portal.statement.statement, &portal.parameters)
}

fn substitute<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Connection ───────────────────────────────────────────────────

pub struct SlotkeeperFactory {
    handler: Arc<SlotkeeperHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SlotkeeperAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotkeeperFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SlotkeeperAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotkeeperHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotkeeperFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(SlotkeeperFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn internal_err(message: String) -> PgWireError {
    user_error("XX000", message)
}

/// SQLSTATE for an engine failure; conflicts and retryable lock timeouts
/// get their own codes so clients can tell them apart.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Rejected(_) if e.is_conflict() => "23P01",
        EngineError::Rejected(_) => "22023",
        EngineError::Configuration(_) => "XX000",
        EngineError::Concurrency(_) => "40001",
        EngineError::IllegalTransition { .. } => "55000",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::NotOwner(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::Configuration(msg) = &e {
        error!(target: "slotkeeper::config", "{msg}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;
    use crate::engine::Rejection;

    #[test]
    fn params_counted_by_highest_index() {
        assert_eq!(count_params("SELECT * FROM slots WHERE facility_id = $1 AND date = $2"), 2);
        assert_eq!(count_params("SELECT * FROM facilities"), 0);
        assert_eq!(count_params("x = $10 AND y = $3"), 10);
    }

    #[test]
    fn substitution_quotes_and_nulls() {
        let params: Vec<Option<&[u8]>> = vec![Some(b"O'Hara"), None, Some(b"ten")];
        let mut all = params.clone();
        all.resize(10, Some(b"x"));
        assert_eq!(
            substitute("VALUES ($1, $2, $3)", &params),
            "VALUES ('O''Hara', NULL, 'ten')"
        );
        assert_eq!(substitute("$1 $10", &all), "'O''Hara' 'x'");
    }

    #[test]
    fn sqlstates_keep_error_kinds_apart() {
        let conflict = EngineError::Rejected(vec![Rejection::Conflict {
            windows: vec![Span::new(0, 10)],
            labels: vec![],
        }]);
        let invalid = EngineError::Rejected(vec![Rejection::EndBeforeStart]);
        assert_eq!(sqlstate(&conflict), "23P01");
        assert_eq!(sqlstate(&invalid), "22023");
        assert_eq!(sqlstate(&EngineError::Concurrency(Ulid::new())), "40001");
        assert_eq!(sqlstate(&EngineError::Configuration("rate".into())), "XX000");
        assert_eq!(sqlstate(&EngineError::LimitExceeded("x")), "54000");
    }

    #[test]
    fn described_schemas_follow_table() {
        let slots = describe("SELECT * FROM slots WHERE facility_id = $1 AND date = $2");
        let names: Vec<String> = slots.iter().map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["facility_id", "start", "end", "label", "state"]);
        assert!(describe("INSERT INTO payments (reservation_id, verified) VALUES ($1, true)").is_empty());
    }

    #[test]
    fn money_renders_two_places() {
        assert_eq!(money(Decimal::from(500)), "500.00");
        assert_eq!(money(Decimal::new(12346, 3)), "12.35");
    }
}
