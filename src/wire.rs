use std::fmt::Debug;
use std::io;
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
use pgwire::tokio::{process_socket, TlsAcceptor};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::auth::RoomKeepAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ReservationQuery};

pub struct RoomKeepHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RoomKeepQueryParser>,
}

impl RoomKeepHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RoomKeepQueryParser),
        }
    }

    /// Parse, execute and record one statement.
    async fn run(&self, sql_text: &str) -> PgWireResult<Response> {
        let started = Instant::now();
        let cmd = match sql::parse_sql(sql_text) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::STATEMENTS_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        let result = self.execute_command(cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::STATEMENTS_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::STATEMENT_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertWindow {
                accommodation_id,
                price,
                start,
                end,
            } => {
                let id = engine
                    .add_availability(accommodation_id, price, start, end)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(window_id_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&id.to_string())?;
                let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::UpdateWindow { id, start, end } => {
                engine.edit_availability(id, start, end).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectWindows { accommodation_id } => {
                let windows = engine.list_windows(accommodation_id).await;
                Ok(window_rows(windows))
            }
            Command::InsertReservation(req) => {
                let receipt = engine.reserve(req).await.map_err(engine_err)?;
                let schema = Arc::new(receipt_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&receipt.id.to_string())?;
                encoder.encode_field(&receipt.price)?;
                let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::AcceptReservation { id } => {
                let outcome = engine.accept(id).await.map_err(engine_err)?;
                // The cascade rewrites the losers' rows too.
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1 + outcome.declined.len())))
            }
            Command::DeclineReservation { id } => {
                engine.decline(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CancelReservation { id } => {
                engine.cancel_by_guest(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectReservations(query) => {
                let reservations = match query {
                    ReservationQuery::ById(id) => match engine.get_reservation(id).await {
                        Ok(r) => vec![r],
                        Err(EngineError::NotFound(_)) => Vec::new(),
                        Err(e) => return Err(engine_err(e)),
                    },
                    ReservationQuery::PendingForHost(id) => engine.pending_for_host(id).await,
                    ReservationQuery::PendingForGuest(id) => engine.pending_for_guest(id).await,
                    ReservationQuery::ActiveForHost(id) => engine.active_for_host(id).await,
                    ReservationQuery::ActiveForGuest(id) => engine.active_for_guest(id).await,
                    ReservationQuery::PendingForAccommodation(id) => {
                        engine.pending_for_accommodation(id).await
                    }
                };
                Ok(reservation_rows(reservations))
            }
            Command::SelectQuotes {
                accommodation_ids,
                start,
                end,
            } => {
                let requests: Vec<_> = accommodation_ids.into_iter().map(|id| (id, start, end)).collect();
                let quotes = engine.quote_available(&requests).await.map_err(engine_err)?;

                let schema = Arc::new(quote_schema());
                let rows: Vec<PgWireResult<_>> = quotes
                    .into_iter()
                    .map(|q| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&q.accommodation_id.to_string())?;
                        encoder.encode_field(&q.price)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn window_rows(windows: Vec<AvailabilityWindow>) -> Response {
    let schema = Arc::new(window_schema());
    let rows: Vec<PgWireResult<_>> = windows
        .into_iter()
        .map(|w| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&w.id.to_string())?;
            encoder.encode_field(&w.accommodation_id.to_string())?;
            encoder.encode_field(&w.price)?;
            encoder.encode_field(&w.range.start)?;
            encoder.encode_field(&w.range.end)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn reservation_rows(reservations: Vec<Reservation>) -> Response {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.accommodation_id.to_string())?;
            encoder.encode_field(&r.host_id.to_string())?;
            encoder.encode_field(&r.guest_id.to_string())?;
            encoder.encode_field(&i64::from(r.guest_count))?;
            encoder.encode_field(&r.range.start)?;
            encoder.encode_field(&r.range.end)?;
            encoder.encode_field(&r.status.as_str())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn window_id_schema() -> Vec<FieldInfo> {
    vec![text_field("id")]
}

fn window_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("accommodation_id"),
        int_field("price"),
        int_field("start"),
        int_field("end"),
    ]
}

fn receipt_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), int_field("price")]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("accommodation_id"),
        text_field("host_id"),
        text_field("guest_id"),
        int_field("guest_count"),
        int_field("start"),
        int_field("end"),
        text_field("status"),
    ]
}

fn quote_schema() -> Vec<FieldInfo> {
    vec![text_field("accommodation_id"), int_field("price")]
}

/// Result columns for a statement that may still carry `$n` placeholders.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let trimmed = upper.trim_start();
    if trimmed.starts_with("SELECT") {
        if upper.contains("RESERVATIONS") {
            reservation_schema()
        } else if upper.contains("WINDOWS") {
            window_schema()
        } else if upper.contains("QUOTES") {
            quote_schema()
        } else {
            vec![]
        }
    } else if trimmed.starts_with("INSERT") {
        if upper.contains("RESERVATIONS") {
            receipt_schema()
        } else if upper.contains("WINDOWS") {
            window_id_schema()
        } else {
            vec![]
        }
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomKeepHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomKeepQueryParser;

#[async_trait]
impl QueryParser for RoomKeepQueryParser {
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
impl ExtendedQueryHandler for RoomKeepHandler {
    type Statement = String;
    type QueryParser = RoomKeepQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        self.run(&sql).await
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
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
/// Walks backwards so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomKeepFactory {
    handler: Arc<RoomKeepHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RoomKeepAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoomKeepFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = RoomKeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomKeepHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomKeepFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = RoomKeepFactory::new(engine, password);
    process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine failure class.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::InvalidArgument(_) | EngineError::LimitExceeded(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Timeout => "57014",
        EngineError::Internal(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    match &e {
        EngineError::Internal(msg) => warn!(error = %msg, "statement failed"),
        other => debug!(kind = other.kind(), error = %other, "statement rejected"),
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    debug!(error = %e, "unparseable statement");
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
