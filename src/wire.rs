use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::noop::NoopStartupHandler;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::engine::{window_for, Engine, EngineError, Locale};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct SlotgridHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotgridQueryParser>,
    default_locale: Locale,
    shutdown: CancellationToken,
}

impl SlotgridHandler {
    pub fn new(
        tenant_manager: Arc<TenantManager>,
        default_locale: Locale,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotgridQueryParser),
            default_locale,
            shutdown,
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

    /// Parse, run and account one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "table" => "unknown", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let table = observability::command_label(&cmd);
        let started = Instant::now();
        let cancel = self.shutdown.child_token();

        let result = self.execute_command(engine, cmd, &cancel).await;

        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "table" => table)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "table" => table, "status" => status)
            .increment(1);
        result.map_err(engine_err)
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
        cancel: &CancellationToken,
    ) -> Result<Response, EngineError> {
        match cmd {
            Command::SelectGrid { params } => {
                let query = params.into_query(self.default_locale);
                let grid = engine.build(&query, cancel).await?;
                let schema = Arc::new(grid_schema());

                let rows: Vec<PgWireResult<_>> = grid
                    .resources
                    .iter()
                    .flat_map(|r| {
                        grid.row(&r.id)
                            .unwrap_or_default()
                            .iter()
                            .map(move |cell| (r, cell))
                    })
                    .map(|(resource, cell)| {
                        let ids: Vec<String> =
                            cell.class.bookings().iter().map(|b| b.id.to_string()).collect();
                        let representative = cell.class.representative().map(|b| b.id.to_string());
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&resource.id.to_string())?;
                        encoder.encode_field(&resource.name)?;
                        encoder.encode_field(&cell.slot.span.start)?;
                        encoder.encode_field(&cell.slot.span.end)?;
                        encoder.encode_field(&cell.class.status())?;
                        encoder.encode_field(&cell.class.legend().as_str())?;
                        encoder.encode_field(&ids.join(","))?;
                        encoder.encode_field(&representative)?;
                        encoder.encode_field(&grid.label)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                debug!(
                    "grid: {} resources, {} rows, {} contested",
                    grid.resources.len(),
                    rows.len(),
                    grid.conflicts.len()
                );
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectCalendarWindow {
                anchor_date,
                granularity,
                direction,
                locale,
            } => {
                let locale = locale.unwrap_or(self.default_locale);
                let mut window = window_for(anchor_date, granularity, locale.first_weekday())?;
                if let Some(direction) = direction {
                    window = window.navigate(direction)?;
                }
                let span = window.span();
                let schema = Arc::new(calendar_window_schema());
                let rows: Vec<PgWireResult<_>> = std::iter::once(window)
                    .map(|w| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&w.anchor.to_string())?;
                        encoder.encode_field(&w.start.to_string())?;
                        encoder.encode_field(&w.end.to_string())?;
                        encoder.encode_field(&span.start)?;
                        encoder.encode_field(&span.end)?;
                        encoder.encode_field(&w.label(locale))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAvailability {
                params,
                min_duration,
            } => {
                let grid = engine
                    .build(&params.into_query(self.default_locale), cancel)
                    .await?;
                let spans = grid.resources.iter().flat_map(|r| {
                    grid.free_spans(&r.id, min_duration)
                        .into_iter()
                        .map(move |s| (r.id, s))
                });
                Ok(span_response(spans))
            }
            Command::SelectConflicts { params } => {
                let grid = engine
                    .build(&params.into_query(self.default_locale), cancel)
                    .await?;
                let spans = grid.resources.iter().flat_map(|r| {
                    grid.conflicts
                        .get(&r.id)
                        .into_iter()
                        .flatten()
                        .map(move |s| (r.id, *s))
                });
                Ok(span_response(spans))
            }
            Command::SelectResources { category } => {
                let resources = engine.list_resources(category, cancel).await?;
                let schema = Arc::new(resources_schema());
                let rows: Vec<PgWireResult<_>> = resources
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.name)?;
                        encoder.encode_field(&r.category.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectBookings {
                resource_id,
                start,
                end,
            } => {
                let window =
                    Span::try_new(start, end).ok_or(EngineError::InvalidRange(Span { start, end }))?;
                let bookings = engine
                    .bookings_for_resource(resource_id, window, cancel)
                    .await?;
                let schema = Arc::new(bookings_schema());
                // `start >= a AND "end" <= b`: only bookings lying inside the range
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .filter(|b| window.contains(&b.span))
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.resource_id.to_string())?;
                        encoder.encode_field(&b.span.start)?;
                        encoder.encode_field(&b.span.end)?;
                        encoder.encode_field(&b.kind.as_str())?;
                        encoder.encode_field(&b.approval.as_str())?;
                        encoder.encode_field(&Legend::for_booking(&b).as_str())?;
                        encoder.encode_field(&b.responsible)?;
                        encoder.encode_field(&b.project_id.map(|p| p.to_string()))?;
                        encoder.encode_field(&b.rejection_reason)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn span_response(spans: impl Iterator<Item = (ulid::Ulid, Span)>) -> Response {
    let schema = Arc::new(span_schema());
    let rows: Vec<PgWireResult<_>> = spans
        .map(|(resource_id, span)| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&resource_id.to_string())?;
            encoder.encode_field(&span.start)?;
            encoder.encode_field(&span.end)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Schemas ──────────────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn grid_schema() -> Vec<FieldInfo> {
    vec![
        text("resource_id"),
        text("resource_name"),
        int8("slot_start"),
        int8("slot_end"),
        text("status"),
        text("legend"),
        text("booking_ids"),
        text("representative_id"),
        text("label"),
    ]
}

fn calendar_window_schema() -> Vec<FieldInfo> {
    vec![
        text("anchor_date"),
        text("window_start"),
        text("window_end"),
        int8("start_ms"),
        int8("end_ms"),
        text("label"),
    ]
}

/// Shared by `availability` and `conflicts`.
fn span_schema() -> Vec<FieldInfo> {
    vec![text("resource_id"), int8("start"), int8("end")]
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("name"), text("category")]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("resource_id"),
        int8("start"),
        int8("end"),
        text("kind"),
        text("approval"),
        text("legend"),
        text("responsible"),
        text("project_id"),
        text("rejection_reason"),
    ]
}

fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::target_table(sql).as_deref() {
        Some("grid") => grid_schema(),
        Some("calendar_window") => calendar_window_schema(),
        Some("availability") | Some("conflicts") => span_schema(),
        Some("resources") => resources_schema(),
        Some("bookings") => bookings_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotgridHandler {
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
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotgridQueryParser;

#[async_trait]
impl QueryParser for SlotgridQueryParser {
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
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotgridHandler {
    type Statement = String;
    type QueryParser = SlotgridQueryParser;

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
        self.run(&engine, &sql).await
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
            schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

// Read-only server with no credentials: every startup is accepted and the
// database name picks the training center.
impl NoopStartupHandler for SlotgridHandler {}

/// SQL text split at `$N` placeholders. Quoted literals and identifiers stay
/// plain text.
enum Piece<'a> {
    Text(&'a str),
    Param { index: usize, raw: &'a str },
}

fn split_params(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut quote: Option<u8> = None;
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves us inside
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                match sql[i + 1..end].parse::<usize>() {
                    Ok(index) => {
                        if text_start < i {
                            pieces.push(Piece::Text(&sql[text_start..i]));
                        }
                        pieces.push(Piece::Param {
                            index,
                            raw: &sql[i..end],
                        });
                        text_start = end;
                        i = end;
                    }
                    Err(_) => i += 1,
                }
            }
            None => i += 1,
        }
    }
    if text_start < bytes.len() {
        pieces.push(Piece::Text(&sql[text_start..]));
    }
    pieces
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    split_params(sql)
        .iter()
        .filter_map(|piece| match piece {
            Piece::Param { index, .. } => Some(*index),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Substitute bound parameter values (text format) for their placeholders.
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass: each placeholder is replaced exactly once and
/// inserted values are never rescanned. Placeholders without a bound value
/// are kept as written so the parser reports them.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_params(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param { index, raw } => {
                match index.checked_sub(1).and_then(|i| params.get(i)) {
                    Some(Some(bytes)) => {
                        let text = String::from_utf8_lossy(bytes.as_ref());
                        out.push('\'');
                        out.push_str(&text.replace('\'', "''"));
                        out.push('\'');
                    }
                    Some(None) => out.push_str("NULL"),
                    None => out.push_str(raw),
                }
            }
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotgridFactory {
    handler: Arc<SlotgridHandler>,
    noop: Arc<NoopHandler>,
}

impl SlotgridFactory {
    pub fn new(
        tenant_manager: Arc<TenantManager>,
        default_locale: Locale,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handler: Arc::new(SlotgridHandler::new(
                tenant_manager,
                default_locale,
                shutdown,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotgridFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<SlotgridFactory>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory)
        .await
        .map_err(std::io::Error::other)
}

// ── Error mapping ────────────────────────────────────────────────

/// SQLSTATE for an engine error.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidRange(_) | EngineError::InvalidDuration(_) => "22023",
        EngineError::NotFound(_) => "42704",
        EngineError::Cancelled => "57014",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Source(_) => "58030",
        EngineError::ResourceMismatch { .. } | EngineError::Internal(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if !e.is_recoverable() {
        error!("query failed: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
