use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::GearloanAuthSource;
use crate::dates;
use crate::engine::TrackerError;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::{Pool, PoolManager};

pub struct GearloanHandler {
    pools: Arc<PoolManager>,
    query_parser: Arc<GearloanQueryParser>,
}

impl GearloanHandler {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self {
            pools,
            query_parser: Arc::new(GearloanQueryParser),
        }
    }

    async fn resolve_pool<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Pool>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.pools.get_or_create(&db).await.map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("pool error: {e}"),
            )))
        })
    }

    /// Parse and run one statement, recording query metrics.
    async fn run(&self, pool: &Pool, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "invalid", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(pool, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, pool: &Pool, cmd: Command) -> PgWireResult<Vec<Response>> {
        let tracker = &pool.tracker;
        match cmd {
            Command::InsertEquipment { id, name } => {
                tracker.add_equipment(&id, &name).await.map_err(tracker_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RenameEquipment { id, name } => {
                tracker.rename_equipment(&id, &name).await.map_err(tracker_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::InsertBooking {
                equipment_id,
                user_name,
                user_email,
                start_date,
                end_date,
            } => {
                let input = BookingInput {
                    id: None,
                    equipment_id,
                    user_name,
                    user_email,
                    start_date,
                    end_date,
                };
                let saved = tracker.save_booking(input).await.map_err(tracker_err)?;
                let names = equipment_names(&tracker.equipment().await);
                Ok(vec![booking_response(vec![saved], &names)])
            }
            Command::UpdateBooking { id, patch } => {
                tracker.amend_booking(&id, patch).await.map_err(tracker_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::ApproveReturn { id } => {
                let approved = tracker.approve_return(&id).await.map_err(tracker_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(usize::from(approved)))])
            }
            Command::DeleteBooking { id } => {
                let removed = tracker.delete_booking(&id).await.map_err(tracker_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(usize::from(removed)))])
            }
            Command::ReportDamage { booking_id, description } => {
                let recorded = tracker
                    .report_damage(&booking_id, &description)
                    .await
                    .map_err(tracker_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(usize::from(recorded)))])
            }
            Command::SelectEquipment => {
                let equipment = tracker.equipment().await;
                let schema = Arc::new(equipment_schema());
                let rows: Vec<PgWireResult<_>> = equipment
                    .iter()
                    .map(|e| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&e.id)?;
                        encoder.encode_field(&e.name)?;
                        encoder.encode_field(&(e.damage_history.len() as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBookings { equipment_id } => {
                let bookings = match equipment_id {
                    Some(id) => tracker.bookings_for(&id).await,
                    None => tracker.bookings().await,
                };
                let names = equipment_names(&tracker.equipment().await);
                Ok(vec![booking_response(bookings, &names)])
            }
            Command::SelectOverdue => {
                let queues = tracker.queues().await;
                let names = equipment_names(&tracker.equipment().await);
                Ok(vec![booking_response(queues.overdue, &names)])
            }
            Command::SelectPendingInspection => {
                let queues = tracker.queues().await;
                let names = equipment_names(&tracker.equipment().await);
                Ok(vec![booking_response(queues.pending_inspection, &names)])
            }
            Command::SelectDamageReports { equipment_id } => {
                let history = tracker.damage_history(&equipment_id).await;
                let schema = Arc::new(damage_schema());
                let rows: Vec<PgWireResult<_>> = history
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.date.to_rfc3339())?;
                        encoder.encode_field(&r.description)?;
                        encoder.encode_field(&r.reported_by_email)?;
                        encoder.encode_field(&r.booking_id)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectCalendar { month } => {
                let calendar = tracker.calendar(month).await;
                let label = dates::month_label(month);
                let schema = Arc::new(calendar_schema());
                let mut rows: Vec<PgWireResult<_>> = Vec::new();
                for row in &calendar {
                    if row.segments.is_empty() {
                        rows.push(encode_calendar_row(&schema, &label, row, None));
                    }
                    for seg in &row.segments {
                        rows.push(encode_calendar_row(&schema, &label, row, Some(seg)));
                    }
                }
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectReminder { booking_id } => {
                let request = tracker
                    .reminder_request(&booking_id)
                    .await
                    .ok_or_else(|| tracker_err(TrackerError::NotFound(booking_id.clone())))?;
                let due = request.due_date.to_string();
                let equipment_name = request.equipment_name.clone();
                let user_email = request.user_email.clone();
                let text = pool.reminders.request(request).await.ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "57014".into(),
                        format!("reminder for {booking_id} superseded by a newer request"),
                    )))
                })?;

                let schema = Arc::new(reminder_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&booking_id)?;
                encoder.encode_field(&equipment_name)?;
                encoder.encode_field(&user_email)?;
                encoder.encode_field(&due)?;
                encoder.encode_field(&text)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn equipment_names(equipment: &[Equipment]) -> HashMap<String, String> {
    equipment.iter().map(|e| (e.id.clone(), e.name.clone())).collect()
}

fn booking_response(bookings: Vec<Booking>, names: &HashMap<String, String>) -> Response {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id)?;
            encoder.encode_field(&b.equipment_id)?;
            encoder.encode_field(&names.get(&b.equipment_id).map_or(UNKNOWN, String::as_str))?;
            encoder.encode_field(&b.user_name)?;
            encoder.encode_field(&b.user_email)?;
            encoder.encode_field(&b.start_date.to_string())?;
            encoder.encode_field(&b.end_date.to_string())?;
            encoder.encode_field(&b.is_checked)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_calendar_row(
    schema: &Arc<Vec<FieldInfo>>,
    label: &str,
    row: &CalendarRow,
    seg: Option<&Segment>,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&label)?;
    encoder.encode_field(&row.equipment_id)?;
    encoder.encode_field(&row.equipment_name)?;
    encoder.encode_field(&seg.map(|s| s.booking_id.clone()))?;
    encoder.encode_field(&seg.map(|s| s.user_name.clone()))?;
    encoder.encode_field(&seg.map(|s| i32::try_from(s.start_column).unwrap_or(i32::MAX)))?;
    encoder.encode_field(&seg.map(|s| i32::try_from(s.span_days).unwrap_or(i32::MAX)))?;
    Ok(encoder.take_row())
}

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn equipment_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("damage_reports", Type::INT8),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("equipment_id", Type::VARCHAR),
        text_field("equipment_name", Type::VARCHAR),
        text_field("user_name", Type::VARCHAR),
        text_field("user_email", Type::VARCHAR),
        text_field("start_date", Type::VARCHAR),
        text_field("end_date", Type::VARCHAR),
        text_field("is_checked", Type::BOOL),
    ]
}

fn damage_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date", Type::VARCHAR),
        text_field("description", Type::VARCHAR),
        text_field("reported_by_email", Type::VARCHAR),
        text_field("booking_id", Type::VARCHAR),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        text_field("month", Type::VARCHAR),
        text_field("equipment_id", Type::VARCHAR),
        text_field("equipment_name", Type::VARCHAR),
        text_field("booking_id", Type::VARCHAR),
        text_field("user_name", Type::VARCHAR),
        text_field("start_column", Type::INT4),
        text_field("span_days", Type::INT4),
    ]
}

fn reminder_schema() -> Vec<FieldInfo> {
    vec![
        text_field("booking_id", Type::VARCHAR),
        text_field("equipment_name", Type::VARCHAR),
        text_field("user_email", Type::VARCHAR),
        text_field("due_date", Type::VARCHAR),
        text_field("email", Type::VARCHAR),
    ]
}

/// Result columns for a statement, decided from its text so that prepared
/// statements can be described before parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let normalized = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if normalized.starts_with("insert into bookings") {
        return booking_schema();
    }
    if !normalized.starts_with("select") {
        return vec![];
    }
    let table = normalized
        .split_once(" from ")
        .and_then(|(_, rest)| rest.split([' ', ';']).next())
        .unwrap_or("");
    match table {
        "equipment" => equipment_schema(),
        "bookings" | "overdue" | "pending_inspection" => booking_schema(),
        "damage_reports" => damage_schema(),
        "calendar" => calendar_schema(),
        "reminders" => reminder_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for GearloanHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let pool = self.resolve_pool(client).await?;
        self.run(&pool, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct GearloanQueryParser;

#[async_trait]
impl QueryParser for GearloanQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for GearloanHandler {
    type Statement = String;
    type QueryParser = GearloanQueryParser;

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
        let pool = self.resolve_pool(client).await?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&pool, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
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

pub struct GearloanFactory {
    handler: Arc<GearloanHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<GearloanAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl GearloanFactory {
    pub fn new(pools: Arc<PoolManager>, password: String) -> Self {
        let auth_source = GearloanAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(GearloanHandler::new(pools)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for GearloanFactory {
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
    pools: Arc<PoolManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(GearloanFactory::new(pools, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn sqlstate(e: &TrackerError) -> &'static str {
    match e {
        TrackerError::Validation(_) => "22023",
        TrackerError::Conflict { .. } => "23P01",
        TrackerError::NotFound(_) => "P0002",
        TrackerError::LimitExceeded(_) => "54000",
        TrackerError::Persistence(_) => "58030",
    }
}

fn tracker_err(e: TrackerError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
