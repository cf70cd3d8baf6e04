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
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use crate::auth::ChairtimeAuthSource;
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, Decision, ResultShape, SqlError};

pub struct ChairtimeHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ChairtimeQueryParser>,
}

impl ChairtimeHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ChairtimeQueryParser),
        }
    }

    /// Parse, run and time one statement.
    async fn run_sql(&self, sql: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        debug!("{label}: {sql}");

        let started = Instant::now();
        let result = self.execute_command(cmd, format).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);

        result.map_err(engine_err)
    }

    async fn execute_command(
        &self,
        cmd: Command,
        format: &Format,
    ) -> Result<Response, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUser { id, name, role } => {
                engine.register_user(id, name, role).await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertLeave { stylist_id, date } => {
                engine.record_leave(stylist_id, date).await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertAppointment {
                client_id,
                stylist_id,
                date,
                slot_number,
            } => {
                let outcome = engine
                    .create_appointment(client_id, stylist_id, date, slot_number)
                    .await?;
                let schema = Arc::new(booking_schema(format));
                let row = encode_booking(&schema, &outcome);
                Ok(Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(vec![row]),
                )))
            }
            Command::UpdateAppointmentStatus { id, decision } => {
                let appt = match decision {
                    Decision::Accept => engine.accept_appointment(&id).await?,
                    Decision::Reject => engine.reject_appointment(&id).await?,
                    Decision::Cancel => engine.cancel_appointment(&id).await?,
                };
                Ok(appointments_response(vec![appt], format))
            }
            Command::SelectAppointment { id } => {
                let appt = engine.get_appointment(&id).await?;
                Ok(appointments_response(vec![appt], format))
            }
            Command::SelectAllAppointments => {
                Ok(appointments_response(engine.list_all_appointments().await, format))
            }
            Command::SelectPendingForClient { client_id } => Ok(appointments_response(
                engine.list_pending_for_client(client_id).await,
                format,
            )),
            Command::SelectApprovedForClient { client_id } => Ok(appointments_response(
                engine.list_approved_for_client(client_id).await,
                format,
            )),
            Command::SelectRequestedForStylist { stylist_id } => Ok(appointments_response(
                engine.list_requested_for_stylist(stylist_id).await,
                format,
            )),
            Command::SelectUpcomingForStylist { stylist_id } => {
                let today = chrono::Utc::now().date_naive();
                Ok(appointments_response(
                    engine.list_upcoming_for_stylist(stylist_id, today).await,
                    format,
                ))
            }
            Command::SelectAvailableSlots { stylist_id, date } => {
                let slots = engine.available_slots(stylist_id, date).await?;

                let schema = Arc::new(fields(&SLOT_COLUMNS, format));
                let sid = stylist_id.to_string();
                let day = date.to_string();
                let rows: Vec<PgWireResult<DataRow>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&sid)?;
                        encoder.encode_field(&day)?;
                        encoder.encode_field(&i32::from(slot))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAvailableStylists { date } => {
                Ok(stylists_response(engine.available_stylists(date), format))
            }
            Command::SelectStylists => Ok(stylists_response(engine.list_stylists(), format)),
            Command::InsertService {
                name,
                duration,
                price,
                image_url,
            } => {
                let service = engine.create_service(name, duration, price, image_url).await?;
                Ok(services_response(vec![service], format))
            }
            Command::UpdateService { id, patch } => {
                let service = engine.update_service(&id, patch).await?;
                Ok(services_response(vec![service], format))
            }
            Command::DeleteService { id } => {
                engine.delete_service(&id).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectService { id } => {
                Ok(services_response(vec![engine.get_service(&id)?], format))
            }
            Command::SelectServices => Ok(services_response(engine.list_services(), format)),
        }
    }
}

// ── Row schemas ──────────────────────────────────────────────────

const APPOINTMENT_COLUMNS: [(&str, Type); 8] = [
    ("id", Type::VARCHAR),
    ("client_id", Type::VARCHAR),
    ("stylist_id", Type::VARCHAR),
    ("date", Type::VARCHAR),
    ("slot_number", Type::INT4),
    ("status", Type::VARCHAR),
    ("created_at", Type::INT8),
    ("updated_at", Type::INT8),
];

const SLOT_COLUMNS: [(&str, Type); 3] = [
    ("stylist_id", Type::VARCHAR),
    ("date", Type::VARCHAR),
    ("slot_number", Type::INT4),
];

const STYLIST_COLUMNS: [(&str, Type); 2] = [("id", Type::VARCHAR), ("name", Type::VARCHAR)];

const SERVICE_COLUMNS: [(&str, Type); 5] = [
    ("id", Type::VARCHAR),
    ("name", Type::VARCHAR),
    ("duration", Type::INT4),
    ("price", Type::INT8),
    ("image_url", Type::VARCHAR),
];

/// Field list for `columns`, each encoded as the client asked for that position.
fn fields(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn appointment_schema(format: &Format) -> Vec<FieldInfo> {
    fields(&APPOINTMENT_COLUMNS, format)
}

/// Appointment columns plus `stylist_on_leave`.
fn booking_schema(format: &Format) -> Vec<FieldInfo> {
    let mut columns = APPOINTMENT_COLUMNS.to_vec();
    columns.push(("stylist_on_leave", Type::BOOL));
    fields(&columns, format)
}

fn schema_for(shape: ResultShape, format: &Format) -> Vec<FieldInfo> {
    match shape {
        ResultShape::Empty => vec![],
        ResultShape::Booking => booking_schema(format),
        ResultShape::Appointments => appointment_schema(format),
        ResultShape::Slots => fields(&SLOT_COLUMNS, format),
        ResultShape::Stylists => fields(&STYLIST_COLUMNS, format),
        ResultShape::Services => fields(&SERVICE_COLUMNS, format),
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn encode_appointment_fields(encoder: &mut DataRowEncoder, a: &Appointment) -> PgWireResult<()> {
    encoder.encode_field(&a.id.to_string())?;
    encoder.encode_field(&a.client_id.to_string())?;
    encoder.encode_field(&a.stylist_id.to_string())?;
    encoder.encode_field(&a.date.to_string())?;
    encoder.encode_field(&i32::from(a.slot_number))?;
    encoder.encode_field(&a.status.to_string())?;
    encoder.encode_field(&a.created_at)?;
    encoder.encode_field(&a.updated_at)?;
    Ok(())
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, outcome: &BookingOutcome) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    match outcome {
        BookingOutcome::Booked(appt) => {
            encode_appointment_fields(&mut encoder, appt)?;
            encoder.encode_field(&false)?;
        }
        BookingOutcome::StylistOnLeave => {
            for _ in 0..4 {
                encoder.encode_field(&None::<String>)?;
            }
            encoder.encode_field(&None::<i32>)?;
            encoder.encode_field(&None::<String>)?;
            encoder.encode_field(&None::<i64>)?;
            encoder.encode_field(&None::<i64>)?;
            encoder.encode_field(&true)?;
        }
    }
    Ok(encoder.take_row())
}

fn appointments_response(list: Vec<Appointment>, format: &Format) -> Response {
    let schema = Arc::new(appointment_schema(format));
    let rows: Vec<PgWireResult<DataRow>> = list
        .iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode_appointment_fields(&mut encoder, a)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn stylists_response(list: Vec<User>, format: &Format) -> Response {
    let schema = Arc::new(fields(&STYLIST_COLUMNS, format));
    let rows: Vec<PgWireResult<DataRow>> = list
        .iter()
        .map(|u| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&u.id.to_string())?;
            encoder.encode_field(&u.name)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn services_response(list: Vec<Service>, format: &Format) -> Response {
    let schema = Arc::new(fields(&SERVICE_COLUMNS, format));
    let rows: Vec<PgWireResult<DataRow>> = list
        .iter()
        .map(|s| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&s.id.to_string())?;
            encoder.encode_field(&s.name)?;
            // at most MAX_SERVICE_MINUTES
            encoder.encode_field(&(s.duration as i32))?;
            encoder.encode_field(&s.price)?;
            encoder.encode_field(&s.image_url)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

#[async_trait]
impl SimpleQueryHandler for ChairtimeHandler {
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
        let query = query.trim().trim_end_matches(';').trim();
        if query.is_empty() {
            return Ok(vec![Response::EmptyQuery]);
        }
        Ok(vec![self.run_sql(query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ChairtimeQueryParser;

#[async_trait]
impl QueryParser for ChairtimeQueryParser {
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
        Ok(parameter_types(stmt))
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        let format = column_format.unwrap_or(&Format::UnifiedText);
        Ok(schema_for(sql::result_shape(stmt), format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ChairtimeHandler {
    type Statement = String;
    type QueryParser = ChairtimeQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run_sql(&sql, &portal.result_column_format).await
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
        Ok(DescribeStatementResponse::new(
            parameter_types(&target.statement),
            schema_for(sql::result_shape(&target.statement), &Format::UnifiedText),
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
            sql::result_shape(&target.statement.statement),
            &target.result_column_format,
        )))
    }
}

/// Every parameter is sent as text; the SQL layer does the typing.
fn parameter_types(sql: &str) -> Vec<Type> {
    vec![Type::VARCHAR; count_params(sql)]
}

/// Count the highest $N parameter placeholder in the SQL string.
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

/// Substitute $1, $2, ... with bound text-format values in one left-to-right
/// pass. Inserted values are never rescanned, so a value containing `$1`
/// stays as written. Placeholders with no bound parameter are left alone.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let bytes = sql.as_bytes();
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let dollar = i;
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let param = sql[start..i]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        let Some(param) = param else {
            continue;
        };
        result.push_str(&sql[copied..dollar]);
        match param {
            Some(value) => {
                let text = String::from_utf8_lossy(value.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = i;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ChairtimeFactory {
    handler: Arc<ChairtimeHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ChairtimeAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ChairtimeFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ChairtimeAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ChairtimeHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ChairtimeFactory {
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
    let factory = ChairtimeFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e.kind() {
        ErrorKind::NotFound => "P0002",
        ErrorKind::InvalidId => "22P02",
        ErrorKind::Invalid => "22023",
        ErrorKind::Conflict => match e {
            EngineError::AlreadyInState { .. } => "55000",
            _ => "23505",
        },
        ErrorKind::Unavailable => "55P03",
        ErrorKind::Internal => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.is_client_error() {
        warn!("request rejected: {e}");
    } else {
        error!("request failed: {e}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    warn!("bad statement: {e}");
    let code = match e {
        SqlError::InvalidId(_) => "22P02",
        SqlError::InvalidDate(_) | SqlError::StatusNotSettable(_) => "22023",
        SqlError::TooLong(_) => "54000",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
