use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{
    AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler,
};
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
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct ReactorbookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ReactorbookQueryParser>,
}

impl ReactorbookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ReactorbookQueryParser),
        }
    }

    /// Parse and run one statement, recording query metrics.
    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "invalid", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertReactor { serial_no, spec } => {
                engine.create_reactor(serial_no, spec).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateReactor { serial_no, patch } => {
                engine.update_reactor(&serial_no, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteReactor { serial_no } => {
                engine.delete_reactor(&serial_no).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectReactors { filter } => {
                let reactors: Vec<ReactorInfo> = engine
                    .list_reactors()
                    .await
                    .into_iter()
                    .filter(|r| filter.matches(&r.spec))
                    .collect();
                let schema = Arc::new(reactors_schema());
                let rows: Vec<PgWireResult<_>> = reactors
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.serial_no)?;
                        encoder.encode_field(&(r.spec.max_capacity_liters as i64))?;
                        encoder.encode_field(&r.spec.capacity_range)?;
                        encoder.encode_field(&r.spec.moc)?;
                        encoder.encode_field(&r.spec.agitator_type)?;
                        encoder.encode_field(&r.spec.plant_name)?;
                        encoder.encode_field(&r.spec.block_name)?;
                        encoder.encode_field(&r.spec.commission_date)?;
                        encoder.encode_field(&r.spec.notes)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertCommitment {
                id,
                commitment,
                status,
            } => {
                engine
                    .create_commitment(id, commitment, status)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteCommitment { id } => {
                engine.delete_commitment(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectCommitments { reactor } => {
                let commitments = engine.list_commitments(reactor.as_deref()).await;
                let schema = Arc::new(commitments_schema());
                let rows: Vec<PgWireResult<_>> = commitments
                    .iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.id.to_string())?;
                        encoder.encode_field(&c.reactor)?;
                        encoder.encode_field(&c.team)?;
                        encoder.encode_field(&c.product_name)?;
                        encoder.encode_field(&c.stage)?;
                        encoder.encode_field(&c.batch_number)?;
                        encoder.encode_field(&c.operation)?;
                        encoder.encode_field(&c.span.start)?;
                        encoder.encode_field(&c.span.end)?;
                        encoder.encode_field(&c.status.as_str())?;
                        encoder.encode_field(&c.requested_by)?;
                        encoder.encode_field(&c.created_at)?;
                        encoder.encode_field(&c.updated_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertMaintenance { id, window } => {
                engine
                    .schedule_maintenance(id, window)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::RescheduleMaintenance {
                id,
                start,
                end,
                updated_by,
            } => {
                engine
                    .reschedule_maintenance(id, start, end, updated_by)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CancelMaintenance { id, updated_by } => {
                engine
                    .cancel_maintenance(id, updated_by)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectMaintenance { reactor } => {
                let windows = engine.list_maintenance_windows(reactor.as_deref()).await;
                let now = crate::engine::now_ms();
                let schema = Arc::new(maintenance_schema());
                let rows: Vec<PgWireResult<_>> = windows
                    .iter()
                    .map(|w| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&w.id.to_string())?;
                        encoder.encode_field(&w.reactor)?;
                        encoder.encode_field(&w.category.as_str())?;
                        encoder.encode_field(&w.reason)?;
                        encoder.encode_field(&w.span.start)?;
                        encoder.encode_field(&w.span.end)?;
                        encoder.encode_field(&w.updated_by)?;
                        encoder.encode_field(&w.updated_at)?;
                        encoder.encode_field(&w.cancelled)?;
                        encoder.encode_field(&w.phase(now).as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectOccupancy { start, end, filter } => {
                let period =
                    Span::try_new(start, end).ok_or(EngineError::InvalidInterval { start, end });
                let report = engine
                    .compute_occupancy(period.map_err(engine_err)?, &filter)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(occupancy_schema());
                let rows: Vec<PgWireResult<_>> = report
                    .iter()
                    .map(|m| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&m.reactor)?;
                        encoder.encode_field(&m.plant_name)?;
                        encoder.encode_field(&m.block_name)?;
                        encoder.encode_field(&m.period.start)?;
                        encoder.encode_field(&m.period.end)?;
                        encoder.encode_field(&(m.available_hours as i64))?;
                        encoder.encode_field(&(m.proposed_hours as i64))?;
                        encoder.encode_field(&(m.actual_hours as i64))?;
                        encoder.encode_field(&(m.downtime_hours as i64))?;
                        encoder.encode_field(&m.proposed_percent)?;
                        encoder.encode_field(&m.actual_percent)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectConflicts {
                reactor,
                start,
                end,
                status,
                exclude,
            } => {
                let conflict = engine
                    .check_conflict(&reactor, start, end, status, exclude)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(conflicts_schema());
                let rows: Vec<PgWireResult<_>> = conflict
                    .iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.kind())?;
                        encoder.encode_field(&c.record_id().map(|id| id.to_string()))?;
                        encoder.encode_field(&c.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn reactors_schema() -> Vec<FieldInfo> {
    vec![
        text("serial_no"),
        int8("max_capacity_liters"),
        text("capacity_range"),
        text("moc"),
        text("agitator_type"),
        text("plant_name"),
        text("block_name"),
        int8("commission_date"),
        text("notes"),
    ]
}

fn commitments_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("reactor"),
        text("team"),
        text("product_name"),
        text("stage"),
        text("batch_number"),
        text("operation"),
        int8("start"),
        int8("end"),
        text("status"),
        text("requested_by"),
        int8("created_at"),
        int8("updated_at"),
    ]
}

fn maintenance_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("reactor"),
        text("category"),
        text("reason"),
        int8("start"),
        int8("end"),
        text("updated_by"),
        int8("updated_at"),
        FieldInfo::new("cancelled".into(), None, None, Type::BOOL, FieldFormat::Text),
        text("phase"),
    ]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        text("reactor"),
        text("plant_name"),
        text("block_name"),
        int8("period_start"),
        int8("period_end"),
        int8("available_hours"),
        int8("proposed_hours"),
        int8("actual_hours"),
        int8("downtime_hours"),
        FieldInfo::new("proposed_percent".into(), None, None, Type::FLOAT8, FieldFormat::Text),
        FieldInfo::new("actual_percent".into(), None, None, Type::FLOAT8, FieldFormat::Text),
    ]
}

fn conflicts_schema() -> Vec<FieldInfo> {
    vec![text("kind"), text("record_id"), text("message")]
}

/// Row shape of a statement, judged from the table after `FROM`. Writes
/// return no rows.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut tokens = lower.split_whitespace();
    if tokens.next() != Some("select") {
        return vec![];
    }
    let table = tokens
        .skip_while(|t| *t != "from")
        .nth(1)
        .map(|t| t.trim_matches(|c| c == '"' || c == ';'));
    match table {
        Some("reactors") => reactors_schema(),
        Some("commitments") => commitments_schema(),
        Some("maintenance_windows") => maintenance_schema(),
        Some("occupancy") => occupancy_schema(),
        Some("conflicts") => conflicts_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ReactorbookHandler {
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
pub struct ReactorbookQueryParser;

#[async_trait]
impl QueryParser for ReactorbookQueryParser {
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
impl ExtendedQueryHandler for ReactorbookHandler {
    type Statement = String;
    type QueryParser = ReactorbookQueryParser;

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

/// Highest `$N` placeholder in the SQL string.
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

/// Replace `$1`, `$2`, ... with bound text-format values as quoted literals.
/// One left-to-right pass: digits after `$` are read greedily, so `$1` never
/// matches the prefix of `$10`, and inserted values are never rescanned.
/// Placeholders without a bound value are left as written.
fn substitute_values(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(text)) => {
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => result.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    result.push_str(rest);
    result
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute_values(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

/// Shared password for the cleartext startup handshake; any user name.
#[derive(Debug)]
pub struct SharedPassword(String);

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.0.as_bytes().to_vec()))
    }
}

pub struct ReactorbookFactory {
    handler: Arc<ReactorbookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPassword, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ReactorbookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = SharedPassword(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ReactorbookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ReactorbookFactory {
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
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = Arc::new(ReactorbookFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, None, factory).await?;
    Ok(())
}

// ── Error mapping ────────────────────────────────────────────────

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
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

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM reactors"), 0);
        assert_eq!(
            count_params("SELECT * FROM conflicts WHERE reactor = $1 AND start = $3 AND \"end\" = $2"),
            3
        );
        assert_eq!(count_params("SELECT '$' FROM x WHERE a = $12"), 12);
    }

    #[test]
    fn substitute_quotes_and_nulls() {
        let sql = "INSERT INTO reactors (serial_no, notes) VALUES ($1, $2)";
        let out = substitute_values(sql, &[Some("R-1".into()), None]);
        assert_eq!(out, "INSERT INTO reactors (serial_no, notes) VALUES ('R-1', NULL)");

        let out = substitute_values("SELECT * FROM reactors WHERE plant_name = $1", &[Some("O'Neil".into())]);
        assert!(out.ends_with("'O''Neil'"));
    }

    #[test]
    fn substitute_ten_or_more_params() {
        let params: Vec<Option<String>> = (1..=10).map(|i| Some(i.to_string())).collect();
        let out = substitute_values("$1 $10", &params);
        assert_eq!(out, "'1' '10'");
    }

    #[test]
    fn substituted_text_is_not_rescanned() {
        let sql = "INSERT INTO commitments (reactor, operation) VALUES ($1, $2)";
        let params = [Some("R-1".into()), Some("costs $1 per batch".into())];
        assert_eq!(
            substitute_values(sql, &params),
            "INSERT INTO commitments (reactor, operation) VALUES ('R-1', 'costs $1 per batch')"
        );

        // A value cannot close its own literal.
        let params = [Some("x', 'y".into()), Some("$1".into())];
        assert_eq!(substitute_values("($2, $1)", &params), "('$1', 'x'', ''y')");
    }

    #[test]
    fn unbound_placeholders_stay() {
        assert_eq!(substitute_values("$0 $3 $ $x", &[Some("a".into())]), "$0 $3 $ $x");
    }

    #[test]
    fn result_schema_by_table() {
        assert_eq!(result_schema("SELECT * FROM occupancy WHERE month = $1").len(), 11);
        assert_eq!(result_schema("select * from \"conflicts\";").len(), 3);
        assert_eq!(result_schema("SELECT * FROM commitments").len(), 13);
        assert!(result_schema("INSERT INTO reactors (serial_no) VALUES ($1)").is_empty());
    }
}
