use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use reactorbook::engine::Engine;
use reactorbook::notify::NotifyHub;
use reactorbook::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("reactorbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("reactorbook.wal"), Arc::new(NotifyHub::new())).unwrap());

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "reactorbook".to_string()).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("reactorbook")
        .user("reactorbook")
        .password("reactorbook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// SQLSTATE of a failed statement.
async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client
        .batch_execute(sql)
        .await
        .expect_err("statement should fail");
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

async fn add_reactor(client: &Client, serial: &str, plant: &str) {
    client
        .batch_execute(&format!(
            "INSERT INTO reactors (serial_no, plant_name, block_name, max_capacity_liters) \
             VALUES ('{serial}', '{plant}', 'Block 1', 2500)"
        ))
        .await
        .unwrap();
}

fn commitment_sql(id: Ulid, reactor: &str, start: &str, end: &str, status: &str) -> String {
    format!(
        r#"INSERT INTO commitments (id, reactor, team, product_name, start, "end", status, requested_by)
           VALUES ('{id}', '{reactor}', 'Mfg', 'API-7', '{start}', '{end}', '{status}', 'planner@example.com')"#
    )
}

fn maintenance_sql(id: Ulid, reactor: &str, start: &str, end: &str) -> String {
    format!(
        r#"INSERT INTO maintenance_windows (id, reactor, category, reason, start, "end", updated_by)
           VALUES ('{id}', '{reactor}', 'Cleaning', 'CIP', '{start}', '{end}', 'ops@example.com')"#
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn reactor_crud() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    add_reactor(&client, "R-101", "Plant A").await;
    add_reactor(&client, "R-202", "Plant B").await;

    let all = rows(&client, "SELECT * FROM reactors").await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].get("serial_no"), Some("R-101"));
    assert_eq!(all[0].get("max_capacity_liters"), Some("2500"));

    client
        .batch_execute("UPDATE reactors SET moc = 'Hastelloy' WHERE serial_no = 'R-202'")
        .await
        .unwrap();
    let plant_b = rows(&client, "SELECT * FROM reactors WHERE plant_name = 'Plant B'").await;
    assert_eq!(plant_b.len(), 1);
    assert_eq!(plant_b[0].get("moc"), Some("Hastelloy"));

    assert_eq!(
        sqlstate(&client, "INSERT INTO reactors (serial_no) VALUES ('R-101')").await,
        "23505"
    );

    client
        .batch_execute("DELETE FROM reactors WHERE serial_no = 'R-202'")
        .await
        .unwrap();
    assert_eq!(rows(&client, "SELECT * FROM reactors").await.len(), 1);
    assert_eq!(
        sqlstate(&client, "DELETE FROM reactors WHERE serial_no = 'R-202'").await,
        "P0002"
    );
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (addr, _engine) = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .user("reactorbook")
        .password("not-it");
    assert!(config.connect(NoTls).await.is_err());
}

#[tokio::test]
async fn commitment_conflicts_map_to_sqlstates() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    add_reactor(&client, "R-101", "Plant A").await;

    client
        .batch_execute(&commitment_sql(
            Ulid::new(),
            "R-101",
            "2026-03-01T08:00:00Z",
            "2026-03-01T20:00:00Z",
            "Confirmed",
        ))
        .await
        .unwrap();

    // A second Confirmed log overlapping the first.
    let dup = commitment_sql(
        Ulid::new(),
        "R-101",
        "2026-03-01T19:00:00Z",
        "2026-03-01T22:00:00Z",
        "Confirmed",
    );
    assert_eq!(sqlstate(&client, &dup).await, "23505");

    // A forecast over the same hours.
    let overlap = commitment_sql(
        Ulid::new(),
        "R-101",
        "2026-03-01T19:00:00Z",
        "2026-03-01T22:00:00Z",
        "Proposed",
    );
    assert_eq!(sqlstate(&client, &overlap).await, "23P01");

    let inverted = commitment_sql(
        Ulid::new(),
        "R-101",
        "2026-03-02T10:00:00Z",
        "2026-03-02T08:00:00Z",
        "Proposed",
    );
    assert_eq!(sqlstate(&client, &inverted).await, "22023");

    let listed = rows(&client, "SELECT * FROM commitments WHERE reactor = 'R-101'").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("status"), Some("Confirmed"));
}

#[tokio::test]
async fn confirmed_logs_cannot_be_deleted() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    add_reactor(&client, "R-101", "Plant A").await;

    let confirmed = Ulid::new();
    let proposed = Ulid::new();
    client
        .batch_execute(&commitment_sql(
            confirmed,
            "R-101",
            "2026-03-01T00:00:00Z",
            "2026-03-01T04:00:00Z",
            "Actual",
        ))
        .await
        .unwrap();
    client
        .batch_execute(&commitment_sql(
            proposed,
            "R-101",
            "2026-03-02T00:00:00Z",
            "2026-03-02T04:00:00Z",
            "Proposed",
        ))
        .await
        .unwrap();

    assert_eq!(
        sqlstate(&client, &format!("DELETE FROM commitments WHERE id = '{confirmed}'")).await,
        "55000"
    );
    client
        .batch_execute(&format!("DELETE FROM commitments WHERE id = '{proposed}'"))
        .await
        .unwrap();

    // Still holds a commitment, so the reactor stays.
    assert_eq!(
        sqlstate(&client, "DELETE FROM reactors WHERE serial_no = 'R-101'").await,
        "23503"
    );
}

#[tokio::test]
async fn maintenance_schedule_cancel_and_occupancy() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    add_reactor(&client, "R-101", "Plant A").await;

    let past = maintenance_sql(Ulid::new(), "R-101", "2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z");
    assert_eq!(sqlstate(&client, &past).await, "22023");

    let window = Ulid::new();
    client
        .batch_execute(&maintenance_sql(
            window,
            "R-101",
            "2030-06-10T00:00:00Z",
            "2030-06-11T00:00:00Z",
        ))
        .await
        .unwrap();

    let blocked = commitment_sql(
        Ulid::new(),
        "R-101",
        "2030-06-10T12:00:00Z",
        "2030-06-10T18:00:00Z",
        "Proposed",
    );
    assert_eq!(sqlstate(&client, &blocked).await, "23P01");

    client
        .batch_execute(&commitment_sql(
            Ulid::new(),
            "R-101",
            "2030-06-01T00:00:00Z",
            "2030-06-04T00:00:00Z",
            "Proposed",
        ))
        .await
        .unwrap();

    let report = rows(&client, "SELECT * FROM occupancy WHERE month = '2030-06'").await;
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].get("available_hours"), Some("696"));
    assert_eq!(report[0].get("downtime_hours"), Some("24"));
    assert_eq!(report[0].get("proposed_hours"), Some("72"));
    assert_eq!(report[0].get("actual_hours"), Some("0"));

    client
        .batch_execute(&format!(
            "UPDATE maintenance_windows SET cancelled = true, updated_by = 'lead@example.com' \
             WHERE id = '{window}'"
        ))
        .await
        .unwrap();

    let windows = rows(&client, "SELECT * FROM maintenance_windows WHERE reactor = 'R-101'").await;
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].get("phase"), Some("Cancelled"));
    assert_eq!(windows[0].get("updated_by"), Some("lead@example.com"));

    // The slot is free again and a second cancel is refused.
    client.batch_execute(&blocked).await.unwrap();
    assert_eq!(
        sqlstate(
            &client,
            &format!("UPDATE maintenance_windows SET cancelled = true WHERE id = '{window}'")
        )
        .await,
        "55000"
    );

    let report = rows(&client, "SELECT * FROM occupancy WHERE month = '2030-06'").await;
    assert_eq!(report[0].get("available_hours"), Some("720"));
    assert_eq!(report[0].get("proposed_hours"), Some("78"));
}

#[tokio::test]
async fn reschedule_through_update() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    add_reactor(&client, "R-101", "Plant A").await;

    let window = Ulid::new();
    client
        .batch_execute(&maintenance_sql(
            window,
            "R-101",
            "2030-06-10T00:00:00Z",
            "2030-06-10T06:00:00Z",
        ))
        .await
        .unwrap();

    // Overlapping its own old slot is fine.
    client
        .batch_execute(&format!(
            r#"UPDATE maintenance_windows SET start = '2030-06-10T04:00:00Z', "end" = '2030-06-10T10:00:00Z'
               WHERE id = '{window}'"#
        ))
        .await
        .unwrap();

    let windows = rows(&client, "SELECT * FROM maintenance_windows").await;
    let start: i64 = windows[0].get("start").unwrap().parse().unwrap();
    let end: i64 = windows[0].get("end").unwrap().parse().unwrap();
    assert_eq!(end - start, 6 * 3_600_000);
    assert_eq!(windows[0].get("phase"), Some("Scheduled"));
}

#[tokio::test]
async fn conflicts_query_is_advisory() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    add_reactor(&client, "R-101", "Plant A").await;

    let existing = Ulid::new();
    client
        .batch_execute(&commitment_sql(
            existing,
            "R-101",
            "2026-03-01T08:00:00Z",
            "2026-03-01T20:00:00Z",
            "Confirmed",
        ))
        .await
        .unwrap();

    let hit = rows(
        &client,
        "SELECT * FROM conflicts WHERE reactor = 'R-101' \
         AND start = '2026-03-01T19:00:00Z' AND \"end\" = '2026-03-01T22:00:00Z'",
    )
    .await;
    assert_eq!(hit.len(), 1);
    assert_eq!(hit[0].get("kind"), Some("commitment_overlap"));
    assert_eq!(hit[0].get("record_id"), Some(existing.to_string().as_str()));
    assert!(hit[0].get("message").unwrap().contains("API-7"));

    let touching_confirmed = rows(
        &client,
        "SELECT * FROM conflicts WHERE reactor = 'R-101' AND status = 'Confirmed' \
         AND start = '2026-03-01T20:00:00Z' AND \"end\" = '2026-03-01T22:00:00Z'",
    )
    .await;
    assert_eq!(touching_confirmed.len(), 1);
    assert_eq!(touching_confirmed[0].get("kind"), Some("duplicate_confirmed"));

    let clear = rows(
        &client,
        "SELECT * FROM conflicts WHERE reactor = 'R-101' \
         AND start = '2026-03-01T20:00:00Z' AND \"end\" = '2026-03-01T22:00:00Z'",
    )
    .await;
    assert!(clear.is_empty());

    // Nothing was reserved by the checks.
    assert_eq!(rows(&client, "SELECT * FROM commitments").await.len(), 1);

    assert_eq!(
        sqlstate(
            &client,
            "SELECT * FROM conflicts WHERE reactor = 'R-999' AND start = 1 AND \"end\" = 2"
        )
        .await,
        "P0002"
    );
}

#[tokio::test]
async fn extended_protocol_with_params() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    add_reactor(&client, "R-101", "Plant A").await;

    client
        .execute(
            r#"INSERT INTO commitments (reactor, product_name, start, "end") VALUES ($1, $2, $3, $4)"#,
            &[&"R-101", &"API-9", &"2026-05-01T00:00:00Z", &"2026-05-02T00:00:00Z"],
        )
        .await
        .unwrap();

    let found = client
        .query("SELECT * FROM commitments WHERE reactor = $1", &[&"R-101"])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn concurrent_confirms_admit_one() {
    let (addr, engine) = start_test_server().await;
    let setup = connect(addr).await;
    add_reactor(&setup, "R-101", "Plant A").await;

    let mut handles = Vec::new();
    for i in 0..8 {
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            // All candidates cover 06:00-08:00.
            let start = format!("2026-03-01T0{}:00:00Z", i % 4 + 2);
            client
                .batch_execute(&commitment_sql(
                    Ulid::new(),
                    "R-101",
                    &start,
                    "2026-03-01T08:00:00Z",
                    "Confirmed",
                ))
                .await
        }));
    }

    let mut accepted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => accepted += 1,
            Err(e) => {
                let code = e.code().map(|c| c.code().to_string());
                assert_eq!(code.as_deref(), Some("23505"), "unexpected error: {e}");
            }
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(engine.list_commitments(Some("R-101")).await.len(), 1);
}

#[tokio::test]
async fn unknown_table_is_a_syntax_error() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    assert_eq!(sqlstate(&client, "SELECT * FROM bookings").await, "42601");
}
