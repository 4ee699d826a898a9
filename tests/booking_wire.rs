use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use gymslot::engine::Engine;
use gymslot::notify::NotifyHub;
use gymslot::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("gymslot_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("gymslot.wal"), Arc::new(NotifyHub::new())).unwrap());

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "gymslot".to_string(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect_as(addr: SocketAddr, user: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("gymslot")
        .user(user)
        .password("gymslot");

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<tokio_postgres::SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&SqlState> {
    err.code()
}

struct Seeded {
    gym: Ulid,
    gym_service: Ulid,
    trainer: Ulid,
    member: Ulid,
}

/// Mon-Fri gym, a 60 minute PT session at 500, one trainer free Monday 09:00-17:00.
async fn seed(admin: &Client) -> Seeded {
    let gym = Ulid::new();
    let service = Ulid::new();
    let gym_service = Ulid::new();
    let trainer = Ulid::new();
    let member = Ulid::new();
    admin
        .batch_execute(&format!(
            r#"
            INSERT INTO gyms (id, name, opening, closing, working_days) VALUES ('{gym}', 'Downtown', '06:00', '22:00', '1,2,3,4,5');
            INSERT INTO services (id, name) VALUES ('{service}', 'PT');
            INSERT INTO gym_services (id, gym_id, service_id, duration, price) VALUES ('{gym_service}', '{gym}', '{service}', 60, 500);
            INSERT INTO trainers (id, name, gym_id, experience, bio) VALUES ('{trainer}', 'Sam', '{gym}', 5, 'strength');
            INSERT INTO trainer_services (trainer_id, service_id) VALUES ('{trainer}', '{service}');
            INSERT INTO availability (id, trainer_id, day_of_week, start, "end") VALUES ('{}', '{trainer}', 1, '09:00', '17:00');
            INSERT INTO members (id, name, gym_id) VALUES ('{member}', 'Alex', '{gym}');
            "#,
            Ulid::new()
        ))
        .await
        .unwrap();
    Seeded { gym, gym_service, trainer, member }
}

fn booking_sql(s: &Seeded, id: Ulid, time: &str) -> String {
    format!(
        r#"INSERT INTO appointments (id, trainer_id, gym_service_id, "date", "time") VALUES ('{id}', '{}', '{}', '2024-06-03', '{time}')"#,
        s.trainer, s.gym_service
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_user_is_refused() {
    let (addr, _engine) = start_test_server().await;
    let err = connect_as(addr, "someone").await.err().unwrap();
    assert_eq!(sqlstate(&err), Some(&SqlState::INVALID_AUTHORIZATION_SPECIFICATION));
}

#[tokio::test]
async fn booking_scenario_over_the_wire() {
    let (addr, engine) = start_test_server().await;
    let admin = connect_as(addr, "admin").await.unwrap();
    let s = seed(&admin).await;
    let member = connect_as(addr, &format!("member:{}", s.member)).await.unwrap();

    let first = Ulid::new();
    member.batch_execute(&booking_sql(&s, first, "09:00")).await.unwrap();

    let appt = engine.get_appointment(first).await.unwrap();
    assert_eq!(appt.duration, 60);
    assert_eq!(appt.price, 500);

    let err = member
        .batch_execute(&booking_sql(&s, Ulid::new(), "09:30"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some(&SqlState::EXCLUSION_VIOLATION));

    let err = member
        .batch_execute(&booking_sql(&s, Ulid::new(), "17:30"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some(&SqlState::CHECK_VIOLATION));

    let found = rows(
        member
            .simple_query(&format!("SELECT * FROM appointments WHERE member_id = '{}'", s.member))
            .await
            .unwrap(),
    );
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("id"), Some(first.to_string().as_str()));
    assert_eq!(found[0].get("status"), Some("Pending"));
    assert_eq!(found[0].get("time"), Some("09:00"));
    assert_eq!(found[0].get("price"), Some("500"));
}

#[tokio::test]
async fn candidates_exclude_booked_trainer() {
    let (addr, _engine) = start_test_server().await;
    let admin = connect_as(addr, "admin").await.unwrap();
    let s = seed(&admin).await;
    let candidates_sql = format!(
        r#"SELECT * FROM candidates WHERE gym_id = '{}' AND gym_service_id = '{}' AND "date" = '2024-06-03' AND "time" = '10:00'"#,
        s.gym, s.gym_service
    );

    let found = rows(admin.simple_query(&candidates_sql).await.unwrap());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("id"), Some(s.trainer.to_string().as_str()));
    assert_eq!(found[0].get("name"), Some("Sam"));

    let member = connect_as(addr, &format!("member:{}", s.member)).await.unwrap();
    member.batch_execute(&booking_sql(&s, Ulid::new(), "10:30")).await.unwrap();

    let found = rows(admin.simple_query(&candidates_sql).await.unwrap());
    assert!(found.is_empty());
}

#[tokio::test]
async fn lifecycle_and_authorization_codes() {
    let (addr, _engine) = start_test_server().await;
    let admin = connect_as(addr, "admin").await.unwrap();
    let s = seed(&admin).await;
    let member = connect_as(addr, &format!("member:{}", s.member)).await.unwrap();
    let trainer = connect_as(addr, &format!("trainer:{}", s.trainer)).await.unwrap();

    let err = member
        .batch_execute(&format!("INSERT INTO services (id, name) VALUES ('{}', 'Yoga')", Ulid::new()))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some(&SqlState::INSUFFICIENT_PRIVILEGE));

    let id = Ulid::new();
    member.batch_execute(&booking_sql(&s, id, "11:00")).await.unwrap();

    let err = member
        .batch_execute(&format!("UPDATE appointments SET status = 'Approved' WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some(&SqlState::INSUFFICIENT_PRIVILEGE));

    let err = trainer
        .batch_execute(&format!("UPDATE appointments SET status = 'Paused' WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some(&SqlState::INVALID_PARAMETER_VALUE));

    trainer
        .batch_execute(&format!("UPDATE appointments SET status = 'Approved' WHERE id = '{id}'"))
        .await
        .unwrap();

    let err = trainer
        .batch_execute(&format!("UPDATE appointments SET status = 'Pending' WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some(&SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE));

    member
        .batch_execute(&format!("UPDATE appointments SET status = 'Cancelled' WHERE id = '{id}'"))
        .await
        .unwrap();

    let found = rows(
        trainer
            .simple_query(&format!("SELECT * FROM appointments WHERE id = '{id}'"))
            .await
            .unwrap(),
    );
    assert_eq!(found[0].get("status"), Some("Cancelled"));
}

#[tokio::test]
async fn other_members_appointments_are_hidden() {
    let (addr, _engine) = start_test_server().await;
    let admin = connect_as(addr, "admin").await.unwrap();
    let s = seed(&admin).await;
    let member = connect_as(addr, &format!("member:{}", s.member)).await.unwrap();
    member.batch_execute(&booking_sql(&s, Ulid::new(), "13:00")).await.unwrap();

    let stranger = Ulid::new();
    admin
        .batch_execute(&format!("INSERT INTO members (id, name) VALUES ('{stranger}', 'Kim')"))
        .await
        .unwrap();
    let other = connect_as(addr, &format!("member:{stranger}")).await.unwrap();

    let found = rows(
        other
            .simple_query(&format!("SELECT * FROM appointments WHERE trainer_id = '{}'", s.trainer))
            .await
            .unwrap(),
    );
    assert!(found.is_empty());

    let found = rows(
        admin
            .simple_query(&format!("SELECT * FROM appointments WHERE trainer_id = '{}'", s.trainer))
            .await
            .unwrap(),
    );
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn extended_protocol_booking() {
    let (addr, engine) = start_test_server().await;
    let admin = connect_as(addr, "admin").await.unwrap();
    let s = seed(&admin).await;
    let member = connect_as(addr, &format!("member:{}", s.member)).await.unwrap();

    let id = Ulid::new();
    let n = member
        .execute(
            r#"INSERT INTO appointments (id, trainer_id, gym_service_id, "date", "time", notes) VALUES ($1, $2, $3, $4, $5, $6)"#,
            &[
                &id.to_string(),
                &s.trainer.to_string(),
                &s.gym_service.to_string(),
                &"2024-06-03",
                &"14:00",
                &"bring a towel",
            ],
        )
        .await
        .unwrap();
    assert_eq!(n, 1);

    let appt = engine.get_appointment(id).await.unwrap();
    assert_eq!(appt.notes.as_deref(), Some("bring a towel"));
}

#[tokio::test]
async fn batch_stops_at_first_failure_keeping_earlier_statements() {
    let (addr, engine) = start_test_server().await;
    let admin = connect_as(addr, "admin").await.unwrap();

    let kept = Ulid::new();
    let skipped = Ulid::new();
    let err = admin
        .batch_execute(&format!(
            "INSERT INTO services (id, name) VALUES ('{kept}', 'PT');
             INSERT INTO gym_services (id, gym_id, service_id, duration, price) VALUES ('{}', '{}', '{kept}', 60, 500);
             INSERT INTO services (id, name) VALUES ('{skipped}', 'Yoga');",
            Ulid::new(),
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some(&SqlState::NO_DATA_FOUND));

    assert!(engine.catalog.service(&kept).is_some());
    assert!(engine.catalog.service(&skipped).is_none());

    // The connection is still usable after the failed batch.
    let found = rows(
        admin
            .simple_query(&format!("SELECT * FROM appointments WHERE member_id = '{}'", Ulid::new()))
            .await
            .unwrap(),
    );
    assert!(found.is_empty());
}
