//! End-to-end session scenarios driven over a real loopback TCP socket, a
//! fake server on one side and `session::run` on the other.

use std::time::Duration;

use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use slamd_client::config::ClientConfig;
use slamd_client::plugin::{Catalog, JobClass, PluginError, ThreadContext};
use slamd_client::session;
use slamd_client::wire::message::{
    ABSENT_I64, JobControlOp, JobState, Message, Parameter, ResponseCode,
};
use slamd_client::wire::{self, Codec};

type FakeServer = Framed<TcpStream, Codec>;

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn base_config(port: u16) -> ClientConfig {
    let mut cfg = ClientConfig::default();
    cfg.server_address = "127.0.0.1".into();
    cfg.client_port = port;
    cfg.enable_real_time_stats = false;
    cfg.persist_statistics = false;
    cfg
}

fn noop_catalog() -> Catalog {
    let mut c = Catalog::new();
    c.register("Noop", || Box::new(slamd_client::plugin::NoopJob::new()));
    c
}

/// Accepts one connection and completes the `ClientHello`/`HelloResponse`
/// handshake, returning the still-open framed connection plus the client's
/// hello fields for inspection. `server_time_ms` lets callers inject a
/// clock-skew offset (scenario 5); pass `0` to leave the client's clock
/// alone.
async fn accept_and_handshake(listener: &TcpListener, server_time_ms: i64) -> FakeServer {
    let (stream, _) = listener.accept().await.expect("accept");
    let mut framed = wire::framed(stream);
    let (id, msg) = framed.next().await.unwrap().unwrap();
    assert!(matches!(msg, Message::ClientHello { .. }), "expected ClientHello, got {msg:?}");
    framed
        .send((
            id,
            Message::HelloResponse {
                response_code: ResponseCode::Success,
                server_time_ms,
                protocol_minor_version: 1,
                supports_time_sync: true,
                restricted_mode: false,
            },
        ))
        .await
        .unwrap();
    framed
}

fn job_request(job_id: &str, job_class: &str, duration_secs: i64) -> Message {
    Message::JobRequest {
        job_id: job_id.to_string(),
        job_class_name: job_class.to_string(),
        threads_per_client: 1,
        client_number: 0,
        scheduled_start_time_ms: 0,
        stop_time_ms: ABSENT_I64,
        duration_secs,
        collection_interval_secs: 1,
        thread_startup_delay_ms: 0,
        parameters: Vec::<Parameter>::new(),
    }
}

async fn recv(framed: &mut FakeServer) -> (u64, Message) {
    timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("timed out waiting for a message")
        .expect("connection closed unexpectedly")
        .expect("decode error")
}

/// Happy-path one-thread job completes within a couple of seconds and
/// reports `actualDuration` in the expected range.
#[tokio::test]
async fn happy_path_one_thread_job_completes() {
    let (listener, port) = listener().await;
    let cancel = CancellationToken::new();
    let client = tokio::spawn(session::run(base_config(port), noop_catalog(), cancel.clone()));

    let mut server = accept_and_handshake(&listener, 0).await;

    server.send((1, job_request("j1", "Noop", 2))).await.unwrap();
    let (id, resp) = recv(&mut server).await;
    assert_eq!(id, 1);
    assert_eq!(
        resp,
        Message::JobResponse { job_id: "j1".into(), response_code: ResponseCode::Success }
    );

    server
        .send((3, Message::JobControlRequest { job_id: "j1".into(), op: JobControlOp::Start }))
        .await
        .unwrap();
    let (id, resp) = recv(&mut server).await;
    assert_eq!(id, 3);
    assert_eq!(
        resp,
        Message::JobControlResponse { job_id: "j1".into(), response_code: ResponseCode::Success }
    );

    let (_, completed) = timeout(Duration::from_secs(5), async {
        loop {
            let next = recv(&mut server).await;
            if matches!(next.1, Message::JobCompleted { .. }) {
                return next;
            }
        }
    })
    .await
    .expect("JobCompleted never arrived");

    match completed {
        Message::JobCompleted { job_id, final_state, actual_duration_secs, .. } => {
            assert_eq!(job_id, "j1");
            assert_eq!(final_state, JobState::Completed);
            assert!(
                (2..=3).contains(&actual_duration_secs),
                "actual_duration_secs out of range: {actual_duration_secs}"
            );
        }
        other => panic!("expected JobCompleted, got {other:?}"),
    }

    cancel.cancel();
    let _ = timeout(Duration::from_secs(2), client).await;
}

/// Scenario 2: a `STOP_AND_WAIT` against a long-running job doesn't get a
/// response until the job has actually left `running`, and the job's final
/// state is `stopped-by-user`.
#[tokio::test]
async fn cooperative_stop_and_wait() {
    let (listener, port) = listener().await;
    let cancel = CancellationToken::new();
    let client = tokio::spawn(session::run(base_config(port), noop_catalog(), cancel.clone()));

    let mut server = accept_and_handshake(&listener, 0).await;

    server.send((1, job_request("j1", "Noop", 60))).await.unwrap();
    let (_, resp) = recv(&mut server).await;
    assert_eq!(resp, Message::JobResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    server
        .send((3, Message::JobControlRequest { job_id: "j1".into(), op: JobControlOp::Start }))
        .await
        .unwrap();
    let (_, resp) = recv(&mut server).await;
    assert_eq!(resp, Message::JobControlResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    server
        .send((5, Message::JobControlRequest { job_id: "j1".into(), op: JobControlOp::StopAndWait }))
        .await
        .unwrap();

    let (id, resp) = timeout(Duration::from_secs(5), recv(&mut server)).await.unwrap();
    assert_eq!(id, 5);
    assert_eq!(resp, Message::JobControlResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    let (_, completed) = timeout(Duration::from_secs(2), recv(&mut server)).await.unwrap();
    match completed {
        Message::JobCompleted { final_state, .. } => assert_eq!(final_state, JobState::StoppedByUser),
        other => panic!("expected JobCompleted, got {other:?}"),
    }

    cancel.cancel();
    let _ = timeout(Duration::from_secs(2), client).await;
}

/// A job class that never honors `should_stop`, forcing the client through
/// the full forced-stop escalation.
struct StubbornJob;

impl JobClass for StubbornJob {
    fn run_one_iteration(&mut self, _ctx: &dyn ThreadContext) -> Result<(), PluginError> {
        std::thread::sleep(Duration::from_secs(10));
        Ok(())
    }
}

fn stubborn_catalog() -> Catalog {
    let mut c = Catalog::new();
    c.register("Stubborn", || Box::new(StubbornJob));
    c
}

/// Scenario 3: two successive `STOP` requests against an uncooperative job
/// escalate to a forced stop; the second response is still `SUCCESS` and
/// `JobCompleted` is emitted even though the thread never exits.
#[tokio::test]
async fn forced_stop_escalation_reports_completion() {
    let (listener, port) = listener().await;
    let cancel = CancellationToken::new();
    let client = tokio::spawn(session::run(base_config(port), stubborn_catalog(), cancel.clone()));

    let mut server = accept_and_handshake(&listener, 0).await;

    server.send((1, job_request("j1", "Stubborn", 60))).await.unwrap();
    let (_, resp) = recv(&mut server).await;
    assert_eq!(resp, Message::JobResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    server
        .send((3, Message::JobControlRequest { job_id: "j1".into(), op: JobControlOp::Start }))
        .await
        .unwrap();
    let (_, resp) = recv(&mut server).await;
    assert_eq!(resp, Message::JobControlResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    server
        .send((5, Message::JobControlRequest { job_id: "j1".into(), op: JobControlOp::Stop }))
        .await
        .unwrap();
    let (_, resp) = timeout(Duration::from_secs(2), recv(&mut server)).await.unwrap();
    assert_eq!(resp, Message::JobControlResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    server
        .send((7, Message::JobControlRequest { job_id: "j1".into(), op: JobControlOp::Stop }))
        .await
        .unwrap();
    let (_, resp) = timeout(Duration::from_secs(3), recv(&mut server)).await.unwrap();
    assert_eq!(resp, Message::JobControlResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    let (_, completed) = timeout(Duration::from_secs(2), recv(&mut server)).await.unwrap();
    match completed {
        Message::JobCompleted { final_state, .. } => assert_eq!(final_state, JobState::StoppedByUser),
        other => panic!("expected JobCompleted, got {other:?}"),
    }

    cancel.cancel();
    let _ = timeout(Duration::from_secs(1), client).await;
}

/// A `JobRequest` for a class absent from the catalog is rejected immediately
/// with `CLASS_NOT_FOUND` in the `JobResponse` itself; the client still
/// emits a `ClassTransferRequest` naming the missing class as an
/// availability probe, but no class bytes ever change hands and there is
/// no job left to start.
#[tokio::test]
async fn unknown_class_is_rejected_with_availability_probe() {
    let (listener, port) = listener().await;
    let cancel = CancellationToken::new();
    let client = tokio::spawn(session::run(base_config(port), noop_catalog(), cancel.clone()));

    let mut server = accept_and_handshake(&listener, 0).await;

    server.send((1, job_request("j1", "Missing", 2))).await.unwrap();

    let (id, resp) = recv(&mut server).await;
    assert_eq!(id, 1);
    assert_eq!(
        resp,
        Message::JobResponse { job_id: "j1".into(), response_code: ResponseCode::ClassNotFound }
    );

    let (_, probe) = recv(&mut server).await;
    assert_eq!(probe, Message::ClassTransferRequest { class_name: "Missing".into() });

    server
        .send((3, Message::JobControlRequest { job_id: "j1".into(), op: JobControlOp::Start }))
        .await
        .unwrap();
    let (id, resp) = recv(&mut server).await;
    assert_eq!(id, 3);
    assert_eq!(resp, Message::JobControlResponse { job_id: "j1".into(), response_code: ResponseCode::NoSuchJob });

    cancel.cancel();
    let _ = timeout(Duration::from_secs(2), client).await;
}

/// Scenario 5: a `HelloResponse` claiming a server clock 5 s ahead of local
/// time is absorbed into `serverTimeOffset`; a subsequent job's
/// `scheduledStartTime` (sent in server time) is correctly translated back
/// to local time before the job is allowed to run immediately.
#[tokio::test]
async fn clock_skew_is_absorbed_into_job_scheduling() {
    let (listener, port) = listener().await;
    let cancel = CancellationToken::new();
    let client = tokio::spawn(session::run(base_config(port), noop_catalog(), cancel.clone()));

    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    let mut server = accept_and_handshake(&listener, now_ms + 5_000).await;

    // A job whose scheduledStartTime is expressed in (skewed) server time
    // should still be accepted and startable without the server's clock
    // lead causing it to look like it's scheduled in the future forever.
    let mut req = job_request("j1", "Noop", 1);
    if let Message::JobRequest { scheduled_start_time_ms, .. } = &mut req {
        *scheduled_start_time_ms = now_ms + 5_000;
    }
    server.send((1, req)).await.unwrap();
    let (_, resp) = recv(&mut server).await;
    assert_eq!(resp, Message::JobResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    server
        .send((3, Message::JobControlRequest { job_id: "j1".into(), op: JobControlOp::Start }))
        .await
        .unwrap();
    let (_, resp) = recv(&mut server).await;
    assert_eq!(resp, Message::JobControlResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    let (_, completed) = timeout(Duration::from_secs(4), async {
        loop {
            let next = recv(&mut server).await;
            if matches!(next.1, Message::JobCompleted { .. }) {
                return next;
            }
        }
    })
    .await
    .expect("JobCompleted never arrived");

    match completed {
        Message::JobCompleted { final_state, actual_start_time_ms, .. } => {
            assert_eq!(final_state, JobState::Completed);
            // actual_start_time_ms is reported back in server time, i.e.
            // shifted forward by the 5000ms offset relative to local wall
            // clock; it should land close to "now" in server time, not
            // 5000ms further in the future.
            assert!(actual_start_time_ms > 0);
        }
        other => panic!("expected JobCompleted, got {other:?}"),
    }

    cancel.cancel();
    let _ = timeout(Duration::from_secs(2), client).await;
}

/// Scenario 6: a `ServerShutdown` arriving mid-job forces the job to stop
/// with reason `stopped-by-shutdown` and the client disconnects without
/// ever sending a `JobCompleted` on that connection.
#[tokio::test]
async fn server_shutdown_during_job_sends_no_completion() {
    let (listener, port) = listener().await;
    let cancel = CancellationToken::new();
    let client = tokio::spawn(session::run(base_config(port), noop_catalog(), cancel.clone()));

    let mut server = accept_and_handshake(&listener, 0).await;

    server.send((1, job_request("j1", "Noop", 60))).await.unwrap();
    let (_, resp) = recv(&mut server).await;
    assert_eq!(resp, Message::JobResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    server
        .send((3, Message::JobControlRequest { job_id: "j1".into(), op: JobControlOp::Start }))
        .await
        .unwrap();
    let (_, resp) = recv(&mut server).await;
    assert_eq!(resp, Message::JobControlResponse { job_id: "j1".into(), response_code: ResponseCode::Success });

    server
        .send((5, Message::ServerShutdown { reason: "maintenance".into() }))
        .await
        .unwrap();

    // The client should close the connection (end of stream) rather than
    // send a JobCompleted first.
    let outcome = timeout(Duration::from_secs(3), server.next()).await.expect("no response within budget");
    match outcome {
        None => {} // connection closed, as expected
        Some(Ok((_, msg))) => panic!("expected the connection to close, got a message instead: {msg:?}"),
        Some(Err(e)) => panic!("expected a clean close, got a decode error: {e}"),
    }

    let result = timeout(Duration::from_secs(2), client).await.expect("client task did not exit").unwrap();
    assert!(result.is_err(), "session::run should surface the shutdown as an error");
}
