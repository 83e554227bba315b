//! End-to-end tests driving `JobService` directly (no network/TLS
//! layer — that plumbing is exercised by `api::tls`/`api::middleware`
//! unit tests instead). These correspond to the lettered scenarios and
//! testable properties in the job-worker specification: ownership
//! isolation, exit-code propagation, and multiple independent readers
//! observing the same output.

use std::sync::Arc;
use std::time::Duration;

use job_worker::api::middleware::ClientId;
use job_worker::api::service::JobService;
use job_worker::core::store::JobStore;
use job_worker::proto::job_worker_server::JobWorker;
use job_worker::proto::{ExecRequest, LogsRequest, StatusRequest, StopRequest};
use tokio_stream::StreamExt;
use tonic::Request;

fn authed<T>(body: T, client: &str) -> Request<T> {
    let mut req = Request::new(body);
    req.extensions_mut().insert(ClientId(client.to_string()));
    req
}

async fn wait_terminal(service: &JobService, id: &str, client: &str) -> (String, i64) {
    for _ in 0..200 {
        let resp = service
            .status(authed(StatusRequest { id: id.to_string() }, client))
            .await
            .unwrap()
            .into_inner();
        if resp.status != "pending" && resp.status != "running" {
            return (resp.status, resp.exit_code);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached a terminal state");
}

#[tokio::test]
async fn echo_job_reports_complete_status_and_exact_output() {
    let store = Arc::new(JobStore::new());
    let service = JobService::new(store);

    let exec = service
        .exec(authed(
            ExecRequest {
                command: "/bin/echo".to_string(),
                args: vec!["hello".to_string(), "world".to_string()],
            },
            "c1",
        ))
        .await
        .unwrap()
        .into_inner();

    let (status, exit_code) = wait_terminal(&service, &exec.id, "c1").await;
    assert_eq!(status, "complete");
    assert_eq!(exit_code, 0);

    let mut stream = service
        .logs(authed(LogsRequest { id: exec.id }, "c1"))
        .await
        .unwrap()
        .into_inner();
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.unwrap().log);
    }
    assert_eq!(collected, b"hello world\n");
}

#[tokio::test]
async fn other_client_cannot_observe_job() {
    let store = Arc::new(JobStore::new());
    let service = JobService::new(store);

    let exec = service
        .exec(authed(
            ExecRequest {
                command: "/bin/echo".to_string(),
                args: vec![],
            },
            "c1",
        ))
        .await
        .unwrap()
        .into_inner();

    let err = service
        .status(authed(StatusRequest { id: exec.id.clone() }, "c2"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::PermissionDenied);

    let err = service
        .logs(authed(LogsRequest { id: exec.id }, "c2"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::PermissionDenied);
}

#[tokio::test]
async fn unknown_job_is_not_found_even_for_originally_owning_client() {
    let store = Arc::new(JobStore::new());
    let service = JobService::new(store);

    let err = service
        .status(authed(
            StatusRequest {
                id: "does-not-exist".to_string(),
            },
            "c1",
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn nonzero_exit_is_complete_with_nonzero_exit_code() {
    let store = Arc::new(JobStore::new());
    let service = JobService::new(store);

    let exec = service
        .exec(authed(
            ExecRequest {
                command: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), "exit 2".to_string()],
            },
            "c1",
        ))
        .await
        .unwrap()
        .into_inner();

    let (status, exit_code) = wait_terminal(&service, &exec.id, "c1").await;
    assert_eq!(status, "complete");
    assert_eq!(exit_code, 2);
}

#[tokio::test]
async fn missing_binary_reports_error_status_with_nonempty_message() {
    let store = Arc::new(JobStore::new());
    let service = JobService::new(store);

    let exec = service
        .exec(authed(
            ExecRequest {
                command: "/no/such/binary-xyz".to_string(),
                args: vec![],
            },
            "c1",
        ))
        .await
        .unwrap()
        .into_inner();

    let (status, exit_code) = wait_terminal(&service, &exec.id, "c1").await;
    assert_eq!(status, "error");
    assert_eq!(exit_code, -1);

    let resp = service
        .status(authed(StatusRequest { id: exec.id }, "c1"))
        .await
        .unwrap()
        .into_inner();
    assert!(!resp.error.is_empty());
}

#[tokio::test]
async fn stop_interrupts_a_running_job() {
    let store = Arc::new(JobStore::new());
    let service = JobService::new(store);

    let exec = service
        .exec(authed(
            ExecRequest {
                command: "/bin/sleep".to_string(),
                args: vec!["30".to_string()],
            },
            "c1",
        ))
        .await
        .unwrap()
        .into_inner();

    // Give the supervisor a moment to actually spawn before stopping.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stop = service
        .stop(authed(StopRequest { id: exec.id.clone() }, "c1"))
        .await
        .unwrap()
        .into_inner();
    assert!(stop.success);

    let (status, exit_code) = wait_terminal(&service, &exec.id, "c1").await;
    assert_eq!(status, "complete");
    assert_ne!(exit_code, 0);
}

#[tokio::test]
async fn three_independent_readers_observe_identical_output() {
    let store = Arc::new(JobStore::new());
    let service = JobService::new(store);

    let exec = service
        .exec(authed(
            ExecRequest {
                command: "/bin/seq".to_string(),
                args: vec!["1".to_string(), "1000".to_string()],
            },
            "c1",
        ))
        .await
        .unwrap()
        .into_inner();

    // One reader opened immediately, one mid-flight, one after completion.
    // Each runs on its own spawned task so it actually starts streaming
    // right away rather than only once it is later awaited.
    let early = tokio::spawn(read_all_logs(service.clone(), exec.id.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mid = tokio::spawn(read_all_logs(service.clone(), exec.id.clone()));

    let (status, _) = wait_terminal(&service, &exec.id, "c1").await;
    assert_eq!(status, "complete");

    let late = tokio::spawn(read_all_logs(service.clone(), exec.id.clone()));

    let (early, mid, late) = tokio::join!(early, mid, late);
    let (early, mid, late) = (early.unwrap(), mid.unwrap(), late.unwrap());
    assert_eq!(early, mid);
    assert_eq!(mid, late);
}

async fn read_all_logs(service: JobService, id: String) -> Vec<u8> {
    let mut stream = service
        .logs(authed(LogsRequest { id }, "c1"))
        .await
        .unwrap()
        .into_inner();
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap().log);
    }
    out
}
