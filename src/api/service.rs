//! `JobService`: the ownership-enforcing facade over `JobStore`/`Job`
//! that the generated `job_worker_server::JobWorker` trait dispatches
//! into.

use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::api::middleware::ClientId;
use crate::core::job::{Job, JobStatus, NO_EXIT_CODE};
use crate::core::output::{OutputReader, TailRead, LOG_CHUNK_SIZE};
use crate::core::store::JobStore;
use crate::error::JobError;
use crate::proto::job_worker_server::JobWorker;
use crate::proto::{
    ExecRequest, ExecResponse, LogChunk, LogsRequest, StatusRequest, StatusResponse, StopRequest,
    StopResponse,
};

/// gRPC service implementation. Holds only a reference to the
/// `JobStore`; all job lifecycle logic lives in `core`. Cheaply
/// cloneable — every clone shares the same underlying store.
#[derive(Clone)]
pub struct JobService {
    store: Arc<JobStore>,
}

impl JobService {
    pub fn new(store: Arc<JobStore>) -> Self {
        JobService { store }
    }

    /// Fetch a job by id and enforce that `client_id` owns it.
    /// `NotFound` takes precedence over `PermissionDenied` (spec.md
    /// §4.4): existence is not treated as a secret.
    fn authorized_job(&self, id: &str, client_id: &str) -> Result<Arc<Job>, JobError> {
        let job = self.store.get(id).ok_or(JobError::NotFound)?;
        if job.client_id() != client_id {
            return Err(JobError::Ownership);
        }
        Ok(job)
    }

    fn client_id(request: &Request<impl Sized>) -> Result<String, Status> {
        request
            .extensions()
            .get::<ClientId>()
            .map(|c| c.0.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| JobError::AuthFailure.into())
    }
}

pub type LogsStream = Pin<Box<dyn Stream<Item = Result<LogChunk, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl JobWorker for JobService {
    async fn exec(&self, request: Request<ExecRequest>) -> Result<Response<ExecResponse>, Status> {
        let client_id = Self::client_id(&request)?;
        let req = request.into_inner();

        let job = Job::new(client_id.clone(), req.command.clone(), req.args)
            .map_err(Status::from)?;
        let job = Arc::new(job);
        let id = job.id().to_string();
        self.store.add(job.clone());

        info!(job_id = %id, client_id = %client_id, command = %req.command, "job accepted");
        std::thread::spawn(move || job.start());

        Ok(Response::new(ExecResponse { id }))
    }

    async fn status(
        &self,
        request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let client_id = Self::client_id(&request)?;
        let id = request.into_inner().id;
        let job = self.authorized_job(&id, &client_id).map_err(Status::from)?;

        let status = job.status();
        let (exit_code, error) = if status == JobStatus::Running || status == JobStatus::Pending {
            (NO_EXIT_CODE, String::new())
        } else {
            (job.exit_code(), job.error())
        };

        debug!(job_id = %id, status = status.as_str(), "status query");

        Ok(Response::new(StatusResponse {
            status: status.as_str().to_string(),
            exit_code,
            error,
        }))
    }

    async fn stop(&self, request: Request<StopRequest>) -> Result<Response<StopResponse>, Status> {
        let client_id = Self::client_id(&request)?;
        let id = request.into_inner().id;
        let job = self.authorized_job(&id, &client_id).map_err(Status::from)?;

        job.interrupt().map_err(Status::from)?;
        info!(job_id = %id, "stop requested");

        Ok(Response::new(StopResponse { success: true }))
    }

    type LogsStream = LogsStream;

    async fn logs(&self, request: Request<LogsRequest>) -> Result<Response<LogsStream>, Status> {
        let client_id = Self::client_id(&request)?;
        let id = request.into_inner().id;
        let job = self.authorized_job(&id, &client_id).map_err(Status::from)?;

        let reader = job.output().open_reader().map_err(Status::from)?;
        let stream = tail_stream(reader);
        Ok(Response::new(Box::pin(stream)))
    }
}

/// Adapt the blocking, polling `OutputReader` tail loop into an async
/// stream of `LogChunk`s by driving the blocking reads on a dedicated
/// thread and forwarding them over a channel.
fn tail_stream(mut reader: OutputReader) -> impl Stream<Item = Result<LogChunk, Status>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<LogChunk, Status>>(16);

    std::thread::spawn(move || loop {
        let mut buf = [0u8; LOG_CHUNK_SIZE];
        match reader.read_tail(&mut buf) {
            Ok(TailRead::Data(n)) => {
                if tx
                    .blocking_send(Ok(LogChunk {
                        log: buf[..n].to_vec(),
                    }))
                    .is_err()
                {
                    // Receiver dropped: client cancelled. Release the
                    // reader by returning, dropping it.
                    return;
                }
            }
            Ok(TailRead::Eof) => return,
            Err(err) => {
                let _ = tx.blocking_send(Err(Status::from(err)));
                return;
            }
        }
    });

    tokio_stream::wrappers::ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::job_worker_server::JobWorker;

    fn service_with_store() -> (JobService, Arc<JobStore>) {
        let store = Arc::new(JobStore::new());
        (JobService::new(store.clone()), store)
    }

    fn request_with_client<T>(body: T, client: &str) -> Request<T> {
        let mut req = Request::new(body);
        req.extensions_mut()
            .insert(ClientId(client.to_string()));
        req
    }

    #[tokio::test]
    async fn exec_without_client_id_is_permission_denied() {
        let (service, _store) = service_with_store();
        let req = Request::new(ExecRequest {
            command: "/bin/echo".to_string(),
            args: vec![],
        });
        let err = service.exec(req).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn status_on_unknown_job_is_not_found() {
        let (service, _store) = service_with_store();
        let req = request_with_client(StatusRequest { id: "nope".to_string() }, "c1");
        let err = service.status(req).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn status_from_other_client_is_permission_denied() {
        let (service, store) = service_with_store();
        let job = Arc::new(Job::new("owner".to_string(), "/bin/sleep".to_string(), vec!["1".to_string()]).unwrap());
        let id = job.id().to_string();
        store.add(job);

        let req = request_with_client(StatusRequest { id }, "intruder");
        let err = service.status(req).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn stop_on_non_running_job_is_failed_precondition() {
        let (service, store) = service_with_store();
        let job = Arc::new(Job::new("c1".to_string(), "/bin/echo".to_string(), vec![]).unwrap());
        job.start();
        let id = job.id().to_string();
        store.add(job);

        let req = request_with_client(StopRequest { id }, "c1");
        let err = service.stop(req).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn exec_then_status_reaches_complete() {
        let (service, _store) = service_with_store();
        let req = request_with_client(
            ExecRequest {
                command: "/bin/echo".to_string(),
                args: vec!["hi".to_string()],
            },
            "c1",
        );
        let id = service.exec(req).await.unwrap().into_inner().id;

        let mut status = "pending".to_string();
        for _ in 0..100 {
            let req = request_with_client(StatusRequest { id: id.clone() }, "c1");
            let resp = service.status(req).await.unwrap().into_inner();
            status = resp.status;
            if status != "pending" && status != "running" {
                assert_eq!(resp.exit_code, 0);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(status, "complete");
    }
}
