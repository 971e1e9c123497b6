//! gRPC front end of the commit log.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::api::v1 as api;
use crate::api::v1::log_service_server::{LogService, LogServiceServer};
use crate::api::v1::{ConsumeRequest, ConsumeResponse, ProduceRequest, ProduceResponse};
use crate::common::{Error, Result};
use crate::storage::log::{Log, Record};

/// Number of responses a stream buffers before its task waits on the client.
const STREAM_BUFFER: usize = 128;

/// What the service needs from the log behind it.
pub trait CommitLog: Send + Sync + 'static {
    fn append(&self, record: Record) -> Result<u64>;
    fn read(&self, offset: u64) -> Result<Record>;
    /// Receiver that changes whenever a record is appended.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

impl CommitLog for Log {
    fn append(&self, record: Record) -> Result<u64> {
        Log::append(self, record)
    }

    fn read(&self, offset: u64) -> Result<Record> {
        Log::read(self, offset)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        Log::subscribe(self)
    }
}

impl From<api::Record> for Record {
    fn from(record: api::Record) -> Self {
        Record {
            value: record.value,
            offset: record.offset,
        }
    }
}

impl From<Record> for api::Record {
    fn from(record: Record) -> Self {
        api::Record {
            value: record.value,
            offset: record.offset,
        }
    }
}

pub struct GrpcServer {
    commit_log: Arc<dyn CommitLog>,
}

impl GrpcServer {
    pub fn new(commit_log: Arc<dyn CommitLog>) -> Self {
        GrpcServer { commit_log }
    }

    pub fn into_service(self) -> LogServiceServer<Self> {
        LogServiceServer::new(self)
    }
}

fn produce(
    commit_log: &dyn CommitLog,
    request: ProduceRequest,
) -> std::result::Result<ProduceResponse, Status> {
    let record = request
        .record
        .ok_or_else(|| Status::invalid_argument("produce request carries no record"))?;
    let offset = commit_log.append(record.into())?;
    Ok(ProduceResponse { offset })
}

fn consume(
    commit_log: &dyn CommitLog,
    request: ConsumeRequest,
) -> std::result::Result<ConsumeResponse, Status> {
    let record = commit_log.read(request.offset)?;
    Ok(ConsumeResponse {
        record: Some(record.into()),
    })
}

#[tonic::async_trait]
impl LogService for GrpcServer {
    async fn produce(
        &self,
        request: Request<ProduceRequest>,
    ) -> std::result::Result<Response<ProduceResponse>, Status> {
        produce(self.commit_log.as_ref(), request.into_inner()).map(Response::new)
    }

    async fn consume(
        &self,
        request: Request<ConsumeRequest>,
    ) -> std::result::Result<Response<ConsumeResponse>, Status> {
        consume(self.commit_log.as_ref(), request.into_inner()).map(Response::new)
    }

    type ProduceStreamStream = ReceiverStream<std::result::Result<ProduceResponse, Status>>;

    async fn produce_stream(
        &self,
        request: Request<Streaming<ProduceRequest>>,
    ) -> std::result::Result<Response<Self::ProduceStreamStream>, Status> {
        let mut inbound = request.into_inner();
        let commit_log = self.commit_log.clone();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            loop {
                let request = match inbound.message().await {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(status) => {
                        debug!(status = %status, "produce stream closed by client");
                        let _ = tx.send(Err(status)).await;
                        break;
                    }
                };
                let response = produce(commit_log.as_ref(), request);
                let failed = response.is_err();
                if tx.send(response).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type ConsumeStreamStream = ReceiverStream<std::result::Result<ConsumeResponse, Status>>;

    async fn consume_stream(
        &self,
        request: Request<ConsumeRequest>,
    ) -> std::result::Result<Response<Self::ConsumeStreamStream>, Status> {
        let offset = request.into_inner().offset;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(tail(self.commit_log.clone(), offset, tx));
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Sends every record from `offset` onwards, waiting for new ones at the end
/// of the log. Ends when the client goes away or a read fails for any reason
/// other than the offset not being written yet.
async fn tail(
    commit_log: Arc<dyn CommitLog>,
    mut offset: u64,
    tx: mpsc::Sender<std::result::Result<ConsumeResponse, Status>>,
) {
    let mut appended = commit_log.subscribe();
    debug!(offset, "tail started");

    loop {
        if tx.is_closed() {
            debug!(offset, "tail cancelled");
            return;
        }

        // Anything appended after this point wakes the wait below.
        let _ = appended.borrow_and_update();

        match commit_log.read(offset) {
            Ok(record) => {
                let response = ConsumeResponse {
                    record: Some(record.into()),
                };
                if tx.send(Ok(response)).await.is_err() {
                    debug!(offset, "tail cancelled");
                    return;
                }
                offset += 1;
            }
            Err(Error::OffsetOutOfRange(_)) => {
                tokio::select! {
                    biased;
                    _ = tx.closed() => {}
                    changed = appended.changed() => {
                        if changed.is_err() {
                            // No more notifications; fall back to polling.
                            tokio::task::yield_now().await;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(offset, err = %err, "tail failed");
                let _ = tx.send(Err(err.into())).await;
                return;
            }
        }
    }
}
