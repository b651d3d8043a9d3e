//! Byte streams relayed through the controller.
//!
//! The guest opens a job for a URL and gets a blocking [`JobReader`] or
//! [`JobWriter`]. The controller feeds `UrlData` frames back, which the
//! dispatcher hands to [`StreamJobManager::deliver`]. Readers apply
//! HOLD/RESUME flow control; writers only send once the controller asks
//! for data.

pub mod http;
mod job;

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::bytes::Bytes;

pub use http::HttpResponse;
pub use job::{ConnectState, Direction, FlowLimits, StreamJob, StreamKind};
use job::{ConnectOutcome, Delivery};

use crate::bridge::protocol::{Message, UrlDataCode};
use crate::bridge::transport::Outbound;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("timed out connecting to {url}")]
    ConnectTimeout { url: String },

    #[error("connecting to {url} failed with error code {code}")]
    ConnectFailed { url: String, code: i32 },

    #[error("{url} answered with HTTP status {status}")]
    HttpStatus { url: String, status: i32 },

    #[error("stream job {job_id} failed with error code {code}")]
    Failed { job_id: String, code: i32 },

    #[error("controller never requested data for stream job {job_id}")]
    FlushTimeout { job_id: String },

    #[error("stream job {job_id} is disconnected")]
    Disconnected { job_id: String },

    #[error("failed to queue stream request: {0}")]
    Io(#[from] io::Error),
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::ConnectTimeout { .. } | StreamError::FlushTimeout { .. } => {
                io::ErrorKind::TimedOut
            }
            StreamError::ConnectFailed { .. } => io::ErrorKind::ConnectionRefused,
            StreamError::HttpStatus { status, .. } if *status == 401 || *status == 403 => {
                io::ErrorKind::PermissionDenied
            }
            StreamError::Disconnected { .. } => io::ErrorKind::NotConnected,
            StreamError::Io(e) => e.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Owns every live stream job, keyed by job id.
pub struct StreamJobManager {
    jobs: DashMap<String, Arc<StreamJob>>,
    next_id: AtomicU64,
    outbound: Outbound,
    limits: FlowLimits,
}

impl StreamJobManager {
    pub fn new(outbound: Outbound, limits: FlowLimits) -> Self {
        Self {
            jobs: DashMap::new(),
            next_id: AtomicU64::new(0),
            outbound,
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn job(&self, job_id: &str) -> Option<Arc<StreamJob>> {
        self.jobs.get(job_id).map(|j| Arc::clone(j.value()))
    }

    /// Open a read job and block until the controller connects it.
    pub fn open_read(
        self: &Arc<Self>,
        url: &str,
        kind: StreamKind,
    ) -> Result<JobReader, StreamError> {
        let job = self.connect(url, Direction::Read, kind)?;
        Ok(JobReader {
            manager: Arc::clone(self),
            job,
            current: Bytes::new(),
        })
    }

    /// Open a write job and block until the controller connects it.
    pub fn open_write(
        self: &Arc<Self>,
        url: &str,
        kind: StreamKind,
    ) -> Result<JobWriter, StreamError> {
        let job = self.connect(url, Direction::Write, kind)?;
        Ok(JobWriter {
            manager: Arc::clone(self),
            job,
            closed: false,
        })
    }

    fn connect(
        &self,
        url: &str,
        direction: Direction,
        kind: StreamKind,
    ) -> Result<Arc<StreamJob>, StreamError> {
        let job_id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let job = Arc::new(StreamJob::new(
            job_id.clone(),
            url.to_string(),
            direction,
            kind,
            self.limits,
            self.outbound.clone(),
        ));
        self.jobs.insert(job_id.clone(), Arc::clone(&job));

        let request = match direction {
            Direction::Read => Message::GetUrlData {
                job_id: job_id.clone(),
                url: url.to_string(),
            },
            Direction::Write => Message::PutUrlData {
                job_id: job_id.clone(),
                url: url.to_string(),
            },
        };
        tracing::debug!(%job_id, %url, ?direction, ?kind, "Opening stream job");
        if let Err(e) = self.outbound.send(request) {
            self.jobs.remove(&job_id);
            return Err(StreamError::Io(e));
        }

        match job.wait_connected() {
            ConnectOutcome::Connected => Ok(job),
            ConnectOutcome::TimedOut => {
                tracing::warn!(%job_id, %url, "Stream job connect timed out");
                self.disconnect(&job_id);
                Err(StreamError::ConnectTimeout {
                    url: url.to_string(),
                })
            }
            ConnectOutcome::Failed { code, status } => {
                tracing::debug!(%job_id, %url, code, status, "Stream job connect failed");
                self.disconnect(&job_id);
                if code != 0 {
                    Err(StreamError::ConnectFailed {
                        url: url.to_string(),
                        code,
                    })
                } else {
                    Err(StreamError::HttpStatus {
                        url: url.to_string(),
                        status,
                    })
                }
            }
        }
    }

    /// Route a `UrlData` delivery. Deliveries for unknown jobs are stale
    /// and dropped.
    pub fn deliver(&self, job_id: &str, subcode: UrlDataCode, data: Bytes) {
        let Some(job) = self.job(job_id) else {
            tracing::debug!(%job_id, ?subcode, "Dropping stale stream delivery");
            return;
        };
        tracing::trace!(%job_id, ?subcode, data_len = data.len(), "Stream delivery");
        if job.deliver(subcode, data) == Delivery::Finished {
            self.jobs.remove(job_id);
        }
    }

    /// Tear a job down, telling the controller to stop if the transfer was
    /// still running.
    pub fn disconnect(&self, job_id: &str) {
        if let Some((_, job)) = self.jobs.remove(job_id) {
            self.release(&job);
        }
    }

    fn release(&self, job: &StreamJob) {
        if job.close() == Some(true) {
            job.send_stop();
        }
        self.jobs.remove(job.id());
    }

    /// Disconnect every job. Used at shutdown.
    pub fn disconnect_all(&self) {
        let ids: Vec<String> = self.jobs.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.disconnect(&id);
        }
    }
}

/// Blocking reader over a connected read job. Dropping it disconnects.
pub struct JobReader {
    manager: Arc<StreamJobManager>,
    job: Arc<StreamJob>,
    current: Bytes,
}

impl JobReader {
    pub fn job_id(&self) -> &str {
        self.job.id()
    }

    /// HTTP status, or -1 when the controller sent no status line.
    pub fn response_code(&self) -> i32 {
        self.job.response().status
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.job.response().header(name).map(str::to_string)
    }

    pub fn mime_type(&self) -> Option<String> {
        self.job.mime_type()
    }

    pub fn redirect(&self) -> Option<String> {
        self.job.redirect()
    }

    /// Next whole chunk as delivered by the controller.
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError> {
        if !self.current.is_empty() {
            return Ok(Some(std::mem::take(&mut self.current)));
        }
        self.job.next_chunk()
    }
}

impl Read for JobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.current.is_empty() {
            match self.job.next_chunk()? {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        let chunk = self.current.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }
}

impl Drop for JobReader {
    fn drop(&mut self) {
        self.manager.release(&self.job);
    }
}

/// Blocking writer over a connected write job. `flush` waits for the
/// controller's readiness; dropping flushes then disconnects.
pub struct JobWriter {
    manager: Arc<StreamJobManager>,
    job: Arc<StreamJob>,
    closed: bool,
}

impl JobWriter {
    pub fn job_id(&self) -> &str {
        self.job.id()
    }

    /// Flush what is buffered and disconnect.
    pub fn close(mut self) -> Result<(), StreamError> {
        self.closed = true;
        let result = self.job.flush(true);
        self.manager.release(&self.job);
        result
    }
}

impl Write for JobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.job.write(Bytes::copy_from_slice(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Err(e) = self.job.flush(true) {
            if matches!(e, StreamError::FlushTimeout { .. }) {
                self.manager.release(&self.job);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for JobWriter {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.job.flush(true) {
            tracing::debug!(job_id = %self.job.id(), error = %e, "Final flush failed");
        }
        self.manager.release(&self.job);
    }
}
