//! One data transfer: a chunk queue with two-sided flow control.
//!
//! All mutable state sits behind one lock per job; readers waiting for data
//! and writers waiting for the controller's readiness share one condvar.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tokio_util::bytes::{Bytes, BytesMut};

use super::StreamError;
use super::http::HttpResponse;
use crate::bridge::protocol::{DataCommand, Message, UrlDataCode};
use crate::bridge::transport::Outbound;
use crate::lock::{lock, wait_timeout_while, wait_while};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Whether the controller reports HTTP metadata for this transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Plain,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    NotConnected,
    Connecting,
    Connected,
}

/// Queue thresholds and waits shared by every job.
#[derive(Debug, Clone, Copy)]
pub struct FlowLimits {
    pub high_water: usize,
    pub low_water: usize,
    pub connect_timeout: Duration,
    pub flush_timeout: Duration,
}

impl Default for FlowLimits {
    fn default() -> Self {
        Self {
            high_water: 10,
            low_water: 5,
            connect_timeout: Duration::from_secs(20),
            flush_timeout: Duration::from_secs(10),
        }
    }
}

struct JobState {
    connect: ConnectState,
    queue: VecDeque<Bytes>,
    finished: bool,
    on_hold: bool,
    request_data: bool,
    error_code: i32,
    end_of_stream: bool,
    pending_out: Vec<Bytes>,
    headers_received: bool,
    response: HttpResponse,
    redirect: Option<String>,
    mime_type: Option<String>,
}

/// What a delivery did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Accepted,
    Finished,
}

/// How a connect attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectOutcome {
    Connected,
    Failed { code: i32, status: i32 },
    TimedOut,
}

pub struct StreamJob {
    id: String,
    url: String,
    direction: Direction,
    kind: StreamKind,
    limits: FlowLimits,
    outbound: Outbound,
    state: Mutex<JobState>,
    changed: Condvar,
}

impl StreamJob {
    pub(crate) fn new(
        id: String,
        url: String,
        direction: Direction,
        kind: StreamKind,
        limits: FlowLimits,
        outbound: Outbound,
    ) -> Self {
        Self {
            id,
            url,
            direction,
            kind,
            limits,
            outbound,
            state: Mutex::new(JobState {
                connect: ConnectState::Connecting,
                queue: VecDeque::new(),
                finished: false,
                on_hold: false,
                request_data: false,
                error_code: 0,
                end_of_stream: false,
                pending_out: Vec::new(),
                headers_received: false,
                response: HttpResponse::default(),
                redirect: None,
                mime_type: None,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn connect_state(&self) -> ConnectState {
        lock(&self.state).connect
    }

    pub fn queued_chunks(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn is_on_hold(&self) -> bool {
        lock(&self.state).on_hold
    }

    pub fn response(&self) -> HttpResponse {
        lock(&self.state).response.clone()
    }

    pub fn redirect(&self) -> Option<String> {
        lock(&self.state).redirect.clone()
    }

    pub fn mime_type(&self) -> Option<String> {
        lock(&self.state).mime_type.clone()
    }

    fn signal(&self, command: DataCommand) {
        tracing::trace!(job_id = %self.id, ?command, "Sending data command");
        if let Err(e) = self.outbound.send(Message::DataCommand {
            job_id: self.id.clone(),
            command,
        }) {
            tracing::warn!(job_id = %self.id, ?command, error = %e, "Failed to send data command");
        }
    }

    fn has_error(&self, st: &JobState) -> bool {
        if st.error_code != 0 {
            return true;
        }
        self.kind == StreamKind::Http && st.headers_received && st.response.is_error()
    }

    /// Apply one controller delivery.
    pub(crate) fn deliver(&self, subcode: UrlDataCode, data: Bytes) -> Delivery {
        let mut st = lock(&self.state);
        if st.connect == ConnectState::Connecting {
            st.connect = ConnectState::Connected;
        }
        let mut outcome = Delivery::Accepted;
        match subcode {
            UrlDataCode::Finished => {
                if !data.is_empty() && !st.finished {
                    st.queue.push_back(data);
                }
                st.finished = true;
                st.on_hold = false;
                outcome = Delivery::Finished;
            }
            UrlDataCode::Data => {
                if st.finished {
                    tracing::debug!(job_id = %self.id, "Dropping chunk delivered after finish");
                } else if !data.is_empty() {
                    st.queue.push_back(data);
                    if !st.on_hold && st.queue.len() > self.limits.high_water {
                        st.on_hold = true;
                        self.signal(DataCommand::Hold);
                    }
                }
            }
            UrlDataCode::ErrorCode => {
                let text = String::from_utf8_lossy(&data);
                st.error_code = text.trim().parse().unwrap_or(-1);
                tracing::debug!(job_id = %self.id, error_code = st.error_code, "Stream job error code");
            }
            UrlDataCode::Connect => {
                st.request_data = true;
                st.error_code = 0;
            }
            UrlDataCode::RequestData => {
                st.request_data = true;
            }
            UrlDataCode::Headers => {
                st.response = HttpResponse::parse(&String::from_utf8_lossy(&data));
                st.headers_received = true;
            }
            UrlDataCode::Redirect => {
                st.redirect = Some(String::from_utf8_lossy(&data).into_owned());
            }
            UrlDataCode::MimeType => {
                st.mime_type = Some(String::from_utf8_lossy(&data).into_owned());
            }
        }
        drop(st);
        self.changed.notify_all();
        outcome
    }

    /// Block until the controller answers the connect request.
    pub(crate) fn wait_connected(&self) -> ConnectOutcome {
        let needs_headers = self.kind == StreamKind::Http && self.direction == Direction::Read;
        let st = lock(&self.state);
        let (st, _) = wait_timeout_while(&self.changed, st, self.limits.connect_timeout, |st| {
            st.connect == ConnectState::Connecting
                || (needs_headers && !st.headers_received && st.error_code == 0 && !st.finished)
        });
        if st.connect != ConnectState::Connected {
            return ConnectOutcome::TimedOut;
        }
        if needs_headers && !st.headers_received && st.error_code == 0 && !st.finished {
            return ConnectOutcome::TimedOut;
        }
        if self.has_error(&st) {
            return ConnectOutcome::Failed {
                code: st.error_code,
                status: st.response.status,
            };
        }
        ConnectOutcome::Connected
    }

    /// Pull the next chunk, blocking while the queue is empty.
    ///
    /// Returns `Ok(None)` at end of stream, which is permanent.
    pub fn next_chunk(&self) -> Result<Option<Bytes>, StreamError> {
        let st = lock(&self.state);
        let mut st = wait_while(&self.changed, st, |st| {
            st.queue.is_empty()
                && !st.finished
                && !st.end_of_stream
                && st.error_code == 0
                && st.connect != ConnectState::NotConnected
        });

        if st.end_of_stream {
            return Ok(None);
        }
        if st.error_code != 0 {
            return Err(StreamError::Failed {
                job_id: self.id.clone(),
                code: st.error_code,
            });
        }
        if let Some(chunk) = st.queue.pop_front() {
            if st.on_hold && st.queue.len() < self.limits.low_water {
                st.on_hold = false;
                self.signal(DataCommand::Resume);
            }
            return Ok(Some(chunk));
        }
        // Finished or disconnected with nothing left.
        st.end_of_stream = true;
        Ok(None)
    }

    /// Queue bytes for the controller, sending at once if it asked for data.
    pub fn write(&self, data: Bytes) -> Result<(), StreamError> {
        let mut st = lock(&self.state);
        if st.connect == ConnectState::NotConnected {
            return Err(StreamError::Disconnected {
                job_id: self.id.clone(),
            });
        }
        st.pending_out.push(data);
        if st.request_data {
            self.send_pending(&mut st);
        }
        Ok(())
    }

    /// Send buffered bytes. With `force`, wait for the controller's
    /// readiness up to the flush timeout; on timeout the buffer is dropped.
    pub fn flush(&self, force: bool) -> Result<(), StreamError> {
        let mut st = lock(&self.state);
        if st.pending_out.is_empty() {
            return Ok(());
        }
        if !st.request_data {
            if !force {
                return Ok(());
            }
            let (guard, _) = wait_timeout_while(&self.changed, st, self.limits.flush_timeout, |st| {
                !st.request_data && st.connect != ConnectState::NotConnected
            });
            st = guard;
            if !st.request_data {
                st.pending_out.clear();
                tracing::warn!(job_id = %self.id, "Controller never asked for data, dropping buffered writes");
                return Err(StreamError::FlushTimeout {
                    job_id: self.id.clone(),
                });
            }
        }
        self.send_pending(&mut st);
        Ok(())
    }

    fn send_pending(&self, st: &mut JobState) {
        let total = st.pending_out.iter().map(Bytes::len).sum();
        let mut joined = BytesMut::with_capacity(total);
        for chunk in st.pending_out.drain(..) {
            joined.extend_from_slice(&chunk);
        }
        st.request_data = false;
        if let Err(e) = self.outbound.send(Message::PutData {
            job_id: self.id.clone(),
            data: joined.freeze(),
        }) {
            tracing::warn!(job_id = %self.id, error = %e, "Failed to send stream data");
        }
    }

    /// Mark the job disconnected. Returns whether a stop signal is owed to
    /// the controller (the transfer had not finished).
    pub(crate) fn close(&self) -> Option<bool> {
        let mut st = lock(&self.state);
        if st.connect == ConnectState::NotConnected {
            return None;
        }
        st.connect = ConnectState::NotConnected;
        let owes_stop = !st.finished;
        drop(st);
        self.changed.notify_all();
        Some(owes_stop)
    }

    pub(crate) fn send_stop(&self) {
        self.signal(DataCommand::Stop);
    }
}
