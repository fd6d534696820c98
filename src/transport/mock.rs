//! Scripted in-memory transport for unit tests.
//!
//! A responder closure plays the controller: every written request is passed
//! to it and whatever it returns becomes readable. Tests keep a clone to
//! inspect traffic and inject failures.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{Interrupter, Transport};
use crate::error::{Error, Result};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

const READ_WAIT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    readable: Condvar,
}

struct State {
    responder: Option<Responder>,
    inbox: VecDeque<u8>,
    requests: Vec<Vec<u8>>,
    opened: Vec<String>,
    open: bool,
    failing_opens: usize,
    fail_reads: bool,
    interrupted: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    responder: None,
                    inbox: VecDeque::new(),
                    requests: Vec::new(),
                    opened: Vec::new(),
                    open: false,
                    failing_opens: 0,
                    fail_reads: false,
                    interrupted: false,
                }),
                readable: Condvar::new(),
            }),
        }
    }

    /// Transport whose peer answers every write through `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let mock = Self::new();
        mock.shared.state.lock().responder = Some(Box::new(responder));
        mock
    }

    /// Make the next `count` open attempts fail.
    pub fn fail_opens(&self, count: usize) {
        self.shared.state.lock().failing_opens = count;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.shared.state.lock().fail_reads = fail;
        self.shared.readable.notify_all();
    }

    /// Queue bytes for the reader, as if pushed by the peer.
    pub fn inject(&self, data: &[u8]) {
        self.shared.state.lock().inbox.extend(data);
        self.shared.readable.notify_all();
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().requests.clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.shared.state.lock().opened.clone()
    }

    pub fn as_transport(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }
}

fn io_error(kind: io::ErrorKind, message: &str) -> Error {
    Error::Transport(io::Error::new(kind, message.to_string()))
}

impl Transport for MockTransport {
    fn open(&mut self, address: &str) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.opened.push(address.to_string());
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(io_error(io::ErrorKind::ConnectionRefused, "mock refused"));
        }
        state.open = true;
        state.interrupted = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.shared.state.lock().open = false;
        self.shared.readable.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(io_error(io::ErrorKind::NotConnected, "mock closed"));
        }
        state.requests.push(data.to_vec());
        if let Some(responder) = state.responder.as_mut() {
            let reply = responder(data);
            state.inbox.extend(reply);
            self.shared.readable.notify_all();
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            if state.fail_reads {
                return Err(io_error(io::ErrorKind::ConnectionReset, "mock read failure"));
            }
            if state.interrupted || !state.open {
                return Err(io_error(io::ErrorKind::ConnectionAborted, "mock closed"));
            }
            if state.inbox.len() >= buf.len() {
                for byte in buf.iter_mut() {
                    *byte = state.inbox.pop_front().unwrap_or_default();
                }
                return Ok(());
            }
            if self
                .shared
                .readable
                .wait_for(&mut state, READ_WAIT)
                .timed_out()
            {
                return Err(io_error(io::ErrorKind::TimedOut, "mock read timed out"));
            }
        }
    }

    fn is_available(&self, _address: &str) -> bool {
        true
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let shared = Arc::clone(&self.shared);
        Some(Interrupter::new(move || {
            shared.state.lock().interrupted = true;
            shared.readable.notify_all();
        }))
    }
}
