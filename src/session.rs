//! Connection state machine and online-mode exchange loop.
//!
//! A [`Session`] owns one transport, one [`TaskQueue`] and one
//! [`RegisterBank`]. Every wire exchange runs on the queue worker, so calls
//! from any number of threads never interleave on the wire. Register setters
//! only touch the bank; the next timer tick picks their values up.
//!
//! Events are raised after the lifecycle lock is released, so listeners may
//! call back into the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use parking_lot::Mutex;
use strum_macros::Display;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{EventHub, ListenerId, SessionEvent};
use crate::protocol::{ControllerInfo, Protocol};
use crate::queue::TaskQueue;
use crate::registers::{INPUT_COUNT, InputMode, MotorDirection, OutputMode, RegisterBank};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connected,
    Online,
    /// Lost after a transport or protocol failure; only `connect` and
    /// `disconnect` leave this state
    Invalid,
}

struct Link<P> {
    transport: Box<dyn Transport>,
    protocol: P,
}

impl<P: Protocol> Link<P> {
    fn split(&mut self) -> (&mut P, &mut dyn Transport) {
        (&mut self.protocol, &mut *self.transport)
    }
}

struct Inner<P: Protocol> {
    config: SessionConfig,
    queue: TaskQueue,
    state: Mutex<ConnectionState>,
    bank: Arc<Mutex<RegisterBank>>,
    link: Arc<Mutex<Link<P>>>,
    events: Arc<EventHub<SessionEvent>>,
    info: Mutex<Option<ControllerInfo>>,
    address: Mutex<Option<String>>,
    /// Serializes connect / online / disconnect
    op: Mutex<()>,
    /// Bumped whenever online mode starts or stops; a tick from an older
    /// generation does nothing.
    generation: Arc<AtomicU64>,
    timer_stop: Mutex<Option<Sender<()>>>,
}

/// One controller connection.
pub struct Session<P: Protocol> {
    inner: Arc<Inner<P>>,
}

/// Non-owning reference to a [`Session`], handed to collaborators such as
/// the camera stream.
pub struct SessionHandle<P: Protocol> {
    inner: Weak<Inner<P>>,
}

impl<P: Protocol> Clone for SessionHandle<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<P: Protocol> Session<P> {
    pub fn new(transport: Box<dyn Transport>, protocol: P, config: SessionConfig) -> Result<Self> {
        let queue = TaskQueue::new(format!("{}-session", P::NAME.to_lowercase()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                queue,
                state: Mutex::new(ConnectionState::NotConnected),
                bank: Arc::new(Mutex::new(RegisterBank::new())),
                link: Arc::new(Mutex::new(Link {
                    transport,
                    protocol,
                })),
                events: Arc::new(EventHub::new()),
                info: Mutex::new(None),
                address: Mutex::new(None),
                op: Mutex::new(()),
                generation: Arc::new(AtomicU64::new(0)),
                timer_stop: Mutex::new(None),
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Identity reported by the controller during `connect`.
    pub fn controller_info(&self) -> Option<ControllerInfo> {
        self.inner.info.lock().clone()
    }

    /// Address passed to the last successful `connect`.
    pub fn address(&self) -> Option<String> {
        self.inner.address.lock().clone()
    }

    /// Probe `address` through this session's transport without connecting.
    pub fn is_available(&self, address: &str) -> bool {
        self.inner.link.lock().transport.is_available(address)
    }

    pub fn handle(&self) -> SessionHandle<P> {
        SessionHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    pub fn subscribe_channel(&self) -> (ListenerId, Receiver<SessionEvent>) {
        self.inner.events.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Open the transport and identify the controller.
    ///
    /// Accepted from `NotConnected` and `Invalid`. A transport or protocol
    /// failure moves the session to `Invalid` and raises `ConnectionLost`.
    pub fn connect(&self, address: &str) -> Result<()> {
        let address = address.to_string();
        self.inner
            .lifecycle(move |inner, events| inner.connect_locked(address, events))
    }

    /// Enter online mode and start the periodic exchange.
    pub fn start_online(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .lifecycle(move |_, events| Inner::start_online_locked(&inner, events))
    }

    /// Stop the exchange loop, zero every output and leave online mode.
    pub fn stop_online(&self) -> Result<()> {
        self.inner.lifecycle(Inner::stop_online_locked)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.inner.lifecycle(Inner::disconnect_locked)
    }

    /// Run a protocol-specific exchange on the session queue.
    pub fn run_exchange<T, F>(&self, exchange: F) -> Result<T>
    where
        F: FnOnce(&mut P, &mut dyn Transport) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.run_exchange(exchange)
    }

    pub fn input_value(&self, index: usize) -> Result<i16> {
        self.inner.read_bank(|bank| bank.input_value(index))
    }

    pub fn input_values(&self) -> Result<[i16; INPUT_COUNT]> {
        self.inner.read_bank(|bank| Ok(bank.input_values()))
    }

    pub fn input_mode(&self, index: usize) -> Result<InputMode> {
        self.inner.read_bank(|bank| bank.input_mode(index))
    }

    pub fn input_is_digital(&self, index: usize) -> Result<bool> {
        self.inner.read_bank(|bank| bank.input_is_digital(index))
    }

    pub fn configure_input_mode(&self, index: usize, mode: InputMode, digital: bool) -> Result<()> {
        self.inner
            .write_bank(|bank| bank.set_input_mode(index, mode, digital))
    }

    pub fn output_value(&self, port: usize) -> Result<i32> {
        self.inner.read_bank(|bank| bank.output_value(port))
    }

    pub fn set_output_value(&self, port: usize, value: i32) -> Result<()> {
        self.inner
            .write_bank(|bank| bank.set_output_value(port, value))
    }

    pub fn output_mode(&self, motor: usize) -> Result<OutputMode> {
        self.inner.read_bank(|bank| bank.output_mode(motor))
    }

    pub fn is_motor(&self, motor: usize) -> Result<bool> {
        self.inner.read_bank(|bank| bank.is_motor(motor))
    }

    /// Pair outputs `2 * motor` and `2 * motor + 1`, or split them again.
    pub fn configure_output_mode(&self, motor: usize, mode: OutputMode) -> Result<()> {
        self.inner.write_bank(|bank| bank.set_output_mode(motor, mode))
    }

    pub fn motor_value(&self, motor: usize) -> Result<i32> {
        self.inner.read_bank(|bank| bank.motor_value(motor))
    }

    pub fn motor_direction(&self, motor: usize) -> Result<MotorDirection> {
        self.inner.read_bank(|bank| bank.motor_direction(motor))
    }

    pub fn set_motor_value(&self, motor: usize, value: i32, direction: MotorDirection) -> Result<()> {
        self.inner
            .write_bank(|bank| bank.set_motor_value(motor, value, direction))
    }

    pub fn set_motor_direction(&self, motor: usize, direction: MotorDirection) -> Result<()> {
        self.inner
            .write_bank(|bank| bank.set_motor_direction(motor, direction))
    }
}

impl<P: Protocol> Drop for Session<P> {
    fn drop(&mut self) {
        if self.inner.state() != ConnectionState::NotConnected {
            if let Err(err) = self.disconnect() {
                log::debug!("{}: disconnect on drop failed: {err}", P::NAME);
            }
        }
    }
}

impl<P: Protocol> SessionHandle<P> {
    pub fn state(&self) -> ConnectionState {
        self.inner
            .upgrade()
            .map_or(ConnectionState::NotConnected, |inner| inner.state())
    }

    /// See [`Session::run_exchange`]. Fails with `NotConnected` once the
    /// session is gone.
    pub fn run_exchange<T, F>(&self, exchange: F) -> Result<T>
    where
        F: FnOnce(&mut P, &mut dyn Transport) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner
            .upgrade()
            .ok_or(Error::NotConnected)?
            .run_exchange(exchange)
    }
}

impl<P: Protocol> Inner<P> {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            log::info!("{}: {} -> {}", P::NAME, *current, state);
            *current = state;
        }
    }

    fn require_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Online => Ok(()),
            ConnectionState::NotConnected | ConnectionState::Invalid => Err(Error::NotConnected),
        }
    }

    fn read_bank<T>(&self, read: impl FnOnce(&RegisterBank) -> Result<T>) -> Result<T> {
        self.require_connected()?;
        read(&self.bank.lock())
    }

    fn write_bank<T>(&self, write: impl FnOnce(&mut RegisterBank) -> Result<T>) -> Result<T> {
        self.require_connected()?;
        write(&mut self.bank.lock())
    }

    /// Run a lifecycle operation under the op lock, then raise its events.
    fn lifecycle<T>(
        &self,
        op: impl FnOnce(&Self, &mut Vec<SessionEvent>) -> Result<T>,
    ) -> Result<T> {
        let mut events = Vec::new();
        let result = {
            let _guard = self.op.lock();
            op(self, &mut events)
        };
        for event in &events {
            self.events.emit(event);
        }
        result
    }

    /// Run `job` on the queue worker with the link and the bank.
    fn exchange_job<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Link<P>, &Mutex<RegisterBank>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let link = Arc::clone(&self.link);
        let bank = Arc::clone(&self.bank);
        self.queue.submit_blocking(move || {
            let mut link = link.lock();
            job(&mut link, &bank)
        })?
    }

    fn run_exchange<T, F>(&self, exchange: F) -> Result<T>
    where
        F: FnOnce(&mut P, &mut dyn Transport) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.require_connected()?;
        self.exchange_job(move |link, _| {
            let (protocol, io) = link.split();
            exchange(protocol, io)
        })
        .map_err(|err| {
            let mut events = Vec::new();
            let err = self.escalate(err, &mut events);
            for event in &events {
                self.events.emit(event);
            }
            err
        })
    }

    /// Stop the timer thread and make any queued tick a no-op.
    fn disarm(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.timer_stop.lock().take();
    }

    /// Move to `Invalid` and close the transport. Yields `ConnectionLost`
    /// only for the call that made the transition.
    fn lose(&self, err: &Error) -> Option<SessionEvent> {
        self.disarm();
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Connected | ConnectionState::Online => {
                    log::error!("{}: connection lost: {err}", P::NAME);
                    *state = ConnectionState::Invalid;
                }
                _ => return None,
            }
        }
        let link = Arc::clone(&self.link);
        let closed = self
            .queue
            .submit_blocking(move || link.lock().transport.close())
            .and_then(|result| result);
        if let Err(err) = closed {
            log::debug!("{}: close after failure: {err}", P::NAME);
        }
        Some(SessionEvent::ConnectionLost)
    }

    /// Fatal errors take the session down; others pass through untouched.
    fn escalate(&self, err: Error, events: &mut Vec<SessionEvent>) -> Error {
        if err.is_fatal() {
            events.extend(self.lose(&err));
        }
        err
    }

    fn connect_locked(&self, address: String, events: &mut Vec<SessionEvent>) -> Result<()> {
        let previous = self.state();
        if matches!(
            previous,
            ConnectionState::Connected | ConnectionState::Online
        ) {
            return Err(Error::AlreadyConnected);
        }

        log::info!("{}: connecting to {address}", P::NAME);
        let target = address.clone();
        let identified = self.exchange_job(move |link, _| {
            let Link {
                transport,
                protocol,
            } = link;
            if let Err(err) = transport.close() {
                log::debug!("{}: closing stale connection: {err}", P::NAME);
            }
            protocol.reset();
            transport.open(&target)?;
            protocol.identify(&mut **transport).inspect_err(|_| {
                let _ = transport.close();
            })
        });

        match identified {
            Ok(info) => {
                self.bank.lock().reset();
                *self.info.lock() = Some(info);
                *self.address.lock() = Some(address);
                self.set_state(ConnectionState::Connected);
                events.push(SessionEvent::Connected);
                Ok(())
            }
            Err(err) => {
                log::warn!("{}: connect to {address} failed: {err}", P::NAME);
                if err.is_fatal() {
                    self.set_state(ConnectionState::Invalid);
                    if previous != ConnectionState::Invalid {
                        events.push(SessionEvent::ConnectionLost);
                    }
                }
                Err(err)
            }
        }
    }

    fn start_online_locked(this: &Arc<Self>, events: &mut Vec<SessionEvent>) -> Result<()> {
        match this.state() {
            ConnectionState::Online => return Ok(()),
            ConnectionState::Connected => {}
            ConnectionState::NotConnected | ConnectionState::Invalid => {
                return Err(Error::NotConnected);
            }
        }

        this.bank.lock().mark_config_changed();
        let started = this.exchange_job(|link, _| {
            let (protocol, io) = link.split();
            protocol.start_online(io)
        });
        if let Err(err) = started {
            return Err(this.escalate(err, events));
        }

        let generation = this.generation.fetch_add(1, Ordering::AcqRel) + 1;
        this.set_state(ConnectionState::Online);
        if let Err(err) = Self::spawn_timer(this, generation) {
            log::error!("{}: could not start exchange timer: {err}", P::NAME);
            this.set_state(ConnectionState::Connected);
            return Err(err);
        }
        events.push(SessionEvent::OnlineStarted);
        events.push(SessionEvent::all_inputs_changed());
        Ok(())
    }

    fn spawn_timer(this: &Arc<Self>, generation: u64) -> Result<()> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let weak = Arc::downgrade(this);
        let interval = this.config.update_interval;
        thread::Builder::new()
            .name(format!("{}-timer", P::NAME.to_lowercase()))
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(inner) = weak.upgrade() else { break };
                            if !inner.run_tick(generation) {
                                break;
                            }
                        }
                    }
                }
                log::debug!("{}: exchange timer stopped", P::NAME);
            })?;
        *this.timer_stop.lock() = Some(stop_tx);
        Ok(())
    }

    /// One timer tick. Returns false once the loop should end.
    fn run_tick(&self, generation: u64) -> bool {
        let current = Arc::clone(&self.generation);
        let result = self.exchange_job(move |link, bank| {
            if current.load(Ordering::Acquire) != generation {
                return Ok(None);
            }
            exchange_cycle(link, bank).map(Some)
        });

        match result {
            Ok(Some(changed)) => {
                if !changed.is_empty() {
                    self.events.emit(&SessionEvent::InputValueChanged(changed));
                }
                true
            }
            Ok(None) => false,
            Err(err) => {
                if let Some(event) = self.lose(&err) {
                    self.events.emit(&event);
                }
                false
            }
        }
    }

    fn stop_online_locked(&self, events: &mut Vec<SessionEvent>) -> Result<()> {
        match self.state() {
            ConnectionState::Online => {}
            ConnectionState::Connected => return Err(Error::NotOnline),
            ConnectionState::NotConnected | ConnectionState::Invalid => {
                return Err(Error::NotConnected);
            }
        }

        self.disarm();
        self.bank.lock().stop_outputs();
        let stopped = self.exchange_job(|link, bank| {
            let changed = exchange_cycle(link, bank)?;
            let (protocol, io) = link.split();
            protocol.stop_online(io)?;
            Ok(changed)
        });

        match stopped {
            Ok(changed) => {
                if self.state() != ConnectionState::Online {
                    return Err(Error::NotConnected);
                }
                self.set_state(ConnectionState::Connected);
                if !changed.is_empty() {
                    events.push(SessionEvent::InputValueChanged(changed));
                }
                events.push(SessionEvent::OnlineStopped);
                Ok(())
            }
            Err(err) => Err(self.escalate(err, events)),
        }
    }

    fn disconnect_locked(&self, events: &mut Vec<SessionEvent>) -> Result<()> {
        let previous = self.state();
        if previous == ConnectionState::NotConnected {
            return Err(Error::NotConnected);
        }

        self.disarm();
        let was_online = previous == ConnectionState::Online;
        let closed = self.exchange_job(move |link, bank| {
            if was_online {
                bank.lock().stop_outputs();
                let left = exchange_cycle(link, bank).and_then(|_| {
                    let (protocol, io) = link.split();
                    protocol.stop_online(io)
                });
                if let Err(err) = left {
                    log::warn!("{}: leaving online mode failed: {err}", P::NAME);
                }
            }
            link.transport.close()
        });
        if let Err(err) = closed {
            log::warn!("{}: close failed: {err}", P::NAME);
        }

        self.set_state(ConnectionState::NotConnected);
        self.bank.lock().reset();
        self.info.lock().take();
        self.address.lock().take();
        events.push(SessionEvent::Disconnected);
        Ok(())
    }
}

/// Push pending configuration, then exchange outputs for inputs.
///
/// Works on a snapshot so setters never wait for the wire. Returns the
/// indices of inputs whose value changed.
fn exchange_cycle<P: Protocol>(
    link: &mut Link<P>,
    bank: &Mutex<RegisterBank>,
) -> Result<Vec<usize>> {
    let (snapshot, config_changed) = {
        let mut bank = bank.lock();
        let changed = bank.take_config_changed();
        (bank.clone(), changed)
    };

    let (protocol, io) = link.split();
    if config_changed {
        if let Err(err) = protocol.update_config(io, &snapshot) {
            bank.lock().mark_config_changed();
            return Err(err);
        }
    }
    let inputs = protocol.exchange(io, &snapshot)?;
    Ok(bank.lock().apply_inputs(&inputs))
}
