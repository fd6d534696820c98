//! TXT camera stream.
//!
//! Runs on its own socket next to the main session. The receive loop lives on
//! a dedicated network queue, frame delivery on a separate processing queue,
//! so a slow listener never stalls the socket and the socket never stalls the
//! session's exchange loop.
//!
//! At most one frame is in processing at a time. A frame arriving while the
//! previous one is still with the listeners is dropped (but acknowledged) and
//! its buffer goes straight back to the pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use super::codec::{CAMERA_ACK_MAGIC, FRAME_HEADER_LEN, FrameHeader};
use crate::config::CameraConfig;
use crate::error::Result;
use crate::events::{CameraEvent, CameraFrame, EventHub, ListenerId};
use crate::queue::TaskQueue;
use crate::transport::{Interrupter, Transport};

/// Start/stop commands sent over the controller's main connection.
pub trait CameraControl: Send + Sync {
    fn start_camera(&self, config: &CameraConfig) -> Result<()>;

    fn stop_camera(&self) -> Result<()>;
}

/// Reusable frame buffers.
#[derive(Debug)]
pub struct FramePool {
    idle: Vec<Vec<u8>>,
    capacity: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Buffer of exactly `len` bytes, recycled when one is idle.
    pub fn acquire(&mut self, len: usize) -> Vec<u8> {
        let mut buf = self.idle.pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    pub fn release(&mut self, buf: Vec<u8>) {
        if self.idle.len() < self.capacity {
            self.idle.push(buf);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }
}

pub struct CameraStream {
    network: TaskQueue,
    shared: Arc<Shared>,
}

struct Shared {
    control: Arc<dyn CameraControl>,
    transport: Mutex<Box<dyn Transport>>,
    address: String,
    config: CameraConfig,
    /// StartCamera sent and StopCamera not yet sent
    active: AtomicBool,
    stopped: AtomicBool,
    interrupter: Mutex<Option<Interrupter>>,
    events: Arc<EventHub<CameraEvent>>,
    pool: Arc<Mutex<FramePool>>,
    in_flight: Arc<AtomicBool>,
    first_frame: AtomicBool,
    processing: TaskQueue,
}

impl CameraStream {
    pub fn new(
        control: Arc<dyn CameraControl>,
        transport: Box<dyn Transport>,
        address: String,
        config: CameraConfig,
    ) -> Result<Self> {
        let pool = FramePool::new(config.frame_pool_size);
        Ok(Self {
            network: TaskQueue::new("camera-net")?,
            shared: Arc::new(Shared {
                control,
                transport: Mutex::new(transport),
                address,
                config,
                active: AtomicBool::new(false),
                stopped: AtomicBool::new(true),
                interrupter: Mutex::new(None),
                events: Arc::new(EventHub::new()),
                pool: Arc::new(Mutex::new(pool)),
                in_flight: Arc::new(AtomicBool::new(false)),
                first_frame: AtomicBool::new(true),
                processing: TaskQueue::new("camera-frames")?,
            }),
        })
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CameraEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(listener)
    }

    pub fn subscribe_channel(&self) -> (ListenerId, Receiver<CameraEvent>) {
        self.shared.events.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// True between `start` and the stream ending (by `stop` or by failure).
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Send StartCamera, then connect and receive in the background.
    ///
    /// Calling `start` on a running stream does nothing.
    pub fn start(&self) -> Result<()> {
        if self.shared.active.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.stopped.store(false, Ordering::Release);
        self.shared.first_frame.store(true, Ordering::Release);

        if let Err(err) = self.shared.control.start_camera(&self.shared.config) {
            self.shared.active.store(false, Ordering::Release);
            self.shared.stopped.store(true, Ordering::Release);
            return Err(err);
        }
        log::info!(
            "Camera: started {}x{} @ {} fps",
            self.shared.config.width,
            self.shared.config.height,
            self.shared.config.framerate
        );

        let shared = Arc::clone(&self.shared);
        self.network.submit(move || shared.run())
    }

    /// Send StopCamera, end the receive loop and wait for it to exit.
    pub fn stop(&self) -> Result<()> {
        self.shared.stopped.store(true, Ordering::Release);
        let result = self.shared.request_stop();
        if let Some(interrupter) = self.shared.interrupter.lock().take() {
            interrupter.interrupt();
        }
        self.network.submit_blocking(|| ())?;
        result
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::debug!("Camera: stop on drop failed: {err}");
        }
    }
}

impl Shared {
    /// Send StopCamera unless it already went out for this run.
    fn request_stop(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        log::info!("Camera: stopping");
        self.control.stop_camera()
    }

    fn run(&self) {
        if !self.connect() {
            if let Err(err) = self.request_stop() {
                log::warn!("Camera: StopCamera failed: {err}");
            }
            return;
        }

        *self.interrupter.lock() = self.transport.lock().interrupter();
        if !self.stopped.load(Ordering::Acquire) {
            if let Err(err) = self.receive() {
                if self.stopped.load(Ordering::Acquire) {
                    log::debug!("Camera: receive loop ended: {err}");
                } else {
                    log::error!("Camera: stream failed: {err}");
                    if let Err(err) = self.request_stop() {
                        log::warn!("Camera: StopCamera failed: {err}");
                    }
                }
            }
        }

        self.interrupter.lock().take();
        if let Err(err) = self.transport.lock().close() {
            log::debug!("Camera: close failed: {err}");
        }
    }

    fn connect(&self) -> bool {
        let attempts = self.config.connect_attempts.max(1);
        for attempt in 1..=attempts {
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            match self.transport.lock().open(&self.address) {
                Ok(()) => return true,
                Err(err) => {
                    log::warn!("Camera: connect attempt {attempt}/{attempts} failed: {err}");
                    if attempt < attempts {
                        thread::sleep(self.config.retry_delay);
                    }
                }
            }
        }
        log::error!("Camera: could not connect to {}", self.address);
        false
    }

    fn receive(&self) -> Result<()> {
        let mut transport = self.transport.lock();
        while !self.stopped.load(Ordering::Acquire) {
            let header = FrameHeader::decode(&transport.read(FRAME_HEADER_LEN)?)?;
            let mut data = self.pool.lock().acquire(header.payload_len());
            transport.read_exact(&mut data)?;
            log::trace!(
                "Camera: frame {}x{}, {} bytes, {} ready",
                header.width,
                header.height,
                data.len(),
                header.frames_ready
            );
            self.dispatch(CameraFrame {
                width: header.width as u16,
                height: header.height as u16,
                data,
            });
            transport.write(&CAMERA_ACK_MAGIC.to_le_bytes())?;
        }
        Ok(())
    }

    fn dispatch(&self, frame: CameraFrame) {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            log::warn!("Camera: dropping frame, previous one still processing");
            self.pool.lock().release(frame.data);
            return;
        }
        let first = self.first_frame.swap(false, Ordering::AcqRel);

        let events = Arc::clone(&self.events);
        let pool = Arc::clone(&self.pool);
        let in_flight = Arc::clone(&self.in_flight);
        let submitted = self.processing.submit(move || {
            let event = CameraEvent::FrameReceived { frame, first };
            events.emit(&event);
            let CameraEvent::FrameReceived { frame, .. } = event;
            pool.lock().release(frame.data);
            in_flight.store(false, Ordering::Release);
        });
        if let Err(err) = submitted {
            self.in_flight.store(false, Ordering::Release);
            log::error!("Camera: frame processing unavailable: {err}");
        }
    }
}
