//! Shutdown signalling.
//!
//! The event loop runs on one thread and may be parked in a blocking
//! `accept` or in the acknowledgment read of a synchronous handshake. A
//! [`ShutdownHandle`] lets any other thread (the signal path in `main`) ask
//! it to stop: it raises a flag the loop checks every pass, shuts down the
//! connection of an in-flight handshake, then connects to the socket once so
//! a parked `accept` returns.

use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Cloneable request-to-stop for a running [`Server`](super::Server).
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    in_flight: Arc<Mutex<Option<UnixStream>>>,
    socket_path: PathBuf,
}

impl ShutdownHandle {
    pub(crate) fn new(socket_path: PathBuf) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(Mutex::new(None)),
            socket_path,
        }
    }

    /// Ask the server to stop. Idempotent.
    pub fn trigger(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = self.slot().take() {
            interrupt(&stream);
        }
        // The wake-up connection is dropped at once; the loop sees the flag
        // right after accepting it.
        if let Err(e) = UnixStream::connect(&self.socket_path) {
            debug!(error = %e, "Shutdown wake-up connect failed");
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Make `stream` interruptible by [`trigger`](Self::trigger) until the
    /// returned guard is dropped. If shutdown was already requested the
    /// stream is interrupted at once.
    pub(crate) fn guard_handshake(&self, stream: &UnixStream) -> io::Result<HandshakeGuard<'_>> {
        let clone = stream.try_clone()?;
        let mut slot = self.slot();
        if self.is_requested() {
            interrupt(&clone);
        } else {
            *slot = Some(clone);
        }
        Ok(HandshakeGuard { handle: self })
    }

    fn slot(&self) -> MutexGuard<'_, Option<UnixStream>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight handshake registration on drop.
#[derive(Debug)]
pub(crate) struct HandshakeGuard<'a> {
    handle: &'a ShutdownHandle,
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        self.handle.slot().take();
    }
}

fn interrupt(stream: &UnixStream) {
    match stream.shutdown(Shutdown::Both) {
        Ok(()) => debug!("In-flight handshake interrupted for shutdown"),
        Err(e) => debug!(error = %e, "Failed to interrupt in-flight handshake"),
    }
}
