//! Execution context on which replies reach observers and dispatchers

use std::io;
use std::thread;

use crossbeam_channel::{Sender, unbounded};
use tracing::{debug, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where completions are marshaled before touching embedder code
pub trait MainContext: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// Runs jobs immediately on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineContext;

impl MainContext for InlineContext {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Runs jobs in FIFO order on one dedicated thread.
///
/// The thread stops once every handle is dropped.
#[derive(Clone)]
pub struct DeliveryThread {
    sender: Sender<Job>,
}

impl DeliveryThread {
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let thread_name = name.to_string();

        thread::Builder::new().name(name.into()).spawn(move || {
            for job in receiver {
                job();
            }
            debug!(thread = %thread_name, "Delivery thread stopped");
        })?;

        Ok(Self { sender })
    }
}

impl MainContext for DeliveryThread {
    fn dispatch(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!("Delivery thread is gone, dropping job");
        }
    }
}
