//! Context-affine GPU executor.
//!
//! A single worker thread owns the [`RenderBackend`]; every GPU-touching
//! operation is shipped to it as a job. Jobs run in submission order, which
//! is what makes [`GpuExecutor::drain`] a full barrier: a marker job observed
//! complete implies everything submitted before it has completed.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::backend::RenderBackend;
use crate::software::{SoftwareBackend, SoftwareBackendControls};

type Job = Box<dyn FnOnce(&mut dyn RenderBackend) + Send>;

#[derive(Debug)]
pub struct GpuExecutor {
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl GpuExecutor {
    /// Spawn the worker thread and hand it ownership of `backend`.
    pub fn new(backend: Box<dyn RenderBackend>) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("prism-gpu".into())
            .spawn(move || {
                let mut backend = backend;
                while let Ok(job) = receiver.recv() {
                    job(backend.as_mut());
                }
                debug!("gpu executor worker exiting");
            })
            .expect("failed to spawn gpu executor thread");
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Convenience constructor used by tests and the headless path.
    pub fn with_software_backend() -> (Self, SoftwareBackendControls) {
        let backend = SoftwareBackend::new();
        let controls = backend.controls();
        (Self::new(Box::new(backend)), controls)
    }

    /// Enqueue a job. Jobs run on the worker in FIFO order.
    pub fn submit(&self, job: impl FnOnce(&mut dyn RenderBackend) + Send + 'static) {
        if let Some(sender) = &self.sender {
            // A send error means the worker is gone; the job is dropped, which
            // only happens during teardown.
            let _ = sender.send(Box::new(job));
        }
    }

    /// Submit a job and block until it has run, returning its result.
    pub fn call<R, F>(&self, f: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn RenderBackend) -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.submit(move |backend| {
            let _ = tx.send(f(backend));
        });
        rx.recv().expect("gpu executor worker terminated")
    }

    /// Block until every previously submitted job has completed.
    pub fn drain(&self) {
        self.call(|_backend| ());
    }
}

impl Drop for GpuExecutor {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish the queue and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BufferStorageDesc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn jobs_run_in_submission_order() {
        let (executor, _controls) = GpuExecutor::with_software_backend();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..32 {
            let order = Arc::clone(&order);
            executor.submit(move |_backend| order.lock().unwrap().push(i));
        }
        executor.drain();
        assert_eq!(*order.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn drain_waits_for_submitted_work() {
        let (executor, _controls) = GpuExecutor::with_software_backend();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            executor.submit(move |_backend| {
                std::thread::sleep(std::time::Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        executor.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn call_returns_backend_results() {
        let (executor, controls) = GpuExecutor::with_software_backend();
        let handle = executor
            .call(|backend| backend.create_buffer(&BufferStorageDesc { size: 4 }))
            .unwrap();
        executor
            .call(move |backend| backend.upload_buffer(handle, 0, &[7, 7, 7, 7]))
            .unwrap();
        let bytes = executor
            .call(move |backend| backend.read_buffer(handle, 0, 4))
            .unwrap();
        assert_eq!(bytes, vec![7, 7, 7, 7]);
        assert_eq!(controls.live_allocations(), 1);
    }

    #[test]
    fn drop_joins_after_finishing_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let (executor, _controls) = GpuExecutor::with_software_backend();
            for _ in 0..8 {
                let counter = Arc::clone(&counter);
                executor.submit(move |_backend| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
