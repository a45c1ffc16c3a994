//! Background plate reads.
//!
//! A fixed set of worker threads pulls read jobs from a bounded channel. The
//! main loop dispatches every read for a frame first and then waits on each
//! reply with a deadline, so one slow read never stalls the others.
//!
//! Closing the pool discards queued jobs. Workers still inside a read are
//! given until a deadline to finish and are detached after it.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::detect::{AdapterGuard, PlateRead, PlateReader, PlateRequest};
use crate::pipeline::tracker::TrackId;

/// Upper bound on how long a wait goes without looking at the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(20);
const JOIN_POLL: Duration = Duration::from_millis(5);

struct OcrJob {
    request: PlateRequest,
    reply: Sender<PlateRead>,
}

/// Reply handle for one dispatched read.
pub struct PendingRead {
    pub track_id: TrackId,
    reply: Option<Receiver<PlateRead>>,
}

impl PendingRead {
    fn abandoned(track_id: TrackId) -> Self {
        Self {
            track_id,
            reply: None,
        }
    }
}

pub struct OcrPool {
    jobs: Option<Sender<OcrJob>>,
    workers: Vec<JoinHandle<()>>,
    closed: Arc<AtomicBool>,
    timeout: Duration,
    guard: Arc<AdapterGuard>,
}

impl OcrPool {
    pub fn new(reader: Arc<dyn PlateReader>, workers: usize, timeout: Duration) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = crossbeam_channel::bounded::<OcrJob>(workers * 4);
        let guard = Arc::new(AdapterGuard::new(format!("plate:{}", reader.name())));
        let closed = Arc::new(AtomicBool::new(false));

        let handles = (0..workers)
            .filter_map(|i| {
                let job_rx = job_rx.clone();
                let reader = Arc::clone(&reader);
                let guard = Arc::clone(&guard);
                let closed = Arc::clone(&closed);
                thread::Builder::new()
                    .name(format!("ocr-{}", i))
                    .spawn(move || worker_loop(job_rx, reader, guard, closed))
                    .map_err(|e| log::error!("failed to spawn ocr worker {}: {}", i, e))
                    .ok()
            })
            .collect();

        Self {
            jobs: Some(job_tx),
            workers: handles,
            closed,
            timeout,
            guard,
        }
    }

    /// Queues one read. If the queue stays full for the read timeout the
    /// read is abandoned and will resolve to `unknown`.
    pub fn dispatch(&self, request: PlateRequest) -> PendingRead {
        let track_id = request.track_id;
        let Some(jobs) = self.jobs.as_ref().filter(|_| !self.workers.is_empty()) else {
            return PendingRead::abandoned(track_id);
        };
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let job = OcrJob {
            request,
            reply: reply_tx,
        };
        match jobs.send_timeout(job, self.timeout) {
            Ok(()) => PendingRead {
                track_id,
                reply: Some(reply_rx),
            },
            Err(_) => {
                log::debug!("ocr queue full; dropping read for track {}", track_id);
                PendingRead::abandoned(track_id)
            }
        }
    }

    /// Waits up to the read timeout for a reply; `unknown` on timeout or
    /// once `cancel` is set.
    pub fn wait(&self, pending: PendingRead, cancel: &CancelToken) -> PlateRead {
        let Some(reply) = pending.reply else {
            return PlateRead::unknown();
        };
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match reply.recv_timeout(remaining.min(CANCEL_POLL)) {
                Ok(read) => return read,
                Err(RecvTimeoutError::Disconnected) => return PlateRead::unknown(),
                Err(RecvTimeoutError::Timeout) => {}
            }
            if cancel.is_cancelled() {
                return PlateRead::unknown();
            }
            if Instant::now() >= deadline {
                log::debug!("plate read for track {} timed out", pending.track_id);
                return PlateRead::unknown();
            }
        }
    }

    /// Dispatches all requests, then collects every reply in order.
    pub fn read_all(
        &self,
        requests: Vec<PlateRequest>,
        cancel: &CancelToken,
    ) -> Vec<(TrackId, PlateRead)> {
        let pending: Vec<PendingRead> = requests
            .into_iter()
            .map(|r| {
                if cancel.is_cancelled() {
                    PendingRead::abandoned(r.track_id)
                } else {
                    self.dispatch(r)
                }
            })
            .collect();
        pending
            .into_iter()
            .map(|p| {
                let track_id = p.track_id;
                (track_id, self.wait(p, cancel))
            })
            .collect()
    }

    pub fn failures(&self) -> u64 {
        self.guard.failures()
    }

    /// Stops accepting jobs. Queued jobs are discarded unread.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.jobs.take();
    }

    /// Closes the pool and joins the workers that finish by `deadline`.
    /// Workers still inside a read are detached.
    pub fn join_until(&mut self, deadline: Instant) {
        self.close();
        for handle in self.workers.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL);
            }
            if !handle.is_finished() {
                log::warn!(
                    "{} still busy in a plate read; detaching",
                    handle.thread().name().unwrap_or("ocr worker")
                );
                continue;
            }
            if handle.join().is_err() {
                log::error!("ocr worker panicked outside the adapter guard");
            }
        }
    }
}

impl Drop for OcrPool {
    fn drop(&mut self) {
        self.join_until(Instant::now() + self.timeout);
    }
}

fn worker_loop(
    jobs: Receiver<OcrJob>,
    reader: Arc<dyn PlateReader>,
    guard: Arc<AdapterGuard>,
    closed: Arc<AtomicBool>,
) {
    while let Ok(job) = jobs.recv() {
        if closed.load(Ordering::SeqCst) {
            continue;
        }
        let read = guard.call(PlateRead::unknown, || reader.read(&job.request));
        // The main loop may have stopped waiting; a closed reply is fine.
        let _ = job.reply.send(read);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use image::RgbImage;
    use std::sync::atomic::AtomicUsize;

    struct SlowReader {
        delay: Duration,
    }

    impl PlateReader for SlowReader {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn read(&self, request: &PlateRequest) -> Result<PlateRead> {
            thread::sleep(self.delay);
            match request.track_id {
                1 => Ok(PlateRead::new("30A12345", 0.9)),
                2 => Err(anyhow!("no plate region")),
                _ => panic!("reader bug"),
            }
        }
    }

    fn request(track_id: TrackId) -> PlateRequest {
        PlateRequest {
            frame_index: 1,
            track_id,
            crop: RgbImage::new(8, 8),
        }
    }

    #[test]
    fn failures_and_panics_read_as_unknown() {
        let reader = Arc::new(SlowReader {
            delay: Duration::from_millis(1),
        });
        let pool = OcrPool::new(reader, 3, Duration::from_secs(2));
        let reads = pool.read_all(vec![request(1), request(2), request(3)], &CancelToken::new());

        assert_eq!(reads[0], (1, PlateRead::new("30A12345", 0.9)));
        assert_eq!(reads[1], (2, PlateRead::unknown()));
        assert_eq!(reads[2], (3, PlateRead::unknown()));
        assert_eq!(pool.failures(), 2);
    }

    #[test]
    fn slow_reads_time_out() {
        let reader = Arc::new(SlowReader {
            delay: Duration::from_millis(400),
        });
        let pool = OcrPool::new(reader, 1, Duration::from_millis(50));
        let reads = pool.read_all(vec![request(1)], &CancelToken::new());
        assert_eq!(reads[0].1, PlateRead::unknown());
    }

    #[test]
    fn reads_run_in_parallel() {
        let reader = Arc::new(SlowReader {
            delay: Duration::from_millis(150),
        });
        let pool = OcrPool::new(reader, 3, Duration::from_secs(2));
        let start = std::time::Instant::now();
        let reads = pool.read_all(
            vec![request(1), request(1), request(1)],
            &CancelToken::new(),
        );
        assert!(reads.iter().all(|(_, r)| r.text == "30A12345"));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    struct CountingReader {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl PlateReader for CountingReader {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn read(&self, _request: &PlateRequest) -> Result<PlateRead> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(PlateRead::new("30A12345", 0.9))
        }
    }

    #[test]
    fn cancel_cuts_waits_short() {
        let reader = Arc::new(SlowReader {
            delay: Duration::from_secs(2),
        });
        let pool = OcrPool::new(reader, 2, Duration::from_secs(5));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let start = Instant::now();
        let reads = pool.read_all(vec![request(1), request(1)], &cancel);
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(reads.iter().all(|(_, r)| r.is_unknown()));
        canceller.join().unwrap();
    }

    #[test]
    fn close_discards_backlog_and_detaches_busy_worker() {
        let reader = Arc::new(CountingReader {
            delay: Duration::from_millis(600),
            calls: AtomicUsize::new(0),
        });
        let mut pool = OcrPool::new(
            Arc::clone(&reader) as Arc<dyn PlateReader>,
            1,
            Duration::from_secs(5),
        );
        let pending: Vec<PendingRead> = (1..=5).map(|id| pool.dispatch(request(id))).collect();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);

        let start = Instant::now();
        pool.join_until(Instant::now() + Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(300));
        drop(pending);

        // The in-flight read completes; the four queued ones never start.
        thread::sleep(Duration::from_millis(900));
        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);
    }
}
