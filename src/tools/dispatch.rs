//! Runs jobs under a fixed concurrency budget and folds their failures into the
//! run context.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, trace};

use super::cli::BzOpts;
use super::naming::Source;
use super::report::RunContext;
use super::walker::{WalkError, Walker};
use crate::compression::job::{self, run_job, JobSpec, JobState};

struct GateState {
    held: usize,
    peak: usize,
}

/// Counting admission gate.
pub struct Gate {
    capacity: usize,
    state: Mutex<GateState>,
    freed: Condvar,
}

/// A held slot. Dropping it, including during a panic, frees the slot.
pub struct Permit<'a> {
    gate: &'a Gate,
}

impl Gate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(GateState { held: 0, peak: 0 }),
            freed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> Permit<'_> {
        let mut state = self.lock();
        while state.held >= self.capacity {
            state = self
                .freed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.held += 1;
        state.peak = state.peak.max(state.held);
        Permit { gate: self }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots held right now.
    pub fn in_flight(&self) -> usize {
        self.lock().held
    }

    /// Most slots ever held at once.
    pub fn peak(&self) -> usize {
        self.lock().peak
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.held -= 1;
        drop(state);
        self.gate.freed.notify_one();
    }
}

pub struct Dispatcher<'a> {
    opts: &'a BzOpts,
    ctx: &'a RunContext,
    gate: Gate,
}

impl<'a> Dispatcher<'a> {
    pub fn new(opts: &'a BzOpts, ctx: &'a RunContext) -> Self {
        Self {
            opts,
            ctx,
            gate: Gate::new(opts.cores),
        }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Walk the inputs named in the options and process them all.
    /// Returns the exit code once every job has finished.
    pub fn run_all(&self) -> i32 {
        self.run(Walker::new(self.opts.files.clone(), self.opts.recursive));
        self.ctx.exit_code()
    }

    /// Run a job for every input. Each job holds a gate slot from before its
    /// thread starts until it ends. Returns only after all jobs have finished.
    pub fn run<I>(&self, inputs: I)
    where
        I: IntoIterator<Item = Result<Source, WalkError>>,
    {
        debug!("running up to {} jobs at once", self.gate.capacity());
        thread::scope(|scope| {
            let mut handles = Vec::new();
            for (index, item) in inputs.into_iter().enumerate() {
                let spec = match item {
                    Ok(input) => JobSpec::new(input, self.opts.op_mode),
                    Err(WalkError { path, error }) => {
                        self.ctx.fail(&path.display().to_string(), &error);
                        continue;
                    }
                };
                let name = spec.name();
                let permit = self.gate.acquire();
                trace!("admitted {} ({} running)", name, self.gate.in_flight());
                let spawned = thread::Builder::new()
                    .name(format!("job-{}", index))
                    .spawn_scoped(scope, move || {
                        let _permit = permit;
                        self.run_one(&spec);
                    });
                match spawned {
                    Ok(handle) => handles.push((name, handle)),
                    Err(e) => self.ctx.fail(&name, &e),
                }
            }
            for (name, handle) in handles {
                if handle.join().is_err() {
                    self.ctx.fail(&name, "job panicked");
                }
            }
        });
        debug!("all jobs finished, peak concurrency {}", self.gate.peak());
    }

    fn run_one(&self, spec: &JobSpec) {
        if let Err(e) = run_job(spec, self.opts, self.ctx) {
            let name = spec.name();
            job::enter(&name, JobState::Failed);
            self.ctx.fail(&name, &e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tools::report::SharedBuffer;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn gate_never_exceeds_capacity() {
        for capacity in [1, 3, 8] {
            let gate = Gate::new(capacity);
            assert_eq!(gate.capacity(), capacity);
            let live = AtomicUsize::new(0);
            let worst = AtomicUsize::new(0);
            thread::scope(|s| {
                for _ in 0..24 {
                    s.spawn(|| {
                        let _p = gate.acquire();
                        let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                        worst.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        live.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            });
            assert!(worst.load(Ordering::SeqCst) <= capacity);
            assert!(gate.peak() <= capacity);
            assert_eq!(gate.in_flight(), 0);
        }
    }

    #[test]
    fn panicking_holder_releases_its_slot() {
        let gate = Arc::new(Gate::new(1));
        let g = Arc::clone(&gate);
        let result = thread::spawn(move || {
            let _p = g.acquire();
            panic!("job blew up");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(gate.in_flight(), 0);
        drop(gate.acquire());
    }

    #[test]
    fn one_bad_input_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut files: Vec<PathBuf> = (0..6)
            .map(|i| {
                let p = dir.path().join(format!("f{}.txt", i));
                fs::write(&p, format!("file number {}", i).repeat(100)).unwrap();
                p
            })
            .collect();
        files.insert(2, dir.path().join("missing.txt"));

        let mut opts = BzOpts::new(files);
        opts.cores = 2;
        let buf = SharedBuffer::new();
        let ctx = RunContext::new(Box::new(buf.clone()));
        let dispatcher = Dispatcher::new(&opts, &ctx);

        assert_eq!(dispatcher.run_all(), 1);
        assert!(dispatcher.gate().peak() <= 2);
        assert!(buf.contents().contains("missing.txt"));
        for i in 0..6 {
            assert!(!dir.path().join(format!("f{}.txt", i)).exists());
            assert!(dir.path().join(format!("f{}.txt.bz2", i)).exists());
        }
    }

    #[test]
    fn clean_run_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a"), b"aaaa").unwrap();
        fs::write(dir.path().join("b"), b"bbbb").unwrap();

        let mut opts = BzOpts::new(vec![dir.path().to_path_buf()]);
        opts.recursive = true;
        opts.keep_input_files = true;
        let ctx = RunContext::new(Box::new(std::io::sink()));
        assert_eq!(Dispatcher::new(&opts, &ctx).run_all(), 0);
        assert!(dir.path().join("sub/a.bz2").exists());
        assert!(dir.path().join("b.bz2").exists());
        assert!(dir.path().join("b").exists());
    }
}
