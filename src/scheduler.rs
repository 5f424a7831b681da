// Copyright 2023 - 2025 The faultline authors

//! The parallel pipeline: one producer thread queues mutants, N workers
//! test them, the main thread drains per-worker result channels.
//!
//! Queues are bounded so a fast producer cannot outrun slow workers. The
//! producer finishes with a single end sentinel; a worker that receives it
//! re-queues it for the next worker before exiting, fanning the shutdown
//! out. A worker retires itself after [CYCLE_PROCESS_AFTER] mutants and
//! the drain spawns a replacement into the same slot, which bounds memory
//! growth in long runs. Results carry no ordering guarantee; the cache is
//! the ground truth, and only the drain thread touches it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, trace, warn};

use crate::apply::cleanup_backups;
use crate::cache::Cache;
use crate::interrupt::check_interrupted;
use crate::mutant::{Mutant, MutantId};
use crate::process::ProcessSpawner;
use crate::progress::Progress;
use crate::tester::{MutantJob, MutantStatus, RunConfig, Tester};
use crate::Result;

/// Workers retire after this many mutants and are respawned.
pub const CYCLE_PROCESS_AFTER: usize = 100;

/// Capacity of the work queue and of each result channel.
const QUEUE_BOUND: usize = 100;

/// How long an idle worker waits before rechecking the interrupt flag.
const WORKER_POLL: Duration = Duration::from_millis(500);

/// How long an idle drain pass sleeps.
const DRAIN_POLL: Duration = Duration::from_millis(20);

enum WorkItem {
    Mutant(Box<MutantJob>),
    End,
}

enum WorkerMessage {
    Status {
        filename: String,
        id: MutantId,
        status: MutantStatus,
    },
    /// A line of test output to echo.
    Output(String),
    /// The worker retired after a full cycle; spawn a replacement.
    Cycle,
    End,
}

struct WorkerSlot {
    handle: JoinHandle<()>,
    result_rx: Receiver<WorkerMessage>,
    result_tx: Sender<WorkerMessage>,
    done: bool,
}

/// Run all queued mutants through the worker pool.
///
/// Statuses already cached (under the current tests hash) are registered
/// with [Progress] directly and never queued. Everything else is tested,
/// written back to the cache, and counted. Backups are removed for every
/// file that had mutants enqueued, even when the run fails.
pub fn run_mutation_tests<S: ProcessSpawner + 'static>(
    config: &RunConfig,
    progress: &mut Progress,
    mutations_by_file: &[(String, Vec<Mutant>)],
    cache: &mut Cache,
    spawner: Arc<S>,
) -> Result<()> {
    // Cached statuses are looked up in one batch per file; workers never
    // touch the cache.
    let mut to_queue: Vec<(MutantStatus, Mutant)> = Vec::new();
    for (filename, mutants) in mutations_by_file {
        let cached: HashMap<MutantId, MutantStatus> =
            cache.statuses_for_file(filename, &config.tests_hash);
        for mutant in mutants {
            let status = cached
                .get(&mutant.id)
                .copied()
                .unwrap_or(MutantStatus::Untested);
            if status != MutantStatus::Untested && config.total != 1 {
                trace!(name = mutant.name(), %status, "cached");
                progress.register(status);
            } else {
                to_queue.push((status, mutant.clone()));
            }
        }
    }

    let (work_tx, work_rx) = bounded::<WorkItem>(QUEUE_BOUND);
    let test_lock = Arc::new(Mutex::new(()));
    let producer = spawn_producer(work_tx.clone(), config.clone(), to_queue);

    let mut slots: Vec<WorkerSlot> = (0..config.options.test_processes)
        .map(|n| {
            let (result_tx, result_rx) = bounded::<WorkerMessage>(QUEUE_BOUND);
            let handle = spawn_worker(
                n,
                work_rx.clone(),
                work_tx.clone(),
                result_tx.clone(),
                Arc::clone(&test_lock),
                Arc::clone(&spawner),
            );
            WorkerSlot {
                handle,
                result_rx,
                result_tx,
                done: false,
            }
        })
        .collect();
    // The drain keeps work handles only for respawning cycled workers.
    let drain_result = drain_results(
        &mut slots,
        progress,
        cache,
        config,
        &work_rx,
        &work_tx,
        &test_lock,
        &spawner,
    );
    drop(work_tx);
    drop(work_rx);

    // On the error path workers may be blocked sending results; dropping
    // the receivers unblocks them so the joins below cannot hang.
    for slot in &mut slots {
        drop(std::mem::replace(&mut slot.result_rx, crossbeam_channel::never()));
    }
    for slot in slots {
        if slot.handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
    if producer.join().is_err() {
        error!("producer thread panicked");
    }

    if !config.options.backup {
        cleanup_backups(
            mutations_by_file
                .iter()
                .filter_map(|(_, mutants)| mutants.first())
                .map(|m| &m.source_file.path),
        );
    }

    drain_result
}

/// Queue every untested mutant, then the end sentinel. The sentinel is
/// sent even when the producer stops early.
fn spawn_producer(
    work_tx: Sender<WorkItem>,
    config: RunConfig,
    to_queue: Vec<(MutantStatus, Mutant)>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("queue_mutants".to_owned())
        .spawn(move || {
            for (cached_status, mutant) in to_queue {
                if check_interrupted().is_err() {
                    debug!("producer interrupted");
                    break;
                }
                let job = MutantJob {
                    mutant,
                    cached_status,
                    config: config.clone(),
                };
                if work_tx.send(WorkItem::Mutant(Box::new(job))).is_err() {
                    debug!("work queue closed before producer finished");
                    return;
                }
            }
            let _ = work_tx.send(WorkItem::End);
        })
        .expect("spawn producer thread")
}

fn spawn_worker<S: ProcessSpawner + 'static>(
    n: usize,
    work_rx: Receiver<WorkItem>,
    work_tx: Sender<WorkItem>,
    result_tx: Sender<WorkerMessage>,
    test_lock: Arc<Mutex<()>>,
    spawner: Arc<S>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("check_mutants-{n}"))
        .spawn(move || {
            worker_loop(&work_rx, &work_tx, &result_tx, &test_lock, spawner.as_ref());
        })
        .expect("spawn worker thread")
}

fn worker_loop<S: ProcessSpawner + ?Sized>(
    work_rx: &Receiver<WorkItem>,
    work_tx: &Sender<WorkItem>,
    result_tx: &Sender<WorkerMessage>,
    test_lock: &Mutex<()>,
    spawner: &S,
) {
    let tester = Tester::new(spawner);
    let mut count = 0;
    loop {
        if check_interrupted().is_err() {
            break;
        }
        let mut job = match work_rx.recv_timeout(WORKER_POLL) {
            Ok(WorkItem::Mutant(job)) => job,
            Ok(WorkItem::End) => {
                // Pass the sentinel on so the other workers stop too.
                let _ = work_tx.send(WorkItem::End);
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let mut callback = |line: &str| {
            let _ = result_tx.send(WorkerMessage::Output(line.to_owned()));
        };
        let status = match tester.run_mutation(&mut job, test_lock, &mut callback) {
            Ok(status) => status,
            Err(err) => {
                if check_interrupted().is_err() {
                    break;
                }
                // Worker-local trouble must not poison the run; the mutant
                // is reported as skipped and the run continues.
                warn!(?err, mutant = job.mutant.name(), "mutant run failed");
                MutantStatus::Skipped
            }
        };
        let sent = result_tx.send(WorkerMessage::Status {
            filename: job.mutant.source_file.path_slashes(),
            id: job.mutant.id.clone(),
            status,
        });
        if sent.is_err() {
            break;
        }
        count += 1;
        if count == CYCLE_PROCESS_AFTER {
            debug!("worker cycling after {CYCLE_PROCESS_AFTER} mutants");
            let _ = result_tx.send(WorkerMessage::Cycle);
            return;
        }
    }
    let _ = result_tx.send(WorkerMessage::End);
}

#[allow(clippy::too_many_arguments)]
fn drain_results<S: ProcessSpawner + 'static>(
    slots: &mut [WorkerSlot],
    progress: &mut Progress,
    cache: &mut Cache,
    config: &RunConfig,
    work_rx: &Receiver<WorkItem>,
    work_tx: &Sender<WorkItem>,
    test_lock: &Arc<Mutex<()>>,
    spawner: &Arc<S>,
) -> Result<()> {
    let mut next_n = slots.len();
    while slots.iter().any(|slot| !slot.done) {
        check_interrupted()?;
        let mut got_any = false;
        for i in 0..slots.len() {
            if slots[i].done {
                continue;
            }
            match slots[i].result_rx.try_recv() {
                Ok(WorkerMessage::Status {
                    filename,
                    id,
                    status,
                }) => {
                    got_any = true;
                    progress.register(status);
                    cache.set_status(&filename, &id, status, &config.tests_hash)?;
                }
                Ok(WorkerMessage::Output(line)) => {
                    got_any = true;
                    if !config.options.swallow_output {
                        println!("{line}");
                    } else {
                        progress.print();
                    }
                }
                Ok(WorkerMessage::Cycle) => {
                    got_any = true;
                    let replacement = spawn_worker(
                        next_n,
                        work_rx.clone(),
                        work_tx.clone(),
                        slots[i].result_tx.clone(),
                        Arc::clone(test_lock),
                        Arc::clone(spawner),
                    );
                    next_n += 1;
                    let retired = std::mem::replace(&mut slots[i].handle, replacement);
                    if retired.join().is_err() {
                        error!("cycled worker panicked");
                    }
                }
                Ok(WorkerMessage::End) => {
                    got_any = true;
                    slots[i].done = true;
                }
                Err(crossbeam_channel::TryRecvError::Empty) => (),
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    slots[i].done = true;
                }
            }
        }
        if !got_any {
            thread::sleep(DRAIN_POLL);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use camino::Utf8Path;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::options::Options;
    use crate::process::ExitKind;
    use crate::source::SourceFile;
    use crate::visit::walk_file;

    /// Counts concurrent materializations via the content of the file on
    /// disk; fails exit-code-style depending on the mutated content.
    struct CheckingSpawner {
        dir: camino::Utf8PathBuf,
        max_seen_mutated: AtomicUsize,
        runs: AtomicUsize,
    }

    impl ProcessSpawner for CheckingSpawner {
        fn run(
            &self,
            _command: &str,
            _timeout: Option<Duration>,
            _callback: &mut dyn FnMut(&str),
        ) -> Result<ExitKind> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            // Count how many source files currently differ from their
            // backups; the test lock must keep this at one.
            let mut mutated = 0;
            for entry in fs::read_dir(self.dir.as_std_path()).unwrap() {
                let path = entry.unwrap().path();
                if path.extension().is_some_and(|e| e == "rs") {
                    let bak = path.with_extension("rs.bak");
                    if bak.is_file()
                        && fs::read_to_string(&path).unwrap()
                            != fs::read_to_string(&bak).unwrap()
                    {
                        mutated += 1;
                    }
                }
            }
            self.max_seen_mutated.fetch_max(mutated, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            Ok(ExitKind::Exited(1))
        }
    }

    fn discover(dir: &Utf8Path, names: &[&str]) -> Vec<(String, Vec<Mutant>)> {
        let options = Options::for_tests();
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                fs::write(
                    &path,
                    "fn calc(a: u32, b: u32) -> u32 {\n    a + b * 2\n}\n",
                )
                .unwrap();
                let source_file = SourceFile::load(&path).unwrap();
                let mutants = walk_file(&source_file, &options, None).unwrap();
                assert!(!mutants.is_empty());
                (source_file.path_slashes(), mutants)
            })
            .collect()
    }

    #[test]
    fn pipeline_tests_everything_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mutations_by_file = discover(dir, &["a.rs", "b.rs", "c.rs"]);
        let total: usize = mutations_by_file.iter().map(|(_, m)| m.len()).sum();

        let mut cache = Cache::open(dir).unwrap();
        for (_, mutants) in &mutations_by_file {
            cache.register_mutants(mutants).unwrap();
        }
        let mut config = RunConfig::new(Options::for_tests(), 0.1, "hash".to_owned());
        config.total = total;
        let mut progress = Progress::new(total, true, true);
        let spawner = Arc::new(CheckingSpawner {
            dir: dir.to_owned(),
            max_seen_mutated: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
        });

        run_mutation_tests(
            &config,
            &mut progress,
            &mutations_by_file,
            &mut cache,
            Arc::clone(&spawner),
        )
        .unwrap();

        assert_eq!(progress.registered, total);
        assert_eq!(progress.killed, total);
        assert_eq!(spawner.runs.load(Ordering::SeqCst), total);
        // only one mutant was ever on disk at a time
        assert_eq!(spawner.max_seen_mutated.load(Ordering::SeqCst), 1);
        // sources restored, backups removed
        for (_, mutants) in &mutations_by_file {
            let path = &mutants[0].source_file.path;
            assert_eq!(
                fs::read_to_string(path).unwrap(),
                "fn calc(a: u32, b: u32) -> u32 {\n    a + b * 2\n}\n"
            );
            assert!(!crate::apply::backup_path(path).is_file());
        }
        // and the cache knows every outcome
        for (filename, mutants) in &mutations_by_file {
            let statuses = cache.statuses_for_file(filename, "hash");
            for mutant in mutants {
                assert_eq!(statuses[&mutant.id], MutantStatus::Killed);
            }
        }
    }

    #[test]
    fn cached_statuses_are_not_retested() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mutations_by_file = discover(dir, &["a.rs"]);
        let total: usize = mutations_by_file.iter().map(|(_, m)| m.len()).sum();

        let mut cache = Cache::open(dir).unwrap();
        for (filename, mutants) in &mutations_by_file {
            cache.register_mutants(mutants).unwrap();
            for mutant in mutants {
                cache
                    .set_status(filename, &mutant.id, MutantStatus::Survived, "hash")
                    .unwrap();
            }
        }
        let mut config = RunConfig::new(Options::for_tests(), 0.1, "hash".to_owned());
        config.total = total;
        let mut progress = Progress::new(total, true, true);
        let spawner = Arc::new(CheckingSpawner {
            dir: dir.to_owned(),
            max_seen_mutated: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
        });

        run_mutation_tests(
            &config,
            &mut progress,
            &mutations_by_file,
            &mut cache,
            Arc::clone(&spawner),
        )
        .unwrap();

        assert_eq!(spawner.runs.load(Ordering::SeqCst), 0);
        assert_eq!(progress.registered, total);
        assert_eq!(progress.survived, total);
    }
}
