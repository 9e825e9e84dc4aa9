//! Stress scenarios. Each one drives a primitive from several threads and
//! checks an observable guarantee, returning counts and failures rather than
//! panicking.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use forge_threads::{
    AtomicCounter, ConditionVariable, MainThreadRegistry, Mutex, MutexKind, ThreadHandle,
    current_thread_id, destroy_thread, num_cpu_cores, sleep_ms, spawn,
};
use forge_threads_core::cond::{TimedWaitVerdict, classify_timed_wait};
use forge_threads_core::errno::{self, errno_name};
use forge_threads_core::mutex::{MutexOp, MutexState, mutex_fairness_note, mutex_transition};
use forge_threads_core::{ThreadError, TimedWaitMode, WaitStatus};

use crate::config::StressConfig;
use crate::error::HarnessError;
use crate::structured_log::PrimitiveKind;

/// How long a coordinator polls for workers to reach a rendezvous.
const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(10);
/// Rounds of park-then-broadcast in `condvar-broadcast`.
const BROADCAST_ROUNDS: u32 = 4;
/// Cap on signal ping-pong rounds; each round is two context switches.
const MAX_PINGPONG_ROUNDS: u32 = 2_000;
/// How long a contended `acquire` must stay parked to count as blocked.
const BLOCK_OBSERVATION_MS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    CounterFanout,
    MutexHandoff,
    MutexContract,
    CondvarSignal,
    CondvarBroadcast,
    TimedWaitJitter,
    JoinVisibility,
    MainThreadIdentity,
    CpuCores,
}

impl Scenario {
    pub const ALL: [Self; 9] = [
        Self::CounterFanout,
        Self::MutexHandoff,
        Self::MutexContract,
        Self::CondvarSignal,
        Self::CondvarBroadcast,
        Self::TimedWaitJitter,
        Self::JoinVisibility,
        Self::MainThreadIdentity,
        Self::CpuCores,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CounterFanout => "counter-fanout",
            Self::MutexHandoff => "mutex-handoff",
            Self::MutexContract => "mutex-contract",
            Self::CondvarSignal => "condvar-signal",
            Self::CondvarBroadcast => "condvar-broadcast",
            Self::TimedWaitJitter => "timed-wait-jitter",
            Self::JoinVisibility => "join-visibility",
            Self::MainThreadIdentity => "main-thread-identity",
            Self::CpuCores => "cpu-cores",
        }
    }

    pub fn parse(name: &str) -> Result<Self, HarnessError> {
        let wanted = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == wanted)
            .ok_or_else(|| HarnessError::UnknownScenario(name.to_string()))
    }

    #[must_use]
    pub const fn primitive(self) -> PrimitiveKind {
        match self {
            Self::CounterFanout => PrimitiveKind::AtomicCounter,
            Self::MutexHandoff | Self::MutexContract => PrimitiveKind::Mutex,
            Self::CondvarSignal | Self::CondvarBroadcast | Self::TimedWaitJitter => {
                PrimitiveKind::Condvar
            }
            Self::JoinVisibility | Self::MainThreadIdentity => PrimitiveKind::Thread,
            Self::CpuCores => PrimitiveKind::System,
        }
    }

    /// Run the scenario. `Err` means the run could not be carried out (for
    /// example a spawn failed); a guarantee that did not hold is a result
    /// with failures.
    ///
    /// If a spawn fails partway, the workers already started are released and
    /// joined before the spawn error is returned.
    pub fn run(self, cfg: &StressConfig) -> Result<ScenarioResult, HarnessError> {
        self.run_with(cfg, &mut Spawner::unlimited())
    }

    pub(crate) fn run_with(
        self,
        cfg: &StressConfig,
        spawner: &mut Spawner,
    ) -> Result<ScenarioResult, HarnessError> {
        let mut result = ScenarioResult::new(self, cfg.threads);
        let start = Instant::now();
        match self {
            Self::CounterFanout => counter_fanout(cfg, spawner, &mut result)?,
            Self::MutexHandoff => mutex_handoff(cfg, spawner, &mut result)?,
            Self::MutexContract => mutex_contract(spawner, &mut result)?,
            Self::CondvarSignal => condvar_signal(cfg, spawner, &mut result)?,
            Self::CondvarBroadcast => condvar_broadcast(cfg, spawner, &mut result)?,
            Self::TimedWaitJitter => timed_wait_jitter(cfg, &mut result)?,
            Self::JoinVisibility => join_visibility(cfg, spawner, &mut result)?,
            Self::MainThreadIdentity => main_thread_identity(cfg, spawner, &mut result)?,
            Self::CpuCores => cpu_cores(&mut result)?,
        }
        result.duration = start.elapsed();
        Ok(result)
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one scenario run observed.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub primitive: PrimitiveKind,
    pub thread_count: usize,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
    pub op_counts: BTreeMap<String, u64>,
    pub details: serde_json::Map<String, serde_json::Value>,
    pub failures: Vec<String>,
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl ScenarioResult {
    fn new(scenario: Scenario, thread_count: usize) -> Self {
        Self {
            scenario,
            primitive: scenario.primitive(),
            thread_count,
            duration: Duration::ZERO,
            op_counts: BTreeMap::new(),
            details: serde_json::Map::new(),
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    fn count(&mut self, op: &str, n: u64) {
        *self.op_counts.entry(op.to_string()).or_insert(0) += n;
    }

    fn detail(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.details.insert(key.to_string(), value.into());
    }

    fn check(&mut self, ok: bool, failure: impl FnOnce() -> String) {
        if !ok {
            self.failures.push(failure());
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Starts scenario workers. A budget makes every spawn past it fail with
/// `EAGAIN`, the way an exhausted process thread limit does.
#[derive(Debug, Default)]
pub(crate) struct Spawner {
    budget: Option<usize>,
}

impl Spawner {
    pub(crate) fn unlimited() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn failing_after(spawns: usize) -> Self {
        Self {
            budget: Some(spawns),
        }
    }

    fn spawn<F>(&mut self, f: F) -> Result<ThreadHandle, ThreadError>
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(budget) = self.budget.as_mut() {
            if *budget == 0 {
                return Err(ThreadError::Spawn {
                    errno: errno::EAGAIN,
                });
            }
            *budget -= 1;
        }
        spawn(f)
    }

    /// Spawn `count` workers built by `make`. On a spawn failure `release`
    /// runs so the workers already started can finish, they are joined, and
    /// the spawn error is returned.
    fn spawn_workers<W>(
        &mut self,
        count: usize,
        mut make: impl FnMut(usize) -> W,
        release: impl FnOnce(),
    ) -> Result<Vec<ThreadHandle>, HarnessError>
    where
        W: FnOnce() + Send + 'static,
    {
        let mut handles = Vec::with_capacity(count);
        for idx in 0..count {
            match self.spawn(make(idx)) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    release();
                    // The spawn error is the one worth reporting.
                    let _ = join_all(handles);
                    return Err(err.into());
                }
            }
        }
        Ok(handles)
    }
}

const GATE_WAITING: u8 = 0;
const GATE_OPEN: u8 = 1;
const GATE_CANCELLED: u8 = 2;

/// One-shot start line for workers. Unlike a barrier it can be called off,
/// so workers parked on it are released when a later spawn fails.
struct StartGate {
    lock: Mutex,
    cond: ConditionVariable,
    /// Written only under `lock`.
    state: AtomicU8,
}

impl StartGate {
    fn new() -> Result<Self, ThreadError> {
        Ok(Self {
            lock: Mutex::new(),
            cond: ConditionVariable::new()?,
            state: AtomicU8::new(GATE_WAITING),
        })
    }

    /// Park until the gate opens or is cancelled. `true` means go.
    fn wait(&self) -> bool {
        self.lock.acquire();
        self.cond.wait_while(&self.lock, || {
            self.state.load(Ordering::Relaxed) == GATE_WAITING
        });
        let open = self.state.load(Ordering::Relaxed) == GATE_OPEN;
        self.lock.release();
        open
    }

    fn open(&self) {
        self.settle(GATE_OPEN);
    }

    fn cancel(&self) {
        self.settle(GATE_CANCELLED);
    }

    fn settle(&self, state: u8) {
        self.lock.acquire();
        self.state.store(state, Ordering::Relaxed);
        self.cond.set_all();
        self.lock.release();
    }
}

/// Join every handle, reporting the first join failure after all are joined.
fn join_all(handles: Vec<ThreadHandle>) -> Result<(), ThreadError> {
    let mut first_err = None;
    for handle in handles {
        if let Err(err) = destroy_thread(handle)
            && first_err.is_none()
        {
            first_err = Some(err);
        }
    }
    first_err.map_or(Ok(()), Err)
}

/// Poll `done` until it holds or the rendezvous timeout passes.
fn await_rendezvous(mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !done() {
        if start.elapsed() > RENDEZVOUS_TIMEOUT {
            return false;
        }
        sleep_ms(1);
    }
    true
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Concurrent increments and decrements from a common start: no update may
/// be lost. Then `store` followed by a quiet read returns the stored value.
fn counter_fanout(
    cfg: &StressConfig,
    spawner: &mut Spawner,
    result: &mut ScenarioResult,
) -> Result<(), HarnessError> {
    let counter = Arc::new(AtomicCounter::new());
    let gate = Arc::new(StartGate::new()?);
    let iterations = cfg.iterations;
    let decrements = iterations / 2;

    let handles = spawner.spawn_workers(
        cfg.threads,
        |_| {
            let (counter, gate) = (Arc::clone(&counter), Arc::clone(&gate));
            move || {
                if !gate.wait() {
                    return;
                }
                for _ in 0..iterations {
                    counter.increment();
                }
                for _ in 0..decrements {
                    counter.decrement();
                }
            }
        },
        || gate.cancel(),
    )?;
    gate.open();
    join_all(handles)?;

    let expected = (cfg.threads as u64) * u64::from(iterations - decrements);
    let observed = u64::from(counter.load());
    result.count("increment", cfg.threads as u64 * u64::from(iterations));
    result.count("decrement", cfg.threads as u64 * u64::from(decrements));
    result.detail("expected", expected);
    result.detail("observed", observed);
    // The counter is 32-bit and wraps; compare modulo 2^32.
    result.check(observed == expected % (1 << 32), || {
        format!("lost updates: expected {expected}, observed {observed}")
    });

    counter.store(0xDEAD_BEEF);
    result.count("store", 1);
    let read_back = counter.load();
    result.check(read_back == 0xDEAD_BEEF, || {
        format!("store then load returned {read_back:#x}")
    });
    Ok(())
}

/// A non-atomic read-modify-write under the mutex: any overlap between
/// holders shows up as a lost update or as two threads inside at once.
fn mutex_handoff(
    cfg: &StressConfig,
    spawner: &mut Spawner,
    result: &mut ScenarioResult,
) -> Result<(), HarnessError> {
    struct Shared {
        lock: Mutex,
        value: AtomicU64,
        inside: AtomicU32,
        overlaps: AtomicU64,
        contended: AtomicU64,
    }
    let shared = Arc::new(Shared {
        lock: Mutex::with_kind(cfg.mutex_kind)?,
        value: AtomicU64::new(0),
        inside: AtomicU32::new(0),
        overlaps: AtomicU64::new(0),
        contended: AtomicU64::new(0),
    });
    let gate = Arc::new(StartGate::new()?);
    let iterations = cfg.iterations;

    let worker = |_: usize| {
        let (shared, gate) = (Arc::clone(&shared), Arc::clone(&gate));
        move || {
            if !gate.wait() {
                return;
            }
            for i in 0..iterations {
                // Alternate plain and try-first acquisition.
                if i % 2 == 0 || !shared.lock.try_acquire() {
                    if i % 2 != 0 {
                        shared.contended.fetch_add(1, Ordering::Relaxed);
                    }
                    shared.lock.acquire();
                }
                if shared.inside.fetch_add(1, Ordering::Relaxed) != 0 {
                    shared.overlaps.fetch_add(1, Ordering::Relaxed);
                }
                let v = shared.value.load(Ordering::Relaxed);
                shared.value.store(v + 1, Ordering::Relaxed);
                shared.inside.fetch_sub(1, Ordering::Relaxed);
                shared.lock.release();
            }
        }
    };
    let handles = spawner.spawn_workers(cfg.threads, worker, || gate.cancel())?;
    gate.open();
    join_all(handles)?;

    let expected = cfg.threads as u64 * u64::from(iterations);
    let observed = shared.value.load(Ordering::Relaxed);
    let overlaps = shared.overlaps.load(Ordering::Relaxed);
    result.count("acquire", expected);
    result.count("release", expected);
    result.count("try_acquire_busy", shared.contended.load(Ordering::Relaxed));
    result.detail("mutex_kind", cfg.mutex_kind.as_str());
    result.detail("expected", expected);
    result.detail("observed", observed);
    result.detail("overlaps", overlaps);
    result.check(observed == expected, || {
        format!("lost updates under mutex: expected {expected}, observed {observed}")
    });
    result.check(overlaps == 0, || {
        format!("{overlaps} critical sections overlapped")
    });
    Ok(())
}

/// What a mutex operation was seen to do, in the contract table's terms.
#[derive(Debug, Clone, Copy)]
struct Observed {
    errno: i32,
    blocked: bool,
    held_after: bool,
}

impl Observed {
    fn done(held_after: bool) -> Self {
        Self {
            errno: 0,
            blocked: false,
            held_after,
        }
    }

    /// A `try_acquire` that failed is the backend's `EBUSY`.
    fn attempt(acquired: bool, held_after: bool) -> Self {
        Self {
            errno: if acquired { 0 } else { errno::EBUSY },
            blocked: false,
            held_after,
        }
    }
}

fn compare_to_table(
    result: &mut ScenarioResult,
    kind: MutexKind,
    state: MutexState,
    op: MutexOp,
    seen: Observed,
) {
    let expected = mutex_transition(kind, state, op);
    let expected_held = expected.next == MutexState::HeldBySelf;
    result.count("contract_row", 1);
    result.check(
        seen.errno == expected.errno
            && seen.blocked == expected.blocks
            && seen.held_after == expected_held,
        || {
            format!(
                "{} mutex {state:?} + {op:?}: saw {} blocked={} held={}, expected {} blocked={} next={:?}",
                kind.as_str(),
                errno_name(seen.errno),
                seen.blocked,
                seen.held_after,
                errno_name(expected.errno),
                expected.blocks,
                expected.next
            )
        },
    );
}

/// Each mutex kind is driven through every state reachable without
/// deadlocking, and what the native mutex does is compared against
/// `mutex_transition`. Relocking an error-checking mutex panics by design;
/// the panic is caught here and read as `EDEADLK`.
fn mutex_contract(spawner: &mut Spawner, result: &mut ScenarioResult) -> Result<(), HarnessError> {
    result.thread_count = 2;
    for kind in [MutexKind::Normal, MutexKind::Recursive, MutexKind::ErrorCheck] {
        let mutex = Arc::new(Mutex::with_kind(kind)?);
        check_own_operations(kind, &mutex, result);
        check_contended_operations(kind, &mutex, spawner, result)?;
    }
    result.detail(
        "not_driven",
        "normal relock by its owner (deadlocks); release without holding (asserts)",
    );
    result.detail("fairness", mutex_fairness_note());
    Ok(())
}

fn check_own_operations(kind: MutexKind, mutex: &Mutex, result: &mut ScenarioResult) {
    let acquired = mutex.try_acquire();
    let seen = Observed::attempt(acquired, mutex.is_held_by_current_thread());
    compare_to_table(result, kind, MutexState::Unlocked, MutexOp::TryAcquire, seen);
    if !acquired {
        return;
    }

    let again = mutex.try_acquire();
    let seen = Observed::attempt(again, mutex.is_held_by_current_thread());
    compare_to_table(result, kind, MutexState::HeldBySelf, MutexOp::TryAcquire, seen);
    if again {
        mutex.release();
    }

    if kind.is_reentrant() {
        mutex.acquire();
        let seen = Observed::done(mutex.is_held_by_current_thread());
        mutex.release();
        compare_to_table(result, kind, MutexState::HeldBySelf, MutexOp::Acquire, seen);
    } else if kind == MutexKind::ErrorCheck {
        let relock = panic::catch_unwind(AssertUnwindSafe(|| mutex.acquire()));
        let seen = Observed {
            errno: if relock.is_err() { errno::EDEADLK } else { 0 },
            blocked: false,
            held_after: mutex.is_held_by_current_thread(),
        };
        if relock.is_ok() {
            mutex.release();
        }
        compare_to_table(result, kind, MutexState::HeldBySelf, MutexOp::Acquire, seen);
    }

    mutex.release();
    let seen = Observed::done(mutex.is_held_by_current_thread());
    compare_to_table(result, kind, MutexState::HeldBySelf, MutexOp::Release, seen);
}

/// Operations made by a worker while this thread holds the mutex.
fn check_contended_operations(
    kind: MutexKind,
    mutex: &Arc<Mutex>,
    spawner: &mut Spawner,
    result: &mut ScenarioResult,
) -> Result<(), HarnessError> {
    let attempt_ok = Arc::new(AtomicBool::new(false));
    let attempt_held = Arc::new(AtomicBool::new(false));
    mutex.acquire();
    let worker = {
        let (mutex, ok, held) = (
            Arc::clone(mutex),
            Arc::clone(&attempt_ok),
            Arc::clone(&attempt_held),
        );
        spawner.spawn(move || {
            let acquired = mutex.try_acquire();
            held.store(mutex.is_held_by_current_thread(), Ordering::SeqCst);
            ok.store(acquired, Ordering::SeqCst);
            if acquired {
                mutex.release();
            }
        })
    };
    let joined = worker.and_then(destroy_thread);
    mutex.release();
    joined?;
    let seen = Observed::attempt(
        attempt_ok.load(Ordering::SeqCst),
        attempt_held.load(Ordering::SeqCst),
    );
    compare_to_table(result, kind, MutexState::HeldByOther, MutexOp::TryAcquire, seen);

    let acquired = Arc::new(AtomicBool::new(false));
    let owned = Arc::new(AtomicBool::new(false));
    mutex.acquire();
    let worker = {
        let (mutex, acquired, owned) = (
            Arc::clone(mutex),
            Arc::clone(&acquired),
            Arc::clone(&owned),
        );
        spawner.spawn(move || {
            mutex.acquire();
            acquired.store(true, Ordering::SeqCst);
            owned.store(mutex.is_held_by_current_thread(), Ordering::SeqCst);
            mutex.release();
        })
    };
    let worker = match worker {
        Ok(handle) => handle,
        Err(err) => {
            mutex.release();
            return Err(err.into());
        }
    };
    sleep_ms(BLOCK_OBSERVATION_MS);
    let blocked = !acquired.load(Ordering::SeqCst);
    mutex.release();
    destroy_thread(worker)?;
    let seen = Observed {
        errno: 0,
        blocked,
        held_after: owned.load(Ordering::SeqCst),
    };
    compare_to_table(result, kind, MutexState::HeldByOther, MutexOp::Acquire, seen);
    Ok(())
}

/// Two threads hand a turn back and forth with `wait_while` + `set`. Every
/// handoff must be delivered or the run stalls and is reported.
fn condvar_signal(
    cfg: &StressConfig,
    spawner: &mut Spawner,
    result: &mut ScenarioResult,
) -> Result<(), HarnessError> {
    struct Shared {
        lock: Mutex,
        cond: ConditionVariable,
        /// Even: ping's turn. Odd: pong's turn. Written only under `lock`.
        turn: AtomicU32,
        abort: AtomicBool,
        wakeups: AtomicU64,
    }
    let rounds = cfg.iterations.min(MAX_PINGPONG_ROUNDS);
    let shared = Arc::new(Shared {
        lock: Mutex::new(),
        cond: ConditionVariable::new()?,
        turn: AtomicU32::new(0),
        abort: AtomicBool::new(false),
        wakeups: AtomicU64::new(0),
    });

    fn player(parity: u32, rounds: u32, shared: Arc<Shared>) -> impl FnOnce() + Send + 'static {
        move || {
            for _ in 0..rounds {
                shared.lock.acquire();
                shared.cond.wait_while(&shared.lock, || {
                    shared.turn.load(Ordering::Relaxed) % 2 != parity
                        && !shared.abort.load(Ordering::Relaxed)
                });
                shared.wakeups.fetch_add(1, Ordering::Relaxed);
                if shared.abort.load(Ordering::Relaxed) {
                    shared.lock.release();
                    return;
                }
                shared.turn.fetch_add(1, Ordering::Relaxed);
                shared.cond.set();
                shared.lock.release();
            }
        }
    }
    let abort = || {
        shared.lock.acquire();
        shared.abort.store(true, Ordering::Relaxed);
        shared.cond.set_all();
        shared.lock.release();
    };
    let players = spawner.spawn_workers(
        2,
        |parity| player(parity as u32, rounds, Arc::clone(&shared)),
        &abort,
    )?;

    let target = 2 * rounds;
    let finished = await_rendezvous(|| shared.turn.load(Ordering::Relaxed) >= target);
    if !finished {
        abort();
    }
    join_all(players)?;

    let turns = shared.turn.load(Ordering::Relaxed);
    result.thread_count = 2;
    result.count("set", u64::from(turns));
    result.count("wait_return", shared.wakeups.load(Ordering::Relaxed));
    result.detail("rounds", rounds);
    result.detail("turns", turns);
    result.check(finished && turns == target, || {
        format!("handoff stalled after {turns} of {target} turns")
    });
    Ok(())
}

/// Waiters park on one condition variable; a single `set_all` per round must
/// wake every one of them.
fn condvar_broadcast(
    cfg: &StressConfig,
    spawner: &mut Spawner,
    result: &mut ScenarioResult,
) -> Result<(), HarnessError> {
    struct Shared {
        lock: Mutex,
        cond: ConditionVariable,
        /// Round released so far. Written only under `lock`.
        generation: AtomicU32,
        parked: AtomicUsize,
        woke: AtomicUsize,
    }
    let shared = Arc::new(Shared {
        lock: Mutex::new(),
        cond: ConditionVariable::new()?,
        generation: AtomicU32::new(0),
        parked: AtomicUsize::new(0),
        woke: AtomicUsize::new(0),
    });

    // Releasing every round at once lets any started waiter run to the end.
    let release_all = || {
        shared.lock.acquire();
        shared.generation.store(BROADCAST_ROUNDS, Ordering::Relaxed);
        shared.cond.set_all();
        shared.lock.release();
    };
    let handles = spawner.spawn_workers(
        cfg.threads,
        |_| {
            let shared = Arc::clone(&shared);
            move || {
                for round in 1..=BROADCAST_ROUNDS {
                    shared.lock.acquire();
                    shared.parked.fetch_add(1, Ordering::SeqCst);
                    shared.cond.wait_while(&shared.lock, || {
                        shared.generation.load(Ordering::Relaxed) < round
                    });
                    shared.lock.release();
                    shared.woke.fetch_add(1, Ordering::SeqCst);
                }
            }
        },
        &release_all,
    )?;

    let mut stalled_round = None;
    for round in 1..=BROADCAST_ROUNDS {
        let want = cfg.threads * round as usize;
        // A waiter bumps `parked` while holding the lock and only lets go of
        // it inside `wait`, so once we hold the lock all of them are parked.
        if !await_rendezvous(|| shared.parked.load(Ordering::SeqCst) >= want) {
            stalled_round = Some(round);
        }
        shared.lock.acquire();
        let released = if stalled_round.is_some() {
            BROADCAST_ROUNDS
        } else {
            round
        };
        shared.generation.store(released, Ordering::Relaxed);
        shared.cond.set_all();
        shared.lock.release();
        if stalled_round.is_some() {
            break;
        }
        if !await_rendezvous(|| shared.woke.load(Ordering::SeqCst) >= want) {
            stalled_round = Some(round);
            release_all();
            break;
        }
    }
    join_all(handles)?;

    let woke = shared.woke.load(Ordering::SeqCst);
    let expected = cfg.threads * BROADCAST_ROUNDS as usize;
    result.count("set_all", u64::from(BROADCAST_ROUNDS));
    result.count("wait_return", woke as u64);
    result.detail("rounds", BROADCAST_ROUNDS);
    result.detail("woke", woke);
    result.check(stalled_round.is_none(), || {
        format!("broadcast round {} did not wake every waiter", stalled_round.unwrap_or(0))
    });
    result.check(woke == expected, || {
        format!("expected {expected} wakeups, saw {woke}")
    });
    Ok(())
}

/// Unsignaled timed waits must take roughly the requested time. Under the
/// legacy deadline mode they return at once and are flagged.
fn timed_wait_jitter(cfg: &StressConfig, result: &mut ScenarioResult) -> Result<(), HarnessError> {
    let lock = Mutex::new();
    let cond = ConditionVariable::new()?;
    let mut verdicts: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut worst_early: Option<Duration> = None;
    let mut worst_late = Duration::ZERO;
    let mut spurious = 0_u64;

    for _ in 0..cfg.samples {
        lock.acquire();
        let t0 = Instant::now();
        let status = cond.wait_timeout_with_mode(&lock, cfg.timed_wait_ms, cfg.timed_wait_mode);
        let elapsed = t0.elapsed();
        lock.release();

        if status? == WaitStatus::Signaled {
            // Nobody signals here, so this is a spurious wakeup.
            spurious += 1;
            continue;
        }
        let verdict = classify_timed_wait(cfg.timed_wait_ms, elapsed);
        let name = match verdict {
            TimedWaitVerdict::WithinTolerance => "within_tolerance",
            TimedWaitVerdict::ReturnedEarly => {
                worst_early = Some(worst_early.map_or(elapsed, |w| w.min(elapsed)));
                "returned_early"
            }
            TimedWaitVerdict::Overslept => "overslept",
        };
        worst_late = worst_late.max(elapsed);
        *verdicts.entry(name).or_insert(0) += 1;
    }

    result.thread_count = 1;
    result.count("wait_timeout", u64::from(cfg.samples));
    result.count("spurious_wakeup", spurious);
    result.detail("timed_wait_mode", cfg.timed_wait_mode.as_str());
    result.detail("requested_ms", cfg.timed_wait_ms);
    result.detail(
        "verdicts",
        serde_json::to_value(&verdicts).unwrap_or_default(),
    );
    result.detail(
        "max_elapsed_us",
        u64::try_from(worst_late.as_micros()).unwrap_or(u64::MAX),
    );

    let early = verdicts.get("returned_early").copied().unwrap_or(0);
    let late = verdicts.get("overslept").copied().unwrap_or(0);
    result.check(early == 0, || {
        let shortest = worst_early.unwrap_or_default();
        let hint = if cfg.timed_wait_mode == TimedWaitMode::LegacyEpoch {
            " (legacy epoch deadline in effect)"
        } else {
            ""
        };
        format!(
            "{early} timed waits returned early, shortest {shortest:?} for {} ms{hint}",
            cfg.timed_wait_ms
        )
    });
    result.check(late == 0, || {
        format!("{late} timed waits overslept, longest {worst_late:?}")
    });
    Ok(())
}

/// Plain stores made by a thread are visible to the joiner after
/// `destroy_thread` returns.
fn join_visibility(
    cfg: &StressConfig,
    spawner: &mut Spawner,
    result: &mut ScenarioResult,
) -> Result<(), HarnessError> {
    let slots: Arc<Vec<AtomicU64>> = Arc::new((0..cfg.threads).map(|_| AtomicU64::new(0)).collect());
    let handles = spawner.spawn_workers(
        cfg.threads,
        |idx| {
            let slots = Arc::clone(&slots);
            move || slots[idx].store(sentinel(idx), Ordering::Relaxed)
        },
        || {},
    )?;
    join_all(handles)?;

    let mismatched: Vec<usize> = (0..cfg.threads)
        .filter(|&idx| slots[idx].load(Ordering::Relaxed) != sentinel(idx))
        .collect();
    result.count("create", cfg.threads as u64);
    result.count("join", cfg.threads as u64);
    result.check(mismatched.is_empty(), || {
        format!("sentinels missing after join for threads {mismatched:?}")
    });

    // A panicking thread is contained and reported at join.
    let panicked = matches!(
        destroy_thread(spawner.spawn(|| panic!("deliberate worker panic"))?),
        Err(ThreadError::Panicked)
    );
    result.count("panic_join", 1);
    result.check(panicked, || "thread panic was not reported at join".to_string());
    Ok(())
}

fn sentinel(idx: usize) -> u64 {
    0x5EED_0000_0000_0000 | idx as u64
}

/// Only the thread that registered itself is main; every other thread sees
/// a distinct identity.
fn main_thread_identity(
    cfg: &StressConfig,
    spawner: &mut Spawner,
    result: &mut ScenarioResult,
) -> Result<(), HarnessError> {
    let registry = Arc::new(MainThreadRegistry::new());
    result.check(!registry.is_current(), || {
        "unset registry claimed a main thread".to_string()
    });
    registry.set_current();
    let me = current_thread_id();

    let impostors = Arc::new(AtomicUsize::new(0));
    let same_id = Arc::new(AtomicUsize::new(0));
    let handles = spawner.spawn_workers(
        cfg.threads,
        |_| {
            let (registry, impostors, same_id) = (
                Arc::clone(&registry),
                Arc::clone(&impostors),
                Arc::clone(&same_id),
            );
            move || {
                if registry.is_current() {
                    impostors.fetch_add(1, Ordering::Relaxed);
                }
                if current_thread_id() == me {
                    same_id.fetch_add(1, Ordering::Relaxed);
                }
            }
        },
        || {},
    )?;
    let ids: Vec<_> = handles.iter().map(ThreadHandle::id).collect();
    join_all(handles)?;

    let impostors = impostors.load(Ordering::Relaxed);
    let same_id = same_id.load(Ordering::Relaxed);
    result.count("is_main_thread", cfg.threads as u64 + 2);
    result.check(registry.is_current(), || {
        "registering thread is not recognized as main".to_string()
    });
    result.check(impostors == 0, || {
        format!("{impostors} worker threads were recognized as main")
    });
    result.check(same_id == 0 && ids.iter().all(|id| *id != me), || {
        "a worker shared the main thread's identity".to_string()
    });
    result.detail("process_main_registered", forge_threads::main_thread_id().is_some());
    result.detail("process_main_is_caller", forge_threads::is_main_thread());
    Ok(())
}

fn cpu_cores(result: &mut ScenarioResult) -> Result<(), HarnessError> {
    let cores = num_cpu_cores()?;
    result.thread_count = 1;
    result.count("num_cpu_cores", 1);
    result.detail("cores", cores);
    if let Ok(n) = std::thread::available_parallelism() {
        result.detail("available_parallelism", n.get());
    }
    result.check(cores >= 1, || format!("implausible core count {cores}"));
    Ok(())
}
