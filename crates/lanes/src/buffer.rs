//! Collection buffers for the windowed admission modes.
//!
//! One entry per (lane, session). The entry owns its release timer; every
//! mutation happens under the caller's lock, so an append can never race a
//! flush of the same key. A timer only flushes the entry generation it was
//! started for, and removing an entry aborts its timer.

use std::{collections::HashMap, fmt, time::Instant};

use {switchyard_config::AdmissionMode, tokio::task::JoinHandle};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BufferKey {
    lane: String,
    session: String,
}

impl BufferKey {
    fn new(lane: &str, session: &str) -> Self {
        Self {
            lane: lane.to_string(),
            session: session.to_string(),
        }
    }
}

struct BufferEntry<T> {
    mode: AdmissionMode,
    members: Vec<T>,
    generation: u64,
    opened_at: Instant,
    timer: Option<JoinHandle<()>>,
}

impl<T> Drop for BufferEntry<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Why a buffer was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The collection window elapsed.
    Window,
    /// The buffer reached the lane's max batch size.
    BatchFull,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Window => write!(f, "window"),
            Self::BatchFull => write!(f, "batch_full"),
        }
    }
}

/// Members released from one buffer entry, in arrival order.
#[derive(Debug)]
pub struct Flushed<T> {
    pub lane: String,
    pub session: String,
    pub mode: AdmissionMode,
    pub members: Vec<T>,
    pub trigger: FlushTrigger,
    pub opened_at: Instant,
}

#[derive(Debug)]
pub enum Appended<T> {
    /// Still collecting; `len` members are buffered for the key.
    Buffered { len: usize },
    Flushed(Flushed<T>),
}

pub struct CollectionBuffers<T> {
    entries: HashMap<BufferKey, BufferEntry<T>>,
    next_generation: u64,
}

impl<T> Default for CollectionBuffers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CollectionBuffers<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Append `member` to the buffer for `(lane, session)`.
    ///
    /// The first member of an entry starts its release timer through
    /// `start_timer`, which receives the entry generation to hand back to
    /// [`take_expired`](Self::take_expired). Later members never restart it.
    /// When the entry reaches `max_batch_size` it is flushed immediately and
    /// its timer cancelled. The mode of the first member governs the entry.
    pub fn append(
        &mut self,
        lane: &str,
        session: &str,
        mode: AdmissionMode,
        max_batch_size: usize,
        member: T,
        start_timer: impl FnOnce(u64) -> JoinHandle<()>,
    ) -> Appended<T> {
        let key = BufferKey::new(lane, session);
        let next_generation = &mut self.next_generation;
        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            *next_generation += 1;
            BufferEntry {
                mode,
                members: Vec::new(),
                generation: *next_generation,
                opened_at: Instant::now(),
                timer: None,
            }
        });
        entry.members.push(member);

        if entry.members.len() >= max_batch_size.max(1) {
            return match self.remove(&key, FlushTrigger::BatchFull) {
                Some(flushed) => Appended::Flushed(flushed),
                None => Appended::Buffered { len: 0 },
            };
        }

        if entry.timer.is_none() {
            entry.timer = Some(start_timer(entry.generation));
        }
        Appended::Buffered {
            len: entry.members.len(),
        }
    }

    /// Flush the entry for `(lane, session)` if it is still the generation the
    /// timer was started for. A stale timer finds nothing and returns `None`.
    pub fn take_expired(&mut self, lane: &str, session: &str, generation: u64) -> Option<Flushed<T>> {
        let key = BufferKey::new(lane, session);
        if self.entries.get(&key)?.generation != generation {
            return None;
        }
        // Called from the timer task itself; detach rather than abort it.
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.timer = None;
        }
        self.remove(&key, FlushTrigger::Window)
    }

    /// Remove every entry of `lane`, cancelling their timers.
    pub fn clear_lane(&mut self, lane: &str) -> Vec<T> {
        let keys: Vec<BufferKey> = self
            .entries
            .keys()
            .filter(|k| k.lane == lane)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .flat_map(|mut entry| std::mem::take(&mut entry.members))
            .collect()
    }

    /// Number of members buffered in `lane` across all sessions.
    pub fn buffered(&self, lane: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.lane == lane)
            .map(|(_, e)| e.members.len())
            .sum()
    }

    /// Number of sessions with an open window in `lane`.
    pub fn open_windows(&self, lane: &str) -> usize {
        self.entries.keys().filter(|k| k.lane == lane).count()
    }

    fn remove(&mut self, key: &BufferKey, trigger: FlushTrigger) -> Option<Flushed<T>> {
        let mut entry = self.entries.remove(key)?;
        Some(Flushed {
            lane: key.lane.clone(),
            session: key.session.clone(),
            mode: entry.mode,
            members: std::mem::take(&mut entry.members),
            trigger,
            opened_at: entry.opened_at,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    fn idle_timer(started: &Arc<AtomicUsize>) -> impl FnOnce(u64) -> JoinHandle<()> + use<> {
        let started = Arc::clone(started);
        move |_generation| {
            started.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(std::future::pending())
        }
    }

    #[tokio::test]
    async fn timer_starts_once_per_window() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut buffers = CollectionBuffers::new();

        for i in 0..3 {
            let appended = buffers.append("chat", "s1", AdmissionMode::Collect, 10, i, idle_timer(&started));
            assert!(matches!(appended, Appended::Buffered { len } if len == i + 1));
        }
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(buffers.buffered("chat"), 3);
    }

    #[tokio::test]
    async fn full_buffer_flushes_in_arrival_order() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut buffers = CollectionBuffers::new();

        buffers.append("chat", "s1", AdmissionMode::Steer, 3, "a", idle_timer(&started));
        buffers.append("chat", "s1", AdmissionMode::Steer, 3, "b", idle_timer(&started));
        let Appended::Flushed(flushed) =
            buffers.append("chat", "s1", AdmissionMode::Steer, 3, "c", idle_timer(&started))
        else {
            panic!("expected flush at max batch size");
        };

        assert_eq!(flushed.members, vec!["a", "b", "c"]);
        assert_eq!(flushed.trigger, FlushTrigger::BatchFull);
        assert_eq!(flushed.mode, AdmissionMode::Steer);
        assert_eq!(buffers.buffered("chat"), 0);
    }

    #[tokio::test]
    async fn batch_of_one_never_starts_timer() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut buffers = CollectionBuffers::new();
        let appended = buffers.append("chat", "s1", AdmissionMode::Collect, 1, 1, idle_timer(&started));
        assert!(matches!(appended, Appended::Flushed(_)));
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_generation_is_ignored() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut generations = Vec::new();
        let mut buffers = CollectionBuffers::new();

        buffers.append("chat", "s1", AdmissionMode::Collect, 2, 1, |generation| {
            generations.push(generation);
            tokio::spawn(std::future::pending())
        });
        // Fills and flushes the first window.
        buffers.append("chat", "s1", AdmissionMode::Collect, 2, 2, idle_timer(&started));
        // Opens a second window for the same key.
        buffers.append("chat", "s1", AdmissionMode::Collect, 2, 3, idle_timer(&started));

        assert!(buffers.take_expired("chat", "s1", generations[0]).is_none());
        assert_eq!(buffers.buffered("chat"), 1);
    }

    #[tokio::test]
    async fn expired_window_flushes_singleton() {
        let mut generation = 0;
        let mut buffers = CollectionBuffers::new();
        buffers.append("chat", "s1", AdmissionMode::Collect, 5, "only", |g| {
            generation = g;
            tokio::spawn(std::future::pending())
        });

        let flushed = buffers.take_expired("chat", "s1", generation).unwrap();
        assert_eq!(flushed.members, vec!["only"]);
        assert_eq!(flushed.trigger, FlushTrigger::Window);
        assert!(buffers.take_expired("chat", "s1", generation).is_none());
    }

    #[tokio::test]
    async fn sessions_and_lanes_are_independent() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut buffers = CollectionBuffers::new();
        buffers.append("chat", "s1", AdmissionMode::Collect, 5, 1, idle_timer(&started));
        buffers.append("chat", "s2", AdmissionMode::Collect, 5, 2, idle_timer(&started));
        buffers.append("hooks", "s1", AdmissionMode::Collect, 5, 3, idle_timer(&started));

        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(buffers.open_windows("chat"), 2);

        let mut cleared = buffers.clear_lane("chat");
        cleared.sort_unstable();
        assert_eq!(cleared, vec![1, 2]);
        assert_eq!(buffers.buffered("chat"), 0);
        assert_eq!(buffers.buffered("hooks"), 1);
        assert!(buffers.clear_lane("chat").is_empty());
    }

    #[tokio::test]
    async fn clearing_aborts_timer() {
        let mut handle = None;
        let mut buffers = CollectionBuffers::new();
        buffers.append("chat", "s1", AdmissionMode::Collect, 5, 1, |_| {
            let h = tokio::spawn(std::future::pending::<()>());
            handle = Some(h.abort_handle());
            h
        });
        buffers.clear_lane("chat");
        let handle = handle.unwrap();
        for _ in 0..10 {
            if handle.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(handle.is_finished());
    }
}
