//! Hazard-pointer domain for safe lock-free reclamation
//!
//! A thread announces the address it is about to dereference in one of
//! its hazard cells; retired nodes are only freed once a scan proves no
//! cell anywhere holds their address. The domain is process-wide and is
//! never torn down, so it must not be used during process-wide teardown.
//!
//! Per-thread records sit on an append-only lock-free list. A record is
//! reclaimed for reuse when its owning thread exits; nodes the exiting
//! thread could not yet free move to a shared orphan list that later
//! scans drain.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::error::{ErrorCode, ErrorInfo};
use crate::ticket_lock::TicketLock;

/// Hazard cells per thread (hard upper bound)
pub const MAX_HAZARDS_PER_THREAD: usize = 8;

/// Maximum simultaneously registered threads
pub const MAX_THREADS: usize = 64;

/// One registered thread's hazard cells
struct HazardRecord {
    cells: [AtomicPtr<u8>; MAX_HAZARDS_PER_THREAD],

    /// Claimed by a live thread
    active: AtomicBool,

    /// Append-only list link
    next: AtomicPtr<HazardRecord>,
}

impl HazardRecord {
    fn new() -> Self {
        const NULL: AtomicPtr<u8> = AtomicPtr::new(std::ptr::null_mut());
        Self {
            cells: [NULL; MAX_HAZARDS_PER_THREAD],
            active: AtomicBool::new(true),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }
}

struct Retired {
    ptr: *mut u8,
    drop_fn: unsafe fn(*mut u8),
}

// Safety: retired nodes are unlinked from any shared structure; the only
// remaining access is the eventual drop_fn call.
unsafe impl Send for Retired {}

/// Process-wide hazard-pointer domain
pub struct HazardDomain {
    /// Head of the record list
    head: AtomicPtr<HazardRecord>,

    /// Registered records (active or reusable)
    record_count: AtomicUsize,

    /// Nodes left behind by exited threads, drained by any scan
    orphans: TicketLock<Vec<Retired>>,
}

// Safety: all fields are themselves thread-safe.
unsafe impl Send for HazardDomain {}
unsafe impl Sync for HazardDomain {}

impl HazardDomain {
    /// The process-wide domain (lazily initialised, never destroyed)
    pub fn global() -> &'static HazardDomain {
        static DOMAIN: OnceLock<HazardDomain> = OnceLock::new();
        DOMAIN.get_or_init(|| HazardDomain {
            head: AtomicPtr::new(std::ptr::null_mut()),
            record_count: AtomicUsize::new(0),
            orphans: TicketLock::new(Vec::new()),
        })
    }

    /// Acquire a hazard cell for the calling thread
    ///
    /// Fails with `HazardExhausted` when the thread already holds
    /// `MAX_HAZARDS_PER_THREAD` guards, or when `MAX_THREADS` records
    /// exist and none can be reused.
    pub fn acquire(&'static self) -> Result<HazardGuard, ErrorInfo> {
        THREAD.with(|slot| {
            let mut state = slot.state.borrow_mut();
            let state = match &mut *state {
                Some(s) => s,
                none => {
                    let registered = self.register_thread().ok_or_else(|| {
                        ErrorInfo::with_message(
                            ErrorCode::HazardExhausted,
                            "hazard thread records exhausted",
                        )
                    })?;
                    none.insert(registered)
                }
            };

            let mask = state.in_use.get();
            let index = (0..MAX_HAZARDS_PER_THREAD)
                .find(|i| mask & (1 << i) == 0)
                .ok_or_else(|| {
                    ErrorInfo::with_message(
                        ErrorCode::HazardExhausted,
                        "hazard cells exhausted for this thread",
                    )
                })?;
            state.in_use.set(mask | (1 << index));

            Ok(HazardGuard {
                cell: &state.record.cells[index],
                index,
                _not_send: PhantomData,
            })
        })
    }

    /// Retire a node previously unlinked from a shared structure
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw`, be unreachable for new
    /// readers, and be retired exactly once.
    pub unsafe fn retire<T: Send>(&'static self, ptr: *mut T) {
        unsafe fn drop_box<T>(p: *mut u8) {
            drop(Box::from_raw(p as *mut T));
        }
        let retired = Retired {
            ptr: ptr as *mut u8,
            drop_fn: drop_box::<T>,
        };

        let threshold = self.scan_threshold();
        THREAD.with(|slot| {
            // Make sure this thread has a record so its retired list has
            // an owner; fall back to the orphan list when at thread cap.
            let mut state = slot.state.borrow_mut();
            if state.is_none() {
                match self.register_thread() {
                    Some(s) => {
                        *state = Some(s);
                    }
                    None => {
                        drop(state);
                        self.orphans.with(|orphans| orphans.push(retired));
                        return;
                    }
                }
            }
            let state = state.as_mut().unwrap();
            let mut retired_list = state.retired.borrow_mut();
            retired_list.push(retired);
            if retired_list.len() >= threshold {
                self.scan_list(&mut retired_list);
            }
        });
    }

    /// Run a reclamation pass over the calling thread's retired list
    /// and the shared orphans
    pub fn scan(&'static self) {
        THREAD.with(|slot| {
            let state = slot.state.borrow();
            match &*state {
                Some(s) => self.scan_list(&mut s.retired.borrow_mut()),
                None => {
                    // Unregistered thread: still sweep the orphans, but
                    // hand survivors back instead of leaking them.
                    let mut tmp = Vec::new();
                    self.scan_list(&mut tmp);
                    if !tmp.is_empty() {
                        self.orphans.with(|orphans| orphans.append(&mut tmp));
                    }
                }
            }
        });
    }

    /// Number of registered thread records
    pub fn registered_threads(&self) -> usize {
        self.record_count.load(Ordering::Acquire)
    }

    /// Retired nodes currently owned by the calling thread
    pub fn pending_retired(&'static self) -> usize {
        THREAD.with(|slot| {
            slot.state
                .borrow()
                .as_ref()
                .map(|s| s.retired.borrow().len())
                .unwrap_or(0)
        })
    }

    fn scan_threshold(&self) -> usize {
        let records = self.record_count.load(Ordering::Acquire).max(1);
        2 * records * MAX_HAZARDS_PER_THREAD
    }

    fn scan_list(&self, retired: &mut Vec<Retired>) {
        self.orphans.with(|orphans| retired.append(orphans));
        if retired.is_empty() {
            return;
        }

        // Snapshot every published hazard. SeqCst pairs with the SeqCst
        // publication in HazardGuard::protect.
        let mut protected: Vec<*mut u8> = Vec::with_capacity(self.scan_threshold());
        let mut rec = self.head.load(Ordering::Acquire);
        while !rec.is_null() {
            let record = unsafe { &*rec };
            for cell in &record.cells {
                let p = cell.load(Ordering::SeqCst);
                if !p.is_null() {
                    protected.push(p);
                }
            }
            rec = record.next.load(Ordering::Acquire);
        }
        protected.sort_unstable();

        retired.retain(|node| {
            if protected.binary_search(&node.ptr).is_ok() {
                true
            } else {
                // Safety: unlinked, retired once, proven unobserved.
                unsafe { (node.drop_fn)(node.ptr) };
                false
            }
        });
    }

    /// Claim an inactive record or append a fresh one
    fn register_thread(&'static self) -> Option<ThreadState> {
        // First pass: adopt a record released by an exited thread.
        let mut rec = self.head.load(Ordering::Acquire);
        while !rec.is_null() {
            let record = unsafe { &*rec };
            if !record.active.load(Ordering::Relaxed)
                && record
                    .active
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return Some(ThreadState::new(self, record));
            }
            rec = record.next.load(Ordering::Acquire);
        }

        if self.record_count.fetch_add(1, Ordering::AcqRel) >= MAX_THREADS {
            self.record_count.fetch_sub(1, Ordering::AcqRel);
            return None;
        }

        let record: &'static HazardRecord = Box::leak(Box::new(HazardRecord::new()));
        let record_ptr = record as *const _ as *mut HazardRecord;
        loop {
            let head = self.head.load(Ordering::Acquire);
            record.next.store(head, Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, record_ptr, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ThreadState::new(self, record));
            }
        }
    }
}

/// Per-thread registration handle stored in TLS
struct ThreadState {
    domain: &'static HazardDomain,
    record: &'static HazardRecord,
    in_use: Cell<u8>,
    retired: RefCell<Vec<Retired>>,
}

impl ThreadState {
    fn new(domain: &'static HazardDomain, record: &'static HazardRecord) -> Self {
        Self {
            domain,
            record,
            in_use: Cell::new(0),
            retired: RefCell::new(Vec::new()),
        }
    }
}

impl Drop for ThreadState {
    fn drop(&mut self) {
        for cell in &self.record.cells {
            cell.store(std::ptr::null_mut(), Ordering::Release);
        }
        // One last reclamation attempt; survivors become orphans.
        let mut retired = std::mem::take(&mut *self.retired.borrow_mut());
        self.domain.scan_list(&mut retired);
        if !retired.is_empty() {
            self.domain
                .orphans
                .with(|orphans| orphans.append(&mut retired));
        }
        self.record.active.store(false, Ordering::Release);
    }
}

struct ThreadSlot {
    state: RefCell<Option<ThreadState>>,
}

thread_local! {
    static THREAD: ThreadSlot = ThreadSlot {
        state: RefCell::new(None),
    };
}

/// An acquired hazard cell
///
/// Clearing happens on drop. Not `Send`: the cell belongs to the
/// acquiring thread's record.
pub struct HazardGuard {
    cell: &'static AtomicPtr<u8>,
    index: usize,
    _not_send: PhantomData<*mut u8>,
}

impl HazardGuard {
    /// Protect the pointer currently stored in `src`
    ///
    /// Publishes the address, then re-reads `src` to close the race with
    /// a concurrent retire; loops until the two agree. Returns the
    /// protected pointer (possibly null).
    pub fn protect<T>(&self, src: &AtomicPtr<T>) -> *mut T {
        loop {
            let p = src.load(Ordering::Acquire);
            self.cell.store(p as *mut u8, Ordering::SeqCst);
            if src.load(Ordering::SeqCst) == p {
                return p;
            }
        }
    }

    /// Publish a specific pointer without validation
    pub fn set<T>(&self, ptr: *mut T) {
        self.cell.store(ptr as *mut u8, Ordering::SeqCst);
    }

    /// Clear without dropping the guard
    pub fn clear(&self) {
        self.cell.store(std::ptr::null_mut(), Ordering::Release);
    }
}

impl Drop for HazardGuard {
    fn drop(&mut self) {
        self.cell.store(std::ptr::null_mut(), Ordering::Release);
        // Thread may be tearing down its TLS; the mask is gone with it.
        let _ = THREAD.try_with(|slot| {
            if let Some(state) = &*slot.state.borrow() {
                state.in_use.set(state.in_use.get() & !(1 << self.index));
            }
        });
    }
}
