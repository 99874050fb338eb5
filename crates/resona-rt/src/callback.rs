//! Callback RPC buffers: the request word-ring plus the string and f64
//! argument arenas.
//!
//! While the worker owns the render loop it cannot take synchronous calls on
//! the control port, so the host encodes them here and the worker drains the
//! ring once per wake. Records are processed strictly FIFO.
//!
//! Record layout, in 32-bit words: `[uid, opcode, argc]` followed by `argc`
//! `(tag, a, b)` triples. For [`TAG_INT`] the value is inline in `a`; for the
//! other tags `(a, b)` is an explicit (offset, length) pair into the string
//! or f64 arena. Explicit lengths make truncation detectable instead of
//! implicit.
//!
//! Single producer (the host, serialized by its own lock), single consumer
//! (the worker). Slots 0 and 1 of the request buffer hold the producer head
//! and consumer tail as wrapped word offsets; a record never wraps
//! mid-record: the producer writes a [`SKIP_WORD`] sentinel and restarts at
//! offset 0 instead. The arenas are bump-allocated scratch reclaimed by the
//! producer whenever it observes the ring empty.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use crate::constants::{CALLBACK_DATA_BUFFER_SIZE, CALLBACK_REQUEST_BUFFER_SIZE};

/// Argument tag: inline i32 in word `a`.
pub const TAG_INT: i32 = 0;
/// Argument tag: one f64 at arena offset `a` (length `b` = 1).
pub const TAG_DOUBLE: i32 = 1;
/// Argument tag: UTF-8 bytes at string-arena offset `a`, length `b`.
pub const TAG_STR: i32 = 2;
/// Argument tag: f64 slice at arena offset `a`, length `b`.
pub const TAG_F64_ARRAY: i32 = 3;

/// Words in a record header: uid, opcode, argc.
pub const RECORD_HEADER_WORDS: usize = 3;
/// Words per encoded argument.
pub const ARG_WORDS: usize = 3;
/// Upper bound on arguments per record; `argc` beyond this is corruption.
pub const MAX_CALL_ARGS: usize = 8;

/// Sentinel written where a record would otherwise wrap mid-record; the
/// consumer jumps back to offset 0 when it reads one.
pub const SKIP_WORD: i32 = i32::MIN;

const HEAD_SLOT: usize = 0;
const TAIL_SLOT: usize = 1;
/// Usable words in the circular record region (ring minus the cursor slots).
const REGION_WORDS: usize = CALLBACK_REQUEST_BUFFER_SIZE - 2;

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("callback request ring is full")]
    RingFull,
    #[error("callback {region} arena is full ({needed} needed, {free} free)")]
    ArenaFull {
        region: &'static str,
        needed: usize,
        free: usize,
    },
    #[error("truncated or corrupt callback record")]
    Truncated,
    #[error("callback argument region out of bounds")]
    OutOfBounds,
    #[error("callback string argument is not valid utf-8")]
    Utf8,
}

/// The request ring and both argument arenas.
pub struct CallbackBuffers {
    req: Box<[AtomicI32]>,
    str_data: UnsafeCell<Box<[u8]>>,
    str_cursor: AtomicUsize,
    f64_data: UnsafeCell<Box<[f64]>>,
    f64_cursor: AtomicUsize,
}

// Safety: the arenas are written only by the single producer, before it
// publishes the referencing record with a release store of the head cursor;
// the consumer reads them only after an acquire load of that cursor, and the
// producer reclaims space only after observing (acquire) the consumer's tail
// catch up. Every cross-thread access is therefore ordered by the cursor
// pair.
unsafe impl Sync for CallbackBuffers {}
unsafe impl Send for CallbackBuffers {}

impl CallbackBuffers {
    pub fn new() -> Self {
        let mut req = Vec::with_capacity(CALLBACK_REQUEST_BUFFER_SIZE);
        req.resize_with(CALLBACK_REQUEST_BUFFER_SIZE, || AtomicI32::new(0));
        Self {
            req: req.into_boxed_slice(),
            str_data: UnsafeCell::new(vec![0u8; CALLBACK_DATA_BUFFER_SIZE].into_boxed_slice()),
            str_cursor: AtomicUsize::new(0),
            f64_data: UnsafeCell::new(vec![0f64; CALLBACK_DATA_BUFFER_SIZE].into_boxed_slice()),
            f64_cursor: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn head(&self) -> usize {
        self.req[HEAD_SLOT].load(Ordering::Acquire) as usize
    }

    #[inline]
    fn tail(&self) -> usize {
        self.req[TAIL_SLOT].load(Ordering::Acquire) as usize
    }

    #[inline]
    fn slot(&self, offset: usize) -> &AtomicI32 {
        &self.req[2 + offset]
    }

    /// True when no records are pending.
    pub fn is_empty(&self) -> bool {
        self.head() == self.tail()
    }

    /// Reclaims both arenas if the consumer has drained the ring. Producer
    /// side; must precede arena pushes for a new record.
    pub fn reclaim_if_drained(&self) {
        if self.head() == self.tail() {
            self.str_cursor.store(0, Ordering::Relaxed);
            self.f64_cursor.store(0, Ordering::Relaxed);
        }
    }

    /// Appends one complete record (header plus encoded arguments).
    /// Producer side.
    pub fn enqueue_record(&self, words: &[i32]) -> Result<(), CallbackError> {
        let len = words.len();
        if len < RECORD_HEADER_WORDS || len >= REGION_WORDS {
            return Err(CallbackError::Truncated);
        }
        let head = self.head();
        let tail = self.tail();
        // One word is sacrificed so a full ring is distinguishable from an
        // empty one.
        let free = (tail + REGION_WORDS - head - 1) % REGION_WORDS;
        let contiguous = REGION_WORDS - head;

        let (start, needed) = if len <= contiguous {
            (head, len)
        } else {
            // Sentinel at `head`, record restarts at offset 0.
            (0, contiguous + len)
        };
        if needed > free {
            return Err(CallbackError::RingFull);
        }
        if start == 0 && head != 0 {
            self.slot(head).store(SKIP_WORD, Ordering::Relaxed);
        }
        for (i, &word) in words.iter().enumerate() {
            self.slot(start + i).store(word, Ordering::Relaxed);
        }
        let new_head = (start + len) % REGION_WORDS;
        self.req[HEAD_SLOT].store(new_head as i32, Ordering::Release);
        Ok(())
    }

    /// Pops the oldest record into `out`, returning `false` when the ring is
    /// empty. Consumer side.
    pub fn pop_record(&self, out: &mut Vec<i32>) -> Result<bool, CallbackError> {
        let head = self.head();
        let mut tail = self.tail();
        loop {
            if tail == head {
                return Ok(false);
            }
            if self.slot(tail).load(Ordering::Acquire) == SKIP_WORD {
                tail = 0;
                self.req[TAIL_SLOT].store(0, Ordering::Release);
                continue;
            }
            break;
        }
        let avail = (head + REGION_WORDS - tail) % REGION_WORDS;
        if avail < RECORD_HEADER_WORDS {
            return Err(CallbackError::Truncated);
        }
        let argc = self.slot(tail + 2).load(Ordering::Acquire);
        if argc < 0 || argc as usize > MAX_CALL_ARGS {
            return Err(CallbackError::Truncated);
        }
        let len = RECORD_HEADER_WORDS + argc as usize * ARG_WORDS;
        if len > avail || tail + len > REGION_WORDS {
            return Err(CallbackError::Truncated);
        }
        out.clear();
        for i in 0..len {
            out.push(self.slot(tail + i).load(Ordering::Acquire));
        }
        self.req[TAIL_SLOT].store(((tail + len) % REGION_WORDS) as i32, Ordering::Release);
        Ok(true)
    }

    /// Abandons everything pending by jumping the tail to the head.
    /// Consumer side; the escape hatch when a record fails to parse, since
    /// a corrupt length leaves no safe way to step past it.
    pub fn resync(&self) {
        self.req[TAIL_SLOT].store(self.head() as i32, Ordering::Release);
    }

    /// Copies a string into the arena, returning its (offset, length) words.
    /// Producer side.
    pub fn push_str(&self, value: &str) -> Result<(i32, i32), CallbackError> {
        let bytes = value.as_bytes();
        let cursor = self.str_cursor.load(Ordering::Relaxed);
        let free = CALLBACK_DATA_BUFFER_SIZE - cursor;
        if bytes.len() > free {
            return Err(CallbackError::ArenaFull {
                region: "string",
                needed: bytes.len(),
                free,
            });
        }
        // Safety: producer-only region per the struct invariant above.
        let data = unsafe { &mut *self.str_data.get() };
        data[cursor..cursor + bytes.len()].copy_from_slice(bytes);
        self.str_cursor
            .store(cursor + bytes.len(), Ordering::Relaxed);
        Ok((cursor as i32, bytes.len() as i32))
    }

    /// Reads a published string argument back out. Consumer side.
    pub fn read_str(&self, offset: i32, len: i32) -> Result<String, CallbackError> {
        let (offset, len) = region_bounds(offset, len, CALLBACK_DATA_BUFFER_SIZE)?;
        // Safety: the record referencing this range was published after the
        // bytes were written; see the struct invariant.
        let data = unsafe { &*self.str_data.get() };
        std::str::from_utf8(&data[offset..offset + len])
            .map(str::to_owned)
            .map_err(|_| CallbackError::Utf8)
    }

    /// Copies an f64 slice into the arena, returning its (offset, length)
    /// words. Producer side.
    pub fn push_f64s(&self, values: &[f64]) -> Result<(i32, i32), CallbackError> {
        let cursor = self.f64_cursor.load(Ordering::Relaxed);
        let free = CALLBACK_DATA_BUFFER_SIZE - cursor;
        if values.len() > free {
            return Err(CallbackError::ArenaFull {
                region: "f64",
                needed: values.len(),
                free,
            });
        }
        // Safety: producer-only region per the struct invariant above.
        let data = unsafe { &mut *self.f64_data.get() };
        data[cursor..cursor + values.len()].copy_from_slice(values);
        self.f64_cursor
            .store(cursor + values.len(), Ordering::Relaxed);
        Ok((cursor as i32, values.len() as i32))
    }

    /// Reads a published f64 argument back out. Consumer side.
    pub fn read_f64s(&self, offset: i32, len: i32) -> Result<Vec<f64>, CallbackError> {
        let (offset, len) = region_bounds(offset, len, CALLBACK_DATA_BUFFER_SIZE)?;
        // Safety: see `read_str`.
        let data = unsafe { &*self.f64_data.get() };
        Ok(data[offset..offset + len].to_vec())
    }
}

impl Default for CallbackBuffers {
    fn default() -> Self {
        Self::new()
    }
}

fn region_bounds(offset: i32, len: i32, size: usize) -> Result<(usize, usize), CallbackError> {
    if offset < 0 || len < 0 {
        return Err(CallbackError::OutOfBounds);
    }
    let (offset, len) = (offset as usize, len as usize);
    if offset + len > size {
        return Err(CallbackError::OutOfBounds);
    }
    Ok((offset, len))
}
