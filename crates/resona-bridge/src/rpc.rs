//! Callback RPC plumbing: uid allocation, the host-side return queue, and
//! the record codec over the shared callback buffers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use resona_engine::{ApiArg, ApiValue, Opcode};
use resona_rt::callback::{
    CallbackBuffers, CallbackError, MAX_CALL_ARGS, TAG_DOUBLE, TAG_F64_ARRAY, TAG_INT, TAG_STR,
};

/// Monotonic request uids. Wrapping is harmless: a uid only has to be unique
/// among in-flight calls.
#[derive(Debug, Default)]
pub struct UidAllocator {
    next: AtomicI32,
}

impl UidAllocator {
    pub fn next(&self) -> i32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Host-side mapping from request uid to its pending completion. Populated
/// on enqueue, cleared on reply.
#[derive(Default)]
pub struct ReturnQueue {
    pending: Mutex<HashMap<i32, Sender<ApiValue>>>,
}

impl ReturnQueue {
    /// Registers a completion and returns the token the caller blocks on.
    pub fn register(&self, uid: i32) -> PendingCall {
        let (tx, rx) = bounded(1);
        self.pending.lock().insert(uid, tx);
        PendingCall { uid, rx }
    }

    /// Fulfills and removes one completion. Returns `false` for unknown
    /// uids (already fulfilled, or never registered).
    pub fn fulfill(&self, uid: i32, value: ApiValue) -> bool {
        match self.pending.lock().remove(&uid) {
            Some(tx) => {
                // A dropped receiver just means the caller gave up waiting.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    /// Fulfills every outstanding completion with a terminal error. Called
    /// when the performance ends so no caller dangles.
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(ApiValue::error(reason));
        }
    }

    /// Outstanding completions, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registered completion token.
pub struct PendingCall {
    uid: i32,
    rx: Receiver<ApiValue>,
}

impl PendingCall {
    pub fn uid(&self) -> i32 {
        self.uid
    }

    /// Blocks until the reply arrives. A disconnected channel (worker gone)
    /// degrades to a tagged error, matching every other RPC failure.
    pub fn wait(self) -> ApiValue {
        self.rx
            .recv()
            .unwrap_or_else(|_| ApiValue::error("reply channel disconnected"))
    }
}

/// Encodes one request into the shared callback buffers.
///
/// Arena space consumed by a request that then fails to enqueue is not
/// rolled back; it is reclaimed with the rest of the arena once the ring
/// drains empty.
pub fn encode_request(
    bufs: &CallbackBuffers,
    uid: i32,
    op: Opcode,
    args: &[ApiArg],
) -> Result<(), CallbackError> {
    if args.len() > MAX_CALL_ARGS {
        return Err(CallbackError::Truncated);
    }
    bufs.reclaim_if_drained();
    let mut words = Vec::with_capacity(3 + args.len() * 3);
    words.extend_from_slice(&[uid, op.code(), args.len() as i32]);
    for arg in args {
        match arg {
            ApiArg::Int(v) => words.extend_from_slice(&[TAG_INT, *v, 0]),
            ApiArg::Double(v) => {
                let (offset, len) = bufs.push_f64s(std::slice::from_ref(v))?;
                words.extend_from_slice(&[TAG_DOUBLE, offset, len]);
            }
            ApiArg::Str(s) => {
                let (offset, len) = bufs.push_str(s)?;
                words.extend_from_slice(&[TAG_STR, offset, len]);
            }
            ApiArg::DoubleArray(values) => {
                let (offset, len) = bufs.push_f64s(values)?;
                words.extend_from_slice(&[TAG_F64_ARRAY, offset, len]);
            }
        }
    }
    bufs.enqueue_record(&words)
}

/// Decodes one popped record. The uid is always recoverable; argument or
/// opcode problems come back as the error string to reply with.
pub fn decode_record(
    bufs: &CallbackBuffers,
    words: &[i32],
) -> (i32, Result<(Opcode, Vec<ApiArg>), String>) {
    let uid = words[0];
    let op = match Opcode::from_code(words[1]) {
        Some(op) => op,
        None => return (uid, Err(format!("unknown opcode {}", words[1]))),
    };
    let argc = words[2] as usize;
    let mut args = Vec::with_capacity(argc);
    for index in 0..argc {
        let base = 3 + index * 3;
        let (tag, a, b) = (words[base], words[base + 1], words[base + 2]);
        let arg = match tag {
            TAG_INT => Ok(ApiArg::Int(a)),
            TAG_DOUBLE => bufs
                .read_f64s(a, b)
                .map_err(|err| err.to_string())
                .and_then(|values| {
                    values
                        .first()
                        .copied()
                        .map(ApiArg::Double)
                        .ok_or_else(|| "empty double argument".to_owned())
                }),
            TAG_STR => bufs
                .read_str(a, b)
                .map(ApiArg::Str)
                .map_err(|err| err.to_string()),
            TAG_F64_ARRAY => bufs
                .read_f64s(a, b)
                .map(ApiArg::DoubleArray)
                .map_err(|err| err.to_string()),
            other => Err(format!("unknown argument tag {other}")),
        };
        match arg {
            Ok(arg) => args.push(arg),
            Err(message) => return (uid, Err(message)),
        }
    }
    (uid, Ok((op, args)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_trip_through_the_ring() {
        let bufs = CallbackBuffers::new();
        let args = vec![
            ApiArg::Str("masterGain".into()),
            ApiArg::Double(0.8),
            ApiArg::Int(7),
            ApiArg::DoubleArray(vec![1.0, 2.0, 3.0]),
        ];
        encode_request(&bufs, 42, Opcode::SetControlChannel, &args).unwrap();

        let mut words = Vec::new();
        assert!(bufs.pop_record(&mut words).unwrap());
        let (uid, decoded) = decode_record(&bufs, &words);
        assert_eq!(uid, 42);
        let (op, decoded_args) = decoded.unwrap();
        assert_eq!(op, Opcode::SetControlChannel);
        assert_eq!(decoded_args, args);
    }

    #[test]
    fn unknown_opcode_keeps_the_uid() {
        let bufs = CallbackBuffers::new();
        bufs.enqueue_record(&[9, 999, 0]).unwrap();
        let mut words = Vec::new();
        assert!(bufs.pop_record(&mut words).unwrap());
        let (uid, decoded) = decode_record(&bufs, &words);
        assert_eq!(uid, 9);
        assert!(decoded.is_err());
    }

    #[test]
    fn oversized_arguments_fail_locally() {
        let bufs = CallbackBuffers::new();
        let huge = "x".repeat(resona_rt::constants::CALLBACK_DATA_BUFFER_SIZE + 1);
        let err = encode_request(&bufs, 1, Opcode::EvalCode, &[ApiArg::Str(huge)]).unwrap_err();
        assert!(matches!(err, CallbackError::ArenaFull { .. }));
        assert!(bufs.is_empty());
    }

    #[test]
    fn return_queue_fulfills_exactly_once() {
        let queue = ReturnQueue::default();
        let pending = queue.register(5);
        assert!(queue.fulfill(5, ApiValue::Int(1)));
        assert!(!queue.fulfill(5, ApiValue::Int(2)));
        assert_eq!(pending.wait(), ApiValue::Int(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn fail_all_leaves_no_dangling_completions() {
        let queue = ReturnQueue::default();
        let a = queue.register(1);
        let b = queue.register(2);
        queue.fail_all("performance ended");
        assert!(queue.is_empty());
        assert!(a.wait().is_error());
        assert!(b.wait().is_error());
    }
}
