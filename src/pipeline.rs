use std::collections::VecDeque;
use std::io::BufRead;
use std::mem;
use std::panic;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::trace;

use crate::core::CoreParser;
use crate::error::Result;

/// Target size of one chunk handed to the parser worker.
pub(crate) const FEED_CHUNK_SIZE: usize = 1 << 20;

/// How many chunks the reader side may run ahead of the parser before it
/// blocks. Bounds memory on fast-disk / slow-parse workloads.
pub(crate) const FEED_QUEUE_CAP: usize = 8;

/// Bounded FIFO of owned chunks, terminated by a `None` sentinel.
///
/// A single mutex guards the deque and a single condition variable covers
/// both "chunk available" and "capacity available": only two threads ever
/// touch the queue, and it cannot be full and empty at the same time.
struct FeedQueue {
    chunks: Mutex<VecDeque<Option<Vec<u8>>>>,
    signal: Condvar,
}

impl FeedQueue {
    fn new() -> Self {
        Self {
            chunks: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
        }
    }

    fn push(&self, chunk: Vec<u8>) {
        let mut chunks = self.chunks.lock().unwrap();

        while chunks.len() >= FEED_QUEUE_CAP {
            chunks = self.signal.wait(chunks).unwrap();
        }

        chunks.push_back(Some(chunk));
        self.signal.notify_one();
    }

    /// Enqueue the end-of-input sentinel. Exempt from the capacity bound so
    /// shutdown can never block.
    fn close(&self) {
        let mut chunks = self.chunks.lock().unwrap();

        chunks.push_back(None);
        self.signal.notify_one();
    }

    fn pop(&self) -> Option<Vec<u8>> {
        let mut chunks = self.chunks.lock().unwrap();

        loop {
            if let Some(chunk) = chunks.pop_front() {
                self.signal.notify_one();
                return chunk;
            }

            chunks = self.signal.wait(chunks).unwrap();
        }
    }
}

/// Run one read pass: the calling thread pulls source lines into chunks of
/// roughly [`FEED_CHUNK_SIZE`] bytes and feeds the queue, while a spawned
/// worker drains the queue into the parser. Lines are the chunking unit so
/// a `max_lines` budget can be honored exactly.
///
/// Returns the parser (moved back from the worker), whether the source hit
/// end-of-file, and the first error encountered; reader I/O errors win
/// over worker parse errors. A worker panic is resumed on this thread.
pub(crate) fn drive<R: BufRead>(
    input: &mut R,
    parser: CoreParser,
    max_lines: Option<u64>,
) -> (CoreParser, bool, Result<()>) {
    let queue = Arc::new(FeedQueue::new());
    let worker_queue = Arc::clone(&queue);

    let worker = thread::spawn(move || {
        let mut parser = parser;
        let mut result = Ok(());

        while let Some(chunk) = worker_queue.pop() {
            if result.is_ok() {
                result = parser.feed(&chunk);
            }
            // After an error, keep draining to the sentinel so the reader
            // side can never block on a full queue.
        }

        (parser, result)
    });

    let mut io_result = Ok(());
    let mut eof = false;
    let mut lines: u64 = 0;
    let mut pushed: u64 = 0;
    let mut chunk: Vec<u8> = Vec::with_capacity(FEED_CHUNK_SIZE);

    loop {
        if max_lines.is_some_and(|budget| lines >= budget) {
            break;
        }

        match input.read_until(b'\n', &mut chunk) {
            Ok(0) => {
                eof = true;
                break;
            }
            Ok(_) => lines += 1,
            Err(err) => {
                io_result = Err(err.into());
                break;
            }
        }

        if chunk.len() >= FEED_CHUNK_SIZE {
            queue.push(mem::replace(&mut chunk, Vec::with_capacity(FEED_CHUNK_SIZE)));
            pushed += 1;
        }
    }

    // Flush the partial chunk, then the sentinel, unconditionally: the
    // worker must always see end-of-input.
    if !chunk.is_empty() {
        queue.push(chunk);
        pushed += 1;
    }
    queue.close();

    trace!(chunks = pushed, lines, eof, "feed queue closed");

    let (parser, worker_result) = match worker.join() {
        Ok(output) => output,
        Err(payload) => panic::resume_unwind(payload),
    };

    (parser, eof, io_result.and(worker_result))
}
