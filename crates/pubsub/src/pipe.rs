//! 1→1 channel bridge with linked close.

use std::sync::Arc;

use sync_utils::Mutexed;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Channel;

/// Options controlling a [`Pipe`]'s buffering and close linkage.
#[derive(Debug, Clone, Copy)]
pub struct PipeOptions {
    /// Capacity of the input channel (when the pipe allocates it).
    ///
    /// Capacities are clamped to ≥ 1, so a send into the input can succeed
    /// for a message that is never forwarded if the pipe closes first.
    pub input_capacity: usize,
    /// Capacity of the output channel (when the pipe allocates it).
    pub output_capacity: usize,
    /// Close the input channel when the pipe closes.
    pub close_input: bool,
    /// Close the output channel when the pipe closes.
    pub close_output: bool,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            input_capacity: 1,
            output_capacity: 1,
            close_input: true,
            close_output: true,
        }
    }
}

/// A bridge that forwards messages from an input channel to an output
/// channel until either endpoint closes or the pipe itself is closed,
/// whichever happens first; the close then propagates to the other side
/// according to the [`PipeOptions`].
pub struct Pipe<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    input: Channel<T>,
    output: Channel<T>,
    opts: PipeOptions,
    done: CancellationToken,
    forwarder: Mutexed<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Inner<T> {
    // Idempotent; called both from `close` and from the forwarder on exit,
    // so an endpoint closing tears the pipe down without anyone calling
    // `close` explicitly.
    fn close_endpoints(&self) {
        self.done.cancel();
        if self.opts.close_input {
            self.input.close();
        }
        if self.opts.close_output {
            self.output.close();
        }
    }
}

impl<T: Send + 'static> Pipe<T> {
    /// Create a pipe with fresh input and output channels and default
    /// options, returning `(input, output, pipe)`.
    pub fn new() -> (Channel<T>, Channel<T>, Self) {
        Self::with_options(PipeOptions::default())
    }

    /// Create a pipe with fresh channels sized per the options.
    pub fn with_options(opts: PipeOptions) -> (Channel<T>, Channel<T>, Self) {
        let input = Channel::new(opts.input_capacity);
        let output = Channel::new(opts.output_capacity);
        let pipe = Self::between(input.clone(), output.clone(), opts);
        (input, output, pipe)
    }

    /// Bridge two existing channels.
    pub fn between(input: Channel<T>, output: Channel<T>, opts: PipeOptions) -> Self {
        let inner = Arc::new(Inner {
            input,
            output,
            opts,
            done: CancellationToken::new(),
            forwarder: Mutexed::new(None),
        });
        let task_inner = inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_inner.done.cancelled() => break,
                    _ = task_inner.output.closed() => break,
                    msg = task_inner.input.recv() => match msg {
                        Some(msg) => {
                            if !task_inner.output.send(msg).await {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            task_inner.close_endpoints();
        });
        inner.forwarder.set(Some(handle));
        Self { inner }
    }

    /// Close the pipe. Idempotent; waits for the forwarder to exit.
    pub async fn close(&self) {
        self.inner.close_endpoints();
        if let Some(handle) = self.inner.forwarder.locked(|f| f.take()) {
            let _ = handle.await;
        }
    }

    /// Whether the pipe has been closed (or torn down by an endpoint).
    pub fn is_closed(&self) -> bool {
        self.inner.done.is_cancelled()
    }
}
