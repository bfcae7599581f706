//! Multi-process pool.
//!
//! The parent splits the task list into contiguous slices, one per worker
//! process, and re-executes a program (normally its own executable with a
//! hidden subcommand) for each slice. The protocol is plain JSON over pipes:
//!
//! - **stdin** (parent → child): one [`Batch`] document, then EOF.
//! - **stdout** (child → parent): one [`Reply`] per line, written as soon as
//!   each task finishes.
//!
//! Nothing but serialized values crosses the process boundary. Anything the
//! child needs to know about the run (override flags, for instance) travels
//! through the batch context or the environment set with [`ClusterPool::env`].

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::future::Future;
use std::ops::Range;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Work handed to a single worker process.
#[derive(Debug, Serialize, Deserialize)]
pub struct Batch<C, I> {
    /// Absolute index of `tasks[0]` in the parent's task list.
    pub offset: usize,
    /// In-process concurrency the worker should use.
    pub concurrency: usize,
    /// Shared, read-only data for every task in the batch.
    pub context: C,
    pub tasks: Vec<I>,
}

#[derive(Serialize)]
struct BatchRef<'a, C, I> {
    offset: usize,
    concurrency: usize,
    context: C,
    tasks: &'a [I],
}

/// Result of one task, keyed by its absolute index.
#[derive(Debug, Serialize, Deserialize)]
pub struct Reply<O> {
    pub index: usize,
    pub output: O,
}

/// A fixed-size group of worker processes.
#[derive(Debug, Clone)]
pub struct ClusterPool {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    workers: usize,
    worker_concurrency: usize,
}

impl ClusterPool {
    /// A pool that runs `program` once per slice, with one worker and a
    /// concurrency of one until configured otherwise.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            workers: 1,
            worker_concurrency: 1,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable on every worker process.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn worker_concurrency(&self) -> usize {
        self.worker_concurrency
    }

    /// Run every task on the worker processes, returning outputs in task
    /// order.
    ///
    /// `context` builds the shared context for each slice from the tasks in
    /// it, so workers only receive what their slice needs. A worker that
    /// dies or misbehaves costs the outputs it did not deliver (`None`), not
    /// the whole run; failing to start a worker at all is an error.
    pub async fn run<C, I, O>(&self, tasks: &[I], context: impl Fn(&[I]) -> C) -> Result<Vec<Option<O>>>
    where
        C: Serialize,
        I: Serialize,
        O: DeserializeOwned,
    {
        let slices = partition(tasks.len(), self.workers);
        let mut children = Vec::with_capacity(slices.len());
        for slice in slices {
            let batch = BatchRef {
                offset: slice.start,
                concurrency: self.worker_concurrency,
                context: context(&tasks[slice.clone()]),
                tasks: &tasks[slice.clone()],
            };
            let payload = serde_json::to_vec(&batch).or_raise(|| ErrorKind::Protocol)?;
            let child = self.spawn()?;
            tracing::debug!(pid = child.id(), start = slice.start, end = slice.end, "Spawned worker process");
            children.push((child, payload, slice));
        }

        let mut outputs: Vec<Option<O>> = tasks.iter().map(|_| None).collect();
        let replies = join_all(children.into_iter().map(|(child, payload, slice)| drive::<O>(child, payload, slice))).await;
        for (index, output) in replies.into_iter().flatten() {
            outputs[index] = Some(output);
        }
        let missing = outputs.iter().filter(|o| o.is_none()).count();
        if missing > 0 {
            tracing::warn!(missing, "Worker processes did not report every task");
        }
        Ok(outputs)
    }

    fn spawn(&self) -> Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .or_raise(|| ErrorKind::Spawn(self.program.display().to_string()))
    }
}

/// Feed one worker its batch and collect its replies. Any failure here is
/// logged and ends collection for this worker only.
async fn drive<O: DeserializeOwned>(mut child: Child, payload: Vec<u8>, slice: Range<usize>) -> Vec<(usize, O)> {
    let pid = child.id();
    let mut replies = Vec::new();
    let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        tracing::error!(pid, "Worker process has no pipes");
        return replies;
    };
    let written = async {
        stdin.write_all(&payload).await?;
        stdin.shutdown().await
    }
    .await;
    // Closing stdin is the end-of-batch marker.
    drop(stdin);
    if let Err(e) = written {
        tracing::error!(pid, error = %e, "Failed to send batch to worker");
    }

    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {},
            Ok(Some(line)) => match serde_json::from_str::<Reply<O>>(&line) {
                Ok(reply) if slice.contains(&reply.index) => replies.push((reply.index, reply.output)),
                Ok(reply) => tracing::warn!(pid, index = reply.index, "Worker replied for a task outside its slice"),
                Err(e) => tracing::warn!(pid, error = %e, "Ignoring malformed worker reply"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::error!(pid, error = %e, "Failed to read worker output");
                break;
            },
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => tracing::debug!(pid, replies = replies.len(), "Worker finished"),
        Ok(status) => tracing::error!(pid, %status, "Worker exited unsuccessfully"),
        Err(e) => tracing::error!(pid, error = %e, "Failed to wait for worker"),
    }
    replies
}

/// Split `0..total` into at most `workers` contiguous, non-empty ranges whose
/// lengths differ by at most one.
pub fn partition(total: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1).min(total);
    if workers == 0 {
        return Vec::new();
    }
    let (base, extra) = (total / workers, total % workers);
    let mut start = 0;
    (0..workers)
        .map(|w| {
            let len = base + usize::from(w < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

/// Worker side of the protocol, on the process's own stdin and stdout.
pub async fn serve<C, I, O, F, Fut>(task: F) -> Result<()>
where
    C: DeserializeOwned,
    I: DeserializeOwned,
    O: Serialize,
    F: Fn(&C, &I) -> Fut,
    Fut: Future<Output = O>,
{
    serve_with(tokio::io::stdin(), tokio::io::stdout(), task).await
}

/// Read one [`Batch`] from `reader`, run it through the in-process pool and
/// write a [`Reply`] line to `writer` as each task completes.
pub async fn serve_with<R, W, C, I, O, F, Fut>(mut reader: R, writer: W, task: F) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    C: DeserializeOwned,
    I: DeserializeOwned,
    O: Serialize,
    F: Fn(&C, &I) -> Fut,
    Fut: Future<Output = O>,
{
    let mut input = Vec::new();
    reader.read_to_end(&mut input).await.or_raise(|| ErrorKind::Io)?;
    let batch: Batch<C, I> = serde_json::from_slice(&input).or_raise(|| ErrorKind::Protocol)?;
    tracing::debug!(offset = batch.offset, tasks = batch.tasks.len(), "Worker received batch");

    let writer = Mutex::new(writer);
    let offset = batch.offset;
    let (context, tasks, task, writer) = (&batch.context, &batch.tasks, &task, &writer);
    let written = crate::run(tasks.len(), batch.concurrency, |i| async move {
        let output = task(context, &tasks[i]).await;
        let mut line = serde_json::to_vec(&Reply {
            index: offset + i,
            output,
        })
        .or_raise(|| ErrorKind::Protocol)?;
        line.push(b'\n');
        let mut writer = writer.lock().await;
        writer.write_all(&line).await.or_raise(|| ErrorKind::Io)?;
        writer.flush().await.or_raise(|| ErrorKind::Io)
    })
    .await;
    written.into_iter().collect()
}
