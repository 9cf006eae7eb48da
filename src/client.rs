//! Job queue and worker pool
//!
//! Callers submit jobs into one FIFO queue; a fixed set of worker tasks
//! pull from it, ask the scheduler for an endpoint, run the request and
//! either resolve the caller's [`JobHandle`] or push the job back onto the
//! tail of the queue.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::BlasterConfig;
use crate::endpoint::{EndpointReport, EndpointState};
use crate::error::Error;
use crate::executor::RequestExecutor;
use crate::providers::azure::{AzureClient, AzureExecutor};
use crate::request::{ChatMessage, RequestOptions};
use crate::scheduler::WeightedScheduler;

/// What a job eventually resolves to
pub type ChatReply = Result<String, Error>;

/// Internal representation of a single chat request
struct Job
{   messages: Vec<ChatMessage>
  , options: RequestOptions
  , reply: Option<oneshot::Sender<ChatReply>>
  , /// Failed attempts so far
    retry_count: u32
}

impl Job
{   /// Resolved, or the caller cancelled/dropped its handle
    fn is_resolved(&self) -> bool
    {   self.reply.as_ref().map_or(true, |tx| tx.is_closed())
    }

    fn resolve(&mut self, result: ChatReply)
    {   if let Some(tx) = self.reply.take()
        {   if tx.send(result).is_err()
            {   trace!("Caller dropped its handle before resolution");
            }
        }
    }
}

/// Caller side of a submitted job.
///
/// Await it for the response. Dropping or [`cancel`](Self::cancel)ing it
/// makes workers skip the job; a request already in flight still runs.
/// Resolves to [`Error::JobAbandoned`] if the job is dropped unresolved,
/// e.g. left in the queue when the dispatcher goes away.
#[derive(Debug)]
pub struct JobHandle
{   reply_rx: oneshot::Receiver<ChatReply>
}

impl JobHandle
{   /// Tell the dispatcher the result is no longer wanted
    pub fn cancel(&mut self)
    {   self.reply_rx.close();
    }

    /// The result if already available, without waiting
    pub fn try_result(&mut self) -> Option<ChatReply>
    {   match self.reply_rx.try_recv()
        {   Ok(result) => Some(result)
          , Err(oneshot::error::TryRecvError::Empty) => None
          , Err(oneshot::error::TryRecvError::Closed) => {
              Some(Err(Error::JobAbandoned))
            }
        }
    }

    /// Block the current thread until the job resolves.
    /// Must not be called from within the async runtime.
    pub fn blocking_wait(self) -> ChatReply
    {   self.reply_rx
          .blocking_recv()
          .unwrap_or(Err(Error::JobAbandoned))
    }
}

impl Future for JobHandle
{   type Output = ChatReply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>)
      -> Poll<Self::Output>
    {   Pin::new(&mut self.reply_rx)
          .poll(cx)
          .map(|r| r.unwrap_or(Err(Error::JobAbandoned)))
    }
}

/// State shared between the dispatcher and its workers
struct Shared<C>
{   scheduler: WeightedScheduler<C>
  , executor: Arc<dyn RequestExecutor<C>>
  , queue_tx: mpsc::UnboundedSender<Job>
  , queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>
  , max_job_retry: u32
}

/// Multi-endpoint, multi-worker chat completion dispatcher.
///
/// The caller does not choose which endpoint or which worker handles a
/// request; scheduling, cooldowns and retries are handled internally.
pub struct Blaster<C>
{   shared: Arc<Shared<C>>
  , stop_tx: watch::Sender<bool>
  , closed: AtomicBool
  , workers: Mutex<Vec<JoinHandle<()>>>
}

impl<C> Blaster<C>
where
  C: Send + Sync + 'static
{   /// Spawn `num_workers` workers over `endpoints`.
    /// Must be called from within a tokio runtime.
    pub fn new(
      endpoints: Vec<Arc<EndpointState<C>>>
    , executor: Arc<dyn RequestExecutor<C>>
    , num_workers: usize
    , max_job_retry: u32
    ) -> Result<Self, Error>
    {   if endpoints.is_empty()
        {   return Err(Error::InvalidConfiguration(
              "Blaster requires at least one endpoint".to_string()
            ));
        }
        if num_workers == 0
        {   return Err(Error::InvalidConfiguration(
              "Blaster requires at least one worker".to_string()
            ));
        }
        debug!(
          "Creating Blaster with {} endpoints and {} workers",
          endpoints.len(),
          num_workers
        );

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let shared = Arc::new(Shared
        {   scheduler: WeightedScheduler::new(endpoints)
          , executor
          , queue_tx
          , queue_rx: tokio::sync::Mutex::new(queue_rx)
          , max_job_retry: max_job_retry.max(1)
        });

        let workers = (0..num_workers)
          .map(|id| {
            let shared = Arc::clone(&shared);
            let stop_rx = stop_rx.clone();
            tokio::spawn(async move {
              run_worker(id, shared, stop_rx).await
            })
          })
          .collect();

        Ok(Blaster
        {   shared
          , stop_tx
          , closed: AtomicBool::new(false)
          , workers: Mutex::new(workers)
        })
    }

    /// Queue a chat completion - returns immediately
    pub fn submit_chat_completion(
      &self
    , messages: Vec<ChatMessage>
    , options: RequestOptions
    ) -> Result<JobHandle, Error>
    {   if self.is_closed()
        {   return Err(Error::DispatcherClosed);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job
        {   messages
          , options
          , reply: Some(reply_tx)
          , retry_count: 0
        };
        self.shared.queue_tx
          .send(job)
          .map_err(|_| {
            error!("Job queue closed");
            Error::DispatcherClosed
          })?;
        Ok(JobHandle { reply_rx })
    }

    /// Submit a chat completion and wait for its result
    pub async fn chat_completion(
      &self
    , messages: Vec<ChatMessage>
    , options: RequestOptions
    ) -> ChatReply
    {   self.submit_chat_completion(messages, options)?.await
    }

    /// Signal all workers to stop and optionally wait for them.
    ///
    /// Does NOT drain the queue: pending jobs are never processed and
    /// their handles are not resolved by this call.
    pub async fn close(&self, wait: bool)
    {   if !self.closed.swap(true, Ordering::AcqRel)
        {   info!("Closing Blaster");
            self.stop_tx.send_replace(true);
        }
        if !wait
        {   return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers
        {   if let Err(e) = worker.await
            {   error!("Worker ended abnormally: {}", e);
            }
        }
        debug!("All workers stopped");
    }

    pub fn is_closed(&self) -> bool
    {   self.closed.load(Ordering::Acquire)
    }

    pub fn endpoints(&self) -> &[Arc<EndpointState<C>>]
    {   self.shared.scheduler.endpoints()
    }

    /// Snapshot of every endpoint
    pub fn report(&self) -> Vec<EndpointReport>
    {   self.endpoints().iter().map(|ep| ep.report()).collect()
    }
}

impl Blaster<AzureClient>
{   /// Build endpoints and workers from a parsed config.
    /// An explicit `num_workers` wins over the config value.
    pub fn from_config(
      config: &BlasterConfig
    , num_workers: Option<usize>
    ) -> Result<Self, Error>
    {   config.validate()?;
        let num_workers = match num_workers
        {   Some(n) => {
              if n != config.num_workers
              {   info!(
                    "Overriding Blaster num_workers with explicit \
                     argument. {} -> {}",
                    config.num_workers, n
                  );
              }
              n
            }
          , None => config.num_workers
        };
        let policy = config.failover.retry_policy()?;
        let endpoints = crate::registry::build_endpoint_states(config)?;
        let executor = Arc::new(AzureExecutor::new(policy.clone()));
        Blaster::new(
          endpoints,
          executor,
          num_workers,
          policy.max_job_retry
        )
    }

    /// Build from a JSON config file on disk
    pub fn from_config_file(
      path: impl AsRef<Path>
    , num_workers: Option<usize>
    ) -> Result<Self, Error>
    {   let config = BlasterConfig::from_file(path)?;
        Self::from_config(&config, num_workers)
    }
}

impl<C> std::fmt::Debug for Blaster<C>
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>)
      -> std::fmt::Result
    {   f.debug_struct("Blaster")
          .field("endpoints", &self.shared.scheduler.endpoints().len())
          .field("max_job_retry", &self.shared.max_job_retry)
          .field("closed", &self.closed.load(Ordering::Acquire))
          .finish()
    }
}

impl<C> Drop for Blaster<C>
{   fn drop(&mut self)
    {   self.stop_tx.send_replace(true);
    }
}

/// Worker main loop: pull jobs, route to an endpoint, handle retry
async fn run_worker<C>(
  id: usize
, shared: Arc<Shared<C>>
, mut stop_rx: watch::Receiver<bool>
)
where
  C: Send + Sync + 'static
{   debug!("blaster-worker-{}: started", id);

    loop
    {   if *stop_rx.borrow()
        {   break;
        }
        let job = tokio::select!
        {   biased;
            _ = stop_rx.changed() => break,
            job = next_job(&shared.queue_rx) => job,
        };
        match job
        {   Some(job) => {
              debug!("blaster-worker-{}: processing job", id);
              handle_job(&shared, job, &mut stop_rx).await;
              debug!("blaster-worker-{}: job done", id);
            }
          , None => {
              debug!("blaster-worker-{}: queue closed", id);
              break;
            }
        }
    }

    debug!("blaster-worker-{}: stopped", id);
}

async fn next_job(
  queue_rx: &tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>
) -> Option<Job>
{   queue_rx.lock().await.recv().await
}

/// Process a single job using the scheduler and the executor
async fn handle_job<C>(
  shared: &Shared<C>
, mut job: Job
, stop_rx: &mut watch::Receiver<bool>
)
where
  C: Send + Sync + 'static
{   // Caller cancelled or dropped the handle
    if job.is_resolved()
    {   debug!("Job already resolved; skipping");
        return;
    }

    let endpoint = tokio::select!
    {   biased;
        _ = stop_rx.changed() => {
          debug!("Stop requested while waiting for an endpoint");
          return;
        }
        scheduled = shared.scheduler.next() => match scheduled
        {   Ok(endpoint) => endpoint
          , Err(e) => {
              error!("Cannot schedule job: {}", e);
              job.resolve(Err(e));
              return;
            }
        },
    };

    let result = shared.executor
      .invoke(&endpoint, &job.messages, &job.options)
      .await;

    if result.ok
    {   job.resolve(Ok(result.response.unwrap_or_default()));
        return;
    }

    job.retry_count += 1;
    if job.retry_count >= shared.max_job_retry
    {   warn!(
          "Job deemed problematic after {} tries; surfacing error",
          job.retry_count
        );
        let err = result.error
          .unwrap_or(Error::RetriesExhausted(job.retry_count));
        job.resolve(Err(err));
        return;
    }

    if result.retryable
    {   // Back onto the tail; cooldowns throttle the next attempt
        debug!(
          "Requeueing job after failed attempt {} on {}",
          job.retry_count,
          endpoint.name()
        );
        if shared.queue_tx.send(job).is_err()
        {   error!("Job queue closed; dropping retried job");
        }
        return;
    }

    let err = result.error.unwrap_or_else(|| {
      Error::Other(
        "LLM request failed without an explicit error".to_string()
      )
    });
    job.resolve(Err(err));
}
