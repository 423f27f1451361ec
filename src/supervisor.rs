//! Supervision of long-running tasks
//!
//! Each supervised task is launched from a factory. When a run returns an
//! error or panics, the failure is logged and a fresh run is started after
//! a short delay. A clean `Ok(())` or a shutdown ends supervision of that
//! task without touching its siblings.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Result of one run of a supervised task
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Shutdown notification handed to every supervised run
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown has been requested (or the supervisor is gone)
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Owner of the collector's long-running tasks
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
    restart_delay: Duration,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_restart_delay(DEFAULT_RESTART_DELAY)
    }

    pub fn with_restart_delay(restart_delay: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
            restart_delay,
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Supervise a task built by `factory`
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(ShutdownSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let mut shutdown = self.shutdown_signal();
        let restart_delay = self.restart_delay;

        let handle = tokio::spawn(async move {
            let mut runs: u64 = 0;

            while !shutdown.is_triggered() {
                runs += 1;
                let run = tokio::spawn(factory(shutdown.clone()));

                match run.await {
                    Ok(Ok(())) => {
                        tracing::info!(task = %task_name, "Task stopped");
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::error!(task = %task_name, run = runs, error = %e, "Task failed, restarting");
                    }
                    Err(e) if e.is_panic() => {
                        tracing::error!(task = %task_name, run = runs, error = %e, "Task panicked, restarting");
                    }
                    Err(e) => {
                        tracing::warn!(task = %task_name, error = %e, "Task cancelled");
                        break;
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(restart_delay) => {}
                    _ = shutdown.wait() => break,
                }
            }
        });

        self.tasks.push((name, handle));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every task to stop and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(task = %name, error = %e, "Supervisor for task ended abnormally");
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
