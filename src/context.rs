//! Shared server services handed to every component.

use crate::dispatch::{Dispatcher, OutputSink, Scheduler};
use crate::runtime::{ConnectionRegistry, OutputMessagePool};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Network tunables resolved from configuration.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub server_name: String,
    /// Upper bound for one batched write.
    pub write_timeout: Duration,
    /// Idle read limit; `None` disables it.
    pub read_timeout: Option<Duration>,
    pub max_connections: usize,
    /// Buffers kept in the output pool's free list.
    pub output_pool_size: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            server_name: "taskline".to_string(),
            write_timeout: Duration::from_secs(30),
            read_timeout: None,
            max_connections: 10_000,
            output_pool_size: 64,
        }
    }
}

/// Owns the dispatcher, scheduler, output pool and connection registry.
pub struct ServerContext {
    settings: NetworkSettings,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
    output_pool: Arc<OutputMessagePool>,
    connections: ConnectionRegistry,
}

impl ServerContext {
    pub fn new(settings: NetworkSettings) -> Arc<Self> {
        let output_pool = OutputMessagePool::new(settings.output_pool_size);
        let sink: Arc<dyn OutputSink> = Arc::clone(&output_pool) as Arc<dyn OutputSink>;
        let dispatcher = Dispatcher::new(Some(sink));
        let scheduler = Scheduler::new(Arc::clone(&dispatcher));
        let connections = ConnectionRegistry::new(settings.max_connections);

        Arc::new(Self {
            settings,
            dispatcher,
            scheduler,
            output_pool,
            connections,
        })
    }

    /// Start the dispatcher and scheduler threads.
    pub fn start(&self) -> io::Result<()> {
        self.dispatcher.start()?;
        self.scheduler.start()?;
        info!(server_name = %self.settings.server_name, "Server context started");
        Ok(())
    }

    /// Stop taking new work; queued tasks and timers still run.
    pub fn stop(&self) {
        self.scheduler.stop();
        self.dispatcher.stop();
    }

    /// Join both worker threads. Blocks.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.dispatcher.shutdown();
        info!("Server context shut down");
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn output_pool(&self) -> &Arc<OutputMessagePool> {
        &self.output_pool
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatcherState;

    #[test]
    fn test_lifecycle() {
        let context = ServerContext::new(NetworkSettings::default());
        assert_eq!(context.dispatcher().state(), DispatcherState::Terminated);

        context.start().unwrap();
        assert_eq!(context.dispatcher().state(), DispatcherState::Running);
        assert_ne!(
            context
                .scheduler()
                .add_event(0, crate::dispatch::Task::new(|| {})),
            0
        );

        context.stop();
        assert_eq!(context.dispatcher().state(), DispatcherState::Closing);
        context.shutdown();
        assert_eq!(context.dispatcher().state(), DispatcherState::Terminated);
    }

    #[test]
    fn test_pool_sized_from_settings() {
        let settings = NetworkSettings {
            output_pool_size: 3,
            ..NetworkSettings::default()
        };
        let context = ServerContext::new(settings);
        assert_eq!(context.output_pool().available(), 3);
        assert_eq!(context.connections().capacity(), 10_000);
        assert!(context.connections().is_empty());
    }
}
