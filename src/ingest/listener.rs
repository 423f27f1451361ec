//! UDP listener bank
//!
//! One socket per configured port. Each socket has a receive task that
//! copies datagrams into that port's [`PacketQueue`], and a consumer task
//! that drains the queue into the [`Pipeline`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::{JoinError, JoinSet};

use super::pipeline::Pipeline;
use super::queue::{PacketQueue, QueueError};
use crate::config::{CollectorConfig, ConfigError};
use crate::stats::IngestCounters;
use crate::supervisor::ShutdownSignal;

struct PortListener {
    socket: Arc<UdpSocket>,
    queue: Arc<PacketQueue>,
}

pub struct ListenerBank {
    pipeline: Pipeline,
    ports: Vec<PortListener>,
    buffer_size: usize,
}

impl ListenerBank {
    /// Bind every port of the configured range
    pub async fn bind(config: &CollectorConfig, pipeline: Pipeline) -> Result<Self, IngestError> {
        config.validate()?;
        let mut ports = Vec::with_capacity(config.udp_port_count());

        for (port_offset, port) in config.udp_ports().enumerate() {
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let socket = UdpSocket::bind(addr)
                .await
                .map_err(|source| IngestError::Bind { port, source })?;

            tracing::debug!("UDP listener started on {}", socket.local_addr().unwrap_or(addr));

            ports.push(PortListener {
                socket: Arc::new(socket),
                queue: Arc::new(PacketQueue::new(
                    port_offset,
                    config.queue_capacity,
                    Arc::clone(pipeline.counters()),
                )),
            });
        }

        Ok(Self {
            pipeline,
            ports,
            buffer_size: config.buffer_size,
        })
    }

    /// Addresses actually bound, in port order
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.ports
            .iter()
            .filter_map(|p| p.socket.local_addr().ok())
            .collect()
    }

    /// Receive and process packets until shutdown
    ///
    /// On shutdown the receive tasks stop first, then the queues close and
    /// the consumers finish whatever was already buffered. If any task ends
    /// on its own before shutdown the remaining ones are aborted and an
    /// error is returned so the supervisor can rebuild the bank.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<(), IngestError> {
        let mut receivers = JoinSet::new();
        let mut consumers = JoinSet::new();
        let mut queues = Vec::with_capacity(self.ports.len());

        for port in self.ports {
            receivers.spawn(receive_loop(
                port.socket,
                Arc::clone(&port.queue),
                Arc::clone(self.pipeline.counters()),
                self.buffer_size,
                shutdown.clone(),
            ));
            consumers.spawn(consume_loop(Arc::clone(&port.queue), self.pipeline.clone()));
            queues.push(port.queue);
        }

        let ended = tokio::select! {
            biased;
            _ = shutdown.wait() => None,
            Some(result) = receivers.join_next() => Some(IngestError::task_ended("receiver", result)),
            Some(result) = consumers.join_next() => Some(IngestError::task_ended("consumer", result)),
        };

        // Receivers stop on their own once shutdown is triggered.
        if let Some(err) = ended {
            if !shutdown.is_triggered() {
                return Err(err);
            }
        }

        while let Some(result) = receivers.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "UDP receiver ended abnormally");
            }
        }
        for queue in &queues {
            queue.close();
        }
        while let Some(result) = consumers.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Packet consumer ended abnormally");
            }
        }

        tracing::info!("UDP listeners stopped");
        Ok(())
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    queue: Arc<PacketQueue>,
    counters: Arc<IngestCounters>,
    buffer_size: usize,
    mut shutdown: ShutdownSignal,
) {
    let port_offset = queue.port_offset();
    let mut buffer = vec![0u8; buffer_size];

    loop {
        let len = tokio::select! {
            _ = shutdown.wait() => break,
            result = socket.recv_from(&mut buffer) => match result {
                Ok((len, _from)) => len,
                Err(e) => {
                    tracing::trace!(port_offset, error = %e, "UDP read failed");
                    continue;
                }
            },
        };

        let packet = buffer[..len].to_vec();
        tracing::trace!(port_offset, packet = %String::from_utf8_lossy(&packet), "Packet received");

        counters.packets_captured.increment();
        match queue.push(packet) {
            Ok(()) => {}
            Err(e @ QueueError::Overflow { .. }) => {
                tracing::debug!(port_offset, error = %e, "Packet queue overflow");
            }
            Err(e @ QueueError::Closed { .. }) => {
                // Never handed to a consumer, so it was not captured either
                counters.packets_captured.decrement();
                tracing::debug!(port_offset, error = %e, "Packet dropped");
                break;
            }
        }
    }
}

async fn consume_loop(queue: Arc<PacketQueue>, pipeline: Pipeline) {
    let port_offset = queue.port_offset();
    while let Some(packet) = queue.pop().await {
        pipeline.process_packet(port_offset, packet);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Error listening on UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid listener configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("UDP {task} task ended unexpectedly: {reason}")]
    TaskEnded { task: &'static str, reason: String },
}

impl IngestError {
    fn task_ended(task: &'static str, result: Result<(), JoinError>) -> Self {
        let reason = match result {
            Ok(()) => "returned".to_string(),
            Err(e) => e.to_string(),
        };
        IngestError::TaskEnded { task, reason }
    }
}
