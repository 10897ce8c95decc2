use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use super::{
    description::server::ServerDescription,
    topology::{TopologyCheckRequestReceiver, TopologyUpdater, TopologyWatcher},
};
use crate::{
    error::{Error, Result},
    event::{
        sdam::{
            SdamEvent,
            ServerHeartbeatFailedEvent,
            ServerHeartbeatStartedEvent,
            ServerHeartbeatSucceededEvent,
        },
        EventEmitter,
    },
    hello::{hello_command, HelloReply},
    options::{ClientMetadata, ServerAddress, TopologyOptions},
    runtime,
    transport::Transport,
};

pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(30);

pub(crate) const MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);

/// Weight of the latest sample in the round-trip-time moving average.
const RTT_SAMPLE_WEIGHT: f64 = 0.2;

/// Monitor that performs regular heartbeats to determine server status.
pub(crate) struct Monitor {
    address: ServerAddress,
    transport: Arc<dyn Transport>,
    topology_updater: TopologyUpdater,
    topology_watcher: TopologyWatcher,
    emitter: EventEmitter,
    topology_id: u64,
    check_request_receiver: TopologyCheckRequestReceiver,
    options: TopologyOptions,
    metadata: ClientMetadata,
    average_round_trip_time: Option<Duration>,
    hello_ok: Option<bool>,
}

impl Monitor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        address: ServerAddress,
        transport: Arc<dyn Transport>,
        topology_updater: TopologyUpdater,
        topology_watcher: TopologyWatcher,
        emitter: EventEmitter,
        topology_id: u64,
        check_request_receiver: TopologyCheckRequestReceiver,
        metadata: ClientMetadata,
        options: TopologyOptions,
    ) {
        let monitor = Self {
            address,
            transport,
            topology_updater,
            topology_watcher,
            emitter,
            topology_id,
            check_request_receiver,
            options,
            metadata,
            average_round_trip_time: None,
            hello_ok: None,
        };
        runtime::execute(monitor.execute())
    }

    async fn execute(mut self) {
        let heartbeat_frequency = self
            .options
            .heartbeat_freq
            .unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY);
        let min_frequency = self
            .options
            .min_heartbeat_freq
            .unwrap_or(MIN_HEARTBEAT_FREQUENCY);

        while self.is_alive() {
            self.check_server().await;

            runtime::delay_for(min_frequency).await;
            self.check_request_receiver
                .wait_for_check_request(heartbeat_frequency.saturating_sub(min_frequency))
                .await;
        }
    }

    fn is_alive(&self) -> bool {
        self.topology_watcher.is_alive() && self.topology_watcher.monitors_address(&self.address)
    }

    /// Checks the server by running a hello command. Network errors against a previously
    /// available server are retried once before the server is marked unknown.
    ///
    /// Returns true if the topology changed as a result of the check and false otherwise.
    async fn check_server(&mut self) -> bool {
        self.check_request_receiver.clear_check_requests();
        let mut retried = false;
        let check_result = match self.perform_hello().await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                let previous_description = self.topology_watcher.server_description(&self.address);
                if e.is_network_error()
                    && previous_description
                        .map(|sd| sd.is_available())
                        .unwrap_or(false)
                {
                    self.handle_error(e).await;
                    retried = true;
                    self.perform_hello().await
                } else {
                    Err(e)
                }
            }
        };

        match check_result {
            Ok(reply) => {
                let server_description = ServerDescription::new_from_hello_reply(
                    self.address.clone(),
                    reply,
                    self.average_round_trip_time.unwrap_or_default(),
                );
                self.topology_updater.update(server_description).await
            }
            Err(e) => self.handle_error(e).await || retried,
        }
    }

    async fn perform_hello(&mut self) -> Result<HelloReply> {
        self.emitter
            .emit(SdamEvent::ServerHeartbeatStarted(ServerHeartbeatStartedEvent {
                server_address: self.address.clone(),
                topology_id: self.topology_id,
            }));

        let command = hello_command(
            self.hello_ok,
            Some(&self.metadata),
            self.options.compressors.as_deref(),
        );

        let start = Instant::now();
        let result = self.transport.hello(&self.address, command).await;
        let duration = start.elapsed();

        match result {
            Ok(ref reply) => {
                self.hello_ok = reply.command_response.hello_ok;
                self.update_average_rtt(duration);
                self.emitter.emit(SdamEvent::ServerHeartbeatSucceeded(
                    ServerHeartbeatSucceededEvent {
                        duration,
                        reply: reply.command_response.clone(),
                        server_address: self.address.clone(),
                        topology_id: self.topology_id,
                    },
                ));
            }
            Err(ref e) => {
                self.hello_ok = None;
                self.average_round_trip_time = None;
                self.emitter
                    .emit(SdamEvent::ServerHeartbeatFailed(ServerHeartbeatFailedEvent {
                        duration,
                        failure: e.clone(),
                        server_address: self.address.clone(),
                        topology_id: self.topology_id,
                    }));
            }
        }

        result
    }

    fn update_average_rtt(&mut self, sample: Duration) {
        self.average_round_trip_time = Some(match self.average_round_trip_time {
            Some(old_rtt) => {
                sample.mul_f64(RTT_SAMPLE_WEIGHT) + old_rtt.mul_f64(1.0 - RTT_SAMPLE_WEIGHT)
            }
            None => sample,
        });
    }

    async fn handle_error(&mut self, error: Error) -> bool {
        self.topology_updater
            .handle_monitor_error(self.address.clone(), error)
            .await
    }
}
