use crate::error::TraceError;
use crate::filter::Filter;
use crate::wire::{Command, CommandCall};
use std::time::Duration;

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Discovering,
    Connecting,
    Connected,
    ReconnectWait,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ReconnectWait => "reconnect-wait",
        }
    }
}

/// Hands out session-scoped command ids, starting at 1 and never reused.
#[derive(Debug, Clone)]
pub struct CommandSequencer {
    next: u64,
}

impl Default for CommandSequencer {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl CommandSequencer {
    pub fn next_command(&mut self, call: CommandCall) -> Command {
        let id = self.next;
        self.next += 1;
        Command { id, call }
    }

    pub fn peek(&self) -> u64 {
        self.next
    }
}

/// Inputs reported by the I/O driver or the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Start,
    Discovered(Result<String, TraceError>),
    Opened,
    /// `{"connection":"ok"}` arrived; carries the filters to re-send.
    Handshake(Vec<Filter>),
    FiltersChanged(Vec<Filter>),
    /// Producer error payload or a malformed frame.
    ProtocolFailure(TraceError),
    TransportFailure(String),
    Closed,
    RetryTimer,
    SetAutoReconnect(bool),
    Stop,
}

/// Side effects the driver must perform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    Discover,
    Connect { url: String },
    Send(Command),
    Close,
    Alert(TraceError),
    ScheduleRetry(Duration),
    CancelRetry,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url_override: Option<String>,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url_override: None,
            auto_reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Connection lifecycle as a pure state machine: events in, actions out.
/// At most one retry timer is outstanding at any time.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    state: ConnectionState,
    config: ConnectionConfig,
    sequencer: CommandSequencer,
    reconnecting: bool,
    retry_armed: bool,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            sequencer: CommandSequencer::default(),
            reconnecting: false,
            retry_armed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn auto_reconnect(&self) -> bool {
        self.config.auto_reconnect
    }

    pub fn reconnect_interval(&self) -> Duration {
        self.config.reconnect_interval
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<ConnectionAction> {
        use ConnectionAction as A;
        use ConnectionState as S;

        match (self.state, event) {
            (S::Disconnected, ConnectionEvent::Start) => {
                self.reconnecting = false;
                self.resolve_endpoint()
            }
            (_, ConnectionEvent::Start) => Vec::new(),

            (S::Discovering, ConnectionEvent::Discovered(Ok(url))) => {
                self.state = S::Connecting;
                vec![A::Connect { url }]
            }
            (S::Discovering, ConnectionEvent::Discovered(Err(err))) => {
                if self.reconnecting && self.config.auto_reconnect {
                    self.wait_for_retry()
                } else {
                    self.state = S::Disconnected;
                    self.reconnecting = false;
                    vec![A::Alert(err)]
                }
            }
            (_, ConnectionEvent::Discovered(_)) => Vec::new(),

            (S::Connecting, ConnectionEvent::Opened) => {
                self.state = S::Connected;
                self.reconnecting = false;
                let start = self.sequencer.next_command(CommandCall::StartStream);
                vec![A::Send(start)]
            }
            // A socket that opened after stop() or a failure is not wanted.
            (_, ConnectionEvent::Opened) => vec![A::Close],

            (S::Connected, ConnectionEvent::Handshake(filters))
            | (S::Connected, ConnectionEvent::FiltersChanged(filters)) => {
                let push = self
                    .sequencer
                    .next_command(CommandCall::SetFilters { filters });
                vec![A::Send(push)]
            }
            (_, ConnectionEvent::Handshake(_)) | (_, ConnectionEvent::FiltersChanged(_)) => {
                Vec::new()
            }

            (S::Connecting | S::Connected, ConnectionEvent::ProtocolFailure(err)) => {
                self.state = S::Disconnected;
                self.reconnecting = false;
                vec![A::Alert(err), A::Close]
            }
            (_, ConnectionEvent::ProtocolFailure(_)) => Vec::new(),

            (S::Connecting, ConnectionEvent::TransportFailure(reason)) => {
                self.connect_failed(TraceError::Transport(reason))
            }
            (S::Connecting, ConnectionEvent::Closed) => {
                self.connect_failed(TraceError::Transport("connection closed before open".to_string()))
            }
            (S::Connected, ConnectionEvent::TransportFailure(reason)) => self.dropped(reason),
            (S::Connected, ConnectionEvent::Closed) => {
                self.dropped("connection closed".to_string())
            }
            (_, ConnectionEvent::TransportFailure(_)) | (_, ConnectionEvent::Closed) => Vec::new(),

            (S::ReconnectWait, ConnectionEvent::RetryTimer) => {
                self.retry_armed = false;
                self.resolve_endpoint()
            }
            (_, ConnectionEvent::RetryTimer) => {
                self.retry_armed = false;
                Vec::new()
            }

            (state, ConnectionEvent::SetAutoReconnect(enabled)) => {
                self.config.auto_reconnect = enabled;
                if !enabled && state == S::ReconnectWait {
                    self.state = S::Disconnected;
                    self.reconnecting = false;
                    return self.cancel_retry();
                }
                Vec::new()
            }

            (state, ConnectionEvent::Stop) => {
                self.config.auto_reconnect = false;
                self.reconnecting = false;
                self.state = S::Disconnected;
                let mut actions = Vec::new();
                match state {
                    S::Connected => {
                        let stop = self.sequencer.next_command(CommandCall::StopStream);
                        actions.push(A::Send(stop));
                        actions.push(A::Close);
                    }
                    S::Connecting => actions.push(A::Close),
                    _ => {}
                }
                actions.extend(self.cancel_retry());
                actions
            }
        }
    }

    fn resolve_endpoint(&mut self) -> Vec<ConnectionAction> {
        match &self.config.url_override {
            Some(url) => {
                self.state = ConnectionState::Connecting;
                vec![ConnectionAction::Connect { url: url.clone() }]
            }
            None => {
                self.state = ConnectionState::Discovering;
                vec![ConnectionAction::Discover]
            }
        }
    }

    fn wait_for_retry(&mut self) -> Vec<ConnectionAction> {
        self.state = ConnectionState::ReconnectWait;
        self.reconnecting = true;
        let mut actions = self.cancel_retry();
        self.retry_armed = true;
        actions.push(ConnectionAction::ScheduleRetry(self.config.reconnect_interval));
        actions
    }

    fn cancel_retry(&mut self) -> Vec<ConnectionAction> {
        if std::mem::take(&mut self.retry_armed) {
            vec![ConnectionAction::CancelRetry]
        } else {
            Vec::new()
        }
    }

    /// Opening failed. Inside a reconnect cycle that means "keep polling";
    /// on a first attempt it needs the operator.
    fn connect_failed(&mut self, err: TraceError) -> Vec<ConnectionAction> {
        if self.reconnecting && self.config.auto_reconnect {
            return self.wait_for_retry();
        }
        self.state = ConnectionState::Disconnected;
        self.reconnecting = false;
        vec![ConnectionAction::Alert(err)]
    }

    fn dropped(&mut self, reason: String) -> Vec<ConnectionAction> {
        if self.config.auto_reconnect {
            return self.wait_for_retry();
        }
        self.state = ConnectionState::Disconnected;
        vec![ConnectionAction::Alert(TraceError::Transport(reason))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterAction, Selector};

    fn connected(config: ConnectionConfig) -> ConnectionManager {
        let mut manager = ConnectionManager::new(config);
        assert_eq!(
            manager.handle(ConnectionEvent::Start),
            vec![ConnectionAction::Discover]
        );
        assert_eq!(
            manager.handle(ConnectionEvent::Discovered(Ok("ws://x".to_string()))),
            vec![ConnectionAction::Connect {
                url: "ws://x".to_string()
            }]
        );
        let actions = manager.handle(ConnectionEvent::Opened);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Send(Command {
                call: CommandCall::StartStream,
                ..
            })]
        ));
        manager
    }

    #[test]
    fn sequencer_starts_at_one_and_never_repeats() {
        let mut seq = CommandSequencer::default();
        let ids: Vec<u64> = (0..4)
            .map(|_| seq.next_command(CommandCall::StopStream).id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(seq.peek(), 5);
    }

    #[test]
    fn discovery_failure_alerts_once_without_retry() {
        let mut manager = ConnectionManager::new(ConnectionConfig::default());
        manager.handle(ConnectionEvent::Start);
        let actions = manager.handle(ConnectionEvent::Discovered(Err(TraceError::Discovery(
            "down".to_string(),
        ))));
        assert_eq!(
            actions,
            vec![ConnectionAction::Alert(TraceError::Discovery("down".to_string()))]
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn url_override_skips_discovery() {
        let mut manager = ConnectionManager::new(ConnectionConfig {
            url_override: Some("ws://direct".to_string()),
            ..ConnectionConfig::default()
        });
        assert_eq!(
            manager.handle(ConnectionEvent::Start),
            vec![ConnectionAction::Connect {
                url: "ws://direct".to_string()
            }]
        );
    }

    #[test]
    fn commands_carry_increasing_ids_across_reconnects() {
        let mut manager = connected(ConnectionConfig::default());
        let filters = vec![Filter::new(Selector::annotation("frame"), FilterAction::inherit())];
        let handshake = manager.handle(ConnectionEvent::Handshake(filters.clone()));
        let changed = manager.handle(ConnectionEvent::FiltersChanged(filters));
        let ids: Vec<u64> = handshake
            .iter()
            .chain(changed.iter())
            .filter_map(|action| match action {
                ConnectionAction::Send(cmd) => Some(cmd.id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![2, 3]);

        manager.handle(ConnectionEvent::Closed);
        manager.handle(ConnectionEvent::RetryTimer);
        manager.handle(ConnectionEvent::Discovered(Ok("ws://x".to_string())));
        let actions = manager.handle(ConnectionEvent::Opened);
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Send(Command { id: 4, .. })]
        ));
    }

    #[test]
    fn filter_changes_while_disconnected_are_not_sent() {
        let mut manager = ConnectionManager::new(ConnectionConfig::default());
        assert!(manager
            .handle(ConnectionEvent::FiltersChanged(Vec::new()))
            .is_empty());
    }

    #[test]
    fn drop_without_auto_reconnect_is_terminal() {
        let mut manager = connected(ConnectionConfig {
            auto_reconnect: false,
            ..ConnectionConfig::default()
        });
        let actions = manager.handle(ConnectionEvent::Closed);
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Alert(TraceError::Transport(_))]
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.handle(ConnectionEvent::RetryTimer).is_empty());
    }

    #[test]
    fn protocol_failure_closes_without_retry() {
        let mut manager = connected(ConnectionConfig::default());
        let err = TraceError::Protocol("bad".to_string());
        assert_eq!(
            manager.handle(ConnectionEvent::ProtocolFailure(err.clone())),
            vec![ConnectionAction::Alert(err), ConnectionAction::Close]
        );
        // The close that follows the teardown does not start a retry.
        assert!(manager.handle(ConnectionEvent::Closed).is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn reconnect_polls_until_discovery_succeeds() {
        let interval = Duration::from_millis(250);
        let mut manager = connected(ConnectionConfig {
            reconnect_interval: interval,
            ..ConnectionConfig::default()
        });
        assert_eq!(
            manager.handle(ConnectionEvent::Closed),
            vec![ConnectionAction::ScheduleRetry(interval)]
        );
        for _ in 0..3 {
            assert_eq!(
                manager.handle(ConnectionEvent::RetryTimer),
                vec![ConnectionAction::Discover]
            );
            assert_eq!(manager.state(), ConnectionState::Discovering);
            assert_eq!(
                manager.handle(ConnectionEvent::Discovered(Err(TraceError::Discovery(
                    "down".to_string()
                )))),
                vec![ConnectionAction::ScheduleRetry(interval)]
            );
            assert_eq!(manager.state(), ConnectionState::ReconnectWait);
        }
        manager.handle(ConnectionEvent::RetryTimer);
        assert_eq!(
            manager.handle(ConnectionEvent::Discovered(Ok("ws://back".to_string()))),
            vec![ConnectionAction::Connect {
                url: "ws://back".to_string()
            }]
        );
    }

    #[test]
    fn failed_reopen_during_reconnect_keeps_polling() {
        let mut manager = connected(ConnectionConfig::default());
        manager.handle(ConnectionEvent::Closed);
        manager.handle(ConnectionEvent::RetryTimer);
        manager.handle(ConnectionEvent::Discovered(Ok("ws://x".to_string())));
        assert_eq!(
            manager.handle(ConnectionEvent::TransportFailure("refused".to_string())),
            vec![ConnectionAction::ScheduleRetry(DEFAULT_RECONNECT_INTERVAL)]
        );
    }

    #[test]
    fn disabling_auto_reconnect_cancels_the_timer() {
        let mut manager = connected(ConnectionConfig::default());
        manager.handle(ConnectionEvent::Closed);
        assert_eq!(
            manager.handle(ConnectionEvent::SetAutoReconnect(false)),
            vec![ConnectionAction::CancelRetry]
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn stop_sends_stop_stream_then_closes() {
        let mut manager = connected(ConnectionConfig::default());
        let actions = manager.handle(ConnectionEvent::Stop);
        assert!(matches!(
            actions.as_slice(),
            [
                ConnectionAction::Send(Command {
                    id: 2,
                    call: CommandCall::StopStream
                }),
                ConnectionAction::Close
            ]
        ));
        assert!(!manager.auto_reconnect());
        // Late events from the torn-down socket are ignored.
        assert!(manager.handle(ConnectionEvent::Closed).is_empty());

        let mut waiting = connected(ConnectionConfig::default());
        waiting.handle(ConnectionEvent::Closed);
        assert_eq!(
            waiting.handle(ConnectionEvent::Stop),
            vec![ConnectionAction::CancelRetry]
        );
        assert!(waiting.handle(ConnectionEvent::RetryTimer).is_empty());
    }
}
