use crate::config::ViewerConfig;
use crate::driver::{ConnectionIo, DriverEvent};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vizscope_core::filter_store::FilterStore;
use vizscope_core::playback::PlaybackState;
use vizscope_core::wire::{parse_inbound, InboundMessage};
use vizscope_core::{
    Color, ConnectionAction, ConnectionEvent, ConnectionManager, Filter, FilterAction, Orientation,
    PushOutcome, Selector, TraceError, TraceSession,
};

const SCALE_STEP: f64 = 1.25;
const MIN_SCALE: f64 = 0.25;
const MAX_SCALE: f64 = 16.0;
const OVERRIDE_PALETTE: [Color; 6] = [
    Color::rgb(239, 68, 68),
    Color::rgb(34, 197, 94),
    Color::rgb(59, 130, 246),
    Color::rgb(245, 158, 11),
    Color::rgb(168, 85, 247),
    Color::rgb(20, 184, 166),
];
const OVERRIDE_ALPHAS: [f32; 3] = [1.0, 0.5, 0.25];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Threads,
    Filters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    AddFilter(String),
}

pub struct App {
    pub session: TraceSession,
    pub manager: ConnectionManager,
    pub io: ConnectionIo,
    store: FilterStore,
    auto_reconnect_default: bool,
    pub orientation: Orientation,
    pub scale: f64,
    pub focus: Focus,
    pub thread_cursor: usize,
    pub filter_cursor: usize,
    pub input: InputMode,
    pub alert: Option<String>,
    pub status_note: Option<String>,
    pub help_open: bool,
    pub frames_received: u64,
}

impl App {
    pub fn new(config: &ViewerConfig, events: mpsc::Sender<DriverEvent>) -> Self {
        let store = FilterStore::in_dir(&config.config_dir);
        let filters = match store.load() {
            Ok(filters) => filters,
            Err(err) => {
                warn!(path = %store.path().display(), "filters_load_failed: {err}");
                vizscope_core::filter_store::builtin_filters()
            }
        };
        info!(count = filters.len(), "filters_loaded");
        Self {
            session: TraceSession::new(config.history_capacity, filters),
            manager: ConnectionManager::new(config.connection()),
            io: ConnectionIo::new(events, config.discovery_url.clone()),
            store,
            auto_reconnect_default: config.auto_reconnect,
            orientation: Orientation::Rotate0,
            scale: 1.0,
            focus: Focus::Threads,
            thread_cursor: 0,
            filter_cursor: 0,
            input: InputMode::Normal,
            alert: None,
            status_note: None,
            help_open: false,
            frames_received: 0,
        }
    }

    pub fn dispatch(&mut self, event: ConnectionEvent) {
        for action in self.manager.handle(event) {
            match action {
                ConnectionAction::Alert(err) => {
                    warn!(state = self.manager.state().label(), "connection_alert: {err}");
                    self.alert = Some(err.to_string());
                }
                other => self.io.perform(other),
            }
        }
    }

    pub fn connect(&mut self) {
        self.alert = None;
        self.dispatch(ConnectionEvent::SetAutoReconnect(self.auto_reconnect_default));
        self.dispatch(ConnectionEvent::Start);
    }

    pub fn shutdown(&mut self) {
        self.dispatch(ConnectionEvent::Stop);
    }

    pub fn on_retry_timer(&mut self) {
        self.io.take_retry();
        debug!("reconnect_timer_fired");
        self.dispatch(ConnectionEvent::RetryTimer);
    }

    pub fn on_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Discovered(result) => {
                match &result {
                    Ok(url) => info!(url = %url, "discovery_succeeded"),
                    Err(err) => warn!("discovery_failed: {err}"),
                }
                self.dispatch(ConnectionEvent::Discovered(result));
            }
            DriverEvent::Opened { generation } if self.io.is_current(generation) => {
                info!(generation, "stream_connected");
                self.alert = None;
                self.dispatch(ConnectionEvent::Opened);
            }
            DriverEvent::Text { generation, text } if self.io.is_current(generation) => {
                self.handle_text(&text);
            }
            DriverEvent::TransportFailure { generation, reason } if self.io.is_current(generation) => {
                warn!(generation, "stream_failed: {reason}");
                self.dispatch(ConnectionEvent::TransportFailure(reason));
            }
            DriverEvent::Closed { generation } if self.io.is_current(generation) => {
                info!(generation, "stream_closed");
                self.dispatch(ConnectionEvent::Closed);
            }
            DriverEvent::ImageDecoded { key, result } => {
                if let Err(err) = &result {
                    warn!(frame = key.frame_number, buff_id = key.buff_id, "image_decode_failed: {err}");
                }
                self.session.resolve_image(key, result);
            }
            stale => debug!(?stale, "stale_socket_event"),
        }
    }

    fn handle_text(&mut self, text: &str) {
        match parse_inbound(text) {
            Ok(InboundMessage::ConnectionOk) => {
                info!("producer_handshake");
                let filters = self.session.filters().filters().to_vec();
                self.dispatch(ConnectionEvent::Handshake(filters));
            }
            Ok(InboundMessage::ProducerError(message)) => {
                warn!("protocol_error: {message}");
                self.dispatch(ConnectionEvent::ProtocolFailure(TraceError::Protocol(message)));
            }
            Ok(InboundMessage::Frame(message)) => match self.session.ingest(*message) {
                Ok(report) => {
                    self.frames_received += 1;
                    debug!(
                        frame = report.frame_number,
                        draw_calls = report.stats.draw_calls,
                        logs = report.stats.logs,
                        images = report.images.len(),
                        "frame_ingested"
                    );
                    if let PushOutcome::Reset { dropped } = report.outcome {
                        info!(frame = report.frame_number, dropped, "frame_history_reset");
                    }
                    for pending in report.images {
                        self.io.spawn_decode(pending);
                    }
                }
                Err(err) => {
                    warn!("protocol_error: {err}");
                    self.dispatch(ConnectionEvent::ProtocolFailure(err));
                }
            },
            Ok(InboundMessage::CommandAck { id }) => debug!(id, "command_acked"),
            Ok(InboundMessage::Unknown) => debug!("message_ignored"),
            Err(err) => {
                warn!("protocol_error: {err}");
                self.dispatch(ConnectionEvent::ProtocolFailure(err.into()));
            }
        }
    }

    /// Persists the filter list and pushes it to the producer.
    fn filters_changed(&mut self) {
        let filters = self.session.filters().filters().to_vec();
        match self.store.save(&filters) {
            Ok(()) => info!(
                count = filters.len(),
                path = %self.store.path().display(),
                "filters_saved"
            ),
            Err(err) => {
                warn!("filters_save_failed: {err}");
                self.status_note = Some(format!("could not save filters: {err}"));
            }
        }
        self.filter_cursor = self.filter_cursor.min(filters.len().saturating_sub(1));
        self.dispatch(ConnectionEvent::FiltersChanged(filters));
    }

    fn selected_thread(&self) -> Option<String> {
        self.session
            .threads()
            .iter()
            .nth(self.thread_cursor)
            .map(|thread| thread.name.clone())
    }

    fn move_cursor(&mut self, delta: isize) {
        let (cursor, len) = match self.focus {
            Focus::Threads => (&mut self.thread_cursor, self.session.threads().len()),
            Focus::Filters => (&mut self.filter_cursor, self.session.filters().len()),
        };
        if len == 0 {
            *cursor = 0;
            return;
        }
        *cursor = cursor.saturating_add_signed(delta).min(len - 1);
    }

    fn toggle_selected(&mut self) {
        match self.focus {
            Focus::Threads => {
                if let Some(name) = self.selected_thread() {
                    let enabled = self.session.threads_mut().toggle_enabled(&name);
                    info!(thread = %name, ?enabled, "thread_toggled");
                }
            }
            Focus::Filters => {
                if self.session.filters_mut().toggle(self.filter_cursor).is_some() {
                    self.filters_changed();
                }
            }
        }
    }

    fn toggle_thread_override(&mut self) {
        let Some(name) = self.selected_thread() else {
            return;
        };
        let Some(state) = self.session.threads().get(&name).cloned() else {
            return;
        };
        let color = if state.override_filtering {
            state.override_color
        } else {
            OVERRIDE_PALETTE[self.thread_cursor % OVERRIDE_PALETTE.len()]
        };
        self.session
            .threads_mut()
            .set_override(&name, color, state.override_alpha, !state.override_filtering);
    }

    fn cycle_thread_alpha(&mut self) {
        let Some(name) = self.selected_thread() else {
            return;
        };
        let Some(state) = self.session.threads().get(&name).cloned() else {
            return;
        };
        let next = OVERRIDE_ALPHAS
            .iter()
            .position(|alpha| (*alpha - state.override_alpha).abs() < f32::EPSILON)
            .map(|idx| OVERRIDE_ALPHAS[(idx + 1) % OVERRIDE_ALPHAS.len()])
            .unwrap_or(OVERRIDE_ALPHAS[0]);
        self.session.threads_mut().set_override(
            &name,
            state.override_color,
            next,
            state.override_filtering,
        );
    }

    fn add_filter(&mut self, prompt: &str) {
        let filter = match parse_filter_prompt(prompt) {
            Ok(filter) => filter,
            Err(err) => {
                self.status_note = Some(err);
                return;
            }
        };
        match self.session.filters_mut().push(filter) {
            Ok(index) => {
                self.filter_cursor = index;
                self.status_note = None;
                self.filters_changed();
            }
            Err(err) => self.status_note = Some(err.to_string()),
        }
    }

    fn remove_selected_filter(&mut self) {
        if self.session.filters_mut().remove(self.filter_cursor).is_some() {
            self.filters_changed();
        }
    }

    fn move_selected_filter(&mut self, down: bool) {
        let from = self.filter_cursor;
        let Some(to) = (if down { from.checked_add(1) } else { from.checked_sub(1) }) else {
            return;
        };
        if self.session.filters_mut().swap(from, to) {
            self.filter_cursor = to;
            self.filters_changed();
        }
    }

    fn frozen_range(&self) -> Option<(u64, usize, usize)> {
        match self.session.playback().state() {
            PlaybackState::FrozenRange(range) => self
                .session
                .playback()
                .displayed()
                .map(|frame| (frame, range.min, range.max)),
            _ => None,
        }
    }

    fn toggle_freeze(&mut self) {
        if self.frozen_range().is_some() {
            self.session.pause();
            return;
        }
        if let Some(frame) = self.session.playback().displayed() {
            self.session.freeze_frame(frame, 0, 1);
        }
    }

    /// Slides the frozen window by one submission, keeping its width.
    fn shift_freeze(&mut self, forward: bool) {
        let Some((frame, min, max)) = self.frozen_range() else {
            return;
        };
        let width = max.saturating_sub(min).max(1);
        let min = if forward { min + 1 } else { min.saturating_sub(1) };
        self.session
            .freeze_frame(frame, min as i64, (min + width) as i64);
    }

    fn resize_freeze(&mut self, grow: bool) {
        let Some((frame, min, max)) = self.frozen_range() else {
            return;
        };
        let max = if grow { max + 1 } else { max.saturating_sub(1).max(min) };
        self.session.freeze_frame(frame, min as i64, max as i64);
    }

    /// Returns true when the viewer should exit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return true;
        }
        if let InputMode::AddFilter(buffer) = &mut self.input {
            match key.code {
                KeyCode::Esc => self.input = InputMode::Normal,
                KeyCode::Enter => {
                    let prompt = std::mem::take(buffer);
                    self.input = InputMode::Normal;
                    self.add_filter(&prompt);
                }
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(ch) => buffer.push(ch),
                _ => {}
            }
            return false;
        }
        if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
            self.help_open = !self.help_open;
            return false;
        }
        if self.help_open {
            if key.code == KeyCode::Esc {
                self.help_open = false;
            }
            return false;
        }

        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Char(' ') => {
                if self.session.playback().is_live() {
                    self.session.pause();
                } else {
                    self.session.live();
                }
            }
            KeyCode::Char('l') => self.session.live(),
            KeyCode::Left => {
                self.session.rewind();
            }
            KeyCode::Right => {
                self.session.forward();
            }
            KeyCode::Home => self.session.first(),
            KeyCode::End => self.session.last(),
            KeyCode::Char('f') => self.toggle_freeze(),
            KeyCode::Char('<') => self.shift_freeze(false),
            KeyCode::Char('>') => self.shift_freeze(true),
            KeyCode::Char('{') => self.resize_freeze(false),
            KeyCode::Char('}') => self.resize_freeze(true),
            KeyCode::Char('r') => self.orientation = self.orientation.next(),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                self.scale = (self.scale * SCALE_STEP).min(MAX_SCALE);
            }
            KeyCode::Char('-') => self.scale = (self.scale / SCALE_STEP).max(MIN_SCALE),
            KeyCode::Char('0') => self.scale = 1.0,
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Focus::Threads => Focus::Filters,
                    Focus::Filters => Focus::Threads,
                };
            }
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1),
            KeyCode::Enter | KeyCode::Char('t') => self.toggle_selected(),
            KeyCode::Char('o') => self.toggle_thread_override(),
            KeyCode::Char('a') => self.cycle_thread_alpha(),
            KeyCode::Char('n') => self.input = InputMode::AddFilter(String::new()),
            KeyCode::Char('d') if self.focus == Focus::Filters => self.remove_selected_filter(),
            KeyCode::Char('K') if self.focus == Focus::Filters => self.move_selected_filter(false),
            KeyCode::Char('J') if self.focus == Focus::Filters => self.move_selected_filter(true),
            KeyCode::Char('c') => self.connect(),
            KeyCode::Char('x') => {
                self.dispatch(ConnectionEvent::Stop);
                self.status_note = Some("stream stopped".to_string());
            }
            KeyCode::Char('R') => {
                let enabled = !self.manager.auto_reconnect();
                self.auto_reconnect_default = enabled;
                self.dispatch(ConnectionEvent::SetAutoReconnect(enabled));
                self.status_note = Some(format!(
                    "auto-reconnect {}",
                    if enabled { "on" } else { "off" }
                ));
            }
            KeyCode::Esc => {
                self.alert = None;
                self.status_note = None;
            }
            _ => {}
        }
        false
    }
}

/// Parses the add-filter prompt: whitespace-separated `file=`, `func=`,
/// `anno=` selectors (a bare word is an annotation), `#color`, `alpha=`,
/// `skip`.
pub fn parse_filter_prompt(prompt: &str) -> Result<Filter, String> {
    let mut selector = Selector::default();
    let mut action = FilterAction::inherit();
    for token in prompt.split_whitespace() {
        if token.eq_ignore_ascii_case("skip") {
            action.skip_draw = true;
        } else if token.starts_with('#') {
            action.color = Some(token.parse()?);
        } else if let Some(value) = token.strip_prefix("alpha=") {
            let alpha: f32 = value
                .parse()
                .map_err(|err| format!("invalid alpha '{value}': {err}"))?;
            action.alpha = Some(alpha.clamp(0.0, 1.0));
        } else if let Some(value) = token.strip_prefix("file=") {
            selector.file = Some(value.to_string());
        } else if let Some(value) = token.strip_prefix("func=") {
            selector.func = Some(value.to_string());
        } else if let Some(value) = token.strip_prefix("anno=") {
            selector.anno = Some(value.to_string());
        } else {
            selector.anno = Some(token.to_string());
        }
    }
    if selector == Selector::default() {
        return Err("filter needs at least one selector".to_string());
    }
    let filter = Filter::new(selector, action);
    filter.validate().map_err(|err| err.to_string())?;
    Ok(filter)
}
