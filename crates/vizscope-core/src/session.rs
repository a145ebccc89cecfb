use crate::error::TraceError;
use crate::filter::{Filter, FilterEngine};
use crate::frame::{ActiveRange, Frame, FrameStats, Painter, PendingImage, RenderContext, RenderStats, VisibleLog};
use crate::geometry::Orientation;
use crate::history::{HistoryBuffer, PushOutcome};
use crate::image::{DecodedImage, ImageDecodeError, ImageKey, ImageStore};
use crate::playback::PlaybackController;
use crate::source::SourceTable;
use crate::thread::ThreadRegistry;
use crate::wire::FrameMessage;

/// What one ingested frame changed, for the caller to log and act on.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub frame_number: u64,
    pub outcome: PushOutcome,
    pub new_sources: usize,
    pub new_threads: Vec<String>,
    /// Payloads carried by this frame; decode them and call
    /// [`TraceSession::resolve_image`].
    pub images: Vec<PendingImage>,
    pub stats: FrameStats,
    pub displayed: Option<u64>,
}

/// All viewer state that frames are ingested into and rendered from.
#[derive(Debug)]
pub struct TraceSession {
    sources: SourceTable,
    threads: ThreadRegistry,
    images: ImageStore,
    filters: FilterEngine,
    history: HistoryBuffer,
    playback: PlaybackController,
}

impl TraceSession {
    pub fn new(history_capacity: usize, filters: Vec<Filter>) -> Self {
        Self {
            sources: SourceTable::new(),
            threads: ThreadRegistry::new(),
            images: ImageStore::new(),
            filters: FilterEngine::new(filters),
            history: HistoryBuffer::new(history_capacity),
            playback: PlaybackController::new(),
        }
    }

    /// Builds the frame, pushes it and notifies playback in one step.
    pub fn ingest(&mut self, message: FrameMessage) -> Result<IngestReport, TraceError> {
        let (frame, build) = Frame::from_message(message, &mut self.sources, &mut self.threads)?;
        let frame_number = frame.frame_number();
        let stats = frame.stats();
        let outcome = self.history.push(frame);
        match outcome {
            PushOutcome::Appended => {}
            PushOutcome::Evicted { frame_number } => self.images.drop_frame(frame_number),
            PushOutcome::Reset { .. } => self.images.clear(),
        }
        self.playback.on_frame_pushed(&mut self.history, outcome);

        let images = build
            .images
            .into_iter()
            .filter(|pending| self.images.begin(pending.key))
            .collect();
        Ok(IngestReport {
            frame_number,
            outcome,
            new_sources: build.new_sources,
            new_threads: build.new_threads,
            images,
            stats,
            displayed: self.playback.displayed(),
        })
    }

    /// Registers a finished decode. Returns whether the image is now usable;
    /// decodes for frames that already left the history are dropped.
    pub fn resolve_image(
        &mut self,
        key: ImageKey,
        decoded: Result<DecodedImage, ImageDecodeError>,
    ) -> bool {
        match decoded {
            Ok(image) => self.images.resolve(key, image),
            Err(_) => {
                self.images.fail(key);
                false
            }
        }
    }

    pub fn sources(&self) -> &SourceTable {
        &self.sources
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    pub fn threads_mut(&mut self) -> &mut ThreadRegistry {
        &mut self.threads
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn filters(&self) -> &FilterEngine {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterEngine {
        &mut self.filters
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn render_context(&self) -> RenderContext<'_> {
        RenderContext {
            filters: &self.filters,
            threads: &self.threads,
            sources: &self.sources,
            images: &self.images,
        }
    }

    pub fn displayed_frame(&self) -> Option<&Frame> {
        self.playback
            .displayed()
            .and_then(|number| self.history.get(number))
    }

    pub fn render_displayed(
        &self,
        painter: &mut dyn Painter,
        scale: f64,
        orientation: Orientation,
    ) -> Option<RenderStats> {
        let frame = self.displayed_frame()?;
        Some(frame.render(painter, scale, orientation, &self.render_context()))
    }

    pub fn displayed_logs(&self) -> Vec<VisibleLog> {
        self.displayed_frame()
            .map(|frame| frame.visible_logs(&self.render_context()))
            .unwrap_or_default()
    }

    pub fn live(&mut self) {
        self.playback.live(&mut self.history);
    }

    pub fn pause(&mut self) {
        self.playback.pause(&mut self.history);
    }

    pub fn forward(&mut self) -> bool {
        self.playback.forward(&mut self.history)
    }

    pub fn rewind(&mut self) -> bool {
        self.playback.rewind(&mut self.history)
    }

    pub fn first(&mut self) {
        self.playback.first(&mut self.history);
    }

    pub fn last(&mut self) {
        self.playback.last(&mut self.history);
    }

    pub fn freeze_frame(&mut self, frame_number: u64, min: i64, max: i64) -> Option<ActiveRange> {
        self.playback
            .freeze_frame(&mut self.history, frame_number, min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::filter::{FilterAction, Selector};
    use crate::frame::tests::{Op, RecordingPainter};
    use crate::image::png_data_uri;
    use crate::playback::PlaybackState;
    use crate::wire::{parse_inbound, InboundMessage};

    fn frame_message(text: &str) -> FrameMessage {
        match parse_inbound(text).expect("parse") {
            InboundMessage::Frame(frame) => *frame,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    fn numbered(n: u64) -> FrameMessage {
        frame_message(&format!(
            r#"{{"frame": "{n}", "windowx": 20, "windowy": 20,
                "new_sources": [{{"anno": "frame.tile"}}],
                "drawcalls": [{{"source_index": 0, "size": [2, 2], "pos": [1, 1]}}]}}"#
        ))
    }

    #[test]
    fn ingest_pushes_and_updates_playback_together() {
        let mut session = TraceSession::new(4, vec![Filter::new(
            Selector::annotation("frame"),
            FilterAction::inherit(),
        )]);
        let report = session.ingest(numbered(0)).expect("ingest");
        assert_eq!(report.frame_number, 0);
        assert_eq!(report.displayed, Some(0));
        assert_eq!(report.new_sources, 1);
        assert_eq!(report.new_threads, vec!["demo"]);
        assert_eq!(report.outcome, PushOutcome::Appended);

        // Sources are deduplicated across frames.
        let report = session.ingest(numbered(1)).expect("ingest");
        assert_eq!(report.new_sources, 0);
        assert_eq!(session.sources().len(), 1);
        assert_eq!(session.displayed_frame().map(Frame::frame_number), Some(1));

        let mut painter = RecordingPainter::default();
        let stats = session
            .render_displayed(&mut painter, 1.0, Orientation::Rotate0)
            .expect("rendered");
        assert_eq!(stats.painted, 1);
        assert!(matches!(painter.ops[0], Op::Rect(_, Color::BLACK)));
    }

    #[test]
    fn malformed_frame_maps_to_trace_error() {
        let mut session = TraceSession::new(4, Vec::new());
        let message = frame_message(
            r#"{"frame": 1, "windowx": 1, "windowy": 1,
                "drawcalls": [{"source_index": 3, "size": [1, 1], "pos": [0, 0]}]}"#,
        );
        assert!(matches!(
            session.ingest(message),
            Err(TraceError::MalformedFrame(_))
        ));
        assert!(session.history().is_empty());
    }

    fn image_frame(n: u64, buff_id: i64, uri: &str) -> FrameMessage {
        frame_message(&format!(
            r#"{{"frame": {n}, "windowx": 10, "windowy": 10,
                "new_sources": [{{"anno": "frame.tile"}}],
                "drawcalls": [{{"source_index": 0, "size": [4, 4], "pos": [0, 0], "buff_id": {buff_id}}}],
                "buff_map": {{"{buff_id}": "{uri}"}}}}"#
        ))
    }

    fn paint_displayed(session: &TraceSession) -> (RenderStats, Vec<Op>) {
        let mut painter = RecordingPainter::default();
        let stats = session
            .render_displayed(&mut painter, 1.0, Orientation::Rotate0)
            .expect("rendered");
        (stats, painter.ops)
    }

    #[test]
    fn reused_buff_id_shows_each_frames_own_payload() {
        let mut session = TraceSession::new(4, vec![Filter::new(
            Selector::default(),
            FilterAction::inherit(),
        )]);
        let narrow = png_data_uri(3, 1, [1, 2, 3, 255]);
        let wide = png_data_uri(7, 1, [4, 5, 6, 255]);

        let first = session.ingest(image_frame(1, 5, &narrow)).expect("ingest");
        assert_eq!(first.images.len(), 1);
        let second = session.ingest(image_frame(2, 5, &wide)).expect("ingest");
        assert_eq!(second.images.len(), 1);
        assert_eq!(second.images[0].key, ImageKey::new(2, 5));

        let (stats, _) = paint_displayed(&session);
        assert_eq!(stats.pending_images, 1);

        for pending in first.images.iter().chain(&second.images) {
            let decoded = crate::image::decode_data_uri(&pending.data_uri);
            assert!(session.resolve_image(pending.key, decoded));
        }
        let (_, ops) = paint_displayed(&session);
        assert!(matches!(ops[0], Op::Image(_, 7)));

        session.rewind();
        let (_, ops) = paint_displayed(&session);
        assert!(matches!(ops[0], Op::Image(_, 3)));
    }

    #[test]
    fn images_leave_with_their_frames() {
        let mut session = TraceSession::new(2, Vec::new());
        let uri = png_data_uri(2, 2, [9, 9, 9, 255]);
        let mut reports = Vec::new();
        for n in 1..=2 {
            reports.push(session.ingest(image_frame(n, 5, &uri)).expect("ingest"));
        }
        for report in &reports {
            let pending = &report.images[0];
            let decoded = crate::image::decode_data_uri(&pending.data_uri);
            assert!(session.resolve_image(pending.key, decoded));
        }
        assert_eq!(session.images().len(), 2);

        // Frame 3 evicts frame 1 while its own decode is still in flight.
        let third = session.ingest(image_frame(3, 5, &uri)).expect("ingest");
        assert_eq!(third.outcome, PushOutcome::Evicted { frame_number: 1 });
        assert_eq!(session.images().len(), 1);
        assert!(session.images().get(ImageKey::new(1, 5)).is_none());
        assert!(session.images().is_pending(ImageKey::new(3, 5)));

        // Numbering restarts: everything goes, and a late decode for the
        // dropped frame is ignored.
        let restarted = session.ingest(image_frame(0, 5, &uri)).expect("ingest");
        assert!(matches!(restarted.outcome, PushOutcome::Reset { .. }));
        assert!(session.images().is_empty());
        let late = crate::image::decode_data_uri(&third.images[0].data_uri);
        assert!(!session.resolve_image(third.images[0].key, late));
        assert!(session.images().get(ImageKey::new(3, 5)).is_none());
    }

    #[test]
    fn navigation_goes_through_the_session() {
        let mut session = TraceSession::new(3, Vec::new());
        for n in 0..3 {
            session.ingest(numbered(n)).expect("ingest");
        }
        assert!(session.rewind());
        assert_eq!(session.playback().displayed(), Some(1));
        session.freeze_frame(1, 1, 1);
        assert!(matches!(
            session.playback().state(),
            PlaybackState::FrozenRange(ActiveRange { min: 1, max: 1 })
        ));
        let mut painter = RecordingPainter::default();
        let stats = session
            .render_displayed(&mut painter, 1.0, Orientation::Rotate0)
            .expect("rendered");
        assert_eq!(stats.painted, 0);
        session.live();
        assert_eq!(session.playback().displayed(), Some(2));
        assert_eq!(
            session.history().get(1).map(Frame::active_range),
            Some(ActiveRange { min: 0, max: 1 })
        );
    }
}
