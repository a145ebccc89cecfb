use crate::color::Color;
use crate::error::WireError;
use crate::filter::{decide, ColorOrigin, Decision, FilterEngine};
use crate::geometry::{view_transform, Orientation, Point, Rect, Size};
use crate::image::{DecodedImage, ImageKey, ImageStore};
use crate::source::{Source, SourceTable};
use crate::thread::{ThreadRegistry, ThreadState, DEMO_THREAD_ID, DEMO_THREAD_NAME};
use crate::wire::{FrameMessage, WireDrawCall, WireLog, WireThread};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// Where the frame number label is painted, in screen coordinates.
pub const FRAME_LABEL_ANCHOR: Point = Point::new(4.0, 4.0);

#[derive(Debug, Clone, PartialEq)]
pub enum DrawKind {
    Rect,
    Image {
        buff_id: i64,
        uv_pos: Option<[f64; 2]>,
        uv_size: Option<[f64; 2]>,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub submission_index: usize,
    pub thread_id: i64,
    pub source_index: usize,
    pub kind: DrawKind,
    pub rect: Rect,
    pub declared: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub submission_index: usize,
    pub thread_id: i64,
    pub source_index: usize,
    pub text: String,
    pub declared: Color,
}

/// Half-open window `[min, max)` of submission indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRange {
    pub min: usize,
    pub max: usize,
}

impl ActiveRange {
    pub fn contains(&self, index: usize) -> bool {
        self.min <= index && index < self.max
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draw_calls: usize,
    pub logs: usize,
    pub images: usize,
    pub texts: usize,
}

/// `buff_map` payload waiting to be decoded off the ingest path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImage {
    pub key: ImageKey,
    pub data_uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameBuild {
    pub new_sources: usize,
    pub new_threads: Vec<String>,
    pub images: Vec<PendingImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    frame_number: u64,
    size: Size,
    draw_calls: Vec<DrawCall>,
    logs: Vec<LogEntry>,
    thread_snapshot: BTreeMap<i64, ThreadState>,
    active_range: ActiveRange,
}

impl Frame {
    /// Builds a frame from one wire message. The message is validated in full
    /// before its new sources and threads are registered.
    pub fn from_message(
        message: FrameMessage,
        sources: &mut SourceTable,
        threads: &mut ThreadRegistry,
    ) -> Result<(Frame, FrameBuild), WireError> {
        let FrameMessage {
            frame,
            windowx,
            windowy,
            logs,
            drawcalls,
            threads: thread_list,
            new_sources,
            buff_map,
        } = message;

        let frame_number = u64::try_from(frame.0)
            .map_err(|_| WireError::MalformedFrame(format!("negative frame number {}", frame.0)))?;
        if windowx.0 < 0 || windowy.0 < 0 {
            return Err(WireError::MalformedFrame(format!(
                "negative window size {}x{}",
                windowx.0, windowy.0
            )));
        }

        // A rejected message must leave the tables untouched.
        let mut unseen: Vec<&Source> = Vec::new();
        for source in &new_sources {
            if !sources.contains(source) && !unseen.contains(&source) {
                unseen.push(source);
            }
        }
        let known_after = sources.len() + unseen.len();
        let referenced = drawcalls
            .iter()
            .map(|d| d.source_index)
            .chain(logs.iter().map(|l| l.source_index));
        for source_index in referenced {
            if source_index >= known_after {
                return Err(WireError::MalformedFrame(format!(
                    "source index {source_index} not registered ({known_after} known)"
                )));
            }
        }

        let mut pending = Vec::with_capacity(buff_map.len());
        for (key, data_uri) in buff_map {
            let buff_id = key.trim().parse::<i64>().map_err(|err| {
                WireError::MalformedFrame(format!("invalid buff_map id '{key}': {err}"))
            })?;
            pending.push(PendingImage {
                key: ImageKey::new(frame_number, buff_id),
                data_uri,
            });
        }

        let mut build = FrameBuild {
            images: pending,
            ..FrameBuild::default()
        };
        let known = sources.len();
        for source in new_sources {
            sources.register(source);
        }
        build.new_sources = sources.len() - known;

        let mut descriptors = thread_list.unwrap_or_else(|| {
            vec![WireThread {
                thread_name: DEMO_THREAD_NAME.to_string(),
                thread_id: DEMO_THREAD_ID,
            }]
        });
        // Ids used by items but missing from the thread list register as
        // `thread-<id>`.
        let used = drawcalls
            .iter()
            .map(|d| d.thread_id.unwrap_or(DEMO_THREAD_ID))
            .chain(logs.iter().map(|l| l.thread_id.unwrap_or(DEMO_THREAD_ID)));
        for thread_id in used {
            if !descriptors.iter().any(|d| d.thread_id == thread_id) {
                descriptors.push(WireThread {
                    thread_name: format!("thread-{thread_id}"),
                    thread_id,
                });
            }
        }
        let mut thread_snapshot = BTreeMap::new();
        for descriptor in descriptors {
            if threads.ensure(&descriptor.thread_name) {
                build.new_threads.push(descriptor.thread_name.clone());
            }
            if let Some(state) = threads.get(&descriptor.thread_name) {
                thread_snapshot.insert(descriptor.thread_id, state.clone());
            }
        }

        let (draw_calls, logs) = interleave(drawcalls, logs);

        let submission_count = draw_calls.len() + logs.len();
        let frame = Frame {
            frame_number,
            size: Size::new(windowx.0 as f64, windowy.0 as f64),
            draw_calls,
            logs,
            thread_snapshot,
            active_range: ActiveRange {
                min: 0,
                max: submission_count,
            },
        };
        Ok((frame, build))
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn draw_calls(&self) -> &[DrawCall] {
        &self.draw_calls
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn thread_snapshot(&self) -> &BTreeMap<i64, ThreadState> {
        &self.thread_snapshot
    }

    pub fn submission_count(&self) -> usize {
        self.draw_calls.len() + self.logs.len()
    }

    pub fn active_range(&self) -> ActiveRange {
        self.active_range
    }

    pub fn stats(&self) -> FrameStats {
        let mut stats = FrameStats {
            draw_calls: self.draw_calls.len(),
            logs: self.logs.len(),
            ..FrameStats::default()
        };
        for call in &self.draw_calls {
            match call.kind {
                DrawKind::Image { .. } => stats.images += 1,
                DrawKind::Text { .. } => stats.texts += 1,
                DrawKind::Rect => {}
            }
        }
        stats
    }

    /// Narrows the active range. `-1` resets that bound; everything else is
    /// clamped into `0..=submission_count` with `min <= max`.
    pub fn with_range(&mut self, min: i64, max: i64) -> ActiveRange {
        let count = self.submission_count();
        let clamp = |value: i64, reset: usize| -> usize {
            if value == -1 {
                reset
            } else {
                usize::try_from(value.max(0)).unwrap_or(usize::MAX).min(count)
            }
        };
        let min = clamp(min, 0);
        let max = clamp(max, count).max(min);
        self.active_range = ActiveRange { min, max };
        self.active_range
    }

    pub fn reset_range(&mut self) -> ActiveRange {
        self.with_range(-1, -1)
    }

    /// Current thread state for `thread_id`: the snapshot records the name,
    /// the registry supplies the live values.
    fn live_thread<'a>(
        &'a self,
        thread_id: i64,
        registry: &'a ThreadRegistry,
    ) -> Cow<'a, ThreadState> {
        match self.thread_snapshot.get(&thread_id) {
            Some(snapshot) => match registry.get(&snapshot.name) {
                Some(live) => Cow::Borrowed(live),
                None => Cow::Borrowed(snapshot),
            },
            None => Cow::Owned(ThreadState::new(&format!("thread-{thread_id}"))),
        }
    }

    /// Filter decisions for every item inside the active range, in
    /// submission order.
    fn decisions<'a>(&'a self, ctx: &RenderContext<'a>) -> Vec<(Item<'a>, Decision)> {
        let fallback = Source::default();
        let mut threads: HashMap<i64, Cow<'a, ThreadState>> = HashMap::new();
        let mut caller: HashMap<i64, Color> = HashMap::new();
        let mut out = Vec::new();
        for item in self.items() {
            if !self.active_range.contains(item.submission_index()) {
                continue;
            }
            let thread_id = item.thread_id();
            let thread = threads
                .entry(thread_id)
                .or_insert_with(|| self.live_thread(thread_id, ctx.threads));
            let source = ctx.sources.get(item.source_index()).unwrap_or(&fallback);
            let decision = decide(
                thread,
                ctx.filters,
                source,
                item.declared(),
                caller.get(&thread_id).copied(),
            );
            if let Decision::Paint {
                color,
                origin: ColorOrigin::Filter,
            } = decision
            {
                caller.insert(thread_id, color);
            }
            out.push((item, decision));
        }
        out
    }

    fn items(&self) -> impl Iterator<Item = Item<'_>> {
        let mut draws = self.draw_calls.iter().peekable();
        let mut logs = self.logs.iter().peekable();
        std::iter::from_fn(move || {
            let take_draw = match (draws.peek(), logs.peek()) {
                (Some(d), Some(l)) => d.submission_index < l.submission_index,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => return None,
            };
            if take_draw {
                draws.next().map(Item::Draw)
            } else {
                logs.next().map(Item::Log)
            }
        })
    }

    /// Paints the active range. Shapes go through the view transform; the
    /// frame label and text items are painted afterwards at their mapped
    /// anchor points so they stay upright.
    pub fn render(
        &self,
        painter: &mut dyn Painter,
        scale: f64,
        orientation: Orientation,
        ctx: &RenderContext<'_>,
    ) -> RenderStats {
        let transform = view_transform(self.size, scale, orientation);
        let mut stats = RenderStats::default();
        let mut texts: Vec<(Point, &str, Color)> = Vec::new();

        for (item, decision) in self.decisions(ctx) {
            let Item::Draw(call) = item else {
                continue;
            };
            let color = match decision {
                Decision::Hidden => {
                    stats.hidden += 1;
                    continue;
                }
                Decision::Suppressed => {
                    stats.suppressed += 1;
                    continue;
                }
                Decision::Paint { color, .. } => color,
            };
            match &call.kind {
                DrawKind::Rect => {
                    painter.fill_rect(transform.apply_rect(call.rect), color);
                    stats.painted += 1;
                }
                DrawKind::Image { buff_id, .. } => {
                    let key = ImageKey::new(self.frame_number, *buff_id);
                    match ctx.images.get(key) {
                        Some(image) => {
                            painter.draw_image(transform.apply_rect(call.rect), image, color);
                            stats.painted += 1;
                        }
                        None => stats.pending_images += 1,
                    }
                }
                DrawKind::Text { text } => {
                    texts.push((transform.apply(call.rect.origin()), text.as_str(), color));
                }
            }
        }

        painter.draw_text(
            FRAME_LABEL_ANCHOR,
            &format!("frame {}", self.frame_number),
            Color::WHITE,
        );
        for (at, text, color) in texts {
            painter.draw_text(at, text, color);
            stats.painted += 1;
        }
        stats
    }

    /// Log lines inside the active range that pass thread and filter checks.
    pub fn visible_logs(&self, ctx: &RenderContext<'_>) -> Vec<VisibleLog> {
        self.decisions(ctx)
            .into_iter()
            .filter_map(|(item, decision)| match (item, decision) {
                (Item::Log(log), Decision::Paint { color, .. }) => Some(VisibleLog {
                    submission_index: log.submission_index,
                    thread_name: self.live_thread(log.thread_id, ctx.threads).name.clone(),
                    text: log.text.clone(),
                    color,
                }),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum Item<'a> {
    Draw(&'a DrawCall),
    Log(&'a LogEntry),
}

impl Item<'_> {
    fn submission_index(&self) -> usize {
        match self {
            Item::Draw(d) => d.submission_index,
            Item::Log(l) => l.submission_index,
        }
    }

    fn thread_id(&self) -> i64 {
        match self {
            Item::Draw(d) => d.thread_id,
            Item::Log(l) => l.thread_id,
        }
    }

    fn source_index(&self) -> usize {
        match self {
            Item::Draw(d) => d.source_index,
            Item::Log(l) => l.source_index,
        }
    }

    fn declared(&self) -> Color {
        match self {
            Item::Draw(d) => d.declared,
            Item::Log(l) => l.declared,
        }
    }
}

/// Orders both wire lists into one stream and assigns dense submission
/// indices. Items without `drawindex` sort by their position in their own
/// list; ties put draw calls first.
fn interleave(
    drawcalls: Vec<WireDrawCall>,
    logs: Vec<WireLog>,
) -> (Vec<DrawCall>, Vec<LogEntry>) {
    enum Raw {
        Draw(WireDrawCall),
        Log(WireLog),
    }
    let mut merged: Vec<(i64, u8, Raw)> = Vec::with_capacity(drawcalls.len() + logs.len());
    for (pos, call) in drawcalls.into_iter().enumerate() {
        merged.push((call.drawindex.unwrap_or(pos as i64), 0, Raw::Draw(call)));
    }
    for (pos, log) in logs.into_iter().enumerate() {
        merged.push((log.drawindex.unwrap_or(pos as i64), 1, Raw::Log(log)));
    }
    merged.sort_by_key(|(key, kind, _)| (*key, *kind));

    let mut draw_calls = Vec::new();
    let mut entries = Vec::new();
    for (submission_index, (_, _, raw)) in merged.into_iter().enumerate() {
        match raw {
            Raw::Draw(call) => draw_calls.push(draw_call(submission_index, call)),
            Raw::Log(log) => entries.push(LogEntry {
                submission_index,
                thread_id: log.thread_id.unwrap_or(DEMO_THREAD_ID),
                source_index: log.source_index,
                declared: log.option.declared_color(),
                text: log.value,
            }),
        }
    }
    (draw_calls, entries)
}

fn draw_call(submission_index: usize, call: WireDrawCall) -> DrawCall {
    let declared = call.option.declared_color();
    let kind = match (call.text, call.buff_id) {
        (Some(text), _) => DrawKind::Text { text },
        (None, Some(buff_id)) if buff_id >= 0 => DrawKind::Image {
            buff_id,
            uv_pos: call.uv_pos,
            uv_size: call.uv_size,
        },
        _ => DrawKind::Rect,
    };
    DrawCall {
        submission_index,
        thread_id: call.thread_id.unwrap_or(DEMO_THREAD_ID),
        source_index: call.source_index,
        kind,
        rect: Rect::new(call.pos[0], call.pos[1], call.size[0], call.size[1]),
        declared,
    }
}

/// Shared, read-only state a frame is rendered against.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub filters: &'a FilterEngine,
    pub threads: &'a ThreadRegistry,
    pub sources: &'a SourceTable,
    pub images: &'a ImageStore,
}

/// Drawing surface. Coordinates are screen space.
pub trait Painter {
    fn fill_rect(&mut self, rect: Rect, color: Color);
    fn draw_image(&mut self, rect: Rect, image: &DecodedImage, tint: Color);
    fn draw_text(&mut self, at: Point, text: &str, color: Color);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub painted: usize,
    pub suppressed: usize,
    pub hidden: usize,
    pub pending_images: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisibleLog {
    pub submission_index: usize,
    pub thread_name: String,
    pub text: String,
    pub color: Color,
}
