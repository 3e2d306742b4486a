// Per-turn output channel, keep-alive ticker and consumer stream
// Author: kelexine (https://github.com/kelexine)

use super::artifacts::TurnDeps;
use super::engine::{render_upstream_error, TurnSummary, TurnTranslator};
use super::images::ImageMode;
use super::source::{EventSource, SourceEvent};
use crate::config::StreamConfig;
use crate::models::openai::{ChatCompletionChunk, DONE_FRAME};
use bytes::Bytes;
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

/// Model name used for chunks that carry an upstream error.
pub const ERROR_MODEL: &str = "error";

/// Immutable per-turn identity and settings.
#[derive(Debug, Clone)]
pub struct TurnContext {
    /// Chunk id shared by every chunk of the turn.
    pub id: String,
    /// Creation timestamp shared by every chunk of the turn.
    pub created: i64,
    /// Model requested by the caller; used until upstream reports a slug.
    pub model: String,
    pub image_mode: ImageMode,
    pub stream: StreamConfig,
}

impl TurnContext {
    pub fn new(model: impl Into<String>, image_mode: ImageMode, stream: StreamConfig) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            image_mode,
            stream,
        }
    }
}

/// Items travelling from the turn's tasks to the consumer.
#[derive(Debug, Clone)]
pub enum TurnItem {
    Chunk(ChatCompletionChunk),
    /// The upstream conversation id, once known.
    ConversationId(String),
    /// Sent once, right before [`TurnItem::Done`].
    Summary(TurnSummary),
    Done,
}

/// Milliseconds since turn start of the last enqueued item.
#[derive(Debug)]
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn touch(&self) {
        self.last_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        Duration::from_millis(self.now_ms().saturating_sub(self.last_ms.load(Ordering::Relaxed)))
    }
}

/// Sending half shared by the demultiplexer and keep-alive tasks.
#[derive(Clone)]
struct Emitter {
    tx: mpsc::Sender<TurnItem>,
    cancel: CancellationToken,
    activity: Arc<Activity>,
}

impl Emitter {
    /// Enqueue an item. Returns `false` once the turn is cancelled or the
    /// consumer is gone.
    async fn send(&self, item: TurnItem) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(item) => {
                self.activity.touch();
                sent.is_ok()
            }
        }
    }

    /// Enqueue the final items even if the turn was cancelled meanwhile, as
    /// long as someone is still listening.
    async fn send_final(&self, item: TurnItem) {
        if self.tx.send(item).await.is_err() {
            debug!("Consumer gone before end of turn");
        }
    }
}

/// Translate one upstream turn.
///
/// Spawns the demultiplexer and keep-alive tasks plus a supervisor that joins
/// both. Dropping the returned stream cancels the turn.
pub fn translate_stream(
    source: Box<dyn EventSource>,
    ctx: TurnContext,
    deps: TurnDeps,
) -> TurnStream {
    let (tx, rx) = mpsc::channel(ctx.stream.channel_capacity.max(1));
    let cancel = CancellationToken::new();
    let emitter = Emitter {
        tx,
        cancel: cancel.clone(),
        activity: Arc::new(Activity::new()),
    };

    let demux = tokio::spawn(run_demux(source, ctx.clone(), deps, emitter.clone()));
    let keepalive = tokio::spawn(run_keepalive(ctx.clone(), emitter));

    let supervisor_cancel = cancel.clone();
    let turn_id = ctx.id.clone();
    tokio::spawn(async move {
        if let Err(e) = demux.await {
            error!("Demultiplexer task for {} failed: {}", turn_id, e);
        }
        supervisor_cancel.cancel();
        if let Err(e) = keepalive.await {
            error!("Keep-alive task for {} failed: {}", turn_id, e);
        }
        debug!("Turn {} released", turn_id);
    });

    TurnStream {
        rx,
        model: ctx.model.clone(),
        ctx,
        _guard: cancel.drop_guard(),
    }
}

async fn run_demux(
    mut source: Box<dyn EventSource>,
    ctx: TurnContext,
    deps: TurnDeps,
    emitter: Emitter,
) {
    let mut translator = TurnTranslator::new(deps, ctx.image_mode);
    let mut model = ctx.model.clone();
    let mut role_sent = false;
    let mut failure = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = emitter.cancel.cancelled() => {
                debug!("Turn {} cancelled while reading upstream", ctx.id);
                return;
            }
            next = source.next_event() => next,
        };

        let data = match next {
            Ok(Some(SourceEvent::Data(data))) => data,
            Ok(Some(SourceEvent::Done)) | Ok(None) => break,
            Err(e) => {
                error!("Upstream transport failed: {}", e);
                failure = Some(e.to_string());
                break;
            }
        };

        let Some(output) = translator.process_data(&data).await else {
            continue;
        };

        if let Some(id) = output.latched_conversation_id {
            if !emitter.send(TurnItem::ConversationId(id)).await {
                return;
            }
        }
        if let Some(slug) = output.model_slug.filter(|s| !s.is_empty()) {
            model = slug;
        }
        if !role_sent {
            role_sent = true;
            let chunk = ChatCompletionChunk::role(&ctx.id, ctx.created, &model);
            if !emitter.send(TurnItem::Chunk(chunk)).await {
                return;
            }
        }
        if !output.delta.is_empty() {
            let chunk = ChatCompletionChunk::content(&ctx.id, ctx.created, &model, output.delta);
            if !emitter.send(TurnItem::Chunk(chunk)).await {
                return;
            }
        }
    }

    let finish = translator.finish(&source.take_trailing()).await;
    let error = finish
        .error
        .or_else(|| failure.map(|f| render_upstream_error(&f)));

    if !role_sent && (!finish.delta.is_empty() || error.is_some()) {
        emitter
            .send_final(TurnItem::Chunk(ChatCompletionChunk::role(&ctx.id, ctx.created, &model)))
            .await;
    }
    if !finish.delta.is_empty() {
        let chunk = ChatCompletionChunk::content(&ctx.id, ctx.created, &model, finish.delta);
        emitter.send_final(TurnItem::Chunk(chunk)).await;
    }
    if let Some(error) = error {
        translator.append_text(&error);
        let chunk = ChatCompletionChunk::content(&ctx.id, ctx.created, ERROR_MODEL, error);
        emitter.send_final(TurnItem::Chunk(chunk)).await;
    }

    let summary = translator.into_summary();
    info!(
        "Turn {} finished: {} chars, {} image(s)",
        ctx.id,
        summary.text.chars().count(),
        summary.images.len()
    );
    emitter.send_final(TurnItem::Summary(summary)).await;
    emitter.send_final(TurnItem::Done).await;
}

async fn run_keepalive(ctx: TurnContext, emitter: Emitter) {
    let poll = Duration::from_millis(ctx.stream.keepalive_poll_ms.max(1));
    let idle_after = Duration::from_millis(ctx.stream.keepalive_idle_ms);

    loop {
        tokio::select! {
            _ = emitter.cancel.cancelled() => break,
            _ = tokio::time::sleep(poll) => {
                if emitter.activity.idle() >= idle_after {
                    debug!("Turn {} idle, sending keep-alive", ctx.id);
                    let chunk = ChatCompletionChunk::content(&ctx.id, ctx.created, &ctx.model, "");
                    if !emitter.send(TurnItem::Chunk(chunk)).await {
                        break;
                    }
                }
            }
        }
    }
}

/// Consumer side of a turn.
pub struct TurnStream {
    rx: mpsc::Receiver<TurnItem>,
    ctx: TurnContext,
    model: String,
    _guard: DropGuard,
}

impl TurnStream {
    /// Next item, or `None` once every producer has finished.
    pub async fn next_item(&mut self) -> Option<TurnItem> {
        self.rx.recv().await
    }

    /// Render the turn as SSE bytes: every chunk, then the stop chunk and
    /// `data: [DONE]`. `on_summary` receives the summary when the turn ends.
    pub fn into_sse<F>(self, on_summary: F) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
    where
        F: FnOnce(TurnSummary) + Send + 'static,
    {
        let mut turn = self;
        async_stream::stream! {
            let mut on_summary = Some(on_summary);
            while let Some(item) = turn.rx.recv().await {
                match item {
                    TurnItem::Chunk(chunk) => {
                        if chunk.model != ERROR_MODEL && !chunk.is_keepalive() {
                            turn.model.clone_from(&chunk.model);
                        }
                        yield Ok(Bytes::from(chunk.to_sse()));
                    }
                    TurnItem::ConversationId(_) => {}
                    TurnItem::Summary(summary) => {
                        if let Some(callback) = on_summary.take() {
                            callback(summary);
                        }
                    }
                    TurnItem::Done => break,
                }
            }
            let stop = ChatCompletionChunk::stop(&turn.ctx.id, turn.ctx.created, &turn.model);
            yield Ok(Bytes::from(stop.to_sse()));
            yield Ok(Bytes::from_static(DONE_FRAME.as_bytes()));
        }
    }

    /// Drain the turn and return its summary.
    pub async fn collect(mut self) -> TurnSummary {
        let mut fallback = TurnSummary::default();
        while let Some(item) = self.rx.recv().await {
            match item {
                TurnItem::Chunk(chunk) => {
                    if let Some(text) = chunk.choices.first().and_then(|c| c.delta.content.as_deref()) {
                        fallback.text.push_str(text);
                    }
                }
                TurnItem::ConversationId(id) => fallback.conversation_id = Some(id),
                TurnItem::Summary(summary) => return summary,
                TurnItem::Done => break,
            }
        }
        fallback
    }

    pub fn context(&self) -> &TurnContext {
        &self.ctx
    }
}
