//! Worker pool applying change events to the engine.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{ChangeEvent, EngineCall, EventStream, ReindexOptions, SUBSCRIBED_EVENTS, plan};
use crate::context::RequestContext;
use crate::error::SearchResult;
use crate::search::Engine;

pub struct Reindexer {
    engine: Arc<dyn Engine>,
    options: ReindexOptions,
}

/// Running workers; they stop when the stream ends.
pub struct ReindexerHandle {
    workers: Vec<JoinHandle<()>>,
}

impl ReindexerHandle {
    pub fn join(self) {
        for worker in self.workers {
            if worker.join().is_err() {
                tracing::error!("reindex worker panicked");
            }
        }
    }
}

impl Reindexer {
    pub fn new(engine: Arc<dyn Engine>, options: ReindexOptions) -> Self {
        Self { engine, options }
    }

    pub fn options(&self) -> &ReindexOptions {
        &self.options
    }

    /// Runs every planned call for `event`. Failures are logged and do not
    /// stop later calls; returns how many failed.
    pub fn handle(&self, ctx: &RequestContext, event: &ChangeEvent) -> usize {
        let calls = plan(event, &self.options);
        tracing::debug!(
            kind = event.kind.name(),
            space_id = %event.space_id,
            item_id = %event.item_id,
            executant = event.executant.as_deref().unwrap_or(""),
            calls = calls.len(),
            "event_received"
        );
        let mut failed = 0;
        for call in &calls {
            if let Err(e) = self.execute(ctx, call) {
                failed += 1;
                tracing::warn!(
                    kind = event.kind.name(),
                    call = call.name(),
                    space_id = %event.space_id,
                    item_id = %event.item_id,
                    error = %e,
                    "engine_call_failed"
                );
            }
        }
        failed
    }

    fn execute(&self, ctx: &RequestContext, call: &EngineCall) -> SearchResult<()> {
        match call {
            EngineCall::IndexSpace { space_id } => {
                self.engine.index_space(ctx, space_id).map(|_| ())
            }
            EngineCall::TrashItem { space_id, item_id } => {
                self.engine.trash_item(ctx, space_id, item_id)
            }
            EngineCall::RestoreItem { space_id, item_id } => {
                self.engine.restore_item(ctx, space_id, item_id)
            }
            EngineCall::MoveItem {
                space_id,
                item_id,
                new_path,
            } => self.engine.move_item(ctx, space_id, item_id, new_path),
            EngineCall::UpsertItem {
                space_id,
                item_id,
                delta,
            } => {
                let Some(mut doc) = self.engine.document(ctx, space_id, item_id)? else {
                    tracing::info!(space_id, item_id, "tag change for unindexed item, skipping");
                    return Ok(());
                };
                if !delta.apply(&mut doc) {
                    return Ok(());
                }
                self.engine.upsert_item(ctx, doc)
            }
        }
    }

    /// Starts `workers` threads consuming `stream`. Each delivery is acked
    /// once all of its calls have returned, successful or not.
    pub fn spawn(self, stream: &dyn EventStream, workers: usize) -> SearchResult<ReindexerHandle> {
        let rx = stream.consume(SUBSCRIBED_EVENTS)?;
        let this = Arc::new(self);
        let workers = (0..workers.max(1))
            .map(|id| {
                let rx = rx.clone();
                let this = Arc::clone(&this);
                thread::spawn(move || {
                    let ctx = RequestContext::background();
                    for delivery in rx.iter() {
                        let failed = this.handle(&ctx, &delivery.event);
                        if failed > 0 {
                            tracing::debug!(worker = id, failed, "acking event with failed calls");
                        }
                        delivery.ack();
                    }
                    tracing::debug!(worker = id, "reindex worker stopped");
                })
            })
            .collect();
        Ok(ReindexerHandle { workers })
    }
}
