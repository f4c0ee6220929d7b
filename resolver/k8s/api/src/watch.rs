use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::prelude::*;
use kube::runtime::watcher;
use kube::ResourceExt;
use std::{collections::VecDeque, pin::Pin};
use tokio::time;
use tracing::{info, Instrument};

/// A flattened resource change event.
#[derive(Clone, Debug, PartialEq)]
pub enum Event<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

/// Adapts a `kube::runtime::watcher` stream into a flat stream of
/// [`Event`]s.
///
/// The watcher protocol interleaves re-list sequences (`Init`/`InitApply`/
/// `InitDone`) with incremental updates (`Apply`/`Delete`). This adapter keeps
/// the last-seen object per key so that re-listed objects are reported as
/// `Added` or `Modified` depending on whether they were previously known, and
/// objects missing from a re-list are reported as synthesized `Deleted`
/// events.
pub struct Watch<T> {
    rx: Pin<Box<dyn Stream<Item = watcher::Result<watcher::Event<T>>> + Send + 'static>>,
    known: HashMap<String, T>,
    relisted: Option<HashSet<String>>,
    ready: VecDeque<Event<T>>,
    span: tracing::Span,
}

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = watcher::Result<watcher::Event<T>>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Self::new(watch.boxed())
    }
}

impl<T> Watch<T> {
    pub fn new(
        rx: Pin<Box<dyn Stream<Item = watcher::Result<watcher::Event<T>>> + Send + 'static>>,
    ) -> Self {
        Self {
            rx,
            known: HashMap::default(),
            relisted: None,
            ready: VecDeque::new(),
            span: tracing::Span::current(),
        }
    }

    pub fn instrument(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }
}

impl<T: ResourceExt + Clone> Watch<T> {
    /// Receives the next event in the stream.
    ///
    /// Stream errors are logged and the stream is polled again after a short
    /// pause; the watcher re-lists and resumes on its own. If the underlying
    /// stream terminates, this future never resolves, so that callers racing
    /// `recv` against a cancellation signal observe a clean shutdown.
    pub async fn recv(&mut self) -> Event<T> {
        loop {
            if let Some(ev) = self.ready.pop_front() {
                return ev;
            }

            let ev = match self.rx.next().instrument(self.span.clone()).await {
                Some(ev) => ev,
                None => futures::future::pending().await,
            };

            match ev {
                Ok(ev) => {
                    self.observe(ev);
                }
                Err(error) => {
                    info!(parent: &self.span, %error, "Watch stream failed; retrying");
                    time::sleep(time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn observe(&mut self, ev: watcher::Event<T>) {
        match ev {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::default());
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(obj_key(&obj));
                }
                self.upsert(obj);
            }
            watcher::Event::InitDone => {
                if let Some(relisted) = self.relisted.take() {
                    // Objects that vanished while the watch was disconnected
                    // never produce a Delete event; synthesize one.
                    let gone: Vec<String> = self
                        .known
                        .keys()
                        .filter(|key| !relisted.contains(*key))
                        .cloned()
                        .collect();
                    for key in gone {
                        if let Some(obj) = self.known.remove(&key) {
                            self.ready.push_back(Event::Deleted(obj));
                        }
                    }
                }
            }
            watcher::Event::Apply(obj) => {
                self.upsert(obj);
            }
            watcher::Event::Delete(obj) => {
                self.known.remove(&obj_key(&obj));
                self.ready.push_back(Event::Deleted(obj));
            }
        }
    }

    fn upsert(&mut self, obj: T) {
        let ev = match self.known.insert(obj_key(&obj), obj.clone()) {
            Some(_) => Event::Modified(obj),
            None => Event::Added(obj),
        };
        self.ready.push_back(ev);
    }
}

fn obj_key<T: ResourceExt>(obj: &T) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}
