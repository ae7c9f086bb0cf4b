//! Streaming transform protocol.
//!
//! A [`Pipe`] binds one nut's content to an ordered list of [`Filter`]s.
//! Each filter gets the current content and a fresh sink, and answers
//! whether it produced new content:
//!
//! - `true`: downstream sees the filter's output
//! - `false`: the filter declines and downstream sees its input unchanged
//!
//! When every filter declines, the original bytes reach the consumer.

mod stream;

pub use stream::{Execution, Input, OnReady, Output};

use std::io::{self, Read};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::nut::Nut;

/// Content transformation applied through a pipe.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    /// Transform `input` into `output`, returning whether output was produced.
    fn transform(&self, input: &mut Input, output: &mut Output, nut: &Nut) -> io::Result<bool>;

    /// Whether the output can still be concatenated with other content.
    ///
    /// Binary compressors return `false`; nothing aggregatable may follow them.
    fn can_aggregate(&self) -> bool {
        true
    }

    /// HTTP content encoding of the output, for compressing filters.
    fn content_encoding(&self) -> Option<&str> {
        None
    }
}

/// Check that `filter` may be appended after `existing`.
pub(crate) fn check_registration(
    existing: &[Arc<dyn Filter>],
    filter: &dyn Filter,
    nut: &str,
) -> Result<()> {
    if filter.can_aggregate()
        && let Some(blocking) = existing.iter().find(|f| !f.can_aggregate())
    {
        return Err(EngineError::filter(
            nut,
            filter.name(),
            format!("cannot follow non-aggregatable filter '{}'", blocking.name()),
        ));
    }
    Ok(())
}

/// One execution of a filter list over a nut's content.
pub struct Pipe<'a> {
    nut: &'a Nut,
    source: Box<dyn Read + Send + 'a>,
    filters: Vec<Arc<dyn Filter>>,
}

impl<'a> Pipe<'a> {
    pub fn new(nut: &'a Nut, source: impl Read + Send + 'a) -> Self {
        Self {
            nut,
            source: Box::new(source),
            filters: Vec::new(),
        }
    }

    pub fn register(&mut self, filter: Arc<dyn Filter>) -> Result<()> {
        check_registration(&self.filters, filter.as_ref(), self.nut.name())?;
        self.filters.push(filter);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter in registration order.
    pub fn execute(mut self) -> Result<Execution> {
        let mut raw = Vec::new();
        self.source
            .read_to_end(&mut raw)
            .map_err(|e| EngineError::backend(self.nut.origin(), self.nut.name(), e))?;

        let mut current: Arc<[u8]> = Arc::from(raw);
        for filter in &self.filters {
            let mut input = Input::new(current.clone());
            let mut output = Output::new();
            let produced = filter
                .transform(&mut input, &mut output, self.nut)
                .map_err(|e| EngineError::filter(self.nut.name(), filter.name(), e.to_string()))?;
            if produced {
                current = output.into_bytes();
            }
        }

        crate::debug!(
            "pipe"; "{}: {} filter(s), {} bytes",
            self.nut.name(),
            self.filters.len(),
            current.len()
        );
        Ok(Execution::new(current))
    }

    /// Run the pipe and hand the completed execution to every callback.
    ///
    /// Nothing reaches a callback when a filter fails.
    pub fn execute_with(self, callbacks: &mut [&mut dyn OnReady]) -> Result<Execution> {
        let name = self.nut.name().to_string();
        let execution = self.execute()?;
        for callback in callbacks.iter_mut() {
            callback
                .ready(&execution)
                .map_err(|e| EngineError::filter(&name, "on-ready", e.to_string()))?;
        }
        Ok(execution)
    }
}
