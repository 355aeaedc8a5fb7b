//! Context window bookkeeping and the two compaction strategies.
//!
//! Both strategies mirror the llama.cpp interactive example: context
//! shifting discards half of the non-kept history, self-extend compresses
//! older positions in groups of `ga_width` by `ga_factor`.

use crate::engine::Engine;
use crate::types::SessionError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Token counters for one engine context.
///
/// After every compaction step `num_keep <= num_past <= max_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContextWindow {
    pub(crate) max_tokens: usize,
    pub(crate) num_keep: usize,
    pub(crate) num_past: usize,
    pub(crate) ga_index: usize,
}

impl ContextWindow {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            ..Self::default()
        }
    }

    /// Capacity of the engine context minus the safety margin.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Leading prompt tokens that compaction never evicts.
    pub fn num_keep(&self) -> usize {
        self.num_keep
    }

    /// Tokens currently resident in the engine context.
    pub fn num_past(&self) -> usize {
        self.num_past
    }

    /// Self-extend cursor; stays 0 under context shifting.
    pub fn ga_index(&self) -> usize {
        self.ga_index
    }

    /// Room left before the next decode needs compaction.
    pub fn remaining(&self) -> usize {
        self.max_tokens.saturating_sub(self.num_past)
    }

    pub(crate) fn is_consistent(&self) -> bool {
        self.num_keep <= self.num_past && self.num_past <= self.max_tokens
    }

    /// Make room for `incoming` tokens by discarding half of the history
    /// after the kept prefix, as many times as needed.
    pub(crate) fn shift_context<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        incoming: usize,
        infinite_context: bool,
    ) -> Result<(), SessionError> {
        while self.num_past + incoming > self.max_tokens {
            let num_left = self.num_past - self.num_keep;
            let num_discard = num_left / 2;
            if !infinite_context || num_discard == 0 {
                return Err(SessionError::ContextFull {
                    num_past: self.num_past,
                    incoming,
                    max_tokens: self.max_tokens,
                });
            }

            debug!(
                num_past = self.num_past,
                num_keep = self.num_keep,
                num_discard,
                "Context shift"
            );
            engine.remove_range(self.num_keep, self.num_keep + num_discard);
            engine.shift_range(
                self.num_keep + num_discard,
                self.num_past,
                -(num_discard as isize),
            );
            self.num_past -= num_discard;
        }
        Ok(())
    }

    /// Grouped-attention self-extend. Each round compresses the next
    /// `ga_width` positions by `ga_factor` and advances `ga_index` by
    /// `ga_width / ga_factor`.
    pub(crate) fn self_extend<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        ga_factor: usize,
        ga_width: usize,
    ) {
        while self.num_past >= self.ga_index + ga_width {
            let ib = (ga_factor * self.ga_index) / ga_width;
            let bd = (ga_width / ga_factor) * (ga_factor - 1);
            let dd = (ga_width / ga_factor) as isize - (ib * bd) as isize - ga_width as isize;

            debug!(
                num_past = self.num_past,
                ga_index = self.ga_index,
                ib,
                bd,
                dd,
                "Self-extend"
            );
            engine.shift_range(self.ga_index, self.num_past, (ib * bd) as isize);
            engine.divide_range(
                self.ga_index + ib * bd,
                self.ga_index + ib * bd + ga_width,
                ga_factor,
            );
            engine.shift_range(
                self.ga_index + ib * bd + ga_width,
                self.num_past + ib * bd,
                dd,
            );

            self.num_past -= bd;
            self.ga_index += ga_width / ga_factor;
        }
    }
}
