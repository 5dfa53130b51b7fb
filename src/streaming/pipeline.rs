//! Stage pipeline
//!
//! Rules compose as stream transformers: everything stage `i` emits is
//! fed to stage `i + 1`, and only the last stage writes to the caller.

use std::mem;

use super::stage::Stage;
use crate::pool::Reset;

/// Per-request transformer for a whole replacement chain
#[derive(Clone, Debug, Default)]
pub struct Replacer {
    stages: Vec<Stage>,
    front: Vec<u8>,
    back: Vec<u8>,
    flushed: Vec<u8>,
}

impl Replacer {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            ..Default::default()
        }
    }

    /// Push `input` through every stage, appending final bytes to `out`
    pub fn write(&mut self, input: &[u8], out: &mut Vec<u8>) {
        run(&mut self.stages, input, out, &mut self.front, &mut self.back);
    }

    /// End of input. Each stage's pending bytes still pass through the
    /// stages after it before reaching `out`.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        for i in 0..self.stages.len() {
            let (done, rest) = self.stages.split_at_mut(i + 1);
            self.flushed.clear();
            done[i].flush(&mut self.flushed);
            run(rest, &self.flushed, out, &mut self.front, &mut self.back);
        }
    }

    /// Transform a complete body: each stage sees its whole input as
    /// end of input and hands its whole output to the next stage
    pub fn transform_all(&mut self, input: &[u8], out: &mut Vec<u8>) {
        let Some((last, inner)) = self.stages.split_last_mut() else {
            out.extend_from_slice(input);
            return;
        };
        if inner.is_empty() {
            last.transform_all(input, out);
            return;
        }

        self.front.clear();
        inner[0].transform_all(input, &mut self.front);
        for stage in &mut inner[1..] {
            self.back.clear();
            stage.transform_all(&self.front, &mut self.back);
            mem::swap(&mut self.front, &mut self.back);
        }
        last.transform_all(&self.front, out);
    }

    /// Total replacements made by all stages since the last reset
    pub fn replacements(&self) -> usize {
        self.stages.iter().map(Stage::replacements).sum()
    }

    /// Bytes held back across all stages
    pub fn pending_len(&self) -> usize {
        self.stages.iter().map(Stage::pending_len).sum()
    }

}

impl Reset for Replacer {
    fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
        self.front.clear();
        self.back.clear();
        self.flushed.clear();
    }
}

fn run(
    stages: &mut [Stage],
    input: &[u8],
    out: &mut Vec<u8>,
    front: &mut Vec<u8>,
    back: &mut Vec<u8>,
) {
    let Some((last, inner)) = stages.split_last_mut() else {
        out.extend_from_slice(input);
        return;
    };
    if inner.is_empty() {
        last.write(input, out);
        return;
    }

    front.clear();
    inner[0].write(input, front);
    for stage in &mut inner[1..] {
        back.clear();
        stage.write(front, back);
        mem::swap(front, back);
    }
    last.write(front, out);
}
