//! Stereo-to-mono fold for the in-ear bus.

use dasp_graph::{Buffer, Input};

use crate::node::{silence, AudioNode, ProcessContext};

#[derive(Clone, Copy, Debug)]
pub enum MonoFoldMessage {
    SetEnabled(bool),
}

/// Pass-through that, when enabled, replaces both channels with their average.
///
/// Performers wearing a single earpiece hear the full vocal guide this way.
pub struct MonoFold {
    enabled: bool,
}

impl MonoFold {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl AudioNode for MonoFold {
    type Message = MonoFoldMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = MonoFoldMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                MonoFoldMessage::SetEnabled(enabled) => self.enabled = enabled,
            }
        }

        let Some(input) = inputs.first() else {
            silence(outputs);
            return;
        };
        let buffers = input.buffers();
        let (Some(left), Some(right)) = (buffers.first(), buffers.last()) else {
            silence(outputs);
            return;
        };

        if outputs.len() < 2 {
            silence(outputs);
            return;
        }
        let (out_left, out_right) = outputs.split_at_mut(1);
        for i in 0..out_left[0].len() {
            let (l, r) = (left[i], right[i]);
            if self.enabled {
                let mid = (l + r) * 0.5;
                out_left[0][i] = mid;
                out_right[0][i] = mid;
            } else {
                out_left[0][i] = l;
                out_right[0][i] = r;
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testing::Rig;

    struct Split;

    impl AudioNode for Split {
        type Message = ();

        fn process(&mut self, _ctx: &ProcessContext, _m: impl Iterator<Item = ()>, _i: &[Input], outputs: &mut [Buffer]) {
            outputs[0].iter_mut().for_each(|s| *s = 1.0);
            outputs[1].iter_mut().for_each(|s| *s = 0.0);
        }

        fn num_outputs(&self) -> usize {
            2
        }
    }

    #[test]
    fn folds_only_when_enabled() {
        let mut rig = Rig::new(48_000, 2);
        let split = rig.graph.add(Split);
        let mut fold = rig.graph.add(MonoFold::new(false));
        rig.graph.connect(split.id(), fold.id());
        rig.graph.connect(fold.id(), rig.sink);

        let out = rig.block_interleaved();
        assert_eq!((out[0], out[1]), (1.0, 0.0));

        fold.send(MonoFoldMessage::SetEnabled(true)).unwrap();
        let out = rig.block_interleaved();
        assert_eq!((out[0], out[1]), (0.5, 0.5));
    }
}
