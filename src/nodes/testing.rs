//! Small rig for exercising nodes inside a real graph.

use dasp_graph::{Buffer, Input};
use rtrb::{Consumer, RingBuffer};

use crate::graph::AudioGraph;
use crate::node::{AudioNode, NodeId, ProcessContext};
use crate::nodes::DeviceSink;

/// Constant source; the message replaces the value.
pub struct Dc {
    pub value: f32,
    pub channels: usize,
}

impl Dc {
    pub fn mono(value: f32) -> Self {
        Self { value, channels: 1 }
    }
}

impl AudioNode for Dc {
    type Message = f32;

    fn process(&mut self, _ctx: &ProcessContext, messages: impl Iterator<Item = f32>, _i: &[Input], outputs: &mut [Buffer]) {
        for value in messages {
            self.value = value;
        }
        for buffer in outputs.iter_mut() {
            buffer.iter_mut().for_each(|s| *s = self.value);
        }
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }
}

/// Sine source at a fixed frequency.
pub struct Tone {
    pub frequency: f32,
    pub amplitude: f32,
    phase: f32,
}

impl Tone {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self { frequency, amplitude, phase: 0.0 }
    }
}

impl AudioNode for Tone {
    type Message = ();

    fn process(&mut self, ctx: &ProcessContext, _m: impl Iterator<Item = ()>, _i: &[Input], outputs: &mut [Buffer]) {
        let step = self.frequency / ctx.sample_rate as f32;
        let len = outputs[0].len();
        for i in 0..len {
            let value = (self.phase * core::f32::consts::TAU).sin() * self.amplitude;
            for buffer in outputs.iter_mut() {
                buffer[i] = value;
            }
            self.phase = (self.phase + step).fract();
        }
    }
}

/// A graph terminated by a sink whose interleaved output can be read back.
pub struct Rig {
    pub graph: AudioGraph,
    pub sink: NodeId,
    out: Consumer<f32>,
    channels: usize,
}

impl Rig {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let mut graph = AudioGraph::new(sample_rate);
        let (producer, out) = RingBuffer::new(1 << 16);
        let sink = graph.add(DeviceSink::new(producer, channels)).id();
        graph.set_terminal(sink);
        Self { graph, sink, out, channels }
    }

    /// Render one block and return the first channel of it.
    pub fn block(&mut self) -> Vec<f32> {
        self.graph.process();
        let mut samples = Vec::new();
        while let Ok(s) = self.out.pop() {
            samples.push(s);
        }
        samples.into_iter().step_by(self.channels).collect()
    }

    /// Render one block and return all interleaved samples.
    pub fn block_interleaved(&mut self) -> Vec<f32> {
        self.graph.process();
        let mut samples = Vec::new();
        while let Ok(s) = self.out.pop() {
            samples.push(s);
        }
        samples
    }
}
