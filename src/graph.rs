//! Audio graph - owns nodes and message queues

use core::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dasp_graph::{Buffer, Input, NodeData, Processor};
use hashbrown::HashMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::Direction;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::node::{AudioNode, NodeId, ProcessContext};

/// Frames per processing block (fixed by `dasp_graph`).
pub const BLOCK_FRAMES: usize = 64;

/// A handle for sending messages to a node in an [`AudioGraph`].
///
/// Messages are buffered in a lock-free ring buffer and processed at the start
/// of the node's next audio block. If the buffer is full, [`Handle::send`] returns
/// `Err(msg)` with the message that couldn't be sent.
pub struct Handle<M: Send + 'static> {
    pub(crate) id: NodeId,
    pub(crate) sender: Producer<M>,
    pub(crate) _marker: PhantomData<M>,
}

impl<M: Send + 'static> Handle<M> {
    /// Send a message to the node (applied next process cycle).
    ///
    /// - `Ok(())` if the message was queued successfully
    /// - `Err(msg)` if the queue is full (message dropped)
    pub fn send(&mut self, msg: M) -> Result<(), M> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }

    /// Id of the node this handle talks to.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

// Type-erased wrapper so we can store heterogeneous nodes
trait ErasedNode: Send {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]);
}

struct NodeWrapper<N: AudioNode> {
    node: N,
    receiver: Consumer<N::Message>,
}

impl<N: AudioNode> ErasedNode for NodeWrapper<N> {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]) {
        // Split borrow to avoid conflict between receiver and node
        let receiver = &mut self.receiver;
        let node = &mut self.node;

        // Create a draining iterator directly from the consumer - no allocation!
        let messages = core::iter::from_fn(|| receiver.pop().ok());
        node.process(ctx, messages, inputs, outputs);
    }
}

// Adapter for dasp_graph
struct DaspAdapter {
    node: Box<dyn ErasedNode>,
    sample_rate: u32,
    frame: Arc<AtomicU64>,
}

impl dasp_graph::Node for DaspAdapter {
    fn process(&mut self, inputs: &[Input], outputs: &mut [Buffer]) {
        let ctx = ProcessContext {
            sample_rate: self.sample_rate,
            buffer_size: BLOCK_FRAMES,
            frame: self.frame.load(Ordering::Relaxed),
        };
        self.node.process_erased(&ctx, inputs, outputs);
    }
}

type InnerGraph = StableGraph<NodeData<DaspAdapter>, ()>;

/// An audio processing graph at a fixed sample rate.
///
/// Nodes can be added and removed between blocks; removal drops the node
/// together with all of its connections.
pub struct AudioGraph {
    graph: InnerGraph,
    processor: Processor<InnerGraph>,
    sample_rate: u32,
    /// Frame index of the next block to render
    frame: Arc<AtomicU64>,

    node_indices: HashMap<NodeId, NodeIndex>,
    next_node_id: u32,

    terminal: Option<NodeIndex>,
}

impl AudioGraph {
    /// Create a new graph with the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            graph: InnerGraph::with_capacity(64, 64),
            processor: Processor::with_capacity(64),
            sample_rate,
            frame: Arc::new(AtomicU64::new(0)),
            node_indices: HashMap::new(),
            next_node_id: 0,
            terminal: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frame index of the next block to be rendered.
    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.node_indices.len()
    }

    /// Whether `id` still refers to a node in this graph.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node_indices.contains_key(&id)
    }

    /// Add a node, returns a handle for sending messages
    pub fn add<N: AudioNode>(&mut self, node: N) -> Handle<N::Message> {
        self.add_with_queue_size(node, 64)
    }

    /// Add a node with a custom message queue size
    pub fn add_with_queue_size<N: AudioNode>(&mut self, node: N, queue_size: usize) -> Handle<N::Message> {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let (producer, consumer) = RingBuffer::new(queue_size);

        let num_outputs = node.num_outputs();
        let wrapper = NodeWrapper { node, receiver: consumer };
        let adapter = DaspAdapter {
            node: Box::new(wrapper),
            sample_rate: self.sample_rate,
            frame: Arc::clone(&self.frame),
        };

        let node_data = match num_outputs {
            2 => NodeData::new2(adapter),
            // 0 outputs = sink, but dasp_graph still needs a buffer for inputs
            _ => NodeData::new1(adapter),
        };

        let idx = self.graph.add_node(node_data);
        self.node_indices.insert(id, idx);

        Handle {
            id,
            sender: producer,
            _marker: PhantomData,
        }
    }

    /// Connect output of `from` to input of `to`.
    ///
    /// Connecting an already connected pair is a no-op.
    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        match (self.node_indices.get(&from), self.node_indices.get(&to)) {
            (Some(&a), Some(&b)) => {
                if self.graph.find_edge(a, b).is_none() {
                    self.graph.add_edge(a, b, ());
                }
            }
            _ => tracing::warn!(?from, ?to, "connect on a node that is not in the graph"),
        }
    }

    /// Remove the connection from `from` to `to`, if any.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) {
        if let (Some(&a), Some(&b)) = (self.node_indices.get(&from), self.node_indices.get(&to)) {
            if let Some(edge) = self.graph.find_edge(a, b) {
                self.graph.remove_edge(edge);
            }
        }
    }

    /// Remove every outgoing connection of `id`.
    pub fn disconnect_outputs(&mut self, id: NodeId) {
        let Some(&idx) = self.node_indices.get(&id) else { return };
        let targets: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
        for target in targets {
            if let Some(edge) = self.graph.find_edge(idx, target) {
                self.graph.remove_edge(edge);
            }
        }
    }

    /// Remove a node and all of its connections. Unknown ids are ignored.
    pub fn remove(&mut self, id: NodeId) {
        if let Some(idx) = self.node_indices.remove(&id) {
            if self.terminal == Some(idx) {
                self.terminal = None;
            }
            self.graph.remove_node(idx);
        }
    }

    /// Set which node to process to (typically a sink)
    pub fn set_terminal(&mut self, id: NodeId) {
        self.terminal = self.node_indices.get(&id).copied();
    }

    /// Skip forward to `frame` without rendering the blocks in between.
    ///
    /// Used to catch up after the device consumed past what was rendered.
    pub fn jump_to(&mut self, frame: u64) {
        let current = self.frame();
        if frame > current {
            let aligned = frame - (frame - current) % BLOCK_FRAMES as u64;
            self.frame.store(aligned, Ordering::Relaxed);
        }
    }

    /// Process one block of audio through the graph
    pub fn process(&mut self) {
        if let Some(terminal) = self.terminal {
            self.processor.process(&mut self.graph, terminal);
        }
        self.frame.fetch_add(BLOCK_FRAMES as u64, Ordering::Relaxed);
    }
}
