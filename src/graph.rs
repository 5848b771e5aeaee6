//! Render graph: type-erased stage nodes in a petgraph, each with its own
//! message queue.

use alloc::boxed::Box;
use core::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use dasp_graph::{Buffer, Input, NodeData, Processor};
use hashbrown::HashMap;
use petgraph::graph::NodeIndex;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::{Error, Result};
use crate::node::{AudioNode, NodeId, ProcessContext};

static NEXT_GRAPH: AtomicU32 = AtomicU32::new(0);

/// Default capacity of a node's message queue
pub const NODE_QUEUE: usize = 64;

/// Sender half of one node's message queue.
///
/// Only valid for the [`RenderGraph`] that created it.
pub struct NodeHandle<M: Send + 'static> {
    id: NodeId,
    graph: u32,
    sender: Producer<M>,
    dropped: u64,
    _marker: PhantomData<M>,
}

impl<M: Send + 'static> NodeHandle<M> {
    /// Queue a message for the node's next block.
    ///
    /// A full queue hands the message back and counts it as dropped.
    pub fn send(&mut self, msg: M) -> core::result::Result<(), M> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(v)| {
            self.dropped += 1;
            v
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Messages rejected by a full queue so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Object-safe face of an [`AudioNode`] and its inbox
trait Render: Send {
    fn render(&mut self, inputs: &[Input], outputs: &mut [Buffer]);
}

struct Slot<N: AudioNode> {
    node: N,
    inbox: Consumer<N::Message>,
    ctx: ProcessContext,
}

impl<N: AudioNode> Render for Slot<N> {
    fn render(&mut self, inputs: &[Input], outputs: &mut [Buffer]) {
        let inbox = &mut self.inbox;
        let messages = core::iter::from_fn(|| inbox.pop().ok());
        self.node.process(&self.ctx, messages, inputs, outputs);
    }
}

struct Erased(Box<dyn Render>);

impl dasp_graph::Node for Erased {
    fn process(&mut self, inputs: &[Input], outputs: &mut [Buffer]) {
        self.0.render(inputs, outputs);
    }
}

type InnerGraph = petgraph::graph::Graph<NodeData<Erased>, ()>;

/// A render graph at a fixed sample rate.
///
/// Built on the control side, then moved whole into the render thread; the
/// render thread only ever calls [`process`](Self::process) and reads
/// [`output`](Self::output). Edges must keep the graph acyclic.
pub struct RenderGraph {
    id: u32,
    graph: InnerGraph,
    processor: Processor<InnerGraph>,
    ctx: ProcessContext,
    nodes: HashMap<NodeId, NodeIndex>,
    terminal: Option<NodeIndex>,
}

impl RenderGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            id: NEXT_GRAPH.fetch_add(1, Ordering::Relaxed),
            graph: InnerGraph::with_capacity(16, 16),
            processor: Processor::with_capacity(16),
            ctx: ProcessContext {
                sample_rate,
                buffer_size: Buffer::LEN,
            },
            nodes: HashMap::new(),
            terminal: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.ctx.sample_rate
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn add<N: AudioNode>(&mut self, node: N) -> NodeHandle<N::Message> {
        self.add_with_queue(node, NODE_QUEUE)
    }

    pub fn add_with_queue<N: AudioNode>(
        &mut self,
        node: N,
        capacity: usize,
    ) -> NodeHandle<N::Message> {
        let (sender, inbox) = RingBuffer::new(capacity);
        let stereo = node.num_outputs() != 1;
        let slot = Erased(Box::new(Slot {
            node,
            inbox,
            ctx: self.ctx,
        }));
        let index = self.graph.add_node(if stereo {
            NodeData::new2(slot)
        } else {
            NodeData::new1(slot)
        });

        let id = NodeId(index.index() as u32);
        self.nodes.insert(id, index);
        NodeHandle {
            id,
            graph: self.id,
            sender,
            dropped: 0,
            _marker: PhantomData,
        }
    }

    fn index_of<M: Send + 'static>(&self, handle: &NodeHandle<M>) -> Result<NodeIndex> {
        if handle.graph != self.id {
            return Err(Error::InvalidTopology(format!(
                "node {:?} belongs to another graph",
                handle.id
            )));
        }
        self.nodes
            .get(&handle.id)
            .copied()
            .ok_or_else(|| Error::InvalidTopology(format!("unknown node {:?}", handle.id)))
    }

    /// Feed the output of `from` into `to`. Edges that would close a cycle
    /// are rejected and leave the graph unchanged.
    pub fn connect<M1, M2>(&mut self, from: &NodeHandle<M1>, to: &NodeHandle<M2>) -> Result<()>
    where
        M1: Send + 'static,
        M2: Send + 'static,
    {
        let a = self.index_of(from)?;
        let b = self.index_of(to)?;
        let edge = self.graph.add_edge(a, b, ());
        if petgraph::algo::is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::InvalidTopology(format!(
                "edge {:?} -> {:?} would create a cycle",
                from.id, to.id
            )));
        }
        Ok(())
    }

    /// Node whose buffers become the graph output
    pub fn set_terminal<M: Send + 'static>(&mut self, handle: &NodeHandle<M>) -> Result<()> {
        self.terminal = Some(self.index_of(handle)?);
        Ok(())
    }

    /// Render one block up to the terminal node
    pub fn process(&mut self) {
        if let Some(terminal) = self.terminal {
            self.processor.process(&mut self.graph, terminal);
        }
    }

    /// Terminal buffers from the last [`process`](Self::process) call; empty
    /// without a terminal
    pub fn output(&self) -> &[Buffer] {
        match self.terminal {
            Some(terminal) => &self.graph[terminal].buffers,
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adds its input to a constant
    struct Offset(f32);

    impl AudioNode for Offset {
        type Message = f32;

        fn process(
            &mut self,
            _ctx: &ProcessContext,
            messages: impl Iterator<Item = f32>,
            inputs: &[Input],
            outputs: &mut [Buffer],
        ) {
            if let Some(v) = messages.last() {
                self.0 = v;
            }
            for (ch, out) in outputs.iter_mut().enumerate() {
                let base = inputs
                    .first()
                    .and_then(|input| input.buffers().get(ch))
                    .map_or(0.0, |b| b[0]);
                out.iter_mut().for_each(|s| *s = base + self.0);
            }
        }

        fn num_inputs(&self) -> usize {
            1
        }
    }

    #[test]
    fn renders_a_chain_in_order() {
        let mut graph = RenderGraph::new(48000);
        let a = graph.add(Offset(1.0));
        let mut b = graph.add(Offset(2.0));
        graph.connect(&a, &b).unwrap();
        graph.set_terminal(&b).unwrap();

        graph.process();
        assert_eq!(graph.output()[0][0], 3.0);

        b.send(10.0).unwrap();
        graph.process();
        assert_eq!(graph.output()[1][Buffer::LEN - 1], 11.0);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = RenderGraph::new(48000);
        let a = graph.add(Offset(0.0));
        let b = graph.add(Offset(0.0));
        graph.connect(&a, &b).unwrap();
        assert!(matches!(graph.connect(&b, &a), Err(Error::InvalidTopology(_))));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn handles_from_other_graphs_are_rejected() {
        let mut first = RenderGraph::new(48000);
        let mut second = RenderGraph::new(48000);
        let a = first.add(Offset(0.0));
        let b = second.add(Offset(0.0));
        assert!(first.connect(&a, &b).is_err());
        assert!(first.set_terminal(&b).is_err());
        assert!(first.output().is_empty());
    }

    #[test]
    fn full_queue_counts_drops() {
        let mut graph = RenderGraph::new(48000);
        let mut a = graph.add_with_queue(Offset(0.0), 2);
        assert!(a.send(1.0).is_ok());
        assert!(a.send(2.0).is_ok());
        assert_eq!(a.send(3.0), Err(3.0));
        assert_eq!(a.dropped(), 1);
    }
}
