pub mod fifo_drop_oldest_queue;
pub mod isolated_forwarder;

pub use fifo_drop_oldest_queue::*;
pub use isolated_forwarder::*;

pub enum QueueKind {
    /// Bounded buffer that evicts the oldest entry on overflow.
    FifoDropOldest { capacity: usize },
    /// Dedicated drain task feeding a bounded channel; publishes never block.
    Isolated { output_buffer: usize },
}
