// Shared pieces of the qmaster workspace: leveled printing, the infostring
// codec, address helpers and the packet queue.

pub mod common;
pub mod net;
pub mod net_queue;
pub mod q_shared;
