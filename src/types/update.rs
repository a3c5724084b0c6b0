use crate::types::request::{Request, SeqNo};

/// A message flowing into the router's single input channel, from the
/// relay or from a live manager task.
///
/// Unlike the original multi-process design, the relay and every manager
/// are tasks within the router's own process, so this enum is never
/// serialized onto a byte-oriented channel: it travels as-is over a
/// `tokio::sync::mpsc::UnboundedSender<Update>` cloned into every task that
/// can produce one.
#[derive(Debug)]
pub enum Update {
    /// A freshly received request from the relay.
    Request(Request),
    /// Transformation `index` completed one more running instance.
    FinishedOp(usize),
    /// The request at `seq` has terminated; `op_success[k]` is whether
    /// `ops[k]` completed successfully (aligned 1:1, duplicates included).
    /// `op_success` is not necessarily fully populated on failure: any
    /// index from the first failure onward is `false`, including steps
    /// that were never started.
    RequestFinished { seq: SeqNo, op_success: Vec<bool> },
    /// The relay's rendezvous point has closed; stop admitting new
    /// requests.
    ServerDisconnected,
}
