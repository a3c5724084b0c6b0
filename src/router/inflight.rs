use crate::types::request::{ProcessFile, Request, SeqNo};

/// A dynamically sized sparse array of live requests keyed by sequence
/// number, with a free-list of reusable slots.
///
/// Used only for status reporting and to dereference a completion update
/// back to its request — the sorter's queues never hold a `Request`
/// directly, only the `SeqNo` that indexes here.
#[derive(Debug, Default)]
pub struct InFlightTable {
    slots: Vec<Option<Request>>,
    free: Vec<usize>,
}

impl InFlightTable {
    pub fn new() -> Self {
        InFlightTable {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Inserts `request`, reusing a freed slot if one is available, else
    /// growing the backing storage by one. Returns the assigned sequence
    /// number.
    pub fn insert(&mut self, request: Request) -> SeqNo {
        if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(request);
            SeqNo(slot as u64)
        } else {
            self.slots.push(Some(request));
            SeqNo((self.slots.len() - 1) as u64)
        }
    }

    pub fn remove(&mut self, seq: SeqNo) -> Option<Request> {
        let slot = seq.0 as usize;
        let request = self.slots.get_mut(slot).and_then(Option::take);
        if request.is_some() {
            self.free.push(slot);
        }
        request
    }

    pub fn get(&self, seq: SeqNo) -> Option<&Request> {
        self.slots.get(seq.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, seq: SeqNo) -> Option<&mut Request> {
        self.slots.get_mut(seq.0 as usize).and_then(Option::as_mut)
    }

    /// Yields `(seq, request)` in slot order, skipping empty slots — used
    /// by the STATUS report.
    pub fn iter(&self) -> impl Iterator<Item = (SeqNo, &Request)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (SeqNo(i as u64), r)))
    }

    /// The resolved operation indices of the PROCESS_FILE request at
    /// `seq`. Panics if `seq` does not refer to a live PROCESS_FILE
    /// request: the sorter only ever holds sequence numbers of admitted
    /// PROCESS_FILE requests, so this is an internal invariant violation,
    /// not a user-facing error.
    pub fn op_indices(&self, seq: SeqNo) -> &[usize] {
        &self.process_file(seq).op_indices
    }

    /// How many times the request at `seq` uses transformation `index` in
    /// its pipeline, used by the sorter's joint-feasibility blocking check.
    pub fn occurrences_of(&self, seq: SeqNo, index: usize) -> u32 {
        self.process_file(seq).occurrences_of(index)
    }

    fn process_file(&self, seq: SeqNo) -> &ProcessFile {
        self.get(seq)
            .and_then(Request::as_process_file)
            .expect("sorter referenced a seq with no live PROCESS_FILE request")
    }
}
