use crate::error::SorterFullError;
use crate::router::inflight::InFlightTable;
use crate::types::heap::{PriorityHeap, QueueEntry};
use crate::types::request::{Priority, SeqNo};

/// The default per-queue capacity, matching the reference server's
/// `QUEUE_SIZE` constant (server/include/pqueue.h in the original).
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// An indexed family of priority queues Q_0..Q_{N-1}, one per transformation
/// in the catalog, implementing the admission and joint-feasibility selection rules.
///
/// Queues store only [`QueueEntry`] (priority + sequence number), never the
/// request itself — the [`InFlightTable`] passed into [`Self::next_in_line`]
/// remains the sole owner.
#[derive(Debug)]
pub struct RequestSorter {
    queues: Vec<PriorityHeap>,
}

impl RequestSorter {
    pub fn new(num_transformations: usize, queue_capacity: usize) -> Self {
        RequestSorter {
            queues: (0..num_transformations)
                .map(|_| PriorityHeap::new(queue_capacity))
                .collect(),
        }
    }

    /// Pushes `seq` into every queue for a transformation occurring in
    /// `op_indices` (deduplicated — a request with a repeated transformation
    /// still occupies that queue once). All-or-nothing: if any required
    /// queue is full, no push occurs and the first saturated queue's index
    /// is reported.
    pub fn enqueue(
        &mut self,
        seq: SeqNo,
        priority: Priority,
        distinct_op_indices: &[usize],
    ) -> Result<(), SorterFullError> {
        for &i in distinct_op_indices {
            if self.queues[i].is_full() {
                return Err(SorterFullError { index: i });
            }
        }

        let entry = QueueEntry { priority, seq };
        for &i in distinct_op_indices {
            let pushed = self.queues[i].push(entry);
            debug_assert!(pushed, "queue fullness was just checked above");
        }

        Ok(())
    }

    /// Selects the best feasible request, if any, per the joint-feasibility
    /// rule, and pops it from every queue it occupied.
    pub fn next_in_line(&mut self, availability: &[u32], table: &InFlightTable) -> Option<SeqNo> {
        let n = self.queues.len();
        let heads: Vec<Option<QueueEntry>> = self.queues.iter().map(PriorityHeap::peek).collect();

        // Step 1: mark each transformation blocked or free.
        let mut blocked = vec![false; n];
        for i in 0..n {
            if availability[i] == 0 {
                blocked[i] = true;
                continue;
            }
            if let Some(head) = heads[i] {
                let needed = table.occurrences_of(head.seq, i);
                if needed > availability[i] {
                    blocked[i] = true;
                }
            }
        }

        // Steps 2-3: among approved candidates, pick highest priority, then
        // earliest sequence number.
        let mut winner: Option<QueueEntry> = None;
        for i in 0..n {
            if blocked[i] {
                continue;
            }
            let Some(head) = heads[i] else {
                continue;
            };

            let distinct = distinct_indices(table.op_indices(head.seq));
            let approved = distinct
                .iter()
                .all(|&j| !blocked[j] && heads[j].map(|h| h.seq) == Some(head.seq));

            if approved {
                let better = match winner {
                    None => true,
                    Some(w) => head > w,
                };
                if better {
                    winner = Some(head);
                }
            }
        }

        // Step 4: pop the winner from every queue it occupies.
        if let Some(w) = winner {
            let distinct = distinct_indices(table.op_indices(w.seq));
            for j in distinct {
                self.queues[j].pop();
            }
        }

        // Step 5.
        winner.map(|w| w.seq)
    }
}

fn distinct_indices(op_indices: &[usize]) -> Vec<usize> {
    let mut v = op_indices.to_vec();
    v.sort_unstable();
    v.dedup();
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::request::Request;

    fn insert(table: &mut InFlightTable, priority: u32, ops: &[&str], op_indices: &[usize]) -> SeqNo {
        let mut req = Request::new_process_file(
            "/tmp/r".into(),
            Priority::new(priority).unwrap(),
            "/tmp/in".into(),
            "/tmp/out".into(),
            ops.iter().map(|s| s.to_string()).collect(),
        );
        req.as_process_file_mut().unwrap().op_indices = op_indices.to_vec();
        table.insert(req)
    }

    #[test]
    fn enqueue_is_all_or_nothing() {
        let mut sorter = RequestSorter::new(2, 1);
        let mut table = InFlightTable::new();
        let s0 = insert(&mut table, 0, &["x"], &[0]);
        sorter.enqueue(s0, Priority::new(0).unwrap(), &[0]).unwrap();

        // Queue 0 now full (capacity 1); a request needing [0, 1] must fail
        // without touching queue 1.
        let s1 = insert(&mut table, 0, &["x", "y"], &[0, 1]);
        let err = sorter
            .enqueue(s1, Priority::new(0).unwrap(), &[0, 1])
            .unwrap_err();
        assert_eq!(err.index, 0);

        // queue 1 untouched: a fresh request using only transformation 1
        // must still be able to enqueue.
        let s2 = insert(&mut table, 0, &["y"], &[1]);
        assert!(sorter.enqueue(s2, Priority::new(0).unwrap(), &[1]).is_ok());
    }

    #[test]
    fn priority_preempts_when_disjoint() {
        let mut sorter = RequestSorter::new(2, 10);
        let mut table = InFlightTable::new();
        let low = insert(&mut table, 0, &["x"], &[0]);
        let high = insert(&mut table, 5, &["y"], &[1]);
        sorter.enqueue(low, Priority::new(0).unwrap(), &[0]).unwrap();
        sorter.enqueue(high, Priority::new(5).unwrap(), &[1]).unwrap();

        let avail = vec![1, 1];
        let winner = sorter.next_in_line(&avail, &table);
        assert_eq!(winner, Some(high));
    }

    #[test]
    fn fifo_tie_break_under_equal_priority() {
        let mut sorter = RequestSorter::new(1, 10);
        let mut table = InFlightTable::new();
        let first = insert(&mut table, 2, &["x"], &[0]);
        let second = insert(&mut table, 2, &["x"], &[0]);
        sorter.enqueue(first, Priority::new(2).unwrap(), &[0]).unwrap();
        sorter.enqueue(second, Priority::new(2).unwrap(), &[0]).unwrap();

        let avail = vec![1];
        assert_eq!(sorter.next_in_line(&avail, &table), Some(first));
    }

    #[test]
    fn blocked_when_capacity_insufficient() {
        let mut sorter = RequestSorter::new(1, 10);
        let mut table = InFlightTable::new();
        // needs two instances of transform 0 but only one is available
        let seq = insert(&mut table, 0, &["x", "x"], &[0, 0]);
        sorter.enqueue(seq, Priority::new(0).unwrap(), &[0]).unwrap();

        assert_eq!(sorter.next_in_line(&[1], &table), None);
        assert_eq!(sorter.next_in_line(&[2], &table), Some(seq));
    }

    #[test]
    fn cross_queue_coupling_requires_joint_head() {
        // Request A uses x and y; request B uses only x with higher priority.
        // B is the head of Q_x and needs only Q_x's head to match itself, so
        // it's approved and wins first despite A sitting at the head of two
        // queues. Once B is gone, A is the sole remaining candidate on both
        // of its queues and wins next.
        let mut sorter = RequestSorter::new(2, 10);
        let mut table = InFlightTable::new();
        let a = insert(&mut table, 2, &["x", "y"], &[0, 1]);
        let b = insert(&mut table, 5, &["x"], &[0]);
        sorter.enqueue(a, Priority::new(2).unwrap(), &[0, 1]).unwrap();
        sorter.enqueue(b, Priority::new(5).unwrap(), &[0]).unwrap();

        let avail = vec![1, 1];
        assert_eq!(sorter.next_in_line(&avail, &table), Some(b));
        assert_eq!(sorter.next_in_line(&avail, &table), Some(a));
    }

    #[test]
    fn availability_never_goes_negative_in_joint_selection() {
        let mut sorter = RequestSorter::new(2, 10);
        let mut table = InFlightTable::new();
        let a = insert(&mut table, 2, &["x", "y"], &[0, 1]);
        sorter.enqueue(a, Priority::new(2).unwrap(), &[0, 1]).unwrap();

        let mut avail = vec![1, 1];
        let winner = sorter.next_in_line(&avail, &table);
        assert_eq!(winner, Some(a));
        for &i in table.op_indices(a).to_vec().iter() {
            avail[i] -= 1;
        }
        assert!(avail.iter().all(|&a| a == 0));
    }
}
