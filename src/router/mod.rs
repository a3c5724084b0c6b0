pub mod inflight;
pub mod sorter;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::error::SorterFullError;
use crate::types::catalog::Catalog;
use crate::types::request::{Priority, RequestKind, SeqNo};
use crate::types::update::Update;
use inflight::InFlightTable;
use sorter::RequestSorter;

/// What the router hands back to whichever task is responsible for opening
/// the client's reply FIFO and writing a message into it.
///
/// Kept separate from the act of writing so the router's own loop stays
/// synchronous and testable: tests can drive `Router::handle` directly and
/// assert on the sequence of replies it produced, without any filesystem
/// I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReply {
    pub reply_path: std::path::PathBuf,
    pub message: String,
    /// Whether this is the final message for this client (the reply FIFO
    /// should be closed after it).
    pub terminal: bool,
}

impl ClientReply {
    fn new(reply_path: std::path::PathBuf, message: impl Into<String>, terminal: bool) -> Self {
        ClientReply {
            reply_path,
            message: message.into(),
            terminal,
        }
    }
}

/// A request handed off to a manager task for execution, carrying enough
/// state for the manager to run the pipeline and report back.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub seq: SeqNo,
    pub input: std::path::PathBuf,
    pub output: std::path::PathBuf,
    pub op_names: Vec<String>,
    pub op_indices: Vec<usize>,
}

/// The outcome of feeding one [`Update`] through the router: zero
/// or more client replies to send, and at most one job to dispatch to a
/// manager (scheduling happens once per update, after the update is fully
/// processed).
#[derive(Debug, Default)]
pub struct RouterEffects {
    pub replies: Vec<ClientReply>,
    pub dispatch: Option<Dispatch>,
}

/// The router's scheduling state: the in-flight table, the per-transformation
/// sorter, and the availability vector. Holds no I/O handles — it is driven
/// entirely by [`Update`] values and produces [`RouterEffects`] describing
/// what the caller should do with the outside world.
pub struct Router {
    catalog: Catalog,
    sorter: RequestSorter,
    table: InFlightTable,
    availability: Vec<u32>,
    accepting: bool,
    in_flight: usize,
    running_managers: usize,
    max_concurrent_jobs: Option<usize>,
}

impl Router {
    pub fn new(catalog: Catalog, queue_capacity: usize, max_concurrent_jobs: Option<usize>) -> Self {
        let availability = catalog.initial_availability();
        let sorter = RequestSorter::new(catalog.len(), queue_capacity);
        Router {
            catalog,
            sorter,
            table: InFlightTable::new(),
            availability,
            accepting: true,
            in_flight: 0,
            running_managers: 0,
            max_concurrent_jobs,
        }
    }

    /// Whether the router should keep running: while still accepting new
    /// requests, or while any request is still in flight (mirrors the `up ||
    /// inRouter` loop condition).
    pub fn is_alive(&self) -> bool {
        self.accepting || self.in_flight > 0
    }

    /// Feeds one update through the router, producing the replies and (at
    /// most one) dispatch it provokes, then runs a single scheduling step.
    #[instrument(skip(self, update), fields(in_flight = self.in_flight))]
    pub fn handle(&mut self, update: Update) -> RouterEffects {
        let mut effects = RouterEffects::default();

        match update {
            Update::Request(request) => self.handle_request(request, &mut effects),
            Update::FinishedOp(index) => {
                self.availability[index] += 1;
                debug!(transformation = index, "operation slot freed");
            }
            Update::RequestFinished { seq, op_success } => {
                self.handle_request_finished(seq, op_success, &mut effects);
            }
            Update::ServerDisconnected => {
                info!("rendezvous point closed, draining in-flight requests");
                self.accepting = false;
            }
        }

        if let Some(dispatch) = self.schedule(&mut effects) {
            effects.dispatch = Some(dispatch);
        }

        effects
    }

    fn handle_request(&mut self, request: crate::types::request::Request, effects: &mut RouterEffects) {
        match &request.kind {
            RequestKind::Status => {
                let message = self.status_report();
                effects
                    .replies
                    .push(ClientReply::new(request.reply_path, message, true));
            }
            RequestKind::ProcessFile(_) => {
                let request = match request.validate(&self.catalog) {
                    Ok(request) => request,
                    Err(err) => {
                        warn!(error = %err, "rejected request");
                        effects.replies.push(ClientReply::new(
                            request.reply_path.clone(),
                            "Request received",
                            false,
                        ));
                        effects.replies.push(ClientReply::new(
                            request.reply_path.clone(),
                            "Request not considered valid",
                            false,
                        ));
                        effects
                            .replies
                            .push(ClientReply::new(request.reply_path, "Concluded", true));
                        return;
                    }
                };

                let pf = request.as_process_file().expect("validated as ProcessFile");
                let distinct = pf.distinct_op_indices();
                let priority = pf.priority;
                let reply_path = request.reply_path.clone();

                match self.enqueue(request, priority, &distinct) {
                    Ok(()) => {
                        self.in_flight += 1;
                        effects
                            .replies
                            .push(ClientReply::new(reply_path, "Pending", false));
                    }
                    Err(err) => {
                        warn!(error = %err, "sorter queue full, rejecting request");
                        effects
                            .replies
                            .push(ClientReply::new(reply_path.clone(), "Request received", false));
                        effects.replies.push(ClientReply::new(
                            reply_path.clone(),
                            "Request not considered valid",
                            false,
                        ));
                        effects
                            .replies
                            .push(ClientReply::new(reply_path, "Concluded", true));
                    }
                }
            }
        }
    }

    fn enqueue(
        &mut self,
        request: crate::types::request::Request,
        priority: Priority,
        distinct: &[usize],
    ) -> Result<(), SorterFullError> {
        // Reserve the in-flight slot only after the sorter confirms room, so
        // a rejected request never occupies a sequence number.
        let seq = self.table.insert(request);
        match self.sorter.enqueue(seq, priority, distinct) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.table.remove(seq);
                Err(err)
            }
        }
    }

    fn handle_request_finished(&mut self, seq: SeqNo, op_success: Vec<bool>, effects: &mut RouterEffects) {
        let Some(request) = self.table.remove(seq) else {
            warn!(seq = %seq, "request finished for unknown sequence number");
            return;
        };

        self.in_flight -= 1;
        self.running_managers -= 1;

        let pf = request
            .as_process_file()
            .expect("only PROCESS_FILE requests reach RequestFinished");
        for (idx, &ok) in op_success.iter().enumerate() {
            if !ok {
                self.availability[pf.op_indices[idx]] += 1;
            }
        }

        let message = final_message(&request);
        info!(seq = %seq, "request finished");
        effects.replies.push(ClientReply::new(request.reply_path, message, true));
    }

    fn schedule(&mut self, effects: &mut RouterEffects) -> Option<Dispatch> {
        if let Some(max) = self.max_concurrent_jobs {
            if self.running_managers >= max {
                return None;
            }
        }

        let seq = self.sorter.next_in_line(&self.availability, &self.table)?;

        let request = self.table.get_mut(seq).expect("scheduled seq must be live");
        let pf = request
            .as_process_file_mut()
            .expect("sorter only ever holds PROCESS_FILE requests");
        pf.running = true;

        for &i in &pf.op_indices {
            self.availability[i] -= 1;
        }

        self.running_managers += 1;

        let dispatch = Dispatch {
            seq,
            input: pf.input.clone(),
            output: pf.output.clone(),
            op_names: pf.ops.clone(),
            op_indices: pf.op_indices.clone(),
        };

        effects
            .replies
            .push(ClientReply::new(request.reply_path.clone(), "Processing", false));

        Some(dispatch)
    }

    /// Builds the STATUS reply text: one line per in-flight request
    /// followed by one line per transformation's running/capacity count,
    /// for each in-flight request, then for each transformation's availability.
    fn status_report(&self) -> String {
        let mut out = String::new();
        for (seq, request) in self.table.iter() {
            let pf = request
                .as_process_file()
                .expect("only PROCESS_FILE requests are tracked in the in-flight table");
            let state = if pf.running { "Running" } else { "Pending" };
            out.push_str(&format!("{state} task #{seq}:"));
            out.push_str(&format!("PRIORITY: {} {} -> ", pf.priority, pf.input.display()));
            for op in &pf.ops {
                out.push_str(op);
                out.push_str(" -> ");
            }
            out.push_str(&pf.output.display().to_string());
            out.push('\n');
        }

        for i in 0..self.catalog.len() {
            let capacity = self.catalog.capacity(i);
            let running = capacity - self.availability[i];
            out.push_str(&format!(
                "transform {}: {}/{} (running/max)\n",
                self.catalog.name(i),
                running,
                capacity
            ));
        }

        out
    }
}

/// Builds the terminal reply for a finished request: always
/// "Concluded (bytes input: .., bytes output: ..)", counting whatever bytes
/// actually landed in the output file — the only termination shape defined
/// for PROCESS_FILE, whether the chain succeeded or failed partway.
fn final_message(request: &crate::types::request::Request) -> String {
    let pf = request
        .as_process_file()
        .expect("only PROCESS_FILE requests reach RequestFinished");

    concluded_message(&pf.input, &pf.output)
}

fn concluded_message(input: &std::path::Path, output: &std::path::Path) -> String {
    let in_len = std::fs::metadata(input).map(|m| m.len()).unwrap_or(0);
    let out_len = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    format!("Concluded (bytes input: {in_len}, bytes output: {out_len})")
}

/// Drives update production: wraps the channel receiver the relay and
/// managers feed, producing a stream of [`Update`] for [`Router::handle`].
pub async fn run(
    mut router: Router,
    mut updates: mpsc::UnboundedReceiver<Update>,
    mut on_effects: impl FnMut(RouterEffects),
) {
    while router.is_alive() {
        let Some(update) = updates.recv().await else {
            break;
        };
        let effects = router.handle(update);
        on_effects(effects);
    }
    info!("router exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::request::Request;

    fn catalog() -> Catalog {
        Catalog::parse("gzip 1\nnop 1\n").unwrap()
    }

    #[test]
    fn status_request_replies_immediately() {
        let mut router = Router::new(catalog(), 10, None);
        let update = Update::Request(Request::new_status("/tmp/r".into()));
        let effects = router.handle(update);
        assert_eq!(effects.replies.len(), 1);
        assert!(effects.replies[0].terminal);
    }

    #[test]
    fn valid_process_file_gets_pending_then_processing() {
        let mut router = Router::new(catalog(), 10, None);
        let req = Request::new_process_file(
            "/tmp/r".into(),
            Priority::new(3).unwrap(),
            "/tmp/in".into(),
            "/tmp/out".into(),
            vec!["gzip".into()],
        );
        let effects = router.handle(Update::Request(req));
        let messages: Vec<_> = effects.replies.iter().map(|r| r.message.clone()).collect();
        assert_eq!(messages, vec!["Pending", "Processing"]);
        assert!(effects.dispatch.is_some());
    }

    #[test]
    fn unknown_transformation_is_rejected() {
        let mut router = Router::new(catalog(), 10, None);
        let req = Request::new_process_file(
            "/tmp/r".into(),
            Priority::new(0).unwrap(),
            "/tmp/in".into(),
            "/tmp/out".into(),
            vec!["unzip".into()],
        );
        let effects = router.handle(Update::Request(req));
        let messages: Vec<_> = effects.replies.iter().map(|r| r.message.clone()).collect();
        assert_eq!(
            messages,
            vec!["Request received", "Request not considered valid", "Concluded"]
        );
        assert!(effects.dispatch.is_none());
    }

    #[test]
    fn finished_op_frees_capacity_for_the_next_request() {
        let mut router = Router::new(catalog(), 10, None);
        let make = |priority| {
            Request::new_process_file(
                "/tmp/r".into(),
                Priority::new(priority).unwrap(),
                "/tmp/in".into(),
                "/tmp/out".into(),
                vec!["gzip".into()],
            )
        };

        let first = router.handle(Update::Request(make(0)));
        assert!(first.dispatch.is_some());

        let second = router.handle(Update::Request(make(0)));
        assert!(second.dispatch.is_none(), "gzip has only one instance");

        let freed = router.handle(Update::FinishedOp(0));
        assert!(
            freed.dispatch.is_some(),
            "freeing gzip's one slot should let the queued second request dispatch immediately"
        );
    }

    #[test]
    fn server_disconnected_stops_accepting_but_stays_alive_while_in_flight() {
        let mut router = Router::new(catalog(), 10, None);
        let req = Request::new_process_file(
            "/tmp/r".into(),
            Priority::new(0).unwrap(),
            "/tmp/in".into(),
            "/tmp/out".into(),
            vec!["gzip".into()],
        );
        router.handle(Update::Request(req));
        assert!(router.is_alive());

        router.handle(Update::ServerDisconnected);
        assert!(router.is_alive(), "still one request in flight");
    }

    #[test]
    fn server_disconnected_drains_to_exit_once_the_last_job_finishes() {
        let mut router = Router::new(catalog(), 10, None);
        let req = Request::new_process_file(
            "/tmp/r".into(),
            Priority::new(0).unwrap(),
            "/tmp/in".into(),
            "/tmp/out".into(),
            vec!["gzip".into()],
        );
        let dispatch = router.handle(Update::Request(req)).dispatch.unwrap();

        router.handle(Update::ServerDisconnected);
        assert!(router.is_alive(), "still draining the in-flight job");

        router.handle(Update::FinishedOp(0));
        router.handle(Update::RequestFinished {
            seq: dispatch.seq,
            op_success: vec![true],
        });
        assert!(!router.is_alive(), "no admission open and nothing left in flight");
    }

    #[test]
    fn request_finished_reports_byte_counts_and_releases_unfinished_operations() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::write(&input, b"hello").unwrap();

        let mut router = Router::new(catalog(), 10, None);
        let req = Request::new_process_file(
            "/tmp/r".into(),
            Priority::new(0).unwrap(),
            input.clone(),
            output.clone(),
            vec!["gzip".into(), "nop".into()],
        );
        let dispatch = router.handle(Update::Request(req)).dispatch.unwrap();
        assert_eq!(dispatch.op_indices, vec![0, 1]);

        // gzip (index 0) completes; nop (index 1) never reports FinishedOp
        // before the manager gives up and reports the whole request failed.
        router.handle(Update::FinishedOp(0));
        let finished = router.handle(Update::RequestFinished {
            seq: dispatch.seq,
            op_success: vec![true, false],
        });

        assert_eq!(finished.replies.len(), 1);
        assert!(finished.replies[0].terminal);
        assert_eq!(finished.replies[0].message, "Concluded (bytes input: 5, bytes output: 0)");

        // nop's slot must have been released even though it never finished,
        // so a fresh request needing it can be dispatched right away.
        let next = Request::new_process_file(
            "/tmp/r2".into(),
            Priority::new(0).unwrap(),
            input,
            output,
            vec!["nop".into()],
        );
        let next_effects = router.handle(Update::Request(next));
        assert!(
            next_effects.dispatch.is_some(),
            "nop's availability should have been released on the failed RequestFinished"
        );
    }
}
