//! The external persistence boundary.
//!
//! The core never owns the system of record for dialogue state — it
//! consumes a narrow set of operations against it. [`Persistence`] is that
//! boundary; [`memory::InMemoryPersistence`] is a reference/test double,
//! not a production store.

use async_trait::async_trait;
use ic_domain::error::Result;
use ic_domain::run::{Action, ActionStatus, Run, RunStatus};
use ic_domain::tool::Message;
use ic_context::builder::AssistantProfile;

/// Operations the orchestration core needs from the system of record.
///
/// Every method is `async fn` returning `Result<T>`; a failure is always a
/// domain [`ic_domain::error::Error`], never a panic. Grouped by the
/// distilled spec's External Interfaces table.
#[async_trait]
pub trait Persistence: Send + Sync {
    // ── messages ─────────────────────────────────────────────────
    async fn create_message(&self, thread_id: &str, run_id: Option<&str>, message: Message) -> Result<()>;
    async fn get_formatted_messages(&self, thread_id: &str) -> Result<Vec<Message>>;
    async fn submit_tool_output(
        &self,
        thread_id: &str,
        tool_call_id: &str,
        name: Option<&str>,
        content: &str,
        is_error: bool,
    ) -> Result<()>;
    async fn save_assistant_message_chunk(&self, thread_id: &str, run_id: &str, text: &str) -> Result<()>;

    // ── runs ─────────────────────────────────────────────────────
    async fn create_run(&self, run: Run) -> Result<Run>;
    async fn retrieve_run(&self, run_id: &str) -> Result<Run>;
    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<()>;

    // ── actions ──────────────────────────────────────────────────
    async fn create_action(&self, action: Action) -> Result<Action>;
    async fn update_action(
        &self,
        action_id: &str,
        status: ActionStatus,
        result: Option<String>,
    ) -> Result<()>;
    async fn get_pending_actions(&self, run_id: &str) -> Result<Vec<Action>>;

    // ── assistants / threads / files ────────────────────────────
    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<AssistantProfile>;
    async fn create_thread(&self) -> Result<String>;
    async fn get_file_as_base64(&self, file_id: &str) -> Result<String>;

    // ── narrow external tool boundaries ─────────────────────────
    // Raw fetch only — the SERP result-link regex parsing and pagination
    // bookkeeping for `perform_web_search`/`read_web_page`/`scroll_web_page`
    // live in `tools::platform`, not here.
    async fn web_read(&self, url: &str) -> Result<String>;
    async fn web_scroll(&self, url: &str, page: u32) -> Result<String>;
    async fn web_search(&self, query: &str) -> Result<String>;
    async fn scratchpad_read(&self, thread_id: &str) -> Result<String>;
    async fn scratchpad_update(&self, thread_id: &str, content: &str) -> Result<()>;
    async fn scratchpad_append(&self, thread_id: &str, content: &str) -> Result<()>;

    // ── vectors (Non-goal: never implements search itself) ──────
    async fn unattended_file_search(&self, store_id: &str, query: &str) -> Result<Vec<String>>;
    async fn get_or_create_file_search_store(&self, assistant_id: &str) -> Result<String>;
}

pub mod memory {
    //! `InMemoryPersistence` — reference implementation backing the test
    //! suite. The Run ring/index/JSONL append is grounded directly on
    //! `RunStore` (bounded `VecDeque` + `HashMap<id, logical_seq>` index
    //! with a `base_seq` offset so `pop_front` never triggers bulk index
    //! renumbering); Threads/Messages/Actions use plain `HashMap`s since
    //! nothing about their access pattern needs ring eviction.

    use super::*;
    use ic_domain::error::Error;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::io::Write;
    use std::path::{Path, PathBuf};

    /// Runs kept in memory before the oldest is evicted from the ring
    /// (still durable on disk via the JSONL log).
    const MAX_RUNS_IN_MEMORY: usize = 500;

    struct RunRing {
        runs: VecDeque<Run>,
        index: HashMap<String, usize>,
        base_seq: usize,
    }

    impl RunRing {
        fn new() -> Self {
            Self {
                runs: VecDeque::new(),
                index: HashMap::new(),
                base_seq: 0,
            }
        }

        fn deque_idx(&self, seq: usize) -> usize {
            seq - self.base_seq
        }

        fn get(&self, run_id: &str) -> Option<&Run> {
            let seq = *self.index.get(run_id)?;
            self.runs.get(self.deque_idx(seq))
        }

        fn get_mut(&mut self, run_id: &str) -> Option<&mut Run> {
            let seq = *self.index.get(run_id)?;
            let idx = self.deque_idx(seq);
            self.runs.get_mut(idx)
        }

        fn push_back(&mut self, run: Run) {
            let seq = self.base_seq + self.runs.len();
            self.index.insert(run.id.clone(), seq);
            self.runs.push_back(run);
        }

        fn pop_front(&mut self) {
            if let Some(run) = self.runs.pop_front() {
                self.index.remove(&run.id);
                self.base_seq += 1;
            }
        }
    }

    /// Reference persistence implementation. Not for production use — it
    /// holds everything except the run ring in plain `HashMap`s with no
    /// eviction, and its scratchpad/web/vector operations are deterministic
    /// stand-ins for the narrow external collaborators the distilled spec
    /// places out of scope.
    pub struct InMemoryPersistence {
        runs: Mutex<RunRing>,
        actions: Mutex<HashMap<String, Action>>,
        threads: Mutex<HashMap<String, Vec<Message>>>,
        assistants: Mutex<HashMap<String, AssistantProfile>>,
        scratchpads: Mutex<HashMap<String, String>>,
        file_search_stores: Mutex<HashMap<String, String>>,
        log_path: Option<PathBuf>,
        next_id: std::sync::atomic::AtomicU64,
    }

    impl Default for InMemoryPersistence {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InMemoryPersistence {
        /// A store with no JSONL backing — runs are kept purely in memory.
        pub fn new() -> Self {
            Self {
                runs: Mutex::new(RunRing::new()),
                actions: Mutex::new(HashMap::new()),
                threads: Mutex::new(HashMap::new()),
                assistants: Mutex::new(HashMap::new()),
                scratchpads: Mutex::new(HashMap::new()),
                file_search_stores: Mutex::new(HashMap::new()),
                log_path: None,
                next_id: std::sync::atomic::AtomicU64::new(1),
            }
        }

        /// A store that also appends every run mutation to `path` as JSONL,
        /// pruning the file to the in-memory ring's contents on load.
        pub fn with_jsonl(path: &Path) -> Self {
            let (runs, total_on_disk) = Self::load_recent(path);
            if total_on_disk > runs.len() {
                Self::rewrite_jsonl(path, &runs);
            }
            let mut ring = RunRing::new();
            for run in runs {
                ring.push_back(run);
            }
            Self {
                runs: Mutex::new(ring),
                actions: Mutex::new(HashMap::new()),
                threads: Mutex::new(HashMap::new()),
                assistants: Mutex::new(HashMap::new()),
                scratchpads: Mutex::new(HashMap::new()),
                file_search_stores: Mutex::new(HashMap::new()),
                log_path: Some(path.to_path_buf()),
                next_id: std::sync::atomic::AtomicU64::new(1),
            }
        }

        fn load_recent(path: &Path) -> (VecDeque<Run>, usize) {
            let mut runs = VecDeque::new();
            let mut total = 0;
            if let Ok(content) = std::fs::read_to_string(path) {
                let lines: Vec<&str> = content.lines().collect();
                total = lines.len();
                for line in lines.iter().rev().take(MAX_RUNS_IN_MEMORY) {
                    if let Ok(run) = serde_json::from_str::<Run>(line) {
                        runs.push_front(run);
                    }
                }
            }
            (runs, total)
        }

        fn rewrite_jsonl(path: &Path, runs: &VecDeque<Run>) {
            let tmp = path.with_extension("jsonl.tmp");
            let mut ok = false;
            if let Ok(mut f) = std::fs::File::create(&tmp) {
                ok = true;
                for run in runs {
                    if let Ok(json) = serde_json::to_string(run) {
                        if writeln!(f, "{json}").is_err() {
                            ok = false;
                            break;
                        }
                    }
                }
            }
            if ok {
                let _ = std::fs::rename(&tmp, path);
            } else {
                let _ = std::fs::remove_file(&tmp);
            }
        }

        fn append_jsonl(&self, run: &Run) {
            let Some(path) = &self.log_path else { return };
            if let Ok(json) = serde_json::to_string(run) {
                if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
                    let _ = writeln!(file, "{json}");
                }
            }
        }

        fn fresh_id(&self, prefix: &str) -> String {
            let n = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            format!("{prefix}_{n}")
        }

        /// Test/bootstrap seam: seed an assistant profile so
        /// `retrieve_assistant` has something to return.
        pub fn seed_assistant(&self, assistant_id: &str, profile: AssistantProfile) {
            self.assistants.lock().insert(assistant_id.to_string(), profile);
        }

        /// Test/bootstrap seam: seed a thread's initial history directly,
        /// bypassing `create_message`.
        pub fn seed_thread(&self, thread_id: &str, messages: Vec<Message>) {
            self.threads.lock().insert(thread_id.to_string(), messages);
        }
    }

    #[async_trait]
    impl Persistence for InMemoryPersistence {
        async fn create_message(&self, thread_id: &str, _run_id: Option<&str>, message: Message) -> Result<()> {
            self.threads.lock().entry(thread_id.to_string()).or_default().push(message);
            Ok(())
        }

        async fn get_formatted_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
            Ok(self.threads.lock().get(thread_id).cloned().unwrap_or_default())
        }

        async fn submit_tool_output(
            &self,
            thread_id: &str,
            tool_call_id: &str,
            name: Option<&str>,
            content: &str,
            is_error: bool,
        ) -> Result<()> {
            let mut msg = match name {
                Some(n) => Message::tool_result_named(tool_call_id, n, content),
                None => Message::tool_result(tool_call_id, content),
            };
            if is_error {
                if let ic_domain::tool::MessageContent::Parts(parts) = &mut msg.content {
                    if let Some(ic_domain::tool::ContentPart::ToolResult { is_error, .. }) = parts.first_mut() {
                        *is_error = true;
                    }
                }
            }
            self.threads.lock().entry(thread_id.to_string()).or_default().push(msg);
            Ok(())
        }

        async fn save_assistant_message_chunk(&self, thread_id: &str, _run_id: &str, text: &str) -> Result<()> {
            self.threads
                .lock()
                .entry(thread_id.to_string())
                .or_default()
                .push(Message::assistant(text));
            Ok(())
        }

        async fn create_run(&self, run: Run) -> Result<Run> {
            let mut ring = self.runs.lock();
            ring.push_back(run.clone());
            if ring.runs.len() > MAX_RUNS_IN_MEMORY {
                ring.pop_front();
            }
            drop(ring);
            self.append_jsonl(&run);
            Ok(run)
        }

        async fn retrieve_run(&self, run_id: &str) -> Result<Run> {
            self.runs
                .lock()
                .get(run_id)
                .cloned()
                .ok_or_else(|| Error::Other(format!("run not found: {run_id}")))
        }

        async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
            let mut ring = self.runs.lock();
            let run = ring
                .get_mut(run_id)
                .ok_or_else(|| Error::Other(format!("run not found: {run_id}")))?;
            run.status = status;
            let snapshot = run.clone();
            drop(ring);
            self.append_jsonl(&snapshot);
            Ok(())
        }

        async fn create_action(&self, action: Action) -> Result<Action> {
            self.actions.lock().insert(action.id.clone(), action.clone());
            Ok(action)
        }

        async fn update_action(
            &self,
            action_id: &str,
            status: ActionStatus,
            result: Option<String>,
        ) -> Result<()> {
            let mut actions = self.actions.lock();
            let action = actions
                .get_mut(action_id)
                .ok_or_else(|| Error::Other(format!("action not found: {action_id}")))?;
            action.status = status;
            if result.is_some() {
                action.result = result;
            }
            if status.is_terminal() {
                action.processed_at = Some(chrono::Utc::now());
            }
            Ok(())
        }

        async fn get_pending_actions(&self, run_id: &str) -> Result<Vec<Action>> {
            Ok(self
                .actions
                .lock()
                .values()
                .filter(|a| a.run_id == run_id && !a.status.is_terminal())
                .cloned()
                .collect())
        }

        async fn retrieve_assistant(&self, assistant_id: &str) -> Result<AssistantProfile> {
            self.assistants
                .lock()
                .get(assistant_id)
                .cloned()
                .ok_or_else(|| Error::Other(format!("assistant not found: {assistant_id}")))
        }

        async fn create_thread(&self) -> Result<String> {
            let id = self.fresh_id("thread");
            self.threads.lock().insert(id.clone(), Vec::new());
            Ok(id)
        }

        async fn get_file_as_base64(&self, file_id: &str) -> Result<String> {
            Err(Error::Other(format!("no file store configured for {file_id}")))
        }

        async fn web_read(&self, url: &str) -> Result<String> {
            Ok(format!("(no web client configured; would fetch {url})"))
        }

        async fn web_scroll(&self, url: &str, page: u32) -> Result<String> {
            Ok(format!("(no web client configured; would fetch page {page} of {url})"))
        }

        async fn web_search(&self, query: &str) -> Result<String> {
            Ok(format!("(no search client configured; would search for {query})"))
        }

        async fn scratchpad_read(&self, thread_id: &str) -> Result<String> {
            Ok(self.scratchpads.lock().get(thread_id).cloned().unwrap_or_default())
        }

        async fn scratchpad_update(&self, thread_id: &str, content: &str) -> Result<()> {
            self.scratchpads.lock().insert(thread_id.to_string(), content.to_string());
            Ok(())
        }

        async fn scratchpad_append(&self, thread_id: &str, content: &str) -> Result<()> {
            let mut pads = self.scratchpads.lock();
            let entry = pads.entry(thread_id.to_string()).or_default();
            if !entry.is_empty() {
                entry.push('\n');
            }
            entry.push_str(content);
            Ok(())
        }

        async fn unattended_file_search(&self, _store_id: &str, _query: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn get_or_create_file_search_store(&self, assistant_id: &str) -> Result<String> {
            let mut stores = self.file_search_stores.lock();
            if let Some(id) = stores.get(assistant_id) {
                return Ok(id.clone());
            }
            let id = format!("vs_{assistant_id}");
            stores.insert(assistant_id.to_string(), id.clone());
            Ok(id)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use ic_domain::run::RunStatus;

        fn run(id: &str) -> Run {
            Run::new(id, "asst_1", "thread_1", "user_1", "hyperbolic/llama-3")
        }

        #[tokio::test]
        async fn create_and_retrieve_run_round_trips() {
            let store = InMemoryPersistence::new();
            store.create_run(run("run_1")).await.unwrap();
            let fetched = store.retrieve_run("run_1").await.unwrap();
            assert_eq!(fetched.id, "run_1");
            assert_eq!(fetched.status, RunStatus::Queued);
        }

        #[tokio::test]
        async fn update_run_status_is_visible_on_retrieve() {
            let store = InMemoryPersistence::new();
            store.create_run(run("run_1")).await.unwrap();
            store.update_run_status("run_1", RunStatus::Completed).await.unwrap();
            let fetched = store.retrieve_run("run_1").await.unwrap();
            assert_eq!(fetched.status, RunStatus::Completed);
        }

        #[tokio::test]
        async fn retrieve_missing_run_errors() {
            let store = InMemoryPersistence::new();
            assert!(store.retrieve_run("nope").await.is_err());
        }

        #[tokio::test]
        async fn ring_evicts_oldest_beyond_capacity() {
            let store = InMemoryPersistence::new();
            for i in 0..(MAX_RUNS_IN_MEMORY + 5) {
                store.create_run(run(&format!("run_{i}"))).await.unwrap();
            }
            assert!(store.retrieve_run("run_0").await.is_err());
            assert!(store.retrieve_run(&format!("run_{}", MAX_RUNS_IN_MEMORY + 4)).await.is_ok());
        }

        #[tokio::test]
        async fn jsonl_persistence_survives_reload() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("runs.jsonl");
            {
                let store = InMemoryPersistence::with_jsonl(&path);
                store.create_run(run("run_1")).await.unwrap();
            }
            let reloaded = InMemoryPersistence::with_jsonl(&path);
            let fetched = reloaded.retrieve_run("run_1").await.unwrap();
            assert_eq!(fetched.id, "run_1");
        }

        #[tokio::test]
        async fn get_pending_actions_excludes_terminal() {
            let store = InMemoryPersistence::new();
            let pending = Action::new("act_1", "run_1", "tool_1", "call_1", serde_json::json!({}));
            let mut done = Action::new("act_2", "run_1", "tool_1", "call_2", serde_json::json!({}));
            done.status = ActionStatus::Completed;
            store.create_action(pending).await.unwrap();
            store.create_action(done).await.unwrap();
            let pending = store.get_pending_actions("run_1").await.unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].id, "act_1");
        }

        #[tokio::test]
        async fn scratchpad_append_accumulates_with_newline_separator() {
            let store = InMemoryPersistence::new();
            store.scratchpad_append("t1", "first").await.unwrap();
            store.scratchpad_append("t1", "second").await.unwrap();
            assert_eq!(store.scratchpad_read("t1").await.unwrap(), "first\nsecond");
        }

        #[tokio::test]
        async fn scratchpad_is_per_thread() {
            let store = InMemoryPersistence::new();
            store.scratchpad_update("t1", "one").await.unwrap();
            store.scratchpad_update("t2", "two").await.unwrap();
            assert_eq!(store.scratchpad_read("t1").await.unwrap(), "one");
            assert_eq!(store.scratchpad_read("t2").await.unwrap(), "two");
        }

        #[tokio::test]
        async fn get_or_create_file_search_store_is_idempotent() {
            let store = InMemoryPersistence::new();
            let a = store.get_or_create_file_search_store("asst_1").await.unwrap();
            let b = store.get_or_create_file_search_store("asst_1").await.unwrap();
            assert_eq!(a, b);
        }

        #[tokio::test]
        async fn submit_tool_output_marks_is_error() {
            let store = InMemoryPersistence::new();
            store
                .submit_tool_output("t1", "call_1", Some("search"), "boom", true)
                .await
                .unwrap();
            let messages = store.get_formatted_messages("t1").await.unwrap();
            match &messages[0].content {
                ic_domain::tool::MessageContent::Parts(parts) => match &parts[0] {
                    ic_domain::tool::ContentPart::ToolResult { is_error, .. } => assert!(*is_error),
                    other => panic!("expected ToolResult, got {other:?}"),
                },
                other => panic!("expected Parts, got {other:?}"),
            }
        }
    }
}
