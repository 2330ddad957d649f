//! Session registry - at most one live program per session id.
//!
//! Each session owns:
//! - an op lock (`slot`) serialising `run`, `clear` and `dispose` for that id
//! - an input port, separate from the op lock so `send_input` never waits on a build
//! - a state watch channel
//!
//! Every spawned program gets a fresh generation with its own [`Emitter`].
//! Replacing or killing a program retires its emitter first, so late output
//! from the old generation is dropped instead of reaching the caller.

use crate::classifier::InputClassifier;
use crate::config::RunnerConfig;
use crate::launcher::Launcher;
use crate::process::ProcessHandle;
use crate::profile::{LanguageProfile, ProfileRegistry};
use crate::stager::{ArtifactStager, StagedArtifact, validate_file_name};
use chrono::{DateTime, Utc};
use coderun_proto::{Error, OutputEvent, Result, RunnerEvent, SessionId, SessionState, StreamKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Size of a single read from a program's stdout or stderr.
const READ_CHUNK: usize = 8 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

/// Parameters of one run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Language key or alias.
    pub language: String,
    /// Name of the staged file. Empty means the profile's default file name.
    #[serde(default)]
    pub file_name: String,
    pub source: String,
    /// Extra program arguments, split on whitespace.
    #[serde(default)]
    pub args: String,
}

impl RunRequest {
    pub fn new(language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            file_name: String::new(),
            source: source.into(),
            args: String::new(),
        }
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }
}

/// Returned by [`SessionRegistry::run`] once the program has been spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Launched {
    pub generation: u64,
    pub pid: Option<u32>,
}

/// Snapshot of one session for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub language: Option<String>,
    pub pid: Option<u32>,
    pub generation: u64,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct EmitterState {
    seq: u64,
    awaiting_input: bool,
    retired: bool,
}

/// Sends the events of one process generation.
///
/// Sequence numbers are allocated and events sent under a single lock, so the
/// order on the channel always matches `seq`.
#[derive(Debug)]
struct Emitter {
    session_id: SessionId,
    generation: u64,
    supports_input: bool,
    classifier: InputClassifier,
    events: mpsc::UnboundedSender<RunnerEvent>,
    state: Arc<watch::Sender<SessionState>>,
    inner: Mutex<EmitterState>,
}

impl Emitter {
    fn send(&self, event: RunnerEvent) {
        // The receiver going away only means nobody is listening anymore.
        let _ = self.events.send(event);
    }

    fn clear_hint(&self, inner: &mut EmitterState) {
        if inner.awaiting_input {
            inner.awaiting_input = false;
            self.state.send_replace(SessionState::Running);
            self.send(RunnerEvent::InputRequestCleared {
                session_id: self.session_id.clone(),
            });
        }
    }

    fn push_output(&self, inner: &mut EmitterState, stream: StreamKind, text: String) {
        let seq = inner.seq;
        inner.seq += 1;
        self.send(RunnerEvent::Output(OutputEvent {
            session_id: self.session_id.clone(),
            generation: self.generation,
            stream,
            text,
            seq,
        }));
    }

    fn output(&self, stream: StreamKind, text: String) {
        let mut inner = lock(&self.inner);
        if inner.retired {
            return;
        }
        self.clear_hint(&mut inner);
        let prompt = self.supports_input && self.classifier.needs_input(&text);
        self.push_output(&mut inner, stream, text);
        if prompt {
            inner.awaiting_input = true;
            self.state.send_replace(SessionState::AwaitingInputHint);
            self.send(RunnerEvent::InputRequested {
                session_id: self.session_id.clone(),
            });
        }
    }

    /// Echoes text written to stdin. Returns false once retired.
    fn echo(&self, text: String) -> bool {
        let mut inner = lock(&self.inner);
        if inner.retired {
            return false;
        }
        self.clear_hint(&mut inner);
        self.push_output(&mut inner, StreamKind::Stdin, text);
        true
    }

    /// Final event of a generation that ended on its own.
    fn exited(&self, code: Option<i32>) {
        let mut inner = lock(&self.inner);
        if inner.retired {
            return;
        }
        self.clear_hint(&mut inner);
        inner.retired = true;
        self.state.send_replace(SessionState::Exited { code });
        self.send(RunnerEvent::Exited {
            session_id: self.session_id.clone(),
            code,
        });
    }

    /// Silences this generation. Nothing it produces afterwards is delivered.
    fn retire(&self) {
        lock(&self.inner).retired = true;
    }
}

/// Writable end of a live program's stdin.
#[derive(Debug)]
struct InputPort {
    generation: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    emitter: Arc<Emitter>,
}

/// A spawned generation and the task supervising it.
#[derive(Debug)]
struct LiveRun {
    emitter: Arc<Emitter>,
    kill_tx: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

impl LiveRun {
    /// Retires the generation, kills the program and waits for its cleanup.
    async fn terminate(mut self) {
        self.emitter.retire();
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if let Err(e) = self.supervisor.await {
            warn!(session = %self.emitter.session_id, error = %e, "Supervisor task failed");
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    live: Option<LiveRun>,
    disposed: bool,
}

#[derive(Debug, Default)]
struct RunMeta {
    language: Option<String>,
    pid: Option<u32>,
    generation: u64,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Session {
    id: SessionId,
    dir: PathBuf,
    state: Arc<watch::Sender<SessionState>>,
    port: Mutex<Option<InputPort>>,
    slot: tokio::sync::Mutex<Slot>,
    meta: Mutex<RunMeta>,
}

impl Session {
    fn new(id: SessionId, dir: PathBuf) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            id,
            dir,
            state: Arc::new(state),
            port: Mutex::new(None),
            slot: tokio::sync::Mutex::new(Slot::default()),
            meta: Mutex::new(RunMeta::default()),
        }
    }

    fn set_state(&self, state: SessionState) {
        debug!(session = %self.id, %state, "Session state changed");
        self.state.send_replace(state);
    }

    /// Kills a live generation. Its emitter is retired before the state
    /// changes, so a racing pump cannot overwrite `Killed`.
    async fn stop(&self, live: LiveRun) {
        live.emitter.retire();
        self.set_state(SessionState::Killed);
        live.terminate().await;
    }

    fn clear_port(&self, generation: u64) {
        let mut port = lock(&self.port);
        if port.as_ref().is_some_and(|p| p.generation == generation) {
            *port = None;
        }
    }

    fn info(&self) -> SessionInfo {
        let meta = lock(&self.meta);
        SessionInfo {
            id: self.id.clone(),
            state: self.state.borrow().clone(),
            language: meta.language.clone(),
            pid: meta.pid,
            generation: meta.generation,
            started_at: meta.started_at,
        }
    }
}

#[derive(Debug)]
struct Inner {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    profiles: ProfileRegistry,
    stager: ArtifactStager,
    launcher: Launcher,
    classifier: InputClassifier,
    drain_timeout: Duration,
    events: mpsc::UnboundedSender<RunnerEvent>,
}

/// Owns every session and the programs running in them.
///
/// Cheap to clone; clones share the same sessions and event channel.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    /// Creates a registry and the receiving end of its event stream.
    pub fn new(config: &RunnerConfig) -> Result<(Self, mpsc::UnboundedReceiver<RunnerEvent>)> {
        config.validate()?;
        let (events, rx) = mpsc::unbounded_channel();
        let work_root = config.resolved_work_dir();
        info!(work_root = %work_root.display(), "Session registry initialized");

        let inner = Inner {
            sessions: RwLock::new(HashMap::new()),
            profiles: config.profile_registry()?,
            stager: ArtifactStager::new(work_root),
            launcher: Launcher::new(config.build_timeout()),
            classifier: config.classifier()?,
            drain_timeout: config.drain_timeout(),
            events,
        };
        Ok((
            Self {
                inner: Arc::new(inner),
            },
            rx,
        ))
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.inner.profiles
    }

    pub fn work_root(&self) -> &Path {
        self.inner.stager.root()
    }

    fn emit_error(&self, id: &SessionId, error: &Error) {
        let _ = self.inner.events.send(RunnerEvent::Error {
            session_id: id.clone(),
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    async fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.sessions.read().await.get(id).cloned()
    }

    async fn get_or_create(&self, id: &SessionId) -> Arc<Session> {
        if let Some(session) = self.get(id).await {
            return session;
        }
        let mut sessions = self.inner.sessions.write().await;
        Arc::clone(sessions.entry(id.clone()).or_insert_with(|| {
            debug!(session = %id, "Created session");
            Arc::new(Session::new(id.clone(), self.inner.stager.session_dir(id)))
        }))
    }

    /// Creates the session if it does not exist yet.
    pub async fn open(&self, id: &SessionId) {
        self.get_or_create(id).await;
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.inner.sessions.read().await.contains_key(id)
    }

    pub async fn state(&self, id: &SessionId) -> Option<SessionState> {
        self.get(id).await.map(|session| session.state.borrow().clone())
    }

    /// Watches state transitions of one session.
    pub async fn subscribe_state(&self, id: &SessionId) -> Option<watch::Receiver<SessionState>> {
        self.get(id).await.map(|session| session.state.subscribe())
    }

    /// All sessions, ordered by id.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.inner.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions.values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Replaces whatever runs in `id` with a fresh build and run of `request`.
    ///
    /// Returns once the program is spawned; its output, prompts and exit code
    /// arrive on the event channel. Failures are returned and also emitted as
    /// `error` events.
    pub async fn run(&self, id: &SessionId, request: RunRequest) -> Result<Launched> {
        let result = self.run_inner(id, request).await;
        if let Err(e) = &result {
            self.emit_error(id, e);
        }
        result
    }

    async fn run_inner(&self, id: &SessionId, request: RunRequest) -> Result<Launched> {
        let profile = self.inner.profiles.resolve(&request.language)?;
        let file_name = if request.file_name.trim().is_empty() {
            profile.default_file_name.clone()
        } else {
            request.file_name.clone()
        };
        validate_file_name(&file_name)?;

        loop {
            let session = self.get_or_create(id).await;
            let mut slot = session.slot.lock().await;
            if slot.disposed {
                // Lost a race against dispose; the next lookup creates a new session.
                continue;
            }
            return self
                .start(&session, &mut slot, &profile, &file_name, &request)
                .await;
        }
    }

    async fn start(
        &self,
        session: &Arc<Session>,
        slot: &mut Slot,
        profile: &Arc<LanguageProfile>,
        file_name: &str,
        request: &RunRequest,
    ) -> Result<Launched> {
        if let Some(live) = slot.live.take() {
            session.stop(live).await;
        }

        slot.generation += 1;
        let generation = slot.generation;

        session.set_state(SessionState::Staging);
        let artifact = match self.inner.stager.stage(&session.dir, file_name, &request.source) {
            Ok(artifact) => artifact,
            Err(e) => {
                session.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        // Removes the staged files on every early return below.
        let stager = self.inner.stager.clone();
        let mut artifact = scopeguard::guard(artifact, move |artifact| stager.cleanup(&artifact));

        let launcher = &self.inner.launcher;
        let launched = async {
            launcher.prepare(profile, &mut artifact)?;
            if profile.has_build_step {
                session.set_state(SessionState::Building);
                launcher.build(profile, &artifact).await?;
            }
            launcher.spawn(profile, &artifact, &request.args)
        }
        .await;

        let mut handle = match launched {
            Ok(handle) => handle,
            Err(e) => {
                session.set_state(SessionState::Failed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let emitter = Arc::new(Emitter {
            session_id: session.id.clone(),
            generation,
            supports_input: profile.supports_input,
            classifier: self.inner.classifier.clone(),
            events: self.inner.events.clone(),
            state: Arc::clone(&session.state),
            inner: Mutex::new(EmitterState::default()),
        });

        // Running must be visible before the pumps can flip it to AwaitingInputHint.
        session.set_state(SessionState::Running);

        if let Some(stdin) = handle.take_stdin() {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(forward_input(session.id.clone(), stdin, rx));
            *lock(&session.port) = Some(InputPort {
                generation,
                tx,
                emitter: Arc::clone(&emitter),
            });
        }

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = handle.take_stdout() {
            pumps.push(tokio::spawn(pump(stdout, StreamKind::Stdout, Arc::clone(&emitter))));
        }
        if let Some(stderr) = handle.take_stderr() {
            pumps.push(tokio::spawn(pump(stderr, StreamKind::Stderr, Arc::clone(&emitter))));
        }

        let pid = handle.pid();
        {
            let mut meta = lock(&session.meta);
            meta.language = Some(profile.key.clone());
            meta.pid = pid;
            meta.generation = generation;
            meta.started_at = Some(Utc::now());
        }
        info!(session = %session.id, generation, ?pid, language = %profile.key, "Program started");

        let (kill_tx, kill_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(Supervision {
            session: Arc::clone(session),
            handle,
            kill_rx,
            pumps,
            emitter: Arc::clone(&emitter),
            artifact: scopeguard::ScopeGuard::into_inner(artifact),
            stager: self.inner.stager.clone(),
            drain_timeout: self.inner.drain_timeout,
            generation,
        }));

        slot.live = Some(LiveRun {
            emitter,
            kill_tx: Some(kill_tx),
            supervisor,
        });

        Ok(Launched { generation, pid })
    }

    /// Writes `text` plus a newline to the live program's stdin and echoes it.
    pub async fn send_input(&self, id: &SessionId, text: &str) -> Result<()> {
        let delivered = match self.get(id).await {
            Some(session) => {
                let port = lock(&session.port);
                port.as_ref().is_some_and(|port| {
                    let line = format!("{text}\n");
                    port.tx.send(line.clone().into_bytes()).is_ok() && port.emitter.echo(line)
                })
            }
            None => false,
        };

        if delivered {
            return Ok(());
        }
        debug!(session = %id, "Input dropped, no active process");
        let err = Error::NoActiveProcess(id.clone());
        self.emit_error(id, &err);
        Err(err)
    }

    /// Closes the live program's stdin so it reads end-of-file.
    ///
    /// Input already queued by [`send_input`](Self::send_input) is written
    /// first. Later input is reported as `NoActiveProcess`.
    pub async fn close_input(&self, id: &SessionId) -> Result<()> {
        let session = self.get(id).await;
        let port = session
            .as_ref()
            .and_then(|session| lock(&session.port).take());
        if let Some(port) = port {
            // The writer task drains the queue, then drops stdin.
            debug!(session = %id, generation = port.generation, "Closing program stdin");
            return Ok(());
        }
        let err = Error::NoActiveProcess(id.clone());
        self.emit_error(id, &err);
        Err(err)
    }

    /// Kills the live program, if any, and returns the session to `Idle`.
    pub async fn clear(&self, id: &SessionId) {
        let Some(session) = self.get(id).await else {
            return;
        };
        let mut slot = session.slot.lock().await;
        if let Some(live) = slot.live.take() {
            session.stop(live).await;
        }
        session.set_state(SessionState::Idle);
    }

    /// Kills the live program, removes the session directory and forgets the session.
    pub async fn dispose(&self, id: &SessionId) {
        let Some(session) = self.get(id).await else {
            return;
        };
        let mut slot = session.slot.lock().await;
        if slot.disposed {
            return;
        }
        if let Some(live) = slot.live.take() {
            session.stop(live).await;
        }
        slot.disposed = true;
        self.inner.stager.remove_dir(&session.dir);

        let mut sessions = self.inner.sessions.write().await;
        if sessions.get(id).is_some_and(|current| Arc::ptr_eq(current, &session)) {
            sessions.remove(id);
        }
        info!(session = %id, "Session disposed");
    }

    /// Disposes every session and removes the work root.
    pub async fn shutdown_all(&self) {
        let ids: Vec<SessionId> = self.inner.sessions.read().await.keys().cloned().collect();
        info!(count = ids.len(), "Shutting down all sessions");
        futures::future::join_all(ids.iter().map(|id| self.dispose(id))).await;
        self.inner.stager.remove_dir(self.inner.stager.root());
    }
}

/// Everything the supervisor task of one generation owns.
struct Supervision {
    session: Arc<Session>,
    handle: ProcessHandle,
    kill_rx: oneshot::Receiver<()>,
    pumps: Vec<JoinHandle<()>>,
    emitter: Arc<Emitter>,
    artifact: StagedArtifact,
    stager: ArtifactStager,
    drain_timeout: Duration,
    generation: u64,
}

/// Waits for the program to exit or be killed, then cleans up after it.
async fn supervise(mut job: Supervision) {
    let session_id = job.session.id.clone();
    let status = tokio::select! {
        status = job.handle.wait() => Some(status),
        // A dropped sender also means the run was abandoned.
        _ = &mut job.kill_rx => None,
    };

    let code = match status {
        Some(Ok(status)) => Some(status.code()),
        Some(Err(e)) => {
            warn!(session = %session_id, error = %e, "Failed to wait for program");
            Some(None)
        }
        None => {
            if let Err(e) = job.handle.kill().await {
                warn!(session = %session_id, error = %e, "Failed to kill program");
            }
            None
        }
    };

    // Background jobs of a program that exited on its own go with it.
    if code.is_some() {
        job.handle.kill_group();
    }

    // Readers end at EOF; helpers that inherited the pipes must not hold us forever.
    let drain = if code.is_some() {
        job.drain_timeout
    } else {
        Duration::ZERO
    };
    let aborts: Vec<_> = job.pumps.iter().map(JoinHandle::abort_handle).collect();
    if tokio::time::timeout(drain, futures::future::join_all(job.pumps))
        .await
        .is_err()
    {
        debug!(session = %session_id, "Output drain timed out");
        for abort in aborts {
            abort.abort();
        }
    }

    job.session.clear_port(job.generation);
    lock(&job.session.meta).pid = None;
    job.stager.cleanup(&job.artifact);

    match code {
        Some(code) => {
            info!(session = %session_id, generation = job.generation, ?code, "Program exited");
            job.emitter.exited(code);
        }
        None => {
            info!(session = %session_id, generation = job.generation, "Program killed");
        }
    }
}

/// Forwards queued input to the program until it stops accepting it.
async fn forward_input(
    session: SessionId,
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = rx.recv().await {
        let written = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            debug!(session = %session, error = %e, "Stdin closed");
            break;
        }
    }
}

/// Reads raw chunks from one stream and emits them as they arrive.
///
/// Chunks are not line-buffered, so a prompt without a trailing newline is
/// delivered immediately.
async fn pump<R>(mut reader: R, stream: StreamKind, emitter: Arc<Emitter>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let text = take_complete_utf8(&mut pending);
                if !text.is_empty() {
                    emitter.output(stream, text);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!(session = %emitter.session_id, ?stream, error = %e, "Read failed");
                break;
            }
        }
    }
    if !pending.is_empty() {
        emitter.output(stream, String::from_utf8_lossy(&pending).into_owned());
    }
}

/// Decodes everything except a trailing, possibly incomplete, UTF-8 sequence.
fn take_complete_utf8(pending: &mut Vec<u8>) -> String {
    let keep = incomplete_tail_len(pending);
    let split = pending.len() - keep;
    let text = String::from_utf8_lossy(&pending[..split]).into_owned();
    pending.drain(..split);
    text
}

/// Length of a multi-byte sequence cut off at the end of `bytes`.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}
