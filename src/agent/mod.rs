//! One bot process and the per-turn request/response protocol spoken with it.
//!
//! Every handle owns three helper threads: a writer feeding stdin from a channel, a reader
//! turning stdout into lines on a channel, and a sink copying stderr to a log file. The
//! caller only ever waits on a channel with a deadline, so a stuck bot can delay a turn by
//! at most that deadline.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read, Write},
    path::Path,
    process::{ChildStderr, ChildStdin, ChildStdout},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError, TrySendError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, instrument, trace, warn};

use crate::{
    error::JudgeError,
    game::{Direction, GameState, PlayerId},
    replay::BotStats,
};

pub mod bot_config;
pub mod process;
pub mod protocol;

pub use bot_config::{BotConfig, BotSpec};
use process::AgentProcess;

/// Time a stopping agent is given to exit after its stdin is closed.
const STOP_GRACE: Duration = Duration::from_millis(100);
/// Longest response line accepted, newline excluded. A longer one ends the stream.
pub const MAX_LINE_BYTES: usize = 64 * 1024;
/// Unread response lines kept per agent; further lines are dropped until they are consumed.
const RESPONSE_BACKLOG: usize = 16;

/// Outcome of one move request. Never an error: faults resolve to a fallback move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResponse {
    pub direction: Direction,
    pub timeout: bool,
    pub error: Option<String>,
    pub time_taken: Duration,
}

impl MoveResponse {
    fn fallback(direction: Direction, error: impl Into<String>) -> Self {
        Self {
            direction,
            timeout: false,
            error: Some(error.into()),
            time_taken: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct Running {
    process: AgentProcess,
    /// Dropping it ends the writer thread, which closes stdin.
    requests: Option<Sender<String>>,
    responses: Receiver<String>,
    /// Set by the helper threads on stdout EOF, an overlong line or a failed write.
    closed: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct AgentHandle {
    slot: PlayerId,
    spec: BotSpec,
    env: Vec<(String, String)>,
    running: Option<Running>,
    started: bool,
    timeout_count: u32,
    error_count: u32,
}

impl AgentHandle {
    pub fn new(slot: PlayerId, spec: BotSpec) -> Self {
        Self {
            slot,
            spec,
            env: Vec::new(),
            running: None,
            started: false,
            timeout_count: 0,
            error_count: 0,
        }
    }

    /// Environment variable passed to the bot process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn slot(&self) -> PlayerId {
        self.slot
    }

    pub fn name(&self) -> &str {
        self.spec.display_name()
    }

    /// Launches the bot and attaches its streams.
    ///
    /// A handle starts at most once; a second call fails with [`JudgeError::State`].
    #[instrument(skip(self), fields(slot = %self.slot, bot = self.spec.display_name()))]
    pub fn start(&mut self) -> anyhow::Result<()> {
        let slot = self.slot.number();
        if self.started {
            return Err(JudgeError::State {
                slot,
                reason: "already started".into(),
            }
            .into());
        }

        let start_error = |e: anyhow::Error| JudgeError::Start {
            slot,
            reason: format!("{e:#}"),
        };
        let mut process = AgentProcess::launch(&self.spec.config, &self.spec.directory, &self.env)
            .map_err(start_error)?;
        let (stdin, stdout, stderr) = process.take_pipes().map_err(start_error)?;
        self.started = true;

        if self.spec.config.uses_container() {
            info!(image = %self.spec.config.docker_image, "agent running in docker");
        } else {
            info!(command = ?self.spec.config.command, "agent running locally");
        }

        let closed = Arc::new(AtomicBool::new(false));
        let (requests, request_rx) = mpsc::channel();
        let (response_tx, responses) = mpsc::sync_channel(RESPONSE_BACKLOG);

        spawn_writer(slot, stdin, request_rx, Arc::clone(&closed)).map_err(start_error)?;
        spawn_reader(slot, stdout, response_tx, Arc::clone(&closed)).map_err(start_error)?;
        let log_path = self
            .spec
            .directory
            .join(format!("bot_{slot}_stderr.log"));
        spawn_stderr_sink(slot, stderr, &log_path).map_err(start_error)?;

        self.running = Some(Running {
            process,
            requests: Some(requests),
            responses,
            closed,
        });
        Ok(())
    }

    /// Sends `state` (own snake first) and waits up to `deadline` for one response line.
    ///
    /// The fallback move is the snake's current direction in `state`.
    #[instrument(level = "debug", skip(self, state), fields(slot = %self.slot, turn = state.turn))]
    pub fn request_move(&mut self, state: &GameState, deadline: Duration) -> MoveResponse {
        let fallback = state.snake(self.slot).direction;

        let Some(running) = self.running.as_mut() else {
            self.error_count += 1;
            return MoveResponse::fallback(fallback, "agent is not running");
        };

        // a late answer to an earlier turn must not be taken for this one
        for _ in 0..RESPONSE_BACKLOG {
            match running.responses.try_recv() {
                Ok(stale) => trace!(%stale, "discarding late response"),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    running.closed.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }
        if running.closed.load(Ordering::Relaxed) {
            self.error_count += 1;
            return MoveResponse::fallback(fallback, "agent is not running");
        }

        let message = match state.to_agent_json(self.slot) {
            Ok(message) => message,
            Err(e) => {
                self.error_count += 1;
                return MoveResponse::fallback(fallback, format!("failed to serialize state: {e}"));
            }
        };

        let start = Instant::now();
        let sent = running
            .requests
            .as_ref()
            .is_some_and(|requests| requests.send(message).is_ok());
        if !sent {
            running.closed.store(true, Ordering::Relaxed);
            self.error_count += 1;
            return MoveResponse::fallback(fallback, "failed to write to agent");
        }

        match running.responses.recv_timeout(deadline) {
            Ok(line) => {
                let time_taken = start.elapsed();
                let (direction, recognized) = protocol::parse_move_response(&line);
                let error = if recognized {
                    None
                } else {
                    self.error_count += 1;
                    warn!(%line, "unrecognized move, using UP");
                    Some(format!("unrecognized move {:?}", line.trim()))
                };
                MoveResponse {
                    direction,
                    timeout: false,
                    error,
                    time_taken,
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                self.timeout_count += 1;
                debug!(?deadline, "agent timed out");
                MoveResponse {
                    direction: fallback,
                    timeout: true,
                    error: Some("timeout".into()),
                    time_taken: deadline,
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                running.closed.store(true, Ordering::Relaxed);
                self.error_count += 1;
                MoveResponse {
                    time_taken: start.elapsed(),
                    ..MoveResponse::fallback(fallback, "failed to read from agent")
                }
            }
        }
    }

    /// Closes stdin, gives the process a short grace period, then kills and reaps it.
    /// Calling it again is a no-op.
    #[instrument(skip(self), fields(slot = %self.slot))]
    pub fn stop(&mut self) -> anyhow::Result<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        running.requests = None;
        running.process.try_kill(STOP_GRACE)
    }

    /// True between a successful start and either a stop or an observed exit.
    pub fn is_alive(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.closed.load(Ordering::Relaxed))
    }

    pub fn timeout_count(&self) -> u32 {
        self.timeout_count
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn stats(&self) -> BotStats {
        BotStats {
            error_count: self.error_count,
            id: self.slot.number(),
            name: self.spec.config.name.clone(),
            timeout_count: self.timeout_count,
        }
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("could not stop agent {}: {e:#}", self.slot);
        }
    }
}

fn spawn_writer(
    slot: u8,
    mut stdin: ChildStdin,
    requests: Receiver<String>,
    closed: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name(format!("agent-{slot}-stdin"))
        .spawn(move || {
            for message in requests {
                let written = stdin
                    .write_all(message.as_bytes())
                    .and_then(|_| stdin.write_all(b"\n"))
                    .and_then(|_| stdin.flush());
                if let Err(e) = written {
                    debug!(slot, "write to agent failed: {e}");
                    closed.store(true, Ordering::Relaxed);
                    return;
                }
            }
        })?;
    Ok(())
}

fn spawn_reader(
    slot: u8,
    stdout: ChildStdout,
    responses: SyncSender<String>,
    closed: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name(format!("agent-{slot}-stdout"))
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            while let Some(line) = read_response_line(slot, &mut reader) {
                match responses.try_send(line) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        trace!(slot, bytes = dropped.len(), "response backlog full, dropping line")
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
            closed.store(true, Ordering::Relaxed);
        })?;
    Ok(())
}

/// Next line without its line ending, or `None` once the stream is unusable: EOF, a read
/// error or a line over [`MAX_LINE_BYTES`].
fn read_response_line(slot: u8, reader: &mut impl BufRead) -> Option<String> {
    let mut buf = Vec::new();
    let limit = MAX_LINE_BYTES as u64 + 1;
    match reader.by_ref().take(limit).read_until(b'\n', &mut buf) {
        Ok(0) => {
            debug!(slot, "agent closed its stdout");
            return None;
        }
        Ok(_) => {}
        Err(e) => {
            debug!(slot, "read from agent failed: {e}");
            return None;
        }
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_LINE_BYTES {
        warn!(slot, limit = MAX_LINE_BYTES, "agent response line too long");
        return None;
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Copies stderr to `log_path`, or discards it when the file cannot be created.
fn spawn_stderr_sink(slot: u8, mut stderr: ChildStderr, log_path: &Path) -> anyhow::Result<()> {
    let mut sink: Box<dyn Write + Send> = match File::create(log_path) {
        Ok(file) => Box::new(file),
        Err(e) => {
            debug!(slot, "no stderr log at {}: {e}", log_path.display());
            Box::new(io::sink())
        }
    };
    thread::Builder::new()
        .name(format!("agent-{slot}-stderr"))
        .spawn(move || {
            let _ = io::copy(&mut stderr, &mut sink);
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn shell_agent(dir: &Path, script: &str) -> BotSpec {
        std::fs::write(dir.join("bot.sh"), script).unwrap();
        BotSpec {
            directory: dir.to_path_buf(),
            config: BotConfig::from_command(&["sh", "bot.sh"]),
        }
    }

    fn state() -> GameState {
        GameState::without_apples(20, 20, None)
    }

    #[test]
    fn answers_with_json_move() {
        let dir = tempfile::tempdir().unwrap();
        let spec = shell_agent(
            dir.path(),
            "while read line; do echo '{\"move\": \"right\"}'; done\n",
        );
        let mut agent = AgentHandle::new(PlayerId::One, spec);
        agent.start().unwrap();
        assert!(agent.is_alive());

        let response = agent.request_move(&state(), Duration::from_secs(5));
        assert_eq!(response.direction, Direction::Right);
        assert!(!response.timeout);
        assert_eq!(response.error, None);

        agent.stop().unwrap();
        assert!(!agent.is_alive());
        agent.stop().unwrap();
        assert_eq!(agent.error_count(), 0);
    }

    #[test]
    fn silent_agent_times_out_with_current_direction() {
        let dir = tempfile::tempdir().unwrap();
        let spec = shell_agent(dir.path(), "while read line; do :; done\n");
        let mut agent = AgentHandle::new(PlayerId::Two, spec);
        agent.start().unwrap();

        let response = agent.request_move(&state(), Duration::from_millis(100));
        assert!(response.timeout);
        assert_eq!(response.direction, Direction::Up);
        assert_eq!(response.time_taken, Duration::from_millis(100));
        assert_eq!(agent.timeout_count(), 1);
        assert!(agent.is_alive());
    }

    #[test]
    fn bogus_token_is_up() {
        let dir = tempfile::tempdir().unwrap();
        let spec = shell_agent(dir.path(), "while read line; do echo bogus; done\n");
        let mut agent = AgentHandle::new(PlayerId::One, spec);
        agent.start().unwrap();

        let response = agent.request_move(&state(), Duration::from_secs(5));
        assert_eq!(response.direction, Direction::Up);
        assert!(!response.timeout);
        assert_eq!(agent.error_count(), 1);
    }

    #[test]
    fn exited_agent_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let spec = shell_agent(dir.path(), "exit 0\n");
        let mut agent = AgentHandle::new(PlayerId::One, spec);
        agent.start().unwrap();

        let response = agent.request_move(&state(), Duration::from_secs(5));
        assert_eq!(response.direction, Direction::Down);
        assert!(!response.timeout);
        assert!(response.error.is_some());
        assert!(!agent.is_alive());
    }

    #[test]
    fn overlong_line_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let spec = shell_agent(
            dir.path(),
            "while read line; do head -c 200000 /dev/zero | tr '\\0' x; done\n",
        );
        let mut agent = AgentHandle::new(PlayerId::One, spec);
        agent.start().unwrap();

        let response = agent.request_move(&state(), Duration::from_secs(5));
        assert_eq!(response.direction, Direction::Down);
        assert!(!response.timeout);
        assert_eq!(response.error.as_deref(), Some("failed to read from agent"));
        assert_eq!(agent.error_count(), 1);
        assert!(!agent.is_alive());
    }

    #[test]
    fn chatty_agent_still_answers() {
        let dir = tempfile::tempdir().unwrap();
        let spec = shell_agent(dir.path(), "yes RIGHT\n");
        let mut agent = AgentHandle::new(PlayerId::Two, spec);
        agent.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        for _ in 0..3 {
            let response = agent.request_move(&state(), Duration::from_secs(5));
            assert_eq!(response.direction, Direction::Right);
            assert!(!response.timeout);
        }
        assert_eq!(agent.error_count(), 0);
        assert!(agent.is_alive());
    }

    #[test]
    fn line_endings_are_stripped() {
        let mut input = io::Cursor::new(b"UP\r\nDOWN\nlast".to_vec());
        assert_eq!(read_response_line(1, &mut input).as_deref(), Some("UP"));
        assert_eq!(read_response_line(1, &mut input).as_deref(), Some("DOWN"));
        assert_eq!(read_response_line(1, &mut input).as_deref(), Some("last"));
        assert_eq!(read_response_line(1, &mut input), None);
    }

    #[test]
    fn line_at_the_limit_is_accepted() {
        let mut exact = vec![b'x'; MAX_LINE_BYTES];
        exact.push(b'\n');
        let line = read_response_line(1, &mut io::Cursor::new(exact)).unwrap();
        assert_eq!(line.len(), MAX_LINE_BYTES);

        let over = vec![b'x'; MAX_LINE_BYTES + 1];
        assert_eq!(read_response_line(1, &mut io::Cursor::new(over)), None);
    }

    #[test]
    fn not_started_agent_falls_back() {
        let mut agent = AgentHandle::new(
            PlayerId::Two,
            BotSpec {
                directory: PathBuf::new(),
                config: BotConfig::from_command(&["true"]),
            },
        );
        let response = agent.request_move(&state(), Duration::from_secs(1));
        assert_eq!(response.direction, Direction::Up);
        assert!(!response.timeout);
        assert_eq!(response.error.as_deref(), Some("agent is not running"));
        assert_eq!(agent.error_count(), 1);
    }

    #[test]
    fn start_twice_is_a_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = shell_agent(dir.path(), "while read line; do :; done\n");
        let mut agent = AgentHandle::new(PlayerId::One, spec);
        agent.start().unwrap();
        let err = agent.start().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<JudgeError>(),
            Some(JudgeError::State { slot: 1, .. })
        ));
    }

    #[test]
    fn unknown_executable_is_a_start_error() {
        let mut agent = AgentHandle::new(
            PlayerId::Two,
            BotSpec {
                directory: PathBuf::new(),
                config: BotConfig::from_command(&["no-such-agent-binary-1337"]),
            },
        );
        let err = agent.start().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<JudgeError>(),
            Some(JudgeError::Start { slot: 2, .. })
        ));
        assert!(!agent.is_alive());
    }

    #[test]
    fn stderr_goes_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let spec = shell_agent(
            dir.path(),
            "echo thinking >&2\nwhile read line; do echo UP; done\n",
        );
        let mut agent = AgentHandle::new(PlayerId::Two, spec);
        agent.start().unwrap();
        agent.request_move(&state(), Duration::from_secs(5));
        agent.stop().unwrap();

        let log = dir.path().join("bot_2_stderr.log");
        let deadline = Instant::now() + Duration::from_secs(5);
        while std::fs::read_to_string(&log).unwrap_or_default().is_empty()
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "thinking\n");
    }
}
