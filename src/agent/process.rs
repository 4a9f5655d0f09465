use std::{
    path::Path,
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio},
    time::{Duration, Instant},
};

use anyhow::{self, Context};
use tracing::{debug, warn};

use super::bot_config::BotConfig;

/// Extra environment handed to every bot.
pub type AgentEnv = [(String, String)];

/// Program and arguments used to launch a bot living in `directory`.
///
/// With a docker image configured this is
/// `docker run --rm -i [--cpus C] [--memory M] [-e K=V].. -v <abs dir>:/bot:ro <image>`,
/// otherwise the configured command itself. `--cpus` is clamped to the host CPU count.
pub fn launch_command(
    config: &BotConfig,
    directory: &Path,
    env: &AgentEnv,
) -> (String, Vec<String>) {
    if !config.uses_container() {
        let mut command = config.command.iter().cloned();
        let program = command.next().unwrap_or_default();
        return (program, command.collect());
    }

    let mut args: Vec<String> = ["run", "--rm", "-i"].map(String::from).into();
    if config.docker_cpus > 0.0 {
        let host_cpus = num_cpus::get() as f64;
        let cpus = if config.docker_cpus > host_cpus {
            warn!(
                requested = config.docker_cpus,
                available = host_cpus,
                "docker_cpus exceeds host cpu count, clamping"
            );
            host_cpus
        } else {
            config.docker_cpus
        };
        args.push("--cpus".into());
        args.push(cpus.to_string());
    }
    if !config.docker_memory.is_empty() {
        args.push("--memory".into());
        args.push(config.docker_memory.clone());
    }
    for (key, value) in env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }
    match std::path::absolute(directory) {
        Ok(abs) => {
            args.push("-v".into());
            args.push(format!("{}:/bot:ro", abs.display()));
        }
        Err(e) => warn!("could not resolve {}, not mounting it: {e}", directory.display()),
    }
    args.push(config.docker_image.clone());
    ("docker".to_string(), args)
}

fn create_process(
    command: &str,
    args: &[String],
    directory: &Path,
    env: &AgentEnv,
) -> anyhow::Result<Child> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if !directory.as_os_str().is_empty() {
        cmd.current_dir(directory);
    }
    cmd.spawn()
        .with_context(|| format!("could not launch '{command}'"))
}

/// A launched bot process with its three pipes.
///
/// The process is killed on drop if [`AgentProcess::try_kill`] was never called.
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    cleaned_up: bool,
}

impl AgentProcess {
    pub fn launch(
        config: &BotConfig,
        directory: &Path,
        env: &AgentEnv,
    ) -> anyhow::Result<AgentProcess> {
        let (command, args) = launch_command(config, directory, env);
        debug!(%command, ?args, "launching agent");
        let child = create_process(&command, &args, directory, env)?;
        Ok(AgentProcess {
            child,
            cleaned_up: false,
        })
    }

    /// Hands out the pipes. Each is returned once.
    pub fn take_pipes(&mut self) -> anyhow::Result<(ChildStdin, ChildStdout, ChildStderr)> {
        let stdin = self.child.stdin.take().context("stdin not attached")?;
        let stdout = self.child.stdout.take().context("stdout not attached")?;
        let stderr = self.child.stderr.take().context("stderr not attached")?;
        Ok((stdin, stdout, stderr))
    }

    /// Waits up to `grace` for the process to leave on its own, then kills and reaps it.
    pub fn try_kill(&mut self, grace: Duration) -> anyhow::Result<()> {
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.child.try_wait().context("could not poll process")? {
                debug!(pid = self.child.id(), %status, "agent exited");
                self.cleaned_up = true;
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(10).min(grace / 10));
        }
        // kill fails when the process exited between the poll and now, wait still reaps it
        if let Err(e) = self.child.kill() {
            debug!("kill failed: {e}");
        }
        self.child.wait().context("could not reap process")?;
        self.cleaned_up = true;
        Ok(())
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        if !self.cleaned_up {
            if let Err(e) = self.try_kill(Duration::ZERO) {
                warn!("could not kill agent process {} on drop: {e:#}", self.child.id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_command() {
        let config = BotConfig::from_command(&["python3", "bot.py", "--fast"]);
        let (program, args) = launch_command(&config, Path::new("bots/a"), &[]);
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["bot.py", "--fast"]);
    }

    #[test]
    fn docker_command() {
        let config = BotConfig {
            docker_image: "snake:latest".into(),
            docker_memory: "256m".into(),
            docker_cpus: 0.5,
            ..BotConfig::from_command(&["./bot"])
        };
        let env = [("TURN_TIMEOUT_SCALE".to_string(), "1.5".to_string())];
        let (program, args) = launch_command(&config, Path::new("/srv/bots/a"), &env);
        assert_eq!(program, "docker");
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "-i",
                "--cpus",
                "0.5",
                "--memory",
                "256m",
                "-e",
                "TURN_TIMEOUT_SCALE=1.5",
                "-v",
                "/srv/bots/a:/bot:ro",
                "snake:latest"
            ]
        );
    }

    #[test]
    fn docker_without_limits() {
        let config = BotConfig {
            docker_image: "img".into(),
            ..BotConfig::from_command(&["./bot"])
        };
        let (_, args) = launch_command(&config, Path::new("/b"), &[]);
        assert_eq!(args, vec!["run", "--rm", "-i", "-v", "/b:/bot:ro", "img"]);
    }

    #[test]
    fn docker_cpus_are_clamped() {
        let config = BotConfig {
            docker_image: "img".into(),
            docker_cpus: 100_000.0,
            ..BotConfig::from_command(&["./bot"])
        };
        let (_, args) = launch_command(&config, Path::new("/b"), &[]);
        assert_eq!(args[4], num_cpus::get().to_string());
    }

    #[test]
    fn missing_executable_fails() {
        let config = BotConfig::from_command(&["definitely-not-a-real-binary-4242"]);
        assert!(AgentProcess::launch(&config, Path::new(""), &[]).is_err());
    }

    #[test]
    fn kill_after_grace() {
        let config = BotConfig::from_command(&["sleep", "30"]);
        let mut process = AgentProcess::launch(&config, Path::new(""), &[]).unwrap();
        let start = Instant::now();
        process.try_kill(Duration::from_millis(50)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
