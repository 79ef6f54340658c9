// Engine process - spawns the engine executable and talks to it over stdio
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::protocol::{CallbackEvent, Request, Response};
use super::{
    Algorithm, AgentHandle, Engine, EngineError, EvaluateRequest, Evaluation, LearnOutcome,
    LearnRequest,
};
use crate::env::{EnvHandle, EnvSpec};
use crate::trainers::callbacks::{CallbackContext, CallbackList};
use crate::trainers::settings::{AgentSettings, BackendSettings, EngineSettings};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct ProcessEngine {
    command: PathBuf,
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    shut_down: bool,
}

impl ProcessEngine {
    pub fn spawn(settings: &EngineSettings) -> Result<Self, EngineError> {
        let mut cmd = Command::new(&settings.command);
        cmd.args(&settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        // Keep the terminal's Ctrl-C away from the engine; the launcher stops it.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            command: settings.command.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(EngineError::Disconnected)?;
        let stdout = child.stdout.take().ok_or(EngineError::Disconnected)?;

        info!(command = %settings.command.display(), pid = child.id(), "Engine started");

        Ok(Self {
            command: settings.command.clone(),
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            shut_down: false,
        })
    }

    fn send(&mut self, request: &Request) -> Result<(), EngineError> {
        debug!(op = request.name(), "-> engine");
        serde_json::to_writer(&mut self.stdin, request)?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Response, EngineError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(EngineError::Disconnected);
            }
            if !line.trim().is_empty() {
                break;
            }
        }
        let response: Response = serde_json::from_str(line.trim())?;
        if let Response::Error { kind, message } = response {
            return Err(EngineError::Remote { kind, message });
        }
        Ok(response)
    }

    fn call(&mut self, request: &Request) -> Result<Response, EngineError> {
        self.send(request)?;
        self.recv()
    }

    fn call_ok(&mut self, request: &Request) -> Result<(), EngineError> {
        match self.call(request)? {
            Response::Ok => Ok(()),
            other => Err(unexpected(request, &other)),
        }
    }

    fn call_agent(
        &mut self,
        request: &Request,
        algorithm: Algorithm,
        env: &EnvHandle,
    ) -> Result<AgentHandle, EngineError> {
        match self.call(request)? {
            Response::AgentReady { agent, spaces } => Ok(AgentHandle {
                id: agent,
                algorithm,
                env: env.clone(),
                spaces,
            }),
            other => Err(unexpected(request, &other)),
        }
    }

    /// Replies `proceed: false` to every pending event until the loop reports back.
    fn drain_learn(&mut self) -> Result<LearnOutcome, EngineError> {
        loop {
            match self.recv()? {
                Response::Event { .. } => self.send(&Request::Resume { proceed: false })?,
                Response::LearnFinished { num_timesteps, .. } => {
                    return Ok(LearnOutcome {
                        num_timesteps,
                        stopped_early: true,
                    })
                }
                other => {
                    return Err(EngineError::Unexpected {
                        request: "learn",
                        response: format!("{:?}", other),
                    })
                }
            }
        }
    }

    fn wait_for_exit(&mut self) -> Result<(), EngineError> {
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            if let Some(status) = self.child.try_wait()? {
                debug!(%status, "Engine exited");
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(command = %self.command.display(), "Engine did not exit in time, killing it");
                self.child.kill()?;
                self.child.wait()?;
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

fn unexpected(request: &Request, response: &Response) -> EngineError {
    EngineError::Unexpected {
        request: request.name(),
        response: format!("{:?}", response),
    }
}

impl Engine for ProcessEngine {
    fn configure(&mut self, settings: &BackendSettings) -> Result<(), EngineError> {
        self.call_ok(&Request::Configure { backend: *settings })
    }

    fn make_vec_env(&mut self, spec: &EnvSpec) -> Result<EnvHandle, EngineError> {
        let request = Request::MakeVecEnv { spec: spec.clone() };
        match self.call(&request)? {
            Response::EnvCreated { env, n_envs, spaces } => Ok(EnvHandle {
                id: env,
                spec: spec.clone(),
                n_envs,
                spaces,
            }),
            other => Err(unexpected(&request, &other)),
        }
    }

    fn close_env(&mut self, env: &EnvHandle) -> Result<(), EngineError> {
        self.call_ok(&Request::CloseEnv { env: env.id })
    }

    fn create_agent(
        &mut self,
        algorithm: Algorithm,
        env: &EnvHandle,
        settings: &AgentSettings,
    ) -> Result<AgentHandle, EngineError> {
        let request = Request::CreateAgent {
            algorithm,
            env: env.id,
            settings: settings.clone(),
        };
        self.call_agent(&request, algorithm, env)
    }

    fn load_agent(
        &mut self,
        algorithm: Algorithm,
        path: &Path,
        env: &EnvHandle,
    ) -> Result<AgentHandle, EngineError> {
        let request = Request::LoadAgent {
            algorithm,
            path: path.to_path_buf(),
            env: env.id,
        };
        self.call_agent(&request, algorithm, env)
    }

    fn learn(
        &mut self,
        agent: &AgentHandle,
        request: &LearnRequest,
        callbacks: &mut CallbackList,
    ) -> Result<LearnOutcome, EngineError> {
        self.send(&Request::Learn {
            agent: agent.id,
            total_timesteps: request.total_timesteps,
            use_masking: request.use_masking,
            reset_num_timesteps: request.reset_num_timesteps,
        })?;

        loop {
            match self.recv()? {
                Response::Event { event } => {
                    let outcome = {
                        let mut ctx = CallbackContext::new(self, agent, event.num_timesteps());
                        callbacks.dispatch(&mut ctx, &event)
                    };
                    match outcome {
                        Ok(proceed) => {
                            if !proceed && !matches!(event, CallbackEvent::TrainingEnd { .. }) {
                                info!(num_timesteps = event.num_timesteps(), "Stopping run loop");
                            }
                            self.send(&Request::Resume { proceed })?;
                        }
                        Err(err) => {
                            // The callback failure is what gets reported, even if the loop
                            // cannot be wound down cleanly.
                            let drained = self
                                .send(&Request::Resume { proceed: false })
                                .and_then(|_| self.drain_learn());
                            if let Err(e) = drained {
                                warn!("Run loop did not stop cleanly: {}", e);
                            }
                            return Err(EngineError::Callback(Box::new(err)));
                        }
                    }
                }
                Response::LearnFinished {
                    num_timesteps,
                    stopped_early,
                } => {
                    return Ok(LearnOutcome {
                        num_timesteps,
                        stopped_early,
                    })
                }
                other => {
                    return Err(EngineError::Unexpected {
                        request: "learn",
                        response: format!("{:?}", other),
                    })
                }
            }
        }
    }

    fn evaluate(
        &mut self,
        agent: &AgentHandle,
        env: &EnvHandle,
        request: &EvaluateRequest,
    ) -> Result<Evaluation, EngineError> {
        let request = Request::Evaluate {
            agent: agent.id,
            env: env.id,
            n_eval_episodes: request.n_eval_episodes,
            deterministic: request.deterministic,
            use_masking: request.use_masking,
        };
        let response = self.call(&request)?;
        match response.clone().into_evaluation() {
            Some(evaluation) => Ok(evaluation),
            None => Err(unexpected(&request, &response)),
        }
    }

    fn sync_normalization(&mut self, from: &EnvHandle, to: &EnvHandle) -> Result<(), EngineError> {
        self.call_ok(&Request::SyncNormalization {
            from: from.id,
            to: to.id,
        })
    }

    fn save_agent(&mut self, agent: &AgentHandle, path: &Path) -> Result<(), EngineError> {
        self.call_ok(&Request::SaveAgent {
            agent: agent.id,
            path: path.to_path_buf(),
        })
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.shut_down {
            return Ok(());
        }
        self.send(&Request::Shutdown)?;
        self.wait_for_exit()?;
        self.shut_down = true;
        Ok(())
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        if !self.shut_down {
            if let Err(e) = self.shutdown() {
                warn!("Engine shutdown failed: {}", e);
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
        }
    }
}
