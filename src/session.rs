//! One connected controller driven from the terminal
//!
//! The session claims the main thread as the UI context and pumps controller
//! events into a [`ConsoleListener`] between awaits.

use crate::console::ConsoleListener;
use anyhow::{anyhow, bail, Context};
use cnclink_communication::CncController;
use cnclink_core::{ControllerEvents, StreamProgress, UiContext};
use cnclink_gcode::{CarveControl, CarveStreamer};
use cnclink_settings::Config;
use std::io::BufRead;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const PUMP_INTERVAL: Duration = Duration::from_millis(20);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Pump rounds to wait for the completion event after streaming stops
const SETTLE_ROUNDS: u32 = 10;

/// What to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Serial { port: String, baud_rate: u32 },
    Simulator,
}

/// How a stream answers its rendezvous points
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamPolicy {
    /// Acknowledge `error:N` and keep going
    pub continue_on_error: bool,
    /// Acknowledge tool changes without waiting for Enter
    pub auto_tool_change: bool,
}

/// A line typed by the operator while a stream runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Empty line: answers a tool change
    Continue,
    Pause,
    Resume,
    Abort,
    Unknown,
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "" => Self::Continue,
            "p" | "pause" => Self::Pause,
            "r" | "resume" => Self::Resume,
            "a" | "abort" | "q" => Self::Abort,
            _ => Self::Unknown,
        }
    }
}

/// What the stream loop steers
enum Steering {
    /// Plain program: pause and resume are feed hold and cycle start
    Controller,
    /// Generated carve: pausing also stops generation
    Carve(CarveControl),
}

pub struct Session {
    controller: CncController,
    events: ControllerEvents,
    ctx: UiContext,
    listener: ConsoleListener,
    operator: Option<mpsc::UnboundedReceiver<String>>,
}

impl Session {
    /// Connect according to `config` and `target`
    pub async fn open(config: &Config, target: &Target, verbose: bool) -> anyhow::Result<Self> {
        let (mut controller, events) = CncController::new(config.controller_config());
        match target {
            Target::Serial { port, baud_rate } => controller
                .connect(port, *baud_rate)
                .await
                .with_context(|| format!("connecting to {}", port))?,
            Target::Simulator => controller
                .connect_simulator_with(config.simulator_config())
                .await
                .context("starting simulator")?,
        }

        let mut session = Self {
            controller,
            events,
            ctx: UiContext::claim(),
            listener: ConsoleListener::new(verbose),
            operator: None,
        };
        session.pump();
        Ok(session)
    }

    pub fn controller(&self) -> &CncController {
        &self.controller
    }

    /// Deliver queued events to the listener
    pub fn pump(&mut self) -> usize {
        self.events.pump(&self.ctx, &mut self.listener)
    }

    /// Pump until `done` holds, the link drops, or `timeout` passes
    async fn wait_for(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&ConsoleListener) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if done(&self.listener) {
                return true;
            }
            if self.listener.disconnected || Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(PUMP_INTERVAL).await;
        }
    }

    /// Send one manual command and wait for its acknowledgement
    ///
    /// Returns the lines the device sent before the `ok`.
    pub async fn command(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        self.pump();
        self.listener.clear_received();
        self.controller.send_command(line)?;

        if !self
            .wait_for(COMMAND_TIMEOUT, |l| !l.manual_acks.is_empty())
            .await
        {
            bail!("no response to '{}'", line);
        }
        let ack = self.listener.manual_acks.remove(0);
        if !ack.ok {
            bail!(
                "'{}' rejected with error:{}",
                line,
                ack.error_code.unwrap_or_default()
            );
        }
        // the ok arrives after every line the command produced
        let received = std::mem::take(&mut self.listener.received);
        Ok(received
            .into_iter()
            .filter(|l| l != "ok" && !l.starts_with('<'))
            .collect())
    }

    /// Stream `lines` to completion
    pub async fn stream_lines(
        &mut self,
        lines: Vec<String>,
        policy: StreamPolicy,
    ) -> anyhow::Result<StreamProgress> {
        self.controller.start_stream(lines)?;
        self.drive_stream(policy, Steering::Controller).await
    }

    /// Stream a carve, keeping its pause and abort reachable
    pub async fn stream_carve(
        &mut self,
        streamer: CarveStreamer,
        policy: StreamPolicy,
    ) -> anyhow::Result<StreamProgress> {
        let realtime = Arc::new(self.controller.realtime_handle());
        let streamer = streamer.with_realtime(realtime);
        let control = streamer.control();
        self.controller.start_stream_source(Box::new(streamer))?;
        self.drive_stream(policy, Steering::Carve(control)).await
    }

    /// Start reading operator lines from stdin
    pub fn listen_to_operator(&mut self) {
        if self.operator.is_none() {
            println!("Commands: p = pause, r = resume, a = abort");
            self.operator = Some(spawn_operator_input());
        }
    }

    async fn drive_stream(
        &mut self,
        policy: StreamPolicy,
        steering: Steering,
    ) -> anyhow::Result<StreamProgress> {
        self.listener.completed = None;
        self.listener.streaming_error = None;
        self.listener.tool_change = None;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ticker = tokio::time::interval(PUMP_INTERVAL);
        let mut idle_rounds = 0;
        let mut awaiting_tool = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut ctrl_c => {
                    tracing::warn!("Interrupted; aborting stream");
                    self.abort_stream(&steering)?;
                    bail!("stream interrupted");
                }
                line = next_operator_line(self.operator.as_mut()) => match line {
                    Some(line) => {
                        if awaiting_tool && OperatorCommand::parse(&line) == OperatorCommand::Continue {
                            awaiting_tool = false;
                            self.controller.acknowledge_tool_change();
                        } else if self.steer(&steering, OperatorCommand::parse(&line))? {
                            bail!("stream aborted by operator");
                        }
                    }
                    None => {
                        self.operator = None;
                        if awaiting_tool {
                            bail!("stdin closed while waiting for a tool change");
                        }
                    }
                },
            }
            self.pump();

            if let Some(progress) = self.listener.completed.take() {
                return Ok(progress);
            }
            if self.listener.disconnected {
                bail!("connection lost during stream");
            }
            if let Some((code, description)) = self.listener.alarm.take() {
                bail!("stream aborted by ALARM:{} ({})", code, description);
            }
            if let Some(error) = self.listener.streaming_error.take() {
                if !policy.continue_on_error {
                    self.abort_stream(&steering)?;
                    return Err(anyhow!(error).context("stream stopped"));
                }
                self.controller.acknowledge_error();
            }
            if let Some(tool) = self.listener.tool_change.take() {
                if policy.auto_tool_change {
                    self.controller.acknowledge_tool_change();
                } else {
                    self.listen_to_operator();
                    println!("Insert tool T{} and press Enter to continue", tool);
                    awaiting_tool = true;
                }
            }

            if self.controller.is_streaming() {
                idle_rounds = 0;
            } else {
                idle_rounds += 1;
                if idle_rounds > SETTLE_ROUNDS {
                    let progress = self.controller.progress().unwrap_or_default();
                    bail!("stream ended before completion ({})", progress);
                }
            }
        }
    }

    /// Apply an operator command; `true` when the stream was aborted
    fn steer(&self, steering: &Steering, command: OperatorCommand) -> anyhow::Result<bool> {
        match (command, steering) {
            (OperatorCommand::Pause, Steering::Carve(control)) => control.pause(),
            (OperatorCommand::Pause, Steering::Controller) => self.controller.feed_hold()?,
            (OperatorCommand::Resume, Steering::Carve(control)) => control.resume(),
            (OperatorCommand::Resume, Steering::Controller) => self.controller.cycle_start()?,
            (OperatorCommand::Abort, _) => {
                self.abort_stream(steering)?;
                return Ok(true);
            }
            (OperatorCommand::Continue, _) => {}
            (OperatorCommand::Unknown, _) => println!("Commands: p = pause, r = resume, a = abort"),
        }
        Ok(false)
    }

    fn abort_stream(&self, steering: &Steering) -> anyhow::Result<()> {
        match steering {
            // the carve's abort sends the soft reset
            Steering::Carve(control) => control.abort(),
            Steering::Controller => self.controller.abort()?,
        }
        Ok(())
    }

    /// Disconnect and report the final state
    pub fn close(mut self) {
        self.controller.disconnect();
        self.pump();
    }
}

/// Operator lines from stdin, read on a dedicated thread
fn spawn_operator_input() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("cnclink-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Operator input unavailable: {}", e);
    }
    rx
}

async fn next_operator_line(operator: Option<&mut mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match operator {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_commands() {
        assert_eq!(OperatorCommand::parse(""), OperatorCommand::Continue);
        assert_eq!(OperatorCommand::parse(" P "), OperatorCommand::Pause);
        assert_eq!(OperatorCommand::parse("resume"), OperatorCommand::Resume);
        assert_eq!(OperatorCommand::parse("q"), OperatorCommand::Abort);
        assert_eq!(OperatorCommand::parse("x"), OperatorCommand::Unknown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_operator_abort_ends_carve() {
        use cnclink_gcode::{MultiPassToolpath, ToolpathConfig, ToolpathPoint};

        let mut session = Session::open(&Config::default(), &Target::Simulator, false)
            .await
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        session.operator = Some(rx);

        let path = MultiPassToolpath {
            clearing: (1..=200)
                .map(|i| ToolpathPoint::feed(i as f64, 0.0, 0.0))
                .collect(),
            finishing: vec![],
        };
        let config = ToolpathConfig {
            feed_rate: 300.0,
            ..ToolpathConfig::default()
        };
        let mut streamer = CarveStreamer::new(path, config);
        let control = streamer.control();
        streamer.start();

        tx.send("p".to_string()).unwrap();
        tx.send("a".to_string()).unwrap();
        let err = session
            .stream_carve(streamer, StreamPolicy::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("aborted by operator"));
        assert!(control.is_aborted());
        session.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_and_command_against_simulator() {
        let config = Config::default();
        let mut session = Session::open(&config, &Target::Simulator, false)
            .await
            .unwrap();

        let settings = session.command("$$").await.unwrap();
        assert!(settings.iter().any(|l| l.starts_with("$110=")));

        let program = vec!["G21".to_string(), "G90".to_string(), "G1 X1 F3000".to_string(), "G0 X0".to_string()];
        let progress = session
            .stream_lines(program, StreamPolicy::default())
            .await
            .unwrap();
        assert_eq!(progress.acked_lines, 4);
        assert_eq!(progress.error_count, 0);

        let err = session
            .stream_lines(vec!["G99".to_string()], StreamPolicy::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stream stopped"));
        session.close();
    }
}
