//! Command line surface

use crate::session::{Session, StreamPolicy, Target};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use cnclink_communication::list_ports;
use cnclink_core::Firmware;
use cnclink_gcode::{resume_program, CarveStreamer, MultiPassToolpath, ToolpathConfig};
use cnclink_settings::{Config, MacroManager, UnifiedSettingsMap};
use serde::Deserialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "cnclink")]
#[command(about = "Stream G-code to GRBL, grblHAL and FluidNC controllers", long_about = None)]
#[command(version = crate::VERSION)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Serial port, overriding the configured one
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate, overriding the configured one
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// Talk to the built-in simulator instead of a serial port
    #[arg(long, global = true)]
    pub simulator: bool,

    /// Firmware the simulator emulates
    #[arg(long, global = true)]
    pub firmware: Option<Firmware>,

    /// Echo wire traffic and debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List serial ports
    Ports,
    /// Stream a G-code file
    Stream {
        /// Program to send
        file: PathBuf,
        /// Resume at this 1-based line, restoring modal state first
        #[arg(long)]
        from_line: Option<usize>,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Generate and stream a carve from a toolpath JSON file
    Carve {
        /// JSON with `toolpath` and optional `config`
        file: PathBuf,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Send commands one at a time and print the replies
    Send {
        #[arg(required = true)]
        lines: Vec<String>,
    },
    /// Run the homing cycle
    Home,
    /// Clear an alarm lock
    Unlock,
    /// Firmware settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Macro library
    #[command(subcommand)]
    Macros(MacroCommand),
    /// Application configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct PolicyArgs {
    /// Acknowledge `error:N` replies and keep streaming
    #[arg(long)]
    pub continue_on_error: bool,
    /// Do not wait for Enter on tool changes
    #[arg(long)]
    pub auto_tool_change: bool,
}

impl From<PolicyArgs> for StreamPolicy {
    fn from(args: PolicyArgs) -> Self {
        StreamPolicy {
            continue_on_error: args.continue_on_error,
            auto_tool_change: args.auto_tool_change,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Read every setting from the device
    Dump {
        /// Save a backup here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write one setting by its unified key
    Set { key: String, value: String },
    /// Compare two backups
    Diff { current: PathBuf, other: PathBuf },
}

#[derive(Subcommand, Debug)]
pub enum MacroCommand {
    /// List macros in display order
    List,
    /// Add a macro
    Add {
        name: String,
        /// Body; lines separated by `;;` or given as a file with `--file`
        #[arg(required_unless_present = "file")]
        gcode: Option<String>,
        #[arg(long, conflicts_with = "gcode")]
        file: Option<PathBuf>,
        #[arg(long)]
        shortcut: Option<String>,
    },
    /// Remove a user macro
    Remove { name: String },
    /// Expand a macro and stream it
    Run {
        name: String,
        #[command(flatten)]
        policy: PolicyArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write the default configuration
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

/// Toolpath file accepted by `carve`
#[derive(Debug, Deserialize)]
struct CarveJob {
    toolpath: MultiPassToolpath,
    #[serde(default)]
    config: ToolpathConfig,
}

impl Cli {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(Config::default_path()?),
        }
    }

    /// Configuration with command line overrides applied
    fn load_config(&self) -> anyhow::Result<Config> {
        let path = self.config_path()?;
        let mut config = Config::load_or_default(&path)
            .with_context(|| format!("loading {}", path.display()))?;
        if let Some(port) = &self.port {
            config.connection.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.connection.baud_rate = baud;
        }
        if let Some(firmware) = self.firmware {
            config.simulator.firmware = firmware;
        }
        config.validate()?;
        Ok(config)
    }

    fn target(&self, config: &Config) -> anyhow::Result<Target> {
        if self.simulator {
            return Ok(Target::Simulator);
        }
        if config.connection.port.is_empty() {
            bail!("no serial port configured; pass --port or --simulator");
        }
        Ok(Target::Serial {
            port: config.connection.port.clone(),
            baud_rate: config.connection.baud_rate,
        })
    }

    async fn connect(&self, config: &Config) -> anyhow::Result<Session> {
        let target = self.target(config)?;
        Session::open(config, &target, self.verbose).await
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.load_config()?;

    match &cli.command {
        Commands::Ports => print_ports(),
        Commands::Stream {
            file,
            from_line,
            policy,
        } => {
            let lines = read_program(file, *from_line)?;
            let mut session = cli.connect(&config).await?;
            let result = session.stream_lines(lines, (*policy).into()).await;
            session.close();
            result.map(|_| ())
        }
        Commands::Carve { file, policy } => {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            let job: CarveJob = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", file.display()))?;

            let mut session = cli.connect(&config).await?;
            let mut streamer = CarveStreamer::new(job.toolpath, job.config);
            println!("Carving {} lines", streamer.total_lines());
            streamer.start();
            if std::io::stdin().is_terminal() {
                session.listen_to_operator();
            }
            let result = session.stream_carve(streamer, (*policy).into()).await;
            session.close();
            result.map(|_| ())
        }
        Commands::Send { lines } => {
            let mut session = cli.connect(&config).await?;
            let result = send_lines(&mut session, lines).await;
            session.close();
            result
        }
        Commands::Home => single_command(&cli, &config, "$H").await,
        Commands::Unlock => single_command(&cli, &config, "$X").await,
        Commands::Settings(command) => run_settings(&cli, &config, command).await,
        Commands::Macros(command) => run_macros(&cli, &config, command).await,
        Commands::Config(command) => run_config(&cli, &config, command),
    }
}

fn print_ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let mut line = format!("{:<20} {}", port.port_name, port.description);
        if let Some(manufacturer) = port.manufacturer {
            line.push_str(&format!(" ({})", manufacturer));
        }
        println!("{}", line);
    }
    Ok(())
}

/// Program lines, resumed at `from_line` when given
fn read_program(path: &Path, from_line: Option<usize>) -> anyhow::Result<Vec<String>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let program: Vec<&str> = text.lines().collect();
    match from_line {
        None => Ok(program.iter().map(|l| l.to_string()).collect()),
        Some(0) => bail!("--from-line counts from 1"),
        Some(line) if line > program.len() => {
            bail!("{} has only {} lines", path.display(), program.len())
        }
        Some(line) => Ok(resume_program(&program, line - 1)),
    }
}

async fn send_lines(session: &mut Session, lines: &[String]) -> anyhow::Result<()> {
    for line in lines {
        for reply in session.command(line).await? {
            println!("{}", reply);
        }
    }
    Ok(())
}

async fn single_command(cli: &Cli, config: &Config, line: &str) -> anyhow::Result<()> {
    let mut session = cli.connect(config).await?;
    let result = send_lines(&mut session, &[line.to_string()]).await;
    session.close();
    result
}

async fn run_settings(cli: &Cli, config: &Config, command: &SettingsCommand) -> anyhow::Result<()> {
    match command {
        SettingsCommand::Dump { output } => {
            let mut session = cli.connect(config).await?;
            let firmware = firmware_of(&session);
            let replies = session.command("$$").await;
            session.close();

            let mut map = UnifiedSettingsMap::new();
            for line in replies? {
                map.parse_line(&line, firmware);
            }
            map.mark_saved();
            for setting in map.get_visible(firmware) {
                if let Some(value) = &setting.value {
                    println!("{:<28} {:>14} {}", setting.key, value, setting.units);
                }
            }
            if let Some(path) = output {
                map.save_to_file(path)?;
                println!("Saved {}", path.display());
            }
            Ok(())
        }
        SettingsCommand::Set { key, value } => {
            let mut session = cli.connect(config).await?;
            let firmware = firmware_of(&session);
            let result = match UnifiedSettingsMap::new().build_set_command(key, value, firmware) {
                Ok(command) => send_lines(&mut session, &[command]).await,
                Err(e) => Err(e.into()),
            };
            session.close();
            result
        }
        SettingsCommand::Diff { current, other } => {
            let current = UnifiedSettingsMap::load_from_file(current)?;
            let other = UnifiedSettingsMap::load_from_file(other)?;
            let diff = current.diff(&other);
            if diff.is_empty() {
                println!("No differences");
            }
            for entry in diff {
                println!(
                    "{:<28} {:>14} -> {}",
                    entry.key,
                    entry.current.as_deref().unwrap_or("-"),
                    entry.other.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
    }
}

fn firmware_of(session: &Session) -> Firmware {
    session
        .controller()
        .firmware()
        .map(|info| info.firmware)
        .unwrap_or(Firmware::Grbl)
}

async fn run_macros(cli: &Cli, config: &Config, command: &MacroCommand) -> anyhow::Result<()> {
    let store_path = config.macros.resolve_store_path()?;
    let mut manager = MacroManager::open_file(&store_path)?;
    manager.ensure_built_ins()?;

    match command {
        MacroCommand::List => {
            for item in manager.list()? {
                let marker = if item.built_in { "*" } else { " " };
                let shortcut = item.shortcut.as_deref().unwrap_or("");
                println!("{} {:<20} {:<10} {}", marker, item.name, shortcut, item.lines().join(" | "));
            }
            Ok(())
        }
        MacroCommand::Add {
            name,
            gcode,
            file,
            shortcut,
        } => {
            let body = match (gcode, file) {
                (_, Some(path)) => std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (Some(inline), None) => inline.replace(";;", "\n"),
                (None, None) => bail!("macro body missing"),
            };
            let item = manager.create(name, &body, shortcut.clone())?;
            println!("Added '{}' ({})", item.name, item.id);
            Ok(())
        }
        MacroCommand::Remove { name } => {
            let Some(item) = manager.find_by_name(name)? else {
                bail!("no macro named '{}'", name);
            };
            manager.delete_macro(&item.id)?;
            println!("Removed '{}'", item.name);
            Ok(())
        }
        MacroCommand::Run { name, policy } => {
            let lines = manager.expand_by_name(name)?;
            if lines.is_empty() {
                bail!("macro '{}' has no G-code", name);
            }
            let mut session = cli.connect(config).await?;
            let result = session.stream_lines(lines, (*policy).into()).await;
            session.close();
            result.map(|_| ())
        }
    }
}

fn run_config(cli: &Cli, config: &Config, command: &ConfigCommand) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Init { force } => {
            let path = cli.config_path()?;
            if path.exists() && !force {
                bail!("{} exists; pass --force to overwrite", path.display());
            }
            Config::default().save_to_file(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        ConfigCommand::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
            Ok(())
        }
    }
}
