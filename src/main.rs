use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use speaker_keepalive::alarms::Alarms;
use speaker_keepalive::controller_client::{self, ControllerClient};
use speaker_keepalive::keep_alive_config::{AudioOutput, KeepAliveConfig};
use speaker_keepalive::panel::{self, ControlPanel};
use speaker_keepalive::sink::{SilentSink, SinkFactory};
use speaker_keepalive::storage::{JsonFileStorage, Storage};
use speaker_keepalive::tone_config::{ToneConfig, FREQUENCY_PRESETS};

#[derive(Parser)]
#[command(version, about = "Keeps speakers awake with a periodic tone")]
struct Args {
    /// JSON settings file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// One of off, error, warn, info, debug, trace.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Parser)]
#[command(about = "panel commands")]
struct Repl {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start emitting tones.
    Start {
        #[command(flatten)]
        tone: ToneArgs,
    },
    Stop,
    Status,
    /// Change the tone while running or before starting.
    Set {
        #[command(flatten)]
        tone: ToneArgs,
    },
    /// Play the audible 1 kHz test tone.
    Test,
    Presets,
    /// Send a raw JSON message, e.g. '{"target":"controller","type":"GET_STATUS"}'.
    Send { json: String },
    /// Tear the controller down and bring up a fresh one.
    Restart {
        /// Also forget scheduled wake-ups, as if the host lost them.
        #[arg(long)]
        drop_alarms: bool,
    },
    Exit,
}

#[derive(clap::Args)]
struct ToneArgs {
    #[arg(short, long)]
    frequency: Option<u32>,
    #[arg(short, long)]
    duration: Option<u64>,
    #[arg(short, long)]
    interval: Option<u64>,
}

impl ToneArgs {
    fn apply_to(&self, config: ToneConfig) -> ToneConfig {
        ToneConfig {
            frequency: self.frequency.unwrap_or(config.frequency),
            duration_ms: self.duration.unwrap_or(config.duration_ms),
            interval_minutes: self.interval.unwrap_or(config.interval_minutes),
        }
    }
}

struct Session {
    keep_alive_config: KeepAliveConfig,
    storage: Arc<dyn Storage>,
    alarms: Alarms,
    panel: Arc<Mutex<ControlPanel>>,
    panel_task: JoinHandle<()>,
}

impl Session {
    async fn controller(&self) -> ControllerClient {
        controller_client::build(
            self.keep_alive_config.clone(),
            self.storage.clone(),
            self.alarms.clone(),
            sink_factory(&self.keep_alive_config),
        )
        .await
    }

    async fn restart(&mut self, drop_alarms: bool) -> Result<(), String> {
        let old_client = self.panel.lock().await.client().clone();
        old_client.shutdown().await.map_err(|e| e.to_string())?;
        self.panel_task.abort();

        if drop_alarms {
            self.alarms.clear_all();
        }

        let client = self.controller().await;
        let events = client.subscribe();
        {
            let mut panel = self.panel.lock().await;
            panel.reconnect(client);
            panel.open().await.map_err(|e| e.to_string())?;
        }
        self.panel_task = tokio::spawn(panel::drive(self.panel.clone(), events));
        Ok(())
    }
}

fn sink_factory(keep_alive_config: &KeepAliveConfig) -> SinkFactory {
    match keep_alive_config.audio_output {
        AudioOutput::Silent => SilentSink::factory(keep_alive_config.sample_rate),
        AudioOutput::Device => device_sink_factory(keep_alive_config),
    }
}

#[cfg(feature = "cpal_sink")]
fn device_sink_factory(_: &KeepAliveConfig) -> SinkFactory {
    speaker_keepalive::sink::DeviceSink::factory()
}

#[cfg(not(feature = "cpal_sink"))]
fn device_sink_factory(keep_alive_config: &KeepAliveConfig) -> SinkFactory {
    log::warn!("built without the cpal_sink feature, tones will be synthesized silently");
    SilentSink::factory(keep_alive_config.sample_rate)
}

fn readline() -> Result<Option<String>, String> {
    write!(std::io::stdout(), "> ").map_err(|e| e.to_string())?;
    std::io::stdout().flush().map_err(|e| e.to_string())?;

    let mut buffer = String::new();
    let read = std::io::stdin()
        .read_line(&mut buffer)
        .map_err(|e| e.to_string())?;

    if read == 0 {
        Ok(None)
    } else {
        Ok(Some(buffer))
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();

    let log_level = args
        .log_level
        .parse::<log::LevelFilter>()
        .map_err(|e| e.to_string())?;

    simple_logger::SimpleLogger::new()
        .with_level(log_level)
        .init()
        .map_err(|e| e.to_string())?;

    let keep_alive_config = match &args.config {
        Some(path) => KeepAliveConfig::load(path).map_err(|e| e.to_string())?,
        None => KeepAliveConfig::default(),
    };

    let storage: Arc<dyn Storage> = Arc::new(JsonFileStorage::new(&keep_alive_config.storage_path));
    let alarms = Alarms::new();

    let client = controller_client::build(
        keep_alive_config.clone(),
        storage.clone(),
        alarms.clone(),
        sink_factory(&keep_alive_config),
    )
    .await;

    let events = client.subscribe();
    let mut control_panel = ControlPanel::new(client);
    if let Err(error) = control_panel.open().await {
        log::error!("error getting status: {}", error);
    }

    let panel = Arc::new(Mutex::new(control_panel));
    let panel_task = tokio::spawn(panel::drive(panel.clone(), events));

    let mut session = Session {
        keep_alive_config,
        storage,
        alarms,
        panel,
        panel_task,
    };

    loop {
        let line = match tokio::task::spawn_blocking(readline)
            .await
            .map_err(|e| e.to_string())??
        {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match respond(line, &mut session).await {
            Ok(quit) => {
                if quit {
                    break;
                }
            }
            Err(err) => {
                writeln!(std::io::stdout(), "{err}").map_err(|e| e.to_string())?;
            }
        }
    }

    Ok(())
}

async fn respond(line: &str, session: &mut Session) -> Result<bool, String> {
    let mut args = shlex::split(line).ok_or("error: Invalid quoting")?;
    args.insert(0, "speaker-keepalive".to_string());
    let repl = Repl::try_parse_from(args).map_err(|e| e.to_string())?;

    match repl.command {
        Command::Start { tone } => {
            let mut panel = session.panel.lock().await;
            if panel.is_running() {
                return Err("already running".to_string());
            }
            let config = tone.apply_to(panel.config());
            panel.apply_config(config).await.map_err(|e| e.to_string())?;
            panel.toggle().await.map_err(|e| e.to_string())?;
            print_view(&panel);
        }
        Command::Stop => {
            let mut panel = session.panel.lock().await;
            if panel.is_running() {
                panel.toggle().await.map_err(|e| e.to_string())?;
            }
            print_view(&panel);
        }
        Command::Status => {
            print_view(&*session.panel.lock().await);
        }
        Command::Set { tone } => {
            let mut panel = session.panel.lock().await;
            let config = tone.apply_to(panel.config());
            panel.apply_config(config).await.map_err(|e| e.to_string())?;
            print_view(&panel);
        }
        Command::Test => {
            let played = session
                .panel
                .lock()
                .await
                .play_test()
                .await
                .map_err(|e| e.to_string())?;
            if !played {
                println!("test tone already playing");
            }
        }
        Command::Presets => {
            for preset in FREQUENCY_PRESETS.iter() {
                println!("{:>6} Hz  {}: {}", preset.frequency, preset.title, preset.description);
            }
        }
        Command::Send { json } => {
            let client = session.panel.lock().await.client().clone();
            match client.dispatch(&json).await.map_err(|e| e.to_string())? {
                Some(response) => {
                    let rendered = serde_json::to_string(&response).map_err(|e| e.to_string())?;
                    println!("{rendered}");
                }
                None => println!("ignored: not addressed to the controller"),
            }
        }
        Command::Restart { drop_alarms } => {
            session.restart(drop_alarms).await?;
            print_view(&*session.panel.lock().await);
        }
        Command::Exit => return Ok(true),
    }

    Ok(false)
}

fn print_view(panel: &ControlPanel) {
    let view = panel.view();
    let bars: Vec<String> = view.bars.iter().map(|bar| bar.to_string()).collect();

    println!("status:    {} [{}]", view.status_text, view.badge.text);
    println!("next ping: {}", view.countdown);
    println!(
        "tone:      {}, {} every {}",
        view.frequency, view.duration, view.interval
    );
    println!("           {}", view.frequency_info);
    println!("bars:      {}", bars.join(" "));
}
