use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use lantern_chat::{ChatSession, ChatSettings, RejectReason, SendOutcome, SessionEvent, SetupOutcome};
use lantern_config::{Config, ConfigManager};
use lantern_core::types::{
    default_catalog, sort_by_size, ModelInfo, ModelStatus, SortOrder, MODEL_LIST_CACHE_KEY,
};
use lantern_llm::{ModelRuntime, OllamaRuntime, RuntimeConfig};
use lantern_observability::{create_session_span, create_turn_span, LogManager};
use lantern_session::{load_typed, save_typed, JsonFileStore, JsonFileStoreConfig, KeyValueStore};
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::Instrument;

#[derive(Parser)]
#[command(name = "lantern")]
#[command(about = "Chat with local language models")]
#[command(version)]
struct Cli {
    /// Enable debug mode
    #[arg(long, short, default_value = "false")]
    debug: bool,

    /// Config file path
    #[arg(long, env = "LANTERN_CONFIG", default_value = "~/.lantern/config.json")]
    config: String,

    /// Override the runtime base URL from the config
    #[arg(long, env = "LANTERN_RUNTIME_URL")]
    runtime_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动交互式聊天
    Chat {
        /// 模型 ID
        #[arg(long, short)]
        model: String,
        /// 不携带历史消息
        #[arg(long, default_value = "false")]
        no_history: bool,
    },
    /// 列出可用模型
    Models {
        /// 按大小降序排列
        #[arg(long, default_value = "false")]
        desc: bool,
    },
    /// 删除已下载的模型
    Remove {
        /// 模型 ID
        model: String,
    },
    /// 配置管理命令
    Config(ConfigArgs),
}

#[derive(Args, Clone)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// 获取配置值
    Get {
        /// 配置键 (如: runtime.base_url, chat.use_context_history)
        key: String,
    },
    /// 设置配置值
    Set {
        /// 配置键 (如: runtime.base_url, chat.use_context_history)
        key: String,
        /// 配置值
        value: String,
    },
    /// 初始化默认配置
    Init {
        /// 强制覆盖已有配置
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// 显示当前配置
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path =
        lantern_config::expand_tilde(&cli.config).unwrap_or_else(|| PathBuf::from(&cli.config));

    if cli.debug {
        eprintln!("{}", "[DEBUG] Debug mode enabled".dimmed());
        eprintln!("{}", format!("[DEBUG] Config path: {:?}", config_path).dimmed());
    }

    if let Commands::Config(args) = cli.command {
        return handle_config(args, config_path).await;
    }

    let manager = ConfigManager::load(&config_path).await?;
    let mut config = manager.snapshot().await;
    if let Some(url) = &cli.runtime_url {
        config.runtime.base_url = url.clone();
    }

    let interactive = matches!(cli.command, Commands::Chat { .. });
    let _log = init_logging(&config, cli.debug, interactive);

    let runtime = Arc::new(build_runtime(&config)?);
    let storage = Arc::new(JsonFileStore::new(JsonFileStoreConfig::new(&config.storage.path)).await?);

    match cli.command {
        Commands::Chat { model, no_history } => {
            let settings = chat_settings(&config).with_context_history(!no_history && config.chat.use_context_history);
            run_chat(runtime, storage, settings, &model, cli.debug).await
        }
        Commands::Models { desc } => list_models(runtime.as_ref(), storage.as_ref(), desc).await,
        Commands::Remove { model } => {
            runtime.remove(&model).await?;
            println!("{}", format!("🗑  Removed {}", model).green());
            Ok(())
        }
        Commands::Config(_) => Ok(()),
    }
}

/// The REPL owns the terminal, so console logging is off there unless debugging.
fn init_logging(config: &Config, debug: bool, interactive: bool) -> Option<LogManager> {
    let mut obs = lantern_observability::Config::from(config).with_stderr(debug || !interactive);
    if debug {
        obs = obs.with_log_level("debug");
    }
    match LogManager::init(&obs) {
        Ok(manager) => Some(manager),
        Err(e) => {
            eprintln!("{}", format!("⚠️  Logging disabled: {}", e).yellow());
            None
        }
    }
}

fn build_runtime(config: &Config) -> anyhow::Result<OllamaRuntime> {
    let mut runtime_config = RuntimeConfig::new("ollama", &config.runtime.base_url)
        .with_timeout(Duration::from_secs(config.runtime.timeout_seconds));
    if let Some(keep_alive) = &config.runtime.keep_alive {
        runtime_config = runtime_config.with_keep_alive(keep_alive);
    }
    Ok(OllamaRuntime::new(runtime_config)?)
}

fn chat_settings(config: &Config) -> ChatSettings {
    let mut settings = ChatSettings::default()
        .with_context_history(config.chat.use_context_history)
        .with_keep_latest(config.chat.keep_latest_context_messages)
        .with_frame_interval(Duration::from_millis(config.chat.frame_interval_ms));
    settings.summary_turns = config.chat.summary_turns;
    settings.summary_prompt = config.chat.summary_prompt.clone();
    settings
}

async fn handle_config(args: ConfigArgs, config_path: PathBuf) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Get { key } => {
            let manager = ConfigManager::load(&config_path).await?;
            let config = manager.snapshot().await;

            match config.get_value(&key) {
                Some(value) => {
                    println!("{}", format!("{} = {}", key, value).green());
                }
                None => {
                    println!("{}", format!("❌ Key not found: {}", key).red());
                    std::process::exit(1);
                }
            }
        }
        ConfigCommands::Set { key, value } => {
            let manager = ConfigManager::load(&config_path).await?;

            if let Err(e) = manager.update(|config| config.set_value(&key, &value)).await {
                eprintln!("{}", format!("❌ Failed to set value: {}", e).red());
                std::process::exit(1);
            }
            println!("{}", format!("✅ Set {} = {}", key, value).green());
        }
        ConfigCommands::Init { force } => {
            if config_path.exists() && !force {
                println!("{}", format!("⚠️  Config already exists at {:?}", config_path).yellow());
                println!("{}", "Use --force to overwrite".dimmed());
                return Ok(());
            }

            lantern_config::init_lantern_dirs().await?;

            let manager = ConfigManager::new(Config::default(), config_path.clone());
            manager.save().await?;

            println!("{}", format!("✅ Config initialized at {:?}", config_path).green());
            println!("{}", "You can edit this file to customize your settings".dimmed());
        }
        ConfigCommands::Show => {
            let manager = ConfigManager::load(&config_path).await?;
            let config = manager.snapshot().await;

            println!("{}", "📋 Current Configuration:".cyan().bold());
            println!();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn list_models(
    runtime: &dyn ModelRuntime,
    storage: &dyn KeyValueStore,
    desc: bool,
) -> anyhow::Result<()> {
    let mut models: Vec<ModelInfo> = match load_typed(storage, MODEL_LIST_CACHE_KEY).await {
        Ok(Some(models)) => models,
        Ok(None) | Err(_) => {
            let models = default_catalog();
            save_typed(storage, MODEL_LIST_CACHE_KEY, &models).await?;
            models
        }
    };
    sort_by_size(
        &mut models,
        if desc { SortOrder::Desc } else { SortOrder::Asc },
    );

    println!("{}", "📦 Models:".cyan().bold());
    let mut reachable = true;
    for model in &models {
        let mark = if reachable {
            match runtime.is_downloaded(&model.id).await {
                Ok(true) => "✓".green(),
                Ok(false) => " ".normal(),
                Err(e) => {
                    reachable = false;
                    eprintln!("{}", format!("⚠️  Runtime unreachable: {}", e).yellow());
                    "?".dimmed()
                }
            }
        } else {
            "?".dimmed()
        };
        println!(
            " {} {:<40} {:>8}  {}",
            mark,
            model.name,
            model.size,
            model.id.dimmed()
        );
    }
    Ok(())
}

/// What a line typed at the chat prompt asks for
#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Send(String),
    Clear,
    Remove,
    Context(bool),
    Status,
    Quit,
    Help,
    Unknown(String),
    Empty,
}

fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ReplCommand::Send(line.to_string());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("quit" | "exit"), _) => ReplCommand::Quit,
        (Some("clear"), _) => ReplCommand::Clear,
        (Some("remove"), _) => ReplCommand::Remove,
        (Some("status"), _) => ReplCommand::Status,
        (Some("help"), _) => ReplCommand::Help,
        (Some("context"), Some("on")) => ReplCommand::Context(true),
        (Some("context"), Some("off")) => ReplCommand::Context(false),
        _ => ReplCommand::Unknown(line.to_string()),
    }
}

/// Renders session events on the terminal
#[derive(Default)]
struct Printer {
    debug: bool,
    /// Text already shown for the reply being streamed
    shown: String,
    downloading: bool,
}

impl Printer {
    fn begin_reply(&mut self) {
        self.shown.clear();
        print!("{} ", "Assistant:".green().bold());
        let _ = io::stdout().flush();
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::MessageUpdated { text, .. } => {
                if let Some(rest) = text.strip_prefix(self.shown.as_str()) {
                    print!("{}", rest);
                } else if !text.is_empty() {
                    print!("\n{}", text);
                }
                self.shown = text;
                let _ = io::stdout().flush();
            }
            SessionEvent::DownloadProgress { percentage } => {
                self.downloading = true;
                print!("\r⬇️  Downloading {:>5.1}%", percentage);
                let _ = io::stdout().flush();
            }
            SessionEvent::ModelStatusChanged { status } => {
                if self.downloading {
                    println!();
                    self.downloading = false;
                }
                match status {
                    ModelStatus::Preparing => println!("{}", "⚙️  Preparing model...".dimmed()),
                    ModelStatus::Ready => println!("{}", "✅ Model ready".green()),
                    other if self.debug => {
                        eprintln!("{}", format!("[DEBUG] Model status: {}", other).dimmed())
                    }
                    _ => {}
                }
            }
            SessionEvent::Alert { title, message } => {
                eprintln!("{}", format!("❌ {}: {}", title, message).red());
            }
            SessionEvent::ScrollToBottom => {}
        }
    }
}

/// Run `fut` while rendering the events it produces
async fn drive<F: Future>(
    fut: F,
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    printer: &mut Printer,
) -> F::Output {
    tokio::pin!(fut);
    let output = loop {
        tokio::select! {
            output = &mut fut => break output,
            Some(event) = rx.recv() => printer.handle(event),
        }
    };
    while let Ok(event) = rx.try_recv() {
        printer.handle(event);
    }
    output
}

async fn run_chat(
    runtime: Arc<OllamaRuntime>,
    storage: Arc<JsonFileStore>,
    settings: ChatSettings,
    model_id: &str,
    debug: bool,
) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = ChatSession::with_events(runtime, storage, settings, tx);
    let span = create_session_span(model_id);
    let mut printer = Printer {
        debug,
        ..Printer::default()
    };

    println!("{}", "🏮 Lantern Interactive Chat".cyan().bold());
    println!("{}", format!("Model: {}", model_id).dimmed());
    println!("{}", "Type /help for commands, /quit to leave".dimmed());
    println!();

    let ready = drive(session.start(model_id).instrument(span.clone()), &mut rx, &mut printer).await;
    if !ready {
        println!("{}", "Model not available locally, downloading...".yellow());
        let outcome = drive(
            session.setup_model(model_id).instrument(span.clone()),
            &mut rx,
            &mut printer,
        )
        .await;
        if !matches!(outcome, SetupOutcome::Ready | SetupOutcome::AlreadyReady) {
            println!("{}", "Model setup did not complete; messages will be rejected until it does.".yellow());
        }
    }

    let history = session.store().len();
    if history > 0 {
        println!("{}", format!("Restored {} messages", history).dimmed());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "You:".cyan().bold());
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match parse_command(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => break,
            ReplCommand::Help => {
                println!("{}", "/clear          clear the conversation".dimmed());
                println!("{}", "/remove         delete the model and leave".dimmed());
                println!("{}", "/context on|off send history with each message".dimmed());
                println!("{}", "/status         show session state".dimmed());
                println!("{}", "/quit           save and leave".dimmed());
                println!("{}", "Ctrl-C while the model is answering stops the reply".dimmed());
            }
            ReplCommand::Unknown(input) => {
                println!("{}", format!("Unknown command: {}", input).yellow());
            }
            ReplCommand::Clear => match session.clear_conversation().await {
                Ok(()) => println!("{}", "🧹 Conversation cleared".green()),
                Err(e) => println!("{}", format!("❌ Failed to clear: {}", e).red()),
            },
            ReplCommand::Remove => {
                drive(session.remove_model(), &mut rx, &mut printer).await;
                println!("{}", format!("🗑  Removed {}", model_id).green());
                break;
            }
            ReplCommand::Context(enabled) => {
                session.set_use_context_history(enabled);
                let state = if enabled { "on" } else { "off" };
                println!("{}", format!("Context history {}", state).dimmed());
            }
            ReplCommand::Status => print_status(&session),
            ReplCommand::Send(text) => {
                printer.begin_reply();
                let turn = async {
                    let send = session.send(&text);
                    tokio::pin!(send);
                    tokio::select! {
                        outcome = &mut send => outcome,
                        _ = tokio::signal::ctrl_c() => {
                            session.abort_generation();
                            send.await
                        }
                    }
                };
                let turn_span = create_turn_span(&(session.store().len() / 2 + 1).to_string());
                let outcome = drive(turn.instrument(turn_span), &mut rx, &mut printer).await;
                report(outcome);
            }
        }
    }

    if let Err(e) = session.shutdown().instrument(span).await {
        eprintln!("{}", format!("⚠️  Conversation not saved: {}", e).yellow());
    }
    println!("{}", "👋 Goodbye!".cyan());
    Ok(())
}

fn report(outcome: SendOutcome) {
    match outcome {
        SendOutcome::Completed { pruned, .. } => {
            println!();
            if pruned {
                println!("{}", "(older messages were left out to fit the context)".dimmed());
            }
        }
        SendOutcome::Failed { .. } => println!(),
        SendOutcome::Cancelled => println!("{}", " [stopped]".yellow()),
        SendOutcome::Rejected(reason) => {
            println!();
            let message = match reason {
                RejectReason::EmptyInput => "Nothing to send",
                RejectReason::Busy => "Still answering the previous message",
                RejectReason::NoModel => "No model is ready",
            };
            println!("{}", message.yellow());
        }
    }
}

fn print_status(session: &ChatSession) {
    let snapshot = session.snapshot();
    println!("{}", "📋 Session:".cyan().bold());
    println!(
        "  model:      {}",
        snapshot.selected_model_id.as_deref().unwrap_or("-")
    );
    println!("  status:     {}", snapshot.model_status);
    println!("  progress:   {:.0}%", snapshot.download_progress);
    println!("  messages:   {}", snapshot.messages.len());
    println!(
        "  context:    {}",
        if snapshot.use_context_history { "on" } else { "off" }
    );
    println!("  characters: {}", snapshot.total_token);
    if let Some(remain) = snapshot.remain_tokens {
        println!("  after trim: {}", remain);
    }
    if let Some(summary) = snapshot.conversation_summary {
        println!("  summary:    {}", summary);
    }
}
